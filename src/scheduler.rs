//! Cron-style script triggers.
//!
//! A script's `@schedule` tag is either a cron expression (`*/5 * * * *`)
//! or plain English (`every tuesday at 2pm`), which is translated to cron
//! first. A background thread checks due scripts and sends
//! [`SchedulerEvent::RunScript`].
//!
//! # Example Usage
//! ```rust,ignore
//! let (mut scheduler, rx) = Scheduler::new(Duration::from_secs(30));
//! scheduler.add_script(PathBuf::from("/kit/scripts/backup.ts"), "0 9 * * *")?;
//! scheduler.start()?;
//!
//! while let Ok(event) = rx.recv() {
//!     match event {
//!         SchedulerEvent::RunScript(path) => run(path),
//!         SchedulerEvent::Error(msg) => log_error(msg),
//!     }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::{HostError, Result};

/// Whether the schedule was written as cron or as English.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSource {
    Cron,
    /// Converted to cron with `english-to-cron`
    NaturalLanguage,
}

/// A script with its parsed cron schedule and next execution time.
#[derive(Debug, Clone)]
pub struct ScheduledScript {
    pub path: PathBuf,
    /// The cron expression in effect (after conversion from English)
    pub cron_expr: String,
    pub next_run: DateTime<Utc>,
    pub source: ScheduleSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A script is due to run
    RunScript(PathBuf),
    Error(String),
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Checks registered schedules on a background thread.
pub struct Scheduler {
    scripts: Arc<Mutex<Vec<ScheduledScript>>>,
    tx: Sender<SchedulerEvent>,
    check_interval: Duration,
    thread_handle: Option<JoinHandle<()>>,
    stop: Arc<StopSignal>,
}

impl Scheduler {
    /// Returns the scheduler and the receiver its events arrive on.
    pub fn new(check_interval: Duration) -> (Self, Receiver<SchedulerEvent>) {
        let (tx, rx) = channel();
        let scheduler = Scheduler {
            scripts: Arc::new(Mutex::new(Vec::new())),
            tx,
            check_interval,
            thread_handle: None,
            stop: Arc::new(StopSignal::default()),
        };
        (scheduler, rx)
    }

    /// Register (or replace) the schedule for `path`.
    ///
    /// Fails with [`HostError::Schedule`] when the text is neither valid cron
    /// nor translatable English.
    pub fn add_script(&self, path: PathBuf, schedule: &str) -> Result<ScheduledScript> {
        let (cron_expr, cron, source) = resolve_schedule(schedule)?;
        let now = Utc::now();
        let next_run = find_next_occurrence(&cron, &now)?;

        let scheduled = ScheduledScript {
            path: path.clone(),
            cron_expr,
            next_run,
            source,
        };

        let mut scripts = self.scripts.lock();
        if let Some(existing) = scripts.iter_mut().find(|s| s.path == path) {
            *existing = scheduled.clone();
            info!(
                path = %path.display(),
                cron = %scheduled.cron_expr,
                source = ?scheduled.source,
                next_run = %next_run,
                "Updated scheduled script"
            );
        } else {
            scripts.push(scheduled.clone());
            info!(
                path = %path.display(),
                cron = %scheduled.cron_expr,
                source = ?scheduled.source,
                next_run = %next_run,
                "Added scheduled script"
            );
        }
        Ok(scheduled)
    }

    pub fn remove_script(&self, path: &Path) -> bool {
        let mut scripts = self.scripts.lock();
        let initial_len = scripts.len();
        scripts.retain(|s| s.path != path);
        let removed = scripts.len() < initial_len;
        if removed {
            info!(path = %path.display(), "Removed scheduled script");
        }
        removed
    }

    /// Drop every schedule; returns how many were registered
    pub fn clear(&self) -> usize {
        let mut scripts = self.scripts.lock();
        let count = scripts.len();
        scripts.clear();
        count
    }

    pub fn list_scripts(&self) -> Vec<ScheduledScript> {
        self.scripts.lock().clone()
    }

    /// Start the background check loop.
    pub fn start(&mut self) -> Result<()> {
        if self.thread_handle.is_some() {
            return Err(HostError::Schedule("Scheduler already running".into()));
        }
        *self.stop.stopped.lock() = false;

        let scripts = Arc::clone(&self.scripts);
        let tx = self.tx.clone();
        let stop = Arc::clone(&self.stop);
        let interval = self.check_interval;

        let handle = thread::Builder::new()
            .name("scheduler".into())
            .spawn(move || scheduler_loop(scripts, tx, stop, interval))
            .map_err(|e| HostError::Schedule(format!("Failed to start scheduler thread: {}", e)))?;

        self.thread_handle = Some(handle);
        info!(check_interval_secs = interval.as_secs(), "Scheduler started");
        Ok(())
    }

    pub fn stop(&mut self) {
        {
            let mut stopped = self.stop.stopped.lock();
            *stopped = true;
            self.stop.wake.notify_all();
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            info!("Scheduler stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Scripts due at `now`; their next run is advanced past `now`.
fn take_due(scripts: &Mutex<Vec<ScheduledScript>>, now: DateTime<Utc>) -> Vec<PathBuf> {
    let mut due = Vec::new();
    for script in scripts.lock().iter_mut() {
        if now < script.next_run {
            continue;
        }
        due.push(script.path.clone());
        match parse_cron(&script.cron_expr).and_then(|cron| find_next_occurrence(&cron, &now)) {
            Ok(next) => {
                script.next_run = next;
                debug!(path = %script.path.display(), next_run = %next, "Updated next run time");
            }
            Err(e) => warn!(path = %script.path.display(), error = %e, "No next run time"),
        }
    }
    due
}

fn scheduler_loop(
    scripts: Arc<Mutex<Vec<ScheduledScript>>>,
    tx: Sender<SchedulerEvent>,
    stop: Arc<StopSignal>,
    check_interval: Duration,
) {
    info!(check_interval_secs = check_interval.as_secs(), "Scheduler loop started");
    loop {
        for path in take_due(&scripts, Utc::now()) {
            debug!(path = %path.display(), "Script due to run");
            if tx.send(SchedulerEvent::RunScript(path)).is_err() {
                warn!("Failed to send RunScript event, receiver dropped");
                return;
            }
        }

        let mut stopped = stop.stopped.lock();
        if *stopped {
            break;
        }
        stop.wake.wait_for(&mut stopped, check_interval);
        if *stopped {
            break;
        }
    }
    info!("Scheduler loop stopping");
}

/// Cron first, then English; returns the effective expression.
///
/// Text that starts like a cron expression (digit, `*` or `@`) is never
/// handed to the English translator.
pub fn resolve_schedule(schedule: &str) -> Result<(String, Cron, ScheduleSource)> {
    let schedule = schedule.trim();
    let looks_like_cron = schedule
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '*' || c == '@');
    if looks_like_cron {
        let cron = parse_cron(schedule)?;
        return Ok((schedule.to_string(), cron, ScheduleSource::Cron));
    }
    if let Ok(cron) = parse_cron(schedule) {
        return Ok((schedule.to_string(), cron, ScheduleSource::Cron));
    }
    let expr = natural_to_cron(schedule)
        .map_err(|_| HostError::Schedule(format!("Invalid schedule '{}'", schedule)))?;
    let cron = parse_cron(&expr)?;
    Ok((expr, cron, ScheduleSource::NaturalLanguage))
}

/// Parse a cron expression (5 fields, or 6 with seconds).
pub fn parse_cron(expr: &str) -> Result<Cron> {
    Cron::from_str(expr)
        .map_err(|e| HostError::Schedule(format!("Invalid cron expression '{}': {}", expr, e)))
}

/// "every tuesday at 2pm" -> "0 14 * * TUE"
pub fn natural_to_cron(text: &str) -> Result<String> {
    let expr = english_to_cron::str_cron_syntax(text)
        .map_err(|e| HostError::Schedule(format!("Failed to convert '{}' to cron: {:?}", text, e)))?;
    Ok(to_five_fields(&expr))
}

/// Quartz-style `sec min hour dom month dow year` -> `min hour dom month dow`
fn to_five_fields(expr: &str) -> String {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let fields = match fields.len() {
        7 => &fields[1..6],
        6 => &fields[1..],
        _ => &fields[..],
    };
    fields
        .iter()
        .map(|f| if *f == "?" { "*" } else { f })
        .collect::<Vec<_>>()
        .join(" ")
}

fn find_next_occurrence(cron: &Cron, after: &DateTime<Utc>) -> Result<DateTime<Utc>> {
    cron.find_next_occurrence(after, false)
        .map_err(|e| HostError::Schedule(format!("Failed to find next occurrence: {:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> Scheduler {
        Scheduler::new(Duration::from_millis(20)).0
    }

    #[test]
    fn test_parse_cron_valid() {
        for expr in ["* * * * *", "*/5 * * * *", "0 9 * * *", "30 14 * * 1"] {
            assert!(parse_cron(expr).is_ok(), "rejected {}", expr);
        }
    }

    #[test]
    fn test_parse_cron_invalid() {
        assert!(parse_cron("* * *").is_err());
        assert!(parse_cron("60 * * * *").is_err());
    }

    #[test]
    fn test_resolve_schedule_prefers_cron() {
        let (expr, _, source) = resolve_schedule(" 0 9 * * * ").unwrap();
        assert_eq!(expr, "0 9 * * *");
        assert_eq!(source, ScheduleSource::Cron);
    }

    #[test]
    fn test_resolve_schedule_english() {
        let (expr, _, source) = resolve_schedule("every day at 9am").unwrap();
        assert_eq!(source, ScheduleSource::NaturalLanguage);
        assert!(expr.contains('9'), "Expected hour 9 in cron: {}", expr);
    }

    #[test]
    fn test_to_five_fields() {
        assert_eq!(to_five_fields("0 0 14 ? * TUE *"), "0 14 * * TUE");
        assert_eq!(to_five_fields("0 */5 * * * ?"), "*/5 * * * *");
        assert_eq!(to_five_fields("0 9 * * *"), "0 9 * * *");
    }

    #[test]
    fn test_cron_looking_text_is_not_translated() {
        assert!(resolve_schedule("99 99 * * *").is_err());
    }

    #[test]
    fn test_resolve_schedule_rejects_garbage() {
        let err = resolve_schedule("!!! definitely not a schedule").err().unwrap();
        assert!(matches!(err, HostError::Schedule(_)));
    }

    #[test]
    fn test_add_update_remove() {
        let scheduler = scheduler();
        let path = PathBuf::from("/test/script.ts");

        scheduler.add_script(path.clone(), "* * * * *").unwrap();
        scheduler.add_script(path.clone(), "0 9 * * *").unwrap();
        let scripts = scheduler.list_scripts();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].cron_expr, "0 9 * * *");
        assert!(scripts[0].next_run > Utc::now());

        assert!(scheduler.remove_script(&path));
        assert!(!scheduler.remove_script(&path));
    }

    #[test]
    fn test_invalid_schedule_is_not_added() {
        let scheduler = scheduler();
        assert!(scheduler.add_script(PathBuf::from("/a.ts"), "61 * * * *").is_err());
        assert!(scheduler.list_scripts().is_empty());
    }

    #[test]
    fn test_take_due_advances_next_run() {
        let scheduler = scheduler();
        let path = PathBuf::from("/every-minute.ts");
        scheduler.add_script(path.clone(), "* * * * *").unwrap();
        scheduler.add_script(PathBuf::from("/daily.ts"), "0 9 * * *").unwrap();

        let first = scheduler.list_scripts()[0].next_run;
        let due = take_due(&scheduler.scripts, first);
        assert_eq!(due, vec![path.clone()]);

        let next = scheduler.list_scripts()[0].next_run;
        assert!(next > first);
        assert!(take_due(&scheduler.scripts, first).is_empty());
    }

    #[test]
    fn test_start_stop() {
        let mut scheduler = scheduler();
        scheduler.start().unwrap();
        assert!(scheduler.start().is_err());
        scheduler.stop();
        assert!(scheduler.thread_handle.is_none());
    }

    #[test]
    fn test_clear() {
        let scheduler = scheduler();
        scheduler.add_script(PathBuf::from("/a.ts"), "* * * * *").unwrap();
        scheduler.add_script(PathBuf::from("/b.ts"), "0 * * * *").unwrap();
        assert_eq!(scheduler.clear(), 2);
        assert!(scheduler.list_scripts().is_empty());
    }
}
