//! JSONL bridge to the presentation layer.
//!
//! Commands arrive one JSON object per line on stdin; every [`HostEvent`]
//! leaves as one JSON line on stdout.
//!
//! ```json
//! {"type": "run", "script": "greet.ts", "args": ["Ada"]}
//! {"type": "respond", "value": "Ada"}
//! {"type": "selectTab", "tab": "Notes"}
//! {"type": "kill", "pid": 4242}
//! ```
//!
//! ```bash
//! echo '{"type": "listScripts"}' | script-kit-runner
//! ```

use std::io::{BufRead, Write};
use std::thread::{self, JoinHandle};

use serde::Deserialize;
use serde_json::Value;

use crate::logging;
use crate::ui::HostEvent;

/// Capacity of the command queue; stdin rarely sees more than a few per second
pub const COMMAND_QUEUE_CAPACITY: usize = 100;

/// Commands the presentation layer can send
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UiCommand {
    /// Answer the pending prompt; `null` cancels
    Respond {
        #[serde(default)]
        value: Value,
    },
    SelectTab {
        tab: String,
    },
    Preview {
        key: String,
    },
    DropFile {
        path: String,
    },
    Event {
        event: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default, rename = "widgetId")]
        widget_id: Option<String>,
    },
    Textarea {
        #[serde(default)]
        value: Option<String>,
    },
    Run {
        script: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Kill {
        pid: u32,
    },
    ListProcs,
    ListScripts,
    /// Source text of one script, answered with `script-source`
    GetScript {
        name: String,
    },
    /// Recent host log lines, answered with `logs`
    GetLogs,
    SetColorScheme {
        name: String,
    },
    SetFont {
        font: String,
    },
    SetShortcut {
        shortcut: String,
    },
    CreateScript {
        name: String,
    },
    RemoveScript {
        name: String,
    },
    RenameScript {
        from: String,
        to: String,
    },
    SetConfig {
        key: String,
        value: Value,
    },
    /// Kill running scripts and exit
    Quit,
}

impl UiCommand {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Prompt answer text for a `respond` value: strings as-is, other scalars
/// stringified, `null` (or a structure) cancels.
pub fn response_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Read commands from `reader` on a thread, parsed lines only.
///
/// The thread exits at EOF or once `on_command` returns false. Unparseable
/// lines are logged and skipped.
pub fn spawn_command_reader<R, F>(reader: R, on_command: F) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
    F: Fn(UiCommand) -> bool + Send + 'static,
{
    thread::spawn(move || {
        logging::log("STDIN", "Command listener started");
        let mut reader = reader;
        let mut buf = Vec::with_capacity(1024);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    logging::log("STDIN", &format!("Error reading stdin: {}", e));
                    break;
                }
            }
            let Ok(line) = std::str::from_utf8(&buf) else {
                logging::log("STDIN", "Skipping command line that is not UTF-8");
                continue;
            };
            if line.trim().is_empty() {
                continue;
            }
            match UiCommand::parse(line) {
                Ok(cmd) => {
                    logging::log_debug("STDIN", &format!("Parsed command: {:?}", cmd));
                    if !on_command(cmd) {
                        logging::log("STDIN", "Command channel closed, exiting");
                        break;
                    }
                }
                Err(e) => {
                    logging::log("STDIN", &format!("Failed to parse command: {}", e));
                }
            }
        }
        logging::log("STDIN", "Command listener exiting");
    })
}

/// Drain `events` into `writer` as JSON lines until the channel closes.
pub fn spawn_event_writer<W>(events: async_channel::Receiver<HostEvent>, mut writer: W) -> JoinHandle<()>
where
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        while let Ok(event) = events.recv_blocking() {
            let line = match serde_json::to_string(&event) {
                Ok(line) => line,
                Err(e) => {
                    logging::log_error("UI", &e.to_string(), Some("serializing host event"));
                    continue;
                }
            };
            if writeln!(writer, "{}", line).and_then(|_| writer.flush()).is_err() {
                logging::log("UI", "Event output closed, exiting");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::Arc;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            UiCommand::parse(r#"{"type":"run","script":"greet.ts","args":["Ada"]}"#).unwrap(),
            UiCommand::Run {
                script: "greet.ts".into(),
                args: vec!["Ada".into()],
            }
        );
        assert_eq!(
            UiCommand::parse(r#"{"type":"respond","value":null}"#).unwrap(),
            UiCommand::Respond { value: Value::Null }
        );
        assert_eq!(
            UiCommand::parse(r#"{"type":"event","event":"click","args":[1],"widgetId":"w1"}"#)
                .unwrap(),
            UiCommand::Event {
                event: "click".into(),
                args: vec![json!(1)],
                widget_id: Some("w1".into()),
            }
        );
        assert_eq!(
            UiCommand::parse(r#"{"type":"renameScript","from":"a","to":"b"}"#).unwrap(),
            UiCommand::RenameScript {
                from: "a".into(),
                to: "b".into(),
            }
        );
        assert_eq!(UiCommand::parse(r#"{"type":"listProcs"}"#).unwrap(), UiCommand::ListProcs);
        assert_eq!(
            UiCommand::parse(r#"{"type":"getScript","name":"greet"}"#).unwrap(),
            UiCommand::GetScript { name: "greet".into() }
        );
        assert_eq!(UiCommand::parse(r#"{"type":"getLogs"}"#).unwrap(), UiCommand::GetLogs);
    }

    #[test]
    fn test_parse_rejects_unknown_and_incomplete() {
        assert!(UiCommand::parse(r#"{"type":"launchRockets"}"#).is_err());
        assert!(UiCommand::parse(r#"{"type":"kill"}"#).is_err());
        assert!(UiCommand::parse("not json").is_err());
    }

    #[test]
    fn test_response_text() {
        assert_eq!(response_text(&json!("yes")), Some("yes".into()));
        assert_eq!(response_text(&json!(3)), Some("3".into()));
        assert_eq!(response_text(&Value::Null), None);
        assert_eq!(response_text(&json!({"a": 1})), None);
    }

    #[test]
    fn test_reader_skips_bad_lines() {
        let input = "{\"type\":\"listScripts\"}\n\ngarbage\n{\"type\":\"kill\",\"pid\":7}\n";
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        spawn_command_reader(Cursor::new(input), move |cmd| {
            sink.lock().push(cmd);
            true
        })
        .join()
        .unwrap();
        assert_eq!(
            seen.lock().clone(),
            vec![UiCommand::ListScripts, UiCommand::Kill { pid: 7 }]
        );
    }

    #[test]
    fn test_reader_survives_non_utf8_line() {
        let mut input = b"\xff\xfe\n".to_vec();
        input.extend_from_slice(b"{\"type\":\"listProcs\"}\n");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        spawn_command_reader(Cursor::new(input), move |cmd| {
            sink.lock().push(cmd);
            true
        })
        .join()
        .unwrap();
        assert_eq!(seen.lock().clone(), vec![UiCommand::ListProcs]);
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_event_writer_emits_json_lines() {
        let (tx, rx) = async_channel::unbounded();
        let buf = SharedBuf::default();
        let writer = spawn_event_writer(rx, buf.clone());

        tx.send_blocking(HostEvent::ProcExit { pid: 9 }).unwrap();
        tx.send_blocking(HostEvent::ArgEnd).unwrap();
        drop(tx);
        writer.join().unwrap();

        let out = String::from_utf8(buf.0.lock().clone()).unwrap();
        let lines: Vec<Value> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines[0], json!({"event": "proc-exit", "pid": 9}));
        assert_eq!(lines[1], json!({"event": "arg-end"}));
    }
}
