//! Global hotkeys for the main palette and script `@shortcut` tags.
//!
//! Accelerators are written `Mod+Mod+Key` (`Super+Shift+K`, `Ctrl+Alt+F5`).
//! The OS side lives behind [`HotkeyBackend`] so registration rules can be
//! exercised without a display server.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use global_hotkey::hotkey::{Code, HotKey, Modifiers as HkModifiers};
use global_hotkey::{Error as HotkeyError, GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{HostError, Result};
use crate::logging;

/// Errors that can occur when parsing an accelerator string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcceleratorParseError {
    #[error("shortcut string is empty")]
    Empty,
    #[error("shortcut has no key, only modifiers")]
    MissingKey,
    #[error("unknown token '{0}' in shortcut")]
    UnknownToken(String),
    #[error("unknown key '{0}'")]
    UnknownKey(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Modifiers {
    /// Super / Cmd / Meta
    pub super_key: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
}

/// A parsed accelerator: modifiers plus exactly one key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Accelerator {
    pub modifiers: Modifiers,
    pub code: Code,
}

impl Accelerator {
    pub fn parse(s: &str) -> std::result::Result<Self, AcceleratorParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AcceleratorParseError::Empty);
        }

        let mut modifiers = Modifiers::default();
        let mut key_part: Option<&str> = None;

        for part in s.split('+').map(str::trim).filter(|p| !p.is_empty()) {
            match part.to_lowercase().as_str() {
                "super" | "cmd" | "command" | "meta" | "win" => modifiers.super_key = true,
                "ctrl" | "control" => modifiers.ctrl = true,
                "alt" | "option" | "opt" => modifiers.alt = true,
                "shift" => modifiers.shift = true,
                _ => {
                    if key_part.is_some() {
                        return Err(AcceleratorParseError::UnknownToken(part.to_string()));
                    }
                    key_part = Some(part);
                }
            }
        }

        let key = key_part.ok_or(AcceleratorParseError::MissingKey)?;
        let code =
            key_code(key).ok_or_else(|| AcceleratorParseError::UnknownKey(key.to_string()))?;
        Ok(Self { modifiers, code })
    }

    fn hotkey(&self) -> HotKey {
        let mut mods = HkModifiers::empty();
        if self.modifiers.super_key {
            mods |= HkModifiers::SUPER;
        }
        if self.modifiers.ctrl {
            mods |= HkModifiers::CONTROL;
        }
        if self.modifiers.alt {
            mods |= HkModifiers::ALT;
        }
        if self.modifiers.shift {
            mods |= HkModifiers::SHIFT;
        }
        HotKey::new(Some(mods), self.code)
    }

    /// Stable registration id for this accelerator
    pub fn id(&self) -> u32 {
        self.hotkey().id()
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.modifiers;
        for (on, label) in [
            (m.super_key, "Super"),
            (m.ctrl, "Ctrl"),
            (m.alt, "Alt"),
            (m.shift, "Shift"),
        ] {
            if on {
                write!(f, "{}+", label)?;
            }
        }
        write!(f, "{}", self.code)
    }
}

fn key_code(key: &str) -> Option<Code> {
    let lower = key.to_lowercase();
    let mut chars = lower.chars();
    if let (Some(c), None) = (chars.next(), chars.clone().next()) {
        if c.is_ascii_lowercase() {
            return letter_code(c);
        }
        if c.is_ascii_digit() {
            return digit_code(c);
        }
    }

    let code = match lower.as_str() {
        "f1" => Code::F1,
        "f2" => Code::F2,
        "f3" => Code::F3,
        "f4" => Code::F4,
        "f5" => Code::F5,
        "f6" => Code::F6,
        "f7" => Code::F7,
        "f8" => Code::F8,
        "f9" => Code::F9,
        "f10" => Code::F10,
        "f11" => Code::F11,
        "f12" => Code::F12,
        "space" => Code::Space,
        "enter" | "return" => Code::Enter,
        "tab" => Code::Tab,
        "escape" | "esc" => Code::Escape,
        "backspace" => Code::Backspace,
        "delete" | "del" => Code::Delete,
        "up" | "arrowup" => Code::ArrowUp,
        "down" | "arrowdown" => Code::ArrowDown,
        "left" | "arrowleft" => Code::ArrowLeft,
        "right" | "arrowright" => Code::ArrowRight,
        "home" => Code::Home,
        "end" => Code::End,
        "pageup" => Code::PageUp,
        "pagedown" => Code::PageDown,
        ";" | "semicolon" => Code::Semicolon,
        "'" | "quote" => Code::Quote,
        "," | "comma" => Code::Comma,
        "." | "period" => Code::Period,
        "/" | "slash" => Code::Slash,
        "\\" | "backslash" => Code::Backslash,
        "[" | "bracketleft" => Code::BracketLeft,
        "]" | "bracketright" => Code::BracketRight,
        "-" | "minus" => Code::Minus,
        "=" | "equal" => Code::Equal,
        "`" | "backquote" => Code::Backquote,
        _ => return None,
    };
    Some(code)
}

fn letter_code(c: char) -> Option<Code> {
    const LETTERS: [Code; 26] = [
        Code::KeyA,
        Code::KeyB,
        Code::KeyC,
        Code::KeyD,
        Code::KeyE,
        Code::KeyF,
        Code::KeyG,
        Code::KeyH,
        Code::KeyI,
        Code::KeyJ,
        Code::KeyK,
        Code::KeyL,
        Code::KeyM,
        Code::KeyN,
        Code::KeyO,
        Code::KeyP,
        Code::KeyQ,
        Code::KeyR,
        Code::KeyS,
        Code::KeyT,
        Code::KeyU,
        Code::KeyV,
        Code::KeyW,
        Code::KeyX,
        Code::KeyY,
        Code::KeyZ,
    ];
    LETTERS.get((c as u8).checked_sub(b'a')? as usize).copied()
}

fn digit_code(c: char) -> Option<Code> {
    const DIGITS: [Code; 10] = [
        Code::Digit0,
        Code::Digit1,
        Code::Digit2,
        Code::Digit3,
        Code::Digit4,
        Code::Digit5,
        Code::Digit6,
        Code::Digit7,
        Code::Digit8,
        Code::Digit9,
    ];
    DIGITS.get((c as u8).checked_sub(b'0')? as usize).copied()
}

/// What a pressed hotkey should do
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HotkeyTarget {
    /// Show the main palette
    Main,
    Script(PathBuf),
}

impl fmt::Display for HotkeyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotkeyTarget::Main => write!(f, "the main shortcut"),
            HotkeyTarget::Script(path) => write!(
                f,
                "{}",
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string())
            ),
        }
    }
}

/// OS-level hotkey registration.
pub trait HotkeyBackend: Send {
    fn register(&mut self, accelerator: &Accelerator) -> Result<u32>;
    fn unregister(&mut self, accelerator: &Accelerator) -> Result<()>;
}

struct Binding {
    accelerator: Accelerator,
    target: HotkeyTarget,
}

/// Tracks which accelerator is bound to which target and refuses overlaps.
pub struct HotkeyRegistry {
    backend: Box<dyn HotkeyBackend>,
    /// hotkey id -> binding
    bindings: HashMap<u32, Binding>,
}

impl HotkeyRegistry {
    pub fn new(backend: Box<dyn HotkeyBackend>) -> Self {
        Self {
            backend,
            bindings: HashMap::new(),
        }
    }

    /// Bind `shortcut` to `target`.
    ///
    /// Fails without touching the existing binding when the accelerator is
    /// taken by another target, is unparseable, or is rejected by the OS.
    pub fn register(&mut self, target: HotkeyTarget, shortcut: &str) -> Result<u32> {
        let accelerator = Accelerator::parse(shortcut)
            .map_err(|e| HostError::Hotkey(format!("Invalid shortcut '{}': {}", shortcut, e)))?;
        let id = accelerator.id();

        if let Some(existing) = self.bindings.get(&id) {
            if existing.target == target {
                return Ok(id);
            }
            return Err(HostError::Hotkey(format!(
                "Hotkey '{}' for {} is already used by {}",
                accelerator, target, existing.target
            )));
        }

        let id = self.backend.register(&accelerator)?;
        logging::log(
            "HOTKEY",
            &format!("Registered hotkey '{}' for {} (id: {})", accelerator, target, id),
        );
        self.bindings.insert(
            id,
            Binding {
                accelerator,
                target,
            },
        );
        Ok(id)
    }

    /// Remove every binding for `target`; returns how many were removed
    pub fn unregister_target(&mut self, target: &HotkeyTarget) -> usize {
        let ids: Vec<u32> = self
            .bindings
            .iter()
            .filter(|(_, b)| &b.target == target)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.remove(*id);
        }
        ids.len()
    }

    /// Remove every script binding, keeping the main shortcut
    pub fn unregister_scripts(&mut self) -> usize {
        let ids: Vec<u32> = self
            .bindings
            .iter()
            .filter(|(_, b)| matches!(b.target, HotkeyTarget::Script(_)))
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.remove(*id);
        }
        ids.len()
    }

    fn remove(&mut self, id: u32) {
        if let Some(binding) = self.bindings.remove(&id) {
            if let Err(e) = self.backend.unregister(&binding.accelerator) {
                // Tracking is already updated
                warn!(hotkey = %binding.accelerator, error = %e, "Failed to unregister hotkey");
            }
            debug!(hotkey = %binding.accelerator, target = %binding.target, "Unregistered hotkey");
        }
    }

    pub fn target_for(&self, id: u32) -> Option<HotkeyTarget> {
        self.bindings.get(&id).map(|b| b.target.clone())
    }

    /// (accelerator, target) pairs, unordered
    pub fn bindings(&self) -> Vec<(String, HotkeyTarget)> {
        self.bindings
            .values()
            .map(|b| (b.accelerator.to_string(), b.target.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

fn format_hotkey_error(e: &HotkeyError, shortcut: &str) -> String {
    match e {
        HotkeyError::AlreadyRegistered(hk) => format!(
            "Hotkey '{}' is already registered by another application (ID: {})",
            shortcut,
            hk.id()
        ),
        HotkeyError::FailedToRegister(msg) => {
            format!("System rejected hotkey '{}': {}", shortcut, msg)
        }
        HotkeyError::OsError(os_err) => {
            format!("OS error registering '{}': {}", shortcut, os_err)
        }
        other => format!("Failed to register hotkey '{}': {}", shortcut, other),
    }
}

enum Op {
    Register(HotKey, String, Sender<Result<u32>>),
    Unregister(HotKey, Sender<Result<()>>),
}

/// `global-hotkey` backend.
///
/// The manager lives on its own thread; registrations are forwarded to it.
/// Presses are delivered to `on_press` with the hotkey id.
pub struct GlobalHotkeyBackend {
    ops: Sender<Op>,
}

impl GlobalHotkeyBackend {
    pub fn start(on_press: Arc<dyn Fn(u32) + Send + Sync>) -> Result<Self> {
        let (ops_tx, ops_rx) = mpsc::channel::<Op>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        thread::Builder::new()
            .name("hotkey-manager".into())
            .spawn(move || {
                let manager = match GlobalHotKeyManager::new() {
                    Ok(m) => {
                        let _ = ready_tx.send(Ok(()));
                        m
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(HostError::Hotkey(format!(
                            "Failed to create hotkey manager: {}",
                            e
                        ))));
                        return;
                    }
                };
                for op in ops_rx {
                    match op {
                        Op::Register(hotkey, label, reply) => {
                            let result = manager
                                .register(hotkey)
                                .map(|_| hotkey.id())
                                .map_err(|e| HostError::Hotkey(format_hotkey_error(&e, &label)));
                            let _ = reply.send(result);
                        }
                        Op::Unregister(hotkey, reply) => {
                            let result = manager
                                .unregister(hotkey)
                                .map_err(|e| HostError::Hotkey(e.to_string()));
                            let _ = reply.send(result);
                        }
                    }
                }
            })
            .map_err(|e| HostError::Hotkey(format!("Failed to start hotkey thread: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| HostError::Hotkey("Hotkey thread exited during startup".into()))??;

        thread::Builder::new()
            .name("hotkey-events".into())
            .spawn(move || {
                let receiver = GlobalHotKeyEvent::receiver();
                while let Ok(event) = receiver.recv() {
                    if event.state != HotKeyState::Pressed {
                        continue;
                    }
                    debug!(id = event.id, "Hotkey pressed");
                    on_press(event.id);
                }
            })
            .map_err(|e| HostError::Hotkey(format!("Failed to start hotkey listener: {}", e)))?;

        info!("Global hotkey backend started");
        Ok(Self { ops: ops_tx })
    }

    fn call<T>(&self, op: impl FnOnce(Sender<Result<T>>) -> Op) -> Result<T> {
        let (tx, rx) = mpsc::channel();
        self.ops
            .send(op(tx))
            .map_err(|_| HostError::Hotkey("Hotkey thread is not running".into()))?;
        rx.recv()
            .map_err(|_| HostError::Hotkey("Hotkey thread is not running".into()))?
    }
}

impl HotkeyBackend for GlobalHotkeyBackend {
    fn register(&mut self, accelerator: &Accelerator) -> Result<u32> {
        let hotkey = accelerator.hotkey();
        let label = accelerator.to_string();
        self.call(|reply| Op::Register(hotkey, label, reply))
    }

    fn unregister(&mut self, accelerator: &Accelerator) -> Result<()> {
        let hotkey = accelerator.hotkey();
        self.call(|reply| Op::Unregister(hotkey, reply))
    }
}

/// Used when global hotkeys are turned off or unavailable; every
/// registration fails and is logged like an OS conflict.
pub struct DisabledBackend;

impl HotkeyBackend for DisabledBackend {
    fn register(&mut self, accelerator: &Accelerator) -> Result<u32> {
        Err(HostError::Hotkey(format!(
            "Global hotkeys are disabled, '{}' was not registered",
            accelerator
        )))
    }

    fn unregister(&mut self, _accelerator: &Accelerator) -> Result<()> {
        Ok(())
    }
}
