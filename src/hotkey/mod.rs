//! Global key controls for the terminal driver, backed by `rdev`.
//!
//! | Key (default) | Control                                     |
//! |---------------|---------------------------------------------|
//! | F9            | start a trial / stop recording              |
//! | F10           | retry a failed item / replay narration      |
//! | Escape        | quit the session                            |
//! | 1 … 9         | answer a multiple-choice item               |
//!
//! `rdev::listen()` blocks forever, so [`KeyListener::start`] runs it on a
//! dedicated OS thread and forwards [`ControlEvent`]s over a tokio channel.
//!
//! ```no_run
//! use tokio::sync::mpsc;
//! use therapy_coach::config::HotkeyConfig;
//! use therapy_coach::hotkey::{KeyListener, KeyMap};
//!
//! let keys = KeyMap::from_config(&HotkeyConfig::default()).expect("key names");
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! let _listener = KeyListener::start(keys, tx).expect("listener thread");
//! ```

pub mod listener;

use thiserror::Error;

use crate::config::HotkeyConfig;

pub use listener::KeyListener;

// ---------------------------------------------------------------------------
// ControlEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Primary,
    Retry,
    Quit,
    /// Number key `1`..=`9`.
    Answer(u32),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HotkeyError {
    #[error("unknown key name '{0}'")]
    UnknownKey(String),

    #[error("key '{0}' is bound to more than one control")]
    Duplicate(String),
}

// ---------------------------------------------------------------------------
// KeyMap
// ---------------------------------------------------------------------------

/// Configured control keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMap {
    pub primary: rdev::Key,
    pub retry: rdev::Key,
    pub quit: rdev::Key,
}

impl KeyMap {
    pub fn from_config(config: &HotkeyConfig) -> Result<Self, HotkeyError> {
        let lookup = |name: &str| parse_key(name).ok_or_else(|| HotkeyError::UnknownKey(name.into()));
        let map = Self {
            primary: lookup(&config.primary_key)?,
            retry: lookup(&config.retry_key)?,
            quit: lookup(&config.quit_key)?,
        };

        if map.primary == map.retry || map.primary == map.quit {
            return Err(HotkeyError::Duplicate(config.primary_key.clone()));
        }
        if map.retry == map.quit {
            return Err(HotkeyError::Duplicate(config.retry_key.clone()));
        }
        if answer_digit(map.primary).is_some() {
            return Err(HotkeyError::Duplicate(config.primary_key.clone()));
        }
        Ok(map)
    }

    /// Control bound to a pressed key.
    pub fn event_for(&self, key: rdev::Key) -> Option<ControlEvent> {
        if key == self.primary {
            Some(ControlEvent::Primary)
        } else if key == self.retry {
            Some(ControlEvent::Retry)
        } else if key == self.quit {
            Some(ControlEvent::Quit)
        } else {
            answer_digit(key).map(ControlEvent::Answer)
        }
    }
}

fn answer_digit(key: rdev::Key) -> Option<u32> {
    use rdev::Key::*;
    Some(match key {
        Num1 | Kp1 => 1,
        Num2 | Kp2 => 2,
        Num3 | Kp3 => 3,
        Num4 | Kp4 => 4,
        Num5 | Kp5 => 5,
        Num6 | Kp6 => 6,
        Num7 | Kp7 => 7,
        Num8 | Kp8 => 8,
        Num9 | Kp9 => 9,
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// parse_key
// ---------------------------------------------------------------------------

/// Parse a key name from the config into an [`rdev::Key`].
///
/// Function keys, common named keys and single letters; case-insensitive.
///
/// ```
/// use therapy_coach::hotkey::parse_key;
///
/// assert_eq!(parse_key("F9"), Some(rdev::Key::F9));
/// assert_eq!(parse_key("esc"), Some(rdev::Key::Escape));
/// assert_eq!(parse_key("r"), Some(rdev::Key::KeyR));
/// assert_eq!(parse_key("xyz"), None);
/// ```
pub fn parse_key(name: &str) -> Option<rdev::Key> {
    use rdev::Key;

    let upper = name.trim().to_ascii_uppercase();
    let key = match upper.as_str() {
        "F1" => Key::F1,
        "F2" => Key::F2,
        "F3" => Key::F3,
        "F4" => Key::F4,
        "F5" => Key::F5,
        "F6" => Key::F6,
        "F7" => Key::F7,
        "F8" => Key::F8,
        "F9" => Key::F9,
        "F10" => Key::F10,
        "F11" => Key::F11,
        "F12" => Key::F12,

        "ESCAPE" | "ESC" => Key::Escape,
        "SPACE" => Key::Space,
        "RETURN" | "ENTER" => Key::Return,
        "TAB" => Key::Tab,
        "BACKSPACE" => Key::Backspace,
        "DELETE" | "DEL" => Key::Delete,
        "HOME" => Key::Home,
        "END" => Key::End,
        "PAGEUP" => Key::PageUp,
        "PAGEDOWN" => Key::PageDown,
        "UP" | "UPARROW" => Key::UpArrow,
        "DOWN" | "DOWNARROW" => Key::DownArrow,
        "LEFT" | "LEFTARROW" => Key::LeftArrow,
        "RIGHT" | "RIGHTARROW" => Key::RightArrow,
        "PAUSE" => Key::Pause,

        letter if letter.len() == 1 => return letter_key(letter.as_bytes()[0]),
        _ => return None,
    };
    Some(key)
}

fn letter_key(c: u8) -> Option<rdev::Key> {
    use rdev::Key::*;
    const LETTERS: [rdev::Key; 26] = [
        KeyA, KeyB, KeyC, KeyD, KeyE, KeyF, KeyG, KeyH, KeyI, KeyJ, KeyK, KeyL, KeyM, KeyN, KeyO,
        KeyP, KeyQ, KeyR, KeyS, KeyT, KeyU, KeyV, KeyW, KeyX, KeyY, KeyZ,
    ];
    c.is_ascii_uppercase()
        .then(|| LETTERS[(c - b'A') as usize])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
