//! Dedicated OS-thread key listener using `rdev::listen`.
//!
//! `rdev::listen` has no shutdown API.  Dropping [`KeyListener`] sets a stop
//! flag so the callback discards further events; the thread itself stays
//! blocked in rdev until the process exits.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::mpsc;

use super::{ControlEvent, KeyMap};

/// Handle to the listener thread.  Drop it to stop forwarding events.
pub struct KeyListener {
    stop: Arc<AtomicBool>,
    _thread: std::thread::JoinHandle<()>,
}

impl KeyListener {
    /// Forward presses of the keys in `keys` as [`ControlEvent`]s on `tx`.
    ///
    /// Key releases are ignored, as are presses while the previous press of
    /// the same key is still held (auto-repeat).
    pub fn start(keys: KeyMap, tx: mpsc::UnboundedSender<ControlEvent>) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("key-listener".into())
            .spawn(move || {
                let mut held: Option<rdev::Key> = None;
                let result = rdev::listen(move |event| {
                    if stop_flag.load(Ordering::Relaxed) {
                        return;
                    }
                    match event.event_type {
                        rdev::EventType::KeyPress(key) if held != Some(key) => {
                            held = Some(key);
                            if let Some(control) = keys.event_for(key) {
                                log::debug!("hotkey: {key:?} → {control:?}");
                                let _ = tx.send(control);
                            }
                        }
                        rdev::EventType::KeyRelease(key) if held == Some(key) => held = None,
                        _ => {}
                    }
                });

                if let Err(e) = result {
                    log::error!("hotkey: rdev::listen exited with error: {e:?}");
                }
            })?;

        log::info!(
            "hotkey: listening (start/stop {:?}, retry {:?}, quit {:?})",
            keys.primary,
            keys.retry,
            keys.quit
        );
        Ok(Self {
            stop,
            _thread: thread,
        })
    }
}

impl Drop for KeyListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
