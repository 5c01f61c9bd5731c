use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use crate::logger;
use crate::platform::Platform;
use crate::types::Activation;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Emits the clipboard text once per distinct value.
pub struct ClipboardWatcher {
    platform: Arc<dyn Platform>,
    previous: String,
    read_failing: bool,
}

impl ClipboardWatcher {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform, previous: String::new(), read_failing: false }
    }

    /// Take the current clipboard as the baseline so pre-existing content does
    /// not count as a change.
    pub fn prime(&mut self) {
        if let Some(text) = self.read() {
            self.previous = text;
        }
    }

    /// Read once; returns the new text when it differs from the last value seen.
    pub fn poll_once(&mut self) -> Option<String> {
        let text = self.read()?;
        if text == self.previous {
            return None;
        }
        self.previous = text.clone();
        Some(text)
    }

    pub fn run(mut self, tx: Sender<Activation>, stop: Arc<AtomicBool>) {
        self.prime();
        logger::info_p("clipboard", "watching");
        while !stop.load(Ordering::Acquire) {
            if let Some(text) = self.poll_once() {
                logger::info_p("clipboard", &format!("changed ({} chars)", text.chars().count()));
                if tx.send(Activation::ClipboardChanged(text)).is_err() {
                    return;
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        logger::info_p("clipboard", "stopped");
    }

    fn read(&mut self) -> Option<String> {
        match self.platform.clipboard_text() {
            Ok(text) => {
                self.read_failing = false;
                Some(text)
            }
            Err(e) => {
                if !self.read_failing {
                    logger::warn_p("clipboard", &e.to_string());
                    self.read_failing = true;
                }
                None
            }
        }
    }
}
