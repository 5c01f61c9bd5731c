use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{PixelKind, PixelSpec};
use crate::logger;
use crate::platform::Platform;
use crate::types::{Activation, ColorValue};

pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Minimum time between two firings of the same coordinate.
pub const MIN_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PixelWatchState {
    pub is_active: bool,
    pub last_color: Option<ColorValue>,
    pub last_execution: Option<Instant>,
}

struct Watched {
    name: String,
    x: i32,
    y: i32,
    kind: PixelKind,
    state: PixelWatchState,
    read_failing: bool,
}

impl Watched {
    /// Advance the state machine with one sampled color.
    fn observe(&mut self, color: ColorValue, now: Instant) -> Option<Activation> {
        let state = &mut self.state;
        if state.last_color == Some(color) {
            return None;
        }
        state.last_color = Some(color);

        if let Some(last) = state.last_execution {
            if now.saturating_duration_since(last) < MIN_INTERVAL {
                return None;
            }
        }

        match &self.kind {
            PixelKind::EdgePair { initial_color, final_color, key_action, forward_to_chat } => {
                if !state.is_active && color == *initial_color {
                    state.is_active = true;
                    None
                } else if state.is_active && color == *final_color {
                    state.is_active = false;
                    state.last_execution = Some(now);
                    Some(Activation::PixelKeys {
                        name: self.name.clone(),
                        keys: key_action.clone(),
                        forward_to_chat: *forward_to_chat,
                    })
                } else {
                    None
                }
            }
            PixelKind::Level { expected_color, script } => {
                if color != *expected_color {
                    state.is_active = false;
                    None
                } else if !state.is_active {
                    state.is_active = true;
                    state.last_execution = Some(now);
                    Some(Activation::PixelScript { name: self.name.clone(), script: script.clone() })
                } else {
                    None
                }
            }
        }
    }
}

/// Polls the configured coordinates and turns recognized color transitions
/// into activations. Owns every `PixelWatchState`; only its own loop mutates them.
pub struct PixelWatcher {
    platform: Arc<dyn Platform>,
    entries: Vec<Watched>,
}

impl PixelWatcher {
    pub fn new(platform: Arc<dyn Platform>, pixels: &BTreeMap<String, PixelSpec>) -> Self {
        let entries = pixels
            .iter()
            .map(|(name, spec)| Watched {
                name: name.clone(),
                x: spec.coordinates.0,
                y: spec.coordinates.1,
                kind: spec.kind.clone(),
                state: PixelWatchState::default(),
                read_failing: false,
            })
            .collect();
        Self { platform, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state(&self, name: &str) -> Option<&PixelWatchState> {
        self.entries.iter().find(|e| e.name == name).map(|e| &e.state)
    }

    /// Feed one color for `name` as if it had been sampled at `now`.
    pub fn observe(&mut self, name: &str, color: ColorValue, now: Instant) -> Option<Activation> {
        self.entries.iter_mut().find(|e| e.name == name)?.observe(color, now)
    }

    /// Sample every coordinate once, in configuration order.
    pub fn tick(&mut self, now: Instant) -> Vec<Activation> {
        let mut fired = Vec::new();
        for entry in &mut self.entries {
            let color = match self.platform.pixel_color(entry.x, entry.y) {
                Ok(c) => c,
                Err(e) => {
                    if !entry.read_failing {
                        logger::warn_p("pixel", &format!("{}: {}", entry.name, e));
                        entry.read_failing = true;
                    }
                    continue;
                }
            };
            entry.read_failing = false;
            if let Some(activation) = entry.observe(color, now) {
                logger::info_p("pixel", &format!("{}: color {:#08x} fired", entry.name, color));
                fired.push(activation);
            }
        }
        fired
    }

    /// Poll until `stop` is raised. Each activation is handed to the reactor.
    pub fn run(mut self, tx: Sender<Activation>, stop: Arc<AtomicBool>) {
        logger::info_p("pixel", &format!("watching {} coordinate(s)", self.entries.len()));
        while !stop.load(Ordering::Acquire) {
            for activation in self.tick(Instant::now()) {
                if tx.send(activation).is_err() {
                    return;
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        logger::info_p("pixel", "stopped");
    }
}
