use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::ChainSpec;
use crate::logger;
use crate::supervisor::{LaunchMode, ProcessControl, ProcessHandle};

/// A companion process is held if and only if the chain is running.
#[derive(Debug)]
pub enum ChainState {
    Stopped,
    Running(ProcessHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPhase {
    Stopped,
    Running,
}

impl ChainState {
    pub fn phase(&self) -> ChainPhase {
        match self {
            ChainState::Stopped => ChainPhase::Stopped,
            ChainState::Running(_) => ChainPhase::Running,
        }
    }
}

struct Chain {
    companion: PathBuf,
    state: ChainState,
}

struct Chains {
    by_parent: HashMap<PathBuf, Chain>,
    /// Set by `stop_all`. A closed controller never launches again.
    closed: bool,
}

/// Toggles companion processes on repeated runs of their parent script.
///
/// All state lives behind one mutex held for the whole toggle, so an activation
/// that arrives while a terminate is in flight waits and then starts fresh.
pub struct ChainController {
    supervisor: Arc<dyn ProcessControl>,
    chains: Mutex<Chains>,
}

impl ChainController {
    pub fn new(supervisor: Arc<dyn ProcessControl>, specs: &BTreeMap<PathBuf, ChainSpec>) -> Self {
        let by_parent = specs
            .iter()
            .map(|(parent, spec)| {
                (parent.clone(), Chain { companion: spec.companion.clone(), state: ChainState::Stopped })
            })
            .collect();
        Self { supervisor, chains: Mutex::new(Chains { by_parent, closed: false }) }
    }

    pub fn is_chained(&self, parent: &Path) -> bool {
        self.lock().by_parent.contains_key(parent)
    }

    pub fn phase(&self, parent: &Path) -> Option<ChainPhase> {
        self.lock().by_parent.get(parent).map(|c| c.state.phase())
    }

    /// Flip the chain bound to `parent`. Returns the new phase, or `None` when
    /// `parent` has no chain. After `stop_all` the phase is left as is.
    pub fn activate(&self, parent: &Path) -> Option<ChainPhase> {
        let mut chains = self.lock();
        let closed = chains.closed;
        let chain = chains.by_parent.get_mut(parent)?;
        if closed {
            logger::warn_p("chain", &format!("shutting down; not toggling {}", chain.companion.display()));
            return Some(chain.state.phase());
        }

        chain.state = match std::mem::replace(&mut chain.state, ChainState::Stopped) {
            ChainState::Stopped => match self.supervisor.launch(&chain.companion, LaunchMode::Detached) {
                Ok(handle) => {
                    logger::info_p("chain", &format!("started {}", chain.companion.display()));
                    ChainState::Running(handle)
                }
                Err(e) => {
                    logger::error_p("chain", &e.to_string());
                    ChainState::Stopped
                }
            },
            ChainState::Running(handle) => {
                if let Err(e) = self.supervisor.terminate(handle) {
                    logger::error_p("chain", &format!("{} (best effort)", e));
                }
                logger::info_p("chain", &format!("stopped {}", chain.companion.display()));
                ChainState::Stopped
            }
        };
        Some(chain.state.phase())
    }

    /// Terminate every running companion and refuse later activations.
    /// Returns how many were running.
    pub fn stop_all(&self) -> usize {
        let mut chains = self.lock();
        chains.closed = true;
        let mut stopped = 0;
        for chain in chains.by_parent.values_mut() {
            if let ChainState::Running(handle) = std::mem::replace(&mut chain.state, ChainState::Stopped) {
                if let Err(e) = self.supervisor.terminate(handle) {
                    logger::error_p("chain", &format!("{} (best effort)", e));
                }
                stopped += 1;
            }
        }
        if stopped > 0 {
            logger::info_p("chain", &format!("stopped {} running chain(s)", stopped));
        }
        stopped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Chains> {
        self.chains.lock().unwrap_or_else(|p| p.into_inner())
    }
}
