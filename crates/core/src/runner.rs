use std::path::Path;
use std::sync::Arc;

use crate::chain::ChainController;
use crate::error::CoreResult;
use crate::logger;
use crate::supervisor::{LaunchMode, ProcessControl, ProcessHandle};

/// Runs configured scripts and drives the chains bound to them.
pub struct ScriptRunner {
    supervisor: Arc<dyn ProcessControl>,
    chains: Arc<ChainController>,
}

impl ScriptRunner {
    pub fn new(supervisor: Arc<dyn ProcessControl>, chains: Arc<ChainController>) -> Self {
        Self { supervisor, chains }
    }

    /// Run `script` to completion, then toggle its chain if it has one.
    /// A failed run is logged and leaves the chain untouched.
    pub fn execute(&self, script: &Path, context: &str) -> CoreResult<()> {
        if let Err(e) = self.supervisor.launch(script, LaunchMode::Blocking) {
            logger::error_p("supervisor", &e.to_string());
            return Err(e);
        }
        logger::info_p("supervisor", &format!("script executed: {} {}", script.display(), context));
        self.chains.activate(script);
        Ok(())
    }

    /// Start a pipeline script in the background.
    pub fn spawn(&self, script: &Path) -> CoreResult<ProcessHandle> {
        self.supervisor.launch(script, LaunchMode::Detached).map_err(|e| {
            logger::error_p("supervisor", &e.to_string());
            e
        })
    }

    pub fn chains(&self) -> &Arc<ChainController> {
        &self.chains
    }
}
