use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::chat::{clipboard_reply, ChatGateway, ChatService};
use crate::chain::ChainController;
use crate::clipboard::ClipboardWatcher;
use crate::completion::CompletionService;
use crate::config::MonitorConfig;
use crate::error::{CoreError, CoreResult};
use crate::intent::IntentDispatcher;
use crate::logger;
use crate::pixel::PixelWatcher;
use crate::platform::hotkey::{self, HotkeyRegistry};
use crate::platform::Platform;
use crate::runner::ScriptRunner;
use crate::supervisor::ProcessControl;
use crate::types::{Action, Activation, ChatId, Origin};

/// Delay between a key action and forwarding the clipboard it produced.
const FORWARD_DELAY: Duration = Duration::from_millis(500);
/// Upper bound on how long a worker waits before re-checking the stop flag.
const REACTOR_WAKE: Duration = Duration::from_millis(200);

/// External collaborators the monitoring system is wired to.
pub struct Services {
    pub platform: Arc<dyn Platform>,
    pub supervisor: Arc<dyn ProcessControl>,
    pub chat: Arc<dyn ChatService>,
    pub completion: Arc<dyn CompletionService>,
}

/// Owns the configuration and every component; drives startup, the chat
/// loop and shutdown.
pub struct MonitoringSystem {
    config: Arc<MonitorConfig>,
    platform: Arc<dyn Platform>,
    runner: Arc<ScriptRunner>,
    intent: Arc<IntentDispatcher>,
    gateway: Arc<ChatGateway>,
    stop: Arc<AtomicBool>,
    shut_down: AtomicBool,
}

impl MonitoringSystem {
    pub fn new(config: MonitorConfig, services: Services) -> CoreResult<Self> {
        for dir in config.directories.all() {
            std::fs::create_dir_all(dir)
                .map_err(|source| CoreError::FileWriteFailed { path: dir.to_path_buf(), source })?;
        }

        let config = Arc::new(config);
        let chains = Arc::new(ChainController::new(services.supervisor.clone(), &config.chained_scripts));
        let runner = Arc::new(ScriptRunner::new(services.supervisor, chains));
        let intent = Arc::new(IntentDispatcher::new(services.completion, &config));
        let gateway = Arc::new(ChatGateway::new(
            services.chat,
            services.platform.clone(),
            intent.clone(),
            runner.clone(),
            config.clone(),
        )?);

        Ok(Self {
            config,
            platform: services.platform,
            runner,
            intent,
            gateway,
            stop: Arc::new(AtomicBool::new(false)),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn runner(&self) -> &Arc<ScriptRunner> {
        &self.runner
    }

    pub fn gateway(&self) -> &Arc<ChatGateway> {
        &self.gateway
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Start everything, block in the chat loop until `should_stop` returns
    /// true, then shut down.
    pub fn run(&self, should_stop: &dyn Fn() -> bool) {
        let (tx, rx) = mpsc::channel();

        self.register_hotkeys(tx.clone());
        self.run_startup_scripts();
        self.start_workers(tx, rx);

        logger::info("system started");
        self.gateway.run(&|| should_stop() || self.is_stopping());
        self.shutdown();
    }

    /// Stop the watchers and terminate running chains. Only the first call
    /// does anything.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        logger::info("shutting down");
        self.stop.store(true, Ordering::Release);
        let stopped = self.runner.chains().stop_all();
        logger::info(&format!("shutdown complete ({} chain(s) terminated)", stopped));
    }

    fn register_hotkeys(&self, tx: Sender<Activation>) {
        let mut registry = HotkeyRegistry::new();
        for (combo, script) in &self.config.hotkeys {
            if let Err(e) = registry.bind(combo, script.clone()) {
                logger::warn_p("hotkey", &format!("skipping '{}': {}", combo, e));
            }
        }
        if registry.is_empty() {
            return;
        }
        hotkey::start_hotkey_listener(registry, tx);
    }

    fn run_startup_scripts(&self) {
        for script in &self.config.startup_scripts {
            if script.as_os_str().is_empty() {
                continue;
            }
            let _ = self.runner.execute(script, "(startup)");
        }
    }

    fn start_workers(&self, tx: Sender<Activation>, rx: Receiver<Activation>) {
        if !self.config.pixels.is_empty() {
            let watcher = PixelWatcher::new(self.platform.clone(), &self.config.pixels);
            let (tx, stop) = (tx.clone(), self.stop.clone());
            thread::spawn(move || watcher.run(tx, stop));
        }

        let watcher = ClipboardWatcher::new(self.platform.clone());
        let stop = self.stop.clone();
        thread::spawn(move || watcher.run(tx, stop));

        let (clip_tx, clip_rx) = mpsc::channel();
        let resolver = ClipboardResolver {
            runner: self.runner.clone(),
            intent: self.intent.clone(),
            gateway: self.gateway.clone(),
            primary: self.config.primary_chat(),
        };
        let stop = self.stop.clone();
        thread::spawn(move || resolver.run(clip_rx, stop));

        let reactor = Reactor {
            platform: self.platform.clone(),
            runner: self.runner.clone(),
            gateway: self.gateway.clone(),
            clipboard: clip_tx,
        };
        let stop = self.stop.clone();
        thread::spawn(move || reactor.run(rx, stop));
    }
}

/// Receive until `stop` is raised or every sender is gone.
fn serve<T>(rx: Receiver<T>, stop: &AtomicBool, mut handle: impl FnMut(T)) {
    while !stop.load(Ordering::Acquire) {
        match rx.recv_timeout(REACTOR_WAKE) {
            Ok(item) => handle(item),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Single consumer of activations from the watchers and hotkey listener.
/// Clipboard text is passed on to the [`ClipboardResolver`] so a slow
/// completion call never holds up hotkeys or pixels.
pub struct Reactor {
    platform: Arc<dyn Platform>,
    runner: Arc<ScriptRunner>,
    gateway: Arc<ChatGateway>,
    clipboard: Sender<String>,
}

impl Reactor {
    pub fn run(self, rx: Receiver<Activation>, stop: Arc<AtomicBool>) {
        serve(rx, &stop, |activation| self.handle(activation));
        logger::info_p("reactor", "stopped");
    }

    pub fn handle(&self, activation: Activation) {
        match activation {
            Activation::Hotkey { combo, script } => {
                let _ = self.runner.execute(&script, &format!("(hotkey {})", combo));
            }
            Activation::PixelScript { name, script } => {
                let _ = self.runner.execute(&script, &format!("(pixel {})", name));
            }
            Activation::PixelKeys { name, keys, forward_to_chat } => {
                if let Err(e) = self.platform.send_keys(&keys) {
                    logger::error_p("reactor", &format!("{}: {}", name, e));
                    return;
                }
                logger::info_p("reactor", &format!("{}: sent {}", name, keys));
                if forward_to_chat {
                    thread::sleep(FORWARD_DELAY);
                    self.forward_clipboard();
                }
            }
            Activation::ClipboardChanged(text) => {
                if text.trim().is_empty() {
                    return;
                }
                if self.clipboard.send(text).is_err() {
                    logger::warn_p("reactor", "clipboard resolver is gone; update dropped");
                }
            }
        }
    }

    fn forward_clipboard(&self) {
        match self.platform.clipboard_text() {
            Ok(text) => self.gateway.notify_primary(&clipboard_reply(&text)),
            Err(e) => logger::error_p("reactor", &e.to_string()),
        }
    }
}

/// Resolves clipboard text through the intent dispatcher on its own thread.
pub struct ClipboardResolver {
    runner: Arc<ScriptRunner>,
    intent: Arc<IntentDispatcher>,
    gateway: Arc<ChatGateway>,
    primary: Option<ChatId>,
}

impl ClipboardResolver {
    pub fn run(self, rx: Receiver<String>, stop: Arc<AtomicBool>) {
        serve(rx, &stop, |text| self.resolve(&text));
        logger::info_p("clipboard", "resolver stopped");
    }

    pub fn resolve(&self, text: &str) {
        let Some(primary) = self.primary else {
            return;
        };
        match self.intent.resolve(text, primary, Origin::Clipboard, text) {
            Action::DirectReply(buffered) if buffered.is_empty() => {
                logger::info_p("clipboard", "nothing to reply");
            }
            Action::DirectReply(buffered) => self.gateway.notify_primary(&clipboard_reply(&buffered)),
            Action::RunScript { key, path } => {
                if self.runner.execute(&path, "(clipboard)").is_ok() {
                    logger::info_p("clipboard", &format!("executed {} from clipboard", key));
                }
            }
            Action::Unrecognized => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::chain::ChainPhase;
    use crate::chat::tests::RecordingChat;
    use crate::config::tests::sample;
    use crate::intent::tests::ScriptedCompletion;
    use crate::platform::stub::StubPlatform;
    use crate::supervisor::{DryRunSupervisor, LaunchMode};

    struct Fixture {
        _dir: tempfile::TempDir,
        stub: Arc<StubPlatform>,
        sup: Arc<DryRunSupervisor>,
        chat: Arc<RecordingChat>,
        system: MonitoringSystem,
    }

    fn fixture(answers: &[Result<&str, &str>]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample();
        config.directories.downloads = dir.path().join("dl");
        config.directories.notes = dir.path().join("notes");
        config.directories.extra.insert("audio".into(), dir.path().join("audio"));
        config.prompt_path = dir.path().join("prompt.txt");
        config.pixels.clear();
        std::fs::write(&config.prompt_path, "prompt").unwrap();

        let stub = Arc::new(StubPlatform::new());
        let sup = Arc::new(DryRunSupervisor::new());
        let chat = Arc::new(RecordingChat::default());
        let services = Services {
            platform: stub.clone(),
            supervisor: sup.clone(),
            chat: chat.clone(),
            completion: ScriptedCompletion::new(answers),
        };
        let system = MonitoringSystem::new(config, services).unwrap();
        Fixture { _dir: dir, stub, sup, chat, system }
    }

    fn reactor(f: &Fixture) -> (Reactor, Receiver<String>) {
        let (clipboard, rx) = mpsc::channel();
        let reactor = Reactor {
            platform: f.stub.clone(),
            runner: f.system.runner.clone(),
            gateway: f.system.gateway.clone(),
            clipboard,
        };
        (reactor, rx)
    }

    fn resolver(f: &Fixture) -> ClipboardResolver {
        ClipboardResolver {
            runner: f.system.runner.clone(),
            intent: f.system.intent.clone(),
            gateway: f.system.gateway.clone(),
            primary: Some(-100200),
        }
    }

    #[test]
    fn new_creates_configured_directories() {
        let f = fixture(&[]);
        for dir in ["dl", "notes", "audio"] {
            assert!(f._dir.path().join(dir).is_dir());
        }
    }

    #[test]
    fn shutdown_twice_terminates_once() {
        let f = fixture(&[]);
        f.system.runner().execute(Path::new("scripts/rec.ahk"), "").unwrap();
        assert_eq!(f.system.runner().chains().phase(Path::new("scripts/rec.ahk")), Some(ChainPhase::Running));

        f.system.shutdown();
        f.system.shutdown();
        assert_eq!(f.sup.terminations().len(), 1);
        assert!(f.system.is_stopping());
    }

    #[test]
    fn run_executes_startup_scripts_and_returns_on_stop() {
        let f = fixture(&[]);
        f.system.run(&|| true);
        assert_eq!(f.sup.launches(), vec![(PathBuf::from("scripts/boot.ahk"), LaunchMode::Blocking)]);
        assert!(f.system.is_stopping());
    }

    #[test]
    fn key_action_forwards_clipboard_to_primary_chat() {
        let f = fixture(&[]);
        f.stub.set_clipboard_text("recorded text").unwrap();
        reactor(&f).0.handle(Activation::PixelKeys {
            name: "record".into(),
            keys: "ctrl+alt+r".into(),
            forward_to_chat: true,
        });
        assert_eq!(f.stub.sent_keys(), vec!["ctrl+alt+r".to_string()]);
        assert_eq!(*f.chat.sent.lock().unwrap(), vec![(-100200, clipboard_reply("recorded text"))]);
    }

    #[test]
    fn clipboard_change_runs_resolved_script() {
        let f = fixture(&[Ok("Summarize"), Ok("FinalAnswer")]);
        let r = resolver(&f);
        r.resolve("long article");
        r.resolve("short note");
        assert_eq!(f.sup.launches(), vec![(PathBuf::from("scripts/summarize.py"), LaunchMode::Blocking)]);
        assert_eq!(*f.chat.sent.lock().unwrap(), vec![(-100200, clipboard_reply("short note"))]);
    }

    #[test]
    fn hotkey_and_level_pixel_run_their_scripts() {
        let f = fixture(&[]);
        let (r, _rx) = reactor(&f);
        r.handle(Activation::Hotkey { combo: "ctrl+alt+1".into(), script: "scripts/one.ahk".into() });
        r.handle(Activation::PixelScript { name: "alert".into(), script: "scripts/alert.ahk".into() });
        assert_eq!(f.sup.launch_count(Path::new("scripts/one.ahk")), 1);
        assert_eq!(f.sup.launch_count(Path::new("scripts/alert.ahk")), 1);
    }

    #[test]
    fn clipboard_text_is_handed_off_without_blocking_hotkeys() {
        let f = fixture(&[Ok("Summarize")]);
        let (r, rx) = reactor(&f);
        r.handle(Activation::ClipboardChanged("long article".into()));
        r.handle(Activation::ClipboardChanged("   ".into()));
        r.handle(Activation::Hotkey { combo: "ctrl+alt+1".into(), script: "scripts/one.ahk".into() });

        assert_eq!(f.sup.launches(), vec![(PathBuf::from("scripts/one.ahk"), LaunchMode::Blocking)]);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["long article".to_string()]);
    }

    #[test]
    fn resolver_thread_serves_until_stopped() {
        let f = fixture(&[Ok("Summarize")]);
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let (resolver, stop) = (resolver(&f), stop.clone());
            thread::spawn(move || resolver.run(rx, stop))
        };

        tx.send("long article".to_string()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while f.sup.launches().is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        stop.store(true, Ordering::Release);
        worker.join().unwrap();
        assert_eq!(f.sup.launch_count(Path::new("scripts/summarize.py")), 1);
    }
}
