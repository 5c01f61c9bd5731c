//! Inbound chat routing and replies.
//!
//! Media from any chat is saved and handed to the database loader. Text from
//! allow-listed chats goes through the ordered [`RouteRule`]s and otherwise
//! falls through to the intent dispatcher. Every routed message gets exactly
//! one reply.

pub mod telegram;
mod route;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Local};

pub use route::{ChannelNote, RouteRule, RouteTable};
pub use telegram::TelegramClient;

use crate::config::MonitorConfig;
use crate::error::{CoreError, CoreResult};
use crate::intent::IntentDispatcher;
use crate::logger;
use crate::platform::Platform;
use crate::runner::ScriptRunner;
use crate::sleep;
use crate::types::{Action, Attachment, AttachmentKind, ChatId, InboundMessage, Origin, Update};

pub const PROCESSED_OK: &str = "✅ Processed successfully!";
pub const PROCESSING_FAILED: &str = "❌ Processing failed";
pub const UNSUPPORTED_FILE: &str = "❌ Unsupported file type";
pub const FILE_ERROR: &str = "❌ Error processing file";
pub const CLIPBOARD_EMPTY: &str = "❌ Clipboard is empty";
pub const NOT_RECOGNIZED: &str = "Instruction not recognized.";

/// Back-off after a failed poll, before jitter.
const POLL_RETRY_SECS: f64 = 5.0;

/// Remote chat service seen by the gateway.
pub trait ChatService: Send + Sync {
    /// Long-poll for updates with `update_id >= offset`.
    fn poll(&self, offset: i64) -> Result<Vec<Update>>;
    fn reply(&self, chat: ChatId, message_id: i64, text: &str) -> Result<()>;
    fn send(&self, chat: ChatId, text: &str) -> Result<()>;
    /// Fetch an attachment's bytes along with its remote path.
    fn download(&self, attachment: &Attachment) -> Result<(Vec<u8>, String)>;
}

pub fn clipboard_reply(text: &str) -> String {
    format!("📋 Clipboard content:\n\n{}", text)
}

pub struct ChatGateway {
    service: Arc<dyn ChatService>,
    platform: Arc<dyn Platform>,
    intent: Arc<IntentDispatcher>,
    runner: Arc<ScriptRunner>,
    config: Arc<MonitorConfig>,
    routes: RouteTable,
}

impl ChatGateway {
    pub fn new(
        service: Arc<dyn ChatService>,
        platform: Arc<dyn Platform>,
        intent: Arc<IntentDispatcher>,
        runner: Arc<ScriptRunner>,
        config: Arc<MonitorConfig>,
    ) -> CoreResult<Self> {
        let routes = RouteTable::new(&config)?;
        Ok(Self { service, platform, intent, runner, config, routes })
    }

    /// Block on the inbound long-poll until `should_stop` returns true.
    pub fn run(&self, should_stop: &dyn Fn() -> bool) {
        logger::info_p("chat", &format!("listening for {} chat(s)", self.config.allowed_chats().len()));
        let mut offset = 0;
        while !should_stop() {
            match self.service.poll(offset) {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        if let Some(msg) = update.message {
                            self.handle(&msg);
                        }
                    }
                }
                Err(e) => {
                    logger::error_p("chat", &format!("poll failed: {:#}", e));
                    sleep::sleep_unless(sleep::jittered(POLL_RETRY_SECS), should_stop);
                }
            }
        }
        logger::info_p("chat", "stopped");
    }

    /// Route one inbound message.
    pub fn handle(&self, msg: &InboundMessage) {
        if let Some(attachment) = &msg.attachment {
            self.handle_media(msg, attachment);
            return;
        }

        if !self.config.is_allowed(msg.chat_id) {
            logger::info_p(
                "chat",
                &format!(
                    "ignoring chat {} (title: {}, type: {})",
                    msg.chat_id,
                    msg.chat_title.as_deref().unwrap_or("-"),
                    msg.chat_kind.as_deref().unwrap_or("-"),
                ),
            );
            return;
        }

        let Some(text) = msg.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            logger::info_p("chat", &format!("message {} from {} has no text", msg.message_id, msg.chat_id));
            return;
        };

        match self.routes.classify(text) {
            Some(rule) => {
                let ok = self.apply(rule, text);
                self.reply(msg, if ok { PROCESSED_OK } else { PROCESSING_FAILED });
            }
            None => self.dispatch(msg, text),
        }
    }

    /// Send text to the first allow-listed chat.
    pub fn notify_primary(&self, text: &str) {
        let Some(chat) = self.config.primary_chat() else {
            return;
        };
        if let Err(e) = self.service.send(chat, text) {
            logger::error_p("chat", &format!("send to {} failed: {:#}", chat, e));
        }
    }

    fn handle_media(&self, msg: &InboundMessage, attachment: &Attachment) {
        if let AttachmentKind::Unsupported(kind) = &attachment.kind {
            logger::warn_p("chat", &format!("unsupported attachment '{}' from {}", kind, msg.chat_id));
            if self.config.is_allowed(msg.chat_id) {
                self.reply(msg, UNSUPPORTED_FILE);
            }
            return;
        }
        match self.save_attachment(attachment) {
            Ok(name) => self.reply(msg, &format!("✅ File saved and processing started:\n{}", name)),
            Err(e) => {
                logger::error_p("chat", &format!("file processing error: {}", e));
                self.reply(msg, FILE_ERROR);
            }
        }
    }

    fn save_attachment(&self, attachment: &Attachment) -> CoreResult<String> {
        let (bytes, remote_path) = self
            .service
            .download(attachment)
            .map_err(|e| CoreError::AttachmentDownloadFailed(format!("{:#}", e)))?;

        let name = attachment_file_name(attachment.file_name.as_deref(), &remote_path, Local::now());
        let path = self.config.directories.downloads.join(&name);
        std::fs::write(&path, bytes).map_err(|source| CoreError::FileWriteFailed { path: path.clone(), source })?;
        logger::info_p("chat", &format!("file downloaded: {}", path.display()));

        self.runner.spawn(&self.config.pipelines.database_loader)?;
        Ok(name)
    }

    fn apply(&self, rule: RouteRule, text: &str) -> bool {
        match rule {
            RouteRule::ChannelNote => {
                let Some(note) = ChannelNote::parse(text) else {
                    logger::warn_p("chat", "channel note without a usable channel line");
                    return false;
                };
                match write_note(&self.config.directories.notes, &note, Local::now()) {
                    Ok(path) => {
                        logger::info_p("chat", &format!("note saved: {}", path.display()));
                        true
                    }
                    Err(e) => {
                        logger::error_p("chat", &e.to_string());
                        false
                    }
                }
            }
            RouteRule::SingleVideo => self.start_pipeline(text, &self.config.pipelines.transcription),
            RouteRule::Playlist => self.start_pipeline(text, &self.config.pipelines.playlist),
        }
    }

    /// Hand `url` to a pipeline script through the clipboard.
    fn start_pipeline(&self, url: &str, script: &Path) -> bool {
        if let Err(e) = self.platform.set_clipboard_text(url) {
            logger::error_p("chat", &e.to_string());
            return false;
        }
        self.runner.spawn(script).is_ok()
    }

    fn dispatch(&self, msg: &InboundMessage, text: &str) {
        if let Err(e) = self.platform.set_clipboard_text(text) {
            logger::warn_p("chat", &e.to_string());
        }

        match self.intent.resolve(text, msg.chat_id, Origin::Chat, text) {
            Action::DirectReply(buffered) if buffered.is_empty() => self.reply(msg, CLIPBOARD_EMPTY),
            Action::DirectReply(buffered) => self.reply(msg, &clipboard_reply(&buffered)),
            Action::RunScript { key, path } => match self.runner.execute(&path, "(chat)") {
                Ok(()) => self.reply(msg, &format!("Executed: {}", key)),
                Err(_) => self.reply(msg, PROCESSING_FAILED),
            },
            Action::Unrecognized => self.reply(msg, NOT_RECOGNIZED),
        }
    }

    fn reply(&self, msg: &InboundMessage, text: &str) {
        if let Err(e) = self.service.reply(msg.chat_id, msg.message_id, text) {
            logger::error_p("chat", &format!("reply to {} failed: {:#}", msg.chat_id, e));
        }
    }
}

/// Keep the sender's name (final component only) or generate one from the
/// remote path's extension.
fn attachment_file_name(given: Option<&str>, remote_path: &str, now: DateTime<Local>) -> String {
    let given = given
        .and_then(|n| Path::new(n).file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && *n != "..");
    match given {
        Some(name) => name.to_string(),
        None => {
            let ext = Path::new(remote_path).extension().and_then(|e| e.to_str()).unwrap_or("bin");
            format!("file_{}.{}", now.format("%Y%m%d_%H%M%S"), ext)
        }
    }
}

fn write_note(notes_dir: &Path, note: &ChannelNote, now: DateTime<Local>) -> CoreResult<PathBuf> {
    let dir = notes_dir.join(note.channel);
    std::fs::create_dir_all(&dir).map_err(|source| CoreError::FileWriteFailed { path: dir.clone(), source })?;
    let path = dir.join(format!("tweet_{}.txt", now.format("%Y%m%d_%H%M%S")));
    let contents = format!(
        "Channel: {}\nDate: {}\nContent: {}\n",
        note.channel,
        now.format("%Y-%m-%d %H:%M:%S"),
        note.body
    );
    std::fs::write(&path, contents).map_err(|source| CoreError::FileWriteFailed { path: path.clone(), source })?;
    Ok(path)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use anyhow::anyhow;
    use chrono::TimeZone;

    use super::*;
    use crate::chain::ChainController;
    use crate::config::tests::sample;
    use crate::intent::tests::{dispatcher, ScriptedCompletion};
    use crate::platform::stub::StubPlatform;
    use crate::supervisor::{DryRunSupervisor, LaunchMode};

    /// Records outgoing traffic and replays queued poll results.
    #[derive(Default)]
    pub(crate) struct RecordingChat {
        pub(crate) replies: Mutex<Vec<(ChatId, i64, String)>>,
        pub(crate) sent: Mutex<Vec<(ChatId, String)>>,
        pub(crate) files: HashMap<String, (Vec<u8>, String)>,
        pub(crate) polls: Mutex<VecDeque<Result<Vec<Update>, String>>>,
    }

    impl RecordingChat {
        pub(crate) fn replies(&self) -> Vec<String> {
            self.replies.lock().unwrap().iter().map(|r| r.2.clone()).collect()
        }
    }

    impl ChatService for RecordingChat {
        fn poll(&self, _offset: i64) -> Result<Vec<Update>> {
            match self.polls.lock().unwrap().pop_front() {
                Some(Ok(updates)) => Ok(updates),
                Some(Err(e)) => Err(anyhow!(e)),
                None => {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    Ok(Vec::new())
                }
            }
        }

        fn reply(&self, chat: ChatId, message_id: i64, text: &str) -> Result<()> {
            self.replies.lock().unwrap().push((chat, message_id, text.to_string()));
            Ok(())
        }

        fn send(&self, chat: ChatId, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push((chat, text.to_string()));
            Ok(())
        }

        fn download(&self, attachment: &Attachment) -> Result<(Vec<u8>, String)> {
            self.files.get(&attachment.file_id).cloned().ok_or_else(|| anyhow!("file gone"))
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        config: Arc<MonitorConfig>,
        chat: Arc<RecordingChat>,
        stub: Arc<StubPlatform>,
        sup: Arc<DryRunSupervisor>,
        gateway: ChatGateway,
    }

    fn harness(answers: &[Result<&str, &str>], chat: RecordingChat) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample();
        config.directories.downloads = dir.path().join("downloads");
        config.directories.notes = dir.path().join("notes");
        std::fs::create_dir_all(&config.directories.downloads).unwrap();
        let config = Arc::new(config);

        let chat = Arc::new(chat);
        let stub = Arc::new(StubPlatform::new());
        let sup = Arc::new(DryRunSupervisor::new());
        let chains = Arc::new(ChainController::new(sup.clone(), &config.chained_scripts));
        let runner = Arc::new(ScriptRunner::new(sup.clone(), chains));
        let intent = Arc::new(dispatcher(ScriptedCompletion::new(answers), dir.path()));
        let gateway =
            ChatGateway::new(chat.clone(), stub.clone(), intent, runner, config.clone()).unwrap();
        Harness { _dir: dir, config, chat, stub, sup, gateway }
    }

    fn attachment(kind: AttachmentKind, file_id: &str, name: Option<&str>) -> InboundMessage {
        InboundMessage {
            message_id: 5,
            chat_id: 999,
            attachment: Some(Attachment { kind, file_id: file_id.into(), file_name: name.map(Into::into) }),
            ..Default::default()
        }
    }

    #[test]
    fn channel_note_is_written_under_its_channel() {
        let h = harness(&[], RecordingChat::default());
        h.gateway.handle(&InboundMessage::text(42, 1, "X\nNewsChannel\nBreaking update"));

        assert_eq!(h.chat.replies(), vec![PROCESSED_OK.to_string()]);
        let dir = h.config.directories.notes.join("NewsChannel");
        let files: Vec<_> = std::fs::read_dir(&dir).unwrap().map(|e| e.unwrap().path()).collect();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("tweet_") && name.ends_with(".txt"));
        let body = std::fs::read_to_string(&files[0]).unwrap();
        assert!(body.starts_with("Channel: NewsChannel\nDate: "));
        assert!(body.ends_with("Content: Breaking update\n"));
    }

    #[test]
    fn broken_note_fails_without_writing() {
        let h = harness(&[], RecordingChat::default());
        h.gateway.handle(&InboundMessage::text(42, 1, "X"));
        assert_eq!(h.chat.replies(), vec![PROCESSING_FAILED.to_string()]);
        assert!(!h.config.directories.notes.exists());
    }

    #[test]
    fn video_url_goes_to_clipboard_and_transcription() {
        let h = harness(&[], RecordingChat::default());
        h.gateway.handle(&InboundMessage::text(-100200, 1, "  https://youtu.be/abc123 "));

        assert_eq!(h.stub.clipboard_text().unwrap(), "https://youtu.be/abc123");
        assert_eq!(h.sup.launches(), vec![(PathBuf::from("pipelines/transcribe.py"), LaunchMode::Detached)]);
        assert_eq!(h.chat.replies(), vec![PROCESSED_OK.to_string()]);
    }

    #[test]
    fn failed_pipeline_launch_reports_failure() {
        let h = harness(&[], RecordingChat::default());
        h.sup.fail_on("pipelines/playlist.py");
        h.gateway.handle(&InboundMessage::text(42, 1, "https://youtube.com/playlist?list=PL1"));
        assert_eq!(h.chat.replies(), vec![PROCESSING_FAILED.to_string()]);
    }

    #[test]
    fn free_text_runs_the_resolved_script() {
        let h = harness(&[Ok("Record")], RecordingChat::default());
        h.gateway.handle(&InboundMessage::text(42, 1, "start recording"));

        assert_eq!(h.chat.replies(), vec!["Executed: Record".to_string()]);
        assert_eq!(h.stub.clipboard_text().unwrap(), "start recording");
        assert_eq!(
            h.sup.launches(),
            vec![
                (PathBuf::from("scripts/rec.ahk"), LaunchMode::Blocking),
                (PathBuf::from("scripts/rec_helper.py"), LaunchMode::Detached),
            ]
        );
    }

    #[test]
    fn free_text_direct_reply_and_unrecognized() {
        let h = harness(&[Ok("FinalAnswer"), Ok("Nope"), Err("timeout")], RecordingChat::default());
        h.gateway.handle(&InboundMessage::text(42, 1, "echo this"));
        h.gateway.handle(&InboundMessage::text(42, 2, "gibberish"));
        h.gateway.handle(&InboundMessage::text(42, 3, "again"));
        assert_eq!(
            h.chat.replies(),
            vec![clipboard_reply("echo this"), NOT_RECOGNIZED.to_string(), NOT_RECOGNIZED.to_string()]
        );
    }

    #[test]
    fn unknown_chats_are_not_routed() {
        let h = harness(&[Ok("Record")], RecordingChat::default());
        h.gateway.handle(&InboundMessage::text(7, 1, "https://youtu.be/abc123"));
        assert!(h.chat.replies().is_empty());
        assert!(h.sup.launches().is_empty());
    }

    #[test]
    fn media_is_saved_and_loader_started() {
        let mut chat = RecordingChat::default();
        chat.files.insert("doc".into(), (b"pdf bytes".to_vec(), "documents/file_1.pdf".into()));
        let h = harness(&[], chat);
        h.gateway.handle(&attachment(AttachmentKind::Document, "doc", Some("../report.pdf")));

        assert_eq!(h.chat.replies(), vec!["✅ File saved and processing started:\nreport.pdf".to_string()]);
        let saved = std::fs::read(h.config.directories.downloads.join("report.pdf")).unwrap();
        assert_eq!(saved, b"pdf bytes");
        assert_eq!(h.sup.launches(), vec![(PathBuf::from("pipelines/load_db.py"), LaunchMode::Detached)]);
    }

    #[test]
    fn media_failures_reply_without_details() {
        let h = harness(&[], RecordingChat::default());
        h.gateway.handle(&attachment(AttachmentKind::Photo, "missing", None));
        h.gateway.handle(&InboundMessage {
            chat_id: 42,
            ..attachment(AttachmentKind::Unsupported("voice".into()), "v", None)
        });
        assert_eq!(h.chat.replies(), vec![FILE_ERROR.to_string(), UNSUPPORTED_FILE.to_string()]);
        assert!(h.sup.launches().is_empty());
    }

    #[test]
    fn unsupported_media_from_unknown_chat_gets_no_reply() {
        let h = harness(&[], RecordingChat::default());
        h.gateway.handle(&attachment(AttachmentKind::Unsupported("sticker".into()), "s", None));
        assert!(h.chat.replies().is_empty());
        assert!(h.sup.launches().is_empty());
    }

    #[test]
    fn generated_name_uses_remote_extension() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(attachment_file_name(None, "photos/file_3.jpg", now), "file_20240309_140507.jpg");
        assert_eq!(attachment_file_name(None, "voice/raw", now), "file_20240309_140507.bin");
        assert_eq!(attachment_file_name(Some("a/b/c.txt"), "x.doc", now), "c.txt");
    }

    #[test]
    fn run_survives_poll_errors_and_advances_offset() {
        let chat = RecordingChat::default();
        chat.polls.lock().unwrap().extend([
            Err("network down".to_string()),
            Ok(vec![Update { update_id: 10, message: Some(InboundMessage::text(42, 1, "X\nChan\nhi")) }]),
        ]);
        let h = harness(&[], chat);
        let polls = std::sync::atomic::AtomicUsize::new(0);
        h.gateway.run(&|| {
            let n = polls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            n > 200 || !h.chat.replies().is_empty()
        });
        assert_eq!(h.chat.replies(), vec![PROCESSED_OK.to_string()]);
    }

    #[test]
    fn notify_primary_targets_first_allowed_chat() {
        let h = harness(&[], RecordingChat::default());
        h.gateway.notify_primary("hello");
        assert_eq!(*h.chat.sent.lock().unwrap(), vec![(-100200, "hello".to_string())]);
    }
}
