use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Raw platform color value as returned by the pixel sampler (COLORREF on Windows).
pub type ColorValue = u32;

/// Remote chat identity (group or user id).
pub type ChatId = i64;

/// Activation event sent from a watcher or the hotkey listener to the reactor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Hotkey { combo: String, script: PathBuf },
    PixelScript { name: String, script: PathBuf },
    PixelKeys { name: String, keys: String, forward_to_chat: bool },
    ClipboardChanged(String),
}

/// Outcome of resolving free text through the completion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Reply with the buffered text instead of running anything. May be empty.
    DirectReply(String),
    RunScript { key: String, path: PathBuf },
    Unrecognized,
}

/// Where a piece of free text entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Clipboard,
    Chat,
}

/// The single prior turn remembered per chat identity.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub original_message: String,
    pub prior_response: String,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged entry of a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentKind {
    Document,
    Photo,
    Video,
    Audio,
    /// Anything the gateway does not persist (voice, sticker, ...).
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub file_id: String,
    pub file_name: Option<String>,
}

/// Inbound chat message, independent of the remote service's wire format.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub message_id: i64,
    pub chat_id: ChatId,
    pub chat_title: Option<String>,
    pub chat_kind: Option<String>,
    pub sender_id: Option<i64>,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
}

impl InboundMessage {
    pub fn text(chat_id: ChatId, message_id: i64, text: &str) -> Self {
        Self {
            message_id,
            chat_id,
            text: Some(text.to_string()),
            ..Default::default()
        }
    }
}

/// A batch entry from the inbound long-poll.
#[derive(Debug, Clone)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<InboundMessage>,
}
