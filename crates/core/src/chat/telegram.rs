use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::ChatService;
use crate::config::ChatSettings;
use crate::types::{Attachment, AttachmentKind, ChatId, InboundMessage, Update};

const API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API over blocking HTTP long-polling.
pub struct TelegramClient {
    token: String,
    client: Client,
    poll_timeout: u64,
}

impl TelegramClient {
    pub fn new(settings: &ChatSettings) -> Result<Self> {
        if settings.token.trim().is_empty() {
            return Err(anyhow!("Telegram bot token cannot be empty"));
        }
        // The HTTP timeout has to outlive the long-poll window.
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.poll_timeout_secs + 15))
            .build()
            .context("building telegram http client")?;
        Ok(Self { token: settings.token.clone(), client, poll_timeout: settings.poll_timeout_secs })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    fn call<T: DeserializeOwned>(&self, method: &str, payload: &Value) -> Result<T> {
        let res = self.client.post(self.api_url(method)).json(payload).send()?;
        let status = res.status();
        let body: TelegramResponse<T> = res
            .json()
            .with_context(|| format!("Telegram {} returned {} with unreadable body", method, status))?;
        if !body.ok {
            return Err(anyhow!(
                "Telegram {} failed: {} - {}",
                method,
                status,
                body.description.unwrap_or_else(|| "unknown error".into())
            ));
        }
        body.result.ok_or_else(|| anyhow!("Telegram {} response missing result", method))
    }
}

impl ChatService for TelegramClient {
    fn poll(&self, offset: i64) -> Result<Vec<Update>> {
        let payload = json!({
            "offset": offset,
            "timeout": self.poll_timeout,
            "allowed_updates": ["message"],
        });
        let updates: Vec<TelegramUpdate> = self.call("getUpdates", &payload)?;
        Ok(updates.into_iter().map(TelegramUpdate::into_update).collect())
    }

    fn reply(&self, chat: ChatId, message_id: i64, text: &str) -> Result<()> {
        let payload = json!({
            "chat_id": chat,
            "text": text,
            "reply_to_message_id": message_id,
            "allow_sending_without_reply": true,
        });
        self.call::<Value>("sendMessage", &payload).map(|_| ())
    }

    fn send(&self, chat: ChatId, text: &str) -> Result<()> {
        let payload = json!({ "chat_id": chat, "text": text });
        self.call::<Value>("sendMessage", &payload).map(|_| ())
    }

    fn download(&self, attachment: &Attachment) -> Result<(Vec<u8>, String)> {
        let file: TelegramFile = self.call("getFile", &json!({ "file_id": attachment.file_id }))?;
        let remote_path = file.file_path.ok_or_else(|| anyhow!("Telegram getFile returned no file_path"))?;

        let url = format!("{}/file/bot{}/{}", API_BASE, self.token, remote_path);
        let res = self.client.get(&url).send()?;
        let status = res.status();
        if !status.is_success() {
            return Err(anyhow!("Telegram file download failed: {}", status));
        }
        Ok((res.bytes()?.to_vec(), remote_path))
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<TelegramMessage>,
}

impl TelegramUpdate {
    fn into_update(self) -> Update {
        Update { update_id: self.update_id, message: self.message.map(TelegramMessage::into_inbound) }
    }
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
    chat: TelegramChat,
    #[serde(default)]
    from: Option<TelegramUser>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    document: Option<TelegramFileRef>,
    #[serde(default)]
    photo: Vec<TelegramFileRef>,
    #[serde(default)]
    video: Option<TelegramFileRef>,
    #[serde(default)]
    audio: Option<TelegramFileRef>,
    #[serde(default)]
    voice: Option<TelegramFileRef>,
    #[serde(default)]
    sticker: Option<TelegramFileRef>,
    #[serde(default)]
    video_note: Option<TelegramFileRef>,
}

impl TelegramMessage {
    fn attachment(&mut self) -> Option<Attachment> {
        let supported = [
            (AttachmentKind::Document, self.document.take()),
            (AttachmentKind::Photo, self.photo.pop()),
            (AttachmentKind::Video, self.video.take()),
            (AttachmentKind::Audio, self.audio.take()),
        ];
        if let Some(att) = supported.into_iter().find_map(|(kind, f)| f.map(|f| f.into_attachment(kind))) {
            return Some(att);
        }

        let unsupported = [
            ("voice", self.voice.take()),
            ("sticker", self.sticker.take()),
            ("video_note", self.video_note.take()),
        ];
        unsupported
            .into_iter()
            .find_map(|(name, f)| f.map(|f| f.into_attachment(AttachmentKind::Unsupported(name.into()))))
    }

    fn into_inbound(mut self) -> InboundMessage {
        let attachment = self.attachment();
        InboundMessage {
            message_id: self.message_id,
            chat_id: self.chat.id,
            chat_title: self.chat.title,
            chat_kind: self.chat.r#type,
            sender_id: self.from.map(|u| u.id),
            text: self.text,
            attachment,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    r#type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramFileRef {
    file_id: String,
    #[serde(default)]
    file_name: Option<String>,
}

impl TelegramFileRef {
    fn into_attachment(self, kind: AttachmentKind) -> Attachment {
        Attachment { kind, file_id: self.file_id, file_name: self.file_name }
    }
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    #[serde(default)]
    file_path: Option<String>,
}
