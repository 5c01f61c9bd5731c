use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Local;

use crate::completion::CompletionService;
use crate::config::MonitorConfig;
use crate::error::CoreError;
use crate::logger;
use crate::types::{Action, ChatId, ChatMessage, ConversationContext, Origin, Role};

/// Resolves free text to an action by asking the completion service for an
/// instruction key.
pub struct IntentDispatcher {
    completion: Arc<dyn CompletionService>,
    prompt_path: PathBuf,
    table: HashMap<String, PathBuf>,
    sentinel: String,
    /// One remembered turn per identity. Concurrent dispatches for the same
    /// identity are last-writer-wins.
    contexts: Mutex<HashMap<ChatId, ConversationContext>>,
}

impl IntentDispatcher {
    pub fn new(completion: Arc<dyn CompletionService>, config: &MonitorConfig) -> Self {
        Self {
            completion,
            prompt_path: config.prompt_path.clone(),
            table: config.script_table(),
            sentinel: config.final_answer_marker.clone(),
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self, identity: ChatId) -> Option<ConversationContext> {
        self.lock().get(&identity).cloned()
    }

    /// Resolve `text` for `identity`. `buffered` is the text a direct reply
    /// would carry. Service failures resolve to `Unrecognized`.
    pub fn resolve(&self, text: &str, identity: ChatId, origin: Origin, buffered: &str) -> Action {
        let instruction = match self.ask(text, identity, origin) {
            Ok(instruction) => instruction,
            Err(e) => {
                logger::error_p("intent", &format!("{:#}", e));
                return Action::Unrecognized;
            }
        };

        if origin == Origin::Chat {
            self.lock().insert(
                identity,
                ConversationContext {
                    original_message: text.to_string(),
                    prior_response: instruction.clone(),
                    timestamp: Local::now(),
                },
            );
        }

        let action = self.interpret(&instruction, buffered);
        if action == Action::Unrecognized {
            logger::warn_p("intent", &format!("unrecognized instruction: {}", instruction));
        }
        action
    }

    /// Map a trimmed completion result onto an action.
    pub fn interpret(&self, instruction: &str, buffered: &str) -> Action {
        if instruction == self.sentinel {
            return Action::DirectReply(buffered.to_string());
        }
        match self.table.get(instruction) {
            Some(path) => Action::RunScript { key: instruction.to_string(), path: path.clone() },
            None => Action::Unrecognized,
        }
    }

    fn ask(&self, text: &str, identity: ChatId, origin: Origin) -> Result<String> {
        let prompt = std::fs::read_to_string(&self.prompt_path)
            .with_context(|| format!("reading prompt {}", self.prompt_path.display()))?;

        let mut messages = vec![ChatMessage::new(Role::System, prompt.trim())];
        if let Some(ctx) = self.context(identity) {
            messages.push(ChatMessage::new(Role::User, ctx.original_message));
            messages.push(ChatMessage::new(Role::Assistant, ctx.prior_response));
        }
        messages.push(ChatMessage::new(Role::User, text));

        log_request(&messages, origin);
        let reply = self
            .completion
            .complete(&messages)
            .map_err(|e| CoreError::CompletionService(format!("{:#}", e)))?;
        Ok(reply.trim().to_string())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ChatId, ConversationContext>> {
        self.contexts.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn log_request(messages: &[ChatMessage], origin: Origin) {
    let source = match origin {
        Origin::Clipboard => "clipboard update",
        Origin::Chat => "chat message",
    };
    logger::info_p("intent", &format!("request from {} ({} messages)", source, messages.len()));
    for m in messages {
        logger::info_p("intent", &format!("  {:?}: {}", m.role, m.content));
    }
}
