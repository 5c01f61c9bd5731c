use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

use crate::error::{CoreError, CoreResult};
use crate::types::{ChatId, ColorValue};

pub const CHAT_TOKEN_ENV: &str = "OMNI_CHAT_TOKEN";
pub const COMPLETION_KEY_ENV: &str = "OMNI_COMPLETION_API_KEY";

/// Immutable runtime configuration, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub pixels: BTreeMap<String, PixelSpec>,
    /// Key combination -> script path.
    #[serde(default)]
    pub hotkeys: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub startup_scripts: Vec<PathBuf>,
    /// Parent script path -> companion toggled on each parent run.
    #[serde(default)]
    pub chained_scripts: BTreeMap<PathBuf, ChainSpec>,
    allowed_chats: Vec<ChatIdent>,
    #[serde(skip)]
    allowed_ids: Vec<ChatId>,
    #[serde(default)]
    pub url_patterns: UrlPatterns,
    /// Instruction name -> key-automation script. Wins over `scripts` on collision.
    #[serde(default)]
    pub hotkey_scripts: BTreeMap<String, PathBuf>,
    /// Instruction name -> general script.
    #[serde(default)]
    pub scripts: BTreeMap<String, PathBuf>,
    pub pipelines: Pipelines,
    pub prompt_path: PathBuf,
    pub directories: Directories,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default)]
    pub interpreters: Interpreters,
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub completion: CompletionSettings,
    #[serde(default = "default_final_answer")]
    pub final_answer_marker: String,
    #[serde(default = "default_note_marker")]
    pub note_marker: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawPixel")]
pub struct PixelSpec {
    pub coordinates: (i32, i32),
    pub kind: PixelKind,
}

/// The configuration shape selects the state machine a coordinate runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelKind {
    EdgePair {
        initial_color: ColorValue,
        final_color: ColorValue,
        key_action: String,
        forward_to_chat: bool,
    },
    Level {
        expected_color: ColorValue,
        script: PathBuf,
    },
}

/// A pixel entry as written. Its keys must belong to exactly one kind.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPixel {
    coordinates: (i32, i32),
    initial_color: Option<ColorValue>,
    final_color: Option<ColorValue>,
    key_action: Option<String>,
    forward_to_chat: Option<bool>,
    expected_color: Option<ColorValue>,
    script: Option<PathBuf>,
}

impl TryFrom<RawPixel> for PixelSpec {
    type Error = String;

    fn try_from(raw: RawPixel) -> Result<Self, Self::Error> {
        let edge = raw.initial_color.is_some()
            || raw.final_color.is_some()
            || raw.key_action.is_some()
            || raw.forward_to_chat.is_some();
        let level = raw.expected_color.is_some() || raw.script.is_some();

        let kind = match (edge, level) {
            (true, true) => {
                return Err("pixel entry mixes edge-pair keys (initial_color, final_color, key_action) \
                            with level keys (expected_color, script)"
                    .into())
            }
            (false, false) => return Err("pixel entry has neither edge-pair nor level keys".into()),
            (true, false) => match (raw.initial_color, raw.final_color, raw.key_action) {
                (Some(initial_color), Some(final_color), Some(key_action)) => PixelKind::EdgePair {
                    initial_color,
                    final_color,
                    key_action,
                    forward_to_chat: raw.forward_to_chat.unwrap_or(false),
                },
                _ => return Err("edge-pair pixel needs initial_color, final_color and key_action".into()),
            },
            (false, true) => match (raw.expected_color, raw.script) {
                (Some(expected_color), Some(script)) => PixelKind::Level { expected_color, script },
                _ => return Err("level pixel needs expected_color and script".into()),
            },
        };
        Ok(Self { coordinates: raw.coordinates, kind })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainSpec {
    pub companion: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UrlPatterns {
    #[serde(default)]
    pub single_video: Vec<String>,
    #[serde(default)]
    pub playlist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pipelines {
    pub database_loader: PathBuf,
    pub transcription: PathBuf,
    pub playlist: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Directories {
    pub downloads: PathBuf,
    pub notes: PathBuf,
    /// Any other directory that must exist at startup.
    #[serde(flatten)]
    pub extra: BTreeMap<String, PathBuf>,
}

impl Directories {
    pub fn all(&self) -> impl Iterator<Item = &Path> {
        [self.downloads.as_path(), self.notes.as_path()]
            .into_iter()
            .chain(self.extra.values().map(PathBuf::as_path))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Interpreters {
    /// Runtime for `.py` scripts.
    #[serde(default = "default_python")]
    pub python: PathBuf,
    /// Interpreter for every other script (e.g. AutoHotkey).
    pub external: Option<PathBuf>,
}

impl Default for Interpreters {
    fn default() -> Self {
        Self { python: default_python(), external: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatSettings {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self { token: String::new(), poll_timeout_secs: default_poll_timeout() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self { api_key: String::new(), model: default_model(), base_url: default_base_url() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ChatIdent {
    Num(i64),
    Text(String),
}

fn default_log_dir() -> PathBuf { PathBuf::from("logs") }
fn default_python() -> PathBuf { PathBuf::from("python") }
fn default_poll_timeout() -> u64 { 10 }
fn default_model() -> String { "gpt-4o-mini".to_string() }
fn default_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_final_answer() -> String { "FinalAnswer".to_string() }
fn default_note_marker() -> String { "X".to_string() }

/// Compile URL patterns so they only match at the start of the text.
pub fn compile_anchored(patterns: &[String]) -> Result<Vec<Regex>, regex::Error> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("^(?:{})", p)))
        .collect()
}

impl MonitorConfig {
    /// Load, apply environment overrides, and validate. Any failure is fatal.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| CoreError::ConfigLoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut config = Self::parse(&raw, path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse and validate JSON text. `origin` is only used in error messages.
    pub fn parse(raw: &str, origin: &Path) -> CoreResult<Self> {
        let fail = |reason: String| CoreError::ConfigLoadFailed { path: origin.to_path_buf(), reason };

        let mut config: MonitorConfig = serde_json::from_str(raw).map_err(|e| fail(e.to_string()))?;

        config.allowed_ids = config
            .allowed_chats
            .iter()
            .map(|ident| match ident {
                ChatIdent::Num(n) => Ok(*n),
                ChatIdent::Text(s) => s
                    .trim()
                    .parse::<ChatId>()
                    .map_err(|_| fail(format!("invalid chat identity '{}'", s))),
            })
            .collect::<CoreResult<_>>()?;
        if config.allowed_ids.is_empty() {
            return Err(fail("allowed_chats must name at least one chat".into()));
        }

        for (category, patterns) in [
            ("single_video", &config.url_patterns.single_video),
            ("playlist", &config.url_patterns.playlist),
        ] {
            compile_anchored(patterns).map_err(|e| fail(format!("url_patterns.{}: {}", category, e)))?;
        }

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var(CHAT_TOKEN_ENV) {
            self.chat.token = token;
        }
        if let Ok(key) = std::env::var(COMPLETION_KEY_ENV) {
            self.completion.api_key = key;
        }
    }

    /// Allow-listed chat identities, in configuration order.
    pub fn allowed_chats(&self) -> &[ChatId] {
        &self.allowed_ids
    }

    pub fn is_allowed(&self, chat: ChatId) -> bool {
        self.allowed_ids.contains(&chat)
    }

    /// Identity that receives watcher-originated messages (the first allow-listed one).
    pub fn primary_chat(&self) -> Option<ChatId> {
        self.allowed_ids.first().copied()
    }

    /// Instruction name -> script path, with `hotkey_scripts` taking precedence.
    pub fn script_table(&self) -> HashMap<String, PathBuf> {
        let mut table: HashMap<String, PathBuf> = self
            .scripts
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (k, v) in &self.hotkey_scripts {
            table.insert(k.clone(), v.clone());
        }
        table
    }
}
