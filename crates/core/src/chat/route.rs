use regex::Regex;

use crate::config::{compile_anchored, MonitorConfig};
use crate::error::{CoreError, CoreResult};

/// Text categories handled before free text falls through to intent dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteRule {
    ChannelNote,
    SingleVideo,
    Playlist,
}

impl RouteRule {
    /// Evaluation order; the first matching rule wins.
    pub const ORDER: [RouteRule; 3] = [RouteRule::ChannelNote, RouteRule::SingleVideo, RouteRule::Playlist];
}

pub struct RouteTable {
    note_marker: String,
    single_video: Vec<Regex>,
    playlist: Vec<Regex>,
}

impl RouteTable {
    pub fn new(config: &MonitorConfig) -> CoreResult<Self> {
        let compile = |patterns: &[String]| {
            compile_anchored(patterns).map_err(|e| CoreError::ConfigLoadFailed {
                path: "url_patterns".into(),
                reason: e.to_string(),
            })
        };
        Ok(Self {
            note_marker: config.note_marker.clone(),
            single_video: compile(&config.url_patterns.single_video)?,
            playlist: compile(&config.url_patterns.playlist)?,
        })
    }

    /// Classify already-trimmed message text.
    pub fn classify(&self, text: &str) -> Option<RouteRule> {
        RouteRule::ORDER.into_iter().find(|rule| self.matches(*rule, text))
    }

    fn matches(&self, rule: RouteRule, text: &str) -> bool {
        match rule {
            RouteRule::ChannelNote => text.lines().next().map(str::trim) == Some(self.note_marker.as_str()),
            RouteRule::SingleVideo => self.single_video.iter().any(|re| re.is_match(text)),
            RouteRule::Playlist => self.playlist.iter().any(|re| re.is_match(text)),
        }
    }
}

/// A parsed channel note: marker line, channel line, then the body.
#[derive(Debug, PartialEq, Eq)]
pub struct ChannelNote<'a> {
    pub channel: &'a str,
    pub body: String,
}

impl<'a> ChannelNote<'a> {
    /// `None` when the channel line is missing or unusable as a directory name.
    pub fn parse(text: &'a str) -> Option<Self> {
        let mut lines = text.trim().lines();
        lines.next()?;
        let channel = lines.next()?.trim();
        if channel.is_empty() || channel == "." || channel.contains("..") || channel.contains(['/', '\\']) {
            return None;
        }
        let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
        Some(Self { channel, body })
    }
}
