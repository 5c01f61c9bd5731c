pub mod stub;
pub mod hotkey;
pub mod interrupt;
mod desktop;

#[cfg(target_os = "windows")]
mod win32;

use std::sync::Arc;

use colored::Color;

use crate::error::CoreResult;
use crate::types::ColorValue;
use crate::logger;

pub use desktop::DesktopPlatform;

/// Desktop operations the watchers and handlers need from the OS.
pub trait Platform: Send + Sync {
    /// Sample the screen color at absolute coordinates.
    fn pixel_color(&self, x: i32, y: i32) -> CoreResult<ColorValue>;
    /// Current clipboard text; an empty or non-text clipboard reads as "".
    fn clipboard_text(&self) -> CoreResult<String>;
    fn set_clipboard_text(&self, text: &str) -> CoreResult<()>;
    /// Press and release a key combination such as `ctrl+alt+r`.
    fn send_keys(&self, combo: &str) -> CoreResult<()>;
}

/// Register the component log prefixes shared by every platform.
pub fn register_log_prefixes() {
    logger::register_prefix("supervisor", Color::Magenta);
    logger::register_prefix("pixel", Color::Cyan);
    logger::register_prefix("clipboard", Color::Blue);
    logger::register_prefix("chain", Color::Yellow);
    logger::register_prefix("intent", Color::Green);
    logger::register_prefix("chat", Color::BrightGreen);
    logger::register_prefix("hotkey", Color::BrightBlue);
    logger::register_prefix("reactor", Color::BrightMagenta);
}

/// Create the platform appropriate for the current OS.
pub fn create_platform(force_stub: bool) -> Arc<dyn Platform> {
    register_log_prefixes();
    if force_stub {
        logger::register_prefix("stub", Color::BrightBlack);
        return Arc::new(stub::StubPlatform::new());
    }
    Arc::new(DesktopPlatform::new())
}
