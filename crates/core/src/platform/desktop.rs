use std::sync::Mutex;

use arboard::Clipboard;

use crate::error::{CoreError, CoreResult};
use crate::types::ColorValue;
use super::Platform;

/// Real desktop: `arboard` clipboard everywhere, GDI pixels and `SendInput`
/// keys on Windows.
pub struct DesktopPlatform {
    clipboard: Mutex<Option<Clipboard>>,
}

impl DesktopPlatform {
    pub fn new() -> Self {
        Self { clipboard: Mutex::new(None) }
    }

    /// Run `op` against a lazily opened clipboard handle. A failing handle is
    /// dropped so the next call reconnects.
    fn with_clipboard<T>(
        &self,
        op: impl FnOnce(&mut Clipboard) -> Result<T, arboard::Error>,
    ) -> CoreResult<T> {
        let mut slot = self.clipboard.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(Clipboard::new().map_err(|e| CoreError::Clipboard(e.to_string()))?);
        }
        let Some(clipboard) = slot.as_mut() else {
            return Err(CoreError::Clipboard("clipboard handle unavailable".into()));
        };
        let result = op(clipboard);
        if result.is_err() {
            *slot = None;
        }
        result.map_err(|e| CoreError::Clipboard(e.to_string()))
    }
}

impl Default for DesktopPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for DesktopPlatform {
    fn pixel_color(&self, x: i32, y: i32) -> CoreResult<ColorValue> {
        #[cfg(target_os = "windows")]
        {
            super::win32::pixel_color(x, y)
        }
        #[cfg(not(target_os = "windows"))]
        {
            Err(CoreError::PixelReadFailed { x, y, reason: "pixel sampling not supported on this platform".into() })
        }
    }

    fn clipboard_text(&self) -> CoreResult<String> {
        self.with_clipboard(|c| match c.get_text() {
            Err(arboard::Error::ContentNotAvailable) => Ok(String::new()),
            other => other,
        })
    }

    fn set_clipboard_text(&self, text: &str) -> CoreResult<()> {
        self.with_clipboard(|c| c.set_text(text.to_string()))
    }

    fn send_keys(&self, combo: &str) -> CoreResult<()> {
        let parsed = super::hotkey::KeyCombo::parse(combo)
            .map_err(|reason| CoreError::KeySend { keys: combo.to_string(), reason })?;
        #[cfg(target_os = "windows")]
        {
            super::win32::send_keys(&parsed)
        }
        #[cfg(not(target_os = "windows"))]
        {
            Err(CoreError::KeySend {
                keys: parsed.to_string(),
                reason: "key injection not supported on this platform".into(),
            })
        }
    }
}
