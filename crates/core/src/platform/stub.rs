use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::types::ColorValue;
use crate::logger;
use super::Platform;

/// In-memory platform for `--stub` runs and tests.
///
/// Pixels are unreadable until set; the clipboard starts empty; key presses are
/// recorded instead of injected.
#[derive(Default)]
pub struct StubPlatform {
    pixels: Mutex<HashMap<(i32, i32), ColorValue>>,
    clipboard: Mutex<String>,
    keys: Mutex<Vec<String>>,
}

impl StubPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pixel(&self, x: i32, y: i32, color: ColorValue) {
        self.pixels.lock().unwrap_or_else(|p| p.into_inner()).insert((x, y), color);
    }

    pub fn clear_pixel(&self, x: i32, y: i32) {
        self.pixels.lock().unwrap_or_else(|p| p.into_inner()).remove(&(x, y));
    }

    /// Every combination passed to `send_keys`, oldest first.
    pub fn sent_keys(&self) -> Vec<String> {
        self.keys.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Platform for StubPlatform {
    fn pixel_color(&self, x: i32, y: i32) -> CoreResult<ColorValue> {
        self.pixels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(x, y))
            .copied()
            .ok_or_else(|| CoreError::PixelReadFailed { x, y, reason: "no stub pixel".into() })
    }

    fn clipboard_text(&self) -> CoreResult<String> {
        Ok(self.clipboard.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    fn set_clipboard_text(&self, text: &str) -> CoreResult<()> {
        logger::info_p("stub", &format!("set_clipboard_text({} chars)", text.chars().count()));
        *self.clipboard.lock().unwrap_or_else(|p| p.into_inner()) = text.to_string();
        Ok(())
    }

    fn send_keys(&self, combo: &str) -> CoreResult<()> {
        logger::info_p("stub", &format!("send_keys(\"{}\")", combo));
        self.keys.lock().unwrap_or_else(|p| p.into_inner()).push(combo.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_pixel_is_a_read_failure() {
        let stub = StubPlatform::new();
        assert!(matches!(stub.pixel_color(1, 2), Err(CoreError::PixelReadFailed { x: 1, y: 2, .. })));
        stub.set_pixel(1, 2, 0xff);
        assert_eq!(stub.pixel_color(1, 2).unwrap(), 0xff);
        stub.clear_pixel(1, 2);
        assert!(stub.pixel_color(1, 2).is_err());
    }

    #[test]
    fn clipboard_round_trips_and_keys_are_recorded() {
        let stub = StubPlatform::new();
        assert_eq!(stub.clipboard_text().unwrap(), "");
        stub.set_clipboard_text("hello").unwrap();
        assert_eq!(stub.clipboard_text().unwrap(), "hello");
        stub.send_keys("ctrl+c").unwrap();
        assert_eq!(stub.sent_keys(), vec!["ctrl+c".to_string()]);
    }
}
