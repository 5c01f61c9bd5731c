use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Gdi::{GetDC, GetPixel, ReleaseDC};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP,
    VIRTUAL_KEY,
};

use crate::error::{CoreError, CoreResult};
use crate::types::ColorValue;
use super::hotkey::KeyCombo;

const CLR_INVALID: u32 = 0xFFFF_FFFF;

const VK_SHIFT: u16 = 0x10;
const VK_CONTROL: u16 = 0x11;
const VK_MENU: u16 = 0x12;
const VK_LWIN: u16 = 0x5B;

/// Read one pixel of the desktop DC as a COLORREF (0x00BBGGRR).
pub fn pixel_color(x: i32, y: i32) -> CoreResult<ColorValue> {
    unsafe {
        let desktop = HWND::default();
        let hdc = GetDC(desktop);
        if hdc.is_invalid() {
            return Err(CoreError::PixelReadFailed { x, y, reason: "GetDC failed".into() });
        }
        let color = GetPixel(hdc, x, y);
        ReleaseDC(desktop, hdc);
        if color.0 == CLR_INVALID {
            return Err(CoreError::PixelReadFailed { x, y, reason: "coordinate outside the desktop".into() });
        }
        Ok(color.0)
    }
}

fn key_input(vk: u16, up: bool) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(vk),
                wScan: 0,
                dwFlags: if up { KEYEVENTF_KEYUP } else { KEYBD_EVENT_FLAGS(0) },
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

/// Press modifiers, tap the key, release modifiers in reverse order.
pub fn send_keys(combo: &KeyCombo) -> CoreResult<()> {
    let mut modifiers = Vec::new();
    if combo.ctrl { modifiers.push(VK_CONTROL); }
    if combo.alt { modifiers.push(VK_MENU); }
    if combo.shift { modifiers.push(VK_SHIFT); }
    if combo.win { modifiers.push(VK_LWIN); }

    let mut inputs: Vec<INPUT> = modifiers.iter().map(|vk| key_input(*vk, false)).collect();
    inputs.push(key_input(combo.vk as u16, false));
    inputs.push(key_input(combo.vk as u16, true));
    inputs.extend(modifiers.iter().rev().map(|vk| key_input(*vk, true)));

    let sent = unsafe { SendInput(&inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent as usize != inputs.len() {
        return Err(CoreError::KeySend {
            keys: combo.to_string(),
            reason: format!("SendInput accepted {} of {} events", sent, inputs.len()),
        });
    }
    Ok(())
}
