use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

use crate::logger;
use crate::types::Activation;

/// A parsed key combination: modifier flags plus one Windows virtual-key code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyCombo {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub win: bool,
    pub key: String,
    pub vk: u32,
}

/// Named keys as (canonical name, virtual-key code). Aliases resolve to the
/// canonical name so equal keys compare equal.
fn named_vk(name: &str) -> Option<(&'static str, u32)> {
    let named = match name {
        "enter" | "return" => ("enter", 0x0D),
        "esc" | "escape" => ("esc", 0x1B),
        "space" => ("space", 0x20),
        "tab" => ("tab", 0x09),
        "backspace" => ("backspace", 0x08),
        "delete" | "del" => ("delete", 0x2E),
        "insert" | "ins" => ("insert", 0x2D),
        "home" => ("home", 0x24),
        "end" => ("end", 0x23),
        "pageup" | "page up" => ("pageup", 0x21),
        "pagedown" | "page down" => ("pagedown", 0x22),
        "up" => ("up", 0x26),
        "down" => ("down", 0x28),
        "left" => ("left", 0x25),
        "right" => ("right", 0x27),
        "printscreen" | "print screen" => ("printscreen", 0x2C),
        "pause" => ("pause", 0x13),
        _ => return None,
    };
    Some(named)
}

/// Resolve a key name to its canonical spelling and virtual-key code.
fn key_vk(name: &str) -> Option<(String, u32)> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_alphabetic() {
            return Some((name.to_string(), c.to_ascii_uppercase() as u32));
        }
        if c.is_ascii_digit() {
            return Some((name.to_string(), c as u32));
        }
    }
    if let Some(n) = name.strip_prefix('f').and_then(|n| n.parse::<u32>().ok()) {
        if (1..=24).contains(&n) {
            return Some((format!("f{}", n), 0x70 + n - 1));
        }
    }
    named_vk(name).map(|(canonical, vk)| (canonical.to_string(), vk))
}

impl KeyCombo {
    /// Parse `ctrl+alt+shift+win+<key>` in any order and case.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut combo = KeyCombo { ctrl: false, alt: false, shift: false, win: false, key: String::new(), vk: 0 };
        for part in text.split('+').map(|p| p.trim().to_lowercase()) {
            match part.as_str() {
                "" => return Err(format!("empty key in '{}'", text)),
                "ctrl" | "control" => combo.ctrl = true,
                "alt" => combo.alt = true,
                "shift" => combo.shift = true,
                "win" | "windows" | "super" | "cmd" => combo.win = true,
                key => {
                    if !combo.key.is_empty() {
                        return Err(format!("more than one non-modifier key in '{}'", text));
                    }
                    let (canonical, vk) = key_vk(key).ok_or_else(|| format!("unknown key '{}'", key))?;
                    combo.key = canonical;
                    combo.vk = vk;
                }
            }
        }
        if combo.key.is_empty() {
            return Err(format!("no key in '{}'", text));
        }
        Ok(combo)
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ctrl { write!(f, "ctrl+")?; }
        if self.alt { write!(f, "alt+")?; }
        if self.shift { write!(f, "shift+")?; }
        if self.win { write!(f, "win+")?; }
        write!(f, "{}", self.key)
    }
}

/// Hotkey-to-script bindings, keyed by normalized combination.
#[derive(Debug, Default, Clone)]
pub struct HotkeyRegistry {
    bindings: BTreeMap<KeyCombo, PathBuf>,
}

impl HotkeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `combo` to `script`, replacing any earlier binding of the same
    /// combination. Returns the replaced script.
    pub fn bind(&mut self, combo: &str, script: PathBuf) -> Result<Option<PathBuf>, String> {
        let parsed = KeyCombo::parse(combo)?;
        let replaced = self.bindings.insert(parsed.clone(), script);
        if let Some(old) = &replaced {
            logger::warn_p("hotkey", &format!("{} rebound (was {})", parsed, old.display()));
        }
        Ok(replaced)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn script_for(&self, combo: &KeyCombo) -> Option<&PathBuf> {
        self.bindings.get(combo)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeyCombo, &PathBuf)> {
        self.bindings.iter()
    }
}

/// Start a background thread that registers every binding as a global hotkey
/// and sends an `Activation::Hotkey` for each press.
#[cfg(target_os = "windows")]
pub fn start_hotkey_listener(registry: HotkeyRegistry, tx: Sender<Activation>) {
    use std::ffi::c_void;

    type HWND = *mut c_void;
    type BOOL = i32;
    type UINT = u32;
    type WPARAM = usize;
    type LPARAM = isize;
    type DWORD = u32;
    type LONG = i32;

    #[repr(C)]
    struct POINT {
        x: LONG,
        y: LONG,
    }

    #[repr(C)]
    struct MSG {
        hwnd: HWND,
        message: UINT,
        w_param: WPARAM,
        l_param: LPARAM,
        time: DWORD,
        pt: POINT,
    }

    const MOD_ALT: u32 = 0x0001;
    const MOD_CONTROL: u32 = 0x0002;
    const MOD_SHIFT: u32 = 0x0004;
    const MOD_WIN: u32 = 0x0008;
    const MOD_NOREPEAT: u32 = 0x4000;
    const WM_HOTKEY: u32 = 0x0312;

    extern "system" {
        fn RegisterHotKey(hwnd: HWND, id: i32, fs_modifiers: UINT, vk: UINT) -> BOOL;
        fn UnregisterHotKey(hwnd: HWND, id: i32) -> BOOL;
        fn GetMessageW(
            msg: *mut MSG,
            hwnd: HWND,
            msg_filter_min: UINT,
            msg_filter_max: UINT,
        ) -> BOOL;
    }

    std::thread::spawn(move || {
        // Registration is per-thread: the thread that registers must pump messages.
        let mut by_id: Vec<(KeyCombo, PathBuf)> = Vec::new();
        for (combo, script) in registry.iter() {
            let id = by_id.len() as i32 + 1;
            let mut mods = MOD_NOREPEAT;
            if combo.alt { mods |= MOD_ALT; }
            if combo.ctrl { mods |= MOD_CONTROL; }
            if combo.shift { mods |= MOD_SHIFT; }
            if combo.win { mods |= MOD_WIN; }
            unsafe {
                UnregisterHotKey(std::ptr::null_mut(), id);
                if RegisterHotKey(std::ptr::null_mut(), id, mods, combo.vk) == 0 {
                    logger::error_p(
                        "hotkey",
                        &format!("failed to register {}; another application may have claimed it", combo),
                    );
                    continue;
                }
            }
            logger::info_p("hotkey", &format!("{} -> {}", combo, script.display()));
            by_id.push((combo.clone(), script.clone()));
        }

        unsafe {
            let mut msg: MSG = std::mem::zeroed();
            // GetMessageW blocks until a message arrives; returns 0 on WM_QUIT
            while GetMessageW(&mut msg, std::ptr::null_mut(), 0, 0) > 0 {
                if msg.message != WM_HOTKEY {
                    continue;
                }
                let Some((combo, script)) = by_id.get(msg.w_param.wrapping_sub(1)) else { continue };
                let event = Activation::Hotkey { combo: combo.to_string(), script: script.clone() };
                if tx.send(event).is_err() {
                    return;
                }
            }
        }
    });
}

#[cfg(not(target_os = "windows"))]
pub fn start_hotkey_listener(registry: HotkeyRegistry, _tx: Sender<Activation>) {
    if !registry.is_empty() {
        logger::warn_p(
            "hotkey",
            &format!("global hotkeys not supported on this platform; {} binding(s) ignored", registry.len()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modifiers_in_any_order() {
        let a = KeyCombo::parse("Shift+CTRL+k").unwrap();
        let b = KeyCombo::parse("ctrl+shift+K").unwrap();
        assert_eq!(a, b);
        assert!(a.ctrl && a.shift && !a.alt && !a.win);
        assert_eq!(a.vk, 0x4B);
        assert_eq!(a.to_string(), "ctrl+shift+k");
    }

    #[test]
    fn parses_digits_function_and_named_keys() {
        assert_eq!(KeyCombo::parse("alt+1").unwrap().vk, 0x31);
        assert_eq!(KeyCombo::parse("f5").unwrap().vk, 0x74);
        assert_eq!(KeyCombo::parse("ctrl+f24").unwrap().vk, 0x87);
        assert_eq!(KeyCombo::parse("win+enter").unwrap().vk, 0x0D);
    }

    #[test]
    fn rejects_malformed_combinations() {
        assert!(KeyCombo::parse("ctrl+").is_err());
        assert!(KeyCombo::parse("ctrl+alt").is_err());
        assert!(KeyCombo::parse("a+b").is_err());
        assert!(KeyCombo::parse("ctrl+f25").is_err());
        assert!(KeyCombo::parse("ctrl+banana").is_err());
    }

    #[test]
    fn later_binding_replaces_same_combination() {
        let mut reg = HotkeyRegistry::new();
        assert_eq!(reg.bind("ctrl+alt+1", PathBuf::from("a.ahk")).unwrap(), None);
        let replaced = reg.bind("Alt+Ctrl+1", PathBuf::from("b.ahk")).unwrap();
        assert_eq!(replaced, Some(PathBuf::from("a.ahk")));
        assert_eq!(reg.len(), 1);
        let combo = KeyCombo::parse("ctrl+alt+1").unwrap();
        assert_eq!(reg.script_for(&combo), Some(&PathBuf::from("b.ahk")));
    }

    #[test]
    fn key_aliases_bind_the_same_combination() {
        assert_eq!(KeyCombo::parse("ctrl+return").unwrap(), KeyCombo::parse("ctrl+enter").unwrap());
        assert_eq!(KeyCombo::parse("del").unwrap().to_string(), "delete");
        assert_eq!(KeyCombo::parse("shift+F05").unwrap(), KeyCombo::parse("shift+f5").unwrap());

        let mut reg = HotkeyRegistry::new();
        reg.bind("ctrl+enter", PathBuf::from("a.ahk")).unwrap();
        let replaced = reg.bind("ctrl+return", PathBuf::from("b.ahk")).unwrap();
        assert_eq!(replaced, Some(PathBuf::from("a.ahk")));
        reg.bind("page up", PathBuf::from("c.ahk")).unwrap();
        reg.bind("pageup", PathBuf::from("d.ahk")).unwrap();
        assert_eq!(reg.len(), 2);
    }
}
