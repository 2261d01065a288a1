//! Linux evdev key codes, US-layout character resolution and the key-combo
//! grammar (`ctrl+shift+t`, `enter`, `alt+f4`).
//!
//! EIS transports evdev codes unchanged, so nothing here depends on the
//! compositor's XKB keymap beyond assuming a US layout for text.

use std::fmt;
use std::str::FromStr;

use crate::errors::KeyParseError;

/// Linux evdev key code (`KEY_*` in `linux/input-event-codes.h`).
pub type KeyCode = u32;

pub const KEY_ESC: KeyCode = 1;
pub const KEY_MINUS: KeyCode = 12;
pub const KEY_EQUAL: KeyCode = 13;
pub const KEY_BACKSPACE: KeyCode = 14;
pub const KEY_TAB: KeyCode = 15;
pub const KEY_LEFTBRACE: KeyCode = 26;
pub const KEY_RIGHTBRACE: KeyCode = 27;
pub const KEY_ENTER: KeyCode = 28;
pub const KEY_LEFTCTRL: KeyCode = 29;
pub const KEY_SEMICOLON: KeyCode = 39;
pub const KEY_APOSTROPHE: KeyCode = 40;
pub const KEY_GRAVE: KeyCode = 41;
pub const KEY_LEFTSHIFT: KeyCode = 42;
pub const KEY_BACKSLASH: KeyCode = 43;
pub const KEY_COMMA: KeyCode = 51;
pub const KEY_DOT: KeyCode = 52;
pub const KEY_SLASH: KeyCode = 53;
pub const KEY_LEFTALT: KeyCode = 56;
pub const KEY_SPACE: KeyCode = 57;
pub const KEY_CAPSLOCK: KeyCode = 58;
pub const KEY_F1: KeyCode = 59;
pub const KEY_F11: KeyCode = 87;
pub const KEY_F12: KeyCode = 88;
pub const KEY_HOME: KeyCode = 102;
pub const KEY_UP: KeyCode = 103;
pub const KEY_PAGEUP: KeyCode = 104;
pub const KEY_LEFT: KeyCode = 105;
pub const KEY_RIGHT: KeyCode = 106;
pub const KEY_END: KeyCode = 107;
pub const KEY_DOWN: KeyCode = 108;
pub const KEY_PAGEDOWN: KeyCode = 109;
pub const KEY_INSERT: KeyCode = 110;
pub const KEY_DELETE: KeyCode = 111;
pub const KEY_LEFTMETA: KeyCode = 125;

/// Most keys a combo may name, modifiers included.
pub const MAX_COMBO_KEYS: usize = 8;

/// Letter codes in alphabetical order (`a` = 30 ... `z` = 44).
const LETTERS: [KeyCode; 26] = [
    30, 48, 46, 32, 18, 33, 34, 35, 23, 36, 37, 38, 50, 49, 24, 25, 16, 19, 31, 20, 22, 47, 17,
    45, 21, 44,
];

/// Digit codes: `1`..`9` are 2..10, `0` is 11.
fn digit_code(d: u32) -> KeyCode {
    if d == 0 {
        11
    } else {
        1 + d
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Released,
    Pressed,
}

impl KeyState {
    /// Wire value used by `ei_keyboard.key`.
    pub fn wire(self) -> u32 {
        match self {
            KeyState::Released => 0,
            KeyState::Pressed => 1,
        }
    }
}

/// One primitive key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub code: KeyCode,
    pub state: KeyState,
}

impl KeyEvent {
    pub fn press(code: KeyCode) -> Self {
        Self {
            code,
            state: KeyState::Pressed,
        }
    }

    pub fn release(code: KeyCode) -> Self {
        Self {
            code,
            state: KeyState::Released,
        }
    }
}

/// A key plus whether Shift must be held to produce the character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keystroke {
    pub code: KeyCode,
    pub shift: bool,
}

impl Keystroke {
    const fn plain(code: KeyCode) -> Self {
        Self { code, shift: false }
    }

    const fn shifted(code: KeyCode) -> Self {
        Self { code, shift: true }
    }

    /// Minimal event group producing this character.
    pub fn events(&self) -> Vec<KeyEvent> {
        if self.shift {
            vec![
                KeyEvent::press(KEY_LEFTSHIFT),
                KeyEvent::press(self.code),
                KeyEvent::release(self.code),
                KeyEvent::release(KEY_LEFTSHIFT),
            ]
        } else {
            vec![KeyEvent::press(self.code), KeyEvent::release(self.code)]
        }
    }
}

/// Resolve a character to a keystroke on a US layout.
pub fn char_keystroke(ch: char) -> Option<Keystroke> {
    if ch.is_ascii_lowercase() {
        return Some(Keystroke::plain(LETTERS[(ch as u8 - b'a') as usize]));
    }
    if ch.is_ascii_uppercase() {
        return Some(Keystroke::shifted(LETTERS[(ch as u8 - b'A') as usize]));
    }
    if let Some(d) = ch.to_digit(10).filter(|_| ch.is_ascii_digit()) {
        return Some(Keystroke::plain(digit_code(d)));
    }

    let stroke = match ch {
        ' ' => Keystroke::plain(KEY_SPACE),
        '\n' => Keystroke::plain(KEY_ENTER),
        '\t' => Keystroke::plain(KEY_TAB),
        '!' => Keystroke::shifted(digit_code(1)),
        '@' => Keystroke::shifted(digit_code(2)),
        '#' => Keystroke::shifted(digit_code(3)),
        '$' => Keystroke::shifted(digit_code(4)),
        '%' => Keystroke::shifted(digit_code(5)),
        '^' => Keystroke::shifted(digit_code(6)),
        '&' => Keystroke::shifted(digit_code(7)),
        '*' => Keystroke::shifted(digit_code(8)),
        '(' => Keystroke::shifted(digit_code(9)),
        ')' => Keystroke::shifted(digit_code(0)),
        '-' => Keystroke::plain(KEY_MINUS),
        '_' => Keystroke::shifted(KEY_MINUS),
        '=' => Keystroke::plain(KEY_EQUAL),
        '+' => Keystroke::shifted(KEY_EQUAL),
        '[' => Keystroke::plain(KEY_LEFTBRACE),
        '{' => Keystroke::shifted(KEY_LEFTBRACE),
        ']' => Keystroke::plain(KEY_RIGHTBRACE),
        '}' => Keystroke::shifted(KEY_RIGHTBRACE),
        ';' => Keystroke::plain(KEY_SEMICOLON),
        ':' => Keystroke::shifted(KEY_SEMICOLON),
        '\'' => Keystroke::plain(KEY_APOSTROPHE),
        '"' => Keystroke::shifted(KEY_APOSTROPHE),
        '`' => Keystroke::plain(KEY_GRAVE),
        '~' => Keystroke::shifted(KEY_GRAVE),
        '\\' => Keystroke::plain(KEY_BACKSLASH),
        '|' => Keystroke::shifted(KEY_BACKSLASH),
        ',' => Keystroke::plain(KEY_COMMA),
        '<' => Keystroke::shifted(KEY_COMMA),
        '.' => Keystroke::plain(KEY_DOT),
        '>' => Keystroke::shifted(KEY_DOT),
        '/' => Keystroke::plain(KEY_SLASH),
        '?' => Keystroke::shifted(KEY_SLASH),
        _ => return None,
    };
    Some(stroke)
}

/// Modifiers in canonical press order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Super,
}

impl Modifier {
    pub fn code(self) -> KeyCode {
        match self {
            Modifier::Ctrl => KEY_LEFTCTRL,
            Modifier::Alt => KEY_LEFTALT,
            Modifier::Shift => KEY_LEFTSHIFT,
            Modifier::Super => KEY_LEFTMETA,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "ctrl" | "control" => Some(Modifier::Ctrl),
            "alt" => Some(Modifier::Alt),
            "shift" => Some(Modifier::Shift),
            "super" | "meta" | "win" | "cmd" | "logo" => Some(Modifier::Super),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Modifier::Ctrl => "ctrl",
            Modifier::Alt => "alt",
            Modifier::Shift => "shift",
            Modifier::Super => "super",
        }
    }
}

fn named_key(name: &str) -> Option<KeyCode> {
    let code = match name {
        "enter" | "return" => KEY_ENTER,
        "tab" => KEY_TAB,
        "space" => KEY_SPACE,
        "esc" | "escape" => KEY_ESC,
        "backspace" => KEY_BACKSPACE,
        "delete" | "del" => KEY_DELETE,
        "insert" | "ins" => KEY_INSERT,
        "home" => KEY_HOME,
        "end" => KEY_END,
        "pageup" | "pgup" => KEY_PAGEUP,
        "pagedown" | "pgdn" => KEY_PAGEDOWN,
        "up" => KEY_UP,
        "down" => KEY_DOWN,
        "left" => KEY_LEFT,
        "right" => KEY_RIGHT,
        "capslock" => KEY_CAPSLOCK,
        "minus" => KEY_MINUS,
        "equal" => KEY_EQUAL,
        "f11" => KEY_F11,
        "f12" => KEY_F12,
        _ => {
            let n: u32 = name.strip_prefix('f')?.parse().ok()?;
            if (1..=10).contains(&n) {
                KEY_F1 + n - 1
            } else {
                return None;
            }
        }
    };
    Some(code)
}

/// Parsed key combo: a canonical modifier set plus one base key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCombo {
    modifiers: Vec<Modifier>,
    key: KeyCode,
}

impl KeyCombo {
    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    pub fn key(&self) -> KeyCode {
        self.key
    }

    /// Modifiers in canonical order, then the base key.
    pub fn press_events(&self) -> Vec<KeyEvent> {
        self.modifiers
            .iter()
            .map(|m| KeyEvent::press(m.code()))
            .chain(std::iter::once(KeyEvent::press(self.key)))
            .collect()
    }

    /// Base key, then modifiers in reverse order.
    pub fn release_events(&self) -> Vec<KeyEvent> {
        std::iter::once(KeyEvent::release(self.key))
            .chain(self.modifiers.iter().rev().map(|m| KeyEvent::release(m.code())))
            .collect()
    }
}

impl FromStr for KeyCombo {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        if lowered.is_empty() {
            return Err(KeyParseError::Empty);
        }

        // "ctrl++" and "+" name the plus key itself
        let (head, trailing_plus) = match lowered.strip_suffix("++") {
            Some(rest) => (rest.to_owned(), true),
            None if lowered == "+" => (String::new(), true),
            None => (lowered, false),
        };

        let mut tokens: Vec<String> = if head.is_empty() {
            Vec::new()
        } else {
            head.split('+').map(|t| t.trim().to_owned()).collect()
        };
        if trailing_plus {
            tokens.push("+".to_owned());
        }

        if tokens.len() > MAX_COMBO_KEYS {
            return Err(KeyParseError::TooManyKeys {
                count: tokens.len(),
                max: MAX_COMBO_KEYS,
            });
        }

        let mut modifiers: Vec<Modifier> = Vec::new();
        let mut base: Option<(String, KeyCode)> = None;

        for token in tokens {
            if token.is_empty() {
                return Err(KeyParseError::UnknownKey(s.trim().to_owned()));
            }
            if let Some(m) = Modifier::from_name(&token) {
                modifiers.push(m);
                continue;
            }

            let code = match named_key(&token) {
                Some(code) => code,
                None => {
                    // "plus" is the shifted '+', same as "ctrl++"
                    let literal = if token == "plus" { "+" } else { token.as_str() };
                    let mut chars = literal.chars();
                    let stroke = match (chars.next(), chars.next()) {
                        (Some(ch), None) => char_keystroke(ch),
                        _ => None,
                    }
                    .ok_or_else(|| KeyParseError::UnknownKey(token.clone()))?;
                    if stroke.shift {
                        modifiers.push(Modifier::Shift);
                    }
                    stroke.code
                }
            };

            if let Some((first, _)) = &base {
                return Err(KeyParseError::MultipleBaseKeys(first.clone(), token));
            }
            base = Some((token, code));
        }

        modifiers.sort();
        modifiers.dedup();

        let key = match base {
            Some((_, code)) => code,
            // Modifier-only combo: the last modifier is pressed as the key
            None => modifiers.pop().ok_or(KeyParseError::Empty)?.code(),
        };

        Ok(KeyCombo { modifiers, key })
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.modifiers {
            write!(f, "{}+", m.name())?;
        }
        write!(f, "key{}", self.key)
    }
}
