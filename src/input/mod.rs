//! Input handling
//!
//! Keyboard event acquisition and routing.
//! - Device management via libinput (path backend + udev hotplug)
//! - Per-device xkb translation state
//! - Press/release routing to mappings, the IME grab, or the focused client
//! - fcitx5 D-Bus bridge behind the keyboard-grab interface

pub mod devices;
pub mod ime;
pub mod keyboard;
pub mod keycodes;
pub mod pressed;
pub mod router;

pub use keyboard::Keyboard;
pub use pressed::{KeyConsumer, PressedKeys, PRESSED_KEYS_CAP};
pub use router::Router;

use std::fmt;

/// Identity of an attached keyboard, assigned by the device manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyboardId(pub u32);

impl fmt::Display for KeyboardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key transition direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Pressed,
    Released,
}

impl KeyState {
    pub fn is_press(self) -> bool {
        self == KeyState::Pressed
    }
}

bitflags::bitflags! {
    /// Modifier mask used for mapping matches.
    ///
    /// Lock-type modifiers (Caps, Num) are not part of the mask; an
    /// engaged lock does not change how mappings match.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u32 {
        const SHIFT = 1 << 0;
        const CTRL = 1 << 1;
        const ALT = 1 << 2;
        const SUPER = 1 << 3;
        const MOD3 = 1 << 4;
        const MOD5 = 1 << 5;
    }
}

/// Serialized xkb modifier state, the payload of modifier announcements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModifierState {
    pub depressed: u32,
    pub latched: u32,
    pub locked: u32,
    pub group: u32,
}

/// One translated hardware key transition.
///
/// Translation happens in the keyboard layer; the router never touches
/// xkb state itself.
#[derive(Debug, Clone, Copy)]
pub struct KeyEvent {
    /// Raw evdev key code.
    pub code: u32,
    /// Keysym under the device's current layout state.
    pub keysym: u32,
    pub state: KeyState,
    /// Event timestamp in milliseconds.
    pub time_msec: u32,
    /// Modifier mask active for this event.
    pub mods: Modifiers,
}
