//! evdev keycode and keysym constants
//!
//! Consolidates the Linux input event codes (<linux/input-event-codes.h>)
//! and keysym classification helpers used by the routing layer.

#![allow(dead_code)]

use xkbcommon::xkb::keysyms;

// ============================================================================
// Modifier Keys
// ============================================================================

/// Left Control key
pub const KEY_LEFTCTRL: u32 = 29;

/// Right Control key
pub const KEY_RIGHTCTRL: u32 = 97;

/// Left Shift key
pub const KEY_LEFTSHIFT: u32 = 42;

/// Right Shift key
pub const KEY_RIGHTSHIFT: u32 = 54;

/// Left Alt key
pub const KEY_LEFTALT: u32 = 56;

/// Right Alt key (AltGr on some keyboards)
pub const KEY_RIGHTALT: u32 = 100;

/// Left Meta (Super/Logo) key
pub const KEY_LEFTMETA: u32 = 125;

/// Right Meta (Super/Logo) key
pub const KEY_RIGHTMETA: u32 = 126;

// ============================================================================
// Common Keys
// ============================================================================

/// Escape key
pub const KEY_ESC: u32 = 1;

/// Enter key
pub const KEY_ENTER: u32 = 28;

/// Space bar
pub const KEY_SPACE: u32 = 57;

/// The letter A (first key of the home-row block)
pub const KEY_A: u32 = 30;

// ============================================================================
// Function Keys
// ============================================================================

/// F1 key
pub const KEY_F1: u32 = 59;

/// F12 key
pub const KEY_F12: u32 = 88;

// ============================================================================
// Keysym Helpers
// ============================================================================

/// Check if a translated keysym is itself a modifier key.
///
/// Covers the contiguous Shift_L..Hyper_R block plus the ISO level
/// shifts (AltGr and level-5 chooser), which sit outside that block.
#[inline]
pub const fn keysym_is_modifier(keysym: u32) -> bool {
    matches!(keysym, keysyms::KEY_Shift_L..=keysyms::KEY_Hyper_R)
        || keysym == keysyms::KEY_ISO_Level3_Shift
        || keysym == keysyms::KEY_ISO_Level5_Shift
}

/// Map a VT-switch keysym to its virtual terminal number (1-12).
///
/// The XF86Switch_VT keysyms form a contiguous range; standard keymaps
/// produce them for Ctrl+Alt+F1..F12. Returns None for any other keysym.
#[inline]
pub const fn vt_switch_target(keysym: u32) -> Option<u32> {
    if keysym >= keysyms::KEY_XF86Switch_VT_1 && keysym <= keysyms::KEY_XF86Switch_VT_12 {
        Some(keysym - keysyms::KEY_XF86Switch_VT_1 + 1)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifier_keysyms() {
        assert!(keysym_is_modifier(keysyms::KEY_Shift_L));
        assert!(keysym_is_modifier(keysyms::KEY_Control_R));
        assert!(keysym_is_modifier(keysyms::KEY_Super_L));
        assert!(keysym_is_modifier(keysyms::KEY_ISO_Level3_Shift));
        assert!(!keysym_is_modifier(keysyms::KEY_a));
        assert!(!keysym_is_modifier(keysyms::KEY_Return));
        assert!(!keysym_is_modifier(keysyms::KEY_F1));
    }

    #[test]
    fn test_vt_switch_range() {
        assert_eq!(vt_switch_target(keysyms::KEY_XF86Switch_VT_1), Some(1));
        assert_eq!(vt_switch_target(keysyms::KEY_XF86Switch_VT_7), Some(7));
        assert_eq!(vt_switch_target(keysyms::KEY_XF86Switch_VT_12), Some(12));
        assert_eq!(vt_switch_target(keysyms::KEY_F1), None);
        assert_eq!(vt_switch_target(keysyms::KEY_a), None);
        assert_eq!(vt_switch_target(keysyms::KEY_XF86Switch_VT_12 + 1), None);
    }
}
