//! Global constants for keyseat
//!
//! Consolidates timing and translation constants to eliminate magic
//! numbers throughout the codebase.

#![allow(dead_code)]

// ============================================================================
// Keycode Translation
// ============================================================================

/// Offset between evdev key codes and xkb keycodes.
///
/// xkb inherited the X11 keycode space, which starts 8 above evdev.
pub const EVDEV_XKB_KEYCODE_OFFSET: u32 = 8;

// ============================================================================
// Timing Constants
// ============================================================================

/// Default delay before key repeat starts, in milliseconds
pub const DEFAULT_REPEAT_DELAY_MS: i32 = 600;

/// Default key repeat rate, in characters per second
pub const DEFAULT_REPEAT_RATE: i32 = 25;

/// Main loop poll interval in milliseconds
///
/// Bounds the latency of config-reload and IME event draining; device
/// events wake the loop immediately via their descriptors.
pub const EVENT_POLL_INTERVAL_MS: u16 = 10;

/// How long to wait for the IME bridge to report ready at startup
pub const IME_READY_TIMEOUT_MS: u64 = 3000;
