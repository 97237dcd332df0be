//! Seat state
//!
//! Tracks keyboard focus, the active keyboard, and cursor visibility for
//! one logical seat. Clients are modeled as channel endpoints; the wire
//! protocol that would carry these events downstream is out of scope.
//!
//! Ordering invariant: an active-keyboard change is announced (keymap,
//! repeat info, modifier state) before any key event is delivered under
//! the new keyboard, so clients never interpret a key against a stale
//! keymap.

use std::fmt;
use std::sync::mpsc::Sender;

use log::{debug, info, warn};

use crate::input::{KeyState, KeyboardId, ModifierState};

/// Identity of a downstream client endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events delivered to a client's keyboard endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Keyboard focus entered this client.
    Enter,
    /// Keyboard focus left this client.
    Leave,
    /// The active keyboard changed; its keymap now applies.
    Keymap { keyboard: KeyboardId },
    /// Repeat characteristics of the active keyboard.
    RepeatInfo { rate: i32, delay: i32 },
    /// Modifier state under the active keyboard.
    Modifiers(ModifierState),
    /// A key transition.
    Key {
        code: u32,
        state: KeyState,
        time_msec: u32,
    },
    /// Text committed by the input method.
    Text(String),
}

/// The client currently holding keyboard focus.
#[derive(Debug, Clone)]
pub struct FocusedClient {
    pub client: ClientId,
    pub sink: Sender<ClientEvent>,
}

/// Announcement payload for an active-keyboard change.
#[derive(Debug, Clone, Copy)]
pub struct ActiveKeyboard {
    pub id: KeyboardId,
    pub repeat_rate: i32,
    pub repeat_delay: i32,
    pub mods: ModifierState,
}

pub struct Seat {
    focus: Option<FocusedClient>,
    active: Option<ActiveKeyboard>,
    cursor_visible: bool,
}

impl Seat {
    pub fn new() -> Self {
        Self {
            focus: None,
            active: None,
            cursor_visible: true,
        }
    }

    pub fn focused_client(&self) -> Option<ClientId> {
        self.focus.as_ref().map(|f| f.client)
    }

    #[allow(dead_code)]
    pub fn active_keyboard(&self) -> Option<KeyboardId> {
        self.active.map(|a| a.id)
    }

    /// Move keyboard focus to a new client (or clear it).
    ///
    /// The departing client gets a leave event; the arriving one gets an
    /// enter followed by a fresh announcement of the active keyboard so
    /// it never sees keys under an unknown keymap.
    pub fn set_focus(&mut self, focus: Option<FocusedClient>) {
        self.send_focused(ClientEvent::Leave);
        self.focus = focus;
        if let Some(client) = self.focused_client() {
            debug!("Keyboard focus -> client {client}");
            self.send_focused(ClientEvent::Enter);
            self.announce_active();
        } else {
            debug!("Keyboard focus cleared");
        }
    }

    /// Record the keyboard a key/modifier event originates from.
    ///
    /// Announces keymap, repeat info and modifiers to the focused client
    /// when the device actually changed; otherwise only refreshes the
    /// stored modifier snapshot.
    pub fn set_active_keyboard(&mut self, kb: ActiveKeyboard) {
        if self.active.map(|a| a.id) == Some(kb.id) {
            self.active = Some(kb);
            return;
        }
        debug!("Active keyboard -> {}", kb.id);
        self.active = Some(kb);
        self.announce_active();
    }

    /// Re-select the active keyboard after a device went away.
    ///
    /// Must run before any further key/modifier notification so clients
    /// never observe events without a matching keymap announcement.
    pub fn keyboard_removed(&mut self, removed: KeyboardId, replacement: Option<ActiveKeyboard>) {
        if self.active.map(|a| a.id) != Some(removed) {
            return;
        }
        self.active = None;
        match replacement {
            Some(kb) => {
                info!("Active keyboard {removed} removed, falling back to {}", kb.id);
                self.set_active_keyboard(kb);
            }
            None => info!("Active keyboard {removed} removed, no keyboards left"),
        }
    }

    /// Forward a key transition to the focused client.
    pub fn notify_key(&mut self, code: u32, state: KeyState, time_msec: u32) {
        self.send_focused(ClientEvent::Key {
            code,
            state,
            time_msec,
        });
    }

    /// Forward the current modifier state to the focused client.
    pub fn notify_modifiers(&mut self, mods: ModifierState) {
        if let Some(active) = self.active.as_mut() {
            active.mods = mods;
        }
        self.send_focused(ClientEvent::Modifiers(mods));
    }

    /// Deliver input-method committed text to the focused client.
    pub fn notify_text(&mut self, text: String) {
        self.send_focused(ClientEvent::Text(text));
    }

    #[allow(dead_code)]
    pub fn cursor_visible(&self) -> bool {
        self.cursor_visible
    }

    pub fn hide_cursor(&mut self) {
        if self.cursor_visible {
            debug!("Hiding cursor while typing");
            self.cursor_visible = false;
        }
    }

    /// To be driven by pointer activity once a pointer pipeline exists.
    #[allow(dead_code)]
    pub fn show_cursor(&mut self) {
        if !self.cursor_visible {
            debug!("Revealing cursor");
            self.cursor_visible = true;
        }
    }

    fn announce_active(&mut self) {
        let Some(kb) = self.active else { return };
        self.send_focused(ClientEvent::Keymap { keyboard: kb.id });
        self.send_focused(ClientEvent::RepeatInfo {
            rate: kb.repeat_rate,
            delay: kb.repeat_delay,
        });
        self.send_focused(ClientEvent::Modifiers(kb.mods));
    }

    fn send_focused(&mut self, event: ClientEvent) {
        let Some(focus) = self.focus.as_ref() else { return };
        if focus.sink.send(event).is_ok() {
            return;
        }
        let client = focus.client;
        self.focus = None;
        warn!("Focused client {client} vanished, dropping keyboard focus");
    }
}

impl Default for Seat {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn focused(id: u32) -> (FocusedClient, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel();
        (
            FocusedClient {
                client: ClientId(id),
                sink: tx,
            },
            rx,
        )
    }

    fn active(id: u32) -> ActiveKeyboard {
        ActiveKeyboard {
            id: KeyboardId(id),
            repeat_rate: 25,
            repeat_delay: 600,
            mods: ModifierState::default(),
        }
    }

    #[test]
    fn test_keymap_announced_before_key() {
        let mut seat = Seat::new();
        let (focus, rx) = focused(1);
        seat.set_focus(Some(focus));
        assert_eq!(rx.try_recv(), Ok(ClientEvent::Enter));

        seat.set_active_keyboard(active(7));
        seat.notify_key(30, KeyState::Pressed, 1000);

        assert_eq!(
            rx.try_recv(),
            Ok(ClientEvent::Keymap {
                keyboard: KeyboardId(7)
            })
        );
        assert_eq!(
            rx.try_recv(),
            Ok(ClientEvent::RepeatInfo {
                rate: 25,
                delay: 600
            })
        );
        assert!(matches!(rx.try_recv(), Ok(ClientEvent::Modifiers(_))));
        assert_eq!(
            rx.try_recv(),
            Ok(ClientEvent::Key {
                code: 30,
                state: KeyState::Pressed,
                time_msec: 1000
            })
        );
    }

    #[test]
    fn test_unchanged_keyboard_not_reannounced() {
        let mut seat = Seat::new();
        let (focus, rx) = focused(1);
        seat.set_focus(Some(focus));
        seat.set_active_keyboard(active(3));
        while rx.try_recv().is_ok() {}

        seat.set_active_keyboard(active(3));
        seat.notify_key(10, KeyState::Pressed, 5);
        assert!(matches!(rx.try_recv(), Ok(ClientEvent::Key { .. })));
    }

    #[test]
    fn test_focus_change_reannounces_keyboard() {
        let mut seat = Seat::new();
        seat.set_active_keyboard(active(4));

        let (focus, rx) = focused(2);
        seat.set_focus(Some(focus));
        assert_eq!(rx.try_recv(), Ok(ClientEvent::Enter));
        assert_eq!(
            rx.try_recv(),
            Ok(ClientEvent::Keymap {
                keyboard: KeyboardId(4)
            })
        );
    }

    #[test]
    fn test_leave_sent_on_focus_change() {
        let mut seat = Seat::new();
        let (old, old_rx) = focused(1);
        seat.set_focus(Some(old));
        assert_eq!(old_rx.try_recv(), Ok(ClientEvent::Enter));

        let (new, new_rx) = focused(2);
        seat.set_focus(Some(new));
        assert_eq!(old_rx.try_recv(), Ok(ClientEvent::Leave));
        assert_eq!(new_rx.try_recv(), Ok(ClientEvent::Enter));
    }

    #[test]
    fn test_removed_active_keyboard_replaced_before_keys() {
        let mut seat = Seat::new();
        let (focus, rx) = focused(1);
        seat.set_focus(Some(focus));
        seat.set_active_keyboard(active(1));
        while rx.try_recv().is_ok() {}

        seat.keyboard_removed(KeyboardId(1), Some(active(2)));
        assert_eq!(seat.active_keyboard(), Some(KeyboardId(2)));
        assert_eq!(
            rx.try_recv(),
            Ok(ClientEvent::Keymap {
                keyboard: KeyboardId(2)
            })
        );
    }

    #[test]
    fn test_removed_last_keyboard_clears_active() {
        let mut seat = Seat::new();
        seat.set_active_keyboard(active(1));
        seat.keyboard_removed(KeyboardId(1), None);
        assert_eq!(seat.active_keyboard(), None);
    }

    #[test]
    fn test_removing_inactive_keyboard_is_a_noop() {
        let mut seat = Seat::new();
        seat.set_active_keyboard(active(1));
        seat.keyboard_removed(KeyboardId(9), Some(active(2)));
        assert_eq!(seat.active_keyboard(), Some(KeyboardId(1)));
    }

    #[test]
    fn test_dead_client_drops_focus() {
        let mut seat = Seat::new();
        let (focus, rx) = focused(1);
        seat.set_focus(Some(focus));
        drop(rx);

        seat.notify_key(10, KeyState::Pressed, 0);
        assert_eq!(seat.focused_client(), None);
    }

    #[test]
    fn test_cursor_visibility() {
        let mut seat = Seat::new();
        assert!(seat.cursor_visible());
        seat.hide_cursor();
        assert!(!seat.cursor_visible());
        seat.hide_cursor();
        assert!(!seat.cursor_visible());
        seat.show_cursor();
        assert!(seat.cursor_visible());
    }
}
