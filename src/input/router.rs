//! Key and modifier event routing
//!
//! Every key transition goes to exactly one consumer: a configured
//! mapping, the input-method grab, or the focused client. A press
//! records its consumer in the keyboard's pressed-key set and the
//! paired release is replayed to that same consumer, even if focus or
//! grab state changed in between. Events are handled serially on the
//! main thread; there is no routing state outside [`Router`] and the
//! per-keyboard pressed sets.

use log::{debug, info, warn};
use std::sync::mpsc;

use crate::config::{MappingAction, MappingTable};
use crate::input::ime::InputMethod;
use crate::input::keyboard::Keyboard;
use crate::input::keycodes;
use crate::input::pressed::KeyConsumer;
use crate::input::{KeyEvent, KeyState};
use crate::seat::Seat;
use crate::session::SessionRequest;

pub struct Router {
    seat: Seat,
    input_method: InputMethod,
    mappings: MappingTable,
    session_tx: mpsc::Sender<SessionRequest>,
    hide_cursor_when_typing: bool,
}

impl Router {
    pub fn new(
        seat: Seat,
        input_method: InputMethod,
        mappings: MappingTable,
        session_tx: mpsc::Sender<SessionRequest>,
        hide_cursor_when_typing: bool,
    ) -> Self {
        Self {
            seat,
            input_method,
            mappings,
            session_tx,
            hide_cursor_when_typing,
        }
    }

    #[allow(dead_code)]
    pub fn seat(&self) -> &Seat {
        &self.seat
    }

    pub fn seat_mut(&mut self) -> &mut Seat {
        &mut self.seat
    }

    pub fn input_method_mut(&mut self) -> &mut InputMethod {
        &mut self.input_method
    }

    /// Swap in a recompiled mapping table (config reload).
    pub fn set_mappings(&mut self, mappings: MappingTable) {
        self.mappings = mappings;
    }

    pub fn set_hide_cursor_when_typing(&mut self, enabled: bool) {
        self.hide_cursor_when_typing = enabled;
    }

    /// Route one translated key event.
    pub fn handle_key(&mut self, keyboard: &mut Keyboard, event: &KeyEvent) {
        // Grouped keyboards route through their representative only.
        if keyboard.is_group_member() {
            debug!("Ignoring key event from group member {}", keyboard.id);
            return;
        }

        match event.state {
            KeyState::Pressed => self.handle_press(keyboard, event),
            KeyState::Released => self.handle_release(keyboard, event),
        }
    }

    fn handle_press(&mut self, keyboard: &mut Keyboard, event: &KeyEvent) {
        if self.hide_cursor_when_typing && !keycodes::keysym_is_modifier(event.keysym) {
            self.seat.hide_cursor();
        }

        // Builtin VT switch. Consumed here and never recorded, so the
        // eventual release falls through as an untracked no-op. Checked
        // before the guards so a full pressed set cannot block it.
        if let Some(vt) = keycodes::vt_switch_target(event.keysym) {
            info!("VT switch hotkey: vt{}", vt);
            if self.session_tx.send(SessionRequest::SwitchVt(vt)).is_err() {
                warn!("Session channel closed, VT switch request dropped");
            }
            return;
        }

        // A second press without a release would desynchronize the
        // eventual single release from the consumer that got the first
        // press. The stored entry stays untouched.
        if keyboard.pressed.contains(event.code) {
            warn!(
                "Duplicate press for key {} on {}, dropping (misbehaving virtual input client?)",
                event.code, keyboard.id
            );
            return;
        }
        if keyboard.pressed.is_full() {
            warn!(
                "Pressed key set on {} is full, dropping press for key {}",
                keyboard.id, event.code
            );
            return;
        }

        // First consumer wins: mapping, then grab, then focus.
        if self.match_mapping(event, false) {
            keyboard.pressed.insert(event.code, KeyConsumer::Mapping);
            return;
        }

        if let Some(grab) = self.input_method.grab_for(keyboard) {
            grab.set_keyboard(keyboard.id);
            grab.send_key(event.code, event.keysym, KeyState::Pressed, event.time_msec);
            keyboard.pressed.insert(event.code, KeyConsumer::ImeGrab);
            return;
        }

        if self.seat.focused_client().is_some() {
            self.seat.set_active_keyboard(keyboard.announcement());
            self.seat
                .notify_key(event.code, KeyState::Pressed, event.time_msec);
            keyboard.pressed.insert(event.code, KeyConsumer::Focus);
            return;
        }

        debug!("No consumer for key {} press, not recording", event.code);
    }

    fn handle_release(&mut self, keyboard: &mut Keyboard, event: &KeyEvent) {
        match keyboard.pressed.remove(event.code) {
            Some(KeyConsumer::Mapping) => {
                // The action ran at press time and nothing was
                // forwarded; the release pass below is all that's left.
            }
            Some(KeyConsumer::ImeGrab) => {
                if let Some(grab) = self.input_method.grab_mut() {
                    grab.set_keyboard(keyboard.id);
                    grab.send_key(event.code, event.keysym, KeyState::Released, event.time_msec);
                } else {
                    debug!("Grab gone before release of key {}", event.code);
                }
            }
            Some(KeyConsumer::Focus) => {
                self.seat.set_active_keyboard(keyboard.announcement());
                self.seat
                    .notify_key(event.code, KeyState::Released, event.time_msec);
            }
            // Normal after a dropped press or a session switch.
            None => {}
        }

        // Release mappings observe every release, whatever consumed
        // the press.
        self.match_mapping(event, true);
    }

    /// Route a modifier-state change.
    pub fn handle_modifiers(&mut self, keyboard: &Keyboard) {
        // Group members share modifier state through their
        // representative, which reports once for the whole group.
        if keyboard.is_group_member() {
            return;
        }

        let mods = keyboard.mods;
        if let Some(grab) = self.input_method.grab_for(keyboard) {
            grab.set_keyboard(keyboard.id);
            grab.send_modifiers(mods);
        } else {
            self.seat.set_active_keyboard(keyboard.announcement());
            self.seat.notify_modifiers(mods);
        }
    }

    /// Run the mapping for this event, if one is configured.
    /// Returns whether a mapping fired.
    fn match_mapping(&self, event: &KeyEvent, is_release: bool) -> bool {
        let Some(action) = self.mappings.lookup(event.keysym, event.mods, is_release) else {
            return false;
        };
        self.run_action(action);
        true
    }

    fn run_action(&self, action: &MappingAction) {
        match action {
            MappingAction::Spawn(cmd) => spawn_command(cmd),
            MappingAction::SwitchVt(vt) => {
                info!("Mapping action: switch to vt{}", vt);
                if self.session_tx.send(SessionRequest::SwitchVt(*vt)).is_err() {
                    warn!("Session channel closed, VT switch request dropped");
                }
            }
            MappingAction::Exit => {
                info!("Mapping action: exit");
                if self.session_tx.send(SessionRequest::Exit).is_err() {
                    warn!("Session channel closed, exit request dropped");
                }
            }
        }
    }
}

/// Spawn a mapped command without waiting for it.
///
/// SIGCHLD is set to SIG_IGN at startup, so the kernel reaps finished
/// children and no zombies accumulate.
fn spawn_command(cmd: &str) {
    let argv = match shell_words::split(cmd) {
        Ok(argv) if !argv.is_empty() => argv,
        Ok(_) => {
            warn!("Empty mapping command");
            return;
        }
        Err(e) => {
            warn!("Cannot parse mapping command '{}': {}", cmd, e);
            return;
        }
    };

    match std::process::Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
    {
        Ok(child) => info!("Spawned '{}' (pid {})", argv[0], child.id()),
        Err(e) => warn!("Failed to spawn '{}': {}", argv[0], e),
    }
}
