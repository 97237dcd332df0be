//! Per-device keyboard state
//!
//! One `Keyboard` per attached device (or one synthetic representative
//! per hardware group): identity, the pressed-key set, xkb translation
//! state, repeat settings, and virtual-device ownership. Translation
//! lives here so the router only ever sees finished `KeyEvent`s.

use anyhow::{anyhow, Result};
use log::{info, warn};
use xkbcommon::xkb;
use xkbcommon::xkb::keysyms;

use crate::config::KeyboardConfig;
use crate::constants::EVDEV_XKB_KEYCODE_OFFSET;
use crate::input::pressed::PressedKeys;
use crate::input::{KeyEvent, KeyState, KeyboardId, Modifiers, ModifierState};
use crate::seat::{ActiveKeyboard, ClientId};

/// Role of a keyboard inside a hardware group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRole {
    /// Synthetic device that routes on behalf of the whole group.
    Representative,
    /// Hardware member deferring to the representative.
    Member(KeyboardId),
}

pub struct Keyboard {
    pub id: KeyboardId,
    pub name: String,
    /// Held keys and the consumer each press was routed to.
    pub pressed: PressedKeys,
    /// Owning client for virtual keyboards; None for hardware devices.
    pub virtual_owner: Option<ClientId>,
    pub group: Option<GroupRole>,
    /// Key repeat rate announced to clients, in characters per second.
    pub repeat_rate: i32,
    /// Delay before repeat starts, in milliseconds.
    pub repeat_delay: i32,
    /// Last serialized modifier state.
    pub mods: ModifierState,
    xkb_state: Option<xkb::State>,
}

impl Keyboard {
    /// Attach a hardware keyboard.
    ///
    /// A keymap that cannot be compiled is fatal to the attach; the
    /// device manager leaves the device offline in that case.
    pub fn new(id: KeyboardId, name: &str, config: &KeyboardConfig) -> Result<Self> {
        let xkb_state = build_xkb_state(config)?;
        info!(
            "Keyboard {id} attached: {name} (layout={}, repeat {}cps after {}ms)",
            if config.xkb_layout.is_empty() {
                "default"
            } else {
                &config.xkb_layout
            },
            config.repeat_rate,
            config.repeat_delay
        );
        Ok(Self {
            id,
            name: name.to_string(),
            pressed: PressedKeys::new(),
            virtual_owner: None,
            group: None,
            repeat_rate: config.repeat_rate,
            repeat_delay: config.repeat_delay,
            mods: ModifierState::default(),
            xkb_state: Some(xkb_state),
        })
    }

    /// Attach a virtual keyboard owned by a client.
    ///
    /// Unlike hardware devices a missing keymap is tolerated here; keys
    /// injected through such a keyboard carry no keysym and fall
    /// through mapping/hotkey matching.
    pub fn new_virtual(id: KeyboardId, name: &str, owner: ClientId, config: &KeyboardConfig) -> Self {
        let xkb_state = match build_xkb_state(config) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Virtual keyboard {id} ({name}) has no keymap: {e}");
                None
            }
        };
        info!("Virtual keyboard {id} attached: {name} (client {owner})");
        Self {
            id,
            name: name.to_string(),
            pressed: PressedKeys::new(),
            virtual_owner: Some(owner),
            group: None,
            repeat_rate: config.repeat_rate,
            repeat_delay: config.repeat_delay,
            mods: ModifierState::default(),
            xkb_state,
        }
    }

    /// Feed one raw transition through xkb.
    ///
    /// Updates the translation state first, then reads the keysym and
    /// modifier mask under the updated state, matching the order the
    /// input stack presents state to consumers. The second return value
    /// reports whether the serialized modifier state changed, which is
    /// what drives modifier routing.
    pub fn translate_key(&mut self, code: u32, state: KeyState, time_msec: u32) -> (KeyEvent, bool) {
        let Some(xkb_state) = self.xkb_state.as_mut() else {
            let event = KeyEvent {
                code,
                keysym: keysyms::KEY_NoSymbol,
                state,
                time_msec,
                mods: Modifiers::empty(),
            };
            return (event, false);
        };

        let keycode = xkb::Keycode::new(code + EVDEV_XKB_KEYCODE_OFFSET);
        let direction = match state {
            KeyState::Pressed => xkb::KeyDirection::Down,
            KeyState::Released => xkb::KeyDirection::Up,
        };
        xkb_state.update_key(keycode, direction);

        let keysym = xkb_state.key_get_one_sym(keycode).raw();
        let mods = active_modifiers(xkb_state);
        let serialized = serialize_mods(xkb_state);
        let mods_changed = serialized != self.mods;
        self.mods = serialized;

        (
            KeyEvent {
                code,
                keysym,
                state,
                time_msec,
                mods,
            },
            mods_changed,
        )
    }

    /// Announcement payload for the seat's active-keyboard tracking.
    pub fn announcement(&self) -> ActiveKeyboard {
        ActiveKeyboard {
            id: self.id,
            repeat_rate: self.repeat_rate,
            repeat_delay: self.repeat_delay,
            mods: self.mods,
        }
    }

    pub fn is_group_member(&self) -> bool {
        matches!(self.group, Some(GroupRole::Member(_)))
    }

    pub fn is_virtual(&self) -> bool {
        self.virtual_owner.is_some()
    }

    /// Live-apply repeat settings from a reloaded config.
    pub fn apply_repeat(&mut self, config: &KeyboardConfig) {
        self.repeat_rate = config.repeat_rate;
        self.repeat_delay = config.repeat_delay;
    }
}

fn build_xkb_state(config: &KeyboardConfig) -> Result<xkb::State> {
    let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
    let options = if config.xkb_options.is_empty() {
        None
    } else {
        Some(config.xkb_options.clone())
    };
    let options_for_error = options.clone();

    let keymap = xkb::Keymap::new_from_names(
        &context,
        "", // always use default rules
        &config.xkb_model,
        &config.xkb_layout,
        &config.xkb_variant,
        options,
        xkb::COMPILE_NO_FLAGS,
    )
    .ok_or_else(|| {
        anyhow!(
            "Failed to compile xkb keymap (model={}, layout={}, variant={}, options={:?})",
            config.xkb_model,
            config.xkb_layout,
            config.xkb_variant,
            options_for_error
        )
    })?;

    Ok(xkb::State::new(&keymap))
}

fn active_modifiers(state: &xkb::State) -> Modifiers {
    let mut mods = Modifiers::empty();
    let pairs = [
        (xkb::MOD_NAME_SHIFT, Modifiers::SHIFT),
        (xkb::MOD_NAME_CTRL, Modifiers::CTRL),
        (xkb::MOD_NAME_ALT, Modifiers::ALT),
        (xkb::MOD_NAME_LOGO, Modifiers::SUPER),
        ("Mod3", Modifiers::MOD3),
        ("Mod5", Modifiers::MOD5),
    ];
    for (name, flag) in pairs {
        if state.mod_name_is_active(name, xkb::STATE_MODS_EFFECTIVE) {
            mods |= flag;
        }
    }
    mods
}

fn serialize_mods(state: &xkb::State) -> ModifierState {
    ModifierState {
        depressed: state.serialize_mods(xkb::STATE_MODS_DEPRESSED),
        latched: state.serialize_mods(xkb::STATE_MODS_LATCHED),
        locked: state.serialize_mods(xkb::STATE_MODS_LOCKED),
        group: state.serialize_layout(xkb::STATE_LAYOUT_EFFECTIVE),
    }
}

#[cfg(test)]
impl Keyboard {
    /// Keyboard with no translation state, for routing tests that
    /// supply pre-translated events.
    pub(crate) fn new_for_tests(id: u32) -> Self {
        Self {
            id: KeyboardId(id),
            name: format!("test-keyboard-{id}"),
            pressed: PressedKeys::new(),
            virtual_owner: None,
            group: None,
            repeat_rate: 25,
            repeat_delay: 600,
            mods: ModifierState::default(),
            xkb_state: None,
        }
    }
}
