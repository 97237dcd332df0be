//! Configuration file management
//!
//! Loads TOML configuration files and provides daemon settings.
//! Default config path: ~/.config/keyseat/config.toml

#![allow(dead_code)]

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use xkbcommon::xkb;

use crate::constants::{DEFAULT_REPEAT_DELAY_MS, DEFAULT_REPEAT_RATE};
use crate::input::Modifiers;

#[cfg(target_os = "linux")]
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
#[cfg(target_os = "linux")]
use std::path::Path;
#[cfg(target_os = "linux")]
use std::sync::mpsc;

/// Daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Keyboard settings
    pub keyboard: KeyboardConfig,
    /// Cursor settings
    pub cursor: CursorConfig,
    /// Key mapping entries ([[mapping]] tables)
    pub mapping: Vec<MappingEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keyboard: KeyboardConfig::default(),
            cursor: CursorConfig::default(),
            mapping: Vec::new(),
        }
    }
}

/// Keyboard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyboardConfig {
    /// XKB keyboard model (empty = default)
    pub xkb_model: String,
    /// XKB keyboard layout (e.g., "us", "de", empty = default)
    pub xkb_layout: String,
    /// XKB keyboard variant (empty = default)
    pub xkb_variant: String,
    /// XKB keyboard options (e.g., "ctrl:nocaps", empty = default)
    pub xkb_options: String,
    /// Key repeat rate in repeats per second
    pub repeat_rate: i32,
    /// Key repeat delay in milliseconds
    pub repeat_delay: i32,
    /// Fold all hardware keyboards into one logical group so modifier
    /// state is shared between them
    pub group_devices: bool,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            xkb_model: String::new(),
            xkb_layout: String::new(),
            xkb_variant: String::new(),
            xkb_options: String::new(),
            repeat_rate: DEFAULT_REPEAT_RATE,
            repeat_delay: DEFAULT_REPEAT_DELAY_MS,
            group_devices: false,
        }
    }
}

/// Cursor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    /// Hide the pointer while typing (any non-modifier key press)
    pub hide_when_typing: bool,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            hide_when_typing: true,
        }
    }
}

/// One key mapping as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Key combination, e.g. "super+Return" or "ctrl+alt+BackSpace"
    pub keys: String,
    /// Command to spawn (mutually exclusive with action)
    #[serde(default)]
    pub command: Option<String>,
    /// Built-in action: "vt1".."vt12" or "exit"
    #[serde(default)]
    pub action: Option<String>,
    /// Trigger on key release instead of press
    #[serde(default)]
    pub on_release: bool,
}

/// What a matched mapping does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingAction {
    /// Spawn a command (shell-words splitting, no shell)
    Spawn(String),
    /// Switch to the given virtual terminal
    SwitchVt(u32),
    /// Shut the daemon down
    Exit,
}

/// Mapping entry parse error
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("unknown modifier '{0}'")]
    UnknownModifier(String),
    #[error("unknown keysym '{0}'")]
    UnknownKeysym(String),
    #[error("no key in combination '{0}'")]
    MissingKey(String),
    #[error("mapping '{0}' has neither command nor action")]
    MissingAction(String),
    #[error("mapping '{0}' has both command and action")]
    ConflictingAction(String),
    #[error("unknown action '{0}' (expected vt1..vt12 or exit)")]
    UnknownAction(String),
}

/// A compiled mapping ready for lookup
#[derive(Debug, Clone)]
pub struct Mapping {
    pub mods: Modifiers,
    pub keysym: u32,
    pub on_release: bool,
    pub action: MappingAction,
}

impl Mapping {
    /// Compile one config entry.
    ///
    /// The combination is modifier names joined with '+' and ending in
    /// an XKB keysym name, matched case-insensitively. Letter keysyms
    /// are case-folded so "super+shift+a" matches the shifted A sym.
    pub fn parse(entry: &MappingEntry) -> Result<Self, MappingError> {
        let mut mods = Modifiers::empty();
        let mut keysym = None;

        let parts: Vec<&str> = entry.keys.split('+').map(|p| p.trim()).collect();
        for (i, part) in parts.iter().enumerate() {
            let is_last = i == parts.len() - 1;
            match part.to_lowercase().as_str() {
                "shift" => mods |= Modifiers::SHIFT,
                "ctrl" | "control" => mods |= Modifiers::CTRL,
                "alt" | "mod1" => mods |= Modifiers::ALT,
                "super" | "logo" | "win" | "mod4" => mods |= Modifiers::SUPER,
                "mod3" => mods |= Modifiers::MOD3,
                "mod5" => mods |= Modifiers::MOD5,
                _ if is_last => {
                    let sym = xkb::keysym_from_name(part, xkb::KEYSYM_CASE_INSENSITIVE);
                    if sym.raw() == xkb::keysyms::KEY_NoSymbol {
                        return Err(MappingError::UnknownKeysym(part.to_string()));
                    }
                    keysym = Some(fold_keysym(sym.raw()));
                }
                _ => return Err(MappingError::UnknownModifier(part.to_string())),
            }
        }

        let keysym = keysym.ok_or_else(|| MappingError::MissingKey(entry.keys.clone()))?;

        let action = match (&entry.command, &entry.action) {
            (Some(_), Some(_)) => {
                return Err(MappingError::ConflictingAction(entry.keys.clone()))
            }
            (Some(cmd), None) => MappingAction::Spawn(cmd.clone()),
            (None, Some(name)) => parse_action(name)?,
            (None, None) => return Err(MappingError::MissingAction(entry.keys.clone())),
        };

        Ok(Self {
            mods,
            keysym,
            on_release: entry.on_release,
            action,
        })
    }
}

/// Parse a built-in action name
fn parse_action(name: &str) -> Result<MappingAction, MappingError> {
    let lower = name.to_lowercase();
    if lower == "exit" {
        return Ok(MappingAction::Exit);
    }
    if let Some(n) = lower.strip_prefix("vt") {
        if let Ok(vt) = n.parse::<u32>() {
            if (1..=12).contains(&vt) {
                return Ok(MappingAction::SwitchVt(vt));
            }
        }
    }
    Err(MappingError::UnknownAction(name.to_string()))
}

/// Case-fold letter keysyms (ASCII and Latin-1) to lowercase.
///
/// Shifted letters produce the uppercase sym, but combinations are
/// written lowercase; folding both sides makes the lookup agree.
fn fold_keysym(keysym: u32) -> u32 {
    match keysym {
        0x41..=0x5a => keysym + 0x20,
        0xc0..=0xde if keysym != 0xd7 => keysym + 0x20,
        _ => keysym,
    }
}

/// Compiled mapping table
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    mappings: Vec<Mapping>,
}

impl MappingTable {
    /// Compile entries, skipping invalid ones with a warning.
    ///
    /// A broken entry must not take the whole seat down on reload.
    pub fn new(entries: &[MappingEntry]) -> Self {
        let mut mappings = Vec::with_capacity(entries.len());
        for entry in entries {
            match Mapping::parse(entry) {
                Ok(m) => mappings.push(m),
                Err(e) => warn!("Ignoring mapping '{}': {}", entry.keys, e),
            }
        }
        info!("Compiled {} key mappings", mappings.len());
        Self { mappings }
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Look up the action for a key edge, if any.
    ///
    /// Modifiers compare exactly; lock-type modifiers are not part of
    /// [`Modifiers`], so Caps/Num Lock never prevent a match.
    pub fn lookup(
        &self,
        keysym: u32,
        mods: Modifiers,
        is_release: bool,
    ) -> Option<&MappingAction> {
        let folded = fold_keysym(keysym);
        self.mappings
            .iter()
            .find(|m| m.on_release == is_release && m.mods == mods && m.keysym == folded)
            .map(|m| &m.action)
    }
}

impl Config {
    /// System-wide config path
    const SYSTEM_CONFIG_PATH: &'static str = "/etc/keyseat/config.toml";

    /// Get the path that would be used for loading config
    /// Returns None if using built-in defaults
    pub fn config_path() -> Option<PathBuf> {
        // 1. KEYSEAT_CONFIG environment variable
        if let Ok(path) = std::env::var("KEYSEAT_CONFIG") {
            let p = std::path::Path::new(&path);
            if p.exists() {
                return Some(p.to_path_buf());
            }
        }

        // 2. User config: ~/.config/keyseat/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("keyseat").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }
        }

        // 3. System config: /etc/keyseat/config.toml
        let system_config = std::path::Path::new(Self::SYSTEM_CONFIG_PATH);
        if system_config.exists() {
            return Some(system_config.to_path_buf());
        }

        None
    }

    /// Load configuration with priority:
    /// 1. KEYSEAT_CONFIG environment variable
    /// 2. ~/.config/keyseat/config.toml (user config)
    /// 3. /etc/keyseat/config.toml (system config)
    /// 4. Built-in defaults
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            match Self::load_from_file(path.to_string_lossy().as_ref()) {
                Ok(config) => {
                    info!("Loaded config: {}", path.display());
                    return config;
                }
                Err(e) => {
                    warn!("Failed to load config {}: {}", path.display(), e);
                }
            }
        }
        info!("Using built-in default config");
        Self::default()
    }

    /// Load settings from specified path
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        Ok(config)
    }

    /// Validate all mapping entries, returning every error.
    ///
    /// Loading skips broken entries; this is the strict path behind
    /// --check-config.
    pub fn validate(&self) -> Vec<MappingError> {
        self.mapping
            .iter()
            .filter_map(|entry| Mapping::parse(entry).err())
            .collect()
    }

    /// Write a commented template config to the user config path
    pub fn write_default_config(force: bool) -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Config directory not found"))?;
        let keyseat_dir = config_dir.join("keyseat");
        std::fs::create_dir_all(&keyseat_dir)?;
        let config_path = keyseat_dir.join("config.toml");

        if config_path.exists() && !force {
            anyhow::bail!(
                "{} already exists (use --force to overwrite)",
                config_path.display()
            );
        }

        std::fs::write(&config_path, default_config_template())?;
        Ok(config_path)
    }
}

/// Template written by --init-config
fn default_config_template() -> &'static str {
    r#"# keyseat configuration file
# Config path: ~/.config/keyseat/config.toml
#
# All settings are optional; the commented values below are the
# built-in defaults.

[keyboard]
# xkb_layout = "us"         # XKB keyboard layout (e.g., "us", "de", "jp")
# xkb_variant = ""          # XKB layout variant (e.g., "dvorak", "nodeadkeys")
# xkb_options = ""          # XKB options (e.g., "ctrl:nocaps", "compose:ralt")
# xkb_model = ""            # XKB keyboard model
# repeat_rate = 25          # Key repeats per second
# repeat_delay = 600        # Delay before repeat in milliseconds
# group_devices = false     # Share modifier state across all keyboards

[cursor]
# hide_when_typing = true   # Hide the pointer on any non-modifier press

# =============================================================================
# Key Mappings
# =============================================================================
# Each [[mapping]] binds a key combination to a command or built-in
# action. Combinations are modifier names (shift, ctrl, alt, super,
# mod3, mod5) joined with '+' and ending in an XKB keysym name.
# Built-in actions: "vt1".."vt12" (switch virtual terminal), "exit".
# Ctrl+Alt+F1..F12 always switch VTs; that cannot be unbound.
#
# [[mapping]]
# keys = "super+Return"
# command = "foot"
#
# [[mapping]]
# keys = "super+shift+q"
# action = "exit"
#
# [[mapping]]
# keys = "XF86AudioMute"
# command = "pactl set-sink-mute @DEFAULT_SINK@ toggle"
#
# [[mapping]]
# keys = "super+p"
# command = "grim"
# on_release = true         # Trigger on release instead of press
"#
}

/// Config file change watcher (Linux only)
#[cfg(target_os = "linux")]
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<()>,
}

#[cfg(target_os = "linux")]
impl ConfigWatcher {
    /// Start watching config file
    pub fn new(config_path: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                // Detect Modify, Create, and Rename events
                // (editors often save by writing to temp file then rename)
                use notify::EventKind;
                match event.kind {
                    EventKind::Modify(_) | EventKind::Create(_) => {
                        let _ = tx.send(());
                    }
                    _ => {}
                }
            }
        })?;

        // Watch the parent directory to catch rename operations
        let watch_path = config_path.parent().unwrap_or(config_path);
        watcher.watch(watch_path, RecursiveMode::NonRecursive)?;

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Check if config file was modified (non-blocking)
    pub fn check_reload(&self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

/// Get default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("keyseat").join("config.toml"))
}
