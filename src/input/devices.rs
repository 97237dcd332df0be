//! Input device management
//!
//! libinput with the path backend reads /dev/input/eventN directly;
//! udev supplies hotplug notifications. Every keyboard-capable device
//! gets its own [`Keyboard`]; virtual keyboards registered on behalf of
//! clients live in the same registry and share the id space.

use anyhow::{anyhow, Context, Result};
use input::event::keyboard::{KeyState as RawKeyState, KeyboardEvent, KeyboardEventTrait, KeyboardKeyEvent};
use input::event::{DeviceEvent, Event, EventTrait};
use input::{AsRaw, Device, DeviceCapability, Libinput, LibinputInterface};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;
#[cfg(target_os = "linux")]
use std::path::PathBuf;

#[cfg(all(target_os = "linux", feature = "seatd"))]
use std::cell::RefCell;
#[cfg(all(target_os = "linux", feature = "seatd"))]
use std::rc::Rc;

use crate::config::KeyboardConfig;
use crate::input::keyboard::{GroupRole, Keyboard};
use crate::input::{KeyEvent, KeyState, KeyboardId};
use crate::seat::{ActiveKeyboard, ClientId};
#[cfg(all(target_os = "linux", feature = "seatd"))]
use crate::session::SeatdSession;
use crate::session::SessionBackend;

/// LibinputInterface implementation for direct device access
struct InputInterface;

impl LibinputInterface for InputInterface {
    fn open_restricted(&mut self, path: &Path, flags: i32) -> std::result::Result<OwnedFd, i32> {
        let f = OpenOptions::new()
            .read(true)
            .write((flags & libc::O_WRONLY != 0) || (flags & libc::O_RDWR != 0))
            .custom_flags(flags & !libc::O_WRONLY & !libc::O_RDWR & !libc::O_RDONLY)
            .open(path)
            .map_err(|e| {
                warn!("Cannot open device: {:?}: {}", path, e);
                e.raw_os_error().unwrap_or(-libc::ENOENT)
            })?;
        Ok(OwnedFd::from(f))
    }

    fn close_restricted(&mut self, fd: OwnedFd) {
        drop(fd);
    }
}

/// LibinputInterface implementation using libseat for device access
#[cfg(all(target_os = "linux", feature = "seatd"))]
struct SeatInputInterface {
    session: Rc<RefCell<SeatdSession>>,
}

#[cfg(all(target_os = "linux", feature = "seatd"))]
impl LibinputInterface for SeatInputInterface {
    fn open_restricted(&mut self, path: &Path, _flags: i32) -> std::result::Result<OwnedFd, i32> {
        let mut session = self.session.borrow_mut();
        match session.open_device(path) {
            Ok(fd) => Ok(fd),
            Err(e) => {
                warn!("libseat: Cannot open device {:?}: {}", path, e);
                Err(-libc::EACCES)
            }
        }
    }

    fn close_restricted(&mut self, fd: OwnedFd) {
        // libseat keeps the original fd; this is our dup
        drop(fd);
    }
}

/// Device node change reported by udev
#[cfg(target_os = "linux")]
#[derive(Debug, Clone)]
pub enum HotplugEvent {
    /// A /dev/input/eventN node appeared
    Added(PathBuf),
    /// A /dev/input/eventN node went away
    Removed(PathBuf),
}

/// udev-based hotplug monitor for input devices
#[cfg(target_os = "linux")]
pub struct HotplugMonitor {
    socket: udev::MonitorSocket,
}

#[cfg(target_os = "linux")]
impl HotplugMonitor {
    /// Create a new hotplug monitor for the input subsystem
    pub fn new() -> Result<Self> {
        let socket = udev::MonitorBuilder::new()
            .context("Failed to create udev monitor builder")?
            .match_subsystem("input")
            .context("Failed to match input subsystem")?
            .listen()
            .context("Failed to start udev monitor")?;

        info!("Input hotplug monitor initialized");
        Ok(Self { socket })
    }

    /// Get the raw file descriptor for polling
    pub fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Drain pending udev events (non-blocking)
    pub fn poll(&mut self) -> Vec<HotplugEvent> {
        let mut events = Vec::new();
        for event in self.socket.iter() {
            let node = match event.devnode() {
                Some(node) => node.to_path_buf(),
                None => continue,
            };
            let is_event_node = node
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("event"))
                .unwrap_or(false);
            if !is_event_node {
                continue;
            }
            if event.action().map(|a| a == "add").unwrap_or(false) {
                debug!("udev: input device added: {}", node.display());
                events.push(HotplugEvent::Added(node));
            } else if event.action().map(|a| a == "remove").unwrap_or(false) {
                debug!("udev: input device removed: {}", node.display());
                events.push(HotplugEvent::Removed(node));
            }
        }
        events
    }
}

/// Change produced by one dispatch pass.
#[derive(Debug)]
pub enum DeviceUpdate {
    /// A translated key transition, ready for routing.
    Key {
        keyboard: KeyboardId,
        event: KeyEvent,
        /// The serialized modifier state changed with this transition.
        mods_changed: bool,
    },
    /// A keyboard came online.
    Added { keyboard: KeyboardId },
    /// A keyboard went away. Its pressed-key state is gone with it.
    Removed { keyboard: KeyboardId },
}

/// Keyboard device registry on top of a libinput path context.
///
/// Hardware devices are keyed by their libinput device handle; the
/// [`KeyboardId`]s handed out here are what the rest of the seat talks
/// about. With `group_devices` enabled, the first hardware keyboard
/// becomes the group representative and later ones translate through
/// its xkb state.
pub struct DeviceManager {
    /// libinput context
    input: Libinput,
    /// libinput raw fd for the poll set
    fd: RawFd,
    keyboards: HashMap<KeyboardId, Keyboard>,
    /// libinput device handle -> keyboard id
    devices: HashMap<usize, KeyboardId>,
    next_id: u32,
    config: KeyboardConfig,
    group_devices: bool,
    #[cfg(target_os = "linux")]
    hotplug: Option<HotplugMonitor>,
}

impl DeviceManager {
    /// Open the libinput context and scan /dev/input.
    ///
    /// Device access goes through libseat when the session backend has
    /// it, so no root is required; otherwise the device nodes are
    /// opened directly.
    pub fn new(config: &KeyboardConfig, session: &SessionBackend) -> Result<Self> {
        let mut input = create_context(session);

        // Scan and add devices from /dev/input/event*
        let mut device_count = 0;
        for entry in
            std::fs::read_dir("/dev/input").map_err(|e| anyhow!("Cannot scan /dev/input: {}", e))?
        {
            let entry = entry?;
            let path = entry.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with("event") {
                let path_str = path.to_str().unwrap_or("");
                if let Some(_device) = input.path_add_device(path_str) {
                    debug!("Input device added: {}", path_str);
                    device_count += 1;
                }
            }
        }

        if device_count == 0 {
            return Err(anyhow!(
                "No input devices found. Check permissions for /dev/input/event*."
            ));
        }

        info!("libinput: {} devices added", device_count);

        let fd = input.as_raw_fd();

        // Set fd to non-blocking
        let flags = nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_GETFL)
            .map_err(|e| anyhow!("F_GETFL failed: {}", e))?;
        let mut flags = nix::fcntl::OFlag::from_bits_truncate(flags);
        flags.insert(nix::fcntl::OFlag::O_NONBLOCK);
        nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_SETFL(flags))
            .map_err(|e| anyhow!("F_SETFL failed: {}", e))?;

        #[cfg(target_os = "linux")]
        let hotplug = match HotplugMonitor::new() {
            Ok(monitor) => Some(monitor),
            Err(e) => {
                warn!("Hotplug monitoring unavailable: {}", e);
                None
            }
        };

        Ok(Self {
            input,
            fd,
            keyboards: HashMap::new(),
            devices: HashMap::new(),
            next_id: 1,
            config: config.clone(),
            group_devices: config.group_devices,
            #[cfg(target_os = "linux")]
            hotplug,
        })
    }

    /// Fd of the libinput context, for the poll set.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Fd of the udev monitor, for the poll set.
    #[cfg(target_os = "linux")]
    pub fn hotplug_fd(&self) -> Option<RawFd> {
        self.hotplug.as_ref().map(|m| m.as_raw_fd())
    }

    pub fn keyboard(&self, id: KeyboardId) -> Option<&Keyboard> {
        self.keyboards.get(&id)
    }

    pub fn keyboard_mut(&mut self, id: KeyboardId) -> Option<&mut Keyboard> {
        self.keyboards.get_mut(&id)
    }

    pub fn keyboard_count(&self) -> usize {
        self.keyboards.len()
    }

    /// Pump libinput and collect device changes and translated keys.
    pub fn dispatch(&mut self) -> Vec<DeviceUpdate> {
        let mut updates = Vec::new();
        if let Err(e) = self.input.dispatch() {
            warn!("libinput dispatch failed: {}", e);
            return updates;
        }
        while let Some(event) = self.input.next() {
            match event {
                Event::Device(DeviceEvent::Added(ev)) => {
                    self.device_added(ev.device(), &mut updates);
                }
                Event::Device(DeviceEvent::Removed(ev)) => {
                    self.device_removed(ev.device(), &mut updates);
                }
                Event::Keyboard(KeyboardEvent::Key(ev)) => {
                    self.device_key(ev, &mut updates);
                }
                _ => {}
            }
        }
        updates
    }

    /// Apply pending udev node changes to the libinput context.
    ///
    /// Only additions act here. A removed node surfaces as a read error
    /// on the device fd, which libinput turns into a device-removed
    /// event on the next dispatch.
    #[cfg(target_os = "linux")]
    pub fn poll_hotplug(&mut self) {
        let events = match self.hotplug.as_mut() {
            Some(monitor) => monitor.poll(),
            None => return,
        };
        for event in events {
            match event {
                HotplugEvent::Added(node) => {
                    let path = node.to_string_lossy();
                    if self.input.path_add_device(&path).is_some() {
                        info!("Hotplugged input device: {}", path);
                    }
                }
                HotplugEvent::Removed(node) => {
                    debug!("Input device node removed: {}", node.display());
                }
            }
        }
    }

    /// Stop reading devices while the session is inactive.
    ///
    /// libinput closes the device fds and reports the devices removed;
    /// the registry empties through the normal removal path.
    pub fn suspend(&mut self) {
        info!("Suspending input devices");
        self.input.suspend();
    }

    /// Reopen devices after the session becomes active again.
    pub fn resume(&mut self) {
        info!("Resuming input devices");
        if self.input.resume().is_err() {
            warn!("libinput resume failed");
        }
    }

    /// Register a virtual keyboard owned by a client.
    ///
    /// Virtual keyboards never join the hardware group; their events
    /// carry the owner so grab exclusion can recognize them.
    pub fn add_virtual(&mut self, name: &str, owner: ClientId) -> KeyboardId {
        let id = KeyboardId(self.next_id);
        self.next_id += 1;
        let keyboard = Keyboard::new_virtual(id, name, owner, &self.config);
        self.keyboards.insert(id, keyboard);
        id
    }

    /// Drop a virtual keyboard, normally because its owner went away.
    pub fn remove_virtual(&mut self, id: KeyboardId) {
        if self.keyboards.remove(&id).is_some() {
            info!("Virtual keyboard {} removed", id);
        }
    }

    /// Translate an injected key transition on a virtual keyboard.
    pub fn inject_key(
        &mut self,
        keyboard: KeyboardId,
        code: u32,
        state: KeyState,
        time_msec: u32,
    ) -> Option<DeviceUpdate> {
        self.translate(keyboard, code, state, time_msec)
    }

    /// Apply a reloaded keyboard config.
    ///
    /// Repeat settings reach attached keyboards immediately; keymap
    /// settings apply to keyboards attached from now on.
    pub fn set_config(&mut self, config: &KeyboardConfig) {
        self.group_devices = config.group_devices;
        self.config = config.clone();
        for kb in self.keyboards.values_mut() {
            kb.apply_repeat(&self.config);
        }
    }

    /// Announcement for the keyboard that should become seat-active
    /// after a removal. Real keyboards win over virtual ones.
    pub fn replacement_announcement(&self) -> Option<ActiveKeyboard> {
        self.keyboards
            .values()
            .filter(|k| !k.is_group_member())
            .min_by_key(|k| (k.is_virtual(), k.id.0))
            .map(|k| k.announcement())
    }

    fn device_added(&mut self, device: Device, updates: &mut Vec<DeviceUpdate>) {
        if !device.has_capability(DeviceCapability::Keyboard) {
            debug!("Ignoring non-keyboard device: {}", device.name());
            return;
        }
        let raw = device.as_raw() as usize;
        if self.devices.contains_key(&raw) {
            return;
        }

        let id = KeyboardId(self.next_id);
        let mut keyboard = match Keyboard::new(id, device.name(), &self.config) {
            Ok(kb) => kb,
            Err(e) => {
                // Fatal to this attach only; other devices stay up
                error!("Keyboard '{}' not attached: {}", device.name(), e);
                return;
            }
        };
        self.next_id += 1;

        if self.group_devices {
            keyboard.group = Some(match self.representative() {
                Some(rep) => GroupRole::Member(rep),
                None => GroupRole::Representative,
            });
        }

        self.devices.insert(raw, id);
        self.keyboards.insert(id, keyboard);
        updates.push(DeviceUpdate::Added { keyboard: id });
    }

    fn device_removed(&mut self, device: Device, updates: &mut Vec<DeviceUpdate>) {
        let raw = device.as_raw() as usize;
        let Some(id) = self.devices.remove(&raw) else {
            return;
        };
        let Some(keyboard) = self.keyboards.remove(&id) else {
            return;
        };
        info!("Keyboard {} removed: {}", id, keyboard.name);

        if matches!(keyboard.group, Some(GroupRole::Representative)) {
            self.promote_representative();
        }
        updates.push(DeviceUpdate::Removed { keyboard: id });
    }

    fn device_key(&mut self, event: KeyboardKeyEvent, updates: &mut Vec<DeviceUpdate>) {
        let raw = event.device().as_raw() as usize;
        let Some(&id) = self.devices.get(&raw) else {
            debug!("Key event from untracked device, ignoring");
            return;
        };
        let state = match event.key_state() {
            RawKeyState::Pressed => KeyState::Pressed,
            RawKeyState::Released => KeyState::Released,
        };
        if let Some(update) = self.translate(id, event.key(), state, event.time()) {
            updates.push(update);
        }
    }

    /// Translate a key transition on the given keyboard.
    ///
    /// Group members translate through their representative, so
    /// modifier state accumulates across the whole group and routing
    /// sees a single logical keyboard.
    fn translate(
        &mut self,
        id: KeyboardId,
        code: u32,
        state: KeyState,
        time_msec: u32,
    ) -> Option<DeviceUpdate> {
        let target = match self.keyboards.get(&id).map(|k| k.group) {
            Some(Some(GroupRole::Member(rep))) => rep,
            Some(_) => id,
            None => return None,
        };
        let keyboard = self.keyboards.get_mut(&target)?;
        let (event, mods_changed) = keyboard.translate_key(code, state, time_msec);
        Some(DeviceUpdate::Key {
            keyboard: keyboard.id,
            event,
            mods_changed,
        })
    }

    fn representative(&self) -> Option<KeyboardId> {
        self.keyboards
            .values()
            .find(|k| matches!(k.group, Some(GroupRole::Representative)))
            .map(|k| k.id)
    }

    /// Hand the representative role to a surviving member.
    ///
    /// The promoted keyboard keeps its own translation state; modifier
    /// state held on the removed representative is gone, which matches
    /// the keys no longer being held anywhere.
    fn promote_representative(&mut self) {
        let new_rep = match self.keyboards.values_mut().find(|k| k.is_group_member()) {
            Some(kb) => {
                kb.group = Some(GroupRole::Representative);
                kb.id
            }
            None => return,
        };
        info!("Keyboard group representative is now {}", new_rep);
        for kb in self.keyboards.values_mut() {
            if kb.id != new_rep && kb.is_group_member() {
                kb.group = Some(GroupRole::Member(new_rep));
            }
        }
    }
}

#[cfg(all(target_os = "linux", feature = "seatd"))]
fn create_context(session: &SessionBackend) -> Libinput {
    match session.seatd_handle() {
        Some(session) => {
            debug!("libinput device access via libseat");
            Libinput::new_from_path(SeatInputInterface { session })
        }
        None => Libinput::new_from_path(InputInterface),
    }
}

#[cfg(not(all(target_os = "linux", feature = "seatd")))]
fn create_context(_session: &SessionBackend) -> Libinput {
    Libinput::new_from_path(InputInterface)
}

#[cfg(test)]
impl DeviceManager {
    fn new_for_tests(group_devices: bool) -> Self {
        Self {
            input: Libinput::new_from_path(InputInterface),
            fd: -1,
            keyboards: HashMap::new(),
            devices: HashMap::new(),
            next_id: 1,
            config: KeyboardConfig {
                group_devices,
                ..KeyboardConfig::default()
            },
            group_devices,
            #[cfg(target_os = "linux")]
            hotplug: None,
        }
    }

    fn insert_for_tests(&mut self, keyboard: Keyboard) {
        self.next_id = self.next_id.max(keyboard.id.0 + 1);
        self.keyboards.insert(keyboard.id, keyboard);
    }
}
