//! keyseat - seat-level keyboard input routing daemon
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                   main loop                      │
//! ├──────────────────────────────────────────────────┤
//! │  devices (libinput + udev)                       │
//! │      │ translated keys                           │
//! │      ▼                                           │
//! │  router: VT hotkey → mapping → IME grab → focus  │
//! │      │                    │                      │
//! │      ▼                    ▼                      │
//! │  session backend      fcitx5 bridge (D-Bus)      │
//! │  (libseat / VT ioctl)                            │
//! └──────────────────────────────────────────────────┘
//! ```

mod config;
mod constants;
mod input;
mod seat;
mod session;

use anyhow::{Context, Result};
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::os::unix::io::{BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

// ============================================================================
// Constants
// ============================================================================

/// Client id of the built-in console sink holding keyboard focus
const CONSOLE_CLIENT: seat::ClientId = seat::ClientId(1);

/// Client id owning the IME grab and its forwarding keyboard
const IME_CLIENT: seat::ClientId = seat::ClientId(2);

// ============================================================================
// Signal Handling
// ============================================================================

/// Global flag for shutdown requested via signal (SIGTERM/SIGINT/SIGHUP)
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check if shutdown was requested (SIGTERM, SIGINT, or SIGHUP)
fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Set up signal handlers for graceful shutdown (call once at startup)
///
/// Handles SIGTERM (systemd stop), SIGINT (Ctrl+C), and SIGHUP (terminal
/// hangup). SIGCHLD is ignored so the kernel reaps finished mapping
/// commands and no zombies accumulate.
fn setup_signal_handlers() {
    unsafe {
        libc::signal(
            libc::SIGTERM,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGINT,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGHUP,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(libc::SIGCHLD, libc::SIG_IGN);
    }
}

extern "C" fn shutdown_signal_handler(_signo: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

// ============================================================================
// CLI
// ============================================================================

fn print_help() {
    println!(
        r#"keyseat {} - seat-level keyboard input routing daemon

USAGE:
    keyseat [OPTIONS]

OPTIONS:
    -h, --help          Print this help message
    -V, --version       Print version information
    --check-config      Validate the config file and exit
    --init-config       Generate a commented default config file
    -f, --force         Overwrite config file without confirmation

EXAMPLES:
    keyseat                     Run the daemon (needs a seat or /dev/input access)
    keyseat --init-config       Generate ~/.config/keyseat/config.toml
    keyseat --check-config      Validate mappings without starting
    RUST_LOG=debug keyseat      Run with routing diagnostics

CONFIG FILE:
    ~/.config/keyseat/config.toml (or /etc/keyseat/config.toml)
"#,
        env!("CARGO_PKG_VERSION")
    );
}

/// Strict mapping validation behind --check-config
fn check_config() -> Result<()> {
    let Some(path) = config::Config::config_path() else {
        println!("No config file found, using built-in defaults");
        return Ok(());
    };
    let cfg = config::Config::load_from_file(path.to_string_lossy().as_ref())?;
    let errors = cfg.validate();
    if errors.is_empty() {
        println!("{}: OK ({} mappings)", path.display(), cfg.mapping.len());
        return Ok(());
    }
    for e in &errors {
        eprintln!("{}: {}", path.display(), e);
    }
    anyhow::bail!("{} invalid mapping(s)", errors.len())
}

// ============================================================================
// Event Loop Helpers
// ============================================================================

fn borrowed(fd: RawFd) -> BorrowedFd<'static> {
    // The descriptors polled here stay open for the whole main loop
    unsafe { BorrowedFd::borrow_raw(fd) }
}

/// Apply one device-layer update to the routing core.
fn route_update(
    router: &mut input::Router,
    devices: &mut input::devices::DeviceManager,
    update: input::devices::DeviceUpdate,
) {
    match update {
        input::devices::DeviceUpdate::Key {
            keyboard,
            event,
            mods_changed,
        } => {
            let Some(kb) = devices.keyboard_mut(keyboard) else {
                return;
            };
            router.handle_key(kb, &event);
            if mods_changed {
                router.handle_modifiers(kb);
            }
        }
        input::devices::DeviceUpdate::Added { keyboard } => {
            if let Some(kb) = devices.keyboard(keyboard) {
                debug!(
                    "Keyboard {} online: {} ({} total)",
                    keyboard,
                    kb.name,
                    devices.keyboard_count()
                );
            }
        }
        input::devices::DeviceUpdate::Removed { keyboard } => {
            let replacement = devices.replacement_announcement();
            router.seat_mut().keyboard_removed(keyboard, replacement);
        }
    }
}

/// Release the IME grab and its forwarding keyboard.
fn teardown_grab(
    router: &mut input::Router,
    devices: &mut input::devices::DeviceManager,
    grab_rx: &mut Option<mpsc::Receiver<input::ime::GrabEvent>>,
    ime_keyboard: &mut Option<input::KeyboardId>,
) {
    router.input_method_mut().clear_grab();
    *grab_rx = None;
    if let Some(id) = ime_keyboard.take() {
        devices.remove_virtual(id);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // Check command line arguments
    let args: Vec<String> = std::env::args().collect();

    // --help
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // --version
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("keyseat {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Config file generation mode
    if args.iter().any(|a| a == "--init-config") {
        let force = args.iter().any(|a| a == "--force" || a == "-f");
        match config::Config::write_default_config(force) {
            Ok(path) => {
                println!("Config file generated: {}", path.display());
                return Ok(());
            }
            Err(e) => {
                eprintln!("Failed to generate config: {}", e);
                return Err(e);
            }
        }
    }

    // Config validation mode
    if args.iter().any(|a| a == "--check-config") {
        return check_config();
    }

    info!("keyseat starting...");

    setup_signal_handlers();

    // Load config file
    let cfg = config::Config::load();

    // Config file change watcher (Linux only)
    #[cfg(target_os = "linux")]
    let config_watcher =
        config::Config::config_path().and_then(|path| config::ConfigWatcher::new(&path).ok());

    // Session management: libseat when available, direct VT access
    // otherwise
    let mut session_backend = session::SessionBackend::open();

    // Input devices
    let mut devices = input::devices::DeviceManager::new(&cfg.keyboard, &session_backend)
        .context("Failed to initialize input devices")?;

    // Routing core. The built-in console client takes keyboard focus;
    // its sink is drained below so routed events are observable with
    // RUST_LOG=trace.
    let (session_tx, session_rx) = mpsc::channel::<session::SessionRequest>();
    let (focus_tx, focus_rx) = mpsc::channel::<seat::ClientEvent>();

    let mut kb_seat = seat::Seat::new();
    kb_seat.set_focus(Some(seat::FocusedClient {
        client: CONSOLE_CLIENT,
        sink: focus_tx,
    }));

    let mut router = input::Router::new(
        kb_seat,
        input::ime::InputMethod::new(),
        config::MappingTable::new(&cfg.mapping),
        session_tx,
        cfg.cursor.hide_when_typing,
    );

    // IME bridge. Optional: the grab is installed once the bridge
    // reports Activated, and routing works normally without fcitx5.
    let ime = match input::ime::ImeClient::try_new() {
        Ok(client) => Some(client),
        Err(e) => {
            info!("IME unavailable ({}), continuing without input method", e);
            None
        }
    };
    let mut grab_rx: Option<mpsc::Receiver<input::ime::GrabEvent>> = None;
    let mut ime_keyboard: Option<input::KeyboardId> = None;
    // Effective modifier mask sent with grabbed keys
    let mut grab_mods: u32 = 0;
    // keysym -> evdev code of the grabbed press, for forward-key
    // re-injection
    let mut forward_codes: HashMap<u32, u32> = HashMap::new();
    let mut last_key_time: u32 = 0;

    #[cfg(all(target_os = "linux", feature = "seatd"))]
    let seatd_fd: Option<RawFd> = match session_backend.seatd_handle() {
        Some(session) => session.borrow_mut().get_fd().ok(),
        None => None,
    };
    #[cfg(not(all(target_os = "linux", feature = "seatd")))]
    let seatd_fd: Option<RawFd> = None;

    // Bring the initially scanned devices online
    for update in devices.dispatch() {
        route_update(&mut router, &mut devices, update);
    }
    info!("keyseat ready: {} keyboards", devices.keyboard_count());

    // Notify systemd that we're ready
    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);

    loop {
        // Wait for device/session traffic. The timeout bounds the
        // latency of channel draining (IME events, config reload).
        let device_fd = borrowed(devices.fd());
        #[cfg(target_os = "linux")]
        let hotplug_fd = devices.hotplug_fd().map(borrowed);
        let session_fd = seatd_fd.map(borrowed);

        let mut fds = Vec::with_capacity(3);
        fds.push(nix::poll::PollFd::new(
            &device_fd,
            nix::poll::PollFlags::POLLIN,
        ));
        #[cfg(target_os = "linux")]
        if let Some(fd) = &hotplug_fd {
            fds.push(nix::poll::PollFd::new(fd, nix::poll::PollFlags::POLLIN));
        }
        if let Some(fd) = &session_fd {
            fds.push(nix::poll::PollFd::new(fd, nix::poll::PollFlags::POLLIN));
        }
        match nix::poll::poll(&mut fds, constants::EVENT_POLL_INTERVAL_MS as i32) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => {}
            Err(e) => warn!("poll failed: {}", e),
        }

        // Session events (VT switched away/back)
        #[cfg(all(target_os = "linux", feature = "seatd"))]
        if let Some(session) = session_backend.seatd_handle() {
            if let Err(e) = session.borrow_mut().dispatch() {
                warn!("libseat dispatch failed: {}", e);
            }
            loop {
                // Taken out of the borrow before acting on it; resume()
                // reopens devices through this same session handle.
                let event = session.borrow().try_recv_event();
                match event {
                    Some(session::SessionEvent::Disable) => {
                        devices.suspend();
                    }
                    Some(session::SessionEvent::Enable) => {
                        devices.resume();
                    }
                    None => break,
                }
            }
        }

        // Check for shutdown signals (SIGTERM/SIGINT/SIGHUP)
        if shutdown_requested() {
            info!("Shutdown signal received, exiting...");
            break;
        }

        // Config hot-reload (Linux only)
        #[cfg(target_os = "linux")]
        if let Some(ref watcher) = config_watcher {
            if watcher.check_reload() {
                info!("Config file change detected, reloading...");
                let new_cfg = config::Config::load();
                router.set_mappings(config::MappingTable::new(&new_cfg.mapping));
                router.set_hide_cursor_when_typing(new_cfg.cursor.hide_when_typing);
                devices.set_config(&new_cfg.keyboard);
                info!("Config reload complete");
            }
        }

        // Device hotplug (udev)
        #[cfg(target_os = "linux")]
        devices.poll_hotplug();

        // Hardware events
        for update in devices.dispatch() {
            route_update(&mut router, &mut devices, update);
        }

        // Grabbed keys -> IME bridge
        let mut bridge_dead = false;
        if let Some(rx) = grab_rx.as_ref() {
            while let Ok(event) = rx.try_recv() {
                match event {
                    input::ime::GrabEvent::Keyboard { keyboard } => {
                        debug!("IME grab now tracks keyboard {}", keyboard);
                    }
                    input::ime::GrabEvent::Key {
                        code,
                        keysym,
                        state,
                        time_msec,
                    } => {
                        last_key_time = time_msec;
                        if state.is_press() {
                            forward_codes.insert(keysym, code);
                        }
                        if let Some(ime_client) = ime.as_ref() {
                            let sent = ime_client.send_key(input::ime::ImeKeyEvent {
                                keysym,
                                keycode: code,
                                state: grab_mods,
                                is_release: state == input::KeyState::Released,
                                time_msec,
                            });
                            if !sent {
                                bridge_dead = true;
                            }
                        }
                    }
                    input::ime::GrabEvent::Modifiers(mods) => {
                        grab_mods = mods.depressed | mods.latched | mods.locked;
                    }
                }
            }
        }
        if bridge_dead {
            warn!("IME bridge is gone, releasing grab");
            teardown_grab(&mut router, &mut devices, &mut grab_rx, &mut ime_keyboard);
        }

        // IME events
        if let Some(ime_client) = ime.as_ref() {
            for event in ime_client.poll_events() {
                match event {
                    input::ime::ImeEvent::Activated => {
                        let (tx, rx) = mpsc::channel();
                        router
                            .input_method_mut()
                            .set_grab(input::ime::KeyboardGrab::new(IME_CLIENT, tx));
                        grab_rx = Some(rx);
                        ime_keyboard = Some(devices.add_virtual("fcitx5-forward", IME_CLIENT));
                    }
                    input::ime::ImeEvent::Deactivated => {
                        teardown_grab(&mut router, &mut devices, &mut grab_rx, &mut ime_keyboard);
                    }
                    input::ime::ImeEvent::Commit(text) => {
                        debug!("IME commit: {:?}", text);
                        router.seat_mut().notify_text(text);
                    }
                    input::ime::ImeEvent::ForwardKey { keysym, is_release } => {
                        // Keys the input method did not consume re-enter
                        // routing through the IME's own virtual keyboard;
                        // grab exclusion sends them on to focus.
                        let Some(keyboard) = ime_keyboard else {
                            continue;
                        };
                        let Some(&code) = forward_codes.get(&keysym) else {
                            debug!("No key code known for forwarded keysym {:#x}", keysym);
                            continue;
                        };
                        let state = if is_release {
                            input::KeyState::Released
                        } else {
                            input::KeyState::Pressed
                        };
                        if let Some(update) =
                            devices.inject_key(keyboard, code, state, last_key_time)
                        {
                            route_update(&mut router, &mut devices, update);
                        }
                    }
                }
            }
        }

        // Console client sink (focused-client events land here)
        while let Ok(event) = focus_rx.try_recv() {
            trace!("client {}: {:?}", CONSOLE_CLIENT, event);
        }

        // Session requests from builtin hotkeys and mappings
        let mut exit_requested = false;
        while let Ok(request) = session_rx.try_recv() {
            match request {
                session::SessionRequest::SwitchVt(vt) => {
                    if let Err(e) = session_backend.switch_vt(vt) {
                        warn!("VT switch to {} failed: {}", vt, e);
                    }
                }
                session::SessionRequest::Exit => {
                    info!("Exit requested by mapping");
                    exit_requested = true;
                }
            }
        }
        if exit_requested {
            break;
        }
    }

    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Stopping]);
    info!("keyseat terminated");
    Ok(())
}
