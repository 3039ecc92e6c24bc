#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

// Tracing since it's used project wide for logging
#[macro_use]
extern crate tracing;

use std::error::Error;
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use smithay::reexports::calloop::generic::{Generic, NoIoDrop};
use smithay::reexports::calloop::{EventLoop, Interest, Mode};
use smithay::reexports::wayland_server::Display;

use crate::state::State;

mod backend;
mod cli;
mod config;
mod focus_target;
mod frame_clock;
mod handlers;
mod input;
mod layer;
mod output;
mod output_config;
mod renderer;
mod scene;
mod state;
mod transaction;
mod tree;
mod utils;
mod view;
#[cfg(feature = "xwayland")]
mod xwayland;

fn main() -> Result<(), Box<dyn Error>> {
    // A compositor without a backend is a very quiet compositor.
    #[cfg(all(not(feature = "udev-backend"), not(feature = "winit-backend")))]
    compile_error!("You must enable at least one backend: 'udev-backend' or 'winit-backend'");

    let cli = cli::Cli::parse();

    let directive = match cli.log_level {
        0 => "off",
        1 => "error",
        2 => "error,strata_compositor=info",
        _ => "error,strata_compositor=debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::from_str(directive).unwrap());
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .init();

    // A dead pipe must never take the whole session down.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    info!(
        version = std::env!("CARGO_PKG_VERSION"),
        "Starting strata-compositor."
    );

    let mut event_loop: EventLoop<'static, State> = EventLoop::try_new()?;
    let loop_handle = event_loop.handle();

    let (dh, socket_name) = {
        let display: Display<State> = Display::new()?;
        let dh = display.handle();
        let listening_socket = state::bind_socket()?;
        let socket_name = String::from(listening_socket.socket_name().to_string_lossy());

        loop_handle
            .insert_source(listening_socket, |client_stream, _, state| {
                let ret = state
                    .common
                    .display_handle
                    .insert_client(client_stream, Arc::new(state.new_client_state()));
                if let Err(err) = ret {
                    warn!(?err, "Failed to add wayland client to display");
                }
            })
            .expect("Failed to init the Wayland socket source!");
        info!(?socket_name, "Listening on socket");

        loop_handle
            .insert_source(
                Generic::new(display, Interest::READ, Mode::Level),
                |_, display: &mut NoIoDrop<Display<State>>, state| {
                    // SAFETY: the display is never dropped while inside the source.
                    unsafe {
                        display
                            .get_mut()
                            .dispatch_clients(state)
                            .expect("Failed to dispatch clients!");
                    }
                    Ok(smithay::reexports::calloop::PostAction::Continue)
                },
            )
            .expect("Failed to init the Wayland display source!");

        (dh, socket_name)
    };

    // SIGTERM/SIGINT initiate the same clean shutdown path.
    loop_handle
        .insert_source(
            calloop::signals::Signals::new(&[
                calloop::signals::Signal::SIGTERM,
                calloop::signals::Signal::SIGINT,
            ])?,
            |event, _, state| {
                info!(signal = ?event.signal(), "Shutting down on signal");
                state.common.stop = true;
            },
        )
        .map_err(|err| anyhow::anyhow!("Failed to insert signal source: {err}"))?;

    let mut state = State::new(
        &dh,
        event_loop.handle(),
        event_loop.get_signal(),
        &cli,
        socket_name.clone(),
    )?;

    // SAFETY: single-threaded at this point; nothing reads the environment
    // concurrently.
    unsafe {
        std::env::set_var("WAYLAND_DISPLAY", &socket_name);
        std::env::set_var("XDG_CURRENT_DESKTOP", "strata-compositor");
        std::env::set_var("XDG_SESSION_TYPE", "wayland");
    }

    #[cfg(feature = "xwayland")]
    if cli.xwayland {
        if let Err(err) = xwayland::start(&mut state) {
            error!(?err, "Failed to start XWayland");
        }
    }
    #[cfg(not(feature = "xwayland"))]
    if cli.xwayland {
        warn!("Built without XWayland support; ignoring --xwayland");
    }

    if let Some(command) = &cli.startup_command {
        utils::spawn(command.clone());
    }

    event_loop
        .run(None, &mut state, |state| {
            if state.common.stop {
                state.common.loop_signal.stop();
                state.common.loop_signal.wakeup();
                return;
            }

            state.dispatch().unwrap();
        })
        .expect("Failed to run the event loop!");

    std::mem::drop(event_loop);
    std::mem::drop(state);

    info!("Shutting down! Goodbye~");
    Ok(())
}
