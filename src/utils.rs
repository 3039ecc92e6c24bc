//! Small helpers with no better home.

use std::ffi::OsString;
use std::process::{Command, Stdio};
use std::time::Duration;

use smithay::reexports::rustix;
use smithay::reexports::wayland_server::backend::Credentials;
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::reexports::wayland_server::{DisplayHandle, Resource};

pub fn get_monotonic_time() -> Duration {
    let timespec = rustix::time::clock_gettime(rustix::time::ClockId::Monotonic);
    Duration::new(timespec.tv_sec as u64, timespec.tv_nsec as u32)
}

/// Run a command line through `/bin/sh -c`, detached from our stdio, reaped
/// on a helper thread. Shell evaluation keeps env expansion working.
pub fn spawn(cmdline: impl Into<OsString>) {
    let cmdline = cmdline.into();
    let res = std::thread::Builder::new()
        .name(String::from("command spawner"))
        .spawn(move || {
            let mut process = Command::new("/bin/sh");
            process
                .arg("-c")
                .arg(&cmdline)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            match process.spawn() {
                Ok(mut child) => match child.wait() {
                    Ok(status) if !status.success() => {
                        warn!(?status, ?cmdline, "Child did not exit successfully");
                    }
                    Ok(_) => (),
                    Err(err) => warn!(?err, "Error waiting for child"),
                },
                Err(err) => warn!(?err, ?cmdline, "Failed to spawn command"),
            }
        });

    if let Err(err) = res {
        warn!(?err, "Failed to create command spawner thread");
    }
}

pub fn get_credentials_for_surface(surface: &WlSurface) -> Option<Credentials> {
    let handle = surface.handle().upgrade()?;
    let dh = DisplayHandle::from(handle);
    let client = dh.get_client(surface.id()).ok()?;
    client.get_credentials(&dh).ok()
}
