#[derive(Debug, clap::Parser)]
#[command(version, about)]
pub struct Cli {
    /// Enable the XWayland sub-system.
    #[arg(long)]
    pub xwayland: bool,
    /// Log verbosity: 0 = silent, 1 = errors, 2 = info, 3 = debug.
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL", default_value_t = 2)]
    pub log_level: u8,
    /// Command to run through `/bin/sh -c` after startup.
    #[arg(short = 's', value_name = "COMMAND")]
    pub startup_command: Option<String>,
    /// What backend should the compositor start with? Detected when omitted.
    #[arg(short, long, value_name = "BACKEND")]
    pub backend: Option<BackendType>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum BackendType {
    #[cfg(feature = "winit-backend")]
    /// Run inside a winit window (development).
    Winit,
    #[cfg(feature = "udev-backend")]
    /// Run on DRM/KMS through a libseat session.
    Udev,
}
