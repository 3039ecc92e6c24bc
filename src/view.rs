//! The compositor-side façade for a mapped client toplevel.
//!
//! A [`View`] is owned by the leaf [`Container`](crate::tree::Container) that
//! wraps it. All shell-specific behavior goes through the [`Shell`] enum so
//! the tree and transaction code never match on the client type themselves.

use smithay::reexports::wayland_protocols::xdg::shell::server::xdg_toplevel::State as xdg_toplevel_state;
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::utils::{Logical, Rectangle, Serial, Size};
use smithay::wayland::compositor::with_states;
use smithay::wayland::foreign_toplevel_list::ForeignToplevelHandle;
use smithay::wayland::shell::xdg::{ToplevelSurface, XdgToplevelSurfaceData};
#[cfg(feature = "xwayland")]
use smithay::utils::IsAlive;
#[cfg(feature = "xwayland")]
use smithay::xwayland::X11Surface;

use crate::scene::SceneId;

/// Which shell a [`View`] talks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShellKind {
    Xdg,
    #[cfg(feature = "xwayland")]
    XWayland,
}

/// Shell-specific half of a [`View`].
#[derive(Debug)]
pub enum Shell {
    Xdg(ToplevelSurface),
    #[cfg(feature = "xwayland")]
    XWayland(X11Surface),
}

/// Min/max size constraints advertised by the client. Zero means "no limit".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SizeHints {
    pub min_width: i32,
    pub min_height: i32,
    pub max_width: i32,
    pub max_height: i32,
}

#[derive(Debug)]
pub struct View {
    shell: Shell,
    /// Scene tree holding the live surface node (and popups anchor point).
    pub scene_tree: SceneId,
    /// The surface leaf inside [`Self::scene_tree`].
    pub surface_node: SceneId,
    /// Snapshot shown instead of the live surface while a configure is
    /// outstanding, so an un-acked client keeps displaying its last good
    /// frame.
    pub saved_surface_tree: Option<SceneId>,
    /// Size of the client's committed geometry.
    pub geometry: Rectangle<i32, Logical>,
    /// Size the client asked for when mapping, before any layout applied.
    pub natural_size: Size<i32, Logical>,
    pub urgent: bool,
    pub fullscreen_requested: bool,
    /// How long this client may take to render, in milliseconds. Used to
    /// delay its frame callbacks relative to the predicted vblank.
    pub max_render_time: u32,
    pub foreign_handle: Option<ForeignToplevelHandle>,
    /// Serial of the configure sent by the most recent transaction commit.
    pub pending_configure_serial: Option<Serial>,
}

impl View {
    pub fn new(shell: Shell, scene_tree: SceneId, surface_node: SceneId) -> Self {
        Self {
            shell,
            scene_tree,
            surface_node,
            saved_surface_tree: None,
            geometry: Rectangle::default(),
            natural_size: Size::default(),
            urgent: false,
            fullscreen_requested: false,
            max_render_time: 0,
            foreign_handle: None,
            pending_configure_serial: None,
        }
    }

    pub fn kind(&self) -> ShellKind {
        match &self.shell {
            Shell::Xdg(_) => ShellKind::Xdg,
            #[cfg(feature = "xwayland")]
            Shell::XWayland(_) => ShellKind::XWayland,
        }
    }

    pub fn shell(&self) -> &Shell {
        &self.shell
    }

    pub fn wl_surface(&self) -> Option<WlSurface> {
        match &self.shell {
            Shell::Xdg(toplevel) => Some(toplevel.wl_surface().clone()),
            #[cfg(feature = "xwayland")]
            Shell::XWayland(surface) => surface.wl_surface().as_deref().cloned(),
        }
    }

    pub fn alive(&self) -> bool {
        match &self.shell {
            Shell::Xdg(toplevel) => toplevel.alive(),
            #[cfg(feature = "xwayland")]
            Shell::XWayland(surface) => surface.alive(),
        }
    }

    /// Ask the client to take on the given content box.
    ///
    /// Returns the configure serial when the shell has configure serials
    /// (XDG); XWayland is position-aware but serial-less and acks are matched
    /// by geometry instead.
    pub fn configure(&mut self, content: Rectangle<i32, Logical>) -> Option<Serial> {
        match &self.shell {
            Shell::Xdg(toplevel) => {
                toplevel.with_pending_state(|state| {
                    state.size = Some(content.size);
                });
                let serial = toplevel.send_configure();
                self.pending_configure_serial = Some(serial);
                Some(serial)
            }
            #[cfg(feature = "xwayland")]
            Shell::XWayland(surface) => {
                if let Err(err) = surface.configure(Some(content)) {
                    warn!(?err, "Failed to configure X11 surface");
                }
                None
            }
        }
    }

    pub fn close(&self) {
        match &self.shell {
            Shell::Xdg(toplevel) => toplevel.send_close(),
            #[cfg(feature = "xwayland")]
            Shell::XWayland(surface) => {
                let _ = surface.close();
            }
        }
    }

    pub fn set_activated(&self, activated: bool) {
        match &self.shell {
            Shell::Xdg(toplevel) => {
                let changed = toplevel.with_pending_state(|state| {
                    if activated {
                        state.states.set(xdg_toplevel_state::Activated)
                    } else {
                        state.states.unset(xdg_toplevel_state::Activated)
                    }
                });
                if changed {
                    toplevel.send_pending_configure();
                }
            }
            #[cfg(feature = "xwayland")]
            Shell::XWayland(surface) => {
                let _ = surface.set_activated(activated);
            }
        }
    }

    pub fn set_fullscreen(&self, fullscreen: bool) {
        match &self.shell {
            Shell::Xdg(toplevel) => {
                toplevel.with_pending_state(|state| {
                    if fullscreen {
                        state.states.set(xdg_toplevel_state::Fullscreen)
                    } else {
                        state.states.unset(xdg_toplevel_state::Fullscreen)
                    }
                });
            }
            #[cfg(feature = "xwayland")]
            Shell::XWayland(surface) => {
                let _ = surface.set_fullscreen(fullscreen);
            }
        }
    }

    pub fn set_resizing(&self, resizing: bool) {
        match &self.shell {
            Shell::Xdg(toplevel) => {
                toplevel.with_pending_state(|state| {
                    if resizing {
                        state.states.set(xdg_toplevel_state::Resizing)
                    } else {
                        state.states.unset(xdg_toplevel_state::Resizing)
                    }
                });
            }
            #[cfg(feature = "xwayland")]
            Shell::XWayland(_) => (),
        }
    }

    /// Hint the client that it is tiled (disables client-side resize grips
    /// and drop shadows on well-behaved clients).
    pub fn set_tiled(&self, tiled: bool) {
        match &self.shell {
            Shell::Xdg(toplevel) => {
                toplevel.with_pending_state(|state| {
                    for side in [
                        xdg_toplevel_state::TiledLeft,
                        xdg_toplevel_state::TiledRight,
                        xdg_toplevel_state::TiledTop,
                        xdg_toplevel_state::TiledBottom,
                    ] {
                        if tiled {
                            state.states.set(side);
                        } else {
                            state.states.unset(side);
                        }
                    }
                });
            }
            #[cfg(feature = "xwayland")]
            Shell::XWayland(_) => (),
        }
    }

    /// Whether this view wants keyboard focus when mapped.
    pub fn wants_focus(&self) -> bool {
        match &self.shell {
            Shell::Xdg(_) => true,
            #[cfg(feature = "xwayland")]
            Shell::XWayland(surface) => !surface.is_override_redirect(),
        }
    }

    pub fn size_hints(&self) -> SizeHints {
        match &self.shell {
            Shell::Xdg(toplevel) => {
                let state = toplevel.current_state();
                let (min, max) = (state.min_size, state.max_size);
                SizeHints {
                    min_width: min.w,
                    min_height: min.h,
                    max_width: max.w,
                    max_height: max.h,
                }
            }
            #[cfg(feature = "xwayland")]
            Shell::XWayland(surface) => {
                let hints = surface.size_hints().unwrap_or_default();
                SizeHints {
                    min_width: hints.min_size.map_or(0, |s| s.w),
                    min_height: hints.min_size.map_or(0, |s| s.h),
                    max_width: hints.max_size.map_or(0, |s| s.w),
                    max_height: hints.max_size.map_or(0, |s| s.h),
                }
            }
        }
    }

    pub fn title(&self) -> Option<String> {
        match &self.shell {
            Shell::Xdg(toplevel) => with_states(toplevel.wl_surface(), |states| {
                states
                    .data_map
                    .get::<XdgToplevelSurfaceData>()
                    .and_then(|data| data.lock().unwrap().title.clone())
            }),
            #[cfg(feature = "xwayland")]
            Shell::XWayland(surface) => Some(surface.title()),
        }
    }

    pub fn app_id(&self) -> Option<String> {
        match &self.shell {
            Shell::Xdg(toplevel) => with_states(toplevel.wl_surface(), |states| {
                states
                    .data_map
                    .get::<XdgToplevelSurfaceData>()
                    .and_then(|data| data.lock().unwrap().app_id.clone())
            }),
            #[cfg(feature = "xwayland")]
            Shell::XWayland(surface) => Some(surface.class()),
        }
    }
}
