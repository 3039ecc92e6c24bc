//! The process-wide compositor state.
//!
//! [`State`] pairs the active backend with [`Common`], the record everything
//! else hangs off: the node tree and its scene graph, the transaction
//! engine, the seat, and every Wayland protocol state. All of it lives on
//! the single event loop; no piece is shared across threads.

use std::collections::HashMap;
use std::time::Duration;

use smithay::desktop::utils::send_frames_surface_tree;
use smithay::desktop::PopupManager;
use smithay::input::keyboard::XkbConfig;
use smithay::input::pointer::PointerHandle;
use smithay::output::Output;
use smithay::reexports::calloop::timer::{TimeoutAction, Timer};
use smithay::reexports::calloop::{LoopHandle, LoopSignal, RegistrationToken};
use smithay::reexports::wayland_server::backend::ClientData;
use smithay::reexports::wayland_server::protocol::wl_shm;
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::reexports::wayland_server::{Client, DisplayHandle};
use smithay::utils::{Logical, Rectangle, SERIAL_COUNTER};
use smithay::wayland::compositor::{CompositorClientState, CompositorState};
use smithay::wayland::content_type::ContentTypeState;
use smithay::wayland::cursor_shape::CursorShapeManagerState;
use smithay::wayland::fractional_scale::FractionalScaleManagerState;
use smithay::wayland::foreign_toplevel_list::ForeignToplevelListState;
use smithay::wayland::idle_inhibit::IdleInhibitManagerState;
use smithay::wayland::idle_notify::IdleNotifierState;
use smithay::wayland::input_method::InputMethodManagerState;
use smithay::wayland::keyboard_shortcuts_inhibit::KeyboardShortcutsInhibitState;
use smithay::wayland::output::OutputManagerState;
use smithay::wayland::pointer_constraints::{with_pointer_constraint, PointerConstraintsState};
use smithay::wayland::pointer_gestures::PointerGesturesState;
use smithay::wayland::presentation::PresentationState;
use smithay::wayland::relative_pointer::RelativePointerManagerState;
use smithay::wayland::security_context::{SecurityContext, SecurityContextState};
use smithay::wayland::selection::data_device::DataDeviceState;
use smithay::wayland::selection::primary_selection::PrimarySelectionState;
use smithay::reexports::wayland_protocols_misc::server_decoration::server::org_kde_kwin_server_decoration;
use smithay::wayland::selection::wlr_data_control::DataControlState;
use smithay::wayland::session_lock::SessionLockManagerState;
use smithay::wayland::shell::kde::decoration::KdeDecorationState;
use smithay::wayland::shell::wlr_layer::WlrLayerShellState;
use smithay::wayland::shell::xdg::decoration::XdgDecorationState;
use smithay::wayland::shell::xdg::{ToplevelSurface, XdgShellState};
use smithay::wayland::shm::ShmState;
use smithay::wayland::single_pixel_buffer::SinglePixelBufferState;
use smithay::wayland::socket::ListeningSocketSource;
use smithay::wayland::tablet_manager::TabletManagerState;
use smithay::wayland::text_input::TextInputManagerState;
use smithay::wayland::viewporter::ViewporterState;
use smithay::wayland::virtual_keyboard::VirtualKeyboardManagerState;
use smithay::wayland::xdg_activation::XdgActivationState;
use smithay::wayland::xdg_foreign::XdgForeignState;

use crate::backend::Backend;
use crate::config::Config;
use crate::focus_target::KeyboardFocusTarget;
use crate::input::cursor::Cursor;
use crate::input::seat::{self, Seat};
use crate::input::seatop;
use crate::output::OutputState;
use crate::scene::SceneId;
use crate::transaction::{TimerOp, Transactions, TxnEffects};
use crate::tree::{container, workspace, NodeId, NodeKind, Tree};
use crate::utils::get_monotonic_time;

pub struct State {
    pub backend: Backend,
    pub common: Common,
}

/// A toplevel that exists but has not committed its first buffer yet.
#[derive(Debug)]
pub struct UnmappedView {
    pub toplevel: ToplevelSurface,
    pub initial_configure_sent: bool,
}

/// Where the compositor is in the session-lock lifecycle.
#[derive(Debug, Default)]
pub enum LockState {
    #[default]
    Unlocked,
    Locked {
        /// The lock client died without unlocking. The takeover persists
        /// (backdrops turn red) until another client replaces it.
        abandoned: bool,
    },
}

pub struct Common {
    pub display_handle: DisplayHandle,
    pub loop_handle: LoopHandle<'static, State>,
    pub loop_signal: LoopSignal,
    pub stop: bool,
    pub socket_name: String,
    pub config: Config,

    pub tree: Tree,
    pub transactions: Transactions,
    txn_timer_token: Option<RegistrationToken>,
    pub cursor: Cursor,
    pub seat: Seat,
    pub seat_state: smithay::input::SeatState<State>,
    pub popups: PopupManager,

    pub unmapped_views: Vec<UnmappedView>,
    pub output_state: HashMap<Output, OutputState>,
    pub lock_state: LockState,
    pub idle_inhibiting_surfaces: Vec<WlSurface>,
    pub is_inhibiting_idle: bool,
    /// Drag icon surface and its scene node under the seat layer.
    pub dnd_icon: Option<(WlSurface, SceneId)>,

    #[cfg(feature = "xwayland")]
    pub xwm: Option<smithay::xwayland::X11Wm>,
    /// X11 windows mapped but waiting for their wl_surface association.
    #[cfg(feature = "xwayland")]
    pub unmapped_x11: Vec<smithay::xwayland::X11Surface>,
    /// Override-redirect windows and their scene leaves.
    #[cfg(feature = "xwayland")]
    pub unmanaged_x11: Vec<(smithay::xwayland::X11Surface, SceneId)>,

    pub compositor_state: CompositorState,
    pub data_control_state: DataControlState,
    pub data_device_state: DataDeviceState,
    pub dmabuf_state: smithay::wayland::dmabuf::DmabufState,
    pub gamma_control_state: crate::handlers::gamma_control::GammaControlState,
    pub foreign_toplevel_list_state: ForeignToplevelListState,
    pub idle_notifier_state: IdleNotifierState<State>,
    pub keyboard_shortcuts_inhibit_state: KeyboardShortcutsInhibitState,
    pub kde_decoration_state: KdeDecorationState,
    pub layer_shell_state: WlrLayerShellState,
    pub primary_selection_state: PrimarySelectionState,
    pub session_lock_manager_state: SessionLockManagerState,
    pub shm_state: ShmState,
    pub xdg_activation_state: XdgActivationState,
    pub xdg_decoration_state: XdgDecorationState,
    pub xdg_foreign_state: XdgForeignState,
    pub xdg_shell_state: XdgShellState,
}

/// The privileged-protocol gate: clients carrying a security context never
/// see the privileged globals.
fn client_is_unrestricted(client: &Client) -> bool {
    client
        .get_data::<ClientState>()
        .is_none_or(|data| data.security_context.is_none())
}

impl Common {
    pub fn new(
        dh: &DisplayHandle,
        loop_handle: LoopHandle<'static, State>,
        loop_signal: LoopSignal,
        config: Config,
        socket_name: String,
    ) -> Self {
        let compositor_state = CompositorState::new_v6::<State>(dh);
        let primary_selection_state = PrimarySelectionState::new::<State>(dh);
        let data_control_state = DataControlState::new::<State, _>(
            dh,
            Some(&primary_selection_state),
            client_is_unrestricted,
        );
        let data_device_state = DataDeviceState::new::<State>(dh);
        let idle_notifier_state = IdleNotifierState::new(dh, loop_handle.clone());
        let foreign_toplevel_list_state = ForeignToplevelListState::new::<State>(dh);
        let layer_shell_state =
            WlrLayerShellState::new_with_filter::<State, _>(dh, client_is_unrestricted);
        let shm_state =
            ShmState::new::<State>(dh, vec![wl_shm::Format::Xbgr8888, wl_shm::Format::Abgr8888]);
        let session_lock_manager_state =
            SessionLockManagerState::new::<State, _>(dh, client_is_unrestricted);
        let xdg_activation_state = XdgActivationState::new::<State>(dh);
        let xdg_shell_state = XdgShellState::new::<State>(dh);
        let xdg_foreign_state = XdgForeignState::new::<State>(dh);
        let xdg_decoration_state = XdgDecorationState::new::<State>(dh);
        let kde_decoration_state = KdeDecorationState::new::<State>(
            dh,
            org_kde_kwin_server_decoration::Mode::Server,
        );
        let keyboard_shortcuts_inhibit_state = KeyboardShortcutsInhibitState::new::<State>(dh);
        ContentTypeState::new::<State>(dh);
        CursorShapeManagerState::new::<State>(dh);
        TextInputManagerState::new::<State>(dh);
        InputMethodManagerState::new::<State, _>(dh, client_is_unrestricted);
        IdleInhibitManagerState::new::<State>(dh);
        VirtualKeyboardManagerState::new::<State, _>(dh, client_is_unrestricted);
        PointerConstraintsState::new::<State>(dh);
        PointerGesturesState::new::<State>(dh);
        TabletManagerState::new::<State>(dh);
        SecurityContextState::new::<State, _>(dh, client_is_unrestricted);
        FractionalScaleManagerState::new::<State>(dh);
        OutputManagerState::new_with_xdg_output::<State>(dh);
        PresentationState::new::<State>(dh, libc::CLOCK_MONOTONIC as u32);
        ViewporterState::new::<State>(dh);
        SinglePixelBufferState::new::<State>(dh);
        RelativePointerManagerState::new::<State>(dh);

        let gamma_control_state = crate::handlers::gamma_control::GammaControlState::new(dh);

        let mut seat_state = smithay::input::SeatState::new();
        let mut smithay_seat = seat_state.new_wl_seat(dh, "seat0");
        // Attach a keyboard and pointer right away; clients that find
        // neither will create chaos trying to bootstrap them.
        if let Err(err) = smithay_seat.add_keyboard(XkbConfig::default(), 600, 25) {
            error!(?err, "Failed to add keyboard to seat");
        }
        smithay_seat.add_pointer();

        let mut tree = Tree::new();
        let seat = Seat::new(smithay_seat, &mut tree);
        let transactions = Transactions::new(config.txn_timeout_ms);

        Self {
            display_handle: dh.clone(),
            loop_handle,
            loop_signal,
            stop: false,
            socket_name,
            config,

            tree,
            transactions,
            txn_timer_token: None,
            cursor: Cursor::default(),
            seat,
            seat_state,
            popups: PopupManager::default(),

            unmapped_views: Vec::new(),
            output_state: HashMap::new(),
            lock_state: LockState::Unlocked,
            idle_inhibiting_surfaces: Vec::new(),
            is_inhibiting_idle: false,
            dnd_icon: None,
            #[cfg(feature = "xwayland")]
            xwm: None,
            #[cfg(feature = "xwayland")]
            unmapped_x11: Vec::new(),
            #[cfg(feature = "xwayland")]
            unmanaged_x11: Vec::new(),

            compositor_state,
            data_control_state,
            data_device_state,
            dmabuf_state: smithay::wayland::dmabuf::DmabufState::new(),
            gamma_control_state,
            foreign_toplevel_list_state,
            idle_notifier_state,
            keyboard_shortcuts_inhibit_state,
            kde_decoration_state,
            layer_shell_state,
            primary_selection_state,
            session_lock_manager_state,
            shm_state,
            xdg_activation_state,
            xdg_decoration_state,
            xdg_foreign_state,
            xdg_shell_state,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.lock_state, LockState::Locked { .. })
    }

    /// The tree node for a smithay output.
    pub fn output_node(&self, output: &Output) -> Option<NodeId> {
        self.tree
            .root_node()
            .all_outputs
            .iter()
            .copied()
            .chain(self.tree.root_node().fallback_output)
            .find(|&id| &self.tree.output(id).output == output)
    }

    /// Find the view container owning this toplevel wl_surface.
    pub fn container_for_surface(&self, surface: &WlSurface) -> Option<NodeId> {
        self.tree.node_ids().find(|&id| {
            self.tree
                .try_container(id)
                .and_then(|c| c.view.as_ref())
                .and_then(|v| v.wl_surface())
                .is_some_and(|s| &s == surface)
        })
    }
}

impl State {
    /// Commit all dirty nodes as a compositor-initiated change.
    pub fn commit_dirty(&mut self) {
        let mut effects = TxnEffects::default();
        self.common
            .transactions
            .commit_dirty(&mut self.common.tree, &mut effects);
        self.process_txn_effects(effects);
    }

    /// Commit all dirty nodes as a client-initiated change.
    pub fn commit_dirty_client(&mut self) {
        let mut effects = TxnEffects::default();
        self.common
            .transactions
            .commit_dirty_client(&mut self.common.tree, &mut effects);
        self.process_txn_effects(effects);
    }

    /// The transaction ack window expired.
    pub fn transaction_timeout(&mut self) {
        let mut effects = TxnEffects::default();
        self.common
            .transactions
            .handle_timeout(&mut self.common.tree, &mut effects);
        self.process_txn_effects(effects);
    }

    /// An ack arrived for a view container; route it into the engine.
    pub fn transaction_ack_serial(&mut self, node: NodeId, serial: smithay::utils::Serial) {
        let mut effects = TxnEffects::default();
        self.common.transactions.notify_view_ready_by_serial(
            &mut self.common.tree,
            node,
            serial,
            &mut effects,
        );
        self.process_txn_effects(effects);
    }

    /// Geometry-based ack for serial-less shells.
    #[cfg(feature = "xwayland")]
    pub fn transaction_ack_geometry(&mut self, node: NodeId, geometry: Rectangle<i32, Logical>) {
        let mut effects = TxnEffects::default();
        self.common.transactions.notify_view_ready_by_geometry(
            &mut self.common.tree,
            node,
            f64::from(geometry.loc.x),
            f64::from(geometry.loc.y),
            geometry.size.w,
            geometry.size.h,
            &mut effects,
        );
        self.process_txn_effects(effects);
    }

    fn process_txn_effects(&mut self, effects: TxnEffects) {
        match effects.timer {
            Some(TimerOp::Arm(timeout)) => {
                if let Some(token) = self.common.txn_timer_token.take() {
                    self.common.loop_handle.remove(token);
                }
                let res = self.common.loop_handle.insert_source(
                    Timer::from_duration(timeout),
                    |_, _, state| {
                        state.common.txn_timer_token = None;
                        state.transaction_timeout();
                        TimeoutAction::Drop
                    },
                );
                match res {
                    Ok(token) => self.common.txn_timer_token = Some(token),
                    Err(err) => {
                        // No timer means no deadline; force the apply now
                        // rather than hanging the queue forever.
                        error!(?err, "Unable to create transaction timer");
                        self.transaction_timeout();
                    }
                }
            }
            Some(TimerOp::Disarm) => {
                if let Some(token) = self.common.txn_timer_token.take() {
                    self.common.loop_handle.remove(token);
                }
            }
            None => {}
        }

        for node in &effects.freed {
            self.common.seat.purge_node(*node);
            self.common.cursor.purge_node(*node);
            seatop::unref(self, *node);
        }

        for node in effects.configured {
            self.send_frame_done_to_view(node);
        }

        if effects.applied > 0 {
            seatop::rebase(self, 0);
            self.refresh_idle_inhibit();
            self.queue_redraw_all();
        }
    }

    fn send_frame_done_to_view(&mut self, node: NodeId) {
        if !self.common.tree.exists(node) {
            return;
        }
        let Some(surface) = self
            .common
            .tree
            .try_container(node)
            .and_then(|c| c.view.as_ref())
            .and_then(|v| v.wl_surface())
        else {
            return;
        };
        let Some(output_id) = self.common.tree.output_of(node) else {
            return;
        };
        let output = self.common.tree.output(output_id).output.clone();
        let time = get_monotonic_time();
        send_frames_surface_tree(&surface, &output, time, Some(Duration::ZERO), |_, _| None);
    }

    // {{{ Focus

    /// The full focus operation: reorder the stack, deactivate the old
    /// view, activate the new one, and move keyboard focus — unless an
    /// exclusive layer surface or the session lock overrides it. Moving the
    /// keyboard carries the rest of the seat along through the focus-changed
    /// hook: selections and text-input (and through it the input method)
    /// follow the new surface.
    pub fn set_focus(&mut self, node: Option<NodeId>) {
        if self.common.is_locked() {
            return;
        }
        let Some(node) = node else {
            self.common.seat.has_keyboard_focus = false;
            if let Some(keyboard) = self.common.seat.smithay.get_keyboard() {
                keyboard.set_focus(self, None, SERIAL_COUNTER.next_serial());
            }
            return;
        };
        if !self.common.tree.exists(node) {
            return;
        }

        let change = seat::prepare_focus(
            &mut self.common.tree,
            &mut self.common.seat.focus_stack,
            node,
        );
        if !change.changed {
            return;
        }

        if let Some(previous) = change.unfocused {
            if self.common.tree.exists(previous) {
                if let Some(view) = &self.common.tree.container(previous).view {
                    view.set_activated(false);
                    if let Some(surface) = view.wl_surface() {
                        self.deactivate_pointer_constraint_on(&surface);
                    }
                }
            }
        }

        let mut keyboard_target = None;
        if let Some(focused) = change.focused {
            let container = self.common.tree.container(focused);
            let view = container.view.as_ref().expect("focused is a view");
            view.set_activated(true);
            keyboard_target = view.wl_surface().map(KeyboardFocusTarget::View);
        }

        // Layer override: an exclusive layer keeps the keyboard; the stack
        // still re-ordered above so focus-inactive resolution stays right.
        if self.common.seat.focused_layer.is_some() {
            return;
        }

        self.common.seat.has_keyboard_focus = keyboard_target.is_some();
        if let Some(keyboard) = self.common.seat.smithay.get_keyboard() {
            keyboard.set_focus(self, keyboard_target, SERIAL_COUNTER.next_serial());
        }
        self.activate_pointer_constraint();
    }

    /// Give or take layer-surface keyboard focus. Dropping it returns the
    /// keyboard to the top of the focus stack.
    pub fn set_focus_layer(&mut self, layer: Option<smithay::desktop::LayerSurface>) {
        match layer {
            Some(layer) => {
                let target = KeyboardFocusTarget::from(layer.clone());
                self.common.seat.focused_layer = Some(layer);
                if let Some(keyboard) = self.common.seat.smithay.get_keyboard() {
                    keyboard.set_focus(self, Some(target), SERIAL_COUNTER.next_serial());
                }
            }
            None => {
                self.common.seat.focused_layer = None;
                self.refocus_from_stack();
            }
        }
    }

    /// Re-assert keyboard focus from the focus stack head.
    pub fn refocus_from_stack(&mut self) {
        if self.common.is_locked() {
            return;
        }
        if let Some(layer) = self.common.seat.focused_layer.clone() {
            let target = KeyboardFocusTarget::from(layer);
            if let Some(keyboard) = self.common.seat.smithay.get_keyboard() {
                keyboard.set_focus(self, Some(target), SERIAL_COUNTER.next_serial());
            }
            return;
        }
        let target = self
            .common
            .seat
            .focus_stack
            .head()
            .filter(|&n| self.common.tree.exists(n) && self.common.tree.get(n).is_view())
            .and_then(|n| {
                self.common
                    .tree
                    .container(n)
                    .view
                    .as_ref()
                    .and_then(|v| v.wl_surface())
            })
            .map(KeyboardFocusTarget::View);
        self.common.seat.has_keyboard_focus = target.is_some();
        if let Some(keyboard) = self.common.seat.smithay.get_keyboard() {
            keyboard.set_focus(self, target, SERIAL_COUNTER.next_serial());
        }
    }

    fn deactivate_pointer_constraint_on(&mut self, surface: &WlSurface) {
        let pointer = self.pointer();
        let mut warp_to = None;
        with_pointer_constraint(surface, &pointer, |constraint| {
            if let Some(constraint) = constraint {
                if constraint.is_active() {
                    if let smithay::wayland::pointer_constraints::PointerConstraint::Locked(
                        locked,
                    ) = &*constraint
                    {
                        warp_to = locked.cursor_position_hint();
                    }
                    constraint.deactivate();
                }
            }
        });
        // Put the cursor where the client thinks it left it.
        if let Some(hint) = warp_to {
            if let Some(node) = self.common.container_for_surface(surface) {
                let content = self.common.tree.container(node).current.content_box();
                self.common.cursor.location = content.loc.to_f64() + hint;
            }
        }
    }

    // }}}

    // {{{ Small plumbing

    pub fn pointer(&self) -> PointerHandle<State> {
        self.common
            .seat
            .smithay
            .get_pointer()
            .expect("seat always has a pointer")
    }

    pub fn clear_pointer_focus(&mut self) {
        let pointer = self.pointer();
        pointer.motion(
            self,
            None,
            &smithay::input::pointer::MotionEvent {
                location: self.common.cursor.location,
                serial: SERIAL_COUNTER.next_serial(),
                time: 0,
            },
        );
        pointer.frame(self);
    }

    pub fn notify_activity(&mut self) {
        let seat = self.common.seat.smithay.clone();
        self.common.idle_notifier_state.notify_activity(&seat);
    }

    /// Geometry of the output under the cursor, or the first output.
    pub fn active_output_geometry(&self) -> Rectangle<i32, Logical> {
        let tree = &self.common.tree;
        crate::tree::root::output_at(tree, self.common.cursor.location)
            .or_else(|| tree.root_node().outputs.first().copied())
            .or(tree.root_node().fallback_output)
            .map(|id| tree.output(id).geometry())
            .unwrap_or_default()
    }

    pub fn queue_redraw_all(&mut self) {
        let outputs: Vec<Output> = self
            .common
            .tree
            .root_node()
            .outputs
            .iter()
            .map(|&id| self.common.tree.output(id).output.clone())
            .collect();
        for output in outputs {
            self.queue_redraw(&output);
        }
    }

    pub fn queue_redraw(&mut self, output: &Output) {
        if let Some(state) = self.common.output_state.get_mut(output) {
            state.redraw_state.queue();
        }
    }

    /// Re-scan idle inhibitors: a visible inhibiting surface blocks idle.
    pub fn refresh_idle_inhibit(&mut self) {
        self.common
            .idle_inhibiting_surfaces
            .retain(smithay::utils::IsAlive::alive);
        let tree = &self.common.tree;
        let inhibited = self.common.idle_inhibiting_surfaces.iter().any(|surface| {
            self.common
                .container_for_surface(surface)
                .is_some_and(|node| {
                    tree.scene.is_visible(tree.container(node).scene_tree)
                })
        });
        if inhibited != self.common.is_inhibiting_idle {
            self.common.is_inhibiting_idle = inhibited;
            self.common.idle_notifier_state.set_is_inhibited(inhibited);
        }
    }

    // }}}

    // {{{ View mapping

    /// Map a freshly committed view into the tree: wrap it in a container
    /// on the focused workspace, focus it if it wants focus, and commit.
    pub fn map_view(&mut self, view: crate::view::View) {
        let wants_focus = view.wants_focus();
        let tree = &mut self.common.tree;
        let node = container::create_for_view(tree, view);

        let ws = self
            .common
            .seat
            .focus_stack
            .focused_workspace(&self.common.tree)
            .or_else(|| {
                let tree = &self.common.tree;
                tree.root_node()
                    .outputs
                    .first()
                    .and_then(|&o| tree.output(o).workspace_manager.pending.active)
            })
            .or_else(|| {
                let tree = &self.common.tree;
                tree.root_node()
                    .fallback_output
                    .and_then(|o| tree.output(o).workspace_manager.pending.active)
            });
        let Some(ws) = ws else {
            warn!("No workspace to map a view onto");
            container::begin_destroy(&mut self.common.tree, node);
            self.commit_dirty();
            return;
        };

        workspace::add_tiling(&mut self.common.tree, ws, node);
        container::update_title(&mut self.common.tree, node);
        crate::tree::arrange::arrange_root(&mut self.common.tree, &self.common.config);
        if wants_focus && !self.common.is_locked() {
            self.set_focus(Some(node));
        }
        self.commit_dirty();
    }

    /// A view's toplevel went away: tear the container down and move focus
    /// to whatever was focused before it.
    pub fn unmap_view(&mut self, node: NodeId) {
        let was_focused = self.common.seat.focus_stack.head() == Some(node);
        if let Some(handle) = self
            .common
            .tree
            .container(node)
            .view
            .as_ref()
            .and_then(|view| view.foreign_handle.clone())
        {
            handle.send_closed();
        }
        seatop::unref(self, node);
        container::begin_destroy(&mut self.common.tree, node);
        self.common.seat.focus_stack.remove(node);

        if was_focused {
            let next = self.common.seat.focus_stack.iter().find(|&n| {
                self.common.tree.exists(n)
                    && matches!(
                        self.common.tree.get(n).kind(),
                        NodeKind::Container | NodeKind::Workspace
                    )
            });
            self.set_focus(next);
        }

        // The workspace may have emptied out.
        let stacks: Vec<NodeId> = self.common.seat.focus_stack.iter().collect();
        let workspaces: Vec<NodeId> = self
            .common
            .tree
            .node_ids()
            .filter(|&id| self.common.tree.try_workspace(id).is_some())
            .collect();
        for ws in workspaces {
            let referenced = stacks.contains(&ws);
            workspace::consider_destroy(&mut self.common.tree, ws, referenced);
        }

        crate::tree::arrange::arrange_root(&mut self.common.tree, &self.common.config);
        self.commit_dirty();
    }

    // }}}

    pub fn new_client_state(&self) -> ClientState {
        ClientState {
            compositor_state: CompositorClientState::default(),
            security_context: None,
        }
    }

    /// Periodic cleanup of client-side state that can die between events.
    pub fn refresh(&mut self) {
        self.common.unmapped_views.retain(|u| u.toplevel.alive());
        self.common.popups.cleanup();
    }
}

impl State {
    pub fn new(
        dh: &DisplayHandle,
        loop_handle: LoopHandle<'static, State>,
        loop_signal: LoopSignal,
        cli: &crate::cli::Cli,
        socket_name: String,
    ) -> anyhow::Result<Self> {
        let config = Config::default();
        let mut common = Common::new(dh, loop_handle, loop_signal, config, socket_name);

        let backend_type = cli.backend.unwrap_or({
            // Nested in another session: winit. On a TTY: udev.
            #[cfg(feature = "winit-backend")]
            {
                if std::env::var_os("WAYLAND_DISPLAY").is_some()
                    || std::env::var_os("DISPLAY").is_some()
                {
                    crate::cli::BackendType::Winit
                } else {
                    #[cfg(feature = "udev-backend")]
                    {
                        crate::cli::BackendType::Udev
                    }
                    #[cfg(not(feature = "udev-backend"))]
                    {
                        crate::cli::BackendType::Winit
                    }
                }
            }
            #[cfg(all(not(feature = "winit-backend"), feature = "udev-backend"))]
            {
                crate::cli::BackendType::Udev
            }
        });

        let backend = match backend_type {
            #[cfg(feature = "winit-backend")]
            crate::cli::BackendType::Winit => {
                crate::backend::Backend::from(crate::backend::winit::WinitData::new(&mut common)?)
            }
            #[cfg(feature = "udev-backend")]
            crate::cli::BackendType::Udev => {
                crate::backend::Backend::from(crate::backend::udev::UdevData::new(&mut common)?)
            }
        };

        let mut state = Self { backend, common };

        // The winit output exists before State does; adopt it into the tree.
        #[cfg(feature = "winit-backend")]
        if let crate::backend::Backend::Winit(data) = &state.backend {
            let output = data.output().clone();
            if state.common.output_node(&output).is_none() {
                let node = crate::tree::output::create(&mut state.common.tree, output);
                crate::tree::output::enable(&mut state.common.tree, node, &state.common.config);
            }
        }

        state.reconfigure_outputs();
        crate::tree::arrange::arrange_root(&mut state.common.tree, &state.common.config);
        state.commit_dirty();

        Ok(state)
    }

    /// One event-loop turn of housekeeping: client cleanup, lock watch,
    /// queued redraws, display flush.
    pub fn dispatch(&mut self) -> anyhow::Result<()> {
        self.refresh();
        self.check_lock_abandoned();

        let queued: Vec<Output> = self
            .common
            .output_state
            .iter()
            .filter(|(_, state)| {
                matches!(state.redraw_state, crate::output::RedrawState::Queued)
            })
            .map(|(output, _)| output.clone())
            .collect();
        for output in queued {
            match self.backend.render(&mut self.common, &output) {
                Ok(true) => {
                    // Frame queued; the vblank (or the winit present) drives
                    // frame events from here.
                    #[cfg(feature = "winit-backend")]
                    if matches!(self.backend, crate::backend::Backend::Winit(_)) {
                        self.send_frames(&output);
                    }
                }
                Ok(false) => {
                    // No damage: nothing was submitted, so no vblank will
                    // arrive. A timer stands in at the estimated refresh so
                    // clients still get their frame events.
                    self.queue_estimated_vblank_timer(&output);
                }
                Err(err) => {
                    debug!(?err, output = %output.name(), "Failed to render output");
                    if let Some(state) = self.common.output_state.get_mut(&output) {
                        state.redraw_state = crate::output::RedrawState::Idle;
                    }
                }
            }
        }

        self.common.display_handle.flush_clients()?;
        Ok(())
    }

    fn queue_estimated_vblank_timer(&mut self, output: &Output) {
        let Some(output_state) = self.common.output_state.get_mut(output) else {
            return;
        };
        match std::mem::take(&mut output_state.redraw_state) {
            crate::output::RedrawState::Idle
            | crate::output::RedrawState::Queued => {}
            value @ crate::output::RedrawState::WaitingForEstimatedVblankTimer { .. } => {
                output_state.redraw_state = value;
                return;
            }
            crate::output::RedrawState::WaitingForVblank { .. } => return,
        }

        let duration = output_state.frame_clock.time_until_refresh();
        let timer_output = output.clone();
        let token = self
            .common
            .loop_handle
            .insert_source(Timer::from_duration(duration), move |_, _, state| {
                if let Some(output_state) = state.common.output_state.get_mut(&timer_output) {
                    let queued = matches!(
                        std::mem::take(&mut output_state.redraw_state),
                        crate::output::RedrawState::WaitingForEstimatedVblankTimer {
                            queued: true,
                            ..
                        }
                    );
                    output_state.current_frame_sequence =
                        output_state.current_frame_sequence.wrapping_add(1);
                    if queued {
                        output_state.redraw_state.queue();
                    }
                }
                state.send_frames(&timer_output);
                TimeoutAction::Drop
            });
        match token {
            Ok(token) => {
                if let Some(output_state) = self.common.output_state.get_mut(output) {
                    output_state.redraw_state =
                        crate::output::RedrawState::WaitingForEstimatedVblankTimer {
                            token,
                            queued: false,
                        };
                }
            }
            Err(err) => warn!(?err, "Failed to insert estimated vblank timer"),
        }
    }

    /// Send frame events to every client displayed on `output`, honoring
    /// the render-time windows: a view's callbacks are delayed by
    /// `time_until_refresh - output.max_render_time - view.max_render_time`
    /// when that is positive, so a client that starts drawing on the event
    /// still makes the next refresh.
    pub fn send_frames(&mut self, output: &Output) {
        let Some(node) = self.common.output_node(output) else {
            return;
        };
        let time_until_refresh = self
            .common
            .output_state
            .get(output)
            .map(|s| s.frame_clock.time_until_refresh())
            .unwrap_or(Duration::ZERO);
        let output_budget = self
            .common
            .output_state
            .get(output)
            .map(|s| Duration::from_millis(u64::from(s.max_render_time)))
            .unwrap_or(Duration::ZERO);
        let now = get_monotonic_time();

        // Views on this output.
        let views: Vec<NodeId> = self
            .common
            .tree
            .node_ids()
            .filter(|&id| {
                self.common.tree.try_container(id).is_some_and(|c| c.view.is_some())
                    && self.common.tree.output_of(id) == Some(node)
            })
            .collect();
        for view_node in views {
            let Some(view) = self.common.tree.container(view_node).view.as_ref() else {
                continue;
            };
            let Some(surface) = view.wl_surface() else {
                continue;
            };
            let view_budget = Duration::from_millis(u64::from(view.max_render_time));
            let delay = time_until_refresh
                .saturating_sub(output_budget)
                .saturating_sub(view_budget);

            if delay.is_zero() {
                send_frames_surface_tree(&surface, output, now, Some(Duration::ZERO), |_, _| {
                    None
                });
            } else {
                let timer_output = output.clone();
                let res = self.common.loop_handle.insert_source(
                    Timer::from_duration(delay),
                    move |_, _, _state| {
                        send_frames_surface_tree(
                            &surface,
                            &timer_output,
                            get_monotonic_time(),
                            Some(Duration::ZERO),
                            |_, _| None,
                        );
                        TimeoutAction::Drop
                    },
                );
                if res.is_err() {
                    warn!("Failed to insert frame-done timer");
                }
            }
        }

        // Layer and lock surfaces get theirs right away.
        for layer in smithay::desktop::layer_map_for_output(output).layers() {
            send_frames_surface_tree(
                layer.wl_surface(),
                output,
                now,
                Some(Duration::ZERO),
                |_, _| None,
            );
        }
        if let Some(lock_surface) = &self.common.tree.output(node).lock_surface {
            send_frames_surface_tree(
                lock_surface.wl_surface(),
                output,
                now,
                Some(Duration::ZERO),
                |_, _| None,
            );
        }
    }

    /// Hand out presentation feedback for everything shown on `output`.
    pub fn presentation_feedback(
        &mut self,
        output: &Output,
        time: Duration,
        seq: u64,
        flags: smithay::reexports::wayland_protocols::wp::presentation_time::server::wp_presentation_feedback::Kind,
    ) {
        use smithay::desktop::utils::{
            surface_presentation_feedback_flags_from_states, take_presentation_feedback_surface_tree,
        };
        let Some(node) = self.common.output_node(output) else {
            return;
        };
        let mut feedback = smithay::desktop::utils::OutputPresentationFeedback::new(output);

        let mut surfaces: Vec<WlSurface> = Vec::new();
        for id in self.common.tree.node_ids() {
            if self.common.tree.output_of(id) != Some(node) {
                continue;
            }
            if let Some(surface) = self
                .common
                .tree
                .try_container(id)
                .and_then(|c| c.view.as_ref())
                .and_then(|v| v.wl_surface())
            {
                surfaces.push(surface);
            }
        }
        for layer in smithay::desktop::layer_map_for_output(output).layers() {
            surfaces.push(layer.wl_surface().clone());
        }

        for surface in surfaces {
            take_presentation_feedback_surface_tree(
                &surface,
                &mut feedback,
                |_, _| Some(output.clone()),
                surface_presentation_feedback_flags_from_states,
            );
        }

        let refresh = self
            .common
            .output_state
            .get(output)
            .and_then(|s| s.frame_clock.refresh_interval())
            .unwrap_or(Duration::ZERO);
        feedback.presented::<_, smithay::utils::Monotonic>(
            time,
            smithay::wayland::presentation::Refresh::fixed(refresh),
            seq,
            flags,
        );
    }

    /// An output's mode or scale changed: recompute its usable area, arrange
    /// and repaint.
    pub fn output_resized(&mut self, output: &Output) {
        let Some(node) = self.common.output_node(output) else {
            return;
        };
        let geometry = self.common.tree.output(node).geometry();
        self.common.tree.output_mut(node).usable_area =
            Rectangle::new((0, 0).into(), geometry.size);
        self.common.tree.set_dirty(node);
        self.arrange_layer_shell(node);
        crate::tree::root::update_geometry(&mut self.common.tree);
        crate::tree::arrange::arrange_root(&mut self.common.tree, &self.common.config);
        self.commit_dirty();
        self.queue_redraw(output);
    }
}

/// Per-client data: smithay's compositor state plus the security context
/// the client was spawned under, if any.
#[derive(Debug, Default)]
pub struct ClientState {
    pub compositor_state: CompositorClientState,
    pub security_context: Option<SecurityContext>,
}

impl ClientData for ClientState {}

/// Bind a listening socket on the first free `wayland-N` name, falling back
/// to automatic naming.
pub fn bind_socket() -> anyhow::Result<ListeningSocketSource> {
    for n in 1..=32u32 {
        if let Ok(socket) = ListeningSocketSource::with_name(&format!("wayland-{n}")) {
            return Ok(socket);
        }
    }
    Ok(ListeningSocketSource::new_auto()?)
}
