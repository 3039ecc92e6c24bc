//! The atomic transaction engine.
//!
//! Layout mutations only touch pending state and mark nodes dirty. A call to
//! [`Transactions::commit_dirty`] drains the dirty list into a transaction:
//! every affected node contributes one instruction holding a deep snapshot of
//! its pending state. Committing sends configures to the views whose content
//! box changed and waits — bounded by a timeout — for their acks. When the
//! last ack arrives (or the timer fires), the snapshots are copied into the
//! nodes' current state in one step and the scene graph is rebuilt from it.
//!
//! At most one transaction is in flight; dirt accumulating meanwhile forms
//! the next (pending) transaction, which commits right after. Apply order is
//! therefore commit order.

use std::time::Duration;

use smithay::utils::{Logical, Point, Rectangle, Serial, Size};

use crate::scene::SceneDescriptor;
use crate::tree::container::{Border, ContainerState, FullscreenMode, Layout};
use crate::tree::output::WorkspaceManagerState;
use crate::tree::workspace::WorkspaceState;
use crate::tree::{container, NodeId, NodePayload, Tree};

/// What the event-loop glue must do after an engine call returns. The
/// engine itself only touches the tree and the scene; timers, cursor
/// rebasing, focus-stack purging and frame events belong to the caller.
#[derive(Debug, Default)]
pub struct TxnEffects {
    /// Requested state of the timeout timer, if it changed.
    pub timer: Option<TimerOp>,
    /// Number of transactions applied during this call. The caller rebases
    /// cursors and re-checks idle inhibitors when nonzero.
    pub applied: usize,
    /// Destroying nodes that reached zero references and were freed; purge
    /// them from focus stacks and hover state.
    pub freed: Vec<NodeId>,
    /// Views that were just sent a configure; send them a frame event so
    /// throttled clients start drawing.
    pub configured: Vec<NodeId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerOp {
    Arm(Duration),
    Disarm,
}

/// Per-node state snapshot inside a transaction.
#[derive(Debug)]
enum InstructionState {
    Root,
    Output(WorkspaceManagerState),
    Workspace(WorkspaceState),
    Container(ContainerState),
}

#[derive(Debug)]
struct Instruction {
    node: NodeId,
    state: InstructionState,
    /// Configure serial to match the ack against (XDG shells).
    serial: Option<Serial>,
    /// True when the compositor initiated the change; a client-initiated
    /// change never re-configures the client (it already knows).
    server_request: bool,
    /// A configure is outstanding for this instruction.
    waiting: bool,
}

#[derive(Debug)]
pub struct Transaction {
    instructions: Vec<Instruction>,
    num_waiting: usize,
    num_configures: usize,
}

impl Transaction {
    fn new() -> Self {
        Self {
            instructions: Vec::new(),
            num_waiting: 0,
            num_configures: 0,
        }
    }
}

#[derive(Debug)]
pub struct Transactions {
    pending: Option<Transaction>,
    queued: Option<Transaction>,
    timeout: Duration,
}

impl Transactions {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            pending: None,
            queued: None,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub fn has_queued(&self) -> bool {
        self.queued.is_some()
    }

    /// Collect all dirty nodes into the pending transaction and try to
    /// commit it. Entry point for compositor-initiated changes.
    pub fn commit_dirty(&mut self, tree: &mut Tree, effects: &mut TxnEffects) {
        self.commit_dirty_inner(tree, effects, true);
    }

    /// Same, for client-initiated changes (no configure echo).
    pub fn commit_dirty_client(&mut self, tree: &mut Tree, effects: &mut TxnEffects) {
        self.commit_dirty_inner(tree, effects, false);
    }

    fn commit_dirty_inner(
        &mut self,
        tree: &mut Tree,
        effects: &mut TxnEffects,
        server_request: bool,
    ) {
        if tree.dirty_nodes.is_empty() {
            return;
        }

        let transaction = self.pending.get_or_insert_with(Transaction::new);
        let dirty = std::mem::take(&mut tree.dirty_nodes);
        for node in dirty {
            transaction_add_node(transaction, tree, node, server_request);
            tree.get_mut(node).dirty = false;
        }

        self.commit_pending(tree, effects);
    }

    fn commit_pending(&mut self, tree: &mut Tree, effects: &mut TxnEffects) {
        if self.queued.is_some() {
            return;
        }
        let Some(transaction) = self.pending.take() else {
            return;
        };
        self.queued = Some(transaction);
        self.commit(tree, effects);
        self.progress(tree, effects);
    }

    /// Send configures for every instruction whose content box changed, and
    /// start the ack window.
    fn commit(&mut self, tree: &mut Tree, effects: &mut TxnEffects) {
        let transaction = self.queued.as_mut().expect("commit without queued");
        debug!(
            instructions = transaction.instructions.len(),
            "Committing transaction"
        );
        transaction.num_waiting = 0;

        for (idx, instruction) in transaction.instructions.iter_mut().enumerate() {
            let node = instruction.node;
            let hidden = tree.get(node).is_view()
                && !tree.get(node).destroying
                && !view_is_visible(tree, node);

            if should_configure(tree, instruction) {
                let InstructionState::Container(state) = &instruction.state else {
                    unreachable!("only view containers get configured");
                };
                let content = state.content_box();
                let container = tree.container_mut(node);
                let view = container.view.as_mut().expect("checked by should_configure");
                instruction.serial = view.configure(content);
                if !hidden {
                    instruction.waiting = true;
                    transaction.num_waiting += 1;
                }
                effects.configured.push(node);
            }

            if !hidden && tree.get(node).is_view() && !view_has_saved_buffer(tree, node) {
                view_save_buffer(tree, node);
            }
            tree.get_mut(node).instruction = Some(idx);
        }

        transaction.num_configures = transaction.num_waiting;
        if transaction.num_waiting > 0 {
            effects.timer = Some(TimerOp::Arm(self.timeout));
        }
    }

    fn progress(&mut self, tree: &mut Tree, effects: &mut TxnEffects) {
        loop {
            match &self.queued {
                Some(transaction) if transaction.num_waiting == 0 => {}
                _ => return,
            }
            let transaction = self.queued.take().expect("checked above");
            apply(&transaction, tree);
            sync_scene(tree);
            effects.applied += 1;
            destroy_transaction(transaction, tree, effects);

            if self.pending.is_none() {
                return;
            }
            // Re-enter commit for the pending transaction that accumulated
            // while this one was waiting.
            let transaction = self.pending.take().expect("checked above");
            self.queued = Some(transaction);
            self.commit(tree, effects);
        }
    }

    /// The ack window expired: apply with whatever we have. Un-acked views
    /// keep showing their saved buffers this frame.
    pub fn handle_timeout(&mut self, tree: &mut Tree, effects: &mut TxnEffects) {
        let Some(transaction) = self.queued.as_mut() else {
            return;
        };
        debug!(
            waiting = transaction.num_waiting,
            "Transaction timed out"
        );
        transaction.num_waiting = 0;
        self.progress(tree, effects);
    }

    /// Serial-based ack (XDG shells). Returns whether the serial matched the
    /// in-flight instruction for this node.
    pub fn notify_view_ready_by_serial(
        &mut self,
        tree: &mut Tree,
        node: NodeId,
        serial: Serial,
        effects: &mut TxnEffects,
    ) -> bool {
        let Some(idx) = tree.get(node).instruction else {
            return false;
        };
        let matched = self
            .queued
            .as_ref()
            .and_then(|t| t.instructions.get(idx))
            .is_some_and(|i| i.serial == Some(serial));
        if matched {
            self.set_instruction_ready(tree, idx, effects);
        }
        matched
    }

    /// Geometry-based ack (XWayland, which has no configure serials).
    /// Coordinates compare after integer truncation; X11 only ever saw the
    /// truncated values.
    pub fn notify_view_ready_by_geometry(
        &mut self,
        tree: &mut Tree,
        node: NodeId,
        x: f64,
        y: f64,
        width: i32,
        height: i32,
        effects: &mut TxnEffects,
    ) -> bool {
        let Some(idx) = tree.get(node).instruction else {
            return false;
        };
        let matched = self
            .queued
            .as_ref()
            .and_then(|t| t.instructions.get(idx))
            .is_some_and(|i| match &i.state {
                InstructionState::Container(state) => {
                    state.content_x == x as i32
                        && state.content_y == y as i32
                        && state.content_width == width
                        && state.content_height == height
                }
                _ => false,
            });
        if matched {
            self.set_instruction_ready(tree, idx, effects);
        }
        matched
    }

    fn set_instruction_ready(
        &mut self,
        tree: &mut Tree,
        idx: usize,
        effects: &mut TxnEffects,
    ) {
        let transaction = self.queued.as_mut().expect("ready without queued");
        let instruction = &mut transaction.instructions[idx];
        // A timed-out transaction already has num_waiting forced to zero.
        if instruction.waiting && transaction.num_waiting > 0 {
            instruction.waiting = false;
            transaction.num_waiting -= 1;
            if transaction.num_waiting == 0 {
                debug!("Transaction is ready");
                effects.timer = Some(TimerOp::Disarm);
            }
        }
        let node = instruction.node;
        tree.get_mut(node).instruction = None;
        self.progress(tree, effects);
    }
}

/// Add `node` to the transaction, or refresh its snapshot if it is already
/// represented. A server request is sticky: once any update was
/// server-initiated, the instruction counts as such.
fn transaction_add_node(
    transaction: &mut Transaction,
    tree: &mut Tree,
    node: NodeId,
    server_request: bool,
) {
    let existing = (tree.get(node).txnrefs > 0)
        .then(|| {
            transaction
                .instructions
                .iter()
                .position(|i| i.node == node)
        })
        .flatten();

    let state = snapshot(tree, node);
    match existing {
        Some(idx) => {
            let instruction = &mut transaction.instructions[idx];
            instruction.state = state;
            if server_request {
                instruction.server_request = true;
            }
        }
        None => {
            transaction.instructions.push(Instruction {
                node,
                state,
                serial: None,
                server_request,
                waiting: false,
            });
            tree.get_mut(node).txnrefs += 1;
        }
    }
}

fn snapshot(tree: &Tree, node: NodeId) -> InstructionState {
    match &tree.get(node).payload {
        NodePayload::Root(_) => InstructionState::Root,
        NodePayload::Output(output) => {
            InstructionState::Output(output.workspace_manager.pending.clone())
        }
        NodePayload::Workspace(workspace) => {
            InstructionState::Workspace(workspace.pending.clone())
        }
        NodePayload::Container(container) => {
            InstructionState::Container(container.pending.clone())
        }
    }
}

/// Whether the commit phase must send a configure for this instruction.
/// A content box identical to the current one needs none (the client is
/// already there), and client-initiated changes are never echoed back.
fn should_configure(tree: &Tree, instruction: &Instruction) -> bool {
    let node = tree.get(instruction.node);
    if !node.is_view() || node.destroying || !instruction.server_request {
        return false;
    }
    let InstructionState::Container(state) = &instruction.state else {
        return false;
    };
    let current = &tree.container(instruction.node).current;

    #[cfg(feature = "xwayland")]
    {
        use crate::view::ShellKind;
        // X11 apps are position-aware, but only ever see integer-truncated
        // coordinates; an origin change below one pixel is invisible to them
        // and they will not respond to the duplicate configure.
        let container = tree.container(instruction.node);
        if container.view.as_ref().map(|v| v.kind()) == Some(ShellKind::XWayland)
            && (current.content_x != state.content_x || current.content_y != state.content_y)
        {
            return true;
        }
    }

    current.content_width != state.content_width || current.content_height != state.content_height
}

fn view_is_visible(tree: &Tree, node: NodeId) -> bool {
    let container = tree.container(node);
    tree.scene.is_visible(container.scene_tree)
}

fn view_has_saved_buffer(tree: &Tree, node: NodeId) -> bool {
    tree.container(node)
        .view
        .as_ref()
        .is_some_and(|view| view.saved_surface_tree.is_some())
}

/// Snapshot the view's last committed buffer into a frozen scene subtree and
/// hide the live surface until apply. The renderer keeps displaying the
/// stale content for the duration of the ack window.
fn view_save_buffer(tree: &mut Tree, node: NodeId) {
    let Some((content_tree, live_tree, surface, size)) = ({
        let container = tree.container(node);
        container.view.as_ref().and_then(|view| {
            let surface = view.wl_surface()?;
            let size = match tree.scene.get(view.surface_node).content() {
                crate::scene::SceneContent::Surface { size, .. } => *size,
                _ => Size::default(),
            };
            Some((container.content_tree, view.scene_tree, surface, size))
        })
    }) else {
        return;
    };

    let saved = tree.scene.create_tree(content_tree);
    let leaf = tree.scene.create_surface(saved, surface);
    tree.scene.set_surface_size(leaf, size);
    tree.scene.set_descriptor(saved, SceneDescriptor::View(node));
    tree.scene.set_enabled(live_tree, false);
    let view = tree.container_mut(node).view.as_mut().expect("checked above");
    view.saved_surface_tree = Some(saved);
}

fn view_remove_saved_buffer(tree: &mut Tree, node: NodeId) {
    let Some((saved, live_tree)) = ({
        let container = tree.container(node);
        container
            .view
            .as_ref()
            .and_then(|view| view.saved_surface_tree.map(|s| (s, view.scene_tree)))
    }) else {
        return;
    };
    tree.scene.destroy(saved);
    tree.scene.set_enabled(live_tree, true);
    let view = tree.container_mut(node).view.as_mut().expect("checked above");
    view.saved_surface_tree = None;
}

/// Copy every instruction snapshot into its node's current state.
fn apply(transaction: &Transaction, tree: &mut Tree) {
    debug!("Applying transaction");
    for instruction in &transaction.instructions {
        let node = instruction.node;
        match &instruction.state {
            InstructionState::Root => {}
            InstructionState::Output(state) => {
                tree.output_mut(node).workspace_manager.current = state.clone();
            }
            InstructionState::Workspace(state) => {
                tree.workspace_mut(node).current = state.clone();
            }
            InstructionState::Container(state) => {
                tree.container_mut(node).current = state.clone();

                let destroying = tree.get(node).destroying;
                let txnrefs = tree.get(node).txnrefs;
                if view_has_saved_buffer(tree, node) && (!destroying || txnrefs == 1) {
                    view_remove_saved_buffer(tree, node);
                }
                // If the view has not resized to the configured box yet,
                // center and clip it so nothing pokes out of the borders.
                center_and_clip_surface(tree, node);
            }
        }
        tree.get_mut(node).instruction = None;
    }
}

fn center_and_clip_surface(tree: &mut Tree, node: NodeId) {
    let Some((surface_node, surface_size)) = ({
        let container = tree.container(node);
        container.view.as_ref().map(|view| {
            let size = match tree.scene.get(view.surface_node).content() {
                crate::scene::SceneContent::Surface { size, .. } => *size,
                _ => Size::default(),
            };
            (view.surface_node, size)
        })
    }) else {
        return;
    };
    if surface_size.w == 0 || surface_size.h == 0 {
        return;
    }

    let content = tree.container(node).current.content_box();
    let offset = Point::from((
        (content.size.w - surface_size.w) / 2,
        (content.size.h - surface_size.h) / 2,
    ));
    tree.scene.set_position(surface_node, offset);

    let clip = (surface_size.w > content.size.w || surface_size.h > content.size.h)
        .then(|| Rectangle::new((-offset.x, -offset.y).into(), content.size));
    tree.scene.set_surface_clip(surface_node, clip);
}

/// Drop a finished transaction: release node references and free nodes whose
/// destruction this transaction was keeping alive.
fn destroy_transaction(
    transaction: Transaction,
    tree: &mut Tree,
    effects: &mut TxnEffects,
) {
    for instruction in transaction.instructions {
        let node_id = instruction.node;
        let node = tree.get_mut(node_id);
        node.txnrefs -= 1;
        node.instruction = None;
        if node.destroying && node.txnrefs == 0 {
            free_node(tree, node_id);
            effects.freed.push(node_id);
        }
    }
}

fn free_node(tree: &mut Tree, node: NodeId) {
    let scene_nodes: Vec<crate::scene::SceneId> = match &tree.get(node).payload {
        NodePayload::Root(_) => unreachable!("the root is never destroyed"),
        NodePayload::Output(output) => vec![
            output.layers.shell_background,
            output.layers.shell_bottom,
            output.layers.tiling,
            output.layers.fullscreen,
            output.layers.shell_top,
            output.layers.shell_overlay,
            output.layers.session_lock,
            output.layers.osd,
            output.layers.water_mark,
            output.layers.black_screen,
        ],
        NodePayload::Workspace(workspace) => {
            vec![workspace.non_fullscreen_tree, workspace.fullscreen_tree]
        }
        NodePayload::Container(container) => vec![container.scene_tree],
    };
    for scene_node in scene_nodes {
        tree.scene.destroy(scene_node);
    }
    tree.free(node);
}

// {{{ Scene synchronization
//
// After apply, the scene graph is rebuilt from the *current* state of every
// node: per-output layer trees slot into the global layers, workspace trees
// into their output's, container trees into their parents, with enable
// flags expressing visibility (fullscreen suppression, inactive workspaces,
// scratchpad).

pub fn sync_scene(tree: &mut Tree) {
    let fullscreen_global = tree.root_node().fullscreen_global;
    let has_global_fs = fullscreen_global.is_some();

    {
        let layers = &tree.root_node().layers;
        let toggled = [
            layers.shell_background,
            layers.shell_bottom,
            layers.tiling,
            layers.floating,
            layers.shell_top,
            layers.fullscreen,
        ];
        for layer in toggled {
            tree.scene.set_enabled(layer, !has_global_fs);
        }
    }

    // Scratchpad contents never render.
    let scratchpad = tree.root_node().scratchpad.clone();
    for con in scratchpad {
        if tree.container(con).current.workspace.is_none() {
            let scene_tree = tree.container(con).scene_tree;
            tree.scene.set_enabled(scene_tree, false);
        }
    }

    let outputs = tree.root_node().outputs.clone();
    if let Some(fs) = fullscreen_global {
        for output in &outputs {
            if let Some(ws) = tree.output(*output).workspace_manager.current.active {
                sync_workspace_floating(tree, ws);
            }
        }
        let layer = tree.root_node().layers.fullscreen_global;
        sync_fullscreen(tree, layer, fs);
    } else {
        for output in outputs {
            let position = tree.output(output).geometry().loc;
            let root_layers = &tree.root_node().layers;
            let (g_bg, g_bottom, g_tiling, g_top, g_overlay, g_fs, g_lock) = (
                root_layers.shell_background,
                root_layers.shell_bottom,
                root_layers.tiling,
                root_layers.shell_top,
                root_layers.shell_overlay,
                root_layers.fullscreen,
                root_layers.session_lock,
            );
            let layers = &tree.output(output).layers;
            let pairs = [
                (layers.shell_background, g_bg),
                (layers.shell_bottom, g_bottom),
                (layers.tiling, g_tiling),
                (layers.shell_top, g_top),
                (layers.shell_overlay, g_overlay),
                (layers.fullscreen, g_fs),
                (layers.session_lock, g_lock),
            ];
            for (output_layer, global_layer) in pairs {
                tree.scene.reparent(output_layer, global_layer);
                tree.scene.set_position(output_layer, position);
            }
            sync_output(tree, output);
        }
    }

    sync_popups(tree);
}

fn sync_output(tree: &mut Tree, output: NodeId) {
    let output_node = tree.output(output);
    let active = output_node.workspace_manager.current.active;
    let output_size = output_node.geometry().size;
    let workspaces = output_node.workspace_manager.current.workspaces.clone();

    for ws in workspaces {
        let activated = active == Some(ws);
        let (ws_tiling_tree, ws_fs_tree) = {
            let workspace = tree.workspace(ws);
            (workspace.non_fullscreen_tree, workspace.fullscreen_tree)
        };
        let (out_tiling, out_fs) = {
            let layers = &tree.output(output).layers;
            (layers.tiling, layers.fullscreen)
        };
        tree.scene.reparent(ws_tiling_tree, out_tiling);
        tree.scene.reparent(ws_fs_tree, out_fs);

        let floating_layer = tree.root_node().layers.floating;
        let floating = tree.workspace(ws).current.floating.clone();
        for floater in &floating {
            let scene_tree = tree.container(*floater).scene_tree;
            tree.scene.reparent(scene_tree, floating_layer);
            tree.scene.set_enabled(scene_tree, activated);
        }

        if activated {
            let fullscreen = tree.workspace(ws).current.fullscreen;
            tree.scene.set_enabled(ws_tiling_tree, fullscreen.is_none());
            tree.scene.set_enabled(ws_fs_tree, fullscreen.is_some());

            sync_workspace_floating(tree, ws);

            let (bg, bottom, fs_layer) = {
                let layers = &tree.output(output).layers;
                (layers.shell_background, layers.shell_bottom, layers.fullscreen)
            };
            tree.scene.set_enabled(bg, fullscreen.is_none());
            tree.scene.set_enabled(bottom, fullscreen.is_none());
            tree.scene.set_enabled(fs_layer, fullscreen.is_some());

            if let Some(fs) = fullscreen {
                let background = tree.output(output).fullscreen_background;
                tree.scene.set_rect_size(background, output_size);
                sync_fullscreen(tree, ws_fs_tree, fs);
            } else {
                let ws_geometry = tree.workspace(ws).current.geometry;
                let output_position = tree.output(output).geometry().loc;
                // The workspace tree is positioned output-locally; children
                // then sit at layout coordinates relative to it.
                let local = ws_geometry.loc - output_position;
                tree.scene.set_position(ws_tiling_tree, local);

                let tiling = tree.workspace(ws).current.tiling.clone();
                let focused_inactive = tree.workspace(ws).current.focused_inactive_child;
                let layout = tree.workspace(ws).current.layout;
                sync_children(tree, &tiling, layout, focused_inactive, ws_tiling_tree, ws_geometry.loc);
            }
        } else {
            tree.scene.set_enabled(ws_tiling_tree, false);
            tree.scene.set_enabled(ws_fs_tree, false);
            disable_workspace(tree, ws);
        }
    }
}

/// Floaters of a visible workspace. Transients of a fullscreen container
/// stay visible above it; everything else renders in the floating layer.
fn sync_workspace_floating(tree: &mut Tree, ws: NodeId) {
    let floating = tree.workspace(ws).current.floating.clone();
    for con in floating {
        if tree.container(con).current.fullscreen_mode != FullscreenMode::None {
            continue;
        }
        let layer = tree.root_node().layers.floating;
        let scene_tree = tree.container(con).scene_tree;
        let position = {
            let state = &tree.container(con).current;
            Point::from((state.x, state.y))
        };
        tree.scene.reparent(scene_tree, layer);
        tree.scene.set_position(scene_tree, position);
        tree.scene.set_enabled(scene_tree, true);
        sync_container(tree, con, true);
    }
}

fn sync_fullscreen(tree: &mut Tree, layer: crate::scene::SceneId, fs: NodeId) {
    let (scene_tree, view_tree) = {
        let container = tree.container(fs);
        (
            container.scene_tree,
            container.view.as_ref().map(|view| view.scene_tree),
        )
    };
    let node = if let Some(view_tree) = view_tree {
        // Only the client content matters; decorations stay hidden.
        tree.scene.set_enabled(scene_tree, false);
        view_tree
    } else {
        sync_container(tree, fs, true);
        scene_tree
    };
    tree.scene.reparent(node, layer);
    tree.scene.lower_to_bottom(node);
    tree.scene.set_position(node, Point::default());
}

/// Place the scene nodes of `children` under `content`, positioned relative
/// to `origin` (the parent's layout-coordinate origin).
fn sync_children(
    tree: &mut Tree,
    children: &[NodeId],
    layout: Layout,
    focused_inactive: Option<NodeId>,
    content: crate::scene::SceneId,
    origin: Point<i32, Logical>,
) {
    let stacked = matches!(layout, Layout::Stacked | Layout::Tabbed);
    for &child in children {
        let scene_tree = tree.container(child).scene_tree;
        tree.scene.reparent(scene_tree, content);
        let state = &tree.container(child).current;
        let local = Point::from((state.x - origin.x, state.y - origin.y));
        tree.scene.set_position(scene_tree, local);

        if stacked {
            // Only the focused-inactive member of a stack/tab group shows.
            let visible = focused_inactive == Some(child)
                || (focused_inactive.is_none() && children.first() == Some(&child));
            tree.scene.set_enabled(scene_tree, visible);
            if visible {
                sync_container(tree, child, false);
            } else {
                disable_container(tree, child);
            }
        } else {
            tree.scene.set_enabled(scene_tree, true);
            sync_container(tree, child, true);
        }
    }
}

/// Rebuild one container's scene presence from its current state: border
/// rects, title bar, view surface, nested children.
fn sync_container(tree: &mut Tree, con: NodeId, title_bar: bool) {
    let scene_tree = tree.container(con).scene_tree;
    tree.scene.set_enabled(scene_tree, true);

    let (geometry, content_box, border, thickness, fullscreen, focused) = {
        let state = &tree.container(con).current;
        (
            state.geometry(),
            state.content_box(),
            state.border,
            state.border_thickness,
            state.fullscreen_mode != FullscreenMode::None,
            state.focused,
        )
    };
    let urgent = tree
        .container(con)
        .view
        .as_ref()
        .is_some_and(|view| view.urgent);
    let width = geometry.size.w;
    let height = geometry.size.h;

    let show_title = title_bar && border == Border::Normal && !fullscreen;
    let border_top = if fullscreen {
        0
    } else {
        match border {
            Border::Normal => content_box.loc.y - geometry.loc.y,
            Border::Pixel => thickness,
            Border::None | Border::Csd => 0,
        }
    };
    let side = if fullscreen {
        0
    } else {
        match border {
            Border::Normal | Border::Pixel => thickness,
            Border::None | Border::Csd => 0,
        }
    };

    {
        let container = tree.container(con);
        let (tb_tree, tb_rect, b) = (
            container.title_bar_tree,
            container.title_bar_rect,
            [container.border.top, container.border.bottom, container.border.left, container.border.right],
        );
        tree.scene.set_enabled(tb_tree, show_title);
        if show_title {
            tree.scene.set_position(tb_tree, Point::default());
            tree.scene
                .set_rect_size(tb_rect, Size::from((width, border_top)));
            let color = if urgent {
                container::BORDER_COLOR_URGENT
            } else if focused {
                container::BORDER_COLOR_FOCUSED
            } else {
                container::BORDER_COLOR_INACTIVE
            };
            tree.scene.set_rect_color(tb_rect, color);
        }

        let [top, bottom, left, right] = b;
        let top_h = if show_title { 0 } else { border_top };
        tree.scene.set_rect_size(top, Size::from((width, top_h)));
        tree.scene.set_position(top, Point::default());
        tree.scene.set_rect_size(bottom, Size::from((width, side)));
        tree.scene
            .set_position(bottom, Point::from((0, height - side)));
        tree.scene
            .set_rect_size(left, Size::from((side, height - border_top - side)));
        tree.scene.set_position(left, Point::from((0, border_top)));
        tree.scene
            .set_rect_size(right, Size::from((side, height - border_top - side)));
        tree.scene
            .set_position(right, Point::from((width - side, border_top)));

        let color = if urgent {
            container::BORDER_COLOR_URGENT
        } else if focused {
            container::BORDER_COLOR_FOCUSED
        } else {
            container::BORDER_COLOR_INACTIVE
        };
        for rect in [top, bottom, left, right] {
            tree.scene.set_rect_color(rect, color);
        }
    }

    let content_tree = tree.container(con).content_tree;
    tree.scene.set_position(
        content_tree,
        Point::from((content_box.loc.x - geometry.loc.x, content_box.loc.y - geometry.loc.y)),
    );

    if let Some(view_tree) = tree.container(con).view.as_ref().map(|v| v.scene_tree) {
        // The client may just have left fullscreen, where its surface hung
        // under another tree; re-assert parenthood.
        tree.scene.reparent(view_tree, content_tree);
        tree.scene.set_position(view_tree, Point::default());
    } else {
        let children = tree.container(con).current.children.clone();
        let layout = tree.container(con).current.layout;
        let focused_inactive = tree.container(con).current.focused_inactive_child;
        sync_children(tree, &children, layout, focused_inactive, content_tree, content_box.loc);
    }
}

/// Hide a container that is on a non-visible workspace: pull its subtree
/// back under its own content tree so nothing lingers in shared layers.
fn disable_container(tree: &mut Tree, con: NodeId) {
    let content_tree = tree.container(con).content_tree;
    if let Some(view_tree) = tree.container(con).view.as_ref().map(|v| v.scene_tree) {
        tree.scene.reparent(view_tree, content_tree);
    } else {
        let children = tree.container(con).current.children.clone();
        for child in children {
            let scene_tree = tree.container(child).scene_tree;
            tree.scene.reparent(scene_tree, content_tree);
            disable_container(tree, child);
        }
    }
}

fn disable_workspace(tree: &mut Tree, ws: NodeId) {
    let tiling = tree.workspace(ws).current.tiling.clone();
    let non_fullscreen_tree = tree.workspace(ws).non_fullscreen_tree;
    for con in tiling {
        let scene_tree = tree.container(con).scene_tree;
        tree.scene.reparent(scene_tree, non_fullscreen_tree);
        disable_container(tree, con);
    }
    let floating_layer = tree.root_node().layers.floating;
    let floating = tree.workspace(ws).current.floating.clone();
    for con in floating {
        let scene_tree = tree.container(con).scene_tree;
        tree.scene.reparent(scene_tree, floating_layer);
        disable_container(tree, con);
        tree.scene.set_enabled(scene_tree, false);
    }
}

/// Re-anchor every popup to its parent scene node.
fn sync_popups(tree: &mut Tree) {
    let popup_layer = tree.root_node().layers.popup;
    let popups: Vec<_> = tree.scene.get(popup_layer).children().to_vec();
    for popup in popups {
        let Some(SceneDescriptor::Popup { relative_to, .. }) =
            tree.scene.get(popup).descriptor().cloned()
        else {
            continue;
        };
        let anchor = tree.scene.absolute_position(relative_to);
        tree.scene.set_position(popup, anchor);
    }
}

// }}}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::tree::test_support::tree_with_output;
    use crate::tree::{arrange, workspace};

    fn fixture() -> (Tree, NodeId, NodeId, Transactions, TxnEffects, Config) {
        let (tree, output, ws) = tree_with_output();
        let config = Config::default();
        (tree, output, ws, Transactions::new(200), TxnEffects::default(), config)
    }

    #[test]
    fn commit_dirty_applies_viewless_changes_immediately() {
        let (mut tree, _output, ws, mut txns, mut effects, config) = fixture();
        let con = container::create_split(&mut tree, Layout::None);
        workspace::add_tiling(&mut tree, ws, con);
        arrange::arrange_root(&mut tree, &config);

        txns.commit_dirty(&mut tree, &mut effects);

        // No views, nothing to wait for: applied synchronously, queue empty.
        assert_eq!(effects.applied, 1);
        assert!(effects.timer.is_none());
        assert!(!txns.has_queued());
        assert_eq!(
            tree.container(con).current.geometry(),
            tree.container(con).pending.geometry()
        );
        assert_eq!(tree.workspace(ws).current.tiling, vec![con]);
        assert!(tree.dirty_nodes.is_empty());
    }

    #[test]
    fn txnrefs_match_live_instructions() {
        let (mut tree, _output, ws, mut txns, mut effects, config) = fixture();
        let con = container::create_split(&mut tree, Layout::None);
        workspace::add_tiling(&mut tree, ws, con);
        arrange::arrange_root(&mut tree, &config);

        txns.commit_dirty(&mut tree, &mut effects);

        // Everything applied and reaped: no refs remain.
        for id in tree.node_ids().collect::<Vec<_>>() {
            assert_eq!(tree.get(id).txnrefs, 0);
            assert!(tree.get(id).instruction.is_none());
        }
    }

    #[test]
    fn node_destroyed_mid_flight_is_kept_until_reaped() {
        let (mut tree, _output, ws, mut txns, mut effects, config) = fixture();
        let con = container::create_split(&mut tree, Layout::None);
        workspace::add_tiling(&mut tree, ws, con);
        arrange::arrange_root(&mut tree, &config);

        container::begin_destroy(&mut tree, con);
        txns.commit_dirty(&mut tree, &mut effects);

        assert_eq!(effects.freed, vec![con]);
        assert!(!tree.exists(con));
        assert!(!tree.workspace(ws).current.tiling.contains(&con));
    }

    #[test]
    fn dirt_during_wait_forms_the_next_transaction() {
        let (mut tree, _output, ws, mut txns, mut effects, _config) = fixture();

        // Simulate an in-flight transaction by parking a fabricated one in
        // the queue slot.
        txns.queued = Some(Transaction {
            instructions: Vec::new(),
            num_waiting: 1,
            num_configures: 1,
        });

        let con = container::create_split(&mut tree, Layout::None);
        workspace::add_tiling(&mut tree, ws, con);
        txns.commit_dirty(&mut tree, &mut effects);

        // Still waiting: nothing applied, dirt parked in pending.
        assert_eq!(effects.applied, 0);
        assert!(txns.pending.is_some());
        assert_ne!(
            tree.workspace(ws).current.tiling,
            tree.workspace(ws).pending.tiling
        );

        // Timeout forces the queued transaction through, then the pending
        // one commits and applies behind it (it has no waiters).
        txns.handle_timeout(&mut tree, &mut effects);
        assert_eq!(effects.applied, 2);
        assert!(txns.pending.is_none());
        assert!(!txns.has_queued());
        assert_eq!(tree.workspace(ws).current.tiling, vec![con]);
    }

    #[test]
    fn duplicate_dirty_nodes_update_their_instruction_in_place() {
        let (mut tree, _output, ws, mut txns, mut effects, _config) = fixture();
        txns.queued = Some(Transaction {
            instructions: Vec::new(),
            num_waiting: 1,
            num_configures: 1,
        });

        let con = container::create_split(&mut tree, Layout::None);
        workspace::add_tiling(&mut tree, ws, con);
        txns.commit_dirty_client(&mut tree, &mut effects);

        tree.container_mut(con).pending.width = 555;
        tree.set_dirty(con);
        txns.commit_dirty(&mut tree, &mut effects);

        let pending = txns.pending.as_ref().unwrap();
        let instructions: Vec<_> = pending
            .instructions
            .iter()
            .filter(|i| i.node == con)
            .collect();
        assert_eq!(instructions.len(), 1);
        assert_eq!(tree.get(con).txnrefs, 1);
        // Client-then-server updates leave the sticky server flag set.
        assert!(instructions[0].server_request);
        match &instructions[0].state {
            InstructionState::Container(state) => assert_eq!(state.width, 555),
            other => panic!("wrong instruction variant: {other:?}"),
        }

        txns.handle_timeout(&mut tree, &mut effects);
    }

    #[test]
    fn geometry_ack_uses_truncated_coordinates() {
        let state = {
            let mut state = ContainerState::new_for_tests();
            state.content_x = 100;
            state.content_y = 50;
            state.content_width = 640;
            state.content_height = 480;
            state
        };
        let instruction = Instruction {
            node: NodeId(1),
            state: InstructionState::Container(state),
            serial: None,
            server_request: true,
            waiting: true,
        };
        // Fractional parts are invisible to X11; 100.7 acks 100.
        let matches = |x: f64, y: f64, w: i32, h: i32| match &instruction.state {
            InstructionState::Container(s) => {
                s.content_x == x as i32
                    && s.content_y == y as i32
                    && s.content_width == w
                    && s.content_height == h
            }
            _ => false,
        };
        assert!(matches(100.7, 50.9, 640, 480));
        assert!(!matches(101.0, 50.0, 640, 480));
        assert!(!matches(100.0, 50.0, 641, 480));
    }

    #[test]
    fn scene_follows_the_applied_state_not_the_pending_one() {
        let (mut tree, _output, ws, mut txns, mut effects, config) = fixture();
        let con = container::create_split(&mut tree, Layout::None);
        workspace::add_tiling(&mut tree, ws, con);
        arrange::arrange_root(&mut tree, &config);
        txns.commit_dirty(&mut tree, &mut effects);

        // After apply, the container hangs off the workspace tiling tree.
        let scene_tree = tree.container(con).scene_tree;
        let ws_tree = tree.workspace(ws).non_fullscreen_tree;
        assert_eq!(tree.scene.get(scene_tree).parent(), Some(ws_tree));
        assert!(tree.scene.is_visible(scene_tree));
    }

    #[test]
    fn workspace_fullscreen_disables_the_tiling_layer() {
        let (mut tree, output, ws, mut txns, mut effects, config) = fixture();
        let tiled = container::create_split(&mut tree, Layout::None);
        let fs = container::create_split(&mut tree, Layout::None);
        workspace::add_tiling(&mut tree, ws, tiled);
        workspace::add_tiling(&mut tree, ws, fs);
        arrange::arrange_root(&mut tree, &config);
        txns.commit_dirty(&mut tree, &mut effects);

        container::set_fullscreen(&mut tree, fs, FullscreenMode::Workspace);
        arrange::arrange_root(&mut tree, &config);
        txns.commit_dirty(&mut tree, &mut effects);

        let ws_node = tree.workspace(ws);
        assert!(!tree.scene.get(ws_node.non_fullscreen_tree).enabled());
        assert!(tree.scene.get(ws_node.fullscreen_tree).enabled());
        let fs_scene = tree.container(fs).scene_tree;
        assert_eq!(
            tree.scene.get(fs_scene).parent(),
            Some(tree.workspace(ws).fullscreen_tree)
        );
        // Lower shell layers of that output go dark too.
        let layers = &tree.output(output).layers;
        assert!(!tree.scene.get(layers.shell_background).enabled());
        assert!(!tree.scene.get(layers.shell_bottom).enabled());

        // S1: the container covers the whole output after the transaction.
        assert_eq!(
            tree.container(fs).current.geometry(),
            Rectangle::new((0, 0).into(), (1920, 1080).into())
        );
    }

    #[test]
    fn global_fullscreen_suppresses_every_other_layer() {
        let (mut tree, _output, ws, mut txns, mut effects, config) = fixture();
        let fs = container::create_split(&mut tree, Layout::None);
        workspace::add_tiling(&mut tree, ws, fs);
        arrange::arrange_root(&mut tree, &config);
        txns.commit_dirty(&mut tree, &mut effects);

        container::set_fullscreen(&mut tree, fs, FullscreenMode::Global);
        arrange::arrange_root(&mut tree, &config);
        txns.commit_dirty(&mut tree, &mut effects);

        let layers = &tree.root_node().layers;
        for layer in [
            layers.shell_background,
            layers.shell_bottom,
            layers.tiling,
            layers.floating,
            layers.shell_top,
            layers.fullscreen,
        ] {
            assert!(!tree.scene.get(layer).enabled());
        }
        let fs_scene = tree.container(fs).scene_tree;
        assert_eq!(
            tree.scene.get(fs_scene).parent(),
            Some(tree.root_node().layers.fullscreen_global)
        );
    }
}

#[cfg(test)]
impl ContainerState {
    fn new_for_tests() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            content_x: 0,
            content_y: 0,
            content_width: 0,
            content_height: 0,
            parent: None,
            workspace: None,
            layout: Layout::None,
            children: Vec::new(),
            border: Border::Normal,
            border_thickness: 2,
            fullscreen_mode: FullscreenMode::None,
            focused: false,
            focused_inactive_child: None,
            title: String::new(),
        }
    }
}
