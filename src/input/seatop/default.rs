//! The default seat-op: route events to clients and watch for triggers that
//! start a capture op.

use smithay::backend::input::ButtonState;
use smithay::input::pointer::{AxisFrame, ButtonEvent, CursorIcon, CursorImageStatus, MotionEvent};
use smithay::utils::{Logical, Point};

use super::{down, move_floating, resize_floating, touch_down, SeatOp, BTN_LEFT};
use crate::input::cursor::{self, FollowFocus, Hit, HitTarget};
use crate::state::State;
use crate::tree::container::Layout;
use crate::tree::{container, NodeId, NodeKind};

pub fn button(state: &mut State, event: &ButtonEvent) {
    if event.state == ButtonState::Pressed {
        on_press(state, event);
    } else {
        forward_button(state, event);
    }
}

fn on_press(state: &mut State, event: &ButtonEvent) {
    let location = state.common.cursor.location;
    let hit = cursor::node_at_coords(&state.common.tree, location);

    match hit {
        Some(Hit {
            target: HitTarget::Layer(surface),
            ..
        }) => {
            if let Some(layer) = state.layer_for_surface_global(&surface) {
                use smithay::wayland::shell::wlr_layer::KeyboardInteractivity;
                if layer.cached_state().keyboard_interactivity
                    != KeyboardInteractivity::None
                {
                    state.set_focus_layer(Some(layer));
                }
            }
            forward_button(state, event);
        }
        Some(Hit {
            target: HitTarget::LockSurface(_) | HitTarget::Popup(_),
            ..
        }) => {
            forward_button(state, event);
        }
        Some(Hit {
            target: HitTarget::View { container, surface },
            local,
        }) => {
            let leaf = container::leaf_toward_focus(&state.common.tree, container);
            state.set_focus(Some(leaf));
            state.commit_dirty();

            let floater = top_floater(state, container);
            if floating_modifier_held(state) && container::is_floating(&state.common.tree, floater)
            {
                begin_floating_op(state, floater, event);
                return;
            }

            forward_button(state, event);
            state.common.cursor.op = SeatOp::Down(down::Data {
                container: Some(container),
                surface,
                surface_origin: location - local,
            });
        }
        Some(Hit {
            target: HitTarget::Container(con),
            local,
        }) => {
            let leaf = container::leaf_toward_focus(&state.common.tree, con);
            state.set_focus(Some(leaf));
            state.commit_dirty();

            let floater = top_floater(state, con);
            if container::is_floating(&state.common.tree, floater) {
                // A press on the title bar moves, a press on the border
                // resizes from the closest edges.
                let geometry = state.common.tree.container(floater).pending.geometry();
                let on_title_bar = local.y < f64::from(state.common.config.title_bar_height);
                if on_title_bar && !floating_modifier_held(state) {
                    move_floating::begin(state, floater);
                } else if floating_modifier_held(state) {
                    begin_floating_op(state, floater, event);
                } else {
                    let edges = super::edges_for_point(geometry, state.common.cursor.location);
                    resize_floating::begin(state, floater, edges);
                }
            }
        }
        None => {
            forward_button(state, event);
        }
    }
}

/// Mod+press: left button moves, any other resizes with computed edges.
fn begin_floating_op(state: &mut State, floater: NodeId, event: &ButtonEvent) {
    if event.button == BTN_LEFT {
        move_floating::begin(state, floater);
    } else {
        let geometry = state.common.tree.container(floater).pending.geometry();
        let edges = super::edges_for_point(geometry, state.common.cursor.location);
        resize_floating::begin(state, floater, edges);
    }
}

/// The top-level container of `con` on its workspace (floaters are always
/// top-level; tiled views may be nested in splits).
fn top_floater(state: &State, mut con: NodeId) -> NodeId {
    while let Some(parent) = state.common.tree.container(con).pending.parent {
        con = parent;
    }
    con
}

fn floating_modifier_held(state: &mut State) -> bool {
    state
        .common
        .seat
        .smithay
        .get_keyboard()
        .is_some_and(|kbd| kbd.modifier_state().logo)
}

pub fn pointer_motion(state: &mut State, time_msec: u32) {
    let location = state.common.cursor.location;
    let hit = cursor::node_at_coords(&state.common.tree, location);

    // An in-flight drag icon rides the cursor.
    if let Some((_, icon)) = &state.common.dnd_icon {
        let icon = *icon;
        state
            .common
            .tree
            .scene
            .set_position(icon, location.to_i32_round());
    }

    // Focus-follows-mouse.
    if state.common.config.focus_follows_mouse {
        let layer_interactive = match &hit {
            Some(Hit {
                target: HitTarget::Layer(surface),
                ..
            }) => state.layer_for_surface_global(surface)
                .is_some_and(|layer| {
                    use smithay::wayland::shell::wlr_layer::KeyboardInteractivity;
                    layer.cached_state().keyboard_interactivity
                        == KeyboardInteractivity::OnDemand
                }),
            _ => false,
        };
        let decision = cursor::follow_focus_decision(
            &state.common.tree,
            &state.common.cursor,
            hit.as_ref().map(|h| &h.target),
            layer_interactive,
        );
        match decision {
            FollowFocus::None => {}
            FollowFocus::Layer => {
                if let Some(Hit {
                    target: HitTarget::Layer(surface),
                    ..
                }) = &hit
                {
                    if let Some(layer) = state.layer_for_surface_global(surface) {
                        state.set_focus_layer(Some(layer));
                    }
                }
            }
            FollowFocus::OutputBoundary(output) => {
                let target = state
                    .common
                    .seat
                    .focus_stack
                    .focus_inactive_in(&state.common.tree, output);
                if let Some(target) = target {
                    let node = match state.common.tree.get(target).kind() {
                        NodeKind::Container | NodeKind::Workspace => Some(target),
                        _ => None,
                    };
                    state.set_focus(node);
                    state.commit_dirty();
                }
            }
            FollowFocus::View(container) => {
                state.set_focus(Some(container));
                state.commit_dirty();
            }
        }
    }

    // Remember what we hover for the next edge decision.
    state.common.cursor.previous_hover = hit.as_ref().and_then(|h| h.target.container());
    state.common.cursor.previous_output =
        crate::tree::root::output_at(&state.common.tree, location);

    forward_motion(state, hit, time_msec);
}

pub fn pointer_axis(state: &mut State, frame: AxisFrame) {
    let location = state.common.cursor.location;
    let hit = cursor::node_at_coords(&state.common.tree, location);

    // Scrolling on the title bar of a stacked/tabbed group switches tabs.
    if let Some(Hit {
        target: HitTarget::Container(con),
        local,
    }) = &hit
    {
        if local.y < f64::from(state.common.config.title_bar_height)
            && cycle_tab_group(state, *con, frame.axis.1 >= 0.0)
        {
            return;
        }
    }

    let pointer = state.pointer();
    pointer.axis(state, frame);
    pointer.frame(state);
}

/// If `con` sits in a stacked/tabbed group, advance that group's visible
/// child and focus it. Returns whether the scroll was consumed.
fn cycle_tab_group(state: &mut State, con: NodeId, forward: bool) -> bool {
    let tree = &state.common.tree;
    let (siblings, layout) = match tree.container(con).pending.parent {
        Some(parent) => {
            let parent_container = tree.container(parent);
            (
                parent_container.pending.children.clone(),
                parent_container.pending.layout,
            )
        }
        None => match tree.container(con).pending.workspace {
            Some(ws) => {
                let workspace = tree.workspace(ws);
                (workspace.pending.tiling.clone(), workspace.pending.layout)
            }
            None => return false,
        },
    };
    if !matches!(layout, Layout::Stacked | Layout::Tabbed) || siblings.len() < 2 {
        return false;
    }

    let current = siblings.iter().position(|&s| s == con).unwrap_or(0);
    let next = if forward {
        (current + 1) % siblings.len()
    } else {
        (current + siblings.len() - 1) % siblings.len()
    };
    let target = container::leaf_toward_focus(&state.common.tree, siblings[next]);
    state.set_focus(Some(target));
    state.commit_dirty();
    true
}

pub fn touch_down(
    state: &mut State,
    slot: smithay::backend::input::TouchSlot,
    position: Point<f64, Logical>,
    time_msec: u32,
) {
    let hit = cursor::node_at_coords(&state.common.tree, position);
    match hit {
        Some(Hit {
            target: HitTarget::View { container, surface },
            local,
        }) => {
            let leaf = container::leaf_toward_focus(&state.common.tree, container);
            state.set_focus(Some(leaf));
            state.commit_dirty();
            state.common.cursor.op = SeatOp::TouchDown(touch_down::Data {
                surface,
                slot,
                surface_origin: position - local,
                simulating_pointer: false,
            });
            touch_down::forward_down(state, slot, position, time_msec);
        }
        Some(Hit {
            target: HitTarget::Layer(surface) | HitTarget::LockSurface(surface),
            local,
        }) => {
            state.common.cursor.op = SeatOp::TouchDown(touch_down::Data {
                surface,
                slot,
                surface_origin: position - local,
                simulating_pointer: false,
            });
            touch_down::forward_down(state, slot, position, time_msec);
        }
        Some(Hit {
            target: HitTarget::Container(con),
            ..
        }) => {
            // Decorations take no touch; drive the pointer instead so taps
            // still focus and drag server-side chrome.
            let Some(surface) = state
                .common
                .tree
                .container(con)
                .view
                .as_ref()
                .and_then(|view| view.wl_surface())
            else {
                return;
            };
            state.common.cursor.simulating_pointer_from_touch = Some(slot);
            state.common.cursor.location = position;
            state.common.cursor.press_button(BTN_LEFT);
            state.common.cursor.op = SeatOp::TouchDown(touch_down::Data {
                surface,
                slot,
                surface_origin: position,
                simulating_pointer: true,
            });
            let serial = smithay::utils::SERIAL_COUNTER.next_serial();
            let pointer = state.pointer();
            pointer.motion(
                state,
                None,
                &MotionEvent {
                    location: position,
                    serial,
                    time: time_msec,
                },
            );
            let event = ButtonEvent {
                serial,
                time: time_msec,
                button: BTN_LEFT,
                state: ButtonState::Pressed,
            };
            pointer.button(state, &event);
            pointer.frame(state);
        }
        _ => {}
    }
}

fn forward_button(state: &mut State, event: &ButtonEvent) {
    let pointer = state.pointer();
    pointer.button(state, event);
    pointer.frame(state);
}

fn forward_motion(state: &mut State, hit: Option<Hit>, time_msec: u32) {
    let location = state.common.cursor.location;
    let focus = hit.and_then(|h| {
        let surface = match h.target {
            HitTarget::View { surface, .. } => surface,
            HitTarget::Layer(surface)
            | HitTarget::LockSurface(surface)
            | HitTarget::Popup(surface) => surface,
            // Server decorations: no client surface under the pointer.
            HitTarget::Container(_) => {
                state.common.cursor.image = CursorImageStatus::Named(CursorIcon::Default);
                return None;
            }
        };
        Some((surface, location - h.local))
    });

    let pointer = state.pointer();
    pointer.motion(
        state,
        focus,
        &MotionEvent {
            location,
            serial: smithay::utils::SERIAL_COUNTER.next_serial(),
            time: time_msec,
        },
    );
    pointer.frame(state);
}
