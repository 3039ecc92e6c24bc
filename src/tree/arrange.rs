//! The layout pass: walk the tree and recompute every node's pending
//! geometry from its layout and state.
//!
//! This only touches pending state (and marks nodes dirty); committing the
//! result to clients and to the scene graph is the transaction engine's job.

use smithay::utils::{Logical, Rectangle};

use super::container::{Border, FullscreenMode, Layout};
use super::{NodeId, Tree};
use crate::config::Config;

pub fn arrange_root(tree: &mut Tree, config: &Config) {
    super::root::update_geometry(tree);
    let outputs = tree.root_node().outputs.clone();
    for output in outputs {
        arrange_output(tree, output, config);
    }
    if let Some(fs) = tree.root_node().fullscreen_global {
        let geometry = tree.root_node().geometry;
        set_geometry(tree, fs, geometry);
        set_content_from_border(tree, fs, config, false);
    }
}

pub fn arrange_output(tree: &mut Tree, output: NodeId, config: &Config) {
    let output_box = tree.output(output).geometry();
    let usable = tree.output(output).usable_area;
    let workspaces = tree.output(output).workspace_manager.pending.workspaces.clone();
    for ws in workspaces {
        let gaps_outer = tree.workspace(ws).gaps_outer;
        let mut area = Rectangle::new(output_box.loc + usable.loc, usable.size);
        area.loc.x += gaps_outer;
        area.loc.y += gaps_outer;
        area.size.w = (area.size.w - 2 * gaps_outer).max(1);
        area.size.h = (area.size.h - 2 * gaps_outer).max(1);
        if tree.workspace(ws).pending.geometry != area {
            tree.workspace_mut(ws).pending.geometry = area;
            tree.set_dirty(ws);
        }
        arrange_workspace(tree, ws, config);
    }
}

pub fn arrange_workspace(tree: &mut Tree, ws: NodeId, config: &Config) {
    let area = tree.workspace(ws).pending.geometry;
    let layout = tree.workspace(ws).pending.layout;
    let gaps_inner = tree.workspace(ws).gaps_inner;
    let tiling = tree.workspace(ws).pending.tiling.clone();
    arrange_children(tree, &tiling, layout, area, gaps_inner, config, true);

    let floating = tree.workspace(ws).pending.floating.clone();
    for con in floating {
        arrange_container(tree, con, config);
    }

    // The fullscreen container overrides its layout allocation with the full
    // output box; clients get the whole extent, decorations none.
    if let Some(fs) = tree.workspace(ws).pending.fullscreen {
        let output_box = tree
            .workspace(ws)
            .output
            .map(|o| tree.output(o).geometry())
            .unwrap_or(area);
        set_geometry(tree, fs, output_box);
        set_content_from_border(tree, fs, config, false);
    }
}

/// Re-arrange a container inside its present allocation (used for floaters
/// and after interactive resize).
pub fn arrange_container(tree: &mut Tree, con: NodeId, config: &Config) {
    let area = tree.container(con).pending.geometry();
    arrange_container_within(tree, con, area, config, true);
}

/// Give `con` the rectangle `area` and lay out its interior.
fn arrange_container_within(
    tree: &mut Tree,
    con: NodeId,
    area: Rectangle<i32, Logical>,
    config: &Config,
    title_bar: bool,
) {
    set_geometry(tree, con, area);

    if tree.container(con).view.is_some() {
        set_content_from_border(tree, con, config, title_bar);
        return;
    }

    let layout = tree.container(con).pending.layout;
    let children = tree.container(con).pending.children.clone();
    // Split containers draw no border of their own; children fill the box.
    let gaps_inner = tree
        .workspace_of(con)
        .map(|ws| tree.workspace(ws).gaps_inner)
        .unwrap_or(0);
    arrange_children(tree, &children, layout, area, gaps_inner, config, title_bar);
}

fn arrange_children(
    tree: &mut Tree,
    children: &[NodeId],
    layout: Layout,
    area: Rectangle<i32, Logical>,
    gaps_inner: i32,
    config: &Config,
    title_bar: bool,
) {
    if children.is_empty() {
        return;
    }

    match layout {
        // An unset layout tiles like a horizontal row.
        Layout::None | Layout::Horizontal => {
            split_along(tree, children, area, gaps_inner, config, title_bar, true);
        }
        Layout::Vertical => {
            split_along(tree, children, area, gaps_inner, config, title_bar, false);
        }
        Layout::Stacked => {
            let strip = title_strip_height(tree, children, config);
            let strips = strip * children.len() as i32;
            let inner = Rectangle::new(
                (area.loc.x, area.loc.y + strips).into(),
                (area.size.w, (area.size.h - strips).max(1)).into(),
            );
            for &child in children {
                arrange_container_within(tree, child, inner, config, false);
            }
        }
        Layout::Tabbed => {
            let strip = title_strip_height(tree, children, config);
            let inner = Rectangle::new(
                (area.loc.x, area.loc.y + strip).into(),
                (area.size.w, (area.size.h - strip).max(1)).into(),
            );
            for &child in children {
                arrange_container_within(tree, child, inner, config, false);
            }
        }
    }
}

/// Distribute `area` among `children` proportionally to their stored
/// fractions along one axis; the last child absorbs the rounding error.
fn split_along(
    tree: &mut Tree,
    children: &[NodeId],
    area: Rectangle<i32, Logical>,
    gaps_inner: i32,
    config: &Config,
    title_bar: bool,
    horizontal: bool,
) {
    let n = children.len() as i32;
    let axis_total = if horizontal { area.size.w } else { area.size.h };
    let avail = (axis_total - gaps_inner * (n - 1)).max(n);
    let total_fraction: f64 = children.iter().map(|&c| tree.container(c).fraction).sum();

    let mut offset = 0;
    for (idx, &child) in children.iter().enumerate() {
        let last = idx == children.len() - 1;
        let share = if last {
            avail - offset
        } else {
            let fraction = tree.container(child).fraction;
            ((f64::from(avail) * fraction) / total_fraction) as i32
        };

        let child_area = if horizontal {
            Rectangle::new(
                (area.loc.x + offset + gaps_inner * idx as i32, area.loc.y).into(),
                (share.max(1), area.size.h).into(),
            )
        } else {
            Rectangle::new(
                (area.loc.x, area.loc.y + offset + gaps_inner * idx as i32).into(),
                (area.size.w, share.max(1)).into(),
            )
        };
        arrange_container_within(tree, child, child_area, config, title_bar);
        offset += share;
    }
}

/// Stacked/tabbed strip height. A lone view child that does not use normal
/// borders gets no strip.
fn title_strip_height(tree: &Tree, children: &[NodeId], config: &Config) -> i32 {
    if let [only] = children {
        let container = tree.container(*only);
        if container.view.is_some() && container.pending.border != Border::Normal {
            return 0;
        }
    }
    config.title_bar_height
}

fn set_geometry(tree: &mut Tree, con: NodeId, area: Rectangle<i32, Logical>) {
    if tree.container(con).pending.geometry() != area {
        tree.container_mut(con).pending.set_geometry(area);
        tree.set_dirty(con);
    }
}

/// Derive the content box from the border policy. Fullscreen containers and
/// stacked/tabbed members pass `title_bar = false`; their top edge has no
/// decoration of its own.
fn set_content_from_border(tree: &mut Tree, con: NodeId, config: &Config, title_bar: bool) {
    let (rect, border, thickness, fullscreen) = {
        let state = &tree.container(con).pending;
        (
            state.geometry(),
            state.border,
            state.border_thickness,
            state.fullscreen_mode != FullscreenMode::None,
        )
    };

    let (top, side, bottom) = if fullscreen {
        (0, 0, 0)
    } else {
        match border {
            Border::Normal => {
                let top = if title_bar { config.title_bar_height } else { thickness };
                (top, thickness, thickness)
            }
            Border::Pixel => (thickness, thickness, thickness),
            Border::None | Border::Csd => (0, 0, 0),
        }
    };

    let state = &mut tree.container_mut(con).pending;
    let content_x = rect.loc.x + side;
    let content_y = rect.loc.y + top;
    let content_width = (rect.size.w - 2 * side).max(1);
    let content_height = (rect.size.h - top - bottom).max(1);
    if (state.content_x, state.content_y, state.content_width, state.content_height)
        != (content_x, content_y, content_width, content_height)
    {
        state.content_x = content_x;
        state.content_y = content_y;
        state.content_width = content_width;
        state.content_height = content_height;
        tree.set_dirty(con);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_support::tree_with_output;
    use crate::tree::{container, workspace};

    fn leaf_with_border(tree: &mut Tree, border: Border) -> NodeId {
        let con = container::create_split(tree, Layout::None);
        tree.container_mut(con).pending.border = border;
        con
    }

    #[test]
    fn horizontal_rounding_error_goes_to_the_last_child() {
        let (mut tree, _output, ws) = tree_with_output();
        let config = Config::default();
        for _ in 0..3 {
            let con = leaf_with_border(&mut tree, Border::None);
            workspace::add_tiling(&mut tree, ws, con);
        }
        // 1000 px across three equal children: 333 + 333 + 334.
        tree.workspace_mut(ws).pending.geometry =
            Rectangle::new((0, 0).into(), (1000, 500).into());
        arrange_workspace(&mut tree, ws, &config);

        let widths: Vec<i32> = tree.workspace(ws).pending.tiling.clone()
            .iter()
            .map(|&c| tree.container(c).pending.width)
            .collect();
        assert_eq!(widths, vec![333, 333, 334]);
        let total: i32 = widths.iter().sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn fractions_weight_the_split() {
        let (mut tree, _output, ws) = tree_with_output();
        let config = Config::default();
        let a = leaf_with_border(&mut tree, Border::None);
        let b = leaf_with_border(&mut tree, Border::None);
        workspace::add_tiling(&mut tree, ws, a);
        workspace::add_tiling(&mut tree, ws, b);
        tree.container_mut(a).fraction = 3.0;

        tree.workspace_mut(ws).pending.geometry =
            Rectangle::new((0, 0).into(), (1200, 600).into());
        arrange_workspace(&mut tree, ws, &config);

        assert_eq!(tree.container(a).pending.width, 900);
        assert_eq!(tree.container(b).pending.width, 300);
    }

    #[test]
    fn inner_gaps_come_out_of_the_children() {
        let (mut tree, _output, ws) = tree_with_output();
        let config = Config::default();
        tree.workspace_mut(ws).gaps_inner = 10;
        let a = leaf_with_border(&mut tree, Border::None);
        let b = leaf_with_border(&mut tree, Border::None);
        workspace::add_tiling(&mut tree, ws, a);
        workspace::add_tiling(&mut tree, ws, b);

        tree.workspace_mut(ws).pending.geometry =
            Rectangle::new((0, 0).into(), (1010, 600).into());
        arrange_workspace(&mut tree, ws, &config);

        assert_eq!(tree.container(a).pending.width, 500);
        assert_eq!(tree.container(b).pending.width, 500);
        assert_eq!(tree.container(b).pending.x, 510);
    }

    #[test]
    fn stacked_children_share_the_rect_below_the_strips() {
        let (mut tree, _output, ws) = tree_with_output();
        let config = Config::default();
        workspace::set_layout(&mut tree, ws, Layout::Stacked);
        let a = leaf_with_border(&mut tree, Border::Normal);
        let b = leaf_with_border(&mut tree, Border::Normal);
        workspace::add_tiling(&mut tree, ws, a);
        workspace::add_tiling(&mut tree, ws, b);

        tree.workspace_mut(ws).pending.geometry =
            Rectangle::new((0, 0).into(), (800, 600).into());
        arrange_workspace(&mut tree, ws, &config);

        // Two strips of 24 px each.
        for &con in &[a, b] {
            let state = &tree.container(con).pending;
            assert_eq!((state.x, state.y), (0, 48));
            assert_eq!((state.width, state.height), (800, 552));
        }
    }

    #[test]
    fn tabbed_children_share_one_strip() {
        let (mut tree, _output, ws) = tree_with_output();
        let config = Config::default();
        workspace::set_layout(&mut tree, ws, Layout::Tabbed);
        let a = leaf_with_border(&mut tree, Border::Normal);
        let b = leaf_with_border(&mut tree, Border::Normal);
        workspace::add_tiling(&mut tree, ws, a);
        workspace::add_tiling(&mut tree, ws, b);

        tree.workspace_mut(ws).pending.geometry =
            Rectangle::new((0, 0).into(), (800, 600).into());
        arrange_workspace(&mut tree, ws, &config);

        for &con in &[a, b] {
            let state = &tree.container(con).pending;
            assert_eq!((state.y, state.height), (24, 576));
        }
    }

    #[test]
    fn content_box_honors_the_border_policy() {
        let (mut tree, _output, ws) = tree_with_output();
        let config = Config::default();
        let con = leaf_with_border(&mut tree, Border::Pixel);
        workspace::add_floating(&mut tree, ws, con);
        tree.container_mut(con)
            .pending
            .set_geometry(Rectangle::new((100, 100).into(), (400, 300).into()));
        arrange_container(&mut tree, con, &config);

        let state = &tree.container(con).pending;
        assert_eq!(
            state.content_box(),
            Rectangle::new((102, 102).into(), (396, 296).into())
        );

        tree.container_mut(con).pending.border = Border::Csd;
        arrange_container(&mut tree, con, &config);
        let state = &tree.container(con).pending;
        assert_eq!(state.content_box(), state.geometry());
    }

    #[test]
    fn retiling_takes_the_layout_allocation_not_the_floating_size() {
        let (mut tree, _output, ws) = tree_with_output();
        let config = Config::default();
        let a = leaf_with_border(&mut tree, Border::None);
        let b = leaf_with_border(&mut tree, Border::None);
        workspace::add_tiling(&mut tree, ws, a);
        workspace::add_tiling(&mut tree, ws, b);
        tree.workspace_mut(ws).pending.geometry =
            Rectangle::new((0, 0).into(), (1000, 500).into());
        arrange_workspace(&mut tree, ws, &config);

        container::set_floating(&mut tree, b, true);
        tree.container_mut(b)
            .pending
            .set_geometry(Rectangle::new((7, 7).into(), (123, 77).into()));
        arrange_workspace(&mut tree, ws, &config);
        assert_eq!(tree.container(a).pending.width, 1000);

        container::set_floating(&mut tree, b, false);
        arrange_workspace(&mut tree, ws, &config);
        assert_eq!(tree.container(a).pending.width, 500);
        assert_eq!(tree.container(b).pending.width, 500);
        assert_eq!(tree.container(b).pending.x, 500);
    }

    #[test]
    fn workspace_fullscreen_takes_the_whole_output() {
        let (mut tree, _output, ws) = tree_with_output();
        let config = Config::default();
        let con = leaf_with_border(&mut tree, Border::Normal);
        workspace::add_tiling(&mut tree, ws, con);
        arrange_root(&mut tree, &config);

        container::set_fullscreen(&mut tree, con, FullscreenMode::Workspace);
        arrange_root(&mut tree, &config);

        let state = &tree.container(con).pending;
        assert_eq!(
            state.geometry(),
            Rectangle::new((0, 0).into(), (1920, 1080).into())
        );
        assert_eq!(state.content_box(), state.geometry());
    }
}
