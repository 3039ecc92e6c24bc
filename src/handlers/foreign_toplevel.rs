//! ext-foreign-toplevel-list: taskbars and docks observing toplevels.

use smithay::delegate_foreign_toplevel_list;
use smithay::wayland::foreign_toplevel_list::{
    ForeignToplevelListHandler, ForeignToplevelListState,
};

use crate::state::State;
use crate::tree::NodeId;

impl ForeignToplevelListHandler for State {
    fn foreign_toplevel_list_state(&mut self) -> &mut ForeignToplevelListState {
        &mut self.common.foreign_toplevel_list_state
    }
}

impl State {
    /// Keep the published identity of a view in sync with its title/app-id.
    pub fn refresh_foreign_toplevel(&mut self, node: NodeId) {
        let Some(view) = self.common.tree.container(node).view.as_ref() else {
            return;
        };
        let Some(handle) = view.foreign_handle.as_ref() else {
            return;
        };
        let title = view.title().unwrap_or_default();
        let app_id = view.app_id().unwrap_or_default();
        handle.send_title(&title);
        handle.send_app_id(&app_id);
        handle.send_done();
    }
}

delegate_foreign_toplevel_list!(State);
