//! The udev backend: DRM/KMS outputs from a libseat session.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use anyhow::Context;
use smithay::backend::allocator::dmabuf::Dmabuf;
use smithay::backend::allocator::gbm::GbmAllocator;
use smithay::backend::allocator::Fourcc;
use smithay::backend::drm::compositor::{FrameFlags, RenderFrameError};
use smithay::backend::drm::output::{DrmOutput, DrmOutputManager, DrmOutputRenderElements};
use smithay::backend::drm::{
    DrmAccessError, DrmDevice, DrmDeviceFd, DrmError, DrmEvent, DrmEventMetadata, DrmEventTime,
    DrmNode, NodeType,
};
use smithay::backend::egl::{EGLDevice, EGLDisplay};
use smithay::backend::input::InputEvent;
use smithay::backend::libinput::{LibinputInputBackend, LibinputSessionInterface};
use smithay::backend::renderer::damage::Error as OutputDamageTrackerError;
use smithay::backend::renderer::glow::GlowRenderer;
use smithay::backend::renderer::multigpu::gbm::GbmGlesBackend;
use smithay::backend::renderer::multigpu::{GpuManager, MultiRenderer};
use smithay::backend::renderer::{ImportDma, ImportEgl, ImportMemWl};
use smithay::backend::session::libseat::LibSeatSession;
use smithay::backend::session::{Event as SessionEvent, Session};
use smithay::backend::udev::{self, UdevBackend, UdevEvent};
use smithay::backend::SwapBuffersError;
use smithay::output::{Mode as OutputMode, Output, PhysicalProperties, Subpixel};
use smithay::reexports::calloop::{Dispatcher, RegistrationToken};
use smithay::reexports::drm::control::connector::{
    Handle as ConnectorHandle, Info as ConnectorInfo,
};
use smithay::reexports::drm::control::crtc::Handle as CrtcHandle;
use smithay::reexports::drm::control::{Device as ControlDevice, ModeTypeFlags};
use smithay::reexports::gbm::{BufferObjectFlags, Device as GbmDevice};
use smithay::reexports::input::{DeviceCapability, Libinput};
use smithay::reexports::rustix::fs::OFlags;
use smithay::reexports::wayland_protocols::wp::presentation_time::server::wp_presentation_feedback;
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::utils::{DeviceFd, Transform};
use smithay::wayland::dmabuf::{DmabufFeedbackBuilder, DmabufGlobal, ImportNotifier};
use smithay::wayland::drm_lease::{DrmLease, DrmLeaseState};
use smithay_drm_extras::display_info;
use smithay_drm_extras::drm_scanner::{DrmScanEvent, DrmScanner};

use crate::output::RedrawState;
use crate::output_config::{ModeRequest, PendingOutputState};
use crate::state::{Common, State};
use crate::utils::get_monotonic_time;

pub type UdevRenderer<'a> = MultiRenderer<
    'a,
    'a,
    GbmGlesBackend<GlowRenderer, DrmDeviceFd>,
    GbmGlesBackend<GlowRenderer, DrmDeviceFd>,
>;

const SUPPORTED_FORMATS: &[Fourcc] = &[
    Fourcc::Abgr2101010,
    Fourcc::Argb2101010,
    Fourcc::Abgr8888,
    Fourcc::Argb8888,
];

pub struct UdevData {
    pub session: LibSeatSession,
    pub primary_gpu: DrmNode,
    pub primary_node: DrmNode,
    pub gpu_manager: GpuManager<GbmGlesBackend<GlowRenderer, DrmDeviceFd>>,
    pub devices: HashMap<DrmNode, Device>,
    dmabuf_global: Option<DmabufGlobal>,
    _registration_tokens: Vec<RegistrationToken>,
}

pub struct Device {
    drm_output_manager:
        DrmOutputManager<GbmAllocator<DrmDeviceFd>, GbmDevice<DrmDeviceFd>, (), DrmDeviceFd>,
    drm_scanner: DrmScanner,
    surfaces: HashMap<CrtcHandle, Surface>,
    pub non_desktop_connectors: Vec<(ConnectorHandle, CrtcHandle)>,
    pub lease_state: Option<DrmLeaseState>,
    pub active_leases: Vec<DrmLease>,
    render_node: DrmNode,
    registration_token: RegistrationToken,
}

impl Device {
    pub fn drm(&self) -> &DrmDevice {
        self.drm_output_manager.device()
    }
}

pub struct Surface {
    output: Output,
    drm_output: DrmOutput<GbmAllocator<DrmDeviceFd>, GbmDevice<DrmDeviceFd>, (), DrmDeviceFd>,
    connector: ConnectorInfo,
    render_node: DrmNode,
    /// Gamma change pending apply on the next frame: `Some(Some(ramp))`
    /// sets a ramp, `Some(None)` resets to linear.
    pub pending_gamma: Option<Option<Vec<u16>>>,
}

impl UdevData {
    pub fn new(common: &mut Common) -> anyhow::Result<Self> {
        let (session, notifier) =
            LibSeatSession::new().context("Failed to create a libseat session")?;
        let seat_name = session.seat();

        let udev_backend = UdevBackend::new(&seat_name).context("Failed to create udev backend")?;
        let udev_dispatcher =
            Dispatcher::new(udev_backend, |event, (), state: &mut State| match event {
                UdevEvent::Added { device_id, path } => {
                    if let Err(err) = state.backend.udev().device_added(
                        device_id,
                        &path,
                        &mut state.common,
                    ) {
                        error!(?err, "Failed to add device");
                    }
                    state.reconfigure_outputs();
                }
                UdevEvent::Changed { device_id } => {
                    if let Err(err) = state
                        .backend
                        .udev()
                        .device_changed(device_id, &mut state.common)
                    {
                        error!(?err, "Failed to update device");
                    }
                    state.reconfigure_outputs();
                }
                UdevEvent::Removed { device_id } => {
                    if let Err(err) = state
                        .backend
                        .udev()
                        .device_removed(device_id, &mut state.common)
                    {
                        error!(?err, "Failed to remove device");
                    }
                    state.reconfigure_outputs();
                }
            });
        let udev_token = common
            .loop_handle
            .register_dispatcher(udev_dispatcher.clone())
            .map_err(|err| anyhow::anyhow!("Failed to register udev dispatcher: {err}"))?;

        let mut libinput_context = Libinput::new_with_udev::<
            LibinputSessionInterface<LibSeatSession>,
        >(session.clone().into());
        libinput_context
            .udev_assign_seat(&seat_name)
            .map_err(|_| anyhow::anyhow!("Failed to assign libinput seat"))?;
        let libinput_backend = LibinputInputBackend::new(libinput_context.clone());

        let libinput_token = common
            .loop_handle
            .insert_source(libinput_backend, move |mut event, _, state| {
                if let InputEvent::DeviceAdded { device } = &mut event {
                    if device.has_capability(DeviceCapability::Keyboard) {
                        if let Some(keyboard) = state.common.seat.smithay.get_keyboard() {
                            device.led_update(keyboard.led_state().into());
                        }
                    }
                }
                state.process_input_event(event);
            })
            .map_err(|_| anyhow::anyhow!("Failed to insert libinput event source"))?;

        let session_token = common
            .loop_handle
            .insert_source(notifier, move |event, &mut (), state| match event {
                SessionEvent::PauseSession => {
                    debug!("Pausing session");
                    libinput_context.suspend();
                    for device in state.backend.udev().devices.values_mut() {
                        device.drm_output_manager.pause();
                        device.active_leases.clear();
                        if let Some(lease_state) = device.lease_state.as_mut() {
                            lease_state.suspend();
                        }
                    }
                }
                SessionEvent::ActivateSession => {
                    debug!("Resuming session");
                    if let Err(err) = libinput_context.resume() {
                        error!(?err, "Failed to resume libinput context");
                    }
                    for device in state.backend.udev().devices.values_mut() {
                        if let Err(err) = device.drm_output_manager.activate(false) {
                            error!(?err, "Failed to activate DRM");
                        }
                        if let Some(lease_state) = device.lease_state.as_mut() {
                            lease_state.resume::<State>();
                        }
                        if let Err(err) = device.drm_output_manager.device_mut().reset_state() {
                            warn!(?err, "Failed to reset drm surface state");
                        }
                    }
                    state.queue_redraw_all();
                }
            })
            .map_err(|_| anyhow::anyhow!("Failed to insert libseat event source"))?;

        let gpu_manager =
            GpuManager::new(GbmGlesBackend::default()).context("Failed to init GPU manager")?;

        let primary_node = udev::primary_gpu(&seat_name)
            .ok()
            .flatten()
            .and_then(|path| DrmNode::from_path(path).ok())
            .context("Failed to get primary GPU")?;
        let primary_gpu = primary_node
            .node_with_type(NodeType::Render)
            .and_then(Result::ok)
            .unwrap_or(primary_node);
        info!(?primary_gpu, ?primary_node, "Found primary GPU");

        let mut data = UdevData {
            session,
            primary_gpu,
            primary_node,
            gpu_manager,
            devices: HashMap::new(),
            dmabuf_global: None,
            _registration_tokens: vec![udev_token, session_token, libinput_token],
        };

        for (device_id, path) in udev_dispatcher.as_source_ref().device_list() {
            if let Err(err) = data.device_added(device_id, path, common) {
                error!(?err, "Failed to add device");
            }
        }

        let mut renderer = data
            .gpu_manager
            .single_renderer(&primary_gpu)
            .context("No renderer for primary GPU")?;
        common.shm_state.update_formats(renderer.shm_formats());

        Ok(data)
    }

    pub fn dmabuf_imported(&mut self, dmabuf: &Dmabuf, notifier: ImportNotifier) {
        if self
            .gpu_manager
            .single_renderer(&self.primary_gpu)
            .and_then(|mut renderer| renderer.import_dmabuf(dmabuf, None))
            .is_ok()
        {
            let _ = notifier.successful::<State>();
        } else {
            notifier.failed();
        }
    }

    pub fn early_import(&mut self, surface: &WlSurface) {
        if let Err(err) = self.gpu_manager.early_import(self.primary_gpu, surface) {
            warn!(?err, "Failed to early import buffer");
        }
    }

    /// Connector modes, preferred mode, and panel orientation for the
    /// output-configuration pipeline.
    pub fn connector_modes(
        &self,
        common: &Common,
        node: crate::tree::NodeId,
    ) -> (Vec<OutputMode>, Option<OutputMode>, Option<Transform>) {
        let output = &common.tree.output(node).output;
        for device in self.devices.values() {
            if let Some(surface) = device.surfaces.values().find(|s| &s.output == output) {
                let modes: Vec<OutputMode> = surface
                    .connector
                    .modes()
                    .iter()
                    .map(|m| OutputMode::from(*m))
                    .collect();
                let preferred = surface
                    .connector
                    .modes()
                    .iter()
                    .find(|m| m.mode_type().contains(ModeTypeFlags::PREFERRED))
                    .or_else(|| surface.connector.modes().first())
                    .map(|m| OutputMode::from(*m));
                return (modes, preferred, None);
            }
        }
        (Vec::new(), None, None)
    }

    fn device_added(
        &mut self,
        device_id: libc::dev_t,
        path: &Path,
        common: &mut Common,
    ) -> anyhow::Result<()> {
        if !self.session.is_active() {
            return Ok(());
        }
        debug!(?device_id, ?path, "Adding DRM device");
        let device_node = DrmNode::from_dev_id(device_id)?;

        let oflags = OFlags::RDWR | OFlags::CLOEXEC | OFlags::NOCTTY | OFlags::NONBLOCK;
        let fd = self.session.open(path, oflags)?;
        let fd = DrmDeviceFd::new(DeviceFd::from(fd));
        let (drm, drm_notifier) = DrmDevice::new(fd.clone(), true)?;
        let gbm = GbmDevice::new(fd)?;

        let registration_token = common
            .loop_handle
            .insert_source(drm_notifier, move |event, metadata, state| match event {
                DrmEvent::VBlank(crtc) => {
                    let metadata = metadata.as_mut().expect("vblank events carry metadata");
                    state.on_udev_vblank(device_node, crtc, metadata);
                }
                DrmEvent::Error(err) => {
                    error!(?err, "Failed to process DRM events");
                }
            })
            .map_err(|_| anyhow::anyhow!("Failed to insert DRM event source"))?;

        let render_node =
            EGLDevice::device_for_display(&unsafe { EGLDisplay::new(gbm.clone())? })
                .ok()
                .and_then(|x| x.try_get_render_node().ok().flatten())
                .unwrap_or(device_node);
        self.gpu_manager
            .as_mut()
            .add_node(render_node, gbm.clone())
            .context("Failed to add GBM device to GPU manager")?;

        let allocator = GbmAllocator::new(
            gbm.clone(),
            BufferObjectFlags::RENDERING | BufferObjectFlags::SCANOUT,
        );
        let mut renderer = self
            .gpu_manager
            .single_renderer(&render_node)
            .context("No renderer for device")?;
        let render_formats = renderer
            .as_mut()
            .egl_context()
            .dmabuf_render_formats()
            .clone();

        let drm_output_manager = DrmOutputManager::new(
            drm,
            allocator,
            gbm.clone(),
            Some(gbm),
            SUPPORTED_FORMATS.iter().copied(),
            render_formats,
        );

        if device_node == self.primary_node {
            match renderer.bind_wl_display(&common.display_handle) {
                Ok(_) => info!("EGL hardware-acceleration enabled"),
                Err(err) => warn!(?err, "Failed to initialize EGL hardware-acceleration"),
            }
            let dmabuf_formats = renderer.dmabuf_formats();
            let default_feedback =
                DmabufFeedbackBuilder::new(device_node.dev_id(), dmabuf_formats)
                    .build()
                    .context("Failed to create dmabuf feedback")?;
            let global = common
                .dmabuf_state
                .create_global_with_default_feedback::<State>(
                    &common.display_handle,
                    &default_feedback,
                );
            self.dmabuf_global = Some(global);
        }

        self.devices.insert(
            device_node,
            Device {
                drm_output_manager,
                drm_scanner: DrmScanner::new(),
                surfaces: HashMap::new(),
                non_desktop_connectors: Vec::new(),
                lease_state: DrmLeaseState::new::<State>(&common.display_handle, &device_node)
                    .map_err(|err| warn!(?err, "Failed to initialize DRM lease state"))
                    .ok(),
                active_leases: Vec::new(),
                render_node,
                registration_token,
            },
        );

        self.device_changed(device_id, common)?;
        Ok(())
    }

    fn device_changed(&mut self, device_id: libc::dev_t, common: &mut Common) -> anyhow::Result<()> {
        if !self.session.is_active() {
            return Ok(());
        }
        let device_node = DrmNode::from_dev_id(device_id)?;
        let Some(device) = self.devices.get_mut(&device_node) else {
            warn!(?device_node, "device_changed on unknown device");
            return Ok(());
        };

        let Ok(result) = device
            .drm_scanner
            .scan_connectors(device.drm_output_manager.device())
            .inspect_err(|err| warn!(?err, "Failed to scan connectors"))
        else {
            return Ok(());
        };
        for event in result {
            match event {
                DrmScanEvent::Connected {
                    connector,
                    crtc: Some(crtc),
                } => {
                    if let Err(err) = self.connector_connected(device_node, connector, crtc, common)
                    {
                        error!(?crtc, ?err, "Failed to add connector to device");
                    }
                }
                DrmScanEvent::Disconnected {
                    connector,
                    crtc: Some(crtc),
                } => {
                    if let Err(err) =
                        self.connector_disconnected(device_node, connector, crtc, common)
                    {
                        error!(?crtc, ?err, "Failed to remove connector from device");
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn device_removed(&mut self, device_id: libc::dev_t, common: &mut Common) -> anyhow::Result<()> {
        let device_node = DrmNode::from_dev_id(device_id)?;
        let Some(mut device) = self.devices.remove(&device_node) else {
            warn!(?device_node, "device_removed on unknown device");
            return Ok(());
        };

        let crtcs: Vec<_> = device
            .drm_scanner
            .crtcs()
            .map(|(info, crtc)| (info.clone(), crtc))
            .collect();
        self.devices.insert(device_node, device);
        for (connector, crtc) in crtcs {
            let _ = self.connector_disconnected(device_node, connector, crtc, common);
        }
        let mut device = self.devices.remove(&device_node).expect("just inserted");

        if let Some(mut lease_state) = device.lease_state.take() {
            lease_state.disable_global::<State>();
        }
        self.gpu_manager.as_mut().remove_node(&device.render_node);
        common.loop_handle.remove(device.registration_token);
        Ok(())
    }

    fn connector_connected(
        &mut self,
        device_node: DrmNode,
        connector: ConnectorInfo,
        crtc: CrtcHandle,
        common: &mut Common,
    ) -> anyhow::Result<()> {
        let Some(device) = self.devices.get_mut(&device_node) else {
            anyhow::bail!("connector_connected on unknown device");
        };
        let output_name = format!(
            "{}-{}",
            connector.interface().as_str(),
            connector.interface_id()
        );
        debug!(?crtc, output = output_name, "Connector connected");

        let drm_device = device.drm_output_manager.device();
        let non_desktop = drm_device
            .get_properties(connector.handle())
            .ok()
            .and_then(|props| {
                let (ids, vals) = props.as_props_and_values();
                ids.iter().zip(vals).find_map(|(&id, &val)| {
                    let info = drm_device.get_property(id).ok()?;
                    (info.name().to_str() == Ok("non-desktop"))
                        .then(|| info.value_type().convert_value(val).as_boolean())
                        .flatten()
                })
            })
            .unwrap_or(false);

        let display_info = display_info::for_connector(drm_device, connector.handle());
        let make = display_info
            .as_ref()
            .and_then(|info| info.make())
            .unwrap_or_else(|| "Unknown".into());
        let model = display_info
            .as_ref()
            .and_then(|info| info.model())
            .unwrap_or_else(|| "Unknown".into());

        if non_desktop {
            debug!(output = output_name, "Setting up connector for leasing");
            device.non_desktop_connectors.push((connector.handle(), crtc));
            if let Some(lease_state) = device.lease_state.as_mut() {
                lease_state.add_connector::<State>(
                    connector.handle(),
                    output_name,
                    format!("{make} {model}"),
                );
            }
            return Ok(());
        }

        let mode = connector
            .modes()
            .iter()
            .find(|m| m.mode_type().contains(ModeTypeFlags::PREFERRED))
            .or_else(|| connector.modes().first())
            .copied()
            .context("Connector advertises no modes")?;

        let (physical_width, physical_height) = connector.size().unwrap_or((0, 0));
        let output = Output::new(
            output_name,
            PhysicalProperties {
                size: (physical_width as i32, physical_height as i32).into(),
                subpixel: Subpixel::Unknown,
                make,
                model,
            },
        );
        let output_mode = OutputMode::from(mode);
        output.set_preferred(output_mode);
        output.change_current_state(Some(output_mode), None, None, None);

        let mut renderer = self
            .gpu_manager
            .single_renderer(&device.render_node)
            .context("No renderer for device")?;
        let drm_output = device
            .drm_output_manager
            .initialize_output::<_, crate::renderer::SceneRenderElement<UdevRenderer<'_>>>(
                crtc,
                mode,
                &[connector.handle()],
                &output,
                None,
                &mut renderer,
                &DrmOutputRenderElements::default(),
            )
            .context("Failed to create DRM output")?;

        let refresh_mhz = output_mode.refresh;
        device.surfaces.insert(
            crtc,
            Surface {
                output: output.clone(),
                drm_output,
                connector,
                render_node: device.render_node,
                pending_gamma: None,
            },
        );

        // The tree side: node creation, enable, workspace assignment.
        state_add_output(common, output, refresh_mhz);
        Ok(())
    }

    fn connector_disconnected(
        &mut self,
        device_node: DrmNode,
        connector: ConnectorInfo,
        crtc: CrtcHandle,
        common: &mut Common,
    ) -> anyhow::Result<()> {
        let Some(device) = self.devices.get_mut(&device_node) else {
            anyhow::bail!("connector_disconnected on unknown device");
        };
        debug!(?crtc, "Connector disconnected");

        if let Some(idx) = device
            .non_desktop_connectors
            .iter()
            .position(|(handle, _)| *handle == connector.handle())
        {
            let (handle, _) = device.non_desktop_connectors.remove(idx);
            if let Some(lease_state) = device.lease_state.as_mut() {
                lease_state.withdraw_connector(handle);
            }
            return Ok(());
        }

        let Some(surface) = device.surfaces.remove(&crtc) else {
            return Ok(());
        };
        state_remove_output(common, &surface.output);
        Ok(())
    }

    /// Render one output and queue the frame for the next vblank.
    pub fn render(&mut self, common: &mut Common, output: &Output) -> anyhow::Result<bool> {
        let Some((device_node, crtc)) = self.devices.iter().find_map(|(node, device)| {
            device
                .surfaces
                .iter()
                .find(|(_, s)| &s.output == output)
                .map(|(crtc, _)| (*node, *crtc))
        }) else {
            anyhow::bail!("No surface matching output");
        };

        let device = self.devices.get_mut(&device_node).expect("looked up");
        if !device.drm_output_manager.device().is_active() {
            anyhow::bail!("DRM device is not active");
        }
        let surface = device.surfaces.get_mut(&crtc).expect("looked up");

        // A pending gamma change applies with this frame; failure
        // invalidates the client's control.
        if let Some(change) = surface.pending_gamma.take() {
            if let Err(err) =
                apply_gamma(device.drm_output_manager.device(), crtc, change.as_deref())
            {
                warn!(?err, "Failed to apply gamma ramp");
                crate::handlers::gamma_control::notify_gamma_failed(common, output);
            }
            if let Some(node) = common.output_node(output) {
                common.tree.output_mut(node).gamma_lut_changed = false;
            }
        }

        let mut renderer = if surface.render_node == self.primary_gpu {
            self.gpu_manager.single_renderer(&surface.render_node)
        } else {
            let format = surface.drm_output.format();
            self.gpu_manager
                .renderer(&self.primary_gpu, &surface.render_node, format)
        }
        .map_err(|err| anyhow::anyhow!("Failed to get renderer: {err}"))?;

        let elements = crate::renderer::scene_elements(&mut renderer, &common.tree, output);

        let res = surface.drm_output.render_frame(
            &mut renderer,
            &elements,
            [0.05, 0.05, 0.05, 1.0],
            FrameFlags::DEFAULT,
        );
        let res = match res {
            Ok(res) => res,
            Err(RenderFrameError::RenderFrame(OutputDamageTrackerError::Rendering(err))) => {
                return Err(SwapBuffersError::from(err).into());
            }
            Err(err) => anyhow::bail!("Failed to render frame: {err:?}"),
        };

        let mut rendered = false;
        if !res.is_empty {
            match surface.drm_output.queue_frame(()) {
                Ok(()) => {
                    let output_state = common
                        .output_state
                        .get_mut(output)
                        .expect("output has runtime state");
                    let new_state = RedrawState::WaitingForVblank { queued: false };
                    match std::mem::replace(&mut output_state.redraw_state, new_state) {
                        RedrawState::Queued => (),
                        RedrawState::WaitingForEstimatedVblankTimer { token, .. } => {
                            common.loop_handle.remove(token);
                        }
                        _ => (),
                    }
                    output_state.current_frame_sequence =
                        output_state.current_frame_sequence.wrapping_add(1);
                    rendered = true;
                }
                Err(err) => match SwapBuffersError::from(err) {
                    SwapBuffersError::ContextLost(err) => {
                        anyhow::bail!("Rendering loop lost: {err}")
                    }
                    SwapBuffersError::TemporaryFailure(err) => {
                        match err.downcast_ref::<DrmError>() {
                            Some(DrmError::DeviceInactive) => (),
                            Some(DrmError::Access(DrmAccessError { source, .. }))
                                if source.kind() == io::ErrorKind::PermissionDenied => {}
                            _ => anyhow::bail!("Failed to queue frame: {err:?}"),
                        }
                    }
                    SwapBuffersError::AlreadySwapped => (),
                },
            }
        }
        Ok(rendered)
    }

    fn frame_submitted(
        &mut self,
        device_node: DrmNode,
        crtc: CrtcHandle,
    ) -> Option<(&mut Surface, Result<(), SwapBuffersError>)> {
        let device = self.devices.get_mut(&device_node)?;
        let surface = device.surfaces.get_mut(&crtc)?;
        let res = surface
            .drm_output
            .frame_submitted()
            .map(|_| ())
            .map_err(Into::into);
        Some((surface, res))
    }
}

impl State {
    fn on_udev_vblank(
        &mut self,
        device_node: DrmNode,
        crtc: CrtcHandle,
        metadata: &mut DrmEventMetadata,
    ) {
        let now = get_monotonic_time();
        let presentation_time = match metadata.time {
            DrmEventTime::Monotonic(tp) if !tp.is_zero() => tp,
            _ => now,
        };

        let Some((surface, res)) = self.backend.udev().frame_submitted(device_node, crtc) else {
            warn!(?crtc, "VBlank for unknown surface");
            return;
        };
        if let Err(err) = res {
            warn!(?err, "Error marking frame as submitted");
        }
        let output = surface.output.clone();

        let redraw_queued = {
            let Some(output_state) = self.common.output_state.get_mut(&output) else {
                return;
            };
            let queued = match std::mem::replace(&mut output_state.redraw_state, RedrawState::Idle)
            {
                RedrawState::WaitingForVblank { queued } => queued,
                _ => false,
            };
            output_state.frame_clock.present(presentation_time);
            queued
        };

        let seq = u64::from(metadata.sequence);
        self.presentation_feedback(&output, presentation_time, seq, {
            wp_presentation_feedback::Kind::Vsync | wp_presentation_feedback::Kind::HwCompletion
        });

        // Clients displayed this frame; give them frame events, throttled by
        // the per-view render-time windows.
        self.send_frames(&output);

        if redraw_queued {
            self.queue_redraw(&output);
        }
    }
}

fn state_add_output(common: &mut Common, output: Output, refresh_mhz: i32) {
    common.output_state.insert(
        output.clone(),
        crate::output::OutputState::new(crate::frame_clock::FrameClock::from_refresh_mhz(
            refresh_mhz,
        )),
    );
    let node = crate::tree::output::create(&mut common.tree, output);
    crate::tree::output::enable(&mut common.tree, node, &common.config);
    crate::tree::arrange::arrange_root(&mut common.tree, &common.config);
}

fn state_remove_output(common: &mut Common, output: &Output) {
    if let Some(node) = common.output_node(output) {
        crate::tree::output::begin_destroy(&mut common.tree, node);
    }

    // Workspaces orphaned by the evacuation die unless something pins them.
    let stacks: Vec<crate::tree::NodeId> = common.seat.focus_stack.iter().collect();
    let workspaces: Vec<crate::tree::NodeId> = common
        .tree
        .node_ids()
        .filter(|&id| common.tree.try_workspace(id).is_some())
        .collect();
    for ws in workspaces {
        crate::tree::workspace::consider_destroy(&mut common.tree, ws, stacks.contains(&ws));
    }

    common.output_state.remove(output);
    crate::tree::arrange::arrange_root(&mut common.tree, &common.config);
}

/// Apply (or reset, with `None`) a CRTC gamma ramp. The ramp is three
/// channel tables of the CRTC's gamma length, concatenated.
fn apply_gamma(
    device: &DrmDevice,
    crtc: CrtcHandle,
    ramp: Option<&[u16]>,
) -> anyhow::Result<()> {
    let crtc_info = device.get_crtc(crtc)?;
    let size = crtc_info.gamma_length() as usize;
    match ramp {
        Some(ramp) => {
            anyhow::ensure!(ramp.len() == size * 3, "gamma ramp length mismatch");
            let (red, rest) = ramp.split_at(size);
            let (green, blue) = rest.split_at(size);
            device.set_gamma(crtc, red, green, blue)?;
        }
        None => {
            // Linear identity ramp.
            let step = u16::MAX as f64 / (size - 1) as f64;
            let channel: Vec<u16> = (0..size).map(|i| (i as f64 * step) as u16).collect();
            device.set_gamma(crtc, &channel, &channel, &channel)?;
        }
    }
    Ok(())
}

/// Gamma length of the CRTC driving `output`, for the protocol's
/// `gamma_size` event.
pub fn gamma_size_for_output(data: &UdevData, output: &Output) -> Option<u32> {
    for device in data.devices.values() {
        for (crtc, surface) in &device.surfaces {
            if &surface.output == output {
                let info = device.drm_output_manager.device().get_crtc(*crtc).ok()?;
                return Some(info.gamma_length());
            }
        }
    }
    None
}

/// Store a client gamma change (ramp or reset) for the next frame.
pub fn set_pending_gamma(data: &mut UdevData, output: &Output, ramp: Option<Vec<u16>>) -> bool {
    for device in data.devices.values_mut() {
        for surface in device.surfaces.values_mut() {
            if &surface.output == output {
                surface.pending_gamma = Some(ramp);
                return true;
            }
        }
    }
    false
}

impl UdevData {
    /// Test or commit the resolved output states. The `DrmOutputManager`
    /// negotiates swapchain formats across every CRTC of a device at once;
    /// a failed test leaves all outputs on their previous state.
    pub fn apply_output_states(
        &mut self,
        common: &mut Common,
        states: &[PendingOutputState],
        test_only: bool,
    ) -> anyhow::Result<()> {
        if test_only {
            // Mode/format negotiation happens inside use_mode on commit;
            // there is nothing cheaper to probe ahead of time.
            return Ok(());
        }
        for pending in states {
            if !common.tree.exists(pending.output) {
                continue;
            }
            let output = common.tree.output(pending.output).output.clone();
            let Some(ModeRequest::Fixed(mode)) = pending.mode else {
                continue;
            };

            for device in self.devices.values_mut() {
                let Some((crtc, surface)) = device
                    .surfaces
                    .iter_mut()
                    .find(|(_, s)| s.output == output)
                    .map(|(c, s)| (*c, s))
                else {
                    continue;
                };
                let drm_mode = surface
                    .connector
                    .modes()
                    .iter()
                    .find(|m| OutputMode::from(**m) == mode)
                    .copied();
                let Some(drm_mode) = drm_mode else {
                    anyhow::bail!("requested mode is not advertised by the connector");
                };
                let mut renderer = self
                    .gpu_manager
                    .single_renderer(&device.render_node)
                    .map_err(|err| anyhow::anyhow!("no renderer: {err}"))?;
                surface
                    .drm_output
                    .use_mode(
                        drm_mode,
                        &mut renderer,
                        &DrmOutputRenderElements::<
                            _,
                            crate::renderer::SceneRenderElement<UdevRenderer<'_>>,
                        >::default(),
                    )
                    .map_err(|err| anyhow::anyhow!("use_mode failed: {err:?}"))?;
                let _ = crtc;
            }
        }
        Ok(())
    }
}
