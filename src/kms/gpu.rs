//! KMS topology enumeration
//!
//! Builds the backend-agnostic topology from DRM resources: a
//! deduplicated mode table unioned over all connected connectors,
//! CRTCs with their primary-plane rotation capabilities, and outputs
//! with the full connector property set (EDID, TILE, underscan,
//! suggested position, DPMS).

use anyhow::{Context, Result};
use drm::control::{connector, crtc, plane, property, Device as ControlDevice};
use log::{debug, warn};
use std::collections::HashMap;

use crate::edid;
use crate::topology::{
    ConnectorType, Crtc, CrtcAssignment, CrtcId, Gpu, Mode, ModeId, ModeTiming, Output, OutputAttrs,
    OutputId, PowerSave, Rect, TileInfo, Topology, Transform, TransformSet,
};

use super::default_modes;
use super::device::Device;
use super::ioctl;

/// DPMS property values (DRM_MODE_DPMS_*)
const DPMS_ON: u64 = 0;
const DPMS_STANDBY: u64 = 1;
const DPMS_SUSPEND: u64 = 2;
const DPMS_OFF: u64 = 3;

/// KMS-private per-CRTC state.
pub(super) struct CrtcState {
    pub id: CrtcId,
    pub handle: crtc::Handle,
    pub rotation: Option<RotationProp>,
    /// Primary plane advertises IN_FORMATS (format/modifier pairs).
    pub has_format_modifiers: bool,
}

/// The primary plane's rotation bitmask property.
#[derive(Clone)]
pub(super) struct RotationProp {
    pub plane: plane::Handle,
    pub prop: property::Handle,
    pub current: u64,
    /// Named bit values from the property enum, e.g. ("rotate-90", 2).
    pub bits: Vec<(u64, String)>,
}

impl RotationProp {
    fn bit(&self, name: &str) -> Option<u64> {
        self.bits.iter().find(|(_, n)| n == name).map(|(v, _)| *v)
    }

    /// Hardware value for a transform, or `None` when the plane cannot
    /// express it.
    pub fn value_for(&self, transform: Transform) -> Option<u64> {
        let rotate = match transform.quarter_turns() {
            0 => "rotate-0",
            1 => "rotate-90",
            2 => "rotate-180",
            _ => "rotate-270",
        };
        let mut value = self.bit(rotate)?;
        if transform.is_flipped() {
            value |= self.bit("reflect-x")?;
        }
        Some(value)
    }

    pub fn supported_transforms(&self) -> TransformSet {
        let mut set = TransformSet::empty();
        for &t in &Transform::ALL {
            if self.value_for(t).is_some() {
                set.insert_transform(t);
            }
        }
        if set.is_empty() {
            set = TransformSet::NORMAL;
        }
        set
    }

    pub fn current_transform(&self) -> Transform {
        transform_from_rotation_bits(self.current, &self.bits)
    }
}

/// Decode a rotation bitmask value into a transform. A reflect-y bit is
/// folded into a horizontal flip plus a half turn.
pub(super) fn transform_from_rotation_bits(value: u64, bits: &[(u64, String)]) -> Transform {
    let bit = |name: &str| {
        bits.iter()
            .find(|(_, n)| n == name)
            .map(|(v, _)| *v)
            .unwrap_or(0)
    };
    let quarter = if value & bit("rotate-90") != 0 {
        1
    } else if value & bit("rotate-180") != 0 {
        2
    } else if value & bit("rotate-270") != 0 {
        3
    } else {
        0
    };
    let reflect_x = bit("reflect-x") != 0 && value & bit("reflect-x") != 0;
    let reflect_y = bit("reflect-y") != 0 && value & bit("reflect-y") != 0;
    match (reflect_x, reflect_y) {
        (false, false) => Transform::from_parts(false, quarter),
        (true, false) => Transform::from_parts(true, quarter),
        (false, true) => Transform::from_parts(true, quarter + 2),
        (true, true) => Transform::from_parts(false, quarter + 2),
    }
}

/// KMS-private per-output state.
pub(super) struct OutputState {
    pub id: OutputId,
    pub connector: connector::Handle,
    pub dpms: Option<property::Handle>,
    pub underscan: Option<UnderscanProps>,
    /// Bit per position of this output's encoders in the device's
    /// encoder array.
    pub encoder_mask: u32,
    /// Intersection of the encoders' possible-clones masks.
    pub enc_clone_mask: u32,
}

#[derive(Clone)]
pub(super) struct UnderscanProps {
    pub prop: property::Handle,
    pub on_value: u64,
    pub off_value: u64,
    pub hborder: Option<property::Handle>,
    pub vborder: Option<property::Handle>,
}

/// Two outputs can share a CRTC when both advertise cloning at all and
/// each one's encoder set is exactly what the other can clone with.
/// Both directions are required so clone lists stay symmetric.
pub(super) fn can_clone(a: &OutputState, b: &OutputState) -> bool {
    a.enc_clone_mask != 0
        && b.enc_clone_mask != 0
        && a.encoder_mask == b.enc_clone_mask
        && b.encoder_mask == a.enc_clone_mask
}

/// A GPU driven through the kernel DRM/KMS interface.
pub struct GpuKms {
    pub(super) device: Device,
    pub(super) topology: Topology,
    pub(super) power_save: PowerSave,
    pub(super) page_flips_not_supported: bool,
    /// Bookkeeping for the framebuffer a successful flip installed.
    pub(super) fb_in_use: bool,
    pub(super) pending_flips: HashMap<CrtcId, Box<dyn FnOnce()>>,
    pub(super) crtc_states: Vec<CrtcState>,
    pub(super) output_states: Vec<OutputState>,
}

impl GpuKms {
    /// Open a DRM device and read the initial topology.
    pub fn new<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let device = Device::open(path)?;
        let mut gpu = Self {
            device,
            topology: Topology::default(),
            power_save: PowerSave::On,
            page_flips_not_supported: false,
            fb_in_use: false,
            pending_flips: HashMap::new(),
            crtc_states: Vec::new(),
            output_states: Vec::new(),
        };
        gpu.read_current()?;
        Ok(gpu)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Whether the page-flip path is still available.
    pub fn flips_supported(&self) -> bool {
        !self.page_flips_not_supported
    }

    pub(super) fn crtc_state(&self, id: CrtcId) -> Option<&CrtcState> {
        self.crtc_states.iter().find(|c| c.id == id)
    }

    pub(super) fn output_state(&self, id: OutputId) -> Option<&OutputState> {
        self.output_states.iter().find(|o| o.id == id)
    }

    /// Whether a CRTC's primary plane advertises IN_FORMATS.
    pub fn crtc_supports_format_modifiers(&self, id: CrtcId) -> bool {
        self.crtc_state(id).map_or(false, |c| c.has_format_modifiers)
    }

    fn read_current_inner(&mut self) -> Result<()> {
        self.device.reload_resources()?;
        let resources = self.device.resources().clone();

        let mut connectors: Vec<(connector::Handle, connector::Info)> = Vec::new();
        for &handle in resources.connectors() {
            match self.device.connector(handle) {
                Ok(info) => {
                    if info.state() == connector::State::Connected {
                        connectors.push((handle, info));
                    }
                }
                Err(e) => warn!("Skipping connector {:?}: {}", handle, e),
            }
        }

        // Union of all connected connectors' modes, deduplicated by
        // timing. Whatever name a timing was first seen under sticks.
        let mut table = ModeTable::default();
        for (_, info) in &connectors {
            for mode in info.modes() {
                table.intern(timing_from_drm(mode), &mode.name().to_string_lossy());
            }
        }

        let planes = self.enumerate_primary_planes(&resources)?;

        // CRTCs, transforms from their primary plane's rotation property
        let mut crtcs = Vec::new();
        let mut crtc_states = Vec::new();
        for &handle in resources.crtcs() {
            let info = self.device.crtc(handle)?;
            let id = CrtcId(handle.into());
            let plane = planes.iter().find(|p| p.crtcs.contains(&handle));

            let mut crtc = Crtc::new(id);
            if let Some(rot) = plane.and_then(|p| p.rotation.as_ref()) {
                crtc.transform = rot.current_transform();
                crtc.all_transforms = rot.supported_transforms();
            }
            if let Some(mode) = info.mode() {
                let mode_id = table.intern(timing_from_drm(&mode), &mode.name().to_string_lossy());
                let (x, y) = info.position();
                let (w, h) = mode.size();
                let (w, h) = if crtc.transform.is_rotated() {
                    (h, w)
                } else {
                    (w, h)
                };
                crtc.current_mode = Some(mode_id);
                crtc.rect = Rect::new(x as i32, y as i32, i32::from(w), i32::from(h));
            }
            crtcs.push(crtc);
            crtc_states.push(CrtcState {
                id,
                handle,
                rotation: plane.and_then(|p| p.rotation.clone()),
                has_format_modifiers: plane.map_or(false, |p| p.has_in_formats),
            });
        }

        // Outputs
        let mut built: Vec<(Output, OutputState)> = Vec::new();
        for (conn_handle, info) in &connectors {
            match self.build_output(&resources, *conn_handle, info, &mut table) {
                Ok(Some(pair)) => built.push(pair),
                Ok(None) => {}
                Err(e) => warn!("Skipping connector {:?}: {}", conn_handle, e),
            }
        }

        // Clone lists from the encoder masks
        for i in 0..built.len() {
            for j in 0..built.len() {
                if i != j && can_clone(&built[i].1, &built[j].1) {
                    let other = built[j].0.id;
                    built[i].0.clones.push(other);
                }
            }
        }

        built.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        let (outputs, output_states): (Vec<_>, Vec<_>) = built.into_iter().unzip();

        let max = self.device.max_framebuffer_size();
        self.topology = Topology {
            modes: table.modes,
            crtcs,
            outputs,
            max_screen_size: Some(max),
        };
        debug_assert!(self.topology.check_consistency().is_ok());
        self.crtc_states = crtc_states;
        self.output_states = output_states;
        Ok(())
    }

    fn enumerate_primary_planes(
        &self,
        resources: &drm::control::ResourceHandles,
    ) -> Result<Vec<PrimaryPlane>> {
        let mut planes = Vec::new();
        let handles = self
            .device
            .plane_handles()
            .context("Failed to get plane resources")?;
        for &handle in handles.iter() {
            let info = match self.device.plane(handle) {
                Ok(info) => info,
                Err(e) => {
                    debug!("{}", e);
                    continue;
                }
            };
            let props = match self.device.get_properties(handle) {
                Ok(props) => props,
                Err(e) => {
                    debug!("Failed to get plane {:?} properties: {}", handle, e);
                    continue;
                }
            };

            let mut is_primary = false;
            let mut rotation = None;
            let mut has_in_formats = false;
            for (&prop, &value) in props.iter() {
                let pinfo = match self.device.get_property(prop) {
                    Ok(pinfo) => pinfo,
                    Err(_) => continue,
                };
                match pinfo.name().to_str() {
                    Ok("type") => {
                        is_primary = value == drm::control::PlaneType::Primary as u64;
                    }
                    Ok("rotation") => {
                        let prop_id: u32 = prop.into();
                        let bits =
                            ioctl::property_enum_values(self.device.as_raw_fd(), prop_id)
                                .unwrap_or_default();
                        rotation = Some(RotationProp {
                            plane: handle,
                            prop,
                            current: value,
                            bits,
                        });
                    }
                    Ok("IN_FORMATS") => has_in_formats = true,
                    _ => {}
                }
            }
            if is_primary {
                planes.push(PrimaryPlane {
                    crtcs: resources.filter_crtcs(info.possible_crtcs()),
                    rotation,
                    has_in_formats,
                });
            }
        }
        Ok(planes)
    }

    fn build_output(
        &self,
        resources: &drm::control::ResourceHandles,
        handle: connector::Handle,
        info: &connector::Info,
        table: &mut ModeTable,
    ) -> Result<Option<(Output, OutputState)>> {
        let id = OutputId(handle.into());
        let connector_type = connector_type_from_interface(info.interface());
        let name = format!("{}-{}", connector_type.name(), info.interface_id());
        let mut output = Output::new(id, name);
        output.connector_type = connector_type;
        if let Some((w, h)) = info.size() {
            output.width_mm = w;
            output.height_mm = h;
        }

        // Native modes and per-output maxima for the fallback table
        let mut max_w = 0u16;
        let mut max_h = 0u16;
        let mut max_refresh = 0.0f64;
        for mode in info.modes() {
            let timing = timing_from_drm(mode);
            max_w = max_w.max(timing.hdisplay);
            max_h = max_h.max(timing.vdisplay);
            max_refresh = max_refresh.max(timing.refresh_rate());
            let mode_id = table.intern(timing, &mode.name().to_string_lossy());
            output.modes.push(mode_id);
            if timing.is_preferred() && output.preferred_mode.is_none() {
                output.preferred_mode = Some(mode_id);
            }
        }
        if output.preferred_mode.is_none() {
            output.preferred_mode = output.modes.first().copied();
        }

        // Connector properties
        let mut dpms = None;
        let mut underscan_prop = None;
        let mut hborder = None;
        let mut vborder = None;
        let mut has_scaling = false;
        let props = self
            .device
            .get_properties(handle)
            .with_context(|| format!("Failed to get connector {:?} properties", handle))?;
        for (&prop, &value) in props.iter() {
            let pinfo = match self.device.get_property(prop) {
                Ok(pinfo) => pinfo,
                Err(_) => continue,
            };
            match pinfo.name().to_str() {
                Ok("DPMS") => dpms = Some(prop),
                Ok("EDID") => {
                    if value != 0 {
                        match self.device.get_property_blob(value) {
                            Ok(data) => output.edid = edid::parse(&data),
                            Err(e) => debug!("Failed to read EDID blob: {}", e),
                        }
                    }
                }
                Ok("TILE") => {
                    if value != 0 {
                        match self.device.get_property_blob(value) {
                            Ok(data) => output.tile_info = parse_tile_blob(&data),
                            Err(e) => debug!("Failed to read TILE blob: {}", e),
                        }
                    }
                }
                Ok("suggested X") => output.suggested_x = value as i32,
                Ok("suggested Y") => output.suggested_y = value as i32,
                Ok("hotplug_mode_update") => output.hotplug_mode_update = value != 0,
                Ok("scaling mode") => has_scaling = true,
                Ok("underscan") => {
                    let prop_id: u32 = prop.into();
                    let values = ioctl::property_enum_values(self.device.as_raw_fd(), prop_id)
                        .unwrap_or_default();
                    let on = values.iter().find(|(_, n)| n == "on").map(|(v, _)| *v);
                    let off = values.iter().find(|(_, n)| n == "off").map(|(v, _)| *v);
                    if let (Some(on_value), Some(off_value)) = (on, off) {
                        output.supports_underscanning = true;
                        output.is_underscanning = value == on_value;
                        underscan_prop = Some((prop, on_value, off_value));
                    }
                }
                Ok("underscan hborder") => hborder = Some(prop),
                Ok("underscan vborder") => vborder = Some(prop),
                _ => {}
            }
        }
        let underscan = underscan_prop.map(|(prop, on_value, off_value)| UnderscanProps {
            prop,
            on_value,
            off_value,
            hborder,
            vborder,
        });

        // Fallback modes for connectors with a panel fitter
        if has_scaling && max_w > 0 {
            for dm in default_modes::fallback_modes(max_w, max_h, max_refresh) {
                let mode_id = table.intern(dm.timing, dm.name);
                if !output.modes.contains(&mode_id) {
                    output.modes.push(mode_id);
                }
            }
        }

        // Possible CRTCs: every encoder must agree, so intersect the
        // masks. The clone masks come from the same raw records.
        let mut crtc_mask = u32::MAX;
        let mut encoder_mask = 0u32;
        let mut enc_clone_mask = u32::MAX;
        for &enc in info.encoders() {
            let (possible_crtcs, possible_clones) = self.device.encoder_masks(enc)?;
            crtc_mask &= possible_crtcs;
            enc_clone_mask &= possible_clones;
            if let Some(position) = resources
                .encoders()
                .iter()
                .position(|&candidate| candidate == enc)
            {
                encoder_mask |= 1 << position;
            }
        }
        for (position, &crtc_handle) in resources.crtcs().iter().enumerate() {
            if crtc_mask & (1 << position) != 0 {
                output.possible_crtcs.push(CrtcId(crtc_handle.into()));
            }
        }

        // Currently driving CRTC via the active encoder
        if let Some(enc) = info.current_encoder() {
            if let Ok(enc_info) = self.device.encoder(enc) {
                output.crtc = enc_info.crtc().map(|c| CrtcId(c.into()));
            }
        }

        // Primary/presentation are not hardware state on KMS; carry
        // them across re-enumeration for outputs that stay connected.
        if let Some(old) = self.topology.output(id) {
            output.is_primary = old.is_primary;
            output.is_presentation = old.is_presentation;
        }

        if !output.is_usable() {
            warn!(
                "Ignoring connector {} with no modes or no usable CRTCs",
                output.name
            );
            return Ok(None);
        }

        let state = OutputState {
            id,
            connector: handle,
            dpms,
            underscan,
            encoder_mask,
            enc_clone_mask,
        };
        Ok(Some((output, state)))
    }
}

impl Gpu for GpuKms {
    fn read_current(&mut self) -> Result<()> {
        self.read_current_inner()
            .context("Failed to enumerate DRM resources")
    }

    fn topology(&self) -> &Topology {
        &self.topology
    }

    fn apply(&mut self, assignments: &[CrtcAssignment], attrs: &[OutputAttrs]) -> Result<()> {
        self.apply_crtc_assignments(assignments, attrs)
    }

    fn power_save_mode(&self) -> PowerSave {
        self.power_save
    }

    fn set_power_save_mode(&mut self, mode: PowerSave) -> Result<()> {
        let value = match mode {
            PowerSave::On => DPMS_ON,
            PowerSave::Standby => DPMS_STANDBY,
            PowerSave::Suspend => DPMS_SUSPEND,
            PowerSave::Off => DPMS_OFF,
            PowerSave::Unsupported => return Ok(()),
        };
        for state in &self.output_states {
            if let Some(prop) = state.dpms {
                self.device
                    .set_property(state.connector, prop, value)
                    .with_context(|| {
                        format!("Failed to set DPMS on connector {:?}", state.connector)
                    })?;
            }
        }
        self.power_save = mode;
        Ok(())
    }
}

struct PrimaryPlane {
    crtcs: Vec<crtc::Handle>,
    rotation: Option<RotationProp>,
    has_in_formats: bool,
}

#[derive(Default)]
struct ModeTable {
    modes: Vec<Mode>,
    index: HashMap<ModeTiming, ModeId>,
}

impl ModeTable {
    fn intern(&mut self, timing: ModeTiming, name: &str) -> ModeId {
        if let Some(&id) = self.index.get(&timing) {
            return id;
        }
        let id = ModeId(self.modes.len() as u32);
        self.modes.push(Mode {
            id,
            name: name.to_string(),
            timing,
        });
        self.index.insert(timing, id);
        id
    }
}

fn timing_from_drm(mode: &drm::control::Mode) -> ModeTiming {
    let (hdisplay, vdisplay) = mode.size();
    let (hsync_start, hsync_end, htotal) = mode.hsync();
    let (vsync_start, vsync_end, vtotal) = mode.vsync();
    ModeTiming {
        clock: mode.clock(),
        hdisplay,
        hsync_start,
        hsync_end,
        htotal,
        hskew: mode.hskew(),
        vdisplay,
        vsync_start,
        vsync_end,
        vtotal,
        vscan: mode.vscan(),
        vrefresh: mode.vrefresh(),
        flags: mode.flags().bits(),
        kind: mode.mode_type().bits(),
    }
}

fn connector_type_from_interface(interface: connector::Interface) -> ConnectorType {
    use connector::Interface;
    match interface {
        Interface::VGA => ConnectorType::Vga,
        Interface::DVII => ConnectorType::DviI,
        Interface::DVID => ConnectorType::DviD,
        Interface::DVIA => ConnectorType::DviA,
        Interface::Composite => ConnectorType::Composite,
        Interface::SVideo => ConnectorType::SVideo,
        Interface::LVDS => ConnectorType::Lvds,
        Interface::Component => ConnectorType::Component,
        Interface::NinePinDIN => ConnectorType::NinePinDin,
        Interface::DisplayPort => ConnectorType::DisplayPort,
        Interface::HDMIA => ConnectorType::HdmiA,
        Interface::HDMIB => ConnectorType::HdmiB,
        Interface::TV => ConnectorType::Tv,
        Interface::EmbeddedDisplayPort => ConnectorType::Edp,
        Interface::Virtual => ConnectorType::Virtual,
        Interface::DSI => ConnectorType::Dsi,
        Interface::DPI => ConnectorType::Dpi,
        _ => ConnectorType::Unknown,
    }
}

/// The TILE blob is colon-separated ASCII:
/// group:flags:max_h:max_v:loc_h:loc_v:width:height
fn parse_tile_blob(data: &[u8]) -> Option<TileInfo> {
    let text = std::str::from_utf8(data).ok()?;
    let text = text.trim_end_matches('\0').trim();
    let mut fields = text.split(':').map(|f| f.trim().parse::<u32>());
    let mut next = || fields.next()?.ok();
    Some(TileInfo {
        group_id: next()?,
        flags: next()?,
        max_h_tiles: next()?,
        max_v_tiles: next()?,
        loc_h_tile: next()?,
        loc_v_tile: next()?,
        tile_w: next()?,
        tile_h: next()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel_rotation_bits() -> Vec<(u64, String)> {
        vec![
            (1 << 0, "rotate-0".into()),
            (1 << 1, "rotate-90".into()),
            (1 << 2, "rotate-180".into()),
            (1 << 3, "rotate-270".into()),
            (1 << 4, "reflect-x".into()),
            (1 << 5, "reflect-y".into()),
        ]
    }

    fn state(id: u32, encoder_mask: u32, enc_clone_mask: u32) -> OutputState {
        OutputState {
            id: OutputId(id),
            // Any nonzero raw id works for a test handle
            connector: unsafe { std::mem::transmute::<u32, connector::Handle>(id) },
            dpms: None,
            underscan: None,
            encoder_mask,
            enc_clone_mask,
        }
    }

    #[test]
    fn clone_requires_nonzero_masks() {
        let a = state(1, 0b01, 0);
        let b = state(2, 0b10, 0b01);
        assert!(!can_clone(&a, &b));
        assert!(!can_clone(&b, &a));
    }

    #[test]
    fn clone_compatibility_is_symmetric_for_mirrored_masks() {
        // Each output's encoder set is exactly what the other clones with
        let a = state(1, 0b01, 0b10);
        let b = state(2, 0b10, 0b01);
        assert!(can_clone(&a, &b));
        assert!(can_clone(&b, &a));
    }

    #[test]
    fn clone_mask_mismatch_is_rejected_both_ways() {
        // One direction of the masks matches, the other does not; the
        // pair must not be listed as clones in either direction.
        let a = state(1, 0b01, 0b10);
        let b = state(2, 0b11, 0b01);
        assert!(!can_clone(&a, &b));
        assert!(!can_clone(&b, &a));
    }

    #[test]
    fn rotation_decode_covers_all_eight() {
        let bits = kernel_rotation_bits();
        assert_eq!(transform_from_rotation_bits(1 << 0, &bits), Transform::Normal);
        assert_eq!(
            transform_from_rotation_bits(1 << 1, &bits),
            Transform::Rotate90
        );
        assert_eq!(
            transform_from_rotation_bits(1 << 3, &bits),
            Transform::Rotate270
        );
        assert_eq!(
            transform_from_rotation_bits((1 << 0) | (1 << 4), &bits),
            Transform::Flipped
        );
        assert_eq!(
            transform_from_rotation_bits((1 << 2) | (1 << 4), &bits),
            Transform::Flipped180
        );
    }

    #[test]
    fn reflect_y_folds_into_flip_plus_half_turn() {
        let bits = kernel_rotation_bits();
        assert_eq!(
            transform_from_rotation_bits((1 << 0) | (1 << 5), &bits),
            Transform::Flipped180
        );
        assert_eq!(
            transform_from_rotation_bits((1 << 1) | (1 << 5), &bits),
            Transform::Flipped270
        );
        // Both reflections compose to a pure half turn
        assert_eq!(
            transform_from_rotation_bits((1 << 0) | (1 << 4) | (1 << 5), &bits),
            Transform::Rotate180
        );
    }

    #[test]
    fn rotation_prop_supported_set() {
        let rot = RotationProp {
            plane: unsafe { std::mem::transmute::<u32, plane::Handle>(41) },
            prop: unsafe { std::mem::transmute::<u32, property::Handle>(7) },
            current: 1,
            bits: vec![
                (1 << 0, "rotate-0".into()),
                (1 << 2, "rotate-180".into()),
            ],
        };
        let set = rot.supported_transforms();
        assert!(set.contains_transform(Transform::Normal));
        assert!(set.contains_transform(Transform::Rotate180));
        // No reflect-x bit: no flipped variants
        assert!(!set.contains_transform(Transform::Flipped));
        assert!(!set.contains_transform(Transform::Rotate90));
    }

    #[test]
    fn tile_blob_parses_eight_fields() {
        let tile = parse_tile_blob(b"1:0:2:1:0:0:1920:2160\0").unwrap();
        assert_eq!(tile.group_id, 1);
        assert_eq!(tile.max_h_tiles, 2);
        assert_eq!(tile.max_v_tiles, 1);
        assert_eq!(tile.tile_w, 1920);
        assert_eq!(tile.tile_h, 2160);
    }

    #[test]
    fn tile_blob_rejects_garbage() {
        assert!(parse_tile_blob(b"1:2:3").is_none());
        assert!(parse_tile_blob(b"not a tile").is_none());
        assert!(parse_tile_blob(&[0xFF, 0xFE]).is_none());
    }

    #[test]
    fn mode_table_dedups_by_timing_not_name() {
        let mut table = ModeTable::default();
        let timing = ModeTiming {
            clock: 148_500,
            hdisplay: 1920,
            vdisplay: 1080,
            htotal: 2200,
            vtotal: 1125,
            ..Default::default()
        };
        let a = table.intern(timing, "HDMI-1-mode0");
        let b = table.intern(timing, "VGA-1-mode0");
        assert_eq!(a, b);
        assert_eq!(table.modes.len(), 1);
        // The first name seen wins
        assert_eq!(table.modes[0].name, "HDMI-1-mode0");

        let mut other = timing;
        other.clock += 1;
        let c = table.intern(other, "HDMI-1-mode0");
        assert_ne!(a, c);
        assert_eq!(table.modes.len(), 2);
    }

    #[test]
    #[ignore = "needs /dev/dri/card0 and permission to open it"]
    fn live_read_current_is_idempotent() {
        let mut gpu = GpuKms::new("/dev/dri/card0").unwrap();
        let names: Vec<String> = gpu.topology().outputs.iter().map(|o| o.name.clone()).collect();
        gpu.read_current().unwrap();
        let again: Vec<String> = gpu.topology().outputs.iter().map(|o| o.name.clone()).collect();
        assert_eq!(names, again);
        gpu.topology().check_consistency().unwrap();
    }
}
