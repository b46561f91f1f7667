//! XRandR topology enumeration
//!
//! All ids in the topology are the server's XIDs, so they stay stable
//! across re-enumeration as long as the server does. The screen
//! resources come from GetScreenResourcesCurrent so reading never
//! forces the server to re-probe hardware.

use anyhow::{bail, Context, Result};
use log::{info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::dpms::{ConnectionExt as _, DPMSMode};
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{Timestamp, Window};
use x11rb::rust_connection::RustConnection;

use crate::topology::{
    Crtc, CrtcAssignment, CrtcId, Gpu, Mode, ModeId, ModeTiming, Output, OutputAttrs, OutputId,
    PowerSave, Rect, Topology,
};

use super::event::{classify_screen_change, ChangeClass};
use super::output;
use super::rotation::{transform_from_xrandr, transforms_from_xrandr_all};
use super::tiled::{collect_tile_groups, TiledMonitorRegistry};

x11rb::atom_manager! {
    pub(crate) Atoms:
    AtomsCookie {
        EDID,
        EDID_DATA,
        ConnectorType,
        TILE,
        underscan,
        on,
        off,
        hotplug_mode_update,
        Backlight,
        BACKLIGHT,
        _MUTTER_PRESENTATION_OUTPUT,
        underscan_hborder: b"underscan hborder",
        underscan_vborder: b"underscan vborder",
        suggested_x: b"suggested X",
        suggested_y: b"suggested Y",
    }
}

/// A GPU driven through the X server's RandR extension.
pub struct GpuXrandr {
    pub(super) conn: RustConnection,
    pub(super) root: Window,
    pub(super) atoms: Atoms,
    pub(super) topology: Topology,
    pub(super) power_save: PowerSave,
    pub(super) has_randr15: bool,
    /// Timestamp of the last configuration this process set, used to
    /// recognize our own changes when they echo back as events.
    pub(super) last_set_timestamp: Timestamp,
    pub(super) config_timestamp: Timestamp,
    tiled: TiledMonitorRegistry,
}

impl GpuXrandr {
    /// Connect to the X server named by `display` (or `$DISPLAY`) and
    /// read the initial topology. Needs RandR 1.3.
    pub fn new(display: Option<&str>) -> Result<Self> {
        let (conn, screen_num) =
            RustConnection::connect(display).context("Failed to connect to X server")?;
        let root = conn.setup().roots[screen_num].root;

        let version = conn
            .randr_query_version(1, 5)
            .context("Failed to query RandR version")?
            .reply()
            .context("RandR not available")?;
        if version.major_version < 1
            || (version.major_version == 1 && version.minor_version < 3)
        {
            bail!(
                "RandR {}.{} is too old, need at least 1.3",
                version.major_version,
                version.minor_version
            );
        }
        let has_randr15 =
            version.major_version > 1 || (version.major_version == 1 && version.minor_version >= 5);
        info!(
            "RandR {}.{} on screen {}",
            version.major_version, version.minor_version, screen_num
        );

        let atoms = Atoms::new(&conn)
            .context("Failed to intern atoms")?
            .reply()
            .context("InternAtom failed")?;

        if has_randr15 {
            TiledMonitorRegistry::clear_stale(&conn, root)?;
        }

        let mut gpu = Self {
            conn,
            root,
            atoms,
            topology: Topology::default(),
            power_save: PowerSave::Unsupported,
            has_randr15,
            last_set_timestamp: 0,
            config_timestamp: 0,
            tiled: TiledMonitorRegistry::default(),
        };
        gpu.read_current()?;
        Ok(gpu)
    }

    /// Subscribe to RRScreenChangeNotify on the root window.
    pub fn select_screen_change_events(&self) -> Result<()> {
        self.conn
            .randr_select_input(self.root, randr::NotifyMask::SCREEN_CHANGE)
            .context("Failed to select RandR input")?
            .check()
            .context("RandR SelectInput rejected")?;
        self.conn.flush().context("Failed to flush X connection")?;
        Ok(())
    }

    /// Block until the next X event; `Some` when it was a screen
    /// change, with its classification.
    pub fn wait_event(&mut self) -> Result<Option<ChangeClass>> {
        let event = self
            .conn
            .wait_for_event()
            .context("Lost connection to X server")?;
        match event {
            x11rb::protocol::Event::RandrScreenChangeNotify(e) => {
                Ok(Some(self.classify_event(&e)))
            }
            _ => Ok(None),
        }
    }

    /// Sort a screen change into hotplug / our own / someone else's.
    pub fn classify_event(&self, event: &randr::ScreenChangeNotifyEvent) -> ChangeClass {
        classify_screen_change(
            event.timestamp,
            event.config_timestamp,
            self.last_set_timestamp,
        )
    }

    /// Set one output's backlight as a 0..=100 percentage.
    pub fn set_backlight(&mut self, output_id: OutputId, percent: i32) -> Result<()> {
        let (min, max) = {
            let output = self
                .topology
                .output(output_id)
                .with_context(|| format!("Unknown output {:?}", output_id))?;
            if output.backlight < 0 {
                bail!("Output {} has no backlight control", output.name);
            }
            (output.backlight_min, output.backlight_max)
        };
        output::set_backlight(&self.conn, &self.atoms, output_id.0, min, max, percent)?;
        self.conn.flush().context("Failed to flush X connection")?;
        if let Some(output) = self.topology.output_mut(output_id) {
            output.backlight = percent.clamp(0, 100);
        }
        Ok(())
    }

    /// Gamma ramps of a CRTC (red, green, blue).
    pub fn crtc_gamma(&self, crtc_id: CrtcId) -> Result<(Vec<u16>, Vec<u16>, Vec<u16>)> {
        let reply = self
            .conn
            .randr_get_crtc_gamma(crtc_id.0)
            .context("Failed to get CRTC gamma")?
            .reply()
            .context("GetCrtcGamma failed")?;
        Ok((reply.red, reply.green, reply.blue))
    }

    pub fn set_crtc_gamma(
        &self,
        crtc_id: CrtcId,
        red: &[u16],
        green: &[u16],
        blue: &[u16],
    ) -> Result<()> {
        if red.len() != green.len() || green.len() != blue.len() {
            bail!("Gamma ramps must have equal length");
        }
        self.conn
            .randr_set_crtc_gamma(crtc_id.0, red, green, blue)
            .context("Failed to set CRTC gamma")?
            .check()
            .context("SetCrtcGamma rejected")?;
        self.conn.flush().context("Failed to flush X connection")?;
        Ok(())
    }

    fn read_power_save(&self) -> PowerSave {
        let capable = self
            .conn
            .dpms_capable()
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .map_or(false, |reply| reply.capable);
        if !capable {
            return PowerSave::Unsupported;
        }
        let info = match self.conn.dpms_info().ok().and_then(|c| c.reply().ok()) {
            Some(info) => info,
            None => return PowerSave::Unsupported,
        };
        if !info.state {
            return PowerSave::Unsupported;
        }
        match info.power_level {
            DPMSMode::ON => PowerSave::On,
            DPMSMode::STANDBY => PowerSave::Standby,
            DPMSMode::SUSPEND => PowerSave::Suspend,
            DPMSMode::OFF => PowerSave::Off,
            _ => PowerSave::Unsupported,
        }
    }

    fn read_current_inner(&mut self) -> Result<()> {
        let res = self
            .conn
            .randr_get_screen_resources_current(self.root)
            .context("Failed to get screen resources")?
            .reply()
            .context("GetScreenResourcesCurrent failed")?;
        let size_range = self
            .conn
            .randr_get_screen_size_range(self.root)
            .context("Failed to get screen size range")?
            .reply()
            .context("GetScreenSizeRange failed")?;

        // Mode names are packed back to back in one shared buffer
        let mut modes = Vec::with_capacity(res.modes.len());
        let mut offset = 0usize;
        for info in &res.modes {
            let len = info.name_len as usize;
            let name = res
                .names
                .get(offset..offset + len)
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default();
            offset += len;
            modes.push(Mode {
                id: ModeId(info.id),
                name,
                timing: timing_from_xrandr(info),
            });
        }

        let mut crtcs = Vec::with_capacity(res.crtcs.len());
        for &crtc in &res.crtcs {
            let info = self
                .conn
                .randr_get_crtc_info(crtc, res.config_timestamp)
                .context("Failed to get CRTC info")?
                .reply()
                .context("GetCrtcInfo failed")?;
            let mut c = Crtc::new(CrtcId(crtc));
            c.transform = transform_from_xrandr(info.rotation);
            c.all_transforms = transforms_from_xrandr_all(info.rotations);
            if info.mode != x11rb::NONE {
                c.current_mode = Some(ModeId(info.mode));
                c.rect = Rect::new(
                    i32::from(info.x),
                    i32::from(info.y),
                    i32::from(info.width),
                    i32::from(info.height),
                );
            }
            crtcs.push(c);
        }

        let primary = self
            .conn
            .randr_get_output_primary(self.root)
            .context("Failed to get primary output")?
            .reply()
            .context("GetOutputPrimary failed")?
            .output;

        let mut outputs = Vec::new();
        for &output in &res.outputs {
            let info = self
                .conn
                .randr_get_output_info(output, res.config_timestamp)
                .context("Failed to get output info")?
                .reply()
                .context("GetOutputInfo failed")?;
            if info.connection != randr::Connection::CONNECTED {
                continue;
            }
            let name = String::from_utf8_lossy(&info.name).into_owned();
            let mut o = Output::new(OutputId(output), name);
            o.crtc = (info.crtc != x11rb::NONE).then(|| CrtcId(info.crtc));
            o.modes = info.modes.iter().map(|&m| ModeId(m)).collect();
            // The server sorts preferred modes first
            o.preferred_mode = o.modes.first().copied();
            o.possible_crtcs = info.crtcs.iter().map(|&c| CrtcId(c)).collect();
            o.clones = info.clones.iter().map(|&c| OutputId(c)).collect();
            o.width_mm = info.mm_width;
            o.height_mm = info.mm_height;

            o.connector_type =
                output::read_connector_type(&self.conn, &self.atoms, output, &o.name);
            o.edid = output::read_edid(&self.conn, &self.atoms, output);
            o.tile_info = output::read_tile_info(&self.conn, &self.atoms, output);
            o.hotplug_mode_update =
                output::read_hotplug_mode_update(&self.conn, &self.atoms, output);
            let (sx, sy) = output::read_suggested_position(&self.conn, &self.atoms, output);
            o.suggested_x = sx;
            o.suggested_y = sy;
            o.is_primary = output == primary;
            o.is_presentation = output::read_is_presentation(&self.conn, &self.atoms, output);
            o.supports_underscanning =
                output::read_supports_underscanning(&self.conn, &self.atoms, output);
            o.is_underscanning = output::read_is_underscanning(&self.conn, &self.atoms, output);
            if let Some((value, min, max)) = output::read_backlight(&self.conn, &self.atoms, output)
            {
                o.backlight = output::normalize_backlight(min, max, value);
                o.backlight_min = min;
                o.backlight_max = max;
            }

            if !o.is_usable() {
                warn!("Ignoring output {} with no modes or no usable CRTCs", o.name);
                continue;
            }
            outputs.push(o);
        }
        retain_known_clones(&mut outputs);
        outputs.sort_by(|a, b| a.name.cmp(&b.name));

        self.topology = Topology {
            modes,
            crtcs,
            outputs,
            max_screen_size: Some((
                u32::from(size_range.max_width),
                u32::from(size_range.max_height),
            )),
        };
        debug_assert!(self.topology.check_consistency().is_ok());
        self.config_timestamp = res.config_timestamp;
        self.power_save = self.read_power_save();

        if self.has_randr15 {
            let groups = collect_tile_groups(&self.topology);
            self.tiled.sync(&self.conn, self.root, &groups)?;
            self.conn.flush().context("Failed to flush X connection")?;
        }
        Ok(())
    }
}

impl Gpu for GpuXrandr {
    fn read_current(&mut self) -> Result<()> {
        self.read_current_inner()
            .context("Failed to enumerate RandR resources")
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
        let level = match mode {
            PowerSave::On => DPMSMode::ON,
            PowerSave::Standby => DPMSMode::STANDBY,
            PowerSave::Suspend => DPMSMode::SUSPEND,
            PowerSave::Off => DPMSMode::OFF,
            PowerSave::Unsupported => return Ok(()),
        };
        if self.power_save == PowerSave::Unsupported {
            bail!("DPMS is not supported by this server");
        }
        self.conn
            .dpms_force_level(level)
            .context("Failed to set DPMS level")?
            .check()
            .context("DPMSForceLevel rejected")?;
        self.conn.flush().context("Failed to flush X connection")?;
        self.power_save = mode;
        Ok(())
    }
}

/// The server reports clone candidates among every output it knows,
/// including disconnected ones this snapshot discards. Keep only ids
/// that resolve within the snapshot so clone lists stay symmetric.
fn retain_known_clones(outputs: &mut [Output]) {
    let known: Vec<OutputId> = outputs.iter().map(|o| o.id).collect();
    for output in outputs.iter_mut() {
        output.clones.retain(|id| known.contains(id));
    }
}

fn timing_from_xrandr(info: &randr::ModeInfo) -> ModeTiming {
    let mut timing = ModeTiming {
        clock: (info.dot_clock / 1000) as u32,
        hdisplay: info.width,
        hsync_start: info.hsync_start,
        hsync_end: info.hsync_end,
        htotal: info.htotal,
        hskew: info.hskew,
        vdisplay: info.height,
        vsync_start: info.vsync_start,
        vsync_end: info.vsync_end,
        vtotal: info.vtotal,
        vscan: 0,
        vrefresh: 0,
        flags: u32::from(info.mode_flags),
        kind: 0,
    };
    timing.vrefresh = timing.refresh_rate().round() as u32;
    timing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xrandr_timing_matches_drm_flag_layout() {
        let info = randr::ModeInfo {
            id: 5,
            width: 1920,
            height: 1080,
            dot_clock: 148_500_000,
            hsync_start: 2008,
            hsync_end: 2052,
            htotal: 2200,
            hskew: 0,
            vsync_start: 1084,
            vsync_end: 1089,
            vtotal: 1125,
            name_len: 0,
            mode_flags: randr::ModeFlag::HSYNC_POSITIVE | randr::ModeFlag::VSYNC_POSITIVE,
        };
        let timing = timing_from_xrandr(&info);
        assert_eq!(timing.clock, 148_500);
        assert_eq!(
            timing.flags,
            crate::topology::mode::MODE_FLAG_PHSYNC | crate::topology::mode::MODE_FLAG_PVSYNC
        );
        assert_eq!(timing.vrefresh, 60);
        assert!((timing.refresh_rate() - 60.0).abs() < 0.01);
    }

    #[test]
    fn interlace_flag_survives_the_conversion() {
        let info = randr::ModeInfo {
            dot_clock: 74_250_000,
            width: 1920,
            height: 540,
            htotal: 2200,
            vtotal: 562,
            mode_flags: randr::ModeFlag::INTERLACE,
            ..Default::default()
        };
        let timing = timing_from_xrandr(&info);
        assert_eq!(timing.flags, crate::topology::mode::MODE_FLAG_INTERLACE);
        // Interlaced refresh doubles the field rate
        assert!(timing.refresh_rate() > 100.0);
    }

    #[test]
    fn clone_lists_drop_outputs_missing_from_the_snapshot() {
        let mut a = Output::new(OutputId(1), "DP-1".into());
        a.clones = vec![OutputId(2), OutputId(9)];
        let mut b = Output::new(OutputId(2), "DP-2".into());
        b.clones = vec![OutputId(1), OutputId(9)];
        let mut outputs = vec![a, b];

        // Output 9 was disconnected and never made it into the snapshot
        retain_known_clones(&mut outputs);
        assert_eq!(outputs[0].clones, vec![OutputId(2)]);
        assert_eq!(outputs[1].clones, vec![OutputId(1)]);
    }

    #[test]
    #[ignore = "needs a running X server"]
    fn live_read_current_is_idempotent() {
        let mut gpu = GpuXrandr::new(None).unwrap();
        let names: Vec<String> = gpu.topology().outputs.iter().map(|o| o.name.clone()).collect();
        gpu.read_current().unwrap();
        let again: Vec<String> = gpu.topology().outputs.iter().map(|o| o.name.clone()).collect();
        assert_eq!(names, again);
        gpu.topology().check_consistency().unwrap();
    }
}
