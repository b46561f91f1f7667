//! Applying a configuration through RandR
//!
//! The server is grabbed for the whole sequence so other clients never
//! observe a half-applied layout. Order matters: CRTCs that would stick
//! out of the new screen must be disabled before SetScreenSize, and the
//! screen resized before the new CRTC configs reference it.

use anyhow::{Context, Result};
use log::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{ConnectionExt as _, Timestamp};
use x11rb::rust_connection::RustConnection;
use x11rb::CURRENT_TIME;

use crate::topology::{Crtc, CrtcAssignment, CrtcId, Output, OutputAttrs, Rect, Topology};

use super::gpu::GpuXrandr;
use super::output;
use super::rotation::xrandr_from_transform;

const DPI_FALLBACK: f64 = 96.0;

fn mm_from_px(px: i32) -> u32 {
    (f64::from(px) / DPI_FALLBACK * 25.4 + 0.5) as u32
}

/// Bounding box of the enabled assignments, post-transform.
fn screen_bounds(topology: &Topology, assignments: &[CrtcAssignment]) -> Option<(i32, i32)> {
    let mut width = 0;
    let mut height = 0;
    for a in assignments {
        let mode = match a.mode.and_then(|m| topology.mode(m)) {
            Some(mode) => mode,
            None => continue,
        };
        let (w, h) = if a.transform.is_rotated() {
            (mode.height(), mode.width())
        } else {
            (mode.width(), mode.height())
        };
        width = width.max(a.x + w as i32);
        height = height.max(a.y + h as i32);
    }
    (width > 0 && height > 0).then_some((width, height))
}

fn crtc_assignment_changed(crtc: &Crtc, assignments: &[CrtcAssignment]) -> bool {
    match assignments.iter().find(|a| a.crtc == crtc.id) {
        None => crtc.is_active(),
        Some(a) => {
            a.mode != crtc.current_mode
                || (a.mode.is_some()
                    && (a.x != crtc.rect.x
                        || a.y != crtc.rect.y
                        || a.transform != crtc.transform))
        }
    }
}

fn output_assignment_changed(
    output: &Output,
    assignments: &[CrtcAssignment],
    attrs: &[OutputAttrs],
) -> bool {
    let assigned_crtc = assignments
        .iter()
        .find(|a| a.mode.is_some() && a.outputs.contains(&output.id))
        .map(|a| a.crtc);
    if assigned_crtc != output.crtc {
        return true;
    }
    match attrs.iter().find(|at| at.output == output.id) {
        None => output.is_primary || output.is_presentation || output.is_underscanning,
        Some(at) => {
            at.is_primary != output.is_primary
                || at.is_presentation != output.is_presentation
                || at.is_underscanning != output.is_underscanning
        }
    }
}

/// Whether applying would change anything at all. Re-applying the
/// current configuration is a no-op that would only churn timestamps.
pub(super) fn is_assignments_changed(
    topology: &Topology,
    assignments: &[CrtcAssignment],
    attrs: &[OutputAttrs],
) -> bool {
    topology
        .crtcs
        .iter()
        .any(|crtc| crtc_assignment_changed(crtc, assignments))
        || topology
            .outputs
            .iter()
            .any(|output| output_assignment_changed(output, assignments, attrs))
}

struct ServerGrab<'a> {
    conn: &'a RustConnection,
}

impl<'a> ServerGrab<'a> {
    fn new(conn: &'a RustConnection) -> Result<Self> {
        conn.grab_server()
            .context("Failed to grab X server")?
            .check()
            .context("GrabServer rejected")?;
        Ok(Self { conn })
    }
}

impl Drop for ServerGrab<'_> {
    fn drop(&mut self) {
        if let Ok(cookie) = self.conn.ungrab_server() {
            let _ = cookie.check();
        }
        let _ = self.conn.flush();
    }
}

// Free function rather than a method: the apply sequence holds a shared
// borrow of the connection in the grab guard while mutating the rest of
// the session state, so the borrows must stay field-disjoint.
fn disable_crtc_now(
    conn: &RustConnection,
    config_timestamp: Timestamp,
    last_set_timestamp: &mut Timestamp,
    topology: &mut Topology,
    crtc_id: CrtcId,
) {
    let result = conn
        .randr_set_crtc_config(
            crtc_id.0,
            CURRENT_TIME,
            config_timestamp,
            0,
            0,
            x11rb::NONE,
            randr::Rotation::ROTATE0,
            &[],
        )
        .map_err(anyhow::Error::from)
        .and_then(|cookie| cookie.reply().map_err(anyhow::Error::from));
    match result {
        Ok(reply) => {
            *last_set_timestamp = reply.timestamp;
            if let Some(crtc) = topology.crtc_mut(crtc_id) {
                crtc.unset_mode();
            }
        }
        Err(e) => warn!("Failed to disable CRTC {:?}: {}", crtc_id, e),
    }
}

impl GpuXrandr {
    pub(super) fn apply_crtc_assignments(
        &mut self,
        assignments: &[CrtcAssignment],
        attrs: &[OutputAttrs],
    ) -> Result<()> {
        if !is_assignments_changed(&self.topology, assignments, attrs) {
            debug!("Configuration unchanged, skipping apply");
            return Ok(());
        }

        let bounds = screen_bounds(&self.topology, assignments);
        let _grab = ServerGrab::new(&self.conn)?;

        // Disabled assignments, and enabled ones whose current position
        // would stick out of the new screen, must go down before the
        // screen shrinks.
        for a in assignments {
            let crtc = match self.topology.crtc(a.crtc) {
                Some(crtc) => crtc.clone(),
                None => continue,
            };
            if let Some(c) = self.topology.crtc_mut(a.crtc) {
                c.is_dirty = true;
            }
            if !crtc.is_active() {
                continue;
            }
            let exceeds = match bounds {
                Some((width, height)) => !crtc.rect.fits_in(width, height),
                None => true,
            };
            if a.mode.is_none() || exceeds {
                disable_crtc_now(
                    &self.conn,
                    self.config_timestamp,
                    &mut self.last_set_timestamp,
                    &mut self.topology,
                    a.crtc,
                );
            }
        }

        // CRTCs the new configuration never mentions
        let unmentioned: Vec<_> = self
            .topology
            .crtcs
            .iter_mut()
            .filter_map(|crtc| {
                if crtc.is_dirty {
                    crtc.is_dirty = false;
                    None
                } else if crtc.is_active() {
                    Some(crtc.id)
                } else {
                    None
                }
            })
            .collect();
        for id in unmentioned {
            disable_crtc_now(
                &self.conn,
                self.config_timestamp,
                &mut self.last_set_timestamp,
                &mut self.topology,
                id,
            );
        }

        if let Some((width, height)) = bounds {
            self.conn
                .randr_set_screen_size(
                    self.root,
                    width as u16,
                    height as u16,
                    mm_from_px(width),
                    mm_from_px(height),
                )
                .context("Failed to set screen size")?
                .check()
                .context("SetScreenSize rejected")?;
        }

        for a in assignments {
            let mode_id = match a.mode {
                Some(mode_id) => mode_id,
                None => continue,
            };
            let mode = match self.topology.mode(mode_id) {
                Some(mode) => mode.clone(),
                None => {
                    warn!("Assignment references unknown mode {:?}", mode_id);
                    continue;
                }
            };
            let outputs: Vec<randr::Output> = a.outputs.iter().map(|o| o.0).collect();
            let result = self
                .conn
                .randr_set_crtc_config(
                    a.crtc.0,
                    CURRENT_TIME,
                    self.config_timestamp,
                    a.x as i16,
                    a.y as i16,
                    mode_id.0,
                    xrandr_from_transform(a.transform),
                    &outputs,
                )
                .map_err(anyhow::Error::from)
                .and_then(|cookie| cookie.reply().map_err(anyhow::Error::from));
            let reply = match result {
                Ok(reply) if reply.status == randr::SetConfig::SUCCESS => reply,
                Ok(reply) => {
                    warn!(
                        "Server rejected {}x{} at {},{} on CRTC {:?}: {:?}",
                        mode.width(),
                        mode.height(),
                        a.x,
                        a.y,
                        a.crtc,
                        reply.status
                    );
                    continue;
                }
                Err(e) => {
                    warn!("SetCrtcConfig on CRTC {:?} failed: {}", a.crtc, e);
                    continue;
                }
            };
            self.last_set_timestamp = reply.timestamp;

            let (w, h) = if a.transform.is_rotated() {
                (mode.height(), mode.width())
            } else {
                (mode.width(), mode.height())
            };
            if let Some(crtc) = self.topology.crtc_mut(a.crtc) {
                crtc.current_mode = Some(mode_id);
                crtc.rect = Rect::new(a.x, a.y, w as i32, h as i32);
                crtc.transform = a.transform;
            }
            for &output_id in &a.outputs {
                if let Some(output) = self.topology.output_mut(output_id) {
                    output.crtc = Some(a.crtc);
                }
            }
        }

        let mut primary_set = false;
        for at in attrs {
            if at.is_primary {
                self.conn
                    .randr_set_output_primary(self.root, at.output.0)
                    .context("Failed to set primary output")?
                    .check()
                    .context("SetOutputPrimary rejected")?;
                primary_set = true;
            }
            output::set_presentation(&self.conn, &self.atoms, at.output.0, at.is_presentation)?;

            let supports_underscan = self
                .topology
                .output(at.output)
                .map_or(false, |o| o.supports_underscanning);
            if supports_underscan {
                let mode_size = self
                    .topology
                    .output(at.output)
                    .and_then(|o| o.crtc)
                    .and_then(|c| self.topology.crtc(c))
                    .and_then(|c| c.current_mode)
                    .and_then(|m| self.topology.mode(m))
                    .map(|m| (m.width() as u16, m.height() as u16));
                output::set_underscan(
                    &self.conn,
                    &self.atoms,
                    at.output.0,
                    at.is_underscanning,
                    mode_size,
                )?;
            }

            if let Some(output) = self.topology.output_mut(at.output) {
                output.is_primary = at.is_primary;
                output.is_presentation = at.is_presentation;
                output.is_underscanning = at.is_underscanning && supports_underscan;
            }
        }
        if !primary_set {
            self.conn
                .randr_set_output_primary(self.root, x11rb::NONE)
                .context("Failed to clear primary output")?
                .check()
                .context("SetOutputPrimary rejected")?;
        }

        // Outputs the configuration never mentioned lose their CRTC and
        // flags.
        for output in &mut self.topology.outputs {
            let mentioned = assignments
                .iter()
                .any(|a| a.mode.is_some() && a.outputs.contains(&output.id));
            if !mentioned {
                output.crtc = None;
            }
            if !attrs.iter().any(|at| at.output == output.id) {
                output.is_primary = false;
                output.is_presentation = false;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{CrtcId, Mode, ModeId, ModeTiming, OutputId, Transform};

    fn mode(id: u32, w: u16, h: u16) -> Mode {
        Mode {
            id: ModeId(id),
            name: format!("{}x{}", w, h),
            timing: ModeTiming {
                hdisplay: w,
                vdisplay: h,
                ..Default::default()
            },
        }
    }

    fn test_topology() -> Topology {
        let mut crtc = Crtc::new(CrtcId(10));
        crtc.current_mode = Some(ModeId(1));
        crtc.rect = Rect::new(0, 0, 1920, 1080);
        let mut output = Output::new(OutputId(20), "DP-1".into());
        output.crtc = Some(CrtcId(10));
        output.modes = vec![ModeId(1)];
        output.possible_crtcs = vec![CrtcId(10)];
        output.is_primary = true;
        Topology {
            modes: vec![mode(1, 1920, 1080), mode(2, 1280, 720)],
            crtcs: vec![crtc, Crtc::new(CrtcId(11))],
            outputs: vec![output],
            max_screen_size: Some((8192, 8192)),
        }
    }

    fn current_assignment() -> CrtcAssignment {
        CrtcAssignment {
            crtc: CrtcId(10),
            mode: Some(ModeId(1)),
            x: 0,
            y: 0,
            transform: Transform::Normal,
            outputs: vec![OutputId(20)],
        }
    }

    fn current_attrs() -> OutputAttrs {
        OutputAttrs {
            output: OutputId(20),
            is_primary: true,
            is_presentation: false,
            is_underscanning: false,
        }
    }

    #[test]
    fn reapplying_the_current_configuration_changes_nothing() {
        let topology = test_topology();
        assert!(!is_assignments_changed(
            &topology,
            &[current_assignment()],
            &[current_attrs()]
        ));
    }

    #[test]
    fn mode_position_and_transform_changes_are_detected() {
        let topology = test_topology();

        let mut moved = current_assignment();
        moved.x = 100;
        assert!(is_assignments_changed(&topology, &[moved], &[current_attrs()]));

        let mut remoded = current_assignment();
        remoded.mode = Some(ModeId(2));
        assert!(is_assignments_changed(
            &topology,
            &[remoded],
            &[current_attrs()]
        ));

        let mut rotated = current_assignment();
        rotated.transform = Transform::Rotate90;
        assert!(is_assignments_changed(
            &topology,
            &[rotated],
            &[current_attrs()]
        ));
    }

    #[test]
    fn omitting_an_active_crtc_counts_as_a_change() {
        let topology = test_topology();
        assert!(is_assignments_changed(&topology, &[], &[current_attrs()]));
    }

    #[test]
    fn attribute_changes_are_detected() {
        let topology = test_topology();
        let mut demoted = current_attrs();
        demoted.is_primary = false;
        assert!(is_assignments_changed(
            &topology,
            &[current_assignment()],
            &[demoted]
        ));

        // Dropping the attrs entry for a primary output is a change too
        assert!(is_assignments_changed(
            &topology,
            &[current_assignment()],
            &[]
        ));
    }

    #[test]
    fn bounds_swap_dimensions_under_rotation() {
        let topology = test_topology();
        let mut a = current_assignment();
        a.transform = Transform::Rotate90;
        assert_eq!(screen_bounds(&topology, &[a]), Some((1080, 1920)));

        let mut side_by_side = current_assignment();
        side_by_side.x = 1920;
        side_by_side.mode = Some(ModeId(2));
        assert_eq!(
            screen_bounds(&topology, &[current_assignment(), side_by_side]),
            Some((3200, 1080))
        );
    }

    #[test]
    fn all_disabled_yields_no_bounds() {
        let topology = test_topology();
        let off = CrtcAssignment {
            crtc: CrtcId(10),
            mode: None,
            x: 0,
            y: 0,
            transform: Transform::Normal,
            outputs: vec![],
        };
        assert_eq!(screen_bounds(&topology, &[off]), None);
    }

    #[test]
    fn screen_millimeters_assume_96_dpi() {
        assert_eq!(mm_from_px(1920), 508);
        assert_eq!(mm_from_px(0), 0);
    }
}
