//! GPU snapshot and the backend abstraction

use anyhow::{anyhow, bail, Result};

use super::crtc::{Crtc, CrtcId};
use super::mode::{Mode, ModeId};
use super::output::{Output, OutputId};
use super::transform::Transform;

/// Monitor power state (DPMS levels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerSave {
    #[default]
    On,
    Standby,
    Suspend,
    Off,
    Unsupported,
}

/// One complete snapshot of a GPU's display resources.
///
/// A snapshot is immutable between `read_current` calls except for the
/// logical-state updates an apply pass makes to mirror what the
/// hardware actually accepted.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub modes: Vec<Mode>,
    pub crtcs: Vec<Crtc>,
    pub outputs: Vec<Output>,
    /// Largest framebuffer/screen the device supports, when known.
    pub max_screen_size: Option<(u32, u32)>,
}

impl Topology {
    pub fn mode(&self, id: ModeId) -> Option<&Mode> {
        self.modes.iter().find(|m| m.id == id)
    }

    pub fn crtc(&self, id: CrtcId) -> Option<&Crtc> {
        self.crtcs.iter().find(|c| c.id == id)
    }

    pub fn crtc_mut(&mut self, id: CrtcId) -> Option<&mut Crtc> {
        self.crtcs.iter_mut().find(|c| c.id == id)
    }

    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs.iter().find(|o| o.id == id)
    }

    pub fn output_mut(&mut self, id: OutputId) -> Option<&mut Output> {
        self.outputs.iter_mut().find(|o| o.id == id)
    }

    /// Outputs currently driven by the given CRTC.
    pub fn outputs_on_crtc(&self, id: CrtcId) -> Vec<OutputId> {
        self.outputs
            .iter()
            .filter(|o| o.crtc == Some(id))
            .map(|o| o.id)
            .collect()
    }

    /// Cross-reference every id in the snapshot. A violation means the
    /// enumeration pass has a bug; backends assert this in debug builds
    /// after installing a rebuilt snapshot.
    pub fn check_consistency(&self) -> Result<()> {
        for output in &self.outputs {
            for &mode_id in &output.modes {
                if self.mode(mode_id).is_none() {
                    bail!("Output {} lists unknown mode {:?}", output.name, mode_id);
                }
            }
            if let Some(preferred) = output.preferred_mode {
                if !output.modes.contains(&preferred) {
                    bail!(
                        "Output {} prefers {:?} outside its mode list",
                        output.name,
                        preferred
                    );
                }
            }
            for &crtc_id in &output.possible_crtcs {
                if self.crtc(crtc_id).is_none() {
                    bail!("Output {} lists unknown CRTC {:?}", output.name, crtc_id);
                }
            }
            if let Some(assigned) = output.crtc {
                if !output.possible_crtcs.contains(&assigned) {
                    bail!(
                        "Output {} assigned to CRTC {:?} outside its possible set",
                        output.name,
                        assigned
                    );
                }
            }
            for &clone_id in &output.clones {
                let partner = self
                    .output(clone_id)
                    .ok_or_else(|| anyhow!("Output {} clones unknown {:?}", output.name, clone_id))?;
                if !partner.clones.contains(&output.id) {
                    bail!(
                        "Clone relation {} -> {} is not symmetric",
                        output.name,
                        partner.name
                    );
                }
            }
        }
        Ok(())
    }
}

/// Desired state for one CRTC in an apply pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CrtcAssignment {
    pub crtc: CrtcId,
    /// `None` disables the CRTC.
    pub mode: Option<ModeId>,
    pub x: i32,
    pub y: i32,
    pub transform: Transform,
    /// Outputs to drive from this CRTC (more than one when cloning).
    pub outputs: Vec<OutputId>,
}

/// Desired per-output attributes in an apply pass.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputAttrs {
    pub output: OutputId,
    pub is_primary: bool,
    pub is_presentation: bool,
    pub is_underscanning: bool,
}

/// A display backend: one per DRM device or per X11 screen.
///
/// Implementations rebuild the whole [`Topology`] in `read_current`
/// before installing it, so a failed re-enumeration leaves the previous
/// snapshot intact, and a repeated call with unchanged hardware yields a
/// structurally equal snapshot.
pub trait Gpu {
    /// Re-enumerate CRTCs, outputs and modes from the live device.
    fn read_current(&mut self) -> Result<()>;

    fn topology(&self) -> &Topology;

    /// Diff the desired assignments against live state and issue the
    /// minimal hardware operations. Per-entity failures are logged and
    /// reflected in the topology; they do not abort the batch.
    fn apply(&mut self, assignments: &[CrtcAssignment], attrs: &[OutputAttrs]) -> Result<()>;

    fn power_save_mode(&self) -> PowerSave;

    fn set_power_save_mode(&mut self, mode: PowerSave) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::crtc::Rect;
    use crate::topology::mode::ModeTiming;

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

    #[test]
    fn lookups_by_id() {
        let mut topology = Topology {
            modes: vec![mode(7, 1920, 1080)],
            crtcs: vec![Crtc::new(CrtcId(31))],
            outputs: vec![Output::new(OutputId(64), "DP-1".into())],
            max_screen_size: None,
        };
        assert_eq!(topology.mode(ModeId(7)).map(|m| m.width()), Some(1920));
        assert!(topology.crtc(CrtcId(30)).is_none());
        topology.crtc_mut(CrtcId(31)).unwrap().rect = Rect::new(0, 0, 1, 1);
        assert_eq!(topology.crtc(CrtcId(31)).unwrap().rect.width, 1);
        assert_eq!(topology.output(OutputId(64)).unwrap().name, "DP-1");
    }

    #[test]
    fn outputs_on_crtc_filters_by_assignment() {
        let mut a = Output::new(OutputId(1), "HDMI-1".into());
        let mut b = Output::new(OutputId(2), "HDMI-2".into());
        let c = Output::new(OutputId(3), "DP-1".into());
        a.crtc = Some(CrtcId(9));
        b.crtc = Some(CrtcId(9));
        let topology = Topology {
            outputs: vec![a, b, c],
            ..Default::default()
        };
        assert_eq!(
            topology.outputs_on_crtc(CrtcId(9)),
            vec![OutputId(1), OutputId(2)]
        );
    }

    fn consistent_topology() -> Topology {
        let mut a = Output::new(OutputId(1), "HDMI-1".into());
        a.modes = vec![ModeId(7)];
        a.preferred_mode = Some(ModeId(7));
        a.possible_crtcs = vec![CrtcId(31)];
        a.crtc = Some(CrtcId(31));
        a.clones = vec![OutputId(2)];
        let mut b = Output::new(OutputId(2), "HDMI-2".into());
        b.modes = vec![ModeId(7)];
        b.possible_crtcs = vec![CrtcId(31)];
        b.clones = vec![OutputId(1)];
        Topology {
            modes: vec![mode(7, 1920, 1080)],
            crtcs: vec![Crtc::new(CrtcId(31))],
            outputs: vec![a, b],
            max_screen_size: None,
        }
    }

    #[test]
    fn consistency_accepts_a_well_formed_snapshot() {
        assert!(consistent_topology().check_consistency().is_ok());
    }

    #[test]
    fn consistency_rejects_assignment_outside_possible_crtcs() {
        let mut topology = consistent_topology();
        topology.outputs[0].crtc = Some(CrtcId(99));
        assert!(topology.check_consistency().is_err());
    }

    #[test]
    fn consistency_rejects_asymmetric_clone_lists() {
        let mut topology = consistent_topology();
        topology.outputs[1].clones.clear();
        assert!(topology.check_consistency().is_err());
    }

    #[test]
    fn consistency_rejects_dangling_clone_ids() {
        let mut topology = consistent_topology();
        topology.outputs[0].clones.push(OutputId(9));
        assert!(topology.check_consistency().is_err());
    }

    #[test]
    fn consistency_rejects_unknown_mode_references() {
        let mut topology = consistent_topology();
        topology.outputs[0].modes.push(ModeId(8));
        assert!(topology.check_consistency().is_err());
    }
}
