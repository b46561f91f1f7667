//! KMS configuration apply and page flipping
//!
//! `Gpu::apply` records the new logical assignment and hardware-disables
//! every CRTC the configuration leaves out. Actually lighting up a CRTC
//! needs a framebuffer, which only the caller owns, so that happens
//! through [`GpuKms::apply_crtc_mode`] (blocking SETCRTC) or
//! [`GpuKms::flip_crtc`] (non-blocking page flip with a completion
//! callback).

use anyhow::{anyhow, Context, Result};
use drm::control::{framebuffer, Device as ControlDevice, PageFlipFlags};
use log::{debug, warn};

use crate::error::FlipError;
use crate::topology::{CrtcAssignment, CrtcId, Mode, OutputAttrs, Rect, Transform, TransformSet};

use super::gpu::GpuKms;
use super::ioctl;

/// Underscan borders are 5% of the mode, capped at 128 pixels.
const UNDERSCAN_BORDER_MAX: u64 = 128;

fn underscan_border(dimension: u16) -> u64 {
    ((f64::from(dimension) * 0.05).round() as u64).min(UNDERSCAN_BORDER_MAX)
}

fn modeinfo_from_mode(mode: &Mode) -> ioctl::drm_mode_modeinfo {
    let t = &mode.timing;
    let mut info = ioctl::drm_mode_modeinfo {
        clock: t.clock,
        hdisplay: t.hdisplay,
        hsync_start: t.hsync_start,
        hsync_end: t.hsync_end,
        htotal: t.htotal,
        hskew: t.hskew,
        vdisplay: t.vdisplay,
        vsync_start: t.vsync_start,
        vsync_end: t.vsync_end,
        vtotal: t.vtotal,
        vscan: t.vscan,
        vrefresh: t.vrefresh,
        flags: t.flags,
        type_: t.kind,
        ..Default::default()
    };
    let name = mode.name.as_bytes();
    let len = name.len().min(info.name.len() - 1);
    info.name[..len].copy_from_slice(&name[..len]);
    info
}

/// Classify a failed page flip by errno.
///
/// Anything other than EACCES means the driver cannot flip at all and
/// the device is demoted to the blocking SETCRTC path for good. EACCES
/// is transient (DRM master lost across a VT switch): no demotion, and
/// the framebuffer is not recorded as scanned out.
pub(super) fn flip_error_policy(
    errno: i32,
    page_flips_not_supported: &mut bool,
) -> FlipError {
    if errno == libc::EACCES {
        FlipError::PermissionDenied
    } else {
        *page_flips_not_supported = true;
        FlipError::NotSupported
    }
}

impl GpuKms {
    /// Record a new assignment set and disable every CRTC it leaves
    /// out. Enabled CRTCs get their logical state (mode, rect,
    /// transform) and hardware rotation updated here; scanout starts
    /// once the caller provides a framebuffer via
    /// [`GpuKms::apply_crtc_mode`] or [`GpuKms::flip_crtc`].
    pub(super) fn apply_crtc_assignments(
        &mut self,
        assignments: &[CrtcAssignment],
        attrs: &[OutputAttrs],
    ) -> Result<()> {
        for assignment in assignments {
            self.apply_one_assignment(assignment)?;
        }

        // Outputs follow the CRTC they were assigned to
        for output in &mut self.topology.outputs {
            output.crtc = assignments
                .iter()
                .find(|a| a.mode.is_some() && a.outputs.contains(&output.id))
                .map(|a| a.crtc);
        }

        for attr in attrs {
            self.apply_output_attrs(attr)?;
        }

        // Hardware-disable CRTCs with no assignment or an empty one
        let unused: Vec<CrtcId> = self
            .topology
            .crtcs
            .iter()
            .filter(|c| {
                !assignments
                    .iter()
                    .any(|a| a.crtc == c.id && a.mode.is_some())
            })
            .map(|c| c.id)
            .collect();
        for id in unused {
            self.disable_crtc(id)?;
        }
        Ok(())
    }

    fn apply_one_assignment(&mut self, assignment: &CrtcAssignment) -> Result<()> {
        let mode = match assignment.mode {
            Some(mode_id) => self
                .topology
                .mode(mode_id)
                .ok_or_else(|| anyhow!("Unknown mode {:?} in assignment", mode_id))?,
            None => return Ok(()),
        };
        let (w, h) = if assignment.transform.is_rotated() {
            (mode.height(), mode.width())
        } else {
            (mode.width(), mode.height())
        };
        let rect = Rect::new(assignment.x, assignment.y, w as i32, h as i32);

        self.set_plane_rotation(assignment.crtc, assignment.transform);

        let crtc = self
            .topology
            .crtc_mut(assignment.crtc)
            .ok_or_else(|| anyhow!("Unknown CRTC {:?} in assignment", assignment.crtc))?;
        crtc.current_mode = assignment.mode;
        crtc.rect = rect;
        crtc.transform = assignment.transform;
        Ok(())
    }

    /// Write the transform to the primary plane's rotation property.
    /// On failure the hardware path is blacklisted for that CRTC so
    /// callers fall back to compositing the transform.
    fn set_plane_rotation(&mut self, crtc_id: CrtcId, transform: Transform) {
        let (plane, prop, value) = match self
            .crtc_state(crtc_id)
            .and_then(|s| s.rotation.as_ref())
            .and_then(|rot| rot.value_for(transform).map(|v| (rot.plane, rot.prop, v)))
        {
            Some(parts) => parts,
            None => return,
        };
        if let Err(e) = self.device.set_property(plane, prop, value) {
            warn!(
                "Failed to set rotation on CRTC {:?}, disabling hardware transforms: {}",
                crtc_id, e
            );
            if let Some(crtc) = self.topology.crtc_mut(crtc_id) {
                crtc.all_transforms = TransformSet::NORMAL;
            }
            if let Some(state) = self.crtc_states.iter_mut().find(|s| s.id == crtc_id) {
                state.rotation = None;
            }
        }
    }

    fn apply_output_attrs(&mut self, attrs: &OutputAttrs) -> Result<()> {
        self.set_underscan(attrs.output, attrs.is_underscanning)?;
        let output = self
            .topology
            .output_mut(attrs.output)
            .ok_or_else(|| anyhow!("Unknown output {:?} in attributes", attrs.output))?;
        output.is_primary = attrs.is_primary;
        output.is_presentation = attrs.is_presentation;
        output.is_underscanning = attrs.is_underscanning && output.supports_underscanning;
        Ok(())
    }

    fn set_underscan(&self, output_id: crate::topology::OutputId, enable: bool) -> Result<()> {
        let state = match self.output_state(output_id) {
            Some(state) => state,
            None => return Ok(()),
        };
        let props = match &state.underscan {
            Some(props) => props.clone(),
            None => return Ok(()),
        };
        if enable {
            self.device
                .set_property(state.connector, props.prop, props.on_value)
                .context("Failed to enable underscan")?;
            // Borders from the mode currently driving this output
            let mode = self
                .topology
                .output(output_id)
                .and_then(|o| o.crtc)
                .and_then(|c| self.topology.crtc(c))
                .and_then(|c| c.current_mode)
                .and_then(|m| self.topology.mode(m));
            if let Some(mode) = mode {
                if let Some(hborder) = props.hborder {
                    self.device
                        .set_property(
                            state.connector,
                            hborder,
                            underscan_border(mode.timing.hdisplay),
                        )
                        .context("Failed to set underscan hborder")?;
                }
                if let Some(vborder) = props.vborder {
                    self.device
                        .set_property(
                            state.connector,
                            vborder,
                            underscan_border(mode.timing.vdisplay),
                        )
                        .context("Failed to set underscan vborder")?;
                }
            }
        } else {
            self.device
                .set_property(state.connector, props.prop, props.off_value)
                .context("Failed to disable underscan")?;
        }
        Ok(())
    }

    fn disable_crtc(&mut self, crtc_id: CrtcId) -> Result<()> {
        if let Some(crtc) = self.topology.crtc_mut(crtc_id) {
            if !crtc.is_active() {
                return Ok(());
            }
            crtc.unset_mode();
        }
        let state = self
            .crtc_state(crtc_id)
            .ok_or_else(|| anyhow!("Unknown CRTC {:?}", crtc_id))?;
        let crtc_id_raw: u32 = state.handle.into();
        ioctl::set_crtc(self.device.as_raw_fd(), crtc_id_raw, 0, 0, 0, None, &[])
            .with_context(|| format!("Failed to disable CRTC {:?}", crtc_id))
    }

    /// Blocking mode set: scan out `fb_id` on the CRTC with its
    /// currently assigned mode and connector set.
    pub fn apply_crtc_mode(&mut self, crtc_id: CrtcId, fb_id: u32) -> Result<()> {
        let crtc = self
            .topology
            .crtc(crtc_id)
            .ok_or_else(|| anyhow!("Unknown CRTC {:?}", crtc_id))?;
        let mode = crtc
            .current_mode
            .and_then(|m| self.topology.mode(m))
            .ok_or_else(|| anyhow!("CRTC {:?} has no mode assigned", crtc_id))?;
        let modeinfo = modeinfo_from_mode(mode);
        let connectors: Vec<u32> = self
            .topology
            .outputs_on_crtc(crtc_id)
            .iter()
            .map(|id| id.0)
            .collect();
        if connectors.is_empty() {
            return Err(anyhow!("CRTC {:?} has no outputs assigned", crtc_id));
        }
        let state = self
            .crtc_state(crtc_id)
            .ok_or_else(|| anyhow!("Unknown CRTC {:?}", crtc_id))?;
        let crtc_id_raw: u32 = state.handle.into();
        ioctl::set_crtc(
            self.device.as_raw_fd(),
            crtc_id_raw,
            fb_id,
            0,
            0,
            Some(&modeinfo),
            &connectors,
        )
        .with_context(|| format!("Failed to set mode on CRTC {:?}", crtc_id))?;
        self.fb_in_use = true;
        Ok(())
    }

    /// Schedule a page flip to `fb_id`; `on_complete` runs from
    /// [`GpuKms::process_events`] once the flip lands.
    pub fn flip_crtc(
        &mut self,
        crtc_id: CrtcId,
        fb_id: u32,
        on_complete: Box<dyn FnOnce()>,
    ) -> Result<(), FlipError> {
        if self.page_flips_not_supported {
            return Err(FlipError::NotSupported);
        }
        if self.pending_flips.contains_key(&crtc_id) {
            return Err(FlipError::AlreadyPending);
        }
        let handle = match self.crtc_state(crtc_id) {
            Some(state) => state.handle,
            None => {
                return Err(FlipError::Failed(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "unknown CRTC",
                )))
            }
        };
        if fb_id == 0 {
            return Err(FlipError::Failed(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "cannot flip to framebuffer 0",
            )));
        }
        // Raw fb ids come from the renderer; a nonzero id is a valid handle
        let fb = unsafe { std::mem::transmute::<u32, framebuffer::Handle>(fb_id) };

        match self.device.page_flip(handle, fb, PageFlipFlags::EVENT, None) {
            Ok(()) => {
                self.pending_flips.insert(crtc_id, on_complete);
                self.fb_in_use = true;
                Ok(())
            }
            Err(e) => {
                let errno = e.raw_os_error().unwrap_or(0);
                let err = flip_error_policy(errno, &mut self.page_flips_not_supported);
                if matches!(err, FlipError::NotSupported) {
                    debug!("Page flips unavailable (errno {}), using SETCRTC", errno);
                }
                Err(err)
            }
        }
    }

    /// Drain pending DRM events, running flip completion callbacks.
    pub fn process_events(&mut self) -> Result<()> {
        let events = match self.device.receive_events() {
            Ok(events) => events,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e).context("Failed to read DRM events"),
        };
        for event in events {
            if let drm::control::Event::PageFlip(flip) = event {
                let crtc_id = CrtcId(flip.crtc.into());
                if let Some(on_complete) = self.pending_flips.remove(&crtc_id) {
                    on_complete();
                } else {
                    debug!("Flip completion for CRTC {:?} with no waiter", crtc_id);
                }
            }
        }
        Ok(())
    }

    /// Block until every scheduled flip has completed.
    pub fn wait_for_flips(&mut self) -> Result<()> {
        while !self.pending_flips.is_empty() {
            if self.page_flips_not_supported {
                return Err(anyhow!("Flips pending on a device that cannot flip"));
            }
            let mut pollfd = libc::pollfd {
                fd: self.device.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let ret = unsafe { libc::poll(&mut pollfd, 1, -1) };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(err).context("poll on DRM fd failed");
            }
            self.process_events()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::ModeTiming;

    #[test]
    fn eacces_is_transient() {
        let mut not_supported = false;
        let err = flip_error_policy(libc::EACCES, &mut not_supported);
        assert!(matches!(err, FlipError::PermissionDenied));
        assert!(!not_supported);
    }

    #[test]
    fn other_errnos_demote_permanently() {
        let mut not_supported = false;
        let err = flip_error_policy(libc::EINVAL, &mut not_supported);
        assert!(matches!(err, FlipError::NotSupported));
        assert!(not_supported);

        // EBUSY too: drivers without async flip support report it
        let err = flip_error_policy(libc::EBUSY, &mut not_supported);
        assert!(matches!(err, FlipError::NotSupported));
    }

    #[test]
    fn underscan_borders_are_five_percent_capped() {
        assert_eq!(underscan_border(1920), 96);
        assert_eq!(underscan_border(1080), 54);
        assert_eq!(underscan_border(640), 32);
        // 5% of 3840 is 192, capped
        assert_eq!(underscan_border(3840), 128);
    }

    #[test]
    fn modeinfo_carries_timing_and_name() {
        let mode = Mode {
            id: crate::topology::ModeId(3),
            name: "1920x1080".to_string(),
            timing: ModeTiming {
                clock: 148_500,
                hdisplay: 1920,
                hsync_start: 2008,
                hsync_end: 2052,
                htotal: 2200,
                vdisplay: 1080,
                vsync_start: 1084,
                vsync_end: 1089,
                vtotal: 1125,
                vrefresh: 60,
                ..Default::default()
            },
        };
        let info = modeinfo_from_mode(&mode);
        assert_eq!(info.clock, 148_500);
        assert_eq!(info.hdisplay, 1920);
        assert_eq!(info.vtotal, 1125);
        assert_eq!(&info.name[..9], b"1920x1080");
        assert_eq!(info.name[9], 0);
    }

    #[test]
    fn long_mode_names_are_truncated_with_nul() {
        let mode = Mode {
            id: crate::topology::ModeId(0),
            name: "x".repeat(40),
            timing: ModeTiming::default(),
        };
        let info = modeinfo_from_mode(&mode);
        assert_eq!(info.name[30], b'x');
        assert_eq!(info.name[31], 0);
    }
}
