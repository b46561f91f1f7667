//! DRM device wrapper
//!
//! Opens /dev/dri/card* and exposes the resource queries the topology
//! builder needs, including the raw-ioctl gap fillers for data the
//! `drm` crate does not surface.

use anyhow::{Context, Result};
use drm::control::{connector, crtc, encoder, plane, Device as ControlDevice, ResourceHandles};
use drm::{ClientCapability, Device as BasicDevice};
use log::{debug, info};
use std::fs::{File, OpenOptions};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::path::Path;

use super::ioctl;

pub struct Device {
    file: File,
    resources: ResourceHandles,
    /// (min, max) framebuffer dimensions
    fb_limits: ((u32, u32), (u32, u32)),
}

impl AsFd for Device {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl BasicDevice for Device {}
impl ControlDevice for Device {}

impl Device {
    /// Open a device node such as `/dev/dri/card0` and enable universal
    /// planes so primary planes are enumerable for rotation discovery.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening DRM device {}", path.display());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Cannot open DRM device {}", path.display()))?;

        // Temporary wrapper so the drm-crate queries work before Self exists
        struct TempDevice<'a>(&'a File);
        impl AsFd for TempDevice<'_> {
            fn as_fd(&self) -> BorrowedFd<'_> {
                self.0.as_fd()
            }
        }
        impl BasicDevice for TempDevice<'_> {}
        impl ControlDevice for TempDevice<'_> {}

        let temp = TempDevice(&file);

        if let Err(e) = temp.set_client_capability(ClientCapability::UniversalPlanes, true) {
            debug!("Universal planes capability unavailable: {}", e);
        }

        let resources = temp
            .resource_handles()
            .context("Failed to get DRM resources")?;

        let fb_limits = ioctl::framebuffer_limits(file.as_raw_fd())?;

        info!(
            "DRM resources: connectors={}, crtcs={}, encoders={}, fb max={}x{}",
            resources.connectors().len(),
            resources.crtcs().len(),
            resources.encoders().len(),
            fb_limits.1 .0,
            fb_limits.1 .1
        );

        Ok(Self {
            file,
            resources,
            fb_limits,
        })
    }

    /// Re-fetch the resource handles; connectors come and go with
    /// hotpluggable hardware (DisplayLink, MST).
    pub fn reload_resources(&mut self) -> Result<()> {
        self.resources = self
            .resource_handles()
            .context("Failed to re-read DRM resources")?;
        self.fb_limits = ioctl::framebuffer_limits(self.file.as_raw_fd())?;
        Ok(())
    }

    pub fn resources(&self) -> &ResourceHandles {
        &self.resources
    }

    /// Largest framebuffer the device can scan out.
    pub fn max_framebuffer_size(&self) -> (u32, u32) {
        self.fb_limits.1
    }

    pub fn connector(&self, handle: connector::Handle) -> Result<connector::Info> {
        ControlDevice::get_connector(self, handle, false)
            .with_context(|| format!("Failed to read connector {:?}", handle))
    }

    pub fn encoder(&self, handle: encoder::Handle) -> Result<encoder::Info> {
        ControlDevice::get_encoder(self, handle)
            .with_context(|| format!("Failed to read encoder {:?}", handle))
    }

    /// Raw encoder record with the possible-crtcs and possible-clones
    /// bitmasks (the latter has no drm-crate accessor).
    pub fn encoder_masks(&self, handle: encoder::Handle) -> Result<(u32, u32)> {
        let enc = ioctl::get_encoder(self.as_raw_fd(), handle.into())?;
        Ok((enc.possible_crtcs, enc.possible_clones))
    }

    pub fn crtc(&self, handle: crtc::Handle) -> Result<crtc::Info> {
        ControlDevice::get_crtc(self, handle)
            .with_context(|| format!("Failed to read CRTC {:?}", handle))
    }

    pub fn plane(&self, handle: plane::Handle) -> Result<plane::Info> {
        ControlDevice::get_plane(self, handle)
            .with_context(|| format!("Failed to read plane {:?}", handle))
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
