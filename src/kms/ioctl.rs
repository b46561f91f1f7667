//! Raw DRM ioctls the `drm` crate does not surface
//!
//! Three gaps matter here: the device's min/max framebuffer bounds
//! (GETRESOURCES header fields), an encoder's possible-clones mask
//! (GETENCODER), bitmask property enum entries (GETPROPERTY), and a
//! SETCRTC that carries a caller-built timing blob. Each is issued
//! through a checked `libc::ioctl` wrapper with `#[repr(C)]` request
//! structs mirroring the kernel uapi.

#![allow(non_camel_case_types)]

use anyhow::{anyhow, Result};
use std::os::unix::io::RawFd;

/// Execute an ioctl with a mutable argument, mapping failure to an
/// error carrying the command name and errno.
pub fn ioctl_with_mut_arg<T>(
    fd: RawFd,
    cmd: libc::c_ulong,
    arg: &mut T,
    cmd_name: &str,
) -> Result<()> {
    let ret = unsafe { libc::ioctl(fd, cmd, arg as *mut T) };
    if ret < 0 {
        Err(anyhow!(
            "{} failed on fd {}: {}",
            cmd_name,
            fd,
            std::io::Error::last_os_error()
        ))
    } else {
        Ok(())
    }
}

// Linux: include/uapi/drm/drm.h, include/uapi/drm/drm_mode.h
const DRM_IOCTL_BASE: u64 = 0x64;

#[repr(C)]
#[derive(Default)]
pub struct drm_mode_card_res {
    pub fb_id_ptr: u64,
    pub crtc_id_ptr: u64,
    pub connector_id_ptr: u64,
    pub encoder_id_ptr: u64,
    pub count_fbs: u32,
    pub count_crtcs: u32,
    pub count_connectors: u32,
    pub count_encoders: u32,
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
pub struct drm_mode_get_encoder {
    pub encoder_id: u32,
    pub encoder_type: u32,
    pub crtc_id: u32,
    pub possible_crtcs: u32,
    pub possible_clones: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct drm_mode_modeinfo {
    pub clock: u32,
    pub hdisplay: u16,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub hskew: u16,
    pub vdisplay: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub vscan: u16,
    pub vrefresh: u32,
    pub flags: u32,
    pub type_: u32,
    pub name: [u8; 32],
}

impl Default for drm_mode_modeinfo {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Default)]
pub struct drm_mode_crtc {
    pub set_connectors_ptr: u64,
    pub count_connectors: u32,
    pub crtc_id: u32,
    pub fb_id: u32,
    pub x: u32,
    pub y: u32,
    pub gamma_size: u32,
    pub mode_valid: u32,
    pub mode: drm_mode_modeinfo,
}

#[repr(C)]
pub struct drm_mode_property_enum {
    pub value: u64,
    pub name: [u8; 32],
}

impl Default for drm_mode_property_enum {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
pub struct drm_mode_get_property {
    pub values_ptr: u64,
    pub enum_blob_ptr: u64,
    pub prop_id: u32,
    pub flags: u32,
    pub name: [u8; 32],
    pub count_values: u32,
    pub count_enum_blobs: u32,
}

impl Default for drm_mode_get_property {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

pub const DRM_IOCTL_MODE_GETRESOURCES: libc::c_ulong = nix::request_code_readwrite!(
    DRM_IOCTL_BASE,
    0xA0,
    std::mem::size_of::<drm_mode_card_res>()
) as libc::c_ulong;

pub const DRM_IOCTL_MODE_SETCRTC: libc::c_ulong = nix::request_code_readwrite!(
    DRM_IOCTL_BASE,
    0xA2,
    std::mem::size_of::<drm_mode_crtc>()
) as libc::c_ulong;

pub const DRM_IOCTL_MODE_GETENCODER: libc::c_ulong = nix::request_code_readwrite!(
    DRM_IOCTL_BASE,
    0xA6,
    std::mem::size_of::<drm_mode_get_encoder>()
) as libc::c_ulong;

pub const DRM_IOCTL_MODE_GETPROPERTY: libc::c_ulong = nix::request_code_readwrite!(
    DRM_IOCTL_BASE,
    0xAA,
    std::mem::size_of::<drm_mode_get_property>()
) as libc::c_ulong;

/// Min/max framebuffer dimensions from the GETRESOURCES header. All
/// array pointers stay zeroed so the kernel only fills the counts and
/// the bounds.
pub fn framebuffer_limits(fd: RawFd) -> Result<((u32, u32), (u32, u32))> {
    let mut res = drm_mode_card_res::default();
    ioctl_with_mut_arg(fd, DRM_IOCTL_MODE_GETRESOURCES, &mut res, "GETRESOURCES")?;
    Ok((
        (res.min_width, res.min_height),
        (res.max_width, res.max_height),
    ))
}

/// Raw encoder record, including the possible-crtcs/possible-clones
/// bitmasks over the device's encoder and CRTC arrays.
pub fn get_encoder(fd: RawFd, encoder_id: u32) -> Result<drm_mode_get_encoder> {
    let mut enc = drm_mode_get_encoder {
        encoder_id,
        ..Default::default()
    };
    ioctl_with_mut_arg(fd, DRM_IOCTL_MODE_GETENCODER, &mut enc, "GETENCODER")?;
    Ok(enc)
}

/// Named values of an enum or bitmask property.
///
/// Two-round fetch: the first call reports the entry count, the second
/// fills caller-allocated arrays.
pub fn property_enum_values(fd: RawFd, prop_id: u32) -> Result<Vec<(u64, String)>> {
    let mut prop = drm_mode_get_property {
        prop_id,
        ..Default::default()
    };
    ioctl_with_mut_arg(fd, DRM_IOCTL_MODE_GETPROPERTY, &mut prop, "GETPROPERTY")?;

    let count = prop.count_enum_blobs as usize;
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut enums: Vec<drm_mode_property_enum> = Vec::with_capacity(count);
    enums.resize_with(count, Default::default);
    let mut prop = drm_mode_get_property {
        prop_id,
        count_enum_blobs: count as u32,
        enum_blob_ptr: enums.as_mut_ptr() as u64,
        ..Default::default()
    };
    ioctl_with_mut_arg(fd, DRM_IOCTL_MODE_GETPROPERTY, &mut prop, "GETPROPERTY")?;

    let filled = (prop.count_enum_blobs as usize).min(count);
    Ok(enums[..filled]
        .iter()
        .map(|e| {
            let len = e.name.iter().position(|&b| b == 0).unwrap_or(e.name.len());
            (e.value, String::from_utf8_lossy(&e.name[..len]).into_owned())
        })
        .collect())
}

/// Legacy SETCRTC carrying an explicit timing blob and connector list.
///
/// `mode` of `None` disables the CRTC (mode_valid = 0, no fb).
pub fn set_crtc(
    fd: RawFd,
    crtc_id: u32,
    fb_id: u32,
    x: u32,
    y: u32,
    mode: Option<&drm_mode_modeinfo>,
    connector_ids: &[u32],
) -> Result<()> {
    let mut req = drm_mode_crtc {
        crtc_id,
        fb_id,
        x,
        y,
        ..Default::default()
    };
    if let Some(mode) = mode {
        req.mode = *mode;
        req.mode_valid = 1;
        req.set_connectors_ptr = connector_ids.as_ptr() as u64;
        req.count_connectors = connector_ids.len() as u32;
    }
    ioctl_with_mut_arg(fd, DRM_IOCTL_MODE_SETCRTC, &mut req, "SETCRTC")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modeinfo_matches_kernel_layout() {
        // 68 bytes: 4 + 10*2 + 3*4 + 32
        assert_eq!(std::mem::size_of::<drm_mode_modeinfo>(), 68);
        assert_eq!(std::mem::size_of::<drm_mode_crtc>(), 104);
        assert_eq!(std::mem::size_of::<drm_mode_card_res>(), 64);
        assert_eq!(std::mem::size_of::<drm_mode_get_encoder>(), 20);
        assert_eq!(std::mem::size_of::<drm_mode_get_property>(), 64);
        assert_eq!(std::mem::size_of::<drm_mode_property_enum>(), 40);
    }
}
