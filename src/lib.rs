//! Display topology management for Linux
//!
//! One backend-neutral model of a GPU's display resources (modes,
//! CRTCs, outputs) with two ways to drive it:
//!
//! - [`kms::GpuKms`] talks straight to a DRM device node, for running
//!   on a bare VT or inside a compositor.
//! - [`xrandr::GpuXrandr`] goes through an X server's RandR extension.
//!
//! Both implement the [`topology::Gpu`] trait: enumerate into a
//! [`topology::Topology`] snapshot, diff desired assignments against
//! it, and apply the difference.

pub mod edid;
pub mod error;
pub mod kms;
pub mod topology;
pub mod xrandr;

pub use error::FlipError;
pub use topology::{
    ConnectorType, Crtc, CrtcAssignment, CrtcId, Gpu, Mode, ModeId, ModeTiming, Output,
    OutputAttrs, OutputId, PowerSave, Rect, TileInfo, Topology, Transform, TransformSet,
};
