//! Native DRM/KMS backend

mod apply;
mod default_modes;
mod device;
mod gpu;
pub mod hotplug;
mod ioctl;

pub use device::Device;
pub use gpu::GpuKms;
