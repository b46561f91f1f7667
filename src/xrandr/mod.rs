//! XRandR backend, for running inside an X session

mod apply;
mod event;
mod gpu;
mod output;
mod rotation;
mod tiled;

pub use event::ChangeClass;
pub use gpu::GpuXrandr;
pub use rotation::{transform_from_xrandr, transforms_from_xrandr_all, xrandr_from_transform};
