//! Hardware display topology model
//!
//! Backend-agnostic entities: modes, CRTCs, outputs and the per-GPU
//! snapshot that ties them together. Entities reference each other by
//! stable integer ids into the owning snapshot's vectors; a whole
//! snapshot is replaced atomically on re-enumeration, so references
//! never dangle.

pub mod crtc;
pub mod gpu;
pub mod mode;
pub mod output;
pub mod transform;

pub use crtc::{Crtc, CrtcId, Rect};
pub use gpu::{CrtcAssignment, Gpu, OutputAttrs, PowerSave, Topology};
pub use mode::{Mode, ModeId, ModeTiming};
pub use output::{ConnectorType, Output, OutputId, TileInfo};
pub use transform::{Transform, TransformSet};
