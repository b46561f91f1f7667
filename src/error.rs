//! Error types callers need to branch on

use thiserror::Error;

/// Page-flip failure classification.
///
/// Most flip failures permanently demote the device to the blocking
/// set-CRTC path; `PermissionDenied` (EACCES, typically a dropped DRM
/// master during a VT switch) is transient and triggers no demotion.
#[derive(Debug, Error)]
pub enum FlipError {
    #[error("page flipping not supported on this device")]
    NotSupported,
    #[error("page flip rejected: permission denied")]
    PermissionDenied,
    #[error("page flip failed: {0}")]
    Failed(#[source] std::io::Error),
    #[error("a flip is already pending on this CRTC")]
    AlreadyPending,
}
