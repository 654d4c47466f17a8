//! Detection adapter.
//!
//! Backends wrap an object-detection model behind [`DetectorBackend`]; the
//! [`ModelHandle`] owns the single loaded backend and is injected into the
//! analyzer. [`Detection`] is the validated record the severity assessor
//! consumes.

mod backend;
mod backends;
mod model;
mod result;

pub use backend::{DetectorBackend, DEFAULT_CONFIDENCE_THRESHOLD};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::{TractBackend, YoloParams};
pub use model::ModelHandle;
pub use result::{BoundingBox, Detection, RawDetection, POTHOLE_CLASS_ID};
