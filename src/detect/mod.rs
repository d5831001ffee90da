mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{DetectionCapability, DetectorBackend, PredictParams};
pub use backends::{default_class_names, ScriptStep, StubBackend, STUB_CLASS_NAMES};
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{BoundingBox, RawDetection, RawDetections};

#[cfg(feature = "backend-tract")]
pub use backends::OnnxSegBackend;
