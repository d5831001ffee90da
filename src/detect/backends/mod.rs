pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{default_class_names, ScriptStep, StubBackend, STUB_CLASS_NAMES};

#[cfg(feature = "backend-tract")]
pub use tract::OnnxSegBackend;
