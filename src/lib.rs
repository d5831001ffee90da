//! Fruit Inspector
//!
//! Segmentation-based defect inspection for a fruit conveyor line.
//!
//! # Architecture
//!
//! A producer loop reads camera frames and runs an instance-segmentation detector.
//! Raw detector output is normalized into typed instances, each instance is given a
//! role (reference object, unconditional defect, area defect), and area defects are
//! graded by how much of their mask lies on the reference object:
//!
//! 1. **Overlap grading**: `overlap / |union of reference masks| * 100`, compared
//!    against the minor and severe thresholds.
//! 2. **Unconditional defects** are always severe.
//! 3. **No reference, no area grading**: without a reference object area defects are
//!    skipped with a diagnostic, never divided by zero.
//!
//! The latest frame, its instances and its annotated rendering are published as one
//! immutable snapshot, so the live view and the triggered classifier never observe
//! a half-updated state. Reports fan out to MQTT, HTTP and snapshot sinks without
//! blocking the producer.
//!
//! # Module Structure
//!
//! - `mask`, `frame`: pixel masks and RGB frames
//! - `detect`: detector backends and raw output
//! - `roles`, `extract`, `classify`, `report`: from raw output to an inspection report
//! - `state`, `pipeline`, `trigger`: shared state, producer loop and trigger worker
//! - `dispatch`, `transport`: result sinks
//! - `ingest`: video sources
//! - `api`: live view HTTP server
//! - `config`, `ui`: daemon configuration and startup output

pub mod annotate;
pub mod api;
pub mod classify;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod extract;
pub mod frame;
pub mod ingest;
pub mod mask;
pub mod pipeline;
pub mod report;
pub mod roles;
pub mod state;
pub mod transport;
pub mod trigger;
pub mod ui;

pub use api::{LiveViewConfig, LiveViewHandle, LiveViewServer};
pub use classify::{
    classify, Classification, ClassificationResult, Diagnostic, Severity, SeverityThresholds,
};
pub use config::InspectorConfig;
pub use detect::{
    BackendRegistry, BoundingBox, DetectionCapability, DetectorBackend, PredictParams,
    RawDetection, RawDetections, StubBackend,
};
pub use dispatch::{Dispatcher, InlineSpawner, ResultSink, TaskSpawner, ThreadSpawner};
pub use extract::{extract, DetectionInstance};
pub use frame::Frame;
pub use ingest::{source_for, SourceConfig, SyntheticSource, VideoSource};
pub use mask::BinaryMask;
pub use pipeline::{
    InferenceEngine, InferenceMode, PipelineConfig, PipelineDriver, Reporter,
};
pub use report::{InspectionReport, InspectionStatus};
pub use roles::{ClassRole, ClassRoleMap, RoleAssignment};
pub use state::{FrameState, SharedInference};
