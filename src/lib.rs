//! Kiln - programmatic build fixtures with event capture and replay
//!
//! Assemble project descriptors as test fixtures, run them against a shared
//! build engine, capture the resulting event stream, and replay it through
//! any push-protocol consumer to reconstruct a live textual log.

pub mod capture;
pub mod engine;
pub mod error;
pub mod event;
pub mod project;
pub mod render;
pub mod replay;
pub mod session;
pub mod submission;

pub use capture::BuildCapture;
pub use engine::{
    BuildEngine, BuildRequest, BuildResult, EngineError, EventSink, ScriptedEngine, SubmissionId,
    TargetResult,
};
pub use error::{Hint, KilnError};
pub use event::{BuildContext, Event, EventKind, EventTag, Importance, SourceLocation};
pub use project::{ProjectSpec, StepSpec, TargetSpec};
pub use render::{RenderOptions, TextLogger, Verbosity};
pub use replay::{replay, EventConsumer, EventSource};
pub use session::{BuildOptions, BuildOutcome, BuildSession};
pub use submission::{BuildListener, EngineHandle, SessionGuard, SubmissionRouter};
