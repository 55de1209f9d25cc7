//! Build engine boundary (v0.1)
//!
//! The engine is an opaque, stateful collaborator that evaluates a saved
//! project descriptor and reports progress as push events. It is injected
//! as a handle (never ambient global state) so tests can substitute
//! isolated instances.

mod scripted;

pub use scripted::ScriptedEngine;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::event::Event;

/// Engine-assigned handle identifying one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubmissionId(pub u64);

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the engine pushes its events. Emission may come from engine-owned
/// worker threads, so implementations must be Send + Sync.
pub trait EventSink: Send + Sync {
    fn emit(&self, submission: SubmissionId, event: Event);
}

/// One build or restore request
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Saved descriptor the engine operates on
    pub project_path: PathBuf,
    /// Explicit targets; empty means the descriptor's defaults
    pub targets: Vec<String>,
    /// Fully merged global properties for this call only
    pub properties: BTreeMap<String, String>,
    /// Tolerate missing imports (restore flavor)
    pub ignore_missing_imports: bool,
    /// Force a fresh dependency-resolution session (restore flavor)
    pub fresh_session: bool,
}

impl BuildRequest {
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self {
            project_path: project_path.into(),
            targets: Vec::new(),
            properties: BTreeMap::new(),
            ignore_missing_imports: false,
            fresh_session: false,
        }
    }

    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn restore_flavored(mut self) -> Self {
        self.ignore_missing_imports = true;
        self.fresh_session = true;
        self
    }
}

/// Per-target outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetResult {
    pub succeeded: bool,
    /// Output item values the target declared
    pub outputs: Vec<String>,
}

/// Outcome of one execution. A failed build is a normal result, not an error.
#[derive(Debug, Clone, Default)]
pub struct BuildResult {
    pub succeeded: bool,
    pub targets: std::collections::HashMap<String, TargetResult>,
}

/// Exceptional, non-recoverable engine conditions. Never used for ordinary
/// build/restore failures.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine is already executing a submission")]
    AlreadyActive,

    #[error("engine has no active execution")]
    NotActive,

    #[error("unknown submission {0}")]
    UnknownSubmission(u64),

    #[error("cannot load project '{path}': {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("fatal engine failure: {0}")]
    Fatal(String),
}

/// The shared, exclusively-locked build engine.
///
/// Lifecycle per execution: `begin` (attach the sink, become active) →
/// `submit` (obtain a submission handle, no execution yet) → `execute`
/// (block until done, emitting events through the sink) → `end` (release,
/// idempotent). `begin` on an active engine is a fatal, non-retryable error.
pub trait BuildEngine: Send {
    fn begin(&mut self, sink: Arc<dyn EventSink>) -> Result<(), EngineError>;

    fn submit(&mut self, request: BuildRequest) -> Result<SubmissionId, EngineError>;

    fn execute(&mut self, submission: SubmissionId) -> Result<BuildResult, EngineError>;

    fn end(&mut self);

    /// Process-wide default properties; merged *under* per-call properties
    /// by the orchestrator, never mutated per call
    fn ambient_properties(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}
