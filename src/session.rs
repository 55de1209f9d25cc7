//! Build orchestration (v0.1)
//!
//! The caller-facing operation: save a descriptor, optionally restore its
//! dependencies, build it, and hand back the outcome plus the captured
//! event stream. Phases per call: Saved → (Restoring) → Building →
//! Completed/Failed.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::capture::BuildCapture;
use crate::engine::{BuildEngine, BuildRequest, BuildResult, TargetResult};
use crate::error::KilnError;
use crate::project::ProjectSpec;
use crate::submission::{EngineHandle, SessionGuard};

/// Property forcing a fresh dependency-resolution session per restore
const RESTORE_SESSION_PROPERTY: &str = "KilnRestoreSessionId";

static RESTORE_SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_restore_session_id() -> String {
    format!(
        "restore-{}",
        RESTORE_SESSION_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Per-call build configuration
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Run a dependency-restore phase before the build phase
    pub restore: bool,
    /// Explicit targets; empty means the descriptor's defaults
    pub targets: Vec<String>,
    /// Caller properties; take precedence over descriptor globals and
    /// engine ambient defaults, for this call only
    pub properties: BTreeMap<String, String>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_restore(mut self) -> Self {
        self.restore = true;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Outcome of one build/restore call. The capture is owned by the caller
/// from here on; no further writes occur.
#[derive(Debug)]
pub struct BuildOutcome {
    pub succeeded: bool,
    pub capture: BuildCapture,
    pub targets: HashMap<String, TargetResult>,
}

/// Serializes access to one shared engine and runs build/restore calls
/// against it.
pub struct BuildSession {
    handle: Arc<EngineHandle>,
    workspace: PathBuf,
}

impl BuildSession {
    /// Wrap an engine instance. The workspace directory receives saved
    /// descriptors and must exist.
    pub fn new(engine: Box<dyn BuildEngine>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            handle: Arc::new(EngineHandle::new(engine)),
            workspace: workspace.into(),
        }
    }

    /// The shared engine handle, for attaching ambient listeners or sharing
    /// the engine with another session
    pub fn handle(&self) -> &Arc<EngineHandle> {
        &self.handle
    }

    /// Build the project, optionally restoring first. A failed restore
    /// short-circuits: the build phase never runs and target results stay
    /// empty.
    #[instrument(skip(self, project, options), fields(project = %project.name()))]
    pub fn try_build(
        &self,
        project: &ProjectSpec,
        options: &BuildOptions,
    ) -> Result<BuildOutcome, KilnError> {
        // Saved: the engine operates on file paths
        let path = project.save(&self.workspace)?;
        let capture = BuildCapture::new();

        // Caller properties win over descriptor globals
        let mut properties = project.global_properties().clone();
        properties.extend(options.properties.clone());

        if options.restore {
            debug!("restore phase");
            let restore = self.run_submission(
                path.clone(),
                vec!["Restore".to_string()],
                properties.clone(),
                true,
                &capture,
            )?;
            if !restore.succeeded {
                debug!("restore failed; skipping build phase");
                return Ok(BuildOutcome {
                    succeeded: false,
                    capture,
                    targets: HashMap::new(),
                });
            }
        }

        debug!("build phase");
        let result = self.run_submission(
            path,
            options.targets.clone(),
            properties,
            false,
            &capture,
        )?;

        Ok(BuildOutcome {
            succeeded: result.succeeded,
            capture,
            targets: result.targets,
        })
    }

    /// Run only the dependency-restore phase
    #[instrument(skip(self, project), fields(project = %project.name()))]
    pub fn try_restore(&self, project: &ProjectSpec) -> Result<BuildOutcome, KilnError> {
        let path = project.save(&self.workspace)?;
        let capture = BuildCapture::new();

        let result = self.run_submission(
            path,
            vec!["Restore".to_string()],
            project.global_properties().clone(),
            true,
            &capture,
        )?;

        Ok(BuildOutcome {
            succeeded: result.succeeded,
            capture,
            targets: result.targets,
        })
    }

    /// One Begin..End region: merge ambient properties under the per-call
    /// ones, submit, register the capture, execute. The guard guarantees
    /// deregistration and engine release on every exit path; engine errors
    /// propagate unchanged after the lock is freed.
    fn run_submission(
        &self,
        path: PathBuf,
        targets: Vec<String>,
        properties: BTreeMap<String, String>,
        restore: bool,
        capture: &BuildCapture,
    ) -> Result<BuildResult, KilnError> {
        let mut session = SessionGuard::begin(&self.handle)?;

        let mut merged = session.ambient_properties();
        merged.extend(properties);
        if restore {
            merged.insert(RESTORE_SESSION_PROPERTY.into(), next_restore_session_id());
        }

        let mut request = BuildRequest::new(path).with_targets(targets);
        request.properties = merged;
        if restore {
            request = request.restore_flavored();
        }

        let submission = session.submit(request, capture)?;
        session.execute(submission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_session_ids_are_unique() {
        let a = next_restore_session_id();
        let b = next_restore_session_id();
        assert_ne!(a, b);
        assert!(a.starts_with("restore-"));
    }

    #[test]
    fn options_builder() {
        let options = BuildOptions::new()
            .with_restore()
            .with_target("Build")
            .with_property("Configuration", "Release");

        assert!(options.restore);
        assert_eq!(options.targets, vec!["Build"]);
        assert_eq!(
            options.properties.get("Configuration").map(String::as_str),
            Some("Release")
        );
    }
}
