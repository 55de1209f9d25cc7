//! Scripted in-process engine (v0.1)
//!
//! Stands in for a real external build engine in fixtures and CI. Loads the
//! saved descriptor named by each request and plays out its targets,
//! emitting the full event choreography through the attached sink. Step
//! scripts can fail targets, abort the engine mid-build, and surface
//! outputs, which is everything the orchestration layer needs exercised.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use super::{BuildEngine, BuildRequest, BuildResult, EngineError, EventSink, SubmissionId, TargetResult};
use crate::event::{BuildContext, Event, EventKind};
use crate::project::{ProjectSpec, StepSpec};

pub struct ScriptedEngine {
    sink: Option<Arc<dyn EventSink>>,
    started: Option<Instant>,
    submissions: HashMap<u64, BuildRequest>,
    next_submission: u64,
    ambient: BTreeMap<String, String>,
    /// Emit from a worker thread instead of the caller's thread
    threaded: bool,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            sink: None,
            started: None,
            submissions: HashMap::new(),
            next_submission: 1,
            ambient: BTreeMap::new(),
            threaded: false,
        }
    }

    /// Add a process-wide default property
    pub fn with_ambient_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.ambient.insert(key.into(), value.into());
        self
    }

    /// Emit events from an engine-owned worker thread, the way a real
    /// engine's internal fan-out would
    pub fn with_threaded_emission(mut self) -> Self {
        self.threaded = true;
        self
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildEngine for ScriptedEngine {
    fn begin(&mut self, sink: Arc<dyn EventSink>) -> Result<(), EngineError> {
        if self.sink.is_some() {
            return Err(EngineError::AlreadyActive);
        }
        self.sink = Some(sink);
        self.started = Some(Instant::now());
        Ok(())
    }

    fn submit(&mut self, request: BuildRequest) -> Result<SubmissionId, EngineError> {
        if self.sink.is_none() {
            return Err(EngineError::NotActive);
        }
        let id = self.next_submission;
        self.next_submission += 1;
        self.submissions.insert(id, request);
        Ok(SubmissionId(id))
    }

    fn execute(&mut self, submission: SubmissionId) -> Result<BuildResult, EngineError> {
        let sink = self.sink.clone().ok_or(EngineError::NotActive)?;
        let started = self.started.unwrap_or_else(Instant::now);
        let request = self
            .submissions
            .remove(&submission.0)
            .ok_or(EngineError::UnknownSubmission(submission.0))?;

        if self.threaded {
            let handle =
                thread::spawn(move || run_script(&sink, started, submission, &request));
            handle
                .join()
                .map_err(|_| EngineError::Fatal("engine worker thread panicked".into()))?
        } else {
            run_script(&sink, started, submission, &request)
        }
    }

    fn end(&mut self) {
        self.sink = None;
        self.started = None;
        self.submissions.clear();
    }

    fn ambient_properties(&self) -> BTreeMap<String, String> {
        self.ambient.clone()
    }
}

fn command_line(request: &BuildRequest) -> String {
    let mut line = format!("kiln build {}", request.project_path.display());
    if !request.targets.is_empty() {
        line.push_str(&format!(" /t:{}", request.targets.join(";")));
    }
    for (key, value) in &request.properties {
        line.push_str(&format!(" /p:{key}={value}"));
    }
    line
}

fn run_script(
    sink: &Arc<dyn EventSink>,
    started: Instant,
    submission: SubmissionId,
    request: &BuildRequest,
) -> Result<BuildResult, EngineError> {
    let project =
        ProjectSpec::load(&request.project_path).map_err(|e| EngineError::Load {
            path: request.project_path.clone(),
            reason: e.to_string(),
        })?;

    let project_file: Arc<str> = request.project_path.to_string_lossy().into_owned().into();
    let base_ctx = BuildContext::for_submission(submission.0 as i32).with_project(1);
    let emit = |event: Event, ctx: BuildContext| {
        sink.emit(
            submission,
            event
                .with_timestamp(started.elapsed().as_millis() as u64)
                .with_context(ctx),
        );
    };

    emit(
        Event::new(
            "Build started",
            EventKind::BuildStarted {
                command_line: Some(command_line(request)),
            },
        ),
        base_ctx,
    );
    emit(
        Event::new(
            format!("Project \"{project_file}\" started"),
            EventKind::ProjectStarted {
                project_file: Arc::clone(&project_file),
            },
        ),
        base_ctx,
    );

    let target_names: Vec<String> = if !request.targets.is_empty() {
        request.targets.clone()
    } else if !project.default_targets().is_empty() {
        project.default_targets().to_vec()
    } else {
        project.targets().iter().map(|t| t.name().to_string()).collect()
    };

    let mut succeeded = true;
    let mut results: HashMap<String, TargetResult> = HashMap::new();

    for (index, name) in target_names.iter().enumerate() {
        if !succeeded {
            break;
        }
        let ctx = base_ctx.with_target(index as i32 + 1);

        let Some(target) = project.target(name) else {
            if name == "Restore" {
                // Nothing declared restore steps; a fresh session has
                // nothing to resolve
                emit(Event::new("Nothing to restore", EventKind::Status), ctx);
                results.insert(
                    name.clone(),
                    TargetResult {
                        succeeded: true,
                        outputs: Vec::new(),
                    },
                );
                continue;
            }
            emit(
                Event::error(
                    format!("The target \"{name}\" does not exist in the project"),
                    Some("KLN4057".into()),
                ),
                ctx,
            );
            succeeded = false;
            break;
        };

        let target_name: Arc<str> = name.as_str().into();
        emit(
            Event::new(
                format!("Target \"{target_name}\" started"),
                EventKind::TargetStarted {
                    target_name: Arc::clone(&target_name),
                },
            ),
            ctx,
        );

        let mut target_succeeded = true;
        for step in target.steps() {
            match step {
                StepSpec::Message { text, importance } => {
                    emit(Event::message(text.clone(), *importance), ctx);
                }
                StepSpec::Warning { code, text } => {
                    emit(Event::warning(text.clone(), code.clone()), ctx);
                }
                StepSpec::Error { code, text } => {
                    emit(Event::error(text.clone(), code.clone()), ctx);
                    target_succeeded = false;
                    break;
                }
                StepSpec::Abort { text } => {
                    return Err(EngineError::Fatal(text.clone()));
                }
            }
        }

        emit(
            Event::new(
                format!("Target \"{target_name}\" finished"),
                EventKind::TargetFinished {
                    target_name: Arc::clone(&target_name),
                    succeeded: target_succeeded,
                },
            ),
            ctx,
        );

        results.insert(
            name.clone(),
            TargetResult {
                succeeded: target_succeeded,
                outputs: if target_succeeded {
                    target.outputs().to_vec()
                } else {
                    Vec::new()
                },
            },
        );
        succeeded &= target_succeeded;
    }

    emit(
        Event::new(
            format!("Project \"{project_file}\" finished"),
            EventKind::ProjectFinished {
                project_file,
                succeeded,
                properties: request.properties.clone(),
            },
        ),
        base_ctx,
    );
    emit(
        Event::new(
            "Build finished",
            EventKind::BuildFinished { succeeded },
        ),
        base_ctx,
    );

    Ok(BuildResult {
        succeeded,
        targets: results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventTag, Importance};
    use crate::project::TargetSpec;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    /// Sink that records every emission with its submission handle
    struct CollectingSink {
        events: Mutex<Vec<(SubmissionId, Event)>>,
    }

    impl CollectingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn tags(&self) -> Vec<EventTag> {
            self.events.lock().iter().map(|(_, e)| e.tag()).collect()
        }
    }

    impl EventSink for CollectingSink {
        fn emit(&self, submission: SubmissionId, event: Event) {
            self.events.lock().push((submission, event));
        }
    }

    fn saved_project(dir: &TempDir, project: &ProjectSpec) -> std::path::PathBuf {
        project.save(dir.path()).unwrap()
    }

    #[test]
    fn begin_twice_is_already_active() {
        let mut engine = ScriptedEngine::new();
        let sink = CollectingSink::new();
        engine.begin(sink.clone()).unwrap();
        assert!(matches!(
            engine.begin(sink),
            Err(EngineError::AlreadyActive)
        ));
    }

    #[test]
    fn submit_requires_begin() {
        let mut engine = ScriptedEngine::new();
        assert!(matches!(
            engine.submit(BuildRequest::new("/nowhere")),
            Err(EngineError::NotActive)
        ));
    }

    #[test]
    fn end_releases_for_reuse() {
        let mut engine = ScriptedEngine::new();
        let sink = CollectingSink::new();
        engine.begin(sink.clone()).unwrap();
        engine.end();
        engine.end(); // idempotent
        assert!(engine.begin(sink).is_ok());
    }

    #[test]
    fn happy_path_choreography() {
        let dir = TempDir::new().unwrap();
        let project = ProjectSpec::new("app").with_target(
            TargetSpec::new("Build")
                .message("compiling")
                .output("app.bin"),
        );
        let path = saved_project(&dir, &project);

        let mut engine = ScriptedEngine::new();
        let sink = CollectingSink::new();
        engine.begin(sink.clone()).unwrap();
        let id = engine.submit(BuildRequest::new(&path)).unwrap();
        let result = engine.execute(id).unwrap();

        assert!(result.succeeded);
        assert_eq!(result.targets["Build"].outputs, vec!["app.bin"]);
        assert_eq!(
            sink.tags(),
            vec![
                EventTag::BuildStarted,
                EventTag::ProjectStarted,
                EventTag::TargetStarted,
                EventTag::Message,
                EventTag::TargetFinished,
                EventTag::ProjectFinished,
                EventTag::BuildFinished,
            ]
        );
    }

    #[test]
    fn error_step_fails_target_and_skips_rest() {
        let dir = TempDir::new().unwrap();
        let project = ProjectSpec::new("broken")
            .with_target(TargetSpec::new("Compile").error_with_code("KLN0001", "no compiler"))
            .with_target(TargetSpec::new("Link").message("linking"));
        let path = saved_project(&dir, &project);

        let mut engine = ScriptedEngine::new();
        let sink = CollectingSink::new();
        engine.begin(sink.clone()).unwrap();
        let id = engine.submit(BuildRequest::new(&path)).unwrap();
        let result = engine.execute(id).unwrap();

        assert!(!result.succeeded);
        assert!(!result.targets["Compile"].succeeded);
        assert!(result.targets["Compile"].outputs.is_empty());
        assert!(!result.targets.contains_key("Link"));

        let events = sink.events.lock();
        assert!(!events.iter().any(|(_, e)| e.message == "linking"));
    }

    #[test]
    fn abort_step_is_fatal() {
        let dir = TempDir::new().unwrap();
        let project =
            ProjectSpec::new("doomed").with_target(TargetSpec::new("Build").abort("disk on fire"));
        let path = saved_project(&dir, &project);

        let mut engine = ScriptedEngine::new();
        engine.begin(CollectingSink::new()).unwrap();
        let id = engine.submit(BuildRequest::new(&path)).unwrap();
        assert!(matches!(engine.execute(id), Err(EngineError::Fatal(_))));
    }

    #[test]
    fn missing_descriptor_is_load_error() {
        let mut engine = ScriptedEngine::new();
        engine.begin(CollectingSink::new()).unwrap();
        let id = engine
            .submit(BuildRequest::new("/nonexistent/app.kiln.json"))
            .unwrap();
        assert!(matches!(engine.execute(id), Err(EngineError::Load { .. })));
    }

    #[test]
    fn restore_without_declared_target_trivially_succeeds() {
        let dir = TempDir::new().unwrap();
        let project =
            ProjectSpec::new("plain").with_target(TargetSpec::new("Build").message("won't run"));
        let path = saved_project(&dir, &project);

        let mut engine = ScriptedEngine::new();
        let sink = CollectingSink::new();
        engine.begin(sink.clone()).unwrap();
        let id = engine
            .submit(BuildRequest::new(&path).with_targets(vec!["Restore".into()]).restore_flavored())
            .unwrap();
        let result = engine.execute(id).unwrap();

        assert!(result.succeeded);
        assert!(result.targets["Restore"].succeeded);
        assert!(sink.tags().contains(&EventTag::Status));
        assert!(!sink.tags().contains(&EventTag::TargetStarted));
    }

    #[test]
    fn explicit_missing_target_is_an_error_event() {
        let dir = TempDir::new().unwrap();
        let project = ProjectSpec::new("empty");
        let path = saved_project(&dir, &project);

        let mut engine = ScriptedEngine::new();
        let sink = CollectingSink::new();
        engine.begin(sink.clone()).unwrap();
        let id = engine
            .submit(BuildRequest::new(&path).with_targets(vec!["Deploy".into()]))
            .unwrap();
        let result = engine.execute(id).unwrap();

        assert!(!result.succeeded);
        let events = sink.events.lock();
        assert!(events
            .iter()
            .any(|(_, e)| e.is_error() && e.message.contains("Deploy")));
    }

    #[test]
    fn default_targets_drive_selection() {
        let dir = TempDir::new().unwrap();
        let project = ProjectSpec::new("defaults")
            .with_default_target("Second")
            .with_target(TargetSpec::new("First").message("one"))
            .with_target(TargetSpec::new("Second").message("two"));
        let path = saved_project(&dir, &project);

        let mut engine = ScriptedEngine::new();
        let sink = CollectingSink::new();
        engine.begin(sink.clone()).unwrap();
        let id = engine.submit(BuildRequest::new(&path)).unwrap();
        let result = engine.execute(id).unwrap();

        assert!(result.succeeded);
        assert!(result.targets.contains_key("Second"));
        assert!(!result.targets.contains_key("First"));
    }

    #[test]
    fn threaded_emission_still_delivers_everything() {
        let dir = TempDir::new().unwrap();
        let project = ProjectSpec::new("threaded").with_target(
            TargetSpec::new("Build")
                .message_with_importance("a", Importance::High)
                .message_with_importance("b", Importance::Low),
        );
        let path = saved_project(&dir, &project);

        let mut engine = ScriptedEngine::new().with_threaded_emission();
        let sink = CollectingSink::new();
        engine.begin(sink.clone()).unwrap();
        let id = engine.submit(BuildRequest::new(&path)).unwrap();
        let result = engine.execute(id).unwrap();

        assert!(result.succeeded);
        // build/project start+finish, target start+finish, two messages
        assert_eq!(sink.events.lock().len(), 8);
    }
}
