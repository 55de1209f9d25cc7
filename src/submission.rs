//! Submission routing and engine exclusivity (v0.1)
//!
//! One shared, stateful engine serves many independent build/restore calls:
//! - SubmissionRouter: fans the engine's single emission channel out to
//!   ambient listeners and to the one capture registered for the active
//!   submission, in a single total order
//! - EngineHandle: the injected shared-engine handle; its mutex serializes
//!   Begin..End regions across callers
//! - SessionGuard: scoped Begin/Submit/Execute/End with guaranteed cleanup
//!   on every exit path, exceptional ones included

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::capture::BuildCapture;
use crate::engine::{BuildEngine, BuildRequest, BuildResult, EventSink, SubmissionId};
use crate::error::KilnError;
use crate::event::Event;

/// Ambient observer that sees every event of every submission
pub trait BuildListener: Send + Sync {
    fn on_event(&self, submission: SubmissionId, event: &Event);
}

/// Routes the engine's emission channel to per-submission captures without
/// cross-contamination between submissions.
pub struct SubmissionRouter {
    registrations: DashMap<u64, BuildCapture>,
    listeners: RwLock<Vec<Arc<dyn BuildListener>>>,
    /// Held across one fan-out so no listener observes events out of order
    /// relative to another
    fanout: Mutex<()>,
}

impl SubmissionRouter {
    fn new() -> Self {
        Self {
            registrations: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            fanout: Mutex::new(()),
        }
    }

    /// Register the capture that should receive one submission's events.
    /// Must happen before the engine can emit for that submission.
    fn register(&self, submission: SubmissionId, capture: BuildCapture) {
        debug!(submission = submission.0, "registering capture");
        self.registrations.insert(submission.0, capture);
    }

    /// Remove a submission's registration. Always runs when its region ends,
    /// so a later submission reusing the handle value starts clean.
    fn deregister(&self, submission: SubmissionId) {
        debug!(submission = submission.0, "deregistering capture");
        self.registrations.remove(&submission.0);
    }

    fn add_listener(&self, listener: Arc<dyn BuildListener>) {
        self.listeners.write().push(listener);
    }

    #[cfg(test)]
    fn is_registered(&self, submission: SubmissionId) -> bool {
        self.registrations.contains_key(&submission.0)
    }
}

impl EventSink for SubmissionRouter {
    fn emit(&self, submission: SubmissionId, event: Event) {
        let _order = self.fanout.lock();
        for listener in self.listeners.read().iter() {
            listener.on_event(submission, &event);
        }
        if let Some(capture) = self.registrations.get(&submission.0) {
            capture.append(event);
        }
    }
}

/// Injected handle to the one shared, exclusively-locked engine instance.
///
/// Callers needing parallel builds use independent handles; on a single
/// handle, submissions are strictly serialized.
pub struct EngineHandle {
    engine: Mutex<Box<dyn BuildEngine>>,
    router: Arc<SubmissionRouter>,
}

impl EngineHandle {
    pub fn new(engine: Box<dyn BuildEngine>) -> Self {
        Self {
            engine: Mutex::new(engine),
            router: Arc::new(SubmissionRouter::new()),
        }
    }

    /// Attach an ambient listener that observes every event of every
    /// subsequent submission
    pub fn add_listener(&self, listener: Arc<dyn BuildListener>) {
        self.router.add_listener(listener);
    }
}

/// One Begin..End mutual-exclusion region against the shared engine.
///
/// Construction acquires the engine lock and calls `begin`; Drop always
/// deregisters the submission and calls `end`, then releases the lock —
/// whether `execute` returned, failed, or was never reached.
pub struct SessionGuard<'a> {
    engine: MutexGuard<'a, Box<dyn BuildEngine>>,
    router: Arc<SubmissionRouter>,
    submission: Option<SubmissionId>,
}

impl<'a> SessionGuard<'a> {
    /// Block until the engine is free, then mark it active for this region
    pub fn begin(handle: &'a EngineHandle) -> Result<Self, KilnError> {
        let mut engine = handle.engine.lock();
        let sink: Arc<dyn EventSink> = Arc::clone(&handle.router) as Arc<dyn EventSink>;
        engine.begin(sink)?;
        debug!("engine region began");
        Ok(Self {
            engine,
            router: Arc::clone(&handle.router),
            submission: None,
        })
    }

    /// Engine's process-wide defaults, read inside the exclusive region
    pub fn ambient_properties(&self) -> std::collections::BTreeMap<String, String> {
        self.engine.ambient_properties()
    }

    /// Hand the request to the engine and register the capture against the
    /// engine-assigned handle strictly before any execution begins, so even
    /// the earliest event cannot be dropped.
    pub fn submit(
        &mut self,
        request: BuildRequest,
        capture: &BuildCapture,
    ) -> Result<SubmissionId, KilnError> {
        let submission = self.engine.submit(request)?;
        self.router.register(submission, capture.clone());
        self.submission = Some(submission);
        Ok(submission)
    }

    /// Block the calling thread until the engine completes the submission.
    /// Does not return while events for it are still being emitted.
    pub fn execute(&mut self, submission: SubmissionId) -> Result<BuildResult, KilnError> {
        Ok(self.engine.execute(submission)?)
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Some(submission) = self.submission.take() {
            self.router.deregister(submission);
        }
        self.engine.end();
        debug!("engine region ended");
        // MutexGuard drops last, releasing the engine for the next caller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, TargetResult};
    use crate::event::Importance;
    use std::collections::BTreeMap;

    /// Engine stub that emits a fixed script per submission
    struct StubEngine {
        sink: Option<Arc<dyn EventSink>>,
        next: u64,
        fail_execute: bool,
    }

    impl StubEngine {
        fn new() -> Self {
            Self {
                sink: None,
                next: 1,
                fail_execute: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail_execute: true,
                ..Self::new()
            }
        }
    }

    impl BuildEngine for StubEngine {
        fn begin(&mut self, sink: Arc<dyn EventSink>) -> Result<(), EngineError> {
            if self.sink.is_some() {
                return Err(EngineError::AlreadyActive);
            }
            self.sink = Some(sink);
            Ok(())
        }

        fn submit(&mut self, _request: BuildRequest) -> Result<SubmissionId, EngineError> {
            let id = self.next;
            self.next += 1;
            Ok(SubmissionId(id))
        }

        fn execute(&mut self, submission: SubmissionId) -> Result<BuildResult, EngineError> {
            let sink = self.sink.as_ref().ok_or(EngineError::NotActive)?;
            sink.emit(
                submission,
                Event::message(format!("from {submission}"), Importance::Normal),
            );
            if self.fail_execute {
                return Err(EngineError::Fatal("stub blew up".into()));
            }
            Ok(BuildResult {
                succeeded: true,
                targets: std::collections::HashMap::from([(
                    "Build".to_string(),
                    TargetResult {
                        succeeded: true,
                        outputs: vec![],
                    },
                )]),
            })
        }

        fn end(&mut self) {
            self.sink = None;
        }

        fn ambient_properties(&self) -> BTreeMap<String, String> {
            BTreeMap::from([("Ambient".into(), "yes".into())])
        }
    }

    fn request() -> BuildRequest {
        BuildRequest::new("/tmp/stub.kiln.json")
    }

    #[test]
    fn events_land_only_in_registered_capture() {
        let handle = EngineHandle::new(Box::new(StubEngine::new()));

        let capture_a = BuildCapture::new();
        {
            let mut session = SessionGuard::begin(&handle).unwrap();
            let id = session.submit(request(), &capture_a).unwrap();
            session.execute(id).unwrap();
        }

        let capture_b = BuildCapture::new();
        {
            let mut session = SessionGuard::begin(&handle).unwrap();
            let id = session.submit(request(), &capture_b).unwrap();
            session.execute(id).unwrap();
        }

        assert_eq!(capture_a.len(), 1);
        assert_eq!(capture_a.events()[0].message, "from #1");
        assert_eq!(capture_b.len(), 1);
        assert_eq!(capture_b.events()[0].message, "from #2");
    }

    #[test]
    fn registration_removed_on_drop() {
        let handle = EngineHandle::new(Box::new(StubEngine::new()));
        let capture = BuildCapture::new();

        let id = {
            let mut session = SessionGuard::begin(&handle).unwrap();
            session.submit(request(), &capture).unwrap()
        };
        assert!(!handle.router.is_registered(id));
    }

    #[test]
    fn lock_released_after_engine_failure() {
        let handle = EngineHandle::new(Box::new(StubEngine::failing()));
        let capture = BuildCapture::new();

        let failed: Result<BuildResult, KilnError> = (|| {
            let mut session = SessionGuard::begin(&handle)?;
            let id = session.submit(request(), &capture)?;
            session.execute(id)
        })();
        assert!(matches!(
            failed,
            Err(KilnError::Engine(EngineError::Fatal(_)))
        ));

        // Region ended despite the failure; a new one can begin
        let capture2 = BuildCapture::new();
        let mut session = SessionGuard::begin(&handle).unwrap();
        let id = session.submit(request(), &capture2).unwrap();
        // Still fails (same stub), but begin/submit prove the lock was freed
        let _ = session.execute(id);
    }

    #[test]
    fn ambient_listener_sees_every_submission() {
        use parking_lot::Mutex as PlMutex;

        struct Tally {
            seen: PlMutex<Vec<u64>>,
        }
        impl BuildListener for Tally {
            fn on_event(&self, submission: SubmissionId, _event: &Event) {
                self.seen.lock().push(submission.0);
            }
        }

        let handle = EngineHandle::new(Box::new(StubEngine::new()));
        let tally = Arc::new(Tally {
            seen: PlMutex::new(Vec::new()),
        });
        handle.add_listener(tally.clone());

        for _ in 0..2 {
            let capture = BuildCapture::new();
            let mut session = SessionGuard::begin(&handle).unwrap();
            let id = session.submit(request(), &capture).unwrap();
            session.execute(id).unwrap();
            drop(session);
        }

        assert_eq!(*tally.seen.lock(), vec![1, 2]);
    }

    #[test]
    fn unregistered_submission_events_are_dropped() {
        let handle = EngineHandle::new(Box::new(StubEngine::new()));
        let sink: Arc<dyn EventSink> = Arc::clone(&handle.router) as Arc<dyn EventSink>;

        // No registration for submission 99
        sink.emit(
            SubmissionId(99),
            Event::message("orphan", Importance::Normal),
        );
        // Nothing to assert on a capture; just verify no panic and that a
        // later registered submission still works
        let capture = BuildCapture::new();
        let mut session = SessionGuard::begin(&handle).unwrap();
        let id = session.submit(request(), &capture).unwrap();
        session.execute(id).unwrap();
        drop(session);
        assert_eq!(capture.len(), 1);
    }

    #[test]
    fn ambient_properties_read_inside_region() {
        let handle = EngineHandle::new(Box::new(StubEngine::new()));
        let session = SessionGuard::begin(&handle).unwrap();
        assert_eq!(
            session.ambient_properties().get("Ambient").unwrap(),
            "yes"
        );
    }
}
