//! Textual log reconstruction (v0.1)
//!
//! `RenderOptions` is the configuration surface for turning a captured event
//! stream back into a console-style log; `TextLogger` is the deterministic
//! consumer that does the writing. Rendering the same capture with the same
//! options always yields byte-identical output.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::KilnError;
use crate::event::{Event, EventKind, EventTag, Importance};
use crate::replay::{EventConsumer, EventSource};

/// How much of the stream makes it into the text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Warnings, errors and the summary only
    Quiet,
    /// Plus high-importance messages
    Minimal,
    /// Plus normal-importance messages and project notices
    #[default]
    Normal,
    /// Plus low-importance messages and target notices
    Detailed,
    /// Everything, including task notices and status chatter
    Diagnostic,
}

/// Rendering configuration. All options are independent except
/// `errors_only`/`warnings_only`, which are mutually exclusive.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub verbosity: Verbosity,
    pub show_summary: bool,
    pub show_perf_summary: bool,
    pub errors_only: bool,
    pub warnings_only: bool,
    pub show_item_and_property_list: bool,
    pub show_command_line: bool,
    pub show_timestamps: bool,
    pub show_event_ids: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::default(),
            show_summary: true,
            show_perf_summary: false,
            errors_only: false,
            warnings_only: false,
            show_item_and_property_list: false,
            show_command_line: false,
            show_timestamps: false,
            show_event_ids: false,
        }
    }
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_summary(mut self, show: bool) -> Self {
        self.show_summary = show;
        self
    }

    pub fn with_perf_summary(mut self) -> Self {
        self.show_perf_summary = true;
        self
    }

    pub fn errors_only(mut self) -> Self {
        self.errors_only = true;
        self
    }

    pub fn warnings_only(mut self) -> Self {
        self.warnings_only = true;
        self
    }

    pub fn with_item_and_property_list(mut self) -> Self {
        self.show_item_and_property_list = true;
        self
    }

    pub fn with_command_line(mut self) -> Self {
        self.show_command_line = true;
        self
    }

    pub fn with_timestamps(mut self) -> Self {
        self.show_timestamps = true;
        self
    }

    pub fn with_event_ids(mut self) -> Self {
        self.show_event_ids = true;
        self
    }

    /// Reject contradictory option combinations at call time
    pub fn validate(&self) -> Result<(), KilnError> {
        if self.errors_only && self.warnings_only {
            return Err(KilnError::RenderConfig(
                "errors_only and warnings_only are mutually exclusive".into(),
            ));
        }
        Ok(())
    }

    fn shows_messages_of(&self, importance: Importance) -> bool {
        if self.errors_only || self.warnings_only {
            return false;
        }
        match importance {
            Importance::High => self.verbosity >= Verbosity::Minimal,
            Importance::Normal => self.verbosity >= Verbosity::Normal,
            Importance::Low => self.verbosity >= Verbosity::Detailed,
        }
    }

    fn shows_notices(&self, minimum: Verbosity) -> bool {
        !self.errors_only && !self.warnings_only && self.verbosity >= minimum
    }
}

#[derive(Default)]
struct RenderState {
    out: String,
    warning_count: usize,
    error_count: usize,
    build_succeeded: Option<bool>,
    build_started_ms: Option<u64>,
    build_finished_ms: Option<u64>,
    target_started: HashMap<Arc<str>, u64>,
    /// (name, duration_ms) in completion order
    target_perf: Vec<(Arc<str>, u64)>,
}

impl RenderState {
    fn line(&mut self, options: &RenderOptions, event: &Event, text: &str) {
        if options.show_timestamps {
            self.out.push_str(&format!("[+{:>6}ms] ", event.timestamp_ms));
        }
        if options.show_event_ids {
            let ctx = event.context_or_none();
            self.out.push_str(&format!(
                "[s{}:p{}:t{}:k{}] ",
                ctx.submission_id, ctx.project_id, ctx.target_id, ctx.task_id
            ));
        }
        self.out.push_str(text);
        self.out.push('\n');
    }
}

/// Deterministic console-style logger driven purely by replayed events
pub struct TextLogger {
    options: RenderOptions,
    state: Arc<Mutex<RenderState>>,
}

impl TextLogger {
    /// Fails if the options are contradictory
    pub fn new(options: RenderOptions) -> Result<Self, KilnError> {
        options.validate()?;
        Ok(Self {
            options,
            state: Arc::new(Mutex::new(RenderState::default())),
        })
    }

    /// The text written so far (complete once replay has shut the logger down)
    pub fn output(&self) -> String {
        self.state.lock().out.clone()
    }
}

fn diagnostic_line(label: &str, code: &Option<String>, event: &Event) -> String {
    let heading = match code {
        Some(code) => format!("{label} {code}"),
        None => label.to_string(),
    };
    match &event.location {
        Some(loc) => format!("{loc}: {heading}: {}", event.message),
        None => format!("{heading}: {}", event.message),
    }
}

impl EventConsumer for TextLogger {
    fn attach(&self, source: &mut EventSource) {
        let options = self.options.clone();
        let state = Arc::clone(&self.state);
        source.subscribe(EventTag::Message, move |e| {
            if let EventKind::Message { importance } = e.kind {
                if options.shows_messages_of(importance) {
                    let text = format!("  {}", e.message);
                    state.lock().line(&options, e, &text);
                }
            }
        });

        let options = self.options.clone();
        let state = Arc::clone(&self.state);
        source.subscribe(EventTag::Warning, move |e| {
            if let EventKind::Warning { code, .. } = &e.kind {
                let mut state = state.lock();
                state.warning_count += 1;
                if !options.errors_only {
                    let text = diagnostic_line("warning", code, e);
                    state.line(&options, e, &text);
                }
            }
        });

        let options = self.options.clone();
        let state = Arc::clone(&self.state);
        source.subscribe(EventTag::Error, move |e| {
            if let EventKind::Error { code, .. } = &e.kind {
                let mut state = state.lock();
                state.error_count += 1;
                if !options.warnings_only {
                    let text = diagnostic_line("error", code, e);
                    state.line(&options, e, &text);
                }
            }
        });

        let options = self.options.clone();
        let state = Arc::clone(&self.state);
        source.subscribe(EventTag::BuildStarted, move |e| {
            let mut state = state.lock();
            state.build_started_ms = Some(e.timestamp_ms);
            if options.shows_notices(Verbosity::Normal) {
                state.line(&options, e, "Build started.");
                if options.show_command_line {
                    if let EventKind::BuildStarted {
                        command_line: Some(cl),
                    } = &e.kind
                    {
                        let text = format!("Command line: {cl}");
                        state.line(&options, e, &text);
                    }
                }
            }
        });

        let state = Arc::clone(&self.state);
        source.subscribe(EventTag::BuildFinished, move |e| {
            if let EventKind::BuildFinished { succeeded } = e.kind {
                let mut state = state.lock();
                state.build_succeeded = Some(succeeded);
                state.build_finished_ms = Some(e.timestamp_ms);
            }
        });

        let options = self.options.clone();
        let state = Arc::clone(&self.state);
        source.subscribe(EventTag::ProjectStarted, move |e| {
            if let EventKind::ProjectStarted { project_file } = &e.kind {
                if options.shows_notices(Verbosity::Normal) {
                    let text = format!("Project \"{project_file}\" started.");
                    state.lock().line(&options, e, &text);
                }
            }
        });

        let options = self.options.clone();
        let state = Arc::clone(&self.state);
        source.subscribe(EventTag::ProjectFinished, move |e| {
            if let EventKind::ProjectFinished {
                project_file,
                succeeded,
                properties,
            } = &e.kind
            {
                if options.shows_notices(Verbosity::Normal) {
                    let text = if *succeeded {
                        format!("Project \"{project_file}\" done.")
                    } else {
                        format!("Project \"{project_file}\" -- FAILED.")
                    };
                    let mut state = state.lock();
                    state.line(&options, e, &text);
                    if options.show_item_and_property_list && !properties.is_empty() {
                        state.line(&options, e, "  Surfaced properties:");
                        for (key, value) in properties {
                            let text = format!("    {key} = {value}");
                            state.line(&options, e, &text);
                        }
                    }
                }
            }
        });

        let options = self.options.clone();
        let state = Arc::clone(&self.state);
        source.subscribe(EventTag::TargetStarted, move |e| {
            if let EventKind::TargetStarted { target_name } = &e.kind {
                let mut state = state.lock();
                state
                    .target_started
                    .insert(Arc::clone(target_name), e.timestamp_ms);
                if options.shows_notices(Verbosity::Detailed) {
                    let text = format!("Target \"{target_name}\":");
                    state.line(&options, e, &text);
                }
            }
        });

        let options = self.options.clone();
        let state = Arc::clone(&self.state);
        source.subscribe(EventTag::TargetFinished, move |e| {
            if let EventKind::TargetFinished {
                target_name,
                succeeded,
            } = &e.kind
            {
                let mut state = state.lock();
                if let Some(started) = state.target_started.remove(target_name) {
                    let duration = e.timestamp_ms.saturating_sub(started);
                    state.target_perf.push((Arc::clone(target_name), duration));
                }
                if options.shows_notices(Verbosity::Detailed) {
                    let text = if *succeeded {
                        format!("Done target \"{target_name}\".")
                    } else {
                        format!("Done target \"{target_name}\" -- FAILED.")
                    };
                    state.line(&options, e, &text);
                }
            }
        });

        let options = self.options.clone();
        let state = Arc::clone(&self.state);
        source.subscribe(EventTag::TaskStarted, move |e| {
            if let EventKind::TaskStarted { task_name } = &e.kind {
                if options.shows_notices(Verbosity::Diagnostic) {
                    let text = format!("Task \"{task_name}\" started.");
                    state.lock().line(&options, e, &text);
                }
            }
        });

        let options = self.options.clone();
        let state = Arc::clone(&self.state);
        source.subscribe(EventTag::TaskFinished, move |e| {
            if let EventKind::TaskFinished {
                task_name,
                succeeded,
            } = &e.kind
            {
                if options.shows_notices(Verbosity::Diagnostic) {
                    let text = if *succeeded {
                        format!("Task \"{task_name}\" finished.")
                    } else {
                        format!("Task \"{task_name}\" -- FAILED.")
                    };
                    state.lock().line(&options, e, &text);
                }
            }
        });

        let options = self.options.clone();
        let state = Arc::clone(&self.state);
        source.subscribe(EventTag::Custom, move |e| {
            if options.shows_notices(Verbosity::Diagnostic) {
                let text = format!("  {}", e.message);
                state.lock().line(&options, e, &text);
            }
        });

        let options = self.options.clone();
        let state = Arc::clone(&self.state);
        source.subscribe(EventTag::Status, move |e| {
            if options.shows_notices(Verbosity::Diagnostic) {
                let text = format!("  {}", e.message);
                state.lock().line(&options, e, &text);
            }
        });
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();

        if self.options.show_perf_summary && !state.target_perf.is_empty() {
            state.out.push_str("Target performance:\n");
            let perf = state.target_perf.clone();
            for (name, duration) in perf {
                state
                    .out
                    .push_str(&format!("    {duration:>8} ms  {name}\n"));
            }
        }

        if self.options.show_summary {
            let succeeded = state.build_succeeded.unwrap_or(state.error_count == 0);
            if succeeded {
                state.out.push_str("Build succeeded.\n");
            } else {
                state.out.push_str("Build FAILED.\n");
            }
            let (warnings, errors) = (state.warning_count, state.error_count);
            state.out.push_str(&format!("    {warnings} Warning(s)\n"));
            state.out.push_str(&format!("    {errors} Error(s)\n"));
            if let (Some(started), Some(finished)) =
                (state.build_started_ms, state.build_finished_ms)
            {
                let elapsed = finished.saturating_sub(started);
                state.out.push_str(&format!("Time Elapsed {elapsed} ms\n"));
            }
        }
    }
}
