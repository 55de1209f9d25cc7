//! Build event model (v0.1)
//!
//! Everything a build engine can report during execution, as a closed set
//! of tagged variants:
//! - Event: envelope with timestamp + message + location + correlation context
//! - EventKind: 13 variants (diagnostics, phase start/finish, custom, status)
//! - EventTag: fieldless mirror of EventKind for dispatch tables

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Message importance, used by verbosity filtering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    High,
    #[default]
    Normal,
    Low,
}

/// Source-location hint attached to diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<Arc<str>>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({},{})", self.file, self.line, self.column)
    }
}

/// Correlation handle grouping events from the same build/project/target/task.
///
/// Ids are engine-assigned; `-1` means "not applicable". `BuildContext::NONE`
/// is the sentinel substituted during replay when a record carries no context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    pub submission_id: i32,
    pub project_id: i32,
    pub target_id: i32,
    pub task_id: i32,
}

impl BuildContext {
    /// The "no context" sentinel
    pub const NONE: BuildContext = BuildContext {
        submission_id: -1,
        project_id: -1,
        target_id: -1,
        task_id: -1,
    };

    pub fn for_submission(submission_id: i32) -> Self {
        Self {
            submission_id,
            ..Self::NONE
        }
    }

    pub fn with_project(mut self, project_id: i32) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn with_target(mut self, target_id: i32) -> Self {
        self.target_id = target_id;
        self
    }

    pub fn with_task(mut self, task_id: i32) -> Self {
        self.task_id = task_id;
        self
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

/// Variant-specific payload of an event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Message {
        importance: Importance,
    },
    Warning {
        code: Option<String>,
        help_keyword: Option<String>,
    },
    Error {
        code: Option<String>,
        help_keyword: Option<String>,
    },
    BuildStarted {
        command_line: Option<String>,
    },
    BuildFinished {
        succeeded: bool,
    },
    ProjectStarted {
        project_file: Arc<str>,
    },
    ProjectFinished {
        project_file: Arc<str>,
        succeeded: bool,
        /// Property values surfaced by the finished project
        properties: BTreeMap<String, String>,
    },
    TargetStarted {
        target_name: Arc<str>,
    },
    TargetFinished {
        target_name: Arc<str>,
        succeeded: bool,
    },
    TaskStarted {
        task_name: Arc<str>,
    },
    TaskFinished {
        task_name: Arc<str>,
        succeeded: bool,
    },
    Custom,
    Status,
}

/// Fieldless mirror of [`EventKind`], used as the key of dispatch tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTag {
    Message,
    Warning,
    Error,
    BuildStarted,
    BuildFinished,
    ProjectStarted,
    ProjectFinished,
    TargetStarted,
    TargetFinished,
    TaskStarted,
    TaskFinished,
    Custom,
    Status,
}

impl EventTag {
    /// All tags, in a stable order
    pub const ALL: [EventTag; 13] = [
        EventTag::Message,
        EventTag::Warning,
        EventTag::Error,
        EventTag::BuildStarted,
        EventTag::BuildFinished,
        EventTag::ProjectStarted,
        EventTag::ProjectFinished,
        EventTag::TargetStarted,
        EventTag::TargetFinished,
        EventTag::TaskStarted,
        EventTag::TaskFinished,
        EventTag::Custom,
        EventTag::Status,
    ];
}

impl EventKind {
    pub fn tag(&self) -> EventTag {
        match self {
            EventKind::Message { .. } => EventTag::Message,
            EventKind::Warning { .. } => EventTag::Warning,
            EventKind::Error { .. } => EventTag::Error,
            EventKind::BuildStarted { .. } => EventTag::BuildStarted,
            EventKind::BuildFinished { .. } => EventTag::BuildFinished,
            EventKind::ProjectStarted { .. } => EventTag::ProjectStarted,
            EventKind::ProjectFinished { .. } => EventTag::ProjectFinished,
            EventKind::TargetStarted { .. } => EventTag::TargetStarted,
            EventKind::TargetFinished { .. } => EventTag::TargetFinished,
            EventKind::TaskStarted { .. } => EventTag::TaskStarted,
            EventKind::TaskFinished { .. } => EventTag::TaskFinished,
            EventKind::Custom => EventTag::Custom,
            EventKind::Status => EventTag::Status,
        }
    }
}

/// Single immutable event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Time since engine `begin` (ms)
    pub timestamp_ms: u64,
    /// Human-readable text
    pub message: String,
    /// Where in a source file the event originated, if known
    pub location: Option<SourceLocation>,
    /// Correlation handle, if the engine assigned one
    pub context: Option<BuildContext>,
    /// Variant-specific payload
    pub kind: EventKind,
}

impl Event {
    pub fn new(message: impl Into<String>, kind: EventKind) -> Self {
        Self {
            timestamp_ms: 0,
            message: message.into(),
            location: None,
            context: None,
            kind,
        }
    }

    /// Convenience constructor for an informational message
    pub fn message(text: impl Into<String>, importance: Importance) -> Self {
        Self::new(text, EventKind::Message { importance })
    }

    /// Convenience constructor for a warning diagnostic
    pub fn warning(text: impl Into<String>, code: Option<String>) -> Self {
        Self::new(
            text,
            EventKind::Warning {
                code,
                help_keyword: None,
            },
        )
    }

    /// Convenience constructor for an error diagnostic
    pub fn error(text: impl Into<String>, code: Option<String>) -> Self {
        Self::new(
            text,
            EventKind::Error {
                code,
                help_keyword: None,
            },
        )
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_context(mut self, context: BuildContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn tag(&self) -> EventTag {
        self.kind.tag()
    }

    /// Correlation handle, or the sentinel when absent
    pub fn context_or_none(&self) -> BuildContext {
        self.context.unwrap_or(BuildContext::NONE)
    }

    /// Message importance, if this is a message record
    pub fn importance(&self) -> Option<Importance> {
        match self.kind {
            EventKind::Message { importance } => Some(importance),
            _ => None,
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(self.kind, EventKind::Message { .. })
    }

    pub fn is_warning(&self) -> bool {
        matches!(self.kind, EventKind::Warning { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, EventKind::Error { .. })
    }
}
