//! Result and error types for Surveyor.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for Surveyor operations
pub type SurveyorResult<T> = Result<T, SurveyorError>;

/// Errors that can occur while driving a workflow
#[derive(Debug, Error)]
pub enum SurveyorError {
    /// No selector strategy produced a visible, unambiguous element
    #[error("Element not found: {target} (tried {strategies} strategies)")]
    NotFound {
        /// Description of what was looked up
        target: String,
        /// Number of strategies attempted per round
        strategies: usize,
    },

    /// The container for a question never appeared
    #[error("Question not found: {question:?}")]
    QuestionNotFound {
        /// Displayed question text
        question: String,
    },

    /// A bounded poll exhausted its attempt budget
    #[error("Timed out waiting for {waited_for} after {attempts} attempts ({elapsed:?})")]
    TimedOut {
        /// Description of the awaited condition
        waited_for: String,
        /// Attempts performed
        attempts: u32,
        /// Time spent polling
        elapsed: Duration,
    },

    /// Inbox search found nothing within its budget
    #[error("No message for {recipient} matching `{query}` after {attempts} attempts ({elapsed:?})")]
    MessageNotFound {
        /// Mailbox that was searched
        recipient: String,
        /// Rendered search query
        query: String,
        /// Attempts performed
        attempts: u32,
        /// Time spent polling
        elapsed: Duration,
    },

    /// A message was found where none was expected
    #[error("Unexpected message {message_id} for {recipient} matching `{query}`")]
    UnexpectedMessage {
        /// Mailbox that was searched
        recipient: String,
        /// Rendered search query
        query: String,
        /// First matching message
        message_id: String,
    },

    /// An email body lacks a required element
    #[error("Email body is missing element: {element}")]
    EmailElementMissing {
        /// Element pattern that was checked
        element: String,
    },

    /// An email body carries an element it must not
    #[error("Email body contains excluded element: {element}")]
    EmailElementExcluded {
        /// Element pattern that was checked
        element: String,
    },

    /// The stepper never showed the expected stage as active
    #[error("Stage {stage:?} not reached after {attempts} attempts (last active: {last_seen:?})")]
    StageNotReached {
        /// Expected active stage
        stage: String,
        /// Last active stage observed, if any
        last_seen: Option<String>,
        /// Attempts performed
        attempts: u32,
    },

    /// A stage is not rendered as complete
    #[error("Stage {stage:?} is not complete (completed: {completed:?})")]
    StageNotComplete {
        /// Stage that was asserted
        stage: String,
        /// Stages currently rendered as complete
        completed: Vec<String>,
    },

    /// A stage previously observed complete is reported active again
    #[error("Stage {stage:?} was observed complete but is active again")]
    StageRegressed {
        /// Offending stage
        stage: String,
    },

    /// A stage name outside the workflow's stage set
    #[error("Unknown stage {stage:?} for workflow {workflow:?}")]
    UnknownStage {
        /// Requested stage
        stage: String,
        /// Workflow name
        workflow: String,
    },

    /// The stepper did not render an active stage marker
    #[error("No active stage marker rendered")]
    NoActiveStage,

    /// A terminal review status converged to a different variant
    #[error("Expected review status {expected}, observed {observed}")]
    StatusMismatch {
        /// Caller-supplied expectation
        expected: String,
        /// Marker that actually appeared
        observed: String,
    },

    /// An embedded widget never rendered its first control
    #[error("Handshake with frame {frame:?} failed after {clicks} trigger clicks")]
    HandshakeFailed {
        /// Frame selector
        frame: String,
        /// Number of times the trigger was clicked
        clicks: u32,
    },

    /// An answer value does not fit the question kind
    #[error("Answer for {question:?} must be {expected}, got {actual}")]
    AnswerShapeMismatch {
        /// Displayed question text
        question: String,
        /// Shape the kind requires
        expected: &'static str,
        /// Shape that was supplied
        actual: &'static str,
    },

    /// A file to upload does not exist
    #[error("File to upload does not exist: {}", .path.display())]
    FileMissing {
        /// Offending path
        path: PathBuf,
    },

    /// The UI surface failed to perform an operation
    #[error("Surface error: {message}")]
    Surface {
        /// Error message
        message: String,
    },

    /// The inbox collaborator failed
    #[error("Inbox error: {message}")]
    Inbox {
        /// Error message
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SurveyorError {
    /// Create a surface error
    #[must_use]
    pub fn surface(message: impl Into<String>) -> Self {
        Self::Surface {
            message: message.into(),
        }
    }

    /// Create an inbox error
    #[must_use]
    pub fn inbox(message: impl Into<String>) -> Self {
        Self::Inbox {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether a poller may absorb this error as a failed attempt.
    ///
    /// Structural mismatches and assertion failures are never transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Surface { .. } | Self::Inbox { .. } | Self::NoActiveStage
        )
    }

    /// Whether this error reports an exhausted waiting budget
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::TimedOut { .. } | Self::MessageNotFound { .. } | Self::StageNotReached { .. }
        )
    }
}
