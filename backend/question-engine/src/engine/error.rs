use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// The submitted page was rendered for an earlier step count. The caller
    /// should ask the learner to resubmit.
    #[error("Submission out of sequence for usage {usage_id}, slot {slot}: expected {expected} steps, attempt has {actual}")]
    OutOfSequence {
        usage_id: String,
        slot: u32,
        expected: usize,
        actual: usize,
    },

    #[error("There is no question attempt in slot {0} of this usage")]
    UnknownSlot(u32),

    #[error("Step index {index} out of bounds for attempt with {len} steps")]
    StepIndexOutOfBounds { index: usize, len: usize },

    #[error("This question attempt has not been started yet")]
    NotStarted,

    #[error("This question attempt has already been started")]
    AlreadyStarted,

    #[error("Cannot modify a committed attempt step")]
    ImmutableStep,

    #[error("Cached variable names must begin with '_', got '{0}'")]
    InvalidVariableName(String),

    #[error("Invalid value '{value}' for parameter '{name}' (expected {kind})")]
    InvalidParam {
        name: String,
        kind: &'static str,
        value: String,
    },

    #[error("Unknown question behaviour '{0}'")]
    UnknownBehaviour(String),

    #[error("Question behaviour '{0}' is not archetypal")]
    NotArchetypal(String),

    #[error("Invalid behaviour name '{0}': use lowercase letters and digits only")]
    InvalidBehaviourName(String),

    #[error("Question behaviour '{0}' is already registered")]
    DuplicateBehaviour(String),

    #[error("Manual mark {mark} out of range for max mark {max_mark} (fraction must be in [{min_fraction}, 1])")]
    MarkOutOfRange {
        mark: f64,
        max_mark: f64,
        min_fraction: f64,
    },

    #[error("{0}")]
    CannotGrade(String),

    #[error("Cannot regrade an attempt stored with unavailable behaviour '{0}'")]
    CannotRegrade(String),

    #[error("Question {0} not found")]
    QuestionNotFound(String),

    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),
}

impl EngineError {
    /// Only out-of-sequence submissions can be fixed by the end user.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::OutOfSequence { .. })
    }
}
