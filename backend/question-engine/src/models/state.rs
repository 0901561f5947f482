use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Fractions above this are treated as fully correct.
pub const CORRECT_THRESHOLD: f64 = 0.999999;
/// Fractions below this are treated as wrong.
pub const WRONG_THRESHOLD: f64 = 0.000001;

/// State of a question attempt after a step.
///
/// `NotStarted` is only ever reported by an attempt with no steps, and
/// `Unprocessed` only by a step that has not been classified yet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QuestionState {
    NotStarted,
    Unprocessed,
    Todo,
    Invalid,
    Complete,
    NeedsGrading,
    Finished,
    GaveUp,
    #[serde(rename = "gradedwrong")]
    GradedWrong,
    #[serde(rename = "gradedpartial")]
    GradedPartial,
    #[serde(rename = "gradedright")]
    GradedCorrect,
    #[serde(rename = "manfinished")]
    ManualFinished,
    #[serde(rename = "mangaveup")]
    ManualGaveUp,
    #[serde(rename = "mangrwrong")]
    ManualGradedWrong,
    #[serde(rename = "mangrpartial")]
    ManualGradedPartial,
    #[serde(rename = "mangrright")]
    ManualGradedCorrect,
}

impl QuestionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionState::NotStarted => "notstarted",
            QuestionState::Unprocessed => "unprocessed",
            QuestionState::Todo => "todo",
            QuestionState::Invalid => "invalid",
            QuestionState::Complete => "complete",
            QuestionState::NeedsGrading => "needsgrading",
            QuestionState::Finished => "finished",
            QuestionState::GaveUp => "gaveup",
            QuestionState::GradedWrong => "gradedwrong",
            QuestionState::GradedPartial => "gradedpartial",
            QuestionState::GradedCorrect => "gradedright",
            QuestionState::ManualFinished => "manfinished",
            QuestionState::ManualGaveUp => "mangaveup",
            QuestionState::ManualGradedWrong => "mangrwrong",
            QuestionState::ManualGradedPartial => "mangrpartial",
            QuestionState::ManualGradedCorrect => "mangrright",
        }
    }

    /// Active states still accept responses from the learner.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            QuestionState::Todo | QuestionState::Invalid | QuestionState::Complete
        )
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, QuestionState::NotStarted | QuestionState::Unprocessed) && !self.is_active()
    }

    pub fn is_graded(&self) -> bool {
        matches!(
            self,
            QuestionState::GradedWrong
                | QuestionState::GradedPartial
                | QuestionState::GradedCorrect
                | QuestionState::ManualGradedWrong
                | QuestionState::ManualGradedPartial
                | QuestionState::ManualGradedCorrect
        )
    }

    pub fn is_commented(&self) -> bool {
        matches!(
            self,
            QuestionState::ManualFinished
                | QuestionState::ManualGaveUp
                | QuestionState::ManualGradedWrong
                | QuestionState::ManualGradedPartial
                | QuestionState::ManualGradedCorrect
        )
    }

    pub fn is_gave_up(&self) -> bool {
        matches!(self, QuestionState::GaveUp | QuestionState::ManualGaveUp)
    }

    /// Classifies an automatically computed fraction.
    pub fn graded_for_fraction(fraction: f64) -> Self {
        if fraction > CORRECT_THRESHOLD {
            QuestionState::GradedCorrect
        } else if fraction < WRONG_THRESHOLD {
            QuestionState::GradedWrong
        } else {
            QuestionState::GradedPartial
        }
    }

    /// Classifies a fraction awarded by a human grader.
    pub fn manually_graded_for_fraction(fraction: f64) -> Self {
        match Self::graded_for_fraction(fraction) {
            QuestionState::GradedCorrect => QuestionState::ManualGradedCorrect,
            QuestionState::GradedWrong => QuestionState::ManualGradedWrong,
            _ => QuestionState::ManualGradedPartial,
        }
    }

    /// The state a comment moves an attempt into. A fraction always wins;
    /// without one the current outcome is kept and marked as commented.
    pub fn commented(&self, fraction: Option<f64>) -> Self {
        if let Some(fraction) = fraction {
            return Self::manually_graded_for_fraction(fraction);
        }
        match self {
            QuestionState::Finished => QuestionState::ManualFinished,
            QuestionState::GaveUp => QuestionState::ManualGaveUp,
            QuestionState::GradedWrong => QuestionState::ManualGradedWrong,
            QuestionState::GradedPartial => QuestionState::ManualGradedPartial,
            QuestionState::GradedCorrect => QuestionState::ManualGradedCorrect,
            other => *other,
        }
    }
}

impl fmt::Display for QuestionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "notstarted" => Ok(QuestionState::NotStarted),
            "unprocessed" => Ok(QuestionState::Unprocessed),
            "todo" => Ok(QuestionState::Todo),
            "invalid" => Ok(QuestionState::Invalid),
            "complete" => Ok(QuestionState::Complete),
            "needsgrading" => Ok(QuestionState::NeedsGrading),
            "finished" => Ok(QuestionState::Finished),
            "gaveup" => Ok(QuestionState::GaveUp),
            "gradedwrong" => Ok(QuestionState::GradedWrong),
            "gradedpartial" => Ok(QuestionState::GradedPartial),
            "gradedright" => Ok(QuestionState::GradedCorrect),
            "manfinished" => Ok(QuestionState::ManualFinished),
            "mangaveup" => Ok(QuestionState::ManualGaveUp),
            "mangrwrong" => Ok(QuestionState::ManualGradedWrong),
            "mangrpartial" => Ok(QuestionState::ManualGradedPartial),
            "mangrright" => Ok(QuestionState::ManualGradedCorrect),
            _ => Err(format!("Invalid question state: {}", value)),
        }
    }
}
