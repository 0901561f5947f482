#![allow(dead_code)]

use std::sync::Arc;
use trainingground_qengine::behaviours::BehaviourRegistry;
use trainingground_qengine::models::step::VarMap;
use trainingground_qengine::questions::{
    DescriptionQuestion, EssayQuestion, InMemoryQuestionBank, MultiChoiceAnswer,
    MultiChoiceQuestion, TrueFalseQuestion,
};
use trainingground_qengine::Usage;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn registry() -> Arc<BehaviourRegistry> {
    Arc::new(BehaviourRegistry::with_defaults())
}

pub fn new_usage(preferred: &str) -> Usage {
    init_tracing();
    Usage::new("mod_quiz", "test-context", preferred, registry())
        .expect("preferred behaviour should be archetypal")
}

fn answer(text: &str, fraction: f64) -> MultiChoiceAnswer {
    MultiChoiceAnswer {
        text: text.to_string(),
        fraction,
        feedback: None,
    }
}

/// A(1.0), B(0.0). Index 0 is right.
pub fn single_choice() -> MultiChoiceQuestion {
    MultiChoiceQuestion::new(
        "mc-capital",
        "Capital of France?",
        vec![answer("Paris", 1.0), answer("Lyon", 0.0)],
    )
}

/// Single choice with one hint, so interactive gives two tries.
pub fn single_choice_with_hint() -> MultiChoiceQuestion {
    single_choice().with_hints(vec!["It is on the Seine.".to_string()])
}

pub fn choice_with_fraction(id: &str, fraction: f64) -> MultiChoiceQuestion {
    MultiChoiceQuestion::new(
        id,
        "Pick one",
        vec![answer("almost", fraction), answer("no", 0.0)],
    )
}

pub fn true_false() -> TrueFalseQuestion {
    TrueFalseQuestion::new("tf-sky", "The sky is blue.", true)
}

pub fn essay() -> EssayQuestion {
    EssayQuestion::new("essay-1", "Describe your weekend.")
}

pub fn description() -> DescriptionQuestion {
    DescriptionQuestion::new("desc-1", "Read the instructions carefully.")
}

pub fn bank() -> InMemoryQuestionBank {
    let bank = InMemoryQuestionBank::new();
    bank.insert(Arc::new(single_choice()));
    bank.insert(Arc::new(single_choice_with_hint().with_id("mc-hinted")));
    bank.insert(Arc::new(true_false()));
    bank.insert(Arc::new(essay()));
    bank.insert(Arc::new(description()));
    bank
}

pub fn vars(pairs: &[(&str, &str)]) -> VarMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.expect("expected a value");
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {}, got {}",
        expected,
        actual
    );
}

trait WithId {
    fn with_id(self, id: &str) -> Self;
}

impl WithId for MultiChoiceQuestion {
    fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self.name = id.to_string();
        self
    }
}
