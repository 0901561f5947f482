use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::step::VarMap;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::usage::Usage;
use crate::questions::ParamType;

lazy_static! {
    static ref FIELD_NAME: Regex = Regex::new(r"^q(?P<usage>[^:]+):(?P<slot>\d+)_").unwrap();
}

/// What was submitted for one slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotSubmission {
    pub data: VarMap,
    /// Number of steps the page was rendered for.
    pub sequence_check: Option<usize>,
    pub flagged: Option<bool>,
}

/// A batch of submissions for several slots of one usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmittedBatch {
    /// Slots to process. `None` means every slot in the usage.
    pub slots: Option<Vec<u32>>,
    pub responses: BTreeMap<u32, SlotSubmission>,
}

impl SubmittedBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slots(mut self, slots: Vec<u32>) -> Self {
        self.slots = Some(slots);
        self
    }

    pub fn with_response(mut self, slot: u32, data: VarMap) -> Self {
        self.responses.entry(slot).or_default().data = data;
        self
    }

    pub fn with_sequence_check(mut self, slot: u32, expected_steps: usize) -> Self {
        self.responses.entry(slot).or_default().sequence_check = Some(expected_steps);
        self
    }

    pub fn with_flag(mut self, slot: u32, flagged: bool) -> Self {
        self.responses.entry(slot).or_default().flagged = Some(flagged);
        self
    }

    /// Builds a batch from flat form data named after the attempts' field
    /// prefixes. Without a `slots` field the slots are discovered from the
    /// field names that belong to this usage.
    pub fn from_post_data(usage: &Usage, post: &BTreeMap<String, String>) -> EngineResult<Self> {
        let slots = match post.get("slots") {
            Some(raw) => ParamType::Sequence
                .clean("slots", raw)?
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| {
                    s.trim().parse::<u32>().map_err(|_| EngineError::InvalidParam {
                        name: "slots".to_string(),
                        kind: ParamType::Sequence.as_str(),
                        value: raw.clone(),
                    })
                })
                .collect::<EngineResult<Vec<_>>>()?,
            None => discover_slots(usage, post),
        };

        let mut batch = SubmittedBatch::new().with_slots(slots.clone());
        for slot in slots {
            let attempt = usage.attempt(slot)?;
            let data = attempt.extract_submitted_data(post)?;
            let sequence_check = post
                .get(&attempt.sequence_check_field_name())
                .map(|raw| {
                    ParamType::Int
                        .clean(&attempt.sequence_check_field_name(), raw)
                        .and_then(|clean| {
                            clean.parse::<usize>().map_err(|_| EngineError::InvalidParam {
                                name: attempt.sequence_check_field_name(),
                                kind: ParamType::Int.as_str(),
                                value: raw.clone(),
                            })
                        })
                })
                .transpose()?;
            let flagged = post
                .get(&attempt.flag_field_name())
                .map(|raw| ParamType::Bool.clean(&attempt.flag_field_name(), raw))
                .transpose()?
                .map(|clean| clean == "1");

            batch.responses.insert(
                slot,
                SlotSubmission {
                    data,
                    sequence_check,
                    flagged,
                },
            );
        }
        Ok(batch)
    }
}

fn discover_slots(usage: &Usage, post: &BTreeMap<String, String>) -> Vec<u32> {
    let usage_id = usage.id().as_str();
    post.keys()
        .filter_map(|key| FIELD_NAME.captures(key))
        .filter(|caps| &caps["usage"] == usage_id)
        .filter_map(|caps| caps["slot"].parse::<u32>().ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
