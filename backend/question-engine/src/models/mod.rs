use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod records;
pub mod state;
pub mod step;
pub mod submission;

/// Identity of a question usage. Unsaved usages get a random token so that
/// field names stay unique on a page; saving assigns the stored id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum UsageId {
    Stored(String),
    Ephemeral(String),
}

impl UsageId {
    pub fn ephemeral() -> Self {
        UsageId::Ephemeral(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        match self {
            UsageId::Stored(id) | UsageId::Ephemeral(id) => id,
        }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, UsageId::Stored(_))
    }
}

impl fmt::Display for UsageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
