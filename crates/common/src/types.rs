use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one orchestration execution.
///
/// Execution IDs are plain strings so callers can derive them from business
/// keys (e.g. `deliver_order_<order id>`). Deriving the same ID twice always
/// names the same execution, which is what makes repeated starts collapse
/// into one instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Creates an execution ID from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates an execution ID by joining a prefix and a business key.
    pub fn derived(prefix: &str, key: &str) -> Self {
        Self(format!("{prefix}_{key}"))
    }

    /// Creates a random execution ID with the given prefix.
    pub fn random(prefix: &str) -> Self {
        Self::derived(prefix, &Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the ID is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ExecutionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ExecutionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<ExecutionId> for String {
    fn from(id: ExecutionId) -> Self {
        id.0
    }
}

impl AsRef<str> for ExecutionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
