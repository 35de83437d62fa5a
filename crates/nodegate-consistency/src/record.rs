//! Per-entity write and lock records.

use nodegate_kernel::EntityKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Kind of mutation recorded against an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteKind {
    Create,
    Update,
    Delete,
}

impl WriteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Some(Self::Create),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl Display for WriteKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Most recent unresolved write for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub entity_key: EntityKey,
    pub operation: WriteKind,
    pub written_at: Instant,
    pub version: u64,
    pub payload: Option<Value>,
}

/// Marker that an entity is still inside its staleness window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub entity_key: EntityKey,
    pub locked_at: Instant,
    pub operation: WriteKind,
    pub version: u64,
}

impl From<&WriteRecord> for LockRecord {
    fn from(record: &WriteRecord) -> Self {
        Self {
            entity_key: record.entity_key.clone(),
            locked_at: record.written_at,
            operation: record.operation,
            version: record.version,
        }
    }
}
