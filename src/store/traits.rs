use indexmap::IndexMap;

use crate::error::Result;
use crate::model::{PrimaryKey, Value};

/// Reference to another stored entity
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRef {
    /// Root type of the referenced entity
    pub entity_type: String,
    pub key: PrimaryKey,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Scalar(Value),
    One(Option<StoredRef>),
    Many(Vec<StoredRef>),
}

/// Persisted state of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Concrete type
    pub entity_type: String,
    pub key: PrimaryKey,
    pub version: u64,
    pub values: IndexMap<String, StoredValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    /// Merge the given values into the existing record
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordWrite {
    pub root_type: String,
    pub kind: WriteKind,
    pub record: Record,
    /// When set, the stored version must match or the whole change set is rejected
    pub expected_version: Option<u64>,
}

/// Everything a unit of work commits, applied all-or-nothing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub writes: Vec<RecordWrite>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Storage collaborator behind a unit of work.
/// Records are addressed by root type and primary key.
pub trait EntityStore: Send + Sync {
    fn fetch(&self, root_type: &str, key: &PrimaryKey) -> Result<Option<Record>>;

    /// All records of a root type (subtypes included) in key insertion order
    fn scan(&self, root_type: &str) -> Result<Vec<Record>>;

    /// Next generated key for an autoincrement root type
    fn next_key(&self, root_type: &str) -> Result<i64>;

    /// Apply a change set atomically; version mismatches raise `Conflict`
    fn write(&self, changes: ChangeSet) -> Result<()>;
}
