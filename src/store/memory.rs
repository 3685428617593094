use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::{LiantError, Result};
use crate::model::{PrimaryKey, Value};
use crate::store::{ChangeSet, EntityStore, Record, WriteKind};

#[derive(Debug, Default)]
struct Tables {
    /// root type -> key text -> record
    records: HashMap<String, IndexMap<String, Record>>,
    sequences: HashMap<String, i64>,
}

/// In-memory reference store, one table per root type
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, root_type: &str) -> usize {
        self.tables
            .read()
            .records
            .get(root_type)
            .map(|table| table.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().records.values().all(|t| t.is_empty())
    }
}

fn max_int_key(table: Option<&IndexMap<String, Record>>) -> i64 {
    table
        .into_iter()
        .flat_map(|t| t.values())
        .filter_map(|record| record.key.parts().first().and_then(Value::as_i64))
        .max()
        .unwrap_or(0)
}

impl EntityStore for MemoryStore {
    fn fetch(&self, root_type: &str, key: &PrimaryKey) -> Result<Option<Record>> {
        Ok(self
            .tables
            .read()
            .records
            .get(root_type)
            .and_then(|table| table.get(&key.identity_text()))
            .cloned())
    }

    fn scan(&self, root_type: &str) -> Result<Vec<Record>> {
        Ok(self
            .tables
            .read()
            .records
            .get(root_type)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }

    fn next_key(&self, root_type: &str) -> Result<i64> {
        let mut tables = self.tables.write();
        let current = max_int_key(tables.records.get(root_type));
        let sequence = tables.sequences.entry(root_type.to_string()).or_insert(0);
        *sequence = (*sequence).max(current) + 1;
        Ok(*sequence)
    }

    fn write(&self, changes: ChangeSet) -> Result<()> {
        let mut tables = self.tables.write();

        // validate everything before touching any table
        for write in &changes.writes {
            let existing = tables
                .records
                .get(&write.root_type)
                .and_then(|table| table.get(&write.record.key.identity_text()));
            let conflict = || LiantError::Conflict {
                entity_type: write.record.entity_type.clone(),
                key: write.record.key.key_text(),
            };
            match (write.kind, existing) {
                (WriteKind::Insert, Some(_)) => return Err(conflict()),
                (WriteKind::Update | WriteKind::Delete, None) => return Err(conflict()),
                (_, Some(record)) => {
                    if let Some(expected) = write.expected_version {
                        if record.version != expected {
                            return Err(conflict());
                        }
                    }
                }
                (WriteKind::Insert, None) => {}
            }
        }

        for write in changes.writes {
            let table = tables.records.entry(write.root_type).or_default();
            let key = write.record.key.identity_text();
            match write.kind {
                WriteKind::Insert => {
                    let mut record = write.record;
                    record.version = 1;
                    table.insert(key, record);
                }
                WriteKind::Update => {
                    if let Some(existing) = table.get_mut(&key) {
                        existing.entity_type = write.record.entity_type;
                        existing.values.extend(write.record.values);
                        existing.version += 1;
                    }
                }
                WriteKind::Delete => {
                    table.shift_remove(&key);
                }
            }
        }

        Ok(())
    }
}
