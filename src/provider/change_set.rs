use serde_json::Value;

use crate::mapping::WriteKind;

/// One pending write.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub entity: String,
    pub kind: WriteKind,
    pub instance: Value,
    /// Snapshot taken when the instance was read. An update with a
    /// snapshot is skipped when nothing changed and only applies while the
    /// stored row still matches it.
    pub original: Option<Value>,
}

/// Writes collected by the caller and submitted together. Updates are
/// tracked either by snapshot (`update_from`) or by marking them dirty
/// explicitly (`update`).
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, entity: &str, kind: WriteKind, instance: Value, original: Option<Value>) -> Self {
        self.changes.push(Change { entity: entity.to_string(), kind, instance, original });
        self
    }

    pub fn insert(self, entity: &str, instance: Value) -> Self {
        self.push(entity, WriteKind::Insert, instance, None)
    }

    /// Always written.
    pub fn update(self, entity: &str, instance: Value) -> Self {
        self.push(entity, WriteKind::Update, instance, None)
    }

    /// Written only when `instance` differs from `original`.
    pub fn update_from(self, entity: &str, instance: Value, original: Value) -> Self {
        self.push(entity, WriteKind::Update, instance, Some(original))
    }

    pub fn delete(self, entity: &str, instance: Value) -> Self {
        self.push(entity, WriteKind::Delete, instance, None)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    /// Entities in first-mention order.
    pub fn entities(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for change in &self.changes {
            if !out.contains(&change.entity.as_str()) {
                out.push(&change.entity);
            }
        }
        out
    }
}
