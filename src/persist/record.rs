use std::collections::{BTreeMap, BTreeSet};

use crate::core::{TableSchema, Value};

/// One row-to-be of a table: current values, the values last persisted, and the dirty set.
///
/// The batch engine borrows records mutably for the duration of a save and writes
/// generated keys, version tokens and timestamps back into them.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: BTreeMap<String, Value>,
    old_values: BTreeMap<String, Value>,
    dirty: BTreeSet<String>,
    is_new: bool,
    changed_attributes: Vec<String>,
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl Record {
    /// An empty record that has never been persisted.
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            old_values: BTreeMap::new(),
            dirty: BTreeSet::new(),
            is_new: true,
            changed_attributes: Vec::new(),
        }
    }

    /// A record as read back from storage: nothing dirty, old values equal current ones.
    pub fn loaded(values: BTreeMap<String, Value>) -> Self {
        Self {
            old_values: values.clone(),
            values,
            dirty: BTreeSet::new(),
            is_new: false,
            changed_attributes: Vec::new(),
        }
    }

    /// Builder-style `set`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        let unchanged = !self.is_new && self.old_values.get(&name) == Some(&value);
        if unchanged {
            self.dirty.remove(&name);
        } else {
            self.dirty.insert(name.clone());
        }
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn old_value(&self, name: &str) -> Option<&Value> {
        self.old_values.get(name)
    }

    pub fn old_values(&self) -> &BTreeMap<String, Value> {
        &self.old_values
    }

    pub fn is_dirty(&self, name: &str) -> bool {
        self.dirty.contains(name)
    }

    /// Current values of every attribute modified since load or last save.
    pub fn dirty_attributes(&self) -> BTreeMap<String, Value> {
        self.dirty
            .iter()
            .filter_map(|name| self.values.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub(crate) fn set_new(&mut self, is_new: bool) {
        self.is_new = is_new;
    }

    /// Tracked attributes that changed in the most recent save.
    pub fn changed_attributes(&self) -> &[String] {
        &self.changed_attributes
    }

    pub fn set_changed_attributes(&mut self, names: Vec<String>) {
        self.changed_attributes = names;
    }

    /// Key values in the schema's primary key order, NULL for missing parts.
    pub fn primary_key_values(&self, schema: &TableSchema) -> Vec<Value> {
        schema
            .primary_keys()
            .iter()
            .map(|pk| self.values.get(pk).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Folds the dirty set into the old values after a successful write.
    ///
    /// Returns every attribute that was written together with its prior value.
    pub(crate) fn mark_saved(&mut self) -> BTreeMap<String, Value> {
        let mut changed = BTreeMap::new();
        for name in std::mem::take(&mut self.dirty) {
            let Some(value) = self.values.get(&name).cloned() else {
                continue;
            };
            let previous = self.old_values.insert(name.clone(), value);
            changed.insert(name, previous.unwrap_or(Value::Null));
        }
        self.is_new = false;
        changed
    }
}
