use std::collections::BTreeMap;

use crate::core::Value;
use crate::persist::Record;

/// Computes which tracked attributes differ between the current and the persisted values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeDiffer {
    tracked: Vec<String>,
    time_attribute: Option<String>,
}

impl AttributeDiffer {
    pub fn new<I, S>(tracked: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tracked: tracked.into_iter().map(Into::into).collect(),
            time_attribute: None,
        }
    }

    /// Leaves the derived timestamp attribute out of every comparison.
    pub fn excluding_time(mut self, time_attribute: impl Into<String>) -> Self {
        self.time_attribute = Some(time_attribute.into());
        self
    }

    pub fn tracked(&self) -> &[String] {
        &self.tracked
    }

    /// Entries of `new` whose tracked attribute differs from `old`.
    ///
    /// An attribute missing from `old` counts as changed; one missing from `new` is skipped.
    pub fn diff(
        &self,
        new: &BTreeMap<String, Value>,
        old: &BTreeMap<String, Value>,
    ) -> BTreeMap<String, Value> {
        self.tracked
            .iter()
            .filter(|name| self.time_attribute.as_deref() != Some(name.as_str()))
            .filter_map(|name| {
                let current = new.get(name)?;
                match old.get(name) {
                    Some(previous) if previous == current => None,
                    _ => Some((name.clone(), current.clone())),
                }
            })
            .collect()
    }

    pub fn diff_record(&self, record: &Record) -> BTreeMap<String, Value> {
        self.diff(record.attributes(), record.old_values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_only_tracked_changes_are_reported() {
        let differ = AttributeDiffer::new(["name", "price"]);
        let new = map(&[
            ("name", Value::from("b")),
            ("price", Value::Integer(10)),
            ("untracked", Value::from("x")),
        ]);
        let old = map(&[
            ("name", Value::from("a")),
            ("price", Value::Integer(10)),
            ("untracked", Value::from("y")),
        ]);

        let diff = differ.diff(&new, &old);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff.get("name"), Some(&Value::from("b")));
    }

    #[test]
    fn test_missing_old_value_counts_as_change() {
        let differ = AttributeDiffer::new(["name"]);
        let diff = differ.diff(&map(&[("name", Value::from("a"))]), &BTreeMap::new());
        assert_eq!(diff.get("name"), Some(&Value::from("a")));
    }

    #[test]
    fn test_null_against_null_is_not_a_change() {
        let differ = AttributeDiffer::new(["note"]);
        let diff = differ.diff(&map(&[("note", Value::Null)]), &map(&[("note", Value::Null)]));
        assert!(diff.is_empty());
    }

    #[test]
    fn test_time_attribute_is_excluded() {
        let differ = AttributeDiffer::new(["name", "atime"]).excluding_time("atime");
        let new = map(&[("name", Value::from("a")), ("atime", Value::from("now"))]);
        let old = map(&[("name", Value::from("a")), ("atime", Value::from("then"))]);
        assert!(differ.diff(&new, &old).is_empty());
    }

    #[test]
    fn test_diff_ignores_insertion_order() {
        let differ = AttributeDiffer::new(["a", "b", "c"]);
        let mut forward = BTreeMap::new();
        forward.insert("a".to_string(), Value::Integer(1));
        forward.insert("b".to_string(), Value::Integer(2));
        forward.insert("c".to_string(), Value::Integer(3));
        let mut backward = BTreeMap::new();
        backward.insert("c".to_string(), Value::Integer(3));
        backward.insert("b".to_string(), Value::Integer(2));
        backward.insert("a".to_string(), Value::Integer(1));
        let old = map(&[("b", Value::Integer(2))]);

        let first = differ.diff(&forward, &old);
        assert_eq!(first, differ.diff(&backward, &old));
        assert_eq!(first, differ.diff(&forward, &old));
        assert_eq!(first.keys().collect::<Vec<_>>(), vec!["a", "c"]);
    }
}
