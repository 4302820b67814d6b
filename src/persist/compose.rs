use crate::core::{BatchError, Column, Result, TableSchema, Value};
use crate::executor::{InsertPlan, UpdatePlan, VersionGuard};
use crate::persist::Record;

/// Plans for one batch, plus which batch positions landed in each group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposedWrite {
    pub insert: Option<InsertPlan>,
    pub update: Option<UpdatePlan>,
    /// Batch positions of the insert group, in enqueue order.
    pub inserted: Vec<usize>,
    /// Batch positions of the update group, in enqueue order.
    pub updated: Vec<usize>,
}

/// Turns a batch of records into one multi-row INSERT and one multi-row UPDATE.
pub struct BulkWriteComposer<'a> {
    schema: &'a TableSchema,
    returning: bool,
}

impl<'a> BulkWriteComposer<'a> {
    pub fn new(schema: &'a TableSchema) -> Self {
        Self {
            schema,
            returning: false,
        }
    }

    /// Ask the INSERT to hand generated keys back.
    pub fn with_returning(mut self, returning: bool) -> Self {
        self.returning = returning;
        self
    }

    /// Every attribute used by any record, in table column order.
    pub fn attribute_union(&self, records: &[&Record]) -> Result<Vec<Column>> {
        for record in records {
            if let Some(unknown) = record.attribute_names().find(|n| !self.schema.has_column(n)) {
                return Err(BatchError::Schema(format!(
                    "Column '{}' not found in table '{}'",
                    unknown,
                    self.schema.name()
                )));
            }
        }
        Ok(self
            .schema
            .columns()
            .iter()
            .filter(|column| records.iter().any(|r| r.has_attribute(&column.name)))
            .cloned()
            .collect())
    }

    /// `expected_versions` is aligned with `records`; entries for new records are ignored.
    pub fn compose(
        &self,
        records: &[&Record],
        expected_versions: &[Option<Value>],
    ) -> Result<ComposedWrite> {
        let union = self.attribute_union(records)?;
        let (inserted, updated): (Vec<usize>, Vec<usize>) =
            (0..records.len()).partition(|&idx| records[idx].is_new());

        let insert = if inserted.is_empty() {
            None
        } else {
            Some(self.insert_plan(records, &inserted, &union)?)
        };
        let update = if updated.is_empty() {
            None
        } else {
            self.update_plan(records, &updated, &union, expected_versions)?
        };

        Ok(ComposedWrite {
            insert,
            update,
            inserted,
            updated,
        })
    }

    fn insert_plan(
        &self,
        records: &[&Record],
        group: &[usize],
        union: &[Column],
    ) -> Result<InsertPlan> {
        let columns: Vec<String> = union
            .iter()
            .filter(|column| !self.schema.is_primary_key(&column.name))
            .map(|column| column.name.clone())
            .collect();
        if columns.is_empty() {
            return Err(BatchError::Schema(format!(
                "nothing to insert into '{}': records carry key columns only",
                self.schema.name()
            )));
        }

        let rows = group
            .iter()
            .map(|&idx| {
                columns
                    .iter()
                    .map(|name| records[idx].get(name).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(InsertPlan {
            table: self.schema.name().to_string(),
            columns,
            rows,
            returning: if self.returning {
                self.schema.primary_keys().to_vec()
            } else {
                Vec::new()
            },
        })
    }

    fn update_plan(
        &self,
        records: &[&Record],
        group: &[usize],
        union: &[Column],
        expected_versions: &[Option<Value>],
    ) -> Result<Option<UpdatePlan>> {
        for pk in self.schema.primary_keys() {
            let missing = group
                .iter()
                .any(|&idx| records[idx].get(pk).is_none_or(Value::is_null));
            if missing {
                return Err(BatchError::Schema(format!(
                    "existing record in '{}' has no value for key column '{}'",
                    self.schema.name(),
                    pk
                )));
            }
        }

        let set_columns: Vec<String> = union
            .iter()
            .filter(|column| !self.schema.is_primary_key(&column.name))
            .map(|column| column.name.clone())
            .collect();
        if set_columns.is_empty() {
            return Ok(None);
        }

        let version_guard = self
            .schema
            .version()
            .and_then(|name| self.schema.get_column(name))
            .map(|column| VersionGuard {
                column: column.clone(),
            });

        let rows = group
            .iter()
            .map(|&idx| {
                let mut row: Vec<Value> = union
                    .iter()
                    .map(|column| records[idx].get(&column.name).cloned().unwrap_or(Value::Null))
                    .collect();
                if version_guard.is_some() {
                    let expected = expected_versions.get(idx).cloned().flatten();
                    row.push(expected.unwrap_or(Value::Null));
                }
                row
            })
            .collect();

        Ok(Some(UpdatePlan {
            table: self.schema.name().to_string(),
            columns: union.to_vec(),
            set_columns,
            key_columns: self.schema.primary_keys().to_vec(),
            rows,
            version_guard,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use std::collections::BTreeMap;

    fn schema() -> TableSchema {
        TableSchema::new(
            "docs",
            vec![
                Column::new("id", DataType::Integer).not_null(),
                Column::new("name", DataType::Text),
                Column::new("note", DataType::Text),
                Column::new("version", DataType::Numeric),
            ],
        )
        .version_column("version")
    }

    fn existing(id: i64, name: &str, version: &str) -> Record {
        Record::loaded(BTreeMap::from([
            ("id".to_string(), Value::Integer(id)),
            ("name".to_string(), Value::from(name)),
            ("version".to_string(), Value::from(version)),
        ]))
    }

    #[test]
    fn test_union_follows_column_order_and_null_fills() {
        let schema = schema();
        let a = Record::new().with("note", "n");
        let b = Record::new().with("name", "b");
        let composed = BulkWriteComposer::new(&schema)
            .compose(&[&a, &b], &[None, None])
            .unwrap();

        let insert = composed.insert.unwrap();
        assert_eq!(insert.columns, vec!["name", "note"]);
        assert_eq!(
            insert.rows,
            vec![
                vec![Value::Null, Value::from("n")],
                vec![Value::from("b"), Value::Null],
            ]
        );
        assert!(insert.returning.is_empty());
        assert!(composed.update.is_none());
    }

    #[test]
    fn test_mixed_batch_partitions_by_newness() {
        let schema = schema();
        let fresh = Record::new().with("name", "new").with("version", "1");
        let old = existing(4, "old", "7");
        let composed = BulkWriteComposer::new(&schema)
            .with_returning(true)
            .compose(&[&fresh, &old], &[None, Some(Value::from("7"))])
            .unwrap();

        assert_eq!(composed.inserted, vec![0]);
        assert_eq!(composed.updated, vec![1]);
        assert_eq!(composed.insert.unwrap().returning, vec!["id"]);

        let update = composed.update.unwrap();
        assert_eq!(update.set_columns, vec!["name", "version"]);
        assert_eq!(
            update.rows,
            vec![vec![
                Value::Integer(4),
                Value::from("old"),
                Value::from("7"),
                Value::from("7"),
            ]]
        );
    }

    #[test]
    fn test_unknown_attribute_is_rejected() {
        let schema = schema();
        let record = Record::new().with("bogus", 1i64);
        let err = BulkWriteComposer::new(&schema)
            .compose(&[&record], &[None])
            .unwrap_err();
        assert!(matches!(err, BatchError::Schema(_)));
    }

    #[test]
    fn test_update_without_key_is_rejected() {
        let schema = schema();
        let record = Record::loaded(BTreeMap::from([("name".to_string(), Value::from("x"))]));
        assert!(
            BulkWriteComposer::new(&schema)
                .compose(&[&record], &[None])
                .is_err()
        );
    }
}
