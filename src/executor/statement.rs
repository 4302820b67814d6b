use std::fmt;

use super::sql::{
    qualified, quote_identifier, quote_identifiers, quote_value, row_literal, typed_literal,
};
use crate::core::{Column, Row, Value};

/// Alias of the extra `VALUES` column that carries the version a row is expected to have.
pub const EXPECTED_VERSION_ALIAS: &str = "__expected_version";

/// One multi-row `INSERT`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertPlan {
    pub table: String,
    pub columns: Vec<String>,
    /// One row per record, positionally aligned with `columns`.
    pub rows: Vec<Row>,
    /// Key columns to hand back via `RETURNING`; empty when keys are inferred.
    pub returning: Vec<String>,
}

impl InsertPlan {
    pub fn to_sql(&self) -> String {
        let rows = self
            .rows
            .iter()
            .map(|row| row_literal(row.iter().map(quote_value)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_identifier(&self.table),
            quote_identifiers(&self.columns),
            rows
        );
        if !self.returning.is_empty() {
            sql.push_str(" RETURNING ");
            sql.push_str(&quote_identifiers(&self.returning));
        }
        sql
    }
}

/// Version predicate attached to a bulk update so the write itself is a compare-and-swap.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionGuard {
    pub column: Column,
}

/// One `UPDATE ... FROM (VALUES ...)` covering every record of the update group.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlan {
    pub table: String,
    /// Column list of the `VALUES` table, in attribute-union order.
    pub columns: Vec<Column>,
    pub set_columns: Vec<String>,
    pub key_columns: Vec<String>,
    /// One row per record; with a guard, the expected version is the trailing element.
    pub rows: Vec<Row>,
    pub version_guard: Option<VersionGuard>,
}

impl UpdatePlan {
    pub fn value_columns(&self) -> Vec<Column> {
        let mut columns = self.columns.clone();
        if let Some(guard) = &self.version_guard {
            columns.push(Column::new(EXPECTED_VERSION_ALIAS, guard.column.data_type));
        }
        columns
    }

    /// Expected version of row `idx`, when guarded.
    pub fn expected_version(&self, idx: usize) -> Option<&Value> {
        self.version_guard.as_ref()?;
        self.rows.get(idx).and_then(|row| row.last())
    }

    pub fn to_sql(&self) -> String {
        let value_columns = self.value_columns();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                row_literal(
                    row.iter()
                        .zip(value_columns.iter())
                        .map(|(value, column)| typed_literal(value, column.data_type)),
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let set = self
            .set_columns
            .iter()
            .map(|col| format!("{} = {}", quote_identifier(col), qualified("v", col)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut predicates: Vec<String> = self
            .key_columns
            .iter()
            .map(|pk| format!("{} = {}", qualified("t", pk), qualified("v", pk)))
            .collect();
        if let Some(guard) = &self.version_guard {
            predicates.push(format!(
                "{} = {}",
                qualified("t", &guard.column.name),
                qualified("v", EXPECTED_VERSION_ALIAS)
            ));
        }
        let aliases: Vec<String> = value_columns.into_iter().map(|c| c.name).collect();

        format!(
            "UPDATE {} AS t SET {} FROM (VALUES {}) AS v({}) WHERE {}",
            quote_identifier(&self.table),
            set,
            rows,
            quote_identifiers(&aliases),
            predicates.join(" AND ")
        )
    }
}

/// Reports the keys whose persisted version differs from the supplied one, or that vanished.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleCheckPlan {
    pub table: String,
    pub key_columns: Vec<Column>,
    pub version_column: Column,
    /// Key values followed by the expected version.
    pub rows: Vec<Row>,
}

impl StaleCheckPlan {
    pub fn to_sql(&self) -> String {
        let mut columns = self.key_columns.clone();
        columns.push(self.version_column.clone());
        let rows = self
            .rows
            .iter()
            .map(|row| {
                row_literal(
                    row.iter()
                        .zip(columns.iter())
                        .map(|(value, column)| typed_literal(value, column.data_type)),
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let aliases: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let key_names: Vec<String> = self.key_columns.iter().map(|c| c.name.clone()).collect();
        let selected = key_names
            .iter()
            .map(|pk| qualified("v", pk))
            .collect::<Vec<_>>()
            .join(", ");
        let on = key_names
            .iter()
            .map(|pk| format!("{} = {}", qualified("t", pk), qualified("v", pk)))
            .collect::<Vec<_>>()
            .join(" AND ");
        let version = &self.version_column.name;
        let first_key = key_names.first().map(String::as_str).unwrap_or(version.as_str());

        format!(
            "SELECT {} FROM (VALUES {}) AS v({}) LEFT JOIN {} AS t ON {} WHERE {} IS NULL OR {} IS DISTINCT FROM {}",
            selected,
            rows,
            quote_identifiers(&aliases),
            quote_identifier(&self.table),
            on,
            qualified("t", first_key),
            qualified("t", version),
            qualified("v", version)
        )
    }
}

/// Log rows of one source record, newest last.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub table: String,
    pub doc_id_field: String,
    pub doc_id: Value,
    pub changed_attributes_field: String,
    /// Only rows whose changed set overlaps these names; empty means all rows.
    pub attributes: Vec<String>,
    pub order_by: Option<String>,
}

impl HistoryQuery {
    pub fn to_sql(&self) -> String {
        let mut sql = format!(
            "SELECT * FROM {} WHERE {} = {}",
            quote_identifier(&self.table),
            quote_identifier(&self.doc_id_field),
            quote_value(&self.doc_id)
        );
        if !self.attributes.is_empty() {
            sql.push_str(&format!(
                " AND {} && {}::text[]",
                quote_identifier(&self.changed_attributes_field),
                quote_value(&Value::TextArray(self.attributes.clone()))
            ));
        }
        if let Some(order_by) = &self.order_by {
            sql.push_str(&format!(" ORDER BY {}", quote_identifier(order_by)));
        }
        sql
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Insert,
    Update,
    StaleCheck,
    History,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::StaleCheck => "STALE CHECK",
            Self::History => "HISTORY",
        };
        write!(f, "{}", name)
    }
}

/// Everything the batch engine ever asks storage to run.
///
/// Executors that talk to a real database send [`Statement::to_sql`]; others may
/// interpret the structured form directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Insert(InsertPlan),
    Update(UpdatePlan),
    StaleCheck(StaleCheckPlan),
    History(HistoryQuery),
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Self::Insert(_) => StatementKind::Insert,
            Self::Update(_) => StatementKind::Update,
            Self::StaleCheck(_) => StatementKind::StaleCheck,
            Self::History(_) => StatementKind::History,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Self::Insert(plan) => &plan.table,
            Self::Update(plan) => &plan.table,
            Self::StaleCheck(plan) => &plan.table,
            Self::History(query) => &query.table,
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            Self::Insert(plan) => plan.to_sql(),
            Self::Update(plan) => plan.to_sql(),
            Self::StaleCheck(plan) => plan.to_sql(),
            Self::History(query) => query.to_sql(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;

    #[test]
    fn test_insert_sql() {
        let plan = InsertPlan {
            table: "docs".into(),
            columns: vec!["name".into(), "note".into()],
            rows: vec![
                vec![Value::from("a"), Value::Null],
                vec![Value::from("b"), Value::from("x")],
            ],
            returning: vec!["id".into()],
        };
        assert_eq!(
            plan.to_sql(),
            "INSERT INTO \"docs\" (\"name\", \"note\") VALUES ('a', NULL), ('b', 'x') RETURNING \"id\""
        );
    }

    #[test]
    fn test_update_sql_with_guard() {
        let plan = UpdatePlan {
            table: "docs".into(),
            columns: vec![
                Column::new("id", DataType::Integer),
                Column::new("name", DataType::Text),
                Column::new("version", DataType::Numeric),
            ],
            set_columns: vec!["name".into(), "version".into()],
            key_columns: vec!["id".into()],
            rows: vec![vec![
                Value::Integer(1),
                Value::Null,
                Value::from("5"),
                Value::from("4"),
            ]],
            version_guard: Some(VersionGuard {
                column: Column::new("version", DataType::Numeric),
            }),
        };
        assert_eq!(
            plan.to_sql(),
            "UPDATE \"docs\" AS t SET \"name\" = v.\"name\", \"version\" = v.\"version\" \
             FROM (VALUES (1::bigint, NULL::text, '5'::numeric, '4'::numeric)) \
             AS v(\"id\", \"name\", \"version\", \"__expected_version\") \
             WHERE t.\"id\" = v.\"id\" AND t.\"version\" = v.\"__expected_version\""
        );
        assert_eq!(plan.expected_version(0), Some(&Value::from("4")));
    }

    #[test]
    fn test_stale_check_sql() {
        let plan = StaleCheckPlan {
            table: "docs".into(),
            key_columns: vec![Column::new("id", DataType::Integer)],
            version_column: Column::new("version", DataType::Numeric),
            rows: vec![vec![Value::Integer(3), Value::from("100")]],
        };
        assert_eq!(
            plan.to_sql(),
            "SELECT v.\"id\" FROM (VALUES (3::bigint, '100'::numeric)) AS v(\"id\", \"version\") \
             LEFT JOIN \"docs\" AS t ON t.\"id\" = v.\"id\" \
             WHERE t.\"id\" IS NULL OR t.\"version\" IS DISTINCT FROM v.\"version\""
        );
    }

    #[test]
    fn test_history_sql() {
        let query = HistoryQuery {
            table: "docs_log".into(),
            doc_id_field: "doc_id".into(),
            doc_id: Value::Integer(9),
            changed_attributes_field: "changed_attributes".into(),
            attributes: vec!["name".into()],
            order_by: Some("atime".into()),
        };
        assert_eq!(
            query.to_sql(),
            "SELECT * FROM \"docs_log\" WHERE \"doc_id\" = 9 \
             AND \"changed_attributes\" && '{name}'::text[] ORDER BY \"atime\""
        );
    }
}
