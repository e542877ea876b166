use crate::error::{EtlError, Result};
use async_trait::async_trait;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::HashSet;

/// Storage class of a column, shared by every store adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    /// Field type used in the `schema.fields` section of table-oriented JSON.
    pub fn json_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Real => "number",
            ColumnType::Text => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A single value in a row. Serializes as the bare JSON scalar.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Integer(v) => Some(*v),
            Cell::Real(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Option<String>> for Cell {
    fn from(value: Option<String>) -> Self {
        value.map(Cell::Text).unwrap_or(Cell::Null)
    }
}

impl From<Option<i64>> for Cell {
    fn from(value: Option<i64>) -> Self {
        value.map(Cell::Integer).unwrap_or(Cell::Null)
    }
}

/// Ordered rows sharing one column schema.
///
/// Holds both freshly fetched records and rows read back from a store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserTable {
    columns: Vec<Column>,
    rows: Vec<Vec<Cell>>,
}

impl UserTable {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends a row. Short rows are padded with NULL, long rows are truncated,
    /// so every row keeps the table's width.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), Cell::Null);
        self.rows.push(row);
    }

    /// New table with the same schema holding the rows accepted by `keep`,
    /// in their original order.
    pub fn filter<F>(&self, mut keep: F) -> UserTable
    where
        F: FnMut(&[Cell]) -> bool,
    {
        UserTable {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| keep(r.as_slice())).cloned().collect(),
        }
    }

    /// Appends `other` after `self`. Column names must match positionally.
    pub fn concat(mut self, other: UserTable) -> Result<UserTable> {
        if self.column_names() != other.column_names() {
            return Err(EtlError::SchemaMismatch {
                left: self.column_names(),
                right: other.column_names(),
            });
        }
        // An empty side has no values to widen with.
        if self.rows.is_empty() {
            self.columns = other.columns.clone();
        } else if !other.rows.is_empty() {
            for (mine, theirs) in self.columns.iter_mut().zip(other.columns.iter()) {
                mine.kind = widen(mine.kind, theirs.kind);
            }
        }
        self.rows.extend(other.rows);
        Ok(self)
    }

    /// Removes rows equal across all columns, keeping the first occurrence.
    pub fn drop_duplicates(mut self) -> UserTable {
        let mut seen = HashSet::new();
        self.rows.retain(|row| {
            // serde_json renders every cell variant unambiguously, floats included
            let key = serde_json::to_string(row).unwrap_or_default();
            seen.insert(key)
        });
        self
    }

    pub fn to_table_json(&self) -> TableJson<'_> {
        TableJson { table: self }
    }
}

fn widen(a: ColumnType, b: ColumnType) -> ColumnType {
    use ColumnType::*;
    match (a, b) {
        (Integer, Integer) => Integer,
        (Integer, Real) | (Real, Integer) | (Real, Real) => Real,
        _ => Text,
    }
}

/// Table-oriented JSON view: an explicit schema plus the row data.
///
/// ```json
/// {"schema":{"fields":[{"name":"gender","type":"string"}]},"data":[{"gender":"male"}]}
/// ```
pub struct TableJson<'a> {
    table: &'a UserTable,
}

#[derive(Serialize)]
struct Field<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct Schema<'a> {
    fields: Vec<Field<'a>>,
}

struct Record<'a> {
    columns: &'a [Column],
    cells: &'a [Cell],
}

impl Serialize for Record<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, cell) in self.columns.iter().zip(self.cells.iter()) {
            map.serialize_entry(&column.name, cell)?;
        }
        map.end()
    }
}

impl Serialize for TableJson<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let schema = Schema {
            fields: self
                .table
                .columns
                .iter()
                .map(|c| Field {
                    name: &c.name,
                    kind: c.kind.json_type(),
                })
                .collect(),
        };
        let data: Vec<Record<'_>> = self
            .table
            .rows
            .iter()
            .map(|cells| Record {
                columns: &self.table.columns,
                cells,
            })
            .collect();

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("schema", &schema)?;
        map.serialize_entry("data", &data)?;
        map.end()
    }
}

/// A remote source of synthetic user records.
#[async_trait]
pub trait UserSource: Send + Sync {
    /// Short name used in logs
    fn source_name(&self) -> &'static str;

    /// Fetches `count` records flattened into one table.
    async fn fetch_users(&self, count: u32) -> Result<UserTable>;
}
