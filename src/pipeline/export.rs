use crate::error::Result;
use crate::storage::{Store, TableName};
use crate::types::UserTable;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Outcome of one export, reported in the run summary.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub deduplicated: bool,
}

/// Runs both queries and concatenates their rows, first then second,
/// optionally dropping exact duplicate rows.
pub async fn union_queries(
    store: &mut dyn Store,
    first_sql: &str,
    second_sql: &str,
    drop_duplicates: bool,
) -> Result<UserTable> {
    let first = store.query(first_sql).await?;
    let second = store.query(second_sql).await?;
    let union = first.concat(second)?;
    Ok(if drop_duplicates {
        union.drop_duplicates()
    } else {
        union
    })
}

/// Writes `table` as table-oriented JSON to `<dir>/<file_name>.json`.
///
/// The document goes to a sibling `.tmp` file first and is renamed into place,
/// so an existing export is only replaced by a complete one.
pub fn write_table_json(table: &UserTable, dir: &Path, file_name: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{file_name}.json"));
    let tmp = dir.join(format!("{file_name}.json.tmp"));

    let body = serde_json::to_vec(&table.to_table_json())?;
    fs::write(&tmp, body)?;
    fs::rename(&tmp, &path)?;
    Ok(path)
}

/// Reads two tables, unions them and exports the result.
#[instrument(skip(store, dir))]
pub async fn export_union(
    store: &mut dyn Store,
    first: &TableName,
    second: &TableName,
    drop_duplicates: bool,
    dir: &Path,
    file_name: &str,
) -> Result<ExportSummary> {
    let first_sql = format!("SELECT * FROM {}", store.quote(first));
    let second_sql = format!("SELECT * FROM {}", store.quote(second));
    let union = union_queries(store, &first_sql, &second_sql, drop_duplicates).await?;

    let path = write_table_json(&union, dir, file_name)?;
    info!("Created {} with {} rows", path.display(), union.len());
    Ok(ExportSummary {
        path,
        rows: union.len(),
        deduplicated: drop_duplicates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cell, Column, ColumnType};
    use serde_json::Value;

    #[test]
    fn write_overwrites_previous_export() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = UserTable::new(vec![Column::new("nat", ColumnType::Text)]);
        table.push_row(vec![Cell::Text("US".into())]);

        write_table_json(&UserTable::new(table.columns().to_vec()), dir.path(), "first").unwrap();
        let path = write_table_json(&table, dir.path(), "first").unwrap();

        let doc: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(doc["schema"]["fields"][0]["name"], "nat");
        assert_eq!(doc["data"].as_array().unwrap().len(), 1);
        assert!(!dir.path().join("first.json.tmp").exists());
    }

    #[test]
    fn write_fails_when_directory_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("out");
        fs::write(&blocker, b"not a dir").unwrap();
        let table = UserTable::new(vec![Column::new("nat", ColumnType::Text)]);
        assert!(write_table_json(&table, &blocker, "first").is_err());
    }
}
