use crate::error::{EtlError, Result};
use crate::storage::{Store, TableName};
use crate::types::{Cell, Column, ColumnType, UserTable};
use async_trait::async_trait;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use tracing::debug;

fn db_err(context: &'static str) -> impl FnOnce(rusqlite::Error) -> EtlError {
    move |e| EtlError::Database {
        message: format!("{context}: {e}"),
    }
}

/// SQLite-backed store, used for local runs and tests.
///
/// SQLite has no `CREATE TABLE .. LIKE`, so the schema clone reads the source
/// columns from `PRAGMA table_info` and issues a plain `CREATE TABLE`.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(db_err("Failed to open SQLite database"))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("Failed to open in-memory SQLite database"))?;
        Ok(Self { conn })
    }

    fn column_decl(kind: ColumnType) -> &'static str {
        match kind {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    fn quote_ident(ident: &str) -> String {
        format!("\"{ident}\"")
    }

    fn table_columns(&self, table: &TableName) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", self.quote(table)))
            .map_err(db_err("Failed to read table info"))?;
        let columns = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))
            .map_err(db_err("Failed to read table info"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Failed to read table info"))?;
        Ok(columns)
    }
}

impl ToSql for Cell {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Cell::Null => ToSqlOutput::Owned(Value::Null),
            Cell::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            Cell::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            Cell::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

/// Column type for a declared SQLite type, following SQLite's affinity rules.
fn declared_type(decl: &str) -> ColumnType {
    let decl = decl.to_ascii_uppercase();
    if decl.contains("INT") {
        ColumnType::Integer
    } else if decl.contains("REAL") || decl.contains("FLOA") || decl.contains("DOUB") {
        ColumnType::Real
    } else {
        ColumnType::Text
    }
}

/// Narrowest column type covering every value seen so far.
fn observe(current: Option<ColumnType>, value: &ValueRef<'_>) -> Option<ColumnType> {
    let seen = match value {
        ValueRef::Null => return current,
        ValueRef::Integer(_) => ColumnType::Integer,
        ValueRef::Real(_) => ColumnType::Real,
        ValueRef::Text(_) | ValueRef::Blob(_) => ColumnType::Text,
    };
    Some(match (current, seen) {
        (None, s) => s,
        (Some(ColumnType::Text), _) | (_, ColumnType::Text) => ColumnType::Text,
        (Some(ColumnType::Real), _) | (_, ColumnType::Real) => ColumnType::Real,
        _ => ColumnType::Integer,
    })
}

#[async_trait]
impl Store for SqliteStore {
    fn quote(&self, table: &TableName) -> String {
        Self::quote_ident(table.as_str())
    }

    async fn replace_table(&mut self, table: &TableName, data: &UserTable) -> Result<()> {
        let quoted = self.quote(table);
        let columns = data
            .columns()
            .iter()
            .map(|c| format!("{} {}", Self::quote_ident(&c.name), Self::column_decl(c.kind)))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; data.columns().len()].join(", ");

        let tx = self
            .conn
            .transaction()
            .map_err(db_err("Failed to begin transaction"))?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {quoted}; CREATE TABLE {quoted} ({columns});"
        ))
        .map_err(db_err("Failed to recreate table"))?;
        {
            let mut stmt = tx
                .prepare(&format!("INSERT INTO {quoted} VALUES ({placeholders})"))
                .map_err(db_err("Failed to prepare insert"))?;
            for row in data.rows() {
                stmt.execute(params_from_iter(row.iter()))
                    .map_err(db_err("Failed to insert row"))?;
            }
        }
        tx.commit().map_err(db_err("Failed to commit table replace"))?;

        debug!("Replaced table {} with {} rows", table, data.len());
        Ok(())
    }

    async fn drop_table_if_exists(&mut self, table: &TableName) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.quote(table));
        self.execute(&sql).await
    }

    async fn create_table_like(&mut self, dest: &TableName, source: &TableName) -> Result<()> {
        let columns = self.table_columns(source)?;
        if columns.is_empty() {
            return Err(EtlError::Database {
                message: format!("Source table {source} does not exist"),
            });
        }
        let decl = columns
            .iter()
            .map(|(name, kind)| format!("{} {}", Self::quote_ident(name), kind))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("CREATE TABLE IF NOT EXISTS {} ({decl})", self.quote(dest));
        self.execute(&sql).await
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        debug!(%sql, "Executing statement");
        self.conn
            .execute_batch(sql)
            .map_err(db_err("Failed to execute statement"))
    }

    async fn query(&mut self, sql: &str) -> Result<UserTable> {
        debug!(%sql, "Running query");
        let mut stmt = self.conn.prepare(sql).map_err(db_err("Failed to prepare query"))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        // Declared types win; expression columns without one are inferred from values.
        let declared: Vec<Option<ColumnType>> = stmt
            .columns()
            .iter()
            .map(|c| c.decl_type().map(declared_type))
            .collect();
        let mut kinds: Vec<Option<ColumnType>> = vec![None; names.len()];
        let mut rows = Vec::new();

        let mut cursor = stmt.query([]).map_err(db_err("Failed to run query"))?;
        while let Some(row) = cursor.next().map_err(db_err("Failed to read row"))? {
            let mut cells = Vec::with_capacity(names.len());
            for (i, kind) in kinds.iter_mut().enumerate() {
                let value = row.get_ref(i).map_err(db_err("Failed to read column"))?;
                *kind = observe(*kind, &value);
                cells.push(match value {
                    ValueRef::Null => Cell::Null,
                    ValueRef::Integer(v) => Cell::Integer(v),
                    ValueRef::Real(v) => Cell::Real(v),
                    ValueRef::Text(v) | ValueRef::Blob(v) => {
                        Cell::Text(String::from_utf8_lossy(v).into_owned())
                    }
                });
            }
            rows.push(cells);
        }

        let columns = names
            .into_iter()
            .zip(declared.into_iter().zip(kinds))
            .map(|(name, (declared, seen))| {
                Column::new(name, declared.or(seen).unwrap_or(ColumnType::Text))
            })
            .collect();
        let mut table = UserTable::new(columns);
        for cells in rows {
            table.push_row(cells);
        }
        Ok(table)
    }
}
