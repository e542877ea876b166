use crate::config::{Backend, StoreConfig};
use crate::error::{EtlError, Result};
use crate::types::UserTable;
use async_trait::async_trait;
use std::fmt;
use tracing::info;

pub mod mysql;
pub mod sqlite;

pub use mysql::MySqlStore;
pub use sqlite::SqliteStore;

const MAX_IDENTIFIER_LEN: usize = 64;

/// Name of a persisted table, always `<prefix>_<suffix>`.
///
/// Both parts are restricted to ASCII letters, digits and `_`, so a name can be
/// quoted into SQL without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    pub fn new(prefix: &str, suffix: &str) -> Result<Self> {
        Self::validate_identifier(prefix)?;
        Self::validate_identifier(suffix)?;
        let name = format!("{prefix}_{suffix}");
        Self::validate_identifier(&name)?;
        Ok(Self(name))
    }

    pub fn validate_identifier(ident: &str) -> Result<()> {
        let ok = !ident.is_empty()
            && ident.len() <= MAX_IDENTIFIER_LEN
            && ident.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
        if ok {
            Ok(())
        } else {
            Err(EtlError::InvalidIdentifier(ident.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A SQL-capable store holding one session for the whole run.
///
/// Every call is its own round-trip; nothing is cached between calls, so a
/// write is visible to the next read.
#[async_trait]
pub trait Store: Send {
    /// Quoted (and, where the backend needs it, schema-qualified) table reference.
    fn quote(&self, table: &TableName) -> String;

    /// Drops `table` if present, recreates it with `data`'s columns and bulk
    /// inserts every row.
    async fn replace_table(&mut self, table: &TableName, data: &UserTable) -> Result<()>;

    async fn drop_table_if_exists(&mut self, table: &TableName) -> Result<()>;

    /// Creates `dest` with the column layout of `source` and no rows. Never
    /// implemented as `CREATE TABLE .. AS SELECT`.
    async fn create_table_like(&mut self, dest: &TableName, source: &TableName) -> Result<()>;

    /// Runs a statement that returns no rows.
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Runs a query and collects every row.
    async fn query(&mut self, sql: &str) -> Result<UserTable>;
}

/// Opens the single store session used by every stage.
pub async fn connect(config: &StoreConfig) -> Result<Box<dyn Store>> {
    match config.backend {
        Backend::Mysql => {
            info!(host = %config.hostname, db = %config.dbname, "Connecting to MySQL");
            let store = MySqlStore::connect(&config.mysql_url()?, &config.dbname).await?;
            Ok(Box::new(store))
        }
        Backend::Sqlite => {
            info!(path = %config.sqlite_path.display(), "Opening SQLite database");
            Ok(Box::new(SqliteStore::open(&config.sqlite_path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_joins_prefix_and_suffix() {
        let name = TableName::new("elinor_test", "female").unwrap();
        assert_eq!(name.as_str(), "elinor_test_female");
        assert_eq!(name.to_string(), "elinor_test_female");
    }

    #[test]
    fn table_name_rejects_sql_metacharacters() {
        for bad in ["users`", "users; DROP TABLE x", "a b", "", "naïve"] {
            assert!(
                matches!(TableName::new(bad, "male"), Err(EtlError::InvalidIdentifier(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(TableName::new("users", "1-2").is_err());
    }

    #[test]
    fn table_name_rejects_overlong_names() {
        let prefix = "p".repeat(60);
        assert!(TableName::new(&prefix, "female").is_err());
    }
}
