use crate::error::{EtlError, Result};
use crate::storage::{Store, TableName};
use crate::types::{Cell, Column, ColumnType, UserTable};
use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlConnection, MySqlRow};
use sqlx::{Column as _, Connection, Executor, QueryBuilder, Row, Statement, TypeInfo};
use tracing::debug;

/// Rows per multi-row `INSERT`; keeps the bind count far below MySQL's 65535.
const INSERT_CHUNK_ROWS: usize = 500;

fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> EtlError {
    move |e| EtlError::Database {
        message: format!("{context}: {e}"),
    }
}

/// MySQL-backed store over a single connection.
///
/// Tables are qualified with the database name. The schema clone uses
/// `CREATE TABLE .. LIKE`, which stays valid on servers running with
/// GTID consistency enforced, where `CREATE TABLE .. SELECT` is rejected.
pub struct MySqlStore {
    conn: MySqlConnection,
    dbname: String,
}

impl MySqlStore {
    pub async fn connect(url: &str, dbname: &str) -> Result<Self> {
        TableName::validate_identifier(dbname)?;
        let conn = MySqlConnection::connect(url)
            .await
            .map_err(db_err("Failed to connect to database"))?;
        Ok(Self {
            conn,
            dbname: dbname.to_string(),
        })
    }

    fn column_decl(kind: ColumnType) -> &'static str {
        match kind {
            ColumnType::Integer => "BIGINT",
            ColumnType::Real => "DOUBLE",
            ColumnType::Text => "TEXT",
        }
    }
}

fn column_type(type_name: &str) -> ColumnType {
    let base = type_name.split_whitespace().next().unwrap_or_default();
    match base {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "BOOLEAN" | "YEAR" => ColumnType::Integer,
        "FLOAT" | "DOUBLE" => ColumnType::Real,
        _ => ColumnType::Text,
    }
}

fn decode(row: &MySqlRow, index: usize, type_name: &str) -> std::result::Result<Cell, sqlx::Error> {
    let cell = match column_type(type_name) {
        ColumnType::Integer if type_name.ends_with("UNSIGNED") => row
            .try_get::<Option<u64>, _>(index)?
            .map(|v| Cell::Integer(v as i64)),
        ColumnType::Integer => row.try_get::<Option<i64>, _>(index)?.map(Cell::Integer),
        ColumnType::Real if type_name == "FLOAT" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| Cell::Real(v as f64)),
        ColumnType::Real => row.try_get::<Option<f64>, _>(index)?.map(Cell::Real),
        ColumnType::Text => row
            .try_get_unchecked::<Option<String>, _>(index)?
            .map(Cell::Text),
    };
    Ok(cell.unwrap_or(Cell::Null))
}

#[async_trait]
impl Store for MySqlStore {
    fn quote(&self, table: &TableName) -> String {
        format!("`{}`.`{}`", self.dbname, table)
    }

    async fn replace_table(&mut self, table: &TableName, data: &UserTable) -> Result<()> {
        let quoted = self.quote(table);
        let decl = data
            .columns()
            .iter()
            .map(|c| format!("`{}` {}", c.name, Self::column_decl(c.kind)))
            .collect::<Vec<_>>()
            .join(", ");
        let names = data
            .columns()
            .iter()
            .map(|c| format!("`{}`", c.name))
            .collect::<Vec<_>>()
            .join(", ");

        self.drop_table_if_exists(table).await?;
        self.execute(&format!("CREATE TABLE {quoted} ({decl})")).await?;

        for chunk in data.rows().chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<MySql> = QueryBuilder::new(format!("INSERT INTO {quoted} ({names}) "));
            builder.push_values(chunk, |mut values, row| {
                for cell in row {
                    match cell {
                        Cell::Null => values.push_bind(None::<String>),
                        Cell::Integer(v) => values.push_bind(*v),
                        Cell::Real(v) => values.push_bind(*v),
                        Cell::Text(v) => values.push_bind(v.clone()),
                    };
                }
            });
            builder
                .build()
                .execute(&mut self.conn)
                .await
                .map_err(db_err("Failed to insert rows"))?;
        }

        debug!("Replaced table {} with {} rows", table, data.len());
        Ok(())
    }

    async fn drop_table_if_exists(&mut self, table: &TableName) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.quote(table));
        self.execute(&sql).await
    }

    async fn create_table_like(&mut self, dest: &TableName, source: &TableName) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} LIKE {}",
            self.quote(dest),
            self.quote(source)
        );
        self.execute(&sql).await
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        debug!(%sql, "Executing statement");
        Executor::execute(&mut self.conn, sql)
            .await
            .map_err(db_err("Failed to execute statement"))?;
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> Result<UserTable> {
        debug!(%sql, "Running query");
        let statement = Executor::prepare(&mut self.conn, sql)
            .await
            .map_err(db_err("Failed to prepare query"))?;
        let described: Vec<(String, String)> = statement
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.type_info().name().to_string()))
            .collect();
        let rows = statement
            .query()
            .fetch_all(&mut self.conn)
            .await
            .map_err(db_err("Failed to run query"))?;

        let mut table = UserTable::new(
            described
                .iter()
                .map(|(name, type_name)| Column::new(name.clone(), column_type(type_name)))
                .collect(),
        );
        for row in &rows {
            let cells = described
                .iter()
                .enumerate()
                .map(|(i, (_, type_name))| decode(row, i, type_name))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err("Failed to read row"))?;
            table.push_row(cells);
        }
        Ok(table)
    }
}
