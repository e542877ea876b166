use crate::constants::{AGE_COLUMN, GENDER_COLUMN, GENDER_LABELS};
use crate::error::{EtlError, Result};
use crate::storage::{Store, TableName};
use crate::types::UserTable;
use metrics::counter;
use tracing::{debug, instrument};

/// Fixed-width age buckets `[k, k + width)` for `k = start, start + width, ..`
/// with the last bucket ending at `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeLadder {
    start: u32,
    end: u32,
    width: u32,
}

impl AgeLadder {
    pub fn new(start: u32, end: u32, width: u32) -> Result<Self> {
        if width == 0 {
            return Err(EtlError::Config("age bucket width must be positive".to_string()));
        }
        if start >= end || (end - start) % width != 0 {
            return Err(EtlError::Config(format!(
                "age ladder {start}..{end} is not a whole number of {width}-year buckets"
            )));
        }
        // The table suffix drops the last digit of the lower bound.
        if start < 10 {
            return Err(EtlError::Config(format!(
                "age ladder must start at 10 or above, got {start}"
            )));
        }
        Ok(Self { start, end, width })
    }

    /// Bucket lower bounds, ascending.
    pub fn labels(&self) -> impl Iterator<Item = u32> {
        (self.start..self.end).step_by(self.width as usize)
    }

    /// Lower bound of the bucket holding `age`, or `None` outside the ladder.
    pub fn bucket_for(&self, age: i64) -> Option<u32> {
        if age < self.start as i64 || age >= self.end as i64 {
            return None;
        }
        let offset = (age - self.start as i64) as u32;
        Some(self.start + offset / self.width * self.width)
    }
}

impl Default for AgeLadder {
    fn default() -> Self {
        Self {
            start: 10,
            end: 110,
            width: 10,
        }
    }
}

/// Table suffix for a bucket: the lower bound with its last digit removed,
/// so 20 → "2", 50 → "5", 100 → "10".
pub fn bucket_suffix(label: u32) -> String {
    let mut digits = label.to_string();
    digits.pop();
    digits
}

pub fn gender_table(prefix: &str, gender: &str) -> Result<TableName> {
    TableName::new(prefix, gender)
}

pub fn age_table(prefix: &str, label: u32) -> Result<TableName> {
    TableName::new(prefix, &bucket_suffix(label))
}

/// One subset per known gender label, by exact case-sensitive match.
/// Rows with any other value, or none, are left out.
pub fn split_by_gender(table: &UserTable) -> Vec<(&'static str, UserTable)> {
    let index = table.column_index(GENDER_COLUMN);
    GENDER_LABELS
        .iter()
        .map(|label| {
            let subset = table.filter(|row| {
                index
                    .and_then(|i| row[i].as_str())
                    .map_or(false, |g| g == *label)
            });
            (*label, subset)
        })
        .collect()
}

/// One subset per bucket of `ladder`, empty buckets included.
pub fn split_by_age(table: &UserTable, ladder: &AgeLadder) -> Vec<(u32, UserTable)> {
    let index = table.column_index(AGE_COLUMN);
    ladder
        .labels()
        .map(|label| {
            let subset = table.filter(|row| {
                index
                    .and_then(|i| row[i].as_i64())
                    .and_then(|age| ladder.bucket_for(age))
                    == Some(label)
            });
            (label, subset)
        })
        .collect()
}

async fn write(store: &mut dyn Store, name: TableName, subset: &UserTable) -> Result<(TableName, usize)> {
    store.replace_table(&name, subset).await?;
    counter!("etl_rows_written_total", "table" => name.to_string()).increment(subset.len() as u64);
    debug!("Wrote {} rows to {}", subset.len(), name);
    Ok((name, subset.len()))
}

/// Full-replace writes `<prefix>_male` then `<prefix>_female`.
#[instrument(skip(store, table))]
pub async fn write_gender_tables(
    store: &mut dyn Store,
    table: &UserTable,
    prefix: &str,
) -> Result<Vec<(TableName, usize)>> {
    let mut written = Vec::new();
    for (gender, subset) in split_by_gender(table) {
        written.push(write(store, gender_table(prefix, gender)?, &subset).await?);
    }
    Ok(written)
}

/// Full-replace writes one `<prefix>_<suffix>` table per age bucket.
#[instrument(skip(store, table))]
pub async fn write_age_tables(
    store: &mut dyn Store,
    table: &UserTable,
    prefix: &str,
    ladder: &AgeLadder,
) -> Result<Vec<(TableName, usize)>> {
    let mut written = Vec::new();
    for (label, subset) in split_by_age(table, ladder) {
        written.push(write(store, age_table(prefix, label)?, &subset).await?);
    }
    Ok(written)
}
