use crate::constants::{FEMALE, MALE, REGISTERED_COLUMN, TOP_PER_GENDER, TOP_TABLE_SUFFIX};
use crate::error::Result;
use crate::pipeline::partition::gender_table;
use crate::storage::{Store, TableName};
use tracing::{info, instrument};

pub fn top_table(prefix: &str) -> Result<TableName> {
    TableName::new(prefix, TOP_TABLE_SUFFIX)
}

/// `INSERT .. SELECT` taking the newest registrations from each side, female
/// rows first, concatenated with `UNION ALL`.
pub fn insert_top_sql(store: &dyn Store, dest: &TableName, female: &TableName, male: &TableName) -> String {
    let side = |table: &TableName| {
        format!(
            "SELECT * FROM {} ORDER BY {REGISTERED_COLUMN} DESC LIMIT {TOP_PER_GENDER}",
            store.quote(table)
        )
    };
    format!(
        "INSERT INTO {} SELECT * FROM ({}) AS top_female UNION ALL SELECT * FROM ({}) AS top_male",
        store.quote(dest),
        side(female),
        side(male)
    )
}

/// Rebuilds `<prefix>_20` server-side from the two gender tables.
///
/// Three separate statements: drop, structural schema copy of the female
/// table, insert. A failure leaves whatever the earlier statements did.
#[instrument(skip(store))]
pub async fn create_top_table(store: &mut dyn Store, prefix: &str) -> Result<TableName> {
    let dest = top_table(prefix)?;
    let female = gender_table(prefix, FEMALE)?;
    let male = gender_table(prefix, MALE)?;

    store.drop_table_if_exists(&dest).await?;
    store.create_table_like(&dest, &female).await?;
    let insert = insert_top_sql(&*store, &dest, &female, &male);
    store.execute(&insert).await?;

    info!("Rebuilt {} from {} and {}", dest, female, male);
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;

    #[test]
    fn insert_sql_orders_each_side_by_registration() {
        let store = SqliteStore::open_in_memory().unwrap();
        let sql = insert_top_sql(
            &store,
            &top_table("u").unwrap(),
            &gender_table("u", FEMALE).unwrap(),
            &gender_table("u", MALE).unwrap(),
        );
        assert_eq!(
            sql,
            "INSERT INTO \"u_20\" SELECT * FROM (SELECT * FROM \"u_female\" ORDER BY registered_date DESC LIMIT 10) AS top_female \
             UNION ALL SELECT * FROM (SELECT * FROM \"u_male\" ORDER BY registered_date DESC LIMIT 10) AS top_male"
        );
    }
}
