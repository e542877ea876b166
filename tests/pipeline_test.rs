use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use randomuser_etl::apis::randomuser::parse_users;
use randomuser_etl::error::EtlError;
use randomuser_etl::pipeline::partition::AgeLadder;
use randomuser_etl::pipeline::Pipeline;
use randomuser_etl::storage::{SqliteStore, Store, TableName};
use randomuser_etl::types::{Cell, UserSource, UserTable};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const PREFIX: &str = "etl_test";

struct FixtureSource {
    body: String,
}

impl FixtureSource {
    fn new(users: Vec<Value>) -> Self {
        Self {
            body: json!({ "results": users, "info": { "results": 0 } }).to_string(),
        }
    }
}

#[async_trait::async_trait]
impl UserSource for FixtureSource {
    fn source_name(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_users(&self, _count: u32) -> randomuser_etl::error::Result<UserTable> {
        parse_users(&self.body)
    }
}

struct FailingSource;

#[async_trait::async_trait]
impl UserSource for FailingSource {
    fn source_name(&self) -> &'static str {
        "failing"
    }

    async fn fetch_users(&self, _count: u32) -> randomuser_etl::error::Result<UserTable> {
        Err(EtlError::Api {
            message: "service unavailable".to_string(),
        })
    }
}

fn user(email: &str, gender: &str, age: i64, registered: &str) -> Value {
    json!({
        "gender": gender,
        "name": { "title": "Mx", "first": email, "last": "Test" },
        "email": email,
        "dob": { "date": "1990-01-01T00:00:00.000Z", "age": age },
        "registered": { "date": registered, "age": 3 },
        "nat": "US"
    })
}

fn pipeline(output_dir: &Path) -> Pipeline {
    Pipeline::new(100, PREFIX, AgeLadder::default(), output_dir)
}

async fn read(store: &mut SqliteStore, suffix: &str) -> Result<UserTable> {
    let name = TableName::new(PREFIX, suffix)?;
    let sql = format!("SELECT * FROM {}", store.quote(&name));
    Ok(store.query(&sql).await?)
}

fn column(table: &UserTable, name: &str) -> Vec<Cell> {
    let i = table.column_index(name).unwrap();
    table.rows().iter().map(|r| r[i].clone()).collect()
}

fn text(values: &[&str]) -> Vec<Cell> {
    values.iter().map(|v| Cell::Text(v.to_string())).collect()
}

fn load_export(path: &Path) -> Result<Value> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

#[tokio::test]
async fn two_users_land_in_gender_and_age_tables() -> Result<()> {
    let out = tempdir()?;
    let mut store = SqliteStore::open_in_memory()?;
    let source = FixtureSource::new(vec![
        user("m@example.com", "male", 25, "2020-01-01T00:00:00.000Z"),
        user("f@example.com", "female", 44, "2021-06-01T00:00:00.000Z"),
    ]);

    let result = pipeline(out.path()).run(&source, &mut store).await?;
    assert_eq!(result.fetched_rows, 2);

    let male = read(&mut store, "male").await?;
    let female = read(&mut store, "female").await?;
    assert_eq!(column(&male, "email"), text(&["m@example.com"]));
    assert_eq!(column(&female, "email"), text(&["f@example.com"]));

    assert_eq!(column(&read(&mut store, "2").await?, "dob_age"), vec![Cell::Integer(25)]);
    assert_eq!(column(&read(&mut store, "4").await?, "dob_age"), vec![Cell::Integer(44)]);
    for suffix in ["1", "3", "5", "6", "7", "8", "9", "10"] {
        assert!(read(&mut store, suffix).await?.is_empty(), "bucket {suffix} should be empty");
    }
    assert_eq!(result.age_tables.len(), 10);
    Ok(())
}

#[tokio::test]
async fn top_table_takes_newest_ten_per_gender_female_first() -> Result<()> {
    let out = tempdir()?;
    let mut store = SqliteStore::open_in_memory()?;
    let mut users = Vec::new();
    for day in 1..=3 {
        users.push(user(
            &format!("f{day}@example.com"),
            "female",
            30,
            &format!("2021-01-{day:02}T00:00:00.000Z"),
        ));
    }
    for day in 1..=15 {
        users.push(user(
            &format!("m{day}@example.com"),
            "male",
            30,
            &format!("2020-01-{day:02}T00:00:00.000Z"),
        ));
    }

    pipeline(out.path()).run(&FixtureSource::new(users), &mut store).await?;

    let top = read(&mut store, "20").await?;
    assert_eq!(top.len(), 13);
    let mut expected = vec!["f3@example.com", "f2@example.com", "f1@example.com"];
    let males: Vec<String> = (6..=15).rev().map(|d| format!("m{d}@example.com")).collect();
    expected.extend(males.iter().map(String::as_str));
    assert_eq!(column(&top, "email"), text(&expected));
    Ok(())
}

#[tokio::test]
async fn exports_dedup_first_and_keep_multiplicity_in_second() -> Result<()> {
    let out = tempdir()?;
    let mut store = SqliteStore::open_in_memory()?;
    let source = FixtureSource::new(vec![
        user("f1@example.com", "female", 55, "2022-01-01T00:00:00.000Z"),
        user("f2@example.com", "female", 33, "2021-01-01T00:00:00.000Z"),
        user("m1@example.com", "male", 25, "2022-01-01T00:00:00.000Z"),
        user("m2@example.com", "male", 57, "2020-01-01T00:00:00.000Z"),
        user("m3@example.com", "male", 70, "2019-01-01T00:00:00.000Z"),
    ]);

    let result = pipeline(out.path()).run(&source, &mut store).await?;
    assert_eq!(result.exports.len(), 2);

    let first = load_export(&out.path().join("first.json"))?;
    let fields = first["schema"]["fields"].as_array().unwrap();
    assert_eq!(fields.len(), 34);
    assert!(fields.contains(&json!({ "name": "dob_age", "type": "integer" })));
    let rows = first["data"].as_array().unwrap();
    assert_eq!(rows.len(), 5);
    let unique: HashSet<String> = rows.iter().map(|r| r.to_string()).collect();
    assert_eq!(unique.len(), rows.len());

    let second = load_export(&out.path().join("second.json"))?;
    let rows = second["data"].as_array().unwrap();
    assert_eq!(rows.len(), 6);
    let m1 = rows.iter().filter(|r| r["email"] == "m1@example.com").count();
    assert_eq!(m1, 2);
    assert_eq!(rows[0]["email"], "f1@example.com");
    assert_eq!(rows[5]["email"], "m1@example.com");
    Ok(())
}

#[tokio::test]
async fn export_schema_keeps_integer_type_when_one_side_is_all_null() -> Result<()> {
    let out = tempdir()?;
    let mut store = SqliteStore::open_in_memory()?;
    let mut users = vec![user("f1@example.com", "female", 30, "2022-01-01T00:00:00.000Z")];
    for day in 1..=10 {
        users.push(user(
            &format!("m{day}@example.com"),
            "male",
            30,
            &format!("2021-01-{day:02}T00:00:00.000Z"),
        ));
    }
    let mut old = user("old@example.com", "male", 55, "2010-01-01T00:00:00.000Z");
    old["location"] = json!({ "street": { "number": 12, "name": "Main St" } });
    users.push(old);

    pipeline(out.path()).run(&FixtureSource::new(users), &mut store).await?;

    let top = read(&mut store, "20").await?;
    assert!(column(&top, "location_street_number").iter().all(Cell::is_null));

    let first = load_export(&out.path().join("first.json"))?;
    let fields = first["schema"]["fields"].as_array().unwrap();
    assert!(fields.contains(&json!({ "name": "location_street_number", "type": "integer" })));
    let numbers: Vec<&Value> = first["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| &r["location_street_number"])
        .filter(|v| !v.is_null())
        .collect();
    assert_eq!(numbers, vec![&json!(12)]);
    Ok(())
}

#[tokio::test]
async fn rerun_replaces_tables_and_reproduces_exports() -> Result<()> {
    let out = tempdir()?;
    let mut store = SqliteStore::open_in_memory()?;
    let source = FixtureSource::new(vec![
        user("f1@example.com", "female", 52, "2022-01-01T00:00:00.000Z"),
        user("m1@example.com", "male", 21, "2021-01-01T00:00:00.000Z"),
        user("x1@example.com", "unknown", 40, "2021-01-01T00:00:00.000Z"),
    ]);
    let pipeline = pipeline(out.path());

    pipeline.run(&source, &mut store).await?;
    let first_run = (
        fs::read(out.path().join("first.json"))?,
        fs::read(out.path().join("second.json"))?,
    );
    pipeline.run(&source, &mut store).await?;
    let second_run = (
        fs::read(out.path().join("first.json"))?,
        fs::read(out.path().join("second.json"))?,
    );

    assert_eq!(first_run, second_run);
    assert_eq!(read(&mut store, "male").await?.len(), 1);
    assert_eq!(read(&mut store, "20").await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn fetch_failure_aborts_before_any_write() -> Result<()> {
    let out = tempdir()?;
    let mut store = SqliteStore::open_in_memory()?;

    let err = pipeline(out.path()).run(&FailingSource, &mut store).await.unwrap_err();
    assert!(matches!(err, EtlError::Api { .. }));

    let tables = store
        .query("SELECT name FROM sqlite_master WHERE type = 'table'")
        .await?;
    assert!(tables.is_empty());
    assert!(!out.path().join("first.json").exists());
    Ok(())
}

#[test]
fn run_records_row_counts_and_stage_timings() -> Result<()> {
    let out = tempdir()?;
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let source = FixtureSource::new(vec![
        user("m@example.com", "male", 25, "2020-01-01T00:00:00.000Z"),
        user("f@example.com", "female", 44, "2021-06-01T00:00:00.000Z"),
    ]);

    metrics::with_local_recorder(&recorder, || {
        runtime.block_on(async {
            let mut store = SqliteStore::open_in_memory()?;
            pipeline(out.path()).run(&source, &mut store).await?;
            Ok::<_, anyhow::Error>(())
        })
    })?;

    let text = handle.render();
    assert!(text.contains("etl_rows_fetched_total 2"), "{text}");
    assert!(text.contains(&format!("etl_rows_written_total{{table=\"{PREFIX}_male\"}} 1")), "{text}");
    assert!(text.contains("etl_stage_duration_seconds_count{stage=\"exports\"} 1"), "{text}");
    Ok(())
}
