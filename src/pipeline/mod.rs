// Batch pipeline: fetch, partition, combine, export

pub mod combine;
pub mod export;
pub mod partition;

use crate::config::Config;
use crate::constants::{
    FIRST_EXPORT_BUCKET, FIRST_EXPORT_FILE, SECOND_EXPORT_BUCKET, SECOND_EXPORT_FILE,
};
use crate::error::Result;
use crate::storage::{Store, TableName};
use crate::types::UserSource;
use export::ExportSummary;
use metrics::{counter, histogram};
use partition::AgeLadder;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, instrument};

/// A persisted table and the number of rows written to it.
#[derive(Debug, Clone)]
pub struct WrittenTable {
    pub name: String,
    pub rows: usize,
}

impl From<(TableName, usize)> for WrittenTable {
    fn from((name, rows): (TableName, usize)) -> Self {
        Self {
            name: name.to_string(),
            rows,
        }
    }
}

/// Result of a complete pipeline run
#[derive(Debug)]
pub struct PipelineResult {
    pub source: String,
    pub fetched_rows: usize,
    pub gender_tables: Vec<WrittenTable>,
    pub age_tables: Vec<WrittenTable>,
    pub top_table: String,
    pub exports: Vec<ExportSummary>,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    results: u32,
    prefix: String,
    ladder: AgeLadder,
    output_dir: PathBuf,
}

fn record_stage(stage: &'static str, started: Instant) {
    histogram!("etl_stage_duration_seconds", "stage" => stage).record(started.elapsed().as_secs_f64());
}

impl Pipeline {
    pub fn new(results: u32, prefix: impl Into<String>, ladder: AgeLadder, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            results,
            prefix: prefix.into(),
            ladder,
            output_dir: output_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.api.results,
            config.tables.prefix.clone(),
            config.age_ladder()?,
            config.export.output_dir.clone(),
        ))
    }

    /// Runs every stage in order against one store session.
    ///
    /// The first failing stage aborts the run; tables written by earlier stages
    /// are left in place.
    #[instrument(skip_all, fields(source = %source.source_name(), prefix = %self.prefix))]
    pub async fn run(&self, source: &dyn UserSource, store: &mut dyn Store) -> Result<PipelineResult> {
        info!("start - fetch");
        let started = Instant::now();
        let users = source.fetch_users(self.results).await?;
        counter!("etl_rows_fetched_total").increment(users.len() as u64);
        record_stage("fetch", started);
        info!("end - fetch ({} rows)", users.len());

        info!("start - gender tables");
        let started = Instant::now();
        let gender_tables = partition::write_gender_tables(store, &users, &self.prefix).await?;
        record_stage("gender_tables", started);
        info!("end - gender tables");

        info!("start - age tables");
        let started = Instant::now();
        let age_tables = partition::write_age_tables(store, &users, &self.prefix, &self.ladder).await?;
        record_stage("age_tables", started);
        info!("end - age tables");

        info!("start - top 20");
        let started = Instant::now();
        let top = combine::create_top_table(store, &self.prefix).await?;
        record_stage("top_table", started);
        info!("end - top 20");

        info!("start - exports");
        let started = Instant::now();
        let mut exports = Vec::new();
        for (bucket, drop_duplicates, file_name) in [
            (FIRST_EXPORT_BUCKET, true, FIRST_EXPORT_FILE),
            (SECOND_EXPORT_BUCKET, false, SECOND_EXPORT_FILE),
        ] {
            let bucket_table = partition::age_table(&self.prefix, bucket)?;
            exports.push(
                export::export_union(store, &top, &bucket_table, drop_duplicates, &self.output_dir, file_name)
                    .await?,
            );
        }
        record_stage("exports", started);
        info!("end - exports");

        Ok(PipelineResult {
            source: source.source_name().to_string(),
            fetched_rows: users.len(),
            gender_tables: gender_tables.into_iter().map(WrittenTable::from).collect(),
            age_tables: age_tables.into_iter().map(WrittenTable::from).collect(),
            top_table: top.to_string(),
            exports,
        })
    }
}
