//! Prometheus recorder for the run's row counters and stage timings.
//!
//! A batch run has nothing to scrape it, so the recorder is installed without
//! an HTTP listener and its rendered text is written to a file once the
//! pipeline finishes.

use crate::error::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Installs the global Prometheus recorder.
///
/// Returns `None` when a recorder is already installed; metrics calls then go
/// to that recorder instead.
pub fn init_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus recorder installed");
            Some(handle)
        }
        Err(e) => {
            warn!("Failed to install Prometheus recorder: {}", e);
            None
        }
    }
}

/// Writes the current Prometheus exposition text to `path`.
pub fn write_snapshot(handle: &PrometheusHandle, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, handle.render())?;
    info!("Wrote metrics snapshot to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn snapshot_contains_recorded_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        ::metrics::with_local_recorder(&recorder, || {
            ::metrics::counter!("etl_rows_fetched_total").increment(7);
        });

        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("metrics.prom");
        write_snapshot(&handle, &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("etl_rows_fetched_total 7"), "{text}");
    }
}
