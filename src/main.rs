//! Chart Agency host
//!
//! Serves chart rendering and artifact resolution over HTTP.
//!
//! Usage: `chart-agency [--config <file.json|yaml>] [--data <records.json>]`
//!
//! `--data` serves a fixed set of JSON records for every query, which is
//! enough to exercise snippets without a database behind the host.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use chart_agency::config::ChartConfig;
use chart_agency::data::{DataFetcher, InMemoryFetcher, ResultSet};
use chart_agency::embed::ArtifactStore;
use chart_agency::renderer::ChartRenderer;
use chart_agency::server::{run_server, AppState};
use chart_agency::utils::telemetry::init_logging;

#[derive(Parser, Debug)]
#[command(name = "chart-agency", version, about = "Chart rendering and artifact host")]
struct Args {
    /// Config file (JSON or YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON array of records served for every chart query
    #[arg(long)]
    data: Option<PathBuf>,
}

async fn load_records(path: &PathBuf) -> Result<ResultSet> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read data file {:?}", path))?;
    let records: Vec<serde_json::Value> = serde_json::from_str(&content)
        .with_context(|| format!("Data file {:?} must hold a JSON array of objects", path))?;
    ResultSet::from_json_records(&records).map_err(|e| anyhow::anyhow!(e))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let args = Args::parse();
    let config = ChartConfig::load(args.config.as_deref())?;

    let fetcher: Option<Arc<dyn DataFetcher>> = match &args.data {
        Some(path) => {
            let rows = load_records(path).await?;
            info!(rows = rows.len(), path = ?path, "Serving fixed chart data");
            Some(Arc::new(InMemoryFetcher::new(rows)))
        }
        None => None,
    };

    let store = Arc::new(ArtifactStore::new());
    let renderer = Arc::new(ChartRenderer::new(config, fetcher, store));
    run_server(AppState { renderer }).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_are_optional_paths() {
        let args = Args::try_parse_from(["chart-agency"]).unwrap();
        assert!(args.config.is_none() && args.data.is_none());

        let args =
            Args::try_parse_from(["chart-agency", "--config", "host.yaml", "--data", "rows.json"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("host.yaml")));
        assert_eq!(args.data, Some(PathBuf::from("rows.json")));

        assert!(Args::try_parse_from(["chart-agency", "--verbose"]).is_err());
        assert!(Args::try_parse_from(["chart-agency", "--config"]).is_err());
    }
}
