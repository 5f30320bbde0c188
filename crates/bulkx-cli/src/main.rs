//! 🚀 bulkx-cli — the front door, the bouncer, the maitre d' of bulkx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Loads config, sets up logging, runs the pipeline, prints a report card.
//! Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use bulkx::{InMemoryTransport, RunSummary, TransportBackend};
use clap::Parser;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 🎛️ The whole command line. Two knobs, because everything else lives in the TOML.
#[derive(Debug, Parser)]
#[command(name = "bulkx", version, about = "Bulk an NDJSON file into OpenSearch")]
struct Cli {
    /// Config file. If it doesn't exist, `BULKX_*` environment variables carry the whole config.
    #[arg(default_value = "bulkx.toml", env = "BULKX_CONFIG")]
    config: PathBuf,

    /// Do everything but talk to the cluster. An in-memory tape answers "all good".
    #[arg(long)]
    dry_run: bool,
}

/// 🚀 main() — the "I pressed F5 and held my breath" moment.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // 🔒 Validate the config file exists before we get too emotionally attached
    let config_file = cli.config.as_path();
    let config_file = match config_file.try_exists().with_context(|| {
        format!(
            "💀 Couldn't check whether the configuration file exists. Maybe it's a pwd/cwd thing \
             with relative paths; an absolute path removes the guesswork. Was checking here: '{}'",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        false => None,
    };

    let app_config = bulkx::load_config(config_file)
        .context("💀 bulkx-cli couldn't load the config. Check the file for something obvious first.")?;

    let result = if cli.dry_run {
        bulkx::run_with_transport(app_config, TransportBackend::InMemory(InMemoryTransport::new())).await
    } else {
        bulkx::run(app_config).await
    };

    match result {
        Ok(summary) => {
            println!("{}", summary_table(&summary));
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one layer at a time
            let mut looks_like_a_connection_problem = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("error sending request")
                    || cause_str.contains("onnection refused")
                    || cause_str.contains("tcp connect error")
                    || cause_str.contains("dns error")
                    || cause_str.contains("transport failure")
                {
                    looks_like_a_connection_problem = true;
                }
            }

            if looks_like_a_connection_problem {
                error!(
                    "🔧 hint: the cluster doesn't look reachable. Double-check `connection.url` and \
                     that OpenSearch is actually running. If it's in Docker, `docker ps` is your friend. ☕"
                );
            }

            std::process::exit(1);
        }
    }
}

/// 🍽️ The report card. Two columns, numbers on the right, commas where humans expect them.
fn summary_table(summary: &RunSummary) -> Table {
    let metrics = &summary.metrics;
    let dispatch = &summary.dispatch;
    let rows = [
        ("Documents succeeded", format_number(metrics.documents_succeeded)),
        ("Documents duplicated", format_number(metrics.documents_duplicated)),
        ("Documents failed", format_number(metrics.documents_failed)),
        ("Version conflicts", format_number(metrics.version_conflicts)),
        ("Bulk requests sent", format_number(metrics.bulk_requests_sent)),
        ("Bulk requests failed", format_number(metrics.bulk_requests_failed)),
        ("Bytes sent", format_number(metrics.bytes_sent)),
        ("Bytes estimated", format_number(metrics.bytes_estimated)),
        ("Dispatch panics", format_number(dispatch.panicked)),
        ("Dispatch cancellations", format_number(dispatch.cancelled)),
        ("Elapsed", format!("{:.2}s", summary.elapsed.as_secs_f64())),
    ];

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["📊 bulkx run", ""]);
    for (label, value) in rows {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

/// 🔢 1234567 → "1,234,567"
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}
