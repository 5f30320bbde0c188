//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment. Four sections, one struct:
//! - `[connection]` where the cluster lives and how we prove who we are
//! - `[index]` what we write, how big each `_bulk` gets, which API shape to speak
//! - `[runtime]` queues, workers, and how many requests may be in flight at once
//! - `[source]` the NDJSON file we read records from

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::api_wrappers::ApiWrapperKind;
use crate::bulk::{BulkRequestParams, EstimationStrategy, Refresh};
use crate::documents::{BulkAction, EncoderConfig};

const MIB: u64 = 1024 * 1024;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    pub source: SourceConfig,
}

/// 📡 Where the cluster is and how to get past the bouncer.
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 Wins over basic auth when both are set. Not a democracy.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 🫁 gzip request bodies on the way out.
    #[serde(default)]
    pub enable_request_compression: bool,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// 🏛️ Which generation of the `_bulk` API the cluster speaks.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistributionVersion {
    #[default]
    Default,
    /// Elasticsearch 6 era: typed `/{index}/_doc/_bulk` endpoint.
    Es6,
}

/// 🎬 Where the bulk body gets posted.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Bulk,
    /// Security analytics detector run endpoint.
    DetectorRun,
}

/// 📦 What to write and how to pack it.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexConfig {
    /// Default target index. Records can't override it yet, so this is usually set.
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default = "default_bulk_size_mib")]
    pub bulk_size_mib: f64,
    #[serde(default)]
    pub max_operations_per_bulk: Option<usize>,
    #[serde(default)]
    pub estimate_bulk_size_using_compression: bool,
    #[serde(default = "default_max_local_compressions")]
    pub max_local_compressions_for_estimation: u32,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
    #[serde(default)]
    pub distribution_version: DistributionVersion,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub action: BulkAction,
    #[serde(default)]
    pub document_id_field: Option<String>,
    #[serde(default)]
    pub routing_field: Option<String>,
    #[serde(default)]
    pub pipeline: Option<String>,
    #[serde(default)]
    pub require_alias: Option<bool>,
    #[serde(default)]
    pub refresh: Option<Refresh>,
    #[serde(default)]
    pub wait_for_active_shards: Option<String>,
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub source: Option<Vec<String>>,
    #[serde(default)]
    pub source_includes: Option<Vec<String>>,
    #[serde(default)]
    pub source_excludes: Option<Vec<String>>,
}

fn default_bulk_size_mib() -> f64 {
    5.0
}

fn default_max_local_compressions() -> u32 {
    2
}

fn default_flush_timeout_ms() -> u64 {
    60_000
}

impl IndexConfig {
    /// 📏 Bulk size target in bytes. Fractions of a MiB are allowed, negatives are not.
    pub fn bulk_size_bytes(&self) -> u64 {
        (self.bulk_size_mib.max(0.0) * MIB as f64) as u64
    }

    /// 🧾 Request-level params for every request this sink builds.
    ///
    /// The pipeline rides on each operation, not the request, so it isn't repeated here.
    pub fn request_params(&self) -> BulkRequestParams {
        BulkRequestParams {
            index: self.index.clone(),
            pipeline: None,
            routing: None,
            require_alias: self.require_alias,
            refresh: self.refresh,
            wait_for_active_shards: self.wait_for_active_shards.clone(),
            timeout: self.timeout.clone(),
            source: self.source.clone(),
            source_excludes: self.source_excludes.clone(),
            source_includes: self.source_includes.clone(),
        }
    }

    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            action: self.action,
            index: self.index.clone(),
            document_id_field: self.document_id_field.clone(),
            routing_field: self.routing_field.clone(),
            pipeline: self.pipeline.clone(),
        }
    }

    pub fn estimation_strategy(&self, connection: &ConnectionConfig) -> EstimationStrategy {
        EstimationStrategy::select(
            self.estimate_bulk_size_using_compression,
            connection.enable_request_compression,
            self.max_local_compressions_for_estimation,
        )
    }

    pub fn api_wrapper_kind(&self) -> ApiWrapperKind {
        ApiWrapperKind::select(self.distribution_version, self.execution_mode)
    }
}

/// ⚙️ Runtime knobs: channel depth, worker count, in-flight request bound.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_sink_parallelism")]
    pub sink_parallelism: usize,
    /// 🚦 1 means the inline dispatcher: one request at a time, on the worker itself.
    #[serde(default = "default_max_in_flight_requests")]
    pub max_in_flight_requests: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            sink_parallelism: default_sink_parallelism(),
            max_in_flight_requests: default_max_in_flight_requests(),
        }
    }
}

fn default_queue_capacity() -> usize {
    10
}

fn default_sink_parallelism() -> usize {
    1
}

fn default_max_in_flight_requests() -> usize {
    1
}

/// 📂 The NDJSON file to read, and how big each page handed to the sinks may get.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub file_name: String,
    #[serde(default = "default_max_batch_size_docs")]
    pub max_batch_size_docs: usize,
    #[serde(default = "default_max_batch_size_bytes")]
    pub max_batch_size_bytes: usize,
}

fn default_max_batch_size_docs() -> usize {
    1000
}

fn default_max_batch_size_bytes() -> usize {
    MIB as usize
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 `BULKX_*` environment variables form the base layer (`__` separates nesting, so
/// `BULKX_CONNECTION__URL` lands in `connection.url`). An optional TOML file merges on top
/// and wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("BULKX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (BULKX_*). \
             The file exists in our hearts, but apparently not in a shape serde recognizes.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (BULKX_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
