use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Method, Url};
use tracing::{debug, trace};

use crate::app_config::ConnectionConfig;
use crate::error::BulkError;
use crate::transport::Transport;

/// 📡 reqwest-backed transport. One client, reused for every request, pooled connections.
///
/// Auth: API key beats basic auth. This is not a democracy. This is a cluster and
/// `api_key` is the premium tier.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: ConnectionConfig,
}

impl HttpTransport {
    /// 🚀 Build the client with the configured timeouts. No handshake with the cluster yet;
    /// the first request finds out whether anybody is home.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a TLS setup problem on this machine. Either way: tragic.")?;
        Ok(Self { client, config })
    }

    fn url_for(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        let base = self.config.url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}{path}"))
            .with_context(|| format!("💀 '{base}{path}' is not a URL. Check connection.url."))?;
        // -- an empty query_pairs_mut() would still leave a dangling '?'
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(key, value)| (*key, value.as_str())));
        }
        Ok(url)
    }

    fn gzip(body: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 4), Compression::default());
        encoder.write_all(body).context("💀 gzip choked on the request body")?;
        encoder.finish().context("💀 gzip couldn't finish the request body")
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn perform(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let url = self.url_for(path, params)?;
        debug!("📡 {} {}", method, url);

        // ⚠️ application/x-ndjson, not application/json. The store cares. A lot.
        let mut request = self
            .client
            .request(method, url)
            .header(CONTENT_TYPE, "application/x-ndjson");

        if let Some(ref api_key) = self.config.api_key {
            request = request.header(AUTHORIZATION, format!("ApiKey {api_key}"));
        } else if let Some(ref username) = self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        if let Some(body) = body {
            request = if self.config.enable_request_compression {
                let compressed = Self::gzip(body)?;
                trace!("🫁 gzip: {} → {} bytes", body.len(), compressed.len());
                request.header(CONTENT_ENCODING, "gzip").body(compressed)
            } else {
                request.body(body.to_vec())
            };
        }

        let response = request
            .send()
            .await
            .map_err(|e| BulkError::Transport(e.to_string()))
            .context("💀 The bulk request never made it to the store. We launched the payload and the network responded with what can only be described as 'not vibing with it.' Check connectivity and timeouts.")?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BulkError::Transport(e.to_string()))
            .context("💀 The store started answering and then the connection dropped mid-sentence.")?;

        if !status.is_success() {
            let store_error = BulkError::Store {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            };
            return Err(anyhow::Error::new(store_error).context(
                "💀 The request arrived, and the store looked at it and said no. The whole thing. Every document.",
            ));
        }

        trace!("✅ {} bytes of response came back", bytes.len());
        Ok(bytes.to_vec())
    }
}
