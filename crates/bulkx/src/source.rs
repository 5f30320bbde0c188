//! 📂 Sources — where records come from before anybody weighs them.
//!
//! 🧠 Knowledge graph: a source hands out *pages*. A page is one `String` of raw,
//! newline-separated records, capped by doc count and by bytes, uninterpreted. The sink
//! workers split and encode. Sources don't know what JSON is and don't want to.
//!
//! - trait [`Source`] → [`FileSource`] / [`InMemorySource`] → [`SourceBackend`] enum

use anyhow::Result;
use async_trait::async_trait;

pub mod file_source;
pub mod in_mem_source;

pub use file_source::FileSource;
pub use in_mem_source::InMemorySource;

/// 📄 Vends pages until it runs dry.
#[async_trait]
pub trait Source: std::fmt::Debug + Send {
    /// The next page, or `None` at the end. A returned page is never empty.
    async fn next_page(&mut self) -> Result<Option<String>>;
}

/// 🎭 Every source we can read from.
#[derive(Debug)]
pub enum SourceBackend {
    File(FileSource),
    InMemory(InMemorySource),
}

#[async_trait]
impl Source for SourceBackend {
    async fn next_page(&mut self) -> Result<Option<String>> {
        match self {
            SourceBackend::File(source) => source.next_page().await,
            SourceBackend::InMemory(source) => source.next_page().await,
        }
    }
}
