use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::{
    fs::File,
    io::{self, AsyncBufReadExt},
};
use tracing::trace;

use crate::app_config::SourceConfig;
use crate::source::Source;

/// 📂 Reads an NDJSON file line by line and hands it out a page at a time.
///
/// A page closes at end of file, at `max_batch_size_docs` lines, or once it has read more
/// than `max_batch_size_bytes`, whichever comes first. Blank lines are skipped and `\r\n`
/// endings lose their `\r`, so every page is clean `\n`-separated records with no trailing
/// newline.
pub struct FileSource {
    buf_reader: io::BufReader<File>,
    config: SourceConfig,
    lines_read: u64,
    bytes_read: u64,
}

// -- the BufReader has nothing to say for itself
impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("config", &self.config)
            .field("lines_read", &self.lines_read)
            .field("bytes_read", &self.bytes_read)
            .finish()
    }
}

impl FileSource {
    /// 🚀 Open the file. If it isn't there, anyhow tells you where we looked.
    pub async fn new(config: SourceConfig) -> Result<Self> {
        let file_handle = File::open(&config.file_name).await.with_context(|| {
            format!(
                "💀 The door to '{}' would not budge. It might not exist, or the permissions \
                 might be wrong. Either way the records stay on the other side.",
                config.file_name
            )
        })?;

        Ok(Self {
            buf_reader: io::BufReader::new(file_handle),
            config,
            lines_read: 0,
            bytes_read: 0,
        })
    }
}

#[async_trait]
impl Source for FileSource {
    async fn next_page(&mut self) -> Result<Option<String>> {
        let max_docs = self.config.max_batch_size_docs.max(1);
        let max_bytes = self.config.max_batch_size_bytes;
        let mut page = String::new();
        let mut page_bytes = 0usize;
        let mut page_lines = 0usize;
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = self
                .buf_reader
                .read_line(&mut line)
                .await
                .with_context(|| format!("💀 Failed reading a line from '{}'", self.config.file_name))?;
            if bytes_read == 0 {
                break;
            }
            page_bytes += bytes_read;

            let trimmed = line.trim_end_matches('\n').trim_end_matches('\r');
            if !trimmed.trim().is_empty() {
                if !page.is_empty() {
                    page.push('\n');
                }
                page.push_str(trimmed);
                page_lines += 1;
            }

            if page_lines >= max_docs || page_bytes > max_bytes {
                break;
            }
        }

        self.lines_read += page_lines as u64;
        self.bytes_read += page_bytes as u64;
        trace!(
            "📖 Paged {} lines ({} bytes) out of '{}', {} lines so far",
            page_lines, page_bytes, self.config.file_name, self.lines_read
        );

        // -- empty page = EOF. a file of nothing but blank lines ends up here too.
        if page.is_empty() { Ok(None) } else { Ok(Some(page)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ndjson_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .prefix("bulkx_file_source_")
            .suffix(".ndjson")
            .tempfile()
            .expect("💀 Failed to create a temp file");
        file.write_all(contents.as_bytes()).expect("💀 Failed to write the temp file");
        file
    }

    fn config_for(file: &tempfile::NamedTempFile, max_docs: usize, max_bytes: usize) -> SourceConfig {
        SourceConfig {
            file_name: file.path().display().to_string(),
            max_batch_size_docs: max_docs,
            max_batch_size_bytes: max_bytes,
        }
    }

    async fn all_pages(source: &mut FileSource) -> Result<Vec<String>> {
        let mut pages = Vec::new();
        while let Some(page) = source.next_page().await? {
            pages.push(page);
        }
        Ok(pages)
    }

    #[tokio::test]
    async fn the_one_where_the_doc_cap_cuts_the_pages() -> Result<()> {
        let file = ndjson_file("{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n{\"a\":4}\n{\"a\":5}\n");
        let mut source = FileSource::new(config_for(&file, 2, 1 << 20)).await?;
        let pages = all_pages(&mut source).await?;
        assert_eq!(
            pages,
            vec![
                "{\"a\":1}\n{\"a\":2}".to_string(),
                "{\"a\":3}\n{\"a\":4}".to_string(),
                "{\"a\":5}".to_string(),
            ]
        );
        // 🧪 EOF stays EOF
        assert_eq!(source.next_page().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_byte_cap_fires_first() -> Result<()> {
        let file = ndjson_file("{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n");
        // -- each line is 8 bytes with its newline, so the cap trips after the second
        let mut source = FileSource::new(config_for(&file, 100, 10)).await?;
        let pages = all_pages(&mut source).await?;
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0], "{\"a\":1}\n{\"a\":2}");
        assert_eq!(pages[1], "{\"a\":3}");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_windows_line_endings_and_blank_lines_vanish() -> Result<()> {
        let file = ndjson_file("{\"a\":1}\r\n\r\n   \n{\"a\":2}");
        let mut source = FileSource::new(config_for(&file, 10, 1 << 20)).await?;
        assert_eq!(all_pages(&mut source).await?, vec!["{\"a\":1}\n{\"a\":2}".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_file_is_not_there() {
        let config = SourceConfig {
            file_name: "/definitely/not/here.ndjson".into(),
            max_batch_size_docs: 10,
            max_batch_size_bytes: 10,
        };
        let err = FileSource::new(config).await.expect_err("missing file must fail");
        assert!(format!("{err:#}").contains("/definitely/not/here.ndjson"));
    }
}
