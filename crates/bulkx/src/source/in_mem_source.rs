use std::collections::VecDeque;

use anyhow::Result;
use async_trait::async_trait;

use crate::source::Source;

/// 🧪 Records already sitting in memory, paged out `page_size` at a time.
///
/// Handy for dry runs and for driving the pipeline in tests without touching disk.
#[derive(Debug)]
pub struct InMemorySource {
    records: VecDeque<String>,
    page_size: usize,
}

impl InMemorySource {
    pub fn new(records: impl IntoIterator<Item = String>, page_size: usize) -> Self {
        Self {
            records: records.into_iter().collect(),
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl Source for InMemorySource {
    async fn next_page(&mut self) -> Result<Option<String>> {
        let take = self.page_size.min(self.records.len());
        if take == 0 {
            return Ok(None);
        }
        let page: Vec<String> = self.records.drain(..take).collect();
        Ok(Some(page.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_three_records_make_two_pages() -> Result<()> {
        let mut source = InMemorySource::new(["a", "b", "c"].map(String::from), 2);
        assert_eq!(source.next_page().await?.as_deref(), Some("a\nb"));
        assert_eq!(source.next_page().await?.as_deref(), Some("c"));
        assert_eq!(source.next_page().await?, None);
        Ok(())
    }
}
