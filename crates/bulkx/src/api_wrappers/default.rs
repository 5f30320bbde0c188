use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::api_wrappers::ApiWrapper;
use crate::bulk::BulkRequest;
use crate::response::BulkResponse;
use crate::transport::{Transport, TransportBackend};

/// 🚀 Straight through to the transport's native bulk call. Nothing to see here.
#[derive(Debug)]
pub struct DefaultApiWrapper {
    transport: Arc<TransportBackend>,
}

impl DefaultApiWrapper {
    pub fn new(transport: Arc<TransportBackend>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ApiWrapper for DefaultApiWrapper {
    async fn execute(&self, request: &BulkRequest) -> Result<BulkResponse> {
        self.transport.bulk(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_wrappers::test_support::{in_mem, sealed};
    use crate::bulk::BulkRequestParams;
    use crate::documents::BulkOperation;

    #[tokio::test]
    async fn the_one_where_the_default_wrapper_just_calls_bulk() -> Result<()> {
        let (tape, transport) = in_mem();
        let wrapper = DefaultApiWrapper::new(transport);
        let sealed = sealed(
            BulkRequestParams::default(),
            vec![BulkOperation::delete().with_index("orders").with_id("1")],
        )?;

        let response = wrapper.execute(sealed.request()?).await?;
        assert_eq!(response.items.len(), 1);

        let calls = tape.calls().await;
        assert_eq!(calls[0].path, "/_bulk");
        assert_eq!(calls[0].body, sealed.request()?.body());
        Ok(())
    }
}
