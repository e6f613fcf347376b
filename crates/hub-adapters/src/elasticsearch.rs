//! Thin Elasticsearch input/output lifecycle shell, mirroring
//! [`crate::kafka`]'s seam — a real bulk-index/scroll client is an external
//! collaborator; this module only owns the adapter lifecycle.

use async_trait::async_trait;
use hub_core::component::{InputComponent, OutputComponent};
use hub_core::envelope::Envelope;
use hub_core::error::{HubError, Result};

#[async_trait]
pub trait EsScrollClient: Send + Sync {
    async fn open_scroll(&mut self) -> Result<()>;
    async fn close_scroll(&mut self) -> Result<()>;
    async fn next_hit(&mut self) -> Result<Option<serde_json::Value>>;
}

#[async_trait]
pub trait EsBulkClient: Send + Sync {
    async fn open_index(&mut self) -> Result<()>;
    async fn close_index(&mut self) -> Result<()>;
    async fn index_document(&mut self, document: serde_json::Value) -> Result<()>;
}

pub struct ElasticsearchInput<C: EsScrollClient> {
    client: C,
}

impl<C: EsScrollClient> ElasticsearchInput<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: EsScrollClient> InputComponent for ElasticsearchInput<C> {
    async fn open(&mut self) -> Result<()> {
        self.client.open_scroll().await
    }

    async fn close(&mut self) -> Result<()> {
        self.client.close_scroll().await
    }

    async fn poll(&mut self) -> Result<Option<Envelope>> {
        let Some(hit) = self.client.next_hit().await? else {
            return Ok(None);
        };
        match hub_core::envelope::Value::from(hit) {
            hub_core::envelope::Value::Map(map) => Ok(Some(map.into_iter().collect())),
            _ => Err(HubError::component_failure("elasticsearch hit is not a JSON object")),
        }
    }
}

pub struct ElasticsearchOutput<C: EsBulkClient> {
    client: C,
}

impl<C: EsBulkClient> ElasticsearchOutput<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: EsBulkClient> OutputComponent for ElasticsearchOutput<C> {
    async fn open(&mut self) -> Result<()> {
        self.client.open_index().await
    }

    async fn close(&mut self) -> Result<()> {
        self.client.close_index().await
    }

    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        let map: std::collections::BTreeMap<_, _> = envelope.iter().collect();
        let document = serde_json::to_value(&map)
            .map_err(|e| HubError::component_failure(format!("envelope encode failed: {e}")))?;
        self.client.index_document(document).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::envelope::Value;

    struct MockBulk {
        indexed: Vec<serde_json::Value>,
    }

    #[async_trait]
    impl EsBulkClient for MockBulk {
        async fn open_index(&mut self) -> Result<()> {
            Ok(())
        }
        async fn close_index(&mut self) -> Result<()> {
            Ok(())
        }
        async fn index_document(&mut self, document: serde_json::Value) -> Result<()> {
            self.indexed.push(document);
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_indexes_the_envelope_as_a_document() {
        let mut output = ElasticsearchOutput::new(MockBulk { indexed: Vec::new() });
        let mut envelope = Envelope::new();
        envelope.insert("msg", Value::string("hello"));
        output.send(envelope).await.unwrap();
        assert_eq!(output.client.indexed[0]["msg"], "hello");
    }
}
