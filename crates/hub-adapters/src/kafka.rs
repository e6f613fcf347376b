//! Thin Kafka input/output lifecycle shell (spec §4.1, §2 "sink/source
//! adapters (thin)"). The concrete `rdkafka`-style producer/consumer is an
//! external collaborator out of this workspace's scope; [`KafkaConsumer`]
//! and [`KafkaProducer`] are the narrow seam a real client plugs into, and
//! [`KafkaInput`]/[`KafkaOutput`] only own the open/close/poll/send
//! lifecycle and the envelope encode/decode boundary.

use async_trait::async_trait;
use hub_core::component::{InputComponent, OutputComponent};
use hub_core::envelope::Envelope;
use hub_core::error::{HubError, Result};

/// The minimal surface a real Kafka consumer client must expose for this
/// adapter to drive it. `poll_record` returning `Ok(None)` means "no
/// message currently available", matching [`InputComponent::poll`]'s idle
/// contract rather than blocking the worker task.
#[async_trait]
pub trait KafkaConsumer: Send + Sync {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    async fn poll_record(&mut self) -> Result<Option<Vec<u8>>>;
}

/// The minimal surface a real Kafka producer client must expose.
#[async_trait]
pub trait KafkaProducer: Send + Sync {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    async fn send_record(&mut self, payload: Vec<u8>) -> Result<()>;
}

pub struct KafkaInput<C: KafkaConsumer> {
    consumer: C,
}

impl<C: KafkaConsumer> KafkaInput<C> {
    pub fn new(consumer: C) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl<C: KafkaConsumer> InputComponent for KafkaInput<C> {
    async fn open(&mut self) -> Result<()> {
        self.consumer.connect().await
    }

    async fn close(&mut self) -> Result<()> {
        self.consumer.disconnect().await
    }

    async fn poll(&mut self) -> Result<Option<Envelope>> {
        let Some(bytes) = self.consumer.poll_record().await? else {
            return Ok(None);
        };
        decode_envelope(&bytes).map(Some)
    }
}

pub struct KafkaOutput<P: KafkaProducer> {
    producer: P,
}

impl<P: KafkaProducer> KafkaOutput<P> {
    pub fn new(producer: P) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl<P: KafkaProducer> OutputComponent for KafkaOutput<P> {
    async fn open(&mut self) -> Result<()> {
        self.producer.connect().await
    }

    async fn close(&mut self) -> Result<()> {
        self.producer.disconnect().await
    }

    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        self.producer.send_record(encode_envelope(&envelope)?).await
    }
}

fn decode_envelope(bytes: &[u8]) -> Result<Envelope> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| HubError::component_failure(format!("malformed kafka record: {e}")))?;
    match hub_core::envelope::Value::from(value) {
        hub_core::envelope::Value::Map(map) => Ok(map.into_iter().collect()),
        _ => Err(HubError::component_failure("kafka record is not a JSON object")),
    }
}

fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>> {
    let map: std::collections::BTreeMap<_, _> = envelope.iter().collect();
    serde_json::to_vec(&map).map_err(|e| HubError::component_failure(format!("envelope encode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::envelope::Value;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct MockConsumer {
        records: Mutex<VecDeque<Vec<u8>>>,
        connected: bool,
    }

    #[async_trait]
    impl KafkaConsumer for MockConsumer {
        async fn connect(&mut self) -> Result<()> {
            self.connected = true;
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<()> {
            self.connected = false;
            Ok(())
        }
        async fn poll_record(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(self.records.lock().unwrap().pop_front())
        }
    }

    #[tokio::test]
    async fn poll_decodes_json_object_records_into_envelopes() {
        let mut input = KafkaInput::new(MockConsumer {
            records: Mutex::new(VecDeque::from([br#"{"seq":1}"#.to_vec()])),
            connected: false,
        });
        input.open().await.unwrap();
        let envelope = input.poll().await.unwrap().unwrap();
        assert_eq!(envelope.get("seq"), Some(&Value::Number(1.0)));
        assert!(input.poll().await.unwrap().is_none());
    }

    struct MockProducer {
        sent: Vec<Vec<u8>>,
    }

    #[async_trait]
    impl KafkaProducer for MockProducer {
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }
        async fn send_record(&mut self, payload: Vec<u8>) -> Result<()> {
            self.sent.push(payload);
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_encodes_envelope_as_json() {
        let mut output = KafkaOutput::new(MockProducer { sent: Vec::new() });
        let mut envelope = Envelope::new();
        envelope.insert("seq", Value::Number(2.0));
        output.send(envelope).await.unwrap();
        assert_eq!(output.producer.sent.len(), 1);
        let decoded: serde_json::Value = serde_json::from_slice(&output.producer.sent[0]).unwrap();
        assert_eq!(decoded["seq"], 2.0);
    }
}
