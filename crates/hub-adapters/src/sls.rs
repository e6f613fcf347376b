//! Thin Aliyun SLS (Simple Log Service) input/output lifecycle shell,
//! mirroring [`crate::kafka`]'s seam.

use async_trait::async_trait;
use hub_core::component::{InputComponent, OutputComponent};
use hub_core::envelope::Envelope;
use hub_core::error::Result;

#[async_trait]
pub trait SlsConsumer: Send + Sync {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    async fn pull_log(&mut self) -> Result<Option<Vec<(String, String)>>>;
}

#[async_trait]
pub trait SlsProducer: Send + Sync {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    async fn put_log(&mut self, fields: Vec<(String, String)>) -> Result<()>;
}

pub struct SlsInput<C: SlsConsumer> {
    consumer: C,
}

impl<C: SlsConsumer> SlsInput<C> {
    pub fn new(consumer: C) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl<C: SlsConsumer> InputComponent for SlsInput<C> {
    async fn open(&mut self) -> Result<()> {
        self.consumer.connect().await
    }

    async fn close(&mut self) -> Result<()> {
        self.consumer.disconnect().await
    }

    async fn poll(&mut self) -> Result<Option<Envelope>> {
        let Some(fields) = self.consumer.pull_log().await? else {
            return Ok(None);
        };
        Ok(Some(
            fields.into_iter().map(|(k, v)| (k, hub_core::envelope::Value::string(v))).collect(),
        ))
    }
}

pub struct SlsOutput<P: SlsProducer> {
    producer: P,
}

impl<P: SlsProducer> SlsOutput<P> {
    pub fn new(producer: P) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl<P: SlsProducer> OutputComponent for SlsOutput<P> {
    async fn open(&mut self) -> Result<()> {
        self.producer.connect().await
    }

    async fn close(&mut self) -> Result<()> {
        self.producer.disconnect().await
    }

    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        let fields = envelope
            .iter()
            .map(|(k, v)| {
                let rendered = v
                    .as_str()
                    .map(|s| s.to_string())
                    .or_else(|| v.as_f64().map(|n| n.to_string()))
                    .unwrap_or_else(|| serde_json::to_string(&scalar_or_debug(v)).unwrap_or_default());
                (k.clone(), rendered)
            })
            .collect();
        self.producer.put_log(fields).await
    }
}

fn scalar_or_debug(value: &hub_core::envelope::Value) -> serde_json::Value {
    serde_json::to_value(ValueRef(value)).unwrap_or(serde_json::Value::Null)
}

struct ValueRef<'a>(&'a hub_core::envelope::Value);

impl<'a> serde::Serialize for ValueRef<'a> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use hub_core::envelope::Value;
        match self.0 {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(_) | Value::Map(_) => serializer.serialize_str(&format!("{:?}", self.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::envelope::Value;

    struct MockProducer {
        sent: Vec<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SlsProducer for MockProducer {
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }
        async fn put_log(&mut self, fields: Vec<(String, String)>) -> Result<()> {
            self.sent.push(fields);
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_flattens_the_envelope_into_string_fields() {
        let mut output = SlsOutput::new(MockProducer { sent: Vec::new() });
        let mut envelope = Envelope::new();
        envelope.insert("level", Value::string("warn"));
        envelope.insert("code", Value::Number(500.0));
        output.send(envelope).await.unwrap();
        let fields = &output.producer.sent[0];
        assert!(fields.contains(&("level".to_string(), "warn".to_string())));
        assert!(fields.contains(&("code".to_string(), "500".to_string())));
    }
}
