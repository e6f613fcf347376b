//! An in-memory input/output pair with no external dependency, used for
//! local smoke-testing a project declaration before wiring it to a real
//! broker, and by `hub-cli`'s `show-status`/demo paths.

use async_trait::async_trait;
use hub_core::component::{InputComponent, OutputComponent};
use hub_core::envelope::Envelope;
use hub_core::error::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Shared queue backing a [`LoopbackInput`]; a caller pushes test envelopes
/// onto it directly rather than through a network client.
#[derive(Default)]
pub struct LoopbackQueue {
    queue: Mutex<VecDeque<Envelope>>,
}

impl LoopbackQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, envelope: Envelope) {
        self.queue.lock().push_back(envelope);
    }
}

pub struct LoopbackInput {
    queue: Arc<LoopbackQueue>,
}

impl LoopbackInput {
    pub fn new(queue: Arc<LoopbackQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl InputComponent for LoopbackInput {
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<Envelope>> {
        Ok(self.queue.queue.lock().pop_front())
    }
}

/// Collects every delivered envelope so a caller can inspect what a
/// project actually produced.
#[derive(Default)]
pub struct LoopbackSink {
    delivered: Mutex<Vec<Envelope>>,
}

impl LoopbackSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delivered(&self) -> Vec<Envelope> {
        self.delivered.lock().clone()
    }
}

pub struct LoopbackOutput {
    sink: Arc<LoopbackSink>,
}

impl LoopbackOutput {
    pub fn new(sink: Arc<LoopbackSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl OutputComponent for LoopbackOutput {
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        self.sink.delivered.lock().push(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::envelope::Value;

    #[tokio::test]
    async fn pushed_envelopes_are_polled_in_fifo_order() {
        let queue = LoopbackQueue::new();
        let mut one = Envelope::new();
        one.insert("seq", Value::Number(1.0));
        let mut two = Envelope::new();
        two.insert("seq", Value::Number(2.0));
        queue.push(one.clone());
        queue.push(two.clone());

        let mut input = LoopbackInput::new(queue);
        assert_eq!(input.poll().await.unwrap(), Some(one));
        assert_eq!(input.poll().await.unwrap(), Some(two));
        assert_eq!(input.poll().await.unwrap(), None);
    }

    #[tokio::test]
    async fn sent_envelopes_are_collected_in_order() {
        let sink = LoopbackSink::new();
        let mut output = LoopbackOutput::new(sink.clone());
        let mut env = Envelope::new();
        env.insert("seq", Value::Number(1.0));
        output.send(env.clone()).await.unwrap();
        assert_eq!(sink.delivered(), vec![env]);
    }
}
