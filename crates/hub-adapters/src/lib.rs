//! Thin sink/source adapter shells (spec §2, §4.1): producer/consumer
//! lifecycle only, no broker protocol logic. Concrete Kafka/Elasticsearch/
//! SLS client libraries are external collaborators this crate depends on
//! through a narrow per-adapter trait rather than a concrete SDK, plus a
//! plugin-process-backed ruleset and an in-memory loopback pair for local
//! testing.

pub mod elasticsearch;
pub mod kafka;
pub mod loopback;
pub mod plugin_ruleset;
pub mod sls;

pub use elasticsearch::{ElasticsearchInput, ElasticsearchOutput, EsBulkClient, EsScrollClient};
pub use kafka::{KafkaConsumer, KafkaInput, KafkaOutput, KafkaProducer};
pub use loopback::{LoopbackInput, LoopbackOutput, LoopbackQueue, LoopbackSink};
pub use plugin_ruleset::PluginRuleset;
pub use sls::{SlsConsumer, SlsInput, SlsOutput, SlsProducer};
