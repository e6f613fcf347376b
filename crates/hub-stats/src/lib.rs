//! Per-component daily counters, QPS rollups, and sampling (spec §4.4): the
//! collector tier that periodically drains each running component's
//! [`hub_core::component::Counter`] delta and persists it through
//! [`hub_kv::KvClient`].

pub mod daily;
pub mod qps;
pub mod sample;

pub use daily::{today, ComponentDelta, DailyCollector};
pub use qps::{MinuteAggregator, MinutePoint, QpsPoint, QpsPublisher, QpsRing};
pub use sample::Sampler;
