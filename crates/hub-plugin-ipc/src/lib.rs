//! Cross-process plugin execution channel (spec §4.2): a shared-memory ring
//! buffer pair plus event-fd-style notification, used to sandbox
//! user-written evaluators in their own process.

pub mod notifier;
pub mod process;
pub mod ring;
pub mod router;

pub use notifier::Notifier;
pub use process::{PluginHandle, PluginProcessConfig};
pub use ring::{RingBuffer, RingError};
pub use router::{PendingRequests, PluginIpcError};
