//! Impls - port implementations shipped with the core.
//!
//! - **InMemoryQueueService**: pull queue in process memory (tests, local mode)
//! - **ReqwestTransport**: the production `PushTransport`

pub mod inmem_queue;
pub mod reqwest_transport;

pub use self::inmem_queue::{InMemoryQueueService, QueueCall, QueueOp};
pub use self::reqwest_transport::ReqwestTransport;
