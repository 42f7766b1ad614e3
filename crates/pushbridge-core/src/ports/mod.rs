//! Ports - interfaces to systems outside the worker.
//!
//! - **QueueService**: the pull queue (lease / acknowledge / renew / delete)
//! - **PushTransport**: the HTTP side of a push attempt

pub mod push_transport;
pub mod queue_service;

pub use self::push_transport::{PushRequest, PushTransport, TransportError};
pub use self::queue_service::{
    AcknowledgeRequest, LeaseRequest, QueueError, QueueService, RenewLeaseRequest, ResponseView,
};
