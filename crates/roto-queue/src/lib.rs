//! Redis Streams job queue.
//!
//! At-least-once delivery through a consumer group. A message is only
//! removed after explicit acknowledgement; workers renew their claim
//! on a message while processing, and a reaper reclaims messages whose
//! worker went silent. Payloads that cannot be parsed go straight to a
//! dead-letter stream for operator inspection.

pub mod error;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use queue::{DeliveredJob, JobQueue, QueueClient, QueueConfig};
