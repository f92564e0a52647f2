//! The reporting agent
//!
//! ```text
//! samplers ──▶ MemoryBackend ──▶ Dispatcher ──▶ Transport ──▶ collector
//!    (N extraction workers)        (M dispatch workers)
//! ```

pub mod alloc;
pub mod collector;
pub mod dispatcher;
pub mod transport;
pub mod worker;

pub use collector::{HostSampler, RuntimeSampler, Sampler};
pub use dispatcher::{DeliveryOutcome, Dispatcher, RetryPolicy, send_with_retry};
pub use transport::{HttpTransport, Transport, TransportError};
pub use worker::{Coordinator, PoolConfig};
