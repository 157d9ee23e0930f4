//! Remote tier: the S3-compatible object store and the resilience
//! primitives callers wrap around it.
//!
//! Stores never retry on their own. Retry policy ([`with_retries`]) and the
//! [`CircuitBreaker`] belong to the caller.

mod circuit_breaker;
mod memory;
mod retry;
mod s3;
mod signing;
mod store;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use memory::InMemoryObjectStore;
pub use retry::{with_retries, Retried, RetryConfig};
pub use s3::S3ObjectStore;
pub use signing::{encode_key_path, payload_sha256, SigV4Signer, SignedHeaders};
pub use store::{DynObjectStore, ObjectData, ObjectStore, ObjectSummary, RemoteHealth};
