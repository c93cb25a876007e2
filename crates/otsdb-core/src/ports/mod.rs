//! Port interfaces (traits).
//!
//! Implemented by the adapters in `otsdb-network` and consumed by the retry
//! controller as `Arc<dyn T>` or generics. Async traits use the `async_trait`
//! macro so they stay object safe.

pub mod transport;
