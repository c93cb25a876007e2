//! # otsdb-core
//!
//! Domain models, port (trait) definitions and the error type shared by every
//! crate of the OpenTSDB client.
//!
//! ## Layout
//!
//! - [`models`] — data points, batches, submission results, queries, expressions
//! - [`ports`] — transport interfaces implemented by `otsdb-network` (async_trait)
//! - [`error`] — core error type (thiserror)
//! - [`config`] — client configuration
//! - [`config_file`] — reading and writing `config.json`

pub mod config;
pub mod config_file;
pub mod error;
pub mod models;
pub mod ports;
