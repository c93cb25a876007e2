//! # otsdb-network
//!
//! Adapters that talk to an OpenTSDB TSD, plus the write path that drives them.
//!
//! - [`batch_writer`] — turns caller input into fixed-size batches (no I/O)
//! - [`retry_controller`] — submits batches round by round, retrying failed ones
//! - [`http_client`] — `/api/put` transport and raw HTTP helpers (reqwest)
//! - [`telnet_client`] — line-protocol transport over a persistent socket
//! - [`client`] — `OpenTsdbClient`, the write + query facade
//!
//! ## Example
//!
//! ```rust,ignore
//! use otsdb_core::config::ClientConfig;
//! use otsdb_network::client::OpenTsdbClient;
//!
//! let client = OpenTsdbClient::new(ClientConfig::default())?;
//! let result = client.put("test.m", &[1.0, 2.0], None, &tags).await?;
//! assert_eq!(result.success + result.failed, result.points);
//! ```

pub mod batch_writer;
pub mod client;
pub mod http_client;
pub mod retry_controller;
pub mod telnet_client;
