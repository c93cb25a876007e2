//! Telnet-style line protocol transport.
//!
//! Writes `put <metric> <timestamp> <value> <tagk>=<tagv> ...` lines over one
//! persistent TCP connection. The TSD sends nothing back for accepted points,
//! so a batch counts as written unless the socket write fails. After a failed
//! write the connection is dropped and re-established on the next batch.

use async_trait::async_trait;
use otsdb_core::config::{ClientConfig, WriteConfig};
use otsdb_core::error::CoreError;
use otsdb_core::models::batch::{Batch, BatchOutcome, SubmissionResult};
use otsdb_core::models::data_point::{PointTimestamp, Tags};
use otsdb_core::ports::transport::BatchTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::batch_writer::BatchWriter;
use crate::retry_controller::{RetryController, RetryPolicy};

/// `BatchTransport` over the telnet line protocol
pub struct TelnetTransport {
    addr: String,
    connect_timeout: Duration,
    write_timeout: Duration,
    /// Connected lazily; `None` after a failure or `close()`
    stream: Mutex<Option<TcpStream>>,
}

impl TelnetTransport {
    pub fn new(
        addr: impl Into<String>,
        connect_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            write_timeout,
            stream: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.server.socket_addr(),
            config.server.connect_timeout(),
            config.server.request_timeout(),
        )
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    async fn connect(&self) -> Result<TcpStream, CoreError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                CoreError::Network(format!(
                    "connect to {} timed out after {:?}",
                    self.addr, self.connect_timeout
                ))
            })?
            .map_err(|e| CoreError::Network(format!("unable to connect to {}: {e}", self.addr)))?;
        stream.set_nodelay(true)?;
        info!("connected to OpenTSDB at {}", self.addr);
        Ok(stream)
    }

    /// Shut the connection down. A later submit reconnects.
    pub async fn close(&self) -> Result<(), CoreError> {
        if let Some(mut stream) = self.stream.lock().await.take() {
            stream.shutdown().await?;
            debug!("closed connection to {}", self.addr);
        }
        Ok(())
    }
}

#[async_trait]
impl BatchTransport for TelnetTransport {
    async fn submit(&self, batch: &Batch) -> Result<BatchOutcome, CoreError> {
        let payload: String = batch.points.iter().map(|p| p.to_put_line()).collect();

        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(CoreError::Internal("telnet stream missing".to_string()));
        };

        let write = async {
            stream.write_all(payload.as_bytes()).await?;
            stream.flush().await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => {
                debug!("batch {}: {} lines written", batch.index, batch.len());
                Ok(BatchOutcome::accepted(batch.len(), None))
            }
            Ok(Err(e)) => {
                *guard = None;
                warn!("write to {} failed, dropping connection: {e}", self.addr);
                Err(CoreError::Network(format!("write to {} failed: {e}", self.addr)))
            }
            Err(_) => {
                *guard = None;
                Err(CoreError::Network(format!(
                    "write to {} timed out after {:?}",
                    self.addr, self.write_timeout
                )))
            }
        }
    }

    fn name(&self) -> &'static str {
        "telnet"
    }
}

/// Writes series over the line protocol with the same batching and retry as HTTP
pub struct TelnetWriter {
    transport: Arc<TelnetTransport>,
    write: WriteConfig,
}

impl TelnetWriter {
    pub fn new(config: &ClientConfig) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self {
            transport: Arc::new(TelnetTransport::from_config(config)),
            write: config.write.clone(),
        })
    }

    pub fn transport(&self) -> &Arc<TelnetTransport> {
        &self.transport
    }

    /// Build, batch and write the points of one series.
    pub async fn put(
        &self,
        metric: &str,
        values: &[f64],
        timestamps: Option<&[PointTimestamp]>,
        tags: &Tags,
    ) -> Result<SubmissionResult, CoreError> {
        let batches = BatchWriter::new(self.write.batch_size)?
            .batches(metric, values, timestamps, tags)?;
        let controller =
            RetryController::new(self.transport.clone(), RetryPolicy::from(&self.write));
        Ok(controller.run(batches).await)
    }

    /// [`put`](Self::put) with a cancellation signal checked between rounds.
    pub async fn put_with_cancel(
        &self,
        metric: &str,
        values: &[f64],
        timestamps: Option<&[PointTimestamp]>,
        tags: &Tags,
        cancel: watch::Receiver<bool>,
    ) -> Result<SubmissionResult, CoreError> {
        let batches = BatchWriter::new(self.write.batch_size)?
            .batches(metric, values, timestamps, tags)?;
        let controller =
            RetryController::new(self.transport.clone(), RetryPolicy::from(&self.write));
        Ok(controller.run_with_cancel(batches, cancel).await)
    }

    pub async fn close(&self) -> Result<(), CoreError> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otsdb_core::models::data_point::DataPoint;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    fn tags() -> Tags {
        let mut tags = Tags::new();
        tags.insert("host".to_string(), "web01".to_string());
        tags
    }

    /// Accepts one connection and returns the first `n` lines it receives.
    async fn line_server(n: usize) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(socket).lines();
            let mut out = Vec::new();
            while out.len() < n {
                match lines.next_line().await.unwrap() {
                    Some(line) => out.push(line),
                    None => break,
                }
            }
            out
        });
        (addr, handle)
    }

    fn config_for(addr: &str, batch_size: usize) -> ClientConfig {
        let (host, port) = addr.rsplit_once(':').unwrap();
        let mut config = ClientConfig::default();
        config.server.host = host.to_string();
        config.server.port = port.parse().unwrap();
        config.server.connect_timeout_ms = 500;
        config.server.request_timeout_ms = 1_000;
        config.write.batch_size = batch_size;
        config.write.max_attempts = 2;
        config
    }

    #[tokio::test]
    async fn writes_put_lines() {
        let (addr, server) = line_server(2).await;
        let transport =
            TelnetTransport::new(&addr, Duration::from_millis(500), Duration::from_secs(1));

        let batch = Batch {
            index: 0,
            points: vec![
                DataPoint {
                    metric: "sys.cpu".to_string(),
                    timestamp: 1_356_998_400,
                    value: 42.5,
                    tags: tags(),
                },
                DataPoint {
                    metric: "sys.cpu".to_string(),
                    timestamp: 1_356_998_401,
                    value: 7.0,
                    tags: tags(),
                },
            ],
        };
        let outcome = transport.submit(&batch).await.unwrap();
        assert_eq!(outcome.success, 2);
        assert_eq!(outcome.status, None);
        assert!(transport.is_connected().await);

        let lines = server.await.unwrap();
        assert_eq!(
            lines,
            vec![
                "put sys.cpu 1356998400 42.5 host=web01".to_string(),
                "put sys.cpu 1356998401 7 host=web01".to_string(),
            ]
        );
        transport.close().await.unwrap();
        assert!(!transport.is_connected().await);
    }

    #[tokio::test]
    async fn writer_sends_every_point_over_one_connection() {
        let (addr, server) = line_server(25).await;
        let writer = TelnetWriter::new(&config_for(&addr, 10)).unwrap();

        let values: Vec<f64> = (0..25).map(|v| v as f64).collect();
        let ts: Vec<PointTimestamp> = (0..25)
            .map(|t| PointTimestamp::Epoch(10_000 + t))
            .collect();
        let result = writer
            .put("test.m", &values, Some(&ts), &tags())
            .await
            .unwrap();
        assert_eq!(result.points, 25);
        assert_eq!(result.success, 25);

        let lines = server.await.unwrap();
        assert_eq!(lines.len(), 25);
        assert!(lines.iter().all(|l| l.starts_with("put test.m 100")));
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn refused_connection_fails_every_point() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let writer = TelnetWriter::new(&config_for(&addr, 3)).unwrap();
        let result = writer
            .put("test.m", &[1.0, 2.0, 3.0, 4.0], None, &tags())
            .await
            .unwrap();
        assert_eq!(result.points, 4);
        assert_eq!(result.failed, 4);
        assert_eq!(result.attempts, 2);
        assert!(!writer.transport().is_connected().await);
    }

    #[tokio::test]
    async fn invalid_input_rejected_before_io() {
        let writer = TelnetWriter::new(&config_for("127.0.0.1:1", 3)).unwrap();
        let ts = vec![PointTimestamp::Epoch(1)];
        let err = writer
            .put("test.m", &[1.0, 2.0], Some(&ts), &tags())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert!(!writer.transport().is_connected().await);
    }
}
