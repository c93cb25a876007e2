//! OpenTSDB client facade.
//!
//! Owns one [`HttpTransport`] and exposes the write path (`put`, driven by the
//! batch writer and retry controller) and the read endpoints. The aggregator
//! list is fetched once and cached for the life of the client.

use otsdb_core::config::ClientConfig;
use otsdb_core::error::CoreError;
use otsdb_core::models::batch::SubmissionResult;
use otsdb_core::models::data_point::{PointTimestamp, Tags};
use otsdb_core::models::expression::ExpQuery;
use otsdb_core::models::query::{
    GroupedResult, QueryRequest, QueryResponse, StatEntry, SuggestKind, UnionResult,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, OnceCell};
use tracing::debug;

use crate::batch_writer::BatchWriter;
use crate::http_client::HttpTransport;
use crate::retry_controller::{RetryController, RetryPolicy};

mod endpoint {
    pub const AGGREGATORS: &str = "/api/aggregators";
    pub const FILTERS: &str = "/api/config/filters";
    pub const QUERY: &str = "/api/query";
    pub const QUERY_EXP: &str = "/api/query/exp";
    pub const STATS: &str = "/api/stats";
    pub const SUGGEST: &str = "/api/suggest";
    pub const VERSION: &str = "/api/version";
}

/// HTTP client for one TSD
pub struct OpenTsdbClient {
    transport: Arc<HttpTransport>,
    config: ClientConfig,
    aggregators: OnceCell<Vec<String>>,
}

impl OpenTsdbClient {
    pub fn new(config: ClientConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let transport = HttpTransport::new(&config.server, config.write.details)?;
        Ok(Self::from_parts(Arc::new(transport), config))
    }

    /// Point the client at an explicit base URL (e.g. a proxy path or test server).
    pub fn with_base_url(base_url: &str, config: ClientConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let transport =
            HttpTransport::with_base_url(base_url, &config.server, config.write.details)?;
        Ok(Self::from_parts(Arc::new(transport), config))
    }

    fn from_parts(transport: Arc<HttpTransport>, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            aggregators: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<HttpTransport> {
        &self.transport
    }

    // ============================================================
    // Write
    // ============================================================

    /// Store `values` for `metric`, batched and retried per the write config.
    ///
    /// Validation errors are returned before any request is made. Transport
    /// failures never surface as `Err`; check `failed` on the result.
    pub async fn put(
        &self,
        metric: &str,
        values: &[f64],
        timestamps: Option<&[PointTimestamp]>,
        tags: &Tags,
    ) -> Result<SubmissionResult, CoreError> {
        let controller = self.controller();
        let batches = self.batch_writer()?.batches(metric, values, timestamps, tags)?;
        Ok(controller.run(batches).await)
    }

    /// [`put`](Self::put) that stops between rounds once `cancel` reads `true`.
    pub async fn put_with_cancel(
        &self,
        metric: &str,
        values: &[f64],
        timestamps: Option<&[PointTimestamp]>,
        tags: &Tags,
        cancel: watch::Receiver<bool>,
    ) -> Result<SubmissionResult, CoreError> {
        let controller = self.controller();
        let batches = self.batch_writer()?.batches(metric, values, timestamps, tags)?;
        Ok(controller.run_with_cancel(batches, cancel).await)
    }

    fn batch_writer(&self) -> Result<BatchWriter, CoreError> {
        BatchWriter::new(self.config.write.batch_size)
    }

    fn controller(&self) -> RetryController<HttpTransport> {
        RetryController::new(self.transport.clone(), RetryPolicy::from(&self.config.write))
    }

    // ============================================================
    // Metadata
    // ============================================================

    /// `GET /api/version`
    pub async fn version(&self) -> Result<BTreeMap<String, String>, CoreError> {
        let body = self.transport.get(endpoint::VERSION, &[]).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// `GET /api/aggregators`, cached after the first success
    pub async fn aggregators(&self) -> Result<&[String], CoreError> {
        let list = self
            .aggregators
            .get_or_try_init(|| async {
                let body = self.transport.get(endpoint::AGGREGATORS, &[]).await?;
                let mut list: Vec<String> = serde_json::from_str(&body)?;
                list.sort();
                debug!("{} aggregators available", list.len());
                Ok::<_, CoreError>(list)
            })
            .await?;
        Ok(list.as_slice())
    }

    /// `GET /api/config/filters`
    pub async fn filters(&self) -> Result<serde_json::Value, CoreError> {
        let body = self.transport.get(endpoint::FILTERS, &[]).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// `GET /api/stats`
    pub async fn statistics(&self) -> Result<Vec<StatEntry>, CoreError> {
        let body = self.transport.get(endpoint::STATS, &[]).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// `GET /api/suggest`: up to `max` names of `kind` starting with `prefix`
    pub async fn suggest(
        &self,
        kind: SuggestKind,
        prefix: &str,
        max: usize,
    ) -> Result<Vec<String>, CoreError> {
        if max == 0 {
            return Err(CoreError::validation("max", "must be greater than 0"));
        }
        let query = [
            ("type", kind.as_str().to_string()),
            ("q", prefix.to_string()),
            ("max", max.to_string()),
        ];
        let body = self.transport.get(endpoint::SUGGEST, &query).await?;
        Ok(serde_json::from_str(&body)?)
    }

    // ============================================================
    // Query
    // ============================================================

    /// Raw `/api/query` response text
    pub async fn query_raw(&self, request: &QueryRequest) -> Result<String, CoreError> {
        let query = self.prepare_query(request).await?;
        self.transport.get(endpoint::QUERY, &query).await
    }

    /// One result per returned series
    pub async fn query_grouped(&self, request: &QueryRequest) -> Result<GroupedResult, CoreError> {
        let body = self.query_raw(request).await?;
        Ok(QueryResponse::parse(&body)?.into_grouped())
    }

    /// All returned series merged into one timeline
    pub async fn query_union(&self, request: &QueryRequest) -> Result<UnionResult, CoreError> {
        let body = self.query_raw(request).await?;
        Ok(QueryResponse::parse(&body)?.into_union())
    }

    /// `POST /api/query/exp`
    pub async fn query_exp(&self, query: &ExpQuery) -> Result<serde_json::Value, CoreError> {
        self.check_aggregator(&query.aggregator).await?;
        let body = query.to_body()?;
        let text = self.transport.post_json(endpoint::QUERY_EXP, &body).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn prepare_query(
        &self,
        request: &QueryRequest,
    ) -> Result<Vec<(&'static str, String)>, CoreError> {
        if request.metric.is_empty() {
            return Err(CoreError::validation("metric", "must not be empty"));
        }
        let defaults = &self.config.query;
        let aggregator = request
            .aggregator
            .as_deref()
            .unwrap_or(&defaults.default_aggregator);
        self.check_aggregator(aggregator).await?;
        Ok(request.query_pairs(&defaults.default_aggregator, &defaults.default_start))
    }

    async fn check_aggregator(&self, aggregator: &str) -> Result<(), CoreError> {
        if !self.config.query.validate_aggregators {
            return Ok(());
        }
        let known = self.aggregators().await?;
        if known.iter().any(|a| a == aggregator) {
            Ok(())
        } else {
            Err(CoreError::validation(
                "aggregator",
                format!("'{aggregator}' is not one of {}", known.join(", ")),
            ))
        }
    }
}
