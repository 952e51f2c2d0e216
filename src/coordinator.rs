//! Execution coordinator.
//!
//! Sequences validation, escaping, binding and driver dispatch for each
//! request, and exposes the batch, syntax-only and row-count estimate modes.
//!
//! Every request moves through
//! `Received -> Validated -> Parameterized -> Dispatched -> Completed | Failed`.
//! A rejection stops the request before the driver is contacted.

use crate::config::Config;
use crate::constants::{
    ESTIMATE_COUNT_COLUMN, LARGE_DATASET_ROWS, LOG_QUERY_TRUNCATE_LENGTH, MEDIUM_DATASET_ROWS,
    SMALL_DATASET_ROWS,
};
use crate::database::{truncate_for_log, QueryDriver, QueryResult, ResultRow};
use crate::error::{FailureKind, PipelineError, ServerError};
use crate::security::{
    escape, ParameterBinder, ParameterizedQuery, QueryValidator, SyntaxReport,
};
use crate::telemetry::{new_shared_metrics, RequestContext, SharedMetrics};
use crate::UserId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Raw model-generated SQL plus the user it is issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateQuery {
    pub text: String,
    pub user_id: UserId,
}

impl CandidateQuery {
    pub fn new(text: impl Into<String>, user_id: UserId) -> Self {
        Self {
            text: text.into(),
            user_id,
        }
    }
}

/// Lifecycle stage of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStage {
    Received,
    Validated,
    Parameterized,
    Dispatched,
    Completed,
    Failed,
}

/// Normalized rows returned for a successful query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRows {
    pub rows: Vec<ResultRow>,
    pub row_count: usize,
    pub columns: Vec<String>,
    /// More rows matched than the driver's row limit.
    pub truncated: bool,
    pub execution_time_ms: u64,
}

impl From<QueryResult> for QueryRows {
    fn from(result: QueryResult) -> Self {
        let result = result.normalized();
        Self {
            row_count: result.row_count(),
            columns: result.column_names(),
            truncated: result.truncated,
            execution_time_ms: result.execution_time_ms,
            rows: result.rows,
        }
    }
}

/// Terminal value of one request.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub query: CandidateQuery,
    pub timestamp: DateTime<Utc>,
    /// Last stage the request reached before it stopped.
    pub stage: RequestStage,
    pub result: Result<QueryRows, PipelineError>,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Final state: `Completed` or `Failed`.
    pub fn terminal_stage(&self) -> RequestStage {
        if self.is_success() {
            RequestStage::Completed
        } else {
            RequestStage::Failed
        }
    }

    /// Caller-facing JSON shape. `query_index` is set for batch members.
    pub fn to_response(&self, query_index: Option<usize>) -> QueryResponse {
        let base = QueryResponse {
            success: self.is_success(),
            results: None,
            row_count: 0,
            columns: Vec::new(),
            truncated: false,
            error: None,
            error_kind: None,
            suggestion: None,
            query: self.query.text.clone(),
            user_id: self.query.user_id,
            timestamp: self.timestamp,
            query_index,
        };

        match &self.result {
            Ok(rows) => QueryResponse {
                results: Some(rows.rows.clone()),
                row_count: rows.row_count,
                columns: rows.columns.clone(),
                truncated: rows.truncated,
                ..base
            },
            Err(e) => QueryResponse {
                error: Some(e.to_string()),
                error_kind: Some(e.kind()),
                suggestion: e.suggestion(),
                ..base
            },
        }
    }
}

/// JSON response for `execute` and batch members.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<ResultRow>>,
    pub row_count: usize,
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<&'static str>,
    pub query: String,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_index: Option<usize>,
}

/// Outcomes of a fail-fast batch, in submission order.
#[derive(Debug)]
pub struct BatchOutcome {
    pub outcomes: Vec<ExecutionOutcome>,
    /// Index of the failing query when the batch stopped early.
    pub aborted_at: Option<usize>,
}

impl BatchOutcome {
    pub fn is_complete_success(&self) -> bool {
        self.aborted_at.is_none()
    }

    pub fn responses(&self) -> Vec<QueryResponse> {
        self.outcomes
            .iter()
            .enumerate()
            .map(|(idx, outcome)| outcome.to_response(Some(idx)))
            .collect()
    }
}

/// Result of a syntax-only check.
#[derive(Debug, Clone, Serialize)]
pub struct SyntaxCheck {
    #[serde(flatten)]
    pub report: SyntaxReport,
    pub query: String,
    pub timestamp: DateTime<Utc>,
}

/// Coarse size class for a row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SizeBucket {
    #[serde(rename = "No data")]
    NoData,
    #[serde(rename = "Small dataset")]
    Small,
    #[serde(rename = "Medium dataset")]
    Medium,
    #[serde(rename = "Large dataset")]
    Large,
    #[serde(rename = "Very large dataset")]
    VeryLarge,
}

impl SizeBucket {
    pub fn from_row_count(rows: u64) -> Self {
        match rows {
            0 => Self::NoData,
            n if n < SMALL_DATASET_ROWS => Self::Small,
            n if n < MEDIUM_DATASET_ROWS => Self::Medium,
            n if n < LARGE_DATASET_ROWS => Self::Large,
            _ => Self::VeryLarge,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NoData => "No data",
            Self::Small => "Small dataset",
            Self::Medium => "Medium dataset",
            Self::Large => "Large dataset",
            Self::VeryLarge => "Very large dataset",
        }
    }
}

impl fmt::Display for SizeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Row count and size class; never the rows themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryStatistics {
    pub total_rows: u64,
    pub estimated_size: SizeBucket,
    pub columns: Vec<String>,
}

/// Outcome of an `estimate` request.
#[derive(Debug)]
pub struct RowEstimate {
    pub query: CandidateQuery,
    pub timestamp: DateTime<Utc>,
    pub result: Result<QueryStatistics, PipelineError>,
}

impl RowEstimate {
    pub fn to_response(&self) -> EstimateResponse {
        let (stats, error) = match &self.result {
            Ok(stats) => (Some(stats), None),
            Err(e) => (None, Some(e)),
        };
        EstimateResponse {
            success: stats.is_some(),
            total_rows: stats.map(|s| s.total_rows),
            estimated_size: stats.map(|s| s.estimated_size),
            columns: stats.map(|s| s.columns.clone()).unwrap_or_default(),
            error: error.map(|e| e.to_string()),
            error_kind: error.map(|e| e.kind()),
            suggestion: error.and_then(|e| e.suggestion()),
            query: self.query.text.clone(),
            user_id: self.query.user_id,
            timestamp: self.timestamp,
        }
    }
}

/// JSON response for `estimate`.
#[derive(Debug, Clone, Serialize)]
pub struct EstimateResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_size: Option<SizeBucket>,
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<&'static str>,
    pub query: String,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

/// Wrap a query in the row-count subquery used by `estimate`.
pub fn count_wrapper(query: &str) -> String {
    let inner = query.trim().trim_end_matches(';').trim_end();
    format!(
        "SELECT COUNT(*) AS {} FROM ({}) AS subquery",
        ESTIMATE_COUNT_COLUMN, inner
    )
}

/// Runs candidate queries through the guard pipeline and a driver.
pub struct QueryCoordinator<D> {
    validator: QueryValidator,
    binder: ParameterBinder,
    driver: D,
    metrics: SharedMetrics,
}

impl<D: QueryDriver> QueryCoordinator<D> {
    /// Create a coordinator from explicit collaborators.
    pub fn new(validator: QueryValidator, binder: ParameterBinder, driver: D) -> Self {
        Self {
            validator,
            binder,
            driver,
            metrics: new_shared_metrics(),
        }
    }

    /// Create a coordinator using the validation settings from `config`.
    pub fn from_config(config: &Config, driver: D) -> Self {
        let validator = QueryValidator::new(
            config.security.validation_mode,
            config.security.max_query_length,
        );
        Self::new(validator, ParameterBinder::default(), driver)
    }

    /// Record into an existing metrics collector.
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn validator(&self) -> &QueryValidator {
        &self.validator
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Validate, escape and bind a query without dispatching it.
    pub fn prepare(&self, query: &str, user_id: UserId) -> Result<ParameterizedQuery, PipelineError> {
        self.validator.validate(query, user_id).into_result()?;
        let escaped = escape(query.trim())?;
        Ok(self.binder.bind(&escaped, user_id)?)
    }

    /// Run one query through the full pipeline.
    pub async fn execute_one(&self, query: &str, user_id: UserId) -> ExecutionOutcome {
        let ctx = RequestContext::new().with_operation("execute");
        let candidate = CandidateQuery::new(query, user_id);
        let (stage, result) = self.run(&candidate, &ctx).await;

        ExecutionOutcome {
            query: candidate,
            timestamp: Utc::now(),
            stage,
            result: result.map(QueryRows::from),
        }
    }

    /// Run queries in order, stopping at the first failure.
    ///
    /// The returned outcomes include the failing one; later queries are never
    /// dispatched.
    pub async fn execute_many<S>(&self, queries: &[S], user_id: UserId) -> BatchOutcome
    where
        S: AsRef<str> + Sync,
    {
        let total = queries.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut aborted_at = None;

        for (idx, query) in queries.iter().enumerate() {
            debug!("Executing query {}/{} for user {}", idx + 1, total, user_id);
            let outcome = self.execute_one(query.as_ref(), user_id).await;
            let failed = !outcome.is_success();
            outcomes.push(outcome);

            if failed {
                warn!("Stopping batch after query {}/{} failed", idx + 1, total);
                aborted_at = Some(idx);
                break;
            }
        }

        BatchOutcome {
            outcomes,
            aborted_at,
        }
    }

    /// Lexical diagnostics only; never contacts the driver.
    pub fn check_syntax(&self, query: &str) -> SyntaxCheck {
        SyntaxCheck {
            report: self.validator.inspect(query),
            query: query.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Count the rows a query would return and classify the count.
    ///
    /// The caller's query is validated on its own before being wrapped, and
    /// the wrapper then goes through the normal pipeline.
    pub async fn estimate(&self, query: &str, user_id: UserId) -> RowEstimate {
        let ctx = RequestContext::new().with_operation("estimate");
        let candidate = CandidateQuery::new(query, user_id);

        let result = match self.validator.validate(query, user_id).into_result() {
            Err(reason) => {
                warn!("{} Query blocked for security: {}", ctx.log_prefix(), reason);
                let err = PipelineError::from(reason);
                self.metrics.record_failure(err.kind());
                Err(err)
            }
            Ok(()) => {
                let wrapped = CandidateQuery::new(count_wrapper(query), user_id);
                let (_, result) = self.run(&wrapped, &ctx).await;
                result.and_then(statistics_from)
            }
        };

        RowEstimate {
            query: candidate,
            timestamp: Utc::now(),
            result,
        }
    }

    async fn run(
        &self,
        candidate: &CandidateQuery,
        ctx: &RequestContext,
    ) -> (RequestStage, Result<QueryResult, PipelineError>) {
        let prefix = ctx.log_prefix();
        debug!(
            "{} Received query for user {}: {}",
            prefix,
            candidate.user_id,
            truncate_for_log(&candidate.text, LOG_QUERY_TRUNCATE_LENGTH)
        );

        let (stage, result) = self.dispatch(candidate).await;

        match &result {
            Ok(rows) => {
                self.metrics.record_success(ctx.elapsed());
                info!(
                    "{} Query completed: {} rows in {} ms",
                    prefix,
                    rows.row_count(),
                    ctx.elapsed().as_millis()
                );
            }
            Err(e) => {
                self.metrics.record_failure(e.kind());
                match e.kind() {
                    FailureKind::Security => warn!("{} {}", prefix, e),
                    FailureKind::Execution => warn!("{} Query execution failed: {}", prefix, e),
                    FailureKind::Internal => {}
                }
            }
        }

        (stage, result)
    }

    async fn dispatch(
        &self,
        candidate: &CandidateQuery,
    ) -> (RequestStage, Result<QueryResult, PipelineError>) {
        let verdict = self.validator.validate(&candidate.text, candidate.user_id);
        if let Err(reason) = verdict.into_result() {
            return (RequestStage::Received, Err(reason.into()));
        }

        let escaped = match escape(candidate.text.trim()) {
            Ok(escaped) => escaped,
            Err(e) => return (RequestStage::Validated, Err(e.into())),
        };
        let bound = match self.binder.bind(&escaped, candidate.user_id) {
            Ok(bound) => bound,
            Err(e) => return (RequestStage::Validated, Err(e.into())),
        };

        debug!(
            parameters = bound.parameters().len(),
            "Dispatching parameterized query"
        );
        match self.driver.dispatch(&bound).await {
            Ok(result) => (RequestStage::Completed, Ok(result)),
            Err(e) => (RequestStage::Dispatched, Err(e.into())),
        }
    }
}

fn statistics_from(result: QueryResult) -> Result<QueryStatistics, PipelineError> {
    let total_rows = match result.rows.first() {
        None => 0,
        Some(row) => row
            .get(ESTIMATE_COUNT_COLUMN)
            .and_then(|value| value.as_count())
            .ok_or_else(|| {
                ServerError::query_error(format!(
                    "Row count query did not return a numeric {} column",
                    ESTIMATE_COUNT_COLUMN
                ))
            })?,
    };

    Ok(QueryStatistics {
        total_rows,
        estimated_size: SizeBucket::from_row_count(total_rows),
        columns: result.column_names(),
    })
}
