//! Line-delimited JSON framing for the stdio front door.
//!
//! Each input line is one [`GuardRequest`]; each output line is the JSON
//! response for it. Stdout carries nothing else, so logs go to stderr.

use crate::coordinator::QueryCoordinator;
use crate::database::QueryDriver;
use crate::UserId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// One request read from stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GuardRequest {
    /// Run one query through the full pipeline.
    Execute { query: String, user_id: UserId },

    /// Run queries in order, stopping at the first failure.
    ExecuteMany { queries: Vec<String>, user_id: UserId },

    /// Lexical diagnostics only.
    Check { query: String },

    /// Row count and size class only.
    Estimate { query: String, user_id: UserId },
}

impl GuardRequest {
    /// Operation name, used for logging.
    pub fn op(&self) -> &'static str {
        match self {
            GuardRequest::Execute { .. } => "execute",
            GuardRequest::ExecuteMany { .. } => "execute_many",
            GuardRequest::Check { .. } => "check",
            GuardRequest::Estimate { .. } => "estimate",
        }
    }
}

/// Response for a line that could not be parsed as a request.
#[derive(Debug, Clone, Serialize)]
struct InvalidRequest {
    success: bool,
    error: String,
}

/// Handle a single request and produce its JSON response.
pub async fn handle_request<D: QueryDriver>(
    coordinator: &QueryCoordinator<D>,
    request: GuardRequest,
) -> Result<Value, serde_json::Error> {
    debug!("Handling {} request", request.op());
    match request {
        GuardRequest::Execute { query, user_id } => {
            let outcome = coordinator.execute_one(&query, user_id).await;
            serde_json::to_value(outcome.to_response(None))
        }
        GuardRequest::ExecuteMany { queries, user_id } => {
            let batch = coordinator.execute_many(&queries, user_id).await;
            serde_json::to_value(batch.responses())
        }
        GuardRequest::Check { query } => serde_json::to_value(coordinator.check_syntax(&query)),
        GuardRequest::Estimate { query, user_id } => {
            let estimate = coordinator.estimate(&query, user_id).await;
            serde_json::to_value(estimate.to_response())
        }
    }
}

/// Handle one raw input line. Blank lines produce no response.
pub async fn handle_line<D: QueryDriver>(
    coordinator: &QueryCoordinator<D>,
    line: &str,
) -> Result<Option<Value>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    match serde_json::from_str::<GuardRequest>(line) {
        Ok(request) => handle_request(coordinator, request).await.map(Some),
        Err(e) => {
            warn!("Invalid request line: {}", e);
            serde_json::to_value(InvalidRequest {
                success: false,
                error: format!("Invalid request: {}", e),
            })
            .map(Some)
        }
    }
}

/// Serve requests from `reader` until EOF, writing one response per line.
pub async fn serve<D, R, W>(
    coordinator: &QueryCoordinator<D>,
    reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    D: QueryDriver,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let response = handle_line(coordinator, &line)
            .await
            .map_err(std::io::Error::other)?;
        if let Some(response) = response {
            let mut encoded = serde_json::to_vec(&response).map_err(std::io::Error::other)?;
            encoded.push(b'\n');
            writer.write_all(&encoded).await?;
            writer.flush().await?;
        }
    }
    Ok(())
}
