pub mod exact;
pub mod ranker;
pub mod semantic;

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const MAX_TOP_K: i64 = 100;
pub const SNIPPET_MAX_CHARS: usize = 500;

/// Retries for idempotent collaborator reads. Redemption paths never use
/// this.
const MATCHER_RETRIES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Exact,
    Semantic,
    Hybrid,
}

impl MatchMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "exact" => Some(Self::Exact),
            "semantic" => Some(Self::Semantic),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOrigin {
    Exact,
    Semantic,
}

/// Where a match sits inside its document. Paginated documents use character
/// spans, spreadsheet-like documents use sheet/cell coordinates; the preview
/// renderer understands both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchLocation {
    Text {
        start: u32,
        end: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        page: Option<u32>,
    },
    Cell {
        sheet: String,
        row: u32,
        column: u32,
    },
}

impl MatchLocation {
    pub fn overlaps(&self, other: &MatchLocation) -> bool {
        match (self, other) {
            (
                MatchLocation::Text { start, end, page },
                MatchLocation::Text {
                    start: other_start,
                    end: other_end,
                    page: other_page,
                },
            ) => page == other_page && start < other_end && other_start < end,
            (MatchLocation::Cell { .. }, MatchLocation::Cell { .. }) => self == other,
            _ => false,
        }
    }

    /// Deterministic tie-break ordering within one document.
    pub fn order_key(&self) -> (u8, u32, u32, u32) {
        match self {
            MatchLocation::Text { start, end, page } => (0, page.unwrap_or(0), *start, *end),
            MatchLocation::Cell { row, column, .. } => (1, *row, *column, 0),
        }
    }
}

/// Transient result unit flowing from the matchers into the ranker. Never
/// persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub document_id: Uuid,
    pub document_name: String,
    pub knowledge_base_id: Uuid,
    pub score: f32,
    pub origin: MatchOrigin,
    pub location: MatchLocation,
    pub snippet: String,
}

/// Validated trace parameters. Construction is the only place request
/// parameters are checked, and it runs before any storage or matcher work.
#[derive(Debug, Clone, Copy)]
pub struct TraceQuery {
    pub mode: MatchMode,
    pub top_k: u32,
    pub threshold: f32,
}

impl TraceQuery {
    pub fn from_request(
        text: &str,
        mode: Option<&str>,
        top_k: Option<i64>,
        threshold: Option<f64>,
    ) -> AppResult<Self> {
        if text.trim().is_empty() {
            return Err(AppError::invalid_request("text must not be empty"));
        }

        let mode = match mode {
            None => MatchMode::Hybrid,
            Some(raw) => MatchMode::parse(raw).ok_or_else(|| {
                AppError::invalid_request("match_mode must be exact, semantic, or hybrid")
            })?,
        };

        let top_k = top_k.unwrap_or(10);
        if top_k <= 0 || top_k > MAX_TOP_K {
            return Err(AppError::invalid_request(format!(
                "top_k must be between 1 and {MAX_TOP_K}"
            )));
        }

        let threshold = threshold.unwrap_or(0.7);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AppError::invalid_request(
                "threshold must be within [0, 1]",
            ));
        }

        Ok(Self {
            mode,
            top_k: top_k as u32,
            threshold: threshold as f32,
        })
    }
}

pub fn truncate_snippet(snippet: &str) -> String {
    if snippet.chars().count() <= SNIPPET_MAX_CHARS {
        snippet.to_string()
    } else {
        snippet.chars().take(SNIPPET_MAX_CHARS).collect()
    }
}

/// Bounded-timeout call with a small number of retries, for idempotent
/// collaborator reads only. Failures surface as `internal_error` so index or
/// vector-store outages never hang the caller.
pub(crate) async fn call_with_retry<T, F, Fut>(
    what: &str,
    timeout: Duration,
    operation: F,
) -> AppResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut last_error = String::new();
    for attempt in 0..=MATCHER_RETRIES {
        match tokio::time::timeout(timeout, operation()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                last_error = err.to_string();
                tracing::warn!(collaborator = what, attempt, error = %last_error, "collaborator call failed");
            }
            Err(_) => {
                last_error = format!("timed out after {timeout:?}");
                tracing::warn!(collaborator = what, attempt, "collaborator call timed out");
            }
        }
    }
    Err(AppError::internal(format!("{what} unavailable: {last_error}")))
}
