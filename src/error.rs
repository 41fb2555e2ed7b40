use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lifecycle::OrderState;

/// Everything that can go wrong while processing a month. All of these are
/// caught at the orchestrator boundary and recorded in that month's outcome.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid value for filter '{field}': {value}")]
    InvalidFilterValue { field: &'static str, value: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Search failed: {0:#}")]
    SearchFailed(anyhow::Error),

    #[error("Refusing to build an order without scene ids")]
    NoScenes,

    #[error("Order submission failed: {0:#}")]
    OrderSubmissionFailed(anyhow::Error),

    #[error("Order {order_id} still {last_state} after {attempts} polls")]
    OrderPollTimeout {
        order_id: String,
        attempts: u32,
        last_state: OrderState,
    },

    #[error("Order {order_id} ended in state {state}")]
    OrderFailed { order_id: String, state: OrderState },

    #[error("Download of order {order_id} failed: {cause:#}")]
    DownloadFailed {
        order_id: String,
        cause: anyhow::Error,
    },

    #[error("Cancelled (order: {}, last state: {last_state})", .order_id.as_deref().unwrap_or("none"))]
    Cancelled {
        order_id: Option<String>,
        last_state: OrderState,
    },
}

/// Serializable discriminant of [`Error`], reported in month outcomes.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidFilterValue,
    InvalidConfig,
    SearchFailed,
    NoScenes,
    OrderSubmissionFailed,
    OrderPollTimeout,
    OrderFailed,
    DownloadFailed,
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidFilterValue { .. } => ErrorKind::InvalidFilterValue,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::SearchFailed(_) => ErrorKind::SearchFailed,
            Self::NoScenes => ErrorKind::NoScenes,
            Self::OrderSubmissionFailed(_) => ErrorKind::OrderSubmissionFailed,
            Self::OrderPollTimeout { .. } => ErrorKind::OrderPollTimeout,
            Self::OrderFailed { .. } => ErrorKind::OrderFailed,
            Self::DownloadFailed { .. } => ErrorKind::DownloadFailed,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_kind_matches_variant() {
        let err = Error::OrderSubmissionFailed(anyhow!("400 Bad Request"));
        assert_eq!(err.kind(), ErrorKind::OrderSubmissionFailed);

        let err = Error::OrderFailed {
            order_id: "abc".to_string(),
            state: OrderState::PartialFailure,
        };
        assert_eq!(err.kind(), ErrorKind::OrderFailed);
    }

    #[test]
    fn test_display_includes_context_chain() {
        let err = Error::SearchFailed(anyhow!("connection reset").context("fetching page 2"));
        assert_eq!(
            err.to_string(),
            "Search failed: fetching page 2: connection reset"
        );
    }

    #[test]
    fn test_cancelled_without_order() {
        let err = Error::Cancelled {
            order_id: None,
            last_state: OrderState::Creating,
        };
        assert_eq!(err.to_string(), "Cancelled (order: none, last state: creating)");
    }
}
