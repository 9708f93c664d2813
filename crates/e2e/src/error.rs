//! Error types for E2E testing

use std::time::Duration;

use thiserror::Error;

use crate::status::PaymentStatus;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Storefront failed to start: {0}")]
    ServerStartup(String),

    #[error("Storefront health check failed after {0} attempts")]
    ServerHealthCheck(usize),

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Surface '{surface}' never rendered a readable state within {waited:?}")]
    ObservationTimeout { surface: String, waited: Duration },

    #[error("Timed out after {waited:?} waiting for status {target} (last observed: {})", display_last(.last_observed))]
    StatusWaitTimeout {
        target: String,
        last_observed: Option<PaymentStatus>,
        waited: Duration,
    },

    #[error("Confirmation progress is malformed: {text:?}")]
    MalformedProgress { text: String },

    #[error("Invoice generation failed: {message}")]
    InvoiceGeneration { message: String },

    #[error("Invoice generation timed out after {waited:?}")]
    InvoiceGenerationTimeout { waited: Duration },

    #[error("Retry is only available after an invoice generation error")]
    RetryUnavailable,

    #[error("Regeneration did not reset the countdown: before {before:?}, after {after:?}")]
    CountdownNotReset { before: Duration, after: Duration },

    #[error("Copy action for {target} was never acknowledged")]
    CopyNotAcknowledged { target: String },

    #[error("Copy label for {target} never left its acknowledgement")]
    CopyStuck { target: String },

    #[error("Cannot {operation} from driver state {from}")]
    InvalidTransition { from: String, operation: String },

    #[error("Payment expired before settlement (last observed: {})", display_last(.last_observed))]
    PaymentExpired { last_observed: Option<PaymentStatus> },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

fn display_last(last: &Option<PaymentStatus>) -> String {
    match last {
        Some(status) => status.to_string(),
        None => "nothing".to_string(),
    }
}

impl E2eError {
    /// Last payment status carried by the error, if it has one
    pub fn last_observed(&self) -> Option<PaymentStatus> {
        match self {
            E2eError::StatusWaitTimeout { last_observed, .. }
            | E2eError::PaymentExpired { last_observed } => *last_observed,
            _ => None,
        }
    }

    /// Whether the caller may retry the operation that produced this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            E2eError::ObservationTimeout { .. }
                | E2eError::StatusWaitTimeout { .. }
                | E2eError::InvoiceGeneration { .. }
                | E2eError::InvoiceGenerationTimeout { .. }
                | E2eError::CopyNotAcknowledged { .. }
        )
    }
}

pub type E2eResult<T> = Result<T, E2eError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wait_timeout_names_last_status() {
        let err = E2eError::StatusWaitTimeout {
            target: "completed".to_string(),
            last_observed: Some(PaymentStatus::Processing),
            waited: Duration::from_secs(2),
        };
        let msg = err.to_string();
        assert!(msg.contains("completed"));
        assert!(msg.contains("processing"));
        assert_eq!(err.last_observed(), Some(PaymentStatus::Processing));
        assert!(err.is_recoverable());
    }

    #[test]
    fn malformed_progress_is_not_recoverable() {
        let err = E2eError::MalformedProgress { text: "3 of ?".to_string() };
        assert!(!err.is_recoverable());
        assert_eq!(err.last_observed(), None);
    }
}
