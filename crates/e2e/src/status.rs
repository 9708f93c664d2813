//! Logical payment states and the text that announces them

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};

/// Payment state as announced by the status region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Detected,
    Processing,
    Completed,
    Timeout,
    Underpaid,
    Overpaid,
}

impl PaymentStatus {
    /// Position on the happy path, `None` for timeout and the side annotations
    pub fn happy_path_rank(&self) -> Option<u8> {
        match self {
            PaymentStatus::Pending => Some(0),
            PaymentStatus::Detected => Some(1),
            PaymentStatus::Processing => Some(2),
            PaymentStatus::Completed => Some(3),
            PaymentStatus::Timeout | PaymentStatus::Underpaid | PaymentStatus::Overpaid => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Timeout)
    }

    /// Underpaid and overpaid annotate a processing or completed payment
    pub fn is_annotation(&self) -> bool {
        matches!(self, PaymentStatus::Underpaid | PaymentStatus::Overpaid)
    }

    /// Whether progress counts are expected on the surface in this state
    pub fn expects_progress(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Processing | PaymentStatus::Underpaid | PaymentStatus::Overpaid
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Detected => write!(f, "detected"),
            PaymentStatus::Processing => write!(f, "processing"),
            PaymentStatus::Completed => write!(f, "completed"),
            PaymentStatus::Timeout => write!(f, "timeout"),
            PaymentStatus::Underpaid => write!(f, "underpaid"),
            PaymentStatus::Overpaid => write!(f, "overpaid"),
        }
    }
}

/// One row of the phrase table: a case-insensitive substring and the status it announces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPhrase {
    pub pattern: String,
    pub status: PaymentStatus,
}

impl StatusPhrase {
    pub fn new(pattern: impl Into<String>, status: PaymentStatus) -> Self {
        Self {
            pattern: pattern.into(),
            status,
        }
    }
}

/// The only place rendered status wording is mapped to [`PaymentStatus`].
///
/// Rows are tried in order and the first match wins, so more specific phrases
/// ("payment underpaid") must precede generic ones ("payment").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<StatusPhrase>", into = "Vec<StatusPhrase>")]
pub struct StatusTable {
    phrases: Vec<StatusPhrase>,
}

impl StatusTable {
    pub fn new(phrases: Vec<StatusPhrase>) -> Self {
        let phrases = phrases
            .into_iter()
            .map(|p| StatusPhrase::new(p.pattern.to_lowercase(), p.status))
            .collect();
        Self { phrases }
    }

    /// Map rendered text to a status, `None` for wording the table does not know
    pub fn classify(&self, text: &str) -> Option<PaymentStatus> {
        let normalized = text.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }
        self.phrases
            .iter()
            .find(|p| normalized.contains(&p.pattern))
            .map(|p| p.status)
    }

    pub fn phrases(&self) -> &[StatusPhrase] {
        &self.phrases
    }
}

impl From<Vec<StatusPhrase>> for StatusTable {
    fn from(phrases: Vec<StatusPhrase>) -> Self {
        Self::new(phrases)
    }
}

impl From<StatusTable> for Vec<StatusPhrase> {
    fn from(table: StatusTable) -> Self {
        table.phrases
    }
}

impl Default for StatusTable {
    fn default() -> Self {
        use PaymentStatus::*;
        Self::new(vec![
            StatusPhrase::new("underpaid", Underpaid),
            StatusPhrase::new("insufficient payment", Underpaid),
            StatusPhrase::new("overpaid", Overpaid),
            StatusPhrase::new("expired", Timeout),
            StatusPhrase::new("timed out", Timeout),
            StatusPhrase::new("payment complete", Completed),
            StatusPhrase::new("payment confirmed", Completed),
            StatusPhrase::new("processing", Processing),
            StatusPhrase::new("confirming", Processing),
            StatusPhrase::new("payment detected", Detected),
            StatusPhrase::new("transaction detected", Detected),
            StatusPhrase::new("waiting for payment", Pending),
            StatusPhrase::new("awaiting payment", Pending),
        ])
    }
}

/// Confirmations seen versus confirmations needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationProgress {
    pub current: u32,
    pub required: u32,
}

impl ConfirmationProgress {
    /// Parse the first `current/required` pair in the text.
    ///
    /// Returns `Ok(None)` when no pair is present and `MalformedProgress` when a
    /// pair is present but violates `current <= required` or has `required == 0`.
    pub fn parse(text: &str) -> E2eResult<Option<Self>> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| {
            Regex::new(r"(\d+)\s*/\s*(\d+)").expect("progress pattern is valid")
        });

        let Some(caps) = re.captures(text) else {
            return Ok(None);
        };
        let malformed = || E2eError::MalformedProgress {
            text: text.to_string(),
        };
        let current: u32 = caps[1].parse().map_err(|_| malformed())?;
        let required: u32 = caps[2].parse().map_err(|_| malformed())?;
        if required == 0 || current > required {
            return Err(malformed());
        }
        Ok(Some(Self { current, required }))
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.required
    }
}

/// Side annotations rendered next to the status region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAnnotations {
    pub underpaid: bool,
    pub overpaid: bool,
}

/// Everything the observer can read about a payment in one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: PaymentStatus,
    pub annotations: PaymentAnnotations,
    pub progress: Option<ConfirmationProgress>,
    pub transaction_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Waiting for payment..." => Some(PaymentStatus::Pending))]
    #[test_case("Payment detected in mempool" => Some(PaymentStatus::Detected))]
    #[test_case("Processing (2/3 confirmations)" => Some(PaymentStatus::Processing))]
    #[test_case("PAYMENT COMPLETE" => Some(PaymentStatus::Completed))]
    #[test_case("Invoice expired" => Some(PaymentStatus::Timeout))]
    #[test_case("Payment underpaid, send the remainder" => Some(PaymentStatus::Underpaid))]
    #[test_case("Overpaid by 0.0001 BTC" => Some(PaymentStatus::Overpaid))]
    #[test_case("   " => None)]
    #[test_case("Loading…" => None)]
    fn default_table_classifies(text: &str) -> Option<PaymentStatus> {
        StatusTable::default().classify(text)
    }

    #[test]
    fn first_matching_row_wins() {
        let table = StatusTable::new(vec![
            StatusPhrase::new("Paid in full", PaymentStatus::Completed),
            StatusPhrase::new("paid", PaymentStatus::Detected),
        ]);
        assert_eq!(table.classify("paid in full"), Some(PaymentStatus::Completed));
        assert_eq!(table.classify("partially paid"), Some(PaymentStatus::Detected));
    }

    #[test]
    fn table_loads_from_yaml() {
        let yaml = "- pattern: Settled\n  status: completed\n";
        let table: StatusTable = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(table.phrases().len(), 1);
        assert_eq!(table.classify("Payment SETTLED"), Some(PaymentStatus::Completed));
    }

    #[test]
    fn progress_parses_pair() {
        let progress = ConfirmationProgress::parse("Confirmations: 2 / 6").unwrap();
        assert_eq!(progress, Some(ConfirmationProgress { current: 2, required: 6 }));
        assert!(!progress.unwrap().is_complete());
    }

    #[test]
    fn progress_absent_is_none() {
        assert_eq!(ConfirmationProgress::parse("No confirmations yet").unwrap(), None);
    }

    #[test_case("7/6")]
    #[test_case("0/0")]
    fn progress_out_of_bounds_is_malformed(text: &str) {
        assert!(matches!(
            ConfirmationProgress::parse(text),
            Err(E2eError::MalformedProgress { .. })
        ));
    }

    #[test]
    fn happy_path_ranks_exclude_annotations() {
        assert_eq!(PaymentStatus::Pending.happy_path_rank(), Some(0));
        assert_eq!(PaymentStatus::Completed.happy_path_rank(), Some(3));
        assert_eq!(PaymentStatus::Overpaid.happy_path_rank(), None);
        assert!(PaymentStatus::Timeout.is_terminal());
        assert!(PaymentStatus::Underpaid.is_annotation());
    }
}
