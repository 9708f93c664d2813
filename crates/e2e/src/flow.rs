//! Payment flow driver
//!
//! Sequences a Bitcoin checkout as a series of wait conditions instead of fixed
//! sleeps, and tracks how far the journey got so scenarios can assert "reached
//! at least X" independently of backend settlement latency.
//!
//! ```text
//! NotStarted ─select_method─▶ MethodSelected ─generate_invoice─▶ InvoiceReady
//!      │                           │                                 │
//!      │                           │                          confirm_pending
//!      │                           │                                 ▼
//!      │                           │                        AwaitingDetection
//!      │                           │                                 │ await_detection
//!      │                           │                                 ▼
//!      │                           │                      AwaitingConfirmations
//!      │                           │                                 │ await_settlement
//!      ▼                           ▼                                 ▼
//!   Errored ◀──────────── any failure ─────────────────────────── Settled
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SuiteConfig;
use crate::error::{E2eError, E2eResult};
use crate::invoice::{Invoice, InvoiceManager};
use crate::observer::StatusObserver;
use crate::page::Page;
use crate::pages::CheckoutPage;
use crate::poll::{poll_until, PollPolicy};
use crate::status::{PaymentStatus, StatusSnapshot};

/// Driver-level progress, distinct from the payment's own status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    NotStarted,
    MethodSelected,
    InvoiceReady,
    AwaitingDetection,
    AwaitingConfirmations,
    Settled,
    Errored,
}

impl DriverState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DriverState::Settled | DriverState::Errored)
    }
}

impl std::fmt::Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverState::NotStarted => write!(f, "not_started"),
            DriverState::MethodSelected => write!(f, "method_selected"),
            DriverState::InvoiceReady => write!(f, "invoice_ready"),
            DriverState::AwaitingDetection => write!(f, "awaiting_detection"),
            DriverState::AwaitingConfirmations => write!(f, "awaiting_confirmations"),
            DriverState::Settled => write!(f, "settled"),
            DriverState::Errored => write!(f, "errored"),
        }
    }
}

/// Everything a scenario (or a failure report) needs to know about a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowReport {
    pub state: DriverState,
    /// Furthest non-error state reached
    pub highest: DriverState,
    pub invoice: Option<Invoice>,
    pub statuses: Vec<PaymentStatus>,
    pub last_snapshot: Option<StatusSnapshot>,
    pub error: Option<String>,
}

impl FlowReport {
    pub fn last_status(&self) -> Option<PaymentStatus> {
        self.statuses.last().copied()
    }
}

pub struct PaymentFlowDriver<'a> {
    config: &'a SuiteConfig,
    checkout: CheckoutPage<'a>,
    invoices: InvoiceManager<'a>,
    observer: StatusObserver<'a>,
    state: DriverState,
    highest: DriverState,
    last_snapshot: Option<StatusSnapshot>,
    error: Option<String>,
}

impl<'a> PaymentFlowDriver<'a> {
    pub fn new(page: &'a dyn Page, config: &'a SuiteConfig) -> Self {
        Self {
            config,
            checkout: CheckoutPage::new(page, config),
            invoices: InvoiceManager::new(page, config),
            observer: StatusObserver::new(page, config),
            state: DriverState::NotStarted,
            highest: DriverState::NotStarted,
            last_snapshot: None,
            error: None,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// True once the run has passed through `state`, even if it errored later
    pub fn reached_at_least(&self, state: DriverState) -> bool {
        if state == DriverState::Errored {
            return self.state == DriverState::Errored;
        }
        self.highest >= state
    }

    pub fn invoices(&mut self) -> &mut InvoiceManager<'a> {
        &mut self.invoices
    }

    pub fn observer(&self) -> &StatusObserver<'a> {
        &self.observer
    }

    pub fn report(&self) -> FlowReport {
        FlowReport {
            state: self.state,
            highest: self.highest,
            invoice: self.invoices.current().cloned(),
            statuses: self.observer.history(),
            last_snapshot: self.last_snapshot.clone(),
            error: self.error.clone(),
        }
    }

    pub async fn select_method(&mut self, method: &str) -> E2eResult<()> {
        self.expect_state(DriverState::NotStarted, "select a payment method")?;
        let result = self.checkout.select_payment_method(method).await;
        self.advance(result, DriverState::MethodSelected)
    }

    pub async fn generate_invoice(&mut self) -> E2eResult<Invoice> {
        self.expect_state(DriverState::MethodSelected, "generate an invoice")?;
        let timeout = self.config.timeouts.invoice_generation();
        let result = self.invoices.generate_invoice(timeout).await;
        self.advance(result, DriverState::InvoiceReady)
    }

    /// The first status read on a fresh invoice must be pending
    pub async fn confirm_pending(&mut self) -> E2eResult<()> {
        self.expect_state(DriverState::InvoiceReady, "confirm the invoice is pending")?;
        let result = match self.observer.observe_status().await {
            Ok(PaymentStatus::Pending) => Ok(()),
            Ok(other) => Err(E2eError::AssertionFailed(format!(
                "fresh invoice announced {} instead of pending",
                other
            ))),
            Err(e) => Err(e),
        };
        self.advance(result, DriverState::AwaitingDetection)
    }

    /// Wait for the wallet's transaction to show up
    pub async fn await_detection(&mut self) -> E2eResult<PaymentStatus> {
        self.expect_state(DriverState::AwaitingDetection, "await detection")?;
        let result = self
            .await_any(
                &[PaymentStatus::Detected, PaymentStatus::Processing, PaymentStatus::Completed],
                self.config.timeouts.detection(),
            )
            .await;
        self.advance(result, DriverState::AwaitingConfirmations)
    }

    /// Wait for the backend to declare settlement
    pub async fn await_settlement(&mut self) -> E2eResult<StatusSnapshot> {
        self.expect_state(DriverState::AwaitingConfirmations, "await settlement")?;
        let result = match self
            .await_any(&[PaymentStatus::Completed], self.config.timeouts.settlement())
            .await
        {
            Ok(_) => self.observer.observe_snapshot().await,
            Err(e) => Err(e),
        };
        if let Ok(snapshot) = &result {
            self.last_snapshot = Some(snapshot.clone());
        }
        self.advance(result, DriverState::Settled)
    }

    /// Drive forward until at least `target` is reached
    pub async fn run_until(&mut self, method: &str, target: DriverState) -> E2eResult<FlowReport> {
        while !self.reached_at_least(target) {
            match self.state {
                DriverState::NotStarted => self.select_method(method).await?,
                DriverState::MethodSelected => {
                    self.generate_invoice().await?;
                }
                DriverState::InvoiceReady => self.confirm_pending().await?,
                DriverState::AwaitingDetection => {
                    self.await_detection().await?;
                }
                DriverState::AwaitingConfirmations => {
                    self.await_settlement().await?;
                }
                DriverState::Settled | DriverState::Errored => {
                    return Err(E2eError::InvalidTransition {
                        from: self.state.to_string(),
                        operation: format!("reach {}", target),
                    });
                }
            }
        }
        Ok(self.report())
    }

    /// Wait for one of `targets`, but stop as soon as the invoice expires.
    ///
    /// Expiry is either the region announcing `Timeout` or the countdown hitting
    /// zero before `Completed`; both are checked on every poll.
    async fn await_any(&self, targets: &[PaymentStatus], timeout: Duration) -> E2eResult<PaymentStatus> {
        let this = self;
        let policy = PollPolicy::new(self.config.timeouts.poll_interval(), timeout);

        info!(targets = ?targets, ?timeout, "Waiting for payment status");
        let reached = poll_until(policy, move || async move {
            let status = this.observer.read_status().await?;
            match status {
                Some(PaymentStatus::Completed) if targets.contains(&PaymentStatus::Completed) => {
                    return Ok(Some(PaymentStatus::Completed));
                }
                Some(PaymentStatus::Timeout) => {
                    return Err(E2eError::PaymentExpired {
                        last_observed: this.last_live_status(),
                    });
                }
                _ => {}
            }

            // a hidden countdown is normal once the payment is detected
            if this.invoices.peek_countdown().await?.is_some_and(|r| r.is_zero()) {
                warn!(status = ?status, "Countdown ran out before settlement");
                return Err(E2eError::PaymentExpired {
                    last_observed: this.last_live_status(),
                });
            }
            Ok(status.filter(|s| targets.contains(s)))
        })
        .await?;

        reached.ok_or_else(|| E2eError::StatusWaitTimeout {
            target: targets
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(" or "),
            last_observed: self.observer.history().last().copied(),
            waited: timeout,
        })
    }

    /// Last status read that was not the expiry announcement
    fn last_live_status(&self) -> Option<PaymentStatus> {
        self.observer
            .history()
            .iter()
            .rev()
            .copied()
            .find(|s| *s != PaymentStatus::Timeout)
    }

    fn expect_state(&self, expected: DriverState, operation: &str) -> E2eResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(E2eError::InvalidTransition {
                from: self.state.to_string(),
                operation: operation.to_string(),
            })
        }
    }

    fn advance<T>(&mut self, result: E2eResult<T>, next: DriverState) -> E2eResult<T> {
        match result {
            Ok(value) => {
                info!(from = %self.state, to = %next, "Payment flow advanced");
                self.state = next;
                self.highest = self.highest.max(next);
                Ok(value)
            }
            Err(e) => {
                warn!(from = %self.state, error = %e, "Payment flow errored");
                self.state = DriverState::Errored;
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }
}
