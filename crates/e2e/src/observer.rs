//! Reads payment state off the status-announcement region
//!
//! Every read retries: the region may not be rendered yet, or may be showing
//! stale wording mid-transition, so a single query is never trusted to be the
//! final answer.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::{Selectors, SuiteConfig};
use crate::error::{E2eError, E2eResult};
use crate::page::{visible_text, Page};
use crate::poll::{poll_until, PollPolicy};
use crate::status::{
    ConfirmationProgress, PaymentAnnotations, PaymentStatus, StatusSnapshot, StatusTable,
};

/// Derives read-only payment snapshots from the rendered page
pub struct StatusObserver<'a> {
    page: &'a dyn Page,
    selectors: &'a Selectors,
    table: &'a StatusTable,
    interval: Duration,
    observation: Duration,
    history: Mutex<Vec<PaymentStatus>>,
}

impl<'a> StatusObserver<'a> {
    pub fn new(page: &'a dyn Page, config: &'a SuiteConfig) -> Self {
        Self {
            page,
            selectors: &config.selectors,
            table: &config.status_phrases,
            interval: config.timeouts.poll_interval(),
            observation: config.timeouts.observation(),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Every distinct status read so far, consecutive repeats collapsed
    pub fn history(&self) -> Vec<PaymentStatus> {
        self.history.lock().clone()
    }

    /// One query of the region, `None` if absent or unrecognised
    pub async fn read_status(&self) -> E2eResult<Option<PaymentStatus>> {
        let text = visible_text(self.page, &self.selectors.status_region).await?;
        let status = text.as_deref().and_then(|t| self.table.classify(t));
        match status {
            Some(status) => {
                let mut history = self.history.lock();
                if history.last() != Some(&status) {
                    debug!(%status, "Payment status changed");
                    history.push(status);
                }
            }
            None => debug!(text = ?text, "Status region not readable yet"),
        }
        Ok(status)
    }

    /// Current status, retrying within the observation window
    pub async fn observe_status(&self) -> E2eResult<PaymentStatus> {
        let this = self;
        let policy = PollPolicy::new(self.interval, self.observation);
        poll_until(policy, move || async move { this.read_status().await })
            .await?
            .ok_or_else(|| E2eError::ObservationTimeout {
                surface: "payment status".to_string(),
                waited: self.observation,
            })
    }

    /// Confirmation counts, absent before a transaction is detected.
    ///
    /// While the payment is processing the counts are mandatory: if they do not
    /// render within the observation window the surface is malformed.
    pub async fn observe_confirmation_progress(&self) -> E2eResult<Option<ConfirmationProgress>> {
        let status = self.observe_status().await?;
        let page = self.page;
        let selector = self.selectors.confirmation_progress.as_str();

        let read_once = move || async move {
            match visible_text(page, selector).await? {
                Some(text) => ConfirmationProgress::parse(&text),
                None => Ok(None),
            }
        };

        if !status.expects_progress() {
            return read_once().await;
        }

        let policy = PollPolicy::new(self.interval, self.observation);
        match poll_until(policy, read_once).await? {
            Some(progress) => Ok(Some(progress)),
            None => {
                let text = page.text_content(selector).await?.unwrap_or_default();
                Err(E2eError::MalformedProgress { text })
            }
        }
    }

    /// Transaction ids in on-surface order
    pub async fn observe_transaction_ids(&self) -> E2eResult<Vec<String>> {
        let ids = self
            .page
            .all_text_contents(&self.selectors.transaction_ids)
            .await?
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        Ok(ids)
    }

    /// Underpaid/overpaid badges; both absent is the normal case
    pub async fn observe_annotations(&self) -> E2eResult<PaymentAnnotations> {
        Ok(PaymentAnnotations {
            underpaid: self.page.is_visible(&self.selectors.underpaid_badge).await?,
            overpaid: self.page.is_visible(&self.selectors.overpaid_badge).await?,
        })
    }

    /// Status, annotations, progress and transaction ids in one pass
    pub async fn observe_snapshot(&self) -> E2eResult<StatusSnapshot> {
        let status = self.observe_status().await?;
        let mut annotations = self.observe_annotations().await?;
        annotations.underpaid |= status == PaymentStatus::Underpaid;
        annotations.overpaid |= status == PaymentStatus::Overpaid;

        Ok(StatusSnapshot {
            status,
            annotations,
            progress: self.observe_confirmation_progress().await?,
            transaction_ids: self.observe_transaction_ids().await?,
        })
    }

    /// Block until the region announces `target`
    pub async fn wait_for_status(&self, target: PaymentStatus, timeout: Duration) -> E2eResult<()> {
        self.wait_for_any_status(&[target], timeout).await.map(|_| ())
    }

    /// Block until the region announces any of `targets`, returning which one.
    ///
    /// On timeout the error carries the last status that was readable, for
    /// diagnostics.
    pub async fn wait_for_any_status(
        &self,
        targets: &[PaymentStatus],
        timeout: Duration,
    ) -> E2eResult<PaymentStatus> {
        let last_observed = Mutex::new(None);
        let last = &last_observed;
        let this = self;
        let policy = PollPolicy::new(self.interval, timeout);

        info!(targets = ?targets, ?timeout, "Waiting for payment status");
        let reached = poll_until(policy, move || async move {
            let status = this.read_status().await?;
            if status.is_some() {
                *last.lock() = status;
            }
            Ok(status.filter(|s| targets.contains(s)))
        })
        .await?;

        match reached {
            Some(status) => Ok(status),
            None => Err(E2eError::StatusWaitTimeout {
                target: targets
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(" or "),
                last_observed: *last_observed.lock(),
                waited: timeout,
            }),
        }
    }
}
