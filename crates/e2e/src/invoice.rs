//! Invoice generation, countdown, regeneration and copy acknowledgements

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{Selectors, SuiteConfig};
use crate::error::{E2eError, E2eResult};
use crate::page::{visible_text, Page};
use crate::poll::{poll_until, PollPolicy};
use crate::properties::regeneration_resets_countdown;

pub const SATS_PER_BTC: u64 = 100_000_000;

/// Invoiced amount in both denominations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amount {
    pub btc: f64,
    /// BTC amount exactly as rendered
    pub btc_text: String,
    pub sats: u64,
}

impl Amount {
    /// Parse the BTC figure out of text like `0.00123456 BTC`
    pub fn parse_btc(text: &str) -> Option<f64> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("btc pattern is valid"));
        re.captures(text)?[1].parse().ok()
    }

    /// Parse the satoshi figure out of text like `123,456 sats`
    pub fn parse_sats(text: &str) -> Option<u64> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| Regex::new(r"(\d[\d,\s]*)").expect("sats pattern is valid"));
        let digits: String = re
            .captures(text)?[1]
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }
}

/// A backend-issued payment request as rendered on the checkout page.
///
/// Never mutated: regeneration yields a new value and the old one is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub address: String,
    pub amount: Amount,
    /// Quoted rate as rendered, e.g. `1 BTC = $43,210.00`
    pub exchange_rate: Option<String>,
    /// Observation time plus the rendered countdown
    pub expires_at: Option<DateTime<Utc>>,
    /// QR payload (usually a BIP21 URI)
    pub payload: Option<String>,
    pub qr_visible: bool,
}

/// One reading of the expiry countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    pub remaining: Duration,
    pub observed_at: Instant,
}

impl Countdown {
    /// Parse `MM:SS` or `H:MM:SS` anywhere in the text
    pub fn parse_remaining(text: &str) -> Option<Duration> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| {
            Regex::new(r"(?:(\d+):)?(\d{1,2}):(\d{2})\b").expect("countdown pattern is valid")
        });
        let caps = re.captures(text)?;
        let hours: u64 = caps.get(1).map_or(Ok(0), |h| h.as_str().parse()).ok()?;
        let minutes: u64 = caps[2].parse().ok()?;
        let seconds: u64 = caps[3].parse().ok()?;
        if seconds >= 60 || (hours > 0 && minutes >= 60) {
            return None;
        }
        Some(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
    }
}

/// How the last generation attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum GenerationOutcome {
    Generated,
    Errored(String),
    TimedOut,
}

enum SurfaceRead {
    Ready(Invoice),
    Failed(String),
}

/// The invoice a regeneration must replace
struct Superseded {
    id: String,
    remaining: Duration,
}

/// Drives invoice creation and recovery on one checkout page
pub struct InvoiceManager<'a> {
    page: &'a dyn Page,
    selectors: &'a Selectors,
    interval: Duration,
    observation: Duration,
    generation_timeout: Duration,
    copy_ack: Duration,
    tolerance: Duration,
    current: Option<Invoice>,
    last_outcome: Option<GenerationOutcome>,
}

impl<'a> InvoiceManager<'a> {
    pub fn new(page: &'a dyn Page, config: &'a SuiteConfig) -> Self {
        Self {
            page,
            selectors: &config.selectors,
            interval: config.timeouts.poll_interval(),
            observation: config.timeouts.observation(),
            generation_timeout: config.timeouts.invoice_generation(),
            copy_ack: config.timeouts.copy_ack(),
            tolerance: config.timeouts.countdown_tolerance(),
            current: None,
            last_outcome: None,
        }
    }

    /// The live invoice, if generation succeeded
    pub fn current(&self) -> Option<&Invoice> {
        self.current.as_ref()
    }

    /// Error text of the last failed generation
    pub fn last_error_message(&self) -> Option<&str> {
        match &self.last_outcome {
            Some(GenerationOutcome::Errored(message)) => Some(message),
            _ => None,
        }
    }

    /// Wait for the invoice the payment-method selection triggered
    pub async fn generate_invoice(&mut self, timeout: Duration) -> E2eResult<Invoice> {
        let result = self.await_invoice(timeout, None).await;
        self.record(result)
    }

    /// Click refresh and wait for a replacement invoice with a reset clock
    pub async fn regenerate_invoice(&mut self, timeout: Duration) -> E2eResult<Invoice> {
        let before = self.read_countdown().await?;
        let previous_id = match &self.current {
            Some(invoice) => invoice.id.clone(),
            None => self
                .read_invoice()
                .await?
                .map(|(invoice, _)| invoice.id)
                .unwrap_or_default(),
        };

        info!(previous = %previous_id, remaining = ?before.remaining, "Regenerating invoice");
        self.page.click(&self.selectors.refresh_invoice).await?;

        let superseded = Superseded {
            id: previous_id,
            remaining: before.remaining,
        };
        let result = self.await_invoice(timeout, Some(&superseded)).await;
        let invoice = self.record(result)?;

        let after = self.read_countdown().await?;
        if !regeneration_resets_countdown(&before, &after, self.tolerance) {
            return Err(E2eError::CountdownNotReset {
                before: before.remaining,
                after: after.remaining,
            });
        }
        Ok(invoice)
    }

    /// Press retry on the error surface and attempt generation once more
    pub async fn retry_after_error(&mut self) -> E2eResult<Invoice> {
        if !matches!(self.last_outcome, Some(GenerationOutcome::Errored(_))) {
            return Err(E2eError::RetryUnavailable);
        }
        info!("Retrying invoice generation after error");
        self.page.click(&self.selectors.invoice_retry).await?;
        let result = self.await_invoice(self.generation_timeout, None).await;
        self.record(result)
    }

    /// Read the countdown, retrying while it is not rendered yet
    pub async fn read_countdown(&self) -> E2eResult<Countdown> {
        let this = self;
        let policy = PollPolicy::new(self.interval, self.observation);

        let countdown = poll_until(policy, move || async move {
            Ok(this.peek_countdown().await?.map(|remaining| Countdown {
                remaining,
                observed_at: Instant::now(),
            }))
        })
        .await?;

        countdown.ok_or_else(|| E2eError::ObservationTimeout {
            surface: "countdown".to_string(),
            waited: self.observation,
        })
    }

    /// One read of the countdown, `None` while it is hidden or unparseable
    pub async fn peek_countdown(&self) -> E2eResult<Option<Duration>> {
        Ok(visible_text(self.page, &self.selectors.countdown)
            .await?
            .and_then(|text| Countdown::parse_remaining(&text)))
    }

    /// Whether the generation error surface is showing
    pub async fn is_error_visible(&self) -> E2eResult<bool> {
        self.page.is_visible(&self.selectors.invoice_error).await
    }

    pub async fn copy_address(&self) -> E2eResult<()> {
        self.copy(&self.selectors.copy_address, "address").await
    }

    pub async fn copy_amount(&self) -> E2eResult<()> {
        self.copy(&self.selectors.copy_amount, "amount").await
    }

    /// Click a copy button and wait for its label to acknowledge.
    ///
    /// The label change is the success signal; the OS clipboard is not read.
    /// A label still showing the previous acknowledgement must revert before
    /// the click, so every acknowledgement is one this click produced.
    async fn copy(&self, selector: &str, target: &str) -> E2eResult<()> {
        let page = self.page;
        let phrase = self.selectors.copy_ack_phrase.to_lowercase();
        let phrase = phrase.as_str();
        let policy = PollPolicy::new(self.interval, self.copy_ack);
        let label_acknowledges = move |wanted: bool| async move {
            let label = page.text_content(selector).await?.unwrap_or_default();
            Ok::<_, E2eError>((label.to_lowercase().contains(phrase) == wanted).then_some(()))
        };

        if poll_until(policy, move || label_acknowledges(false)).await?.is_none() {
            return Err(E2eError::CopyStuck {
                target: target.to_string(),
            });
        }

        self.page.click(selector).await?;
        match poll_until(policy, move || label_acknowledges(true)).await? {
            Some(()) => {
                debug!(target, "Copy acknowledged");
                Ok(())
            }
            None => Err(E2eError::CopyNotAcknowledged {
                target: target.to_string(),
            }),
        }
    }

    fn record(&mut self, result: E2eResult<Invoice>) -> E2eResult<Invoice> {
        match &result {
            Ok(invoice) => {
                info!(id = %invoice.id, btc = %invoice.amount.btc_text, "Invoice ready");
                self.current = Some(invoice.clone());
                self.last_outcome = Some(GenerationOutcome::Generated);
            }
            Err(E2eError::InvoiceGeneration { message }) => {
                warn!(%message, "Invoice generation failed");
                self.current = None;
                self.last_outcome = Some(GenerationOutcome::Errored(message.clone()));
            }
            Err(E2eError::InvoiceGenerationTimeout { waited }) => {
                warn!(?waited, "Invoice generation timed out");
                self.current = None;
                self.last_outcome = Some(GenerationOutcome::TimedOut);
            }
            Err(_) => {}
        }
        result
    }

    /// Wait for either the success surface or the error surface
    async fn await_invoice(&self, timeout: Duration, superseded: Option<&Superseded>) -> E2eResult<Invoice> {
        let this = self;
        let policy = PollPolicy::new(self.interval, timeout);

        let read = poll_until(policy, move || async move {
            if this.page.is_visible(&this.selectors.invoice_error).await? {
                let message = visible_text(this.page, &this.selectors.invoice_error)
                    .await?
                    .unwrap_or_else(|| "invoice error surface shown without text".to_string());
                return Ok(Some(SurfaceRead::Failed(message)));
            }

            let Some((invoice, countdown)) = this.read_invoice().await? else {
                return Ok(None);
            };
            if let Some(old) = superseded {
                let clock_reset = countdown.is_some_and(|c| c.remaining > old.remaining);
                if invoice.id == old.id && !clock_reset {
                    return Ok(None);
                }
            }
            Ok(Some(SurfaceRead::Ready(invoice)))
        })
        .await?;

        match read {
            Some(SurfaceRead::Ready(invoice)) => Ok(invoice),
            Some(SurfaceRead::Failed(message)) => Err(E2eError::InvoiceGeneration { message }),
            None => Err(E2eError::InvoiceGenerationTimeout { waited: timeout }),
        }
    }

    /// Single read of the success surface; `None` until amount, address and QR are all rendered
    async fn read_invoice(&self) -> E2eResult<Option<(Invoice, Option<Countdown>)>> {
        let s = self.selectors;

        let Some(btc_text) = visible_text(self.page, &s.btc_amount).await? else {
            return Ok(None);
        };
        let Some(sats_text) = visible_text(self.page, &s.sats_amount).await? else {
            return Ok(None);
        };
        let Some(address) = visible_text(self.page, &s.address).await? else {
            return Ok(None);
        };
        if !self.page.is_visible(&s.qr_code).await? {
            return Ok(None);
        }
        // amounts still rendering a placeholder count as not ready
        let (Some(btc), Some(sats)) = (Amount::parse_btc(&btc_text), Amount::parse_sats(&sats_text)) else {
            debug!(%btc_text, %sats_text, "Invoice amounts not parseable yet");
            return Ok(None);
        };

        let payload = self.page.attribute(&s.qr_code, &s.qr_payload_attribute).await?;
        let exchange_rate = visible_text(self.page, &s.exchange_rate).await?;
        let countdown = visible_text(self.page, &s.countdown)
            .await?
            .and_then(|text| Countdown::parse_remaining(&text))
            .map(|remaining| Countdown {
                remaining,
                observed_at: Instant::now(),
            });
        let expires_at = countdown
            .and_then(|c| chrono::Duration::from_std(c.remaining).ok())
            .map(|remaining| Utc::now() + remaining);

        let id = match self.page.attribute(&s.invoice, &s.invoice_id_attribute).await? {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => derive_invoice_id(payload.as_deref(), &address, sats),
        };

        let invoice = Invoice {
            id,
            address,
            amount: Amount { btc, btc_text, sats },
            exchange_rate,
            expires_at,
            payload,
            qr_visible: true,
        };
        Ok(Some((invoice, countdown)))
    }
}

/// Stable id for surfaces that render none: digest of the QR payload, or of address and amount
fn derive_invoice_id(payload: Option<&str>, address: &str, sats: u64) -> String {
    let mut hasher = Sha256::new();
    match payload {
        Some(payload) => hasher.update(payload.as_bytes()),
        None => {
            hasher.update(address.as_bytes());
            hasher.update(sats.to_be_bytes());
        }
    }
    let digest = hex::encode(hasher.finalize());
    format!("derived-{}", &digest[..16])
}
