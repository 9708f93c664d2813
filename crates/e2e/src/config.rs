//! Suite configuration loaded from YAML
//!
//! Every field has a default so an empty file (or no file) yields a runnable
//! configuration against a storefront on localhost.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};
use crate::playwright::Browser;
use crate::poll::PollPolicy;
use crate::properties::BitcoinNetwork;
use crate::status::StatusTable;
use crate::storefront::StorefrontConfig;

/// Complete suite configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Storefront base URL
    pub base_url: String,

    /// Browser settings for every scenario session
    pub browser: BrowserSettings,

    /// How (and whether) to launch the storefront before running
    pub storefront: StorefrontConfig,

    /// Wait budgets
    pub timeouts: Timeouts,

    /// Selectors for every surface the suite reads
    pub selectors: Selectors,

    /// Rendered status wording, in match order
    pub status_phrases: StatusTable,

    /// Backend fixture data (coupons, products, users)
    pub fixtures: FixtureData,

    /// Network the invoice addresses are expected on
    pub network: BitcoinNetwork,

    /// Scenarios run concurrently, each in its own browser context
    pub parallelism: usize,

    /// Output directory for results and failure artifacts
    pub output_dir: PathBuf,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            browser: BrowserSettings::default(),
            storefront: StorefrontConfig::default(),
            timeouts: Timeouts::default(),
            selectors: Selectors::default(),
            status_phrases: StatusTable::default(),
            fixtures: FixtureData::default(),
            network: BitcoinNetwork::default(),
            parallelism: 2,
            output_dir: PathBuf::from("test-results"),
        }
    }
}

impl SuiteConfig {
    /// Parse a config from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load the file if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject settings no run can succeed with; call again after any override
    pub fn validate(&self) -> E2eResult<()> {
        if self.parallelism == 0 {
            return Err(E2eError::Config("parallelism must be at least 1".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(E2eError::Config(format!(
                "base_url must be an http(s) URL, got {}",
                self.base_url
            )));
        }
        if self.status_phrases.phrases().is_empty() {
            return Err(E2eError::Config("status_phrases must not be empty".to_string()));
        }
        Ok(())
    }

    /// Poll policy used for single observations
    pub fn observation_policy(&self) -> PollPolicy {
        PollPolicy::new(self.timeouts.poll_interval(), self.timeouts.observation())
    }

    /// Absolute URL for a storefront path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub kind: Browser,
    pub headless: bool,
    pub viewport: Viewport,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            kind: Browser::Chromium,
            headless: true,
            viewport: Viewport { width: 1280, height: 720 },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Wait budgets, all in milliseconds except the countdown tolerance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub poll_interval_ms: u64,
    pub observation_ms: u64,
    pub invoice_generation_ms: u64,
    pub detection_ms: u64,
    pub settlement_ms: u64,
    pub copy_ack_ms: u64,
    pub page_ready_ms: u64,
    /// Seconds a regenerated countdown may trail the previous reading by
    pub countdown_tolerance_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            observation_ms: 5_000,
            invoice_generation_ms: 15_000,
            detection_ms: 10 * 60 * 1000,
            settlement_ms: 60 * 60 * 1000,
            copy_ack_ms: 3_000,
            page_ready_ms: 10_000,
            countdown_tolerance_secs: 5,
        }
    }
}

impl Timeouts {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn observation(&self) -> Duration {
        Duration::from_millis(self.observation_ms)
    }

    pub fn invoice_generation(&self) -> Duration {
        Duration::from_millis(self.invoice_generation_ms)
    }

    pub fn detection(&self) -> Duration {
        Duration::from_millis(self.detection_ms)
    }

    pub fn settlement(&self) -> Duration {
        Duration::from_millis(self.settlement_ms)
    }

    pub fn copy_ack(&self) -> Duration {
        Duration::from_millis(self.copy_ack_ms)
    }

    pub fn page_ready(&self) -> Duration {
        Duration::from_millis(self.page_ready_ms)
    }

    pub fn countdown_tolerance(&self) -> Duration {
        Duration::from_secs(self.countdown_tolerance_secs)
    }
}

/// Selectors for the storefront surfaces.
///
/// `{method}` in the payment-method templates is replaced with the method key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    // checkout
    pub payment_method_options: String,
    pub payment_method_option: String,
    pub payment_method_region: String,

    // bitcoin panel
    pub invoice: String,
    pub invoice_id_attribute: String,
    pub btc_amount: String,
    pub sats_amount: String,
    pub exchange_rate: String,
    pub address: String,
    pub qr_code: String,
    pub qr_payload_attribute: String,
    pub countdown: String,
    pub status_region: String,
    pub confirmation_progress: String,
    pub transaction_ids: String,
    pub underpaid_badge: String,
    pub overpaid_badge: String,
    pub copy_address: String,
    pub copy_amount: String,
    pub copy_ack_phrase: String,
    pub refresh_invoice: String,
    pub invoice_error: String,
    pub invoice_retry: String,

    // product and cart
    pub add_to_cart: String,
    pub cart_items: String,
    pub clear_cart: String,
    pub cart_empty: String,
    pub cart_subtotal: String,
    pub cart_total: String,
    pub coupon_input: String,
    pub coupon_apply: String,
    pub coupon_success: String,
    pub coupon_error: String,

    // account
    pub resend_form: String,
    pub resend_email: String,
    pub resend_submit: String,
    pub resend_error: String,
    pub resend_success: String,
    pub login_email: String,
    pub login_password: String,
    pub login_submit: String,
    pub account_menu: String,
}

fn test_id(id: &str) -> String {
    format!("[data-testid=\"{}\"]", id)
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            payment_method_options: "[data-testid^=\"payment-method-\"]".to_string(),
            payment_method_option: test_id("payment-method-{method}"),
            payment_method_region: test_id("{method}-payment"),

            invoice: test_id("bitcoin-invoice"),
            invoice_id_attribute: "data-invoice-id".to_string(),
            btc_amount: test_id("btc-amount"),
            sats_amount: test_id("sats-amount"),
            exchange_rate: test_id("btc-exchange-rate"),
            address: test_id("btc-address"),
            qr_code: test_id("btc-qr-code"),
            qr_payload_attribute: "data-payload".to_string(),
            countdown: test_id("invoice-countdown"),
            status_region: "[data-testid=\"payment-status\"][role=\"status\"]".to_string(),
            confirmation_progress: test_id("confirmation-progress"),
            transaction_ids: test_id("payment-txid"),
            underpaid_badge: test_id("payment-underpaid"),
            overpaid_badge: test_id("payment-overpaid"),
            copy_address: test_id("copy-address"),
            copy_amount: test_id("copy-amount"),
            copy_ack_phrase: "copied".to_string(),
            refresh_invoice: test_id("refresh-invoice"),
            invoice_error: test_id("invoice-error"),
            invoice_retry: test_id("invoice-retry"),

            add_to_cart: test_id("add-to-cart"),
            cart_items: test_id("cart-item"),
            clear_cart: test_id("clear-cart"),
            cart_empty: test_id("cart-empty"),
            cart_subtotal: test_id("cart-subtotal"),
            cart_total: test_id("cart-total"),
            coupon_input: test_id("coupon-input"),
            coupon_apply: test_id("coupon-apply"),
            coupon_success: test_id("coupon-success"),
            coupon_error: test_id("coupon-error"),

            resend_form: test_id("resend-activation-form"),
            resend_email: test_id("resend-activation-email"),
            resend_submit: test_id("resend-activation-submit"),
            resend_error: test_id("resend-activation-error"),
            resend_success: test_id("resend-activation-success"),
            login_email: test_id("login-email"),
            login_password: test_id("login-password"),
            login_submit: test_id("login-submit"),
            account_menu: test_id("account-menu"),
        }
    }
}

impl Selectors {
    pub fn payment_method_option(&self, method: &str) -> String {
        self.payment_method_option.replace("{method}", method)
    }

    pub fn payment_method_region(&self, method: &str) -> String {
        self.payment_method_region.replace("{method}", method)
    }
}

/// Backend fixture data the scenarios rely on
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureData {
    pub product_path: String,
    pub cart_path: String,
    pub checkout_path: String,
    pub resend_activation_path: String,
    pub login_path: String,
    /// Subtotal the product fixture puts in an empty cart, in cents
    pub product_subtotal_cents: i64,
    pub valid_coupon: String,
    /// Percentage the valid coupon takes off
    pub valid_coupon_percent: u8,
    pub expired_coupon: String,
    pub invalid_email: String,
    /// Shared account, only used by scenarios that lease it
    pub test_user: Option<Credentials>,
}

impl Default for FixtureData {
    fn default() -> Self {
        Self {
            product_path: "/product/e2e-test-product".to_string(),
            cart_path: "/cart".to_string(),
            checkout_path: "/checkout".to_string(),
            resend_activation_path: "/resend-activation".to_string(),
            login_path: "/login".to_string(),
            product_subtotal_cents: 9999,
            valid_coupon: "E2ETEST10".to_string(),
            valid_coupon_percent: 10,
            expired_coupon: "E2EEXPIRED".to_string(),
            invalid_email: "invalid-email-format".to_string(),
            test_user: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}
