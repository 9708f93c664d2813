//! Product and cart pages, including coupons

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SuiteConfig;
use crate::error::{E2eError, E2eResult};
use crate::page::{visible_text, Page};
use crate::poll::{poll_until, PollPolicy};

use super::wait_visible;

/// A dollar amount in cents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money {
    pub cents: i64,
}

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Parse the amount in text like `Total: $1,234.50`.
    ///
    /// The first `$` amount wins, so counts such as `(1 item)` are skipped;
    /// a bare number is accepted only when no `$` amount is present.
    pub fn parse(text: &str) -> Option<Self> {
        static DOLLAR: OnceLock<Regex> = OnceLock::new();
        static BARE: OnceLock<Regex> = OnceLock::new();
        let dollar = DOLLAR.get_or_init(|| {
            Regex::new(r"(-)?\$\s*(\d+(?:,\d{3})*)(?:\.(\d{1,2}))?").expect("money pattern is valid")
        });
        let bare = BARE.get_or_init(|| {
            Regex::new(r"(-)?(\d+(?:,\d{3})*)(?:\.(\d{1,2}))?").expect("money pattern is valid")
        });

        let caps = dollar.captures(text).or_else(|| bare.captures(text))?;
        let whole: i64 = caps[2].replace(',', "").parse().ok()?;
        let fraction: i64 = match caps.get(3) {
            Some(f) if f.as_str().len() == 1 => f.as_str().parse::<i64>().ok()? * 10,
            Some(f) => f.as_str().parse().ok()?,
            None => 0,
        };
        let sign = if caps.get(1).is_some() { -1 } else { 1 };
        Some(Self::from_cents(sign * (whole * 100 + fraction)))
    }

    /// Absolute difference is at most `tolerance_cents`
    pub fn within(&self, other: &Money, tolerance_cents: i64) -> bool {
        (self.cents - other.cents).abs() <= tolerance_cents
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.abs();
        write!(f, "{}${}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// What the cart showed after a coupon was submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouponOutcome {
    Applied,
    Rejected,
    /// Neither indicator appeared within the observation window
    NoFeedback,
}

pub struct CartPage<'a> {
    page: &'a dyn Page,
    config: &'a SuiteConfig,
}

impl<'a> CartPage<'a> {
    pub fn new(page: &'a dyn Page, config: &'a SuiteConfig) -> Self {
        Self { page, config }
    }

    pub async fn open(&self) -> E2eResult<()> {
        self.page.goto(&self.config.fixtures.cart_path).await
    }

    /// Empty the cart so the scenario starts from a known state
    pub async fn clear(&self) -> E2eResult<()> {
        let s = &self.config.selectors;
        self.open().await?;
        if self.page.is_visible(&s.cart_empty).await? {
            return Ok(());
        }
        if self.page.is_visible(&s.clear_cart).await? {
            info!("Clearing cart");
            self.page.click(&s.clear_cart).await?;
        }
        wait_visible(
            self.page,
            &s.cart_empty,
            self.config.timeouts.poll_interval(),
            self.config.timeouts.page_ready(),
            "empty cart",
        )
        .await
    }

    /// Add the fixture product and land on the cart
    pub async fn add_fixture_product(&self) -> E2eResult<()> {
        let s = &self.config.selectors;
        self.page.goto(&self.config.fixtures.product_path).await?;
        wait_visible(
            self.page,
            &s.add_to_cart,
            self.config.timeouts.poll_interval(),
            self.config.timeouts.page_ready(),
            "add to cart",
        )
        .await?;
        self.page.click(&s.add_to_cart).await?;

        self.open().await?;
        wait_visible(
            self.page,
            &s.cart_items,
            self.config.timeouts.poll_interval(),
            self.config.timeouts.page_ready(),
            "cart items",
        )
        .await
    }

    pub async fn subtotal(&self) -> E2eResult<Money> {
        self.read_money(&self.config.selectors.cart_subtotal, "cart subtotal").await
    }

    pub async fn total(&self) -> E2eResult<Money> {
        self.read_money(&self.config.selectors.cart_total, "cart total").await
    }

    pub async fn is_coupon_success_visible(&self) -> E2eResult<bool> {
        self.page.is_visible(&self.config.selectors.coupon_success).await
    }

    pub async fn is_coupon_error_visible(&self) -> E2eResult<bool> {
        self.page.is_visible(&self.config.selectors.coupon_error).await
    }

    /// Submit a coupon code and wait for the cart to react
    pub async fn apply_coupon(&self, code: &str) -> E2eResult<CouponOutcome> {
        let s = &self.config.selectors;
        info!(code, "Applying coupon");
        self.page.fill(&s.coupon_input, code).await?;
        self.page.click(&s.coupon_apply).await?;

        let this = self;
        let policy = PollPolicy::new(
            self.config.timeouts.poll_interval(),
            self.config.timeouts.observation(),
        );
        let outcome = poll_until(policy, move || async move {
            if this.is_coupon_success_visible().await? {
                return Ok(Some(CouponOutcome::Applied));
            }
            if this.is_coupon_error_visible().await? {
                return Ok(Some(CouponOutcome::Rejected));
            }
            Ok(None)
        })
        .await?
        .unwrap_or(CouponOutcome::NoFeedback);

        debug!(code, ?outcome, "Coupon outcome");
        Ok(outcome)
    }

    async fn read_money(&self, selector: &str, surface: &str) -> E2eResult<Money> {
        let page = self.page;
        let policy = PollPolicy::new(
            self.config.timeouts.poll_interval(),
            self.config.timeouts.observation(),
        );
        let amount = poll_until(policy, move || async move {
            Ok(visible_text(page, selector).await?.and_then(|t| Money::parse(&t)))
        })
        .await?;

        amount.ok_or_else(|| E2eError::ObservationTimeout {
            surface: surface.to_string(),
            waited: policy.timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("$99.99" => Some(9999))]
    #[test_case("Total: $1,234.50" => Some(123_450))]
    #[test_case("$1234.50" => Some(123_450))]
    #[test_case("$89.9" => Some(8990))]
    #[test_case("-$10.00" => Some(-1000))]
    #[test_case("12 USD" => Some(1200))]
    #[test_case("Subtotal (1 item): $99.99" => Some(9999))]
    #[test_case("2 items, total $179.98" => Some(17_998))]
    #[test_case("free" => None)]
    fn money_parsing(text: &str) -> Option<i64> {
        Money::parse(text).map(|m| m.cents)
    }

    #[test]
    fn money_display_and_tolerance() {
        assert_eq!(Money::from_cents(9999).to_string(), "$99.99");
        assert_eq!(Money::from_cents(-5).to_string(), "-$0.05");
        assert!(Money::from_cents(9999).within(&Money::from_cents(10_000), 1));
        assert!(!Money::from_cents(9999).within(&Money::from_cents(8999), 1));
    }
}
