//! Checkout page: payment-method selection

use tracing::info;

use crate::config::SuiteConfig;
use crate::error::{E2eError, E2eResult};
use crate::page::Page;

use super::wait_visible;

/// Method key for on-chain Bitcoin payments
pub const BITCOIN: &str = "bitcoin";

pub struct CheckoutPage<'a> {
    page: &'a dyn Page,
    config: &'a SuiteConfig,
}

impl<'a> CheckoutPage<'a> {
    pub fn new(page: &'a dyn Page, config: &'a SuiteConfig) -> Self {
        Self { page, config }
    }

    /// Navigate to checkout and wait for the payment methods to render
    pub async fn open(&self) -> E2eResult<()> {
        self.page.goto(&self.config.fixtures.checkout_path).await?;
        wait_visible(
            self.page,
            &self.config.selectors.payment_method_options,
            self.config.timeouts.poll_interval(),
            self.config.timeouts.page_ready(),
            "payment methods",
        )
        .await
    }

    /// Labels of every rendered payment option, in page order
    pub async fn available_methods(&self) -> E2eResult<Vec<String>> {
        let labels = self
            .page
            .all_text_contents(&self.config.selectors.payment_method_options)
            .await?;
        Ok(labels.into_iter().map(|l| l.trim().to_string()).collect())
    }

    /// Whether `method` is offered and can be picked
    pub async fn is_method_enabled(&self, method: &str) -> E2eResult<bool> {
        let option = self.config.selectors.payment_method_option(method);
        Ok(self.page.is_visible(&option).await? && self.page.is_enabled(&option).await?)
    }

    /// Pick `method` and wait for its dedicated region to appear
    pub async fn select_payment_method(&self, method: &str) -> E2eResult<()> {
        if !self.is_method_enabled(method).await? {
            return Err(E2eError::AssertionFailed(format!(
                "payment method '{}' is not available",
                method
            )));
        }

        info!(method, "Selecting payment method");
        self.page
            .click(&self.config.selectors.payment_method_option(method))
            .await?;

        wait_visible(
            self.page,
            &self.config.selectors.payment_method_region(method),
            self.config.timeouts.poll_interval(),
            self.config.timeouts.page_ready(),
            &format!("{} payment region", method),
        )
        .await
    }
}
