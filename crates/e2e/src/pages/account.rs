//! Account pages: login and resend-activation

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{Credentials, SuiteConfig};
use crate::error::E2eResult;
use crate::page::Page;
use crate::poll::{poll_until, PollPolicy};

use super::wait_visible;

pub struct LoginPage<'a> {
    page: &'a dyn Page,
    config: &'a SuiteConfig,
}

impl<'a> LoginPage<'a> {
    pub fn new(page: &'a dyn Page, config: &'a SuiteConfig) -> Self {
        Self { page, config }
    }

    /// Log in fresh and wait for the account menu
    pub async fn login(&self, credentials: &Credentials) -> E2eResult<()> {
        let s = &self.config.selectors;
        info!(email = %credentials.email, "Logging in");
        self.page.goto(&self.config.fixtures.login_path).await?;
        self.page.fill(&s.login_email, &credentials.email).await?;
        self.page.fill(&s.login_password, &credentials.password).await?;
        self.page.click(&s.login_submit).await?;
        wait_visible(
            self.page,
            &s.account_menu,
            self.config.timeouts.poll_interval(),
            self.config.timeouts.page_ready(),
            "account menu",
        )
        .await
    }
}

/// What the resend-activation form showed after submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResendOutcome {
    pub error_visible: bool,
    pub success_visible: bool,
    pub form_visible: bool,
}

impl ResendOutcome {
    /// The submission produced something a user could see: an error, or the
    /// form left in place for correction
    pub fn has_observable_feedback(&self) -> bool {
        self.error_visible || self.form_visible
    }
}

pub struct ResendActivationPage<'a> {
    page: &'a dyn Page,
    config: &'a SuiteConfig,
}

impl<'a> ResendActivationPage<'a> {
    pub fn new(page: &'a dyn Page, config: &'a SuiteConfig) -> Self {
        Self { page, config }
    }

    pub async fn open(&self) -> E2eResult<()> {
        self.page.goto(&self.config.fixtures.resend_activation_path).await?;
        wait_visible(
            self.page,
            &self.config.selectors.resend_form,
            self.config.timeouts.poll_interval(),
            self.config.timeouts.page_ready(),
            "resend activation form",
        )
        .await
    }

    /// Submit `email` and report what is on screen once the page settles
    pub async fn submit(&self, email: &str) -> E2eResult<ResendOutcome> {
        let s = &self.config.selectors;
        self.page.fill(&s.resend_email, email).await?;
        self.page.click(&s.resend_submit).await?;

        // give validation a window to render, then take whatever is there
        let page = self.page;
        let policy = PollPolicy::new(
            self.config.timeouts.poll_interval(),
            self.config.timeouts.observation(),
        );
        let (error, success) = (s.resend_error.as_str(), s.resend_success.as_str());
        poll_until(policy, move || async move {
            let shown = page.is_visible(error).await? || page.is_visible(success).await?;
            Ok(shown.then_some(()))
        })
        .await?;

        Ok(ResendOutcome {
            error_visible: self.page.is_visible(&s.resend_error).await?,
            success_visible: self.page.is_visible(&s.resend_success).await?,
            form_visible: self.page.is_visible(&s.resend_form).await?,
        })
    }
}
