//! The suite's user journeys
//!
//! Each scenario composes page objects into one journey and runs against its
//! own browser session. Scenarios that drive the payment flow record the
//! driver's report into the context so a failure can be explained afterwards.

use std::fmt;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SuiteConfig;
use crate::error::{E2eError, E2eResult};
use crate::flow::{DriverState, FlowReport, PaymentFlowDriver};
use crate::invoice::Invoice;
use crate::page::Page;
use crate::pages::{CartPage, CheckoutPage, CouponOutcome, LoginPage, Money, ResendActivationPage, BITCOIN};
use crate::poll::poll_until;
use crate::properties::{
    countdown_elapsed_within, ensure, is_btc_amount_text, is_consistent_denomination,
    is_monotonic_countdown, is_status_subsequence, is_valid_confirmation_progress,
    is_well_formed_address,
};
use crate::status::PaymentStatus;

pub type ScenarioFuture<'a> = BoxFuture<'a, E2eResult<()>>;
pub type ScenarioFn = for<'a> fn(&'a ScenarioContext<'a>) -> ScenarioFuture<'a>;

/// Tags that only run when selected explicitly
pub const OPT_IN_TAGS: &[&str] = &["settlement"];

/// Lease taken by cart scenarios when they share a logged-in account
pub const TEST_USER_FIXTURE: &str = "test-user";
pub const VALID_COUPON_FIXTURE: &str = "coupon:valid";
pub const EXPIRED_COUPON_FIXTURE: &str = "coupon:expired";

/// Pause between the two countdown readings
const COUNTDOWN_SAMPLE: Duration = Duration::from_secs(3);

#[derive(Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    pub tags: &'static [&'static str],
    /// Shared fixtures this scenario mutates
    pub fixtures: &'static [&'static str],
    pub run: ScenarioFn,
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("fixtures", &self.fixtures)
            .finish()
    }
}

impl Scenario {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(&tag)
    }

    pub fn is_opt_in(&self) -> bool {
        self.tags.iter().any(|t| OPT_IN_TAGS.contains(t))
    }

    /// Fixture names to lease before running under `config`
    pub fn leases(&self, config: &SuiteConfig) -> Vec<&'static str> {
        let mut names = self.fixtures.to_vec();
        if self.has_tag("cart") && config.fixtures.test_user.is_some() {
            names.push(TEST_USER_FIXTURE);
        }
        names
    }
}

/// Which scenarios a run includes
#[derive(Debug, Clone, Default)]
pub struct ScenarioFilter {
    pub name: Option<String>,
    pub tag: Option<String>,
}

impl ScenarioFilter {
    /// Without a name or tag, every scenario except the opt-in ones
    pub fn matches(&self, scenario: &Scenario) -> bool {
        match (&self.name, &self.tag) {
            (Some(name), _) if name != scenario.name => false,
            (_, Some(tag)) if !scenario.has_tag(tag) => false,
            (None, None) => !scenario.is_opt_in(),
            _ => true,
        }
    }
}

/// Every scenario the suite knows, in run order
pub fn all() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "bitcoin_invoice_generation",
            description: "Selecting Bitcoin renders a pending invoice with QR, amounts and address",
            tags: &["bitcoin", "cart", "smoke"],
            fixtures: &[],
            run: bitcoin_invoice_generation,
        },
        Scenario {
            name: "bitcoin_countdown_progresses",
            description: "The expiry countdown drops by roughly the time waited",
            tags: &["bitcoin", "cart"],
            fixtures: &[],
            run: bitcoin_countdown_progresses,
        },
        Scenario {
            name: "bitcoin_invoice_regeneration",
            description: "Refreshing an invoice resets its countdown",
            tags: &["bitcoin", "cart"],
            fixtures: &[],
            run: bitcoin_invoice_regeneration,
        },
        Scenario {
            name: "resend_activation_invalid_email",
            description: "A malformed email on resend-activation is not silently accepted",
            tags: &["account", "smoke"],
            fixtures: &[],
            run: resend_activation_invalid_email,
        },
        Scenario {
            name: "coupon_valid_discounts_total",
            description: "A valid coupon is acknowledged and lowers the total",
            tags: &["coupon", "cart"],
            fixtures: &[VALID_COUPON_FIXTURE],
            run: coupon_valid_discounts_total,
        },
        Scenario {
            name: "coupon_expired_is_rejected",
            description: "An expired coupon shows an error and leaves the total alone",
            tags: &["coupon", "cart"],
            fixtures: &[EXPIRED_COUPON_FIXTURE],
            run: coupon_expired_is_rejected,
        },
        Scenario {
            name: "bitcoin_copy_is_idempotent",
            description: "Copying address and amount is acknowledged every time",
            tags: &["bitcoin", "cart"],
            fixtures: &[],
            run: bitcoin_copy_is_idempotent,
        },
        Scenario {
            name: "bitcoin_settlement",
            description: "An externally paid invoice settles through ordered statuses",
            tags: &["bitcoin", "cart", "settlement"],
            fixtures: &[],
            run: bitcoin_settlement,
        },
    ]
}

pub fn select(filter: &ScenarioFilter) -> Vec<Scenario> {
    all().into_iter().filter(|s| filter.matches(s)).collect()
}

/// What a failed scenario had last seen of the payment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub driver_state: Option<DriverState>,
    pub last_status: Option<PaymentStatus>,
    pub statuses: Vec<PaymentStatus>,
    pub invoice: Option<Invoice>,
    pub notes: Vec<String>,
}

/// Everything one scenario run gets to work with
pub struct ScenarioContext<'a> {
    pub page: &'a dyn Page,
    pub config: &'a SuiteConfig,
    pub run_id: Uuid,
    diagnostics: Mutex<Diagnostics>,
}

impl<'a> ScenarioContext<'a> {
    pub fn new(page: &'a dyn Page, config: &'a SuiteConfig) -> Self {
        Self {
            page,
            config,
            run_id: Uuid::new_v4(),
            diagnostics: Mutex::new(Diagnostics::default()),
        }
    }

    pub fn driver(&self) -> PaymentFlowDriver<'a> {
        PaymentFlowDriver::new(self.page, self.config)
    }

    pub fn record_flow(&self, report: &FlowReport) {
        let mut diagnostics = self.diagnostics.lock();
        diagnostics.driver_state = Some(report.state);
        diagnostics.last_status = report.last_status();
        diagnostics.statuses = report.statuses.clone();
        diagnostics.invoice = report.invoice.clone();
    }

    pub fn note(&self, note: impl Into<String>) {
        self.diagnostics.lock().notes.push(note.into());
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.lock().clone()
    }
}

async fn login_if_configured(ctx: &ScenarioContext<'_>) -> E2eResult<()> {
    match &ctx.config.fixtures.test_user {
        Some(user) => LoginPage::new(ctx.page, ctx.config).login(user).await,
        None => Ok(()),
    }
}

/// Start from an empty cart holding only the fixture product
async fn prepare_cart<'a>(ctx: &ScenarioContext<'a>) -> E2eResult<CartPage<'a>> {
    login_if_configured(ctx).await?;
    let cart = CartPage::new(ctx.page, ctx.config);
    cart.clear().await?;
    cart.add_fixture_product().await?;
    Ok(cart)
}

/// Land on checkout with an invoice rendered for Bitcoin
async fn open_bitcoin_invoice(
    ctx: &ScenarioContext<'_>,
    driver: &mut PaymentFlowDriver<'_>,
) -> E2eResult<Invoice> {
    prepare_cart(ctx).await?;
    CheckoutPage::new(ctx.page, ctx.config).open().await?;
    driver.select_method(BITCOIN).await?;
    driver.generate_invoice().await
}

fn bitcoin_invoice_generation<'a>(ctx: &'a ScenarioContext<'a>) -> ScenarioFuture<'a> {
    async move {
        let mut driver = ctx.driver();
        let result: E2eResult<()> = async {
            prepare_cart(ctx).await?;
            CheckoutPage::new(ctx.page, ctx.config).open().await?;
            let report = driver.run_until(BITCOIN, DriverState::AwaitingDetection).await?;
            let invoice = report
                .invoice
                .ok_or_else(|| E2eError::AssertionFailed("no invoice after generation".to_string()))?;

            ensure(invoice.qr_visible, || "QR code not visible".to_string())?;
            ensure(is_btc_amount_text(&invoice.amount.btc_text), || {
                format!("BTC amount {:?} is not '<digits>.<digits> BTC'", invoice.amount.btc_text)
            })?;
            ensure(invoice.amount.sats > 0, || "satoshi amount is zero".to_string())?;
            ensure(is_consistent_denomination(&invoice), || {
                format!(
                    "{} does not match {} sats",
                    invoice.amount.btc_text, invoice.amount.sats
                )
            })?;
            ensure(is_well_formed_address(&invoice.address, ctx.config.network), || {
                format!("address {} is not a {:?} address", invoice.address, ctx.config.network)
            })
        }
        .await;
        ctx.record_flow(&driver.report());
        result
    }
    .boxed()
}

fn bitcoin_countdown_progresses<'a>(ctx: &'a ScenarioContext<'a>) -> ScenarioFuture<'a> {
    async move {
        let mut driver = ctx.driver();
        let result: E2eResult<()> = async {
            open_bitcoin_invoice(ctx, &mut driver).await?;
            let before = driver.invoices().read_countdown().await?;
            tokio::time::sleep(COUNTDOWN_SAMPLE).await;
            let after = driver.invoices().read_countdown().await?;

            info!(before = ?before.remaining, after = ?after.remaining, "Countdown sampled");
            ensure(is_monotonic_countdown(&before, &after), || {
                format!("countdown grew from {:?} to {:?}", before.remaining, after.remaining)
            })?;
            ensure(
                countdown_elapsed_within(&before, &after, Duration::from_secs(2), Duration::from_secs(5)),
                || {
                    format!(
                        "countdown moved from {:?} to {:?} over {:?}",
                        before.remaining, after.remaining, COUNTDOWN_SAMPLE
                    )
                },
            )
        }
        .await;
        ctx.record_flow(&driver.report());
        result
    }
    .boxed()
}

fn bitcoin_invoice_regeneration<'a>(ctx: &'a ScenarioContext<'a>) -> ScenarioFuture<'a> {
    async move {
        let mut driver = ctx.driver();
        let result: E2eResult<()> = async {
            let first = open_bitcoin_invoice(ctx, &mut driver).await?;
            let timeout = ctx.config.timeouts.invoice_generation();
            let second = driver.invoices().regenerate_invoice(timeout).await?;

            info!(previous = %first.id, current = %second.id, "Invoice regenerated");
            let failed = driver.invoices().is_error_visible().await?;
            ensure(!failed, || "error surface showing after refresh".to_string())?;
            ensure(second.qr_visible, || "QR code not visible after refresh".to_string())
        }
        .await;
        ctx.record_flow(&driver.report());
        result
    }
    .boxed()
}

fn resend_activation_invalid_email<'a>(ctx: &'a ScenarioContext<'a>) -> ScenarioFuture<'a> {
    async move {
        let page = ResendActivationPage::new(ctx.page, ctx.config);
        page.open().await?;
        let outcome = page.submit(&ctx.config.fixtures.invalid_email).await?;

        if !outcome.error_visible && !outcome.success_visible {
            warn!("Resend activation showed neither an error nor a confirmation");
            ctx.note("no validation message rendered; passed on the form still being visible");
        }
        ensure(outcome.has_observable_feedback(), || {
            format!("invalid email accepted without feedback: {:?}", outcome)
        })
    }
    .boxed()
}

fn coupon_valid_discounts_total<'a>(ctx: &'a ScenarioContext<'a>) -> ScenarioFuture<'a> {
    async move {
        let cart = prepare_cart(ctx).await?;
        let fixtures = &ctx.config.fixtures;

        let subtotal = cart.subtotal().await?;
        let expected = Money::from_cents(fixtures.product_subtotal_cents);
        ensure(subtotal.within(&expected, 1), || {
            format!("cart subtotal {} is not the fixture's {}", subtotal, expected)
        })?;

        let outcome = cart.apply_coupon(&fixtures.valid_coupon).await?;
        ensure(outcome == CouponOutcome::Applied, || {
            format!("coupon {} was not applied: {:?}", fixtures.valid_coupon, outcome)
        })?;

        // the total can lag the success indicator by a render
        let cart_ref = &cart;
        let discounted = poll_until(ctx.config.observation_policy(), move || async move {
            let total = cart_ref.total().await?;
            Ok((total < subtotal).then_some(total))
        })
        .await?;
        let total = discounted.ok_or_else(|| {
            E2eError::AssertionFailed(format!("total never dropped below subtotal {}", subtotal))
        })?;

        let percent = i64::from(fixtures.valid_coupon_percent);
        let quoted = Money::from_cents(subtotal.cents * (100 - percent) / 100);
        if !total.within(&quoted, 1) {
            warn!(%total, %quoted, "Discounted total differs from the coupon's nominal rate");
            ctx.note(format!("total {} differs from nominal {}", total, quoted));
        }
        info!(%subtotal, %total, "Coupon applied");
        Ok(())
    }
    .boxed()
}

fn coupon_expired_is_rejected<'a>(ctx: &'a ScenarioContext<'a>) -> ScenarioFuture<'a> {
    async move {
        let cart = prepare_cart(ctx).await?;
        let code = &ctx.config.fixtures.expired_coupon;

        let before = cart.total().await?;
        let outcome = cart.apply_coupon(code).await?;

        ensure(outcome != CouponOutcome::Applied, || {
            format!("expired coupon {} was applied", code)
        })?;
        ensure(!cart.is_coupon_success_visible().await?, || {
            "coupon success indicator is visible".to_string()
        })?;
        ensure(cart.is_coupon_error_visible().await?, || {
            format!("no error shown for expired coupon {}", code)
        })?;

        let after = cart.total().await?;
        ensure(after.within(&before, 1), || {
            format!("total changed from {} to {}", before, after)
        })
    }
    .boxed()
}

fn bitcoin_copy_is_idempotent<'a>(ctx: &'a ScenarioContext<'a>) -> ScenarioFuture<'a> {
    async move {
        let mut driver = ctx.driver();
        let result: E2eResult<()> = async {
            open_bitcoin_invoice(ctx, &mut driver).await?;
            for _ in 0..2 {
                driver.invoices().copy_address().await?;
                driver.invoices().copy_amount().await?;
            }
            Ok(())
        }
        .await;
        ctx.record_flow(&driver.report());
        result
    }
    .boxed()
}

fn bitcoin_settlement<'a>(ctx: &'a ScenarioContext<'a>) -> ScenarioFuture<'a> {
    async move {
        let mut driver = ctx.driver();
        let result: E2eResult<()> = async {
            let invoice = open_bitcoin_invoice(ctx, &mut driver).await?;
            info!(
                address = %invoice.address,
                amount = %invoice.amount.btc_text,
                "Waiting for an external wallet to pay the invoice"
            );
            driver.confirm_pending().await?;
            driver.await_detection().await?;
            let snapshot = driver.await_settlement().await?;

            let statuses = driver.report().statuses;
            ensure(is_status_subsequence(&statuses), || {
                format!("statuses out of order: {:?}", statuses)
            })?;
            if let Some(progress) = snapshot.progress {
                ensure(
                    is_valid_confirmation_progress(&progress) && progress.is_complete(),
                    || format!("settled with progress {}/{}", progress.current, progress.required),
                )?;
            }
            if snapshot.annotations.underpaid || snapshot.annotations.overpaid {
                ctx.note(format!("settled with annotations {:?}", snapshot.annotations));
            }
            ensure(is_consistent_denomination(&invoice), || {
                format!("{} does not match {} sats", invoice.amount.btc_text, invoice.amount.sats)
            })
        }
        .await;
        ctx.record_flow(&driver.report());
        result
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(name: Option<&str>, tag: Option<&str>) -> ScenarioFilter {
        ScenarioFilter {
            name: name.map(String::from),
            tag: tag.map(String::from),
        }
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = all().iter().map(|s| s.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), all().len());
    }

    #[test]
    fn default_run_skips_settlement() {
        let selected = select(&ScenarioFilter::default());
        assert_eq!(selected.len(), all().len() - 1);
        assert!(selected.iter().all(|s| s.name != "bitcoin_settlement"));
    }

    #[test]
    fn opt_in_scenarios_run_when_asked_for() {
        let by_tag = select(&filter(None, Some("settlement")));
        assert_eq!(by_tag.len(), 1);
        let by_name = select(&filter(Some("bitcoin_settlement"), None));
        assert_eq!(by_name[0].name, "bitcoin_settlement");
    }

    #[test]
    fn name_and_tag_must_both_match() {
        assert_eq!(select(&filter(Some("coupon_expired_is_rejected"), Some("coupon"))).len(), 1);
        assert!(select(&filter(Some("coupon_expired_is_rejected"), Some("bitcoin"))).is_empty());
        assert_eq!(select(&filter(None, Some("coupon"))).len(), 2);
    }

    #[test]
    fn shared_user_is_leased_only_when_configured() {
        let scenario = all().into_iter().find(|s| s.name == "coupon_valid_discounts_total").unwrap();
        let mut config = SuiteConfig::default();
        assert_eq!(scenario.leases(&config), [VALID_COUPON_FIXTURE]);

        config.fixtures.test_user = Some(crate::config::Credentials {
            email: "e2e@example.test".to_string(),
            password: "secret".to_string(),
        });
        assert_eq!(scenario.leases(&config), [VALID_COUPON_FIXTURE, TEST_USER_FIXTURE]);

        let account = all().into_iter().find(|s| s.name == "resend_activation_invalid_email").unwrap();
        assert!(account.leases(&config).is_empty());
    }
}
