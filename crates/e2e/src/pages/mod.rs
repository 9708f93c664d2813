//! Page objects: selectors and user-facing actions per storefront page

pub mod account;
pub mod cart;
pub mod checkout;

pub use account::{LoginPage, ResendActivationPage, ResendOutcome};
pub use cart::{CartPage, CouponOutcome, Money};
pub use checkout::{CheckoutPage, BITCOIN};

use std::time::Duration;

use crate::error::{E2eError, E2eResult};
use crate::page::Page;
use crate::poll::{poll_until, PollPolicy};

/// Wait until `selector` is visible or fail with `ObservationTimeout` naming `surface`
pub(crate) async fn wait_visible(
    page: &dyn Page,
    selector: &str,
    interval: Duration,
    timeout: Duration,
    surface: &str,
) -> E2eResult<()> {
    let policy = PollPolicy::new(interval, timeout);
    let shown = poll_until(policy, move || async move {
        Ok(page.is_visible(selector).await?.then_some(()))
    })
    .await?;

    shown.ok_or_else(|| E2eError::ObservationTimeout {
        surface: surface.to_string(),
        waited: timeout,
    })
}
