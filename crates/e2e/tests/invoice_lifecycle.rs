//! Invoice generation, recovery, regeneration and copy acknowledgements

mod common;

use std::time::Duration;

use common::{bitcoin_checkout, invoice_changes, millis, secs, Change, ScriptedPage, ADDRESS};
use storefront_e2e::pages::{CheckoutPage, BITCOIN};
use storefront_e2e::properties::{
    countdown_elapsed_within, is_consistent_denomination, is_monotonic_countdown,
    is_well_formed_address, regeneration_resets_countdown, BitcoinNetwork,
};
use storefront_e2e::{E2eError, InvoiceManager, SuiteConfig};

/// A page already showing a rendered invoice
fn rendered_invoice(config: &SuiteConfig, id: &str) -> ScriptedPage {
    let page = ScriptedPage::new();
    for change in invoice_changes(config, id, secs(15 * 60)) {
        page.set(change);
    }
    page
}

#[tokio::test(start_paused = true)]
async fn selecting_bitcoin_renders_an_invoice() {
    let config = SuiteConfig::default();
    let page = bitcoin_checkout(&config, secs(2));

    let checkout = CheckoutPage::new(&page, &config);
    checkout.open().await.unwrap();
    assert_eq!(checkout.available_methods().await.unwrap(), vec!["Credit card", "Bitcoin"]);
    checkout.select_payment_method(BITCOIN).await.unwrap();

    let mut invoices = InvoiceManager::new(&page, &config);
    let invoice = invoices.generate_invoice(secs(15)).await.unwrap();

    assert_eq!(invoice.id, "inv-1");
    assert_eq!(invoice.address, ADDRESS);
    assert_eq!(invoice.amount.btc_text, "0.00123456 BTC");
    assert_eq!(invoice.amount.sats, 123_456);
    assert_eq!(invoice.exchange_rate.as_deref(), Some("1 BTC = $81,000.00"));
    assert!(invoice.payload.as_deref().unwrap().starts_with("bitcoin:"));
    assert!(invoice.expires_at.is_some());
    assert!(invoice.qr_visible);
    assert!(is_consistent_denomination(&invoice));
    assert!(is_well_formed_address(&invoice.address, BitcoinNetwork::Mainnet));
    assert_eq!(invoices.current(), Some(&invoice));
}

#[tokio::test(start_paused = true)]
async fn error_surface_fails_generation_and_retry_recovers() {
    let config = SuiteConfig::default();
    let s = &config.selectors;
    let page = ScriptedPage::new();
    page.show(&s.invoice_error, "Could not reach the payment processor")
        .show(&s.invoice_retry, "Try again");
    for change in invoice_changes(&config, "inv-2", secs(15 * 60)) {
        page.on_click(&s.invoice_retry, secs(1), change);
    }
    page.on_click(&s.invoice_retry, Duration::ZERO, Change::hide(&s.invoice_error));

    let mut invoices = InvoiceManager::new(&page, &config);
    match invoices.generate_invoice(secs(15)).await {
        Err(E2eError::InvoiceGeneration { message }) => {
            assert_eq!(message, "Could not reach the payment processor");
        }
        other => panic!("expected an invoice generation error, got {:?}", other),
    }
    assert_eq!(
        invoices.last_error_message(),
        Some("Could not reach the payment processor")
    );
    assert!(invoices.current().is_none());

    let invoice = invoices.retry_after_error().await.unwrap();
    assert_eq!(invoice.id, "inv-2");
    assert_eq!(invoices.last_error_message(), None);
    assert_eq!(page.click_count(&s.invoice_retry), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_needs_a_prior_error() {
    let config = SuiteConfig::default();
    let page = ScriptedPage::new();
    let mut invoices = InvoiceManager::new(&page, &config);

    assert!(matches!(
        invoices.retry_after_error().await,
        Err(E2eError::RetryUnavailable)
    ));

    // a timeout is not an error the retry button answers
    match invoices.generate_invoice(secs(3)).await {
        Err(E2eError::InvoiceGenerationTimeout { waited }) => assert_eq!(waited, secs(3)),
        other => panic!("expected a generation timeout, got {:?}", other),
    }
    assert!(matches!(
        invoices.retry_after_error().await,
        Err(E2eError::RetryUnavailable)
    ));
}

#[tokio::test(start_paused = true)]
async fn countdown_only_moves_down() {
    let config = SuiteConfig::default();
    let page = rendered_invoice(&config, "inv-1");
    let invoices = InvoiceManager::new(&page, &config);

    let before = invoices.read_countdown().await.unwrap();
    tokio::time::sleep(secs(3)).await;
    let after = invoices.read_countdown().await.unwrap();

    assert!(is_monotonic_countdown(&before, &after));
    assert!(countdown_elapsed_within(&before, &after, secs(2), secs(5)));
}

#[tokio::test(start_paused = true)]
async fn regeneration_replaces_the_invoice_and_resets_the_clock() {
    let config = SuiteConfig::default();
    let s = &config.selectors;
    let page = rendered_invoice(&config, "inv-1");
    for change in invoice_changes(&config, "inv-2", secs(15 * 60)) {
        page.on_click(&s.refresh_invoice, millis(1500), change);
    }

    let mut invoices = InvoiceManager::new(&page, &config);
    invoices.generate_invoice(secs(15)).await.unwrap();
    tokio::time::sleep(secs(60)).await;
    let before = invoices.read_countdown().await.unwrap();
    assert!(before.remaining <= secs(14 * 60));

    let regenerated = invoices.regenerate_invoice(secs(15)).await.unwrap();
    assert_eq!(regenerated.id, "inv-2");
    assert_eq!(invoices.current().map(|i| i.id.as_str()), Some("inv-2"));

    let after = invoices.read_countdown().await.unwrap();
    assert!(after.remaining > before.remaining);
    assert!(regeneration_resets_countdown(
        &before,
        &after,
        config.timeouts.countdown_tolerance()
    ));
}

#[tokio::test(start_paused = true)]
async fn regeneration_with_a_shorter_clock_is_rejected() {
    let config = SuiteConfig::default();
    let s = &config.selectors;
    let page = rendered_invoice(&config, "inv-1");
    page.on_click(
        &s.refresh_invoice,
        secs(1),
        Change::attr(&s.invoice, &s.invoice_id_attribute, "inv-3"),
    )
    .on_click(&s.refresh_invoice, secs(1), Change::countdown(&s.countdown, secs(10 * 60)));

    let mut invoices = InvoiceManager::new(&page, &config);
    invoices.generate_invoice(secs(15)).await.unwrap();
    tokio::time::sleep(secs(60)).await;

    match invoices.regenerate_invoice(secs(15)).await {
        Err(E2eError::CountdownNotReset { before, after }) => {
            assert!(after < before);
            assert!(after <= secs(10 * 60));
        }
        other => panic!("expected the countdown check to fail, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn copy_is_acknowledged_every_time() {
    let config = SuiteConfig::default();
    let s = &config.selectors;
    let page = rendered_invoice(&config, "inv-1");
    page.on_click(&s.copy_address, millis(300), Change::show(&s.copy_address, "Address copied!"))
        .on_click(&s.copy_address, secs(2), Change::show(&s.copy_address, "Copy address"))
        .on_click(&s.copy_amount, millis(300), Change::show(&s.copy_amount, "Amount Copied"))
        .on_click(&s.copy_amount, secs(2), Change::show(&s.copy_amount, "Copy amount"));

    let invoices = InvoiceManager::new(&page, &config);
    for _ in 0..2 {
        invoices.copy_address().await.unwrap();
        invoices.copy_amount().await.unwrap();
    }

    assert_eq!(page.click_count(&s.copy_address), 2);
    assert_eq!(page.click_count(&s.copy_amount), 2);
}

#[tokio::test(start_paused = true)]
async fn stale_acknowledgement_is_not_counted() {
    let config = SuiteConfig::default();
    let s = &config.selectors;
    let page = rendered_invoice(&config, "inv-1");
    page.show(&s.copy_address, "Address copied")
        .after(secs(1), Change::show(&s.copy_address, "Copy address"));

    let invoices = InvoiceManager::new(&page, &config);
    // the label reverts but nothing acknowledges the click
    match invoices.copy_address().await {
        Err(E2eError::CopyNotAcknowledged { target }) => assert_eq!(target, "address"),
        other => panic!("expected a missing acknowledgement, got {:?}", other),
    }
    assert_eq!(page.click_count(&s.copy_address), 1);
}

#[tokio::test(start_paused = true)]
async fn label_stuck_on_copied_is_reported() {
    let config = SuiteConfig::default();
    let s = &config.selectors;
    let page = rendered_invoice(&config, "inv-1");
    page.show(&s.copy_address, "Address copied");

    let invoices = InvoiceManager::new(&page, &config);
    for _ in 0..2 {
        match invoices.copy_address().await {
            Err(E2eError::CopyStuck { target }) => assert_eq!(target, "address"),
            other => panic!("expected a stuck copy label, got {:?}", other),
        }
    }
    assert_eq!(page.click_count(&s.copy_address), 0);
}

#[tokio::test(start_paused = true)]
async fn silent_copy_button_is_reported() {
    let config = SuiteConfig::default();
    let page = rendered_invoice(&config, "inv-1");
    let invoices = InvoiceManager::new(&page, &config);

    match invoices.copy_address().await {
        Err(E2eError::CopyNotAcknowledged { target }) => assert_eq!(target, "address"),
        other => panic!("expected a missing acknowledgement, got {:?}", other),
    }
}
