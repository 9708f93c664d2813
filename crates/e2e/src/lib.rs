//! Storefront E2E Test Framework
//!
//! This crate provides a Rust-controlled E2E suite for a storefront that:
//! - Optionally launches the storefront and waits for it to be healthy
//! - Drives Playwright through a long-lived JSON-lines bridge, one browser
//!   session per scenario
//! - Observes the Bitcoin payment flow (invoice, countdown, status,
//!   confirmations) through bounded polling
//! - Checks payment invariants and writes diagnostic reports on failure
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    E2E Test Runner (Rust)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── start_storefront() -> StorefrontHandle               │
//! │    ├── SessionFactory::open() -> Box<dyn Page>              │
//! │    ├── FixtureRegistry::acquire(names) -> FixtureLease      │
//! │    └── run_scenario(Scenario) -> ScenarioResult             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario                                                   │
//! │    └── PaymentFlowDriver                                    │
//! │          ├── CheckoutPage      (payment method)             │
//! │          ├── InvoiceManager    (invoice, countdown, copy)   │
//! │          └── StatusObserver    (status, confirmations)      │
//! │                 └── poll_until(policy, check)               │
//! │    properties::* invariants                                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod fixtures;
pub mod flow;
pub mod invoice;
pub mod observer;
pub mod page;
pub mod pages;
pub mod playwright;
pub mod poll;
pub mod properties;
pub mod runner;
pub mod scenarios;
pub mod status;
pub mod storefront;

pub use config::SuiteConfig;
pub use error::{E2eError, E2eResult};
pub use flow::{DriverState, FlowReport, PaymentFlowDriver};
pub use invoice::{Countdown, Invoice, InvoiceManager};
pub use observer::StatusObserver;
pub use page::Page;
pub use runner::TestRunner;
pub use status::{ConfirmationProgress, PaymentStatus, StatusSnapshot};
