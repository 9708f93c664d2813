//! Invariants every payment scenario checks
//!
//! Predicates take one snapshot or two consecutive observations and return a
//! plain `bool`; [`ensure`] turns a failed predicate into an assertion error
//! with context.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};
use crate::invoice::{Countdown, Invoice, SATS_PER_BTC};
use crate::status::{ConfirmationProgress, PaymentStatus};

/// Network the storefront issues invoices on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitcoinNetwork {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

/// Fail with `AssertionFailed` unless `holds`
pub fn ensure(holds: bool, message: impl FnOnce() -> String) -> E2eResult<()> {
    if holds {
        Ok(())
    } else {
        Err(E2eError::AssertionFailed(message()))
    }
}

/// Remaining time never grows between two readings of the same invoice
pub fn is_monotonic_countdown(before: &Countdown, after: &Countdown) -> bool {
    after.observed_at >= before.observed_at && after.remaining <= before.remaining
}

/// A regenerated invoice's clock is at least the old reading minus `tolerance`
pub fn regeneration_resets_countdown(before: &Countdown, after: &Countdown, tolerance: Duration) -> bool {
    after.remaining + tolerance >= before.remaining && !after.remaining.is_zero()
}

/// The drop between two readings lies in `[min_drop, max_drop]`
pub fn countdown_elapsed_within(
    before: &Countdown,
    after: &Countdown,
    min_drop: Duration,
    max_drop: Duration,
) -> bool {
    match before.remaining.checked_sub(after.remaining) {
        Some(drop) => drop >= min_drop && drop <= max_drop,
        None => false,
    }
}

pub fn is_valid_confirmation_progress(progress: &ConfirmationProgress) -> bool {
    progress.required > 0 && progress.current <= progress.required
}

/// `sats == round(btc * 1e8)`, allowing one satoshi of display rounding
pub fn is_consistent_denomination(invoice: &Invoice) -> bool {
    let expected = (invoice.amount.btc * SATS_PER_BTC as f64).round();
    (expected - invoice.amount.sats as f64).abs() <= 1.0
}

/// Observed statuses never move backwards along the happy path.
///
/// Annotations are ignored and repeated readings are allowed. A timeout may
/// only appear last.
pub fn is_status_subsequence(statuses: &[PaymentStatus]) -> bool {
    let mut last_rank = 0u8;
    for (i, status) in statuses.iter().enumerate() {
        if *status == PaymentStatus::Timeout {
            return statuses[i + 1..].iter().all(|s| *s == PaymentStatus::Timeout);
        }
        if let Some(rank) = status.happy_path_rank() {
            if rank < last_rank {
                return false;
            }
            last_rank = rank;
        }
    }
    true
}

/// `<digits>.<digits> BTC`
pub fn is_btc_amount_text(text: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\d+\.\d+ BTC").expect("btc amount pattern is valid"))
        .is_match(text)
}

/// Address shape check: base58 legacy/P2SH or bech32 segwit for the network
pub fn is_well_formed_address(address: &str, network: BitcoinNetwork) -> bool {
    static BASE58: OnceLock<Regex> = OnceLock::new();
    static BECH32: OnceLock<Regex> = OnceLock::new();

    let base58 = BASE58.get_or_init(|| {
        Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{25,34}$").expect("base58 pattern is valid")
    });
    let bech32 = BECH32.get_or_init(|| {
        Regex::new(r"^[a-z]{2,4}1[qpzry9x8gf2tvdw0s3jn54khce6mua7l]{39,59}$")
            .expect("bech32 pattern is valid")
    });

    let (legacy_prefixes, hrp): (&[char], &str) = match network {
        BitcoinNetwork::Mainnet => (&['1', '3'][..], "bc1"),
        BitcoinNetwork::Testnet => (&['m', 'n', '2'][..], "tb1"),
        BitcoinNetwork::Regtest => (&['m', 'n', '2'][..], "bcrt1"),
    };

    if address.starts_with(hrp) {
        return bech32.is_match(address);
    }
    // bech32 addresses are single-case, uppercase is valid for QR density
    if address.starts_with(&hrp.to_uppercase()) {
        return bech32.is_match(&address.to_lowercase());
    }
    address.starts_with(legacy_prefixes) && base58.is_match(address)
}
