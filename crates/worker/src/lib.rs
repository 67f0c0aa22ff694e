//! Motorlot Worker
//!
//! Background sweeps over the subscription and referral ledgers: past-due
//! detection and suspension, referral maturation and reward, entitlement
//! cache cleanup. Each sweep is an independent interval task; overlap is
//! tolerated by design, not prevented.

pub mod sweeps;

pub use sweeps::{spawn_cache_cleanup, PastDueSweep, ReferralMaturationSweep};
