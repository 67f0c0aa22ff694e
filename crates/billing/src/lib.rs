//! Motorlot Billing
//!
//! Subscription lifecycle and reward plumbing: the authoritative
//! Subscription Ledger, the Subscription State Machine with its cascade
//! side effects, normalized Payment Gateway event handling, the Reward
//! Credit Ledger with the referral program feeding it, and the append-only
//! billing event log.

pub mod cascade;
pub mod error;
pub mod events;
pub mod gateway;
pub mod ledger;
pub mod notifications;
pub mod referrals;
pub mod reward_config;
pub mod rewards;
pub mod state_machine;
pub mod suspension;

pub use cascade::{BatchOutcome, ItemResult};
pub use error::{BillingError, BillingResult};
pub use events::{ActorType, BillingEventLogger, BillingEventType};
pub use gateway::{GatewayEvent, GatewayEventHandler};
pub use ledger::SubscriptionLedger;
pub use notifications::{
    NoopDispatcher, Notification, NotificationDispatcher, RecordingDispatcher,
};
pub use referrals::{matured, ReferralProgram};
pub use reward_config::{RewardConfig, RewardConfigTable};
pub use rewards::RewardCreditLedger;
pub use state_machine::{transition_allowed, SubscriptionStateMachine, TransitionOutcome};
pub use suspension::{DowngradeImpact, SellerSuspensionService, SellerToSuspend};
