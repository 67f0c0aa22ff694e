//! Motorlot Entitlements
//!
//! Resolves what a tenant can do right now and answers entitlement checks
//! against live usage. Components, leaves first: the Plan Registry and
//! Dynamic Feature Catalog describe entitlement bundles; the Entitlement
//! Resolver merges them under the tenant's subscription standing, with a
//! TTL cache; the Usage Counters read live consumption; the Entitlement
//! Gate applies the decision rule.

pub mod action;
pub mod cache;
pub mod features;
pub mod gate;
pub mod plan;
pub mod resolver;
pub mod usage;

pub use action::{Action, ActionMap, ActionTarget};
pub use cache::{EntitlementCache, MemoryEntitlementCache};
pub use features::{DynamicFeatureCatalog, NewFeature};
pub use gate::{reasons, Decision, EntitlementGate, QuotaUsage};
pub use plan::{NewPlan, PlanRegistry, PlanUpdate};
pub use resolver::{EffectiveEntitlementSet, EntitlementResolver, MembershipStanding};
pub use usage::{ResourceKind, UsageCounters};
