//! Typed action map
//!
//! Every privileged action maps to exactly one plan-schema target: a
//! numeric quota field, a boolean capability field, or a dynamic feature
//! key. The map is built once at gate construction and checked for
//! completeness against the plan schema, so an unmapped field fails fast
//! instead of silently falling through.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use motorlot_shared::{CapabilityField, PlatformError, PlatformResult, QuotaField};

/// Privileged actions callers may ask the gate about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateSeller,
    AddVehicle,
    CreateCampaign,
    RecordApiCall,
    UploadDocument,
    GenerateAiDescription,
    UseCustomDomain,
    ViewAdvancedReports,
    SendWhatsappMessage,
    ContactPrioritySupport,
    CreatePromotion,
    PublishBanner,
}

impl Action {
    pub const ALL: [Action; 12] = [
        Action::CreateSeller,
        Action::AddVehicle,
        Action::CreateCampaign,
        Action::RecordApiCall,
        Action::UploadDocument,
        Action::GenerateAiDescription,
        Action::UseCustomDomain,
        Action::ViewAdvancedReports,
        Action::SendWhatsappMessage,
        Action::ContactPrioritySupport,
        Action::CreatePromotion,
        Action::PublishBanner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateSeller => "create_seller",
            Self::AddVehicle => "add_vehicle",
            Self::CreateCampaign => "create_campaign",
            Self::RecordApiCall => "record_api_call",
            Self::UploadDocument => "upload_document",
            Self::GenerateAiDescription => "generate_ai_description",
            Self::UseCustomDomain => "use_custom_domain",
            Self::ViewAdvancedReports => "view_advanced_reports",
            Self::SendWhatsappMessage => "send_whatsapp_message",
            Self::ContactPrioritySupport => "contact_priority_support",
            Self::CreatePromotion => "create_promotion",
            Self::PublishBanner => "publish_banner",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .find(|a| a.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown action: {}", s))
    }
}

/// What an action is gated on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTarget {
    Quota(QuotaField),
    Capability(CapabilityField),
    Dynamic(&'static str),
}

fn target_of(action: Action) -> ActionTarget {
    match action {
        Action::CreateSeller => ActionTarget::Quota(QuotaField::MaxSellers),
        Action::AddVehicle => ActionTarget::Quota(QuotaField::MaxVehicles),
        Action::CreateCampaign => ActionTarget::Quota(QuotaField::MaxCampaigns),
        Action::RecordApiCall => ActionTarget::Quota(QuotaField::MaxApiCallsMonth),
        Action::UploadDocument => ActionTarget::Quota(QuotaField::MaxStorageMb),
        Action::GenerateAiDescription => ActionTarget::Capability(CapabilityField::AiDescriptions),
        Action::UseCustomDomain => ActionTarget::Capability(CapabilityField::CustomDomain),
        Action::ViewAdvancedReports => ActionTarget::Capability(CapabilityField::AdvancedReports),
        Action::SendWhatsappMessage => {
            ActionTarget::Capability(CapabilityField::WhatsappIntegration)
        }
        Action::ContactPrioritySupport => {
            ActionTarget::Capability(CapabilityField::PrioritySupport)
        }
        Action::CreatePromotion => ActionTarget::Dynamic("monthly_promotions"),
        Action::PublishBanner => ActionTarget::Dynamic("banner_slots"),
    }
}

/// Closed action -> target mapping, validated for completeness against the
/// plan schema at construction.
#[derive(Debug, Clone)]
pub struct ActionMap {
    targets: HashMap<Action, ActionTarget>,
}

impl ActionMap {
    pub fn new() -> PlatformResult<Self> {
        let targets: HashMap<Action, ActionTarget> =
            Action::ALL.iter().map(|a| (*a, target_of(*a))).collect();

        let quotas: HashSet<QuotaField> = targets
            .values()
            .filter_map(|t| match t {
                ActionTarget::Quota(q) => Some(*q),
                _ => None,
            })
            .collect();
        let capabilities: HashSet<CapabilityField> = targets
            .values()
            .filter_map(|t| match t {
                ActionTarget::Capability(c) => Some(*c),
                _ => None,
            })
            .collect();

        for field in QuotaField::ALL {
            if !quotas.contains(&field) {
                return Err(PlatformError::Config(format!(
                    "quota field {} has no mapped action",
                    field
                )));
            }
        }
        for field in CapabilityField::ALL {
            if !capabilities.contains(&field) {
                return Err(PlatformError::Config(format!(
                    "capability field {} has no mapped action",
                    field
                )));
            }
        }

        Ok(Self { targets })
    }

    pub fn target(&self, action: Action) -> ActionTarget {
        // The map covers Action::ALL by construction.
        self.targets
            .get(&action)
            .copied()
            .unwrap_or_else(|| target_of(action))
    }
}
