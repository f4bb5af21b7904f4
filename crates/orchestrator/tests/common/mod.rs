//! Shared fixtures: an ads cartridge with campaigns, risk inputs, undo
//! recipes, and programmable failures.

use arbiter_core::envelope::ResolvedEntity;
use arbiter_core::execute::{ExecuteResult, PartialFailure, UndoRecipe};
use arbiter_core::governance::ApprovalLevel;
use arbiter_core::risk::{
    BaseRisk, Exposure, Reversibility, RiskCategory, RiskInput, Sensitivity,
};
use async_trait::async_trait;
use cartridge::{
    ActionSpec, Cartridge, CartridgeContext, CartridgeError, CartridgeManifest, EntityResolution,
    EntityResolver, EntitySearcher, HaltTarget, HealthState, HealthStatus,
};
use dashmap::DashMap;
use guardrail::GuardrailSpec;
use policy::{Operator, Policy, PolicyEffect, Rule};
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// A campaign the fixture cartridge manages.
#[derive(Debug, Clone)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub active: bool,
}

/// Fixture ads cartridge.
pub struct AdsCartridge {
    manifest: CartridgeManifest,
    pub campaigns: DashMap<String, Campaign>,
    /// When set, the next `fail_times` executions fail with this error text.
    pub fail_error: Mutex<Option<String>>,
    pub fail_times: AtomicU32,
    pub execute_calls: AtomicU32,
    pub guardrails: Mutex<GuardrailSpec>,
}

fn object_schema(required: &[&str]) -> JsonValue {
    json!({
        "type": "object",
        "required": required,
        "properties": {
            "campaignId": {"type": "string"},
            "dailyBudget": {"type": "number"}
        }
    })
}

impl AdsCartridge {
    pub fn new() -> Self {
        let manifest = CartridgeManifest {
            id: "ads-spend".into(),
            name: "Ads Spend".into(),
            version: "1.0.0".into(),
            actions: vec![
                ActionSpec {
                    action_type: "ads.campaign.pause".into(),
                    name: "Pause campaign".into(),
                    description: "Pause a running campaign".into(),
                    parameters_schema: object_schema(&["campaignId"]),
                    base_risk_category: BaseRisk::Low,
                    reversible: true,
                },
                ActionSpec {
                    action_type: "ads.campaign.resume".into(),
                    name: "Resume campaign".into(),
                    description: "Resume a paused campaign".into(),
                    parameters_schema: object_schema(&["campaignId"]),
                    base_risk_category: BaseRisk::Low,
                    reversible: true,
                },
                ActionSpec {
                    action_type: "ads.budget.set".into(),
                    name: "Set daily budget".into(),
                    description: "Replace a campaign's daily budget".into(),
                    parameters_schema: object_schema(&["campaignId", "dailyBudget"]),
                    base_risk_category: BaseRisk::High,
                    reversible: false,
                },
            ],
            required_connections: vec!["ads-api".into()],
        };
        let campaigns = DashMap::new();
        campaigns.insert(
            "camp_123".to_string(),
            Campaign { id: "camp_123".into(), name: "Spring Sale".into(), active: true },
        );
        campaigns.insert(
            "camp_456".to_string(),
            Campaign { id: "camp_456".into(), name: "Summer Sale".into(), active: true },
        );
        Self {
            manifest,
            campaigns,
            fail_error: Mutex::new(None),
            fail_times: AtomicU32::new(0),
            execute_calls: AtomicU32::new(0),
            guardrails: Mutex::new(GuardrailSpec::default()),
        }
    }

    /// Make the next `times` executions fail with `error`.
    pub fn fail_next(&self, times: u32, error: &str) {
        *self.fail_error.lock().unwrap() = Some(error.to_string());
        self.fail_times.store(times, Ordering::SeqCst);
    }

    fn take_failure(&self) -> Option<String> {
        if self.fail_times.load(Ordering::SeqCst) == 0 {
            return None;
        }
        self.fail_times.fetch_sub(1, Ordering::SeqCst);
        self.fail_error.lock().unwrap().clone()
    }

    fn campaign_param(parameters: &JsonValue) -> Result<String, CartridgeError> {
        parameters
            .get("campaignId")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| CartridgeError::InvalidParameters("campaignId missing".into()))
    }
}

#[async_trait]
impl Cartridge for AdsCartridge {
    fn manifest(&self) -> &CartridgeManifest {
        &self.manifest
    }

    async fn enrich_context(
        &self,
        _action_type: &str,
        parameters: &JsonValue,
        ctx: &CartridgeContext,
    ) -> Result<CartridgeContext, CartridgeError> {
        let mut enriched = ctx.clone();
        if let Ok(id) = Self::campaign_param(parameters) {
            if let Some(c) = self.campaigns.get(&id) {
                enriched.metadata.insert("campaign_name".into(), json!(c.name));
                enriched.metadata.insert("campaign_active".into(), json!(c.active));
            }
        }
        Ok(enriched)
    }

    async fn risk_input(
        &self,
        action_type: &str,
        parameters: &JsonValue,
        _ctx: &CartridgeContext,
    ) -> Result<RiskInput, CartridgeError> {
        Ok(match action_type {
            // Budget writes carry the bare high base risk; the dollar
            // exposure is already bounded by the caller's spend limits.
            "ads.budget.set" => RiskInput {
                base_risk: BaseRisk::High,
                exposure: Exposure { dollars_at_risk: 0.0, blast_radius: 0 },
                reversibility: Reversibility::Full,
                sensitivity: Sensitivity::default(),
            },
            _ => RiskInput {
                base_risk: BaseRisk::Low,
                exposure: Exposure { dollars_at_risk: 10.0, blast_radius: 1 },
                reversibility: Reversibility::Full,
                sensitivity: Sensitivity::default(),
            },
        })
    }

    async fn execute(
        &self,
        action_type: &str,
        parameters: &JsonValue,
        _ctx: &CartridgeContext,
    ) -> Result<ExecuteResult, CartridgeError> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.take_failure() {
            return Ok(ExecuteResult {
                success: false,
                summary: "ads API call failed".into(),
                external_refs: vec![],
                rollback_available: false,
                partial_failures: vec![PartialFailure {
                    code: "ads-api".into(),
                    error,
                    entity_ref: None,
                }],
                duration_ms: 3,
                undo_recipe: None,
            });
        }
        let campaign_id = Self::campaign_param(parameters)?;
        let now = arbiter_core::ids::now_ms();
        let (summary, undo) = match action_type {
            "ads.campaign.pause" => {
                if let Some(mut c) = self.campaigns.get_mut(&campaign_id) {
                    c.active = false;
                }
                (
                    format!("paused {}", campaign_id),
                    Some(UndoRecipe {
                        original_action_id: String::new(),
                        original_envelope_id: String::new(),
                        reverse_action_type: "ads.campaign.resume".into(),
                        reverse_parameters: json!({"campaignId": campaign_id}),
                        undo_expires_at_ms: now + 3_600_000,
                        undo_risk_category: RiskCategory::Low,
                        undo_approval_required: ApprovalLevel::None,
                    }),
                )
            }
            "ads.campaign.resume" => {
                if let Some(mut c) = self.campaigns.get_mut(&campaign_id) {
                    c.active = true;
                }
                (
                    format!("resumed {}", campaign_id),
                    Some(UndoRecipe {
                        original_action_id: String::new(),
                        original_envelope_id: String::new(),
                        reverse_action_type: "ads.campaign.pause".into(),
                        reverse_parameters: json!({"campaignId": campaign_id}),
                        undo_expires_at_ms: now + 3_600_000,
                        undo_risk_category: RiskCategory::Low,
                        undo_approval_required: ApprovalLevel::None,
                    }),
                )
            }
            "ads.budget.set" => (format!("budget set on {}", campaign_id), None),
            other => return Err(CartridgeError::UnknownAction(other.to_string())),
        };
        Ok(ExecuteResult {
            success: true,
            summary,
            external_refs: vec![format!("ads:{}", campaign_id)],
            rollback_available: undo.is_some(),
            partial_failures: vec![],
            duration_ms: 5,
            undo_recipe: undo,
        })
    }

    fn guardrails(&self) -> GuardrailSpec {
        self.guardrails.lock().unwrap().clone()
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus {
            status: HealthState::Connected,
            latency_ms: 2,
            error: None,
            capabilities: vec!["resolve".into(), "search".into()],
        }
    }

    fn entity_resolver(&self) -> Option<&dyn EntityResolver> {
        Some(self)
    }

    fn entity_searcher(&self) -> Option<&dyn EntitySearcher> {
        Some(self)
    }
}

#[async_trait]
impl EntityResolver for AdsCartridge {
    async fn resolve_entity(
        &self,
        input_ref: &str,
        entity_type: &str,
    ) -> Result<EntityResolution, CartridgeError> {
        if entity_type != "campaign" {
            return Ok(EntityResolution::NotFound {
                explanation: format!("unknown entity type '{}'", entity_type),
            });
        }
        if let Some(c) = self.campaigns.get(input_ref) {
            return Ok(EntityResolution::Resolved(ResolvedEntity {
                entity_type: "campaign".into(),
                input_ref: input_ref.into(),
                resolved_id: c.id.clone(),
                display_name: c.name.clone(),
                confidence: 1.0,
            }));
        }
        let matches: Vec<ResolvedEntity> = self
            .campaigns
            .iter()
            .filter(|c| c.name.to_lowercase().contains(&input_ref.to_lowercase()))
            .map(|c| ResolvedEntity {
                entity_type: "campaign".into(),
                input_ref: input_ref.into(),
                resolved_id: c.id.clone(),
                display_name: c.name.clone(),
                confidence: 0.8,
            })
            .collect();
        match matches.len() {
            0 => Ok(EntityResolution::NotFound {
                explanation: format!("no campaign matches '{}'", input_ref),
            }),
            1 => Ok(EntityResolution::Resolved(matches.into_iter().next().unwrap())),
            _ => Ok(EntityResolution::Ambiguous {
                question: format!("'{}' matches several campaigns; which one?", input_ref),
                alternatives: matches,
            }),
        }
    }
}

#[async_trait]
impl EntitySearcher for AdsCartridge {
    async fn search_active_entities(
        &self,
        _organization_id: &str,
    ) -> Result<Vec<HaltTarget>, CartridgeError> {
        let mut targets: Vec<HaltTarget> = self
            .campaigns
            .iter()
            .filter(|c| c.active)
            .map(|c| HaltTarget {
                entity_id: c.id.clone(),
                action_type: "ads.campaign.pause".into(),
                parameters: json!({"campaignId": c.id}),
            })
            .collect();
        targets.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(targets)
    }
}

/// Seeded virtual-clock epoch used across the lifecycle tests.
pub const T0: u64 = 1_700_000_000_000;

/// Assemble an in-memory broker with the ads cartridge registered and the
/// baseline allow policy seeded.
pub async fn broker_with(
    config: orchestrator::BrokerConfig,
    clock: std::sync::Arc<dyn arbiter_core::clock::Clock>,
) -> (std::sync::Arc<orchestrator::Broker>, std::sync::Arc<AdsCartridge>) {
    let ads = std::sync::Arc::new(AdsCartridge::new());
    let registry = std::sync::Arc::new(cartridge::CartridgeRegistry::new());
    registry.register(ads.clone()).unwrap();
    let broker = orchestrator::BrokerBuilder::new(config).registry(registry).clock(clock).build();
    broker.upsert_policy(allow_ads_policy()).await.unwrap();
    (broker, ads)
}

/// The baseline policy every test seeds: ads actions are allowed.
pub fn allow_ads_policy() -> Policy {
    Policy {
        id: "allow-ads".into(),
        priority: 10,
        active: true,
        cartridge_id: Some("ads-spend".into()),
        organization_id: None,
        rule: Rule::Leaf {
            field: "action_type".into(),
            operator: Operator::Prefix,
            value: json!("ads."),
        },
        effect: PolicyEffect::Allow,
        approval_requirement: None,
        transform: None,
        description: Some("ads actions are governed by tolerance alone".into()),
    }
}
