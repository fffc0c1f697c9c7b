//! Shared data structures for the incident triage pipeline.
//!
//! This module defines the core types flowing through the service:
//! - Canonical `AlertEvent` produced by the source normalizers
//! - `IncidentStatus` and the lifecycle transition rules
//! - The strict `TriageReportPayload` schema expected from the LLM
//! - Auth principals and roles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

// ============================================================================
// Alert events
// ============================================================================

/// Origin of an alert payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSource {
    Cloudwatch,
    Alertmanager,
}

impl std::fmt::Display for AlertSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSource::Cloudwatch => write!(f, "cloudwatch"),
            AlertSource::Alertmanager => write!(f, "alertmanager"),
        }
    }
}

/// Canonical alert event, immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub source: AlertSource,
    pub external_id: String,
    pub title: String,
    pub severity: String,
    pub state: String,
    pub correlation_id: Option<String>,
    pub fired_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Sorted label map; ordering feeds the deterministic dedup key.
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub resource_refs: BTreeMap<String, String>,
    pub raw_payload: Value,
}

// ============================================================================
// Incident lifecycle
// ============================================================================

/// Incident lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Triaging,
    AwaitingHumanReview,
    Triaged,
    Mitigated,
    Resolved,
    PostmortemRequired,
    Failed,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Triaging => "triaging",
            Self::AwaitingHumanReview => "awaiting_human_review",
            Self::Triaged => "triaged",
            Self::Mitigated => "mitigated",
            Self::Resolved => "resolved",
            Self::PostmortemRequired => "postmortem_required",
            Self::Failed => "failed",
        }
    }

    /// Statuses from which a new alert on the same dedup key reopens the
    /// incident to `open`.
    pub fn reopens_on_new_alert(&self) -> bool {
        matches!(
            self,
            Self::Failed
                | Self::AwaitingHumanReview
                | Self::Triaged
                | Self::Mitigated
                | Self::Resolved
                | Self::PostmortemRequired
        )
    }

    /// Whether a human-driven status transition is legal. The status
    /// endpoint only accepts `mitigated`, `resolved`, and
    /// `postmortem_required` targets; review decisions move
    /// `awaiting_human_review` and the runner owns the rest.
    pub fn allows_manual_transition(&self, target: IncidentStatus) -> bool {
        matches!(
            (self, target),
            (Self::Triaged, Self::Mitigated)
                | (Self::Triaged, Self::Resolved)
                | (Self::Triaged, Self::PostmortemRequired)
                | (Self::Mitigated, Self::Resolved)
                | (Self::Mitigated, Self::PostmortemRequired)
                | (Self::Resolved, Self::PostmortemRequired)
        )
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IncidentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "triaging" => Ok(Self::Triaging),
            "awaiting_human_review" => Ok(Self::AwaitingHumanReview),
            "triaged" => Ok(Self::Triaged),
            "mitigated" => Ok(Self::Mitigated),
            "resolved" => Ok(Self::Resolved),
            "postmortem_required" => Ok(Self::PostmortemRequired),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown incident status: {other}")),
        }
    }
}

/// Human review decision on a triage report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecisionKind {
    Approve,
    Reject,
}

impl ReviewDecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

// ============================================================================
// Triage report schema
// ============================================================================

/// Citation binding a statement to an artifact in the evidence pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub artifact_id: String,
    pub pointer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub claim_id: String,
    pub text: String,
    pub evidence_refs: Vec<EvidenceRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub rank: i64,
    pub title: String,
    pub explanation: String,
    pub confidence: f64,
    pub evidence_refs: Vec<EvidenceRef>,
    #[serde(default)]
    pub disconfirming_signals: Vec<String>,
    #[serde(default)]
    pub missing_data: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextCheck {
    pub check_id: String,
    pub step: String,
    #[serde(default)]
    pub command_or_query: Option<String>,
    #[serde(default)]
    pub evidence_refs: Vec<EvidenceRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mitigation {
    pub mitigation_id: String,
    pub action: String,
    pub risk: String,
    #[serde(default)]
    pub evidence_refs: Vec<EvidenceRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Fact,
    Hypothesis,
    NextCheck,
    Mitigation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: String,
    #[serde(rename = "type")]
    pub claim_type: ClaimType,
    pub text: String,
    #[serde(default)]
    pub evidence_refs: Vec<EvidenceRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    Normal,
    InsufficientEvidence,
}

/// Where the report came from and how generation went.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationMetadata {
    #[serde(default)]
    pub llm_provider: String,
    #[serde(default)]
    pub llm_endpoint_used: Option<String>,
    #[serde(default)]
    pub endpoint_failover_count: Option<i64>,
}

/// Strict report schema expected from the LLM (and from the fallback
/// synthesizer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageReportPayload {
    pub summary: String,
    pub mode: ReportMode,
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub hypotheses: Vec<Hypothesis>,
    #[serde(default)]
    pub next_checks: Vec<NextCheck>,
    #[serde(default)]
    pub mitigations: Vec<Mitigation>,
    #[serde(default)]
    pub claims: Vec<Claim>,
    #[serde(default)]
    pub uncertainty_note: Option<String>,
    #[serde(default)]
    pub generation_metadata: GenerationMetadata,
}

impl TriageReportPayload {
    /// Validate citation discipline: every fact, hypothesis, next check,
    /// mitigation, and claim must carry at least one evidence ref,
    /// confidences stay in [0,1], and when the current artifact set is known
    /// every cited artifact must exist in it.
    pub fn validate(&self, known_artifacts: Option<&HashSet<String>>) -> Result<(), String> {
        for fact in &self.facts {
            if fact.evidence_refs.is_empty() {
                return Err(format!("fact {} has no evidence_refs", fact.claim_id));
            }
        }
        for hypothesis in &self.hypotheses {
            if hypothesis.evidence_refs.is_empty() {
                return Err(format!(
                    "hypothesis '{}' has no evidence_refs",
                    hypothesis.title
                ));
            }
            if !(0.0..=1.0).contains(&hypothesis.confidence) {
                return Err(format!(
                    "hypothesis '{}' confidence {} outside [0,1]",
                    hypothesis.title, hypothesis.confidence
                ));
            }
        }
        for next_check in &self.next_checks {
            if next_check.evidence_refs.is_empty() {
                return Err(format!(
                    "next_check {} has no evidence_refs",
                    next_check.check_id
                ));
            }
        }
        for mitigation in &self.mitigations {
            if mitigation.evidence_refs.is_empty() {
                return Err(format!(
                    "mitigation {} has no evidence_refs",
                    mitigation.mitigation_id
                ));
            }
        }
        for claim in &self.claims {
            if claim.evidence_refs.is_empty() {
                return Err(format!("claim {} has no evidence_refs", claim.claim_id));
            }
        }
        if let Some(known) = known_artifacts {
            for evidence_ref in self.all_refs() {
                if !known.contains(&evidence_ref.artifact_id) {
                    return Err(format!(
                        "evidence ref cites unknown artifact {}",
                        evidence_ref.artifact_id
                    ));
                }
            }
        }
        Ok(())
    }

    fn all_refs(&self) -> impl Iterator<Item = &EvidenceRef> {
        self.facts
            .iter()
            .flat_map(|f| f.evidence_refs.iter())
            .chain(self.hypotheses.iter().flat_map(|h| h.evidence_refs.iter()))
            .chain(self.next_checks.iter().flat_map(|n| n.evidence_refs.iter()))
            .chain(self.mitigations.iter().flat_map(|m| m.evidence_refs.iter()))
            .chain(self.claims.iter().flat_map(|c| c.evidence_refs.iter()))
    }
}

/// JSON schema handed to the LLM for schema-constrained generation. Built as
/// a literal because the schema is part of the wire contract.
pub fn report_json_schema() -> Value {
    let evidence_refs = serde_json::json!({
        "type": "array",
        "minItems": 1,
        "items": {
            "type": "object",
            "properties": {
                "artifact_id": {"type": "string"},
                "pointer": {"type": "string"},
            },
            "required": ["artifact_id", "pointer"],
        },
    });
    serde_json::json!({
        "type": "object",
        "properties": {
            "summary": {"type": "string"},
            "mode": {"type": "string", "enum": ["normal", "insufficient_evidence"]},
            "facts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "claim_id": {"type": "string"},
                        "text": {"type": "string"},
                        "evidence_refs": evidence_refs.clone(),
                    },
                    "required": ["claim_id", "text", "evidence_refs"],
                },
            },
            "hypotheses": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "rank": {"type": "integer"},
                        "title": {"type": "string"},
                        "explanation": {"type": "string"},
                        "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                        "evidence_refs": evidence_refs.clone(),
                        "disconfirming_signals": {"type": "array", "items": {"type": "string"}},
                        "missing_data": {"type": "array", "items": {"type": "string"}},
                    },
                    "required": ["rank", "title", "explanation", "confidence", "evidence_refs"],
                },
            },
            "next_checks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "check_id": {"type": "string"},
                        "step": {"type": "string"},
                        "command_or_query": {"type": "string"},
                        "evidence_refs": evidence_refs.clone(),
                    },
                    "required": ["check_id", "step", "evidence_refs"],
                },
            },
            "mitigations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "mitigation_id": {"type": "string"},
                        "action": {"type": "string"},
                        "risk": {"type": "string"},
                        "evidence_refs": evidence_refs.clone(),
                    },
                    "required": ["mitigation_id", "action", "risk", "evidence_refs"],
                },
            },
            "claims": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "claim_id": {"type": "string"},
                        "type": {
                            "type": "string",
                            "enum": ["fact", "hypothesis", "next_check", "mitigation"],
                        },
                        "text": {"type": "string"},
                        "evidence_refs": evidence_refs.clone(),
                    },
                    "required": ["claim_id", "type", "text", "evidence_refs"],
                },
            },
            "uncertainty_note": {"type": "string"},
        },
        "required": ["summary", "mode", "facts", "hypotheses", "next_checks", "mitigations", "claims"],
    })
}

// ============================================================================
// Auth
// ============================================================================

/// Role carried in claims tokens. Unknown values fall back to `Viewer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Viewer,
    Responder,
    Admin,
}

impl UserRole {
    pub fn from_claim(raw: &str) -> Self {
        match raw {
            "admin" => Self::Admin,
            "responder" => Self::Responder,
            _ => Self::Viewer,
        }
    }
}

/// Authenticated caller identity.
#[derive(Debug, Clone)]
pub struct AuthPrincipal {
    pub subject: String,
    pub role: UserRole,
    pub services: Vec<String>,
    pub can_ingest: bool,
}

impl AuthPrincipal {
    /// Dev principal used when auth is disabled.
    pub fn dev_admin() -> Self {
        Self {
            subject: "dev-local".to_string(),
            role: UserRole::Admin,
            services: vec!["*".to_string()],
            can_ingest: true,
        }
    }

    /// Admin principal produced by the shared secret token.
    pub fn shared_token_admin() -> Self {
        Self {
            subject: "shared-token".to_string(),
            role: UserRole::Admin,
            services: vec!["*".to_string()],
            can_ingest: true,
        }
    }

    /// Whether the principal may read or mutate incidents of `service`.
    pub fn allows_service(&self, service: &str) -> bool {
        self.role == UserRole::Admin
            || self.services.iter().any(|s| s == "*" || s == service)
    }

    /// Whether the principal may post alerts and change events.
    pub fn allows_ingest(&self) -> bool {
        self.role == UserRole::Admin || self.can_ingest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            IncidentStatus::Open,
            IncidentStatus::Triaging,
            IncidentStatus::AwaitingHumanReview,
            IncidentStatus::Triaged,
            IncidentStatus::Mitigated,
            IncidentStatus::Resolved,
            IncidentStatus::PostmortemRequired,
            IncidentStatus::Failed,
        ] {
            let parsed: IncidentStatus = status.as_str().parse().expect("round trip");
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_reopen_set() {
        assert!(IncidentStatus::Failed.reopens_on_new_alert());
        assert!(IncidentStatus::PostmortemRequired.reopens_on_new_alert());
        assert!(!IncidentStatus::Open.reopens_on_new_alert());
        assert!(!IncidentStatus::Triaging.reopens_on_new_alert());
    }

    #[test]
    fn test_manual_transitions() {
        assert!(IncidentStatus::Triaged.allows_manual_transition(IncidentStatus::Mitigated));
        assert!(IncidentStatus::Mitigated.allows_manual_transition(IncidentStatus::Resolved));
        assert!(IncidentStatus::Resolved
            .allows_manual_transition(IncidentStatus::PostmortemRequired));
        // Skipping review is a conflict
        assert!(!IncidentStatus::Open.allows_manual_transition(IncidentStatus::Resolved));
        assert!(!IncidentStatus::AwaitingHumanReview
            .allows_manual_transition(IncidentStatus::Mitigated));
        // Backwards moves are conflicts
        assert!(!IncidentStatus::Resolved.allows_manual_transition(IncidentStatus::Mitigated));
    }

    #[test]
    fn test_report_validation_requires_fact_refs() {
        let report = TriageReportPayload {
            summary: "s".into(),
            mode: ReportMode::Normal,
            facts: vec![Fact {
                claim_id: "f1".into(),
                text: "errors spiked".into(),
                evidence_refs: vec![],
            }],
            hypotheses: vec![],
            next_checks: vec![],
            mitigations: vec![],
            claims: vec![],
            uncertainty_note: None,
            generation_metadata: GenerationMetadata::default(),
        };
        assert!(report.validate(None).is_err());
    }

    #[test]
    fn test_report_validation_confidence_bounds() {
        let report = TriageReportPayload {
            summary: "s".into(),
            mode: ReportMode::Normal,
            facts: vec![],
            hypotheses: vec![Hypothesis {
                rank: 1,
                title: "bad deploy".into(),
                explanation: "x".into(),
                confidence: 1.2,
                evidence_refs: vec![EvidenceRef {
                    artifact_id: "abc".into(),
                    pointer: "signature_id:1".into(),
                }],
                disconfirming_signals: vec![],
                missing_data: vec![],
            }],
            next_checks: vec![],
            mitigations: vec![],
            claims: vec![],
            uncertainty_note: None,
            generation_metadata: GenerationMetadata::default(),
        };
        assert!(report.validate(None).is_err());
    }

    #[test]
    fn test_report_validation_requires_refs_on_every_section() {
        let base = TriageReportPayload {
            summary: "s".into(),
            mode: ReportMode::Normal,
            facts: vec![],
            hypotheses: vec![],
            next_checks: vec![],
            mitigations: vec![],
            claims: vec![],
            uncertainty_note: None,
            generation_metadata: GenerationMetadata::default(),
        };

        let mut with_check = base.clone();
        with_check.next_checks.push(NextCheck {
            check_id: "c1".into(),
            step: "expand window".into(),
            command_or_query: None,
            evidence_refs: vec![],
        });
        assert!(with_check.validate(None).is_err());

        let mut with_mitigation = base.clone();
        with_mitigation.mitigations.push(Mitigation {
            mitigation_id: "m1".into(),
            action: "roll back".into(),
            risk: "low".into(),
            evidence_refs: vec![],
        });
        assert!(with_mitigation.validate(None).is_err());

        let mut with_claim = base.clone();
        with_claim.claims.push(Claim {
            claim_id: "cl1".into(),
            claim_type: ClaimType::NextCheck,
            text: "needs more data".into(),
            evidence_refs: vec![],
        });
        assert!(with_claim.validate(None).is_err());

        // An empty report remains valid.
        assert!(base.validate(None).is_ok());
    }

    #[test]
    fn test_report_validation_checks_artifact_existence() {
        let report = TriageReportPayload {
            summary: "s".into(),
            mode: ReportMode::Normal,
            facts: vec![Fact {
                claim_id: "f1".into(),
                text: "errors spiked".into(),
                evidence_refs: vec![EvidenceRef {
                    artifact_id: "missing000000".into(),
                    pointer: "x".into(),
                }],
            }],
            hypotheses: vec![],
            next_checks: vec![],
            mitigations: vec![],
            claims: vec![],
            uncertainty_note: None,
            generation_metadata: GenerationMetadata::default(),
        };
        let known: HashSet<String> = ["abc123".to_string()].into_iter().collect();
        assert!(report.validate(Some(&known)).is_err());
        assert!(report.validate(None).is_ok());
    }

    #[test]
    fn test_principal_service_scope() {
        let principal = AuthPrincipal {
            subject: "u1".into(),
            role: UserRole::Viewer,
            services: vec!["checkout-api".into()],
            can_ingest: false,
        };
        assert!(principal.allows_service("checkout-api"));
        assert!(!principal.allows_service("payments-api"));
        assert!(!principal.allows_ingest());
        assert!(AuthPrincipal::dev_admin().allows_service("anything"));
    }

    #[test]
    fn test_unknown_role_falls_back_to_viewer() {
        assert_eq!(UserRole::from_claim("superuser"), UserRole::Viewer);
        assert_eq!(UserRole::from_claim("admin"), UserRole::Admin);
    }
}
