//! Instruction assembly pipeline
//!
//! severity → priority/task name → target app → template (or human
//! decision reply) → authority enforcement → hard rules → per-target
//! sanitisation → final instruction.

use chrono::Utc;
use sb_common::{Action, Beacon, Instruction, InstructionTarget, NormalizedSignal};
use tracing::{debug, info};

use crate::actions::*;
use crate::hard_rules::{validate_actions, HardRuleConfig};
use crate::routing::select_target_app;
use crate::sanitize::sanitize_actions;
use crate::severity::{infer_severity, priority_for, task_name_for};
use crate::templates::{build_template, Template};

/// Actor role whose proposals are advisory-only.
const ADVISORY_ONLY_ROLE: &str = "BRUNO";

/// Deterministic beacon → instruction engine.
pub struct RuleEngine {
    config: HardRuleConfig,
}

impl RuleEngine {
    pub fn new(config: HardRuleConfig) -> Self {
        Self { config }
    }

    /// Build the instruction for a beacon. Never fails: malformed input
    /// degrades to LOG_ONLY or an escalation.
    pub fn build_instruction(
        &self,
        beacon: &Beacon,
        signal: Option<&NormalizedSignal>,
    ) -> Instruction {
        let _span =
            sb_common::logging::beacon_span(&beacon.beacon_id, &beacon.signal_source).entered();

        let severity = infer_severity(beacon, signal);
        let priority = priority_for(severity);
        let task_name = task_name_for(severity);
        let target_app = select_target_app(beacon, signal);

        let mut template = if is_human_decision(beacon) {
            human_decision_reply(beacon)
        } else {
            build_template(beacon, signal)
        };

        // Authority: unauthorised actors only advise.
        let mut authority_collapsed = false;
        if beacon.actor.role.eq_ignore_ascii_case(ADVISORY_ONLY_ROLE) {
            template.actions = collapse_to_advisory(template.actions);
            authority_collapsed = true;
        }

        // Hard rules override everything that came before them.
        let check = validate_actions(&template.actions, beacon.timestamp_iso, &self.config);
        let mut hard_rule_fired = false;
        if !check.valid {
            hard_rule_fired = true;
            info!(
                beacon_id = %beacon.beacon_id,
                violations = check.violations.len(),
                "Hard rule fired, overwriting actions with escalation"
            );

            let violations_json = serde_json::to_value(&check.violations)
                .unwrap_or(serde_json::Value::Null);
            template.actions = vec![
                Action::new(
                    ESCALATE_TO_CONTROL_TOWER,
                    serde_json::json!({
                        "reason": REASON_HARD_RULE_VIOLATION,
                        "violations": violations_json,
                    }),
                ),
                Action::new(
                    LOG_ONLY,
                    serde_json::json!({"violations": violations_json}),
                ),
            ];

            let mut bullets = vec!["Acción bloqueada por regla dura.".to_string()];
            bullets.extend(check.violations.iter().map(|v| v.reason.clone()));
            bullets.truncate(3);
            template.rationale = bullets;
        }

        let actions = sanitize_actions(template.actions, target_app);

        let mut rationale = template.rationale;
        rationale.truncate(3);

        debug!(
            beacon_id = %beacon.beacon_id,
            target_app = %target_app,
            actions = actions.len(),
            "Instruction assembled"
        );

        Instruction {
            instruction_id: uuid::Uuid::new_v4().to_string(),
            beacon_id: beacon.beacon_id.clone(),
            created_at_iso: Utc::now(),
            target: InstructionTarget {
                app: target_app,
                location_id: beacon.location_id.clone(),
                user_id: if beacon.actor.id.is_empty() {
                    None
                } else {
                    Some(beacon.actor.id.clone())
                },
            },
            priority,
            message: template.message,
            actions,
            confidence: template.confidence,
            needs_human_clarification: template.needs_human_clarification,
            clarification_question: template.clarification_question,
            rationale_bullets: rationale,
            model_trace: serde_json::json!({
                "severity": severity,
                "task_name": task_name,
                "signal_source": beacon.signal_source,
                "authority_collapsed": authority_collapsed,
                "hard_rule_fired": hard_rule_fired,
            }),
        }
    }
}

fn is_human_decision(beacon: &Beacon) -> bool {
    beacon.signal_source == "HUMAN_DECISION_RESPONSE"
}

/// Collapse non-advisory actions into one REQUEST_APPROVAL carrying them
/// as proposals. An empty result becomes LOG_ONLY.
fn collapse_to_advisory(actions: Vec<Action>) -> Vec<Action> {
    let mut advisory: Vec<Action> = Vec::new();
    let mut collapsed: Vec<serde_json::Value> = Vec::new();

    for action in actions {
        if ADVISORY_ACTIONS.contains(&action.action_type.as_str()) {
            advisory.push(action);
        } else {
            collapsed.push(serde_json::to_value(&action).unwrap_or(serde_json::Value::Null));
        }
    }

    if !collapsed.is_empty() {
        advisory.push(Action::new(
            REQUEST_APPROVAL,
            serde_json::json!({"proposed_actions": collapsed}),
        ));
    }

    if advisory.is_empty() {
        advisory.push(Action::new(
            LOG_ONLY,
            serde_json::json!({"note": "sin acciones autorizadas para el actor"}),
        ));
    }

    advisory
}

/// Reply to a prior REQUEST_APPROVAL: the payload carries the decision and
/// the embedded decision tree.
fn human_decision_reply(beacon: &Beacon) -> Template {
    let decision = beacon
        .machine_payload
        .get("decision")
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_uppercase())
        .unwrap_or_default();

    let embedded_action = |key: &str| -> Option<Action> {
        let raw = beacon.machine_payload.get(key)?;
        serde_json::from_value(raw.clone()).ok()
    };

    match decision.as_str() {
        "APROBAR" | "SI" => match embedded_action("proposed_action") {
            Some(action) => Template {
                message: "Decisión aprobada, ejecutando acción propuesta.".to_string(),
                rationale: vec!["Aprobación humana recibida.".to_string()],
                actions: vec![action],
                confidence: 1.0,
                needs_human_clarification: false,
                clarification_question: None,
            },
            None => Template {
                message: "Aprobación recibida sin acción propuesta adjunta.".to_string(),
                rationale: vec!["Respuesta humana sin árbol de decisión.".to_string()],
                actions: vec![Action::new(
                    LOG_ONLY,
                    serde_json::json!({"raw_payload": beacon.machine_payload}),
                )],
                confidence: 0.5,
                needs_human_clarification: true,
                clarification_question: Some(
                    "¿Qué acción debía ejecutarse con esta aprobación?".to_string(),
                ),
            },
        },
        "RECHAZAR" | "NO" | "NO_POR_AHORA" => match embedded_action("if_no_then") {
            Some(action) => Template {
                message: "Decisión rechazada, ejecutando alternativa.".to_string(),
                rationale: vec!["Rechazo humano, rama alternativa aplicada.".to_string()],
                actions: vec![action],
                confidence: 1.0,
                needs_human_clarification: false,
                clarification_question: None,
            },
            None => Template {
                message: "Decisión rechazada, sin alternativa configurada.".to_string(),
                rationale: vec!["Rechazo humano registrado.".to_string()],
                actions: vec![Action::new(
                    LOG_ONLY,
                    serde_json::json!({"result": "cancelado_por_humano"}),
                )],
                confidence: 1.0,
                needs_human_clarification: false,
                clarification_question: None,
            },
        },
        _ => Template {
            message: "Respuesta humana no reconocida.".to_string(),
            rationale: vec!["Decisión fuera del vocabulario esperado.".to_string()],
            actions: vec![Action::new(
                LOG_ONLY,
                serde_json::json!({"raw_payload": beacon.machine_payload}),
            )],
            confidence: 0.4,
            needs_human_clarification: true,
            clarification_question: Some("¿La decisión fue aprobar o rechazar?".to_string()),
        },
    }
}
