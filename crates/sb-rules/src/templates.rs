//! Scripted instruction templates
//!
//! Per-(signal_source, signal_type) templates emit the proposed message,
//! actions, rationale bullets and a confidence value. Action templates may
//! carry nested `proposed_action` / `if_no_then` branches so a single
//! REQUEST_APPROVAL encodes a full decision tree. Unknown material falls
//! back to LOG_ONLY with a clarification question.

use sb_common::{Action, Beacon, NormalizedSignal};

use crate::actions::*;

/// A drafted instruction before authority, hard rules and sanitisation.
#[derive(Debug, Clone)]
pub struct Template {
    pub message: String,
    pub actions: Vec<Action>,
    pub rationale: Vec<String>,
    pub confidence: f64,
    pub needs_human_clarification: bool,
    pub clarification_question: Option<String>,
}

fn entity_str<'a>(signal: Option<&'a NormalizedSignal>, key: &str) -> Option<&'a str> {
    signal.and_then(|s| s.entities.get(key)).and_then(|v| v.as_str())
}

fn payload_str<'a>(beacon: &'a Beacon, key: &str) -> Option<&'a str> {
    beacon.machine_payload.get(key).and_then(|v| v.as_str())
}

/// Build the template for a beacon.
pub fn build_template(beacon: &Beacon, signal: Option<&NormalizedSignal>) -> Template {
    match beacon.signal_source.as_str() {
        "OPS_TRAFFIC_ALERT" => traffic_alert(beacon, signal),
        "QA_BATCH_FINISHED" => qa_batch_finished(beacon, signal),
        "SHIFT_END_CHECKIN" => shift_end_checkin(beacon),
        "INVENTORY_LOW" => inventory_low(beacon, signal),
        source if source.to_ascii_uppercase().contains("CANCEL") => cancel_request(beacon),
        _ => unknown_source(beacon),
    }
}

fn traffic_alert(beacon: &Beacon, signal: Option<&NormalizedSignal>) -> Template {
    let sku = entity_str(signal, "sku")
        .or_else(|| payload_str(beacon, "sku"))
        .unwrap_or("SKU_DESCONOCIDO");
    let surge = payload_str(beacon, "surge_pct").unwrap_or("?");

    Template {
        message: format!(
            "Pico de tráfico detectado: demanda proyectada +{}% sobre {}.",
            surge, sku
        ),
        actions: vec![
            Action::new(
                RESERVE_SHADOW_INVENTORY,
                serde_json::json!({"sku": sku, "qty_pct": 15}),
            ),
            Action::new(
                NOTIFY_TEAM,
                serde_json::json!({"team": "operaciones", "channel": "ops-alerts"}),
            ),
        ],
        rationale: vec![
            "Pico de demanda sostenido sobre el umbral configurado.".to_string(),
            format!("Reserva preventiva del 15% de inventario de {}.", sku),
        ],
        confidence: 0.9,
        needs_human_clarification: false,
        clarification_question: None,
    }
}

fn qa_batch_finished(beacon: &Beacon, signal: Option<&NormalizedSignal>) -> Template {
    let batch = entity_str(signal, "batch_id")
        .or_else(|| payload_str(beacon, "batch_id"))
        .unwrap_or("LOTE_DESCONOCIDO");
    let passed = beacon
        .machine_payload
        .get("passed")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    if passed {
        Template {
            message: format!("Lote {} aprobado por calidad.", batch),
            actions: vec![Action::new(
                LOG_ONLY,
                serde_json::json!({"batch_id": batch, "result": "passed"}),
            )],
            rationale: vec!["Resultado de calidad dentro de parámetros.".to_string()],
            confidence: 0.95,
            needs_human_clarification: false,
            clarification_question: None,
        }
    } else {
        Template {
            message: format!("Lote {} rechazado por calidad, stock virtual bloqueado.", batch),
            actions: vec![
                Action::new(
                    BLOCK_VIRTUAL_STOCK_BATCH,
                    serde_json::json!({"batch_id": batch}),
                ),
                Action::new(
                    SCHEDULE_QA_REVIEW,
                    serde_json::json!({"batch_id": batch, "priority": "alta"}),
                ),
            ],
            rationale: vec![
                "Lote fuera de parámetros de calidad.".to_string(),
                "Bloqueo preventivo hasta revisión.".to_string(),
            ],
            confidence: 0.9,
            needs_human_clarification: false,
            clarification_question: None,
        }
    }
}

fn shift_end_checkin(beacon: &Beacon) -> Template {
    Template {
        message: "Cierre de turno registrado.".to_string(),
        actions: vec![Action::new(
            LOG_ONLY,
            serde_json::json!({"checkin": beacon.machine_payload}),
        )],
        rationale: vec!["Registro rutinario de fin de turno.".to_string()],
        confidence: 0.95,
        needs_human_clarification: false,
        clarification_question: None,
    }
}

fn inventory_low(beacon: &Beacon, signal: Option<&NormalizedSignal>) -> Template {
    let sku = entity_str(signal, "sku")
        .or_else(|| payload_str(beacon, "sku"))
        .unwrap_or("SKU_DESCONOCIDO");

    // The approval encodes the whole decision tree: approve reserves
    // shadow inventory, reject pauses future web sales instead.
    Template {
        message: format!("Inventario bajo para {}.", sku),
        actions: vec![Action::new(
            REQUEST_APPROVAL,
            serde_json::json!({
                "question": format!("¿Reservar inventario sombra para {}?", sku),
                "proposed_action": {
                    "type": RESERVE_SHADOW_INVENTORY,
                    "params": {"sku": sku, "qty_pct": 10}
                },
                "if_no_then": {
                    "type": PAUSE_FUTURE_WEB_SALES,
                    "params": {"sku": sku}
                }
            }),
        )],
        rationale: vec![
            format!("Inventario de {} bajo el mínimo.", sku),
            "Se requiere decisión humana para la reserva.".to_string(),
        ],
        confidence: 0.85,
        needs_human_clarification: false,
        clarification_question: None,
    }
}

fn cancel_request(beacon: &Beacon) -> Template {
    let order = payload_str(beacon, "order_id").unwrap_or("ORDEN_DESCONOCIDA");
    Template {
        message: format!("Solicitud de cancelación sobre la orden {}.", order),
        actions: vec![Action::new(
            REQUEST_APPROVAL,
            serde_json::json!({
                "question": format!("¿Autorizar cancelación de {}?", order),
                "proposed_action": {
                    "type": CREATE_INCIDENT,
                    "params": {"order_id": order, "kind": "cancelacion"}
                },
                "if_no_then": {
                    "type": LOG_ONLY,
                    "params": {"order_id": order, "result": "cancelacion_denegada"}
                }
            }),
        )],
        rationale: vec!["Las cancelaciones requieren autorización del control tower.".to_string()],
        confidence: 0.8,
        needs_human_clarification: false,
        clarification_question: None,
    }
}

fn unknown_source(beacon: &Beacon) -> Template {
    Template {
        message: format!("Señal no reconocida de {}.", beacon.signal_source),
        actions: vec![Action::new(
            LOG_ONLY,
            serde_json::json!({"raw_payload": beacon.machine_payload}),
        )],
        rationale: vec!["Sin plantilla para esta fuente de señal.".to_string()],
        confidence: 0.3,
        needs_human_clarification: true,
        clarification_question: Some(format!(
            "¿Qué acción corresponde a la señal {}?",
            beacon.signal_source
        )),
    }
}
