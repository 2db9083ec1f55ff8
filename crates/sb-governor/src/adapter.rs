//! Webhook payload adapter
//!
//! Normalises the three observed on-the-wire shapes into one envelope:
//! - payload at the root (global-webhook shape: `content` + `id` at root)
//! - payload under `message`
//! - payload under `data.message`
//!
//! HTML is stripped from `content` before anything downstream sees it, and
//! `message_type` values (int 1 / string "outgoing") are mapped through a
//! small table. Unknown fields are ignored.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use sb_common::{ChatEnvelope, ChatMessageKind, ContactInfo};

fn html_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid regex"))
}

/// Strip HTML tags and decode the handful of entities the platform emits.
pub fn strip_html(input: &str) -> String {
    let without_tags = html_tag_re().replace_all(input, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&#39;", "'")
        .replace("&quot;", "\"");
    collapse_whitespace(decoded.trim())
}

fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out
}

fn message_kind(value: Option<&Value>) -> ChatMessageKind {
    match value {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(1) => ChatMessageKind::Outgoing,
            Some(2) => ChatMessageKind::Activity,
            _ => ChatMessageKind::Incoming,
        },
        Some(Value::String(s)) => match s.as_str() {
            "outgoing" => ChatMessageKind::Outgoing,
            "activity" => ChatMessageKind::Activity,
            _ => ChatMessageKind::Incoming,
        },
        _ => ChatMessageKind::Incoming,
    }
}

fn string_of(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn contact_of(node: &Value) -> ContactInfo {
    let sender = node.get("sender").or_else(|| node.get("contact"));
    match sender {
        Some(sender) => ContactInfo {
            name: string_of(sender.get("name")),
            phone: string_of(sender.get("phone_number").or_else(|| sender.get("phone"))),
            email: string_of(sender.get("email")),
        },
        None => ContactInfo::default(),
    }
}

/// Locate the message node inside the payload.
fn message_node(payload: &Value) -> Option<&Value> {
    // Global-webhook shape: content and id live at the root.
    if payload.get("content").is_some() && payload.get("id").is_some() {
        return Some(payload);
    }
    if let Some(message) = payload.get("message") {
        return Some(message);
    }
    if let Some(message) = payload.get("data").and_then(|d| d.get("message")) {
        return Some(message);
    }
    None
}

/// Produce the normalised envelope from a raw webhook payload.
///
/// Returns `None` when no message node can be located at all; an envelope
/// with a missing conversation id is still returned so the Governor can
/// record the typed skip.
pub fn normalize_webhook(payload: &Value) -> Option<ChatEnvelope> {
    let node = message_node(payload)?;

    let conversation_id = node
        .get("conversation")
        .and_then(|c| c.get("id"))
        .map(|v| string_of(Some(v)))
        .unwrap_or_else(|| string_of(node.get("conversation_id")))
        .or_else(|| {
            payload
                .get("conversation")
                .and_then(|c| string_of(c.get("id")))
        });

    let account_id = string_of(node.get("account_id"))
        .or_else(|| payload.get("account").and_then(|a| string_of(a.get("id"))));

    let inbox_id = string_of(node.get("inbox_id"))
        .or_else(|| payload.get("inbox").and_then(|i| string_of(i.get("id"))));
    let inbox_name = payload
        .get("inbox")
        .and_then(|i| string_of(i.get("name")));

    let raw_text = node
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default();

    Some(ChatEnvelope {
        event: string_of(payload.get("event")),
        message_id: string_of(node.get("id")).unwrap_or_else(|| "unknown".to_string()),
        conversation_id,
        account_id,
        inbox_id,
        inbox_name,
        message_kind: message_kind(node.get("message_type")),
        is_private: node
            .get("private")
            .and_then(|p| p.as_bool())
            .unwrap_or(false),
        text: strip_html(raw_text),
        contact: contact_of(node),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn root_shape_is_detected_by_content_and_id() {
        let payload = json!({
            "id": 42,
            "content": "<p>hola <b>mundo</b></p>",
            "message_type": 0,
            "conversation": {"id": 7},
            "sender": {"name": "Ana", "phone_number": "+52155", "email": "ana@example.com"}
        });

        let envelope = normalize_webhook(&payload).unwrap();
        assert_eq!(envelope.message_id, "42");
        assert_eq!(envelope.conversation_id.as_deref(), Some("7"));
        assert_eq!(envelope.text, "hola mundo");
        assert_eq!(envelope.message_kind, ChatMessageKind::Incoming);
        assert_eq!(envelope.contact.name.as_deref(), Some("Ana"));
    }

    #[test]
    fn nested_message_shape() {
        let payload = json!({
            "event": "message_created",
            "message": {
                "id": "m-1",
                "content": "necesito ayuda",
                "message_type": "incoming",
                "conversation_id": "C9",
                "private": false
            }
        });

        let envelope = normalize_webhook(&payload).unwrap();
        assert_eq!(envelope.event.as_deref(), Some("message_created"));
        assert_eq!(envelope.conversation_id.as_deref(), Some("C9"));
        assert_eq!(envelope.text, "necesito ayuda");
    }

    #[test]
    fn data_message_shape() {
        let payload = json!({
            "data": {
                "message": {
                    "id": 5,
                    "content": "hola",
                    "message_type": 1,
                    "conversation": {"id": 3}
                }
            }
        });

        let envelope = normalize_webhook(&payload).unwrap();
        assert_eq!(envelope.message_kind, ChatMessageKind::Outgoing);
        assert_eq!(envelope.conversation_id.as_deref(), Some("3"));
    }

    #[test]
    fn outgoing_marked_by_string_or_int() {
        for message_type in [json!(1), json!("outgoing")] {
            let payload = json!({
                "id": 1, "content": "x", "message_type": message_type,
                "conversation": {"id": 1}
            });
            let envelope = normalize_webhook(&payload).unwrap();
            assert_eq!(envelope.message_kind, ChatMessageKind::Outgoing);
        }
    }

    #[test]
    fn unrecognisable_payload_is_rejected() {
        assert!(normalize_webhook(&json!({"event": "conversation_opened"})).is_none());
    }

    #[test]
    fn html_entities_are_decoded() {
        assert_eq!(strip_html("a &amp; b&nbsp;&lt;c&gt;"), "a & b <c>");
        assert_eq!(strip_html("<div><span>  spaced   out </span></div>"), "spaced out");
    }

    #[test]
    fn missing_conversation_survives_as_none() {
        let payload = json!({"id": 1, "content": "hola"});
        let envelope = normalize_webhook(&payload).unwrap();
        assert!(envelope.conversation_id.is_none());
    }
}
