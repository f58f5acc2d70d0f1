use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Wire contract: clients rely on the model emitting this literal fence.
static ACTION_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s):::action\s*\n(.*?)\n?\s*:::").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageUpdates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagline: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPage {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Typed directives the model can embed in a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditAction {
    UpdatePage {
        #[serde(rename = "pageId")]
        page_id: i64,
        updates: PageUpdates,
    },
    UpdateSettings {
        settings: SettingsUpdates,
    },
    CreatePage {
        page: NewPage,
    },
}

impl EditAction {
    pub fn type_name(&self) -> &'static str {
        match self {
            EditAction::UpdatePage { .. } => "update_page",
            EditAction::UpdateSettings { .. } => "update_settings",
            EditAction::CreatePage { .. } => "create_page",
        }
    }
}

/// A fenced block as parsed: typed when the grammar recognises it, raw when
/// the JSON is valid but the action type is unknown.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionBlock {
    Known(EditAction),
    Unknown {
        action_type: String,
        raw: serde_json::Value,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReply {
    /// Everything outside the fences, concatenated verbatim and trimmed.
    pub display_text: String,
    pub actions: Vec<ActionBlock>,
}

/// Split `:::action` fences out of a model reply. Each block must hold a
/// single JSON object; malformed blocks are dropped with a warning.
pub fn parse_actions(reply: &str) -> ParsedReply {
    let mut actions = Vec::new();
    let mut display = String::new();
    let mut last_end = 0;

    for caps in ACTION_BLOCK_RE.captures_iter(reply) {
        let whole = caps.get(0).expect("capture 0 always present");
        display.push_str(&reply[last_end..whole.start()]);
        last_end = whole.end();

        let body = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let value: serde_json::Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => {
                warn!("dropping malformed action block: {e}");
                continue;
            }
        };
        if !value.is_object() {
            warn!("dropping non-object action block");
            continue;
        }

        match serde_json::from_value::<EditAction>(value.clone()) {
            Ok(action) => actions.push(ActionBlock::Known(action)),
            Err(_) => {
                let action_type = value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("missing")
                    .to_string();
                actions.push(ActionBlock::Unknown {
                    action_type,
                    raw: value,
                });
            }
        }
    }
    display.push_str(&reply[last_end..]);

    ParsedReply {
        display_text: display.trim().to_string(),
        actions,
    }
}

/// Inverse of `parse_actions` for well-formed input; used by tests and the
/// system prompt examples.
pub fn serialize_actions(display_text: &str, actions: &[EditAction]) -> String {
    let mut out = display_text.trim().to_string();
    for action in actions {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        let json = serde_json::to_string(action).expect("actions are always serializable");
        out.push_str(&format!(":::action\n{json}\n:::"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_single_action() {
        let reply = "Updating your title now.\n:::action\n{\"type\":\"update_settings\",\"settings\":{\"title\":\"New\"}}\n:::";
        let parsed = parse_actions(reply);
        assert_eq!(parsed.display_text, "Updating your title now.");
        assert_eq!(parsed.actions.len(), 1);
        assert_eq!(
            parsed.actions[0],
            ActionBlock::Known(EditAction::UpdateSettings {
                settings: SettingsUpdates {
                    title: Some("New".into()),
                    tagline: None,
                },
            })
        );
    }

    #[test]
    fn parses_multiple_actions_in_source_order() {
        let reply = "Two edits.\n:::action\n{\"type\":\"update_page\",\"pageId\":10,\"updates\":{\"title\":\"Welcome\"}}\n:::\nand\n:::action\n{\"type\":\"create_page\",\"page\":{\"title\":\"Pricing\",\"slug\":\"pricing\"}}\n:::";
        let parsed = parse_actions(reply);
        assert_eq!(parsed.actions.len(), 2);
        assert!(matches!(
            parsed.actions[0],
            ActionBlock::Known(EditAction::UpdatePage { page_id: 10, .. })
        ));
        assert!(matches!(
            parsed.actions[1],
            ActionBlock::Known(EditAction::CreatePage { .. })
        ));
        assert!(parsed.display_text.contains("Two edits."));
        assert!(parsed.display_text.contains("and"));
    }

    #[test]
    fn malformed_json_drops_the_block_only() {
        let reply = "Before\n:::action\n{not json}\n:::\nAfter";
        let parsed = parse_actions(reply);
        assert!(parsed.actions.is_empty());
        assert!(parsed.display_text.contains("Before"));
        assert!(parsed.display_text.contains("After"));
    }

    #[test]
    fn unknown_action_type_is_preserved_as_unknown() {
        let reply = ":::action\n{\"type\":\"delete_site\",\"siteId\":1}\n:::";
        let parsed = parse_actions(reply);
        assert_eq!(parsed.actions.len(), 1);
        match &parsed.actions[0] {
            ActionBlock::Unknown { action_type, .. } => assert_eq!(action_type, "delete_site"),
            other => panic!("expected unknown block, got {other:?}"),
        }
    }

    #[test]
    fn reply_without_actions_is_all_display_text() {
        let parsed = parse_actions("Just words, no directives.");
        assert!(parsed.actions.is_empty());
        assert_eq!(parsed.display_text, "Just words, no directives.");
    }

    #[test]
    fn serialize_then_parse_round_trips() {
        let actions = vec![
            EditAction::UpdatePage {
                page_id: 7,
                updates: PageUpdates {
                    title: Some("Hi".into()),
                    content: None,
                    slug: None,
                    status: Some("publish".into()),
                },
            },
            EditAction::CreatePage {
                page: NewPage {
                    title: "FAQ".into(),
                    content: "<p>soon</p>".into(),
                    slug: Some("faq".into()),
                    status: None,
                },
            },
        ];
        let wire = serialize_actions("Working on it.", &actions);
        let parsed = parse_actions(&wire);
        assert_eq!(parsed.display_text, "Working on it.");
        let round_tripped: Vec<EditAction> = parsed
            .actions
            .into_iter()
            .map(|b| match b {
                ActionBlock::Known(a) => a,
                ActionBlock::Unknown { .. } => panic!("lost typing in round trip"),
            })
            .collect();
        assert_eq!(round_tripped, actions);
    }

    #[test]
    fn action_json_uses_snake_case_type_and_camel_case_fields() {
        let action = EditAction::UpdatePage {
            page_id: 3,
            updates: PageUpdates::default(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "update_page");
        assert!(json.get("pageId").is_some());
    }
}
