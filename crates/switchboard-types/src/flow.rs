//! Flow domain types for Switchboard.
//!
//! A flow is a versioned, data-defined conversation graph. Every behavior
//! the interpreter exhibits is driven by these values; nothing about a
//! particular step lives in code. Published versions are immutable: an edit
//! produces a new `FlowDefinition` with the next version number.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved input that finishes the conversation from any step.
pub const EXIT_TOKEN: &str = "sair";

/// Context key consulted for the target queue when a transfer names none.
pub const DEFAULT_QUEUE_CONTEXT_KEY: &str = "destinoNucleoId";

// ---------------------------------------------------------------------------
// Flow Definition
// ---------------------------------------------------------------------------

/// One published version of a conversation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Stable flow key shared by all versions (e.g. "atendimento-padrao").
    pub id: String,
    /// Monotonic version number, starting at 1.
    pub version: u32,
    /// Step where new sessions start.
    pub initial_step: String,
    /// Steps keyed by id. Ordered so iteration (and therefore validation
    /// output) is stable.
    pub steps: BTreeMap<String, Step>,
    /// Set when the version is published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl FlowDefinition {
    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.get(id)
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single node in a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub kind: StepKind,
    /// Message shown on entering the step. May reference `{{context}}` keys.
    pub prompt: String,
    /// Ordered options; matched top to bottom.
    #[serde(default)]
    pub options: Vec<FlowOption>,
    /// Queue target used by `handoff` steps and by escalation-by-confusion
    /// from this step.
    #[serde(default)]
    pub transfer: TransferTarget,
    /// Where a `capture` step stores the answer and where it goes next.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<Capture>,
}

/// The kind of step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Presents options and waits for input.
    Menu,
    /// Ends the conversation with its prompt as the final message.
    Terminal,
    /// Hands the contact to a human queue.
    Handoff,
    /// Stores the contact's free-text answer in context and moves on.
    Capture,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Menu => write!(f, "menu"),
            StepKind::Terminal => write!(f, "terminal"),
            StepKind::Handoff => write!(f, "handoff"),
            StepKind::Capture => write!(f, "capture"),
        }
    }
}

// ---------------------------------------------------------------------------
// Options and actions
// ---------------------------------------------------------------------------

/// One selectable answer at a menu step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowOption {
    /// Exact token the contact types (compared case-insensitively).
    pub match_value: String,
    /// Text shown next to the token in the menu.
    pub label: String,
    /// Additional tokens accepted for this option.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// What happens when the option matches.
    #[serde(flatten)]
    pub action: OptionAction,
    /// Context mutations applied with the transition. `None` deletes the key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context_writes: BTreeMap<String, Option<String>>,
}

impl FlowOption {
    /// Whether `normalized` (already trimmed and lowercased) selects this option.
    pub fn matches(&self, normalized: &str) -> bool {
        self.match_value.trim().to_lowercase() == normalized
            || self
                .aliases
                .iter()
                .any(|alias| alias.trim().to_lowercase() == normalized)
    }
}

/// Tagged action carried by an option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OptionAction {
    /// Move to another step of the same flow version. The first branch
    /// whose conditions hold overrides `next_step`.
    Goto {
        next_step: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        branches: Vec<Branch>,
    },
    /// Hand off to a human queue.
    TransferQueue {
        #[serde(default)]
        target: TransferTarget,
    },
    /// End the conversation, optionally with a final message template.
    Finish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Where a transfer lands.
///
/// `queue_id` pins a fixed queue. Otherwise the queue id is read from the
/// session context under `queue_context_key` (or
/// [`DEFAULT_QUEUE_CONTEXT_KEY`] when unset).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_context_key: Option<String>,
}

impl TransferTarget {
    /// The context key consulted when no fixed queue is pinned.
    pub fn context_key(&self) -> &str {
        self.queue_context_key
            .as_deref()
            .unwrap_or(DEFAULT_QUEUE_CONTEXT_KEY)
    }
}

// ---------------------------------------------------------------------------
// Capture and branching
// ---------------------------------------------------------------------------

/// Free-text answer capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    /// Context key the trimmed answer is stored under.
    pub variable: String,
    pub next_step: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<Branch>,
}

/// A conditional jump. Holds when every condition in `when` holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub when: Vec<Condition>,
    pub next_step: String,
}

/// One test against a session context value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub key: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    /// Present and non-empty.
    Exists,
    /// Absent or empty.
    Missing,
}

impl Condition {
    pub fn holds(&self, context: &BTreeMap<String, String>) -> bool {
        let current = context
            .get(&self.key)
            .map(String::as_str)
            .filter(|v| !v.is_empty());
        match self.operator {
            ConditionOperator::Equals => current == self.value.as_deref(),
            ConditionOperator::NotEquals => current != self.value.as_deref(),
            ConditionOperator::Exists => current.is_some(),
            ConditionOperator::Missing => current.is_none(),
        }
    }
}

/// The target of the first branch that holds against `context`, else `default`.
pub fn select_next<'a>(
    default: &'a str,
    branches: &'a [Branch],
    context: &BTreeMap<String, String>,
) -> &'a str {
    branches
        .iter()
        .find(|b| b.when.iter().all(|c| c.holds(context)))
        .map(|b| b.next_step.as_str())
        .unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn goto_option(value: &str, next: &str) -> FlowOption {
        FlowOption {
            match_value: value.to_string(),
            label: format!("go to {next}"),
            aliases: vec![],
            action: OptionAction::Goto {
                next_step: next.to_string(),
                branches: vec![],
            },
            context_writes: BTreeMap::new(),
        }
    }

    #[test]
    fn option_matches_case_insensitively() {
        let mut opt = goto_option("Suporte", "suporte");
        opt.aliases = vec!["Ajuda".to_string()];

        assert!(opt.matches("suporte"));
        assert!(opt.matches("ajuda"));
        assert!(!opt.matches("financeiro"));
    }

    #[test]
    fn option_action_is_tagged() {
        let opt = goto_option("1", "suporte");
        let json = serde_json::to_value(&opt).unwrap();
        assert_eq!(json["action"], "goto");
        assert_eq!(json["next_step"], "suporte");

        let parsed: FlowOption = serde_json::from_value(serde_json::json!({
            "match_value": "2",
            "label": "Falar com atendente",
            "action": "transfer_queue",
            "target": { "queue_id": "financeiro" }
        }))
        .unwrap();
        assert_eq!(
            parsed.action,
            OptionAction::TransferQueue {
                target: TransferTarget {
                    queue_id: Some("financeiro".to_string()),
                    queue_context_key: None,
                }
            }
        );
    }

    #[test]
    fn first_holding_branch_wins() {
        let registered = Branch {
            when: vec![Condition {
                key: "__clienteCadastrado".to_string(),
                operator: ConditionOperator::Equals,
                value: Some("true".to_string()),
            }],
            next_step: "confirmar-dados".to_string(),
        };
        let named = Branch {
            when: vec![Condition {
                key: "nome".to_string(),
                operator: ConditionOperator::Exists,
                value: None,
            }],
            next_step: "resumo".to_string(),
        };
        let branches = vec![registered, named];

        let mut ctx = BTreeMap::new();
        assert_eq!(select_next("coleta-nome", &branches, &ctx), "coleta-nome");

        ctx.insert("nome".to_string(), "Ana".to_string());
        assert_eq!(select_next("coleta-nome", &branches, &ctx), "resumo");

        ctx.insert("__clienteCadastrado".to_string(), "true".to_string());
        assert_eq!(select_next("coleta-nome", &branches, &ctx), "confirmar-dados");
    }

    #[test]
    fn empty_values_count_as_missing() {
        let missing = Condition {
            key: "email".to_string(),
            operator: ConditionOperator::Missing,
            value: None,
        };
        let mut ctx = BTreeMap::new();
        ctx.insert("email".to_string(), String::new());
        assert!(missing.holds(&ctx));

        let differs = Condition {
            key: "email".to_string(),
            operator: ConditionOperator::NotEquals,
            value: Some("a@b.c".to_string()),
        };
        assert!(differs.holds(&ctx));
    }

    #[test]
    fn transfer_target_defaults_context_key() {
        let target = TransferTarget::default();
        assert_eq!(target.context_key(), DEFAULT_QUEUE_CONTEXT_KEY);

        let target = TransferTarget {
            queue_id: None,
            queue_context_key: Some("nucleo".to_string()),
        };
        assert_eq!(target.context_key(), "nucleo");
    }
}
