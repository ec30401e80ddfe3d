//! Flow interpreter: maps `(step, normalized input)` to a [`Transition`].
//!
//! Pure and deterministic. It never reads the clock, the store or the raw
//! (un-normalized) input, so identical `(flow version, step, input,
//! unmatched count)` always produce an identical transition. Applying the
//! transition, including picking a branch against the session context, is
//! the executor's job.

use std::collections::BTreeMap;

use serde::Serialize;
use switchboard_types::error::FlowError;
use switchboard_types::flow::{
    Branch, EXIT_TOKEN, FlowDefinition, FlowOption, OptionAction, Step, StepKind, TransferTarget,
};
use switchboard_types::session::Session;

use crate::triage::template::ANSWER_PLACEHOLDER;

/// Why a transfer to a human queue happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferReason {
    /// The contact picked a transfer option.
    Selected,
    /// Too many consecutive unmatched inputs.
    Confusion,
    /// The session entered a handoff step.
    HandoffStep,
}

/// Why a session finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Completed,
    /// The contact typed the exit token.
    Exit,
    /// The session cannot continue (e.g. its flow version vanished).
    Error,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Completed => "concluido",
            FinishReason::Exit => "sair",
            FinishReason::Error => "erro",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TransitionAction {
    /// Move to `next_step` unless a branch holds once the context writes
    /// are applied.
    Goto {
        next_step: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        branches: Vec<Branch>,
    },
    TransferQueue {
        target: TransferTarget,
        reason: TransferReason,
    },
    Finish {
        message: Option<String>,
        reason: FinishReason,
    },
    /// Unmatched input below the confusion threshold; `attempt` is the new
    /// consecutive-miss count.
    Retry {
        attempt: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    #[serde(flatten)]
    pub action: TransitionAction,
    /// `match_value` of the option that matched, or the exit token.
    pub matched_option: Option<String>,
    /// Writes declared by the matched option (or a capture), unresolved.
    pub context_writes: BTreeMap<String, Option<String>>,
}

impl Transition {
    fn bare(action: TransitionAction) -> Self {
        Self {
            action,
            matched_option: None,
            context_writes: BTreeMap::new(),
        }
    }
}

/// Trim and lowercase raw input.
pub fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Evaluate `normalized` at `step_id` of `flow`.
///
/// `prior_unmatched` is the consecutive-miss count before this input. The
/// `max_unmatched`-th consecutive miss forces a transfer to the step's
/// transfer target instead of another retry.
pub fn evaluate(
    flow: &FlowDefinition,
    step_id: &str,
    normalized: &str,
    prior_unmatched: u32,
    max_unmatched: u32,
) -> Result<Transition, FlowError> {
    let step = flow.step(step_id).ok_or_else(|| FlowError::UnknownStep {
        flow_id: flow.id.clone(),
        version: flow.version,
        step: step_id.to_string(),
    })?;
    Ok(evaluate_step(step, normalized, prior_unmatched, max_unmatched))
}

/// [`evaluate`] for a session positioned in `flow`.
pub fn evaluate_session(
    flow: &FlowDefinition,
    session: &Session,
    normalized: &str,
    max_unmatched: u32,
) -> Result<Transition, FlowError> {
    evaluate(
        flow,
        &session.current_step,
        normalized,
        session.unmatched_attempts(),
        max_unmatched,
    )
}

fn evaluate_step(step: &Step, normalized: &str, prior_unmatched: u32, max_unmatched: u32) -> Transition {
    if normalized == EXIT_TOKEN {
        return exit(step);
    }

    let miss = || {
        let attempt = prior_unmatched.saturating_add(1);
        if attempt >= max_unmatched {
            Transition::bare(TransitionAction::TransferQueue {
                target: step.transfer.clone(),
                reason: TransferReason::Confusion,
            })
        } else {
            Transition::bare(TransitionAction::Retry { attempt })
        }
    };

    match step.kind {
        StepKind::Terminal => Transition::bare(TransitionAction::Finish {
            message: None,
            reason: FinishReason::Completed,
        }),
        StepKind::Handoff => Transition::bare(TransitionAction::TransferQueue {
            target: step.transfer.clone(),
            reason: TransferReason::HandoffStep,
        }),
        StepKind::Capture => match &step.capture {
            Some(capture) if !normalized.is_empty() => Transition {
                action: TransitionAction::Goto {
                    next_step: capture.next_step.clone(),
                    branches: capture.branches.clone(),
                },
                matched_option: None,
                context_writes: BTreeMap::from([(
                    capture.variable.clone(),
                    Some(ANSWER_PLACEHOLDER.to_string()),
                )]),
            },
            _ => miss(),
        },
        StepKind::Menu => match step.options.iter().find(|o| o.matches(normalized)) {
            Some(option) => {
                let action = match &option.action {
                    OptionAction::Goto { next_step, branches } => TransitionAction::Goto {
                        next_step: next_step.clone(),
                        branches: branches.clone(),
                    },
                    OptionAction::TransferQueue { target } => TransitionAction::TransferQueue {
                        target: target.clone(),
                        reason: TransferReason::Selected,
                    },
                    OptionAction::Finish { message } => TransitionAction::Finish {
                        message: message.clone(),
                        reason: FinishReason::Completed,
                    },
                };
                selected(option, action)
            }
            None => miss(),
        },
    }
}

/// The exit token finishes from any step. A menu may declare its own
/// `finish` option for it to carry a message and context writes.
fn exit(step: &Step) -> Transition {
    let declared = step.options.iter().find_map(|o| match &o.action {
        OptionAction::Finish { message } if o.matches(EXIT_TOKEN) => Some((o, message)),
        _ => None,
    });
    match declared {
        Some((option, message)) => selected(
            option,
            TransitionAction::Finish {
                message: message.clone(),
                reason: FinishReason::Exit,
            },
        ),
        None => Transition {
            matched_option: Some(EXIT_TOKEN.to_string()),
            ..Transition::bare(TransitionAction::Finish {
                message: None,
                reason: FinishReason::Exit,
            })
        },
    }
}

fn selected(option: &FlowOption, action: TransitionAction) -> Transition {
    Transition {
        action,
        matched_option: Some(option.match_value.clone()),
        context_writes: option.context_writes.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::validate::tests::{branch, capture, flow, menu, option, sample_flow, terminal};

    #[test]
    fn matching_option_goes_to_next_step() {
        let flow = sample_flow();
        let t = evaluate(&flow, "boas-vindas", "1", 0, 3).unwrap();
        assert_eq!(
            t.action,
            TransitionAction::Goto {
                next_step: "suporte".to_string(),
                branches: vec![],
            }
        );
        assert_eq!(t.matched_option.as_deref(), Some("1"));
    }

    #[test]
    fn input_is_normalized() {
        assert_eq!(normalize("  SaIr \n"), "sair");
    }

    #[test]
    fn exit_token_finishes_from_any_step() {
        let flow = sample_flow();
        for step in ["boas-vindas", "suporte", "financeiro"] {
            let t = evaluate(&flow, step, "sair", 0, 3).unwrap();
            assert_eq!(
                t.action,
                TransitionAction::Finish {
                    message: None,
                    reason: FinishReason::Exit
                }
            );
        }
    }

    #[test]
    fn declared_exit_option_carries_its_message_and_writes() {
        let mut sair = option(
            "sair",
            OptionAction::Finish {
                message: Some("Atendimento cancelado.".to_string()),
            },
        );
        sair.context_writes
            .insert("cancelado".to_string(), Some("sim".to_string()));
        let mut f = sample_flow();
        f.steps.get_mut("boas-vindas").unwrap().options.push(sair);

        let t = evaluate(&f, "boas-vindas", "sair", 0, 3).unwrap();
        assert_eq!(
            t.action,
            TransitionAction::Finish {
                message: Some("Atendimento cancelado.".to_string()),
                reason: FinishReason::Exit
            }
        );
        assert_eq!(t.matched_option.as_deref(), Some("sair"));
        assert_eq!(t.context_writes.get("cancelado"), Some(&Some("sim".to_string())));

        // Steps without a declared exit option still honor the token.
        let t = evaluate(&f, "financeiro", "sair", 0, 3).unwrap();
        assert_eq!(
            t.action,
            TransitionAction::Finish {
                message: None,
                reason: FinishReason::Exit
            }
        );
    }

    #[test]
    fn capture_stores_answer_and_follows_branches() {
        let mut nome = capture("nome", "nomeCliente", "resumo");
        if let Some(c) = nome.capture.as_mut() {
            c.branches = vec![branch("vip", "sim", "gerente")];
        }
        let f = flow(
            "f",
            "nome",
            vec![nome, terminal("resumo", "ok"), terminal("gerente", "ok")],
        );

        let t = evaluate(&f, "nome", "ana souza", 0, 3).unwrap();
        assert_eq!(
            t.action,
            TransitionAction::Goto {
                next_step: "resumo".to_string(),
                branches: vec![branch("vip", "sim", "gerente")],
            }
        );
        assert_eq!(
            t.context_writes.get("nomeCliente"),
            Some(&Some(ANSWER_PLACEHOLDER.to_string()))
        );

        let empty = evaluate(&f, "nome", "", 0, 3).unwrap();
        assert_eq!(empty.action, TransitionAction::Retry { attempt: 1 });
        let exit = evaluate(&f, "nome", "sair", 0, 3).unwrap();
        assert!(matches!(
            exit.action,
            TransitionAction::Finish {
                reason: FinishReason::Exit,
                ..
            }
        ));
    }

    #[test]
    fn third_unmatched_input_transfers() {
        let flow = sample_flow();
        let first = evaluate(&flow, "boas-vindas", "9", 0, 3).unwrap();
        assert_eq!(first.action, TransitionAction::Retry { attempt: 1 });
        let second = evaluate(&flow, "boas-vindas", "9", 1, 3).unwrap();
        assert_eq!(second.action, TransitionAction::Retry { attempt: 2 });
        let third = evaluate(&flow, "boas-vindas", "9", 2, 3).unwrap();
        assert!(matches!(
            third.action,
            TransitionAction::TransferQueue {
                reason: TransferReason::Confusion,
                ..
            }
        ));
    }

    #[test]
    fn confusion_transfer_does_not_depend_on_step_content() {
        let mut flow = sample_flow();
        flow.steps.insert(
            "outro".to_string(),
            menu("outro", vec![option("a", OptionAction::Finish { message: None })]),
        );
        let t = evaluate(&flow, "outro", "zzz", 2, 3).unwrap();
        assert!(matches!(t.action, TransitionAction::TransferQueue { .. }));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let flow = sample_flow();
        for input in ["1", "2", "9", "sair", ""] {
            let a = evaluate(&flow, "boas-vindas", input, 1, 3).unwrap();
            let b = evaluate(&flow, "boas-vindas", input, 1, 3).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn terminal_step_finishes() {
        let mut flow = sample_flow();
        flow.steps
            .insert("fim".to_string(), terminal("fim", "Obrigado"));
        let t = evaluate(&flow, "fim", "qualquer", 0, 3).unwrap();
        assert!(matches!(
            t.action,
            TransitionAction::Finish {
                reason: FinishReason::Completed,
                ..
            }
        ));
    }

    #[test]
    fn unknown_step_is_an_error() {
        let err = evaluate(&sample_flow(), "nope", "1", 0, 3).unwrap_err();
        assert!(matches!(err, FlowError::UnknownStep { .. }));
    }
}
