//! Transition application.
//!
//! Turns an interpreter [`Transition`] into the next session record plus
//! the texts to send. Everything here is pure: the engine runs it inside a
//! [`SessionStore::update`](crate::session::SessionStore::update) closure,
//! which may call it again after a lost compare-and-swap. Transfers are the
//! one effect that cannot be planned purely (they create a ticket), so they
//! come back as [`Effect::Transfer`] for the engine to carry out.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use switchboard_types::config::MessageTemplates;
use switchboard_types::error::FlowError;
use switchboard_types::flow::{FlowDefinition, Step, StepKind, TransferTarget, select_next};
use switchboard_types::session::{
    CLOSE_REASON_KEY, INACTIVITY_WARNED_AT_KEY, Session, SessionState, UNMATCHED_ATTEMPTS_KEY,
};

use crate::session::Mutation;
use crate::triage::engine::Outcome;
use crate::triage::error::EngineError;
use crate::triage::interpreter::{
    FinishReason, TransferReason, TransitionAction, evaluate_session, normalize,
};
use crate::triage::template::{invalid_prompt, render, resolve_context_value, step_prompt};

/// What the engine must do after the session update.
#[derive(Debug, Clone)]
pub(crate) enum Effect {
    /// The session was written; send `texts`.
    Reply { texts: Vec<String>, outcome: Outcome },
    /// Nothing written yet: create a ticket, then close the session as
    /// transferred. `texts` go out before the transfer notice.
    Transfer {
        target: TransferTarget,
        reason: TransferReason,
        texts: Vec<String>,
    },
    /// The message was already applied.
    Duplicate,
    /// The session closed before the message could be applied.
    Inactive,
}

/// A planned (and, except for transfers, written) session change.
#[derive(Debug, Clone)]
pub(crate) struct Planned {
    /// The record the plan was made against.
    pub base: Session,
    /// The record after the change. For transfers, the snapshot to close.
    pub session: Session,
    /// Step the input was received at.
    pub input_step: String,
    pub matched_option: Option<String>,
    pub effect: Effect,
}

/// Result of entering a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Arrival {
    /// A menu: the session waits for input after `0`.
    Prompt(String),
    /// A terminal step: the session is finished, `0` is the final message.
    Finished(String),
    /// A handoff step: transfer to `target` after sending `prompt`.
    Handoff {
        target: TransferTarget,
        prompt: String,
    },
}

/// Position `next` at `step` and decide what entering it means.
pub(crate) fn arrive(next: &mut Session, step: &Step, messages: &MessageTemplates) -> Arrival {
    next.current_step = step.id.clone();
    next.context.remove(UNMATCHED_ATTEMPTS_KEY);

    match step.kind {
        StepKind::Menu | StepKind::Capture => {
            next.state = SessionState::Ativa;
            Arrival::Prompt(step_prompt(step, &next.context, messages))
        }
        StepKind::Terminal => {
            next.state = SessionState::Finalizada;
            next.context.insert(
                CLOSE_REASON_KEY.to_string(),
                FinishReason::Completed.as_str().to_string(),
            );
            Arrival::Finished(render(&step.prompt, &next.context))
        }
        StepKind::Handoff => Arrival::Handoff {
            target: step.transfer.clone(),
            prompt: render(&step.prompt, &next.context),
        },
    }
}

/// Finish `next` with `reason`.
pub(crate) fn finish(next: &mut Session, reason: FinishReason) {
    next.state = SessionState::Finalizada;
    next.context.remove(UNMATCHED_ATTEMPTS_KEY);
    next.context
        .insert(CLOSE_REASON_KEY.to_string(), reason.as_str().to_string());
}

/// Apply an option's declared context writes. A write whose value resolves
/// to nothing deletes the key.
pub(crate) fn apply_context_writes(
    context: &mut BTreeMap<String, String>,
    writes: &BTreeMap<String, Option<String>>,
    raw_answer: &str,
) {
    for (key, value) in writes {
        let resolved = value
            .as_deref()
            .and_then(|v| resolve_context_value(v, raw_answer, context));
        match resolved {
            Some(v) => {
                context.insert(key.clone(), v);
            }
            None => {
                context.remove(key);
            }
        }
    }
}

/// Inputs shared by every plan.
pub(crate) struct Input<'a> {
    pub raw_text: &'a str,
    pub message_key: &'a str,
    pub at: DateTime<Utc>,
    pub max_unmatched_attempts: u32,
    pub messages: &'a MessageTemplates,
}

/// Plan the effect of one inbound message on `current`.
pub(crate) fn plan_input(
    flow: &FlowDefinition,
    current: &Session,
    input: &Input<'_>,
) -> Result<Mutation<Planned>, EngineError> {
    let skip = |effect| {
        Ok(Mutation::Skip(Planned {
            base: current.clone(),
            session: current.clone(),
            input_step: current.current_step.clone(),
            matched_option: None,
            effect,
        }))
    };
    if current.last_message_key.as_deref() == Some(input.message_key) {
        return skip(Effect::Duplicate);
    }
    if !current.is_active() {
        return skip(Effect::Inactive);
    }

    let transition = evaluate_session(
        flow,
        current,
        &normalize(input.raw_text),
        input.max_unmatched_attempts,
    )?;

    let mut next = current.clone();
    next.last_message_key = Some(input.message_key.to_string());
    next.last_activity_at = input.at;
    next.context.remove(INACTIVITY_WARNED_AT_KEY);
    apply_context_writes(&mut next.context, &transition.context_writes, input.raw_text);

    let planned = |session: Session, effect: Effect| Planned {
        base: current.clone(),
        session,
        input_step: current.current_step.clone(),
        matched_option: transition.matched_option.clone(),
        effect,
    };

    let mutation = match transition.action.clone() {
        TransitionAction::Retry { attempt } => {
            let step = step_of(flow, &current.current_step)?;
            next.context
                .insert(UNMATCHED_ATTEMPTS_KEY.to_string(), attempt.to_string());
            next.state = SessionState::AguardandoInput;
            let text = match step.kind {
                StepKind::Capture => step_prompt(step, &next.context, input.messages),
                _ => invalid_prompt(step, input.messages),
            };
            let effect = Effect::Reply {
                texts: vec![text],
                outcome: Outcome::Reprompted { attempt },
            };
            Mutation::Write(next.clone(), planned(next, effect))
        }
        TransitionAction::Goto { next_step, branches } => {
            let next_step = select_next(&next_step, &branches, &next.context).to_string();
            let step = step_of(flow, &next_step)?;
            match arrive(&mut next, step, input.messages) {
                Arrival::Prompt(text) => {
                    let effect = Effect::Reply {
                        texts: vec![text],
                        outcome: Outcome::Advanced { step: next_step },
                    };
                    Mutation::Write(next.clone(), planned(next, effect))
                }
                Arrival::Finished(text) => {
                    let effect = Effect::Reply {
                        texts: non_empty(text),
                        outcome: Outcome::Finished {
                            state: SessionState::Finalizada,
                            reason: FinishReason::Completed,
                        },
                    };
                    Mutation::Write(next.clone(), planned(next, effect))
                }
                Arrival::Handoff { target, prompt } => Mutation::Skip(planned(
                    next,
                    Effect::Transfer {
                        target,
                        reason: TransferReason::HandoffStep,
                        texts: non_empty(prompt),
                    },
                )),
            }
        }
        TransitionAction::Finish { message, reason } => {
            finish(&mut next, reason);
            let text = match reason {
                FinishReason::Exit => Some(
                    message
                        .map(|m| render(&m, &next.context))
                        .unwrap_or_else(|| input.messages.exit.clone()),
                ),
                FinishReason::Error => Some(input.messages.flow_unavailable.clone()),
                FinishReason::Completed => message.map(|m| render(&m, &next.context)),
            };
            let effect = Effect::Reply {
                texts: text.into_iter().filter(|t| !t.is_empty()).collect(),
                outcome: Outcome::Finished {
                    state: SessionState::Finalizada,
                    reason,
                },
            };
            Mutation::Write(next.clone(), planned(next, effect))
        }
        TransitionAction::TransferQueue { target, reason } => Mutation::Skip(planned(
            next,
            Effect::Transfer {
                target,
                reason,
                texts: Vec::new(),
            },
        )),
    };
    Ok(mutation)
}

/// Re-apply the change `base -> next` onto `current`.
///
/// `current` is the latest stored record. When nobody wrote since `base`
/// it is `next` as planned; otherwise the concurrent writer's changes stay
/// and only the fields this change touched are overlaid.
pub(crate) fn rebase(base: &Session, next: &Session, current: &Session) -> Session {
    if current.version == base.version {
        return next.clone();
    }
    let mut out = current.clone();
    out.state = next.state;
    out.current_step = next.current_step.clone();
    if next.last_message_key != base.last_message_key {
        out.last_message_key = next.last_message_key.clone();
    }
    out.last_activity_at = out.last_activity_at.max(next.last_activity_at);
    for (key, value) in &next.context {
        if base.context.get(key) != Some(value) {
            out.context.insert(key.clone(), value.clone());
        }
    }
    for key in base.context.keys() {
        if !next.context.contains_key(key) {
            out.context.remove(key);
        }
    }
    out
}

/// Queue ids to try for a transfer, in order: the pinned queue or the one
/// named in context, then the configured fallback.
pub(crate) fn queue_candidates(
    target: &TransferTarget,
    context: &BTreeMap<String, String>,
    fallback: Option<&str>,
) -> Vec<String> {
    let primary = target.queue_id.clone().or_else(|| {
        context
            .get(target.context_key())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    });
    let mut out: Vec<String> = primary.into_iter().collect();
    if let Some(fallback) = fallback.filter(|f| !f.is_empty()) {
        if !out.iter().any(|q| q == fallback) {
            out.push(fallback.to_string());
        }
    }
    out
}

/// Context handed to a ticket: everything except engine bookkeeping keys.
pub(crate) fn public_context(context: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    context
        .iter()
        .filter(|(k, _)| !k.starts_with("__"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn step_of<'a>(flow: &'a FlowDefinition, step_id: &str) -> Result<&'a Step, FlowError> {
    flow.step(step_id).ok_or_else(|| FlowError::UnknownStep {
        flow_id: flow.id.clone(),
        version: flow.version,
        step: step_id.to_string(),
    })
}

fn non_empty(text: String) -> Vec<String> {
    if text.trim().is_empty() {
        Vec::new()
    } else {
        vec![text]
    }
}
