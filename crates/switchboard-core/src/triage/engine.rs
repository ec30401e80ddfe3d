//! Triage engine: the entry point for inbound contact messages.
//!
//! For each message the engine resolves (or opens) the contact's session,
//! plans the transition against the session's pinned flow version, writes
//! it under compare-and-swap, then performs the side effects: ticket
//! creation for transfers, outbound messages, audit entries and events.
//! Side effects run only after the write wins, so a redelivered message
//! produces none of them twice. Applied message keys are also remembered
//! per contact beyond the session, so a redelivery that arrives after the
//! session closed, or behind newer messages, is still a no-op.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use switchboard_types::config::{GlobalConfig, MessageTemplates};
use switchboard_types::error::{FlowError, RoutingError};
use switchboard_types::event::TriageEvent;
use switchboard_types::flow::{FlowDefinition, TransferTarget};
use switchboard_types::message::{InboundMessage, OutboundMessage};
use switchboard_types::session::{
    Session, SessionState, TICKET_ID_KEY, UNMATCHED_ATTEMPTS_KEY,
};
use uuid::Uuid;

use crate::channel::OutboundSender;
use crate::event::EventBus;
use crate::flow::FlowDefinitionStore;
use crate::repository::flow::FlowRepository;
use crate::repository::session::SessionRepository;
use crate::repository::ticket::TicketRepository;
use crate::repository::triage_log::TriageLogRepository;
use crate::routing::{RouteRequest, TicketRouter};
use crate::session::{Mutation, OpenedSession, SessionStore};
use crate::triage::error::EngineError;
use crate::triage::executor::{
    Arrival, Effect, Input, arrive, finish, plan_input, public_context, queue_candidates, rebase,
};
use crate::triage::interpreter::{FinishReason, TransferReason};
use crate::triage::logger::TriageLogger;
use crate::triage::template::render;

/// Times a message may find its session closed underneath it before the
/// engine gives up.
const SESSION_ATTEMPTS: u32 = 3;

/// What handling one inbound message did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Outcome {
    /// A new session was opened at `step`.
    Started { step: String },
    Advanced { step: String },
    Reprompted { attempt: u32 },
    Finished {
        state: SessionState,
        reason: FinishReason,
    },
    Transferred {
        ticket_id: Uuid,
        queue_id: String,
        assignee_id: Option<String>,
    },
    /// The message had already been applied; nothing was sent.
    Duplicate,
    /// No flow could be resolved; no session was created.
    FlowUnavailable,
}

/// Result of [`TriageEngine::handle`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub session_id: Option<Uuid>,
    #[serde(flatten)]
    pub outcome: Outcome,
    /// Texts sent to the contact, in order.
    pub messages: Vec<String>,
}

/// Engine knobs taken from [`GlobalConfig`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_unmatched_attempts: u32,
    pub fallback_queue_id: Option<String>,
    /// Applied message keys remembered per contact.
    pub applied_message_window: usize,
    pub messages: MessageTemplates,
}

impl EngineSettings {
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            max_unmatched_attempts: config.max_unmatched_attempts.max(1),
            applied_message_window: config.applied_message_window.max(1),
            fallback_queue_id: config.fallback_queue_id.clone(),
            messages: config.messages.clone(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&GlobalConfig::default())
    }
}

/// Redelivery key of an inbound message: the provider id when present,
/// otherwise a SHA-256 over contact, receive instant and text.
pub fn message_key(message: &InboundMessage) -> String {
    if let Some(id) = message.message_id.as_deref().filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(message.contact_id.as_bytes());
    hasher.update(b"|");
    hasher.update(message.received_at.to_rfc3339().as_bytes());
    hasher.update(b"|");
    hasher.update(message.raw_text.as_bytes());
    hex::encode(hasher.finalize())
}

enum Opened {
    Done(Reply),
    /// Another message opened a session for the contact first.
    Lost(Session),
}

pub struct TriageEngine<F, S, T, L, O>
where
    F: FlowRepository,
    S: SessionRepository,
    T: TicketRepository,
    L: TriageLogRepository,
    O: OutboundSender,
{
    flows: Arc<FlowDefinitionStore<F>>,
    sessions: Arc<SessionStore<S>>,
    router: Arc<TicketRouter<T>>,
    logger: Arc<TriageLogger<L>>,
    sender: Arc<O>,
    events: EventBus,
    settings: EngineSettings,
}

impl<F, S, T, L, O> TriageEngine<F, S, T, L, O>
where
    F: FlowRepository,
    S: SessionRepository,
    T: TicketRepository,
    L: TriageLogRepository,
    O: OutboundSender,
{
    pub fn new(
        flows: Arc<FlowDefinitionStore<F>>,
        sessions: Arc<SessionStore<S>>,
        router: Arc<TicketRouter<T>>,
        logger: Arc<TriageLogger<L>>,
        sender: Arc<O>,
        events: EventBus,
        settings: EngineSettings,
    ) -> Self {
        Self {
            flows,
            sessions,
            router,
            logger,
            sender,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Process one inbound message.
    pub async fn handle(&self, message: InboundMessage) -> Result<Reply, EngineError> {
        let key = message_key(&message);
        tracing::debug!(contact_id = %message.contact_id, key = %key, "inbound message");

        if self.sessions.message_applied(&message.contact_id, &key).await? {
            tracing::debug!(contact_id = %message.contact_id, key = %key, "ignoring redelivered message");
            return Ok(Reply {
                session_id: None,
                outcome: Outcome::Duplicate,
                messages: Vec::new(),
            });
        }

        let reply = self.apply(&message, &key).await?;
        if reply.outcome != Outcome::Duplicate {
            // The message already took effect; failing here would only
            // invite a redelivery the session check may no longer catch.
            if let Err(e) = self
                .sessions
                .record_applied(
                    &message.contact_id,
                    &key,
                    message.received_at,
                    self.settings.applied_message_window,
                )
                .await
            {
                tracing::warn!(contact_id = %message.contact_id, key = %key, error = %e, "could not record applied message");
            }
        }
        Ok(reply)
    }

    async fn apply(&self, message: &InboundMessage, key: &str) -> Result<Reply, EngineError> {
        for _ in 0..SESSION_ATTEMPTS {
            let session = match self.sessions.active_for(&message.contact_id).await? {
                Some(session) => session,
                None => match self.open_session(message, key).await? {
                    Opened::Done(reply) => return Ok(reply),
                    Opened::Lost(existing) => existing,
                },
            };
            if let Some(reply) = self.continue_session(session, message, key).await? {
                return Ok(reply);
            }
            // Closed underneath us: the message belongs to a new session.
        }
        Err(EngineError::ConflictRetriesExhausted {
            attempts: SESSION_ATTEMPTS,
        })
    }

    async fn open_session(&self, message: &InboundMessage, key: &str) -> Result<Opened, EngineError> {
        let Some(flow) = self
            .flows
            .resolve_for_new_session(message.flow_id.as_deref())
            .await?
        else {
            tracing::warn!(
                contact_id = %message.contact_id,
                requested = ?message.flow_id,
                "no flow available for a new session"
            );
            let text = self.settings.messages.flow_unavailable.clone();
            self.send(&message.contact_id, None, &text).await;
            return Ok(Opened::Done(Reply {
                session_id: None,
                outcome: Outcome::FlowUnavailable,
                messages: vec![text],
            }));
        };

        let at = message.received_at;
        let fresh = Session::start(
            &message.contact_id,
            &message.tenant_id,
            &message.channel,
            &flow.id,
            flow.version,
            &flow.initial_step,
            Some(key.to_string()),
            at,
        );
        let session = match self.sessions.open(fresh).await? {
            OpenedSession::Created(session) => session,
            OpenedSession::Existing(existing) => return Ok(Opened::Lost(existing)),
        };

        tracing::info!(
            session_id = %session.id,
            contact_id = %session.contact_id,
            flow_id = %flow.id,
            flow_version = flow.version,
            "started session"
        );
        self.logger
            .inbound(&session, &session.current_step, &message.raw_text, None, at)
            .await;
        self.events.publish(TriageEvent::SessionStarted {
            session_id: session.id,
            contact_id: session.contact_id.clone(),
            flow_id: flow.id.clone(),
            flow_version: flow.version,
        });

        let step = step_of(&flow, &flow.initial_step)?;
        let mut entered = session.clone();
        let reply = match arrive(&mut entered, step, &self.settings.messages) {
            Arrival::Prompt(text) => {
                let texts = vec![text];
                self.deliver(&session, &texts, at).await;
                Reply {
                    session_id: Some(session.id),
                    outcome: Outcome::Started {
                        step: session.current_step.clone(),
                    },
                    messages: texts,
                }
            }
            Arrival::Finished(text) => {
                self.close_with(
                    &session,
                    entered,
                    non_empty(text),
                    Outcome::Finished {
                        state: SessionState::Finalizada,
                        reason: FinishReason::Completed,
                    },
                    at,
                )
                .await?
            }
            Arrival::Handoff { target, prompt } => {
                self.transfer(
                    &session,
                    entered,
                    target,
                    TransferReason::HandoffStep,
                    non_empty(prompt),
                    at,
                )
                .await?
            }
        };
        Ok(Opened::Done(reply))
    }

    /// Apply `message` to an active session. `None` when the session
    /// turned out to be closed and the message must open a new one.
    async fn continue_session(
        &self,
        session: Session,
        message: &InboundMessage,
        key: &str,
    ) -> Result<Option<Reply>, EngineError> {
        let at = message.received_at;

        let Some(flow) = self
            .flows
            .get_version(&session.flow_id, session.flow_version)
            .await?
        else {
            return self.abandon_session(session, message, key).await;
        };

        let input = Input {
            raw_text: &message.raw_text,
            message_key: key,
            at,
            max_unmatched_attempts: self.settings.max_unmatched_attempts,
            messages: &self.settings.messages,
        };
        let planned = self
            .sessions
            .update(session.id, |current| plan_input(&flow, current, &input))
            .await?;

        let session_id = planned.session.id;
        match planned.effect {
            Effect::Duplicate => {
                tracing::debug!(%session_id, key, "ignoring redelivered message");
                Ok(Some(Reply {
                    session_id: Some(session_id),
                    outcome: Outcome::Duplicate,
                    messages: Vec::new(),
                }))
            }
            Effect::Inactive => Ok(None),
            Effect::Reply { texts, outcome } => {
                self.logger
                    .inbound(
                        &planned.session,
                        &planned.input_step,
                        &message.raw_text,
                        planned.matched_option.as_deref(),
                        at,
                    )
                    .await;
                tracing::debug!(
                    %session_id,
                    from = %planned.input_step,
                    to = %planned.session.current_step,
                    ?outcome,
                    "applied transition"
                );
                self.deliver(&planned.session, &texts, at).await;
                if !planned.session.is_active() {
                    self.publish_closed(&planned.session);
                }
                Ok(Some(Reply {
                    session_id: Some(session_id),
                    outcome,
                    messages: texts,
                }))
            }
            Effect::Transfer {
                target,
                reason,
                texts,
            } => {
                self.logger
                    .inbound(
                        &planned.session,
                        &planned.input_step,
                        &message.raw_text,
                        planned.matched_option.as_deref(),
                        at,
                    )
                    .await;
                self.transfer(&planned.base, planned.session, target, reason, texts, at)
                    .await
                    .map(Some)
            }
        }
    }

    /// The session's pinned flow version is gone: finish it with the
    /// unavailable message rather than guess at another version.
    async fn abandon_session(
        &self,
        session: Session,
        message: &InboundMessage,
        key: &str,
    ) -> Result<Option<Reply>, EngineError> {
        if session.last_message_key.as_deref() == Some(key) {
            return Ok(Some(Reply {
                session_id: Some(session.id),
                outcome: Outcome::Duplicate,
                messages: Vec::new(),
            }));
        }
        tracing::error!(
            session_id = %session.id,
            flow_id = %session.flow_id,
            flow_version = session.flow_version,
            "pinned flow version missing, finishing session"
        );

        let at = message.received_at;
        let mut next = session.clone();
        next.last_message_key = Some(key.to_string());
        next.last_activity_at = at;
        finish(&mut next, FinishReason::Error);
        self.logger
            .inbound(&session, &session.current_step, &message.raw_text, None, at)
            .await;
        self.close_with(
            &session,
            next,
            vec![self.settings.messages.flow_unavailable.clone()],
            Outcome::Finished {
                state: SessionState::Finalizada,
                reason: FinishReason::Error,
            },
            at,
        )
        .await
        .map(Some)
    }

    /// Create the ticket for a transfer, then close the session as
    /// `TRANSFERIDA`. Without any resolvable queue the session finishes
    /// with the no-queue message instead.
    ///
    /// `snapshot` is `base` with the transition applied. If the session was
    /// closed by someone else while routing, the ticket stands: the contact
    /// asked for a human and still gets the notice.
    async fn transfer(
        &self,
        base: &Session,
        snapshot: Session,
        target: TransferTarget,
        reason: TransferReason,
        mut texts: Vec<String>,
        at: DateTime<Utc>,
    ) -> Result<Reply, EngineError> {
        let candidates = queue_candidates(
            &target,
            &snapshot.context,
            self.settings.fallback_queue_id.as_deref(),
        );

        let mut routed = None;
        for queue_id in candidates {
            let request = RouteRequest {
                queue_id,
                contact_id: snapshot.contact_id.clone(),
                tenant_id: snapshot.tenant_id.clone(),
                session_id: Some(snapshot.id),
                triage_context: public_context(&snapshot.context),
            };
            match self.router.route(request, at).await {
                Ok(ticket) => {
                    routed = Some(ticket);
                    break;
                }
                Err(RoutingError::QueueNotFound(queue_id)) => {
                    tracing::warn!(session_id = %snapshot.id, %queue_id, "transfer queue not found");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let Some(ticket) = routed else {
            tracing::warn!(session_id = %snapshot.id, ?reason, "no queue resolved for transfer");
            let mut next = snapshot;
            finish(&mut next, FinishReason::Error);
            texts.push(self.settings.messages.no_queue.clone());
            return self
                .close_with(
                    base,
                    next,
                    texts,
                    Outcome::Finished {
                        state: SessionState::Finalizada,
                        reason: FinishReason::Error,
                    },
                    at,
                )
                .await;
        };

        let mut next = snapshot;
        next.state = SessionState::Transferida;
        next.context.remove(UNMATCHED_ATTEMPTS_KEY);
        next.context
            .insert(TICKET_ID_KEY.to_string(), ticket.id.to_string());
        let notice = if ticket.assignee_id.is_some() {
            &self.settings.messages.transferred
        } else {
            &self.settings.messages.queued
        };
        texts.push(render(notice, &next.context));

        tracing::info!(
            session_id = %next.id,
            ticket_id = %ticket.id,
            queue_id = %ticket.queue_id,
            ?reason,
            "session transferred"
        );
        match self.write_close(base, &next).await? {
            Some(closed) => {
                self.deliver(&closed, &texts, at).await;
                self.publish_closed(&closed);
            }
            None => {
                tracing::warn!(
                    session_id = %next.id,
                    ticket_id = %ticket.id,
                    "session closed while routing, keeping the ticket"
                );
                self.deliver(&next, &texts, at).await;
            }
        }
        Ok(Reply {
            session_id: Some(next.id),
            outcome: Outcome::Transferred {
                ticket_id: ticket.id,
                queue_id: ticket.queue_id.clone(),
                assignee_id: ticket.assignee_id.clone(),
            },
            messages: texts,
        })
    }

    /// Close the session with the change `base -> next`, then send `texts`
    /// and announce it.
    async fn close_with(
        &self,
        base: &Session,
        next: Session,
        texts: Vec<String>,
        outcome: Outcome,
        at: DateTime<Utc>,
    ) -> Result<Reply, EngineError> {
        let session_id = next.id;
        let Some(closed) = self.write_close(base, &next).await? else {
            tracing::warn!(%session_id, "session closed concurrently, reply dropped");
            return Ok(Reply {
                session_id: Some(session_id),
                outcome: Outcome::Duplicate,
                messages: Vec::new(),
            });
        };

        self.deliver(&closed, &texts, at).await;
        self.publish_closed(&closed);
        Ok(Reply {
            session_id: Some(session_id),
            outcome,
            messages: texts,
        })
    }

    /// Write the terminal change `base -> next` onto the latest stored
    /// record. `None` when the session is no longer active.
    async fn write_close(&self, base: &Session, next: &Session) -> Result<Option<Session>, EngineError> {
        self.sessions
            .update(next.id, |current| {
                if !current.is_active() {
                    return Ok(Mutation::Skip(None));
                }
                let mut written = rebase(base, next, current);
                written.version = current.version + 1;
                Ok(Mutation::Write(written.clone(), Some(written)))
            })
            .await
    }

    fn publish_closed(&self, session: &Session) {
        tracing::info!(session_id = %session.id, state = %session.state.as_str(), "session closed");
        self.events.publish(TriageEvent::SessionClosed {
            session_id: session.id,
            contact_id: session.contact_id.clone(),
            state: session.state,
        });
    }

    /// Send `texts` in order and record each in the audit trail.
    async fn deliver(&self, session: &Session, texts: &[String], at: DateTime<Utc>) {
        for text in texts {
            self.send(&session.contact_id, Some(session.id), text).await;
            self.logger
                .outbound(session, &session.current_step, text, at)
                .await;
        }
    }

    async fn send(&self, contact_id: &str, session_id: Option<Uuid>, text: &str) {
        let message = OutboundMessage {
            contact_id: contact_id.to_string(),
            text: text.to_string(),
            session_id,
        };
        if let Err(e) = self.sender.send(&message).await {
            tracing::warn!(contact_id, error = %e, "outbound delivery failed");
        }
    }
}

fn step_of<'a>(
    flow: &'a FlowDefinition,
    step_id: &str,
) -> Result<&'a switchboard_types::flow::Step, FlowError> {
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
