//! Inactivity reaper for sessions and tickets.
//!
//! A subject idle for `timeout - warning` minutes gets one warning; once the
//! full timeout has passed (and the contact had the whole warning lead to
//! answer) it is closed: sessions become `EXPIRADA`, tickets `ENCERRADO`.
//! Any activity clears the warning, so a subject that answered after being
//! warned starts over and is never closed on the strength of that warning.
//! Decisions are re-evaluated inside each compare-and-swap.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use switchboard_types::config::InactivityPolicy;
use switchboard_types::event::{InactivitySubject, TriageEvent};
use switchboard_types::message::OutboundMessage;
use switchboard_types::session::{
    CLOSE_REASON_KEY, INACTIVITY_WARNED_AT_KEY, Session, SessionState,
};
use switchboard_types::ticket::Ticket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::OutboundSender;
use crate::event::EventBus;
use crate::monitor::deadline::DeadlineIndex;
use crate::repository::session::SessionRepository;
use crate::repository::ticket::TicketRepository;
use crate::repository::triage_log::TriageLogRepository;
use crate::routing::TicketRouter;
use crate::session::{Mutation, SessionStore};
use crate::triage::logger::TriageLogger;

/// Close reason recorded on reaped subjects.
pub const INACTIVITY_REASON: &str = "inatividade";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Wait,
    Warn,
    Close,
}

/// Decide what to do with a subject idle since `last_activity`.
fn verdict(
    policy: &InactivityPolicy,
    last_activity: DateTime<Utc>,
    warned_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Verdict {
    let idle = now - last_activity;
    let timeout = policy.timeout();
    // A warning older than the last activity no longer counts.
    let warned_at = warned_at.filter(|w| *w >= last_activity);

    match (policy.warning_lead(), warned_at) {
        (None, _) if idle >= timeout => Verdict::Close,
        (None, _) => Verdict::Wait,
        (Some(lead), Some(warned)) if idle >= timeout && now - warned >= lead => Verdict::Close,
        (Some(_), Some(_)) => Verdict::Wait,
        (Some(lead), None) if idle >= timeout - lead => Verdict::Warn,
        (Some(_), None) => Verdict::Wait,
    }
}

/// Earliest last-activity instant that can need attention at `now`.
fn candidate_cutoff(policy: &InactivityPolicy, now: DateTime<Utc>) -> DateTime<Utc> {
    match policy.warning_lead() {
        Some(lead) => now - (policy.timeout() - lead),
        None => now - policy.timeout(),
    }
}

/// Counts from one reaper pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub warned_sessions: usize,
    pub expired_sessions: usize,
    pub warned_tickets: usize,
    pub closed_tickets: usize,
}

pub struct InactivityReaper<S, T, L, O>
where
    S: SessionRepository,
    T: TicketRepository,
    L: TriageLogRepository,
    O: OutboundSender,
{
    sessions: Arc<SessionStore<S>>,
    router: Arc<TicketRouter<T>>,
    logger: Arc<TriageLogger<L>>,
    sender: Arc<O>,
    deadlines: Arc<DeadlineIndex>,
    events: EventBus,
    session_policy: InactivityPolicy,
    ticket_policy: InactivityPolicy,
    interval: Duration,
}

impl<S, T, L, O> InactivityReaper<S, T, L, O>
where
    S: SessionRepository + 'static,
    T: TicketRepository + 'static,
    L: TriageLogRepository + 'static,
    O: OutboundSender + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<SessionStore<S>>,
        router: Arc<TicketRouter<T>>,
        logger: Arc<TriageLogger<L>>,
        sender: Arc<O>,
        deadlines: Arc<DeadlineIndex>,
        events: EventBus,
        session_policy: InactivityPolicy,
        ticket_policy: InactivityPolicy,
        interval: Duration,
    ) -> Self {
        Self {
            sessions,
            router,
            logger,
            sender,
            deadlines,
            events,
            session_policy,
            ticket_policy,
            interval,
        }
    }

    /// One pass over idle sessions and tickets.
    pub async fn sweep(&self, now: DateTime<Utc>) -> ReapReport {
        let mut report = ReapReport::default();

        if self.session_policy.enabled {
            let cutoff = candidate_cutoff(&self.session_policy, now);
            for session_id in self.deadlines.idle_sessions(cutoff) {
                match self.reap_session(session_id, now).await {
                    Ok(Verdict::Warn) => report.warned_sessions += 1,
                    Ok(Verdict::Close) => report.expired_sessions += 1,
                    Ok(Verdict::Wait) => {}
                    Err(e) => tracing::warn!(%session_id, error = %e, "session inactivity check failed"),
                }
            }
        }

        if self.ticket_policy.enabled {
            let cutoff = candidate_cutoff(&self.ticket_policy, now);
            for ticket_id in self.deadlines.idle_tickets(cutoff) {
                match self.reap_ticket(ticket_id, now).await {
                    Ok(Verdict::Warn) => report.warned_tickets += 1,
                    Ok(Verdict::Close) => report.closed_tickets += 1,
                    Ok(Verdict::Wait) => {}
                    Err(e) => tracing::warn!(%ticket_id, error = %e, "ticket inactivity check failed"),
                }
            }
        }

        report
    }

    async fn reap_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Verdict, crate::triage::EngineError> {
        let policy = &self.session_policy;
        let outcome = self
            .sessions
            .update(session_id, |session| {
                if !session.is_active() || !policy.applies_to(session.state.as_str()) {
                    return Ok(Mutation::Skip(None));
                }
                let decided = verdict(
                    policy,
                    session.last_activity_at,
                    session.inactivity_warned_at(),
                    now,
                );
                let mut next = session.clone();
                match decided {
                    Verdict::Wait => return Ok(Mutation::Skip(None)),
                    Verdict::Warn => {
                        next.context
                            .insert(INACTIVITY_WARNED_AT_KEY.to_string(), now.to_rfc3339());
                    }
                    Verdict::Close => {
                        next.state = SessionState::Expirada;
                        next.context
                            .insert(CLOSE_REASON_KEY.to_string(), INACTIVITY_REASON.to_string());
                    }
                }
                Ok(Mutation::Write(next.clone(), Some((decided, next))))
            })
            .await;

        let (decided, session) = match outcome {
            Ok(Some(pair)) => pair,
            Ok(None) => return Ok(Verdict::Wait),
            Err(crate::triage::EngineError::SessionNotFound(_)) => {
                self.deadlines.cancel_session(&session_id);
                return Ok(Verdict::Wait);
            }
            Err(e) => return Err(e),
        };

        match decided {
            Verdict::Warn => {
                tracing::info!(%session_id, contact_id = %session.contact_id, "session inactivity warning");
                self.notify_session(&session, &policy.warning_message, now).await;
                self.events.publish(TriageEvent::InactivityWarning {
                    subject: InactivitySubject::Session(session_id),
                    contact_id: session.contact_id.clone(),
                });
            }
            Verdict::Close => {
                tracing::info!(%session_id, contact_id = %session.contact_id, "session expired by inactivity");
                self.notify_session(&session, &policy.closing_message, now).await;
                self.events.publish(TriageEvent::SessionClosed {
                    session_id,
                    contact_id: session.contact_id.clone(),
                    state: SessionState::Expirada,
                });
            }
            Verdict::Wait => {}
        }
        Ok(decided)
    }

    async fn reap_ticket(
        &self,
        ticket_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Verdict, switchboard_types::error::RoutingError> {
        use switchboard_types::error::RoutingError;

        let policy = &self.ticket_policy;
        let Some(ticket) = self.router.get_ticket(&ticket_id).await? else {
            self.deadlines.cancel_ticket(&ticket_id);
            return Ok(Verdict::Wait);
        };
        if ticket.is_closed() {
            self.deadlines.cancel_ticket(&ticket_id);
            return Ok(Verdict::Wait);
        }
        if !policy.applies_to(ticket.status.as_str()) {
            return Ok(Verdict::Wait);
        }

        let still = |t: &Ticket, expected: Verdict| {
            policy.applies_to(t.status.as_str())
                && verdict(policy, t.last_activity_at, t.inactivity_warned_at, now) == expected
        };

        let decided = verdict(policy, ticket.last_activity_at, ticket.inactivity_warned_at, now);
        let result = match decided {
            Verdict::Wait => return Ok(Verdict::Wait),
            Verdict::Warn => {
                self.router
                    .mark_warned_where(ticket_id, now, |t| still(t, Verdict::Warn))
                    .await
            }
            Verdict::Close => {
                self.router
                    .close_where(ticket_id, INACTIVITY_REASON, now, |t| still(t, Verdict::Close))
                    .await
            }
        };

        let (ticket, written) = match result {
            Ok(pair) => pair,
            Err(RoutingError::TicketClosed(_)) => return Ok(Verdict::Wait),
            Err(e) => return Err(e),
        };
        if !written {
            return Ok(Verdict::Wait);
        }

        match decided {
            Verdict::Warn => {
                tracing::info!(%ticket_id, "ticket inactivity warning");
                self.notify_ticket(&ticket, &policy.warning_message).await;
                self.events.publish(TriageEvent::InactivityWarning {
                    subject: InactivitySubject::Ticket(ticket_id),
                    contact_id: ticket.contact_id.clone(),
                });
            }
            Verdict::Close => {
                tracing::info!(%ticket_id, "ticket closed by inactivity");
                self.notify_ticket(&ticket, &policy.closing_message).await;
            }
            Verdict::Wait => {}
        }
        Ok(decided)
    }

    async fn notify_session(&self, session: &Session, text: &str, now: DateTime<Utc>) {
        let message = OutboundMessage {
            contact_id: session.contact_id.clone(),
            text: text.to_string(),
            session_id: Some(session.id),
        };
        if let Err(e) = self.sender.send(&message).await {
            tracing::warn!(session_id = %session.id, error = %e, "failed to deliver inactivity notice");
        }
        self.logger
            .outbound(session, &session.current_step, text, now)
            .await;
    }

    async fn notify_ticket(&self, ticket: &Ticket, text: &str) {
        let message = OutboundMessage {
            contact_id: ticket.contact_id.clone(),
            text: text.to_string(),
            session_id: ticket.session_id,
        };
        if let Err(e) = self.sender.send(&message).await {
            tracing::warn!(ticket_id = %ticket.id, error = %e, "failed to deliver inactivity notice");
        }
    }

    /// Sweep every `interval` until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(interval_secs = self.interval.as_secs(), "inactivity reaper started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.sweep(Utc::now()).await;
                    if report != ReapReport::default() {
                        tracing::info!(?report, "inactivity sweep finished");
                    }
                }
            }
        }
        tracing::info!("inactivity reaper stopped");
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration as ChronoDuration, TimeZone};
    use switchboard_types::config::SlaConfig;
    use switchboard_types::ticket::{DistributionStrategy, Queue, TicketStatus};

    use super::*;
    use crate::channel::RecordingSender;
    use crate::repository::memory::{
        InMemorySessionRepository, InMemoryTicketRepository, InMemoryTriageLogRepository,
    };
    use crate::retry::RetryPolicy;
    use crate::routing::RouteRequest;

    type Reaper = InactivityReaper<
        InMemorySessionRepository,
        InMemoryTicketRepository,
        InMemoryTriageLogRepository,
        RecordingSender,
    >;

    struct Fixture {
        reaper: Reaper,
        sessions: Arc<SessionStore<InMemorySessionRepository>>,
        router: Arc<TicketRouter<InMemoryTicketRepository>>,
        sender: RecordingSender,
        deadlines: Arc<DeadlineIndex>,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
    }

    fn minutes(m: i64) -> DateTime<Utc> {
        t0() + ChronoDuration::minutes(m)
    }

    fn fixture(session_policy: InactivityPolicy, ticket_policy: InactivityPolicy) -> Fixture {
        let deadlines = Arc::new(DeadlineIndex::new());
        let events = EventBus::new(64);
        let retry = RetryPolicy::immediate(3);
        let sessions = Arc::new(SessionStore::new(
            InMemorySessionRepository::new(),
            retry,
            Arc::clone(&deadlines),
        ));
        let router = Arc::new(TicketRouter::new(
            InMemoryTicketRepository::new(),
            events.clone(),
            retry,
            SlaConfig::default(),
            Arc::clone(&deadlines),
        ));
        let logger = Arc::new(TriageLogger::new(InMemoryTriageLogRepository::new(), retry));
        let sender = RecordingSender::new();
        let reaper = InactivityReaper::new(
            Arc::clone(&sessions),
            Arc::clone(&router),
            logger,
            Arc::new(sender.clone()),
            Arc::clone(&deadlines),
            events,
            session_policy,
            ticket_policy,
            Duration::from_secs(60),
        );
        Fixture {
            reaper,
            sessions,
            router,
            sender,
            deadlines,
        }
    }

    async fn open_session(f: &Fixture, at: DateTime<Utc>) -> Session {
        let session = Session::start("c1", "t1", "whatsapp", "f", 1, "inicio", None, at);
        f.sessions.open(session.clone()).await.unwrap();
        session
    }

    #[test]
    fn verdict_follows_policy_windows() {
        let policy = InactivityPolicy::session_default(); // 30 min, warn 5 before
        assert_eq!(verdict(&policy, t0(), None, minutes(10)), Verdict::Wait);
        assert_eq!(verdict(&policy, t0(), None, minutes(25)), Verdict::Warn);
        assert_eq!(verdict(&policy, t0(), Some(minutes(25)), minutes(27)), Verdict::Wait);
        assert_eq!(verdict(&policy, t0(), Some(minutes(25)), minutes(30)), Verdict::Close);
        // Warned late: the contact still gets the full lead.
        assert_eq!(verdict(&policy, t0(), Some(minutes(40)), minutes(42)), Verdict::Wait);
        // A warning from before the last activity is ignored.
        assert_eq!(verdict(&policy, minutes(20), Some(minutes(10)), minutes(45)), Verdict::Warn);
    }

    #[test]
    fn verdict_without_warning_closes_at_timeout() {
        let policy = InactivityPolicy {
            warning_minutes_before: None,
            ..InactivityPolicy::session_default()
        };
        assert_eq!(verdict(&policy, t0(), None, minutes(29)), Verdict::Wait);
        assert_eq!(verdict(&policy, t0(), None, minutes(30)), Verdict::Close);
    }

    #[tokio::test]
    async fn idle_session_is_warned_then_expired() {
        let f = fixture(InactivityPolicy::session_default(), InactivityPolicy::ticket_default());
        let session = open_session(&f, t0()).await;

        assert_eq!(f.reaper.sweep(minutes(10)).await, ReapReport::default());

        let report = f.reaper.sweep(minutes(26)).await;
        assert_eq!(report.warned_sessions, 1);
        // A second pass in the same window does not warn again.
        assert_eq!(f.reaper.sweep(minutes(27)).await.warned_sessions, 0);

        let report = f.reaper.sweep(minutes(31)).await;
        assert_eq!(report.expired_sessions, 1);

        let stored = f.sessions.get(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Expirada);
        assert!(!f.deadlines.is_tracking_session(&session.id));

        let texts = f.sender.texts_for("c1");
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0], InactivityPolicy::session_default().warning_message);
        assert_eq!(texts[1], InactivityPolicy::session_default().closing_message);
    }

    #[tokio::test]
    async fn activity_after_warning_prevents_expiry() {
        let f = fixture(InactivityPolicy::session_default(), InactivityPolicy::ticket_default());
        let session = open_session(&f, t0()).await;

        f.reaper.sweep(minutes(26)).await;

        // The contact answers after the warning.
        f.sessions
            .update(session.id, |s| {
                let mut next = s.clone();
                next.last_activity_at = minutes(28);
                next.context.remove(INACTIVITY_WARNED_AT_KEY);
                Ok(Mutation::Write(next, ()))
            })
            .await
            .unwrap();

        let report = f.reaper.sweep(minutes(31)).await;
        assert_eq!(report.expired_sessions, 0);
        let stored = f.sessions.get(&session.id).await.unwrap().unwrap();
        assert!(stored.is_active());
    }

    #[tokio::test]
    async fn statuses_outside_allow_list_are_ignored() {
        let policy = InactivityPolicy {
            applicable_statuses: Some(vec!["AGUARDANDO_INPUT".to_string()]),
            warning_minutes_before: None,
            ..InactivityPolicy::session_default()
        };
        let f = fixture(policy, InactivityPolicy::ticket_default());
        let session = open_session(&f, t0()).await; // ATIVA

        assert_eq!(f.reaper.sweep(minutes(120)).await.expired_sessions, 0);
        assert!(f.sessions.get(&session.id).await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn idle_ticket_is_warned_then_closed() {
        let ticket_policy = InactivityPolicy {
            timeout_minutes: 60,
            warning_minutes_before: Some(10),
            ..InactivityPolicy::ticket_default()
        };
        let f = fixture(InactivityPolicy::session_default(), ticket_policy);
        f.router
            .create_queue(Queue::new(
                "Q1",
                "Suporte",
                DistributionStrategy::RoundRobin,
                None,
                vec!["A".into()],
            ))
            .await
            .unwrap();
        let ticket = f
            .router
            .route(
                RouteRequest {
                    queue_id: "Q1".to_string(),
                    contact_id: "c7".to_string(),
                    tenant_id: "t1".to_string(),
                    session_id: None,
                    triage_context: BTreeMap::new(),
                },
                t0(),
            )
            .await
            .unwrap();

        assert_eq!(f.reaper.sweep(minutes(51)).await.warned_tickets, 1);
        assert_eq!(f.reaper.sweep(minutes(61)).await.closed_tickets, 1);

        let stored = f.router.get_ticket(&ticket.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Encerrado);
        assert_eq!(f.sender.texts_for("c7").len(), 2);
    }

    #[tokio::test]
    async fn disabled_policy_does_nothing() {
        let policy = InactivityPolicy {
            enabled: false,
            ..InactivityPolicy::session_default()
        };
        let f = fixture(policy, InactivityPolicy::ticket_default());
        open_session(&f, t0()).await;
        assert_eq!(f.reaper.sweep(minutes(500)).await, ReapReport::default());
    }
}
