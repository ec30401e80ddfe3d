//! SLA escalation monitor.
//!
//! Every tick it takes the tickets whose SLA target has passed from the
//! deadline index and escalates each one at most once: level `N2`,
//! severity one tier up, `escalated_at` stamped. The `escalated_at` guard
//! is checked inside the compare-and-swap, so overlapping sweeps (or a
//! manual `sweep` racing the loop) still bump severity exactly once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use switchboard_types::error::RoutingError;
use switchboard_types::event::TriageEvent;
use switchboard_types::ticket::{AssignedLevel, Ticket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::monitor::deadline::DeadlineIndex;
use crate::repository::ticket::TicketRepository;
use crate::routing::TicketRouter;

pub struct EscalationMonitor<T: TicketRepository> {
    router: Arc<TicketRouter<T>>,
    deadlines: Arc<DeadlineIndex>,
    events: EventBus,
    interval: Duration,
}

impl<T: TicketRepository + 'static> EscalationMonitor<T> {
    pub fn new(
        router: Arc<TicketRouter<T>>,
        deadlines: Arc<DeadlineIndex>,
        events: EventBus,
        interval: Duration,
    ) -> Self {
        Self {
            router,
            deadlines,
            events,
            interval,
        }
    }

    /// Escalate every overdue ticket in the working set. Returns the
    /// tickets escalated by this call.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<Ticket> {
        let mut escalated = Vec::new();
        for ticket_id in self.deadlines.due_sla(now) {
            match self.escalate(ticket_id, now).await {
                Ok(Some(ticket)) => escalated.push(ticket),
                Ok(None) => {}
                Err(RoutingError::TicketClosed(_) | RoutingError::TicketNotFound(_)) => {
                    self.deadlines.cancel_ticket(&ticket_id);
                }
                Err(e) => {
                    // Stays tracked; the next tick retries.
                    tracing::warn!(%ticket_id, error = %e, "escalation failed");
                }
            }
        }
        escalated
    }

    async fn escalate(&self, ticket_id: Uuid, now: DateTime<Utc>) -> Result<Option<Ticket>, RoutingError> {
        let (ticket, written) = self
            .router
            .modify_if(ticket_id, |ticket| {
                let overdue = ticket.sla_target_at.is_some_and(|target| now > target);
                if ticket.escalated_at.is_some() || !overdue {
                    return Ok(None);
                }
                let mut next = ticket.clone();
                next.assigned_level = AssignedLevel::N2;
                next.severity = ticket.severity.bumped();
                next.escalated_at = Some(now);
                Ok(Some(next))
            })
            .await?;

        if !written {
            // Already escalated, or the target moved: re-sync the index.
            match (ticket.escalated_at, ticket.sla_target_at) {
                (None, Some(target)) => self.deadlines.track_sla(ticket.id, target),
                _ => self.deadlines.cancel_sla(&ticket.id),
            }
            return Ok(None);
        }

        self.deadlines.cancel_sla(&ticket.id);
        tracing::warn!(
            %ticket_id,
            queue_id = %ticket.queue_id,
            severity = %ticket.severity,
            "SLA target passed, ticket escalated to N2"
        );
        self.events.publish(TriageEvent::TicketEscalated {
            ticket_id: ticket.id,
            queue_id: ticket.queue_id.clone(),
            severity: ticket.severity,
            assigned_level: ticket.assigned_level,
            escalated_at: now,
        });
        Ok(Some(ticket))
    }

    /// Sweep every `interval` until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(interval_secs = self.interval.as_secs(), "escalation monitor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let escalated = self.sweep(Utc::now()).await;
                    if !escalated.is_empty() {
                        tracing::info!(count = escalated.len(), "escalation sweep finished");
                    }
                }
            }
        }
        tracing::info!("escalation monitor stopped");
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Duration as ChronoDuration;
    use switchboard_types::config::SlaConfig;
    use switchboard_types::ticket::{DistributionStrategy, Queue, Severity};

    use super::*;
    use crate::repository::memory::InMemoryTicketRepository;
    use crate::retry::RetryPolicy;
    use crate::routing::RouteRequest;

    struct Fixture {
        router: Arc<TicketRouter<InMemoryTicketRepository>>,
        monitor: EscalationMonitor<InMemoryTicketRepository>,
        deadlines: Arc<DeadlineIndex>,
        events: EventBus,
    }

    async fn fixture() -> Fixture {
        let deadlines = Arc::new(DeadlineIndex::new());
        let events = EventBus::new(64);
        let router = Arc::new(TicketRouter::new(
            InMemoryTicketRepository::new(),
            events.clone(),
            RetryPolicy::immediate(3),
            SlaConfig::default(),
            Arc::clone(&deadlines),
        ));
        router
            .create_queue(Queue::new(
                "Q1",
                "Suporte",
                DistributionStrategy::RoundRobin,
                None,
                vec!["A".into()],
            ))
            .await
            .unwrap();
        let monitor = EscalationMonitor::new(
            Arc::clone(&router),
            Arc::clone(&deadlines),
            events.clone(),
            Duration::from_secs(30),
        );
        Fixture {
            router,
            monitor,
            deadlines,
            events,
        }
    }

    async fn ticket(f: &Fixture, created: DateTime<Utc>) -> Ticket {
        f.router
            .route(
                RouteRequest {
                    queue_id: "Q1".to_string(),
                    contact_id: "c1".to_string(),
                    tenant_id: "t1".to_string(),
                    session_id: None,
                    triage_context: BTreeMap::new(),
                },
                created,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn overdue_ticket_escalates_once() {
        let f = fixture().await;
        let created = Utc::now();
        let t = ticket(&f, created).await;
        let late = created + ChronoDuration::minutes(241);

        let first = f.monitor.sweep(late).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].severity, Severity::Alta);
        assert_eq!(first[0].assigned_level, AssignedLevel::N2);
        assert_eq!(first[0].escalated_at, Some(late));

        // Force the ticket back into the working set: still a no-op.
        f.deadlines.track_sla(t.id, t.sla_target_at.unwrap());
        let second = f.monitor.sweep(late + ChronoDuration::minutes(5)).await;
        assert!(second.is_empty());

        let stored = f.router.get_ticket(&t.id).await.unwrap().unwrap();
        assert_eq!(stored.severity, Severity::Alta);
        assert!(!f.deadlines.is_tracking_sla(&t.id));
    }

    #[tokio::test]
    async fn ticket_within_target_is_left_alone() {
        let f = fixture().await;
        let created = Utc::now();
        let t = ticket(&f, created).await;

        assert!(f.monitor.sweep(created + ChronoDuration::minutes(239)).await.is_empty());
        assert!(f.deadlines.is_tracking_sla(&t.id));
    }

    #[tokio::test]
    async fn closed_ticket_never_escalates() {
        let f = fixture().await;
        let created = Utc::now();
        let t = ticket(&f, created).await;
        f.router.close_ticket(t.id, "resolvido", created).await.unwrap();

        // Even if a stale entry lingers, the sweep drops it.
        f.deadlines.track_sla(t.id, t.sla_target_at.unwrap());
        assert!(f.monitor.sweep(created + ChronoDuration::days(1)).await.is_empty());
        assert!(!f.deadlines.is_tracking_sla(&t.id));
    }

    #[tokio::test]
    async fn escalation_is_published() {
        let f = fixture().await;
        let mut rx = f.events.subscribe();
        let created = Utc::now();
        let t = ticket(&f, created).await;

        f.monitor.sweep(created + ChronoDuration::hours(5)).await;

        let mut escalated = None;
        while let Ok(event) = rx.try_recv() {
            if let TriageEvent::TicketEscalated { ticket_id, .. } = event {
                escalated = Some(ticket_id);
            }
        }
        assert_eq!(escalated, Some(t.id));
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let f = fixture().await;
        let cancel = CancellationToken::new();
        let handle = Arc::new(f.monitor).spawn(cancel.clone());
        cancel.cancel();
        handle.await.unwrap();
    }
}
