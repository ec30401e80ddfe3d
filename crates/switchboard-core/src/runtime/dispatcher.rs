//! Per-contact message dispatcher.
//!
//! Every contact gets a bounded `mpsc` mailbox drained by one worker task,
//! so messages from the same contact are handled strictly in arrival order
//! while different contacts proceed in parallel. Workers are spawned on
//! first use and retire after a quiet period; the caller waits for the
//! handler's result on a `oneshot`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use switchboard_types::config::MonitorConfig;
use switchboard_types::message::InboundMessage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::channel::OutboundSender;
use crate::repository::flow::FlowRepository;
use crate::repository::session::SessionRepository;
use crate::repository::ticket::TicketRepository;
use crate::repository::triage_log::TriageLogRepository;
use crate::triage::{EngineError, Reply, TriageEngine};

/// Something that processes one inbound message to completion.
pub trait InboundHandler: Send + Sync + 'static {
    fn handle(
        &self,
        message: InboundMessage,
    ) -> impl std::future::Future<Output = Result<Reply, EngineError>> + Send;
}

impl<F, S, T, L, O> InboundHandler for TriageEngine<F, S, T, L, O>
where
    F: FlowRepository + 'static,
    S: SessionRepository + 'static,
    T: TicketRepository + 'static,
    L: TriageLogRepository + 'static,
    O: OutboundSender + 'static,
{
    async fn handle(&self, message: InboundMessage) -> Result<Reply, EngineError> {
        TriageEngine::handle(self, message).await
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The contact's mailbox is at capacity.
    #[error("mailbox full for contact {contact_id}")]
    MailboxFull { contact_id: String },

    #[error("contact worker stopped before replying")]
    WorkerGone,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl DispatchError {
    /// Whether the channel adapter may redeliver the message later.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DispatchError::MailboxFull { .. } | DispatchError::WorkerGone => true,
            DispatchError::Engine(e) => e.is_recoverable(),
        }
    }
}

struct Envelope {
    message: InboundMessage,
    reply: oneshot::Sender<Result<Reply, EngineError>>,
}

struct Mailbox {
    id: u64,
    sender: mpsc::Sender<Envelope>,
}

/// Routes inbound messages to per-contact workers.
pub struct ContactDispatcher<H: InboundHandler> {
    handler: Arc<H>,
    mailboxes: Arc<DashMap<String, Mailbox>>,
    next_id: AtomicU64,
    capacity: usize,
    idle: Duration,
}

impl<H: InboundHandler> ContactDispatcher<H> {
    pub fn new(handler: Arc<H>, capacity: usize, idle: Duration) -> Self {
        Self {
            handler,
            mailboxes: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            idle,
        }
    }

    pub fn from_config(handler: Arc<H>, config: &MonitorConfig) -> Self {
        Self::new(
            handler,
            config.mailbox_capacity,
            Duration::from_secs(config.mailbox_idle_secs.max(1)),
        )
    }

    /// Number of contacts with a live worker.
    pub fn active_mailboxes(&self) -> usize {
        self.mailboxes.len()
    }

    /// Queue `message` behind earlier messages of the same contact and wait
    /// for its result.
    pub async fn dispatch(&self, message: InboundMessage) -> Result<Reply, DispatchError> {
        let contact_id = message.contact_id.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        let mut envelope = Envelope {
            message,
            reply: reply_tx,
        };

        // A worker that died without retiring leaves a closed mailbox; one
        // retry reaches its replacement.
        for _ in 0..2 {
            let (mailbox_id, sent) = self.enqueue(&contact_id, envelope);
            match sent {
                Ok(()) => {
                    return match reply_rx.await {
                        Ok(result) => result.map_err(DispatchError::from),
                        Err(_) => Err(DispatchError::WorkerGone),
                    };
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(%contact_id, "contact mailbox full, refusing message");
                    return Err(DispatchError::MailboxFull { contact_id });
                }
                Err(mpsc::error::TrySendError::Closed(returned)) => {
                    self.mailboxes
                        .remove_if(&contact_id, |_, mailbox| mailbox.id == mailbox_id);
                    envelope = returned;
                }
            }
        }
        Err(DispatchError::WorkerGone)
    }

    /// Send into the contact's mailbox, spawning its worker if needed.
    ///
    /// The send happens while the map entry is locked. A retiring worker
    /// checks for an empty mailbox under the same lock, so an envelope is
    /// either seen by that check or delivered to a fresh mailbox.
    fn enqueue(
        &self,
        contact_id: &str,
        envelope: Envelope,
    ) -> (u64, Result<(), mpsc::error::TrySendError<Envelope>>) {
        let entry = self
            .mailboxes
            .entry(contact_id.to_string())
            .or_insert_with(|| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (sender, receiver) = mpsc::channel(self.capacity);
                tokio::spawn(run_worker(
                    contact_id.to_string(),
                    id,
                    Arc::clone(&self.handler),
                    receiver,
                    Arc::clone(&self.mailboxes),
                    self.idle,
                ));
                tracing::debug!(%contact_id, mailbox_id = id, "spawned contact worker");
                Mailbox { id, sender }
            });
        (entry.id, entry.sender.try_send(envelope))
    }
}

async fn run_worker<H: InboundHandler>(
    contact_id: String,
    id: u64,
    handler: Arc<H>,
    mut receiver: mpsc::Receiver<Envelope>,
    mailboxes: Arc<DashMap<String, Mailbox>>,
    idle: Duration,
) {
    loop {
        match tokio::time::timeout(idle, receiver.recv()).await {
            Ok(Some(envelope)) => process(&contact_id, handler.as_ref(), envelope).await,
            Ok(None) => break,
            Err(_) => {
                // Retire only if nothing slipped in. Senders hold the map
                // lock while sending, so after removal no envelope can reach
                // this receiver and no successor can run alongside us.
                let retired = mailboxes
                    .remove_if(&contact_id, |_, mailbox| {
                        mailbox.id == id && receiver.is_empty()
                    })
                    .is_some();
                if retired {
                    receiver.close();
                    break;
                }
            }
        }
    }
    tracing::debug!(%contact_id, mailbox_id = id, "contact worker retired");
}

async fn process<H: InboundHandler>(contact_id: &str, handler: &H, envelope: Envelope) {
    let result = handler.handle(envelope.message).await;
    if let Err(e) = &result {
        tracing::warn!(contact_id, error = %e, recoverable = e.is_recoverable(), "inbound message failed");
    }
    // The caller may have given up waiting.
    let _ = envelope.reply.send(result);
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use chrono::Utc;
    use futures_util::future::join_all;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::triage::Outcome;

    /// Records handled texts; optionally waits on a gate first.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        started: AtomicUsize,
        gate: Option<Semaphore>,
        delay_first: bool,
        /// Per-message handling time.
        hold: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl InboundHandler for Recorder {
        async fn handle(&self, message: InboundMessage) -> Result<Reply, EngineError> {
            let n = self.started.fetch_add(1, Ordering::SeqCst);
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.map_err(|_| EngineError::Unavailable("gate".into()))?;
            }
            if self.delay_first && n == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            if let Some(hold) = self.hold {
                tokio::time::sleep(hold).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", message.contact_id, message.raw_text));
            Ok(Reply {
                session_id: None,
                outcome: Outcome::Duplicate,
                messages: vec![message.raw_text],
            })
        }
    }

    fn msg(contact: &str, text: &str) -> InboundMessage {
        InboundMessage::new(contact, "whatsapp", text, Utc::now())
    }

    #[tokio::test]
    async fn same_contact_messages_are_handled_in_order() {
        let recorder = Arc::new(Recorder {
            delay_first: true,
            ..Default::default()
        });
        let dispatcher = ContactDispatcher::new(Arc::clone(&recorder), 16, Duration::from_secs(5));

        let results = join_all((0..5).map(|i| dispatcher.dispatch(msg("c1", &i.to_string())))).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["c1:0", "c1:1", "c1:2", "c1:3", "c1:4"]);
        assert_eq!(dispatcher.active_mailboxes(), 1);
    }

    #[tokio::test]
    async fn different_contacts_get_separate_workers() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = ContactDispatcher::new(Arc::clone(&recorder), 4, Duration::from_secs(5));

        let reply = dispatcher.dispatch(msg("c1", "oi")).await.unwrap();
        assert_eq!(reply.messages, vec!["oi"]);
        dispatcher.dispatch(msg("c2", "olá")).await.unwrap();
        assert_eq!(dispatcher.active_mailboxes(), 2);
    }

    #[tokio::test]
    async fn full_mailbox_refuses_message() {
        let recorder = Arc::new(Recorder {
            gate: Some(Semaphore::new(0)),
            ..Default::default()
        });
        let dispatcher = Arc::new(ContactDispatcher::new(
            Arc::clone(&recorder),
            1,
            Duration::from_secs(5),
        ));

        let d = Arc::clone(&dispatcher);
        let first = tokio::spawn(async move { d.dispatch(msg("c1", "a")).await });
        while recorder.started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        // The worker holds "a"; "b" fills the single buffer slot.
        let d = Arc::clone(&dispatcher);
        let second = tokio::spawn(async move { d.dispatch(msg("c1", "b")).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = dispatcher.dispatch(msg("c1", "c")).await.unwrap_err();
        assert!(matches!(err, DispatchError::MailboxFull { .. }));
        assert!(err.is_recoverable());

        recorder.gate.as_ref().unwrap().add_permits(10);
        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn idle_worker_retires_and_respawns() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = ContactDispatcher::new(Arc::clone(&recorder), 4, Duration::from_millis(20));

        dispatcher.dispatch(msg("c1", "1")).await.unwrap();
        assert_eq!(dispatcher.active_mailboxes(), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(dispatcher.active_mailboxes(), 0);

        dispatcher.dispatch(msg("c1", "2")).await.unwrap();
        assert_eq!(recorder.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn retirement_never_overlaps_a_successor_worker() {
        let recorder = Arc::new(Recorder {
            hold: Some(Duration::from_millis(1)),
            ..Default::default()
        });
        let idle = Duration::from_millis(3);
        let dispatcher = ContactDispatcher::new(Arc::clone(&recorder), 8, idle);

        let mut expected = Vec::new();
        for round in 0..30 {
            // Land right around the idle deadline of the previous worker.
            tokio::time::sleep(idle + Duration::from_micros(round * 100)).await;
            let texts: Vec<String> = (0..3).map(|i| format!("{round}.{i}")).collect();
            let results = join_all(texts.iter().map(|t| dispatcher.dispatch(msg("c1", t)))).await;
            assert!(results.iter().all(|r| r.is_ok()));
            expected.extend(texts.iter().map(|t| format!("c1:{t}")));
        }

        assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(*recorder.seen.lock().unwrap(), expected);
    }

    #[test]
    fn engine_errors_keep_their_recoverability() {
        let err = DispatchError::from(EngineError::ConflictRetriesExhausted { attempts: 5 });
        assert!(err.is_recoverable());
        let err = DispatchError::from(EngineError::Storage("disk".into()));
        assert!(!err.is_recoverable());
    }
}
