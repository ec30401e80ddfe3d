//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both CLI and REST
//! API. Services are generic over repository and sender traits; AppState
//! pins them to the backend enums and the configured channel sender.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use switchboard_core::event::EventBus;
use switchboard_core::event::bus::DEFAULT_EVENT_CAPACITY;
use switchboard_core::flow::FlowDefinitionStore;
use switchboard_core::monitor::{DeadlineIndex, EscalationMonitor, InactivityReaper};
use switchboard_core::retry::RetryPolicy;
use switchboard_core::routing::TicketRouter;
use switchboard_core::runtime::ContactDispatcher;
use switchboard_core::session::SessionStore;
use switchboard_core::triage::{EngineSettings, TriageEngine, TriageLogger};
use switchboard_infra::channel::ChannelSender;
use switchboard_infra::config::{database_url, load_global_config, resolve_data_dir};
use switchboard_infra::sqlite::DatabasePool;
use switchboard_types::config::GlobalConfig;

use crate::backend::{Backends, FlowBackend, LogBackend, SessionBackend, TicketBackend};

/// Concrete type aliases for the service generics pinned to the backends.
pub type ConcreteFlowStore = FlowDefinitionStore<FlowBackend>;
pub type ConcreteSessionStore = SessionStore<SessionBackend>;
pub type ConcreteRouter = TicketRouter<TicketBackend>;
pub type ConcreteLogger = TriageLogger<LogBackend>;
pub type ConcreteEngine =
    TriageEngine<FlowBackend, SessionBackend, TicketBackend, LogBackend, ChannelSender>;
pub type ConcreteDispatcher = ContactDispatcher<ConcreteEngine>;
pub type ConcreteEscalation = EscalationMonitor<TicketBackend>;
pub type ConcreteReaper = InactivityReaper<SessionBackend, TicketBackend, LogBackend, ChannelSender>;

/// Shared application state holding all services.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GlobalConfig>,
    pub data_dir: PathBuf,
    /// "sqlite" or "memory".
    pub backend: &'static str,
    pub flows: Arc<ConcreteFlowStore>,
    pub sessions: Arc<ConcreteSessionStore>,
    pub router: Arc<ConcreteRouter>,
    pub logger: Arc<ConcreteLogger>,
    pub engine: Arc<ConcreteEngine>,
    pub dispatcher: Arc<ConcreteDispatcher>,
    pub escalation: Arc<ConcreteEscalation>,
    pub reaper: Arc<ConcreteReaper>,
    pub deadlines: Arc<DeadlineIndex>,
    pub events: EventBus,
    pub sender: Arc<ChannelSender>,
}

impl AppState {
    /// Initialize the application state: load config, open storage, wire
    /// services.
    ///
    /// With `memory` set nothing is persisted and the database is never
    /// opened.
    pub async fn init(memory: bool) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_global_config(&data_dir).await;

        let backends = if memory {
            Backends::memory()
        } else {
            let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;
            Backends::sqlite(db_pool)
        };

        Self::build(config, data_dir, backends)
    }

    /// Wire services over already opened backends.
    pub fn build(
        config: GlobalConfig,
        data_dir: PathBuf,
        backends: Backends,
    ) -> anyhow::Result<Self> {
        let events = EventBus::new(DEFAULT_EVENT_CAPACITY);
        let deadlines = Arc::new(DeadlineIndex::new());
        let retry = RetryPolicy::from_config(&config.store_retry);

        let flows = Arc::new(FlowDefinitionStore::new(
            backends.flows,
            config.default_flow_id.clone(),
        ));
        let sessions = Arc::new(SessionStore::new(
            backends.sessions,
            retry,
            Arc::clone(&deadlines),
        ));
        let router = Arc::new(TicketRouter::new(
            backends.tickets,
            events.clone(),
            retry,
            config.sla.clone(),
            Arc::clone(&deadlines),
        ));
        let logger = Arc::new(TriageLogger::new(backends.log, retry));
        let sender = Arc::new(ChannelSender::from_config(&config.channel)?);

        let engine = Arc::new(TriageEngine::new(
            Arc::clone(&flows),
            Arc::clone(&sessions),
            Arc::clone(&router),
            Arc::clone(&logger),
            Arc::clone(&sender),
            events.clone(),
            EngineSettings::from_config(&config),
        ));
        let dispatcher = Arc::new(ContactDispatcher::from_config(
            Arc::clone(&engine),
            &config.monitors,
        ));

        let escalation = Arc::new(EscalationMonitor::new(
            Arc::clone(&router),
            Arc::clone(&deadlines),
            events.clone(),
            Duration::from_secs(config.monitors.escalation_interval_secs.max(1)),
        ));
        let reaper = Arc::new(InactivityReaper::new(
            Arc::clone(&sessions),
            Arc::clone(&router),
            Arc::clone(&logger),
            Arc::clone(&sender),
            Arc::clone(&deadlines),
            events.clone(),
            config.session_inactivity.clone(),
            config.ticket_inactivity.clone(),
            Duration::from_secs(config.monitors.reaper_interval_secs.max(1)),
        ));

        tracing::debug!(
            backend = backends.kind,
            transport = sender.transport(),
            "application state wired"
        );

        Ok(Self {
            config: Arc::new(config),
            data_dir,
            backend: backends.kind,
            flows,
            sessions,
            router,
            logger,
            engine,
            dispatcher,
            escalation,
            reaper,
            deadlines,
            events,
            sender,
        })
    }

    /// Rebuild the in-memory deadline index from stored sessions and open
    /// tickets. Run once before the monitors start.
    pub async fn hydrate(&self) -> anyhow::Result<(usize, usize, usize)> {
        let sessions = self.sessions.list_active().await?;
        let tickets = self.router.list_open_tickets().await?;
        self.deadlines.hydrate(&sessions, &tickets);
        Ok(self.deadlines.counts())
    }

    /// An isolated in-memory state for tests.
    #[cfg(test)]
    pub fn in_memory(config: GlobalConfig) -> Self {
        let dir = std::env::temp_dir();
        match Self::build(config, dir, Backends::memory()) {
            Ok(state) => state,
            Err(e) => panic!("in-memory state: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use switchboard_types::message::InboundMessage;
    use switchboard_types::ticket::{DistributionStrategy, Queue};

    use super::*;
    use crate::http::handlers::test_support::SUPPORT_FLOW;

    async fn sqlite_state(dir: &tempfile::TempDir) -> AppState {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        let mut config = GlobalConfig::default();
        config.default_flow_id = Some("atendimento".to_string());
        AppState::build(config, dir.path().to_path_buf(), Backends::sqlite(pool)).unwrap()
    }

    #[tokio::test]
    async fn sqlite_state_survives_rebuild_and_hydrates() {
        let dir = tempfile::tempdir().unwrap();
        {
            let state = sqlite_state(&dir).await;
            assert_eq!(state.backend, "sqlite");
            state
                .flows
                .publish_document("atendimento", SUPPORT_FLOW)
                .await
                .unwrap();
            state
                .router
                .create_queue(Queue::new(
                    "suporte",
                    "Suporte",
                    DistributionStrategy::RoundRobin,
                    None,
                    vec![],
                ))
                .await
                .unwrap();
            let now = Utc::now();
            state
                .engine
                .handle(InboundMessage::new("5511", "whatsapp", "oi", now))
                .await
                .unwrap();
            state
                .engine
                .handle(InboundMessage::new("5522", "whatsapp", "oi", now))
                .await
                .unwrap();
            state
                .engine
                .handle(InboundMessage::new("5522", "whatsapp", "1", now))
                .await
                .unwrap();
        }

        // A restart starts with an empty index until hydrated.
        let state = sqlite_state(&dir).await;
        assert_eq!(state.deadlines.counts(), (0, 0, 0));
        let (sessions, tickets, slas) = state.hydrate().await.unwrap();
        assert_eq!(sessions, 1);
        assert_eq!(tickets, 1);
        assert_eq!(slas, 1);
    }

    #[tokio::test]
    async fn memory_state_uses_log_transport() {
        let state = AppState::in_memory(GlobalConfig::default());
        assert_eq!(state.backend, "memory");
        assert_eq!(state.sender.transport(), "log");
        assert_eq!(state.hydrate().await.unwrap(), (0, 0, 0));
    }
}
