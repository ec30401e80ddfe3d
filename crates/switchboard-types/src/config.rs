//! Global configuration types for Switchboard.
//!
//! `GlobalConfig` represents the top-level `config.toml`: default flow and
//! queue fallbacks, inactivity policies, SLA targets, monitor intervals,
//! store retry budget, message templates and channel endpoints.

use serde::{Deserialize, Serialize};

use crate::ticket::Severity;

/// Top-level configuration for the triage engine.
///
/// Loaded from `~/.switchboard/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Flow used when an inbound message names none, or names an unknown one.
    #[serde(default)]
    pub default_flow_id: Option<String>,

    /// Queue used when a transfer cannot resolve one from the session context.
    #[serde(default)]
    pub fallback_queue_id: Option<String>,

    /// Consecutive unmatched inputs that force a transfer to a human queue.
    #[serde(default = "default_max_unmatched_attempts")]
    pub max_unmatched_attempts: u32,

    /// Applied inbound message keys remembered per contact for redelivery
    /// detection, across sessions.
    #[serde(default = "default_applied_message_window")]
    pub applied_message_window: usize,

    #[serde(default = "InactivityPolicy::session_default")]
    pub session_inactivity: InactivityPolicy,

    #[serde(default = "InactivityPolicy::ticket_default")]
    pub ticket_inactivity: InactivityPolicy,

    #[serde(default)]
    pub sla: SlaConfig,

    #[serde(default)]
    pub monitors: MonitorConfig,

    #[serde(default)]
    pub store_retry: StoreRetryConfig,

    #[serde(default)]
    pub messages: MessageTemplates,

    #[serde(default)]
    pub channel: ChannelConfig,
}

fn default_max_unmatched_attempts() -> u32 {
    3
}

fn default_applied_message_window() -> usize {
    200
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_flow_id: None,
            fallback_queue_id: None,
            max_unmatched_attempts: default_max_unmatched_attempts(),
            applied_message_window: default_applied_message_window(),
            session_inactivity: InactivityPolicy::session_default(),
            ticket_inactivity: InactivityPolicy::ticket_default(),
            sla: SlaConfig::default(),
            monitors: MonitorConfig::default(),
            store_retry: StoreRetryConfig::default(),
            messages: MessageTemplates::default(),
            channel: ChannelConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Inactivity
// ---------------------------------------------------------------------------

/// Idle-timeout policy for sessions or tickets.
///
/// A section present in the file but missing keys takes the session
/// defaults for those keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InactivityPolicy {
    pub enabled: bool,
    /// Idle minutes before the subject is closed.
    pub timeout_minutes: u32,
    /// Minutes before the timeout at which a single warning is sent.
    /// `None` or `0` disables the warning.
    pub warning_minutes_before: Option<u32>,
    pub warning_message: String,
    pub closing_message: String,
    /// Status names the policy applies to. Unset means every non-terminal status.
    pub applicable_statuses: Option<Vec<String>>,
}

impl Default for InactivityPolicy {
    fn default() -> Self {
        Self::session_default()
    }
}

impl InactivityPolicy {
    pub fn session_default() -> Self {
        Self {
            enabled: true,
            timeout_minutes: 30,
            warning_minutes_before: Some(5),
            warning_message: "Olá! Notamos que você não respondeu. Este atendimento será encerrado em breve se não houver resposta.".to_string(),
            closing_message: "Este atendimento foi encerrado automaticamente por inatividade.".to_string(),
            applicable_statuses: None,
        }
    }

    pub fn ticket_default() -> Self {
        Self {
            enabled: true,
            timeout_minutes: 1440,
            warning_minutes_before: Some(60),
            warning_message: "Olá! Notamos que este atendimento está inativo há algum tempo. Este ticket será fechado automaticamente em breve se não houver resposta.".to_string(),
            closing_message: "Este ticket foi fechado automaticamente devido à inatividade.".to_string(),
            applicable_statuses: Some(vec!["FILA".to_string(), "EM_ATENDIMENTO".to_string()]),
        }
    }

    /// Whether a subject currently in `status` is governed by this policy.
    pub fn applies_to(&self, status: &str) -> bool {
        match &self.applicable_statuses {
            Some(list) => list.iter().any(|s| s.eq_ignore_ascii_case(status)),
            None => true,
        }
    }

    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.timeout_minutes))
    }

    /// Lead time of the warning, when one is configured and shorter than the timeout.
    pub fn warning_lead(&self) -> Option<chrono::Duration> {
        match self.warning_minutes_before {
            Some(m) if m > 0 && m < self.timeout_minutes => {
                Some(chrono::Duration::minutes(i64::from(m)))
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// SLA
// ---------------------------------------------------------------------------

/// SLA targets per severity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaConfig {
    pub target_minutes: SlaTargets,
    /// Share of the SLA window (percent) after which a ticket is "at risk".
    pub at_risk_percent: u8,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            target_minutes: SlaTargets::default(),
            at_risk_percent: 80,
        }
    }
}

impl SlaConfig {
    pub fn target_for(&self, severity: Severity) -> chrono::Duration {
        let minutes = match severity {
            Severity::Baixa => self.target_minutes.baixa,
            Severity::Normal => self.target_minutes.normal,
            Severity::Alta => self.target_minutes.alta,
            Severity::Urgente => self.target_minutes.urgente,
        };
        chrono::Duration::minutes(i64::from(minutes))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaTargets {
    pub baixa: u32,
    pub normal: u32,
    pub alta: u32,
    pub urgente: u32,
}

impl Default for SlaTargets {
    fn default() -> Self {
        Self {
            baixa: 480,
            normal: 240,
            alta: 60,
            urgente: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime knobs
// ---------------------------------------------------------------------------

/// Background loop and mailbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub escalation_interval_secs: u64,
    pub reaper_interval_secs: u64,
    /// Idle seconds after which a per-contact mailbox worker retires.
    pub mailbox_idle_secs: u64,
    /// Buffered messages per contact before inbound delivery is refused.
    pub mailbox_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            escalation_interval_secs: 30,
            reaper_interval_secs: 60,
            mailbox_idle_secs: 300,
            mailbox_capacity: 64,
        }
    }
}

/// Bounded retry with exponential backoff for conflicting or failed writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreRetryConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for StoreRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 10,
            max_backoff_ms: 250,
        }
    }
}

// ---------------------------------------------------------------------------
// Messages and channel
// ---------------------------------------------------------------------------

/// Fixed texts sent by the engine. Templates may use `{{key}}` context references.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTemplates {
    /// Prefix of the reprompt sent after an unmatched input; the option list follows.
    pub invalid_option: String,
    /// Sent when the contact types the exit token.
    pub exit: String,
    /// Sent when a transfer assigned an attendant.
    pub transferred: String,
    /// Sent when a transfer left the ticket queued.
    pub queued: String,
    /// Sent when no flow can be resolved for a new contact.
    pub flow_unavailable: String,
    /// Sent when a transfer cannot resolve any queue.
    pub no_queue: String,
    /// Appended to every menu prompt. Empty disables it.
    pub exit_hint: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            invalid_option: "❌ Opção inválida. Por favor, escolha uma das opções:".to_string(),
            exit: "👋 Atendimento cancelado. Caso precise de ajuda novamente, é só mandar uma mensagem! Até logo.".to_string(),
            transferred: "Você foi encaminhado para um atendente. Aguarde um momento.".to_string(),
            queued: "Todos os atendentes estão ocupados no momento. Você está na fila e será atendido em breve.".to_string(),
            flow_unavailable: "Desculpe, o atendimento automático está indisponível no momento. Tente novamente mais tarde.".to_string(),
            no_queue: "Não foi possível encaminhar seu atendimento agora. Por favor, tente novamente mais tarde.".to_string(),
            exit_hint: "Digite SAIR para encerrar.".to_string(),
        }
    }
}

/// Channel adapter endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Where outbound messages are POSTed. Unset logs them instead.
    pub outbound_url: Option<String>,
    /// Bearer token for the outbound endpoint.
    #[serde(skip_serializing)]
    pub outbound_token: Option<String>,
    /// Shared secret for inbound HMAC-SHA256 signatures. Unset accepts unsigned requests.
    #[serde(skip_serializing)]
    pub inbound_secret: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config_default_values() {
        let config = GlobalConfig::default();
        assert_eq!(config.max_unmatched_attempts, 3);
        assert!(config.default_flow_id.is_none());
        assert_eq!(config.session_inactivity.timeout_minutes, 30);
        assert_eq!(config.ticket_inactivity.timeout_minutes, 1440);
        assert_eq!(config.ticket_inactivity.warning_minutes_before, Some(60));
        assert_eq!(config.sla.target_minutes.urgente, 30);
        assert_eq!(config.store_retry.max_attempts, 5);
    }

    #[test]
    fn test_global_config_deserialize_with_defaults() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_unmatched_attempts, 3);
        assert!(config.ticket_inactivity.applies_to("FILA"));
        assert!(!config.ticket_inactivity.applies_to("ENVIO_ATIVO"));
        assert!(config.session_inactivity.applies_to("AGUARDANDO_INPUT"));
    }

    #[test]
    fn test_global_config_deserialize_with_values() {
        let toml_str = r#"
default_flow_id = "atendimento"
fallback_queue_id = "geral"
max_unmatched_attempts = 4

[ticket_inactivity]
timeout_minutes = 120
warning_minutes_before = 0
applicable_statuses = ["em_atendimento"]

[sla.target_minutes]
alta = 15

[monitors]
escalation_interval_secs = 5
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.default_flow_id.as_deref(), Some("atendimento"));
        assert_eq!(config.fallback_queue_id.as_deref(), Some("geral"));
        assert_eq!(config.max_unmatched_attempts, 4);
        assert_eq!(config.ticket_inactivity.timeout_minutes, 120);
        assert!(config.ticket_inactivity.warning_lead().is_none());
        assert!(config.ticket_inactivity.applies_to("EM_ATENDIMENTO"));
        assert!(!config.ticket_inactivity.applies_to("FILA"));
        assert_eq!(config.sla.target_for(Severity::Alta).num_minutes(), 15);
        assert_eq!(config.sla.target_for(Severity::Normal).num_minutes(), 240);
        assert_eq!(config.monitors.escalation_interval_secs, 5);
        assert_eq!(config.monitors.reaper_interval_secs, 60);
    }

    #[test]
    fn test_warning_lead_must_fit_inside_timeout() {
        let mut policy = InactivityPolicy::session_default();
        assert_eq!(policy.warning_lead().unwrap().num_minutes(), 5);

        policy.warning_minutes_before = Some(30);
        assert!(policy.warning_lead().is_none());

        policy.warning_minutes_before = None;
        assert!(policy.warning_lead().is_none());
    }

    #[test]
    fn test_channel_secrets_are_not_serialized() {
        let mut config = GlobalConfig::default();
        config.channel.outbound_token = Some("tok".to_string());
        config.channel.inbound_secret = Some("shh".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("\"tok\""));
        assert!(!json.contains("shh"));
    }
}
