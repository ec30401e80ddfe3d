//! REST API handler modules.

pub mod flow;
pub mod inbound;
pub mod queue;
pub mod session;
pub mod ticket;

#[cfg(test)]
pub(crate) mod test_support {
    use switchboard_types::config::GlobalConfig;

    use crate::state::AppState;

    /// In-memory state with no default flow and a log-only sender.
    pub fn state() -> AppState {
        AppState::in_memory(GlobalConfig::default())
    }

    pub fn state_with(config: GlobalConfig) -> AppState {
        AppState::in_memory(config)
    }

    /// Smallest useful flow: a menu handing option 1 to `suporte`.
    pub const SUPPORT_FLOW: &str = r#"{
        "etapaInicial": "boas-vindas",
        "etapas": {
            "boas-vindas": {
                "tipo": "mensagem_menu",
                "mensagem": "Olá! Como podemos ajudar?",
                "opcoes": [
                    { "valor": "1", "texto": "Suporte", "acao": "transferir_nucleo", "nucleoId": "suporte" },
                    { "valor": "2", "texto": "Encerrar", "acao": "finalizar" }
                ]
            }
        }
    }"#;
}
