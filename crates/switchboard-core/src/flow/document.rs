//! Flow document import.
//!
//! Channel operators author flows as a document keyed by step id, using the
//! Portuguese field names of the admin tooling:
//!
//! ```json
//! {
//!   "etapaInicial": "boas-vindas",
//!   "etapas": {
//!     "boas-vindas": {
//!       "tipo": "mensagem_menu",
//!       "mensagem": "Olá {{nome}}! Como podemos ajudar?",
//!       "opcoes": [
//!         { "valor": "1", "texto": "Suporte", "acao": "proximo_passo", "proximaEtapa": "suporte",
//!           "salvarContexto": { "destinoNucleoId": "suporte-n1" } },
//!         { "valor": "2", "texto": "Falar com atendente", "acao": "transferir_nucleo" }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! Free-text questions use `"tipo": "coleta_dados"` with `variavel` and
//! `proximaEtapa`. Options and questions may carry `proximaEtapaCondicional`,
//! a list of `{ "se": "contexto.x === 'y'", "entao": "etapa" }` jumps checked
//! in order. Conditions compare with `===`, `!==`, `==` or `!=` (`null` tests
//! presence) and combine with `&&` and `||`.
//!
//! The same shape is accepted as YAML. [`FlowDocument::into_definition`]
//! converts it into the canonical [`FlowDefinition`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use switchboard_types::error::FlowError;
use switchboard_types::flow::{
    Branch, Capture, Condition, ConditionOperator, FlowDefinition, FlowOption, OptionAction, Step,
    StepKind, TransferTarget,
};

/// Step used when a document does not name its initial step.
pub const CONVENTIONAL_INITIAL_STEP: &str = "boas-vindas";

/// Context write that older documents use to carry a `finalizar` message.
pub const FINAL_MESSAGE_CONTEXT_KEY: &str = "__mensagemFinal";

/// Comparison tokens, longest first so `===` is not read as `==`.
const COMPARISONS: [(&str, ConditionOperator); 4] = [
    ("===", ConditionOperator::Equals),
    ("!==", ConditionOperator::NotEquals),
    ("==", ConditionOperator::Equals),
    ("!=", ConditionOperator::NotEquals),
];

/// A flow as authored by operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etapa_inicial: Option<String>,
    pub etapas: BTreeMap<String, StepDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDocument {
    pub tipo: String,
    pub mensagem: String,
    #[serde(default)]
    pub opcoes: Vec<OptionDocument>,
    /// Fixed queue for `transferir` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nucleo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nucleo_context_key: Option<String>,
    /// Context key a `coleta_dados` step stores the answer under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variavel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxima_etapa: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proxima_etapa_condicional: Vec<ConditionalDocument>,
}

/// A conditional jump: go to `entao` when `se` holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalDocument {
    pub se: String,
    pub entao: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionDocument {
    /// Usually a string, but numbers (`1`) are common in hand-written JSON.
    pub valor: serde_json::Value,
    pub texto: String,
    pub acao: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxima_etapa: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proxima_etapa_condicional: Vec<ConditionalDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nucleo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nucleo_context_key: Option<String>,
    /// `null` values delete the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salvar_contexto: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Final message for `finalizar`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mensagem: Option<String>,
}

impl FlowDocument {
    /// Parse a document, detecting JSON by its leading brace and falling
    /// back to YAML otherwise.
    pub fn parse(text: &str) -> Result<Self, FlowError> {
        if text.trim_start().starts_with('{') {
            serde_json::from_str(text).map_err(|e| FlowError::Parse(e.to_string()))
        } else {
            serde_yaml_ng::from_str(text).map_err(|e| FlowError::Parse(e.to_string()))
        }
    }

    /// Convert into an unpublished definition (`version` 0). The store
    /// assigns the version and validates the graph on publish.
    pub fn into_definition(self, flow_id: &str) -> Result<FlowDefinition, FlowError> {
        let initial_step = match self.etapa_inicial {
            Some(step) => step,
            None if self.etapas.contains_key(CONVENTIONAL_INITIAL_STEP) => {
                CONVENTIONAL_INITIAL_STEP.to_string()
            }
            None => {
                return Err(FlowError::Validation(
                    "document does not name its initial step (etapaInicial)".to_string(),
                ));
            }
        };

        let mut steps = BTreeMap::new();
        for (id, doc) in self.etapas {
            let step = convert_step(&id, doc)?;
            steps.insert(id, step);
        }

        Ok(FlowDefinition {
            id: flow_id.to_string(),
            version: 0,
            initial_step,
            steps,
            published_at: None,
        })
    }
}

fn convert_step(id: &str, doc: StepDocument) -> Result<Step, FlowError> {
    let kind = match doc.tipo.as_str() {
        "mensagem_menu" | "menu" | "pergunta" => StepKind::Menu,
        "finalizar" | "mensagem_final" | "fim" => StepKind::Terminal,
        "transferir" | "transferencia" | "transferir_nucleo" => StepKind::Handoff,
        // A plain message with options behaves as a menu; without, it ends the flow.
        "mensagem" if doc.opcoes.is_empty() => StepKind::Terminal,
        "mensagem" => StepKind::Menu,
        "coleta_dados" | "coleta" | "input" | "pergunta_aberta" => StepKind::Capture,
        other => return Err(FlowError::UnsupportedStepKind(other.to_string())),
    };

    let capture = match kind {
        StepKind::Capture => Some(Capture {
            variable: doc.variavel.unwrap_or_default(),
            next_step: doc.proxima_etapa.unwrap_or_default(),
            branches: convert_branches(&doc.proxima_etapa_condicional)?,
        }),
        _ => None,
    };

    let options = doc
        .opcoes
        .into_iter()
        .map(convert_option)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Step {
        id: id.to_string(),
        kind,
        prompt: doc.mensagem,
        options,
        transfer: TransferTarget {
            queue_id: doc.nucleo_id,
            queue_context_key: doc.nucleo_context_key,
        },
        capture,
    })
}

fn convert_option(doc: OptionDocument) -> Result<FlowOption, FlowError> {
    let mut writes = doc.salvar_contexto.unwrap_or_default();
    let action = match doc.acao.as_str() {
        "proximo_passo" | "ir_para" => OptionAction::Goto {
            next_step: doc.proxima_etapa.unwrap_or_default(),
            branches: convert_branches(&doc.proxima_etapa_condicional)?,
        },
        "transferir_nucleo" | "transferir" => OptionAction::TransferQueue {
            target: TransferTarget {
                queue_id: doc.nucleo_id,
                queue_context_key: doc.nucleo_context_key,
            },
        },
        "finalizar" => {
            let carried = writes
                .remove(FINAL_MESSAGE_CONTEXT_KEY)
                .and_then(|value| scalar_to_string(&value));
            OptionAction::Finish {
                message: doc.mensagem.or(carried),
            }
        }
        other => return Err(FlowError::UnsupportedAction(other.to_string())),
    };

    let context_writes = writes
        .into_iter()
        .map(|(key, value)| (key, scalar_to_string(&value)))
        .collect();

    Ok(FlowOption {
        match_value: scalar_to_string(&doc.valor).unwrap_or_default(),
        label: doc.texto,
        aliases: doc.aliases,
        action,
        context_writes,
    })
}

/// Each `||` alternative becomes its own branch with the same target.
fn convert_branches(docs: &[ConditionalDocument]) -> Result<Vec<Branch>, FlowError> {
    let mut branches = Vec::new();
    for doc in docs {
        for alternative in doc.se.split("||").map(str::trim).filter(|a| !a.is_empty()) {
            let when = alternative
                .split("&&")
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(parse_condition)
                .collect::<Result<Vec<_>, _>>()?;
            branches.push(Branch {
                when,
                next_step: doc.entao.clone(),
            });
        }
    }
    Ok(branches)
}

fn parse_condition(expr: &str) -> Result<Condition, FlowError> {
    let unsupported =
        || FlowError::Validation(format!("unsupported condition '{expr}' in proximaEtapaCondicional"));
    let stripped = expr.replace("contexto.", "");
    let (key, operator, raw) = COMPARISONS
        .iter()
        .find_map(|(token, operator)| {
            stripped
                .split_once(token)
                .map(|(key, value)| (key.trim(), *operator, value.trim()))
        })
        .ok_or_else(unsupported)?;
    if key.is_empty() || raw.is_empty() || raw.contains(['=', '<', '>']) {
        return Err(unsupported());
    }

    let value = unquote(raw);
    let (operator, value) = match (operator, value) {
        (ConditionOperator::Equals, "null" | "") => (ConditionOperator::Missing, None),
        (ConditionOperator::NotEquals, "null" | "") => (ConditionOperator::Exists, None),
        (operator, value) => (operator, Some(value.to_string())),
    };
    Ok(Condition {
        key: key.to_string(),
        operator,
        value,
    })
}

fn unquote(raw: &str) -> &str {
    ['\'', '"']
        .iter()
        .find_map(|q| raw.strip_prefix(*q).and_then(|r| r.strip_suffix(*q)))
        .unwrap_or(raw)
}

/// Context values are strings; other JSON scalars keep their literal form.
fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
