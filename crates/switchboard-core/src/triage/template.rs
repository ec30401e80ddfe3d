//! Message templates.
//!
//! Prompts reference session context as `{{key}}` (or the legacy `{key}`).
//! An unknown `{{key}}` renders empty; an unknown `{key}` is left as typed,
//! since single braces also occur in ordinary text.

use std::collections::BTreeMap;

use switchboard_types::config::MessageTemplates;
use switchboard_types::flow::{Step, StepKind};

/// Placeholder in `salvarContexto` values replaced by the raw answer.
pub const ANSWER_PLACEHOLDER: &str = "{{resposta}}";

const CONTEXT_PREFIX: &str = "contexto.";

/// Substitute context references in `template`.
pub fn render(template: &str, context: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];

        if let Some(inner) = tail.strip_prefix("{{") {
            if let Some(close) = inner.find("}}") {
                let key = inner[..close].trim();
                if let Some(value) = lookup(context, key) {
                    out.push_str(value);
                }
                rest = &inner[close + 2..];
                continue;
            }
        } else if let Some(close) = tail[1..].find('}') {
            let key = tail[1..1 + close].trim();
            if let Some(value) = lookup(context, key) {
                out.push_str(value);
                rest = &tail[close + 2..];
                continue;
            }
        }

        out.push('{');
        rest = &tail[1..];
    }
    out.push_str(rest);
    out
}

fn lookup<'a>(context: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    let key = key.strip_prefix(CONTEXT_PREFIX).unwrap_or(key);
    context.get(key).map(String::as_str)
}

/// Resolve a declared context write against the answer and current context.
///
/// `{{resposta}}` yields the trimmed raw answer and `{{contexto.x}}` copies
/// key `x`; anything else is stored literally.
pub fn resolve_context_value(
    value: &str,
    raw_answer: &str,
    context: &BTreeMap<String, String>,
) -> Option<String> {
    let trimmed = value.trim();
    if trimmed == ANSWER_PLACEHOLDER {
        return Some(raw_answer.trim().to_string());
    }
    if let Some(key) = trimmed
        .strip_prefix("{{")
        .and_then(|s| s.strip_suffix("}}"))
        .map(str::trim)
        .and_then(|s| s.strip_prefix(CONTEXT_PREFIX))
    {
        return context.get(key).cloned();
    }
    Some(value.to_string())
}

/// `valor - texto` lines for a menu step.
pub fn option_list(step: &Step) -> String {
    step.options
        .iter()
        .map(|o| format!("{} - {}", o.match_value, o.label))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full text shown when a session enters `step`.
pub fn step_prompt(step: &Step, context: &BTreeMap<String, String>, messages: &MessageTemplates) -> String {
    let mut text = render(&step.prompt, context);
    if step.kind == StepKind::Menu {
        append_block(&mut text, &option_list(step));
        append_block(&mut text, &messages.exit_hint);
    }
    text
}

/// Reprompt after an unmatched input.
pub fn invalid_prompt(step: &Step, messages: &MessageTemplates) -> String {
    let mut text = messages.invalid_option.clone();
    append_block(&mut text, &option_list(step));
    append_block(&mut text, &messages.exit_hint);
    text
}

fn append_block(text: &mut String, block: &str) {
    if block.is_empty() {
        return;
    }
    if !text.is_empty() {
        text.push_str("\n\n");
    }
    text.push_str(block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::validate::tests::sample_flow;

    fn ctx(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn double_brace_references_are_substituted() {
        let c = ctx(&[("nome", "Ana")]);
        assert_eq!(render("Olá {{nome}}!", &c), "Olá Ana!");
        assert_eq!(render("Olá {{ contexto.nome }}!", &c), "Olá Ana!");
        assert_eq!(render("Olá {{sobrenome}}!", &c), "Olá !");
    }

    #[test]
    fn single_brace_only_replaces_known_keys() {
        let c = ctx(&[("protocolo", "123")]);
        assert_eq!(render("Protocolo {protocolo}", &c), "Protocolo 123");
        assert_eq!(render("json {a: 1}", &c), "json {a: 1}");
        assert_eq!(render("solto {", &c), "solto {");
    }

    #[test]
    fn context_values_resolve_placeholders() {
        let c = ctx(&[("setor", "suporte")]);
        assert_eq!(
            resolve_context_value("{{resposta}}", "  Maria ", &c).as_deref(),
            Some("Maria")
        );
        assert_eq!(
            resolve_context_value("{{contexto.setor}}", "x", &c).as_deref(),
            Some("suporte")
        );
        assert_eq!(resolve_context_value("{{contexto.nada}}", "x", &c), None);
        assert_eq!(resolve_context_value("fixo", "x", &c).as_deref(), Some("fixo"));
    }

    #[test]
    fn menu_prompt_lists_options_and_exit_hint() {
        let flow = sample_flow();
        let step = flow.step("boas-vindas").unwrap();
        let text = step_prompt(step, &BTreeMap::new(), &MessageTemplates::default());
        assert!(text.starts_with("Menu boas-vindas"));
        assert!(text.contains("1 - Opção 1\n2 - Opção 2"));
        assert!(text.ends_with("Digite SAIR para encerrar."));
    }

    #[test]
    fn invalid_prompt_starts_with_configured_message() {
        let flow = sample_flow();
        let step = flow.step("suporte").unwrap();
        let messages = MessageTemplates {
            exit_hint: String::new(),
            ..MessageTemplates::default()
        };
        let text = invalid_prompt(step, &messages);
        assert!(text.starts_with("❌ Opção inválida."));
        assert!(text.ends_with("0 - Opção 0"));
    }
}
