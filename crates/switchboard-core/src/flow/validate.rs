//! Structural validation of flow definitions.
//!
//! Runs at publish time so malformed graphs never reach the interpreter.
//! Dangling references, empty menus and ambiguous options are errors;
//! steps unreachable from the initial step are only reported.

use std::collections::{HashMap, HashSet};

use petgraph::graph::DiGraph;
use petgraph::visit::Bfs;
use switchboard_types::error::FlowError;
use switchboard_types::flow::{Branch, EXIT_TOKEN, FlowDefinition, OptionAction, Step, StepKind};

/// Non-fatal findings from a successful validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Steps no path from the initial step reaches, sorted.
    pub unreachable: Vec<String>,
}

/// Validate a flow definition.
///
/// Checks:
/// - The flow id is non-empty and uses only `[A-Za-z0-9_-]`.
/// - At least one step exists and the initial step is one of them.
/// - Step map keys equal the step ids.
/// - Menu steps have options; terminal, handoff and capture steps have none.
/// - Capture steps, and only they, declare a capture with a variable.
/// - Match values (and aliases) are non-empty and unique within a step. The
///   reserved exit token may only label a `finish` option.
/// - Every `goto`, capture and branch target names an existing step of the
///   same version.
pub fn validate_flow(flow: &FlowDefinition) -> Result<ValidationReport, FlowError> {
    if flow.id.is_empty() {
        return Err(FlowError::Validation("flow id must not be empty".to_string()));
    }
    if !flow
        .id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(FlowError::Validation(format!(
            "flow id '{}' may only contain letters, digits, '-' and '_'",
            flow.id
        )));
    }
    if flow.steps.is_empty() {
        return Err(FlowError::Validation(format!(
            "flow '{}' has no steps",
            flow.id
        )));
    }
    if !flow.steps.contains_key(&flow.initial_step) {
        return Err(FlowError::Validation(format!(
            "initial step '{}' does not exist",
            flow.initial_step
        )));
    }

    for (key, step) in &flow.steps {
        if *key != step.id {
            return Err(FlowError::Validation(format!(
                "step keyed '{key}' declares id '{}'",
                step.id
            )));
        }

        match step.kind {
            StepKind::Menu if step.options.is_empty() => {
                return Err(FlowError::Validation(format!(
                    "menu step '{}' has no options",
                    step.id
                )));
            }
            StepKind::Terminal | StepKind::Handoff | StepKind::Capture
                if !step.options.is_empty() =>
            {
                return Err(FlowError::Validation(format!(
                    "{} step '{}' must not have options",
                    step.kind, step.id
                )));
            }
            _ => {}
        }

        match (&step.capture, step.kind) {
            (Some(capture), StepKind::Capture) => {
                if capture.variable.trim().is_empty() {
                    return Err(FlowError::Validation(format!(
                        "capture step '{}' has no variable",
                        step.id
                    )));
                }
                check_goto(flow, &step.id, &capture.next_step, &capture.branches)?;
            }
            (None, StepKind::Capture) => {
                return Err(FlowError::Validation(format!(
                    "capture step '{}' declares no capture",
                    step.id
                )));
            }
            (Some(_), kind) => {
                return Err(FlowError::Validation(format!(
                    "{kind} step '{}' must not declare a capture",
                    step.id
                )));
            }
            (None, _) => {}
        }

        let mut seen = HashSet::new();
        for option in &step.options {
            for token in std::iter::once(&option.match_value).chain(option.aliases.iter()) {
                let normalized = token.trim().to_lowercase();
                if normalized.is_empty() {
                    return Err(FlowError::Validation(format!(
                        "step '{}' has an option with an empty match value",
                        step.id
                    )));
                }
                if normalized == EXIT_TOKEN && !matches!(option.action, OptionAction::Finish { .. }) {
                    return Err(FlowError::Validation(format!(
                        "step '{}' uses the reserved token '{EXIT_TOKEN}' for an option that does not finish",
                        step.id
                    )));
                }
                if !seen.insert(normalized) {
                    return Err(FlowError::Validation(format!(
                        "step '{}' has duplicate match value '{}'",
                        step.id,
                        token.trim()
                    )));
                }
            }

            if let OptionAction::Goto { next_step, branches } = &option.action {
                if next_step.is_empty() {
                    return Err(FlowError::Validation(format!(
                        "option '{}' at step '{}' has no next step",
                        option.match_value, step.id
                    )));
                }
                check_goto(flow, &step.id, next_step, branches)?;
            }
        }
    }

    Ok(ValidationReport {
        unreachable: unreachable_steps(flow),
    })
}

/// The fallback target and every branch target must exist, and branch
/// conditions must name a context key.
fn check_goto(
    flow: &FlowDefinition,
    step_id: &str,
    next_step: &str,
    branches: &[Branch],
) -> Result<(), FlowError> {
    if next_step.is_empty() {
        return Err(FlowError::Validation(format!(
            "step '{step_id}' has no next step"
        )));
    }
    for target in std::iter::once(next_step).chain(branches.iter().map(|b| b.next_step.as_str())) {
        if !flow.steps.contains_key(target) {
            return Err(FlowError::DanglingReference {
                step: step_id.to_string(),
                target: target.to_string(),
            });
        }
    }
    if branches
        .iter()
        .flat_map(|b| b.when.iter())
        .any(|c| c.key.trim().is_empty())
    {
        return Err(FlowError::Validation(format!(
            "step '{step_id}' has a branch condition without a context key"
        )));
    }
    Ok(())
}

/// Every step id `step` can move to without a transfer.
fn successors(step: &Step) -> Vec<&str> {
    let gotos = step
        .options
        .iter()
        .filter_map(|option| match &option.action {
            OptionAction::Goto { next_step, branches } => Some((next_step, branches)),
            _ => None,
        });
    let captures = step.capture.iter().map(|c| (&c.next_step, &c.branches));

    captures
        .chain(gotos)
        .flat_map(|(next, branches)| {
            std::iter::once(next.as_str()).chain(branches.iter().map(|b| b.next_step.as_str()))
        })
        .collect()
}

/// Steps not reachable from `initial_step` through `goto`, capture and
/// branch edges.
///
/// Assumes references were already checked; unknown targets are skipped.
pub fn unreachable_steps(flow: &FlowDefinition) -> Vec<String> {
    let mut graph = DiGraph::<&str, ()>::new();
    let indices: HashMap<&str, _> = flow
        .steps
        .keys()
        .map(|id| (id.as_str(), graph.add_node(id.as_str())))
        .collect();

    for step in flow.steps.values() {
        for next in successors(step) {
            if let (Some(from), Some(to)) = (indices.get(step.id.as_str()), indices.get(next)) {
                graph.add_edge(*from, *to, ());
            }
        }
    }

    let Some(start) = indices.get(flow.initial_step.as_str()) else {
        return flow.steps.keys().cloned().collect();
    };

    let mut reached = HashSet::new();
    let mut bfs = Bfs::new(&graph, *start);
    while let Some(node) = bfs.next(&graph) {
        reached.insert(graph[node]);
    }

    flow.steps
        .keys()
        .filter(|id| !reached.contains(id.as_str()))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;

    use switchboard_types::flow::{Capture, Condition, ConditionOperator, FlowOption, TransferTarget};

    use super::*;

    pub(crate) fn menu(id: &str, options: Vec<FlowOption>) -> Step {
        Step {
            id: id.to_string(),
            kind: StepKind::Menu,
            prompt: format!("Menu {id}"),
            options,
            transfer: TransferTarget::default(),
            capture: None,
        }
    }

    pub(crate) fn terminal(id: &str, prompt: &str) -> Step {
        Step {
            id: id.to_string(),
            kind: StepKind::Terminal,
            prompt: prompt.to_string(),
            options: vec![],
            transfer: TransferTarget::default(),
            capture: None,
        }
    }

    pub(crate) fn option(value: &str, action: OptionAction) -> FlowOption {
        FlowOption {
            match_value: value.to_string(),
            label: format!("Opção {value}"),
            aliases: vec![],
            action,
            context_writes: BTreeMap::new(),
        }
    }

    pub(crate) fn goto(next: &str) -> OptionAction {
        OptionAction::Goto {
            next_step: next.to_string(),
            branches: vec![],
        }
    }

    pub(crate) fn capture(id: &str, variable: &str, next: &str) -> Step {
        Step {
            id: id.to_string(),
            kind: StepKind::Capture,
            prompt: format!("Informe {variable}"),
            options: vec![],
            transfer: TransferTarget::default(),
            capture: Some(Capture {
                variable: variable.to_string(),
                next_step: next.to_string(),
                branches: vec![],
            }),
        }
    }

    /// `key == value` jumping to `next`.
    pub(crate) fn branch(key: &str, value: &str, next: &str) -> Branch {
        Branch {
            when: vec![Condition {
                key: key.to_string(),
                operator: ConditionOperator::Equals,
                value: Some(value.to_string()),
            }],
            next_step: next.to_string(),
        }
    }

    pub(crate) fn flow(id: &str, initial: &str, steps: Vec<Step>) -> FlowDefinition {
        FlowDefinition {
            id: id.to_string(),
            version: 1,
            initial_step: initial.to_string(),
            steps: steps.into_iter().map(|s| (s.id.clone(), s)).collect(),
            published_at: None,
        }
    }

    /// `boas-vindas` with `1 -> suporte`, `2 -> financeiro`, both menus
    /// that finish or transfer.
    pub(crate) fn sample_flow() -> FlowDefinition {
        flow(
            "atendimento",
            "boas-vindas",
            vec![
                menu(
                    "boas-vindas",
                    vec![option("1", goto("suporte")), option("2", goto("financeiro"))],
                ),
                menu(
                    "suporte",
                    vec![
                        option(
                            "1",
                            OptionAction::TransferQueue {
                                target: TransferTarget {
                                    queue_id: Some("suporte-n1".to_string()),
                                    queue_context_key: None,
                                },
                            },
                        ),
                        option("0", goto("boas-vindas")),
                    ],
                ),
                menu(
                    "financeiro",
                    vec![
                        option("1", OptionAction::Finish { message: None }),
                        option("0", goto("boas-vindas")),
                    ],
                ),
            ],
        )
    }

    #[test]
    fn valid_flow_passes() {
        let report = validate_flow(&sample_flow()).unwrap();
        assert!(report.unreachable.is_empty());
    }

    #[test]
    fn dangling_goto_is_rejected() {
        let f = flow(
            "f",
            "a",
            vec![menu("a", vec![option("1", goto("nowhere"))])],
        );
        let err = validate_flow(&f).unwrap_err();
        assert!(
            matches!(&err, FlowError::DanglingReference { step, target } if step == "a" && target == "nowhere"),
            "got: {err}"
        );
    }

    #[test]
    fn empty_menu_is_rejected() {
        let f = flow("f", "a", vec![menu("a", vec![])]);
        let msg = validate_flow(&f).unwrap_err().to_string();
        assert!(msg.contains("has no options"), "got: {msg}");
    }

    #[test]
    fn terminal_with_options_is_rejected() {
        let mut end = terminal("fim", "Tchau");
        end.options.push(option("1", goto("fim")));
        let f = flow("f", "fim", vec![end]);
        let msg = validate_flow(&f).unwrap_err().to_string();
        assert!(msg.contains("must not have options"), "got: {msg}");
    }

    #[test]
    fn reserved_exit_token_only_labels_finish_options() {
        let f = flow(
            "f",
            "a",
            vec![
                menu("a", vec![option("SAIR", goto("b"))]),
                terminal("b", "x"),
            ],
        );
        let msg = validate_flow(&f).unwrap_err().to_string();
        assert!(msg.contains("reserved"), "got: {msg}");

        let mut alias = option("9", OptionAction::TransferQueue {
            target: TransferTarget::default(),
        });
        alias.aliases = vec!["sair".to_string()];
        let f = flow("f", "a", vec![menu("a", vec![alias])]);
        assert!(validate_flow(&f).is_err());
    }

    #[test]
    fn welcome_menu_with_explicit_exit_option_publishes() {
        let mut f = sample_flow();
        f.steps
            .get_mut("boas-vindas")
            .unwrap()
            .options
            .push(option(
                "sair",
                OptionAction::Finish {
                    message: Some("Atendimento cancelado.".to_string()),
                },
            ));
        let report = validate_flow(&f).unwrap();
        assert!(report.unreachable.is_empty());
    }

    #[test]
    fn capture_steps_need_a_variable_and_a_known_target() {
        let ok = flow(
            "f",
            "nome",
            vec![capture("nome", "nomeCliente", "fim"), terminal("fim", "Obrigado")],
        );
        assert!(validate_flow(&ok).unwrap().unreachable.is_empty());

        let dangling = flow("f", "nome", vec![capture("nome", "nomeCliente", "resumo")]);
        assert!(matches!(
            validate_flow(&dangling).unwrap_err(),
            FlowError::DanglingReference { ref target, .. } if target == "resumo"
        ));

        let nameless = flow("f", "nome", vec![capture("nome", " ", "nome")]);
        let msg = validate_flow(&nameless).unwrap_err().to_string();
        assert!(msg.contains("no variable"), "got: {msg}");

        let mut bare = capture("nome", "x", "nome");
        bare.capture = None;
        let msg = validate_flow(&flow("f", "nome", vec![bare])).unwrap_err().to_string();
        assert!(msg.contains("declares no capture"), "got: {msg}");
    }

    #[test]
    fn branch_targets_are_checked_and_reachable() {
        let conditional = option(
            "1",
            OptionAction::Goto {
                next_step: "coleta-nome".to_string(),
                branches: vec![branch("__clienteCadastrado", "true", "confirmar")],
            },
        );
        let f = flow(
            "f",
            "a",
            vec![
                menu("a", vec![conditional.clone()]),
                capture("coleta-nome", "nomeCliente", "fim"),
                terminal("confirmar", "ok"),
                terminal("fim", "ok"),
            ],
        );
        assert!(validate_flow(&f).unwrap().unreachable.is_empty());

        let mut broken = f.clone();
        broken.steps.remove("confirmar");
        assert!(matches!(
            validate_flow(&broken).unwrap_err(),
            FlowError::DanglingReference { ref target, .. } if target == "confirmar"
        ));
    }

    #[test]
    fn duplicate_match_values_are_rejected_across_aliases() {
        let mut second = option("2", goto("b"));
        second.aliases = vec![" 1 ".to_string()];
        let f = flow(
            "f",
            "a",
            vec![
                menu("a", vec![option("1", goto("b")), second]),
                terminal("b", "x"),
            ],
        );
        let msg = validate_flow(&f).unwrap_err().to_string();
        assert!(msg.contains("duplicate match value '1'"), "got: {msg}");
    }

    #[test]
    fn missing_initial_step_is_rejected() {
        let f = flow("f", "zz", vec![terminal("a", "x")]);
        let msg = validate_flow(&f).unwrap_err().to_string();
        assert!(msg.contains("initial step 'zz'"), "got: {msg}");
    }

    #[test]
    fn bad_flow_id_is_rejected() {
        let f = flow("fluxo padrão", "a", vec![terminal("a", "x")]);
        assert!(validate_flow(&f).is_err());
    }

    #[test]
    fn unreachable_steps_are_reported_not_rejected() {
        let f = flow(
            "f",
            "a",
            vec![
                menu("a", vec![option("1", goto("b"))]),
                terminal("b", "fim"),
                terminal("orfa", "nunca"),
            ],
        );
        let report = validate_flow(&f).unwrap();
        assert_eq!(report.unreachable, vec!["orfa".to_string()]);
    }

    #[test]
    fn cycles_are_allowed() {
        // Menus commonly loop back to the start.
        let report = validate_flow(&sample_flow()).unwrap();
        assert!(report.unreachable.is_empty());
    }
}
