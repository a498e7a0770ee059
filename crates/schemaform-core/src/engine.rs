use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::deps::DependencyGraph;
use crate::error::Warning;
use crate::expr::EvalContext;
use crate::snapshot::Snapshot;
use crate::spec::Action;

/// Orders candidate rules so that a `SET_VALUE` writer runs before the rules
/// reading the field it writes.
///
/// The sort is stable: independent rules keep their input order, and rules
/// caught in a cycle follow the acyclic part in input order. Unknown and
/// repeated ids are dropped.
pub fn sort_rules_for_evaluation(rule_ids: &[String], deps: &DependencyGraph) -> Vec<String> {
    let mut candidates: Vec<&str> = Vec::new();
    for id in rule_ids {
        if deps.rules.contains_key(id) && !candidates.contains(&id.as_str()) {
            candidates.push(id);
        }
    }

    let position: BTreeMap<&str, usize> = candidates
        .iter()
        .enumerate()
        .map(|(idx, id)| (*id, idx))
        .collect();
    let mut indegree = vec![0usize; candidates.len()];
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); candidates.len()];
    for (from, id) in candidates.iter().enumerate() {
        for target in deps.write_edges(id) {
            if let Some(&to) = position.get(target)
                && to != from
            {
                edges[from].push(to);
                indegree[to] += 1;
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..candidates.len())
        .filter(|idx| indegree[*idx] == 0)
        .collect();
    let mut placed = vec![false; candidates.len()];
    let mut sorted = Vec::with_capacity(candidates.len());
    while let Some(next) = ready.pop_first() {
        placed[next] = true;
        sorted.push(candidates[next].to_string());
        for &to in &edges[next] {
            indegree[to] -= 1;
            if indegree[to] == 0 {
                ready.insert(to);
            }
        }
    }
    sorted.extend(
        candidates
            .iter()
            .zip(&placed)
            .filter(|(_, placed)| !**placed)
            .map(|(id, _)| id.to_string()),
    );
    sorted
}

/// Evaluates rules and collects the actions of the branch each one takes.
///
/// Nothing is applied; warnings are logged and then dropped.
pub fn evaluate_rules(
    rule_ids: &[String],
    snapshot: &Snapshot,
    params: Option<&Map<String, Value>>,
) -> Vec<Action> {
    let mut warnings = Vec::new();
    evaluate_rules_into(rule_ids, snapshot, params, &mut warnings)
}

/// Like [`evaluate_rules`], collecting evaluation warnings into `warnings`.
///
/// Values written by `SET_VALUE` are visible to the rules evaluated after
/// the writer.
pub fn evaluate_rules_into(
    rule_ids: &[String],
    snapshot: &Snapshot,
    params: Option<&Map<String, Value>>,
    warnings: &mut Vec<Warning>,
) -> Vec<Action> {
    let params = params.unwrap_or(&*snapshot.params);
    let mut values = Cow::Borrowed(&snapshot.values);
    let mut actions = Vec::new();

    for id in sort_rules_for_evaluation(rule_ids, &snapshot.deps) {
        let Some(node) = snapshot.deps.rule(&id) else {
            continue;
        };
        let ctx = EvalContext::new(&values, &snapshot.globals, params)
            .with_resolution(snapshot.config.variable_resolution);
        let fired = node.rule.when.evaluate_bool(&ctx, warnings);
        let branch = if fired {
            &node.rule.then
        } else {
            &node.rule.otherwise
        };
        tracing::trace!(rule = %id, fired, actions = branch.len(), "rule evaluated");

        for action in branch.iter() {
            if let Action::SetValue { target, value } = action
                && snapshot.deps.has_field(target)
            {
                values.to_mut().insert(target.clone(), value.clone());
            }
            actions.push(action.clone());
        }
    }
    actions
}

/// Returns a new snapshot with `actions` applied in order; the input is untouched.
pub fn apply_actions(actions: &[Action], snapshot: &Snapshot) -> Snapshot {
    let mut next = snapshot.clone();
    apply_in_place(&mut next, actions);
    next
}

pub(crate) fn apply_in_place(snapshot: &mut Snapshot, actions: &[Action]) {
    for action in actions {
        let applied = apply_one(snapshot, action);
        tracing::trace!(?action, applied, "action applied");
    }
}

fn apply_one(snapshot: &mut Snapshot, action: &Action) -> bool {
    let ui = &mut snapshot.ui;
    match action {
        Action::ShowField { target } => edit(ui.fields.get_mut(target), |f| f.visible = true),
        Action::HideField { target } => edit(ui.fields.get_mut(target), |f| f.visible = false),
        Action::ShowSection { target } => edit(ui.sections.get_mut(target), |s| s.visible = true),
        Action::HideSection { target } => {
            edit(ui.sections.get_mut(target), |s| s.visible = false)
        }
        Action::Enable { target } => {
            let section = edit(ui.sections.get_mut(target), |s| s.disabled = false);
            let field = edit(ui.fields.get_mut(target), |f| f.disabled = false);
            section || field
        }
        Action::Disable { target } => {
            let section = edit(ui.sections.get_mut(target), |s| s.disabled = true);
            let field = edit(ui.fields.get_mut(target), |f| f.disabled = true);
            section || field
        }
        Action::EnableField { target } => edit(ui.fields.get_mut(target), |f| f.disabled = false),
        Action::DisableField { target } => edit(ui.fields.get_mut(target), |f| f.disabled = true),
        Action::EnableSection { target } => {
            edit(ui.sections.get_mut(target), |s| s.disabled = false)
        }
        Action::DisableSection { target } => {
            edit(ui.sections.get_mut(target), |s| s.disabled = true)
        }
        Action::SetValue { target, value } => {
            if !snapshot.deps.has_field(target) || snapshot.values.get(target) == Some(value) {
                return false;
            }
            snapshot.values.insert(target.clone(), value.clone());
            true
        }
        Action::SetOptions { target, options } => edit(ui.fields.get_mut(target), |f| {
            f.options = Some(options.clone());
            f.disabled_options.clear();
        }),
        Action::EnableOption { target, value } => edit(ui.fields.get_mut(target), |f| {
            f.disabled_options.retain(|disabled| disabled != value)
        }),
        Action::DisableOption { target, value } => edit(ui.fields.get_mut(target), |f| {
            if !f.disabled_options.contains(value) {
                f.disabled_options.push(value.clone());
            }
        }),
        Action::SetError { target, message } => {
            if !edit(ui.fields.get_mut(target), |f| f.error = Some(message.clone()))
                && !ui.fields.contains_key(target)
            {
                return false;
            }
            snapshot.errors.insert(target.clone(), message.clone());
            true
        }
        Action::ClearError { target } => {
            let inline = edit(ui.fields.get_mut(target), |f| f.error = None);
            snapshot.errors.remove(target).is_some() || inline
        }
        Action::Unknown => false,
    }
}

/// Replaces the shared entry only when the edit changes it.
fn edit<T: Clone + PartialEq>(entry: Option<&mut Arc<T>>, change: impl FnOnce(&mut T)) -> bool {
    let Some(entry) = entry else {
        return false;
    };
    let mut next = T::clone(entry);
    change(&mut next);
    if next == **entry {
        return false;
    }
    *entry = Arc::new(next);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Schema;
    use serde_json::json;

    fn snapshot(value: Value) -> Snapshot {
        let schema: Schema = serde_json::from_value(value).expect("schema");
        Snapshot::create(schema, Map::new()).expect("snapshot")
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn writer_sorts_before_reader() {
        let snap = snapshot(json!({
            "sections": [{ "id": "main", "fields": [
                { "id": "a", "type": "text" },
                { "id": "b", "type": "text" },
                { "id": "c", "type": "text" }
            ]}],
            "formRules": [
                {
                    "id": "reads_b",
                    "when": { "==": [{ "var": "b" }, "x"] },
                    "then": { "type": "HIDE_FIELD", "target": "c" }
                },
                {
                    "id": "writes_b",
                    "when": { "==": [{ "var": "a" }, "go"] },
                    "then": { "type": "SET_VALUE", "target": "b", "value": "x" }
                }
            ]
        }));
        let sorted = sort_rules_for_evaluation(&ids(&["reads_b", "writes_b", "missing"]), snap.deps());
        assert_eq!(sorted, ids(&["writes_b", "reads_b"]));
    }

    #[test]
    fn cycle_members_follow_acyclic_rules_in_input_order() {
        let snap = snapshot(json!({
            "sections": [{ "id": "main", "fields": [
                { "id": "a", "type": "number" },
                { "id": "b", "type": "number" },
                { "id": "c", "type": "text" }
            ]}],
            "formRules": [
                {
                    "id": "a_to_b",
                    "when": { ">": [{ "var": "a" }, 1] },
                    "then": { "type": "SET_VALUE", "target": "b", "value": 1 }
                },
                {
                    "id": "b_to_a",
                    "when": { ">": [{ "var": "b" }, 1] },
                    "then": { "type": "SET_VALUE", "target": "a", "value": 1 }
                },
                {
                    "id": "free",
                    "when": { "==": [{ "var": "c" }, "x"] },
                    "then": { "type": "HIDE_FIELD", "target": "a" }
                }
            ]
        }));
        assert_eq!(snap.deps().cycles.len(), 1);
        let sorted = sort_rules_for_evaluation(&ids(&["a_to_b", "b_to_a", "free"]), snap.deps());
        assert_eq!(sorted, ids(&["free", "a_to_b", "b_to_a"]));
    }

    #[test]
    fn evaluation_sees_earlier_writes_without_applying() {
        let snap = snapshot(json!({
            "sections": [{ "id": "main", "fields": [
                { "id": "plan", "type": "text" },
                { "id": "seats", "type": "number" },
                { "id": "invoice", "type": "text" }
            ]}],
            "formRules": [
                {
                    "id": "team_needs_invoice",
                    "when": { ">": [{ "var": "seats" }, 1] },
                    "then": { "type": "SHOW_FIELD", "target": "invoice" },
                    "else": { "type": "HIDE_FIELD", "target": "invoice" }
                },
                {
                    "id": "team_seats",
                    "when": { "==": [{ "var": "plan" }, "team"] },
                    "then": { "type": "SET_VALUE", "target": "seats", "value": 5 }
                }
            ]
        }));
        let team = snap.update("plan", json!("team")).expect("update");
        let reverted = apply_actions(
            &[Action::SetValue { target: "seats".into(), value: json!(1) }],
            &team,
        );
        let actions = evaluate_rules(&ids(&["team_needs_invoice", "team_seats"]), &reverted, None);
        assert_eq!(
            actions,
            vec![
                Action::SetValue { target: "seats".into(), value: json!(5) },
                Action::ShowField { target: "invoice".into() },
            ]
        );
        assert_eq!(reverted.value("seats"), Some(&json!(1)));
    }

    #[test]
    fn apply_keeps_untouched_entries_shared() {
        let snap = snapshot(json!({
            "sections": [{ "id": "main", "fields": [
                { "id": "a", "type": "text" },
                { "id": "b", "type": "text" }
            ]}]
        }));
        let next = apply_actions(
            &[
                Action::HideField { target: "a".into() },
                Action::ShowField { target: "b".into() },
                Action::HideField { target: "nope".into() },
                Action::Unknown,
            ],
            &snap,
        );
        assert!(!next.field_ui("a").expect("a").visible);
        assert!(snap.field_ui("a").expect("a").visible);
        assert!(Arc::ptr_eq(
            next.field_ui("b").expect("b"),
            snap.field_ui("b").expect("b")
        ));
        assert!(Arc::ptr_eq(
            next.section_ui("main").expect("main"),
            snap.section_ui("main").expect("main")
        ));
    }

    #[test]
    fn enable_and_disable_touch_section_and_field_with_same_id() {
        let snap = snapshot(json!({
            "sections": [{ "id": "shared", "fields": [{ "id": "shared", "type": "text" }] }]
        }));
        let next = apply_actions(&[Action::Disable { target: "shared".into() }], &snap);
        assert!(next.section_ui("shared").expect("section").disabled);
        assert!(next.field_ui("shared").expect("field").disabled);
    }

    #[test]
    fn options_and_errors_update_field_state() {
        let snap = snapshot(json!({
            "sections": [{ "id": "main", "fields": [{
                "id": "size",
                "type": "select",
                "options": [{ "label": "S", "value": "s" }, { "label": "M", "value": "m" }]
            }]}]
        }));
        let next = apply_actions(
            &[
                Action::DisableOption { target: "size".into(), value: json!("s") },
                Action::SetError { target: "size".into(), message: "pick one".into() },
                Action::SetError { target: "ghost".into(), message: "ignored".into() },
            ],
            &snap,
        );
        let size = next.field_ui("size").expect("size");
        assert_eq!(size.disabled_options, vec![json!("s")]);
        assert_eq!(size.error.as_deref(), Some("pick one"));
        assert_eq!(next.errors().get("size").map(String::as_str), Some("pick one"));
        assert!(!next.errors().contains_key("ghost"));

        let next = apply_actions(
            &[
                Action::SetOptions {
                    target: "size".into(),
                    options: vec![crate::spec::OptionItem::new("L", "l")],
                },
                Action::ClearError { target: "size".into() },
            ],
            &next,
        );
        let size = next.field_ui("size").expect("size");
        assert!(size.disabled_options.is_empty());
        assert_eq!(size.options.as_ref().map(Vec::len), Some(1));
        assert!(size.error.is_none());
        assert!(next.errors().is_empty());
    }
}
