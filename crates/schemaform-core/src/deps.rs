use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::config::{CyclePolicy, EngineConfig};
use crate::error::{SchemaError, Warning};
use crate::expr::{Expr, is_context_path};
use crate::path;
use crate::spec::{Action, Actions, Rule, Schema, subsection_key};

/// Kind of element owning a synthesized visibility rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    Section,
    Subsection,
    Field,
}

impl OwnerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OwnerKind::Section => "section",
            OwnerKind::Subsection => "subsection",
            OwnerKind::Field => "field",
        }
    }
}

/// Deterministic id of the rule synthesized from an element's `visibilityRule`.
pub fn visibility_rule_id(kind: OwnerKind, id: &str) -> String {
    format!("__visibility:{}:{id}", kind.as_str())
}

/// A rule plus what its condition reads and what it writes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleNode {
    pub rule: Rule,
    pub reads: Vec<String>,
    pub writes: Vec<String>,
}

/// Where a field lives in the section tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldLocation {
    pub section: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subsection: Option<String>,
}

/// Index from field ids to the rules that must re-run when they change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyGraph {
    pub by_field: BTreeMap<String, Vec<String>>,
    pub rules: BTreeMap<String, RuleNode>,
    /// Every rule id in document order.
    pub order: Vec<String>,
    pub cycles: Vec<Vec<String>>,
    pub fields: BTreeMap<String, FieldLocation>,
    /// Field id to the remote-options fields that list it in `dependsOn`.
    pub options_by_field: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn build(schema: &Schema) -> Result<Self, SchemaError> {
        Self::build_with(schema, &EngineConfig::default())
    }

    pub fn build_with(schema: &Schema, config: &EngineConfig) -> Result<Self, SchemaError> {
        schema.check(config)?;
        let mut graph = DependencyGraph::default();

        for section in &schema.sections {
            for field in &section.fields {
                graph.fields.insert(
                    field.id.clone(),
                    FieldLocation {
                        section: section.id.clone(),
                        subsection: None,
                    },
                );
            }
            for subsection in &section.subsections {
                for field in &subsection.fields {
                    graph.fields.insert(
                        field.id.clone(),
                        FieldLocation {
                            section: section.id.clone(),
                            subsection: Some(subsection.id.clone()),
                        },
                    );
                }
            }
        }

        for rule in synthesize_rules(schema)
            .into_iter()
            .chain(schema.declared_rules().cloned())
        {
            graph.insert_rule(rule)?;
        }

        for field in schema.fields() {
            if let Some(remote) = field.remote_options() {
                for dependency in &remote.depends_on {
                    let entry = graph.options_by_field.entry(dependency.clone()).or_default();
                    if !entry.contains(&field.id) {
                        entry.push(field.id.clone());
                    }
                }
            }
        }

        graph.cycles = graph.detect_cycles();
        if let Some(cycle) = graph.cycles.first() {
            match config.cycle_policy {
                CyclePolicy::Reject => return Err(SchemaError::Cycle(cycle.clone())),
                CyclePolicy::Warn => {
                    for cycle in &graph.cycles {
                        tracing::warn!(rules = ?cycle, "rule cycle detected through SET_VALUE");
                    }
                }
            }
        }

        Ok(graph)
    }

    fn insert_rule(&mut self, rule: Rule) -> Result<(), SchemaError> {
        if self.rules.contains_key(&rule.id) {
            return Err(SchemaError::DuplicateRule(rule.id));
        }
        let reads = rule.when.variable_paths();
        let writes = rule.written_fields();

        for read in reads.iter().filter(|read| !is_context_path(read)) {
            let mut keys = Vec::new();
            if let Some(last) = path::last_key(read) {
                keys.push(last);
            }
            if let Some(root) = path::root_key(read)
                && self.fields.contains_key(&root)
                && !keys.contains(&root)
            {
                keys.push(root);
            }
            for key in keys {
                let entry = self.by_field.entry(key).or_default();
                if !entry.contains(&rule.id) {
                    entry.push(rule.id.clone());
                }
            }
        }

        self.order.push(rule.id.clone());
        self.rules.insert(
            rule.id.clone(),
            RuleNode {
                rule,
                reads,
                writes,
            },
        );
        Ok(())
    }

    pub fn rule(&self, id: &str) -> Option<&RuleNode> {
        self.rules.get(id)
    }

    /// Rules to re-evaluate when `field_id` changes.
    pub fn rules_for_field(&self, field_id: &str) -> &[String] {
        self.by_field
            .get(field_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn has_field(&self, field_id: &str) -> bool {
        self.fields.contains_key(field_id)
    }

    pub fn location(&self, field_id: &str) -> Option<&FieldLocation> {
        self.fields.get(field_id)
    }

    /// Remote-options fields that must be refreshed when `field_id` changes.
    pub fn options_dependents(&self, field_id: &str) -> &[String] {
        self.options_by_field
            .get(field_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn cycle_warnings(&self) -> Vec<Warning> {
        self.cycles
            .iter()
            .map(|rules| Warning::Cycle {
                rules: rules.clone(),
            })
            .collect()
    }

    /// Writer rule to the rules reading a field it writes.
    pub(crate) fn write_edges(&self, rule_id: &str) -> Vec<&str> {
        let Some(node) = self.rules.get(rule_id) else {
            return Vec::new();
        };
        let mut targets = Vec::new();
        for field in &node.writes {
            for reader in self.rules_for_field(field) {
                if !targets.contains(&reader.as_str()) {
                    targets.push(reader.as_str());
                }
            }
        }
        targets
    }

    /// Strongly connected components that contain a cycle, in document order.
    fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut tarjan = Tarjan::new(self);
        for id in &self.order {
            if !tarjan.index.contains_key(id.as_str()) {
                tarjan.connect(id);
            }
        }

        let position: BTreeMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.as_str(), idx))
            .collect();
        let mut cycles: Vec<Vec<String>> = tarjan
            .components
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|id| self.write_edges(id).contains(id))
            })
            .map(|mut component| {
                component.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));
                component.into_iter().map(str::to_string).collect()
            })
            .collect();
        cycles.sort_by_key(|cycle: &Vec<String>| {
            cycle
                .first()
                .and_then(|id| position.get(id.as_str()).copied())
                .unwrap_or(usize::MAX)
        });
        cycles
    }
}

struct Tarjan<'g> {
    graph: &'g DependencyGraph,
    next_index: usize,
    index: BTreeMap<&'g str, usize>,
    lowlink: BTreeMap<&'g str, usize>,
    stack: Vec<&'g str>,
    on_stack: BTreeSet<&'g str>,
    components: Vec<Vec<&'g str>>,
}

impl<'g> Tarjan<'g> {
    fn new(graph: &'g DependencyGraph) -> Self {
        Self {
            graph,
            next_index: 0,
            index: BTreeMap::new(),
            lowlink: BTreeMap::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            components: Vec::new(),
        }
    }

    fn connect(&mut self, id: &'g str) {
        self.index.insert(id, self.next_index);
        self.lowlink.insert(id, self.next_index);
        self.next_index += 1;
        self.stack.push(id);
        self.on_stack.insert(id);

        for target in self.graph.write_edges(id) {
            if !self.index.contains_key(target) {
                self.connect(target);
                let low = self.lowlink[target].min(self.lowlink[id]);
                self.lowlink.insert(id, low);
            } else if self.on_stack.contains(target) {
                let low = self.index[target].min(self.lowlink[id]);
                self.lowlink.insert(id, low);
            }
        }

        if self.lowlink[id] == self.index[id] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(member);
                component.push(member);
                if member == id {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

fn synthesize_rules(schema: &Schema) -> Vec<Rule> {
    let mut rules = Vec::new();
    for section in &schema.sections {
        if let Some(expr) = &section.visibility_rule {
            rules.push(visibility_rule(
                OwnerKind::Section,
                &section.id,
                &section.id,
                expr,
            ));
        }
        for subsection in &section.subsections {
            if let Some(expr) = &subsection.visibility_rule {
                rules.push(visibility_rule(
                    OwnerKind::Subsection,
                    &subsection.id,
                    &subsection_key(&subsection.id),
                    expr,
                ));
            }
        }
    }
    for field in schema.fields() {
        if let Some(expr) = &field.visibility_rule {
            rules.push(visibility_rule(OwnerKind::Field, &field.id, &field.id, expr));
        }
    }
    rules
}

fn visibility_rule(kind: OwnerKind, id: &str, target: &str, when: &Expr) -> Rule {
    let target = target.to_string();
    let (show, hide) = match kind {
        OwnerKind::Field => (
            Action::ShowField {
                target: target.clone(),
            },
            Action::HideField { target },
        ),
        OwnerKind::Section | OwnerKind::Subsection => (
            Action::ShowSection {
                target: target.clone(),
            },
            Action::HideSection { target },
        ),
    };
    Rule {
        id: visibility_rule_id(kind, id),
        when: when.clone(),
        then: Actions(vec![show]),
        otherwise: Actions(vec![hide]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(value: serde_json::Value) -> Schema {
        serde_json::from_value(value).expect("schema should parse")
    }

    #[test]
    fn nested_reads_index_last_segment_and_owning_field() {
        let schema = schema(json!({
            "sections": [{
                "id": "main",
                "fields": [
                    { "id": "address", "type": "hidden" },
                    { "id": "note", "type": "text" }
                ]
            }],
            "formRules": [{
                "id": "berlin",
                "when": { "==": [{ "var": "address.city" }, "Berlin"] },
                "then": { "type": "SHOW_FIELD", "target": "note" }
            }]
        }));
        let graph = DependencyGraph::build(&schema).expect("graph");
        assert_eq!(graph.rules_for_field("city"), ["berlin".to_string()]);
        assert_eq!(graph.rules_for_field("address"), ["berlin".to_string()]);
    }

    #[test]
    fn self_writing_rule_is_a_cycle() {
        let schema = schema(json!({
            "sections": [{ "id": "main", "fields": [{ "id": "counter", "type": "number" }] }],
            "formRules": [{
                "id": "bump",
                "when": { ">": [{ "var": "counter" }, 0] },
                "then": { "type": "SET_VALUE", "target": "counter", "value": 0 }
            }]
        }));
        let graph = DependencyGraph::build(&schema).expect("graph");
        assert_eq!(graph.cycles, vec![vec!["bump".to_string()]]);
    }
}
