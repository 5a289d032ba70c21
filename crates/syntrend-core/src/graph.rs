use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{LIST_KIND, ProjectConfig, PropertyDefinition};

/// Property path → paths it reads while being rendered.
pub type DependencyMap = BTreeMap<String, BTreeSet<String>>;

/// Matches `{object.path[0].field}` reference tokens. Quoted strings are
/// matched as a whole so braces inside them are not references.
pub const REFERENCE_PATTERN: &str = r#"(?s)'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*"|\{([^}]*)\}"#;

static REFERENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(REFERENCE_PATTERN).expect("reference pattern compiles"));

/// Alias for the owning object inside a reference token.
pub const SELF_ALIAS: &str = "this";

/// Cycle extraction rounds before the resolver gives up.
const MAX_CYCLE_ROUNDS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("Missing leaf nodes: {}", .0.join(", "))]
    MissingLeaf(Vec<String>),
    #[error("Circular dependency with {}", format_groups(.0))]
    Circular(Vec<Vec<String>>),
    #[error("dependency resolution did not converge after {0} cycle rounds")]
    Unresolved(usize),
}

fn format_groups(groups: &[Vec<String>]) -> String {
    groups
        .iter()
        .map(|group| format!("[{}]", group.join(", ")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Evaluation layers plus any circular groups found along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyReport {
    pub layers: Vec<BTreeSet<String>>,
    pub cycles: Vec<Vec<String>>,
}

impl DependencyReport {
    /// Layer index of every path.
    pub fn ranks(&self) -> BTreeMap<String, usize> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(index, layer)| layer.iter().map(move |path| (path.clone(), index)))
            .collect()
    }
}

/// Reference tokens found in an expression, trimmed, in order of appearance.
pub fn reference_tokens(text: &str) -> Vec<String> {
    REFERENCE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|token| token.as_str().trim().to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Resolve a reference token to an absolute path, expanding the self alias.
pub fn resolve_reference(object: &str, token: &str) -> String {
    if token == SELF_ALIAS {
        return object.to_string();
    }
    match token.strip_prefix(SELF_ALIAS) {
        Some(rest) if rest.starts_with('.') || rest.starts_with('[') => format!("{object}{rest}"),
        _ => token.to_string(),
    }
}

/// Leading object name of a property path.
pub fn object_name(path: &str) -> &str {
    path.split(['.', '['])
        .next()
        .unwrap_or(path)
}

/// Walk a property tree and record every node's dependencies.
///
/// Composite nodes depend on their children, so a child referring back to an
/// ancestor shows up as a cycle. Any element index of a list resolves to the
/// list's `sub_type` node at `[0]`.
pub fn iter_property_dependencies(root_path: &str, definition: &PropertyDefinition) -> DependencyMap {
    let mut map = DependencyMap::new();
    let mut lists = BTreeSet::new();
    collect_dependencies(object_name(root_path), root_path, definition, &mut map, &mut lists);
    canonical_targets(map, &lists)
}

/// Dependency map across every object of a project.
pub fn project_dependencies(project: &ProjectConfig) -> DependencyMap {
    let mut map = DependencyMap::new();
    let mut lists = BTreeSet::new();
    for (name, object) in &project.objects {
        collect_dependencies(name, name, &object.property, &mut map, &mut lists);
    }
    canonical_targets(map, &lists)
}

/// Path of the node that renders `path`: element indexes below a list
/// collapse to `[0]`, the list's single `sub_type` node.
pub fn canonical_path(path: &str, lists: &BTreeSet<String>) -> String {
    let mut canonical = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(open) = rest.find('[') {
        canonical.push_str(&rest[..open]);
        let bracket = &rest[open..];
        let Some(close) = bracket.find(']') else {
            canonical.push_str(bracket);
            return canonical;
        };
        let index = &bracket[1..close];
        let is_index = !index.is_empty() && index.bytes().all(|byte| byte.is_ascii_digit());
        if is_index && lists.contains(&canonical) {
            canonical.push_str("[0]");
        } else {
            canonical.push_str(&bracket[..=close]);
        }
        rest = &bracket[close + 1..];
    }
    canonical.push_str(rest);
    canonical
}

fn canonical_targets(map: DependencyMap, lists: &BTreeSet<String>) -> DependencyMap {
    if lists.is_empty() {
        return map;
    }
    map.into_iter()
        .map(|(path, targets)| {
            // an element reading a sibling element collapses onto itself
            let targets = targets
                .iter()
                .filter_map(|target| {
                    let canonical = canonical_path(target, lists);
                    (canonical != path || canonical == *target).then_some(canonical)
                })
                .collect();
            (path, targets)
        })
        .collect()
}

fn collect_dependencies(
    object: &str,
    path: &str,
    definition: &PropertyDefinition,
    map: &mut DependencyMap,
    lists: &mut BTreeSet<String>,
) {
    let mut dependencies = BTreeSet::new();

    if let Some(expression) = definition.expression.as_deref() {
        for token in reference_tokens(expression) {
            dependencies.insert(resolve_reference(object, &token));
        }
    }
    for condition in &definition.conditions {
        for token in reference_tokens(condition) {
            let target = resolve_reference(object, &token);
            // conditions may read the candidate itself
            if target != path {
                dependencies.insert(target);
            }
        }
    }

    if definition.kind == LIST_KIND {
        lists.insert(path.to_string());
    }
    for (suffix, child) in definition.children() {
        let child_path = format!("{path}{suffix}");
        dependencies.insert(child_path.clone());
        collect_dependencies(object, &child_path, child, map, lists);
    }

    map.insert(path.to_string(), dependencies);
}

/// Order a dependency map into layers, failing on missing paths or cycles.
pub fn prepare_dependency_tree(map: &DependencyMap) -> Result<Vec<BTreeSet<String>>, DependencyError> {
    let report = build_dependency_report(map)?;
    if !report.cycles.is_empty() {
        return Err(DependencyError::Circular(report.cycles));
    }
    Ok(report.layers)
}

/// Order a dependency map into layers; cycles become atomic layers and are
/// listed in the report instead of failing.
pub fn build_dependency_report(map: &DependencyMap) -> Result<DependencyReport, DependencyError> {
    let missing: BTreeSet<String> = map
        .values()
        .flatten()
        .filter(|path| !map.contains_key(*path))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(DependencyError::MissingLeaf(missing.into_iter().collect()));
    }

    let mut report = DependencyReport::default();
    let mut remaining = map.clone();
    let mut resolved: BTreeSet<String> = BTreeSet::new();
    let mut rounds = 0;

    while !remaining.is_empty() {
        let ready: BTreeSet<String> = remaining
            .iter()
            .filter(|(_, dependencies)| dependencies.iter().all(|dep| resolved.contains(dep)))
            .map(|(path, _)| path.clone())
            .collect();

        if !ready.is_empty() {
            for path in &ready {
                remaining.remove(path);
            }
            resolved.extend(ready.iter().cloned());
            report.layers.push(ready);
            continue;
        }

        rounds += 1;
        if rounds > MAX_CYCLE_ROUNDS {
            return Err(DependencyError::Unresolved(MAX_CYCLE_ROUNDS));
        }

        for group in evaluate_circular_dependencies(&remaining) {
            let layer: BTreeSet<String> = group
                .iter()
                .filter(|path| remaining.contains_key(*path))
                .cloned()
                .collect();
            for path in &layer {
                remaining.remove(path);
            }
            resolved.extend(layer.iter().cloned());
            if !layer.is_empty() {
                report.layers.push(layer);
            }
            report.cycles.push(group);
        }
    }

    Ok(report)
}

/// Find minimal circular groups in an unresolvable remainder.
///
/// Each group is reported in walk order starting from its first node. For a
/// given start and closing node only the shortest walk is kept, and a group
/// with the same members as an earlier one is skipped.
pub fn evaluate_circular_dependencies(remaining: &DependencyMap) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut assigned: BTreeSet<String> = BTreeSet::new();

    for start in remaining.keys() {
        if assigned.contains(start) {
            continue;
        }
        let mut shortest: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut walk = vec![start.clone()];
        walk_cycles(remaining, start, &mut walk, &mut shortest);

        for cycle in shortest.into_values() {
            let members: BTreeSet<&String> = cycle.iter().collect();
            if groups
                .iter()
                .any(|group| group.iter().collect::<BTreeSet<_>>() == members)
            {
                continue;
            }
            assigned.extend(cycle.iter().cloned());
            groups.push(cycle);
        }
    }

    groups
}

fn walk_cycles(
    graph: &DependencyMap,
    start: &str,
    walk: &mut Vec<String>,
    shortest: &mut BTreeMap<String, Vec<String>>,
) {
    let Some(current) = walk.last().cloned() else {
        return;
    };
    let Some(targets) = graph.get(&current) else {
        return;
    };

    for target in targets {
        if target == start {
            let keep = shortest
                .get(&current)
                .is_none_or(|existing| walk.len() < existing.len());
            if keep {
                shortest.insert(current.clone(), walk.clone());
            }
        } else if graph.contains_key(target) && !walk.contains(target) {
            walk.push(target.clone());
            walk_cycles(graph, start, walk, shortest);
            walk.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &[&str])]) -> DependencyMap {
        entries
            .iter()
            .map(|(key, deps)| {
                (
                    key.to_string(),
                    deps.iter().map(|dep| dep.to_string()).collect(),
                )
            })
            .collect()
    }

    fn layer(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|path| path.to_string()).collect()
    }

    fn sorted_groups(groups: &[Vec<String>]) -> Vec<Vec<String>> {
        groups
            .iter()
            .map(|group| {
                let mut group = group.clone();
                group.sort();
                group
            })
            .collect()
    }

    #[test]
    fn independent_paths_share_one_layer() {
        let layers = prepare_dependency_tree(&map(&[("A", &[]), ("B", &[]), ("C", &[])]))
            .expect("layers");
        assert_eq!(layers, vec![layer(&["A", "B", "C"])]);
    }

    #[test]
    fn chained_paths_are_layered_in_order() {
        let layers = prepare_dependency_tree(&map(&[("A", &["B"]), ("B", &[])])).expect("layers");
        assert_eq!(layers, vec![layer(&["B"]), layer(&["A"])]);

        let layers = prepare_dependency_tree(&map(&[("A", &["B", "C"]), ("B", &["C"]), ("C", &[])]))
            .expect("layers");
        assert_eq!(layers, vec![layer(&["C"]), layer(&["B"]), layer(&["A"])]);
    }

    #[test]
    fn empty_map_has_no_layers() {
        let layers = prepare_dependency_tree(&DependencyMap::new()).expect("layers");
        assert!(layers.is_empty());
    }

    #[test]
    fn missing_path_is_reported_by_name() {
        let err = prepare_dependency_tree(&map(&[("A", &["B", "C"]), ("B", &[])]))
            .expect_err("missing leaf");
        assert_eq!(err, DependencyError::MissingLeaf(vec!["C".to_string()]));
        assert_eq!(err.to_string(), "Missing leaf nodes: C");
    }

    #[test]
    fn missing_path_wins_over_cycle() {
        let err = prepare_dependency_tree(&map(&[("A", &["B"]), ("B", &["A", "Z"])]))
            .expect_err("missing leaf");
        assert!(matches!(err, DependencyError::MissingLeaf(_)));
    }

    #[test]
    fn cycles_are_reported_as_minimal_groups() {
        let cases: Vec<(DependencyMap, Vec<Vec<&str>>)> = vec![
            (map(&[("A", &["B"]), ("B", &["A"])]), vec![vec!["A", "B"]]),
            (
                map(&[("A", &["B"]), ("B", &["C"]), ("C", &["A"])]),
                vec![vec!["A", "B", "C"]],
            ),
            (
                map(&[("A", &["B", "C"]), ("B", &["C"]), ("C", &["A"])]),
                vec![vec!["A", "C"], vec!["A", "B", "C"]],
            ),
            (
                map(&[("A", &["D"]), ("B", &["C"]), ("C", &["B"]), ("D", &["A"])]),
                vec![vec!["A", "D"], vec!["B", "C"]],
            ),
            (
                map(&[("A", &["B", "C"]), ("B", &["A"]), ("C", &["A"])]),
                vec![vec!["A", "B"], vec!["A", "C"]],
            ),
        ];

        for (dependencies, expected) in cases {
            let err = prepare_dependency_tree(&dependencies).expect_err("cycle");
            let DependencyError::Circular(groups) = err else {
                panic!("expected circular error, got {err:?}");
            };
            assert!(!groups.is_empty());
            let expected: Vec<Vec<String>> = expected
                .iter()
                .map(|group| group.iter().map(|path| path.to_string()).collect())
                .collect();
            for group in sorted_groups(&groups) {
                assert!(expected.contains(&group), "unexpected group {group:?}");
            }
        }
    }

    #[test]
    fn two_independent_cycles_are_both_reported() {
        let err = prepare_dependency_tree(&map(&[
            ("A", &["D"]),
            ("B", &["C"]),
            ("C", &["B"]),
            ("D", &["A"]),
        ]))
        .expect_err("cycle");
        let DependencyError::Circular(groups) = err else {
            panic!("expected circular error");
        };
        assert_eq!(
            sorted_groups(&groups),
            vec![
                vec!["A".to_string(), "D".to_string()],
                vec!["B".to_string(), "C".to_string()]
            ]
        );
    }

    #[test]
    fn report_keeps_layering_past_a_cycle() {
        let report =
            build_dependency_report(&map(&[("A", &["B"]), ("B", &["A"]), ("C", &["A"]), ("D", &[])]))
                .expect("report");
        assert_eq!(report.cycles.len(), 1);
        assert_eq!(report.layers[0], layer(&["D"]));
        assert_eq!(report.layers[1], layer(&["A", "B"]));
        assert_eq!(report.layers[2], layer(&["C"]));
    }

    #[test]
    fn property_walk_builds_paths_and_edges() {
        let definition: PropertyDefinition = serde_json::from_value(serde_json::json!({
            "type": "object",
            "properties": {
                "a": {"type": "integer"},
                "b": {"type": "integer", "expression": "{this.a} + {other.value}"},
                "tags": {"type": "list", "sub_type": {"type": "string"}},
                "pick": {"type": "union", "items": [
                    {"type": "integer", "conditions": ["new > {root.a}"]},
                    {"type": "string"}
                ]}
            }
        }))
        .expect("definition");

        let dependencies = iter_property_dependencies("root", &definition);

        assert_eq!(
            dependencies.get("root"),
            Some(&layer(&["root.a", "root.b", "root.pick", "root.tags"]))
        );
        assert_eq!(dependencies.get("root.b"), Some(&layer(&["root.a", "other.value"])));
        assert_eq!(dependencies.get("root.tags"), Some(&layer(&["root.tags[0]"])));
        assert_eq!(dependencies.get("root.pick[0]"), Some(&layer(&["root.a"])));
        assert!(dependencies.contains_key("root.pick[1]"));
    }

    #[test]
    fn braces_inside_string_literals_are_not_references() {
        assert_eq!(reference_tokens("new ~ ' {unit}'"), Vec::<String>::new());
        assert_eq!(
            reference_tokens(r#"{this.a} ~ "{b}" ~ 'it\'s {c}' ~ { other.d }"#),
            vec!["this.a".to_string(), "other.d".to_string()]
        );
        assert!(reference_tokens("{}").is_empty());
    }

    #[test]
    fn quoted_braces_add_no_edges() {
        let definition: PropertyDefinition = serde_json::from_value(serde_json::json!({
            "type": "string",
            "expression": "new ~ ' {unit}'"
        }))
        .expect("definition");
        let dependencies = iter_property_dependencies("label", &definition);
        assert_eq!(dependencies.get("label"), Some(&BTreeSet::new()));
        prepare_dependency_tree(&dependencies).expect("no missing leaf");
    }

    #[test]
    fn list_element_indexes_resolve_to_the_sub_type() {
        let definition: PropertyDefinition = serde_json::from_value(serde_json::json!({
            "type": "object",
            "properties": {
                "tags": {
                    "type": "list",
                    "min_length": 3,
                    "sub_type": {"type": "object", "properties": {"id": {"type": "integer"}}}
                },
                "second": {"type": "integer", "expression": "{this.tags[1]}"},
                "third_id": {"type": "integer", "expression": "{this.tags[2].id}"}
            }
        }))
        .expect("definition");

        let dependencies = iter_property_dependencies("rec", &definition);

        assert_eq!(dependencies.get("rec.second"), Some(&layer(&["rec.tags[0]"])));
        assert_eq!(dependencies.get("rec.third_id"), Some(&layer(&["rec.tags[0].id"])));
        let layers = prepare_dependency_tree(&dependencies).expect("layers");
        let rank = |path: &str| layers.iter().position(|layer| layer.contains(path));
        assert!(rank("rec.tags[0]") < rank("rec.second"));
    }

    #[test]
    fn canonical_path_only_rewrites_list_indexes() {
        let lists = layer(&["rec.tags", "rec.tags[0].codes"]);
        assert_eq!(canonical_path("rec.tags[4].codes[7]", &lists), "rec.tags[0].codes[0]");
        assert_eq!(canonical_path("rec.pick[1]", &lists), "rec.pick[1]");
        assert_eq!(canonical_path("rec.tags[x]", &lists), "rec.tags[x]");
        assert_eq!(canonical_path("rec.tags", &lists), "rec.tags");
    }

    #[test]
    fn self_alias_resolves_to_owning_object() {
        assert_eq!(resolve_reference("sensor", "this.value"), "sensor.value");
        assert_eq!(resolve_reference("sensor", "this"), "sensor");
        assert_eq!(resolve_reference("sensor", "thisthat.value"), "thisthat.value");
        assert_eq!(object_name("sensor.readings[2].value"), "sensor");
    }
}
