//! Graph builder: reconciles catalog objects and dependency evidence.
//!
//! Two kinds of evidence feed the graph: structural dependencies declared by
//! the catalog reader (which say *that* two objects are related but not which
//! way data flows), and names mined from procedure bodies by the reference
//! extractor (which say *how* they are related). The builder merges both,
//! infers edge direction, and records everything it could not resolve as
//! diagnostics rather than failing.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use super::types::*;
use crate::extract::{extract_references, write_targets, RuleSet};
use crate::name::{normalize, QualifiedName};

/// Build the lineage graph from catalog objects and structural dependencies.
///
/// Never fails: unresolvable names, self references and unknown endpoints
/// end up in `diagnostics` or are dropped, and an empty result carries a
/// warning.
pub fn build_graph(
    objects: &[CatalogObject],
    dependencies: &[RawDependency],
    rules: &RuleSet,
) -> BuildResult {
    let mut result = BuildResult::default();
    if rules.used_defaults() {
        result.warnings.push(format!(
            "no valid extraction rules ({} rejected); using built-in defaults",
            rules.skipped().len()
        ));
    }

    // Phase 1: one node per canonical id, first occurrence wins
    let mut index: HashMap<String, usize> = HashMap::new();
    for object in objects {
        let name = QualifiedName::parse(&object.full_name);
        if name.external || name.is_system() {
            debug!(object = %object.full_name, "skipping system or external object");
            continue;
        }
        if !name.is_qualified() {
            debug!(object = %object.full_name, "skipping object without a schema");
            continue;
        }
        let id = name.canonical_id();
        if index.contains_key(&id) {
            debug!(object = %object.full_name, "duplicate catalog object dropped");
            continue;
        }
        index.insert(id.clone(), result.nodes.len());
        result.nodes.push(Node {
            id,
            schema: name.display_schema(),
            name: name.object.clone(),
            full_name: object.full_name.clone(),
            kind: object.kind,
            body: node_body(object),
        });
    }

    // Phase 2: structural dependencies grouped by the referencing object
    let structural = group_dependencies(dependencies, &index);

    // Phase 3: edges
    let mut edges = EdgeSet::default();
    for (node_idx, node) in result.nodes.iter().enumerate() {
        let declared = structural.get(&node_idx).map(Vec::as_slice).unwrap_or(&[]);

        let body = match &node.body {
            Some(body) if node.kind.is_body_parsed() => body,
            _ => {
                for &dep in declared {
                    edges.insert(dep, node_idx, EdgeKind::Reference);
                }
                continue;
            }
        };

        let diag = fold_routine(
            node_idx,
            &result.nodes,
            &index,
            declared,
            body,
            rules,
            &mut edges,
            &mut result.diagnostics,
        );
        debug!(
            routine = %node.id,
            inbound = diag.resolved_inbound,
            outbound = diag.resolved_outbound,
            unrelated = diag.unrelated.len(),
            skipped = diag.skipped.len(),
            "routine references resolved"
        );
        result.diagnostics.objects.insert(node.id.clone(), diag);
    }

    result.edges = edges
        .pairs
        .into_iter()
        .map(|(source, target, kind)| {
            Edge::new(&result.nodes[source].id, &result.nodes[target].id, kind)
        })
        .collect();

    if objects.is_empty() {
        result
            .warnings
            .push("no catalog objects supplied".to_string());
    } else if result.nodes.is_empty() {
        result.warnings.push(format!(
            "none of the {} catalog objects produced a node",
            objects.len()
        ));
    }

    info!(
        nodes = result.nodes.len(),
        edges = result.edges.len(),
        found = result.diagnostics.references_found,
        resolved = result.diagnostics.references_resolved,
        "lineage graph built"
    );
    result
}

/// Merge structural and extracted evidence for one procedure.
#[allow(clippy::too_many_arguments)]
fn fold_routine(
    node_idx: usize,
    nodes: &[Node],
    index: &HashMap<String, usize>,
    declared: &[usize],
    body: &str,
    rules: &RuleSet,
    edges: &mut EdgeSet,
    totals: &mut ParseDiagnostics,
) -> ObjectDiagnostics {
    let refs = extract_references(body, rules);
    let mut diag = ObjectDiagnostics::default();
    let mut inbound: HashSet<usize> = HashSet::new();
    let mut outbound: HashSet<usize> = HashSet::new();

    let outbound_ids: HashSet<&str> = refs
        .targets
        .iter()
        .chain(&refs.exec_calls)
        .filter(|id| is_user_name(id))
        .map(String::as_str)
        .collect();

    // Structural dependencies the extractor did not already classify as outbound
    let mut writes: Option<HashSet<String>> = None;
    for &dep in declared {
        let dep_node = &nodes[dep];
        if outbound_ids.contains(dep_node.id.as_str()) {
            continue;
        }
        let written = dep_node.kind == NodeKind::Table
            && writes
                .get_or_insert_with(|| write_targets(body))
                .contains(&dep_node.id);

        if dep_node.kind == NodeKind::Procedure {
            edges.insert(node_idx, dep, EdgeKind::Call);
            outbound.insert(dep);
        } else if written {
            edges.insert(node_idx, dep, EdgeKind::Reference);
            outbound.insert(dep);
        } else {
            edges.insert(dep, node_idx, EdgeKind::Reference);
            inbound.insert(dep);
        }
    }

    // Extractor results
    let buckets = [
        (&refs.sources, Flow::Inbound, EdgeKind::Reference),
        (&refs.targets, Flow::Outbound, EdgeKind::Reference),
        (&refs.exec_calls, Flow::Outbound, EdgeKind::Call),
    ];
    for (ids, flow, kind) in buckets {
        for id in ids {
            totals.references_found += 1;
            if !is_user_name(id) {
                push_unique(&mut diag.skipped, id);
                continue;
            }
            let Some(&other) = index.get(id) else {
                push_unique(&mut diag.unrelated, id);
                push_unique(&mut totals.unresolved_references, id);
                continue;
            };
            if other == node_idx {
                continue;
            }
            totals.references_resolved += 1;
            match flow {
                Flow::Inbound => {
                    edges.insert(other, node_idx, kind);
                    inbound.insert(other);
                }
                Flow::Outbound => {
                    edges.insert(node_idx, other, kind);
                    outbound.insert(other);
                }
            }
        }
    }

    diag.resolved_inbound = inbound.len();
    diag.resolved_outbound = outbound.len();
    diag
}

#[derive(Clone, Copy)]
enum Flow {
    Inbound,
    Outbound,
}

/// Qualified and outside the system schemas.
fn is_user_name(id: &str) -> bool {
    let name = QualifiedName::parse(id);
    name.is_qualified() && !name.is_system()
}

fn group_dependencies(
    dependencies: &[RawDependency],
    index: &HashMap<String, usize>,
) -> HashMap<usize, Vec<usize>> {
    let mut grouped: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut dropped = 0usize;

    for dep in dependencies {
        let source = normalize(&dep.source_name);
        let target = normalize(&dep.target_name);
        if source == target {
            dropped += 1;
            continue;
        }
        let (Some(&source_idx), Some(&target_idx)) = (index.get(&source), index.get(&target))
        else {
            dropped += 1;
            continue;
        };
        let targets = grouped.entry(source_idx).or_default();
        if !targets.contains(&target_idx) {
            targets.push(target_idx);
        }
    }

    debug!(
        kept = dependencies.len() - dropped,
        dropped, "structural dependencies grouped"
    );
    grouped
}

/// Body text for a node. Tables without a body but with column metadata get
/// a fixed-width column listing for display.
fn node_body(object: &CatalogObject) -> Option<String> {
    if let Some(body) = object.body.as_ref().filter(|b| !b.trim().is_empty()) {
        return Some(body.clone());
    }
    match (&object.columns, object.kind) {
        (Some(columns), NodeKind::Table) if !columns.is_empty() => {
            Some(describe_columns(&object.full_name, columns))
        }
        _ => None,
    }
}

fn describe_columns(full_name: &str, columns: &[Column]) -> String {
    let name_width = columns
        .iter()
        .map(|c| c.name.chars().count())
        .max()
        .unwrap_or(0);
    let type_width = columns
        .iter()
        .map(|c| c.data_type.chars().count())
        .max()
        .unwrap_or(0);

    let mut out = format!("TABLE {}\n", full_name);
    for column in columns {
        let nullability = if column.nullable { "NULL" } else { "NOT NULL" };
        out.push_str(&format!(
            "  {:<nw$}  {:<tw$}  {}\n",
            column.name,
            column.data_type,
            nullability,
            nw = name_width,
            tw = type_width
        ));
    }
    out
}

fn push_unique(list: &mut Vec<String>, id: &str) {
    if !list.iter().any(|existing| existing == id) {
        list.push(id.to_string());
    }
}

/// Ordered edge collection: first writer per `(source, target)` wins, no self-loops.
#[derive(Default)]
struct EdgeSet {
    pairs: Vec<(usize, usize, EdgeKind)>,
    seen: HashSet<(usize, usize)>,
}

impl EdgeSet {
    fn insert(&mut self, source: usize, target: usize, kind: EdgeKind) -> bool {
        if source == target || !self.seen.insert((source, target)) {
            return false;
        }
        self.pairs.push((source, target, kind));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(objects: &[CatalogObject], deps: &[RawDependency]) -> BuildResult {
        build_graph(objects, deps, &RuleSet::default())
    }

    fn assert_well_formed(result: &BuildResult) {
        let ids: HashSet<&str> = result.nodes.iter().map(|n| n.id.as_str()).collect();
        let mut pairs = HashSet::new();
        for edge in &result.edges {
            assert!(ids.contains(edge.source.as_str()), "dangling {}", edge.id());
            assert!(ids.contains(edge.target.as_str()), "dangling {}", edge.id());
            assert_ne!(edge.source, edge.target, "self-loop {}", edge.id());
            assert!(
                pairs.insert((edge.source.clone(), edge.target.clone())),
                "duplicate {}",
                edge.id()
            );
        }
    }

    #[test]
    fn test_duplicate_objects_first_wins() {
        let objects = vec![
            CatalogObject::new("dbo.Orders", NodeKind::Table),
            CatalogObject::new("[DBO].[ORDERS]", NodeKind::View),
        ];
        let result = build(&objects, &[]);
        assert_eq!(result.nodes.len(), 1);
        assert_eq!(result.nodes[0].kind, NodeKind::Table);
        assert_eq!(result.nodes[0].full_name, "dbo.Orders");
        assert_eq!(result.nodes[0].schema, "DBO");
        assert_eq!(result.nodes[0].name, "Orders");
    }

    #[test]
    fn test_system_objects_never_become_nodes() {
        let objects = vec![
            CatalogObject::new("sys.objects", NodeKind::View),
            CatalogObject::new("dbo.Real", NodeKind::Table),
        ];
        let result = build(&objects, &[]);
        assert_eq!(result.nodes.len(), 1);
        assert_eq!(result.nodes[0].id, "[dbo].[real]");
    }

    #[test]
    fn test_unqualified_objects_never_become_nodes() {
        let objects = vec![
            CatalogObject::new("Orders", NodeKind::Table),
            CatalogObject::new("db..Orders", NodeKind::Table),
            CatalogObject::new("dbo.Report", NodeKind::View),
        ];
        let deps = vec![RawDependency::new("dbo.Report", "Orders")];
        let result = build(&objects, &deps);
        assert_eq!(result.nodes.len(), 1);
        assert_eq!(result.nodes[0].id, "[dbo].[report]");
        assert!(result.edges.is_empty());
    }

    #[test]
    fn test_view_dependencies_are_inbound() {
        let objects = vec![
            CatalogObject::new("dbo.Orders", NodeKind::Table),
            CatalogObject::new("rpt.OrderSummary", NodeKind::View)
                .with_body("SELECT * FROM dbo.Orders"),
        ];
        let deps = vec![RawDependency::new("rpt.OrderSummary", "dbo.Orders")];
        let result = build(&objects, &deps);
        assert!(result.has_edge("[dbo].[orders]", "[rpt].[ordersummary]"));
        assert_eq!(result.edges.len(), 1);
        assert!(
            result.diagnostics.objects.is_empty(),
            "views are not mined for references"
        );
    }

    #[test]
    fn test_structural_dependencies_drop_self_and_unknown() {
        let objects = vec![
            CatalogObject::new("dbo.A", NodeKind::Table),
            CatalogObject::new("dbo.V", NodeKind::View),
        ];
        let deps = vec![
            RawDependency::new("dbo.V", "dbo.V"),
            RawDependency::new("dbo.V", "dbo.Missing"),
            RawDependency::new("dbo.V", "dbo.A"),
            RawDependency::new("dbo.V", "[dbo].[a]"),
        ];
        let result = build(&objects, &deps);
        assert_eq!(result.edges.len(), 1);
        assert_well_formed(&result);
    }

    /// A rule set that only recognizes reads, so writes are visible to the
    /// structural pass alone.
    fn reads_only() -> RuleSet {
        let defs = vec![crate::extract::RuleDef::new(
            "reads",
            crate::extract::RuleCategory::Source,
            r"\bFROM\s+(\w+\.\w+)",
            0,
        )];
        RuleSet::from_defs(&defs)
    }

    #[test]
    fn test_procedure_structural_direction_inference() {
        let objects = vec![
            CatalogObject::new("dbo.Source", NodeKind::Table),
            CatalogObject::new("dbo.Sink", NodeKind::Table),
            CatalogObject::new("dbo.Helper", NodeKind::Procedure).with_body("SELECT 1"),
            CatalogObject::new("etl.Run", NodeKind::Procedure)
                .with_body("UPDATE TOP (5) dbo.Sink SET x = 1; EXEC dbo.Helper"),
        ];
        let deps = vec![
            RawDependency::new("etl.Run", "dbo.Source"),
            RawDependency::new("etl.Run", "dbo.Sink"),
            RawDependency::new("etl.Run", "dbo.Helper"),
        ];
        let result = build_graph(&objects, &deps, &reads_only());
        assert!(result.has_edge("[dbo].[source]", "[etl].[run]"), "read");
        assert!(result.has_edge("[etl].[run]", "[dbo].[sink]"), "write");
        assert!(!result.has_edge("[dbo].[sink]", "[etl].[run]"));
        let call = result
            .edges
            .iter()
            .find(|e| e.target == "[dbo].[helper]")
            .unwrap();
        assert_eq!(call.source, "[etl].[run]");
        assert_eq!(call.kind, EdgeKind::Call);

        let diag = &result.diagnostics.objects["[etl].[run]"];
        assert_eq!(diag.resolved_inbound, 1);
        assert_eq!(diag.resolved_outbound, 2);
        assert_well_formed(&result);
    }

    #[test]
    fn test_top_qualified_writes_are_outbound() {
        let objects = vec![
            CatalogObject::new("dbo.T", NodeKind::Table),
            CatalogObject::new("dbo.U", NodeKind::Table),
            CatalogObject::new("etl.P", NodeKind::Procedure).with_body(
                "DELETE TOP (5) FROM dbo.T WHERE 1 = 1; INSERT TOP (5) INTO dbo.U SELECT 1",
            ),
        ];
        let deps = vec![
            RawDependency::new("etl.P", "dbo.T"),
            RawDependency::new("etl.P", "dbo.U"),
        ];
        let result = build_graph(&objects, &deps, &reads_only());
        assert!(result.has_edge("[etl].[p]", "[dbo].[t]"), "delete is a write");
        assert!(result.has_edge("[etl].[p]", "[dbo].[u]"), "insert is a write");
        // the bare FROM rule still sees `FROM dbo.T` as a read
        assert!(result.has_edge("[dbo].[t]", "[etl].[p]"));
        assert!(!result.has_edge("[dbo].[u]", "[etl].[p]"));
        assert_well_formed(&result);
    }

    #[test]
    fn test_unwritten_structural_table_is_inbound() {
        let objects = vec![
            CatalogObject::new("dbo.Log", NodeKind::Table),
            CatalogObject::new("dbo.Report", NodeKind::Procedure)
                .with_body("SELECT COUNT(*) FROM dbo.Log WITH (NOLOCK)"),
        ];
        let deps = vec![RawDependency::new("dbo.Report", "dbo.Log")];
        let result = build_graph(&objects, &deps, &reads_only());
        assert!(result.has_edge("[dbo].[log]", "[dbo].[report]"));
        assert_eq!(result.edges.len(), 1);
    }

    #[test]
    fn test_extracted_references_fold_in() {
        let objects = vec![
            CatalogObject::new("dbo.Orders", NodeKind::Table),
            CatalogObject::new("dbo.Audit", NodeKind::Table),
            CatalogObject::new("dbo.Notify", NodeKind::Procedure),
            CatalogObject::new("dbo.Process", NodeKind::Procedure).with_body(
                "INSERT INTO dbo.Audit SELECT * FROM dbo.Orders;
                 EXEC dbo.Notify;
                 SELECT * FROM dbo.Ghost JOIN sys.objects o ON 1 = 1 JOIN #tmp t ON 1 = 1",
            ),
        ];
        let result = build(&objects, &[]);
        assert!(result.has_edge("[dbo].[orders]", "[dbo].[process]"));
        assert!(result.has_edge("[dbo].[process]", "[dbo].[audit]"));
        assert!(result.has_edge("[dbo].[process]", "[dbo].[notify]"));

        let diag = &result.diagnostics.objects["[dbo].[process]"];
        assert_eq!(diag.resolved_inbound, 1);
        assert_eq!(diag.resolved_outbound, 2);
        assert_eq!(diag.unrelated, vec!["[dbo].[ghost]"]);
        assert!(diag.skipped.contains(&"[sys].[objects]".to_string()));
        assert!(diag.skipped.contains(&"[#tmp]".to_string()));
        assert_eq!(
            result.diagnostics.unresolved_references,
            vec!["[dbo].[ghost]"]
        );
        assert_well_formed(&result);
    }

    #[test]
    fn test_structural_dependency_already_outbound_not_duplicated() {
        let objects = vec![
            CatalogObject::new("dbo.Target", NodeKind::Table),
            CatalogObject::new("dbo.Load", NodeKind::Procedure)
                .with_body("INSERT INTO dbo.Target VALUES (1)"),
        ];
        let deps = vec![RawDependency::new("dbo.Load", "dbo.Target")];
        let result = build(&objects, &deps);
        assert_eq!(result.edges.len(), 1);
        assert!(result.has_edge("[dbo].[load]", "[dbo].[target]"));
    }

    #[test]
    fn test_read_write_same_table_is_bidirectional() {
        let objects = vec![
            CatalogObject::new("dbo.Queue", NodeKind::Table),
            CatalogObject::new("dbo.Drain", NodeKind::Procedure)
                .with_body("SELECT TOP 1 * FROM dbo.Queue; UPDATE dbo.Queue SET done = 1"),
        ];
        let result = build(&objects, &[]);
        assert!(result.has_edge("[dbo].[queue]", "[dbo].[drain]"));
        assert!(result.has_edge("[dbo].[drain]", "[dbo].[queue]"));
        assert_well_formed(&result);
    }

    #[test]
    fn test_self_reference_in_body_is_dropped() {
        let objects = vec![CatalogObject::new("dbo.Recurse", NodeKind::Procedure)
            .with_body("EXEC dbo.Recurse")];
        let result = build(&objects, &[]);
        assert!(result.edges.is_empty());
        assert_eq!(result.diagnostics.references_found, 1);
        assert_eq!(result.diagnostics.references_resolved, 0);
    }

    #[test]
    fn test_table_columns_synthesize_body() {
        let objects = vec![CatalogObject::new("dbo.Customers", NodeKind::Table).with_columns(
            vec![
                Column {
                    name: "CustomerId".to_string(),
                    data_type: "int".to_string(),
                    nullable: false,
                },
                Column {
                    name: "Name".to_string(),
                    data_type: "nvarchar(100)".to_string(),
                    nullable: true,
                },
            ],
        )];
        let result = build(&objects, &[]);
        let body = result.nodes[0].body.as_deref().unwrap();
        assert!(body.starts_with("TABLE dbo.Customers\n"));
        assert!(body.contains("  CustomerId  int            NOT NULL\n"));
        assert!(body.contains("  Name        nvarchar(100)  NULL\n"));
        assert!(result.edges.is_empty());
    }

    #[test]
    fn test_empty_inputs_warn_without_failing() {
        let result = build(&[], &[]);
        assert!(result.nodes.is_empty());
        assert_eq!(result.warnings, vec!["no catalog objects supplied"]);

        let result = build(&[CatalogObject::new("sys.tables", NodeKind::View)], &[]);
        assert!(result.nodes.is_empty());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_rule_fallback_is_a_warning() {
        let broken = vec![crate::extract::RuleDef::new(
            "broken",
            crate::extract::RuleCategory::Source,
            "(",
            0,
        )];
        let rules = RuleSet::from_defs(&broken);
        let objects = vec![CatalogObject::new("dbo.A", NodeKind::Table)];
        let result = build_graph(&objects, &[], &rules);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("built-in defaults"));
    }
}
