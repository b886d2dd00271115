// inherit.rs — Property inheritance between declarations
//
// Instance inheritance: a declaration with `inherits: Parent` receives every
// property of the same-typed `Parent` that it does not define itself.
// Type inheritance: type declarations may inherit from a list of parents;
// `get_inherited_types` flattens the chain (diamond-safe) and
// `get_inherited_ports` merges the port/property lists along it.
//
// Preconditions: library and framework declarations have been injected.
// Postconditions: after `resolve_inheritance`, every declaration whose
//   parent resolves carries the merged property set.
// Failure modes: unresolved or mistyped parents are skipped (traced).
// Side effects: `resolve_declaration_inheritance` and `resolve_inheritance`
//   mutate the tree.

use std::collections::HashSet;

use tracing::debug;

use crate::ast::{NodeKind, Tree};
use crate::id::NodeId;
use crate::scope::{
    find_all_declarations, find_declaration_by_name, find_type_declaration_by_name,
    program_framework, ScopeFrame,
};

/// Framework a declaration's own references resolve against.
fn decl_framework(tree: &Tree, decl: NodeId) -> Option<&str> {
    match tree.props(decl).framework.as_str() {
        "" => program_framework(tree),
        fw => Some(fw),
    }
}

/// Same-typed declaration named by `decl`'s single `inherits` value.
fn instance_parent(tree: &Tree, decl: NodeId) -> Option<NodeId> {
    let inherits = tree.property(decl, "inherits")?;
    let parent_name = tree.reference_name(inherits)?;
    let object_type = tree.object_type(decl)?;
    let namespace = tree.props(decl).namespace_tree.clone();
    find_all_declarations(parent_name, &[], tree, &namespace, decl_framework(tree, decl))
        .into_iter()
        .find(|&p| p != decl && tree.object_type(p) == Some(object_type))
}

/// Merge the parent named by `decl.inherits` into `decl`. Child properties
/// win; `inherits` itself is not copied. Returns true iff a same-typed
/// parent was found and merged.
pub fn resolve_declaration_inheritance(decl: NodeId, tree: &mut Tree) -> bool {
    let Some(parent) = instance_parent(tree, decl) else {
        if tree.has_property(decl, "inherits") {
            debug!(decl = ?tree.decl_name(decl), "inherited declaration not found");
        }
        return false;
    };
    let inherited: Vec<(String, NodeId)> = tree
        .property_pairs(parent)
        .into_iter()
        .filter(|(name, _)| *name != "inherits" && !tree.has_property(decl, name))
        .map(|(name, value)| (name.to_string(), value))
        .collect();
    for (name, value) in inherited {
        let copy = tree.clone_subtree(value);
        tree.set_property(decl, &name, copy);
    }
    true
}

/// Resolve instance inheritance for every top-level declaration, parents
/// before children. Returns the number of merged declarations.
#[tracing::instrument(level = "debug", skip_all)]
pub fn resolve_inheritance(tree: &mut Tree) -> usize {
    fn visit(
        tree: &mut Tree,
        decl: NodeId,
        done: &mut HashSet<NodeId>,
        visiting: &mut HashSet<NodeId>,
    ) -> usize {
        if done.contains(&decl) {
            return 0;
        }
        if !visiting.insert(decl) {
            debug!(decl = ?tree.decl_name(decl), "inheritance cycle");
            return 0;
        }
        let mut merged = 0;
        if let Some(parent) = instance_parent(tree, decl) {
            merged += visit(tree, parent, done, visiting);
        }
        if resolve_declaration_inheritance(decl, tree) {
            merged += 1;
        }
        visiting.remove(&decl);
        done.insert(decl);
        merged
    }

    let decls: Vec<NodeId> = tree.declarations().collect();
    let mut done = HashSet::new();
    let mut visiting = HashSet::new();
    let merged: usize = decls
        .into_iter()
        .map(|d| visit(tree, d, &mut done, &mut visiting))
        .sum();
    debug!(merged, "inheritance resolved");
    merged
}

// ── Type inheritance ─────────────────────────────────────────────────────

/// Parent names listed in `inherits` (a single reference or a list).
fn parent_names(tree: &Tree, decl: NodeId) -> Vec<String> {
    let Some(inherits) = tree.property(decl, "inherits") else {
        return Vec::new();
    };
    match tree.kind(inherits) {
        NodeKind::List(items) => items
            .iter()
            .filter_map(|&item| tree.reference_name(item).map(String::from))
            .collect(),
        _ => tree
            .reference_name(inherits)
            .map(|name| vec![name.to_string()])
            .unwrap_or_default(),
    }
}

fn find_type(tree: &Tree, scope: &[ScopeFrame], decl: NodeId, name: &str) -> Option<NodeId> {
    let namespace = tree.props(decl).namespace_tree.clone();
    let framework = decl_framework(tree, decl);
    find_declaration_by_name(name, scope, tree, &namespace, framework)
        .filter(|&p| p != decl)
        .or_else(|| find_type_declaration_by_name(name, scope, tree, &namespace, framework))
}

/// Every type `type_decl` inherits from, directly or transitively, ancestors
/// first. Each type appears once even when reached along several paths.
pub fn get_inherited_types(type_decl: NodeId, scope: &[ScopeFrame], tree: &Tree) -> Vec<NodeId> {
    fn collect(
        tree: &Tree,
        scope: &[ScopeFrame],
        decl: NodeId,
        seen: &mut HashSet<NodeId>,
        out: &mut Vec<NodeId>,
    ) {
        for name in parent_names(tree, decl) {
            let Some(parent) = find_type(tree, scope, decl, &name) else {
                debug!(parent = %name, "inherited type not found");
                continue;
            };
            if seen.insert(parent) {
                collect(tree, scope, parent, seen, out);
                out.push(parent);
            }
        }
    }

    let mut seen = HashSet::from([type_decl]);
    let mut out = Vec::new();
    collect(tree, scope, type_decl, &mut seen, &mut out);
    out
}

/// Port and property declarations of `type_decl` merged along its
/// inheritance chain. A descendant's port replaces a same-named ancestor
/// port in place.
pub fn get_inherited_ports(type_decl: NodeId, scope: &[ScopeFrame], tree: &Tree) -> Vec<NodeId> {
    let mut chain = get_inherited_types(type_decl, scope, tree);
    chain.push(type_decl);

    let mut ports: Vec<NodeId> = Vec::new();
    for ty in chain {
        let own = ["ports", "properties"]
            .into_iter()
            .filter_map(|list| tree.property(ty, list))
            .filter_map(|list| tree.list_items(list))
            .flat_map(|items| items.iter().copied())
            .filter(|&p| tree.decl(p).is_some());
        for port in own {
            let name = tree.decl_name(port);
            match ports.iter().position(|&p| tree.decl_name(p) == name) {
                Some(i) => ports[i] = port,
                None => ports.push(port),
            }
        }
    }
    ports
}
