// validate.rs — Post-resolution checks
//
// Walks the resolved program and accumulates typed `LangError`s. Nothing
// here mutates the tree; every check reads the annotations written by the
// earlier passes and falls back to scope lookups where they are missing.
//
// Preconditions: annotation (and usually connector insertion) has run.
// Postconditions: returned errors are ordered by check, then source order.
// Failure modes: none; problems become errors in the returned list.
// Side effects: none.

use std::collections::HashMap;

use tracing::debug;

use crate::ast::{Literal, NodeKind, Tree};
use crate::diag::{ErrorKind, LangError};
use crate::id::NodeId;
use crate::inherit::get_inherited_ports;
use crate::inject::type_of;
use crate::scope::{
    find_declaration_by_name, program_framework, push_frame, resolve_reference, ScopeFrame,
};
use crate::size::{evaluate_bundle_size, get_node_num_inputs, get_node_num_outputs, num_parallel_streams, Size};

/// Call properties accepted on every call site without a matching port.
const RESERVED_CALL_PROPERTIES: [&str; 2] = ["domain", "rate"];

#[tracing::instrument(level = "debug", skip_all)]
pub fn validate(tree: &Tree) -> Vec<LangError> {
    let mut v = Validator {
        tree,
        errors: Vec::new(),
    };
    v.check_duplicates();
    for &statement in tree.statements() {
        let props = tree.props(statement);
        let framework = match props.framework.as_str() {
            "" => program_framework(tree),
            fw => Some(fw),
        };
        v.visit(statement, &[], &props.namespace_tree, framework);
    }
    debug!(errors = v.errors.len(), "validation complete");
    v.errors
}

struct Validator<'a> {
    tree: &'a Tree,
    errors: Vec<LangError>,
}

impl<'a> Validator<'a> {
    fn error(&mut self, kind: ErrorKind, node: NodeId, tokens: Vec<String>) {
        self.errors.push(LangError::at(kind, self.tree, node, tokens));
    }

    // ── Walk ──

    fn visit(&mut self, node: NodeId, scope: &[ScopeFrame], namespace: &[String], framework: Option<&str>) {
        let tree = self.tree;
        let resolved = match tree.kind(node) {
            NodeKind::Block(_) | NodeKind::Bundle { .. } | NodeKind::Function { .. } => {
                self.check_reference(node, scope, namespace, framework)
            }
            _ => None,
        };
        match tree.kind(node) {
            NodeKind::Bundle { .. } => {
                if let Some(decl) = resolved {
                    self.check_bundle_index(node, decl, scope);
                }
            }
            NodeKind::Function { .. } => {
                if let Some(callee) = resolved {
                    self.check_call_ports(node, callee);
                }
            }
            NodeKind::Stream { .. } => self.check_stream_sizes(node, scope),
            NodeKind::Declaration(_) | NodeKind::BundleDeclaration { .. } => {
                self.check_declaration(node, scope);
            }
            _ => {}
        }

        let is_module = tree.object_type(node).is_some_and(|t| t.is_module_like());
        if is_module {
            let inner = push_frame(scope, ScopeFrame::for_module(tree, node, node));
            for child in tree.children(node) {
                self.visit(child, &inner, namespace, framework);
            }
        } else if matches!(tree.kind(node), NodeKind::Stream { .. }) {
            // Nested links are not streams of their own.
            for member in tree.stream_members(node) {
                self.visit(member, scope, namespace, framework);
            }
        } else {
            for child in tree.children(node) {
                self.visit(child, scope, namespace, framework);
            }
        }
    }

    fn check_reference(
        &mut self,
        node: NodeId,
        scope: &[ScopeFrame],
        namespace: &[String],
        framework: Option<&str>,
    ) -> Option<NodeId> {
        let tree = self.tree;
        if let Some(decl) = tree.props(node).declaration {
            return Some(decl);
        }
        let name = tree.name_ref(node)?.to_string();
        let found = find_declaration_by_name(&name, scope, tree, namespace, framework).or_else(|| {
            (!namespace.is_empty())
                .then(|| find_declaration_by_name(&name, scope, tree, &[], framework))
                .flatten()
        });
        if found.is_none() {
            self.error(ErrorKind::UndeclaredSymbol, node, vec![name]);
        }
        found
    }

    // ── Declarations ──

    /// Same name, namespace and framework declared twice at top level or
    /// inside one module.
    fn check_duplicates(&mut self) {
        let tree = self.tree;
        let mut seen: HashMap<(String, Vec<String>, String), NodeId> = HashMap::new();
        for decl in tree.declarations() {
            let Some(name) = tree.decl_name(decl) else {
                continue;
            };
            let props = tree.props(decl);
            let key = (name.to_string(), props.namespace_tree.clone(), props.framework.clone());
            if seen.insert(key, decl).is_some() {
                self.error(ErrorKind::DuplicateSymbol, decl, vec![name.to_string()]);
            }
        }
        let modules: Vec<NodeId> = tree
            .declarations()
            .filter(|&d| tree.object_type(d).is_some_and(|t| t.is_module_like()))
            .collect();
        for module in modules {
            for members in [tree.module_blocks(module), tree.module_ports(module)] {
                let mut names: HashMap<&str, NodeId> = HashMap::new();
                for member in members {
                    let Some(name) = tree.decl_name(member) else {
                        continue;
                    };
                    if names.insert(name, member).is_some() {
                        self.error(ErrorKind::DuplicateSymbol, member, vec![name.to_string()]);
                    }
                }
            }
        }
    }

    fn check_declaration(&mut self, decl: NodeId, scope: &[ScopeFrame]) {
        let tree = self.tree;
        let Some(object_type) = tree.object_type(decl) else {
            return;
        };
        let name = tree.decl_name(decl).unwrap_or_default().to_string();
        if object_type.is_extension() && type_of(tree, decl).is_none() {
            self.error(ErrorKind::UnknownType, decl, vec![name.clone(), object_type.to_string()]);
        }
        if !tree.is_bundle_decl(decl) {
            return;
        }
        let size = evaluate_bundle_size(decl, scope, tree, &mut self.errors);
        let Some(size) = size.known() else {
            return;
        };
        let default_len = tree
            .property(decl, "default")
            .and_then(|d| tree.list_items(d))
            .map(<[NodeId]>::len);
        if let Some(len) = default_len {
            if len != size as usize {
                self.error(
                    ErrorKind::BundleSizeMismatch,
                    decl,
                    vec![name, size.to_string(), len.to_string()],
                );
            }
        }
    }

    // ── Bundles ──

    fn check_bundle_index(&mut self, bundle: NodeId, decl: NodeId, scope: &[ScopeFrame]) {
        let tree = self.tree;
        let NodeKind::Bundle { name, index } = tree.kind(bundle) else {
            return;
        };
        if !tree.is_bundle_decl(decl) {
            return;
        }
        let mut ignored = Vec::new();
        let Some(size) = evaluate_bundle_size(decl, scope, tree, &mut ignored).known() else {
            return;
        };
        let mut literal_indices = Vec::new();
        for &item in index {
            match tree.kind(item) {
                NodeKind::Range { start, end } => literal_indices.extend([*start, *end]),
                _ => literal_indices.push(item),
            }
        }
        for item in literal_indices {
            match tree.literal(item) {
                Some(Literal::Int(i)) if *i < 1 || *i > i64::from(size) => {
                    self.error(
                        ErrorKind::ArrayIndexOutOfRange,
                        bundle,
                        vec![name.to_string(), i.to_string()],
                    );
                }
                Some(Literal::Int(_)) | None => {}
                Some(other) => {
                    self.error(
                        ErrorKind::InvalidIndexType,
                        bundle,
                        vec![name.to_string(), other.kind_name().to_string()],
                    );
                }
            }
        }
    }

    // ── Calls ──

    fn check_call_ports(&mut self, call: NodeId, callee: NodeId) {
        let tree = self.tree;
        let ports = get_inherited_ports(callee, &[], tree);
        let callee_name = tree.name_ref(call).map(|n| n.to_string()).unwrap_or_default();
        for (property, value) in tree.property_pairs(call) {
            if RESERVED_CALL_PROPERTIES.contains(&property) {
                continue;
            }
            let Some(port) = ports.iter().copied().find(|&p| tree.decl_name(p) == Some(property)) else {
                self.error(
                    ErrorKind::InvalidPort,
                    call,
                    vec![callee_name.clone(), property.to_string()],
                );
                continue;
            };
            let Some(literal) = tree.literal(value) else {
                continue;
            };
            let Some(types) = tree.property(port, "types").and_then(|t| tree.list_items(t)) else {
                continue;
            };
            let kind = literal.kind_name();
            let accepted = types
                .iter()
                .filter_map(|&t| tree.string_value(t))
                .any(|t| t == kind);
            if !accepted {
                self.error(
                    ErrorKind::InvalidPortType,
                    call,
                    vec![callee_name.clone(), property.to_string(), kind.to_string()],
                );
            }
        }
    }

    // ── Streams ──

    fn check_stream_sizes(&mut self, stream: NodeId, scope: &[ScopeFrame]) {
        let tree = self.tree;
        let members = tree.stream_members(stream);
        for pair in members.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            let outputs = get_node_num_outputs(left, scope, tree);
            let inputs = get_node_num_inputs(right, scope, tree);
            let (Some(l), Some(r)) = (outputs.known(), inputs.known()) else {
                continue;
            };
            if l == 0 || r == 0 {
                continue;
            }
            if num_parallel_streams(outputs, inputs) == Size::Unresolved {
                self.error(
                    ErrorKind::StreamMemberSizeMismatch,
                    left,
                    vec![tree.render(left), l.to_string(), tree.render(right), r.to_string()],
                );
            }
        }
    }
}

/// Errors for a single reference, used by callers that check one node.
pub fn check_reference(tree: &Tree, scope: &[ScopeFrame], node: NodeId) -> Option<LangError> {
    match resolve_reference(tree, scope, node) {
        Some(_) => None,
        None => tree
            .name_ref(node)
            .map(|name| LangError::at(ErrorKind::UndeclaredSymbol, tree, node, vec![name.to_string()])),
    }
}
