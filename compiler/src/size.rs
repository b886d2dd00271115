// size.rs — Bundle cardinality inference
//
// Computes how many parallel channels a node produces (outputs) or accepts
// (inputs): literal and list sizes, declared bundle sizes, module port sizes
// across call boundaries, and per-call data-size factors. Sizes that depend
// on what is connected to a module port ("port-property" sizes) resolve by
// walking one scope level outward to the call site.
//
// Preconditions: stream connections are annotated (`input_block` /
//   `output_block`) for port-property sizes to resolve through calls.
// Postconditions: queries are pure.
// Failure modes: best-effort queries return `Size::Unresolved` or
//   `Size::Deferred` (traced at debug level); `evaluate_bundle_size` also
//   pushes typed errors into the caller's accumulator.
// Side effects: none.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::ast::{Literal, NodeKind, Tree};
use crate::const_fold::{evaluate_const_integer, resolve_constant};
use crate::diag::{ErrorKind, LangError};
use crate::id::NodeId;
use crate::object_type::ObjectType;
use crate::scope::{
    find_declaration_by_name, find_module_port, program_framework, push_frame,
    resolve_port_binding, resolve_reference, PortBinding, ScopeFrame, MAX_RESOLVE_DEPTH,
};

// ── Size ─────────────────────────────────────────────────────────────────

/// Bundle cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Size {
    Known(u32),
    /// Unknown or unresolvable (raw `-1`).
    Unresolved,
    /// Determined by whatever connects to a module port (raw `-2`).
    Deferred,
}

impl Size {
    pub fn raw(self) -> i64 {
        match self {
            Size::Known(n) => n as i64,
            Size::Unresolved => -1,
            Size::Deferred => -2,
        }
    }

    pub fn from_raw(raw: i64) -> Size {
        match raw {
            -2 => Size::Deferred,
            n => u32::try_from(n).map(Size::Known).unwrap_or(Size::Unresolved),
        }
    }

    pub fn known(self) -> Option<u32> {
        match self {
            Size::Known(n) => Some(n),
            _ => None,
        }
    }

    /// Broadcasting: 1 unifies with N to N; equal sizes unify; anything else
    /// is unresolved. Deferred is contagious.
    pub fn unify(self, other: Size) -> Size {
        match (self, other) {
            (Size::Deferred, _) | (_, Size::Deferred) => Size::Deferred,
            (Size::Known(1), s) | (s, Size::Known(1)) => s,
            (Size::Known(a), Size::Known(b)) if a == b => self,
            _ => Size::Unresolved,
        }
    }

    pub fn sum(self, other: Size) -> Size {
        match (self, other) {
            (Size::Known(a), Size::Known(b)) => Size::Known(a.saturating_add(b)),
            (Size::Deferred, _) | (_, Size::Deferred) => Size::Deferred,
            _ => Size::Unresolved,
        }
    }

    pub fn product(self, other: Size) -> Size {
        match (self, other) {
            (Size::Known(a), Size::Known(b)) => Size::Known(a.saturating_mul(b)),
            (Size::Unresolved, _) | (_, Size::Unresolved) => Size::Unresolved,
            _ => Size::Deferred,
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Size::Known(n) => write!(f, "{}", n),
            Size::Unresolved => f.write_str("unresolved"),
            Size::Deferred => f.write_str("deferred"),
        }
    }
}

/// Parallel copies implied by a stream step from `left` to `right`.
///
/// Rules apply in a fixed order and later rules override earlier ones:
/// equal sizes give that size; otherwise exact divisibility gives the
/// quotient; then `left == 1` gives `right`; then `right == 1` gives `left`.
pub fn num_parallel_streams(left: Size, right: Size) -> Size {
    let (Some(l), Some(r)) = (left.known(), right.known()) else {
        return Size::Unresolved;
    };
    let mut result = Size::Unresolved;
    if l == r {
        result = Size::Known(l);
    } else if l > 0 && r > 0 && (l % r == 0 || r % l == 0) {
        result = Size::Known(l.max(r) / l.min(r));
    }
    if l == 1 {
        result = Size::Known(r);
    }
    if r == 1 {
        result = Size::Known(l);
    }
    result
}

/// Fold a per-call data-size observation into the running factor.
///
/// The factor starts at 1. An observed 1 is ignored; an observed N replaces
/// a current 1; equal sizes agree; any other mismatch leaves the factor
/// unresolved for the rest of the call. Non-known observations are ignored.
pub fn reconcile_data_size(current: Size, observed: Size) -> Size {
    match (current, observed) {
        (Size::Unresolved, _) => Size::Unresolved,
        (_, Size::Known(1)) | (_, Size::Unresolved) | (_, Size::Deferred) => current,
        (Size::Known(1), observed) => observed,
        (Size::Known(a), Size::Known(b)) if a == b => current,
        _ => {
            debug!(%current, %observed, "conflicting data sizes");
            Size::Unresolved
        }
    }
}

// ── Inference ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Inputs,
    Outputs,
}

struct SizeCtx<'a> {
    tree: &'a Tree,
}

impl<'a> SizeCtx<'a> {
    fn fold_int(&self, node: NodeId, scope: &[ScopeFrame]) -> Option<i64> {
        match resolve_constant(node, scope, self.tree, program_framework(self.tree))? {
            Literal::Int(v) => Some(v),
            _ => None,
        }
    }

    fn int_to_size(value: Option<i64>) -> Size {
        value
            .and_then(|v| u32::try_from(v).ok())
            .map(Size::Known)
            .unwrap_or(Size::Unresolved)
    }

    fn node_size(&self, node: NodeId, scope: &[ScopeFrame], dir: Direction, depth: usize) -> Size {
        if depth > MAX_RESOLVE_DEPTH {
            debug!(node = %node, "size resolution depth exceeded");
            return Size::Unresolved;
        }
        let tree = self.tree;
        match tree.kind(node) {
            // A literal is a single value on both sides.
            NodeKind::Value(_) => Size::Known(1),
            NodeKind::List(items) => items
                .iter()
                .map(|&item| self.node_size(item, scope, dir, depth + 1))
                .fold(Size::Known(0), Size::sum),
            NodeKind::Bundle { .. } => self.bundle_index_size(node, scope, depth),
            NodeKind::Block(_) => match resolve_reference(tree, scope, node) {
                Some(decl) => self.declaration_size(decl, scope, dir, depth + 1),
                None => {
                    debug!(node = %tree.render(node), "size of undeclared block");
                    Size::Unresolved
                }
            },
            NodeKind::Declaration(_) | NodeKind::BundleDeclaration { .. } => {
                self.declaration_size(node, scope, dir, depth + 1)
            }
            NodeKind::Function { .. } => self.function_size(node, scope, dir, depth + 1),
            NodeKind::Stream { left, right } => match dir {
                Direction::Outputs => self.node_size(*right, scope, dir, depth + 1),
                Direction::Inputs => self.node_size(*left, scope, dir, depth + 1),
            },
            NodeKind::Expression { lhs, rhs, .. } => match dir {
                Direction::Inputs => Size::Known(0),
                Direction::Outputs => {
                    let lhs = self.node_size(*lhs, scope, dir, depth + 1);
                    match rhs {
                        Some(rhs) => lhs.unify(self.node_size(*rhs, scope, dir, depth + 1)),
                        None => lhs,
                    }
                }
            },
            NodeKind::PortProperty { .. } => match dir {
                Direction::Outputs => Size::Known(1),
                Direction::Inputs => Size::Unresolved,
            },
            NodeKind::Range { .. } => self.range_size(node, scope),
            _ => Size::Unresolved,
        }
    }

    fn range_size(&self, range: NodeId, scope: &[ScopeFrame]) -> Size {
        let NodeKind::Range { start, end } = self.tree.kind(range) else {
            return Size::Unresolved;
        };
        let contains_port_property = [*start, *end].iter().any(|&n| self.has_port_property(n));
        if contains_port_property {
            return Size::Deferred;
        }
        match (self.fold_int(*start, scope), self.fold_int(*end, scope)) {
            (Some(s), Some(e)) if e >= s => Self::int_to_size(Some(e - s + 1)),
            _ => Size::Unresolved,
        }
    }

    fn has_port_property(&self, node: NodeId) -> bool {
        matches!(self.tree.kind(node), NodeKind::PortProperty { .. })
            || self
                .tree
                .children(node)
                .into_iter()
                .any(|c| self.has_port_property(c))
    }

    fn bundle_index_size(&self, bundle: NodeId, scope: &[ScopeFrame], _depth: usize) -> Size {
        let NodeKind::Bundle { index, .. } = self.tree.kind(bundle) else {
            return Size::Unresolved;
        };
        let mut total = Size::Known(0);
        for &entry in index {
            let entry_size = match self.tree.kind(entry) {
                NodeKind::Range { .. } => self.range_size(entry, scope),
                _ if self.has_port_property(entry) => Size::Deferred,
                _ => Size::Known(1),
            };
            if entry_size == Size::Deferred {
                return Size::Deferred;
            }
            total = total.sum(entry_size);
        }
        total
    }

    fn declaration_size(&self, decl: NodeId, scope: &[ScopeFrame], dir: Direction, depth: usize) -> Size {
        let tree = self.tree;
        match tree.object_type(decl) {
            Some(ObjectType::Buffer) => {
                let size = tree.property(decl, "size").and_then(|s| self.fold_int(s, scope));
                return Self::int_to_size(size);
            }
            Some(t) if t.is_module_like() => {
                return self.type_port_size(decl, decl, dir, scope, depth + 1);
            }
            _ => {}
        }
        let Some(size_expr) = tree.bundle_size_expr(decl) else {
            return Size::Known(1);
        };
        if matches!(tree.kind(size_expr), NodeKind::PortProperty { .. }) {
            return self.size_port_property(size_expr, scope, depth + 1);
        }
        match self.fold_int(size_expr, scope) {
            Some(v) => Self::int_to_size(Some(v)),
            None if self.has_port_property(size_expr) => Size::Deferred,
            None => {
                debug!(decl = ?tree.decl_name(decl), "bundle size does not fold");
                Size::Unresolved
            }
        }
    }

    /// Size of the block behind `module`'s main input/output port, evaluated
    /// inside the module body with a frame owned by `owner`.
    fn type_port_size(
        &self,
        module: NodeId,
        owner: NodeId,
        dir: Direction,
        scope: &[ScopeFrame],
        depth: usize,
    ) -> Size {
        let tree = self.tree;
        let wanted = match dir {
            Direction::Inputs => ObjectType::MainInputPort,
            Direction::Outputs => ObjectType::MainOutputPort,
        };
        let Some(port) = tree
            .module_ports(module)
            .into_iter()
            .find(|&p| tree.object_type(p) == Some(&wanted))
        else {
            return Size::Known(0);
        };
        let inner = push_frame(scope, ScopeFrame::for_module(tree, owner, module));
        let block = tree
            .property(port, "block")
            .and_then(|b| tree.reference_name(b))
            .and_then(|name| {
                tree.module_blocks(module)
                    .into_iter()
                    .find(|&b| tree.decl_name(b) == Some(name))
            });
        if let Some(block) = block {
            return self.declaration_size(block, &inner, Direction::Outputs, depth + 1);
        }
        match tree.property(port, "size") {
            Some(size) => Self::int_to_size(self.fold_int(size, &inner)),
            None => Size::Known(1),
        }
    }

    fn function_size(&self, call: NodeId, scope: &[ScopeFrame], dir: Direction, depth: usize) -> Size {
        let Some(module) = resolve_reference(self.tree, scope, call) else {
            debug!(call = %self.tree.render(call), "size of unresolved call");
            return Size::Unresolved;
        };
        let port_size = self.type_port_size(module, call, dir, scope, depth + 1);
        let data_size = self.function_data_size(call, scope, depth + 1);
        port_size.product(data_size)
    }

    fn function_data_size(&self, call: NodeId, scope: &[ScopeFrame], depth: usize) -> Size {
        let tree = self.tree;
        let Some(module) = resolve_reference(tree, scope, call) else {
            return Size::Unresolved;
        };
        let mut data = Size::Known(1);
        for (name, value) in tree.property_pairs(call) {
            let Some(port) = find_module_port(tree, module, name) else {
                continue;
            };
            if !matches!(
                tree.object_type(port),
                Some(ObjectType::PropertyInputPort | ObjectType::PropertyOutputPort)
            ) {
                continue;
            }
            let mut observed = self.node_size(value, scope, Direction::Outputs, depth + 1);
            let port_width = tree
                .property(port, "size")
                .and_then(|s| self.fold_int(s, scope))
                .and_then(|w| u32::try_from(w).ok())
                .filter(|&w| w > 1);
            if let (Some(width), Size::Known(n)) = (port_width, observed) {
                if n % width == 0 {
                    observed = Size::Known(n / width);
                }
            }
            data = reconcile_data_size(data, observed);
        }
        data
    }

    fn size_port_property(&self, pp: NodeId, scope: &[ScopeFrame], depth: usize) -> Size {
        let tree = self.tree;
        let NodeKind::PortProperty { block, port } = tree.kind(pp) else {
            return Size::Unresolved;
        };
        match resolve_port_binding(tree, scope, block) {
            PortBinding::Connected { node, outer } => {
                if port == "size" {
                    return self.node_size(node, outer, Direction::Outputs, depth + 1);
                }
                let value = resolve_reference(tree, outer, node)
                    .and_then(|decl| tree.property(decl, port))
                    .and_then(|v| self.fold_int(v, outer));
                Self::int_to_size(value)
            }
            PortBinding::Unconnected { .. } => Size::Deferred,
            PortBinding::NotAPort => {
                let framework = program_framework(tree);
                let Some(decl) = find_declaration_by_name(block, scope, tree, &[], framework)
                else {
                    debug!(block = %block, "port property on undeclared block");
                    return Size::Unresolved;
                };
                if port == "size" {
                    return self.declaration_size(decl, scope, Direction::Outputs, depth + 1);
                }
                let value = tree.property(decl, port).and_then(|v| self.fold_int(v, scope));
                Self::int_to_size(value)
            }
        }
    }
}

// ── Public API ───────────────────────────────────────────────────────────

pub fn get_node_num_outputs(node: NodeId, scope: &[ScopeFrame], tree: &Tree) -> Size {
    SizeCtx { tree }.node_size(node, scope, Direction::Outputs, 0)
}

pub fn get_node_num_inputs(node: NodeId, scope: &[ScopeFrame], tree: &Tree) -> Size {
    SizeCtx { tree }.node_size(node, scope, Direction::Inputs, 0)
}

/// Size of `module`'s main output port, with the module body analysed as a
/// definition (its ports are unconnected).
pub fn get_type_num_outputs(module: NodeId, scope: &[ScopeFrame], tree: &Tree) -> Size {
    SizeCtx { tree }.type_port_size(module, module, Direction::Outputs, scope, 0)
}

pub fn get_type_num_inputs(module: NodeId, scope: &[ScopeFrame], tree: &Tree) -> Size {
    SizeCtx { tree }.type_port_size(module, module, Direction::Inputs, scope, 0)
}

/// Per-call data-size factor from the values bound to property ports.
pub fn get_function_data_size(call: NodeId, scope: &[ScopeFrame], tree: &Tree) -> Size {
    SizeCtx { tree }.function_data_size(call, scope, 0)
}

/// Number of channels selected by a `Bundle` node's index list.
pub fn evaluate_bundle_index_size(bundle: NodeId, scope: &[ScopeFrame], tree: &Tree) -> Size {
    SizeCtx { tree }.bundle_index_size(bundle, scope, 0)
}

/// Resolve a size written as `block.port` by walking to the call site.
pub fn evaluate_size_port_property(pp: NodeId, scope: &[ScopeFrame], tree: &Tree) -> Size {
    SizeCtx { tree }.size_port_property(pp, scope, 0)
}

/// Strict declared size of `decl`. Errors are pushed into `errors`.
pub fn evaluate_bundle_size(
    decl: NodeId,
    scope: &[ScopeFrame],
    tree: &Tree,
    errors: &mut Vec<LangError>,
) -> Size {
    let ctx = SizeCtx { tree };
    let Some(size_expr) = tree.bundle_size_expr(decl) else {
        return ctx.declaration_size(decl, scope, Direction::Outputs, 0);
    };
    if ctx.has_port_property(size_expr) {
        return ctx.declaration_size(decl, scope, Direction::Outputs, 0);
    }
    match evaluate_const_integer(size_expr, scope, tree, program_framework(tree)) {
        Ok(n) if n > 0 => Size::from_raw(n),
        Ok(n) => {
            errors.push(LangError::at(
                ErrorKind::ConstraintFail,
                tree,
                decl,
                vec![
                    tree.decl_name(decl).unwrap_or_default().to_string(),
                    n.to_string(),
                ],
            ));
            Size::Unresolved
        }
        Err(err) => {
            errors.push(err);
            Size::Unresolved
        }
    }
}
