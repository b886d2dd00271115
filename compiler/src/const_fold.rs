// const_fold.rs — Constant folding
//
// Reduces value expressions (literals, named constants, constant-list
// indexing, port properties, unary/binary operators) to literals.
//
// Preconditions: references resolve through `scope`; inheritance and default
//   properties have been applied before `fold_constants` runs.
// Postconditions: `resolve_constant` is pure; `fold_constants` replaces
//   every foldable expression node with its literal in place.
// Failure modes: best-effort entry points return `None` for anything that
//   does not reduce (no error); the strict `evaluate_const_*` variants return
//   a typed `LangError` for the caller to accumulate.
// Side effects: `fold_constants` mutates the tree.

use tracing::debug;

use crate::ast::{Literal, NameRef, NodeKind, Operator, Tree};
use crate::diag::{ErrorKind, LangError};
use crate::id::NodeId;
use crate::object_type::ObjectType;
use crate::scope::{
    find_declaration_by_name, program_framework, push_frame, ScopeFrame, MAX_RESOLVE_DEPTH,
};

// ── Folding context ──────────────────────────────────────────────────────

struct Folder<'a> {
    tree: &'a Tree,
    framework: Option<&'a str>,
}

impl<'a> Folder<'a> {
    fn lookup(&self, node: NodeId, name: &NameRef, scope: &[ScopeFrame]) -> Option<NodeId> {
        if let Some(decl) = self.tree.props(node).declaration {
            return Some(decl);
        }
        find_declaration_by_name(&name.to_string(), scope, self.tree, &[], self.framework)
    }

    /// `value` property of a `constant` declaration.
    fn constant_value(&self, decl: NodeId) -> Option<NodeId> {
        if self.tree.object_type(decl) != Some(&ObjectType::Constant) {
            return None;
        }
        self.tree.property(decl, "value")
    }

    fn fold(&self, node: NodeId, scope: &[ScopeFrame], depth: usize) -> Option<Literal> {
        if depth > MAX_RESOLVE_DEPTH {
            debug!(node = %node, "constant resolution depth exceeded");
            return None;
        }
        let tree = self.tree;
        match tree.kind(node) {
            NodeKind::Value(lit) => Some(lit.clone()),
            NodeKind::Block(name) => {
                let decl = self.lookup(node, name, scope)?;
                let value = self.constant_value(decl)?;
                self.fold(value, scope, depth + 1)
            }
            NodeKind::Bundle { name, index } => {
                let decl = self.lookup(node, name, scope)?;
                let items = self.constant_value(decl).and_then(|v| tree.list_items(v))?;
                let [index] = index.as_slice() else {
                    return None;
                };
                let Literal::Int(k) = self.fold(*index, scope, depth + 1)? else {
                    return None;
                };
                let item = usize::try_from(k).ok()?.checked_sub(1)?;
                self.fold(*items.get(item)?, scope, depth + 1)
            }
            NodeKind::PortProperty { block, port } => {
                let decl =
                    find_declaration_by_name(block, scope, tree, &[], self.framework)?;
                let value = tree.property(decl, port)?;
                tree.literal(value).cloned()
            }
            NodeKind::Expression { op, lhs, rhs } => {
                let lhs = self.fold(*lhs, scope, depth + 1)?;
                let rhs = match rhs {
                    Some(rhs) => Some(self.fold(*rhs, scope, depth + 1)?),
                    None => None,
                };
                reduce_const_expression(*op, &lhs, rhs.as_ref())
            }
            _ => None,
        }
    }

    /// Typed reason why `node` does not fold.
    fn classify_failure(&self, node: NodeId, scope: &[ScopeFrame]) -> LangError {
        let tree = self.tree;
        let error = |kind: ErrorKind| LangError::at(kind, tree, node, vec![tree.render(node)]);
        match tree.kind(node) {
            NodeKind::Block(name) => match self.lookup(node, name, scope) {
                None => error(ErrorKind::UndeclaredSymbol),
                Some(_) => error(ErrorKind::InvalidType),
            },
            NodeKind::Bundle { name, index } => {
                let Some(decl) = self.lookup(node, name, scope) else {
                    return error(ErrorKind::UndeclaredSymbol);
                };
                let len = self
                    .constant_value(decl)
                    .and_then(|v| tree.list_items(v))
                    .map(|items| items.len());
                match (index.as_slice(), len) {
                    ([index], Some(len)) => match self.fold(*index, scope, 0) {
                        Some(Literal::Int(k)) if k < 1 || k as usize > len => {
                            error(ErrorKind::ArrayIndexOutOfRange)
                        }
                        Some(Literal::Int(_)) => error(ErrorKind::InvalidType),
                        Some(_) => error(ErrorKind::InvalidIndexType),
                        None => self.classify_failure(*index, scope),
                    },
                    _ => error(ErrorKind::InvalidType),
                }
            }
            NodeKind::PortProperty { block, .. } => {
                match find_declaration_by_name(block, scope, tree, &[], self.framework) {
                    None => error(ErrorKind::UndeclaredSymbol),
                    Some(_) => error(ErrorKind::InvalidType),
                }
            }
            NodeKind::Expression { lhs, rhs, .. } => {
                for &operand in std::iter::once(lhs).chain(rhs.iter()) {
                    if self.fold(operand, scope, 0).is_none() {
                        return self.classify_failure(operand, scope);
                    }
                }
                error(ErrorKind::InvalidType)
            }
            _ => error(ErrorKind::InvalidType),
        }
    }
}

// ── Public API ───────────────────────────────────────────────────────────

/// Fold `node` to a literal, if every operand reduces.
pub fn resolve_constant(
    node: NodeId,
    scope: &[ScopeFrame],
    tree: &Tree,
    framework: Option<&str>,
) -> Option<Literal> {
    Folder { tree, framework }.fold(node, scope, 0)
}

/// Apply `op` to folded operands. `rhs` is `None` for unary operators.
///
/// Int/Int arithmetic stays integral (division truncates); any real operand
/// promotes the result to real. `&`, `|` and `~` are integer-only. Division
/// by zero and integer overflow do not fold.
pub fn reduce_const_expression(op: Operator, lhs: &Literal, rhs: Option<&Literal>) -> Option<Literal> {
    let Some(rhs) = rhs else {
        return match (op, lhs) {
            (Operator::Neg, Literal::Int(v)) => v.checked_neg().map(Literal::Int),
            (Operator::Neg, Literal::Real(v)) => Some(Literal::Real(-v)),
            (Operator::Not, Literal::Int(v)) => Some(Literal::Int(!v)),
            _ => None,
        };
    };
    if op.is_unary() {
        return None;
    }
    match (lhs, rhs) {
        (Literal::Int(a), Literal::Int(b)) => {
            let (a, b) = (*a, *b);
            let value = match op {
                Operator::Add => a.checked_add(b),
                Operator::Sub => a.checked_sub(b),
                Operator::Mul => a.checked_mul(b),
                Operator::Div => a.checked_div(b),
                Operator::And => Some(a & b),
                Operator::Or => Some(a | b),
                Operator::Neg | Operator::Not => None,
            };
            value.map(Literal::Int)
        }
        _ => {
            let (a, b) = (lhs.as_f64()?, rhs.as_f64()?);
            let value = match op {
                Operator::Add => a + b,
                Operator::Sub => a - b,
                Operator::Mul => a * b,
                Operator::Div if b != 0.0 => a / b,
                _ => return None,
            };
            Some(Literal::Real(value))
        }
    }
}

fn evaluate_with<T>(
    node: NodeId,
    scope: &[ScopeFrame],
    tree: &Tree,
    framework: Option<&str>,
    accept: impl FnOnce(Literal) -> Option<T>,
) -> Result<T, LangError> {
    let folder = Folder { tree, framework };
    match folder.fold(node, scope, 0) {
        Some(lit) => accept(lit).ok_or_else(|| {
            LangError::at(ErrorKind::InvalidType, tree, node, vec![tree.render(node)])
        }),
        None => Err(folder.classify_failure(node, scope)),
    }
}

/// Strict integer evaluation.
pub fn evaluate_const_integer(
    node: NodeId,
    scope: &[ScopeFrame],
    tree: &Tree,
    framework: Option<&str>,
) -> Result<i64, LangError> {
    evaluate_with(node, scope, tree, framework, |lit| match lit {
        Literal::Int(v) => Some(v),
        _ => None,
    })
}

/// Strict real evaluation; integers are promoted.
pub fn evaluate_const_real(
    node: NodeId,
    scope: &[ScopeFrame],
    tree: &Tree,
    framework: Option<&str>,
) -> Result<f64, LangError> {
    evaluate_with(node, scope, tree, framework, |lit| lit.as_f64())
}

/// Strict string evaluation.
pub fn evaluate_const_string(
    node: NodeId,
    scope: &[ScopeFrame],
    tree: &Tree,
    framework: Option<&str>,
) -> Result<String, LangError> {
    evaluate_with(node, scope, tree, framework, |lit| match lit {
        Literal::String(s) => Some(s),
        _ => None,
    })
}

// ── Folding pass ─────────────────────────────────────────────────────────

struct FoldCollector<'a> {
    tree: &'a Tree,
    replacements: Vec<(NodeId, Literal)>,
}

impl<'a> FoldCollector<'a> {
    fn try_fold(&mut self, node: NodeId, scope: &[ScopeFrame], framework: Option<&str>) -> bool {
        if matches!(self.tree.kind(node), NodeKind::Value(_)) {
            return false;
        }
        match resolve_constant(node, scope, self.tree, framework) {
            Some(lit) => {
                self.replacements.push((node, lit));
                true
            }
            None => false,
        }
    }

    fn visit_decl(&mut self, decl: NodeId, scope: &[ScopeFrame], framework: Option<&str>) {
        let tree = self.tree;
        let own_framework = tree.props(decl).framework.as_str();
        let framework = if own_framework.is_empty() {
            framework
        } else {
            Some(own_framework)
        };
        let inner;
        let scope = if tree.object_type(decl).is_some_and(|t| t.is_module_like()) {
            inner = push_frame(scope, ScopeFrame::for_module(tree, decl, decl));
            inner.as_slice()
        } else {
            scope
        };
        if let Some(size) = tree.bundle_size_expr(decl) {
            if !self.try_fold(size, scope, framework) {
                self.visit_value(size, scope, framework);
            }
        }
        let is_constant = tree.object_type(decl) == Some(&ObjectType::Constant);
        for (name, value) in tree.property_pairs(decl) {
            let folds_whole = matches!(
                tree.kind(value),
                NodeKind::Expression { .. } | NodeKind::Block(_)
            );
            if is_constant && name == "value" && folds_whole && self.try_fold(value, scope, framework) {
                continue;
            }
            self.visit_value(value, scope, framework);
        }
    }

    fn visit_value(&mut self, node: NodeId, scope: &[ScopeFrame], framework: Option<&str>) {
        let tree = self.tree;
        match tree.kind(node) {
            NodeKind::Declaration(_) | NodeKind::BundleDeclaration { .. } => {
                self.visit_decl(node, scope, framework)
            }
            NodeKind::Expression { .. } => {
                if !self.try_fold(node, scope, framework) {
                    for child in tree.children(node) {
                        self.visit_value(child, scope, framework);
                    }
                }
            }
            NodeKind::Range { .. } | NodeKind::Bundle { .. } => {
                for child in tree.children(node) {
                    if !self.try_fold(child, scope, framework) {
                        self.visit_value(child, scope, framework);
                    }
                }
            }
            NodeKind::Function { .. }
            | NodeKind::Property { .. }
            | NodeKind::Stream { .. }
            | NodeKind::List(_) => {
                for child in tree.children(node) {
                    self.visit_value(child, scope, framework);
                }
            }
            _ => {}
        }
    }
}

/// Replace every foldable expression (and `constant` value references and
/// bundle sizes) with its literal. Returns the number of replaced nodes.
#[tracing::instrument(level = "debug", skip_all)]
pub fn fold_constants(tree: &mut Tree) -> usize {
    let replacements = {
        let mut collector = FoldCollector {
            tree,
            replacements: Vec::new(),
        };
        let framework = program_framework(tree);
        for &stmt in tree.statements() {
            collector.visit_value(stmt, &[], framework);
        }
        collector.replacements
    };
    let count = replacements.len();
    for (node, lit) in replacements {
        tree.replace_kind(node, NodeKind::Value(lit));
    }
    debug!(folded = count, "constant folding complete");
    count
}
