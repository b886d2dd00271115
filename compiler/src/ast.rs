// Tree model for stream dataflow programs.
//
// Nodes live in a single arena (`Tree`) and refer to each other through
// `NodeId` handles. Ownership is single-parent: a node's children are the
// handles listed in its `NodeKind`. Declaration aliasing (a reference site
// pointing at the declaration it resolved to) is a non-owning handle stored
// in the node's `CompilerProps`.
//
// Preconditions: nodes are created through `Tree::add` (or the parser).
// Postconditions: handles returned by `add` stay valid for the tree's lifetime.
// Failure modes: accessors return `None` on kind mismatch; indexing with a
//   handle from another tree is a programmer error and panics.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::domain::DomainRef;
use crate::id::{NameAllocator, NodeId};
use crate::object_type::ObjectType;

// ── Source location ──────────────────────────────────────────────────────

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn join(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

// ── Literals and operators ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    Int(i64),
    Real(f64),
    String(String),
    Switch(bool),
    None,
}

impl Literal {
    /// Numeric value of `Int`/`Real` literals.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Int(v) => Some(*v as f64),
            Literal::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Literal::Int(_) => "int",
            Literal::Real(_) => "real",
            Literal::String(_) => "string",
            Literal::Switch(_) => "switch",
            Literal::None => "none",
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Real(v) => write!(f, "{:?}", v),
            Literal::String(s) => write!(f, "\"{}\"", s),
            Literal::Switch(true) => f.write_str("on"),
            Literal::Switch(false) => f.write_str("off"),
            Literal::None => f.write_str("none"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    /// Unary minus.
    Neg,
    /// Unary bitwise not (`~`).
    Not,
}

impl Operator {
    pub fn is_unary(self) -> bool {
        matches!(self, Operator::Neg | Operator::Not)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub | Operator::Neg => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::And => "&",
            Operator::Or => "|",
            Operator::Not => "~",
        }
    }
}

// ── Names ────────────────────────────────────────────────────────────────

/// A possibly namespace-qualified reference: `scope[0]::scope[1]::name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameRef {
    pub name: String,
    pub scope: Vec<String>,
}

impl NameRef {
    pub fn simple(name: impl Into<String>) -> Self {
        NameRef {
            name: name.into(),
            scope: Vec::new(),
        }
    }

    pub fn qualified(scope: Vec<String>, name: impl Into<String>) -> Self {
        NameRef {
            name: name.into(),
            scope,
        }
    }
}

impl fmt::Display for NameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.scope {
            write!(f, "{}::", segment)?;
        }
        f.write_str(&self.name)
    }
}

// ── Nodes ────────────────────────────────────────────────────────────────

/// Declaration payload shared by scalar and bundle declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    pub name: String,
    pub object_type: ObjectType,
    /// `Property` nodes, in source order. At most one per name.
    pub properties: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Block(NameRef),
    Bundle {
        name: NameRef,
        index: Vec<NodeId>,
    },
    Declaration(Decl),
    BundleDeclaration {
        decl: Decl,
        size: NodeId,
    },
    Function {
        name: NameRef,
        properties: Vec<NodeId>,
    },
    /// `left >> right`. Chains are right-nested: `a >> b >> c` is
    /// `Stream(a, Stream(b, c))`.
    Stream {
        left: NodeId,
        right: NodeId,
    },
    /// Binary when `rhs` is `Some`, unary (`Neg`/`Not`) otherwise.
    Expression {
        op: Operator,
        lhs: NodeId,
        rhs: Option<NodeId>,
    },
    List(Vec<NodeId>),
    Value(Literal),
    /// `block.port`: the `port` property of whatever is connected to `block`.
    PortProperty {
        block: String,
        port: String,
    },
    Range {
        start: NodeId,
        end: NodeId,
    },
    Import {
        name: String,
        alias: Option<String>,
    },
    Platform {
        framework: String,
        version: f64,
    },
    Property {
        name: String,
        value: NodeId,
    },
}

/// Compiler-only annotations attached to every node. Never part of the
/// concrete syntax; written by analysis passes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompilerProps {
    /// Resolved declaration of a reference node.
    pub declaration: Option<NodeId>,
    /// Owning framework of a declaration ("" = global).
    pub framework: String,
    /// Namespace segments under which a declaration is reachable.
    pub namespace_tree: Vec<String>,
    /// Cached domain of a call site (or connector).
    pub domain: Option<DomainRef>,
    /// Per-domain instance counter on `_domainDefinition` declarations.
    pub instances: u32,
    pub reads: Vec<String>,
    pub writes: Vec<String>,
    /// Stream member feeding this call site.
    pub input_block: Option<NodeId>,
    /// Stream member fed by this call site.
    pub output_block: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    pub line: u32,
    pub props: CompilerProps,
}

// ── Tree ─────────────────────────────────────────────────────────────────

/// Arena holding a program (or library/framework) tree.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    nodes: Vec<Node>,
    statements: Vec<NodeId>,
    framework: String,
    names: NameAllocator,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: NodeKind, span: Span, line: u32) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            span,
            line,
            props: CompilerProps::default(),
        });
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn props(&self, id: NodeId) -> &CompilerProps {
        &self.nodes[id.index()].props
    }

    pub fn props_mut(&mut self, id: NodeId) -> &mut CompilerProps {
        &mut self.nodes[id.index()].props
    }

    pub fn line(&self, id: NodeId) -> u32 {
        self.nodes[id.index()].line
    }

    pub fn replace_kind(&mut self, id: NodeId, kind: NodeKind) {
        self.nodes[id.index()].kind = kind;
    }

    // ── Statements ──

    pub fn statements(&self) -> &[NodeId] {
        &self.statements
    }

    /// Append a top-level statement. A `Platform` statement sets the
    /// program's framework.
    pub fn push_statement(&mut self, id: NodeId) {
        if let NodeKind::Platform { framework, .. } = self.kind(id) {
            self.framework = framework.clone();
        }
        self.statements.push(id);
    }

    pub fn set_statements(&mut self, statements: Vec<NodeId>) {
        self.statements = statements;
    }

    /// Framework selected by the program's `use` statement ("" if none).
    pub fn framework(&self) -> &str {
        &self.framework
    }

    pub fn set_framework(&mut self, framework: impl Into<String>) {
        self.framework = framework.into();
    }

    /// `(name, alias)` of every `import` statement.
    pub fn imports(&self) -> Vec<(String, Option<String>)> {
        self.statements
            .iter()
            .filter_map(|&id| match self.kind(id) {
                NodeKind::Import { name, alias } => Some((name.clone(), alias.clone())),
                _ => None,
            })
            .collect()
    }

    /// Top-level declaration statements.
    pub fn declarations(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.statements
            .iter()
            .copied()
            .filter(move |&id| self.decl(id).is_some())
    }

    pub fn fresh_bridge_name(&mut self) -> String {
        self.names.alloc_bridge()
    }

    // ── Declarations ──

    pub fn decl(&self, id: NodeId) -> Option<&Decl> {
        match self.kind(id) {
            NodeKind::Declaration(decl) | NodeKind::BundleDeclaration { decl, .. } => Some(decl),
            _ => None,
        }
    }

    pub fn decl_name(&self, id: NodeId) -> Option<&str> {
        self.decl(id).map(|d| d.name.as_str())
    }

    pub fn object_type(&self, id: NodeId) -> Option<&ObjectType> {
        self.decl(id).map(|d| &d.object_type)
    }

    pub fn is_bundle_decl(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::BundleDeclaration { .. })
    }

    /// Size expression of a bundle declaration.
    pub fn bundle_size_expr(&self, id: NodeId) -> Option<NodeId> {
        match self.kind(id) {
            NodeKind::BundleDeclaration { size, .. } => Some(*size),
            _ => None,
        }
    }

    // ── Properties ──

    /// `Property` nodes of a declaration or function call.
    pub fn properties(&self, owner: NodeId) -> &[NodeId] {
        match self.kind(owner) {
            NodeKind::Declaration(decl) | NodeKind::BundleDeclaration { decl, .. } => {
                &decl.properties
            }
            NodeKind::Function { properties, .. } => properties,
            _ => &[],
        }
    }

    /// `(name, value)` pairs of a declaration or function call.
    pub fn property_pairs(&self, owner: NodeId) -> Vec<(&str, NodeId)> {
        self.properties(owner)
            .iter()
            .filter_map(|&p| match self.kind(p) {
                NodeKind::Property { name, value } => Some((name.as_str(), *value)),
                _ => None,
            })
            .collect()
    }

    /// Value node of the property `name` on a declaration or call.
    pub fn property(&self, owner: NodeId, name: &str) -> Option<NodeId> {
        self.properties(owner)
            .iter()
            .find_map(|&p| match self.kind(p) {
                NodeKind::Property { name: n, value } if n == name => Some(*value),
                _ => None,
            })
    }

    pub fn has_property(&self, owner: NodeId, name: &str) -> bool {
        self.property(owner, name).is_some()
    }

    /// Replace the value of `name`, or append a new property.
    pub fn set_property(&mut self, owner: NodeId, name: &str, value: NodeId) {
        let existing = self.properties(owner).iter().copied().find(
            |&p| matches!(self.kind(p), NodeKind::Property { name: n, .. } if n == name),
        );
        if let Some(p) = existing {
            if let NodeKind::Property { value: v, .. } = &mut self.nodes[p.index()].kind {
                *v = value;
            }
            return;
        }
        let span = self.node(owner).span;
        let line = self.line(owner);
        let prop = self.add(
            NodeKind::Property {
                name: name.to_string(),
                value,
            },
            span,
            line,
        );
        match &mut self.nodes[owner.index()].kind {
            NodeKind::Function { properties, .. } => properties.push(prop),
            NodeKind::Declaration(decl) | NodeKind::BundleDeclaration { decl, .. } => {
                decl.properties.push(prop)
            }
            _ => {}
        }
    }

    // ── Value accessors ──

    pub fn literal(&self, id: NodeId) -> Option<&Literal> {
        match self.kind(id) {
            NodeKind::Value(lit) => Some(lit),
            _ => None,
        }
    }

    pub fn string_value(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Value(Literal::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn list_items(&self, id: NodeId) -> Option<&[NodeId]> {
        match self.kind(id) {
            NodeKind::List(items) => Some(items),
            _ => None,
        }
    }

    /// Name carried by a `Block` reference or a string value.
    pub fn reference_name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Block(name) => Some(&name.name),
            NodeKind::Value(Literal::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Name reference of a `Block`, `Bundle` or `Function` node.
    pub fn name_ref(&self, id: NodeId) -> Option<&NameRef> {
        match self.kind(id) {
            NodeKind::Block(name)
            | NodeKind::Bundle { name, .. }
            | NodeKind::Function { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Owned children in source order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        match self.kind(id) {
            NodeKind::Block(_)
            | NodeKind::Value(_)
            | NodeKind::PortProperty { .. }
            | NodeKind::Import { .. }
            | NodeKind::Platform { .. } => Vec::new(),
            NodeKind::Bundle { index, .. } => index.clone(),
            NodeKind::Declaration(decl) => decl.properties.clone(),
            NodeKind::BundleDeclaration { decl, size } => {
                let mut out = vec![*size];
                out.extend(decl.properties.iter().copied());
                out
            }
            NodeKind::Function { properties, .. } => properties.clone(),
            NodeKind::Stream { left, right } => vec![*left, *right],
            NodeKind::Expression { lhs, rhs, .. } => {
                let mut out = vec![*lhs];
                out.extend(rhs.iter().copied());
                out
            }
            NodeKind::List(items) => items.clone(),
            NodeKind::Range { start, end } => vec![*start, *end],
            NodeKind::Property { value, .. } => vec![*value],
        }
    }

    // ── Streams ──

    /// Members of a stream chain, left to right. A non-stream node is a
    /// one-member chain.
    pub fn stream_members(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_members(id, &mut out);
        out
    }

    fn collect_members(&self, id: NodeId, out: &mut Vec<NodeId>) {
        match self.kind(id) {
            NodeKind::Stream { left, right } => {
                self.collect_members(*left, out);
                self.collect_members(*right, out);
            }
            _ => out.push(id),
        }
    }

    /// Build a right-nested stream over `members` (`None` if empty).
    pub fn build_stream(&mut self, members: &[NodeId], span: Span, line: u32) -> Option<NodeId> {
        let (&last, rest) = members.split_last()?;
        Some(rest.iter().rev().fold(last, |right, &left| {
            self.add(NodeKind::Stream { left, right }, span, line)
        }))
    }

    // ── Copying ──

    /// Deep-copy a subtree within this tree, compiler properties included.
    pub fn clone_subtree(&mut self, id: NodeId) -> NodeId {
        let node = self.node(id).clone();
        let kind = self.map_children(node.kind, |tree, child| tree.clone_subtree(child));
        let new_id = self.add(kind, node.span, node.line);
        self.nodes[new_id.index()].props = node.props;
        new_id
    }

    /// Deep-copy a subtree from another tree. Only the `framework` and
    /// `namespace_tree` annotations are carried over; the rest refer to the
    /// source arena.
    pub fn import_subtree(&mut self, src: &Tree, id: NodeId) -> NodeId {
        let node = src.node(id);
        let kind = self.map_children(node.kind.clone(), |tree, child| {
            tree.import_subtree(src, child)
        });
        let new_id = self.add(kind, node.span, node.line);
        let props = &mut self.nodes[new_id.index()].props;
        props.framework = node.props.framework.clone();
        props.namespace_tree = node.props.namespace_tree.clone();
        new_id
    }

    fn map_children(
        &mut self,
        kind: NodeKind,
        mut f: impl FnMut(&mut Tree, NodeId) -> NodeId,
    ) -> NodeKind {
        let mut map_all = |tree: &mut Tree, ids: Vec<NodeId>| -> Vec<NodeId> {
            ids.into_iter().map(|c| f(tree, c)).collect()
        };
        match kind {
            NodeKind::Bundle { name, index } => NodeKind::Bundle {
                name,
                index: map_all(self, index),
            },
            NodeKind::Declaration(mut decl) => {
                decl.properties = map_all(self, decl.properties);
                NodeKind::Declaration(decl)
            }
            NodeKind::BundleDeclaration { mut decl, size } => {
                let size = map_all(self, vec![size])[0];
                decl.properties = map_all(self, decl.properties);
                NodeKind::BundleDeclaration { decl, size }
            }
            NodeKind::Function { name, properties } => NodeKind::Function {
                name,
                properties: map_all(self, properties),
            },
            NodeKind::Stream { left, right } => {
                let ids = map_all(self, vec![left, right]);
                NodeKind::Stream {
                    left: ids[0],
                    right: ids[1],
                }
            }
            NodeKind::Expression { op, lhs, rhs } => {
                let lhs = map_all(self, vec![lhs])[0];
                let rhs = rhs.map(|r| map_all(self, vec![r])[0]);
                NodeKind::Expression { op, lhs, rhs }
            }
            NodeKind::List(items) => NodeKind::List(map_all(self, items)),
            NodeKind::Range { start, end } => {
                let ids = map_all(self, vec![start, end]);
                NodeKind::Range {
                    start: ids[0],
                    end: ids[1],
                }
            }
            NodeKind::Property { name, value } => NodeKind::Property {
                name,
                value: map_all(self, vec![value])[0],
            },
            leaf => leaf,
        }
    }

    // ── Module structure ──

    fn list_property(&self, owner: NodeId, name: &str) -> Vec<NodeId> {
        self.property(owner, name)
            .and_then(|v| self.list_items(v))
            .map(|items| items.to_vec())
            .unwrap_or_default()
    }

    /// Port declarations of a module (`ports: [...]`).
    pub fn module_ports(&self, module: NodeId) -> Vec<NodeId> {
        self.list_property(module, "ports")
            .into_iter()
            .filter(|&p| self.decl(p).is_some())
            .collect()
    }

    /// Internal block declarations of a module (`blocks: [...]`).
    pub fn module_blocks(&self, module: NodeId) -> Vec<NodeId> {
        self.list_property(module, "blocks")
            .into_iter()
            .filter(|&b| self.decl(b).is_some())
            .collect()
    }

    /// Internal streams of a module (`streams: [...]`).
    pub fn module_streams(&self, module: NodeId) -> Vec<NodeId> {
        self.list_property(module, "streams")
    }

    // ── Rendering ──

    /// Source-like rendering of a subtree.
    pub fn render(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.render_into(id, &mut out);
        out
    }

    fn render_list(&self, ids: &[NodeId], sep: &str, out: &mut String) {
        for (i, &id) in ids.iter().enumerate() {
            if i > 0 {
                out.push_str(sep);
            }
            self.render_into(id, out);
        }
    }

    fn render_decl(&self, decl: &Decl, size: Option<NodeId>, out: &mut String) {
        out.push_str(decl.object_type.as_str());
        out.push(' ');
        out.push_str(&decl.name);
        if let Some(size) = size {
            out.push('[');
            self.render_into(size, out);
            out.push(']');
        }
        if decl.properties.is_empty() {
            out.push_str(" {}");
        } else {
            out.push_str(" { ");
            self.render_list(&decl.properties, ", ", out);
            out.push_str(" }");
        }
    }

    fn render_into(&self, id: NodeId, out: &mut String) {
        use std::fmt::Write as _;
        match self.kind(id) {
            NodeKind::Block(name) => {
                let _ = write!(out, "{}", name);
            }
            NodeKind::Bundle { name, index } => {
                let _ = write!(out, "{}[", name);
                self.render_list(index, ", ", out);
                out.push(']');
            }
            NodeKind::Declaration(decl) => self.render_decl(decl, None, out),
            NodeKind::BundleDeclaration { decl, size } => {
                self.render_decl(decl, Some(*size), out)
            }
            NodeKind::Function { name, properties } => {
                let _ = write!(out, "{}(", name);
                self.render_list(properties, ", ", out);
                out.push(')');
            }
            NodeKind::Stream { left, right } => {
                self.render_into(*left, out);
                out.push_str(" >> ");
                self.render_into(*right, out);
            }
            NodeKind::Expression { op, lhs, rhs } => match rhs {
                Some(rhs) => {
                    out.push('(');
                    self.render_into(*lhs, out);
                    let _ = write!(out, " {} ", op.symbol());
                    self.render_into(*rhs, out);
                    out.push(')');
                }
                None => {
                    out.push_str(op.symbol());
                    self.render_into(*lhs, out);
                }
            },
            NodeKind::List(items) => {
                out.push('[');
                self.render_list(items, ", ", out);
                out.push(']');
            }
            NodeKind::Value(lit) => {
                let _ = write!(out, "{}", lit);
            }
            NodeKind::PortProperty { block, port } => {
                let _ = write!(out, "{}.{}", block, port);
            }
            NodeKind::Range { start, end } => {
                self.render_into(*start, out);
                out.push(':');
                self.render_into(*end, out);
            }
            NodeKind::Import { name, alias } => {
                let _ = write!(out, "import {}", name);
                if let Some(alias) = alias {
                    let _ = write!(out, " as {}", alias);
                }
            }
            NodeKind::Platform { framework, version } => {
                let _ = write!(out, "use {} version {:?}", framework, version);
            }
            NodeKind::Property { name, value } => {
                let _ = write!(out, "{}: ", name);
                self.render_into(*value, out);
            }
        }
    }

    /// One line per top-level statement; streams end with `;`.
    pub fn dump(&self) -> String {
        self.statements
            .iter()
            .map(|&id| {
                let mut line = self.render(id);
                if matches!(
                    self.kind(id),
                    NodeKind::Stream { .. } | NodeKind::Function { .. } | NodeKind::Block(_)
                ) {
                    line.push(';');
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(tree: &mut Tree, lit: Literal) -> NodeId {
        tree.add(NodeKind::Value(lit), Span::default(), 1)
    }

    fn block(tree: &mut Tree, name: &str) -> NodeId {
        tree.add(NodeKind::Block(NameRef::simple(name)), Span::default(), 1)
    }

    fn signal(tree: &mut Tree, name: &str) -> NodeId {
        tree.add(
            NodeKind::Declaration(Decl {
                name: name.to_string(),
                object_type: ObjectType::Signal,
                properties: Vec::new(),
            }),
            Span::default(),
            1,
        )
    }

    #[test]
    fn set_property_appends_then_replaces() {
        let mut tree = Tree::new();
        let decl = signal(&mut tree, "S");
        let one = value(&mut tree, Literal::Int(1));
        let two = value(&mut tree, Literal::Int(2));
        tree.set_property(decl, "rate", one);
        assert_eq!(tree.property(decl, "rate"), Some(one));
        tree.set_property(decl, "rate", two);
        assert_eq!(tree.property(decl, "rate"), Some(two));
        assert_eq!(tree.properties(decl).len(), 1);
    }

    #[test]
    fn stream_build_and_flatten() {
        let mut tree = Tree::new();
        let a = block(&mut tree, "A");
        let b = block(&mut tree, "B");
        let c = block(&mut tree, "C");
        let stream = tree
            .build_stream(&[a, b, c], Span::default(), 1)
            .expect("non-empty");
        assert_eq!(tree.stream_members(stream), vec![a, b, c]);
        assert_eq!(tree.render(stream), "A >> B >> C");
    }

    #[test]
    fn clone_subtree_is_deep() {
        let mut tree = Tree::new();
        let decl = signal(&mut tree, "S");
        let v = value(&mut tree, Literal::Real(48000.0));
        tree.set_property(decl, "rate", v);
        let copy = tree.clone_subtree(decl);
        assert_ne!(copy, decl);
        let copied_value = tree.property(copy, "rate").expect("rate");
        assert_ne!(copied_value, v);
        assert_eq!(tree.literal(copied_value), Some(&Literal::Real(48000.0)));
    }

    #[test]
    fn import_subtree_keeps_namespace_only() {
        let mut lib = Tree::new();
        let decl = signal(&mut lib, "S");
        lib.props_mut(decl).framework = "Gamma".to_string();
        lib.props_mut(decl).namespace_tree = vec!["Lib".to_string()];
        lib.props_mut(decl).declaration = Some(decl);

        let mut program = Tree::new();
        let copied = program.import_subtree(&lib, decl);
        assert_eq!(program.props(copied).framework, "Gamma");
        assert_eq!(program.props(copied).namespace_tree, vec!["Lib".to_string()]);
        assert_eq!(program.props(copied).declaration, None);
    }

    #[test]
    fn literal_display() {
        assert_eq!(Literal::Real(1.5).to_string(), "1.5");
        assert_eq!(Literal::Real(44100.0).to_string(), "44100.0");
        assert_eq!(Literal::Switch(true).to_string(), "on");
        assert_eq!(Literal::String("x".into()).to_string(), "\"x\"");
    }

    #[test]
    fn platform_statement_sets_framework() {
        let mut tree = Tree::new();
        let platform = tree.add(
            NodeKind::Platform {
                framework: "Gamma".to_string(),
                version: 1.0,
            },
            Span::default(),
            1,
        );
        tree.push_statement(platform);
        assert_eq!(tree.framework(), "Gamma");
        assert_eq!(tree.dump(), "use Gamma version 1.0");
    }
}
