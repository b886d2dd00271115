// domain.rs — Domain and rate inference
//
// Determines which synchronization domain and sampling rate a node belongs
// to. Domains are references to `_domainDefinition` declarations and are
// canonically identified as `[Framework::]domainName[:instance]`. Rates come
// from literal `rate` properties, named constants, port-property
// indirections, or a domain's default rate (following `parentDomain`).
//
// Preconditions: references may or may not carry a cached `declaration`;
//   call sites carry `input_block`/`output_block` for port-property walks.
// Postconditions: queries are pure.
// Failure modes: unresolved domains yield `None`, unresolved rates yield
//   `Rate::Unresolved` (traced at debug level). Aggregate rate mismatches are
//   tolerated with a warning.
// Side effects: none.

use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::ast::{Literal, NodeKind, Tree};
use crate::const_fold::resolve_constant;
use crate::id::NodeId;
use crate::object_type::ObjectType;
use crate::scope::{
    find_declaration_by_name, find_domain_declaration, program_framework,
    push_frame, resolve_port_binding, resolve_reference, split_qualified, PortBinding,
    ScopeFrame, MAX_RESOLVE_DEPTH,
};

// ── Domain references ────────────────────────────────────────────────────

/// A reference to a domain definition, as written on a declaration or call,
/// re-scoped to where it was reached from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainRef {
    pub name: String,
    /// Namespace qualifiers used to find the definition.
    pub scope: Vec<String>,
    /// Framework of the declaration that named the domain ("" = program).
    pub framework: String,
    /// Per-domain instance index of a platform-module call site.
    pub instance: Option<u32>,
}

impl DomainRef {
    pub fn new(name: impl Into<String>) -> Self {
        DomainRef {
            name: name.into(),
            scope: Vec::new(),
            framework: String::new(),
            instance: None,
        }
    }

    fn lookup_framework<'t>(&'t self, tree: &'t Tree) -> Option<&'t str> {
        match self.framework.as_str() {
            "" => program_framework(tree),
            fw => Some(fw),
        }
    }
}

impl fmt::Display for DomainRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.scope {
            write!(f, "{}::", segment)?;
        }
        f.write_str(&self.name)?;
        if let Some(instance) = self.instance {
            write!(f, ":{}", instance)?;
        }
        Ok(())
    }
}

/// Sampling rate in Hz, or unresolved (raw `-1`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Rate {
    Hz(f64),
    Unresolved,
}

impl Rate {
    pub fn raw(self) -> f64 {
        match self {
            Rate::Hz(v) => v,
            Rate::Unresolved => -1.0,
        }
    }

    pub fn is_resolved(self) -> bool {
        matches!(self, Rate::Hz(_))
    }

    fn from_f64(value: f64) -> Rate {
        if value.is_finite() && value >= 0.0 {
            Rate::Hz(value)
        } else {
            Rate::Unresolved
        }
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rate::Hz(v) => write!(f, "{}", v),
            Rate::Unresolved => f.write_str("unresolved"),
        }
    }
}

/// Frames up to and including the one declaring `decl`; empty for globals.
fn declaring_scope<'s>(scope: &'s [ScopeFrame], decl: NodeId) -> &'s [ScopeFrame] {
    match scope.iter().rposition(|frame| frame.members.contains(&decl)) {
        Some(i) => &scope[..=i],
        None => &[],
    }
}

/// Internal block behind `module`'s main output port.
fn main_output_block(tree: &Tree, module: NodeId) -> Option<NodeId> {
    let port = tree
        .module_ports(module)
        .into_iter()
        .find(|&p| tree.object_type(p) == Some(&ObjectType::MainOutputPort))?;
    let name = tree.reference_name(tree.property(port, "block")?)?;
    tree.module_blocks(module)
        .into_iter()
        .find(|&b| tree.decl_name(b) == Some(name))
}

fn decl_framework(tree: &Tree, decl: NodeId) -> String {
    tree.props(decl).framework.clone()
}

// ── Domain inference ─────────────────────────────────────────────────────

struct DomainCtx<'a> {
    tree: &'a Tree,
}

impl<'a> DomainCtx<'a> {
    /// Domain named by a property value: a block or string naming a domain
    /// definition, or a port property to follow.
    fn from_value(&self, value: NodeId, scope: &[ScopeFrame], framework: &str, depth: usize) -> Option<DomainRef> {
        let tree = self.tree;
        match tree.kind(value) {
            NodeKind::Block(name) => Some(DomainRef {
                name: name.name.clone(),
                scope: name.scope.clone(),
                framework: framework.to_string(),
                instance: None,
            }),
            NodeKind::Value(Literal::String(text)) => {
                let (qualifiers, symbol) = split_qualified(text);
                Some(DomainRef {
                    name: symbol.to_string(),
                    scope: qualifiers,
                    framework: framework.to_string(),
                    instance: None,
                })
            }
            NodeKind::Value(Literal::None) => None,
            NodeKind::PortProperty { .. } => self.port_property_domain(value, scope, depth + 1),
            _ => {
                debug!(value = %tree.render(value), "value does not name a domain");
                None
            }
        }
    }

    fn declaration_domain(&self, decl: NodeId, scope: &[ScopeFrame], depth: usize) -> Option<DomainRef> {
        let value = self.tree.property(decl, "domain")?;
        let scope = declaring_scope(scope, decl);
        self.from_value(value, scope, &decl_framework(self.tree, decl), depth + 1)
    }

    fn node_domain(&self, node: NodeId, scope: &[ScopeFrame], depth: usize) -> Option<DomainRef> {
        if depth > MAX_RESOLVE_DEPTH {
            debug!(node = %node, "domain resolution depth exceeded");
            return None;
        }
        let tree = self.tree;
        match tree.kind(node) {
            NodeKind::Block(name) | NodeKind::Bundle { name, .. } => {
                let Some(decl) = resolve_reference(tree, scope, node) else {
                    debug!(node = %tree.render(node), "domain of undeclared block");
                    return None;
                };
                let mut domain = self.declaration_domain(decl, scope, depth + 1)?;
                if !name.scope.is_empty() {
                    let mut rescoped = name.scope.clone();
                    rescoped.extend(domain.scope);
                    domain.scope = rescoped;
                }
                Some(domain)
            }
            NodeKind::Declaration(_) | NodeKind::BundleDeclaration { .. } => {
                self.declaration_domain(node, scope, depth + 1)
            }
            // Only the first member is consulted; members may differ.
            NodeKind::List(items) => {
                let first = *items.first()?;
                self.node_domain(first, scope, depth + 1)
            }
            NodeKind::Function { .. } => self.call_domain(node, scope, depth + 1),
            NodeKind::Stream { left, right } => {
                let left = self.node_domain(*left, scope, depth + 1);
                let right = self.node_domain(*right, scope, depth + 1);
                match (left, right) {
                    (Some(l), Some(r)) => {
                        let lid = self.identifier(&l, scope);
                        let rid = self.identifier(&r, scope);
                        if lid.is_some() && lid == rid {
                            Some(l)
                        } else {
                            debug!(left = ?lid, right = ?rid, "domain change inside stream");
                            None
                        }
                    }
                    (Some(d), None) | (None, Some(d)) => Some(d),
                    (None, None) => None,
                }
            }
            NodeKind::Expression { lhs, rhs, .. } => self
                .node_domain(*lhs, scope, depth + 1)
                .or_else(|| rhs.and_then(|r| self.node_domain(r, scope, depth + 1))),
            NodeKind::PortProperty { .. } => self.port_property_domain(node, scope, depth + 1),
            _ => None,
        }
    }

    fn call_domain(&self, call: NodeId, scope: &[ScopeFrame], depth: usize) -> Option<DomainRef> {
        let tree = self.tree;
        if let Some(cached) = &tree.props(call).domain {
            return Some(cached.clone());
        }
        if let Some(value) = tree.property(call, "domain") {
            let framework = program_framework(tree).unwrap_or_default();
            if let Some(domain) = self.from_value(value, scope, framework, depth + 1) {
                return Some(domain);
            }
        }
        let module = resolve_reference(tree, scope, call)?;
        if let Some(domain) = self.declaration_domain(module, scope, depth + 1) {
            return Some(domain);
        }
        if tree.object_type(module) == Some(&ObjectType::PlatformModule) {
            return None;
        }
        let output_block = main_output_block(tree, module)?;
        let inner = push_frame(scope, ScopeFrame::for_module(tree, call, module));
        self.declaration_domain(output_block, &inner, depth + 1)
    }

    fn port_property_domain(&self, pp: NodeId, scope: &[ScopeFrame], depth: usize) -> Option<DomainRef> {
        let tree = self.tree;
        let NodeKind::PortProperty { block, port } = tree.kind(pp) else {
            return None;
        };
        match resolve_port_binding(tree, scope, block) {
            PortBinding::Connected { node, outer } => {
                if port == "domain" {
                    return self.node_domain(node, outer, depth + 1);
                }
                let decl = resolve_reference(tree, outer, node)?;
                let value = tree.property(decl, port)?;
                self.from_value(value, outer, &decl_framework(tree, decl), depth + 1)
            }
            PortBinding::Unconnected { .. } => {
                debug!(block = %block, "domain of unconnected port");
                None
            }
            PortBinding::NotAPort => {
                let decl = find_declaration_by_name(block, scope, tree, &[], program_framework(tree))?;
                if port == "domain" {
                    return self.declaration_domain(decl, scope, depth + 1);
                }
                let value = tree.property(decl, port)?;
                self.from_value(value, scope, &decl_framework(tree, decl), depth + 1)
            }
        }
    }

    fn definition(&self, domain: &DomainRef, scope: &[ScopeFrame]) -> Option<NodeId> {
        find_domain_declaration(
            &domain.name,
            scope,
            self.tree,
            &domain.scope,
            domain.lookup_framework(self.tree),
        )
    }

    fn identifier(&self, domain: &DomainRef, scope: &[ScopeFrame]) -> Option<String> {
        let tree = self.tree;
        let Some(def) = self.definition(domain, scope) else {
            debug!(domain = %domain, "domain definition not found");
            return None;
        };
        let mut id = String::new();
        let framework = &tree.props(def).framework;
        if !framework.is_empty() {
            id.push_str(framework);
            id.push_str("::");
        }
        id.push_str(tree.decl_name(def)?);
        if let Some(instance) = domain.instance {
            id.push_str(&format!(":{}", instance));
        }
        Some(id)
    }
}

/// Domain a node belongs to. `None` for domain-less nodes and at domain
/// change points inside streams.
pub fn get_node_domain(node: NodeId, scope: &[ScopeFrame], tree: &Tree) -> Option<DomainRef> {
    DomainCtx { tree }.node_domain(node, scope, 0)
}

/// Canonical identifier `[Framework::]domainName[:instance]`, built from
/// the resolved `_domainDefinition` rather than the name as written.
pub fn get_domain_identifier(domain: &DomainRef, scope: &[ScopeFrame], tree: &Tree) -> Option<String> {
    DomainCtx { tree }.identifier(domain, scope)
}

pub fn get_node_domain_name(node: NodeId, scope: &[ScopeFrame], tree: &Tree) -> Option<String> {
    let ctx = DomainCtx { tree };
    let domain = ctx.node_domain(node, scope, 0)?;
    ctx.identifier(&domain, scope)
}

/// `_domainDefinition` declaration a domain reference resolves to.
pub fn get_domain_declaration(domain: &DomainRef, scope: &[ScopeFrame], tree: &Tree) -> Option<NodeId> {
    DomainCtx { tree }.definition(domain, scope)
}

/// Domain of `node` at a stream edge: its own domain, or the domain flowing
/// in from `upstream` when it has none.
pub fn resolve_domain(
    upstream: Option<NodeId>,
    node: NodeId,
    scope: &[ScopeFrame],
    tree: &Tree,
) -> Option<DomainRef> {
    let ctx = DomainCtx { tree };
    ctx.node_domain(node, scope, 0)
        .or_else(|| upstream.and_then(|up| ctx.node_domain(up, scope, 0)))
}

// ── Rate inference ───────────────────────────────────────────────────────

struct RateCtx<'a> {
    tree: &'a Tree,
}

impl<'a> RateCtx<'a> {
    fn value_rate(&self, value: NodeId, scope: &[ScopeFrame], depth: usize) -> Rate {
        if let NodeKind::PortProperty { .. } = self.tree.kind(value) {
            return self.port_property_rate(value, scope, depth + 1);
        }
        match resolve_constant(value, scope, self.tree, program_framework(self.tree))
            .as_ref()
            .and_then(Literal::as_f64)
        {
            Some(v) => Rate::from_f64(v),
            None => {
                debug!(value = %self.tree.render(value), "rate does not resolve to a number");
                Rate::Unresolved
            }
        }
    }

    /// Default rate of a domain, following `parentDomain` links.
    fn domain_rate(&self, domain: &DomainRef, scope: &[ScopeFrame]) -> Rate {
        let tree = self.tree;
        let domains = DomainCtx { tree };
        let mut current = domains.definition(domain, scope);
        let mut hops = 0;
        while let Some(def) = current {
            if hops > MAX_RESOLVE_DEPTH {
                debug!(domain = %domain, "parent domain chain too deep");
                return Rate::Unresolved;
            }
            if let Some(rate) = tree.property(def, "rate") {
                return self.value_rate(rate, &[], hops + 1);
            }
            current = tree.property(def, "parentDomain").and_then(|p| {
                let parent = domains.from_value(p, &[], &decl_framework(tree, def), 0)?;
                domains.definition(&parent, &[])
            });
            hops += 1;
        }
        Rate::Unresolved
    }

    fn declaration_rate(&self, decl: NodeId, scope: &[ScopeFrame], depth: usize) -> Rate {
        let scope = declaring_scope(scope, decl);
        if let Some(rate) = self.tree.property(decl, "rate") {
            return self.value_rate(rate, scope, depth + 1);
        }
        let domains = DomainCtx { tree: self.tree };
        match domains.declaration_domain(decl, scope, depth + 1) {
            Some(domain) => self.domain_rate(&domain, scope),
            None => Rate::Unresolved,
        }
    }

    /// Rate of a list or expression: the last member whose rate differs
    /// from the running value wins.
    fn aggregate_rate(&self, members: &[NodeId], scope: &[ScopeFrame], depth: usize) -> Rate {
        let mut result = Rate::Unresolved;
        for &member in members {
            let rate = self.node_rate(member, scope, depth + 1);
            match (result, rate) {
                (_, Rate::Unresolved) => {}
                (Rate::Unresolved, r) => result = r,
                (Rate::Hz(a), Rate::Hz(b)) if a != b => {
                    warn!(previous = a, rate = b, "rate mismatch in aggregate");
                    result = rate;
                }
                _ => {}
            }
        }
        result
    }

    fn node_rate(&self, node: NodeId, scope: &[ScopeFrame], depth: usize) -> Rate {
        if depth > MAX_RESOLVE_DEPTH {
            debug!(node = %node, "rate resolution depth exceeded");
            return Rate::Unresolved;
        }
        let tree = self.tree;
        match tree.kind(node) {
            NodeKind::Block(_) | NodeKind::Bundle { .. } => match resolve_reference(tree, scope, node) {
                Some(decl) => self.declaration_rate(decl, scope, depth + 1),
                None => Rate::Unresolved,
            },
            NodeKind::Declaration(_) | NodeKind::BundleDeclaration { .. } => {
                self.declaration_rate(node, scope, depth + 1)
            }
            NodeKind::List(items) => self.aggregate_rate(items, scope, depth + 1),
            NodeKind::Expression { lhs, rhs, .. } => {
                let mut members = vec![*lhs];
                members.extend(rhs.iter().copied());
                self.aggregate_rate(&members, scope, depth + 1)
            }
            NodeKind::Function { .. } => self.call_rate(node, scope, depth + 1),
            NodeKind::Stream { right, .. } => self.node_rate(*right, scope, depth + 1),
            NodeKind::PortProperty { .. } => self.port_property_rate(node, scope, depth + 1),
            _ => Rate::Unresolved,
        }
    }

    fn call_rate(&self, call: NodeId, scope: &[ScopeFrame], depth: usize) -> Rate {
        let tree = self.tree;
        if let Some(rate) = tree.property(call, "rate") {
            return self.value_rate(rate, scope, depth + 1);
        }
        if let Some(module) = resolve_reference(tree, scope, call) {
            if let Some(rate) = tree.property(module, "rate") {
                return self.value_rate(rate, declaring_scope(scope, module), depth + 1);
            }
            if let Some(block) = main_output_block(tree, module) {
                let inner = push_frame(scope, ScopeFrame::for_module(tree, call, module));
                let rate = self.declaration_rate(block, &inner, depth + 1);
                if rate.is_resolved() {
                    return rate;
                }
            }
        }
        let domains = DomainCtx { tree };
        match domains.call_domain(call, scope, depth + 1) {
            Some(domain) => self.domain_rate(&domain, scope),
            None => Rate::Unresolved,
        }
    }

    fn port_property_rate(&self, pp: NodeId, scope: &[ScopeFrame], depth: usize) -> Rate {
        let tree = self.tree;
        let NodeKind::PortProperty { block, port } = tree.kind(pp) else {
            return Rate::Unresolved;
        };
        match resolve_port_binding(tree, scope, block) {
            PortBinding::Connected { node, outer } => {
                if port == "rate" {
                    return self.node_rate(node, outer, depth + 1);
                }
                resolve_reference(tree, outer, node)
                    .and_then(|decl| tree.property(decl, port))
                    .map(|value| self.value_rate(value, outer, depth + 1))
                    .unwrap_or(Rate::Unresolved)
            }
            PortBinding::Unconnected { .. } => Rate::Unresolved,
            PortBinding::NotAPort => {
                let Some(decl) = find_declaration_by_name(block, scope, tree, &[], program_framework(tree))
                else {
                    return Rate::Unresolved;
                };
                if port == "rate" {
                    return self.declaration_rate(decl, scope, depth + 1);
                }
                tree.property(decl, port)
                    .map(|value| self.value_rate(value, scope, depth + 1))
                    .unwrap_or(Rate::Unresolved)
            }
        }
    }
}

/// Sampling rate of a node.
pub fn get_node_rate(node: NodeId, scope: &[ScopeFrame], tree: &Tree) -> Rate {
    RateCtx { tree }.node_rate(node, scope, 0)
}

/// Numeric value of a rate property: a literal, a numeric constant, or a
/// port property.
pub fn resolve_rate_to_float(value: NodeId, scope: &[ScopeFrame], tree: &Tree) -> Rate {
    RateCtx { tree }.value_rate(value, scope, 0)
}

/// Resolve a rate written as `block.port` by walking to the call site.
pub fn evaluate_rate_port_property(pp: NodeId, scope: &[ScopeFrame], tree: &Tree) -> Rate {
    RateCtx { tree }.port_property_rate(pp, scope, 0)
}

/// Default rate of `domain`, following its `parentDomain` chain.
pub fn get_domain_rate(domain: &DomainRef, scope: &[ScopeFrame], tree: &Tree) -> Rate {
    RateCtx { tree }.domain_rate(domain, scope)
}

/// Rate of `node` at a stream edge, falling back to the rate flowing in
/// from `upstream`.
pub fn resolve_rate(upstream: Option<NodeId>, node: NodeId, scope: &[ScopeFrame], tree: &Tree) -> Rate {
    let ctx = RateCtx { tree };
    match ctx.node_rate(node, scope, 0) {
        Rate::Unresolved => upstream
            .map(|up| ctx.node_rate(up, scope, 0))
            .unwrap_or(Rate::Unresolved),
        rate => rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn tree(source: &str) -> Tree {
        let result = parse(source);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        result.tree
    }

    fn decl(tree: &Tree, name: &str) -> NodeId {
        tree.declarations()
            .find(|&d| tree.decl_name(d) == Some(name))
            .expect("declaration")
    }

    fn link_calls(tree: &mut Tree, stream: NodeId) -> Vec<NodeId> {
        let members = tree.stream_members(stream);
        for (i, &m) in members.iter().enumerate() {
            if matches!(tree.kind(m), NodeKind::Function { .. }) {
                tree.props_mut(m).input_block = i.checked_sub(1).map(|j| members[j]);
                tree.props_mut(m).output_block = members.get(i + 1).copied();
            }
        }
        members
    }

    const DOMAINS: &str = "_domainDefinition AudioDomain { rate: 44100 }\n\
         _domainDefinition ControlDomain { parentDomain: AudioDomain }\n\
         _domainDefinition OSCDomain { rate: 0 }\n";

    #[test]
    fn identifiers_come_from_definitions() {
        let mut t = tree(&format!(
            "{DOMAINS}signal S {{ domain: AudioDomain }}\nsignal Raw {{ domain: Missing }}"
        ));
        let s = decl(&t, "S");
        assert_eq!(get_node_domain_name(s, &[], &t).as_deref(), Some("AudioDomain"));
        assert_eq!(get_node_domain_name(decl(&t, "Raw"), &[], &t), None);

        let audio = decl(&t, "AudioDomain");
        t.props_mut(audio).framework = "Gamma".to_string();
        t.set_framework("Gamma");
        let mut domain = get_node_domain(s, &[], &t).expect("domain");
        assert_eq!(
            get_domain_identifier(&domain, &[], &t).as_deref(),
            Some("Gamma::AudioDomain")
        );
        domain.instance = Some(2);
        assert_eq!(
            get_domain_identifier(&domain, &[], &t).as_deref(),
            Some("Gamma::AudioDomain:2")
        );
    }

    #[test]
    fn string_domains_and_none() {
        let t = tree(&format!(
            "{DOMAINS}signal A {{ domain: \"AudioDomain\" }}\nsignal N {{ domain: none }}"
        ));
        assert_eq!(
            get_node_domain_name(decl(&t, "A"), &[], &t).as_deref(),
            Some("AudioDomain")
        );
        assert_eq!(get_node_domain(decl(&t, "N"), &[], &t), None);
    }

    #[test]
    fn stream_domain_shared_or_change_point() {
        let t = tree(&format!(
            "{DOMAINS}signal A {{ domain: AudioDomain }}\n\
             signal B {{ domain: AudioDomain }}\n\
             signal O {{ domain: OSCDomain }}\n\
             signal Plain {{}}\n\
             A >> B;\n\
             A >> O;\n\
             Plain >> O;"
        ));
        let streams: Vec<NodeId> = t.statements()[7..].to_vec();
        assert_eq!(
            get_node_domain_name(streams[0], &[], &t).as_deref(),
            Some("AudioDomain")
        );
        assert_eq!(get_node_domain(streams[1], &[], &t), None);
        let members = t.stream_members(streams[1]);
        assert_ne!(
            get_node_domain_name(members[0], &[], &t),
            get_node_domain_name(members[1], &[], &t)
        );
        assert_eq!(
            get_node_domain_name(streams[2], &[], &t).as_deref(),
            Some("OSCDomain")
        );
    }

    #[test]
    fn list_uses_first_member() {
        let t = tree(&format!(
            "{DOMAINS}signal A {{ domain: AudioDomain }}\n\
             signal O {{ domain: OSCDomain }}\n\
             [A, O] >> Out;"
        ));
        let list = t.stream_members(t.statements()[5])[0];
        assert_eq!(get_node_domain_name(list, &[], &t).as_deref(), Some("AudioDomain"));
    }

    #[test]
    fn qualified_reference_rescopes_domain() {
        let mut t = tree("_domainDefinition Dom {}\nsignal S { domain: Dom }\nLib::S >> Out;");
        for name in ["Dom", "S"] {
            let d = decl(&t, name);
            t.props_mut(d).namespace_tree = vec!["Lib".to_string()];
        }
        let reference = t.stream_members(t.statements()[2])[0];
        let domain = get_node_domain(reference, &[], &t).expect("domain");
        assert_eq!(domain.scope, vec!["Lib".to_string()]);
        assert_eq!(get_domain_identifier(&domain, &[], &t).as_deref(), Some("Dom"));
    }

    #[test]
    fn nested_module_output_port_domain() {
        let mut t = tree(&format!(
            "{DOMAINS}signal A {{ domain: AudioDomain }}\n\
             signal B {{ domain: OSCDomain }}\n\
             module Outer {{\n\
               ports: [ mainInputPort Input {{ block: In }}, mainOutputPort Output {{ block: Out }} ]\n\
               blocks: [ signal In {{}}, signal Out {{ domain: Output.domain }} ]\n\
               streams: [ In >> Out; ]\n\
             }}\n\
             A >> Outer() >> B;"
        ));
        let stream = *t.statements().last().expect("stream");
        let members = link_calls(&mut t, stream);
        let call = members[1];
        let outer = decl(&t, "Outer");
        let scope = vec![ScopeFrame::for_module(&t, call, outer)];
        let out_block = t.module_blocks(outer)[1];
        let inner = get_node_domain_name(out_block, &scope, &t);
        assert_eq!(inner, get_node_domain_name(members[2], &[], &t));
        assert_eq!(inner.as_deref(), Some("OSCDomain"));
        assert_eq!(get_node_domain_name(call, &[], &t).as_deref(), Some("OSCDomain"));
    }

    #[test]
    fn call_domain_precedence() {
        let mut t = tree(&format!(
            "{DOMAINS}platformModule Osc {{ domain: AudioDomain }}\n\
             Osc(domain: OSCDomain) >> X;\n\
             Osc() >> X;"
        ));
        let explicit = t.stream_members(t.statements()[4])[0];
        let implicit = t.stream_members(t.statements()[5])[0];
        assert_eq!(get_node_domain_name(explicit, &[], &t).as_deref(), Some("OSCDomain"));
        assert_eq!(get_node_domain_name(implicit, &[], &t).as_deref(), Some("AudioDomain"));

        let mut cached = DomainRef::new("AudioDomain");
        cached.instance = Some(1);
        t.props_mut(implicit).domain = Some(cached);
        assert_eq!(
            get_node_domain_name(implicit, &[], &t).as_deref(),
            Some("AudioDomain:1")
        );
    }

    #[test]
    fn rates_from_literals_constants_and_domains() {
        let t = tree(&format!(
            "{DOMAINS}constant SR {{ value: 48000 }}\n\
             signal Lit {{ rate: 100 }}\n\
             signal Named {{ rate: SR }}\n\
             signal FromDomain {{ domain: AudioDomain }}\n\
             signal FromParent {{ domain: ControlDomain }}\n\
             signal Nothing {{}}"
        ));
        assert_eq!(get_node_rate(decl(&t, "Lit"), &[], &t), Rate::Hz(100.0));
        assert_eq!(get_node_rate(decl(&t, "Named"), &[], &t), Rate::Hz(48000.0));
        assert_eq!(get_node_rate(decl(&t, "FromDomain"), &[], &t), Rate::Hz(44100.0));
        assert_eq!(get_node_rate(decl(&t, "FromParent"), &[], &t), Rate::Hz(44100.0));
        assert_eq!(get_node_rate(decl(&t, "Nothing"), &[], &t), Rate::Unresolved);
        assert_eq!(Rate::Unresolved.raw(), -1.0);

        let named = t.property(decl(&t, "Named"), "rate").unwrap();
        assert_eq!(resolve_rate_to_float(named, &[], &t), Rate::Hz(48000.0));
    }

    #[test]
    fn aggregate_rate_last_differing_wins() {
        let t = tree(
            "signal A { rate: 10 }\nsignal B { rate: 20 }\nsignal C { rate: 10 }\n\
             [A, B, C] >> Out;\n[A, A] >> Out;",
        );
        let mixed = t.stream_members(t.statements()[3])[0];
        let same = t.stream_members(t.statements()[4])[0];
        assert_eq!(get_node_rate(mixed, &[], &t), Rate::Hz(10.0));
        assert_eq!(get_node_rate(same, &[], &t), Rate::Hz(10.0));

        let t = tree("signal A { rate: 10 }\nsignal B { rate: 20 }\n[A, B] >> Out;");
        let list = t.stream_members(t.statements()[2])[0];
        assert_eq!(get_node_rate(list, &[], &t), Rate::Hz(20.0));
    }

    #[test]
    fn rate_port_property_through_call() {
        let mut t = tree(
            "signal Src { rate: 22050 }\n\
             module Pass {\n\
               ports: [ mainInputPort Input { block: In }, mainOutputPort Output { block: Out } ]\n\
               blocks: [ signal In {}, signal Out { rate: Input.rate } ]\n\
             }\n\
             Src >> Pass() >> Dst;",
        );
        let stream = *t.statements().last().expect("stream");
        let members = link_calls(&mut t, stream);
        assert_eq!(get_node_rate(members[1], &[], &t), Rate::Hz(22050.0));
        assert_eq!(get_node_rate(stream, &[], &t), Rate::Unresolved);
        assert_eq!(
            resolve_rate(Some(members[1]), members[2], &[], &t),
            Rate::Hz(22050.0)
        );
    }

    #[test]
    fn resolve_domain_falls_back_to_upstream() {
        let t = tree(&format!(
            "{DOMAINS}signal A {{ domain: AudioDomain }}\nA >> Plain;"
        ));
        let members = t.stream_members(t.statements()[4]);
        let domain = resolve_domain(Some(members[0]), members[1], &[], &t).expect("domain");
        assert_eq!(domain.name, "AudioDomain");
        assert_eq!(resolve_domain(None, members[1], &[], &t), None);
    }
}
