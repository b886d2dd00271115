// annotate.rs — Reference, connection and domain annotation pass
//
// Writes the compiler-property side table the inference queries rely on:
// cached `declaration` of every reference, stream connections
// (`input_block`/`output_block`) of call sites, `reads`/`writes` of streams
// and calls, and the domain of every top-level call site, propagated down
// streams into calls that have none of their own.
//
// Preconditions: injection, inheritance, defaults and folding have run.
// Postconditions: resolvable references carry `declaration`; top-level call
//   sites carry `domain` where one can be inferred.
// Failure modes: unresolved references are counted and traced, never fatal.
// Side effects: mutates compiler properties only; tree shape is unchanged.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::ast::{NodeKind, Tree};
use crate::domain::{get_domain_declaration, get_node_domain, DomainRef};
use crate::id::NodeId;
use crate::object_type::ObjectType;
use crate::scope::{find_declaration_by_name, program_framework, push_frame, ScopeFrame};

/// Counters reported by [`annotate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnnotateStats {
    pub resolved: usize,
    pub unresolved: usize,
    pub connections: usize,
    pub domains: usize,
    pub instances: usize,
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn annotate(tree: &mut Tree) -> AnnotateStats {
    let mut stats = AnnotateStats::default();
    cache_declarations(tree, &mut stats);
    for stream in all_streams(tree) {
        stats.connections += link_stream(tree, stream);
    }
    propagate_domains(tree, &mut stats);
    debug!(?stats, "annotation complete");
    stats
}

// ── Declarations ─────────────────────────────────────────────────────────

struct RefCollector<'a> {
    tree: &'a Tree,
    found: Vec<(NodeId, NodeId)>,
    unresolved: usize,
}

impl<'a> RefCollector<'a> {
    fn visit(&mut self, node: NodeId, scope: &[ScopeFrame], namespace: &[String], framework: Option<&str>) {
        let tree = self.tree;
        if let Some(name) = tree.name_ref(node) {
            let name = name.to_string();
            let decl = find_declaration_by_name(&name, scope, tree, namespace, framework).or_else(|| {
                (!namespace.is_empty())
                    .then(|| find_declaration_by_name(&name, scope, tree, &[], framework))
                    .flatten()
            });
            match decl {
                Some(decl) => self.found.push((node, decl)),
                None => {
                    debug!(name = %name, line = tree.line(node), "unresolved reference");
                    self.unresolved += 1;
                }
            }
        }
        let is_module = tree.object_type(node).is_some_and(|t| t.is_module_like());
        if is_module {
            let inner = push_frame(scope, ScopeFrame::for_module(tree, node, node));
            for child in tree.children(node) {
                self.visit(child, &inner, namespace, framework);
            }
        } else {
            for child in tree.children(node) {
                self.visit(child, scope, namespace, framework);
            }
        }
    }
}

fn cache_declarations(tree: &mut Tree, stats: &mut AnnotateStats) {
    let mut collector = RefCollector {
        tree: &*tree,
        found: Vec::new(),
        unresolved: 0,
    };
    for &statement in tree.statements() {
        let props = tree.props(statement);
        let framework = match props.framework.as_str() {
            "" => program_framework(tree),
            fw => Some(fw),
        };
        collector.visit(statement, &[], &props.namespace_tree, framework);
    }
    let RefCollector { found, unresolved, .. } = collector;
    stats.resolved = found.len();
    stats.unresolved = unresolved;
    for (node, decl) in found {
        tree.props_mut(node).declaration = Some(decl);
    }
}

// ── Connections ──────────────────────────────────────────────────────────

/// Top-level streams followed by the internal streams of every module.
fn all_streams(tree: &Tree) -> Vec<NodeId> {
    let mut streams: Vec<NodeId> = tree
        .statements()
        .iter()
        .copied()
        .filter(|&s| matches!(tree.kind(s), NodeKind::Stream { .. }))
        .collect();
    for decl in tree.declarations() {
        if tree.object_type(decl).is_some_and(|t| t.is_module_like()) {
            streams.extend(
                tree.module_streams(decl)
                    .into_iter()
                    .filter(|&s| matches!(tree.kind(s), NodeKind::Stream { .. })),
            );
        }
    }
    streams
}

fn member_name(tree: &Tree, node: NodeId) -> Option<String> {
    match tree.kind(node) {
        NodeKind::Block(name) | NodeKind::Bundle { name, .. } => Some(name.to_string()),
        _ => None,
    }
}

/// Record call connections and reads/writes for one stream. Returns the
/// number of call sites linked.
fn link_stream(tree: &mut Tree, stream: NodeId) -> usize {
    let members = tree.stream_members(stream);
    let last = members.len().saturating_sub(1);
    let mut reads = Vec::new();
    let mut writes = Vec::new();
    let mut linked = 0;
    for (i, &member) in members.iter().enumerate() {
        if let Some(name) = member_name(tree, member) {
            if i < last {
                reads.push(name.clone());
            }
            if i > 0 {
                writes.push(name);
            }
        }
        if !matches!(tree.kind(member), NodeKind::Function { .. }) {
            continue;
        }
        let input = i.checked_sub(1).map(|j| members[j]);
        let output = members.get(i + 1).copied();
        let call_reads: Vec<String> = input.and_then(|n| member_name(tree, n)).into_iter().collect();
        let call_writes: Vec<String> = output.and_then(|n| member_name(tree, n)).into_iter().collect();
        let props = tree.props_mut(member);
        props.input_block = input;
        props.output_block = output;
        props.reads = call_reads;
        props.writes = call_writes;
        linked += 1;
    }
    let props = tree.props_mut(stream);
    props.reads = reads;
    props.writes = writes;
    linked
}

// ── Domains ──────────────────────────────────────────────────────────────

fn is_platform_call(tree: &Tree, call: NodeId) -> bool {
    tree.props(call)
        .declaration
        .is_some_and(|d| tree.object_type(d) == Some(&ObjectType::PlatformModule))
}

/// Walk top-level streams in statement order, caching each call site's
/// domain. Platform-module domains that have a `parentDomain` receive an
/// instance index from the parent's counter the first time they are seen.
fn propagate_domains(tree: &mut Tree, stats: &mut AnnotateStats) {
    let streams: Vec<NodeId> = tree
        .statements()
        .iter()
        .copied()
        .filter(|&s| matches!(tree.kind(s), NodeKind::Stream { .. }))
        .collect();
    let mut assigned: HashMap<NodeId, u32> = HashMap::new();
    for stream in streams {
        let mut current: Option<DomainRef> = None;
        for member in tree.stream_members(stream) {
            let is_call = matches!(tree.kind(member), NodeKind::Function { .. });
            if is_call && tree.props(member).domain.is_none() {
                let own = get_node_domain(member, &[], tree);
                let domain = match own {
                    Some(mut d) if is_platform_call(tree, member) => {
                        if let Some(instance) = instance_for(tree, &d, &mut assigned) {
                            d.instance = Some(instance);
                            stats.instances += 1;
                        }
                        Some(d)
                    }
                    Some(d) => Some(d),
                    None => current.clone(),
                };
                if domain.is_some() {
                    stats.domains += 1;
                }
                tree.props_mut(member).domain = domain;
            }
            if let Some(d) = get_node_domain(member, &[], tree) {
                current = Some(d);
            }
        }
    }
}

fn instance_for(tree: &mut Tree, domain: &DomainRef, assigned: &mut HashMap<NodeId, u32>) -> Option<u32> {
    let def = get_domain_declaration(domain, &[], tree)?;
    if let Some(&instance) = assigned.get(&def) {
        return Some(instance);
    }
    let parent_name = tree.property(def, "parentDomain").and_then(|p| tree.reference_name(p))?;
    let parent = get_domain_declaration(&DomainRef::new(parent_name), &[], tree)?;
    let instance = tree.props(parent).instances;
    tree.props_mut(parent).instances += 1;
    assigned.insert(def, instance);
    Some(instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::get_node_domain_name;
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

    #[test]
    fn caches_declarations_with_module_scopes() {
        let mut t = tree(
            "signal X {}\n\
             module M {\n\
               ports: [ mainOutputPort Output { block: X } ]\n\
               blocks: [ signal X {} ]\n\
               streams: [ X >> X; ]\n\
             }\n\
             X >> Missing;",
        );
        let stats = annotate(&mut t);
        assert_eq!(stats.unresolved, 1);
        let module = decl(&t, "M");
        let inner_x = t.module_blocks(module)[0];
        let inner_stream = t.module_streams(module)[0];
        for member in t.stream_members(inner_stream) {
            assert_eq!(t.props(member).declaration, Some(inner_x));
        }
        let top = t.stream_members(t.statements()[2])[0];
        assert_eq!(t.props(top).declaration, Some(decl(&t, "X")));
    }

    #[test]
    fn links_calls_and_records_reads_writes() {
        let mut t = tree("module F {}\nA >> F() >> B >> C;");
        let stats = annotate(&mut t);
        assert_eq!(stats.connections, 1);
        let stream = t.statements()[1];
        let members = t.stream_members(stream);
        let call = t.props(members[1]);
        assert_eq!(call.input_block, Some(members[0]));
        assert_eq!(call.output_block, Some(members[2]));
        assert_eq!(call.reads, vec!["A".to_string()]);
        assert_eq!(call.writes, vec!["B".to_string()]);
        assert_eq!(t.props(stream).reads, vec!["A", "B"]);
        assert_eq!(t.props(stream).writes, vec!["B", "C"]);
    }

    #[test]
    fn propagates_domains_into_domainless_calls() {
        let mut t = tree(
            "_domainDefinition AudioDomain { rate: 44100 }\n\
             signal In { domain: AudioDomain }\n\
             module Gain {}\n\
             In >> Gain() >> Gain() >> Out;",
        );
        let stats = annotate(&mut t);
        assert_eq!(stats.domains, 2);
        let members = t.stream_members(t.statements()[3]);
        for &call in &members[1..3] {
            assert_eq!(
                get_node_domain_name(call, &[], &t).as_deref(),
                Some("AudioDomain")
            );
        }
    }

    #[test]
    fn platform_instances_follow_sibling_order() {
        let mut t = tree(
            "_domainDefinition Network {}\n\
             _domainDefinition OSCDomain { parentDomain: Network }\n\
             _domainDefinition MIDIDomain { parentDomain: Network }\n\
             platformModule OscOut { domain: OSCDomain }\n\
             platformModule MidiOut { domain: MIDIDomain }\n\
             A >> MidiOut();\n\
             B >> OscOut();\n\
             C >> MidiOut();",
        );
        let stats = annotate(&mut t);
        assert_eq!(stats.instances, 3);
        let call = |i: usize| t.stream_members(t.statements()[i])[1];
        assert_eq!(get_node_domain_name(call(5), &[], &t).as_deref(), Some("MIDIDomain:0"));
        assert_eq!(get_node_domain_name(call(6), &[], &t).as_deref(), Some("OSCDomain:1"));
        assert_eq!(get_node_domain_name(call(7), &[], &t).as_deref(), Some("MIDIDomain:0"));
        assert_eq!(t.props(decl(&t, "Network")).instances, 2);
    }

    #[test]
    fn root_domains_have_no_instance() {
        let mut t = tree(
            "_domainDefinition AudioDomain {}\n\
             platformModule AudioIn { domain: AudioDomain }\n\
             platformModule AudioOut { domain: AudioDomain }\n\
             AudioIn() >> AudioOut();",
        );
        annotate(&mut t);
        let stream = t.statements()[3];
        assert_eq!(get_node_domain_name(stream, &[], &t).as_deref(), Some("AudioDomain"));
    }
}
