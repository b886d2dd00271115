// scope.rs — Scope stacks and declaration lookup
//
// Resolves possibly namespace-qualified names to declarations. A scope stack
// is a slice of frames, innermost last; lookups scan frames innermost to
// outermost, then the tree's top-level statements. Walking outward is done by
// passing a shorter slice, so a caller's stack is never mutated.
//
// Preconditions: `tree` statements carry `framework`/`namespace_tree`
//   annotations for injected declarations.
// Postconditions: lookups are pure.
// Failure modes: unresolved names yield `None`/empty results, never errors.
// Side effects: none.

use crate::ast::{NodeKind, Tree};
use crate::id::NodeId;
use crate::object_type::ObjectType;

/// Recursion limit for resolution walks that follow declaration references
/// (constant chains, port-property indirections, nested module calls).
pub const MAX_RESOLVE_DEPTH: usize = 64;

/// One level of a scope stack: the node that owns it and the declarations
/// visible inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeFrame {
    pub owner: NodeId,
    pub members: Vec<NodeId>,
}

impl ScopeFrame {
    pub fn new(owner: NodeId, members: Vec<NodeId>) -> Self {
        ScopeFrame { owner, members }
    }

    /// Frame for the body of `module`, owned by `owner` (the module
    /// declaration itself or a call site of it). Members are the module's
    /// internal blocks followed by its ports.
    pub fn for_module(tree: &Tree, owner: NodeId, module: NodeId) -> Self {
        let mut members = tree.module_blocks(module);
        members.extend(tree.module_ports(module));
        ScopeFrame { owner, members }
    }
}

/// `scope` extended with one more frame.
pub fn push_frame(scope: &[ScopeFrame], frame: ScopeFrame) -> Vec<ScopeFrame> {
    let mut out = Vec::with_capacity(scope.len() + 1);
    out.extend_from_slice(scope);
    out.push(frame);
    out
}

/// Split `A::B::name` into (`["A", "B"]`, `"name"`).
pub fn split_qualified(name: &str) -> (Vec<String>, &str) {
    let mut segments: Vec<&str> = name.split("::").collect();
    let symbol = segments.pop().unwrap_or("");
    (segments.into_iter().map(String::from).collect(), symbol)
}

/// Framework filter for lookups made from the program itself.
pub fn program_framework(tree: &Tree) -> Option<&str> {
    match tree.framework() {
        "" => None,
        fw => Some(fw),
    }
}

// ── Namespace matching ───────────────────────────────────────────────────

/// Effective namespace of `decl` as seen from `framework`: the declaration's
/// own framework (omitted when empty or equal to `framework`) followed by
/// its `namespace_tree`.
pub fn effective_namespace(tree: &Tree, decl: NodeId, framework: Option<&str>) -> Vec<String> {
    let props = tree.props(decl);
    let mut ns = Vec::with_capacity(props.namespace_tree.len() + 1);
    if !props.framework.is_empty() && framework != Some(props.framework.as_str()) {
        ns.push(props.framework.clone());
    }
    ns.extend(props.namespace_tree.iter().cloned());
    ns
}

pub fn namespace_match(
    tree: &Tree,
    decl: NodeId,
    namespace: &[String],
    framework: Option<&str>,
) -> bool {
    effective_namespace(tree, decl, framework) == namespace
}

// ── Lookup core ──────────────────────────────────────────────────────────

fn candidates<'a>(scope: &'a [ScopeFrame], tree: &'a Tree) -> impl Iterator<Item = NodeId> + 'a {
    scope
        .iter()
        .rev()
        .flat_map(|frame| frame.members.iter().copied())
        .chain(tree.declarations())
}

fn find_first(
    scope: &[ScopeFrame],
    tree: &Tree,
    namespace: &[String],
    framework: Option<&str>,
    matches: &dyn Fn(NodeId) -> bool,
) -> Option<NodeId> {
    let lookup = |fw: Option<&str>| {
        candidates(scope, tree).find(|&d| matches(d) && namespace_match(tree, d, namespace, fw))
    };
    // Unconditional retry without the framework filter. Preserved looseness:
    // can surface a declaration that is ambiguous across frameworks.
    lookup(framework).or_else(|| match framework {
        Some(fw) if !fw.is_empty() => lookup(None),
        _ => None,
    })
}

/// Requested namespace for `name`: `namespace` followed by the qualifier
/// segments of `name`.
fn requested_namespace<'n>(name: &'n str, namespace: &[String]) -> (Vec<String>, &'n str) {
    let (qualifiers, symbol) = split_qualified(name);
    let mut requested = namespace.to_vec();
    requested.extend(qualifiers);
    (requested, symbol)
}

// ── Public lookups ───────────────────────────────────────────────────────

/// Find the declaration named `name` (possibly `::`-qualified).
pub fn find_declaration_by_name(
    name: &str,
    scope: &[ScopeFrame],
    tree: &Tree,
    namespace: &[String],
    framework: Option<&str>,
) -> Option<NodeId> {
    let (requested, symbol) = requested_namespace(name, namespace);
    find_first(scope, tree, &requested, framework, &|d| {
        tree.decl_name(d) == Some(symbol)
    })
}

/// Every declaration named `name`, innermost first.
pub fn find_all_declarations(
    name: &str,
    scope: &[ScopeFrame],
    tree: &Tree,
    namespace: &[String],
    framework: Option<&str>,
) -> Vec<NodeId> {
    let (requested, symbol) = requested_namespace(name, namespace);
    let gather = |fw: Option<&str>| -> Vec<NodeId> {
        candidates(scope, tree)
            .filter(|&d| tree.decl_name(d) == Some(symbol) && namespace_match(tree, d, &requested, fw))
            .collect()
    };
    let found = gather(framework);
    match framework {
        Some(fw) if found.is_empty() && !fw.is_empty() => gather(None),
        _ => found,
    }
}

/// Find the type declaration for `name`: a declaration whose `typeName`
/// property equals the symbol, or a module/platformModule named `name`.
pub fn find_type_declaration_by_name(
    name: &str,
    scope: &[ScopeFrame],
    tree: &Tree,
    namespace: &[String],
    framework: Option<&str>,
) -> Option<NodeId> {
    let (requested, symbol) = requested_namespace(name, namespace);
    find_first(scope, tree, &requested, framework, &|d| {
        let by_type_name = tree
            .property(d, "typeName")
            .and_then(|v| tree.string_value(v))
            .is_some_and(|t| t == symbol);
        let by_module_name = tree.object_type(d).is_some_and(|t| t.is_module_like())
            && tree.decl_name(d) == Some(symbol);
        by_type_name || by_module_name
    })
}

/// Find a `_domainDefinition` named `name`.
pub fn find_domain_declaration(
    name: &str,
    scope: &[ScopeFrame],
    tree: &Tree,
    namespace: &[String],
    framework: Option<&str>,
) -> Option<NodeId> {
    let (requested, symbol) = requested_namespace(name, namespace);
    find_first(scope, tree, &requested, framework, &|d| {
        tree.decl_name(d) == Some(symbol)
            && tree.object_type(d) == Some(&ObjectType::DomainDefinition)
    })
}

/// Declaration a `Block`/`Bundle`/`Function` node refers to. Uses the
/// cached `declaration` annotation when present.
pub fn resolve_reference(tree: &Tree, scope: &[ScopeFrame], node: NodeId) -> Option<NodeId> {
    if let Some(decl) = tree.props(node).declaration {
        return Some(decl);
    }
    let name = tree.name_ref(node)?;
    find_declaration_by_name(
        &name.to_string(),
        scope,
        tree,
        &[],
        program_framework(tree),
    )
}

// ── Port bindings ────────────────────────────────────────────────────────

/// What a name inside a module body is connected to across the call
/// boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum PortBinding<'s> {
    /// The port is bound at the call site to `node`, which must be resolved
    /// in the `outer` scope.
    Connected {
        node: NodeId,
        outer: &'s [ScopeFrame],
    },
    /// The name is a port, but nothing is bound to it.
    Unconnected { port: NodeId },
    /// The name is not a port of the enclosing module.
    NotAPort,
}

/// Port of `module` named `name`, or whose `block` property names `name`.
pub fn find_module_port(tree: &Tree, module: NodeId, name: &str) -> Option<NodeId> {
    tree.module_ports(module).into_iter().find(|&port| {
        tree.decl_name(port) == Some(name)
            || tree
                .property(port, "block")
                .and_then(|b| tree.reference_name(b))
                .is_some_and(|b| b == name)
    })
}

/// Module declaration whose body the innermost frame describes.
pub fn frame_module(tree: &Tree, scope: &[ScopeFrame]) -> Option<NodeId> {
    let (frame, outer) = scope.split_last()?;
    match tree.kind(frame.owner) {
        NodeKind::Function { .. } => resolve_reference(tree, outer, frame.owner),
        NodeKind::Declaration(_) if tree.object_type(frame.owner).is_some_and(|t| t.is_module_like()) => {
            Some(frame.owner)
        }
        _ => None,
    }
}

/// Resolve `name` (inside the innermost frame's module body) to whatever is
/// connected to the matching port at the call site.
pub fn resolve_port_binding<'s>(
    tree: &Tree,
    scope: &'s [ScopeFrame],
    name: &str,
) -> PortBinding<'s> {
    let Some((frame, outer)) = scope.split_last() else {
        return PortBinding::NotAPort;
    };
    let Some(module) = frame_module(tree, scope) else {
        return PortBinding::NotAPort;
    };
    let Some(port) = find_module_port(tree, module, name) else {
        return PortBinding::NotAPort;
    };
    let call = frame.owner;
    if !matches!(tree.kind(call), NodeKind::Function { .. }) {
        return PortBinding::Unconnected { port };
    }
    let bound = match tree.object_type(port) {
        Some(ObjectType::MainInputPort) => tree.props(call).input_block,
        Some(ObjectType::MainOutputPort) => tree.props(call).output_block,
        _ => tree
            .decl_name(port)
            .and_then(|port_name| tree.property(call, port_name)),
    };
    match bound {
        Some(node) => PortBinding::Connected { node, outer },
        None => PortBinding::Unconnected { port },
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

    fn decl_named(tree: &Tree, name: &str) -> NodeId {
        tree.declarations()
            .find(|&d| tree.decl_name(d) == Some(name))
            .expect("declaration")
    }

    #[test]
    fn global_lookup() {
        let t = tree("signal A {}\nsignal B {}");
        let b = decl_named(&t, "B");
        assert_eq!(find_declaration_by_name("B", &[], &t, &[], None), Some(b));
        assert_eq!(find_declaration_by_name("C", &[], &t, &[], None), None);
    }

    #[test]
    fn innermost_frame_shadows_global() {
        let t = tree(
            "signal X {}\n\
             module M { blocks: [ signal X { rate: 1 } ] }",
        );
        let global_x = decl_named(&t, "X");
        let module = decl_named(&t, "M");
        let inner_x = t.module_blocks(module)[0];
        let frame = ScopeFrame::for_module(&t, module, module);
        assert_eq!(
            find_declaration_by_name("X", &[frame], &t, &[], None),
            Some(inner_x)
        );
        assert_eq!(find_declaration_by_name("X", &[], &t, &[], None), Some(global_x));
    }

    #[test]
    fn qualified_name_matches_namespace_tree() {
        let mut t = tree("signal Gain {}");
        let gain = decl_named(&t, "Gain");
        t.props_mut(gain).namespace_tree = vec!["Lib".to_string()];
        assert_eq!(find_declaration_by_name("Gain", &[], &t, &[], None), None);
        assert_eq!(
            find_declaration_by_name("Lib::Gain", &[], &t, &[], None),
            Some(gain)
        );
        let ns = vec!["Lib".to_string()];
        assert_eq!(find_declaration_by_name("Gain", &[], &t, &ns, None), Some(gain));
    }

    #[test]
    fn same_framework_strips_prefix() {
        let mut t = tree("signal Osc {}");
        let osc = decl_named(&t, "Osc");
        t.props_mut(osc).framework = "Gamma".to_string();
        assert_eq!(
            find_declaration_by_name("Osc", &[], &t, &[], Some("Gamma")),
            Some(osc)
        );
        assert_eq!(find_declaration_by_name("Osc", &[], &t, &[], Some("Other")), None);
        assert_eq!(
            find_declaration_by_name("Gamma::Osc", &[], &t, &[], Some("Other")),
            Some(osc)
        );
    }

    #[test]
    fn framework_filter_retries_without_framework() {
        let mut t = tree("signal Osc {}");
        let osc = decl_named(&t, "Osc");
        t.props_mut(osc).framework = "Gamma".to_string();
        // With the filter the prefix is stripped, so the qualified form only
        // matches on the unfiltered retry.
        assert_eq!(
            find_declaration_by_name("Gamma::Osc", &[], &t, &[], Some("Gamma")),
            Some(osc)
        );
    }

    #[test]
    fn find_all_returns_every_match() {
        let t = tree(
            "signal X {}\n\
             module M { blocks: [ signal X {} ] }",
        );
        let module = decl_named(&t, "M");
        let frame = ScopeFrame::for_module(&t, module, module);
        let all = find_all_declarations("X", &[frame], &t, &[], None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], t.module_blocks(module)[0]);
    }

    #[test]
    fn type_lookup_by_type_name_and_module_name() {
        let t = tree(
            "type OscSenderType { typeName: \"oscSender\" }\n\
             module Filter {}\n\
             signal Filter2 {}",
        );
        let ty = decl_named(&t, "OscSenderType");
        let filter = decl_named(&t, "Filter");
        assert_eq!(
            find_type_declaration_by_name("oscSender", &[], &t, &[], None),
            Some(ty)
        );
        assert_eq!(
            find_type_declaration_by_name("Filter", &[], &t, &[], None),
            Some(filter)
        );
        assert_eq!(find_type_declaration_by_name("Filter2", &[], &t, &[], None), None);
    }

    #[test]
    fn domain_lookup_restricted_to_domain_definitions() {
        let t = tree("signal Audio {}\n_domainDefinition AudioDomain { rate: 44100 }");
        let dom = decl_named(&t, "AudioDomain");
        assert_eq!(
            find_domain_declaration("AudioDomain", &[], &t, &[], None),
            Some(dom)
        );
        assert_eq!(find_domain_declaration("Audio", &[], &t, &[], None), None);
    }

    #[test]
    fn port_binding_through_call() {
        let mut t = tree(
            "module M {\n\
               ports: [ mainInputPort Input { block: In }, mainOutputPort Output { block: Out },\n\
                        propertyInputPort Gain {} ]\n\
               blocks: [ signal In {}, signal Out {} ]\n\
             }\n\
             A >> M(Gain: 2) >> B;",
        );
        let module = decl_named(&t, "M");
        let stream = t.statements()[1];
        let members = t.stream_members(stream);
        let call = members[1];
        t.props_mut(call).input_block = Some(members[0]);
        t.props_mut(call).output_block = Some(members[2]);

        let scope = vec![ScopeFrame::for_module(&t, call, module)];
        assert_eq!(
            resolve_port_binding(&t, &scope, "Out"),
            PortBinding::Connected {
                node: members[2],
                outer: &[]
            }
        );
        assert_eq!(
            resolve_port_binding(&t, &scope, "Input"),
            PortBinding::Connected {
                node: members[0],
                outer: &[]
            }
        );
        let gain_value = t.property(call, "Gain").expect("Gain");
        assert_eq!(
            resolve_port_binding(&t, &scope, "Gain"),
            PortBinding::Connected {
                node: gain_value,
                outer: &[]
            }
        );
        assert_eq!(resolve_port_binding(&t, &scope, "Nope"), PortBinding::NotAPort);
    }

    #[test]
    fn port_binding_in_module_definition_is_unconnected() {
        let t = tree(
            "module M {\n\
               ports: [ mainOutputPort Output { block: Out } ]\n\
               blocks: [ signal Out {} ]\n\
             }",
        );
        let module = decl_named(&t, "M");
        let port = t.module_ports(module)[0];
        let scope = vec![ScopeFrame::for_module(&t, module, module)];
        assert_eq!(
            resolve_port_binding(&t, &scope, "Output"),
            PortBinding::Unconnected { port }
        );
    }

    #[test]
    fn split_qualified_names() {
        let (scope, name) = split_qualified("A::B::x");
        assert_eq!(scope, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(name, "x");
        let (scope, name) = split_qualified("x");
        assert!(scope.is_empty());
        assert_eq!(name, "x");
    }
}
