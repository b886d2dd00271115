// inject.rs — Library/framework declaration injection and default filling
//
// Pulls every declaration a program transitively needs out of the importable
// sets and appends it to the program tree: referenced blocks, modules and
// domains, the type declarations of extension object types and their
// inherited-type chains, and whatever those declarations reference in turn.
// `fill_default_properties` then copies declared `default` values into
// declarations and calls that omit them.
//
// Preconditions: importable framework sets are flattened (`Registry::resolve`).
// Postconditions: after `inject_program`, every reference that some
//   importable set can satisfy resolves inside the program tree.
// Failure modes: references no set provides are left for validation.
// Side effects: appends statements to the tree; sets properties.

use tracing::debug;

use crate::ast::{Literal, NodeKind, Tree};
use crate::id::NodeId;
use crate::inherit::get_inherited_ports;
use crate::object_type::ObjectType;
use crate::registry::Importable;
use crate::scope::{
    find_declaration_by_name, find_type_declaration_by_name, program_framework, push_frame,
    split_qualified, ScopeFrame,
};

/// Lookup context of the declaration currently being walked.
#[derive(Debug, Clone)]
struct Context {
    namespace: Vec<String>,
    framework: Option<String>,
}

impl Context {
    fn of(tree: &Tree, decl: NodeId, fallback: Option<&str>) -> Self {
        let props = tree.props(decl);
        Context {
            namespace: props.namespace_tree.clone(),
            framework: match props.framework.as_str() {
                "" => fallback.map(String::from),
                fw => Some(fw.to_string()),
            },
        }
    }
}

/// Find `name` in the importable sets. Returns the set and the declaration
/// inside the set's own tree.
fn find_importable<'r>(
    name: &str,
    namespace: &[String],
    importables: &'r [Importable<'r>],
    framework: Option<&str>,
    by_type: bool,
) -> Option<(&'r Importable<'r>, NodeId)> {
    let (qualifiers, symbol) = split_qualified(name);
    let mut requested = namespace.to_vec();
    requested.extend(qualifiers);
    importables.iter().find_map(|imp| {
        let rest = requested.strip_prefix(imp.namespace.as_slice())?;
        let tree = &imp.set.tree;
        let found = if by_type {
            find_type_declaration_by_name(symbol, &[], tree, rest, framework)
        } else {
            find_declaration_by_name(symbol, &[], tree, rest, framework)
        };
        found.map(|decl| (imp, decl))
    })
}

/// Copy `decl` from an importable set into `tree`, reachable under the
/// importable's namespace.
fn adopt(tree: &mut Tree, importable: &Importable<'_>, decl: NodeId) -> NodeId {
    let id = tree.import_subtree(&importable.set.tree, decl);
    if !importable.namespace.is_empty() {
        let props = tree.props_mut(id);
        let mut namespace = importable.namespace.clone();
        namespace.extend(props.namespace_tree.drain(..));
        props.namespace_tree = namespace;
    }
    tree.push_statement(id);
    debug!(
        name = ?tree.decl_name(id),
        from = %importable.set.name,
        "declaration injected"
    );
    id
}

struct Injector<'a, 'r> {
    importables: &'a [Importable<'r>],
    inserted: usize,
}

impl<'a, 'r> Injector<'a, 'r> {
    fn visit(&mut self, node: NodeId, tree: &mut Tree, scope: &[ScopeFrame], ctx: &Context) {
        if let Some(name) = tree.name_ref(node).map(|n| n.to_string()) {
            self.require(&name, tree, scope, ctx);
        }
        if let Some(domain) = string_domain(tree, node) {
            self.require(&domain, tree, scope, ctx);
        }
        if tree.decl(node).is_some() {
            self.dependent_types(node, tree, ctx);
        }
        let is_module = tree.object_type(node).is_some_and(|t| t.is_module_like());
        let inner;
        let scope = if is_module {
            inner = push_frame(scope, ScopeFrame::for_module(tree, node, node));
            &inner[..]
        } else {
            scope
        };
        for child in tree.children(node) {
            self.visit(child, tree, scope, ctx);
        }
    }

    /// Insert the declaration `name` unless it already resolves.
    fn require(&mut self, name: &str, tree: &mut Tree, scope: &[ScopeFrame], ctx: &Context) -> bool {
        let framework = ctx.framework.as_deref();
        if find_declaration_by_name(name, scope, tree, &ctx.namespace, framework).is_some()
            || find_declaration_by_name(name, scope, tree, &[], framework).is_some()
        {
            return false;
        }
        let importables = self.importables;
        let Some((importable, decl)) = find_importable(name, &ctx.namespace, importables, framework, false)
            .or_else(|| find_importable(name, &[], importables, framework, false))
        else {
            return false;
        };
        let id = adopt(tree, importable, decl);
        self.inserted += 1;
        let inner_ctx = Context::of(tree, id, framework);
        self.visit(id, tree, &[], &inner_ctx);
        true
    }

    /// Insert the type declaration of `decl`'s object type, then the types
    /// it inherits from.
    fn dependent_types(&mut self, decl: NodeId, tree: &mut Tree, ctx: &Context) {
        let Some(ObjectType::Extension(type_name)) = tree.object_type(decl).cloned() else {
            return;
        };
        self.require_type(&type_name, tree, ctx);
    }

    fn require_type(&mut self, type_name: &str, tree: &mut Tree, ctx: &Context) {
        let framework = ctx.framework.as_deref();
        if find_type_declaration_by_name(type_name, &[], tree, &ctx.namespace, framework).is_some()
            || find_type_declaration_by_name(type_name, &[], tree, &[], framework).is_some()
        {
            return;
        }
        let importables = self.importables;
        let Some((importable, decl)) =
            find_importable(type_name, &ctx.namespace, importables, framework, true)
                .or_else(|| find_importable(type_name, &[], importables, framework, true))
        else {
            debug!(type_name, "type declaration not found in any importable set");
            return;
        };
        let id = adopt(tree, importable, decl);
        self.inserted += 1;
        let type_ctx = Context::of(tree, id, framework);
        // Inherited types resolve by declaration name, as `inherits` names them.
        for parent in inherited_names(tree, id) {
            self.require(&parent, tree, &[], &type_ctx);
        }
        self.visit(id, tree, &[], &type_ctx);
    }
}

/// Domain named by a string-valued `domain` property (`domain: "AudioDomain"`).
fn string_domain(tree: &Tree, node: NodeId) -> Option<String> {
    let NodeKind::Property { name, value } = tree.kind(node) else {
        return None;
    };
    match (name.as_str(), tree.kind(*value)) {
        ("domain", NodeKind::Value(Literal::String(text))) => Some(text.clone()),
        _ => None,
    }
}

fn inherited_names(tree: &Tree, decl: NodeId) -> Vec<String> {
    let Some(inherits) = tree.property(decl, "inherits") else {
        return Vec::new();
    };
    let items = match tree.kind(inherits) {
        NodeKind::List(items) => items.clone(),
        _ => vec![inherits],
    };
    items
        .into_iter()
        .filter_map(|item| tree.reference_name(item).map(String::from))
        .collect()
}

/// Insert every declaration `node` transitively requires. Returns the number
/// of inserted declarations.
pub fn insert_required_objects_for_node(
    node: NodeId,
    importables: &[Importable<'_>],
    tree: &mut Tree,
    framework: Option<&str>,
) -> usize {
    let mut injector = Injector {
        importables,
        inserted: 0,
    };
    let ctx = match tree.decl(node) {
        Some(_) => Context::of(tree, node, framework),
        None => Context {
            namespace: Vec::new(),
            framework: framework.map(String::from),
        },
    };
    injector.visit(node, tree, &[], &ctx);
    injector.inserted
}

/// Insert the type declaration of `decl` and its inherited-type chain.
pub fn insert_dependent_types(
    decl: NodeId,
    importables: &[Importable<'_>],
    tree: &mut Tree,
    framework: Option<&str>,
) -> usize {
    let mut injector = Injector {
        importables,
        inserted: 0,
    };
    let ctx = Context::of(tree, decl, framework);
    injector.dependent_types(decl, tree, &ctx);
    injector.inserted
}

/// Insert the declaration named `name` (and what it requires) unless the
/// program already declares it.
pub fn insert_required_object(
    name: &str,
    importables: &[Importable<'_>],
    tree: &mut Tree,
    framework: Option<&str>,
) -> bool {
    let mut injector = Injector {
        importables,
        inserted: 0,
    };
    let ctx = Context {
        namespace: Vec::new(),
        framework: framework.map(String::from),
    };
    injector.require(name, tree, &[], &ctx)
}

/// Injection pass over every program statement.
#[tracing::instrument(level = "debug", skip_all)]
pub fn inject_program(tree: &mut Tree, importables: &[Importable<'_>]) -> usize {
    let framework = program_framework(tree).map(String::from);
    let statements = tree.statements().to_vec();
    let inserted = statements
        .into_iter()
        .map(|s| insert_required_objects_for_node(s, importables, tree, framework.as_deref()))
        .sum();
    debug!(inserted, "injection complete");
    inserted
}

// ── Default properties ───────────────────────────────────────────────────

pub(crate) fn type_of(tree: &Tree, decl: NodeId) -> Option<NodeId> {
    let object_type = tree.object_type(decl)?;
    if !object_type.is_extension() {
        return None;
    }
    let props = tree.props(decl);
    let framework = match props.framework.as_str() {
        "" => program_framework(tree),
        fw => Some(fw),
    };
    find_type_declaration_by_name(object_type.as_str(), &[], tree, &props.namespace_tree, framework)
        .or_else(|| find_type_declaration_by_name(object_type.as_str(), &[], tree, &[], framework))
}

/// `(name, default)` pairs declared by `ports` that `owner` lacks.
fn missing_defaults(tree: &Tree, owner: NodeId, ports: &[NodeId]) -> Vec<(String, NodeId)> {
    ports
        .iter()
        .filter_map(|&port| {
            let name = tree.decl_name(port)?;
            let default = tree.property(port, "default")?;
            (!tree.has_property(owner, name)).then(|| (name.to_string(), default))
        })
        .collect()
}

fn collect_calls(tree: &Tree, node: NodeId, out: &mut Vec<NodeId>) {
    if matches!(tree.kind(node), NodeKind::Function { .. }) {
        out.push(node);
    }
    for child in tree.children(node) {
        collect_calls(tree, child, out);
    }
}

fn collect_declarations(tree: &Tree, decl: NodeId, out: &mut Vec<NodeId>) {
    out.push(decl);
    if tree.object_type(decl).is_some_and(|t| t.is_module_like()) {
        for block in tree.module_blocks(decl) {
            collect_declarations(tree, block, out);
        }
    }
}

/// Copy declared `default` values into declarations (from their type's
/// inherited ports and properties) and calls (from the callee's property
/// input ports). Returns the number of properties filled.
#[tracing::instrument(level = "debug", skip_all)]
pub fn fill_default_properties(tree: &mut Tree) -> usize {
    let mut pending: Vec<(NodeId, String, NodeId)> = Vec::new();

    let mut decls = Vec::new();
    for decl in tree.declarations() {
        collect_declarations(tree, decl, &mut decls);
    }
    for decl in decls {
        let Some(ty) = type_of(tree, decl) else {
            continue;
        };
        let ports = get_inherited_ports(ty, &[], tree);
        for (name, default) in missing_defaults(tree, decl, &ports) {
            pending.push((decl, name, default));
        }
    }

    let mut calls = Vec::new();
    for &statement in tree.statements() {
        collect_calls(tree, statement, &mut calls);
    }
    for call in calls {
        let Some(name) = tree.name_ref(call).map(|n| n.to_string()) else {
            continue;
        };
        let framework = program_framework(tree);
        let Some(callee) = tree
            .props(call)
            .declaration
            .or_else(|| find_declaration_by_name(&name, &[], tree, &[], framework))
        else {
            continue;
        };
        let ports: Vec<NodeId> = get_inherited_ports(callee, &[], tree)
            .into_iter()
            .filter(|&p| tree.object_type(p) == Some(&ObjectType::PropertyInputPort))
            .collect();
        for (name, default) in missing_defaults(tree, call, &ports) {
            pending.push((call, name, default));
        }
    }

    let filled = pending.len();
    for (owner, name, default) in pending {
        let copy = tree.clone_subtree(default);
        tree.set_property(owner, &name, copy);
    }
    debug!(filled, "default properties filled");
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::registry::Registry;

    fn tree(source: &str) -> Tree {
        let result = parse(source);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        result.tree
    }

    fn names(tree: &Tree) -> Vec<String> {
        tree.declarations()
            .filter_map(|d| tree.decl_name(d).map(String::from))
            .collect()
    }

    const LIB: &str = "constant Scale { value: 2 }\n\
         module Gain { ports: [ propertyInputPort gain { default: Scale } ] }\n\
         signal Unused {}";

    #[test]
    fn injects_referenced_and_transitive_declarations() {
        let mut reg = Registry::new();
        reg.load_library("Lib", LIB).expect("lib");
        let mut program = tree("import Lib\nIn >> Gain() >> Out;");
        let importables = reg.importables_for(&program).expect("importables");
        let inserted = inject_program(&mut program, &importables);
        assert_eq!(inserted, 2);
        assert_eq!(names(&program), vec!["Gain", "Scale"]);
    }

    #[test]
    fn aliased_imports_are_qualified() {
        let mut reg = Registry::new();
        reg.load_library("Lib", LIB).expect("lib");
        let mut program = tree("import Lib as L\nIn >> L::Gain() >> Out;\nIn >> Gain() >> Out;");
        let importables = reg.importables_for(&program).expect("importables");
        inject_program(&mut program, &importables);
        let gain = program
            .declarations()
            .find(|&d| program.decl_name(d) == Some("Gain"))
            .expect("Gain");
        assert_eq!(program.props(gain).namespace_tree, vec!["L".to_string()]);
        let scale = program
            .declarations()
            .find(|&d| program.decl_name(d) == Some("Scale"))
            .expect("Scale");
        assert_eq!(program.props(scale).namespace_tree, vec!["L".to_string()]);
        // The unqualified call finds nothing outside the alias.
        assert_eq!(names(&program).len(), 2);
    }

    #[test]
    fn existing_declarations_are_not_replaced() {
        let mut reg = Registry::new();
        reg.load_library("Lib", LIB).expect("lib");
        let mut program = tree("import Lib\nconstant Scale { value: 5 }\nIn >> Gain() >> Out;");
        let importables = reg.importables_for(&program).expect("importables");
        assert_eq!(inject_program(&mut program, &importables), 1);
        assert_eq!(names(&program), vec!["Scale", "Gain"]);
    }

    #[test]
    fn framework_members_and_domains() {
        let mut reg = Registry::new();
        reg.load_framework(
            "_frameworkDescription Gamma { version: 1.0 }\n\
             _domainDefinition AudioDomain { rate: 44100 }\n\
             platformModule Osc { domain: AudioDomain }",
            "gamma",
        )
        .expect("gamma");
        reg.resolve().expect("resolve");
        let mut program = tree("use Gamma version 1.0\nOsc() >> Out;");
        let importables = reg.importables_for(&program).expect("importables");
        inject_program(&mut program, &importables);
        assert_eq!(names(&program), vec!["Osc", "AudioDomain"]);
        let osc = program.declarations().next().expect("Osc");
        assert_eq!(program.props(osc).framework, "Gamma");
    }

    #[test]
    fn string_domain_property_injects_definition() {
        let mut reg = Registry::new();
        reg.load_library(
            "Domains",
            "_domainDefinition AudioDomain { rate: 44100 }\n_domainDefinition Spare {}",
        )
        .expect("domains");
        let mut program = tree("import Domains\nsignal S { domain: \"AudioDomain\" }");
        let importables = reg.importables_for(&program).expect("importables");
        assert_eq!(inject_program(&mut program, &importables), 1);
        assert_eq!(names(&program), vec!["S", "AudioDomain"]);
    }

    #[test]
    fn dependent_types_and_their_parents() {
        let mut reg = Registry::new();
        reg.load_library(
            "Types",
            "type Base { typeName: \"baseThing\", properties: [ typeProperty bias { default: 0 } ] }\n\
             type Sender { typeName: \"oscSender\", inherits: [Base],\n\
                           properties: [ typeProperty port { default: 9000 } ] }",
        )
        .expect("types");
        let mut program = tree("import Types\noscSender Out {}");
        let importables = reg.importables_for(&program).expect("importables");
        let out = program.declarations().next().expect("Out");
        assert_eq!(insert_dependent_types(out, &importables, &mut program, None), 2);
        assert_eq!(names(&program), vec!["Out", "Sender", "Base"]);

        assert_eq!(fill_default_properties(&mut program), 2);
        assert_eq!(program.render(out), "oscSender Out { bias: 0, port: 9000 }");
    }

    #[test]
    fn call_defaults_from_callee_ports() {
        let mut program = tree(
            "module Gain { ports: [ propertyInputPort gain { default: 1.5 },\n\
                                   propertyInputPort bias { default: 0 } ] }\n\
             In >> Gain(bias: 3) >> Out;",
        );
        assert_eq!(fill_default_properties(&mut program), 1);
        let call = program.stream_members(program.statements()[1])[1];
        assert_eq!(program.render(call), "Gain(bias: 3, gain: 1.5)");
    }

    #[test]
    fn insert_by_name() {
        let mut reg = Registry::new();
        reg.load_library("Lib", LIB).expect("lib");
        let mut program = tree("import Lib");
        let importables = reg.importables_for(&program).expect("importables");
        assert!(insert_required_object("Unused", &importables, &mut program, None));
        assert!(!insert_required_object("Unused", &importables, &mut program, None));
        assert!(!insert_required_object("Nope", &importables, &mut program, None));
    }
}
