// connect.rs — Domain-change connector insertion
//
// Splits top-level streams wherever two adjacent members resolve to
// different domain identifiers. The edge `left >> right` becomes
//
//     ... >> left >> SourceConnector(bridge: B);
//     DestConnector(bridge: B) >> right >> ...;
//
// with a fresh bridge declaration `B` between the two halves. Connector
// modules (and any extra declarations they import) come from a
// `ConnectorProvider`, typically a `ConnectorTable` loaded from JSON.
//
// Preconditions: annotation has run (call sites carry cached domains).
// Postconditions: every member of a top-level stream with a domain matches
//   the last domain upstream of it, or the change is reported as a
//   `DomainMismatch` error. Domain-less members carry the upstream domain.
// Failure modes: domain pairs without a connector produce `LangError`s and
//   the stream is left unsplit at that edge.
// Side effects: replaces stream statements, appends declarations.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ast::{NameRef, NodeKind, Span, Tree};
use crate::diag::{ErrorKind, LangError};
use crate::domain::{get_node_domain, get_node_domain_name, DomainRef};
use crate::id::NodeId;
use crate::inject::insert_required_object;
use crate::object_type::ObjectType;
use crate::registry::Importable;
use crate::scope::{find_declaration_by_name, program_framework};

// ── Connector definitions ────────────────────────────────────────────────

/// Modules bridging one domain to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainConnector {
    /// Source domain identifier.
    pub source: String,
    /// Destination domain identifier.
    pub destination: String,
    /// Module terminating the source half of the split stream.
    pub source_module: String,
    /// Module starting the destination half.
    pub destination_module: String,
    #[serde(default)]
    pub source_imports: Vec<String>,
    #[serde(default)]
    pub destination_imports: Vec<String>,
}

pub trait ConnectorProvider {
    fn connector(&self, source: &str, destination: &str) -> Option<DomainConnector>;
}

/// Connector lookup table keyed by domain identifier pairs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorTable {
    pub connectors: Vec<DomainConnector>,
}

/// Identifier without its `:instance` suffix.
fn base_identifier(id: &str) -> &str {
    match id.rsplit_once(':') {
        Some((base, instance))
            if !base.ends_with(':') && instance.chars().all(|c| c.is_ascii_digit()) =>
        {
            base
        }
        _ => id,
    }
}

impl ConnectorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConnectorLoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConnectorLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConnectorLoadError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn add(&mut self, connector: DomainConnector) {
        self.connectors.push(connector);
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

impl ConnectorProvider for ConnectorTable {
    /// Exact identifier match first, then a match ignoring instance indices.
    fn connector(&self, source: &str, destination: &str) -> Option<DomainConnector> {
        self.connectors
            .iter()
            .find(|c| c.source == source && c.destination == destination)
            .or_else(|| {
                let (src, dst) = (base_identifier(source), base_identifier(destination));
                self.connectors
                    .iter()
                    .find(|c| c.source == src && c.destination == dst)
            })
            .cloned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorLoadError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", .path.display())]
    Json {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// ── Insertion ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ConnectResult {
    pub inserted: usize,
    pub errors: Vec<LangError>,
}

/// A resolved member domain: the reference (cached on connector calls) and
/// its canonical identifier.
type MemberDomain = Option<(DomainRef, String)>;

fn member_domain(tree: &Tree, member: NodeId) -> MemberDomain {
    let domain = get_node_domain(member, &[], tree)?;
    let id = get_node_domain_name(member, &[], tree)?;
    Some((domain, id))
}

fn make_call(tree: &mut Tree, module: &str, bridge: &str, span: Span, line: u32) -> NodeId {
    let value = tree.add(NodeKind::Block(NameRef::simple(bridge)), span, line);
    let property = tree.add(
        NodeKind::Property {
            name: "bridge".to_string(),
            value,
        },
        span,
        line,
    );
    tree.add(
        NodeKind::Function {
            name: NameRef::simple(module),
            properties: vec![property],
        },
        span,
        line,
    )
}

fn make_bridge(tree: &mut Tree, name: &str, span: Span, line: u32) -> NodeId {
    use crate::ast::Decl;
    tree.add(
        NodeKind::Declaration(Decl {
            name: name.to_string(),
            object_type: ObjectType::Signal,
            properties: Vec::new(),
        }),
        span,
        line,
    )
}

struct Splitter<'a, 'r, P: ConnectorProvider + ?Sized> {
    provider: &'a P,
    importables: &'a [Importable<'r>],
    result: ConnectResult,
}

impl<'a, 'r, P: ConnectorProvider + ?Sized> Splitter<'a, 'r, P> {
    fn resolve_call(&self, tree: &mut Tree, call: NodeId) {
        let Some(name) = tree.name_ref(call).map(|n| n.to_string()) else {
            return;
        };
        let framework = program_framework(tree);
        let decl = find_declaration_by_name(&name, &[], tree, &[], framework);
        tree.props_mut(call).declaration = decl;
    }

    /// Split one stream statement. Returns the replacement statements:
    /// bridge declarations followed by the stream segments.
    fn split(&mut self, tree: &mut Tree, stream: NodeId) -> Option<Vec<NodeId>> {
        let members = tree.stream_members(stream);
        let domains: Vec<MemberDomain> = members.iter().map(|&m| member_domain(tree, m)).collect();
        let (span, line) = (tree.node(stream).span, tree.line(stream));

        let mut segments: Vec<Vec<NodeId>> = vec![vec![members[0]]];
        let mut bridges = Vec::new();
        // Domain-less members inherit the last resolved domain upstream.
        let mut upstream: &MemberDomain = &domains[0];
        for i in 0..members.len().saturating_sub(1) {
            let (left, right) = (members[i], members[i + 1]);
            let change = match (upstream, &domains[i + 1]) {
                (Some((ld, lid)), Some((rd, rid))) if lid != rid => Some((ld, lid, rd, rid)),
                _ => None,
            };
            if domains[i + 1].is_some() {
                upstream = &domains[i + 1];
            }
            let Some((left_domain, left_id, right_domain, right_id)) = change else {
                if let Some(segment) = segments.last_mut() {
                    segment.push(right);
                }
                continue;
            };
            let Some(connector) = self.provider.connector(left_id, right_id) else {
                self.result.errors.push(LangError::at(
                    ErrorKind::DomainMismatch,
                    tree,
                    left,
                    vec![left_id.clone(), right_id.clone()],
                ));
                if let Some(segment) = segments.last_mut() {
                    segment.push(right);
                }
                continue;
            };

            let framework = program_framework(tree).map(String::from);
            let framework = framework.as_deref();
            let wanted = [connector.source_module.as_str(), connector.destination_module.as_str()]
                .into_iter()
                .chain(connector.source_imports.iter().map(String::as_str))
                .chain(connector.destination_imports.iter().map(String::as_str));
            for name in wanted {
                insert_required_object(name, self.importables, tree, framework);
            }

            let bridge_name = tree.fresh_bridge_name();
            bridges.push(make_bridge(tree, &bridge_name, span, line));
            let src = make_call(tree, &connector.source_module, &bridge_name, span, line);
            let dst = make_call(tree, &connector.destination_module, &bridge_name, span, line);
            self.resolve_call(tree, src);
            self.resolve_call(tree, dst);

            tree.props_mut(src).domain = Some(left_domain.clone());
            tree.props_mut(src).input_block = Some(left);
            tree.props_mut(dst).domain = Some(right_domain.clone());
            tree.props_mut(dst).output_block = Some(right);
            if matches!(tree.kind(left), NodeKind::Function { .. }) {
                tree.props_mut(left).output_block = Some(src);
            }
            if matches!(tree.kind(right), NodeKind::Function { .. }) {
                tree.props_mut(right).input_block = Some(dst);
            }

            if let Some(segment) = segments.last_mut() {
                segment.push(src);
            }
            segments.push(vec![dst, right]);
            self.result.inserted += 1;
            debug!(source = %left_id, destination = %right_id, bridge = %bridge_name, "connector inserted");
        }

        if bridges.is_empty() {
            return None;
        }
        let mut replacement = bridges;
        for segment in segments {
            replacement.extend(tree.build_stream(&segment, span, line));
        }
        Some(replacement)
    }
}

/// Insert domain connectors into every top-level stream.
#[tracing::instrument(level = "debug", skip_all)]
pub fn insert_domain_connectors<P: ConnectorProvider + ?Sized>(
    tree: &mut Tree,
    provider: &P,
    importables: &[Importable<'_>],
) -> ConnectResult {
    let mut splitter = Splitter {
        provider,
        importables,
        result: ConnectResult::default(),
    };
    let statements = tree.statements().to_vec();
    let mut rewritten = Vec::with_capacity(statements.len());
    for &statement in &statements {
        let replacement = match tree.kind(statement) {
            NodeKind::Stream { .. } => splitter.split(tree, statement),
            _ => None,
        };
        match replacement {
            Some(new_statements) => rewritten.extend(new_statements),
            None => rewritten.push(statement),
        }
    }
    if splitter.result.inserted == 0 {
        return splitter.result;
    }
    // Connector modules were appended to the statement list while splitting.
    // Place them after the existing non-stream statements.
    let is_stream = |tree: &Tree, s: NodeId| matches!(tree.kind(s), NodeKind::Stream { .. });
    let injected: Vec<NodeId> = tree
        .statements()
        .iter()
        .copied()
        .filter(|s| !statements.contains(s))
        .collect();
    let mut all = Vec::with_capacity(rewritten.len() + injected.len());
    all.extend(rewritten.iter().copied().filter(|&s| !is_stream(tree, s)));
    all.extend(injected);
    all.extend(rewritten.iter().copied().filter(|&s| is_stream(tree, s)));
    tree.set_statements(all);
    splitter.result
}
