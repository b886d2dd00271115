// pipeline.rs — Compilation state and pass orchestration
//
// Holds the program tree, the loaded registry and connector table, and runs
// the minimal set of resolver passes for a given terminal PassId.
//
// Preconditions: the tree parsed without errors; the registry is resolved.
// Postconditions: all passes in `required_passes(terminal)` ran, or
//   `has_error` is set and the failing pass is reported.
// Failure modes: any pass emitting error-level diagnostics.
// Side effects: calls on_pass_complete callback after each pass for immediate display.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::annotate::annotate;
use crate::ast::Tree;
use crate::connect::{insert_domain_connectors, ConnectorLoadError, ConnectorTable};
use crate::const_fold::fold_constants;
use crate::diag::{codes, DiagLevel, Diagnostic, LangError};
use crate::domain::{get_node_domain_name, get_node_rate};
use crate::inherit::resolve_inheritance;
use crate::inject::{fill_default_properties, inject_program};
use crate::parser::{parse, ParseError};
use crate::pass::{descriptor, required_passes, PassId};
use crate::registry::{Registry, RegistryError};
use crate::size::{get_node_num_inputs, get_node_num_outputs};
use crate::validate::validate;

// ── Options ────────────────────────────────────────────────────────────────

/// Inputs beyond the program source. The CLI fills this from its flags.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Library sources; each is importable under its file stem.
    pub libraries: Vec<PathBuf>,
    /// Framework sources (`_frameworkDescription` plus members).
    pub frameworks: Vec<PathBuf>,
    /// JSON connector table.
    pub connectors: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Connectors(#[from] ConnectorLoadError),
}

/// Load and resolve every library and framework named in `options`.
pub fn load_registry(options: &CompileOptions) -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();
    for path in &options.libraries {
        let n = registry.load_library_file(path)?;
        debug!(path = %path.display(), declarations = n, "library loaded");
    }
    for path in &options.frameworks {
        let n = registry.load_framework_file(path)?;
        debug!(path = %path.display(), declarations = n, "framework loaded");
    }
    registry.resolve()?;
    Ok(registry)
}

pub fn load_connectors(options: &CompileOptions) -> Result<ConnectorTable, ConnectorLoadError> {
    match &options.connectors {
        Some(path) => ConnectorTable::from_file(path),
        None => Ok(ConnectorTable::new()),
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for cache-key use.
///
/// `source_hash`: SHA-256 of the raw program source text.
/// `registry_fingerprint`: SHA-256 of `Registry::canonical_json()`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub registry_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the registry fingerprint (64 characters).
    pub fn registry_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.registry_fingerprint)
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(text: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from source text and registry.
pub fn compute_provenance(source: &str, registry: &Registry) -> Result<Provenance, RegistryError> {
    Ok(Provenance {
        source_hash: sha256(source),
        registry_fingerprint: sha256(&registry.canonical_json()?),
        compiler_version: env!("CARGO_PKG_VERSION"),
    })
}

// ── State ──────────────────────────────────────────────────────────────────

/// Change count and wall time of one executed pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassRecord {
    pub pass: PassId,
    pub changes: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

/// Holds the program tree, its inputs and accumulated diagnostics.
pub struct CompilationState {
    pub registry: Registry,
    pub connectors: ConnectorTable,
    pub tree: Tree,
    /// Hard errors from every executed pass, in pass order.
    pub errors: Vec<LangError>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub passes: Vec<PassRecord>,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(tree: Tree, registry: Registry, connectors: ConnectorTable) -> Self {
        Self {
            registry,
            connectors,
            tree,
            errors: Vec::new(),
            diagnostics: Vec::new(),
            has_error: false,
            passes: Vec::new(),
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed", descriptor(self.failing_pass).name)
    }
}

impl std::error::Error for PipelineError {}

/// Per-pass post-processing: callback, accumulate, trace, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    changes: usize,
    errors: Vec<LangError>,
    extra: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let mut diags: Vec<Diagnostic> = errors.iter().map(LangError::to_diagnostic).collect();
    diags.extend(extra);
    on_pass_complete(pass_id, &diags);
    let is_err = diags.iter().any(|d| d.level == DiagLevel::Error);
    info!(
        pass = descriptor(pass_id).name,
        changes,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "pass complete"
    );
    state.errors.extend(errors);
    state.diagnostics.extend(diags);
    state.passes.push(PassRecord {
        pass: pass_id,
        changes,
        elapsed,
    });
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

fn registry_diagnostic(err: &RegistryError) -> Diagnostic {
    Diagnostic::new(DiagLevel::Error, Default::default(), err.to_string())
        .with_code(codes::E0600)
        .with_hint("pass the library with --library or the framework with --framework")
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → trace → error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let mut errors = Vec::new();
        let mut extra = Vec::new();
        let changes = match pass_id {
            PassId::Inject => match state.registry.importables_for(&state.tree) {
                Ok(importables) => inject_program(&mut state.tree, &importables),
                Err(err) => {
                    extra.push(registry_diagnostic(&err));
                    0
                }
            },
            PassId::Inherit => resolve_inheritance(&mut state.tree),
            PassId::Defaults => fill_default_properties(&mut state.tree),
            PassId::Fold => fold_constants(&mut state.tree),
            PassId::Annotate => {
                let stats = annotate(&mut state.tree);
                stats.resolved + stats.connections + stats.domains
            }
            PassId::Connect => match state.registry.importables_for(&state.tree) {
                Ok(importables) => {
                    let result =
                        insert_domain_connectors(&mut state.tree, &state.connectors, &importables);
                    errors = result.errors;
                    result.inserted
                }
                Err(err) => {
                    extra.push(registry_diagnostic(&err));
                    0
                }
            },
            PassId::Validate => {
                errors = validate(&state.tree);
                errors.len()
            }
        };
        finish_pass(
            state,
            pass_id,
            changes,
            errors,
            extra,
            t.elapsed(),
            &mut on_pass_complete,
        )?;
    }
    Ok(())
}

/// Outcome of [`compile`] before any pass runs.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("{} syntax error(s)", .0.len())]
    Syntax(Vec<ParseError>),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Parse `source` and run every pass up to `terminal`. Pass failures are
/// recorded in the returned state, not returned as errors.
pub fn compile(
    source: &str,
    registry: Registry,
    connectors: ConnectorTable,
    terminal: PassId,
) -> Result<CompilationState, CompileError> {
    let parsed = parse(source);
    if !parsed.errors.is_empty() {
        return Err(CompileError::Syntax(parsed.errors));
    }
    let mut state = CompilationState::new(parsed.tree, registry, connectors);
    state.provenance = Some(compute_provenance(source, &state.registry)?);
    if let Err(err) = run_pipeline(&mut state, terminal, |_, _| {}) {
        debug!(%err, "pipeline stopped");
    }
    Ok(state)
}

// ── Reports ────────────────────────────────────────────────────────────────

/// Resolved attributes of one top-level stream member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberReport {
    pub text: String,
    pub domain: Option<String>,
    pub rate: Option<f64>,
    pub outputs: i64,
    pub inputs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamReport {
    pub line: u32,
    pub members: Vec<MemberReport>,
}

/// Domain, rate and size of every member of every top-level stream.
pub fn stream_reports(tree: &Tree) -> Vec<StreamReport> {
    tree.statements()
        .iter()
        .copied()
        .filter(|&s| matches!(tree.kind(s), crate::ast::NodeKind::Stream { .. }))
        .map(|stream| StreamReport {
            line: tree.line(stream),
            members: tree
                .stream_members(stream)
                .into_iter()
                .map(|m| {
                    let rate = get_node_rate(m, &[], tree);
                    MemberReport {
                        text: tree.render(m),
                        domain: get_node_domain_name(m, &[], tree),
                        rate: rate.is_resolved().then(|| rate.raw()),
                        outputs: get_node_num_outputs(m, &[], tree).raw(),
                        inputs: get_node_num_inputs(m, &[], tree).raw(),
                    }
                })
                .collect(),
        })
        .collect()
}

/// Machine-readable summary of a compilation (`--emit json`).
#[derive(Debug, Serialize)]
pub struct ResolutionReport<'a> {
    pub compiler_version: &'static str,
    pub source_hash: Option<String>,
    pub registry_fingerprint: Option<String>,
    pub passes: &'a [PassRecord],
    pub streams: Vec<StreamReport>,
    pub errors: &'a [LangError],
}

impl CompilationState {
    pub fn report(&self) -> ResolutionReport<'_> {
        ResolutionReport {
            compiler_version: env!("CARGO_PKG_VERSION"),
            source_hash: self.provenance.as_ref().map(Provenance::source_hash_hex),
            registry_fingerprint: self
                .provenance
                .as_ref()
                .map(Provenance::registry_fingerprint_hex),
            passes: &self.passes,
            streams: stream_reports(&self.tree),
            errors: &self.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::ErrorKind;

    const PROGRAM: &str = "_domainDefinition AudioDomain { rate: 44100 }\n\
         signal In { domain: AudioDomain }\n\
         signal Out {}\n\
         In >> Out;";

    #[test]
    fn runs_every_pass_in_order() {
        let state = compile(PROGRAM, Registry::new(), ConnectorTable::new(), PassId::Validate)
            .expect("parses");
        assert!(!state.has_error, "{:?}", state.diagnostics);
        let order: Vec<PassId> = state.passes.iter().map(|p| p.pass).collect();
        assert_eq!(order, crate::pass::ALL_PASSES.to_vec());
    }

    #[test]
    fn terminal_pass_limits_execution() {
        let state = compile(PROGRAM, Registry::new(), ConnectorTable::new(), PassId::Fold)
            .expect("parses");
        assert_eq!(state.passes.len(), 4);
        assert_eq!(state.passes.last().map(|p| p.pass), Some(PassId::Fold));
    }

    #[test]
    fn stops_at_first_failing_pass() {
        let mut calls = Vec::new();
        let parsed = parse("import Missing\nA >> B;");
        let mut state = CompilationState::new(parsed.tree, Registry::new(), ConnectorTable::new());
        let err = run_pipeline(&mut state, PassId::Validate, |pass, diags| {
            calls.push((pass, diags.len()));
        })
        .expect_err("unknown library");
        assert_eq!(err.failing_pass, PassId::Inject);
        assert_eq!(calls, vec![(PassId::Inject, 1)]);
        assert_eq!(state.diagnostics[0].code, Some(codes::E0600));
        assert!(state.has_error);
    }

    #[test]
    fn validation_errors_become_diagnostics() {
        let state = compile("signal A {}\nA >> Nowhere;", Registry::new(), ConnectorTable::new(), PassId::Validate)
            .expect("parses");
        assert!(state.has_error);
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].kind, ErrorKind::UndeclaredSymbol);
        assert_eq!(state.diagnostics[0].code, Some(codes::E0100));
        assert_eq!(state.diagnostics[0].line, 2);
    }

    #[test]
    fn syntax_errors_are_returned() {
        let err = compile("signal {", Registry::new(), ConnectorTable::new(), PassId::Validate)
            .err()
            .expect("syntax error");
        assert!(matches!(err, CompileError::Syntax(ref e) if !e.is_empty()));
    }

    #[test]
    fn report_lists_stream_domains_and_provenance() {
        let state = compile(PROGRAM, Registry::new(), ConnectorTable::new(), PassId::Validate)
            .expect("parses");
        let report = state.report();
        assert_eq!(report.streams.len(), 1);
        let members = &report.streams[0].members;
        assert_eq!(members[0].domain.as_deref(), Some("AudioDomain"));
        assert_eq!(members[0].rate, Some(44100.0));
        assert_eq!(members[1].domain, None);
        assert_eq!(report.source_hash.as_ref().map(String::len), Some(64));

        let json = serde_json::to_value(&report).expect("serializes");
        assert_eq!(json["passes"][0]["pass"], "inject");
        assert_eq!(json["streams"][0]["members"][0]["outputs"], 1);
    }

    #[test]
    fn registry_errors_convert_into_compile_errors() {
        let err: CompileError = RegistryError::UnknownLibrary { name: "X".into() }.into();
        assert!(matches!(err, CompileError::Registry(_)));
        assert_eq!(err.to_string(), "unknown library 'X'");
    }

    #[test]
    fn provenance_is_deterministic() {
        let registry = Registry::new();
        let a = compute_provenance(PROGRAM, &registry).expect("provenance");
        let b = compute_provenance(PROGRAM, &registry).expect("provenance");
        assert_eq!(a.source_hash, b.source_hash);
        assert_eq!(a.registry_fingerprint, b.registry_fingerprint);
        let other = compute_provenance("x", &registry).expect("provenance");
        assert_ne!(a.source_hash, other.source_hash);
    }
}
