// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the resolver's 7 passes (parse and registry loading happen
// before the runner), their dependency edges, and the artifacts they
// produce. Used by the pipeline runner to compute minimal pass subsets for
// each --emit target.

use std::collections::HashSet;

use serde::Serialize;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each resolver pass (parse excluded — handled before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassId {
    Inject,
    Inherit,
    Defaults,
    Fold,
    Annotate,
    Connect,
    Validate,
}

/// Machine-readable artifact identifiers. All but `Diagnostics` are states
/// of the one program tree held by the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Injected,    // library/framework declarations present
    Merged,      // inherited properties merged into declarations
    Defaulted,   // port defaults copied into declarations and calls
    Folded,      // constant expressions reduced
    Annotated,   // declaration/connection/domain annotations
    Connected,   // domain connectors inserted
    Diagnostics, // Vec<LangError>
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a resolver pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Inject => PassDescriptor {
            name: "inject",
            inputs: &[],
            outputs: &[ArtifactId::Injected],
            invariants: "every name resolvable from an import or framework is declared",
        },
        PassId::Inherit => PassDescriptor {
            name: "inherit",
            inputs: &[PassId::Inject],
            outputs: &[ArtifactId::Merged],
            invariants: "own properties win over inherited ones",
        },
        PassId::Defaults => PassDescriptor {
            name: "defaults",
            inputs: &[PassId::Inherit],
            outputs: &[ArtifactId::Defaulted],
            invariants: "explicit properties are never overwritten",
        },
        PassId::Fold => PassDescriptor {
            name: "fold",
            inputs: &[PassId::Defaults],
            outputs: &[ArtifactId::Folded],
            invariants: "unresolvable expressions are left unfolded",
        },
        PassId::Annotate => PassDescriptor {
            name: "annotate",
            inputs: &[PassId::Fold],
            outputs: &[ArtifactId::Annotated],
            invariants: "call sites carry connections and domains; tree shape unchanged",
        },
        PassId::Connect => PassDescriptor {
            name: "connect",
            inputs: &[PassId::Annotate],
            outputs: &[ArtifactId::Connected],
            invariants: "no unbridged domain change inside a top-level stream",
        },
        PassId::Validate => PassDescriptor {
            name: "validate",
            inputs: &[PassId::Connect],
            outputs: &[ArtifactId::Diagnostics],
            invariants: "read-only",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All 7 pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 7] = [
    PassId::Inject,
    PassId::Inherit,
    PassId::Defaults,
    PassId::Fold,
    PassId::Annotate,
    PassId::Connect,
    PassId::Validate,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
