// registry.rs — Library and framework declaration sets
//
// Loads importable declaration sets from source text or files. A library is
// a flat set of declarations reachable through `import`. A framework is a
// set described by a `_frameworkDescription` declaration; `inherits` /
// `inheritsVersion` on that description name a parent framework whose
// flattened members load first, with the child's members overlaid
// (same-named parent members replaced).
//
// Preconditions: `resolve` must run after the last `load_framework*` call
//   and before `importables_for`.
// Postconditions: every resolved framework set carries its full inherited
//   member set, each member tagged with the framework's name.
// Failure modes: I/O, parse, missing description, duplicate framework,
//   unknown parent, inheritance cycle and unknown imports are reported as
//   `RegistryError`.
// Side effects: `*_file` loaders read the filesystem.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::ast::{Literal, Tree};
use crate::id::NodeId;
use crate::object_type::ObjectType;
use crate::parser::parse;
use crate::scope;

// ── Errors ───────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{origin}: line {line}: {message}")]
    Parse {
        origin: String,
        line: u32,
        message: String,
    },
    #[error("{origin}: no _frameworkDescription declaration")]
    MissingDescription { origin: String },
    #[error("duplicate framework '{name}' version {version:?}")]
    DuplicateFramework { name: String, version: Option<f64> },
    #[error("framework '{name}' inherits unknown framework '{parent}'")]
    UnknownParent { name: String, parent: String },
    #[error("framework inheritance cycle: {}", .chain.join(" -> "))]
    InheritanceCycle { chain: Vec<String> },
    #[error("unknown library '{name}'")]
    UnknownLibrary { name: String },
    #[error("unknown framework '{name}'")]
    UnknownFramework { name: String },
    #[error("registry summary: {0}")]
    Json(#[from] serde_json::Error),
}

// ── Declaration sets ─────────────────────────────────────────────────────

/// A named set of importable declarations backed by its own tree.
#[derive(Debug, Clone)]
pub struct ImportSet {
    pub name: String,
    pub version: Option<f64>,
    pub tree: Tree,
    parent: Option<(String, Option<f64>)>,
}

impl ImportSet {
    fn new(name: impl Into<String>, version: Option<f64>) -> Self {
        ImportSet {
            name: name.into(),
            version,
            tree: Tree::new(),
            parent: None,
        }
    }

    /// Member declarations in load order.
    pub fn members(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.tree.declarations()
    }

    /// Every member declaration named `name`.
    pub fn member(&self, name: &str) -> Vec<NodeId> {
        self.members()
            .filter(|&d| self.tree.decl_name(d) == Some(name))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn member_names(&self) -> Vec<String> {
        self.members()
            .filter_map(|d| self.tree.decl_name(d).map(String::from))
            .collect()
    }

    /// Append `decl` from `src`, tagging it with this set's framework.
    fn adopt(&mut self, src: &Tree, decl: NodeId, framework: &str) {
        let id = self.tree.import_subtree(src, decl);
        self.tree.props_mut(id).framework = framework.to_string();
        self.tree.push_statement(id);
    }
}

/// A declaration set as seen from one program: imported members are
/// reachable under `namespace`.
#[derive(Debug, Clone)]
pub struct Importable<'r> {
    pub set: &'r ImportSet,
    pub namespace: Vec<String>,
}

// ── Registry ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Registry {
    libraries: BTreeMap<String, ImportSet>,
    frameworks: Vec<ImportSet>,
    resolved: Vec<ImportSet>,
}

fn parse_set(source: &str, origin: &str) -> Result<Tree, RegistryError> {
    let result = parse(source);
    if let Some(err) = result.errors.into_iter().next() {
        return Err(RegistryError::Parse {
            origin: origin.to_string(),
            line: err.line,
            message: err.message,
        });
    }
    Ok(result.tree)
}

fn read_source(path: &Path) -> Result<String, RegistryError> {
    std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn numeric(tree: &Tree, owner: NodeId, name: &str) -> Option<f64> {
    tree.property(owner, name)
        .and_then(|v| tree.literal(v))
        .and_then(Literal::as_f64)
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a library from source. Returns the number of members.
    pub fn load_library(&mut self, name: &str, source: &str) -> Result<usize, RegistryError> {
        let parsed = parse_set(source, name)?;
        let mut set = ImportSet::new(name, None);
        for decl in parsed.declarations() {
            set.adopt(&parsed, decl, "");
        }
        let count = set.len();
        if self.libraries.insert(name.to_string(), set).is_some() {
            debug!(library = name, "library reloaded");
        }
        Ok(count)
    }

    /// Load a library file; the library is named after the file stem.
    pub fn load_library_file(&mut self, path: &Path) -> Result<usize, RegistryError> {
        let source = read_source(path)?;
        self.load_library(&file_stem(path), &source)
    }

    /// Load a framework from source. Returns the number of own members.
    pub fn load_framework(&mut self, source: &str, origin: &str) -> Result<usize, RegistryError> {
        let parsed = parse_set(source, origin)?;
        let description = parsed
            .declarations()
            .find(|&d| parsed.object_type(d) == Some(&ObjectType::FrameworkDescription))
            .ok_or_else(|| RegistryError::MissingDescription {
                origin: origin.to_string(),
            })?;
        let name = parsed.decl_name(description).unwrap_or_default().to_string();
        let version = numeric(&parsed, description, "version");
        if self
            .frameworks
            .iter()
            .any(|f| f.name == name && f.version == version)
        {
            return Err(RegistryError::DuplicateFramework { name, version });
        }

        let mut set = ImportSet::new(&name, version);
        set.tree.set_framework(&name);
        set.parent = parsed
            .property(description, "inherits")
            .and_then(|p| parsed.reference_name(p))
            .map(|parent| {
                (
                    parent.to_string(),
                    numeric(&parsed, description, "inheritsVersion"),
                )
            });
        for decl in parsed.declarations().filter(|&d| d != description) {
            set.adopt(&parsed, decl, &name);
        }
        let count = set.len();
        debug!(framework = %name, ?version, members = count, "framework loaded");
        self.frameworks.push(set);
        self.resolved.clear();
        Ok(count)
    }

    pub fn load_framework_file(&mut self, path: &Path) -> Result<usize, RegistryError> {
        let source = read_source(path)?;
        self.load_framework(&source, &path.display().to_string())
    }

    /// Index of the loaded framework `name`: the exact `version` when given
    /// and present, otherwise the highest version.
    fn framework_index(&self, name: &str, version: Option<f64>) -> Option<usize> {
        let candidates = self
            .frameworks
            .iter()
            .enumerate()
            .filter(|(_, f)| f.name == name);
        if let Some(v) = version {
            if let Some((i, _)) = candidates.clone().find(|(_, f)| f.version == Some(v)) {
                return Some(i);
            }
        }
        candidates
            .max_by(|(_, a), (_, b)| {
                let a = a.version.unwrap_or(f64::MIN);
                let b = b.version.unwrap_or(f64::MIN);
                a.total_cmp(&b)
            })
            .map(|(i, _)| i)
    }

    fn flatten(&self, index: usize, chain: &mut Vec<String>) -> Result<ImportSet, RegistryError> {
        let own = &self.frameworks[index];
        if chain.contains(&own.name) {
            chain.push(own.name.clone());
            return Err(RegistryError::InheritanceCycle {
                chain: chain.clone(),
            });
        }
        chain.push(own.name.clone());

        let mut flat = ImportSet::new(&own.name, own.version);
        flat.tree.set_framework(&own.name);
        if let Some((parent, parent_version)) = &own.parent {
            let parent_index = self.framework_index(parent, *parent_version).ok_or_else(|| {
                RegistryError::UnknownParent {
                    name: own.name.clone(),
                    parent: parent.clone(),
                }
            })?;
            let inherited = self.flatten(parent_index, chain)?;
            let overridden = own.member_names();
            for decl in inherited.members() {
                let replaced = inherited
                    .tree
                    .decl_name(decl)
                    .is_some_and(|n| overridden.iter().any(|o| o == n));
                if !replaced {
                    flat.adopt(&inherited.tree, decl, &own.name);
                }
            }
        }
        for decl in own.members() {
            flat.adopt(&own.tree, decl, &own.name);
        }
        chain.pop();
        Ok(flat)
    }

    /// Flatten every framework's inheritance chain.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn resolve(&mut self) -> Result<(), RegistryError> {
        let mut resolved = Vec::with_capacity(self.frameworks.len());
        for index in 0..self.frameworks.len() {
            resolved.push(self.flatten(index, &mut Vec::new())?);
        }
        self.resolved = resolved;
        Ok(())
    }

    pub fn library(&self, name: &str) -> Option<&ImportSet> {
        self.libraries.get(name)
    }

    /// Resolved (flattened) framework set.
    pub fn framework(&self, name: &str, version: Option<f64>) -> Option<&ImportSet> {
        let index = self.framework_index(name, version)?;
        self.resolved.get(index)
    }

    pub fn frameworks(&self) -> impl Iterator<Item = &ImportSet> {
        self.resolved.iter()
    }

    /// Domain definition `name` as seen from framework `framework`.
    pub fn find_domain_declaration(&self, name: &str, framework: &str) -> Option<(&ImportSet, NodeId)> {
        let set = self.framework(framework, None)?;
        let decl = scope::find_domain_declaration(name, &[], &set.tree, &[], Some(framework))?;
        Some((set, decl))
    }

    /// Importable sets for `program`: each imported library (aliased imports
    /// reachable under the alias), then the program's framework, then every
    /// other framework (reachable through `Framework::` qualification).
    pub fn importables_for(&self, program: &Tree) -> Result<Vec<Importable<'_>>, RegistryError> {
        let mut out = Vec::new();
        for (name, alias) in program.imports() {
            let set = self
                .libraries
                .get(&name)
                .ok_or(RegistryError::UnknownLibrary { name })?;
            out.push(Importable {
                set,
                namespace: alias.into_iter().collect(),
            });
        }
        let selected = program.framework();
        if !selected.is_empty() && self.framework(selected, None).is_none() {
            return Err(RegistryError::UnknownFramework {
                name: selected.to_string(),
            });
        }
        let mut frameworks: Vec<&ImportSet> = self.resolved.iter().collect();
        frameworks.sort_by_key(|f| f.name != selected);
        out.extend(frameworks.into_iter().map(|set| Importable {
            set,
            namespace: Vec::new(),
        }));
        Ok(out)
    }

    /// Deterministic JSON rendering of every loaded set, for provenance.
    pub fn canonical_json(&self) -> Result<String, RegistryError> {
        #[derive(Serialize)]
        struct SetSummary<'a> {
            name: &'a str,
            version: Option<f64>,
            members: Vec<String>,
        }

        fn summarize(set: &ImportSet) -> SetSummary<'_> {
            SetSummary {
                name: &set.name,
                version: set.version,
                members: set.members().map(|d| set.tree.render(d)).collect(),
            }
        }

        #[derive(Serialize)]
        struct Summary<'a> {
            libraries: Vec<SetSummary<'a>>,
            frameworks: Vec<SetSummary<'a>>,
        }

        let mut frameworks: Vec<SetSummary<'_>> = self.frameworks.iter().map(summarize).collect();
        frameworks.sort_by(|a, b| {
            a.name
                .cmp(b.name)
                .then(a.version.unwrap_or(0.0).total_cmp(&b.version.unwrap_or(0.0)))
        });
        let summary = Summary {
            libraries: self.libraries.values().map(summarize).collect(),
            frameworks,
        };
        Ok(serde_json::to_string(&summary)?)
    }
}
