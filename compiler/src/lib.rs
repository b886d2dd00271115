// strc — stream dataflow resolver
//
// Library root. Front end (lexer, parser, tree), the resolution queries
// (scope, const_fold, inherit, size, domain), the mutating passes
// (inject, annotate, connect) and the pass runner.

pub mod annotate;
pub mod ast;
pub mod connect;
pub mod const_fold;
pub mod diag;
pub mod domain;
pub mod id;
pub mod inherit;
pub mod inject;
pub mod lexer;
pub mod object_type;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod registry;
pub mod scope;
pub mod size;
pub mod validate;
