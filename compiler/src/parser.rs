// Parser for stream program, library and framework sources.
//
// Uses `chumsky` parser combinators over the `lexer` token stream. The
// combinators produce an owned syntax tree which is then lowered into the
// `Tree` arena; every node records its byte span and 1-based line.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns the tree of every statement when parsing succeeds,
//   plus any lex and parse errors.
// Failure modes: a syntax error yields an empty tree and the first error.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::{SimpleSpan, Span as _};
use thiserror::Error;

use crate::ast::{Decl, Literal, NameRef, NodeKind, Operator, Span, Tree};
use crate::id::NodeId;
use crate::lexer::{LineIndex, Token};
use crate::object_type::ObjectType;

/// A lex or parse error with location.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub span: Span,
    pub line: u32,
    pub message: String,
}

/// Result of parsing: the tree plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub tree: Tree,
    pub errors: Vec<ParseError>,
}

/// Parse a source string. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let lines = LineIndex::new(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (statements, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut errors: Vec<ParseError> = lex_result
        .errors
        .into_iter()
        .map(|e| ParseError {
            span: e.span,
            line: lines.line_of(e.span.start),
            message: e.message,
        })
        .collect();
    errors.extend(parse_errors.into_iter().map(|e| {
        let span = Span::new(e.span().start(), e.span().end());
        ParseError {
            span,
            line: lines.line_of(span.start),
            message: e.to_string(),
        }
    }));

    let mut tree = Tree::new();
    for statement in statements.unwrap_or_default() {
        let id = lower(&mut tree, &lines, statement);
        tree.push_statement(id);
    }
    ParseResult { tree, errors }
}

// ── Syntax ──
//
// Owned combinator output. Lowering allocates arena nodes bottom-up, so a
// failed parse never leaves partial nodes behind.

#[derive(Debug, Clone)]
struct Spanned {
    syntax: Syntax,
    span: SimpleSpan,
}

#[derive(Debug, Clone)]
enum Syntax {
    Value(Literal),
    Block(NameRef),
    Bundle {
        name: NameRef,
        index: Vec<Spanned>,
    },
    Range {
        start: Box<Spanned>,
        end: Box<Spanned>,
    },
    Call {
        name: NameRef,
        properties: Vec<Spanned>,
    },
    PortProperty {
        block: String,
        port: String,
    },
    Unary {
        op: Operator,
        operand: Box<Spanned>,
    },
    Binary {
        op: Operator,
        lhs: Box<Spanned>,
        rhs: Box<Spanned>,
    },
    List(Vec<Spanned>),
    /// Two or more members; `last` is the final one.
    Stream {
        members: Vec<Spanned>,
        last: Box<Spanned>,
    },
    Property {
        name: String,
        value: Box<Spanned>,
    },
    Declaration {
        type_name: String,
        name: String,
        size: Option<Box<Spanned>>,
        properties: Vec<Spanned>,
    },
    Import {
        name: String,
        alias: Option<String>,
    },
    Platform {
        framework: String,
        version: f64,
    },
}

impl Spanned {
    fn new(syntax: Syntax, span: SimpleSpan) -> Self {
        Spanned { syntax, span }
    }
}

/// Index suffix after a name: call arguments or bundle indices.
enum Suffix {
    Call(Vec<Spanned>),
    Index(Vec<Spanned>),
}

fn binary(op: Operator, lhs: Spanned, rhs: Spanned, span: SimpleSpan) -> Spanned {
    Spanned::new(
        Syntax::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    )
}

/// A single member is itself; more members form a stream.
fn stream_of(mut members: Vec<Spanned>, span: SimpleSpan) -> Spanned {
    match members.pop() {
        Some(last) if members.is_empty() => last,
        Some(last) => Spanned::new(
            Syntax::Stream {
                members,
                last: Box::new(last),
            },
            span,
        ),
        None => Spanned::new(Syntax::List(Vec::new()), span),
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Vec<Spanned>, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let text = move |span: SimpleSpan| source[span.start()..span.end()].to_string();

    // ── Names ──

    let ident = just(Token::Ident).map_with(move |_, e| text(e.span()));

    // Keywords are valid property names (`version: 1.0` in a framework
    // description), so accept them alongside identifiers.
    let property_name = select! {
        Token::Ident = e => text(e.span()),
        Token::Version = e => text(e.span()),
        Token::As = e => text(e.span()),
        Token::Use = e => text(e.span()),
        Token::Import = e => text(e.span()),
    };

    let qualified_name = ident
        .clone()
        .separated_by(just(Token::PathSep))
        .at_least(1)
        .collect::<Vec<_>>()
        .map(|mut segments| {
            let name = segments.pop().unwrap_or_default();
            NameRef::qualified(segments, name)
        });

    let separator = just(Token::Comma).or(just(Token::Semicolon));

    let mut expr = Recursive::declare();
    let mut item = Recursive::declare();

    // ── Properties: name ':' expr ──

    let property = property_name
        .clone()
        .then_ignore(just(Token::Colon))
        .then(expr.clone())
        .map_with(|(name, value), e| {
            Spanned::new(
                Syntax::Property {
                    name,
                    value: Box::new(value),
                },
                e.span(),
            )
        });

    let properties = property
        .then_ignore(separator.clone().or_not())
        .repeated()
        .collect::<Vec<_>>();

    // ── Literal ──

    let literal = select! {
        Token::Int(v) => Literal::Int(v),
        Token::Real(v) => Literal::Real(v),
        Token::StringLit(s) => Literal::String(s),
        Token::On => Literal::Switch(true),
        Token::Off => Literal::Switch(false),
        Token::None => Literal::None,
    }
    .map_with(|lit, e| Spanned::new(Syntax::Value(lit), e.span()));

    // ── References: name, name(props), name[index, ...] ──

    let index_entry = expr
        .clone()
        .then(just(Token::Colon).ignore_then(expr.clone()).or_not())
        .map_with(|(start, end), e| match end {
            Some(end) => Spanned::new(
                Syntax::Range {
                    start: Box::new(start),
                    end: Box::new(end),
                },
                e.span(),
            ),
            None => start,
        });

    let call_args = properties
        .clone()
        .delimited_by(just(Token::LParen), just(Token::RParen))
        .map(Suffix::Call);

    let bundle_index = index_entry
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .map(Suffix::Index);

    let reference = qualified_name
        .then(call_args.or(bundle_index).or_not())
        .map_with(|(name, suffix), e| {
            let syntax = match suffix {
                Some(Suffix::Call(properties)) => Syntax::Call { name, properties },
                Some(Suffix::Index(index)) => Syntax::Bundle { name, index },
                None => Syntax::Block(name),
            };
            Spanned::new(syntax, e.span())
        });

    let port_property = ident
        .clone()
        .then_ignore(just(Token::Dot))
        .then(property_name)
        .map_with(|(block, port), e| Spanned::new(Syntax::PortProperty { block, port }, e.span()));

    // ── List: '[' item ((',' | ';') item)* ']' ──

    let list = item
        .clone()
        .then_ignore(separator.clone().or_not())
        .repeated()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .map_with(|items, e| Spanned::new(Syntax::List(items), e.span()));

    // ── Expressions ──

    let atom = choice((
        literal,
        expr.clone()
            .delimited_by(just(Token::LParen), just(Token::RParen)),
        list,
        port_property,
        reference,
    ));

    let unary = recursive(|unary| {
        select! {
            Token::Minus => Operator::Neg,
            Token::Tilde => Operator::Not,
        }
        .then(unary)
        .map_with(|(op, operand), e| {
            Spanned::new(
                Syntax::Unary {
                    op,
                    operand: Box::new(operand),
                },
                e.span(),
            )
        })
        .or(atom.clone())
    });

    let product = unary.clone().foldl_with(
        select! {
            Token::Star => Operator::Mul,
            Token::Slash => Operator::Div,
        }
        .then(unary)
        .repeated(),
        |lhs, (op, rhs), e| binary(op, lhs, rhs, e.span()),
    );

    let sum = product.clone().foldl_with(
        select! {
            Token::Plus => Operator::Add,
            Token::Minus => Operator::Sub,
        }
        .then(product)
        .repeated(),
        |lhs, (op, rhs), e| binary(op, lhs, rhs, e.span()),
    );

    let conjunction = sum.clone().foldl_with(
        just(Token::Amp).to(Operator::And).then(sum).repeated(),
        |lhs, (op, rhs), e| binary(op, lhs, rhs, e.span()),
    );

    let disjunction = conjunction.clone().foldl_with(
        just(Token::Pipe)
            .to(Operator::Or)
            .then(conjunction)
            .repeated(),
        |lhs, (op, rhs), e| binary(op, lhs, rhs, e.span()),
    );

    expr.define(disjunction);

    // ── Declaration: type name ('[' expr ']')? '{' property* '}' ──

    let declaration = ident
        .clone()
        .then(ident.clone())
        .then(
            expr.clone()
                .delimited_by(just(Token::LBracket), just(Token::RBracket))
                .or_not(),
        )
        .then(properties.delimited_by(just(Token::LBrace), just(Token::RBrace)))
        .map_with(|(((type_name, name), size), properties), e| {
            Spanned::new(
                Syntax::Declaration {
                    type_name,
                    name,
                    size: size.map(Box::new),
                    properties,
                },
                e.span(),
            )
        });

    // ── Stream: expr ('>>' expr)* ──

    let stream = expr
        .clone()
        .separated_by(just(Token::Stream))
        .at_least(1)
        .collect::<Vec<_>>()
        .map_with(|members, e| stream_of(members, e.span()));

    item.define(declaration.clone().or(stream.clone()));

    // ── Statements ──

    let version = select! {
        Token::Int(v) => v as f64,
        Token::Real(v) => v,
    };

    let platform = just(Token::Use)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Version))
        .then(version)
        .then_ignore(just(Token::Semicolon).or_not())
        .map_with(|(framework, version), e| {
            Spanned::new(Syntax::Platform { framework, version }, e.span())
        });

    let import = just(Token::Import)
        .ignore_then(ident.clone())
        .then(just(Token::As).ignore_then(ident).or_not())
        .then_ignore(just(Token::Semicolon).or_not())
        .map_with(|(name, alias), e| Spanned::new(Syntax::Import { name, alias }, e.span()));

    let statement = choice((
        platform,
        import,
        declaration.then_ignore(just(Token::Semicolon).or_not()),
        stream.then_ignore(just(Token::Semicolon)),
    ));

    statement.repeated().collect::<Vec<_>>().then_ignore(end())
}

// ── Lowering ──

fn lower_all(tree: &mut Tree, lines: &LineIndex, nodes: Vec<Spanned>) -> Vec<NodeId> {
    nodes
        .into_iter()
        .map(|node| lower(tree, lines, node))
        .collect()
}

fn lower(tree: &mut Tree, lines: &LineIndex, node: Spanned) -> NodeId {
    let span = Span::new(node.span.start(), node.span.end());
    let line = lines.line_of(span.start);
    let kind = match node.syntax {
        Syntax::Value(literal) => NodeKind::Value(literal),
        Syntax::Block(name) => NodeKind::Block(name),
        Syntax::Bundle { name, index } => NodeKind::Bundle {
            name,
            index: lower_all(tree, lines, index),
        },
        Syntax::Range { start, end } => {
            let start = lower(tree, lines, *start);
            let end = lower(tree, lines, *end);
            NodeKind::Range { start, end }
        }
        Syntax::Call { name, properties } => NodeKind::Function {
            name,
            properties: lower_all(tree, lines, properties),
        },
        Syntax::PortProperty { block, port } => NodeKind::PortProperty { block, port },
        Syntax::Unary { op, operand } => NodeKind::Expression {
            op,
            lhs: lower(tree, lines, *operand),
            rhs: None,
        },
        Syntax::Binary { op, lhs, rhs } => {
            let lhs = lower(tree, lines, *lhs);
            let rhs = lower(tree, lines, *rhs);
            NodeKind::Expression {
                op,
                lhs,
                rhs: Some(rhs),
            }
        }
        Syntax::List(items) => NodeKind::List(lower_all(tree, lines, items)),
        Syntax::Stream { members, last } => {
            // Right-nested: `a >> b >> c` is `a >> (b >> c)`.
            let members = lower_all(tree, lines, members);
            let last = lower(tree, lines, *last);
            return members.into_iter().rev().fold(last, |right, left| {
                tree.add(NodeKind::Stream { left, right }, span, line)
            });
        }
        Syntax::Property { name, value } => NodeKind::Property {
            name,
            value: lower(tree, lines, *value),
        },
        Syntax::Declaration {
            type_name,
            name,
            size,
            properties,
        } => {
            let size = size.map(|size| lower(tree, lines, *size));
            let decl = Decl {
                name,
                object_type: ObjectType::parse(&type_name),
                properties: lower_all(tree, lines, properties),
            };
            match size {
                Some(size) => NodeKind::BundleDeclaration { decl, size },
                None => NodeKind::Declaration(decl),
            }
        }
        Syntax::Import { name, alias } => NodeKind::Import { name, alias },
        Syntax::Platform { framework, version } => NodeKind::Platform { framework, version },
    };
    tree.add(kind, span, line)
}

// ── Tests ──
