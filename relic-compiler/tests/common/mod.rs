//! Shared helpers for building statement trees by hand; the parser that
//! normally produces them lives outside this crate.

#![allow(dead_code)]

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use relic_compiler::ast::{
    Expression, ExpressionKind, Statement, StatementKind, TypeExpression, TypeExpressionKind,
};
use relic_compiler::compiler::NullEmbedLoader;
use relic_compiler::platform::PlatformCollection;
use relic_compiler::report::CollectingSink;
use relic_compiler::Compiler;
use relic_types::{BinaryOperator, Qualifiers, SourceLocation};

pub fn loc(line: usize) -> SourceLocation {
    SourceLocation::line("test.wiz", line)
}

pub fn int(value: i128, line: usize) -> Expression {
    Expression::integer(value, loc(line))
}

pub fn boolean(value: bool, line: usize) -> Expression {
    Expression::boolean(value, loc(line))
}

pub fn string(value: &str, line: usize) -> Expression {
    Expression::new(ExpressionKind::StringLiteral(Arc::from(value)), loc(line))
}

pub fn ident(name: &str, line: usize) -> Expression {
    Expression::new(
        ExpressionKind::Identifier(vec![Arc::from(name)]),
        loc(line),
    )
}

pub fn binary(op: BinaryOperator, left: Expression, right: Expression, line: usize) -> Expression {
    Expression::new(
        ExpressionKind::BinaryOperator {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        loc(line),
    )
}

pub fn array(items: Vec<Expression>, line: usize) -> Expression {
    Expression::new(ExpressionKind::ArrayLiteral(items), loc(line))
}

pub fn type_ident(name: &str, line: usize) -> TypeExpression {
    TypeExpression::new(
        TypeExpressionKind::Identifier(vec![Arc::from(name)]),
        loc(line),
    )
}

pub fn array_type(element: &str, size: i128, line: usize) -> TypeExpression {
    TypeExpression::new(
        TypeExpressionKind::Array {
            element_type: Box::new(type_ident(element, line)),
            size: Some(Box::new(int(size, line))),
        },
        loc(line),
    )
}

pub fn block(statements: Vec<Statement>, line: usize) -> Statement {
    Statement::new(StatementKind::Block(statements), loc(line))
}

/// `dest = source;`
pub fn assign(dest: Expression, source: Expression, line: usize) -> Statement {
    Statement::new(
        StatementKind::ExpressionStatement(Box::new(binary(
            BinaryOperator::Assignment,
            dest,
            source,
            line,
        ))),
        loc(line),
    )
}

/// `name();`
pub fn call_statement(name: &str, line: usize) -> Statement {
    Statement::new(
        StatementKind::ExpressionStatement(Box::new(Expression::new(
            ExpressionKind::Call {
                inlined: false,
                function: Box::new(ident(name, line)),
                arguments: Vec::new(),
            },
            loc(line),
        ))),
        loc(line),
    )
}

pub fn func(name: &str, body: Vec<Statement>, line: usize) -> Statement {
    Statement::new(
        StatementKind::Func {
            far: false,
            inline: false,
            name: Arc::from(name),
            parameters: Vec::new(),
            return_type: None,
            body: Rc::new(block(body, line)),
        },
        loc(line),
    )
}

pub fn bank(name: &str, address: Option<i128>, kind: &str, size: i128, line: usize) -> Statement {
    Statement::new(
        StatementKind::Bank {
            names: vec![Arc::from(name)],
            addresses: vec![address.map(|address| int(address, line))],
            ty: TypeExpression::new(
                TypeExpressionKind::Array {
                    element_type: Box::new(type_ident(kind, line)),
                    size: Some(Box::new(int(size, line))),
                },
                loc(line),
            ),
        },
        loc(line),
    )
}

pub fn in_bank(name: &str, dest: Option<i128>, body: Vec<Statement>, line: usize) -> Statement {
    Statement::new(
        StatementKind::In {
            pieces: vec![Arc::from(name)],
            dest: dest.map(|dest| Box::new(int(dest, line))),
            body: Box::new(block(body, line)),
        },
        loc(line),
    )
}

pub fn let_statement(name: &str, value: Expression, line: usize) -> Statement {
    Statement::new(
        StatementKind::Let {
            name: Arc::from(name),
            parameters: Vec::new(),
            value: Box::new(value),
        },
        loc(line),
    )
}

/// `const name : ty [@ address] = value;`
pub fn const_var(
    name: &str,
    ty: TypeExpression,
    address: Option<i128>,
    value: Expression,
    line: usize,
) -> Statement {
    Statement::new(
        StatementKind::Var {
            qualifiers: Qualifiers::CONST,
            names: vec![Arc::from(name)],
            addresses: vec![address.map(|address| int(address, line))],
            ty: Some(ty),
            value: Some(Box::new(value)),
        },
        loc(line),
    )
}

pub fn config(items: Vec<(&str, Expression)>, line: usize) -> Statement {
    Statement::new(
        StatementKind::Config {
            items: items
                .into_iter()
                .map(|(key, value)| (Arc::from(key), value))
                .collect(),
        },
        loc(line),
    )
}

pub fn file(statements: Vec<Statement>) -> Rc<Statement> {
    Rc::new(Statement::new(
        StatementKind::File {
            statements,
            original_path: Arc::from("test.wiz"),
            canonical_path: Arc::from("test.wiz"),
            description: Arc::from("file `test.wiz`"),
        },
        loc(1),
    ))
}

pub fn compile(platform: &str, statements: Vec<Statement>) -> (Compiler, CollectingSink, bool) {
    let program = file(statements);
    let platforms = PlatformCollection::new();
    let platform = platforms
        .create_by_name(platform)
        .expect("platform is registered");
    let sink = CollectingSink::new();
    let mut compiler = Compiler::new(
        program,
        platform,
        Box::new(sink.clone()),
        HashMap::new(),
        Box::new(NullEmbedLoader),
    );
    let ok = compiler.compile();
    (compiler, sink, ok)
}
