//! Tests for expression parsing.

use lox_parser::{parse, Expr, Lit, Stmt, TokenKind};

fn first_expr(source: &str) -> Expr {
    let program = parse(source).unwrap();
    match program.statements.into_iter().next().unwrap() {
        Stmt::Expression { expr } => expr,
        other => panic!("expected expression statement, got {other:?}"),
    }
}

#[test]
fn precedence_of_term_and_factor() {
    // 1 + 2 * 3 parses as 1 + (2 * 3).
    match first_expr("1 + 2 * 3;") {
        Expr::Binary { op, right, .. } => {
            assert_eq!(op.kind, TokenKind::Plus);
            assert!(matches!(*right, Expr::Binary { ref op, .. } if op.kind == TokenKind::Star));
        }
        other => panic!("expected binary, got {other:?}"),
    }
}

#[test]
fn assignment_is_right_associative() {
    match first_expr("a = b = 1;") {
        Expr::Assign { name, value } => {
            assert_eq!(name.lexeme, "a");
            assert!(matches!(*value, Expr::Assign { .. }));
        }
        other => panic!("expected assignment, got {other:?}"),
    }
}

#[test]
fn parses_property_chain_and_call() {
    match first_expr("a.b.c(1, 2);") {
        Expr::Call { callee, args, .. } => {
            assert_eq!(args.len(), 2);
            assert!(matches!(*callee, Expr::Get { ref name, .. } if name.lexeme == "c"));
        }
        other => panic!("expected call, got {other:?}"),
    }
}

#[test]
fn parses_super_access() {
    let program = parse("class B < A { m() { return super.m(); } }").unwrap();
    let Stmt::Class(class) = &program.statements[0] else { panic!() };
    let Stmt::Return { value: Some(Expr::Call { callee, .. }), .. } = &class.methods[0].body[0]
    else {
        panic!("expected return of super call")
    };
    assert!(matches!(&**callee, Expr::Super { method, .. } if method.lexeme == "m"));
}

#[test]
fn string_literal_strips_quotes() {
    match first_expr("\"hi\";") {
        Expr::Literal { value: Lit::Str(s), .. } => assert_eq!(s, "hi"),
        other => panic!("expected string literal, got {other:?}"),
    }
}

#[test]
fn logical_operators_nest() {
    match first_expr("a or b and c;") {
        Expr::Logical { op, right, .. } => {
            assert_eq!(op.kind, TokenKind::Or);
            assert!(matches!(*right, Expr::Logical { ref op, .. } if op.kind == TokenKind::And));
        }
        other => panic!("expected logical, got {other:?}"),
    }
}
