//! Tests for statement parsing.

use lox_parser::{parse, Expr, Lit, Stmt};

#[test]
fn parses_var_declaration() {
    let program = parse("var x = 42;").unwrap();
    assert_eq!(program.statements.len(), 1);
    match &program.statements[0] {
        Stmt::Var { name, initializer } => {
            assert_eq!(name.lexeme, "x");
            assert!(matches!(
                initializer.as_ref().unwrap().as_literal(),
                Some(Lit::Number(n)) if *n == 42.0
            ));
        }
        other => panic!("expected var declaration, got {other:?}"),
    }
}

#[test]
fn parses_function_declaration() {
    let program = parse("fun add(a, b) { return a + b; }").unwrap();
    match &program.statements[0] {
        Stmt::Function(decl) => {
            assert_eq!(decl.name.lexeme, "add");
            assert_eq!(decl.params.len(), 2);
            assert_eq!(decl.body.len(), 1);
            assert!(!decl.is_native);
        }
        other => panic!("expected function declaration, got {other:?}"),
    }
}

#[test]
fn parses_class_with_superclass() {
    let program = parse("class B < A { m() { return 1; } }").unwrap();
    match &program.statements[0] {
        Stmt::Class(decl) => {
            assert_eq!(decl.name.lexeme, "B");
            assert!(matches!(
                decl.superclass,
                Some(Expr::Variable { ref name }) if name.lexeme == "A"
            ));
            assert_eq!(decl.methods.len(), 1);
            assert_eq!(decl.methods[0].name.lexeme, "m");
        }
        other => panic!("expected class declaration, got {other:?}"),
    }
}

#[test]
fn desugars_for_into_while() {
    let program = parse("for (var i = 0; i < 3; i = i + 1) print i;").unwrap();
    match &program.statements[0] {
        Stmt::Block { statements } => {
            assert!(matches!(statements[0], Stmt::Var { .. }));
            assert!(matches!(statements[1], Stmt::While { .. }));
        }
        other => panic!("expected desugared block, got {other:?}"),
    }
}

#[test]
fn reports_missing_semicolon() {
    let err = parse("print 1").unwrap_err();
    assert!(err.0[0].message.contains("Expect ';'"));
}

#[test]
fn recovers_and_reports_multiple_errors() {
    let err = parse("var 1; var 2;").unwrap_err();
    assert!(err.0.len() >= 2);
}

#[test]
fn rejects_invalid_assignment_target() {
    let err = parse("1 = 2;").unwrap_err();
    assert_eq!(err.0[0].message, "Invalid assignment target.");
}
