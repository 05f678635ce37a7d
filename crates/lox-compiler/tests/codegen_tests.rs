//! End-to-end tests of the compilation pipeline: source in, instructions out.

use lox_compiler::{compile, CompileError, Op, UnitKind};

#[test]
fn script_unit_comes_first() {
    let program = compile("print 1;").unwrap();
    let entry = program.entry();
    assert_eq!(entry.kind, UnitKind::Script);
    assert!(entry.code.contains(&Op::Print));
}

#[test]
fn function_gets_its_own_unit() {
    let program = compile("fun f() { return 1; } print f();").unwrap();
    let f = program.units.iter().find(|u| u.name == "f").unwrap();
    assert_eq!(f.kind, UnitKind::Function);
    assert_eq!(f.arity, 0);
    assert!(matches!(f.code.last(), Some(Op::Return)));
    assert!(program.entry().code.iter().any(|op| matches!(op, Op::Closure { .. })));
}

#[test]
fn captured_local_goes_through_a_cell() {
    // x is reassigned so it stays a real binding instead of folding away.
    let source = "
        fun make() {
            var x = 1;
            fun get() { return x; }
            x = 2;
            return get;
        }
        print make()();
    ";
    let program = compile(source).unwrap();
    let make = program.units.iter().find(|u| u.name == "make").unwrap();
    assert!(make.code.iter().any(|op| matches!(op, Op::DefineCell { .. })));
    let get = program.units.iter().find(|u| u.name == "get").unwrap();
    assert_eq!(get.captures.len(), 1);
    assert_eq!(get.captures[0].hops, 0);
    assert!(matches!(get.code[0], Op::LoadCapture { .. }));
    assert!(get.code.contains(&Op::GetCell(0)));
}

#[test]
fn capture_across_two_frames_is_one_hop() {
    let source = "
        fun outer() {
            var x = 1;
            fun middle() {
                fun inner() { return x; }
                return inner;
            }
            return middle;
        }
        print outer()()();
    ";
    let program = compile(source).unwrap();
    let inner = program.units.iter().find(|u| u.name == "inner").unwrap();
    assert_eq!(inner.captures[0].hops, 1);
}

#[test]
fn captured_top_level_variable_lives_in_the_global_table() {
    let program = compile("var x = 1; fun f() { return x; } x = 2; print f();").unwrap();
    assert!(program.entry().code.iter().any(|op| matches!(op, Op::DefineGlobalCell { .. })));
    let f = program.units.iter().find(|u| u.name == "f").unwrap();
    assert!(f.captures.is_empty());
    assert!(f.code.iter().any(|op| matches!(op, Op::GetGlobal { .. })));
}

#[test]
fn forward_reference_makes_late_init_global() {
    let program = compile("fun f() { return x; } var x = 1; print f();").unwrap();
    let entry = program.entry();
    assert_eq!(entry.late_inits.len(), 1);
    assert!(entry.code.iter().any(|op| matches!(op, Op::LateDefineGlobal { .. })));
}

#[test]
fn undefined_variable_is_rejected_before_codegen() {
    let err = compile("print missing;").unwrap_err();
    let CompileError::Undefined(diags) = err else { panic!("expected undefined, got {err:?}") };
    assert_eq!(diags[0].message, "Undefined variable 'missing'.");
}

#[test]
fn semantic_error_is_rejected() {
    let err = compile("return 1;").unwrap_err();
    assert!(matches!(err, CompileError::Semantic(_)));
}

#[test]
fn initializer_unit_returns_the_receiver() {
    let program = compile("class C { init() { this.v = 1; } } print C().v;").unwrap();
    let init = program.units.iter().find(|u| u.name == "init").unwrap();
    assert_eq!(init.kind, UnitKind::Initializer);
    assert!(matches!(init.code.last(), Some(Op::ReturnReceiver)));
}

#[test]
fn class_descriptor_lists_methods() {
    let program = compile("class A { m() { return 1; } } var a = A(); print a.m();").unwrap();
    assert_eq!(program.classes.len(), 1);
    assert_eq!(program.classes[0].name, "A");
    assert_eq!(program.classes[0].methods[0].name, "m");
    assert!(program
        .entry()
        .code
        .iter()
        .any(|op| matches!(op, Op::Class { has_super: false, .. })));
}

#[test]
fn unused_natives_are_dropped() {
    let program = compile("print 1;").unwrap();
    assert!(!program.units.iter().any(|u| u.kind == UnitKind::Native));
}

#[test]
fn used_native_keeps_a_stub_unit() {
    let program = compile("print clock();").unwrap();
    let clock = program.units.iter().find(|u| u.name == "clock").unwrap();
    assert_eq!(clock.kind, UnitKind::Native);
    assert!(clock.code.is_empty());
}

#[test]
fn dead_branch_is_not_emitted() {
    let program = compile("if (nil) print 1; else print 2; print 3;").unwrap();
    let prints = program.entry().code.iter().filter(|op| **op == Op::Print).count();
    assert_eq!(prints, 2);
}

#[test]
fn while_loop_jumps_back_to_its_condition() {
    let program = compile("var i = 0; while (i < 3) i = i + 1; print i;").unwrap();
    let code = &program.entry().code;
    let back = code.iter().find_map(|op| match op {
        Op::Jump(target) => Some(*target),
        _ => None,
    });
    let position = code.iter().position(|op| matches!(op, Op::Jump(_))).unwrap();
    assert!((back.unwrap() as usize) < position);
}

#[test]
fn extra_optimization_passes_change_nothing_once_settled() {
    let source = "
        var rate = 2 + 3;
        fun area(w) {
            var k = rate;
            if (true) return w * k; else return 0;
        }
        class Shape {
            init(w) { this.w = w; }
            size() { return area(this.w); }
        }
        print Shape(4).size();
    ";
    let settled = lox_compiler::Compiler::with_passes(5).compile(source).unwrap();
    let more = lox_compiler::Compiler::with_passes(8).compile(source).unwrap();
    assert_eq!(settled, more);
}

#[test]
fn program_serializes_to_json() {
    let program = compile("print 1 + 2;").unwrap();
    let json = serde_json::to_string(&program).unwrap();
    let back: lox_compiler::Program = serde_json::from_str(&json).unwrap();
    assert_eq!(back, program);
}
