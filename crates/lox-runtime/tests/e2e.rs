//! Compile-and-run tests asserting printed output and runtime errors.

use lox_runtime::{RuntimeError, Vm};

fn run(source: &str) -> Vec<String> {
    let program = lox_compiler::compile(source).unwrap();
    let mut vm = Vm::with_output(program, Vec::new());
    vm.run().unwrap();
    String::from_utf8(vm.into_output()).unwrap().lines().map(str::to_owned).collect()
}

fn run_err(source: &str) -> RuntimeError {
    let program = lox_compiler::compile(source).unwrap();
    let mut vm = Vm::with_output(program, Vec::new());
    vm.run().unwrap_err()
}

#[test]
fn prints_literal_values() {
    assert_eq!(
        run("print 1 + 2; print \"a\" + \"b\"; print true; print nil;"),
        vec!["3", "ab", "true", "nil"]
    );
}

#[test]
fn numbers_trim_integral_values() {
    assert_eq!(run("print 100; print 2.5; print 10 / 4;"), vec!["100", "2.5", "2.5"]);
}

#[test]
fn while_loop_counts() {
    assert_eq!(run("var i = 0; while (i < 3) { i = i + 1; } print i;"), vec!["3"]);
}

#[test]
fn for_loop_desugars_and_runs() {
    assert_eq!(run("for (var i = 0; i < 3; i = i + 1) print i;"), vec!["0", "1", "2"]);
}

#[test]
fn closure_counter_keeps_state() {
    let source = "
        fun makeCounter() {
            var i = 0;
            fun count() { i = i + 1; print i; }
            return count;
        }
        var c = makeCounter();
        c();
        c();
    ";
    assert_eq!(run(source), vec!["1", "2"]);
}

#[test]
fn independent_counters_do_not_share_cells() {
    let source = "
        fun makeCounter() {
            var i = 0;
            fun count() { i = i + 1; return i; }
            return count;
        }
        var a = makeCounter();
        var b = makeCounter();
        print a();
        print b();
        print a();
    ";
    assert_eq!(run(source), vec!["1", "1", "2"]);
}

#[test]
fn sibling_closures_share_the_owner_cell() {
    let source = "
        fun make() {
            var n = 0;
            fun inc() { n = n + 1; }
            fun get() { return n; }
            inc();
            inc();
            print get();
        }
        make();
    ";
    assert_eq!(run(source), vec!["2"]);
}

#[test]
fn shadowed_variable_is_distinct() {
    assert_eq!(run("var x = 1; { var x = 2; print x; } print x;"), vec!["2", "1"]);
}

#[test]
fn sibling_blocks_never_leak_values_through_reused_slots() {
    let blocks: String = (0..8).map(|i| format!("{{ var v = {i}; print v; }} ")).collect();
    let source = format!("fun f() {{ {blocks} }} f();");
    let expected: Vec<String> = (0..8).map(|i| i.to_string()).collect();
    assert_eq!(run(&source), expected);
}

#[test]
fn logical_operators_short_circuit() {
    let source = "
        fun loud(v) { print \"eval\"; return v; }
        print loud(false) or loud(true);
        print loud(false) and loud(true);
    ";
    assert_eq!(run(source), vec!["eval", "eval", "true", "eval", "false"]);
}

#[test]
fn class_fields_and_methods() {
    let source = "
        class Counter {
            init() { this.count = 0; }
            inc() {
                this.count = this.count + 1;
                return this.count;
            }
        }
        var c = Counter();
        print c.inc();
        print c.inc();
    ";
    assert_eq!(run(source), vec!["1", "2"]);
}

#[test]
fn super_dispatches_to_the_superclass() {
    let source = "
        class A { greet() { return \"A\"; } }
        class B < A { greet() { return \"B+\" + super.greet(); } }
        print B().greet();
    ";
    assert_eq!(run(source), vec!["B+A"]);
}

#[test]
fn inherited_method_binds_the_subclass_instance() {
    let source = "
        class A {
            init() { this.tag = \"a\"; }
            tag() { return this.tag; }
        }
        class B < A {}
        print B().tag();
    ";
    assert_eq!(run(source), vec!["a"]);
}

#[test]
fn binding_does_not_mutate_the_class_method() {
    let source = "
        class C { who() { return this; } }
        var a = C();
        var b = C();
        print a.who() == a;
        print b.who() == b;
        print a.who() == b;
    ";
    assert_eq!(run(source), vec!["true", "true", "false"]);
}

#[test]
fn this_reaches_through_a_nested_function() {
    let source = "
        class P {
            name() {
                fun get() { return this; }
                return get();
            }
        }
        var p = P();
        print p.name() == p;
    ";
    assert_eq!(run(source), vec!["true"]);
}

#[test]
fn capture_crosses_a_class_boundary() {
    let source = "
        class C {
            m() {
                var secret = 41;
                class D {
                    n() {
                        fun peek() { return secret + 1; }
                        return peek();
                    }
                }
                return D().n();
            }
        }
        print C().m();
    ";
    assert_eq!(run(source), vec!["42"]);
}

#[test]
fn method_captures_enclosing_function_local() {
    let source = "
        fun box(v) {
            class Box { get() { return v; } }
            return Box();
        }
        print box(7).get();
    ";
    assert_eq!(run(source), vec!["7"]);
}

#[test]
fn self_referencing_class_constructs_itself() {
    let source = "
        class List {
            make() { return List(); }
        }
        print List().make();
    ";
    assert_eq!(run(source), vec!["List instance"]);
}

#[test]
fn top_level_self_initializer_reads_nil() {
    assert_eq!(run("var a = a; print a;"), vec!["nil"]);
}

#[test]
fn bare_redeclaration_resets_a_reassigned_global() {
    assert_eq!(run("var x = 1; x = 2; var x; print x;"), vec!["nil"]);
}

#[test]
fn forward_global_reference_resolves_after_definition() {
    assert_eq!(run("fun f() { return x; } var x = 42; print f();"), vec!["42"]);
}

#[test]
fn forward_reference_before_definition_reads_nil() {
    assert_eq!(run("fun f() { return x; } print f(); var x = 1;"), vec!["nil"]);
}

#[test]
fn explicit_bare_return_in_init_yields_the_receiver() {
    assert_eq!(run("class C { init() { return; } } print C();"), vec!["C instance"]);
}

#[test]
fn dead_binding_keeps_its_side_effects() {
    assert_eq!(run("fun f() { print \"hi\"; return 1; } var unused = f();"), vec!["hi"]);
}

#[test]
fn zero_factor_skips_the_other_operand() {
    // The multiply-by-zero collapse drops the call entirely.
    assert_eq!(run("fun f() { print \"x\"; return 2; } print 0 * f();"), vec!["0"]);
}

#[test]
fn callables_have_display_forms() {
    assert_eq!(
        run("fun f() {} class C {} print f; print C; print clock;"),
        vec!["<fn f>", "C", "<native fn>"]
    );
}

#[test]
fn arity_mismatch_is_a_runtime_error() {
    let err = run_err("fun f(a) { return a; } f(1, 2);");
    assert_eq!(err.message, "Expected 1 arguments but got 2.");
}

#[test]
fn calling_a_non_callable_fails() {
    let err = run_err("var x = 3; x();");
    assert_eq!(err.message, "Can only call functions and classes.");
}

#[test]
fn deep_recursion_overflows() {
    let err = run_err("fun f() { return f(); } f();");
    assert_eq!(err.message, "Stack overflow.");
}

#[test]
fn arithmetic_type_errors_carry_the_line() {
    let err = run_err("print 1 + true;");
    assert_eq!(err.message, "Operands must be two numbers or two strings.");
    assert_eq!(err.line, 1);
    assert_eq!(err.to_string(), "Operands must be two numbers or two strings.\n[line 1]");
}

#[test]
fn left_operand_is_checked_before_the_right_runs() {
    let program = lox_compiler::compile("fun f() { print \"ran\"; return 1; } print true < f();")
        .unwrap();
    let mut vm = Vm::with_output(program, Vec::new());
    let err = vm.run().unwrap_err();
    assert_eq!(err.message, "Operands must be numbers.");
    assert!(String::from_utf8(vm.into_output()).unwrap().is_empty());
}

#[test]
fn unary_minus_requires_a_number() {
    let err = run_err("print -\"x\";");
    assert_eq!(err.message, "Operand must be a number.");
}

#[test]
fn property_access_on_non_instance_fails() {
    let err = run_err("var v = true; print v.x;");
    assert_eq!(err.message, "Only instances have properties.");
}

#[test]
fn field_write_on_non_instance_fails() {
    let err = run_err("var v = true; v.x = 1;");
    assert_eq!(err.message, "Only instances have fields.");
}

#[test]
fn missing_property_is_reported() {
    let err = run_err("class C {} print C().missing;");
    assert_eq!(err.message, "Undefined property 'missing'.");
}

#[test]
fn superclass_value_must_be_a_class() {
    let err = run_err("fun f() {} class C < f {} print C;");
    assert_eq!(err.message, "Superclass must be a class.");
}
