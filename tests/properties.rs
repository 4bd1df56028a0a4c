use std::sync::Arc;

use ember::source::{InputRing, RingSource, StrSource};
use ember::value::TypeTag;
use ember::{Config, LispError, Machine, Value};

fn eval(m: &mut Machine, src: &str) -> String {
    let v = m.eval_str(src).unwrap();
    m.repr(v)
}

#[test]
fn constructors_tag_and_cast_back() {
    let mut m = Machine::new().unwrap();
    assert_eq!(m.type_of(Value::FixNum(-3)), TypeTag::FixNum);
    assert_eq!(m.to_fixnum(Value::FixNum(-3), "t").unwrap(), -3);
    assert_eq!(m.type_of(Value::Char('z')), TypeTag::Character);
    assert_eq!(m.to_char(Value::Char('z'), "t").unwrap(), 'z');

    let f = m.make_float(0.25).unwrap();
    assert_eq!(m.type_of(f), TypeTag::Float);
    assert_eq!(m.to_float(f, "t").unwrap(), 0.25);

    let s = m.make_string("hello").unwrap();
    assert_eq!(m.type_of(s), TypeTag::String);
    assert_eq!(m.to_string_ref(s, "t").unwrap(), "hello");

    let sym = m.intern("foo");
    assert_eq!(m.type_of(sym), TypeTag::Symbol);
    let id = m.to_symbol(sym, "t").unwrap();
    assert_eq!(m.symbols.name(id), "foo");

    let c = m.cons(Value::FixNum(1), Value::Nil).unwrap();
    assert_eq!(m.type_of(c), TypeTag::List);
    let r = m.to_cons(c, "t").unwrap();
    assert_eq!(m.heap.car(r), Value::FixNum(1));
}

#[test]
fn stack_rooted_cons_keeps_contents_across_collection() {
    let mut m = Machine::new().unwrap();
    let c = m.cons(Value::FixNum(1), Value::FixNum(2)).unwrap();
    let slot = m.stack.push(c).unwrap();
    // garbage ahead of it, so compaction has to move it
    m.stack.set(slot, Value::Nil);
    for i in 0..100 {
        m.cons(Value::FixNum(i), Value::Nil).unwrap();
    }
    let c = m.cons(Value::FixNum(1), Value::FixNum(2)).unwrap();
    m.stack.set(slot, c);
    m.collect();
    let r = m.stack.get(slot).as_cons().unwrap();
    assert_eq!(m.heap.car(r), Value::FixNum(1));
    assert_eq!(m.heap.cdr(r), Value::FixNum(2));
    assert_eq!(m.heap.object_count(), m.last_gc().live_objects);
}

#[test]
fn self_referential_cons_survives_relocation() {
    let mut m = Machine::new().unwrap();
    for _ in 0..50 {
        m.make_string("garbage").unwrap();
    }
    let x = m.cons(Value::Nil, Value::Nil).unwrap();
    let slot = m.stack.push(x).unwrap();
    m.heap.set_cdr(x.as_cons().unwrap(), x);
    m.collect();
    let x = m.stack.get(slot);
    assert_eq!(m.heap.cdr(x.as_cons().unwrap()), x);
}

#[test]
fn symbols_keep_identity_across_collection() {
    let mut m = Machine::new().unwrap();
    let a = m.intern("foo");
    m.eval_str("(set 'junk '(1 2 3))").unwrap();
    m.eval_str("(set 'junk nil)").unwrap();
    m.collect();
    assert_eq!(m.intern("foo"), a);
}

#[test]
fn label_factorial_and_shadowing() {
    let mut m = Machine::new().unwrap();
    assert_eq!(
        eval(
            &mut m,
            "((label f (lambda (x) (if (eq x 0) 1 (* x (f (- x 1)))))) 5)"
        ),
        "120"
    );
    m.eval_str("(set 'x 'global)").unwrap();
    assert_eq!(eval(&mut m, "((lambda (x) x) 'local)"), "local");
    assert_eq!(eval(&mut m, "x"), "global");
}

#[test]
fn tail_calls_run_in_constant_native_stack() {
    let mut m = Machine::new().unwrap();
    let src = "((label loop (lambda (n) (if (eq n 0) 'done (loop (- n 1))))) 100000)";
    assert_eq!(eval(&mut m, src), "done");
}

#[test]
fn rest_arguments_keep_their_order() {
    let mut m = Machine::new().unwrap();
    assert_eq!(eval(&mut m, "((lambda (a . rest) rest) 1 2 3)"), "(2 3)");
    assert_eq!(eval(&mut m, "((lambda args args))"), "nil");
}

#[test]
fn arithmetic() {
    let mut m = Machine::new().unwrap();
    assert_eq!(eval(&mut m, "(+ 1 2 3)"), "6");
    assert_eq!(eval(&mut m, "(- 5)"), "-5");
    assert_eq!(m.eval_str("(/ 1 0)"), Err(LispError::DivisionByZero));
}

#[test]
fn ordering_across_types_is_antisymmetric() {
    let mut m = Machine::new().unwrap();
    let forward = eval(&mut m, "(< '(1) 1)");
    let backward = eval(&mut m, "(< 1 '(1))");
    assert_ne!(forward, backward);
    // lists sort first
    assert_eq!(forward, "t");
}

#[test]
fn errors_unwind_to_a_clean_top_level() {
    let mut m = Machine::new().unwrap();
    assert!(matches!(
        m.eval_str("(car (undefined-thing))"),
        Err(LispError::UnboundVariable(_))
    ));
    assert!(m.stack.is_empty());
    assert_eq!(eval(&mut m, "(+ 1 1)"), "2");
}

#[test]
fn printed_output_reads_back() {
    let mut m = Machine::new().unwrap();
    let out = m.capture_output();
    m.eval_str("(set 'x '(a \"b\" #\\c 1.5))").unwrap();
    m.eval_str("(rplacd (cdr (cdr (cdr x))) x)").unwrap();
    m.eval_str("(print x)").unwrap();
    let text = out.take();
    assert_eq!(text, "#0=(a \"b\" #\\c 1.5 . #0#)\n");
    let again = m.eval_str(&format!("'{}", text.trim_end())).unwrap();
    assert_eq!(m.repr(again), text.trim_end());
}

#[test]
fn read_builtin_consumes_machine_input() {
    let mut m = Machine::new().unwrap();
    m.set_input(Box::new(StrSource::new("(1 2) foo")));
    assert_eq!(eval(&mut m, "(read)"), "(1 2)");
    assert_eq!(eval(&mut m, "(read)"), "foo");
    assert_eq!(m.eval_str("(read)"), Err(LispError::UnexpectedEof));
}

#[test]
fn embedded_machine_reads_from_the_input_ring() {
    let mut m = Machine::with_config(Config::embedded()).unwrap();
    let ring = Arc::new(InputRing::new(16));
    for &b in b"(cons 1 2)" {
        assert!(ring.push(b));
    }
    ring.close();
    m.set_input(Box::new(RingSource::new(Arc::clone(&ring))));
    assert_eq!(eval(&mut m, "(eval (read))"), "(1 . 2)");
}

#[test]
fn exit_reports_its_status() {
    let mut m = Machine::new().unwrap();
    assert_eq!(m.eval_str("(exit 3)"), Err(LispError::Exit(3)));
    assert!(LispError::Exit(3).is_fatal());
}
