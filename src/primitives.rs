use std::cmp::Ordering;

use crate::error::{LispError, LispResult};
use crate::eval::SPECIAL_FORMS;
use crate::heap::{HeapObject, NativeFn, OrdinaryFn};
use crate::machine::{Machine, Num};
use crate::printer;
use crate::reader;
use crate::value::Value;

/// Ordinary builtins. Arguments are evaluated left to right and sit in the
/// top `nargs` stack slots when the function runs.
const BUILTINS: &[(&str, OrdinaryFn)] = &[
    ("set", bi_set),
    ("boundp", bi_boundp),
    ("eq", bi_eq),
    ("cons", bi_cons),
    ("car", bi_car),
    ("cdr", bi_cdr),
    ("rplaca", bi_rplaca),
    ("rplacd", bi_rplacd),
    ("atom", bi_atom),
    ("consp", bi_consp),
    ("symbolp", bi_symbolp),
    ("numberp", bi_numberp),
    ("fixnump", bi_fixnump),
    ("stringp", bi_stringp),
    ("+", bi_add),
    ("-", bi_sub),
    ("*", bi_mul),
    ("/", bi_div),
    ("<", bi_less),
    ("not", bi_not),
    ("eval", bi_eval),
    ("apply", bi_apply),
    ("print", bi_print),
    ("princ", bi_princ),
    ("read", bi_read),
    ("error", bi_error),
    ("prog1", bi_prog1),
    ("assoc", bi_assoc),
    ("gensym", bi_gensym),
    ("symbol-name", bi_symbol_name),
    ("vector", bi_vector),
    ("vector-ref", bi_vector_ref),
    ("vector-length", bi_vector_length),
    ("vector-push", bi_vector_push),
    ("make-bit-vector", bi_make_bit_vector),
    ("bit-ref", bi_bit_ref),
    ("set-bit", bi_set_bit),
    ("resize-bit-vector", bi_resize_bit_vector),
    ("gc", bi_gc),
    ("print-stack", bi_print_stack),
    ("exit", bi_exit),
];

/// Bind every special operator and builtin to its (constant) global name.
pub fn install(m: &mut Machine) -> LispResult<()> {
    for &(name, f) in SPECIAL_FORMS {
        define(m, name, NativeFn::Special(f))?;
    }
    for &(name, f) in BUILTINS {
        define(m, name, NativeFn::Ordinary(f))?;
    }
    log::trace!(
        "installed {} builtins, heap {}/{} bytes",
        SPECIAL_FORMS.len() + BUILTINS.len(),
        m.heap.used(),
        m.heap.capacity()
    );
    Ok(())
}

fn define(m: &mut Machine, name: &'static str, func: NativeFn) -> LispResult<()> {
    let value = m.make_builtin(name, func)?;
    let id = m.symbols.intern(name);
    m.symbols.define_constant(id, value);
    Ok(())
}

/// The `i`th of the top `nargs` stack slots.
#[inline]
fn arg(m: &Machine, nargs: usize, i: usize) -> Value {
    m.stack.get(m.stack.len() - nargs + i)
}

fn too_few(op: &str) -> LispError {
    LispError::TooFewArguments(op.to_string())
}

// ---- variables --------------------------------------------------------------

/// (set name value): first binding in the calling frame, else the global.
fn bi_set(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("set", nargs, 2)?;
    let (name, value) = (arg(m, nargs, 0), arg(m, nargs, 1));
    m.assign(name, value, m.frame)
}

fn bi_boundp(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("boundp", nargs, 1)?;
    let bound = match arg(m, nargs, 0) {
        Value::Gensym(_) => false,
        v => m.symbols.value(m.to_symbol(v, "boundp")?).is_some(),
    };
    Ok(m.bool_value(bound))
}

// ---- conses -----------------------------------------------------------------

/// (eq a b): identity. Fixnums and characters compare by value.
fn bi_eq(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("eq", nargs, 2)?;
    Ok(m.bool_value(arg(m, nargs, 0) == arg(m, nargs, 1)))
}

fn bi_cons(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("cons", nargs, 2)?;
    m.cons(arg(m, nargs, 0), arg(m, nargs, 1))
}

fn bi_car(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("car", nargs, 1)?;
    m.car(arg(m, nargs, 0), "car")
}

fn bi_cdr(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("cdr", nargs, 1)?;
    m.cdr(arg(m, nargs, 0), "cdr")
}

fn bi_rplaca(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("rplaca", nargs, 2)?;
    let cell = arg(m, nargs, 0);
    let r = m.to_cons(cell, "rplaca")?;
    m.heap.set_car(r, arg(m, nargs, 1));
    Ok(cell)
}

fn bi_rplacd(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("rplacd", nargs, 2)?;
    let cell = arg(m, nargs, 0);
    let r = m.to_cons(cell, "rplacd")?;
    m.heap.set_cdr(r, arg(m, nargs, 1));
    Ok(cell)
}

/// (assoc alist key): first `(key . value)` pair whose car is eq to key.
fn bi_assoc(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("assoc", nargs, 2)?;
    let key = arg(m, nargs, 1);
    let mut list = arg(m, nargs, 0);
    while let Value::Cons(r) = list {
        let pair = m.heap.car(r);
        if let Value::Cons(p) = pair {
            if m.heap.car(p) == key {
                return Ok(pair);
            }
        }
        list = m.heap.cdr(r);
    }
    Ok(Value::Nil)
}

// ---- predicates -------------------------------------------------------------

fn predicate(m: &mut Machine, nargs: usize, op: &str, test: fn(Value) -> bool) -> LispResult<Value> {
    m.check_args(op, nargs, 1)?;
    Ok(m.bool_value(test(arg(m, nargs, 0))))
}

fn bi_atom(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    predicate(m, nargs, "atom", Value::is_atom)
}

fn bi_consp(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    predicate(m, nargs, "consp", Value::is_cons)
}

fn bi_symbolp(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    predicate(m, nargs, "symbolp", Value::is_symbol)
}

fn bi_numberp(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    predicate(m, nargs, "numberp", |v| v.type_of().is_number())
}

fn bi_fixnump(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    predicate(m, nargs, "fixnump", |v| matches!(v, Value::FixNum(_)))
}

fn bi_stringp(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    predicate(m, nargs, "stringp", |v| matches!(v, Value::Str(_)))
}

fn bi_not(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    predicate(m, nargs, "not", Value::is_nil)
}

// ---- arithmetic -------------------------------------------------------------

fn number_value(m: &mut Machine, n: Num) -> LispResult<Value> {
    match n {
        Num::Int(i) => Ok(Value::FixNum(i)),
        Num::Float(f) => m.make_float(f),
    }
}

/// Left fold over the arguments starting from `init`. Fixnums wrap; any
/// float argument makes the rest of the fold float.
fn fold(
    m: &mut Machine,
    nargs: usize,
    op: &str,
    init: Num,
    skip: usize,
    f: fn(Num, Num) -> LispResult<Num>,
) -> LispResult<Value> {
    let mut acc = init;
    for i in skip..nargs {
        let x = m.to_number(arg(m, nargs, i), op)?;
        acc = f(acc, x)?;
    }
    number_value(m, acc)
}

fn add(a: Num, b: Num) -> LispResult<Num> {
    Ok(match (a, b) {
        (Num::Int(x), Num::Int(y)) => Num::Int(x.wrapping_add(y)),
        _ => Num::Float(a.as_f64() + b.as_f64()),
    })
}

fn sub(a: Num, b: Num) -> LispResult<Num> {
    Ok(match (a, b) {
        (Num::Int(x), Num::Int(y)) => Num::Int(x.wrapping_sub(y)),
        _ => Num::Float(a.as_f64() - b.as_f64()),
    })
}

fn mul(a: Num, b: Num) -> LispResult<Num> {
    Ok(match (a, b) {
        (Num::Int(x), Num::Int(y)) => Num::Int(x.wrapping_mul(y)),
        _ => Num::Float(a.as_f64() * b.as_f64()),
    })
}

fn div(a: Num, b: Num) -> LispResult<Num> {
    if b.as_f64() == 0.0 {
        return Err(LispError::DivisionByZero);
    }
    Ok(match (a, b) {
        (Num::Int(x), Num::Int(y)) => Num::Int(x.wrapping_div(y)),
        _ => Num::Float(a.as_f64() / b.as_f64()),
    })
}

fn bi_add(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    fold(m, nargs, "+", Num::Int(0), 0, add)
}

fn bi_mul(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    fold(m, nargs, "*", Num::Int(1), 0, mul)
}

/// (- x) negates; (- x y ...) subtracts the rest from x.
fn bi_sub(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    match nargs {
        0 => Err(too_few("-")),
        1 => fold(m, nargs, "-", Num::Int(0), 0, sub),
        _ => {
            let first = m.to_number(arg(m, nargs, 0), "-")?;
            fold(m, nargs, "-", first, 1, sub)
        }
    }
}

/// (/ x) is the reciprocal; (/ x y ...) divides x by the rest.
fn bi_div(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    match nargs {
        0 => Err(too_few("/")),
        1 => fold(m, nargs, "/", Num::Int(1), 0, div),
        _ => {
            let first = m.to_number(arg(m, nargs, 0), "/")?;
            fold(m, nargs, "/", first, 1, div)
        }
    }
}

fn bi_less(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("<", nargs, 2)?;
    let ord = compare(m, arg(m, nargs, 0), arg(m, nargs, 1));
    Ok(m.bool_value(ord == Ordering::Less))
}

/// Total order over every value. Numbers compare numerically across fixnum
/// and float (a fixnum sorts before an equal float); other mixed pairs order
/// by type tag. Never allocates.
pub fn compare(m: &Machine, a: Value, b: Value) -> Ordering {
    let (ta, tb) = (a.type_of(), b.type_of());
    if ta.is_number() && tb.is_number() {
        return match (a, b) {
            (Value::FixNum(x), Value::FixNum(y)) => x.cmp(&y),
            _ => {
                let x = number_f64(m, a);
                let y = number_f64(m, b);
                x.total_cmp(&y).then(ta.cmp(&tb))
            }
        };
    }
    if ta != tb {
        return ta.cmp(&tb);
    }
    let h = &m.heap;
    match (a, b) {
        (Value::Char(x), Value::Char(y)) => x.cmp(&y),
        (Value::Symbol(x), Value::Symbol(y)) => m.symbols.name(x).cmp(m.symbols.name(y)),
        (Value::Symbol(_), Value::Gensym(_)) => Ordering::Less,
        (Value::Gensym(_), Value::Symbol(_)) => Ordering::Greater,
        (Value::Gensym(x), Value::Gensym(y)) => h.gensym_id(x).cmp(&h.gensym_id(y)),
        (Value::Str(x), Value::Str(y)) => h.string(x).cmp(h.string(y)),
        (Value::Builtin(x), Value::Builtin(y)) => {
            h.builtin(x).name.cmp(h.builtin(y).name).then(x.cmp(&y))
        }
        (Value::Nil, Value::Nil) => Ordering::Equal,
        (Value::Nil, _) => Ordering::Less,
        (_, Value::Nil) => Ordering::Greater,
        (Value::Cons(x), Value::Cons(y)) => h
            .list_length(a)
            .cmp(&h.list_length(b))
            .then(x.cmp(&y)),
        (Value::Vector(x), Value::Vector(y)) => {
            h.vector(x).0.len().cmp(&h.vector(y).0.len()).then(x.cmp(&y))
        }
        (Value::BitVector(x), Value::BitVector(y)) => {
            h.bit_vector(x).1.cmp(&h.bit_vector(y).1).then(x.cmp(&y))
        }
        _ => Ordering::Equal,
    }
}

fn number_f64(m: &Machine, v: Value) -> f64 {
    match v {
        Value::FixNum(n) => n as f64,
        Value::Float(r) => m.heap.float(r),
        _ => f64::NAN,
    }
}

// ---- evaluation ---------------------------------------------------------------

/// (eval x): evaluate in the caller's lexical frame.
fn bi_eval(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("eval", nargs, 1)?;
    m.eval_in(arg(m, nargs, 0), m.frame)
}

fn bi_apply(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("apply", nargs, 2)?;
    m.apply(arg(m, nargs, 0), arg(m, nargs, 1))
}

fn bi_prog1(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    if nargs < 1 {
        return Err(too_few("prog1"));
    }
    Ok(arg(m, nargs, 0))
}

// ---- input / output -----------------------------------------------------------

fn print_args(m: &mut Machine, nargs: usize, op: &str, princ: bool) -> LispResult<Value> {
    if nargs < 1 {
        return Err(too_few(op));
    }
    for i in 0..nargs {
        printer::print(m, arg(m, nargs, i), princ)?;
    }
    m.write_str("\n")?;
    m.flush()?;
    Ok(arg(m, nargs, nargs - 1))
}

/// (print x ...): machine-readable, one line.
fn bi_print(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    print_args(m, nargs, "print", false)
}

/// (princ x ...): human-readable, one line.
fn bi_princ(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    print_args(m, nargs, "princ", true)
}

fn bi_read(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("read", nargs, 0)?;
    reader::read_input(m)?.ok_or(LispError::UnexpectedEof)
}

/// (error x ...): abandon evaluation with the arguments as the message.
fn bi_error(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    let message = (0..nargs)
        .map(|i| printer::to_string(m, arg(m, nargs, i), true))
        .collect::<Vec<_>>()
        .join(" ");
    Err(LispError::User(message))
}

// ---- symbols ----------------------------------------------------------------

fn bi_gensym(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("gensym", nargs, 0)?;
    m.make_gensym()
}

fn bi_symbol_name(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("symbol-name", nargs, 1)?;
    let name = match arg(m, nargs, 0) {
        Value::Gensym(r) => format!("g{}", m.heap.gensym_id(r)),
        v => m.symbols.name(m.to_symbol(v, "symbol-name")?).to_string(),
    };
    m.make_string(&name)
}

// ---- vectors ----------------------------------------------------------------

/// (vector x ...): a full vector holding the arguments.
fn bi_vector(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    let items = m.stack.top(nargs).to_vec();
    m.alloc(HeapObject::Vector {
        items,
        size: nargs,
    })
    .map(Value::Vector)
}

fn index_arg(m: &Machine, v: Value, op: &str) -> LispResult<usize> {
    let n = m.to_fixnum(v, op)?;
    usize::try_from(n).map_err(|_| LispError::type_error(op, "index", n.to_string()))
}

fn bi_vector_ref(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("vector-ref", nargs, 2)?;
    let i = m.to_fixnum(arg(m, nargs, 1), "vector-ref")?;
    m.vector_ref(arg(m, nargs, 0), i)
}

fn bi_vector_length(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("vector-length", nargs, 1)?;
    let r = m.to_vector(arg(m, nargs, 0), "vector-length")?;
    Ok(Value::FixNum(m.heap.vector(r).0.len() as i64))
}

/// (vector-push v x): returns the vector, which is a new one if `v` was full.
fn bi_vector_push(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("vector-push", nargs, 2)?;
    m.vector_push(arg(m, nargs, 0), arg(m, nargs, 1))
}

fn bi_make_bit_vector(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("make-bit-vector", nargs, 1)?;
    let len = index_arg(m, arg(m, nargs, 0), "make-bit-vector")?;
    m.make_bit_vector(len)
}

fn bi_bit_ref(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("bit-ref", nargs, 2)?;
    let i = index_arg(m, arg(m, nargs, 1), "bit-ref")?;
    Ok(Value::FixNum(m.bit_ref(arg(m, nargs, 0), i)? as i64))
}

fn bi_set_bit(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("set-bit", nargs, 3)?;
    let i = index_arg(m, arg(m, nargs, 1), "set-bit")?;
    let bit = arg(m, nargs, 2);
    let on = match bit {
        Value::FixNum(0) => false,
        Value::FixNum(1) => true,
        other => return Err(LispError::type_error("set-bit", "bit", m.repr(other))),
    };
    m.set_bit(arg(m, nargs, 0), i, on)?;
    Ok(bit)
}

fn bi_resize_bit_vector(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("resize-bit-vector", nargs, 2)?;
    let len = index_arg(m, arg(m, nargs, 1), "resize-bit-vector")?;
    m.resize_bit_vector(arg(m, nargs, 0), len)
}

// ---- runtime ----------------------------------------------------------------

/// (gc): collect now; returns (live-objects occupied-bytes capacity).
fn bi_gc(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("gc", nargs, 0)?;
    let stats = m.collect();
    for n in [stats.live_objects, stats.occupied, stats.capacity] {
        m.stack.push(Value::FixNum(n as i64))?;
    }
    m.list_from_stack(3)
}

fn bi_print_stack(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    m.check_args("print-stack", nargs, 0)?;
    let depth = m.stack.len();
    m.write_str(&format!("stack_index: {}\n", depth))?;
    for i in 0..depth {
        let line = format!("{}: {}\n", i, printer::to_string(m, m.stack.get(i), false));
        m.write_str(&line)?;
    }
    m.flush()?;
    Ok(Value::Nil)
}

/// (exit) or (exit code)
fn bi_exit(m: &mut Machine, nargs: usize) -> LispResult<Value> {
    let code = match nargs {
        0 => 0,
        1 => {
            let n = m.to_fixnum(arg(m, nargs, 0), "exit")?;
            i32::try_from(n)
                .map_err(|_| LispError::type_error("exit", "exit status", n.to_string()))?
        }
        _ => {
            return Err(LispError::ArityError {
                operation: "exit".into(),
                expected: 1,
                actual: nargs,
            })
        }
    };
    Err(LispError::Exit(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn eval(m: &mut Machine, src: &str) -> String {
        let v = m.eval_str(src).unwrap();
        m.repr(v)
    }

    #[test]
    fn arithmetic() {
        let mut m = Machine::new().unwrap();
        assert_eq!(eval(&mut m, "(+ 1 2 3)"), "6");
        assert_eq!(eval(&mut m, "(+)"), "0");
        assert_eq!(eval(&mut m, "(- 5)"), "-5");
        assert_eq!(eval(&mut m, "(- 10 3 2)"), "5");
        assert_eq!(eval(&mut m, "(* 2 3 4)"), "24");
        assert_eq!(eval(&mut m, "(/ 7 2)"), "3");
        assert_eq!(eval(&mut m, "(/ 2)"), "0");
        assert_eq!(eval(&mut m, "(/ 2.0)"), "0.5");
        assert_eq!(eval(&mut m, "(+ 1 0.5)"), "1.5");
        assert_eq!(m.eval_str("(/ 1 0)"), Err(LispError::DivisionByZero));
        assert_eq!(m.eval_str("(/ 1.0 0.0)"), Err(LispError::DivisionByZero));
        assert!(matches!(m.eval_str("(-)"), Err(LispError::TooFewArguments(_))));
    }

    #[test]
    fn fixnums_wrap() {
        let mut m = Machine::new().unwrap();
        assert_eq!(
            eval(&mut m, "(+ 9223372036854775807 1)"),
            "-9223372036854775808"
        );
    }

    #[test]
    fn arithmetic_rejects_non_numbers() {
        let mut m = Machine::new().unwrap();
        assert_eq!(
            m.eval_str("(+ 1 'a)").unwrap_err().to_string(),
            "+: error: expected number, got a"
        );
    }

    #[test]
    fn less_is_total_and_antisymmetric() {
        let mut m = Machine::new().unwrap();
        let pairs = [
            ("'(1)", "5"),
            ("5", "#\\a"),
            ("1", "1.5"),
            ("'a", "'b"),
            ("\"abc\"", "\"abd\""),
            ("'a", "(gensym)"),
            ("nil", "'(1)"),
            ("'(1)", "'(1 2)"),
            ("1", "1.0"),
        ];
        for (a, b) in pairs {
            let ab = eval(&mut m, &format!("(< {} {})", a, b));
            let ba = eval(&mut m, &format!("(< {} {})", b, a));
            assert_ne!(ab, ba, "({} {}) not antisymmetric", a, b);
        }
        assert_eq!(eval(&mut m, "(< 1 2)"), "t");
        assert_eq!(eval(&mut m, "(< 2 1.5)"), "nil");
        assert_eq!(eval(&mut m, "(< 'apple 'banana)"), "t");
        assert_eq!(eval(&mut m, "(< 3 3)"), "nil");
    }

    #[test]
    fn list_primitives() {
        let mut m = Machine::new().unwrap();
        assert_eq!(eval(&mut m, "(cons 1 2)"), "(1 . 2)");
        assert_eq!(eval(&mut m, "(car '(1 2))"), "1");
        assert_eq!(eval(&mut m, "(cdr '(1 2))"), "(2)");
        assert_eq!(eval(&mut m, "(car nil)"), "nil");
        assert!(matches!(m.eval_str("(car 5)"), Err(LispError::TypeError { .. })));
        assert_eq!(eval(&mut m, "(rplaca '(1 2) 3)"), "(3 2)");
        assert_eq!(eval(&mut m, "(rplacd '(1 2) 3)"), "(1 . 3)");
        assert_eq!(eval(&mut m, "(assoc '((a . 1) (b . 2)) 'b)"), "(b . 2)");
        assert_eq!(eval(&mut m, "(assoc '((a . 1)) 'z)"), "nil");
    }

    #[test]
    fn predicates() {
        let mut m = Machine::new().unwrap();
        assert_eq!(eval(&mut m, "(atom 1)"), "t");
        assert_eq!(eval(&mut m, "(atom nil)"), "t");
        assert_eq!(eval(&mut m, "(consp '(1))"), "t");
        assert_eq!(eval(&mut m, "(symbolp 'a)"), "t");
        assert_eq!(eval(&mut m, "(symbolp (gensym))"), "t");
        assert_eq!(eval(&mut m, "(numberp 1.5)"), "t");
        assert_eq!(eval(&mut m, "(fixnump 1.5)"), "nil");
        assert_eq!(eval(&mut m, "(stringp \"s\")"), "t");
        assert_eq!(eval(&mut m, "(not nil)"), "t");
        assert_eq!(eval(&mut m, "(eq 'a 'a)"), "t");
        assert_eq!(eval(&mut m, "(eq '(1) '(1))"), "nil");
    }

    #[test]
    fn arity_is_checked() {
        let mut m = Machine::new().unwrap();
        assert_eq!(
            m.eval_str("(eq 1 2 3)").unwrap_err().to_string(),
            "eq: error: wrong number of arguments expected 2 got 3"
        );
    }

    #[test]
    fn globals() {
        let mut m = Machine::new().unwrap();
        assert_eq!(eval(&mut m, "(boundp 'zz)"), "nil");
        m.eval_str("(set 'zz 1)").unwrap();
        assert_eq!(eval(&mut m, "(boundp 'zz)"), "t");
        assert!(matches!(m.eval_str("(set 'car 1)"), Err(LispError::TypeError { .. })));
        assert!(matches!(m.eval_str("(set 't nil)"), Err(LispError::TypeError { .. })));
    }

    #[test]
    fn eval_and_apply() {
        let mut m = Machine::new().unwrap();
        assert_eq!(eval(&mut m, "(eval '(+ 1 2))"), "3");
        assert_eq!(eval(&mut m, "((lambda (x) (eval 'x)) 9)"), "9");
        assert_eq!(eval(&mut m, "(apply + '(1 2 3))"), "6");
        assert_eq!(eval(&mut m, "(apply (lambda (a . b) b) '(1 2 3))"), "(2 3)");
        assert!(matches!(m.eval_str("(apply if '(t 1))"), Err(LispError::TypeError { .. })));
        assert_eq!(eval(&mut m, "(prog1 1 2 3)"), "1");
    }

    #[test]
    fn print_and_princ_write_to_output() {
        let mut m = Machine::new().unwrap();
        let out = m.capture_output();
        assert_eq!(eval(&mut m, "(print \"a\" #\\b)"), "#\\b");
        m.eval_str("(princ \"a\" #\\b)").unwrap();
        assert_eq!(out.take(), "\"a\"#\\b\nab\n");
    }

    #[test]
    fn error_carries_message() {
        let mut m = Machine::new().unwrap();
        assert_eq!(
            m.eval_str("(error \"bad thing:\" 42)"),
            Err(LispError::User("bad thing: 42".into()))
        );
    }

    #[test]
    fn symbols_and_gensyms() {
        let mut m = Machine::new().unwrap();
        assert_eq!(eval(&mut m, "(symbol-name 'foo)"), "\"foo\"");
        assert_eq!(eval(&mut m, "(eq (gensym) (gensym))"), "nil");
        assert_eq!(eval(&mut m, "((lambda (g) (eq g g)) (gensym))"), "t");
    }

    #[test]
    fn vectors() {
        let mut m = Machine::with_config(Config::default().with_gc_stress(true)).unwrap();
        assert_eq!(eval(&mut m, "(vector 1 'a \"s\")"), "#(1 a \"s\")");
        assert_eq!(eval(&mut m, "(vector-ref (vector 1 2) 1)"), "2");
        assert_eq!(eval(&mut m, "(vector-length (vector))"), "0");
        m.eval_str("(set 'v (vector 1))").unwrap();
        m.eval_str("(set 'v (vector-push v 2))").unwrap();
        m.eval_str("(set 'v (vector-push v 3))").unwrap();
        assert_eq!(eval(&mut m, "v"), "#(1 2 3)");
        assert_eq!(eval(&mut m, "(vector-length v)"), "3");
    }

    #[test]
    fn bit_vectors() {
        let mut m = Machine::new().unwrap();
        m.eval_str("(set 'b (make-bit-vector 4))").unwrap();
        m.eval_str("(set-bit b 2 1)").unwrap();
        assert_eq!(eval(&mut m, "b"), "#*0010");
        assert_eq!(eval(&mut m, "(bit-ref b 2)"), "1");
        assert_eq!(eval(&mut m, "(resize-bit-vector b 6)"), "#*001000");
        assert!(m.eval_str("(set-bit b 9 1)").is_err());
    }

    #[test]
    fn gc_reports_occupancy() {
        let mut m = Machine::new().unwrap();
        assert_eq!(eval(&mut m, "(car (cdr (cdr (gc))))"), "32768");
        assert_eq!(m.heap.collections(), 1);
    }

    #[test]
    fn exit_requests_termination() {
        let mut m = Machine::new().unwrap();
        assert_eq!(m.eval_str("(exit 3)"), Err(LispError::Exit(3)));
        assert_eq!(m.eval_str("(exit)"), Err(LispError::Exit(0)));
        assert!(matches!(
            m.eval_str("(exit 4294967296)"),
            Err(LispError::TypeError { .. })
        ));
    }
}
