use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use crate::error::LispResult;
use crate::heap::Heap;
use crate::machine::Machine;
use crate::symbol::sym;
use crate::value::Value;

/// Nesting depth past which the printer gives up and writes `...`.
const MAX_DEPTH: usize = 1000;

/// Print a value to the machine's output. `princ` selects the human-readable
/// form (no quotes or escapes); otherwise the output reads back as the same
/// structure, shared and circular conses included.
pub fn print(m: &mut Machine, val: Value, princ: bool) -> LispResult<()> {
    let mut labels = std::mem::take(&mut m.print_labels);
    labels.clear();
    let text = render(m, val, princ, &mut labels);
    m.print_labels = labels;
    let written = m.write_str(&text);
    m.print_labels.clear();
    written
}

/// Print a value to a string.
pub fn to_string(m: &Machine, val: Value, princ: bool) -> String {
    render(m, val, princ, &mut Vec::new())
}

fn render(m: &Machine, val: Value, princ: bool, shared: &mut Vec<Value>) -> String {
    find_shared(&m.heap, val, shared);
    let mut p = Printer {
        m,
        princ,
        numbers: HashMap::new(),
        shared: shared.as_slice(),
        out: String::new(),
    };
    p.value(val, 0);
    p.out
}

/// Pre-pass: every cons or vector reachable more than once from `val` goes
/// into `shared`, in first-revisit order.
fn find_shared(heap: &Heap, val: Value, shared: &mut Vec<Value>) {
    let mut seen = HashSet::new();
    let mut work = vec![val];
    while let Some(v) = work.pop() {
        match v {
            Value::Cons(r) => {
                if !seen.insert(v) {
                    if !shared.contains(&v) {
                        shared.push(v);
                    }
                    continue;
                }
                work.push(heap.cdr(r));
                work.push(heap.car(r));
            }
            Value::Vector(r) => {
                if !seen.insert(v) {
                    if !shared.contains(&v) {
                        shared.push(v);
                    }
                    continue;
                }
                work.extend(heap.vector(r).0.iter().rev());
            }
            _ => {}
        }
    }
}

struct Printer<'a> {
    m: &'a Machine,
    princ: bool,
    shared: &'a [Value],
    /// Label numbers handed out so far.
    numbers: HashMap<Value, usize>,
    out: String,
}

impl Printer<'_> {
    /// Emit `#n#` for an already-labelled object and return true, or emit
    /// `#n=` for the first visit of a shared one.
    fn label(&mut self, v: Value) -> bool {
        if let Some(n) = self.numbers.get(&v) {
            let _ = write!(self.out, "#{}#", n);
            return true;
        }
        if self.shared.contains(&v) {
            let n = self.numbers.len();
            self.numbers.insert(v, n);
            let _ = write!(self.out, "#{}=", n);
        }
        false
    }

    fn value(&mut self, v: Value, depth: usize) {
        if depth > MAX_DEPTH {
            self.out.push_str("...");
            return;
        }
        let m = self.m;
        let heap = &m.heap;
        match v {
            Value::Nil => self.out.push_str("nil"),
            Value::FixNum(n) => self.fixnum(n),
            Value::Char(c) => {
                if !self.princ {
                    self.out.push_str("#\\");
                }
                self.out.push(c);
            }
            Value::Symbol(id) => {
                let name = m.symbols.name(id);
                if !self.princ && needs_bars(name) {
                    self.out.push('|');
                    for c in name.chars() {
                        if c == '|' || c == '\\' {
                            self.out.push('\\');
                        }
                        self.out.push(c);
                    }
                    self.out.push('|');
                } else {
                    self.out.push_str(name);
                }
            }
            Value::Gensym(r) => {
                let _ = write!(self.out, "g{}", heap.gensym_id(r));
            }
            Value::Float(r) => {
                let _ = write!(self.out, "{:?}", heap.float(r));
            }
            Value::Str(r) => {
                let s = heap.string(r);
                if self.princ {
                    self.out.push_str(s);
                } else {
                    self.out.push('"');
                    for c in s.chars() {
                        match c {
                            '"' => self.out.push_str("\\\""),
                            '\\' => self.out.push_str("\\\\"),
                            '\n' => self.out.push_str("\\n"),
                            '\t' => self.out.push_str("\\t"),
                            c => self.out.push(c),
                        }
                    }
                    self.out.push('"');
                }
            }
            Value::BitVector(r) => {
                let (bytes, len) = heap.bit_vector(r);
                self.out.push_str("#*");
                for i in 0..len {
                    let on = bytes[i / 8] & (1 << (i % 8)) != 0;
                    self.out.push(if on { '1' } else { '0' });
                }
            }
            Value::Builtin(r) => {
                let _ = write!(self.out, "#.{}", heap.builtin(r).name);
            }
            Value::Vector(r) => {
                if self.label(v) {
                    return;
                }
                self.out.push_str("#(");
                let (items, _) = heap.vector(r);
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push(' ');
                    }
                    self.value(*item, depth + 1);
                }
                self.out.push(')');
            }
            Value::Cons(_) => {
                if self.label(v) {
                    return;
                }
                self.list(v, depth);
            }
        }
    }

    fn list(&mut self, v: Value, depth: usize) {
        let m = self.m;
        let heap = &m.heap;
        if let Some(quoted) = self.quoted(v) {
            self.out.push('\'');
            self.value(quoted, depth + 1);
            return;
        }
        self.out.push('(');
        let mut cur = v;
        let mut first = true;
        loop {
            let Value::Cons(r) = cur else { break };
            if !first {
                self.out.push(' ');
            }
            first = false;
            self.value(heap.car(r), depth + 1);
            match heap.cdr(r) {
                Value::Nil => break,
                next @ Value::Cons(_) if !self.shared.contains(&next) => cur = next,
                tail => {
                    self.out.push_str(" . ");
                    self.value(tail, depth + 1);
                    break;
                }
            }
        }
        self.out.push(')');
    }

    /// `(quote x)` prints as `'x` when reading `'x` would rebuild it.
    fn quoted(&self, v: Value) -> Option<Value> {
        if self.princ {
            return None;
        }
        let heap = &self.m.heap;
        let Value::Cons(r) = v else { return None };
        if heap.car(r) != Value::Symbol(sym::QUOTE) {
            return None;
        }
        let rest = heap.cdr(r);
        let Value::Cons(rr) = rest else { return None };
        if !heap.cdr(rr).is_nil() || self.shared.contains(&rest) {
            return None;
        }
        Some(heap.car(rr))
    }

    fn fixnum(&mut self, n: i64) {
        let sign = if n < 0 { "-" } else { "" };
        let mag = n.unsigned_abs();
        let _ = match self.m.config.print_base {
            16 => write!(self.out, "{}0x{:x}", sign, mag),
            2 => write!(self.out, "{}0b{:b}", sign, mag),
            _ => write!(self.out, "{}", n),
        };
    }
}

/// Would this name read back as something other than the same symbol?
fn needs_bars(name: &str) -> bool {
    name.is_empty()
        || name == "nil"
        || looks_numeric(name)
        || name.chars().any(|c| {
            c.is_whitespace() || matches!(c, '(' | ')' | '\'' | '"' | ';' | '|' | '\\')
        })
        || name.starts_with('#')
}

fn looks_numeric(name: &str) -> bool {
    let digits = name.strip_prefix(['-', '+']).unwrap_or(name);
    digits.starts_with(|c: char| c.is_ascii_digit())
        || (digits.starts_with('.') && digits[1..].starts_with(|c: char| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn show(m: &mut Machine, src: &str) -> String {
        let v = m.eval_str(src).unwrap();
        m.repr(v)
    }

    #[test]
    fn atoms() {
        let mut m = Machine::new().unwrap();
        assert_eq!(show(&mut m, "-12"), "-12");
        assert_eq!(show(&mut m, "#\\a"), "#\\a");
        assert_eq!(show(&mut m, "1.5"), "1.5");
        assert_eq!(show(&mut m, "\"a\\\"b\""), "\"a\\\"b\"");
        assert_eq!(show(&mut m, "car"), "#.car");
        assert_eq!(show(&mut m, "'|a b|"), "|a b|");
        assert_eq!(show(&mut m, "'|12|"), "|12|");
    }

    #[test]
    fn princ_drops_escapes() {
        let mut m = Machine::new().unwrap();
        let s = m.make_string("a\"b").unwrap();
        assert_eq!(to_string(&m, s, true), "a\"b");
        assert_eq!(to_string(&m, Value::Char('x'), true), "x");
    }

    #[test]
    fn lists_and_dotted_pairs() {
        let mut m = Machine::new().unwrap();
        assert_eq!(show(&mut m, "'(1 (2 3) . 4)"), "(1 (2 3) . 4)");
        assert_eq!(show(&mut m, "''a"), "'a");
        assert_eq!(show(&mut m, "'(quote a b)"), "(quote a b)");
    }

    #[test]
    fn shared_structure_gets_labels() {
        let mut m = Machine::new().unwrap();
        m.eval_str("(set 'x '(1 2))").unwrap();
        assert_eq!(show(&mut m, "(cons x x)"), "(#0=(1 2) . #0#)");
    }

    #[test]
    fn circular_list_prints_finitely() {
        let mut m = Machine::new().unwrap();
        m.eval_str("(set 'x '(1 2))").unwrap();
        m.eval_str("(rplacd (cdr x) x)").unwrap();
        assert_eq!(show(&mut m, "x"), "#0=(1 2 . #0#)");
        m.eval_str("(set 'y (cons nil nil))").unwrap();
        m.eval_str("(rplaca y y)").unwrap();
        assert_eq!(show(&mut m, "y"), "#0=(#0#)");
    }

    #[test]
    fn print_base_applies_to_fixnums() {
        let mut m = Machine::with_config(Config {
            print_base: 16,
            ..Config::default()
        })
        .unwrap();
        assert_eq!(show(&mut m, "255"), "0xff");
        assert_eq!(show(&mut m, "-16"), "-0x10");
    }

    #[test]
    fn print_writes_and_clears_label_table() {
        let mut m = Machine::new().unwrap();
        let out = m.capture_output();
        let x = m.eval_str("(set 'x '(a))").unwrap();
        let pair = m.cons(x, x).unwrap();
        print(&mut m, pair, false).unwrap();
        assert_eq!(out.take(), "(#0=(a) . #0#)");
        assert!(m.print_labels.is_empty());
    }
}
