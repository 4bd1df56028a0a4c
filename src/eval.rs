use crate::error::{LispError, LispResult};
use crate::heap::{NativeFn, SpecialFn};
use crate::machine::Machine;
use crate::reader;
use crate::source::StrSource;
use crate::symbol::sym;
use crate::value::Value;

/// What a special operator hands back to the evaluator loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tail {
    /// Finished with this value.
    Return(Value),
    /// Evaluate this expression in this environment, without recursing.
    Eval(Value, Value),
}

/// Special operators: they receive their argument list unevaluated.
pub const SPECIAL_FORMS: &[(&str, SpecialFn)] = &[
    ("quote", sf_quote),
    ("if", sf_if),
    ("cond", sf_cond),
    ("and", sf_and),
    ("or", sf_or),
    ("while", sf_while),
    ("progn", sf_progn),
    ("lambda", sf_lambda),
    ("macro", sf_macro),
    ("label", sf_label),
];

/// Stack layout of one `eval_in` activation, relative to its base.
const SAVED_FRAME: usize = 0;
const EXPR: usize = 1;
const ENV: usize = 2;
const LOCALS: usize = 3;

impl Machine {
    /// Evaluate at top level: the lexical frame is empty before and after,
    /// and the evaluation stack is unwound to where it was, error or not.
    pub fn eval_toplevel(&mut self, expr: Value) -> LispResult<Value> {
        let mark = self.stack.len();
        let saved = self.stack.push(self.frame)?;
        let outermost = self.native_base.is_none();
        if outermost {
            self.native_base = Some(stack_address());
        }
        self.frame = Value::Nil;
        let result = self.eval_in(expr, Value::Nil);
        self.frame = self.stack.get(saved);
        self.stack.reset(mark);
        if outermost {
            self.native_base = None;
        }
        result
    }

    /// Read every form in `src` and evaluate each at top level.
    /// Returns the value of the last one (nil for empty input).
    pub fn eval_str(&mut self, src: &str) -> LispResult<Value> {
        let mut source = StrSource::new(src);
        let mark = self.stack.len();
        let slot = self.stack.push(Value::Nil)?;
        let result = loop {
            match reader::read(self, &mut source) {
                Ok(Some(expr)) => match self.eval_toplevel(expr) {
                    Ok(v) => self.stack.set(slot, v),
                    Err(e) => break Err(e),
                },
                Ok(None) => break Ok(self.stack.get(slot)),
                Err(e) => break Err(e),
            }
        };
        self.stack.reset(mark);
        result
    }

    /// Evaluate `expr` in lexical environment `env`.
    pub fn eval_in(&mut self, expr: Value, env: Value) -> LispResult<Value> {
        if expr.is_self_evaluating() {
            return Ok(expr);
        }
        self.check_native_stack()?;
        let base = self.stack.len();
        self.stack.push(self.frame)?;
        self.stack.push(expr)?;
        self.stack.push(env)?;
        let result = self.eval_loop(base);
        self.frame = self.stack.get(base + SAVED_FRAME);
        self.stack.reset(base);
        result
    }

    fn eval_loop(&mut self, base: usize) -> LispResult<Value> {
        loop {
            self.stack.reset(base + LOCALS);
            let expr = self.stack.get(base + EXPR);
            let env = self.stack.get(base + ENV);
            let form = match expr {
                Value::Symbol(_) | Value::Gensym(_) => return self.lookup(expr, env),
                Value::Cons(r) => r,
                _ => return Ok(expr),
            };

            let head = self.heap.car(form);
            let f = if head.is_symbol() {
                self.lookup(head, env)?
            } else {
                self.eval_in(head, env)?
            };
            let f_slot = self.stack.push(f)?;
            // the head evaluation may have moved things
            let args = self.heap.cdr_or_nil(self.stack.get(base + EXPR));
            let env = self.stack.get(base + ENV);

            let tail = match f {
                Value::Builtin(r) => match self.heap.builtin(r).func {
                    NativeFn::Special(special) => {
                        let sbase = self.stack.push(args)?;
                        self.stack.push(env)?;
                        special(self, sbase)?
                    }
                    NativeFn::Ordinary(native) => {
                        let nargs = self.evaluate_args(args, base + ENV)?;
                        self.frame = self.stack.get(base + ENV);
                        return native(self, nargs);
                    }
                },
                Value::Cons(_) => self.apply_closure(f_slot, args, Some(base + ENV))?,
                _ => return Err(LispError::NotAFunction(self.repr(f))),
            };
            match tail {
                Tail::Return(v) => return Ok(v),
                Tail::Eval(next, next_env) => {
                    self.stack.set(base + EXPR, next);
                    self.stack.set(base + ENV, next_env);
                }
            }
        }
    }

    /// Evaluate each argument left to right onto the stack. Returns the count.
    fn evaluate_args(&mut self, args: Value, env_slot: usize) -> LispResult<usize> {
        let rest = self.stack.push(args)?;
        let mut n = 0;
        while let Value::Cons(r) = self.stack.get(rest) {
            let arg = self.heap.car(r);
            self.stack.set(rest, self.heap.cdr(r));
            let v = self.eval_in(arg, self.stack.get(env_slot))?;
            self.stack.push(v)?;
            n += 1;
        }
        // drop the cursor from under the arguments
        let first = rest + 1;
        for i in 0..n {
            self.stack.set(rest + i, self.stack.get(first + i));
        }
        self.stack.pop();
        Ok(n)
    }

    /// Call a closure value held in `f_slot`. With `env_slot`, the actuals
    /// are evaluated in that environment (unless the closure is a macro);
    /// without, they are taken as already evaluated.
    fn apply_closure(
        &mut self,
        f_slot: usize,
        actuals: Value,
        env_slot: Option<usize>,
    ) -> LispResult<Tail> {
        let f = self.stack.get(f_slot);
        let keyword = self.heap.car_or_nil(f);
        let is_macro = match keyword {
            Value::Symbol(sym::LAMBDA) | Value::Symbol(sym::LABEL) => false,
            Value::Symbol(sym::MACRO) => true,
            _ => return Err(LispError::NotAFunction(self.repr(f))),
        };
        let evaluate = if is_macro { None } else { env_slot };
        let frame = self.bind_arguments(f_slot, actuals, evaluate)?;
        let frame_slot = self.stack.push(frame)?;
        let body = self.closure_body(self.stack.get(f_slot));
        if is_macro {
            let expansion = self.eval_in(body, self.stack.get(frame_slot))?;
            let caller_env = match env_slot {
                Some(slot) => self.stack.get(slot),
                None => self.frame,
            };
            Ok(Tail::Eval(expansion, caller_env))
        } else {
            Ok(Tail::Eval(body, self.stack.get(frame_slot)))
        }
    }

    /// Closure layout is `(keyword arg-spec body . frame)`.
    fn closure_body(&self, f: Value) -> Value {
        let h = &self.heap;
        h.car_or_nil(h.cdr_or_nil(h.cdr_or_nil(f)))
    }

    /// Name used in argument-count errors: the label name, or the keyword.
    fn closure_name(&self, f: Value) -> String {
        let h = &self.heap;
        let keyword = h.car_or_nil(f);
        if keyword == Value::Symbol(sym::LABEL) {
            let frame = h.cdr_or_nil(h.cdr_or_nil(h.cdr_or_nil(f)));
            return self.repr(h.car_or_nil(h.car_or_nil(frame)));
        }
        self.repr(keyword)
    }

    /// Extend the closure's captured frame with one binding per formal.
    /// A formal list ending in a symbol instead of nil binds that symbol to
    /// the remaining actuals, in order.
    fn bind_arguments(
        &mut self,
        f_slot: usize,
        actuals: Value,
        env_slot: Option<usize>,
    ) -> LispResult<Value> {
        let f = self.stack.get(f_slot);
        let h = &self.heap;
        let formals = h.car_or_nil(h.cdr_or_nil(f));
        let captured = h.cdr_or_nil(h.cdr_or_nil(h.cdr_or_nil(f)));

        let s_formals = self.stack.push(formals)?;
        let s_actuals = self.stack.push(actuals)?;
        let s_frame = self.stack.push(captured)?;

        loop {
            match self.stack.get(s_formals) {
                Value::Cons(fr) => {
                    let Value::Cons(ar) = self.stack.get(s_actuals) else {
                        let f = self.stack.get(f_slot);
                        return Err(LispError::TooFewArguments(self.closure_name(f)));
                    };
                    let raw = self.heap.car(ar);
                    self.stack.set(s_actuals, self.heap.cdr(ar));
                    self.stack.set(s_formals, self.heap.cdr(fr));
                    let param = self.heap.car(fr);
                    let s_param = self.stack.push(param)?;
                    let value = match env_slot {
                        Some(env) => self.eval_in(raw, self.stack.get(env))?,
                        None => raw,
                    };
                    let binding = self.cons(self.stack.get(s_param), value)?;
                    self.stack.set(s_param, binding);
                    let frame = self.cons(self.stack.get(s_param), self.stack.get(s_frame))?;
                    self.stack.set(s_frame, frame);
                    self.stack.pop();
                }
                Value::Nil => {
                    if self.stack.get(s_actuals).is_cons() {
                        let f = self.stack.get(f_slot);
                        return Err(LispError::TooManyArguments(self.closure_name(f)));
                    }
                    break;
                }
                rest if rest.is_symbol() => {
                    let list = self.collect_rest(s_actuals, env_slot)?;
                    let binding = self.cons(self.stack.get(s_formals), list)?;
                    let frame = self.cons(binding, self.stack.get(s_frame))?;
                    self.stack.set(s_frame, frame);
                    break;
                }
                other => {
                    return Err(LispError::type_error(
                        "lambda",
                        "symbol in argument list",
                        self.repr(other),
                    ))
                }
            }
        }
        let frame = self.stack.get(s_frame);
        self.stack.reset(s_formals);
        Ok(frame)
    }

    /// Gather the remaining actuals into a fresh list, appending at a tail
    /// pointer so the order matches the call site.
    fn collect_rest(&mut self, s_actuals: usize, env_slot: Option<usize>) -> LispResult<Value> {
        let s_head = self.stack.push(Value::Nil)?;
        let s_tail = self.stack.push(Value::Nil)?;
        while let Value::Cons(ar) = self.stack.get(s_actuals) {
            let raw = self.heap.car(ar);
            self.stack.set(s_actuals, self.heap.cdr(ar));
            let value = match env_slot {
                Some(env) => self.eval_in(raw, self.stack.get(env))?,
                None => raw,
            };
            let cell = self.cons(value, Value::Nil)?;
            match self.stack.get(s_tail) {
                Value::Cons(t) => self.heap.set_cdr(t, cell),
                _ => self.stack.set(s_head, cell),
            }
            self.stack.set(s_tail, cell);
        }
        let list = self.stack.get(s_head);
        self.stack.reset(s_head);
        Ok(list)
    }

    /// Apply a function to an already-evaluated argument list.
    pub fn apply(&mut self, f: Value, args: Value) -> LispResult<Value> {
        let mark = self.stack.len();
        let result = self.apply_at(f, args);
        self.stack.reset(mark);
        result
    }

    fn apply_at(&mut self, f: Value, args: Value) -> LispResult<Value> {
        match f {
            Value::Builtin(r) => {
                let builtin = self.heap.builtin(r);
                match builtin.func {
                    NativeFn::Special(_) => Err(LispError::type_error(
                        "apply",
                        "function",
                        format!("special operator {}", builtin.name),
                    )),
                    NativeFn::Ordinary(native) => {
                        let mut n = 0;
                        let mut rest = args;
                        while let Value::Cons(r) = rest {
                            self.stack.push(self.heap.car(r))?;
                            rest = self.heap.cdr(r);
                            n += 1;
                        }
                        native(self, n)
                    }
                }
            }
            Value::Cons(_) => {
                let f_slot = self.stack.push(f)?;
                match self.apply_closure(f_slot, args, None)? {
                    Tail::Return(v) => Ok(v),
                    Tail::Eval(expr, env) => self.eval_in(expr, env),
                }
            }
            _ => Err(LispError::NotAFunction(self.repr(f))),
        }
    }

    /// Variable reference: first binding in the frame, then the global slot.
    pub fn lookup(&self, name: Value, env: Value) -> LispResult<Value> {
        let h = &self.heap;
        let mut e = env;
        while let Value::Cons(r) = e {
            if let Value::Cons(binding) = h.car(r) {
                if h.car(binding) == name {
                    return Ok(h.cdr(binding));
                }
            }
            e = h.cdr(r);
        }
        match name {
            Value::Symbol(id) => self
                .symbols
                .value(id)
                .ok_or_else(|| LispError::UnboundVariable(self.symbols.name(id).to_string())),
            _ => Err(LispError::UnboundVariable(self.repr(name))),
        }
    }

    /// Assign to the first binding of `name` in `env`, else its global slot.
    pub fn assign(&mut self, name: Value, value: Value, env: Value) -> LispResult<Value> {
        let mut e = env;
        while let Value::Cons(r) = e {
            if let Value::Cons(binding) = self.heap.car(r) {
                if self.heap.car(binding) == name {
                    self.heap.set_cdr(binding, value);
                    return Ok(value);
                }
            }
            e = self.heap.cdr(r);
        }
        let id = self.to_symbol(name, "set")?;
        if self.symbols.is_constant(id) {
            return Err(LispError::type_error(
                "set",
                "variable",
                format!("constant {}", self.symbols.name(id)),
            ));
        }
        self.symbols.set_value(id, value);
        Ok(value)
    }

    pub(crate) fn check_native_stack(&self) -> LispResult<()> {
        if let Some(base) = self.native_base {
            if base.abs_diff(stack_address()) > self.config.native_stack_bytes {
                return Err(LispError::CStackOverflow);
            }
        }
        Ok(())
    }

    /// Evaluate every form of `body` but the last; hand the last back as a
    /// tail call. `body` sits in stack slot `s_body`, the environment in `s_env`.
    fn eval_body(&mut self, s_body: usize, s_env: usize) -> LispResult<Tail> {
        loop {
            let Value::Cons(r) = self.stack.get(s_body) else {
                return Ok(Tail::Return(Value::Nil));
            };
            let form = self.heap.car(r);
            let next = self.heap.cdr(r);
            if !next.is_cons() {
                return Ok(Tail::Eval(form, self.stack.get(s_env)));
            }
            self.stack.set(s_body, next);
            self.eval_in(form, self.stack.get(s_env))?;
        }
    }

    /// `(keyword arg-spec . body)` to `(keyword arg-spec body . env)`.
    /// Several body forms are wrapped in `progn`.
    fn make_closure(&mut self, keyword: Value, base: usize) -> LispResult<Tail> {
        let args = self.stack.get(base);
        let Value::Cons(r) = args else {
            return Err(LispError::malformed(&self.repr(keyword), "missing argument list"));
        };
        let body = self.heap.cdr(r);
        let body = match body {
            Value::Cons(b) if self.heap.cdr(b).is_cons() => {
                self.cons(Value::Symbol(sym::PROGN), body)?
            }
            Value::Cons(b) => self.heap.car(b),
            _ => Value::Nil,
        };
        let s_body = self.stack.push(body)?;
        let env = self.stack.get(base + 1);
        let tail = self.cons(self.stack.get(s_body), env)?;
        self.stack.set(s_body, tail);
        let spec = self.heap.car_or_nil(self.stack.get(base));
        let tail = self.cons(spec, self.stack.get(s_body))?;
        let closure = self.cons(keyword, tail)?;
        Ok(Tail::Return(closure))
    }
}

/// Address of a local in this frame, for measuring native stack depth.
#[inline(never)]
pub(crate) fn stack_address() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

// ---- special operators ------------------------------------------------------
//
// Each receives the unevaluated argument list at stack[base] and the caller's
// environment at stack[base + 1].

fn sf_quote(m: &mut Machine, base: usize) -> LispResult<Tail> {
    match m.stack.get(base) {
        Value::Cons(r) => Ok(Tail::Return(m.heap.car(r))),
        _ => Err(LispError::malformed("quote", "missing argument")),
    }
}

fn sf_if(m: &mut Machine, base: usize) -> LispResult<Tail> {
    let test = m.heap.car_or_nil(m.stack.get(base));
    let cond = m.eval_in(test, m.stack.get(base + 1))?;
    let branches = m.heap.cdr_or_nil(m.stack.get(base));
    let chosen = if cond.is_nil() {
        m.heap.car_or_nil(m.heap.cdr_or_nil(branches))
    } else {
        m.heap.car_or_nil(branches)
    };
    Ok(Tail::Eval(chosen, m.stack.get(base + 1)))
}

fn sf_cond(m: &mut Machine, base: usize) -> LispResult<Tail> {
    let s_clauses = m.stack.push(m.stack.get(base))?;
    while let Value::Cons(r) = m.stack.get(s_clauses) {
        let clause = m.to_cons(m.heap.car(r), "cond")?;
        let test = m.heap.car(clause);
        let v = m.eval_in(test, m.stack.get(base + 1))?;
        if !v.is_nil() {
            let clause = m.heap.car_or_nil(m.stack.get(s_clauses));
            m.stack.set(s_clauses, m.heap.cdr_or_nil(clause));
            return m.eval_body(s_clauses, base + 1);
        }
        let next = m.heap.cdr_or_nil(m.stack.get(s_clauses));
        m.stack.set(s_clauses, next);
    }
    Ok(Tail::Return(Value::Nil))
}

fn sf_and(m: &mut Machine, base: usize) -> LispResult<Tail> {
    if m.stack.get(base).is_nil() {
        return Ok(Tail::Return(Value::Symbol(sym::T)));
    }
    loop {
        let Value::Cons(r) = m.stack.get(base) else {
            return Ok(Tail::Return(Value::Nil));
        };
        let form = m.heap.car(r);
        let next = m.heap.cdr(r);
        if !next.is_cons() {
            return Ok(Tail::Eval(form, m.stack.get(base + 1)));
        }
        m.stack.set(base, next);
        if m.eval_in(form, m.stack.get(base + 1))?.is_nil() {
            return Ok(Tail::Return(Value::Nil));
        }
    }
}

/// `t` for a true form before the last; the last form's own value otherwise.
fn sf_or(m: &mut Machine, base: usize) -> LispResult<Tail> {
    while let Value::Cons(r) = m.stack.get(base) {
        let form = m.heap.car(r);
        let next = m.heap.cdr(r);
        if !next.is_cons() {
            return Ok(Tail::Eval(form, m.stack.get(base + 1)));
        }
        m.stack.set(base, next);
        if !m.eval_in(form, m.stack.get(base + 1))?.is_nil() {
            return Ok(Tail::Return(Value::Symbol(sym::T)));
        }
    }
    Ok(Tail::Return(Value::Nil))
}

fn sf_while(m: &mut Machine, base: usize) -> LispResult<Tail> {
    let s_result = m.stack.push(Value::Nil)?;
    let s_body = m.stack.push(Value::Nil)?;
    loop {
        let test = m.heap.car_or_nil(m.stack.get(base));
        if m.eval_in(test, m.stack.get(base + 1))?.is_nil() {
            return Ok(Tail::Return(m.stack.get(s_result)));
        }
        let body = m.heap.cdr_or_nil(m.stack.get(base));
        m.stack.set(s_body, body);
        while let Value::Cons(r) = m.stack.get(s_body) {
            let form = m.heap.car(r);
            m.stack.set(s_body, m.heap.cdr(r));
            let v = m.eval_in(form, m.stack.get(base + 1))?;
            m.stack.set(s_result, v);
        }
    }
}

fn sf_progn(m: &mut Machine, base: usize) -> LispResult<Tail> {
    m.eval_body(base, base + 1)
}

fn sf_lambda(m: &mut Machine, base: usize) -> LispResult<Tail> {
    m.make_closure(Value::Symbol(sym::LAMBDA), base)
}

fn sf_macro(m: &mut Machine, base: usize) -> LispResult<Tail> {
    m.make_closure(Value::Symbol(sym::MACRO), base)
}

/// `(label name fn)`: evaluate `fn` to a closure and return a copy,
/// `(label args body (name . copy) . captured)`, whose frame binds `name`
/// to the copy itself so the body can call itself. The evaluated closure
/// is left as it was.
fn sf_label(m: &mut Machine, base: usize) -> LispResult<Tail> {
    let args = m.stack.get(base);
    let name = m.heap.car_or_nil(args);
    if !name.is_symbol() {
        return Err(LispError::malformed("label", "name must be a symbol"));
    }
    let fexpr = m.heap.car_or_nil(m.heap.cdr_or_nil(args));
    let closure = m.eval_in(fexpr, m.stack.get(base + 1))?;
    let keyword = m.heap.car_or_nil(closure);
    let body_cell = m.heap.cdr_or_nil(m.heap.cdr_or_nil(closure));
    let is_function = matches!(
        keyword,
        Value::Symbol(sym::LAMBDA) | Value::Symbol(sym::LABEL)
    );
    if !is_function || !body_cell.is_cons() {
        return Err(LispError::type_error("label", "lambda", m.repr(closure)));
    }
    let s_closure = m.stack.push(closure)?;

    // built inside out; every partial chain stays in a stack slot
    let captured = m.heap.cdr_or_nil(body_cell);
    let frame = m.cons(Value::Nil, captured)?;
    let s_frame = m.stack.push(frame)?;
    let h = &m.heap;
    let body = h.car_or_nil(h.cdr_or_nil(h.cdr_or_nil(m.stack.get(s_closure))));
    let chain = m.cons(body, m.stack.get(s_frame))?;
    let s_chain = m.stack.push(chain)?;
    let formals = m.heap.car_or_nil(m.heap.cdr_or_nil(m.stack.get(s_closure)));
    let chain = m.cons(formals, m.stack.get(s_chain))?;
    m.stack.set(s_chain, chain);
    let copy = m.cons(Value::Symbol(sym::LABEL), m.stack.get(s_chain))?;
    m.stack.set(s_chain, copy);
    let name = m.heap.car_or_nil(m.stack.get(base));
    let binding = m.cons(name, m.stack.get(s_chain))?;
    if let Value::Cons(frame) = m.stack.get(s_frame) {
        m.heap.set_car(frame, binding);
    }
    Ok(Tail::Return(m.stack.get(s_chain)))
}
