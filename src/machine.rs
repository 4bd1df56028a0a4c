use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use crate::config::Config;
use crate::error::{LispError, LispResult};
use crate::gc::{GcStats, Roots};
use crate::heap::{Builtin, Heap, HeapObject, NativeFn};
use crate::primitives;
use crate::printer;
use crate::source::{CharSource, StrSource};
use crate::stack::Stack;
use crate::symbol::{sym, SymbolTable};
use crate::value::{ObjRef, SymbolId, TypeTag, Value};

/// Label table of one in-progress read. Nested reads (via `#.` calling
/// `read`) push another state; every state is a GC root.
#[derive(Debug, Default)]
pub struct ReadState {
    pub labels: Vec<i64>,
    /// `None` while the labelled datum is still being read.
    pub exprs: Vec<Option<Value>>,
}

/// A numeric argument after its type has been checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(f) => f,
        }
    }
}

/// The runtime. All interpreter state lives here so the collector can find
/// every root: the evaluation stack, symbol value slots, the current lexical
/// frame, the reader's label tables and the printer's cycle table.
pub struct Machine {
    pub heap: Heap,
    pub stack: Stack,
    pub symbols: SymbolTable,

    /// Lexical frame of the innermost builtin call. `set` and `eval` see it.
    pub(crate) frame: Value,
    pub(crate) read_states: Vec<ReadState>,
    pub(crate) print_labels: Vec<Value>,

    pub config: Config,
    /// Address of a local in the outermost `eval_toplevel`, while one is active.
    pub(crate) native_base: Option<usize>,
    pub(crate) input: Box<dyn CharSource>,
    pub(crate) output: Box<dyn Write>,
    gensym_counter: u32,
    last_gc: GcStats,
}

/// Borrowed view of every root, handed to the collector.
struct MachineRoots<'a> {
    stack: &'a mut Stack,
    symbols: &'a mut SymbolTable,
    frame: &'a mut Value,
    read_states: &'a mut [ReadState],
    print_labels: &'a mut [Value],
    /// Object being allocated; its fields may point into the heap.
    pending: Option<&'a mut HeapObject>,
}

impl Roots for MachineRoots<'_> {
    fn for_each_root(&mut self, f: &mut dyn FnMut(&mut Value)) {
        self.stack.iter_mut().for_each(|v| f(v));
        self.symbols.values_mut().for_each(|v| f(v));
        f(self.frame);
        for state in self.read_states.iter_mut() {
            state.exprs.iter_mut().flatten().for_each(|v| f(v));
        }
        self.print_labels.iter_mut().for_each(|v| f(v));
        if let Some(obj) = self.pending.as_deref_mut() {
            obj.for_each_child_mut(|v| f(v));
        }
    }
}

impl Machine {
    pub fn new() -> LispResult<Self> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> LispResult<Self> {
        let mut m = Machine {
            heap: Heap::new(config.heap_bytes),
            stack: Stack::new(config.stack_slots),
            symbols: SymbolTable::new(),
            frame: Value::Nil,
            read_states: Vec::new(),
            print_labels: Vec::new(),
            config,
            native_base: None,
            input: Box::new(StrSource::new("")),
            output: Box::new(io::stdout()),
            gensym_counter: 0,
            last_gc: GcStats::default(),
        };
        primitives::install(&mut m)?;
        Ok(m)
    }

    pub fn set_input(&mut self, input: Box<dyn CharSource>) {
        self.input = input;
    }

    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    /// Route output into a buffer the caller can inspect.
    pub fn capture_output(&mut self) -> SharedOutput {
        let buf = SharedOutput::default();
        self.output = Box::new(buf.clone());
        buf
    }

    // ---- allocation -------------------------------------------------------

    /// Allocate one object, collecting first if it would not fit.
    /// Values inside `obj` are protected across the collection.
    pub fn alloc(&mut self, mut obj: HeapObject) -> LispResult<ObjRef> {
        let size = obj.byte_size();
        let capacity = self.heap.capacity();
        if size > capacity {
            return Err(LispError::HeapExhausted {
                requested: size,
                capacity,
            });
        }
        if self.config.gc_stress || !self.heap.fits(size) {
            self.collect_with(Some(&mut obj));
            if self.heap.used() >= capacity {
                return Err(LispError::ObjectSpaceOverflow {
                    occupied: self.heap.used(),
                    capacity,
                });
            }
            if !self.heap.fits(size) {
                return Err(LispError::HeapExhausted {
                    requested: size,
                    capacity,
                });
            }
        }
        Ok(self.heap.push(obj))
    }

    /// Refuse a request no collection could satisfy, before its payload is
    /// built on the host heap.
    fn check_request(&self, requested: usize) -> LispResult<()> {
        let capacity = self.heap.capacity();
        if requested > capacity {
            return Err(LispError::HeapExhausted {
                requested,
                capacity,
            });
        }
        Ok(())
    }

    /// Run a full collection now.
    pub fn collect(&mut self) -> GcStats {
        self.collect_with(None)
    }

    fn collect_with(&mut self, pending: Option<&mut HeapObject>) -> GcStats {
        let mut roots = MachineRoots {
            stack: &mut self.stack,
            symbols: &mut self.symbols,
            frame: &mut self.frame,
            read_states: &mut self.read_states,
            print_labels: &mut self.print_labels,
            pending,
        };
        let stats = self.heap.collect(&mut roots);
        self.last_gc = stats;
        stats
    }

    pub fn last_gc(&self) -> GcStats {
        self.last_gc
    }

    // ---- constructors -----------------------------------------------------

    pub fn cons(&mut self, car: Value, cdr: Value) -> LispResult<Value> {
        self.alloc(HeapObject::Cons { car, cdr }).map(Value::Cons)
    }

    /// Interned symbol. Never allocates on the heap.
    pub fn intern(&mut self, name: &str) -> Value {
        Value::Symbol(self.symbols.intern(name))
    }

    pub fn make_gensym(&mut self) -> LispResult<Value> {
        let id = self.gensym_counter;
        self.gensym_counter = self.gensym_counter.wrapping_add(1);
        self.alloc(HeapObject::Gensym { id }).map(Value::Gensym)
    }

    pub fn make_float(&mut self, f: f64) -> LispResult<Value> {
        self.alloc(HeapObject::Float(f)).map(Value::Float)
    }

    pub fn make_string(&mut self, s: &str) -> LispResult<Value> {
        self.alloc(HeapObject::Str(s.to_string())).map(Value::Str)
    }

    /// Empty vector (fill pointer 0) with room for `size` elements.
    pub fn make_vector(&mut self, size: usize) -> LispResult<Value> {
        self.check_request(HeapObject::vector_bytes(size))?;
        self.alloc(HeapObject::Vector {
            items: Vec::with_capacity(size),
            size,
        })
        .map(Value::Vector)
    }

    /// Zeroed bit-vector of `len` bits.
    pub fn make_bit_vector(&mut self, len: usize) -> LispResult<Value> {
        self.check_request(HeapObject::bit_vector_bytes(len))?;
        self.alloc(HeapObject::BitVector {
            bytes: vec![0; len.div_ceil(8)],
            len,
        })
        .map(Value::BitVector)
    }

    pub fn make_builtin(&mut self, name: &'static str, func: NativeFn) -> LispResult<Value> {
        self.alloc(HeapObject::Builtin(Builtin { name, func }))
            .map(Value::Builtin)
    }

    /// Build a list from the top `n` stack slots (oldest first) and pop them.
    pub fn list_from_stack(&mut self, n: usize) -> LispResult<Value> {
        let base = self.stack.len() - n;
        let acc = self.stack.push(Value::Nil)?;
        for i in (base..base + n).rev() {
            let cell = self.cons(self.stack.get(i), self.stack.get(acc))?;
            self.stack.set(acc, cell);
        }
        let list = self.stack.get(acc);
        self.stack.reset(base);
        Ok(list)
    }

    // ---- safe casts -------------------------------------------------------

    fn type_error<T>(&self, op: &str, expected: &str, v: Value) -> LispResult<T> {
        Err(LispError::type_error(op, expected, self.repr(v)))
    }

    pub fn to_cons(&self, v: Value, op: &str) -> LispResult<ObjRef> {
        match v {
            Value::Cons(r) => Ok(r),
            _ => self.type_error(op, "cons", v),
        }
    }

    pub fn to_symbol(&self, v: Value, op: &str) -> LispResult<SymbolId> {
        match v {
            Value::Symbol(id) => Ok(id),
            _ => self.type_error(op, "symbol", v),
        }
    }

    pub fn to_fixnum(&self, v: Value, op: &str) -> LispResult<i64> {
        match v {
            Value::FixNum(n) => Ok(n),
            _ => self.type_error(op, "fixnum", v),
        }
    }

    pub fn to_char(&self, v: Value, op: &str) -> LispResult<char> {
        match v {
            Value::Char(c) => Ok(c),
            _ => self.type_error(op, "character", v),
        }
    }

    pub fn to_float(&self, v: Value, op: &str) -> LispResult<f64> {
        match v {
            Value::Float(r) => Ok(self.heap.float(r)),
            _ => self.type_error(op, "float", v),
        }
    }

    pub fn to_number(&self, v: Value, op: &str) -> LispResult<Num> {
        match v {
            Value::FixNum(n) => Ok(Num::Int(n)),
            Value::Float(r) => Ok(Num::Float(self.heap.float(r))),
            _ => self.type_error(op, "number", v),
        }
    }

    pub fn to_string_ref(&self, v: Value, op: &str) -> LispResult<&str> {
        match v {
            Value::Str(r) => Ok(self.heap.string(r)),
            _ => self.type_error(op, "string", v),
        }
    }

    pub fn to_vector(&self, v: Value, op: &str) -> LispResult<ObjRef> {
        match v {
            Value::Vector(r) => Ok(r),
            _ => self.type_error(op, "vector", v),
        }
    }

    pub fn to_bit_vector(&self, v: Value, op: &str) -> LispResult<ObjRef> {
        match v {
            Value::BitVector(r) => Ok(r),
            _ => self.type_error(op, "bit-vector", v),
        }
    }

    pub fn to_builtin(&self, v: Value, op: &str) -> LispResult<Builtin> {
        match v {
            Value::Builtin(r) => Ok(self.heap.builtin(r)),
            _ => self.type_error(op, "builtin", v),
        }
    }

    /// Car with nil passing through as nil.
    pub fn car(&self, v: Value, op: &str) -> LispResult<Value> {
        match v {
            Value::Nil => Ok(Value::Nil),
            _ => Ok(self.heap.car(self.to_cons(v, op)?)),
        }
    }

    pub fn cdr(&self, v: Value, op: &str) -> LispResult<Value> {
        match v {
            Value::Nil => Ok(Value::Nil),
            _ => Ok(self.heap.cdr(self.to_cons(v, op)?)),
        }
    }

    /// Argument-count check builtins call first.
    pub fn check_args(&self, op: &str, nargs: usize, expected: usize) -> LispResult<()> {
        if nargs != expected {
            return Err(LispError::ArityError {
                operation: op.to_string(),
                expected,
                actual: nargs,
            });
        }
        Ok(())
    }

    pub fn type_of(&self, v: Value) -> TypeTag {
        v.type_of()
    }

    pub fn bool_value(&self, b: bool) -> Value {
        if b {
            Value::Symbol(sym::T)
        } else {
            Value::Nil
        }
    }

    // ---- vectors ----------------------------------------------------------

    pub fn vector_ref(&self, v: Value, index: i64) -> LispResult<Value> {
        let r = self.to_vector(v, "vector-ref")?;
        let (items, _) = self.heap.vector(r);
        usize::try_from(index)
            .ok()
            .and_then(|i| items.get(i).copied())
            .ok_or_else(|| {
                LispError::type_error("vector-ref", "index in range", index.to_string())
            })
    }

    /// Append at the fill pointer. When full, the vector is copied into a new
    /// one of twice the size; the (possibly new) vector is returned.
    pub fn vector_push(&mut self, vector: Value, item: Value) -> LispResult<Value> {
        let r = self.to_vector(vector, "vector-push")?;
        if let HeapObject::Vector { items, size } = self.heap.get_mut(r) {
            if items.len() < *size {
                items.push(item);
                return Ok(vector);
            }
        }
        let (items, size) = self.heap.vector(r);
        let new_size = (size * 2).max(1);
        let mut grown = Vec::with_capacity(new_size);
        grown.extend_from_slice(items);
        grown.push(item);
        self.alloc(HeapObject::Vector {
            items: grown,
            size: new_size,
        })
        .map(Value::Vector)
    }

    pub fn bit_ref(&self, v: Value, index: usize) -> LispResult<bool> {
        let r = self.to_bit_vector(v, "bit-ref")?;
        let (bytes, len) = self.heap.bit_vector(r);
        if index >= len {
            return Err(LispError::type_error(
                "bit-ref",
                "index in range",
                index.to_string(),
            ));
        }
        Ok(bytes[index / 8] & (1 << (index % 8)) != 0)
    }

    pub fn set_bit(&mut self, v: Value, index: usize, bit: bool) -> LispResult<()> {
        let r = self.to_bit_vector(v, "set-bit")?;
        if let HeapObject::BitVector { bytes, len } = self.heap.get_mut(r) {
            if index >= *len {
                return Err(LispError::type_error(
                    "set-bit",
                    "index in range",
                    index.to_string(),
                ));
            }
            if bit {
                bytes[index / 8] |= 1 << (index % 8);
            } else {
                bytes[index / 8] &= !(1 << (index % 8));
            }
        }
        Ok(())
    }

    /// Resize in place. The arena accounts bit-vectors by their byte length,
    /// so growing goes through a fresh allocation.
    pub fn resize_bit_vector(&mut self, v: Value, new_len: usize) -> LispResult<Value> {
        let r = self.to_bit_vector(v, "resize-bit-vector")?;
        self.check_request(HeapObject::bit_vector_bytes(new_len))?;
        let (bytes, _) = self.heap.bit_vector(r);
        let mut resized = bytes.to_vec();
        resized.resize(new_len.div_ceil(8), 0);
        if let Some(last) = resized.last_mut() {
            if new_len % 8 != 0 {
                *last &= (1u8 << (new_len % 8)) - 1;
            }
        }
        self.alloc(HeapObject::BitVector {
            bytes: resized,
            len: new_len,
        })
        .map(Value::BitVector)
    }

    // ---- printing ---------------------------------------------------------

    /// Printed (readable) representation, for error messages and tests.
    pub fn repr(&self, v: Value) -> String {
        printer::to_string(self, v, false)
    }

    pub fn write_str(&mut self, s: &str) -> LispResult<()> {
        self.output.write_all(s.as_bytes())?;
        Ok(())
    }

    pub fn flush(&mut self) -> LispResult<()> {
        self.output.flush()?;
        Ok(())
    }
}

/// In-memory output sink shared between a `Machine` and its owner.
#[derive(Clone, Default)]
pub struct SharedOutput(Rc<RefCell<Vec<u8>>>);

impl SharedOutput {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }

    /// Take what has been written so far.
    pub fn take(&self) -> String {
        let bytes = std::mem::take(&mut *self.0.borrow_mut());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
