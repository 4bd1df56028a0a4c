use std::fmt;

use crate::error::LispResult;
use crate::eval::Tail;
use crate::machine::Machine;
use crate::value::{ObjRef, Value};

/// Size of one value slot in the byte accounting model.
pub const WORD: usize = 8;
/// Every object occupies a multiple of this many bytes.
pub const ALIGN: usize = 8;

#[inline]
pub fn align_up(n: usize) -> usize {
    n.saturating_add(ALIGN - 1) & !(ALIGN - 1)
}

/// Ordinary builtin: arguments are the top `nargs` slots of the evaluation stack.
pub type OrdinaryFn = fn(&mut Machine, usize) -> LispResult<Value>;
/// Special operator: the unevaluated argument list sits at stack slot `base`
/// and the caller's lexical frame at `base + 1`.
pub type SpecialFn = fn(&mut Machine, usize) -> LispResult<Tail>;

#[derive(Clone, Copy)]
pub enum NativeFn {
    Ordinary(OrdinaryFn),
    Special(SpecialFn),
}

/// A built-in function record.
#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub func: NativeFn,
}

impl Builtin {
    pub fn is_special(&self) -> bool {
        matches!(self.func, NativeFn::Special(_))
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_special() { "special" } else { "ordinary" };
        write!(f, "Builtin({}, {})", self.name, kind)
    }
}

/// Everything that lives in the collected heap.
#[derive(Debug, Clone)]
pub enum HeapObject {
    Cons { car: Value, cdr: Value },
    Gensym { id: u32 },
    Float(f64),
    Str(String),
    /// `items.len()` is the fill pointer, `size` the allocated dimension.
    Vector { items: Vec<Value>, size: usize },
    /// Bits packed eight to a byte, `len` bits in use.
    BitVector { bytes: Vec<u8>, len: usize },
    Builtin(Builtin),
}

impl HeapObject {
    /// Bytes this object occupies in the arena, computed from its kind and
    /// length field the same way a walk in address order would.
    pub fn byte_size(&self) -> usize {
        let raw = match self {
            HeapObject::Cons { .. } => 2 * WORD,
            HeapObject::Gensym { .. } => WORD + 4,
            HeapObject::Float(_) => WORD + 8,
            HeapObject::Str(s) => WORD + s.len().max(1),
            HeapObject::Vector { size, .. } => return Self::vector_bytes(*size),
            HeapObject::BitVector { len, .. } => return Self::bit_vector_bytes(*len),
            HeapObject::Builtin(_) => 3 * WORD,
        };
        align_up(raw)
    }

    /// Arena bytes of a vector with room for `size` elements. Saturates,
    /// so an absurd size is simply larger than any heap.
    pub fn vector_bytes(size: usize) -> usize {
        align_up(size.max(1).saturating_mul(WORD).saturating_add(2 * WORD))
    }

    /// Arena bytes of a bit-vector of `len` bits.
    pub fn bit_vector_bytes(len: usize) -> usize {
        align_up(len.div_ceil(8).max(1).saturating_add(WORD))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HeapObject::Cons { .. } => "cons",
            HeapObject::Gensym { .. } => "gensym",
            HeapObject::Float(_) => "float",
            HeapObject::Str(_) => "string",
            HeapObject::Vector { .. } => "vector",
            HeapObject::BitVector { .. } => "bit-vector",
            HeapObject::Builtin(_) => "builtin",
        }
    }

    /// Visit every value slot inside this object.
    pub fn for_each_child(&self, mut f: impl FnMut(Value)) {
        match self {
            HeapObject::Cons { car, cdr } => {
                f(*car);
                f(*cdr);
            }
            HeapObject::Vector { items, .. } => items.iter().for_each(|v| f(*v)),
            _ => {}
        }
    }

    /// Rewrite every value slot inside this object.
    pub fn for_each_child_mut(&mut self, mut f: impl FnMut(&mut Value)) {
        match self {
            HeapObject::Cons { car, cdr } => {
                f(car);
                f(cdr);
            }
            HeapObject::Vector { items, .. } => items.iter_mut().for_each(f),
            _ => {}
        }
    }
}

/// The object arena. Index order is address order: objects are bump-allocated
/// at the end and the collector slides survivors down without reordering them.
pub struct Heap {
    pub(crate) objects: Vec<HeapObject>,
    /// Bytes occupied, i.e. the bump pointer.
    pub(crate) used: usize,
    capacity: usize,
    /// Completed collections.
    pub(crate) collections: u64,
}

impl Heap {
    pub fn new(capacity: usize) -> Self {
        Heap {
            objects: Vec::with_capacity(capacity / (2 * WORD)),
            used: 0,
            capacity,
            collections: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Number of objects currently in the arena (live or not yet collected).
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn collections(&self) -> u64 {
        self.collections
    }

    /// Would `n` more bytes fit below the heap limit?
    #[inline]
    pub fn fits(&self, n: usize) -> bool {
        self.used + n <= self.capacity
    }

    /// Bump-allocate. The caller has already checked `fits`.
    pub(crate) fn push(&mut self, obj: HeapObject) -> ObjRef {
        debug_assert!(self.fits(obj.byte_size()));
        self.used += obj.byte_size();
        let r = ObjRef(self.objects.len() as u32);
        self.objects.push(obj);
        r
    }

    #[inline]
    pub fn get(&self, r: ObjRef) -> &HeapObject {
        &self.objects[r.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, r: ObjRef) -> &mut HeapObject {
        &mut self.objects[r.index()]
    }

    /// Get the car of a cons.
    #[inline]
    pub fn car(&self, r: ObjRef) -> Value {
        match self.get(r) {
            HeapObject::Cons { car, .. } => *car,
            other => unreachable!("car of heap {}", other.kind()),
        }
    }

    /// Get the cdr of a cons.
    #[inline]
    pub fn cdr(&self, r: ObjRef) -> Value {
        match self.get(r) {
            HeapObject::Cons { cdr, .. } => *cdr,
            other => unreachable!("cdr of heap {}", other.kind()),
        }
    }

    /// Set the car of a cons (rplaca).
    #[inline]
    pub fn set_car(&mut self, r: ObjRef, val: Value) {
        match self.get_mut(r) {
            HeapObject::Cons { car, .. } => *car = val,
            other => unreachable!("rplaca of heap {}", other.kind()),
        }
    }

    /// Set the cdr of a cons (rplacd).
    #[inline]
    pub fn set_cdr(&mut self, r: ObjRef, val: Value) {
        match self.get_mut(r) {
            HeapObject::Cons { cdr, .. } => *cdr = val,
            other => unreachable!("rplacd of heap {}", other.kind()),
        }
    }

    /// Car of a cons, nil for anything else. For walking trusted structure.
    #[inline]
    pub fn car_or_nil(&self, v: Value) -> Value {
        match v {
            Value::Cons(r) => self.car(r),
            _ => Value::Nil,
        }
    }

    /// Cdr of a cons, nil for anything else.
    #[inline]
    pub fn cdr_or_nil(&self, v: Value) -> Value {
        match v {
            Value::Cons(r) => self.cdr(r),
            _ => Value::Nil,
        }
    }

    pub fn float(&self, r: ObjRef) -> f64 {
        match self.get(r) {
            HeapObject::Float(f) => *f,
            other => unreachable!("float payload of heap {}", other.kind()),
        }
    }

    pub fn string(&self, r: ObjRef) -> &str {
        match self.get(r) {
            HeapObject::Str(s) => s,
            other => unreachable!("string payload of heap {}", other.kind()),
        }
    }

    pub fn builtin(&self, r: ObjRef) -> Builtin {
        match self.get(r) {
            HeapObject::Builtin(b) => *b,
            other => unreachable!("builtin payload of heap {}", other.kind()),
        }
    }

    pub fn gensym_id(&self, r: ObjRef) -> u32 {
        match self.get(r) {
            HeapObject::Gensym { id } => *id,
            other => unreachable!("gensym payload of heap {}", other.kind()),
        }
    }

    pub fn vector(&self, r: ObjRef) -> (&[Value], usize) {
        match self.get(r) {
            HeapObject::Vector { items, size } => (items, *size),
            other => unreachable!("vector payload of heap {}", other.kind()),
        }
    }

    pub fn bit_vector(&self, r: ObjRef) -> (&[u8], usize) {
        match self.get(r) {
            HeapObject::BitVector { bytes, len } => (bytes, *len),
            other => unreachable!("bit-vector payload of heap {}", other.kind()),
        }
    }

    /// Length of a list, counting conses until a non-cons tail.
    /// Bounded by the number of objects so circular lists terminate.
    pub fn list_length(&self, list: Value) -> usize {
        let mut n = 0;
        let mut current = list;
        while let Value::Cons(r) = current {
            n += 1;
            if n > self.objects.len() {
                break;
            }
            current = self.cdr(r);
        }
        n
    }

    /// Collect a proper list into a Vec. Returns None if not a proper list.
    /// The result is a snapshot: do not hold it across an allocation.
    pub fn list_to_vec(&self, val: Value) -> Option<Vec<Value>> {
        let mut result = Vec::new();
        let mut current = val;
        loop {
            match current {
                Value::Nil => return Some(result),
                Value::Cons(r) => {
                    result.push(self.car(r));
                    if result.len() > self.objects.len() {
                        return None;
                    }
                    current = self.cdr(r);
                }
                _ => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_aligned_and_length_driven() {
        let cons = HeapObject::Cons {
            car: Value::Nil,
            cdr: Value::Nil,
        };
        assert_eq!(cons.byte_size(), 16);
        assert_eq!(HeapObject::Str(String::new()).byte_size(), 16);
        assert_eq!(HeapObject::Str("abcdefghi".into()).byte_size(), 24);
        let v = HeapObject::Vector {
            items: vec![],
            size: 4,
        };
        assert_eq!(v.byte_size(), 48);
        assert_eq!(
            HeapObject::BitVector {
                bytes: vec![0; 3],
                len: 20
            }
            .byte_size(),
            16
        );
        for obj in [cons, v] {
            assert_eq!(obj.byte_size() % ALIGN, 0);
        }
    }

    #[test]
    fn bump_allocation_tracks_bytes() {
        let mut heap = Heap::new(64);
        let a = heap.push(HeapObject::Cons {
            car: Value::FixNum(1),
            cdr: Value::Nil,
        });
        let b = heap.push(HeapObject::Cons {
            car: Value::FixNum(2),
            cdr: Value::Cons(a),
        });
        assert_eq!(heap.used(), 32);
        assert!(heap.fits(32));
        assert!(!heap.fits(33));
        assert_eq!(heap.car(b), Value::FixNum(2));
        assert_eq!(heap.list_length(Value::Cons(b)), 2);
        assert_eq!(
            heap.list_to_vec(Value::Cons(b)),
            Some(vec![Value::FixNum(2), Value::FixNum(1)])
        );
    }

    #[test]
    fn list_length_terminates_on_cycles() {
        let mut heap = Heap::new(64);
        let a = heap.push(HeapObject::Cons {
            car: Value::Nil,
            cdr: Value::Nil,
        });
        heap.set_cdr(a, Value::Cons(a));
        assert!(heap.list_length(Value::Cons(a)) <= 2);
        assert_eq!(heap.list_to_vec(Value::Cons(a)), None);
    }
}
