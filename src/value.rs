use std::fmt;

/// Index of an interned symbol in the symbol table. Symbols are permanent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

/// Index into the object heap. This is the GC handle: the collector rewrites
/// every reachable `ObjRef` when it slides objects down during compaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(pub u32);

impl ObjRef {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The closed set of type tags. Declaration order is the cross-type order
/// used by `<`, so do not reorder variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeTag {
    List,
    Character,
    FixNum,
    Float,
    Symbol,
    BitVector,
    String,
    Builtin,
    Vector,
}

impl TypeTag {
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::List => "list",
            TypeTag::Character => "character",
            TypeTag::FixNum => "fixnum",
            TypeTag::Float => "float",
            TypeTag::Symbol => "symbol",
            TypeTag::BitVector => "bit-vector",
            TypeTag::String => "string",
            TypeTag::Builtin => "builtin",
            TypeTag::Vector => "vector",
        }
    }

    pub fn is_number(self) -> bool {
        matches!(self, TypeTag::FixNum | TypeTag::Float)
    }
}

/// A Lisp value. 16 bytes: discriminant + payload.
/// Immediates carry their payload inline; heap kinds carry an `ObjRef`
/// whose target always holds the matching `HeapObject` variant.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Nil,
    FixNum(i64),
    Char(char),
    Symbol(SymbolId),
    Cons(ObjRef),
    Gensym(ObjRef),
    Float(ObjRef),
    Str(ObjRef),
    Vector(ObjRef),
    BitVector(ObjRef),
    Builtin(ObjRef),
}

impl Value {
    /// O(1) type dispatch. Never touches the heap.
    #[inline]
    pub fn type_of(self) -> TypeTag {
        match self {
            Value::Nil | Value::Cons(_) => TypeTag::List,
            Value::Char(_) => TypeTag::Character,
            Value::FixNum(_) => TypeTag::FixNum,
            Value::Float(_) => TypeTag::Float,
            Value::Symbol(_) | Value::Gensym(_) => TypeTag::Symbol,
            Value::BitVector(_) => TypeTag::BitVector,
            Value::Str(_) => TypeTag::String,
            Value::Builtin(_) => TypeTag::Builtin,
            Value::Vector(_) => TypeTag::Vector,
        }
    }

    #[inline]
    pub fn is_nil(self) -> bool {
        matches!(self, Value::Nil)
    }

    #[inline]
    pub fn is_cons(self) -> bool {
        matches!(self, Value::Cons(_))
    }

    /// Nil or a cons.
    #[inline]
    pub fn is_list(self) -> bool {
        matches!(self, Value::Nil | Value::Cons(_))
    }

    /// Anything that is not a cons (nil included).
    #[inline]
    pub fn is_atom(self) -> bool {
        !self.is_cons()
    }

    #[inline]
    pub fn is_symbol(self) -> bool {
        matches!(self, Value::Symbol(_) | Value::Gensym(_))
    }

    /// Values the evaluator returns unchanged without entering the eval loop.
    #[inline]
    pub fn is_self_evaluating(self) -> bool {
        !self.is_cons() && !self.is_symbol()
    }

    pub fn as_cons(self) -> Option<ObjRef> {
        match self {
            Value::Cons(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_symbol(self) -> Option<SymbolId> {
        match self {
            Value::Symbol(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_fixnum(self) -> Option<i64> {
        match self {
            Value::FixNum(n) => Some(n),
            _ => None,
        }
    }

    /// The heap handle carried by this value, if any.
    #[inline]
    pub fn heap_ref(self) -> Option<ObjRef> {
        match self {
            Value::Cons(r)
            | Value::Gensym(r)
            | Value::Float(r)
            | Value::Str(r)
            | Value::Vector(r)
            | Value::BitVector(r)
            | Value::Builtin(r) => Some(r),
            _ => None,
        }
    }

    /// Same variant, new handle. Used by the collector when forwarding.
    #[inline]
    pub fn with_ref(self, r: ObjRef) -> Value {
        match self {
            Value::Cons(_) => Value::Cons(r),
            Value::Gensym(_) => Value::Gensym(r),
            Value::Float(_) => Value::Float(r),
            Value::Str(_) => Value::Str(r),
            Value::Vector(_) => Value::Vector(r),
            Value::BitVector(_) => Value::BitVector(r),
            Value::Builtin(_) => Value::Builtin(r),
            other => other,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::FixNum(n) => write!(f, "FixNum({})", n),
            Value::Char(c) => write!(f, "Char({:?})", c),
            Value::Symbol(id) => write!(f, "Sym({})", id.0),
            Value::Cons(r) => write!(f, "Cons({})", r.0),
            Value::Gensym(r) => write!(f, "Gensym({})", r.0),
            Value::Float(r) => write!(f, "Float({})", r.0),
            Value::Str(r) => write!(f, "Str({})", r.0),
            Value::Vector(r) => write!(f, "Vector({})", r.0),
            Value::BitVector(r) => write!(f, "BitVector({})", r.0),
            Value::Builtin(r) => write!(f, "Builtin({})", r.0),
        }
    }
}

impl fmt::Debug for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolId({})", self.0)
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediates_never_carry_heap_refs() {
        for v in [Value::Nil, Value::FixNum(-3), Value::Char('λ'), Value::Symbol(SymbolId(4))] {
            assert_eq!(v.heap_ref(), None);
            assert_eq!(v.with_ref(ObjRef(9)), v);
        }
    }

    #[test]
    fn nil_and_cons_share_the_list_tag() {
        assert_eq!(Value::Nil.type_of(), TypeTag::List);
        assert_eq!(Value::Cons(ObjRef(0)).type_of(), TypeTag::List);
        assert!(Value::Nil.is_list() && Value::Nil.is_atom());
        assert!(Value::Cons(ObjRef(3)).is_list() && !Value::Cons(ObjRef(3)).is_atom());
    }

    #[test]
    fn gensyms_are_symbols_but_not_interned() {
        let g = Value::Gensym(ObjRef(1));
        assert_eq!(g.type_of(), TypeTag::Symbol);
        assert!(g.is_symbol());
        assert_eq!(g.as_symbol(), None);
        assert!(!g.is_self_evaluating());
    }

    #[test]
    fn forwarding_keeps_variant() {
        let v = Value::Str(ObjRef(7)).with_ref(ObjRef(2));
        assert_eq!(v, Value::Str(ObjRef(2)));
        assert_eq!(v.type_of(), TypeTag::String);
    }

    #[test]
    fn tag_order_is_declaration_order() {
        assert!(TypeTag::List < TypeTag::Character);
        assert!(TypeTag::FixNum < TypeTag::Float);
        assert!(TypeTag::Float < TypeTag::Symbol);
        assert!(TypeTag::Builtin < TypeTag::Vector);
    }
}
