use crate::error::{LispError, LispResult};
use crate::value::Value;

/// The evaluation stack. Holds every intermediate value the evaluator needs to
/// keep alive across an allocation, and is scanned as a GC root.
///
/// Capacity is fixed at construction; pushing past it raises `StackOverflow`.
pub struct Stack {
    slots: Vec<Value>,
    capacity: usize,
}

impl Stack {
    pub fn new(capacity: usize) -> Self {
        Stack {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn push(&mut self, v: Value) -> LispResult<usize> {
        if self.slots.len() >= self.capacity {
            return Err(LispError::StackOverflow);
        }
        self.slots.push(v);
        Ok(self.slots.len() - 1)
    }

    #[inline]
    pub fn pop(&mut self) -> Value {
        debug_assert!(!self.slots.is_empty(), "evaluation stack underflow");
        self.slots.pop().unwrap_or(Value::Nil)
    }

    pub fn pop_n(&mut self, n: usize) {
        let len = self.slots.len().saturating_sub(n);
        self.slots.truncate(len);
    }

    /// Current depth. Pass it to `reset` to unwind back to this point.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn reset(&mut self, mark: usize) {
        self.slots.truncate(mark);
    }

    #[inline]
    pub fn get(&self, i: usize) -> Value {
        self.slots[i]
    }

    #[inline]
    pub fn set(&mut self, i: usize, v: Value) {
        self.slots[i] = v;
    }

    /// The top `n` slots, oldest first.
    pub fn top(&self, n: usize) -> &[Value] {
        &self.slots[self.slots.len() - n..]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.slots.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_past_capacity_overflows() {
        let mut s = Stack::new(2);
        assert_eq!(s.push(Value::FixNum(1)), Ok(0));
        assert_eq!(s.push(Value::FixNum(2)), Ok(1));
        assert_eq!(s.push(Value::FixNum(3)), Err(LispError::StackOverflow));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn reset_unwinds_to_mark() {
        let mut s = Stack::new(8);
        s.push(Value::Nil).unwrap();
        let mark = s.len();
        for i in 0..4 {
            s.push(Value::FixNum(i)).unwrap();
        }
        assert_eq!(s.top(2), &[Value::FixNum(2), Value::FixNum(3)]);
        s.reset(mark);
        assert_eq!(s.len(), 1);
        assert_eq!(s.pop(), Value::Nil);
    }
}
