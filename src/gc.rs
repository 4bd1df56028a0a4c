use std::fmt;

use crate::heap::Heap;
use crate::value::{ObjRef, Value};

/// Anything that owns root slots. The collector visits the roots twice:
/// once to mark, once to rewrite them with forwarded handles.
pub trait Roots {
    fn for_each_root(&mut self, f: &mut dyn FnMut(&mut Value));
}

/// What a collection found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcStats {
    pub live_objects: usize,
    pub occupied: usize,
    pub capacity: usize,
    pub reclaimed: usize,
}

impl fmt::Display for GcStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gc: found {} live objects occupy {}/{} bytes.",
            self.live_objects, self.occupied, self.capacity
        )
    }
}

/// One mark bit per object slot.
struct MarkBits {
    words: Vec<u64>,
}

impl MarkBits {
    fn new(n: usize) -> Self {
        MarkBits {
            words: vec![0; (n + 63) / 64],
        }
    }

    #[inline]
    fn get(&self, i: usize) -> bool {
        self.words[i / 64] & (1 << (i % 64)) != 0
    }

    /// Set bit `i`, returning whether it was already set.
    #[inline]
    fn test_and_set(&mut self, i: usize) -> bool {
        let w = &mut self.words[i / 64];
        let bit = 1 << (i % 64);
        let was = *w & bit != 0;
        *w |= bit;
        was
    }
}

const DEAD: u32 = u32::MAX;

impl Heap {
    /// Mark-compact collection.
    ///
    /// Survivors slide down toward index zero in their original order, so
    /// every handle reachable from `roots` is rewritten and the relative
    /// order of live objects is preserved. Unreachable objects are dropped.
    pub fn collect(&mut self, roots: &mut dyn Roots) -> GcStats {
        let n = self.objects.len();
        let mut marks = MarkBits::new(n);

        // Phase 1: mark. Explicit worklist, so cycles and deep lists cost no
        // native recursion.
        let mut worklist: Vec<ObjRef> = Vec::new();
        roots.for_each_root(&mut |v| mark_value(*v, &mut marks, &mut worklist));
        self.process_worklist(&mut marks, &mut worklist);

        // Phase 2: compute new locations. Each survivor moves down by the
        // bytes of all garbage below it.
        let mut forward = vec![DEAD; n];
        let mut live = 0u32;
        let mut gap = 0usize;
        for (i, obj) in self.objects.iter().enumerate() {
            if marks.get(i) {
                forward[i] = live;
                live += 1;
            } else {
                gap += obj.byte_size();
            }
        }

        // Phase 3: forward every pointer, inside survivors and in the roots.
        for (i, obj) in self.objects.iter_mut().enumerate() {
            if marks.get(i) {
                obj.for_each_child_mut(|v| *v = forward_value(*v, &forward));
            }
        }
        roots.for_each_root(&mut |v| *v = forward_value(*v, &forward));

        // Phase 4: slide survivors down.
        let mut dst = 0;
        for src in 0..n {
            if marks.get(src) {
                if src != dst {
                    self.objects.swap(src, dst);
                }
                dst += 1;
            }
        }
        self.objects.truncate(dst);
        self.used -= gap;
        self.collections += 1;

        let stats = GcStats {
            live_objects: dst,
            occupied: self.used,
            capacity: self.capacity(),
            reclaimed: gap,
        };
        log::debug!("{}", stats);
        stats
    }

    fn process_worklist(&self, marks: &mut MarkBits, worklist: &mut Vec<ObjRef>) {
        while let Some(r) = worklist.pop() {
            self.get(r)
                .for_each_child(|child| mark_value(child, marks, worklist));
        }
    }
}

#[inline]
fn mark_value(v: Value, marks: &mut MarkBits, worklist: &mut Vec<ObjRef>) {
    if let Some(r) = v.heap_ref() {
        if !marks.test_and_set(r.index()) {
            worklist.push(r);
        }
    }
}

#[inline]
fn forward_value(v: Value, forward: &[u32]) -> Value {
    match v.heap_ref() {
        Some(r) => {
            let to = forward[r.index()];
            debug_assert!(to != DEAD, "forwarding a handle to a dead object");
            v.with_ref(ObjRef(to))
        }
        None => v,
    }
}
