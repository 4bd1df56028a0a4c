use std::io::BufRead;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::LispResult;

/// A byte source for the reader. One byte of pushback is all the reader needs.
pub trait CharSource {
    /// The next byte, or `None` at end of input.
    fn next_byte(&mut self) -> LispResult<Option<u8>>;
    fn unread(&mut self, b: u8);
}

/// Reads from an in-memory string.
pub struct StrSource {
    bytes: Vec<u8>,
    pos: usize,
}

impl StrSource {
    pub fn new(text: &str) -> Self {
        StrSource {
            bytes: text.as_bytes().to_vec(),
            pos: 0,
        }
    }
}

impl CharSource for StrSource {
    fn next_byte(&mut self) -> LispResult<Option<u8>> {
        let b = self.bytes.get(self.pos).copied();
        if b.is_some() {
            self.pos += 1;
        }
        Ok(b)
    }

    fn unread(&mut self, b: u8) {
        debug_assert!(self.pos > 0 && self.bytes[self.pos - 1] == b);
        self.pos -= 1;
    }
}

/// Wraps any buffered reader (stdin, a file).
pub struct BufSource<R> {
    inner: R,
    pushback: Option<u8>,
}

impl<R: BufRead> BufSource<R> {
    pub fn new(inner: R) -> Self {
        BufSource {
            inner,
            pushback: None,
        }
    }
}

impl<R: BufRead> CharSource for BufSource<R> {
    fn next_byte(&mut self) -> LispResult<Option<u8>> {
        if let Some(b) = self.pushback.take() {
            return Ok(Some(b));
        }
        let buf = self.inner.fill_buf()?;
        match buf.first().copied() {
            Some(b) => {
                self.inner.consume(1);
                Ok(Some(b))
            }
            None => Ok(None),
        }
    }

    fn unread(&mut self, b: u8) {
        self.pushback = Some(b);
    }
}

/// Single-producer single-consumer byte ring, as filled by a receive
/// interrupt on a board without an OS.
///
/// The producer stores a byte and only then advances `insert`; the consumer
/// loads a byte and only then advances `read`. One slot is kept empty to tell
/// full from empty, so the ring holds `capacity - 1` bytes.
pub struct InputRing {
    slots: Box<[AtomicU8]>,
    insert: AtomicUsize,
    read: AtomicUsize,
    closed: AtomicBool,
}

impl InputRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        InputRing {
            slots: (0..capacity).map(|_| AtomicU8::new(0)).collect(),
            insert: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Producer side. Returns false and drops the byte when the ring is full.
    pub fn push(&self, b: u8) -> bool {
        let insert = self.insert.load(Ordering::Relaxed);
        let next = (insert + 1) % self.slots.len();
        if next == self.read.load(Ordering::Acquire) {
            return false;
        }
        self.slots[insert].store(b, Ordering::Relaxed);
        self.insert.store(next, Ordering::Release);
        true
    }

    /// Consumer side.
    pub fn pop(&self) -> Option<u8> {
        let read = self.read.load(Ordering::Relaxed);
        if read == self.insert.load(Ordering::Acquire) {
            return None;
        }
        let b = self.slots[read].load(Ordering::Relaxed);
        self.read.store((read + 1) % self.slots.len(), Ordering::Release);
        Some(b)
    }

    /// Producer signals that no more bytes will arrive.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Consumer end of an `InputRing`. Busy-waits for input.
pub struct RingSource {
    ring: Arc<InputRing>,
    pushback: Option<u8>,
}

impl RingSource {
    pub fn new(ring: Arc<InputRing>) -> Self {
        RingSource {
            ring,
            pushback: None,
        }
    }
}

impl CharSource for RingSource {
    fn next_byte(&mut self) -> LispResult<Option<u8>> {
        if let Some(b) = self.pushback.take() {
            return Ok(Some(b));
        }
        loop {
            if let Some(b) = self.ring.pop() {
                return Ok(Some(b));
            }
            // Drain anything stored before the close became visible.
            if self.ring.is_closed() {
                return Ok(self.ring.pop());
            }
            std::hint::spin_loop();
        }
    }

    fn unread(&mut self, b: u8) {
        self.pushback = Some(b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn str_source_supports_pushback() {
        let mut s = StrSource::new("ab");
        assert_eq!(s.next_byte().unwrap(), Some(b'a'));
        s.unread(b'a');
        assert_eq!(s.next_byte().unwrap(), Some(b'a'));
        assert_eq!(s.next_byte().unwrap(), Some(b'b'));
        assert_eq!(s.next_byte().unwrap(), None);
    }

    #[test]
    fn buf_source_reads_through() {
        let mut s = BufSource::new(Cursor::new(b"xy".to_vec()));
        assert_eq!(s.next_byte().unwrap(), Some(b'x'));
        s.unread(b'x');
        assert_eq!(s.next_byte().unwrap(), Some(b'x'));
        assert_eq!(s.next_byte().unwrap(), Some(b'y'));
        assert_eq!(s.next_byte().unwrap(), None);
    }

    #[test]
    fn ring_keeps_one_slot_free() {
        let ring = InputRing::new(4);
        assert!(ring.push(1));
        assert!(ring.push(2));
        assert!(ring.push(3));
        assert!(!ring.push(4));
        assert_eq!(ring.pop(), Some(1));
        assert!(ring.push(4));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), Some(4));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn ring_source_reads_from_another_thread() {
        let ring = Arc::new(InputRing::new(8));
        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                for &b in b"(+ 1 2)" {
                    while !ring.push(b) {
                        std::thread::yield_now();
                    }
                }
                ring.close();
            })
        };
        let mut src = RingSource::new(ring);
        let mut got = Vec::new();
        while let Some(b) = src.next_byte().unwrap() {
            got.push(b);
        }
        producer.join().unwrap();
        assert_eq!(got, b"(+ 1 2)");
    }
}
