//! A small Lisp runtime over a fixed-size, mark-compact heap.
//!
//! All state lives in a [`Machine`]: the object heap, the evaluation stack
//! that roots every intermediate value, the symbol table and the I/O
//! endpoints. The same machine runs hosted (a REPL on stdin) or embedded
//! (fed from an [`source::InputRing`] by an interrupt-style producer).

pub mod config;
pub mod error;
pub mod eval;
pub mod gc;
pub mod heap;
pub mod machine;
pub mod primitives;
pub mod printer;
pub mod reader;
pub mod source;
pub mod stack;
pub mod symbol;
pub mod value;

pub use config::Config;
pub use error::{LispError, LispResult};
pub use gc::GcStats;
pub use machine::{Machine, SharedOutput};
pub use value::Value;
