use thiserror::Error;

/// Errors raised by the runtime. Every one of them unwinds to the REPL via `?`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LispError {
    /// A safe cast or builtin received a value of the wrong kind.
    /// `actual` is the printed representation of the offending value.
    #[error("{operation}: error: expected {expected}, got {actual}")]
    TypeError {
        operation: String,
        expected: String,
        actual: String,
    },

    /// A builtin was called with the wrong number of arguments.
    #[error("{operation}: error: wrong number of arguments expected {expected} got {actual}")]
    ArityError {
        operation: String,
        expected: usize,
        actual: usize,
    },

    /// More actual arguments than formal parameters.
    #[error("apply: error: too many arguments to {0}")]
    TooManyArguments(String),

    /// Fewer actual arguments than formal parameters.
    #[error("apply: error: too few arguments to {0}")]
    TooFewArguments(String),

    #[error("eval: error: variable {0} has no value")]
    UnboundVariable(String),

    #[error("apply: error: {0} is not a function")]
    NotAFunction(String),

    #[error("{form}: error: {reason}")]
    MalformedSpecialForm { form: String, reason: String },

    /// `#n#` referring to a label that was never defined (or is still pending).
    #[error("read: error: undefined label {0}")]
    UnboundLabel(i64),

    /// `#n=` used twice in the same datum.
    #[error("read: error: label {0} redefined")]
    RedefinedLabel(i64),

    /// The evaluation stack is full.
    #[error("error: stack overflow")]
    StackOverflow,

    /// Native recursion went past the configured budget.
    #[error("eval: error: c-stack overflow")]
    CStackOverflow,

    /// A single request can never fit the heap.
    #[error("error: no space to allocate {requested} bytes (heap is {capacity} bytes)")]
    HeapExhausted { requested: usize, capacity: usize },

    /// Live data still fills the heap right after a collection.
    #[error("error: objects space overflow ({occupied}/{capacity} bytes live)")]
    ObjectSpaceOverflow { occupied: usize, capacity: usize },

    #[error("/: error: division by zero")]
    DivisionByZero,

    /// Malformed token or unmatched parenthesis.
    #[error("read: error: {0}")]
    Read(String),

    #[error("read: error: unexpected end of input")]
    UnexpectedEof,

    #[error("io: error: {0}")]
    Io(String),

    /// Raised by the `error` builtin.
    #[error("{0}")]
    User(String),

    /// Raised by the `exit` builtin. Not an error so much as a request to stop.
    #[error("exit {0}")]
    Exit(i32),
}

impl LispError {
    pub fn type_error(operation: &str, expected: &str, actual: String) -> Self {
        LispError::TypeError {
            operation: operation.to_string(),
            expected: expected.to_string(),
            actual,
        }
    }

    pub fn malformed(form: &str, reason: &str) -> Self {
        LispError::MalformedSpecialForm {
            form: form.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Only `exit` ends the REPL; everything else returns to the prompt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LispError::Exit(_))
    }
}

impl From<std::io::Error> for LispError {
    fn from(e: std::io::Error) -> Self {
        LispError::Io(e.to_string())
    }
}

pub type LispResult<T> = Result<T, LispError>;
