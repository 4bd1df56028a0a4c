use crate::error::{LispError, LispResult};
use crate::eval::stack_address;
use crate::heap::HeapObject;
use crate::machine::{Machine, ReadState};
use crate::source::{CharSource, StrSource};
use crate::symbol::sym;
use crate::value::Value;

/// Read one datum from `src`. Returns `None` when the input ends before
/// any datum starts.
///
/// Every cons the reader builds is held in an evaluation-stack slot or in
/// the label table while more input is read, so a collection triggered
/// mid-read moves it safely. Nesting is bounded by the same native stack
/// budget as evaluation.
pub fn read(m: &mut Machine, src: &mut dyn CharSource) -> LispResult<Option<Value>> {
    let outermost = m.native_base.is_none();
    if outermost {
        m.native_base = Some(stack_address());
    }
    m.read_states.push(ReadState::default());
    let mark = m.stack.len();
    let mut lexer = Lexer::new(src);
    let result = match lexer.next() {
        Ok(Token::Eof) => Ok(None),
        Ok(tok) => {
            lexer.unget(tok);
            datum(m, &mut lexer, None).map(Some)
        }
        Err(e) => Err(e),
    };
    m.stack.reset(mark);
    m.read_states.pop();
    if outermost {
        m.native_base = None;
    }
    result
}

/// Read one datum from the machine's own input, as the `read` builtin does.
pub fn read_input(m: &mut Machine) -> LispResult<Option<Value>> {
    let mut input = std::mem::replace(&mut m.input, Box::new(StrSource::new("")));
    let result = read(m, input.as_mut());
    m.input = input;
    result
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Dot,
    Quote,
    /// `#'`: the next datum, unchanged.
    Function,
    /// `#.`: the next datum, evaluated.
    ReadEval,
    /// `#(`
    VectorOpen,
    /// `#n=`
    Label(i64),
    /// `#n#`
    LabelRef(i64),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    Bits(Vec<bool>),
    Symbol(String),
    /// An unescaped `nil`.
    Nil,
    Eof,
}

struct Lexer<'a> {
    src: &'a mut dyn CharSource,
    peeked: Option<Token>,
}

fn is_delimiter(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b'(' | b')' | b'\'' | b'"' | b';')
}

impl<'a> Lexer<'a> {
    fn new(src: &'a mut dyn CharSource) -> Self {
        Lexer { src, peeked: None }
    }

    fn next(&mut self) -> LispResult<Token> {
        match self.peeked.take() {
            Some(tok) => Ok(tok),
            None => self.lex(),
        }
    }

    fn unget(&mut self, tok: Token) {
        debug_assert!(self.peeked.is_none());
        self.peeked = Some(tok);
    }

    /// Next byte, with end of input as an error.
    fn byte(&mut self) -> LispResult<u8> {
        self.src.next_byte()?.ok_or(LispError::UnexpectedEof)
    }

    fn skip_blank(&mut self) -> LispResult<Option<u8>> {
        loop {
            match self.src.next_byte()? {
                Some(b';') => loop {
                    match self.src.next_byte()? {
                        Some(b'\n') | None => break,
                        Some(_) => {}
                    }
                },
                Some(b) if b.is_ascii_whitespace() => {}
                other => return Ok(other),
            }
        }
    }

    fn lex(&mut self) -> LispResult<Token> {
        let Some(b) = self.skip_blank()? else {
            return Ok(Token::Eof);
        };
        match b {
            b'(' => Ok(Token::Open),
            b')' => Ok(Token::Close),
            b'\'' => Ok(Token::Quote),
            b'"' => self.string(),
            b'#' => self.dispatch(),
            _ => {
                self.src.unread(b);
                self.atom()
            }
        }
    }

    fn dispatch(&mut self) -> LispResult<Token> {
        match self.byte()? {
            b'\'' => Ok(Token::Function),
            b'.' => Ok(Token::ReadEval),
            b'(' => Ok(Token::VectorOpen),
            b'\\' => self.character(),
            b'*' => {
                let mut bits = Vec::new();
                while let Some(b) = self.src.next_byte()? {
                    match b {
                        b'0' => bits.push(false),
                        b'1' => bits.push(true),
                        b if is_delimiter(b) => {
                            self.src.unread(b);
                            break;
                        }
                        b => {
                            return Err(LispError::Read(format!(
                                "invalid bit '{}' in bit-vector",
                                b as char
                            )))
                        }
                    }
                }
                Ok(Token::Bits(bits))
            }
            b @ b'0'..=b'9' => {
                let mut n: i64 = (b - b'0').into();
                loop {
                    match self.byte()? {
                        d @ b'0'..=b'9' => {
                            n = n
                                .checked_mul(10)
                                .and_then(|n| n.checked_add((d - b'0').into()))
                                .ok_or_else(|| LispError::Read("label number too large".into()))?;
                        }
                        b'=' => return Ok(Token::Label(n)),
                        b'#' => return Ok(Token::LabelRef(n)),
                        other => {
                            return Err(LispError::Read(format!(
                                "invalid label syntax at '{}'",
                                other as char
                            )))
                        }
                    }
                }
            }
            other => Err(LispError::Read(format!(
                "unknown read macro #{}",
                other as char
            ))),
        }
    }

    /// `#\c`, where c is one UTF-8 encoded character.
    fn character(&mut self) -> LispResult<Token> {
        let first = self.byte()?;
        let len = match first {
            0x00..=0x7f => 1,
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => return Err(LispError::Read("invalid utf-8 in character".into())),
        };
        let mut buf = [first, 0, 0, 0];
        for slot in buf.iter_mut().take(len).skip(1) {
            *slot = self.byte()?;
        }
        std::str::from_utf8(&buf[..len])
            .ok()
            .and_then(|s| s.chars().next())
            .map(Token::Char)
            .ok_or_else(|| LispError::Read("invalid utf-8 in character".into()))
    }

    fn string(&mut self) -> LispResult<Token> {
        let mut bytes = Vec::new();
        loop {
            match self.byte()? {
                b'"' => break,
                b'\\' => bytes.push(match self.byte()? {
                    b'n' => b'\n',
                    b't' => b'\t',
                    b'r' => b'\r',
                    b'0' => 0,
                    other => other,
                }),
                b => bytes.push(b),
            }
        }
        String::from_utf8(bytes)
            .map(Token::Str)
            .map_err(|_| LispError::Read("invalid utf-8 in string".into()))
    }

    /// A symbol or number token. `|...|` quotes a run of characters and
    /// `\` quotes the next one; either makes the token a symbol.
    fn atom(&mut self) -> LispResult<Token> {
        let mut bytes = Vec::new();
        let mut escaped = false;
        let mut in_bars = false;
        while let Some(b) = self.src.next_byte()? {
            match b {
                b'|' => {
                    in_bars = !in_bars;
                    escaped = true;
                }
                b'\\' => {
                    bytes.push(self.byte()?);
                    escaped = true;
                }
                b if in_bars => bytes.push(b),
                b if is_delimiter(b) => {
                    self.src.unread(b);
                    break;
                }
                b => bytes.push(b),
            }
        }
        if in_bars {
            return Err(LispError::UnexpectedEof);
        }
        let text = String::from_utf8(bytes)
            .map_err(|_| LispError::Read("invalid utf-8 in symbol".into()))?;
        if escaped {
            return Ok(Token::Symbol(text));
        }
        match text.as_str() {
            "." => return Ok(Token::Dot),
            "nil" => return Ok(Token::Nil),
            _ => {}
        }
        Ok(parse_number(&text)?.unwrap_or(Token::Symbol(text)))
    }
}

/// Decimal, `0x` hex and `0b` binary fixnums (optionally signed), and
/// floats. Anything else is not a number.
fn parse_number(text: &str) -> LispResult<Option<Token>> {
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let (radix, body) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (16, hex)
    } else if let Some(bin) = digits
        .strip_prefix("0b")
        .or_else(|| digits.strip_prefix("0B"))
    {
        (2, bin)
    } else {
        (10, digits)
    };
    if !body.is_empty() && body.chars().all(|c| c.is_digit(radix)) {
        let magnitude = u64::from_str_radix(body, radix)
            .map_err(|_| LispError::Read(format!("fixnum out of range: {}", text)))?;
        let n = if negative {
            0i64.checked_sub_unsigned(magnitude)
        } else {
            i64::try_from(magnitude).ok()
        };
        return n
            .map(|n| Some(Token::Int(n)))
            .ok_or_else(|| LispError::Read(format!("fixnum out of range: {}", text)));
    }
    let starts_numeric = digits.starts_with(|c: char| c.is_ascii_digit())
        || (digits.starts_with('.') && digits[1..].starts_with(|c: char| c.is_ascii_digit()));
    if radix == 10 && starts_numeric {
        if let Ok(f) = text.parse::<f64>() {
            return Ok(Some(Token::Float(f)));
        }
    }
    Ok(None)
}

fn datum(m: &mut Machine, lx: &mut Lexer<'_>, fixup: Option<usize>) -> LispResult<Value> {
    m.check_native_stack()?;
    let value = match lx.next()? {
        Token::Eof => return Err(LispError::UnexpectedEof),
        Token::Close => return Err(LispError::Read("unexpected ')'".into())),
        Token::Dot => return Err(LispError::Read("unexpected '.'".into())),
        Token::Open => return list(m, lx, fixup),
        Token::Quote => return quoted(m, lx, fixup),
        Token::Function => return datum(m, lx, fixup),
        Token::ReadEval => {
            let form = datum(m, lx, None)?;
            m.eval_toplevel(form)?
        }
        Token::VectorOpen => vector(m, lx)?,
        Token::Label(n) => return labelled(m, lx, n),
        Token::LabelRef(n) => {
            let state = current_state(m)?;
            return state
                .labels
                .iter()
                .position(|&l| l == n)
                .and_then(|i| state.exprs[i])
                .ok_or(LispError::UnboundLabel(n));
        }
        Token::Int(n) => Value::FixNum(n),
        Token::Float(f) => m.make_float(f)?,
        Token::Char(c) => Value::Char(c),
        Token::Str(s) => m.make_string(&s)?,
        Token::Bits(bits) => {
            let mut bytes = vec![0u8; (bits.len() + 7) / 8];
            for (i, on) in bits.iter().enumerate() {
                if *on {
                    bytes[i / 8] |= 1 << (i % 8);
                }
            }
            let len = bits.len();
            Value::BitVector(m.alloc(HeapObject::BitVector { bytes, len })?)
        }
        Token::Nil => Value::Nil,
        Token::Symbol(name) => m.intern(&name),
    };
    fixup_to(m, fixup, value);
    Ok(value)
}

fn current_state(m: &mut Machine) -> LispResult<&mut ReadState> {
    m.read_states
        .last_mut()
        .ok_or_else(|| LispError::Read("no read in progress".into()))
}

/// Record `value` as what the pending label at `fixup` stands for.
fn fixup_to(m: &mut Machine, fixup: Option<usize>, value: Value) {
    if let (Some(i), Some(state)) = (fixup, m.read_states.last_mut()) {
        state.exprs[i] = Some(value);
    }
}

fn labelled(m: &mut Machine, lx: &mut Lexer<'_>, n: i64) -> LispResult<Value> {
    let state = current_state(m)?;
    if state.labels.contains(&n) {
        return Err(LispError::RedefinedLabel(n));
    }
    state.labels.push(n);
    state.exprs.push(None);
    let index = state.exprs.len() - 1;
    let value = datum(m, lx, Some(index))?;
    fixup_to(m, Some(index), value);
    Ok(value)
}

/// `(a b . c)`, built front to back. The first cell is registered with a
/// pending label before its elements are read, so `#0=(a . #0#)` closes.
fn list(m: &mut Machine, lx: &mut Lexer<'_>, fixup: Option<usize>) -> LispResult<Value> {
    let head = m.stack.push(Value::Nil)?;
    let tail = m.stack.push(Value::Nil)?;
    loop {
        match lx.next()? {
            Token::Close => break,
            Token::Eof => return Err(LispError::UnexpectedEof),
            Token::Dot => {
                if !m.stack.get(tail).is_cons() {
                    return Err(LispError::Read("unexpected '.'".into()));
                }
                let rest = datum(m, lx, None)?;
                if let Value::Cons(last) = m.stack.get(tail) {
                    m.heap.set_cdr(last, rest);
                }
                if lx.next()? != Token::Close {
                    return Err(LispError::Read("expected ')'".into()));
                }
                break;
            }
            tok => {
                lx.unget(tok);
                let cell = m.cons(Value::Nil, Value::Nil)?;
                match m.stack.get(tail) {
                    Value::Cons(last) => m.heap.set_cdr(last, cell),
                    _ => {
                        m.stack.set(head, cell);
                        fixup_to(m, fixup, cell);
                    }
                }
                m.stack.set(tail, cell);
                let item = datum(m, lx, None)?;
                if let Value::Cons(cur) = m.stack.get(tail) {
                    m.heap.set_car(cur, item);
                }
            }
        }
    }
    let result = m.stack.get(head);
    m.stack.reset(head);
    fixup_to(m, fixup, result);
    Ok(result)
}

/// `'x` reads as `(quote x)`.
fn quoted(m: &mut Machine, lx: &mut Lexer<'_>, fixup: Option<usize>) -> LispResult<Value> {
    let inner = m.cons(Value::Nil, Value::Nil)?;
    let slot = m.stack.push(inner)?;
    let form = m.cons(Value::Symbol(sym::QUOTE), m.stack.get(slot))?;
    m.stack.set(slot, form);
    fixup_to(m, fixup, form);
    let quotee = datum(m, lx, None)?;
    let form = m.stack.get(slot);
    if let Value::Cons(inner) = m.heap.cdr_or_nil(form) {
        m.heap.set_car(inner, quotee);
    }
    m.stack.reset(slot);
    Ok(form)
}

/// `#(a b c)`: elements are read onto the stack, then copied into a
/// vector sized to fit them.
fn vector(m: &mut Machine, lx: &mut Lexer<'_>) -> LispResult<Value> {
    let base = m.stack.len();
    loop {
        match lx.next()? {
            Token::Close => break,
            Token::Eof => return Err(LispError::UnexpectedEof),
            Token::Dot => return Err(LispError::Read("unexpected '.'".into())),
            tok => {
                lx.unget(tok);
                let item = datum(m, lx, None)?;
                m.stack.push(item)?;
            }
        }
    }
    let n = m.stack.len() - base;
    let items = m.stack.top(n).to_vec();
    let r = m.alloc(HeapObject::Vector { items, size: n })?;
    m.stack.reset(base);
    Ok(Value::Vector(r))
}
