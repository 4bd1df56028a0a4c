use std::collections::HashMap;

use crate::value::{SymbolId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Ordinary,
    /// Global value may not be reassigned with `set`.
    Constant,
}

#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub name: String,
    pub kind: SymbolKind,
    /// Global value slot. `None` means unbound.
    pub value: Option<Value>,
}

/// Interned symbol table. Each unique name maps to one `SymbolId` for the
/// life of the machine, so `(eq 'foo 'foo)` holds across any number of
/// collections. Symbols are never collected; their value slots are GC roots.
pub struct SymbolTable {
    name_to_id: HashMap<String, SymbolId>,
    entries: Vec<SymbolEntry>,
}

/// Well-known symbol IDs, pre-interned at startup.
/// These must match the order of interning in SymbolTable::new().
pub mod sym {
    use crate::value::SymbolId;

    pub const T: SymbolId = SymbolId(0);
    pub const QUOTE: SymbolId = SymbolId(1);
    pub const LAMBDA: SymbolId = SymbolId(2);
    pub const MACRO: SymbolId = SymbolId(3);
    pub const LABEL: SymbolId = SymbolId(4);
    pub const PROGN: SymbolId = SymbolId(5);
}

impl SymbolTable {
    /// Create a new symbol table with the well-known symbols pre-interned.
    pub fn new() -> Self {
        let mut table = SymbolTable {
            name_to_id: HashMap::new(),
            entries: Vec::new(),
        };
        for name in ["t", "quote", "lambda", "macro", "label", "progn"] {
            table.intern(name);
        }
        // t evaluates to itself
        table.entries[sym::T.0 as usize].value = Some(Value::Symbol(sym::T));
        table.entries[sym::T.0 as usize].kind = SymbolKind::Constant;
        table
    }

    /// Intern a symbol name. Returns the existing ID if already interned,
    /// or creates a new unbound ordinary symbol.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        let id = SymbolId(self.entries.len() as u32);
        log::trace!("intern {} as {}", name, id.0);
        self.name_to_id.insert(name.to_string(), id);
        self.entries.push(SymbolEntry {
            name: name.to_string(),
            kind: SymbolKind::Ordinary,
            value: None,
        });
        id
    }

    pub fn name(&self, id: SymbolId) -> &str {
        &self.entries[id.0 as usize].name
    }

    /// Look up a symbol ID by name, without interning.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.name_to_id.get(name).copied()
    }

    pub fn value(&self, id: SymbolId) -> Option<Value> {
        self.entries[id.0 as usize].value
    }

    pub fn set_value(&mut self, id: SymbolId, v: Value) {
        self.entries[id.0 as usize].value = Some(v);
    }

    pub fn kind(&self, id: SymbolId) -> SymbolKind {
        self.entries[id.0 as usize].kind
    }

    pub fn is_constant(&self, id: SymbolId) -> bool {
        self.kind(id) == SymbolKind::Constant
    }

    /// Bind a global and freeze it.
    pub fn define_constant(&mut self, id: SymbolId, v: Value) {
        let entry = &mut self.entries[id.0 as usize];
        entry.value = Some(v);
        entry.kind = SymbolKind::Constant;
    }

    /// Total number of interned symbols.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Every bound global value slot, for the collector.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.entries.iter_mut().filter_map(|e| e.value.as_mut())
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
