/// Runtime sizing. Everything is fixed for the lifetime of a `Machine`:
/// the heap never grows and the stack never reallocates.
#[derive(Debug, Clone)]
pub struct Config {
    /// Object heap capacity in bytes.
    pub heap_bytes: usize,
    /// Evaluation stack capacity in slots.
    pub stack_slots: usize,
    /// How far native recursion may descend below the top-level entry, in bytes.
    pub native_stack_bytes: usize,
    /// Collect before every allocation. Slow; meant for shaking out stale handles.
    pub gc_stress: bool,
    /// Radix used when printing fixnums.
    pub print_base: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            heap_bytes: 32 * 1024,
            stack_slots: 1024,
            native_stack_bytes: 256 * 1024,
            gc_stress: false,
            print_base: 10,
        }
    }
}

impl Config {
    /// Sizing that matches a small microcontroller target.
    pub fn embedded() -> Self {
        Config {
            heap_bytes: 8 * 1024 - 256,
            stack_slots: 512,
            native_stack_bytes: 16 * 1024,
            ..Config::default()
        }
    }

    /// Defaults overlaid with `EMBER_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Some(n) = env_usize("EMBER_HEAP_BYTES") {
            config.heap_bytes = n;
        }
        if let Some(n) = env_usize("EMBER_STACK_SLOTS") {
            config.stack_slots = n;
        }
        if let Some(n) = env_usize("EMBER_NATIVE_STACK") {
            config.native_stack_bytes = n;
        }
        if std::env::var("EMBER_GC_STRESS")
            .map(|v| v == "1")
            .unwrap_or(false)
        {
            config.gc_stress = true;
        }
        config
    }

    pub fn with_heap_bytes(mut self, n: usize) -> Self {
        self.heap_bytes = n;
        self
    }

    pub fn with_stack_slots(mut self, n: usize) -> Self {
        self.stack_slots = n;
        self
    }

    pub fn with_native_stack_bytes(mut self, n: usize) -> Self {
        self.native_stack_bytes = n;
        self
    }

    pub fn with_gc_stress(mut self, on: bool) -> Self {
        self.gc_stress = on;
        self
    }
}

fn env_usize(name: &str) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            log::warn!("ignoring {}={:?}: not a number", name, raw);
            None
        }
    }
}
