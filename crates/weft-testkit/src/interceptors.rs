//! Interceptors that record, count, retry and short-circuit

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weft_core::{Fault, Value};
use weft_engine::{Interceptor, Invocation, InvocationResult};

/// Shared, ordered log of events
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Snapshot of every entry so far
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Records `name` on entry and `/name` on return
pub struct RecordingInterceptor {
    name: String,
    journal: Journal,
}

impl RecordingInterceptor {
    pub fn new(name: impl Into<String>, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            journal: journal.clone(),
        })
    }
}

impl Interceptor for RecordingInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, invocation: &mut Invocation<'_>) -> InvocationResult {
        self.journal.record(self.name.clone());
        let result = invocation.invoke_next();
        self.journal.record(format!("/{}", self.name));
        result
    }
}

/// Counts calls and passes through
pub struct CountingInterceptor {
    name: String,
    calls: AtomicUsize,
}

impl CountingInterceptor {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Interceptor for CountingInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, invocation: &mut Invocation<'_>) -> InvocationResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        invocation.invoke_next()
    }
}

/// Returns a fixed value without proceeding
pub struct ShortCircuit {
    name: String,
    value: Value,
}

impl ShortCircuit {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            value: value.into(),
        })
    }
}

impl Interceptor for ShortCircuit {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, _invocation: &mut Invocation<'_>) -> InvocationResult {
        Ok(self.value.clone())
    }
}

/// Proceeds up to `attempts` times until the rest of the chain succeeds
pub struct Retry {
    name: String,
    attempts: usize,
}

impl Retry {
    pub fn new(name: impl Into<String>, attempts: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            attempts,
        })
    }
}

impl Interceptor for Retry {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, invocation: &mut Invocation<'_>) -> InvocationResult {
        let mut last = None;
        for _ in 0..self.attempts.max(1) {
            match invocation.invoke_next() {
                Ok(value) => return Ok(value),
                Err(fault) => last = Some(fault),
            }
        }
        Err(last.unwrap_or_else(|| Fault::unchecked("RetryExhausted", self.name.clone())))
    }
}

/// Raises a fault without proceeding
pub struct Raise {
    name: String,
    fault: Fault,
}

impl Raise {
    pub fn new(name: impl Into<String>, fault: Fault) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            fault,
        })
    }
}

impl Interceptor for Raise {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, _invocation: &mut Invocation<'_>) -> InvocationResult {
        Err(self.fault.clone())
    }
}

/// Replaces argument `index` before proceeding
pub struct RewriteArg {
    name: String,
    index: usize,
    value: Value,
}

impl RewriteArg {
    pub fn new(name: impl Into<String>, index: usize, value: impl Into<Value>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            index,
            value: value.into(),
        })
    }
}

impl Interceptor for RewriteArg {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, invocation: &mut Invocation<'_>) -> InvocationResult {
        invocation.set_arg(self.index, self.value.clone());
        invocation.invoke_next()
    }
}
