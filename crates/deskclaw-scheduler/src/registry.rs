//! Registered in-process jobs — the `exec` action target.
//!
//! Jobs are deterministic housekeeping functions that need no assistant
//! session (data sweeps, consolidation, log lines). Registration is
//! explicit, at startup, before the loop runs — no reflection, no hidden
//! registration order.

use std::collections::HashMap;
use std::sync::Arc;

/// A named job runnable from a schedule line.
pub trait Job: Send + Sync {
    /// Run with the entry's payload. Errors become dispatch failures.
    fn run(&self, payload: &str) -> Result<(), String>;
}

impl<F> Job for F
where
    F: Fn(&str) -> Result<(), String> + Send + Sync,
{
    fn run(&self, payload: &str) -> Result<(), String> {
        self(payload)
    }
}

/// Process-wide mapping from job name to implementation.
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
        }
    }

    /// Register a job. A later registration under the same name replaces
    /// the earlier one.
    pub fn register(&mut self, name: &str, job: Arc<dyn Job>) {
        tracing::info!("🧰 Registered job: {name}");
        self.jobs.insert(name.to_string(), job);
    }

    /// Register a plain function or closure.
    pub fn register_fn<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&str) -> Result<(), String> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.jobs.len()
    }
}
