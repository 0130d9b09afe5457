//! Cleanup hooks.
//!
//! Actions run in registration order, synchronously, whenever
//! [`CleanupRegistry::run`] is called. Nothing runs automatically: stopping
//! the server does not trigger cleanup, and cleanup does not stop the
//! server. A typical `main` calls it once serving has returned:
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), weft::Error> {
//! use weft::Application;
//!
//! let mut app = Application::new(":3000");
//! app.register_on_clean_up(|| tracing::info!("flushing metrics"));
//!
//! let result = app.listen_and_serve().await;
//! app.clean_up();
//! result
//! # }
//! ```

use std::fmt;

use tracing::debug;

/// A registered cleanup action.
pub type CleanupAction = Box<dyn Fn() + Send + Sync + 'static>;

/// Append-only, order-preserving list of cleanup actions.
#[derive(Default)]
pub struct CleanupRegistry {
    actions: Vec<CleanupAction>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: impl Fn() + Send + Sync + 'static) {
        self.actions.push(Box::new(action));
    }

    /// Invokes every action once, in registration order.
    ///
    /// The list is kept, so calling `run` again invokes everything again.
    /// A panicking action propagates; later actions do not run.
    pub fn run(&self) {
        debug!(actions = self.actions.len(), "running cleanup actions");
        for action in &self.actions {
            action();
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("actions", &self.actions.len())
            .finish()
    }
}
