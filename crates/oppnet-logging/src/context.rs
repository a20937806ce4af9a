//! Run context injection
//!
//! Thread-local storage for the scenario and run a thread is working on, so
//! spans opened during a run carry the run's identity without threading it
//! through every call.

use std::cell::RefCell;

use oppnet_core::PeerIdentity;
use uuid::Uuid;

/// Run context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContextData {
    /// Scenario name
    pub scenario: String,
    /// Unique id of this run
    pub run_id: Uuid,
    /// Host being processed, if narrowed to one
    pub host: Option<String>,
}

thread_local! {
    static RUN_CONTEXT: RefCell<Option<RunContextData>> = const { RefCell::new(None) };
}

/// RAII guard for run context
///
/// Sets the run context for the current thread and restores the previous one
/// when dropped.
///
/// # Example
///
/// ```ignore
/// use oppnet_logging::RunContextGuard;
///
/// let _guard = RunContextGuard::new("relay");
/// tracing::info!("Starting run");
/// ```
pub struct RunContextGuard {
    previous: Option<RunContextData>,
}

impl RunContextGuard {
    /// Start a new run of `scenario` with a fresh run id
    pub fn new(scenario: impl Into<String>) -> Self {
        Self::with_run_id(scenario, Uuid::new_v4())
    }

    /// Start a run with a known id
    pub fn with_run_id(scenario: impl Into<String>, run_id: Uuid) -> Self {
        Self::install(RunContextData {
            scenario: scenario.into(),
            run_id,
            host: None,
        })
    }

    /// Narrow the current run context to one host
    ///
    /// Outside of a run the host is recorded under an unnamed scenario.
    pub fn for_host<I: PeerIdentity>(host: &I) -> Self {
        let data = match Self::current() {
            Some(run) => RunContextData {
                host: Some(host.short_id()),
                ..run
            },
            None => RunContextData {
                scenario: String::new(),
                run_id: Uuid::nil(),
                host: Some(host.short_id()),
            },
        };
        Self::install(data)
    }

    fn install(data: RunContextData) -> Self {
        let previous = RUN_CONTEXT.with(|ctx| ctx.borrow_mut().replace(data));
        Self { previous }
    }

    /// Get the current run context (if any)
    pub fn current() -> Option<RunContextData> {
        RUN_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    /// Get the current run id (if set)
    pub fn current_run_id() -> Option<Uuid> {
        Self::current().map(|ctx| ctx.run_id)
    }
}

impl Drop for RunContextGuard {
    fn drop(&mut self) {
        RUN_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oppnet_core::HostId;

    #[test]
    fn test_run_context_guard() {
        assert!(RunContextGuard::current().is_none());

        {
            let _guard = RunContextGuard::new("relay");
            let ctx = RunContextGuard::current().unwrap();
            assert_eq!(ctx.scenario, "relay");
            assert!(ctx.host.is_none());
        }

        assert!(RunContextGuard::current().is_none());
    }

    #[test]
    fn test_nested_contexts() {
        let run_id = Uuid::new_v4();
        {
            let _run = RunContextGuard::with_run_id("random", run_id);
            {
                let _host = RunContextGuard::for_host(&HostId(3));
                let ctx = RunContextGuard::current().unwrap();
                assert_eq!(ctx.run_id, run_id);
                assert_eq!(ctx.host.as_deref(), Some("3"));
            }

            // Restored to the run after the host guard drops
            let ctx = RunContextGuard::current().unwrap();
            assert_eq!(ctx.host, None);
            assert_eq!(RunContextGuard::current_run_id(), Some(run_id));
        }

        assert!(RunContextGuard::current_run_id().is_none());
    }

    #[test]
    fn test_host_without_run() {
        let _host = RunContextGuard::for_host(&HostId(1));
        let ctx = RunContextGuard::current().unwrap();
        assert_eq!(ctx.run_id, Uuid::nil());
        assert_eq!(ctx.host.as_deref(), Some("1"));
    }
}
