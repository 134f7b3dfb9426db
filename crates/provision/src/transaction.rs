//! Rollback actions, finalizers and step timings of one provisioning run

use crate::hooks::{ContextMap, HookParams, RollbackHook};
use crate::task::{Task, run_all, task};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Best-effort undo of one applied side effect
pub type RollbackAction = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Cleanup that runs whether the workflow succeeded or not
pub type Finalizer = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Wall-clock time spent in one named step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDuration {
    pub name: &'static str,
    pub duration: Duration,
}

/// Counts reported by [`Transaction::rollback`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackSummary {
    pub attempted: usize,
    pub failed: usize,
}

/// Undo and cleanup ledger, appended to only by the controlling thread
pub struct Transaction {
    started: Instant,
    start_time: SystemTime,
    rollbacks: Vec<(String, RollbackAction)>,
    finalizers: Vec<(String, Finalizer)>,
    durations: Vec<StepDuration>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rollbacks: Vec<&str> = self.rollbacks.iter().map(|(d, _)| d.as_str()).collect();
        let finalizers: Vec<&str> = self.finalizers.iter().map(|(d, _)| d.as_str()).collect();
        f.debug_struct("Transaction")
            .field("start_time", &self.start_time)
            .field("rollbacks", &rollbacks)
            .field("finalizers", &finalizers)
            .field("durations", &self.durations)
            .finish_non_exhaustive()
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            start_time: SystemTime::now(),
            rollbacks: Vec::new(),
            finalizers: Vec::new(),
            durations: Vec::new(),
        }
    }

    /// Wall-clock time the run started
    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    /// Time elapsed since the run started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Register the undo action of a side effect that was just applied
    pub fn register_rollback(
        &mut self,
        description: impl Into<String>,
        action: impl FnOnce() -> anyhow::Result<()> + Send + 'static,
    ) {
        let description = description.into();
        log::debug!("Registered rollback: {description}");
        self.rollbacks.push((description, Box::new(action)));
    }

    /// Register cleanup that runs after the step loop, on success or failure
    pub fn register_finalizer(
        &mut self,
        description: impl Into<String>,
        action: impl FnOnce() -> anyhow::Result<()> + Send + 'static,
    ) {
        let description = description.into();
        log::debug!("Registered finalizer: {description}");
        self.finalizers.push((description, Box::new(action)));
    }

    /// Register a finalizer that deletes a local file if it still exists
    pub fn register_file_cleanup(&mut self, path: PathBuf) {
        self.register_finalizer(format!("remove {}", path.display()), move || {
            match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        });
    }

    pub fn record_duration(&mut self, name: &'static str, duration: Duration) {
        self.durations.push(StepDuration { name, duration });
    }

    pub fn durations(&self) -> &[StepDuration] {
        &self.durations
    }

    pub fn pending_rollbacks(&self) -> usize {
        self.rollbacks.len()
    }

    pub fn pending_finalizers(&self) -> usize {
        self.finalizers.len()
    }

    /// Run every rollback action and rollback hook concurrently
    ///
    /// Blocks until all of them finished. Failures are logged and counted,
    /// never returned. The action list is drained, so a second call does
    /// nothing beyond running the hooks again.
    pub fn rollback(
        &mut self,
        hooks: &[Arc<dyn RollbackHook>],
        context: &ContextMap,
        params: &HookParams,
    ) -> RollbackSummary {
        let actions = std::mem::take(&mut self.rollbacks);
        let mut descriptions: Vec<String> = Vec::with_capacity(actions.len() + hooks.len());
        let mut tasks: Vec<Task<'_, (), anyhow::Error>> = Vec::with_capacity(descriptions.capacity());

        for (description, action) in actions {
            descriptions.push(description);
            tasks.push(contained(action));
        }
        for (index, hook) in hooks.iter().enumerate() {
            descriptions.push(format!("rollback hook {}", index + 1));
            tasks.push(contained(move || hook.rollback(context, params)));
        }

        if tasks.is_empty() {
            return RollbackSummary::default();
        }

        let attempted = tasks.len();
        log::info!("Rolling back ({attempted} action(s))");
        let outcome = match run_all(tasks) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Rollback could not start: {e}");
                return RollbackSummary {
                    attempted,
                    failed: attempted,
                };
            }
        };

        for failure in &outcome.failures {
            log::warn!(
                "Rollback action failed ({}): {:#}",
                descriptions[failure.index],
                failure.error
            );
        }
        RollbackSummary {
            attempted,
            failed: outcome.failures.len(),
        }
    }

    /// Run finalizers sequentially in registration order, draining the list
    pub fn finalize(&mut self) -> usize {
        let finalizers = std::mem::take(&mut self.finalizers);
        let count = finalizers.len();
        for (description, finalizer) in finalizers {
            log::debug!("Finalizing: {description}");
            if let Err(e) = finalizer() {
                log::warn!("Finalizer failed ({description}): {e:#}");
            }
        }
        count
    }
}

/// Wrap a rollback task so a panic counts as a failure instead of unwinding
/// through the fan-out
fn contained<'a, F>(f: F) -> Task<'a, (), anyhow::Error>
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'a,
{
    task(move || {
        catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(anyhow::anyhow!("panicked: {message}"))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Session;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn params() -> HookParams {
        HookParams {
            service_name: "svc".into(),
            bucket: "bucket".into(),
            build_id: "b1".into(),
            session: Session::new("us-east-1"),
            dry_run: false,
        }
    }

    #[test]
    fn test_rollback_runs_everything_despite_failures() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut tx = Transaction::new();
        for i in 0..4 {
            let ran = Arc::clone(&ran);
            tx.register_rollback(format!("action {i}"), move || {
                std::thread::sleep(Duration::from_millis(10));
                ran.fetch_add(1, Ordering::SeqCst);
                if i == 0 {
                    anyhow::bail!("cannot undo");
                }
                Ok(())
            });
        }

        let hook_ran = Arc::new(AtomicUsize::new(0));
        let hook_counter = Arc::clone(&hook_ran);
        let hooks: Vec<Arc<dyn RollbackHook>> = vec![Arc::new(
            move |ctx: &ContextMap, _: &HookParams| -> anyhow::Result<()> {
                assert!(ctx.contains_key("seen"));
                hook_counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )];
        let mut context = ContextMap::new();
        context.insert("seen".into(), true.into());

        let summary = tx.rollback(&hooks, &context, &params());
        assert_eq!(summary, RollbackSummary { attempted: 5, failed: 1 });
        assert_eq!(ran.load(Ordering::SeqCst), 4);
        assert_eq!(hook_ran.load(Ordering::SeqCst), 1);
        assert_eq!(tx.pending_rollbacks(), 0);

        // Actions are drained by the first call
        let again = tx.rollback(&[], &context, &params());
        assert_eq!(again.attempted, 0);
    }

    #[test]
    fn test_panicking_rollback_does_not_stop_the_others() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut tx = Transaction::new();
        tx.register_rollback("explodes", || panic!("undo blew up"));
        for i in 0..2 {
            let ran = Arc::clone(&ran);
            tx.register_rollback(format!("action {i}"), move || {
                std::thread::sleep(Duration::from_millis(10));
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let summary = tx.rollback(&[], &ContextMap::new(), &params());
        assert_eq!(summary, RollbackSummary { attempted: 3, failed: 1 });
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_finalizers_run_in_order_once() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut tx = Transaction::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            tx.register_finalizer(format!("f{i}"), move || {
                order.lock().unwrap().push(i);
                if i == 1 {
                    anyhow::bail!("ignored");
                }
                Ok(())
            });
        }

        assert_eq!(tx.finalize(), 3);
        assert_eq!(tx.finalize(), 0);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_file_cleanup_tolerates_missing_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let present = temp.path().join("present.zip");
        std::fs::write(&present, "x").unwrap();

        let mut tx = Transaction::new();
        tx.register_file_cleanup(present.clone());
        tx.register_file_cleanup(temp.path().join("missing.zip"));
        tx.finalize();

        assert!(!present.exists());
    }

    #[test]
    fn test_durations_keep_order() {
        let mut tx = Transaction::new();
        tx.record_duration("first", Duration::from_millis(5));
        tx.record_duration("second", Duration::from_millis(1));
        let names: Vec<&str> = tx.durations().iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
