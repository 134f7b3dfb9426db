//! Task runner - bounded concurrent fan-out with wait-for-all semantics
//!
//! This is the only concurrency primitive of the engine. Uploads, in-place
//! code updates and rollback actions are all expressed as a list of
//! zero-argument tasks handed to [`run_tasks`].

use crate::error::{Error, Result};
use rayon::prelude::*;

/// A unit of work: no input, one value or one error
pub type Task<'a, T, E> = Box<dyn FnOnce() -> std::result::Result<T, E> + Send + 'a>;

/// Box a closure as a [`Task`]
pub fn task<'a, T, E, F>(f: F) -> Task<'a, T, E>
where
    F: FnOnce() -> std::result::Result<T, E> + Send + 'a,
{
    Box::new(f)
}

/// The error of one failed task, attributed by its position in the task list
#[derive(Debug)]
pub struct TaskFailure<E> {
    pub index: usize,
    pub error: E,
}

/// Per-task results in task order plus the separately collected failures
#[derive(Debug)]
pub struct TaskOutcome<T, E> {
    /// `Some` for every task that succeeded, `None` where it failed
    pub results: Vec<Option<T>>,
    /// One entry per failing task
    pub failures: Vec<TaskFailure<E>>,
}

impl<T, E> TaskOutcome<T, E> {
    /// Check if every task succeeded
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of tasks that ran
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if no task ran
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl<T> TaskOutcome<T, Error> {
    /// Treat any failure as total failure of the fan-out
    pub fn into_values(self, operation: &'static str) -> Result<Vec<T>> {
        if !self.failures.is_empty() {
            return Err(Error::Tasks {
                operation,
                total: self.results.len(),
                failures: self.failures,
            });
        }
        Ok(self.results.into_iter().flatten().collect())
    }
}

/// Run tasks concurrently, at most `width` at a time, and wait for all of them
///
/// A failing task never cancels its siblings; the call returns only after
/// every task has finished. Results keep task order, failures carry the index
/// of the task that produced them.
pub fn run_tasks<T, E>(
    tasks: Vec<Task<'_, T, E>>,
    width: usize,
) -> std::result::Result<TaskOutcome<T, E>, rayon::ThreadPoolBuildError>
where
    T: Send,
    E: Send,
{
    let outcomes: Vec<std::result::Result<T, E>> = if width <= 1 || tasks.len() <= 1 {
        // Sequential execution
        tasks.into_iter().map(|t| t()).collect()
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(width.min(tasks.len()))
            .thread_name(|i| format!("provision-task-{i}"))
            .build()?;

        pool.install(|| tasks.into_par_iter().map(|t| t()).collect())
    };

    let mut results = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(value) => results.push(Some(value)),
            Err(error) => {
                results.push(None);
                failures.push(TaskFailure { index, error });
            }
        }
    }

    Ok(TaskOutcome { results, failures })
}

/// Run tasks with one worker per task, the width every engine fan-out uses
pub fn run_all<T, E>(tasks: Vec<Task<'_, T, E>>) -> Result<TaskOutcome<T, E>>
where
    T: Send,
    E: Send,
{
    let width = tasks.len();
    Ok(run_tasks(tasks, width)?)
}
