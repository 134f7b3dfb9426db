//! Error types for the provisioning engine

use crate::hooks::HookPhase;
use crate::task::TaskFailure;
use crate::workflow::Step;
use thiserror::Error;

/// Errors that can occur while provisioning a service
#[derive(Error, Debug)]
pub enum Error {
    /// Neither functions nor workflow hooks were supplied
    #[error("no functions provided to provision")]
    NoFunctions,

    /// The bucket lives in a different region than the active session
    #[error("region ({session}) does not match bucket region ({bucket})")]
    RegionMismatch { session: String, bucket: String },

    /// A pipeline trigger needs a bucket with versioning enabled
    #[error("bucket ({0}) for pipeline trigger doesn't have versioning enabled")]
    VersioningRequired(String),

    /// A step needs an artifact an earlier step did not produce
    #[error("no {0} was produced")]
    MissingArtifact(&'static str),

    /// A call to an external collaborator failed
    #[error("{operation} failed")]
    Remote {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// A user-supplied workflow hook returned an error
    #[error("{phase} hook failed")]
    Hook {
        phase: HookPhase,
        #[source]
        source: anyhow::Error,
    },

    /// Function resources are missing required environment variables
    #[error("problems validating template contents:\n\t{}", .0.join("\n\t"))]
    Postconditions(Vec<String>),

    /// The change-set contains changes that cannot be applied in place
    #[error("unsupported in-place operations detected:\n\t{}", .0.join(",\n\t"))]
    UnsupportedInPlace(Vec<String>),

    /// An in-place update found nothing to apply
    #[error("no changes detected")]
    NoChanges,

    /// Two template fragments declare the same logical ids
    #[error("template merge conflict on: {}", .0.join(", "))]
    MergeConflict(Vec<String>),

    /// Functions reference role resources that are not in the template
    #[error("unresolved role references: {}", .0.join(", "))]
    DanglingReferences(Vec<String>),

    /// One or more tasks of a fan-out failed
    #[error(
        "{} of {total} {operation} task(s) failed: {}",
        .failures.len(),
        format_failures(.failures)
    )]
    Tasks {
        operation: &'static str,
        total: usize,
        failures: Vec<TaskFailure<Error>>,
    },

    /// The worker pool for a fan-out could not be created
    #[error("failed to create worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive error
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A workflow step failed
    #[error("{step} failed")]
    Step {
        step: Step,
        #[source]
        source: Box<Error>,
    },

    /// Top-level wrapper returned by `provision`
    #[error("failed to provision service {service}")]
    Provision {
        service: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap a collaborator failure with the name of the operation
    pub fn remote(operation: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Remote {
            operation: operation.into(),
            source,
        }
    }

    /// Wrap a hook failure with its phase
    pub fn hook(phase: HookPhase, source: anyhow::Error) -> Self {
        Self::Hook { phase, source }
    }

    /// Attach the failing step to this error
    pub fn in_step(self, step: Step) -> Self {
        Self::Step {
            step,
            source: Box::new(self),
        }
    }

    /// The innermost engine error, skipping step and provision wrappers
    pub fn root(&self) -> &Self {
        match self {
            Self::Step { source, .. } | Self::Provision { source, .. } => source.root(),
            other => other,
        }
    }
}

fn format_failures(failures: &[TaskFailure<Error>]) -> String {
    failures
        .iter()
        .map(|f| format!("[task {}] {}", f.index, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for provisioning operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_skips_wrappers() {
        let err = Error::NoFunctions.in_step(Step::VerifyRoles);
        let err = Error::Provision {
            service: "svc".into(),
            source: Box::new(err),
        };
        assert!(matches!(err.root(), Error::NoFunctions));
        assert_eq!(err.to_string(), "failed to provision service svc");
    }

    #[test]
    fn test_unsupported_in_place_lists_every_change() {
        let err = Error::UnsupportedInPlace(vec![
            "Add for Queue (ResourceType: AWS::SQS::Queue)".into(),
            "Remove for Topic (ResourceType: AWS::SNS::Topic)".into(),
        ]);
        let text = err.to_string();
        assert!(text.contains("Add for Queue"));
        assert!(text.contains("Remove for Topic"));
    }

    #[test]
    fn test_task_failures_are_attributed() {
        let err = Error::Tasks {
            operation: "upload",
            total: 3,
            failures: vec![TaskFailure {
                index: 2,
                error: Error::NoChanges,
            }],
        };
        assert_eq!(
            err.to_string(),
            "1 of 3 upload task(s) failed: [task 2] no changes detected"
        );
    }
}
