//! # Provision
//!
//! A workflow engine that provisions a serverless service: it compiles the
//! service binary, uploads the artifacts, assembles an infrastructure
//! template and converges the service's stack, rolling back on failure.
//!
//! ## Core Concepts
//!
//! - **Step**: one phase of the run; the chain is a fixed transition table
//! - **Transaction**: rollback actions (undo, run concurrently on failure)
//!   and finalizers (cleanup, run sequentially on every exit)
//! - **Task runner**: bounded fan-out used for uploads, in-place updates and
//!   rollback
//! - **Role cache**: resolves every execution role exactly once per run
//! - **Hooks**: ordered per-phase extension points
//!
//! ## Example
//!
//! ```ignore
//! use provision::{FunctionRole, FunctionSpec, ProvisionInput, provision};
//!
//! let input = ProvisionInput::new("hello", "my-artifacts")
//!     .with_function(FunctionSpec::new("greet").with_role(FunctionRole::Name("exec".into())));
//!
//! let report = provision(input, providers)?;
//! for step in &report.durations {
//!     println!("{}: {:?}", step.name, step.duration);
//! }
//! ```
//!
//! ## Provider Traits
//!
//! Everything remote sits behind a trait so the engine runs against a real
//! account, a local sandbox or test doubles alike:
//!
//! - [`BuildProvider`]: compiles the deployable binary
//! - [`ObjectStore`]: stores archives and templates
//! - [`Orchestrator`]: owns stacks and change-sets
//! - [`RoleDirectory`]: looks up pre-existing roles

pub mod annotate;
pub mod apply;
pub mod archive;
pub mod artifact;
pub mod context;
pub mod error;
pub mod function;
pub mod gateway;
pub mod hooks;
mod marshal;
mod package;
pub mod pipeline;
pub mod provider;
pub mod roles;
pub mod site;
pub mod task;
pub mod template;
pub mod transaction;
pub mod upload;
pub mod workflow;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use archive::ArchiveWriter;
pub use artifact::{UploadLocation, version_aware_key};
pub use context::{BuildOptions, ProvisionInput, WorkflowContext};
pub use error::{Error, Result};
pub use function::{
    CustomResourceSpec, ExportRequest, FunctionExport, FunctionOptions, FunctionRole,
    FunctionSpec, LambdaExport, RoleDefinition,
};
pub use gateway::{GatewayExport, GatewayRequest};
pub use hooks::{ContextMap, HookParams, HookPhase, WorkflowHooks};
pub use pipeline::PipelineEnvironments;
pub use provider::{
    BuildProvider, BuildRequest, CodeUpdate, ConvergeRequest, ObjectStore, Orchestrator,
    PrebuiltBinary, Providers, ResourceChange, RoleDirectory, Session, StackDescriptor,
};
pub use roles::{RoleCache, RoleHandle, RoleNameMap};
pub use site::{SiteBucketExport, SiteExport, SiteSpec};
pub use template::{Resource, Template};
pub use transaction::{StepDuration, Transaction};
pub use workflow::{ProvisionReport, Step, provision};
