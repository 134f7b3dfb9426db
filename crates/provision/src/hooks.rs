//! Workflow extension points
//!
//! Hooks are the engine's plug-in surface. Every phase holds an ordered list
//! of handlers; a handler that returns an error fails the workflow exactly
//! like an internal step would, except for rollback hooks which are
//! best-effort.
//!
//! Closures with matching signatures implement the hook traits directly:
//!
//! ```ignore
//! let hooks = WorkflowHooks::new().pre_build(|ctx: &mut ContextMap, params: &HookParams| -> anyhow::Result<()> {
//!     ctx.insert("started".into(), params.build_id.clone().into());
//!     Ok(())
//! });
//! ```

use crate::archive::ArchiveWriter;
use crate::function::FunctionSpec;
use crate::provider::Session;
use crate::template::Template;
use anyhow::Result;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Free-form map shared by every hook of one run
pub type ContextMap = Map<String, Value>;

/// Extension point a hook is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    PreBuild,
    PostBuild,
    Archive,
    PreMarshall,
    ServiceDecorator,
    FunctionDecorator,
    PostMarshall,
    Validation,
    Rollback,
}

impl HookPhase {
    /// Stable name used in logs and errors
    pub const fn name(self) -> &'static str {
        match self {
            Self::PreBuild => "pre-build",
            Self::PostBuild => "post-build",
            Self::Archive => "archive",
            Self::PreMarshall => "pre-marshall",
            Self::ServiceDecorator => "service decorator",
            Self::FunctionDecorator => "function decorator",
            Self::PostMarshall => "post-marshall",
            Self::Validation => "validation",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stable parameters handed to every hook
#[derive(Debug, Clone)]
pub struct HookParams {
    pub service_name: String,
    pub bucket: String,
    pub build_id: String,
    pub session: Session,
    pub dry_run: bool,
}

/// Hook run before or after build and marshalling
pub trait WorkflowHook: Send + Sync {
    fn run(&self, context: &mut ContextMap, params: &HookParams) -> Result<()>;
}

impl<F> WorkflowHook for F
where
    F: Fn(&mut ContextMap, &HookParams) -> Result<()> + Send + Sync,
{
    fn run(&self, context: &mut ContextMap, params: &HookParams) -> Result<()> {
        self(context, params)
    }
}

/// Hook that adds extra entries to the code archive
pub trait ArchiveHook: Send + Sync {
    fn decorate(
        &self,
        context: &mut ContextMap,
        params: &HookParams,
        archive: &mut ArchiveWriter,
    ) -> Result<()>;
}

impl<F> ArchiveHook for F
where
    F: Fn(&mut ContextMap, &HookParams, &mut ArchiveWriter) -> Result<()> + Send + Sync,
{
    fn decorate(
        &self,
        context: &mut ContextMap,
        params: &HookParams,
        archive: &mut ArchiveWriter,
    ) -> Result<()> {
        self(context, params, archive)
    }
}

/// Hook that contributes a template fragment for the whole service
///
/// The fragment starts empty and is merged into the service template
/// afterwards; overlapping logical ids fail the merge.
pub trait ServiceDecorator: Send + Sync {
    fn decorate(
        &self,
        context: &mut ContextMap,
        params: &HookParams,
        fragment: &mut Template,
    ) -> Result<()>;
}

impl<F> ServiceDecorator for F
where
    F: Fn(&mut ContextMap, &HookParams, &mut Template) -> Result<()> + Send + Sync,
{
    fn decorate(
        &self,
        context: &mut ContextMap,
        params: &HookParams,
        fragment: &mut Template,
    ) -> Result<()> {
        self(context, params, fragment)
    }
}

/// Per-function decoration run while roles are resolved
///
/// Profilers use it to add the resources a function needs to publish
/// samples.
pub trait FunctionDecorator: Send + Sync {
    fn decorate(
        &self,
        function: &FunctionSpec,
        params: &HookParams,
        template: &mut Template,
    ) -> Result<()>;
}

impl<F> FunctionDecorator for F
where
    F: Fn(&FunctionSpec, &HookParams, &mut Template) -> Result<()> + Send + Sync,
{
    fn decorate(
        &self,
        function: &FunctionSpec,
        params: &HookParams,
        template: &mut Template,
    ) -> Result<()> {
        self(function, params, template)
    }
}

/// Best-effort undo run when the workflow fails
///
/// Rollback hooks run concurrently with the registered rollback actions, so
/// they see a snapshot of the context map.
pub trait RollbackHook: Send + Sync {
    fn rollback(&self, context: &ContextMap, params: &HookParams) -> Result<()>;
}

impl<F> RollbackHook for F
where
    F: Fn(&ContextMap, &HookParams) -> Result<()> + Send + Sync,
{
    fn rollback(&self, context: &ContextMap, params: &HookParams) -> Result<()> {
        self(context, params)
    }
}

/// Read-only check of the finished template
pub trait ValidationHook: Send + Sync {
    fn validate(
        &self,
        context: &mut ContextMap,
        params: &HookParams,
        template: &Template,
    ) -> Result<()>;
}

impl<F> ValidationHook for F
where
    F: Fn(&mut ContextMap, &HookParams, &Template) -> Result<()> + Send + Sync,
{
    fn validate(
        &self,
        context: &mut ContextMap,
        params: &HookParams,
        template: &Template,
    ) -> Result<()> {
        self(context, params, template)
    }
}

/// Every hook of a run, grouped by phase and kept in registration order
#[derive(Clone, Default)]
pub struct WorkflowHooks {
    /// Initial contents of the shared context map
    pub context: ContextMap,
    pub pre_build: Vec<Arc<dyn WorkflowHook>>,
    pub post_build: Vec<Arc<dyn WorkflowHook>>,
    pub archive: Vec<Arc<dyn ArchiveHook>>,
    pub pre_marshall: Vec<Arc<dyn WorkflowHook>>,
    pub service_decorators: Vec<Arc<dyn ServiceDecorator>>,
    pub function_decorators: Vec<Arc<dyn FunctionDecorator>>,
    pub post_marshall: Vec<Arc<dyn WorkflowHook>>,
    pub validation: Vec<Arc<dyn ValidationHook>>,
    pub rollback: Vec<Arc<dyn RollbackHook>>,
}

impl fmt::Debug for WorkflowHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowHooks")
            .field("context", &self.context)
            .field("pre_build", &self.pre_build.len())
            .field("post_build", &self.post_build.len())
            .field("archive", &self.archive.len())
            .field("pre_marshall", &self.pre_marshall.len())
            .field("service_decorators", &self.service_decorators.len())
            .field("function_decorators", &self.function_decorators.len())
            .field("post_marshall", &self.post_marshall.len())
            .field("validation", &self.validation.len())
            .field("rollback", &self.rollback.len())
            .finish()
    }
}

// Builders append a single handler to the phase's list, which is how
// callers with one handler per phase plug in.
impl WorkflowHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn pre_build(mut self, hook: impl WorkflowHook + 'static) -> Self {
        self.pre_build.push(Arc::new(hook));
        self
    }

    pub fn post_build(mut self, hook: impl WorkflowHook + 'static) -> Self {
        self.post_build.push(Arc::new(hook));
        self
    }

    pub fn archive(mut self, hook: impl ArchiveHook + 'static) -> Self {
        self.archive.push(Arc::new(hook));
        self
    }

    pub fn pre_marshall(mut self, hook: impl WorkflowHook + 'static) -> Self {
        self.pre_marshall.push(Arc::new(hook));
        self
    }

    pub fn service_decorator(mut self, hook: impl ServiceDecorator + 'static) -> Self {
        self.service_decorators.push(Arc::new(hook));
        self
    }

    pub fn function_decorator(mut self, hook: impl FunctionDecorator + 'static) -> Self {
        self.function_decorators.push(Arc::new(hook));
        self
    }

    pub fn post_marshall(mut self, hook: impl WorkflowHook + 'static) -> Self {
        self.post_marshall.push(Arc::new(hook));
        self
    }

    pub fn validation(mut self, hook: impl ValidationHook + 'static) -> Self {
        self.validation.push(Arc::new(hook));
        self
    }

    pub fn rollback(mut self, hook: impl RollbackHook + 'static) -> Self {
        self.rollback.push(Arc::new(hook));
        self
    }

    /// Total number of registered handlers across all phases
    pub fn len(&self) -> usize {
        self.pre_build.len()
            + self.post_build.len()
            + self.archive.len()
            + self.pre_marshall.len()
            + self.service_decorators.len()
            + self.function_decorators.len()
            + self.post_marshall.len()
            + self.validation.len()
            + self.rollback.len()
    }

    /// Check if no handler is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run a list of workflow hooks in order, stopping at the first error
pub(crate) fn run_workflow_hooks(
    phase: HookPhase,
    hooks: &[Arc<dyn WorkflowHook>],
    context: &mut ContextMap,
    params: &HookParams,
) -> crate::Result<()> {
    for (index, hook) in hooks.iter().enumerate() {
        log::debug!("Running {phase} hook {}/{}", index + 1, hooks.len());
        hook.run(context, params)
            .map_err(|e| crate::Error::hook(phase, e))?;
    }
    Ok(())
}
