//! The provisioning step chain
//!
//! [`provision`] drives a fixed sequence of [`Step`]s over one
//! [`WorkflowContext`]. Each step either hands over to the next one or fails;
//! a failure stops the chain, rolls back every registered side effect and is
//! returned wrapped with the failing step. Finalizers run on both paths.

use crate::apply::apply_operation;
use crate::artifact::UploadLocation;
use crate::context::{ProvisionInput, WorkflowContext};
use crate::error::{Error, Result};
use crate::hooks::{ContextMap, HookPhase};
use crate::marshal::ensure_stack;
use crate::package::create_package;
use crate::provider::{Providers, StackDescriptor};
use crate::transaction::StepDuration;
use crate::upload::create_upload;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// One phase of a provisioning run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    VerifyRoles,
    VerifyPreconditions,
    CreatePackage,
    CreateUpload,
    ValidatePostconditions,
    EnsureStack,
    ApplyOperation,
}

impl Step {
    /// Where every run starts
    pub const FIRST: Self = Self::VerifyRoles;

    /// Transition table; `None` after the terminal step
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::VerifyRoles => Some(Self::VerifyPreconditions),
            Self::VerifyPreconditions => Some(Self::CreatePackage),
            Self::CreatePackage => Some(Self::CreateUpload),
            Self::CreateUpload => Some(Self::ValidatePostconditions),
            Self::ValidatePostconditions => Some(Self::EnsureStack),
            Self::EnsureStack => Some(Self::ApplyOperation),
            Self::ApplyOperation => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::VerifyRoles => "Verifying IAM roles",
            Self::VerifyPreconditions => "Verifying preconditions",
            Self::CreatePackage => "Creating code package",
            Self::CreateUpload => "Uploading artifacts",
            Self::ValidatePostconditions => "Validating postconditions",
            Self::EnsureStack => "Marshalling template",
            Self::ApplyOperation => "Applying stack operation",
        }
    }

    /// Run this step and return the one to run next
    pub fn run(self, ctx: &mut WorkflowContext) -> Result<Option<Self>> {
        match self {
            Self::VerifyRoles => verify_roles(ctx)?,
            Self::VerifyPreconditions => verify_preconditions(ctx)?,
            Self::CreatePackage => create_package(ctx)?,
            Self::CreateUpload => create_upload(ctx)?,
            Self::ValidatePostconditions => {
                crate::annotate::validate_postconditions(&ctx.state.template)?;
            }
            Self::EnsureStack => ensure_stack(ctx)?,
            Self::ApplyOperation => apply_operation(ctx)?,
        }
        Ok(self.next())
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub service_name: String,
    pub dry_run: bool,
    /// Set when a stack operation ran
    pub stack: Option<StackDescriptor>,
    /// Set when the template was packaged for a change pipeline
    pub pipeline_package: Option<PathBuf>,
    pub code_location: Option<UploadLocation>,
    /// The hook context map as the last hook left it
    pub context: ContextMap,
    pub durations: Vec<StepDuration>,
    pub elapsed: Duration,
}

fn verify_roles(ctx: &mut WorkflowContext) -> Result<()> {
    let input = &ctx.input;
    let state = &mut ctx.state;
    state.roles.resolve(
        &input.service_name,
        &input.functions,
        &mut state.template,
        ctx.providers.roles.as_ref(),
    )?;

    for function in &input.functions {
        for decorator in &input.hooks.function_decorators {
            decorator
                .decorate(function, &ctx.params, &mut state.template)
                .map_err(|e| Error::hook(HookPhase::FunctionDecorator, e))?;
        }
    }
    Ok(())
}

fn verify_preconditions(ctx: &mut WorkflowContext) -> Result<()> {
    let input = &ctx.input;
    if input.dry_run {
        log::info!("Dry run: bypassing bucket checks");
        ctx.state.versioning_enabled = false;
    } else {
        let storage = ctx.providers.storage.as_ref();
        let versioning = storage
            .versioning_enabled(&input.bucket)
            .map_err(|e| Error::remote(format!("versioning check of {}", input.bucket), e))?;
        if !versioning {
            if input.pipeline_trigger.is_some() {
                return Err(Error::VersioningRequired(input.bucket.clone()));
            }
            log::warn!(
                "Bucket {} doesn't have versioning enabled; artifacts get unique keys",
                input.bucket
            );
        }
        ctx.state.versioning_enabled = versioning;

        let region = storage
            .bucket_region(&input.bucket)
            .map_err(|e| Error::remote(format!("region lookup of {}", input.bucket), e))?;
        let session = &ctx.providers.session.region;
        if &region != session {
            return Err(Error::RegionMismatch {
                session: session.clone(),
                bucket: region,
            });
        }
    }

    for problem in input.pipeline.inconsistencies() {
        log::warn!("Pipeline parameters: {problem}");
    }
    Ok(())
}

/// Drive the step chain until it ends or a step fails
fn drive(ctx: &mut WorkflowContext) -> Result<()> {
    let mut step = Some(Step::FIRST);
    while let Some(current) = step {
        log::info!("{current}");
        let started = Instant::now();
        let result = current.run(ctx);
        ctx.transaction.record_duration(current.name(), started.elapsed());
        step = result.map_err(|e| e.in_step(current))?;
    }
    Ok(())
}

/// Drive the chain, roll back on failure, then always finalize
fn execute(ctx: &mut WorkflowContext) -> Result<()> {
    let outcome = drive(ctx);
    if outcome.is_err() {
        ctx.rollback();
    }
    ctx.transaction.finalize();
    outcome
}

/// Provision a service
///
/// Fails before touching any collaborator when there is neither a function
/// nor a hook to run.
pub fn provision(input: ProvisionInput, providers: Providers) -> Result<ProvisionReport> {
    let service = input.service_name.clone();
    run(input, providers).map_err(|e| Error::Provision {
        service,
        source: Box::new(e),
    })
}

fn run(input: ProvisionInput, providers: Providers) -> Result<ProvisionReport> {
    if input.functions.is_empty() && input.hooks.is_empty() {
        return Err(Error::NoFunctions);
    }

    log::info!(
        "Provisioning service {} (bucket: {}, dry run: {}, in place: {})",
        input.service_name,
        input.bucket,
        input.dry_run,
        input.in_place
    );
    let mut ctx = WorkflowContext::new(input, providers);
    execute(&mut ctx)?;

    let elapsed = ctx.transaction.elapsed();
    log::info!("Provisioned {} in {:.2?}", ctx.input.service_name, elapsed);
    Ok(ProvisionReport {
        service_name: ctx.input.service_name,
        dry_run: ctx.input.dry_run,
        stack: ctx.state.stack,
        pipeline_package: ctx.state.pipeline_package,
        code_location: ctx.state.code_upload,
        context: ctx.state.context,
        durations: ctx.transaction.durations().to_vec(),
        elapsed,
    })
}
