//! Workflow input and the mutable context threaded through every step

use crate::artifact::UploadLocation;
use crate::function::{FunctionExport, FunctionSpec, LambdaExport};
use crate::gateway::GatewayExport;
use crate::hooks::{ContextMap, HookParams, WorkflowHooks};
use crate::pipeline::PipelineEnvironments;
use crate::provider::{Providers, StackDescriptor};
use crate::roles::RoleCache;
use crate::site::SiteSpec;
use crate::template::Template;
use crate::transaction::Transaction;
use std::path::PathBuf;
use std::sync::Arc;

/// Name of the executable inside the code archive
pub const DEFAULT_BINARY_NAME: &str = "bootstrap";

/// Flags passed to the build collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub build_id: String,
    pub build_tags: Option<String>,
    pub link_flags: Option<String>,
    pub native_deps: bool,
}

/// What to provision
#[derive(Clone)]
pub struct ProvisionInput {
    pub service_name: String,
    pub description: String,
    pub functions: Vec<FunctionSpec>,
    pub gateway: Option<Arc<dyn GatewayExport>>,
    pub site: Option<SiteSpec>,
    /// Bucket receiving every uploaded artifact
    pub bucket: String,
    pub build: BuildOptions,
    pub binary_name: String,
    pub dry_run: bool,
    /// Apply only function code changes instead of converging the stack
    pub in_place: bool,
    /// Package name for a change pipeline; disables direct apply
    pub pipeline_trigger: Option<String>,
    pub pipeline: PipelineEnvironments,
    pub hooks: WorkflowHooks,
    pub function_export: Arc<dyn FunctionExport>,
    /// Log level exposed to deployed functions
    pub function_log_level: String,
    /// Directory for the binary, archives and the serialized template
    pub scratch_dir: PathBuf,
    /// Also write the final template here
    pub template_out: Option<PathBuf>,
}

impl std::fmt::Debug for ProvisionInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionInput")
            .field("service_name", &self.service_name)
            .field("functions", &self.functions.len())
            .field("gateway", &self.gateway.is_some())
            .field("site", &self.site)
            .field("bucket", &self.bucket)
            .field("build", &self.build)
            .field("dry_run", &self.dry_run)
            .field("in_place", &self.in_place)
            .field("pipeline_trigger", &self.pipeline_trigger)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl ProvisionInput {
    /// Input with default export, hooks and options
    pub fn new(service_name: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            description: String::new(),
            functions: Vec::new(),
            gateway: None,
            site: None,
            bucket: bucket.into(),
            build: BuildOptions::default(),
            binary_name: DEFAULT_BINARY_NAME.to_string(),
            dry_run: false,
            in_place: false,
            pipeline_trigger: None,
            pipeline: PipelineEnvironments::default(),
            hooks: WorkflowHooks::default(),
            function_export: Arc::new(LambdaExport),
            function_log_level: "info".to_string(),
            scratch_dir: std::env::temp_dir(),
            template_out: None,
        }
    }

    pub fn with_function(mut self, function: FunctionSpec) -> Self {
        self.functions.push(function);
        self
    }

    pub fn with_hooks(mut self, hooks: WorkflowHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_site(mut self, site: SiteSpec) -> Self {
        self.site = Some(site);
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn GatewayExport>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Name of the stack the service converges
    pub fn stack_name(&self) -> &str {
        &self.service_name
    }
}

/// State accumulated while the steps run
#[derive(Debug, Default)]
pub struct ProvisionState {
    pub roles: RoleCache,
    pub template: Template,
    pub versioning_enabled: bool,
    pub binary_path: Option<PathBuf>,
    pub package_path: Option<PathBuf>,
    pub code_upload: Option<UploadLocation>,
    pub site_upload: Option<UploadLocation>,
    /// Free-form map shared with every hook
    pub context: ContextMap,
    pub stack: Option<StackDescriptor>,
    pub pipeline_package: Option<PathBuf>,
}

/// Everything one provisioning run owns
pub struct WorkflowContext {
    pub input: ProvisionInput,
    pub params: HookParams,
    pub providers: Providers,
    pub state: ProvisionState,
    pub transaction: Transaction,
}

impl WorkflowContext {
    pub fn new(input: ProvisionInput, providers: Providers) -> Self {
        let params = HookParams {
            service_name: input.service_name.clone(),
            bucket: input.bucket.clone(),
            build_id: input.build.build_id.clone(),
            session: providers.session.clone(),
            dry_run: input.dry_run,
        };
        let state = ProvisionState {
            context: input.hooks.context.clone(),
            ..ProvisionState::default()
        };
        Self {
            input,
            params,
            providers,
            state,
            transaction: Transaction::new(),
        }
    }

    /// Default object key for an artifact of this service
    pub fn default_key(&self, file_name: &str) -> String {
        format!("{}/{file_name}", self.input.service_name)
    }

    /// Run rollback actions and hooks, see [`Transaction::rollback`]
    pub fn rollback(&mut self) {
        let summary = self.transaction.rollback(
            &self.input.hooks.rollback,
            &self.state.context,
            &self.params,
        );
        if summary.failed > 0 {
            log::warn!(
                "{} of {} rollback action(s) failed",
                summary.failed,
                summary.attempted
            );
        }
    }
}
