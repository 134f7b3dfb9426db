//! Assemble the service template

use crate::annotate::{annotate_functions, annotate_materialized};
use crate::context::WorkflowContext;
use crate::error::{Error, Result};
use crate::function::ExportRequest;
use crate::gateway::GatewayRequest;
use crate::hooks::{HookPhase, run_workflow_hooks};
use crate::site::SiteRequest;
use crate::template::Template;
use std::collections::BTreeMap;

pub(crate) fn ensure_stack(ctx: &mut WorkflowContext) -> Result<()> {
    let input = &ctx.input;
    let params = &ctx.params;
    let state = &mut ctx.state;
    let hooks = &input.hooks;

    run_workflow_hooks(
        HookPhase::PreMarshall,
        &hooks.pre_marshall,
        &mut state.context,
        params,
    )?;

    if !input.description.is_empty() {
        state.template.description = Some(input.description.clone());
    }
    // Parameters are declared whether or not a trigger packages the template
    let with_environments = !input.pipeline.is_empty();
    if with_environments {
        input.pipeline.inject_parameters(&mut state.template);
    }

    let code = state
        .code_upload
        .as_ref()
        .ok_or(Error::MissingArtifact("code archive"))?;
    let export_request = ExportRequest {
        service_name: &input.service_name,
        bucket: &input.bucket,
        code_key: &code.key,
        code_version: code.version(),
        build_id: &input.build.build_id,
        binary_name: &input.binary_name,
        roles: state.roles.map(),
        context: &state.context,
    };
    for function in &input.functions {
        input
            .function_export
            .export(function, &export_request, &mut state.template)
            .map_err(|e| Error::remote(format!("export of function {}", function.name), e))?;
    }
    log::info!("Exported {} function(s)", input.functions.len());

    let mut gateway_outputs = BTreeMap::new();
    if let Some(gateway) = &input.gateway {
        let mut fragment = Template::new();
        gateway
            .export(
                &GatewayRequest {
                    params,
                    functions: &input.functions,
                    roles: state.roles.map(),
                },
                &mut fragment,
            )
            .map_err(|e| Error::remote("gateway export", e))?;
        gateway_outputs = fragment.outputs.clone();
        state.template.safe_merge(fragment)?;
    }

    for decorator in &hooks.service_decorators {
        let mut fragment = Template::new();
        decorator
            .decorate(&mut state.context, params, &mut fragment)
            .map_err(|e| Error::hook(HookPhase::ServiceDecorator, e))?;
        state.template.safe_merge(fragment)?;
    }

    annotate_functions(
        &mut state.template,
        &input.build.build_id,
        &input.function_log_level,
    );
    if with_environments {
        input.pipeline.annotate_functions(&mut state.template);
    }

    if let Some(site) = &input.site {
        let site_upload = state
            .site_upload
            .as_ref()
            .ok_or(Error::MissingArtifact("site archive"))?;
        site.export
            .export(
                &SiteRequest {
                    params,
                    code,
                    site: site_upload,
                    binary_name: &input.binary_name,
                    gateway_outputs: &gateway_outputs,
                },
                &mut state.template,
            )
            .map_err(|e| Error::remote("site export", e))?;
    }

    run_workflow_hooks(
        HookPhase::PostMarshall,
        &hooks.post_marshall,
        &mut state.context,
        params,
    )?;

    annotate_materialized(&mut state.template)?;

    for validator in &hooks.validation {
        let snapshot = state.template.clone();
        validator
            .validate(&mut state.context, params, &snapshot)
            .map_err(|e| Error::hook(HookPhase::Validation, e))?;
    }
    Ok(())
}
