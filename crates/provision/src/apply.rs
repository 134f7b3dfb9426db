//! The terminal orchestration operation
//!
//! Depending on the input the finished template is packaged for a change
//! pipeline, only logged (dry run), applied as narrow in-place code updates,
//! or submitted for full stack convergence.

use crate::annotate::{BUILD_ID_TAG, BUILD_TAGS_TAG};
use crate::artifact::UploadLocation;
use crate::context::WorkflowContext;
use crate::error::{Error, Result};
use crate::provider::{CodeUpdate, ConvergeRequest, Orchestrator, ResourceChange};
use crate::task::{Task, run_all, task};
use crate::template::{Template, types};
use crate::upload::{UploadRequest, register_upload, upload_artifact};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Convergence deadline for ordinary templates
pub const DEFAULT_STACK_TIMEOUT: Duration = Duration::from_secs(20 * 60);
/// Convergence deadline when the template holds a content distribution
pub const DISTRIBUTION_STACK_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// The only change kind an in-place update can apply
const IN_PLACE_ACTION: &str = "Modify";

/// How long to wait for a stack built from `template`
pub fn stack_timeout(template: &Template) -> Duration {
    if template.contains_type(types::DISTRIBUTION) {
        DISTRIBUTION_STACK_TIMEOUT
    } else {
        DEFAULT_STACK_TIMEOUT
    }
}

/// Tags attached to the converged stack
pub fn stack_tags(build_id: &str, build_tags: Option<&str>) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert(BUILD_ID_TAG.to_string(), build_id.to_string());
    if let Some(build_tags) = build_tags.filter(|t| !t.is_empty()) {
        tags.insert(BUILD_TAGS_TAG.to_string(), build_tags.to_string());
    }
    tags
}

/// Split a change-set into function code updates and everything else
///
/// Returns the updatable changes, or every change that cannot be applied in
/// place, formatted for the error message.
pub fn classify_changes(changes: &[ResourceChange]) -> std::result::Result<Vec<&ResourceChange>, Vec<String>> {
    let (supported, unsupported): (Vec<&ResourceChange>, Vec<&ResourceChange>) = changes
        .iter()
        .partition(|c| c.action == IN_PLACE_ACTION && c.resource_type == types::FUNCTION);

    if unsupported.is_empty() {
        Ok(supported)
    } else {
        Err(unsupported
            .iter()
            .map(|c| {
                format!(
                    "{} for {} (ResourceType: {})",
                    c.action, c.logical_id, c.resource_type
                )
            })
            .collect())
    }
}

/// Compute a change-set and push only function code changes
///
/// Every change must be a `Modify` of a function resource; anything else
/// fails the update before a single function is touched.
pub fn update_in_place(
    orchestrator: &dyn Orchestrator,
    stack_name: &str,
    template: &Template,
    template_url: &str,
    code: &UploadLocation,
    bucket: &str,
) -> Result<usize> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let change_set = format!("{stack_name}-InPlaceUpdate-{millis}");

    let changes = orchestrator
        .compute_change_set(&change_set, stack_name, template, template_url)
        .map_err(|e| Error::remote(format!("change-set {change_set}"), e))?;
    log::debug!("Change-set {change_set}: {changes:?}");

    let discard = || {
        if let Err(e) = orchestrator.delete_change_set(stack_name, &change_set) {
            log::warn!("Failed to delete change-set {change_set}: {e:#}");
        }
    };

    if changes.is_empty() {
        discard();
        return Err(Error::NoChanges);
    }
    let updates = match classify_changes(&changes) {
        Ok(updates) => updates,
        Err(unsupported) => {
            discard();
            return Err(Error::UnsupportedInPlace(unsupported));
        }
    };

    let mut tasks: Vec<Task<'_, (), Error>> = updates
        .iter()
        .map(|change| {
            let update = CodeUpdate {
                function_id: change
                    .physical_id
                    .clone()
                    .unwrap_or_else(|| change.logical_id.clone()),
                bucket: bucket.to_string(),
                key: code.key.clone(),
                version: code.version.clone(),
            };
            task(move || {
                log::info!("Updating function code: {}", update.function_id);
                orchestrator
                    .update_function_code(&update)
                    .map_err(|e| Error::remote(format!("code update of {}", update.function_id), e))
            })
        })
        .collect();
    tasks.push(task(|| {
        orchestrator
            .delete_change_set(stack_name, &change_set)
            .map_err(|e| Error::remote(format!("deletion of change-set {change_set}"), e))
    }));

    run_all(tasks)?.into_values("in-place update")?;
    Ok(updates.len())
}

/// Serialize the template and run the terminal operation
pub(crate) fn apply_operation(ctx: &mut WorkflowContext) -> Result<()> {
    let body = ctx.state.template.to_json()?;
    log::debug!("Template:\n{}", ctx.state.template.to_json_pretty()?);
    if let Some(path) = &ctx.input.template_out {
        std::fs::write(path, ctx.state.template.to_json_pretty()?)?;
        log::info!("Wrote template to {}", path.display());
    }

    if let Some(trigger) = &ctx.input.pipeline_trigger {
        let path = ctx.input.scratch_dir.join(trigger);
        let path = ctx.input.pipeline.package(&body, &path)?;
        ctx.state.pipeline_package = Some(path);
        return Ok(());
    }

    let stack_name = ctx.input.stack_name().to_string();
    if ctx.input.dry_run {
        let action = if ctx.input.in_place {
            "in-place update"
        } else {
            "stack convergence"
        };
        log::info!("Dry run: skipping {action} of stack {stack_name}");
        return Ok(());
    }

    // The template goes through the bucket like every other artifact
    let template_path = ctx
        .input
        .scratch_dir
        .join(format!("{stack_name}-cftemplate.json"));
    ctx.transaction.register_file_cleanup(template_path.clone());
    std::fs::write(&template_path, &body)?;
    let request = UploadRequest {
        default_key: ctx.default_key(&format!("{stack_name}-cftemplate.json")),
        local_path: template_path,
    };
    let uploaded = upload_artifact(
        ctx.providers.storage.as_ref(),
        &ctx.input.bucket,
        &request,
        ctx.state.versioning_enabled,
        false,
    )?;
    register_upload(ctx, &uploaded);
    let template_url = uploaded.location.location.as_str();

    let orchestrator = ctx.providers.orchestrator.as_ref();
    if ctx.input.in_place {
        let code = ctx
            .state
            .code_upload
            .as_ref()
            .ok_or(Error::MissingArtifact("code archive"))?;
        let count = update_in_place(
            orchestrator,
            &stack_name,
            &ctx.state.template,
            template_url,
            code,
            &ctx.input.bucket,
        )?;
        log::info!("Updated {count} function(s) in place");

        let stack = orchestrator
            .describe_stack(&stack_name)
            .map_err(|e| Error::remote(format!("describe stack {stack_name}"), e))?;
        ctx.state.stack = Some(stack);
        return Ok(());
    }

    let timeout = stack_timeout(&ctx.state.template);
    let tags = stack_tags(
        &ctx.input.build.build_id,
        ctx.input.build.build_tags.as_deref(),
    );
    log::info!(
        "Converging stack {stack_name} (timeout: {} min)",
        timeout.as_secs() / 60
    );
    let stack = orchestrator
        .converge_stack(&ConvergeRequest {
            stack_name: &stack_name,
            template: &ctx.state.template,
            template_url,
            tags: &tags,
            start_time: ctx.transaction.start_time(),
            timeout,
        })
        .map_err(|e| Error::remote(format!("convergence of stack {stack_name}"), e))?;
    log::info!("Stack {} is {}", stack.name, stack.status);
    ctx.state.stack = Some(stack);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Resource;
    use serde_json::json;

    fn change(action: &str, resource_type: &str, logical_id: &str) -> ResourceChange {
        ResourceChange {
            action: action.into(),
            resource_type: resource_type.into(),
            logical_id: logical_id.into(),
            physical_id: None,
        }
    }

    #[test]
    fn test_timeout_extends_for_distributions() {
        let mut template = Template::new();
        assert_eq!(stack_timeout(&template), DEFAULT_STACK_TIMEOUT);
        template.add_resource("Cdn", Resource::new(types::DISTRIBUTION, json!({})));
        assert_eq!(stack_timeout(&template), DISTRIBUTION_STACK_TIMEOUT);
    }

    #[test]
    fn test_stack_tags() {
        let tags = stack_tags("b1", None);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[BUILD_ID_TAG], "b1");

        let tags = stack_tags("b1", Some("lambdabinary"));
        assert_eq!(tags[BUILD_TAGS_TAG], "lambdabinary");
        assert_eq!(stack_tags("b1", Some("")).len(), 1);
    }

    #[test]
    fn test_classify_accepts_only_function_modifications() {
        let changes = vec![
            change("Modify", types::FUNCTION, "A"),
            change("Modify", types::FUNCTION, "B"),
        ];
        assert_eq!(classify_changes(&changes).unwrap().len(), 2);

        let changes = vec![
            change("Modify", types::FUNCTION, "A"),
            change("Add", "AWS::SQS::Queue", "Queue"),
            change("Remove", types::FUNCTION, "Old"),
        ];
        let unsupported = classify_changes(&changes).unwrap_err();
        assert_eq!(
            unsupported,
            vec![
                "Add for Queue (ResourceType: AWS::SQS::Queue)",
                format!("Remove for Old (ResourceType: {})", types::FUNCTION).as_str(),
            ]
        );
    }
}
