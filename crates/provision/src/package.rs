//! Build the binary and package it into the code archive

use crate::archive::ArchiveWriter;
use crate::context::WorkflowContext;
use crate::error::{Error, Result};
use crate::hooks::{HookPhase, run_workflow_hooks};
use crate::provider::BuildRequest;

pub(crate) fn create_package(ctx: &mut WorkflowContext) -> Result<()> {
    let hooks = &ctx.input.hooks;
    run_workflow_hooks(
        HookPhase::PreBuild,
        &hooks.pre_build,
        &mut ctx.state.context,
        &ctx.params,
    )?;

    std::fs::create_dir_all(&ctx.input.scratch_dir)?;
    let binary_path = ctx.input.scratch_dir.join(format!(
        "{}-{}",
        ctx.input.service_name, ctx.input.binary_name
    ));
    ctx.transaction.register_file_cleanup(binary_path.clone());

    log::info!("Compiling binary for {}", ctx.input.service_name);
    let build = &ctx.input.build;
    ctx.providers
        .build
        .compile(&BuildRequest {
            service_name: &ctx.input.service_name,
            output: &binary_path,
            native_deps: build.native_deps,
            build_id: &build.build_id,
            build_tags: build.build_tags.as_deref(),
            link_flags: build.link_flags.as_deref(),
            dry_run: ctx.input.dry_run,
        })
        .map_err(|e| Error::remote("compile", e))?;
    ctx.state.binary_path = Some(binary_path.clone());

    run_workflow_hooks(
        HookPhase::PostBuild,
        &hooks.post_build,
        &mut ctx.state.context,
        &ctx.params,
    )?;

    let package_path = ctx
        .input
        .scratch_dir
        .join(format!("{}-code.zip", ctx.input.service_name));
    ctx.transaction.register_file_cleanup(package_path.clone());
    let mut archive = ArchiveWriter::create(&package_path)?;
    for hook in &hooks.archive {
        hook.decorate(&mut ctx.state.context, &ctx.params, &mut archive)
            .map_err(|e| Error::hook(HookPhase::Archive, e))?;
    }
    archive.add_executable(&ctx.input.binary_name, &binary_path)?;
    let package_path = archive.finish()?;

    let size = std::fs::metadata(&package_path).map_or(0, |m| m.len());
    log::info!(
        "Created code archive {} ({size} bytes)",
        package_path.display()
    );
    ctx.state.package_path = Some(package_path);
    Ok(())
}
