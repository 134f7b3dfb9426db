use anyhow::Result;
use colored::Colorize;
use provision::{BuildOptions, ProvisionInput, ProvisionReport, SiteSpec};

use crate::Context;
use crate::backend;
use crate::cli::ProvisionArgs;
use crate::config::Manifest;
use crate::ui;

/// Build identifier used when none is given
fn default_build_id() -> String {
    chrono::Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// Translate the manifest and flags into workflow input
pub fn input_from(manifest: &Manifest, args: &ProvisionArgs) -> ProvisionInput {
    let service = &manifest.service;
    let mut input = ProvisionInput::new(&service.name, &service.bucket);
    input.description.clone_from(&service.description);
    input.functions.clone_from(&manifest.functions);
    if let Some(name) = &service.binary_name {
        input.binary_name.clone_from(name);
    }
    input.build = BuildOptions {
        build_id: args.build_id.clone().unwrap_or_else(default_build_id),
        build_tags: args.build_tags.clone().or_else(|| manifest.build.tags.clone()),
        link_flags: manifest.build.link_flags.clone(),
        native_deps: manifest.build.native_deps,
    };
    input.dry_run = args.dry_run;
    input.in_place = args.in_place;
    input.function_log_level.clone_from(&service.log_level);
    input.scratch_dir = manifest.scratch_dir();
    input.template_out.clone_from(&args.template_out);

    if let Some(site) = &manifest.site {
        let mut spec = SiteSpec::new(manifest.resolve(&site.resources_dir));
        spec.prefix.clone_from(&site.prefix);
        input = input.with_site(spec);
    }
    if let Some(pipeline) = &manifest.pipeline {
        input.pipeline_trigger = Some(pipeline.trigger.clone());
        input.pipeline = pipeline.environments.clone();
    }
    input
}

pub fn run(ctx: &Context, manifest: &Manifest, args: &ProvisionArgs) -> Result<()> {
    let input = input_from(manifest, args);
    std::fs::create_dir_all(&input.scratch_dir)?;
    let providers = backend::providers(manifest)?;

    if !ctx.quiet {
        ui::header(&format!("Provisioning {}", manifest.service.name));
        ui::kv("bucket", &input.bucket);
        ui::kv("build", &input.build.build_id);
        if args.dry_run {
            ui::kv("mode", &"dry run".yellow().to_string());
            ui::warn("Nothing will be uploaded or applied");
        } else if args.in_place {
            ui::kv("mode", "in place");
        }
    }

    let report = match provision::provision(input, providers) {
        Ok(report) => report,
        Err(e) => {
            ui::error(&e.to_string());
            return Err(e.into());
        }
    };

    if !ctx.quiet {
        print_report(ctx, &report);
    }
    Ok(())
}

fn print_report(ctx: &Context, report: &ProvisionReport) {
    if let Some(location) = &report.code_location {
        ui::kv("code", &location.location);
    }
    if let Some(package) = &report.pipeline_package {
        ui::success(&format!("Pipeline package written to {}", package.display()));
    }
    if let Some(stack) = &report.stack {
        ui::success(&format!("Stack {} is {}", stack.name, stack.status));
        for (name, value) in &stack.outputs {
            ui::kv(name, value);
        }
    } else if report.dry_run {
        ui::info("Dry run complete");
    }
    if ctx.verbose > 0 {
        ui::print_steps(&report.durations, report.elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const MANIFEST: &str = r#"
[service]
name = "hello"
bucket = "artifacts"
log_level = "debug"

[build]
artifact = "target/bootstrap"
tags = "lambda"

[[function]]
name = "greet"

[site]
resources_dir = "public"

[pipeline]
trigger = "release"

[pipeline.environments.prod]
STAGE = "prod"
"#;

    #[test]
    fn test_input_from_manifest() {
        let mut manifest = Manifest::parse(MANIFEST).unwrap();
        manifest.base_dir = PathBuf::from("/srv/hello");
        let args = ProvisionArgs {
            dry_run: true,
            build_id: Some("b42".into()),
            ..ProvisionArgs::default()
        };

        let input = input_from(&manifest, &args);
        assert_eq!(input.service_name, "hello");
        assert_eq!(input.functions.len(), 1);
        assert_eq!(input.build.build_id, "b42");
        assert_eq!(input.build.build_tags.as_deref(), Some("lambda"));
        assert!(input.dry_run);
        assert_eq!(input.function_log_level, "debug");
        assert_eq!(input.scratch_dir, PathBuf::from("/srv/hello/.stackup"));
        assert_eq!(
            input.site.unwrap().resources_dir,
            PathBuf::from("/srv/hello/public")
        );
        assert_eq!(input.pipeline_trigger.as_deref(), Some("release"));
        assert_eq!(input.pipeline.len(), 1);
    }

    #[test]
    fn test_provision_then_update_in_place_locally() {
        use provision::Orchestrator;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bootstrap"), b"\x7fELF").unwrap();
        let text = r#"
[service]
name = "hello"
bucket = "artifacts"

[build]
artifact = "bootstrap"

[[function]]
name = "greet"
role = "exec"

[local]
root = "state"

[local.buckets.artifacts]
versioning = true

[local.roles]
exec = "arn:aws:iam::123456789012:role/exec"
"#;
        let mut manifest = Manifest::parse(text).unwrap();
        manifest.base_dir = dir.path().to_path_buf();
        let ctx = Context {
            verbose: 0,
            quiet: true,
        };

        let args = ProvisionArgs {
            build_id: Some("b1".into()),
            ..ProvisionArgs::default()
        };
        run(&ctx, &manifest, &args).unwrap();
        let stacks = backend::stacks(&manifest).unwrap();
        assert_eq!(stacks.describe_stack("hello").unwrap().status, "CREATE_COMPLETE");

        // The new code version is the only difference
        std::thread::sleep(std::time::Duration::from_millis(5));
        let args = ProvisionArgs {
            in_place: true,
            build_id: Some("b1".into()),
            ..ProvisionArgs::default()
        };
        run(&ctx, &manifest, &args).unwrap();
        let record = stacks.load("hello").unwrap().unwrap();
        assert_eq!(record.status, "CREATE_COMPLETE");
        assert!(record.updated_at > record.created_at);
    }

    #[test]
    fn test_flag_build_tags_win() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let args = ProvisionArgs {
            build_tags: Some("canary".into()),
            ..ProvisionArgs::default()
        };
        let input = input_from(&manifest, &args);
        assert_eq!(input.build.build_tags.as_deref(), Some("canary"));
        assert_eq!(input.build.build_id.len(), 14);
    }
}
