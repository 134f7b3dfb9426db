use anyhow::{Context, Result, bail};
use provision::{BuildProvider, BuildRequest};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Builds the service binary by running a configured command
///
/// The command receives the output path and build flags through
/// `STACKUP_*` environment variables. When `artifact` is set the command is
/// expected to leave the binary there instead, and it is copied over.
#[derive(Debug, Clone)]
pub struct CommandBuild {
    pub argv: Vec<String>,
    pub artifact: Option<PathBuf>,
    pub working_dir: PathBuf,
}

impl BuildProvider for CommandBuild {
    fn compile(&self, request: &BuildRequest<'_>) -> Result<()> {
        let Some((program, args)) = self.argv.split_first() else {
            bail!("Build command is empty");
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.working_dir)
            .env("STACKUP_SERVICE", request.service_name)
            .env("STACKUP_OUTPUT", request.output)
            .env("STACKUP_BUILD_ID", request.build_id)
            .env("STACKUP_NATIVE_DEPS", if request.native_deps { "1" } else { "0" })
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(tags) = request.build_tags {
            cmd.env("STACKUP_BUILD_TAGS", tags);
        }
        if let Some(flags) = request.link_flags {
            cmd.env("STACKUP_LINK_FLAGS", flags);
        }
        if request.dry_run {
            cmd.env("STACKUP_DRY_RUN", "1");
        }

        log::info!("Running build: {}", self.argv.join(" "));
        let status = cmd
            .status()
            .with_context(|| format!("Failed to execute: {}", self.argv.join(" ")))?;
        if !status.success() {
            bail!("Build command failed with {status}");
        }

        if let Some(artifact) = &self.artifact {
            std::fs::copy(artifact, request.output).with_context(|| {
                format!("Build did not produce {}", artifact.display())
            })?;
        }
        if !request.output.is_file() {
            bail!("Build did not produce {}", request.output.display());
        }
        Ok(())
    }
}
