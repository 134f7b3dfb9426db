use anyhow::Result;
use provision::Orchestrator;

use crate::Context;
use crate::backend;
use crate::config::Manifest;
use crate::ui;

pub fn run(_ctx: &Context, manifest: &Manifest) -> Result<()> {
    let stacks = backend::stacks(manifest)?;
    let stack = stacks.describe_stack(&manifest.service.name)?;

    ui::header(&stack.name);
    ui::kv("id", &stack.id);
    ui::kv("status", &stack.status);
    if let Some(record) = stacks.load(&stack.name)? {
        ui::kv("updated", &record.updated_at.to_rfc3339());
        ui::kv("resources", &record.template.resources.len().to_string());
        for (key, value) in &record.tags {
            ui::dim(&format!("{key} = {value}"));
        }
    }
    if !stack.outputs.is_empty() {
        ui::header("Outputs");
        for (name, value) in &stack.outputs {
            ui::kv(name, value);
        }
    }
    Ok(())
}
