use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use provision::{
    CodeUpdate, ConvergeRequest, Orchestrator, ResourceChange, StackDescriptor, Template,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// Persisted state of one local stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackRecord {
    pub name: String,
    pub id: String,
    pub status: String,
    pub template: Template,
    #[serde(default)]
    pub template_url: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StackRecord {
    fn descriptor(&self) -> StackDescriptor {
        let outputs = self
            .template
            .outputs
            .iter()
            .map(|(name, output)| {
                let value = output.get("Value").unwrap_or(output);
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect();
        StackDescriptor {
            name: self.name.clone(),
            id: self.id.clone(),
            status: self.status.clone(),
            outputs,
        }
    }
}

/// Physical id the local backend assigns to a stack resource
pub fn physical_id(stack_name: &str, logical_id: &str) -> String {
    format!("{stack_name}-{logical_id}")
}

/// Stacks stored as JSON records under `<root>/stacks`
///
/// Convergence replaces the record wholesale; change-sets are resource
/// level diffs against the stored template.
#[derive(Debug)]
pub struct LocalStacks {
    root: PathBuf,
    lock: Mutex<()>,
}

impl LocalStacks {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into().join("stacks"),
            lock: Mutex::new(()),
        }
    }

    fn record_path(&self, stack_name: &str) -> PathBuf {
        self.root.join(format!("{stack_name}.json"))
    }

    fn change_set_path(&self, stack_name: &str, change_set_name: &str) -> PathBuf {
        self.root
            .join(format!("{stack_name}.changesets"))
            .join(format!("{change_set_name}.json"))
    }

    pub fn load(&self, stack_name: &str) -> Result<Option<StackRecord>> {
        let path = self.record_path(stack_name);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(
                serde_json::from_str(&content)
                    .with_context(|| format!("Invalid stack record {}", path.display()))?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Could not read {}", path.display())),
        }
    }

    fn save(&self, record: &StackRecord) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let content = serde_json::to_string_pretty(record)?;
        fs::write(self.record_path(&record.name), content)?;
        Ok(())
    }

    fn with_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("stack store lock poisoned"))?;
        f()
    }
}

/// Resource-level diff between the live and the proposed template
pub fn diff_templates(stack_name: &str, live: &Template, proposed: &Template) -> Vec<ResourceChange> {
    let mut changes = Vec::new();
    for (logical_id, resource) in &proposed.resources {
        let action = match live.resources.get(logical_id) {
            None => "Add",
            Some(existing) if existing != resource => "Modify",
            Some(_) => continue,
        };
        changes.push(ResourceChange {
            action: action.to_string(),
            resource_type: resource.resource_type.clone(),
            logical_id: logical_id.clone(),
            physical_id: (action != "Add").then(|| physical_id(stack_name, logical_id)),
        });
    }
    for (logical_id, resource) in &live.resources {
        if !proposed.resources.contains_key(logical_id) {
            changes.push(ResourceChange {
                action: "Remove".to_string(),
                resource_type: resource.resource_type.clone(),
                logical_id: logical_id.clone(),
                physical_id: Some(physical_id(stack_name, logical_id)),
            });
        }
    }
    changes
}

impl Orchestrator for LocalStacks {
    fn compute_change_set(
        &self,
        change_set_name: &str,
        stack_name: &str,
        template: &Template,
        _template_url: &str,
    ) -> Result<Vec<ResourceChange>> {
        let live = self
            .load(stack_name)?
            .map(|r| r.template)
            .unwrap_or_default();
        let changes = diff_templates(stack_name, &live, template);

        let path = self.change_set_path(stack_name, change_set_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(&changes)?)?;
        log::debug!(
            "Change-set {change_set_name} for {stack_name}: {} change(s)",
            changes.len()
        );
        Ok(changes)
    }

    fn delete_change_set(&self, stack_name: &str, change_set_name: &str) -> Result<()> {
        match fs::remove_file(self.change_set_path(stack_name, change_set_name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn converge_stack(&self, request: &ConvergeRequest<'_>) -> Result<StackDescriptor> {
        self.with_lock(|| {
            let now = Utc::now();
            let record = match self.load(request.stack_name)? {
                Some(existing) => StackRecord {
                    status: "UPDATE_COMPLETE".into(),
                    template: request.template.clone(),
                    template_url: request.template_url.to_string(),
                    tags: request.tags.clone(),
                    updated_at: now,
                    ..existing
                },
                None => StackRecord {
                    name: request.stack_name.to_string(),
                    id: format!("local:stack/{}/{}", request.stack_name, now.timestamp()),
                    status: "CREATE_COMPLETE".into(),
                    template: request.template.clone(),
                    template_url: request.template_url.to_string(),
                    tags: request.tags.clone(),
                    created_at: now,
                    updated_at: now,
                },
            };

            let waited = request.start_time.elapsed().unwrap_or_default();
            if waited > request.timeout {
                bail!(
                    "Timed out converging {} after {}s",
                    request.stack_name,
                    waited.as_secs()
                );
            }

            self.save(&record)?;
            log::info!("Stack {} is {}", record.name, record.status);
            Ok(record.descriptor())
        })
    }

    fn describe_stack(&self, stack_name: &str) -> Result<StackDescriptor> {
        self.load(stack_name)?
            .map(|r| r.descriptor())
            .with_context(|| format!("Stack does not exist: {stack_name}"))
    }

    fn update_function_code(&self, update: &CodeUpdate) -> Result<()> {
        self.with_lock(|| {
            let Some((stack_name, logical_id)) = update.function_id.rsplit_once('-') else {
                bail!("Unknown function: {}", update.function_id);
            };
            let mut record = self
                .load(stack_name)?
                .with_context(|| format!("Unknown function: {}", update.function_id))?;
            let resource = record
                .template
                .resource_mut(logical_id)
                .with_context(|| format!("Unknown function: {}", update.function_id))?;

            let mut code = json!({ "S3Bucket": update.bucket, "S3Key": update.key });
            if let Some(version) = &update.version {
                code["S3ObjectVersion"] = json!(version);
            }
            match resource.properties.as_object_mut() {
                Some(properties) => {
                    properties.insert("Code".to_string(), code);
                }
                None => resource.properties = json!({ "Code": code }),
            }
            record.updated_at = Utc::now();
            self.save(&record)
        })
    }
}
