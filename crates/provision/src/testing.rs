//! Recording collaborator doubles shared by the workflow tests

use crate::provider::{
    BuildProvider, BuildRequest, CodeUpdate, ConvergeRequest, ObjectStore, Orchestrator,
    Providers, ResourceChange, RoleDirectory, Session, StackDescriptor,
};
use crate::template::Template;
use anyhow::{Result, bail};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered log of every collaborator call
pub type CallLog = Arc<Mutex<Vec<String>>>;

fn record(log: &CallLog, entry: String) {
    log.lock().unwrap().push(entry);
}

pub struct MockBuild {
    pub calls: CallLog,
    pub fail: bool,
}

impl BuildProvider for MockBuild {
    fn compile(&self, request: &BuildRequest<'_>) -> Result<()> {
        record(&self.calls, format!("compile {}", request.service_name));
        if self.fail {
            bail!("compiler crashed");
        }
        std::fs::write(request.output, b"\x7fELF")?;
        Ok(())
    }
}

pub struct MockStore {
    pub calls: CallLog,
    pub versioning: bool,
    pub region: String,
    /// Uploads whose key contains this text fail
    pub fail_key: Option<String>,
}

impl ObjectStore for MockStore {
    fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> Result<String> {
        record(&self.calls, format!("upload {key}"));
        if !local_path.is_file() {
            bail!("missing local file {}", local_path.display());
        }
        if self.fail_key.as_deref().is_some_and(|f| key.contains(f)) {
            bail!("access denied");
        }
        let location = format!("https://{bucket}.s3.amazonaws.com/{key}");
        Ok(if self.versioning {
            format!("{location}?versionId=v1")
        } else {
            location
        })
    }

    fn delete(&self, _bucket: &str, key: &str, version: Option<&str>) -> Result<()> {
        record(&self.calls, format!("delete {key} {version:?}"));
        Ok(())
    }

    fn versioning_enabled(&self, _bucket: &str) -> Result<bool> {
        record(&self.calls, "versioning".into());
        Ok(self.versioning)
    }

    fn bucket_region(&self, _bucket: &str) -> Result<String> {
        record(&self.calls, "region".into());
        Ok(self.region.clone())
    }
}

/// What the orchestrator saw for a convergence request
#[derive(Debug, Clone)]
pub struct Converged {
    pub stack_name: String,
    pub timeout: Duration,
    pub tags: BTreeMap<String, String>,
    pub template: Template,
}

pub struct MockOrchestrator {
    pub calls: CallLog,
    pub changes: Vec<ResourceChange>,
    pub fail_converge: bool,
    pub converged: Mutex<Vec<Converged>>,
    pub updates: Mutex<Vec<CodeUpdate>>,
}

impl MockOrchestrator {
    fn descriptor(stack_name: &str) -> StackDescriptor {
        StackDescriptor {
            name: stack_name.to_string(),
            id: format!("local:{stack_name}"),
            status: "UPDATE_COMPLETE".into(),
            outputs: BTreeMap::new(),
        }
    }
}

impl Orchestrator for MockOrchestrator {
    fn compute_change_set(
        &self,
        change_set_name: &str,
        _stack_name: &str,
        _template: &Template,
        _template_url: &str,
    ) -> Result<Vec<ResourceChange>> {
        record(&self.calls, format!("change-set {change_set_name}"));
        Ok(self.changes.clone())
    }

    fn delete_change_set(&self, _stack_name: &str, change_set_name: &str) -> Result<()> {
        record(&self.calls, format!("delete change-set {change_set_name}"));
        Ok(())
    }

    fn converge_stack(&self, request: &ConvergeRequest<'_>) -> Result<StackDescriptor> {
        record(&self.calls, format!("converge {}", request.stack_name));
        if self.fail_converge {
            bail!("stack rolled back");
        }
        self.converged.lock().unwrap().push(Converged {
            stack_name: request.stack_name.to_string(),
            timeout: request.timeout,
            tags: request.tags.clone(),
            template: request.template.clone(),
        });
        Ok(Self::descriptor(request.stack_name))
    }

    fn describe_stack(&self, stack_name: &str) -> Result<StackDescriptor> {
        record(&self.calls, format!("describe {stack_name}"));
        Ok(Self::descriptor(stack_name))
    }

    fn update_function_code(&self, update: &CodeUpdate) -> Result<()> {
        record(&self.calls, format!("update {}", update.function_id));
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }
}

pub struct MockRoles {
    pub calls: CallLog,
}

impl RoleDirectory for MockRoles {
    fn role_arn(&self, name: &str) -> Result<String> {
        record(&self.calls, format!("role {name}"));
        Ok(format!("arn:aws:iam::123456789012:role/{name}"))
    }
}

/// A full set of doubles sharing one call log
pub struct Harness {
    pub calls: CallLog,
    pub build: Arc<MockBuild>,
    pub storage: Arc<MockStore>,
    pub orchestrator: Arc<MockOrchestrator>,
    pub session_region: String,
}

impl Harness {
    pub fn new() -> Self {
        let calls = CallLog::default();
        Self {
            build: Arc::new(MockBuild {
                calls: Arc::clone(&calls),
                fail: false,
            }),
            storage: Arc::new(MockStore {
                calls: Arc::clone(&calls),
                versioning: true,
                region: "us-east-1".into(),
                fail_key: None,
            }),
            orchestrator: Arc::new(MockOrchestrator {
                calls: Arc::clone(&calls),
                changes: Vec::new(),
                fail_converge: false,
                converged: Mutex::new(Vec::new()),
                updates: Mutex::new(Vec::new()),
            }),
            session_region: "us-east-1".into(),
            calls,
        }
    }

    pub fn with_storage(mut self, versioning: bool, region: &str, fail_key: Option<&str>) -> Self {
        self.storage = Arc::new(MockStore {
            calls: Arc::clone(&self.calls),
            versioning,
            region: region.into(),
            fail_key: fail_key.map(String::from),
        });
        self
    }

    pub fn with_changes(mut self, changes: Vec<ResourceChange>) -> Self {
        self.orchestrator = Arc::new(MockOrchestrator {
            calls: Arc::clone(&self.calls),
            changes,
            fail_converge: false,
            converged: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
        });
        self
    }

    pub fn failing_convergence(mut self) -> Self {
        self.orchestrator = Arc::new(MockOrchestrator {
            calls: Arc::clone(&self.calls),
            changes: Vec::new(),
            fail_converge: true,
            converged: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
        });
        self
    }

    pub fn providers(&self) -> Providers {
        Providers {
            session: Session::new(self.session_region.clone()),
            build: Arc::clone(&self.build) as Arc<dyn BuildProvider>,
            storage: Arc::clone(&self.storage) as Arc<dyn ObjectStore>,
            orchestrator: Arc::clone(&self.orchestrator) as Arc<dyn Orchestrator>,
            roles: Arc::new(MockRoles {
                calls: Arc::clone(&self.calls),
            }),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose text starts with `prefix`
    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }
}
