use anyhow::{Context, Result};
use provision::RoleDirectory;
use std::collections::BTreeMap;

/// Role directory backed by the manifest's `[local.roles]` table
#[derive(Debug, Clone, Default)]
pub struct ConfiguredRoles {
    roles: BTreeMap<String, String>,
}

impl ConfiguredRoles {
    pub fn new(roles: BTreeMap<String, String>) -> Self {
        Self { roles }
    }
}

impl RoleDirectory for ConfiguredRoles {
    fn role_arn(&self, name: &str) -> Result<String> {
        self.roles
            .get(name)
            .cloned()
            .with_context(|| format!("Role not found: {name}"))
    }
}
