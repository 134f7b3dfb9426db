//! Role resolution cache
//!
//! Maps every inline role definition and every literal role name used by the
//! service's functions to a handle the template can embed. Inline roles
//! become template resources referenced by their `Arn` attribute; literal
//! names are checked against the role directory once and cached as ARNs.

use crate::error::{Error, Result};
use crate::function::{FunctionRole, FunctionSpec, RoleDefinition};
use crate::provider::RoleDirectory;
use crate::template::{Template, get_att};
use serde_json::Value;
use std::collections::HashMap;

/// A resolved execution role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleHandle {
    /// Forward reference to a role resource created by the stack
    Reference { logical_name: String },
    /// ARN of a pre-existing role
    Arn(String),
}

impl RoleHandle {
    /// Template expression for this role's ARN
    pub fn to_value(&self) -> Value {
        match self {
            Self::Reference { logical_name } => get_att(logical_name, "Arn"),
            Self::Arn(arn) => Value::String(arn.clone()),
        }
    }
}

/// Logical role id or literal role name -> resolved handle
#[derive(Debug, Default, Clone)]
pub struct RoleNameMap {
    entries: HashMap<String, RoleHandle>,
}

impl RoleNameMap {
    /// Look up a handle by logical id or literal name
    pub fn get(&self, key: &str) -> Option<&RoleHandle> {
        self.entries.get(key)
    }

    /// Check if a key has been resolved
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert a handle, keeping an existing entry for the same key
    pub fn insert(&mut self, key: String, handle: RoleHandle) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, handle);
        true
    }

    /// The handle for a function's role declaration
    pub fn handle_for(
        &self,
        service_name: &str,
        owner_name: &str,
        role: &FunctionRole,
    ) -> Option<&RoleHandle> {
        match role {
            FunctionRole::Name(name) => self.get(name),
            FunctionRole::Definition(def) => self.get(&def.logical_name(service_name, owner_name)),
        }
    }

    /// Iterate over all resolved entries
    pub fn iter(&self) -> impl Iterator<Item = (&String, &RoleHandle)> {
        self.entries.iter()
    }

    /// Number of resolved entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing has been resolved
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Memoizing resolver that owns the [`RoleNameMap`] for one provisioning run
#[derive(Debug, Default)]
pub struct RoleCache {
    map: RoleNameMap,
}

impl RoleCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The resolved map
    pub fn map(&self) -> &RoleNameMap {
        &self.map
    }

    /// Resolve every role referenced by `functions` and their custom resources
    ///
    /// Inline definitions are registered in `template` once per logical id;
    /// literal names are looked up once per distinct name. Entries resolved
    /// by an earlier call are not touched again. Returns the number of new
    /// entries.
    pub fn resolve(
        &mut self,
        service_name: &str,
        functions: &[FunctionSpec],
        template: &mut Template,
        directory: &dyn RoleDirectory,
    ) -> Result<usize> {
        let before = self.map.len();
        let mut literal_names: Vec<&str> = Vec::new();

        for function in functions {
            let owners = std::iter::once((function.name.as_str(), function.role.as_ref())).chain(
                function
                    .custom_resources
                    .iter()
                    .map(|c| (c.name.as_str(), c.role.as_ref())),
            );

            for (owner_name, role) in owners {
                match role {
                    Some(FunctionRole::Name(name)) => {
                        if !literal_names.contains(&name.as_str()) {
                            literal_names.push(name.as_str());
                        }
                    }
                    Some(FunctionRole::Definition(def)) => {
                        self.register_definition(service_name, owner_name, def, template);
                    }
                    None => {}
                }
            }
        }

        for name in literal_names {
            if self.map.contains(name) {
                continue;
            }
            log::debug!("Checking role name: {name}");
            let arn = directory
                .role_arn(name)
                .map_err(|e| Error::remote(format!("role lookup for {name}"), e))?;
            self.map.insert(name.to_string(), RoleHandle::Arn(arn));
        }

        let added = self.map.len() - before;
        log::info!("Roles verified (count: {}, new: {added})", self.map.len());
        Ok(added)
    }

    fn register_definition(
        &mut self,
        service_name: &str,
        owner_name: &str,
        definition: &RoleDefinition,
        template: &mut Template,
    ) {
        let logical_name = definition.logical_name(service_name, owner_name);
        if self.map.contains(&logical_name) {
            return;
        }
        template.add_resource(logical_name.clone(), definition.to_resource());
        self.map.insert(
            logical_name.clone(),
            RoleHandle::Reference { logical_name },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{CustomResourceSpec, FunctionOptions};
    use crate::template::types;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Role directory that counts lookups per name
    #[derive(Default)]
    struct CountingDirectory {
        calls: Mutex<HashMap<String, usize>>,
        missing: Vec<String>,
    }

    impl RoleDirectory for CountingDirectory {
        fn role_arn(&self, name: &str) -> anyhow::Result<String> {
            *self.calls.lock().unwrap().entry(name.to_string()).or_default() += 1;
            if self.missing.iter().any(|m| m == name) {
                anyhow::bail!("role {name} not found");
            }
            Ok(format!("arn:aws:iam::123:role/{name}"))
        }
    }

    fn functions() -> Vec<FunctionSpec> {
        vec![
            FunctionSpec::new("a").with_role(FunctionRole::Name("shared".into())),
            FunctionSpec::new("b").with_role(FunctionRole::Name("shared".into())),
            FunctionSpec::new("c")
                .with_role(FunctionRole::Definition(RoleDefinition::default()))
                .with_custom_resource(CustomResourceSpec {
                    name: "seed".into(),
                    role: Some(FunctionRole::Name("other".into())),
                    options: FunctionOptions::default(),
                }),
        ]
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let directory = CountingDirectory::default();
        let mut template = Template::new();
        let mut cache = RoleCache::new();

        let added = cache
            .resolve("svc", &functions(), &mut template, &directory)
            .unwrap();
        assert_eq!(added, 3);

        let added = cache
            .resolve("svc", &functions(), &mut template, &directory)
            .unwrap();
        assert_eq!(added, 0);

        let calls = directory.calls.lock().unwrap();
        assert_eq!(calls.get("shared"), Some(&1));
        assert_eq!(calls.get("other"), Some(&1));
        assert_eq!(template.resources_of_type(types::ROLE).count(), 1);
    }

    #[test]
    fn test_inline_roles_are_forward_references() {
        let directory = CountingDirectory::default();
        let mut template = Template::new();
        let mut cache = RoleCache::new();
        let funcs = functions();
        cache.resolve("svc", &funcs, &mut template, &directory).unwrap();

        let role = funcs[2].role.as_ref().unwrap();
        let handle = cache.map().handle_for("svc", "c", role).unwrap();
        match handle {
            RoleHandle::Reference { logical_name } => {
                assert!(template.resource(logical_name).is_some());
                assert_eq!(handle.to_value()["Fn::GetAtt"][1], "Arn");
            }
            RoleHandle::Arn(arn) => panic!("expected reference, got {arn}"),
        }
        assert_eq!(
            cache.map().get("shared"),
            Some(&RoleHandle::Arn("arn:aws:iam::123:role/shared".into()))
        );
    }

    #[test]
    fn test_missing_role_aborts_resolution() {
        let directory = CountingDirectory {
            missing: vec!["other".into()],
            ..Default::default()
        };
        let mut template = Template::new();
        let err = RoleCache::new()
            .resolve("svc", &functions(), &mut template, &directory)
            .unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));
        assert!(err.to_string().contains("other"));
    }
}
