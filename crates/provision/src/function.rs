//! Deployable function descriptors and the per-function export seam

use crate::roles::{RoleHandle, RoleNameMap};
use crate::template::{Resource, Template, get_att, types};
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Default memory size in MB
pub const DEFAULT_MEMORY_SIZE: u32 = 128;
/// Default timeout in seconds
pub const DEFAULT_TIMEOUT: u32 = 10;
/// Runtime identifier for custom-runtime functions
pub const RUNTIME: &str = "provided.al2023";

/// Reduce a name to the characters allowed in a logical resource id
pub fn resource_name(name: &str) -> String {
    name.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Short, stable hash suffix used to keep logical ids unique
fn short_hash(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex()[..16].to_string()
}

/// An inline execution role, created as part of the stack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleDefinition {
    /// Managed policy ARNs attached to the role
    #[serde(default)]
    pub managed_policies: Vec<String>,
    /// Additional policy statements
    #[serde(default)]
    pub statements: Vec<Value>,
}

impl RoleDefinition {
    /// Logical id of this role, derived from the service and owning function
    pub fn logical_name(&self, service_name: &str, function_name: &str) -> String {
        format!(
            "{}Role{}",
            resource_name(function_name),
            short_hash(&format!("{service_name}-{function_name}"))
        )
    }

    /// Render the role resource
    pub fn to_resource(&self) -> Resource {
        let mut statements = vec![json!({
            "Effect": "Allow",
            "Action": ["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
            "Resource": "arn:aws:logs:*:*:*",
        })];
        statements.extend(self.statements.iter().cloned());

        Resource::new(
            types::ROLE,
            json!({
                "AssumeRolePolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Principal": { "Service": ["lambda.amazonaws.com"] },
                        "Action": ["sts:AssumeRole"],
                    }],
                },
                "ManagedPolicyArns": self.managed_policies,
                "Policies": [{
                    "PolicyName": "FunctionPolicy",
                    "PolicyDocument": {
                        "Version": "2012-10-17",
                        "Statement": statements,
                    },
                }],
            }),
        )
    }
}

/// How a function gets its execution role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionRole {
    /// A pre-existing role, looked up by name
    Name(String),
    /// A role created inside the stack
    Definition(RoleDefinition),
}

/// Runtime options of a function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionOptions {
    #[serde(default = "default_memory_size")]
    pub memory_size: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

fn default_memory_size() -> u32 {
    DEFAULT_MEMORY_SIZE
}

fn default_timeout() -> u32 {
    DEFAULT_TIMEOUT
}

impl Default for FunctionOptions {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            timeout: DEFAULT_TIMEOUT,
            description: None,
            environment: BTreeMap::new(),
        }
    }
}

/// A function-backed custom resource owned by a deployable function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomResourceSpec {
    pub name: String,
    #[serde(default)]
    pub role: Option<FunctionRole>,
    #[serde(default)]
    pub options: FunctionOptions,
}

impl CustomResourceSpec {
    /// Logical id of the function that backs this custom resource
    pub fn logical_name(&self) -> String {
        format!(
            "{}CustomResource{}",
            resource_name(&self.name),
            short_hash(&self.name)
        )
    }
}

/// One deployable function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default)]
    pub role: Option<FunctionRole>,
    #[serde(default)]
    pub options: FunctionOptions,
    #[serde(default)]
    pub custom_resources: Vec<CustomResourceSpec>,
}

impl FunctionSpec {
    /// Create a function with default options and no role
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: None,
            options: FunctionOptions::default(),
            custom_resources: Vec::new(),
        }
    }

    /// Set the execution role
    pub fn with_role(mut self, role: FunctionRole) -> Self {
        self.role = Some(role);
        self
    }

    /// Add a custom resource
    pub fn with_custom_resource(mut self, resource: CustomResourceSpec) -> Self {
        self.custom_resources.push(resource);
        self
    }

    /// Logical id of the function resource
    pub fn logical_name(&self) -> String {
        format!(
            "{}Function{}",
            resource_name(&self.name),
            short_hash(&self.name)
        )
    }
}

/// Everything a function export needs besides the function itself
pub struct ExportRequest<'a> {
    pub service_name: &'a str,
    pub bucket: &'a str,
    pub code_key: &'a str,
    pub code_version: Option<&'a str>,
    pub build_id: &'a str,
    pub binary_name: &'a str,
    pub roles: &'a RoleNameMap,
    pub context: &'a Map<String, Value>,
}

/// Renders a deployable function into the template
pub trait FunctionExport: Send + Sync {
    fn export(
        &self,
        function: &FunctionSpec,
        request: &ExportRequest<'_>,
        template: &mut Template,
    ) -> Result<()>;
}

/// Default export: one function resource per function and custom resource
#[derive(Debug, Default, Clone, Copy)]
pub struct LambdaExport;

impl LambdaExport {
    fn function_resource(
        request: &ExportRequest<'_>,
        function_name: &str,
        options: &FunctionOptions,
        role: &RoleHandle,
    ) -> Resource {
        let mut code = json!({
            "S3Bucket": request.bucket,
            "S3Key": request.code_key,
        });
        if let Some(version) = request.code_version {
            code["S3ObjectVersion"] = json!(version);
        }

        let mut properties = json!({
            "Code": code,
            "FunctionName": format!("{}_{}", request.service_name, function_name),
            "Handler": request.binary_name,
            "Runtime": RUNTIME,
            "MemorySize": options.memory_size,
            "Timeout": options.timeout,
            "Role": role.to_value(),
            "Environment": { "Variables": options.environment },
        });
        if let Some(description) = &options.description {
            properties["Description"] = json!(description);
        }
        Resource::new(types::FUNCTION, properties)
    }
}

impl FunctionExport for LambdaExport {
    fn export(
        &self,
        function: &FunctionSpec,
        request: &ExportRequest<'_>,
        template: &mut Template,
    ) -> Result<()> {
        let Some(role) = &function.role else {
            bail!("function {} has no execution role", function.name);
        };
        let Some(handle) = request
            .roles
            .handle_for(request.service_name, &function.name, role)
        else {
            bail!("role for function {} was not resolved", function.name);
        };

        let logical_name = function.logical_name();
        template.add_resource(
            logical_name.clone(),
            Self::function_resource(request, &function.name, &function.options, handle),
        );

        for custom in &function.custom_resources {
            let custom_handle = match &custom.role {
                Some(custom_role) => request
                    .roles
                    .handle_for(request.service_name, &custom.name, custom_role),
                None => Some(handle),
            };
            let Some(custom_handle) = custom_handle else {
                bail!("role for custom resource {} was not resolved", custom.name);
            };

            let custom_logical = custom.logical_name();
            template.add_resource(
                custom_logical.clone(),
                Self::function_resource(request, &custom.name, &custom.options, custom_handle),
            );
            let mut invoker = Resource::new(
                types::CUSTOM,
                json!({ "ServiceToken": get_att(&custom_logical, "Arn") }),
            );
            invoker.add_dependency(&logical_name);
            template.add_resource(format!("{custom_logical}Invoker"), invoker);
        }

        log::debug!("Exported function {} as {logical_name}", function.name);
        Ok(())
    }
}
