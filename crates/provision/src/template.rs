//! The infrastructure template document
//!
//! The engine treats the template as an opaque document: resources are added
//! by logical id, fragments are merged in, and the whole thing serializes to
//! JSON for the orchestration service. Property bodies stay plain
//! `serde_json::Value`s.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Template format version emitted in every document
pub const FORMAT_VERSION: &str = "2010-09-09";

/// Resource type names the engine itself inspects
pub mod types {
    /// Deployable function resource
    pub const FUNCTION: &str = "AWS::Lambda::Function";
    /// Execution role resource
    pub const ROLE: &str = "AWS::IAM::Role";
    /// Content-distribution resource (slow to converge)
    pub const DISTRIBUTION: &str = "AWS::CloudFront::Distribution";
    /// Static website bucket
    pub const BUCKET: &str = "AWS::S3::Bucket";
    /// Custom resource backed by a function
    pub const CUSTOM: &str = "Custom::StackupFunctionResource";
}

/// A `{"Ref": name}` expression
pub fn reference(name: &str) -> Value {
    json!({ "Ref": name })
}

/// A `{"Fn::GetAtt": [logical, attribute]}` expression
pub fn get_att(logical_name: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_name, attribute] })
}

/// One resource entry of a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Resource {
    /// Create a resource with the given type and properties
    pub fn new(resource_type: impl Into<String>, properties: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties,
            depends_on: Vec::new(),
        }
    }

    /// Check the resource type
    pub fn is_type(&self, resource_type: &str) -> bool {
        self.resource_type == resource_type
    }

    /// Add a `DependsOn` edge unless already present
    pub fn add_dependency(&mut self, logical_name: &str) {
        if !self.depends_on.iter().any(|d| d == logical_name) {
            self.depends_on.push(logical_name.to_string());
        }
    }

    /// The `Environment.Variables` object, if present and well-formed
    pub fn environment(&self) -> Option<&serde_json::Map<String, Value>> {
        self.properties
            .get("Environment")?
            .get("Variables")?
            .as_object()
    }

    /// The `Environment.Variables` object, created when missing
    pub fn environment_mut(&mut self) -> &mut serde_json::Map<String, Value> {
        let properties = ensure_object(&mut self.properties);
        let env = ensure_object(properties.entry("Environment").or_insert(Value::Null));
        ensure_object(env.entry("Variables").or_insert(Value::Null))
    }
}

/// Replace non-object values with an empty object and borrow the map
fn ensure_object(value: &mut Value) -> &mut serde_json::Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(serde_json::Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// A declarative infrastructure template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub resources: BTreeMap<String, Resource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Value>,
}

impl Default for Template {
    fn default() -> Self {
        Self::new()
    }
}

impl Template {
    /// Create an empty template
    pub fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description: None,
            parameters: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Add or replace a resource, returning the previous entry
    pub fn add_resource(&mut self, logical_name: impl Into<String>, resource: Resource) -> Option<Resource> {
        self.resources.insert(logical_name.into(), resource)
    }

    /// Look up a resource by logical id
    pub fn resource(&self, logical_name: &str) -> Option<&Resource> {
        self.resources.get(logical_name)
    }

    /// Look up a resource by logical id for mutation
    pub fn resource_mut(&mut self, logical_name: &str) -> Option<&mut Resource> {
        self.resources.get_mut(logical_name)
    }

    /// Iterate over resources of one type
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.is_type(resource_type))
    }

    /// Check if any resource has the given type
    pub fn contains_type(&self, resource_type: &str) -> bool {
        self.resources.values().any(|r| r.is_type(resource_type))
    }

    /// Merge another template into this one, refusing to overwrite
    ///
    /// Every overlapping parameter, resource and output id is reported and
    /// nothing is merged when there is at least one conflict.
    pub fn safe_merge(&mut self, other: Template) -> Result<()> {
        let mut conflicts = Vec::new();
        conflicts.extend(
            other
                .parameters
                .keys()
                .filter(|k| self.parameters.contains_key(*k))
                .map(|k| format!("Parameters.{k}")),
        );
        conflicts.extend(
            other
                .resources
                .keys()
                .filter(|k| self.resources.contains_key(*k))
                .map(|k| format!("Resources.{k}")),
        );
        conflicts.extend(
            other
                .outputs
                .keys()
                .filter(|k| self.outputs.contains_key(*k))
                .map(|k| format!("Outputs.{k}")),
        );
        if !conflicts.is_empty() {
            return Err(Error::MergeConflict(conflicts));
        }

        self.parameters.extend(other.parameters);
        self.resources.extend(other.resources);
        self.outputs.extend(other.outputs);
        Ok(())
    }

    /// Serialize to compact JSON
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Serialize to indented JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
