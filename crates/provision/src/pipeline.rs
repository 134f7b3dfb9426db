//! Change-pipeline environments
//!
//! When a pipeline trigger is configured the workflow does not apply the
//! template itself. It packages the template together with one parameter
//! file per environment; the pipeline picks the archive up and deploys each
//! environment with its own parameter values.

use crate::archive::ArchiveWriter;
use crate::error::Result;
use crate::template::{Template, reference, types};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Name of the template entry inside a pipeline package
pub const TEMPLATE_ENTRY: &str = "cloudformation.json";

/// Environment name -> variable name -> value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineEnvironments {
    environments: BTreeMap<String, BTreeMap<String, String>>,
}

impl PipelineEnvironments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one environment's variables
    pub fn insert(&mut self, environment: impl Into<String>, variables: BTreeMap<String, String>) {
        self.environments.insert(environment.into(), variables);
    }

    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.environments.len()
    }

    /// Union of every environment's variable names
    pub fn keys(&self) -> BTreeSet<&str> {
        self.environments
            .values()
            .flat_map(|vars| vars.keys().map(String::as_str))
            .collect()
    }

    /// Describe every environment whose variable names differ from the rest
    ///
    /// Each message names the environment and the variables it lacks.
    pub fn inconsistencies(&self) -> Vec<String> {
        let all = self.keys();
        self.environments
            .iter()
            .filter_map(|(name, vars)| {
                let missing: Vec<&str> = all
                    .iter()
                    .copied()
                    .filter(|key| !vars.contains_key(*key))
                    .collect();
                (!missing.is_empty()).then(|| {
                    format!(
                        "environment {name} is missing variable(s): {}",
                        missing.join(", ")
                    )
                })
            })
            .collect()
    }

    /// Declare one `String` template parameter per variable name
    pub fn inject_parameters(&self, template: &mut Template) {
        for key in self.keys() {
            template.parameters.insert(
                key.to_string(),
                json!({ "Type": "String", "Default": "" }),
            );
        }
    }

    /// Expose every parameter to every function through its environment
    pub fn annotate_functions(&self, template: &mut Template) {
        let keys = self.keys();
        for resource in template.resources.values_mut() {
            if !resource.is_type(types::FUNCTION) {
                continue;
            }
            let env = resource.environment_mut();
            for key in &keys {
                env.insert((*key).to_string(), reference(key));
            }
        }
    }

    /// Write the template and per-environment parameter files to `path`
    pub fn package(&self, template_body: &[u8], path: &Path) -> Result<PathBuf> {
        let mut archive = ArchiveWriter::create(path)?;
        archive.add_bytes(TEMPLATE_ENTRY, template_body)?;
        for (name, vars) in &self.environments {
            let body = serde_json::to_vec_pretty(&json!({ "Parameters": vars }))?;
            archive.add_bytes(&format!("{name}.json"), &body)?;
        }
        let path = archive.finish()?;
        log::info!(
            "Created pipeline package {} ({} environment(s))",
            path.display(),
            self.environments.len()
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Resource;
    use std::fs::File;
    use std::io::Read;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn environments() -> PipelineEnvironments {
        let mut envs = PipelineEnvironments::new();
        envs.insert("test", vars(&[("TABLE", "t"), ("QUEUE", "q")]));
        envs.insert("prod", vars(&[("TABLE", "p")]));
        envs
    }

    #[test]
    fn test_inconsistent_key_sets_are_reported() {
        let messages = environments().inconsistencies();
        assert_eq!(messages, vec!["environment prod is missing variable(s): QUEUE"]);

        let mut consistent = PipelineEnvironments::new();
        consistent.insert("a", vars(&[("K", "1")]));
        consistent.insert("b", vars(&[("K", "2")]));
        assert!(consistent.inconsistencies().is_empty());
    }

    #[test]
    fn test_parameters_and_function_environment() {
        let mut template = Template::new();
        template.add_resource("Fn", Resource::new(types::FUNCTION, json!({})));
        template.add_resource("Queue", Resource::new("AWS::SQS::Queue", json!({})));

        let envs = environments();
        envs.inject_parameters(&mut template);
        envs.annotate_functions(&mut template);

        assert_eq!(template.parameters["QUEUE"]["Type"], "String");
        let env = template.resource("Fn").unwrap().environment().unwrap();
        assert_eq!(env["TABLE"], reference("TABLE"));
        assert!(template.resource("Queue").unwrap().environment().is_none());
    }

    #[test]
    fn test_package_contains_template_and_parameter_files() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = environments()
            .package(b"{}", &temp.path().join("pipeline.zip"))
            .unwrap();

        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort_unstable();
        assert_eq!(names, vec![TEMPLATE_ENTRY, "prod.json", "test.json"]);

        let mut body = String::new();
        archive
            .by_name("test.json")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["Parameters"]["QUEUE"], "q");
    }
}
