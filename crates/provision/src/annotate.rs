//! Cross-cutting template annotations and postcondition checks

use crate::error::{Error, Result};
use crate::template::{Template, types};
use serde_json::{Value, json};

/// Environment variable carrying a function's discovery metadata
pub const DISCOVERY_ENV: &str = "STACKUP_DISCOVERY_INFO";
/// Environment variable carrying the function log level
pub const LOG_LEVEL_ENV: &str = "STACKUP_LOG_LEVEL";
/// Tag holding the build id on functions and stacks
pub const BUILD_ID_TAG: &str = "io:stackup:buildId";
/// Tag holding the build tags on stacks
pub const BUILD_TAGS_TAG: &str = "io:stackup:buildTags";

/// Discovery metadata, resolved by the orchestration service at deploy time
fn discovery_info(logical_name: &str) -> Value {
    json!({
        "Fn::Sub": format!(
            r#"{{"ResourceID":"{logical_name}","StackName":"${{AWS::StackName}}","Region":"${{AWS::Region}}"}}"#
        )
    })
}

/// Inject discovery metadata, log level and build id into every function
///
/// Custom resources get the discovery metadata as a property so their
/// handlers can locate sibling resources too.
pub fn annotate_functions(template: &mut Template, build_id: &str, log_level: &str) -> usize {
    let mut annotated = 0;
    for (logical_name, resource) in &mut template.resources {
        if resource.is_type(types::CUSTOM) {
            if let Some(props) = resource.properties.as_object_mut() {
                props.insert("DiscoveryInfo".into(), discovery_info(logical_name));
            }
            continue;
        }
        if !resource.is_type(types::FUNCTION) {
            continue;
        }

        let env = resource.environment_mut();
        env.insert(DISCOVERY_ENV.into(), discovery_info(logical_name));
        env.insert(LOG_LEVEL_ENV.into(), json!(log_level));

        if let Some(props) = resource.properties.as_object_mut() {
            let tags = props.entry("Tags").or_insert_with(|| json!([]));
            if let Some(tags) = tags.as_array_mut() {
                tags.retain(|t| t["Key"] != BUILD_ID_TAG);
                tags.push(json!({ "Key": BUILD_ID_TAG, "Value": build_id }));
            }
        }
        annotated += 1;
    }
    log::debug!("Annotated {annotated} function(s) with discovery info");
    annotated
}

/// Require discovery and log-level variables on every function resource
pub fn validate_postconditions(template: &Template) -> Result<()> {
    let mut problems = Vec::new();
    for (logical_name, resource) in template.resources_of_type(types::FUNCTION) {
        let env = resource.environment();
        for required in [DISCOVERY_ENV, LOG_LEVEL_ENV] {
            if !env.is_some_and(|vars| vars.contains_key(required)) {
                problems.push(format!(
                    "function {logical_name} is missing environment variable {required}"
                ));
            }
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Postconditions(problems))
    }
}

/// Resolve references that only make sense on the finished template
///
/// Functions whose role points at a role resource of the template get an
/// explicit `DependsOn` edge to it. Role references to logical ids the
/// template does not contain are reported together.
pub fn annotate_materialized(template: &mut Template) -> Result<()> {
    let mut edges = Vec::new();
    let mut dangling = Vec::new();

    for (logical_name, resource) in template.resources_of_type(types::FUNCTION) {
        let Some(role) = resource.properties.get("Role") else {
            continue;
        };
        let Some(target) = role
            .get("Fn::GetAtt")
            .and_then(|att| att.get(0))
            .and_then(Value::as_str)
        else {
            continue;
        };
        match template.resource(target) {
            Some(r) if r.is_type(types::ROLE) => {
                edges.push((logical_name.clone(), target.to_string()));
            }
            _ => dangling.push(format!("{logical_name} -> {target}")),
        }
    }

    if !dangling.is_empty() {
        return Err(Error::DanglingReferences(dangling));
    }
    for (function, role) in edges {
        if let Some(resource) = template.resource_mut(&function) {
            resource.add_dependency(&role);
        }
    }
    Ok(())
}
