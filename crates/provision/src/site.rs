//! Static site export
//!
//! The site's resources directory is zipped and uploaded next to the code
//! archive. Once every other resource is in the template, the site export
//! renders the hosting bucket and the custom resource that unpacks the
//! archive into it.

use crate::artifact::UploadLocation;
use crate::function::{FunctionOptions, RoleDefinition, resource_name};
use crate::hooks::HookParams;
use crate::template::{Resource, Template, get_att, reference, types};
use anyhow::Result;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Custom resource type that copies the site archive into the bucket
pub const SITE_CONTENT_TYPE: &str = "Custom::StackupSiteContent";

/// A static site to publish with the service
#[derive(Clone)]
pub struct SiteSpec {
    /// Directory whose contents are published
    pub resources_dir: PathBuf,
    /// Optional prefix for every entry of the site archive
    pub prefix: String,
    pub export: Arc<dyn SiteExport>,
}

impl SiteSpec {
    /// Site published with [`SiteBucketExport`]
    pub fn new(resources_dir: impl Into<PathBuf>) -> Self {
        Self {
            resources_dir: resources_dir.into(),
            prefix: String::new(),
            export: Arc::new(SiteBucketExport::default()),
        }
    }
}

impl std::fmt::Debug for SiteSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteSpec")
            .field("resources_dir", &self.resources_dir)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Inputs of a site export
pub struct SiteRequest<'a> {
    pub params: &'a HookParams,
    pub code: &'a UploadLocation,
    pub site: &'a UploadLocation,
    pub binary_name: &'a str,
    /// Outputs of the gateway fragment, empty without a gateway
    pub gateway_outputs: &'a BTreeMap<String, Value>,
}

/// Renders the site into the service template
pub trait SiteExport: Send + Sync {
    fn export(&self, request: &SiteRequest<'_>, template: &mut Template) -> Result<()>;
}

/// Website bucket plus a function-backed content deployment
#[derive(Debug, Clone, Default)]
pub struct SiteBucketExport {
    /// Index document, `index.html` when unset
    pub index_document: Option<String>,
    /// Error document, `error.html` when unset
    pub error_document: Option<String>,
}

impl SiteBucketExport {
    const BUCKET: &'static str = "SiteBucket";

    fn deployer_name(service_name: &str) -> String {
        format!("{}SiteDeployer", resource_name(service_name))
    }
}

impl SiteExport for SiteBucketExport {
    fn export(&self, request: &SiteRequest<'_>, template: &mut Template) -> Result<()> {
        let params = request.params;
        let deployer = Self::deployer_name(&params.service_name);
        let role_name = format!("{deployer}Role");

        template.add_resource(
            Self::BUCKET,
            Resource::new(
                types::BUCKET,
                json!({
                    "WebsiteConfiguration": {
                        "IndexDocument": self.index_document.as_deref().unwrap_or("index.html"),
                        "ErrorDocument": self.error_document.as_deref().unwrap_or("error.html"),
                    },
                }),
            ),
        );

        let role = RoleDefinition {
            managed_policies: Vec::new(),
            statements: vec![
                json!({
                    "Effect": "Allow",
                    "Action": ["s3:GetObject", "s3:GetObjectVersion"],
                    "Resource": format!("arn:aws:s3:::{}/{}", params.bucket, request.site.key),
                }),
                json!({
                    "Effect": "Allow",
                    "Action": ["s3:PutObject", "s3:DeleteObject", "s3:ListBucket"],
                    "Resource": [
                        get_att(Self::BUCKET, "Arn"),
                        { "Fn::Join": ["", [get_att(Self::BUCKET, "Arn"), "/*"]] },
                    ],
                }),
            ],
        };
        template.add_resource(role_name.clone(), role.to_resource());

        let options = FunctionOptions::default();
        let mut code = json!({ "S3Bucket": params.bucket, "S3Key": request.code.key });
        if let Some(version) = request.code.version() {
            code["S3ObjectVersion"] = json!(version);
        }
        template.add_resource(
            deployer.clone(),
            Resource::new(
                types::FUNCTION,
                json!({
                    "Code": code,
                    "FunctionName": format!("{}_site_deployer", params.service_name),
                    "Handler": request.binary_name,
                    "Runtime": crate::function::RUNTIME,
                    "MemorySize": options.memory_size,
                    "Timeout": options.timeout,
                    "Role": get_att(&role_name, "Arn"),
                }),
            ),
        );

        let mut source = json!({ "Bucket": params.bucket, "Key": request.site.key });
        if let Some(version) = request.site.version() {
            source["Version"] = json!(version);
        }
        let mut content = Resource::new(
            SITE_CONTENT_TYPE,
            json!({
                "ServiceToken": get_att(&deployer, "Arn"),
                "TargetBucket": reference(Self::BUCKET),
                "Source": source,
                "GatewayOutputs": request.gateway_outputs,
            }),
        );
        content.add_dependency(Self::BUCKET);
        template.add_resource(format!("{}Content", Self::BUCKET), content);

        template.outputs.insert(
            "SiteURL".into(),
            json!({
                "Description": "Static site URL",
                "Value": get_att(Self::BUCKET, "WebsiteURL"),
            }),
        );
        log::debug!("Exported site to {}", Self::BUCKET);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Session;

    #[test]
    fn test_site_export_references_archive_and_gateway() {
        let params = HookParams {
            service_name: "svc".into(),
            bucket: "artifacts".into(),
            build_id: "b1".into(),
            session: Session::new("us-east-1"),
            dry_run: false,
        };
        let code = UploadLocation::parse("https://h/svc/code.zip?versionId=c1").unwrap();
        let site = UploadLocation::parse("https://h/svc/site.zip?versionId=s1").unwrap();
        let mut outputs = BTreeMap::new();
        outputs.insert("ApiURL".to_string(), json!({"Value": "https://api"}));

        let mut template = Template::new();
        SiteBucketExport::default()
            .export(
                &SiteRequest {
                    params: &params,
                    code: &code,
                    site: &site,
                    binary_name: "bootstrap",
                    gateway_outputs: &outputs,
                },
                &mut template,
            )
            .unwrap();

        let content = template.resource("SiteBucketContent").unwrap();
        assert!(content.is_type(SITE_CONTENT_TYPE));
        assert_eq!(content.properties["Source"]["Key"], "svc/site.zip");
        assert_eq!(content.properties["Source"]["Version"], "s1");
        assert_eq!(content.properties["GatewayOutputs"]["ApiURL"]["Value"], "https://api");
        assert!(template.outputs.contains_key("SiteURL"));
        assert_eq!(template.resources_of_type(types::FUNCTION).count(), 1);
    }
}
