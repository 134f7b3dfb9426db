//! Gateway export seam
//!
//! How a REST or WebSocket gateway is modeled is up to the implementation.
//! The workflow only hands it an empty fragment, merges the fragment into the
//! service template and passes the fragment's outputs on to the site export.

use crate::function::FunctionSpec;
use crate::hooks::HookParams;
use crate::roles::RoleNameMap;
use crate::template::Template;
use anyhow::Result;

/// Everything a gateway export may reference
pub struct GatewayRequest<'a> {
    pub params: &'a HookParams,
    pub functions: &'a [FunctionSpec],
    pub roles: &'a RoleNameMap,
}

/// Renders a gateway into its own template fragment
pub trait GatewayExport: Send + Sync {
    fn export(&self, request: &GatewayRequest<'_>, fragment: &mut Template) -> Result<()>;
}
