//! Identity service: who the driver is and whether it is alive.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{PluginCapability, PluginInfo};

#[async_trait]
pub trait CsiIdentity: Send + Sync {
    /// Driver name and version.
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError>;

    async fn probe(&self) -> Result<bool, CsiError>;

    /// Services beyond Identity and Node that this driver serves.
    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError>;
}
