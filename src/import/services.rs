//! Contracts the import workflow consumes from the fleet backend

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::import::model::{AgentInstallResult, ImportRequest, ImportResult, MachineType};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateCheckResponse {
    pub imported: bool,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Parameters of one agent-install call. Built once per session and reused
/// verbatim for every retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInstallParams {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_id: Option<String>,
    pub display_name: String,
    pub machine_type: MachineType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tdp_watts: Option<i64>,
}

#[async_trait]
pub trait DuplicateCheckService: Send + Sync {
    async fn check_duplicate(
        &self,
        mesh_device_id: &str,
    ) -> Result<DuplicateCheckResponse, ServiceError>;
}

/// Registers a mesh device in the fleet. Must be idempotent per device
/// identity so a failed attempt can be resubmitted.
#[async_trait]
pub trait ImportService: Send + Sync {
    async fn import_device(
        &self,
        mesh_device_id: &str,
        request: &ImportRequest,
    ) -> Result<ImportResult, ServiceError>;
}

#[async_trait]
pub trait AgentInstallService: Send + Sync {
    async fn install_agent(
        &self,
        params: &AgentInstallParams,
    ) -> Result<AgentInstallResult, ServiceError>;
}

#[derive(Clone)]
pub struct Services {
    pub duplicates: Arc<dyn DuplicateCheckService>,
    pub imports: Arc<dyn ImportService>,
    pub installs: Arc<dyn AgentInstallService>,
}

impl Services {
    pub fn new(
        duplicates: Arc<dyn DuplicateCheckService>,
        imports: Arc<dyn ImportService>,
        installs: Arc<dyn AgentInstallService>,
    ) -> Self {
        Self {
            duplicates,
            imports,
            installs,
        }
    }

    /// Uses one backend for all three contracts.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: DuplicateCheckService + ImportService + AgentInstallService + 'static,
    {
        Self {
            duplicates: backend.clone(),
            imports: backend.clone(),
            installs: backend,
        }
    }
}
