//! Agent-install request construction and error normalization
//!
//! The first install and every retry go through [`run_install`] with the same
//! [`AgentInstallParams`], so both paths share one request shape and one error
//! kind.

use tracing::{info, warn};

use crate::errors::{AgentInstallError, ServiceError};
use crate::import::model::{
    AgentInstallResult, CredentialDirectory, DiscoveredDevice, ImportRequest, ImportResult,
};
use crate::import::services::{AgentInstallParams, AgentInstallService};

const GENERIC_INSTALL_FAILURE: &str = "Agent installation failed";

pub fn build_params(
    device: &DiscoveredDevice,
    request: &ImportRequest,
    directory: &CredentialDirectory,
    imported: Option<&ImportResult>,
) -> AgentInstallParams {
    let hostname = imported
        .and_then(|result| result.mesh_hostname.as_deref())
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| device.install_hostname())
        .to_string();

    AgentInstallParams {
        hostname,
        mesh_device_id: device.mesh_device_id.clone(),
        server_id: imported.map(|result| result.server_id.clone()),
        ssh_key_id: directory.resolve(request.ssh_key_id.as_deref()),
        display_name: request.trimmed_display_name().to_string(),
        machine_type: request.machine_type,
        tdp_watts: request.tdp_watts,
    }
}

pub async fn run_install(
    service: &dyn AgentInstallService,
    params: &AgentInstallParams,
) -> Result<AgentInstallResult, AgentInstallError> {
    let outcome = normalize(service.install_agent(params).await);

    match &outcome {
        Ok(_) => info!(hostname = %params.hostname, "agent installed"),
        Err(err) => warn!(hostname = %params.hostname, error = %err.message, "agent install failed"),
    }

    outcome
}

/// Collapses thrown errors and `success: false` replies into one error kind.
pub fn normalize(
    reply: Result<AgentInstallResult, ServiceError>,
) -> Result<AgentInstallResult, AgentInstallError> {
    match reply {
        Ok(result) if result.success => Ok(result),
        Ok(result) => Err(AgentInstallError {
            message: result
                .error
                .map(|message| message.trim().to_string())
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| GENERIC_INSTALL_FAILURE.to_string()),
        }),
        Err(err) => {
            let message = err.user_message();
            Err(AgentInstallError {
                message: if message.trim().is_empty() {
                    GENERIC_INSTALL_FAILURE.to_string()
                } else {
                    message
                },
            })
        }
    }
}
