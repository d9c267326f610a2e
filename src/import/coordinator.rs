//! Sequences the Import call and the dependent AgentInstall call
//!
//! Holds everything that must survive a failed install: the import artifact,
//! the install parameters and the retry count. An import result, once stored,
//! is returned as-is for the rest of the session.

use tracing::{debug, info, warn};

use crate::errors::{AgentInstallError, ImportError};
use crate::import::install::{build_params, run_install};
use crate::import::model::{
    AgentInstallResult, CredentialDirectory, DiscoveredDevice, ImportRequest, ImportResult,
};
use crate::import::services::{AgentInstallParams, Services};

pub const IMPORT_OUTCOME_UNKNOWN: &str = "import outcome unknown";
pub const INSTALL_OUTCOME_UNKNOWN: &str = "agent install outcome unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Import,
    AgentInstall,
}

pub struct ImportCoordinator {
    services: Services,
    imported: Option<ImportResult>,
    install_params: Option<AgentInstallParams>,
    last_install: Option<AgentInstallResult>,
    retry_count: u32,
    outstanding: Option<Call>,
}

impl ImportCoordinator {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            imported: None,
            install_params: None,
            last_install: None,
            retry_count: 0,
            outstanding: None,
        }
    }

    pub fn imported(&self) -> Option<&ImportResult> {
        self.imported.as_ref()
    }

    pub fn install_params(&self) -> Option<&AgentInstallParams> {
        self.install_params.as_ref()
    }

    pub fn last_install(&self) -> Option<&AgentInstallResult> {
        self.last_install.as_ref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Call whose outcome has not been observed yet. Only set when the future
    /// driving it was dropped before it settled.
    pub fn outstanding(&self) -> Option<Call> {
        self.outstanding
    }

    /// Registers a mesh device. Never calls the backend twice once an import
    /// has succeeded.
    pub async fn import(
        &mut self,
        device: &DiscoveredDevice,
        request: &ImportRequest,
    ) -> Result<ImportResult, ImportError> {
        if let Some(existing) = &self.imported {
            debug!(server_id = %existing.server_id, "reusing completed import");
            return Ok(existing.clone());
        }
        self.ensure_idle()
            .map_err(|call| ImportError::new(format!("{call:?} call still outstanding")))?;

        let Some(mesh_device_id) = device.mesh_device_id.as_deref() else {
            return Err(ImportError::new("device has no mesh identifier"));
        };

        self.outstanding = Some(Call::Import);
        let reply = self
            .services
            .imports
            .import_device(mesh_device_id, request)
            .await;
        self.outstanding = None;

        match reply {
            Ok(result) => {
                info!(
                    mesh_device_id,
                    server_id = %result.server_id,
                    "device imported"
                );
                self.imported = Some(result.clone());
                Ok(result)
            }
            Err(err) => {
                warn!(mesh_device_id, error = %err, "device import failed");
                Err(ImportError::new(err.user_message()))
            }
        }
    }

    /// First agent install after a successful import. The parameters built
    /// here are pinned for every later retry.
    pub async fn install(
        &mut self,
        device: &DiscoveredDevice,
        request: &ImportRequest,
        directory: &CredentialDirectory,
    ) -> Result<AgentInstallResult, AgentInstallError> {
        let params = match &self.install_params {
            Some(params) => params.clone(),
            None => {
                let params = build_params(device, request, directory, self.imported.as_ref());
                self.install_params = Some(params.clone());
                params
            }
        };
        self.dispatch_install(&params).await
    }

    /// Network devices have no standalone import; the install call registers
    /// them. A failure here means nothing was imported, so the parameters are
    /// not pinned and the next submission may change them.
    pub async fn import_with_agent(
        &mut self,
        device: &DiscoveredDevice,
        request: &ImportRequest,
        directory: &CredentialDirectory,
    ) -> Result<AgentInstallResult, ImportError> {
        let params = build_params(device, request, directory, None);
        let result = self
            .dispatch_install(&params)
            .await
            .map_err(|err| ImportError::new(err.message))?;
        self.install_params = Some(params);
        Ok(result)
    }

    /// Re-issues the pinned install call. No import is ever repeated.
    pub async fn retry_install(&mut self) -> Result<AgentInstallResult, AgentInstallError> {
        let Some(params) = self.install_params.clone() else {
            return Err(AgentInstallError {
                message: "no agent installation to retry".to_string(),
            });
        };

        self.retry_count += 1;
        info!(
            hostname = %params.hostname,
            retry_count = self.retry_count,
            "retrying agent install"
        );
        self.dispatch_install(&params).await
    }

    async fn dispatch_install(
        &mut self,
        params: &AgentInstallParams,
    ) -> Result<AgentInstallResult, AgentInstallError> {
        self.ensure_idle().map_err(|call| AgentInstallError {
            message: format!("{call:?} call still outstanding"),
        })?;

        self.outstanding = Some(Call::AgentInstall);
        let outcome = run_install(self.services.installs.as_ref(), params).await;
        self.outstanding = None;

        self.last_install = Some(match &outcome {
            Ok(result) => result.clone(),
            Err(err) => AgentInstallResult {
                success: false,
                error: Some(err.message.clone()),
                server_id: None,
            },
        });
        outcome
    }

    /// Forgets a call whose driving future was dropped. The backend may or
    /// may not have acted on it; an abandoned install is recorded as failed
    /// so the pinned parameters can be retried.
    pub fn abandon(&mut self) -> Option<Call> {
        let call = self.outstanding.take()?;
        warn!(call = ?call, "backend call abandoned before it settled");
        if call == Call::AgentInstall {
            self.last_install = Some(AgentInstallResult {
                success: false,
                error: Some(INSTALL_OUTCOME_UNKNOWN.to_string()),
                server_id: None,
            });
        }
        Some(call)
    }

    fn ensure_idle(&self) -> Result<(), Call> {
        match self.outstanding {
            Some(call) => Err(call),
            None => Ok(()),
        }
    }
}
