//! Device import session
//!
//! One [`ImportSession`] per import attempt. The session owns every piece of
//! mutable state for that attempt and advances through [`WorkflowState`] by
//! awaiting the backend calls one at a time:
//!
//! ```text
//! Idle -> CheckingDuplicate -> Duplicate
//!                           \-> Form -> Validating -> Form (field errors)
//!                                                  \-> Importing -> ImportFailed
//!                                                                \-> Imported -> Success
//!                                                                             \-> InstallingAgent -> Success
//!                                                                                                \-> InstallFailed
//! ```
//!
//! Network devices skip the duplicate check and their `Importing` step is the
//! agent install itself.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::{DuplicateCheckError, SessionError};
use crate::import::coordinator::{
    ImportCoordinator, IMPORT_OUTCOME_UNKNOWN, INSTALL_OUTCOME_UNKNOWN,
};
use crate::import::duplicate::{self, DuplicateOutcome};
use crate::import::model::{
    AgentInstallResult, CredentialDirectory, DeviceSource, DiscoveredDevice, ImportRequest,
    ImportResult,
};
use crate::import::services::{DuplicateCheckService, Services};
use crate::import::validation::{self, FieldErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    CheckingDuplicate,
    Duplicate,
    Form,
    Validating,
    Importing,
    ImportFailed,
    Imported,
    InstallingAgent,
    InstallFailed,
    Success,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CheckingDuplicate => "checking_duplicate",
            Self::Duplicate => "duplicate",
            Self::Form => "form",
            Self::Validating => "validating",
            Self::Importing => "importing",
            Self::ImportFailed => "import_failed",
            Self::Imported => "imported",
            Self::InstallingAgent => "installing_agent",
            Self::InstallFailed => "install_failed",
            Self::Success => "success",
        }
    }

    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            Self::CheckingDuplicate | Self::Validating | Self::Importing | Self::InstallingAgent
        )
    }

    /// Phases with a side-effecting backend call that must settle before the
    /// session can be closed.
    pub fn blocks_close(self) -> bool {
        matches!(self, Self::Importing | Self::InstallingAgent)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    CheckingDuplicate,
    Duplicate {
        machine_id: String,
        display_name: Option<String>,
    },
    Form {
        field_errors: FieldErrors,
    },
    Validating,
    Importing,
    ImportFailed {
        error: String,
    },
    Imported {
        server_id: String,
    },
    InstallingAgent {
        server_id: String,
    },
    /// Device is in the fleet, the agent is not.
    InstallFailed {
        server_id: String,
        error: String,
        retry_count: u32,
    },
    Success {
        server_id: Option<String>,
        display_name: String,
        agent_installed: bool,
    },
}

impl WorkflowState {
    fn empty_form() -> Self {
        Self::Form {
            field_errors: FieldErrors::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Self::Idle => Phase::Idle,
            Self::CheckingDuplicate => Phase::CheckingDuplicate,
            Self::Duplicate { .. } => Phase::Duplicate,
            Self::Form { .. } => Phase::Form,
            Self::Validating => Phase::Validating,
            Self::Importing => Phase::Importing,
            Self::ImportFailed { .. } => Phase::ImportFailed,
            Self::Imported { .. } => Phase::Imported,
            Self::InstallingAgent { .. } => Phase::InstallingAgent,
            Self::InstallFailed { .. } => Phase::InstallFailed,
            Self::Success { .. } => Phase::Success,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::ImportFailed { error } | Self::InstallFailed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Self::Form { field_errors } => Some(field_errors),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub device_id: String,
    pub final_phase: Phase,
    pub server_id: Option<String>,
    pub agent_installed: bool,
    pub retry_count: u32,
}

pub struct ImportSession {
    device: DiscoveredDevice,
    directory: CredentialDirectory,
    duplicates: Arc<dyn DuplicateCheckService>,
    coordinator: ImportCoordinator,
    state: WorkflowState,
    request: Option<ImportRequest>,
    duplicate: Option<DuplicateOutcome>,
    opened_at: DateTime<Utc>,
    closed: bool,
    state_tx: watch::Sender<WorkflowState>,
}

impl ImportSession {
    pub fn new(device: DiscoveredDevice, directory: CredentialDirectory, services: Services) -> Self {
        let (state_tx, _) = watch::channel(WorkflowState::Idle);
        Self {
            device,
            directory,
            duplicates: services.duplicates.clone(),
            coordinator: ImportCoordinator::new(services),
            state: WorkflowState::Idle,
            request: None,
            duplicate: None,
            opened_at: Utc::now(),
            closed: false,
            state_tx,
        }
    }

    pub async fn open(
        device: DiscoveredDevice,
        directory: CredentialDirectory,
        services: Services,
    ) -> Self {
        let mut session = Self::new(device, directory, services);
        session.begin().await;
        session
    }

    /// Runs the entry step once: the duplicate check for mesh devices, or
    /// straight to the form for everything else.
    pub async fn begin(&mut self) -> &WorkflowState {
        self.recover_abandoned();
        if self.closed || self.state != WorkflowState::Idle || self.duplicate.is_some() {
            return &self.state;
        }

        if self.device.source == DeviceSource::Network {
            self.duplicate = Some(DuplicateOutcome::Skipped);
            self.transition(WorkflowState::empty_form());
            return &self.state;
        }

        let Some(mesh_device_id) = self.device.mesh_device_id.clone() else {
            self.duplicate = Some(DuplicateOutcome::CheckFailed(DuplicateCheckError(
                "device has no mesh identifier".to_string(),
            )));
            self.transition(WorkflowState::empty_form());
            return &self.state;
        };

        self.transition(WorkflowState::CheckingDuplicate);
        let outcome = duplicate::check_duplicate(self.duplicates.as_ref(), &mesh_device_id).await;
        let next = match &outcome {
            DuplicateOutcome::AlreadyImported {
                machine_id,
                display_name,
            } => WorkflowState::Duplicate {
                machine_id: machine_id.clone(),
                display_name: display_name.clone(),
            },
            _ => WorkflowState::empty_form(),
        };
        self.duplicate = Some(outcome);
        self.transition(next);
        &self.state
    }

    pub fn current_state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.state_tx.subscribe()
    }

    pub fn device(&self) -> &DiscoveredDevice {
        &self.device
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn last_request(&self) -> Option<&ImportRequest> {
        self.request.as_ref()
    }

    pub fn duplicate_outcome(&self) -> Option<&DuplicateOutcome> {
        self.duplicate.as_ref()
    }

    pub fn import_result(&self) -> Option<&ImportResult> {
        self.coordinator.imported()
    }

    pub fn last_install(&self) -> Option<&AgentInstallResult> {
        self.coordinator.last_install()
    }

    pub fn retry_count(&self) -> u32 {
        self.coordinator.retry_count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Validates and, if valid, runs Import then (optionally) AgentInstall.
    /// Ignored outside `Form` and `ImportFailed`.
    pub async fn submit(&mut self, request: ImportRequest) -> &WorkflowState {
        self.recover_abandoned();
        let phase = self.phase();
        if self.closed || !matches!(phase, Phase::Form | Phase::ImportFailed) {
            debug!(phase = %phase, closed = self.closed, "submit ignored");
            return &self.state;
        }

        self.request = Some(request.clone());
        self.transition(WorkflowState::Validating);

        let outcome = validation::validate(&request, &self.device, &self.directory);
        if let Err(err) = outcome.into_result() {
            info!(
                device_id = %self.device.id,
                fields = ?err.field_errors.keys().collect::<Vec<_>>(),
                "import request failed validation"
            );
            self.transition(WorkflowState::Form {
                field_errors: err.field_errors,
            });
            return &self.state;
        }

        self.transition(WorkflowState::Importing);
        let next = match self.device.source {
            DeviceSource::Mesh => self.import_mesh(&request).await,
            DeviceSource::Network => self.import_network(&request).await,
        };
        self.transition(next);
        &self.state
    }

    async fn import_mesh(&mut self, request: &ImportRequest) -> WorkflowState {
        let imported = match self.coordinator.import(&self.device, request).await {
            Ok(result) => result,
            Err(err) => return WorkflowState::ImportFailed { error: err.message },
        };

        self.transition(WorkflowState::Imported {
            server_id: imported.server_id.clone(),
        });

        if !request.install_agent {
            return WorkflowState::Success {
                server_id: Some(imported.server_id),
                display_name: imported.display_name,
                agent_installed: false,
            };
        }

        self.transition(WorkflowState::InstallingAgent {
            server_id: imported.server_id.clone(),
        });
        match self
            .coordinator
            .install(&self.device, request, &self.directory)
            .await
        {
            Ok(_) => WorkflowState::Success {
                server_id: Some(imported.server_id),
                display_name: imported.display_name,
                agent_installed: true,
            },
            Err(err) => WorkflowState::InstallFailed {
                server_id: imported.server_id,
                error: err.message,
                retry_count: self.coordinator.retry_count(),
            },
        }
    }

    async fn import_network(&mut self, request: &ImportRequest) -> WorkflowState {
        match self
            .coordinator
            .import_with_agent(&self.device, request, &self.directory)
            .await
        {
            Ok(result) => WorkflowState::Success {
                server_id: result.server_id,
                display_name: request.trimmed_display_name().to_string(),
                agent_installed: true,
            },
            Err(err) => WorkflowState::ImportFailed { error: err.message },
        }
    }

    /// Re-runs only the agent install. Ignored outside `InstallFailed`.
    pub async fn retry_install(&mut self) -> &WorkflowState {
        self.recover_abandoned();
        let server_id = match &self.state {
            WorkflowState::InstallFailed { server_id, .. } if !self.closed => server_id.clone(),
            _ => {
                debug!(phase = %self.phase(), closed = self.closed, "retry ignored");
                return &self.state;
            }
        };

        self.transition(WorkflowState::InstallingAgent {
            server_id: server_id.clone(),
        });

        let next = match self.coordinator.retry_install().await {
            Ok(_) => WorkflowState::Success {
                display_name: self
                    .coordinator
                    .imported()
                    .map(|result| result.display_name.clone())
                    .unwrap_or_default(),
                server_id: Some(server_id),
                agent_installed: true,
            },
            Err(err) => WorkflowState::InstallFailed {
                server_id,
                error: err.message,
                retry_count: self.coordinator.retry_count(),
            },
        };
        self.transition(next);
        &self.state
    }

    /// Back to an empty-error form. The last entered request is kept.
    /// Only applies before anything has been imported.
    pub fn reset(&mut self) -> &WorkflowState {
        self.recover_abandoned();
        if self.closed || !matches!(self.phase(), Phase::Form | Phase::ImportFailed) {
            debug!(phase = %self.phase(), "reset ignored");
            return &self.state;
        }

        self.transition(WorkflowState::empty_form());
        &self.state
    }

    pub fn close(&mut self) -> Result<SessionReport, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }

        self.recover_abandoned();
        let phase = self.phase();
        if phase.blocks_close() || self.coordinator.outstanding().is_some() {
            return Err(SessionError::InFlight { phase });
        }

        self.closed = true;
        let report = SessionReport {
            device_id: self.device.id.clone(),
            final_phase: phase,
            server_id: match &self.state {
                WorkflowState::Success { server_id, .. } => server_id.clone(),
                _ => self
                    .coordinator
                    .imported()
                    .map(|result| result.server_id.clone()),
            },
            agent_installed: matches!(
                self.state,
                WorkflowState::Success {
                    agent_installed: true,
                    ..
                }
            ),
            retry_count: self.coordinator.retry_count(),
        };
        info!(
            device_id = %report.device_id,
            final_phase = %report.final_phase,
            retry_count = report.retry_count,
            "import session closed"
        );
        Ok(report)
    }

    /// Every entry point takes `&mut self`, so a waiting phase seen here means
    /// the future that entered it was dropped before the backend replied.
    /// Moves the session to the matching failure state.
    fn recover_abandoned(&mut self) {
        let call = self.coordinator.abandon();
        let next = match &self.state {
            WorkflowState::CheckingDuplicate => {
                self.duplicate = Some(DuplicateOutcome::CheckFailed(DuplicateCheckError(
                    "duplicate check abandoned".to_string(),
                )));
                WorkflowState::empty_form()
            }
            WorkflowState::Importing => WorkflowState::ImportFailed {
                error: IMPORT_OUTCOME_UNKNOWN.to_string(),
            },
            WorkflowState::InstallingAgent { server_id } => WorkflowState::InstallFailed {
                server_id: server_id.clone(),
                error: INSTALL_OUTCOME_UNKNOWN.to_string(),
                retry_count: self.coordinator.retry_count(),
            },
            _ => return,
        };

        warn!(
            device_id = %self.device.id,
            phase = %self.phase(),
            call = ?call,
            "recovering session from abandoned call"
        );
        self.transition(next);
    }

    fn transition(&mut self, next: WorkflowState) {
        debug!(
            device_id = %self.device.id,
            from = %self.state.phase(),
            to = %next.phase(),
            "import phase transition"
        );
        self.state = next;
        self.state_tx.send_replace(self.state.clone());
    }
}
