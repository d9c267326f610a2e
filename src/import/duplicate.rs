//! One-shot duplicate check for mesh devices

use tracing::{info, warn};

use crate::errors::{DuplicateCheckError, ServiceError};
use crate::import::services::{DuplicateCheckResponse, DuplicateCheckService};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateOutcome {
    AlreadyImported {
        machine_id: String,
        display_name: Option<String>,
    },
    NotImported,
    /// The check could not be completed. Treated like `NotImported`, so a
    /// failed check never blocks submission.
    CheckFailed(DuplicateCheckError),
    Skipped,
}

impl DuplicateOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::AlreadyImported { .. })
    }
}

pub async fn check_duplicate(
    service: &dyn DuplicateCheckService,
    mesh_device_id: &str,
) -> DuplicateOutcome {
    let outcome = match service.check_duplicate(mesh_device_id).await {
        Ok(response) => interpret(response),
        Err(err) => DuplicateOutcome::CheckFailed(DuplicateCheckError(err.to_string())),
    };

    match &outcome {
        DuplicateOutcome::AlreadyImported { machine_id, .. } => {
            info!(mesh_device_id, machine_id = %machine_id, "device already imported");
        }
        DuplicateOutcome::CheckFailed(err) => {
            warn!(mesh_device_id, error = %err, "duplicate check failed, continuing to form");
        }
        DuplicateOutcome::NotImported | DuplicateOutcome::Skipped => {}
    }

    outcome
}

fn interpret(response: DuplicateCheckResponse) -> DuplicateOutcome {
    if !response.imported {
        return DuplicateOutcome::NotImported;
    }

    match response.machine_id.filter(|id| !id.trim().is_empty()) {
        Some(machine_id) => DuplicateOutcome::AlreadyImported {
            machine_id,
            display_name: response.display_name,
        },
        None => DuplicateOutcome::CheckFailed(DuplicateCheckError(
            ServiceError::Malformed("imported device without machine_id".to_string()).to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::fakes::FakeBackend;

    #[tokio::test]
    async fn reports_existing_machine() {
        let backend = FakeBackend::new();
        backend.reply_duplicate(Ok(DuplicateCheckResponse {
            imported: true,
            machine_id: Some("existing-123".to_string()),
            display_name: Some("Old name".to_string()),
        }));

        let outcome = check_duplicate(&*backend, "mesh-42").await;
        assert_eq!(
            outcome,
            DuplicateOutcome::AlreadyImported {
                machine_id: "existing-123".to_string(),
                display_name: Some("Old name".to_string()),
            }
        );
        assert_eq!(backend.duplicates(), 1);
    }

    #[tokio::test]
    async fn transport_failure_degrades_to_check_failed() {
        let backend = FakeBackend::new();
        backend.reply_duplicate(Err(ServiceError::Transport("connection reset".to_string())));

        let outcome = check_duplicate(&*backend, "mesh-42").await;
        assert!(matches!(outcome, DuplicateOutcome::CheckFailed(_)));
        assert!(!outcome.is_duplicate());
    }

    #[tokio::test]
    async fn imported_without_machine_id_is_malformed() {
        let backend = FakeBackend::new();
        backend.reply_duplicate(Ok(DuplicateCheckResponse {
            imported: true,
            machine_id: None,
            display_name: None,
        }));

        let outcome = check_duplicate(&*backend, "mesh-42").await;
        let DuplicateOutcome::CheckFailed(err) = outcome else {
            panic!("expected check failure");
        };
        assert!(err.to_string().contains("malformed response"));
    }
}
