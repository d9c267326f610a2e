//! Field validation for import submissions
//!
//! Pure checks only. A failed validation means no backend call is made for
//! that submission.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::ValidationError;
use crate::import::model::{CredentialDirectory, DeviceSource, DiscoveredDevice, ImportRequest};

pub const MAX_DISPLAY_NAME_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    DisplayName,
    TdpWatts,
    InstallAgent,
    SshKeyId,
}

pub type FieldErrors = BTreeMap<Field, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub field_errors: FieldErrors,
}

impl ValidationOutcome {
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.valid {
            Ok(())
        } else {
            Err(ValidationError {
                field_errors: self.field_errors,
            })
        }
    }
}

pub fn validate(
    request: &ImportRequest,
    device: &DiscoveredDevice,
    directory: &CredentialDirectory,
) -> ValidationOutcome {
    let mut field_errors = FieldErrors::new();

    if let Some(message) = check_display_name(&request.display_name) {
        field_errors.insert(Field::DisplayName, message.to_string());
    }

    if let Some(message) = check_tdp_watts(request.tdp_watts) {
        field_errors.insert(Field::TdpWatts, message.to_string());
    }

    if device.source == DeviceSource::Network && !request.install_agent {
        field_errors.insert(
            Field::InstallAgent,
            "Network devices require agent installation".to_string(),
        );
    }

    if request.install_agent {
        if let Some(message) = check_ssh_key(request, device, directory) {
            field_errors.insert(Field::SshKeyId, message.to_string());
        }
    }

    ValidationOutcome {
        valid: field_errors.is_empty(),
        field_errors,
    }
}

fn check_display_name(display_name: &str) -> Option<&'static str> {
    let trimmed = display_name.trim();
    if trimmed.is_empty() {
        return Some("Display name is required");
    }

    if trimmed.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Some("Display name must be 100 characters or less");
    }

    None
}

fn check_tdp_watts(tdp_watts: Option<i64>) -> Option<&'static str> {
    match tdp_watts {
        Some(watts) if watts <= 0 => Some("TDP must be a positive whole number of watts"),
        _ => None,
    }
}

fn check_ssh_key(
    request: &ImportRequest,
    device: &DiscoveredDevice,
    directory: &CredentialDirectory,
) -> Option<&'static str> {
    let requested = request
        .ssh_key_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());

    if let Some(key_id) = requested {
        if !directory.contains(key_id) {
            return Some("Selected SSH key is not available");
        }
        return None;
    }

    // Mesh installs can go through the mesh's own SSH; network scans cannot.
    if directory.is_empty() {
        return match device.source {
            DeviceSource::Network => {
                Some("An SSH key is required to install the agent on network devices")
            }
            DeviceSource::Mesh => None,
        };
    }

    if directory.len() > 1 && directory.preselected().is_none() {
        return Some("Select an SSH key to install the agent");
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::model::{Availability, SshKey};

    fn device(source: DeviceSource) -> DiscoveredDevice {
        DiscoveredDevice {
            id: "dev-1".to_string(),
            hostname: "homeserver".to_string(),
            ip: "100.64.0.7".to_string(),
            os: "linux".to_string(),
            source,
            availability: Availability::Available,
            is_monitored: false,
            server_id: None,
            ssh_key_used: None,
            unavailable_reason: None,
            mesh_device_id: matches!(source, DeviceSource::Mesh).then(|| "mesh-1".to_string()),
            mesh_hostname: None,
        }
    }

    fn keys(defaults: &[(&str, bool)]) -> CredentialDirectory {
        CredentialDirectory::new(
            defaults
                .iter()
                .map(|(id, is_default)| SshKey {
                    id: id.to_string(),
                    name: id.to_string(),
                    is_default: *is_default,
                })
                .collect(),
        )
    }

    #[test]
    fn accepts_plain_mesh_import() {
        let outcome = validate(
            &ImportRequest::new("My-server"),
            &device(DeviceSource::Mesh),
            &CredentialDirectory::default(),
        );
        assert!(outcome.valid);
        assert!(outcome.field_errors.is_empty());
    }

    #[test]
    fn display_name_is_trimmed_before_checks() {
        let outcome = validate(
            &ImportRequest::new("   "),
            &device(DeviceSource::Mesh),
            &CredentialDirectory::default(),
        );
        assert_eq!(
            outcome.field_errors.get(&Field::DisplayName).map(String::as_str),
            Some("Display name is required")
        );

        let padded = format!("  {}  ", "a".repeat(100));
        let outcome = validate(
            &ImportRequest::new(padded),
            &device(DeviceSource::Mesh),
            &CredentialDirectory::default(),
        );
        assert!(outcome.valid);
    }

    #[test]
    fn display_name_over_limit_is_rejected() {
        let outcome = validate(
            &ImportRequest::new("a".repeat(101)),
            &device(DeviceSource::Mesh),
            &CredentialDirectory::default(),
        );
        assert!(!outcome.valid);
        assert!(outcome.field_errors[&Field::DisplayName].contains("must be 100 characters or less"));
    }

    #[test]
    fn display_name_limit_counts_characters_not_bytes() {
        let outcome = validate(
            &ImportRequest::new("é".repeat(100)),
            &device(DeviceSource::Mesh),
            &CredentialDirectory::default(),
        );
        assert!(outcome.valid);
    }

    #[test]
    fn tdp_must_be_positive() {
        for watts in [0, -5] {
            let mut request = ImportRequest::new("box");
            request.tdp_watts = Some(watts);
            let outcome = validate(
                &request,
                &device(DeviceSource::Mesh),
                &CredentialDirectory::default(),
            );
            assert!(outcome.field_errors.contains_key(&Field::TdpWatts));
        }

        let mut request = ImportRequest::new("box");
        request.tdp_watts = Some(65);
        assert!(validate(&request, &device(DeviceSource::Mesh), &CredentialDirectory::default()).valid);
    }

    #[test]
    fn network_device_requires_agent() {
        let outcome = validate(
            &ImportRequest::new("nas"),
            &device(DeviceSource::Network),
            &keys(&[("k1", true)]),
        );
        assert_eq!(
            outcome.field_errors.get(&Field::InstallAgent).map(String::as_str),
            Some("Network devices require agent installation")
        );
    }

    #[test]
    fn network_device_without_keys_needs_ssh_key() {
        let outcome = validate(
            &ImportRequest::new("nas").with_agent(None),
            &device(DeviceSource::Network),
            &CredentialDirectory::default(),
        );
        assert!(outcome.field_errors.contains_key(&Field::SshKeyId));
        assert!(!outcome.field_errors.contains_key(&Field::InstallAgent));
    }

    #[test]
    fn mesh_device_without_keys_can_install() {
        let outcome = validate(
            &ImportRequest::new("box").with_agent(None),
            &device(DeviceSource::Mesh),
            &CredentialDirectory::default(),
        );
        assert!(outcome.valid);
    }

    #[test]
    fn ambiguous_keys_require_selection() {
        let directory = keys(&[("k1", false), ("k2", false)]);
        let outcome = validate(
            &ImportRequest::new("box").with_agent(None),
            &device(DeviceSource::Mesh),
            &directory,
        );
        assert_eq!(
            outcome.field_errors.get(&Field::SshKeyId).map(String::as_str),
            Some("Select an SSH key to install the agent")
        );

        let outcome = validate(
            &ImportRequest::new("box").with_agent(Some("k2")),
            &device(DeviceSource::Mesh),
            &directory,
        );
        assert!(outcome.valid);
    }

    #[test]
    fn default_key_counts_as_preselected() {
        let outcome = validate(
            &ImportRequest::new("box").with_agent(None),
            &device(DeviceSource::Network),
            &keys(&[("k1", false), ("k2", true)]),
        );
        assert!(outcome.valid);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let outcome = validate(
            &ImportRequest::new("box").with_agent(Some("missing")),
            &device(DeviceSource::Network),
            &keys(&[("k1", true)]),
        );
        assert_eq!(
            outcome.field_errors.get(&Field::SshKeyId).map(String::as_str),
            Some("Selected SSH key is not available")
        );
    }

    #[test]
    fn into_result_carries_field_errors() {
        let error = validate(
            &ImportRequest::new(""),
            &device(DeviceSource::Mesh),
            &CredentialDirectory::default(),
        )
        .into_result()
        .expect_err("empty name must fail");
        assert!(error.field_errors.contains_key(&Field::DisplayName));
    }
}
