use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSource {
    Mesh,
    Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineType {
    #[default]
    Server,
    Workstation,
}

/// A device reported by the discovery collaborator. Read-only to the import
/// workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub id: String,
    pub hostname: String,
    pub ip: String,
    pub os: String,
    pub source: DeviceSource,
    pub availability: Availability,
    #[serde(default)]
    pub is_monitored: bool,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub ssh_key_used: Option<String>,
    #[serde(default)]
    pub unavailable_reason: Option<String>,
    #[serde(default)]
    pub mesh_device_id: Option<String>,
    #[serde(default)]
    pub mesh_hostname: Option<String>,
}

impl DiscoveredDevice {
    pub fn is_mesh(&self) -> bool {
        self.source == DeviceSource::Mesh
    }

    /// Hostname the agent installer should connect to.
    pub fn install_hostname(&self) -> &str {
        if let Some(mesh_hostname) = self
            .mesh_hostname
            .as_deref()
            .filter(|value| !value.trim().is_empty())
        {
            return mesh_hostname;
        }

        if self.hostname.trim().is_empty() {
            &self.ip
        } else {
            &self.hostname
        }
    }
}

/// Form values for one import submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub display_name: String,
    #[serde(default)]
    pub machine_type: MachineType,
    #[serde(default)]
    pub tdp_watts: Option<i64>,
    #[serde(default)]
    pub install_agent: bool,
    #[serde(default)]
    pub ssh_key_id: Option<String>,
}

impl ImportRequest {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            machine_type: MachineType::Server,
            tdp_watts: None,
            install_agent: false,
            ssh_key_id: None,
        }
    }

    pub fn with_agent(mut self, ssh_key_id: Option<&str>) -> Self {
        self.install_agent = true;
        self.ssh_key_id = ssh_key_id.map(str::to_string);
        self
    }

    pub fn trimmed_display_name(&self) -> &str {
        self.display_name.trim()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub server_id: String,
    pub display_name: String,
    #[serde(default)]
    pub mesh_hostname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInstallResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set by the backend when the install call registered the device itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKey {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
}

/// Snapshot of the SSH keys available when the session was opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialDirectory {
    keys: Vec<SshKey>,
}

impl CredentialDirectory {
    pub fn new(keys: Vec<SshKey>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[SshKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn contains(&self, key_id: &str) -> bool {
        self.keys.iter().any(|key| key.id == key_id)
    }

    pub fn default_key(&self) -> Option<&SshKey> {
        self.keys.iter().find(|key| key.is_default)
    }

    /// Key that will be used for an install when the form names none.
    pub fn preselected(&self) -> Option<&SshKey> {
        self.default_key().or(match self.keys.as_slice() {
            [only] => Some(only),
            _ => None,
        })
    }

    pub fn resolve(&self, requested: Option<&str>) -> Option<String> {
        requested
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| self.preselected().map(|key| key.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str, is_default: bool) -> SshKey {
        SshKey {
            id: id.to_string(),
            name: format!("{id} key"),
            is_default,
        }
    }

    #[test]
    fn resolve_prefers_explicit_then_default_then_single() {
        let directory = CredentialDirectory::new(vec![key("a", false), key("b", true)]);
        assert_eq!(directory.resolve(Some("a")).as_deref(), Some("a"));
        assert_eq!(directory.resolve(None).as_deref(), Some("b"));
        assert_eq!(directory.resolve(Some("  ")).as_deref(), Some("b"));

        let single = CredentialDirectory::new(vec![key("only", false)]);
        assert_eq!(single.resolve(None).as_deref(), Some("only"));

        let ambiguous = CredentialDirectory::new(vec![key("a", false), key("b", false)]);
        assert_eq!(ambiguous.resolve(None), None);
    }

    #[test]
    fn device_deserializes_with_optional_fields_missing() {
        let device: DiscoveredDevice = serde_json::from_value(serde_json::json!({
            "id": "dev-1",
            "hostname": "nas",
            "ip": "10.0.0.5",
            "os": "linux",
            "source": "network",
            "availability": "available"
        }))
        .expect("valid device");

        assert_eq!(device.source, DeviceSource::Network);
        assert!(!device.is_monitored);
        assert!(device.mesh_device_id.is_none());
        assert_eq!(device.install_hostname(), "nas");
    }
}
