//! Scripted in-memory backend for workflow tests

use std::collections::VecDeque;
use std::future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::errors::ServiceError;
use crate::import::model::{
    AgentInstallResult, Availability, DeviceSource, DiscoveredDevice, ImportRequest, ImportResult,
};
use crate::import::services::{
    AgentInstallParams, AgentInstallService, DuplicateCheckResponse, DuplicateCheckService,
    ImportService, Services,
};

#[derive(Default)]
pub struct FakeBackend {
    duplicate_replies: Mutex<VecDeque<Result<DuplicateCheckResponse, ServiceError>>>,
    import_replies: Mutex<VecDeque<Result<ImportResult, ServiceError>>>,
    install_replies: Mutex<VecDeque<Result<AgentInstallResult, ServiceError>>>,
    pub duplicate_calls: AtomicUsize,
    pub import_calls: AtomicUsize,
    pub install_calls: AtomicUsize,
    pub install_params: Mutex<Vec<AgentInstallParams>>,
    stall_duplicates: AtomicBool,
    stall_imports: AtomicBool,
    stall_installs: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn services(self: &Arc<Self>) -> Services {
        Services::from_backend(self.clone())
    }

    pub fn reply_duplicate(&self, reply: Result<DuplicateCheckResponse, ServiceError>) {
        self.duplicate_replies
            .lock()
            .expect("duplicate replies lock")
            .push_back(reply);
    }

    pub fn reply_import(&self, reply: Result<ImportResult, ServiceError>) {
        self.import_replies
            .lock()
            .expect("import replies lock")
            .push_back(reply);
    }

    pub fn reply_install(&self, reply: Result<AgentInstallResult, ServiceError>) {
        self.install_replies
            .lock()
            .expect("install replies lock")
            .push_back(reply);
    }

    /// While set, calls are counted and then never answered.
    pub fn stall_duplicates(&self, stall: bool) {
        self.stall_duplicates.store(stall, Ordering::SeqCst);
    }

    pub fn stall_imports(&self, stall: bool) {
        self.stall_imports.store(stall, Ordering::SeqCst);
    }

    pub fn stall_installs(&self, stall: bool) {
        self.stall_installs.store(stall, Ordering::SeqCst);
    }

    pub fn total_calls(&self) -> usize {
        self.duplicate_calls.load(Ordering::SeqCst)
            + self.import_calls.load(Ordering::SeqCst)
            + self.install_calls.load(Ordering::SeqCst)
    }

    pub fn imports(&self) -> usize {
        self.import_calls.load(Ordering::SeqCst)
    }

    pub fn installs(&self) -> usize {
        self.install_calls.load(Ordering::SeqCst)
    }

    pub fn duplicates(&self) -> usize {
        self.duplicate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DuplicateCheckService for FakeBackend {
    async fn check_duplicate(
        &self,
        _mesh_device_id: &str,
    ) -> Result<DuplicateCheckResponse, ServiceError> {
        self.duplicate_calls.fetch_add(1, Ordering::SeqCst);
        if self.stall_duplicates.load(Ordering::SeqCst) {
            future::pending::<()>().await;
        }
        self.duplicate_replies
            .lock()
            .expect("duplicate replies lock")
            .pop_front()
            .unwrap_or_else(|| Ok(DuplicateCheckResponse::default()))
    }
}

#[async_trait]
impl ImportService for FakeBackend {
    async fn import_device(
        &self,
        mesh_device_id: &str,
        request: &ImportRequest,
    ) -> Result<ImportResult, ServiceError> {
        self.import_calls.fetch_add(1, Ordering::SeqCst);
        if self.stall_imports.load(Ordering::SeqCst) {
            future::pending::<()>().await;
        }
        self.import_replies
            .lock()
            .expect("import replies lock")
            .pop_front()
            .unwrap_or_else(|| {
                Ok(ImportResult {
                    server_id: format!("srv-{mesh_device_id}"),
                    display_name: request.trimmed_display_name().to_string(),
                    mesh_hostname: Some("homeserver.tail0.ts.net".to_string()),
                })
            })
    }
}

#[async_trait]
impl AgentInstallService for FakeBackend {
    async fn install_agent(
        &self,
        params: &AgentInstallParams,
    ) -> Result<AgentInstallResult, ServiceError> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);
        self.install_params
            .lock()
            .expect("install params lock")
            .push(params.clone());
        if self.stall_installs.load(Ordering::SeqCst) {
            future::pending::<()>().await;
        }
        self.install_replies
            .lock()
            .expect("install replies lock")
            .pop_front()
            .unwrap_or(Ok(AgentInstallResult {
                success: true,
                error: None,
                server_id: None,
            }))
    }
}

pub fn mesh_device() -> DiscoveredDevice {
    DiscoveredDevice {
        id: "dev-mesh".to_string(),
        hostname: "homeserver".to_string(),
        ip: "100.64.0.7".to_string(),
        os: "linux".to_string(),
        source: DeviceSource::Mesh,
        availability: Availability::Available,
        is_monitored: false,
        server_id: None,
        ssh_key_used: None,
        unavailable_reason: None,
        mesh_device_id: Some("mesh-42".to_string()),
        mesh_hostname: Some("homeserver.tail0.ts.net".to_string()),
    }
}

pub fn network_device() -> DiscoveredDevice {
    DiscoveredDevice {
        id: "dev-net".to_string(),
        hostname: "nas".to_string(),
        ip: "192.168.1.20".to_string(),
        os: "linux".to_string(),
        source: DeviceSource::Network,
        availability: Availability::Available,
        is_monitored: false,
        server_id: None,
        ssh_key_used: None,
        unavailable_reason: None,
        mesh_device_id: None,
        mesh_hostname: None,
    }
}

pub fn install_failure(message: &str) -> Result<AgentInstallResult, ServiceError> {
    Ok(AgentInstallResult {
        success: false,
        error: Some(message.to_string()),
        server_id: None,
    })
}
