//! HTTP client for the fleet backend
//!
//! Implements the duplicate-check, import and agent-install contracts over the
//! backend's REST API using [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, Url};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::errors::ServiceError;
use crate::import::model::{AgentInstallResult, ImportRequest, ImportResult, MachineType};
use crate::import::services::{
    AgentInstallParams, AgentInstallService, DuplicateCheckResponse, DuplicateCheckService,
    ImportService,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Serialize)]
struct ImportBody<'a> {
    display_name: &'a str,
    machine_type: MachineType,
    #[serde(skip_serializing_if = "Option::is_none")]
    tdp_watts: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct HttpFleetBackend {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpFleetBackend {
    pub fn new(
        base_url: Url,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ServiceError::Transport(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        Self::new(
            config.backend_url.clone(),
            config.backend_token.clone(),
            config.backend_timeout,
        )
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ServiceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ServiceError::Transport("backend URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ServiceError> {
        let response = builder.send().await.map_err(transport_error)?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(ServiceError::Rejected {
                status: status.as_u16(),
                message: extract_error_message(&body).unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("unexpected backend response")
                        .to_string()
                }),
            });
        }

        serde_json::from_slice(&body).map_err(|err| ServiceError::Malformed(err.to_string()))
    }
}

#[async_trait]
impl DuplicateCheckService for HttpFleetBackend {
    async fn check_duplicate(
        &self,
        mesh_device_id: &str,
    ) -> Result<DuplicateCheckResponse, ServiceError> {
        let url = self.endpoint(&["mesh", "devices", mesh_device_id, "import-status"])?;
        Self::send(self.authorized(self.client.get(url))).await
    }
}

#[async_trait]
impl ImportService for HttpFleetBackend {
    async fn import_device(
        &self,
        mesh_device_id: &str,
        request: &ImportRequest,
    ) -> Result<ImportResult, ServiceError> {
        let url = self.endpoint(&["mesh", "devices", mesh_device_id, "import"])?;
        let body = ImportBody {
            display_name: request.trimmed_display_name(),
            machine_type: request.machine_type,
            tdp_watts: request.tdp_watts,
        };
        let builder = self
            .client
            .post(url)
            .header(IDEMPOTENCY_KEY_HEADER, format!("mesh:{mesh_device_id}"))
            .json(&body);
        Self::send(self.authorized(builder)).await
    }
}

#[async_trait]
impl AgentInstallService for HttpFleetBackend {
    async fn install_agent(
        &self,
        params: &AgentInstallParams,
    ) -> Result<AgentInstallResult, ServiceError> {
        let url = self.endpoint(&["agents", "install"])?;
        Self::send(self.authorized(self.client.post(url).json(params))).await
    }
}

fn transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        return ServiceError::Transport("request to fleet backend timed out".to_string());
    }
    ServiceError::Transport(err.to_string())
}

fn extract_error_message(body: &[u8]) -> Option<String> {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        return ["detail", "message", "error"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .map(str::to_string);
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
