//! [`Provisioner`] implementation over the registration REST API.

use std::future::Future;
use std::time::{Duration, Instant};

use boltsim_app::ports::Provisioner;
use boltsim_domain::connection_string::ConnectionString;
use boltsim_domain::error::ProvisioningError;
use boltsim_domain::provisioning::{ProvisioningRequest, ProvisioningResponse};
use boltsim_domain::sas::{TokenSigner, derive_device_key};
use boltsim_domain::time;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, field, instrument, trace};

use crate::config::DpsConfig;
use crate::error::DpsError;
use crate::wire::{OperationResponse, OperationResult, RegistrationPayload, RegistrationRequest};

/// Lifetime of the token authorizing one registration.
const REGISTRATION_TOKEN_TTL: Duration = Duration::from_secs(60);
const REGISTRATION_ROLE: &str = "registration";

/// Registers devices against the provisioning service.
#[derive(Debug, Clone)]
pub struct HttpProvisioner {
    client: reqwest::Client,
    base_url: String,
    config: DpsConfig,
}

impl HttpProvisioner {
    /// Build a provisioner with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`DpsError::Http`] if the TLS backend cannot be initialised.
    pub fn new(config: DpsConfig) -> Result<Self, DpsError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url(),
            config,
        })
    }

    #[instrument(
        skip_all,
        fields(device_id = %request.device_id, hub = field::Empty),
        err
    )]
    async fn register(
        &self,
        request: &ProvisioningRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisioningResponse, DpsError> {
        let started = Instant::now();
        let device_key = derive_device_key(&self.config.master_key, request.device_id.as_str())
            .map_err(DpsError::Key)?;
        let token = TokenSigner::new(&device_key)
            .map_err(DpsError::Key)?
            .sign(
                &request.resource(),
                Some(REGISTRATION_ROLE),
                REGISTRATION_TOKEN_TTL,
                time::now(),
            )
            .to_string();
        let registration_url = format!("{}/{}", self.base_url, request.resource());

        let operation = self
            .send_register(&registration_url, request, &token, cancel)
            .await?;
        debug!(operation_id = %operation.operation_id, status = ?operation.status, "registration accepted");

        let hub = self
            .poll_status(&registration_url, &operation.operation_id, &token, cancel)
            .await?;
        Span::current().record("hub", hub.as_str());
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(elapsed_ms, "device provisioned");

        Ok(ProvisioningResponse {
            connection_string: ConnectionString::new(hub, request.device_id.clone(), device_key),
        })
    }

    async fn send_register(
        &self,
        registration_url: &str,
        request: &ProvisioningRequest,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<OperationResponse, DpsError> {
        let body = RegistrationRequest {
            registration_id: request.device_id.as_str(),
            payload: RegistrationPayload {
                model_id: &request.model_id,
            },
        };
        let response = cancellable(
            cancel,
            self.client
                .put(format!("{registration_url}/register"))
                .query(&[("api-version", self.config.api_version.as_str())])
                .header(CONTENT_TYPE, "application/json")
                .header("Encoding", "utf-8")
                .header(AUTHORIZATION, token)
                .json(&body)
                .send(),
        )
        .await??;

        if !response.status().is_success() {
            return Err(status_error(response, cancel).await);
        }
        let bytes = cancellable(cancel, response.bytes()).await??;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Poll the operation until it settles, at most `max_status_polls` times.
    async fn poll_status(
        &self,
        registration_url: &str,
        operation_id: &str,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<String, DpsError> {
        let url = format!("{registration_url}/operations/{operation_id}");
        let max_polls = self.config.max_status_polls;

        for attempt in 1..=max_polls {
            let response = cancellable(
                cancel,
                self.client
                    .get(&url)
                    .query(&[("api-version", self.config.api_version.as_str())])
                    .header(CONTENT_TYPE, "application/json")
                    .header("Encoding", "utf-8")
                    .header(AUTHORIZATION, token)
                    .send(),
            )
            .await??;

            match response.status() {
                StatusCode::OK => {
                    let bytes = cancellable(cancel, response.bytes()).await??;
                    let result: OperationResult = serde_json::from_slice(&bytes)?;
                    trace!(
                        attempt,
                        status = ?result.status,
                        device_id = ?result.registration_state.as_ref().and_then(|state| state.device_id.as_deref()),
                        "registration finished"
                    );
                    return assigned_hub(result);
                }
                StatusCode::ACCEPTED => {
                    let wait = self.retry_after(&response);
                    debug!(attempt, wait_secs = wait.as_secs(), "registration still assigning");
                    if attempt < max_polls {
                        tokio::select! {
                            () = cancel.cancelled() => return Err(DpsError::Cancelled),
                            () = tokio::time::sleep(wait) => {}
                        }
                    }
                }
                _ => return Err(status_error(response, cancel).await),
            }
        }

        Err(DpsError::StillAssigning(max_polls))
    }

    fn retry_after(&self, response: &Response) -> Duration {
        response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map_or_else(|| self.config.default_retry_after(), Duration::from_secs)
    }
}

impl Provisioner for HttpProvisioner {
    async fn provision(
        &self,
        request: &ProvisioningRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisioningResponse, ProvisioningError> {
        Ok(self.register(request, cancel).await?)
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, DpsError> {
    tokio::select! {
        () = cancel.cancelled() => Err(DpsError::Cancelled),
        output = fut => Ok(output),
    }
}

async fn status_error(response: Response, cancel: &CancellationToken) -> DpsError {
    let status = response.status().as_u16();
    let body = match cancellable(cancel, response.text()).await {
        Ok(Ok(body)) => body,
        Ok(Err(_)) => String::new(),
        Err(cancelled) => return cancelled,
    };
    DpsError::Status { status, body }
}

fn assigned_hub(result: OperationResult) -> Result<String, DpsError> {
    let state = result.registration_state.unwrap_or_default();
    match state.assigned_hub {
        Some(hub) if !hub.is_empty() => Ok(hub),
        _ => Err(DpsError::Unassigned {
            status: state
                .status
                .or(result.status)
                .unwrap_or_else(|| "unknown".to_string()),
        }),
    }
}
