//! LLM gateway: routes each request to the hosted aggregator or a
//! self-hosted backend, with one cross-provider fallback.
//!
//! Routing rules, in order:
//! 1. Models matching a known aggregator prefix always go to the aggregator.
//! 2. Otherwise the configured default backend decides.
//! 3. A `local` default without an active local backend uses the aggregator.
//!
//! A failing local call is retried once on the aggregator when fallback is
//! enabled; the response then carries `provider_used = "aggregator_fallback"`
//! and the original error.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use switchyard_config::GatewayConfig;
use switchyard_core::error::ProviderError;
use switchyard_core::provider::*;
use tracing::{info, warn};

use crate::openai_compat::OpenAiCompatProvider;

/// Which backend a request is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Aggregator,
    Local,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aggregator => "aggregator",
            Self::Local => "local",
        }
    }
}

/// The single model entry point used by the orchestrator.
pub struct LlmGateway {
    aggregator: Option<Arc<dyn Provider>>,
    local: Option<Arc<dyn Provider>>,
    aggregator_prefixes: Vec<String>,
    default_backend: Backend,
    fallback_enabled: bool,
    timeout: Duration,
}

impl LlmGateway {
    /// A gateway with only an aggregator (which may be absent).
    pub fn new(aggregator: Option<Arc<dyn Provider>>) -> Self {
        Self {
            aggregator,
            local: None,
            aggregator_prefixes: Vec::new(),
            default_backend: Backend::Aggregator,
            fallback_enabled: true,
            timeout: Duration::from_secs(60),
        }
    }

    /// Build the gateway from configuration.
    ///
    /// A missing aggregator key is not an error here; requests that need the
    /// aggregator fail with `NotConfigured` instead.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);

        let aggregator = match &config.api_key {
            Some(key) => Some(Arc::new(OpenAiCompatProvider::new(
                "openrouter",
                &config.aggregator_url,
                Some(key.clone()),
                timeout,
            )?) as Arc<dyn Provider>),
            None => None,
        };

        let local = match &config.local {
            Some(local) if local.active => {
                let base_url = local.resolved_base_url().ok_or_else(|| {
                    ProviderError::NotConfigured(format!(
                        "local backend kind '{}' has no known URL; set base_url",
                        local.kind
                    ))
                })?;
                Some(Arc::new(OpenAiCompatProvider::new(
                    local.kind.clone(),
                    base_url,
                    local.api_key.clone(),
                    timeout,
                )?) as Arc<dyn Provider>)
            }
            _ => None,
        };

        let default_backend = match config.default_backend.as_str() {
            "local" => Backend::Local,
            _ => Backend::Aggregator,
        };

        Ok(Self {
            aggregator,
            local,
            aggregator_prefixes: config.aggregator_prefixes.clone(),
            default_backend,
            fallback_enabled: config.fallback_enabled,
            timeout,
        })
    }

    pub fn with_local(mut self, local: Arc<dyn Provider>) -> Self {
        self.local = Some(local);
        self
    }

    pub fn with_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.aggregator_prefixes = prefixes;
        self
    }

    pub fn with_default_backend(mut self, backend: Backend) -> Self {
        self.default_backend = backend;
        self
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Decide which backend serves `model`.
    pub fn select_backend(&self, model: &str) -> Backend {
        if self.aggregator_prefixes.iter().any(|p| model.starts_with(p.as_str())) {
            return Backend::Aggregator;
        }
        match self.default_backend {
            Backend::Local if self.local.is_some() => Backend::Local,
            _ => Backend::Aggregator,
        }
    }

    async fn call(
        &self,
        provider: &Arc<dyn Provider>,
        request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        match tokio::time::timeout(self.timeout, provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "'{}' did not answer within {}s",
                provider.name(),
                self.timeout.as_secs()
            ))),
        }
    }

    async fn call_aggregator(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let aggregator = self.aggregator.as_ref().ok_or_else(|| {
            ProviderError::NotConfigured("aggregator API key is not set".into())
        })?;
        self.call(aggregator, request).await
    }
}

#[async_trait]
impl Provider for LlmGateway {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let backend = self.select_backend(&request.model);
        info!(model = %request.model, backend = backend.as_str(), "Routing model call");

        let local = match (backend, &self.local) {
            (Backend::Local, Some(local)) => local,
            _ => {
                let mut response = self.call_aggregator(request).await?;
                response.provider_used = Backend::Aggregator.as_str().into();
                return Ok(response);
            }
        };

        let primary_error = match self.call(local, request.clone()).await {
            Ok(mut response) => {
                response.provider_used = Backend::Local.as_str().into();
                return Ok(response);
            }
            Err(e) => e,
        };

        if !self.fallback_enabled {
            return Err(primary_error);
        }

        warn!(
            backend = local.name(),
            error = %primary_error,
            "Local backend failed, falling back to aggregator"
        );

        match self.call_aggregator(request).await {
            Ok(mut response) => {
                response.provider_used = "aggregator_fallback".into();
                response.fallback_error = Some(primary_error.to_string());
                Ok(response)
            }
            Err(fallback_error) => Err(ProviderError::FallbackExhausted {
                primary: Box::new(primary_error),
                fallback: Box::new(fallback_error),
            }),
        }
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let provider = match self.default_backend {
            Backend::Local => self.local.as_ref().or(self.aggregator.as_ref()),
            Backend::Aggregator => self.aggregator.as_ref(),
        };
        match provider {
            Some(p) => p.health_check().await,
            None => Ok(false),
        }
    }
}
