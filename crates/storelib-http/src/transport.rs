// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The send seam wrapped by [`InstrumentedTransport`](crate::InstrumentedTransport).
//!
//! [`Transport`] is the only capability the instrumented layer needs from the
//! network: take a request, honour a cancellation token, hand back a response.
//! [`ReqwestTransport`] is the production implementation; tests substitute
//! their own.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Request, Response};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{CertificateValidation, TransportConfig};
use crate::error::{BuildError, ReqwestTransportError};
use crate::tls::{apply_certificate_validation, create_reqwest_client_builder};

/// Something that can put a request on the wire.
///
/// Implementations must be safe to share across concurrent sends.
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends `request`, abandoning it once `cancel` fires.
    async fn send(
        &self,
        request: Request,
        cancel: CancellationToken,
    ) -> Result<Response, Self::Error>;
}

/// [`Transport`] backed by a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    proxy: Option<String>,
    certificate_validation: CertificateValidation,
}

impl ReqwestTransport {
    /// Builds a client from `config` using the default rustls builder.
    pub fn from_config(config: &TransportConfig) -> Result<Self, BuildError> {
        let builder = create_reqwest_client_builder(config.certificate_validation);
        Self::build(builder, config)
    }

    /// Applies `config` on top of a caller-prepared builder.
    pub fn from_builder(
        builder: ClientBuilder,
        config: &TransportConfig,
    ) -> Result<Self, BuildError> {
        let builder = apply_certificate_validation(builder, config.certificate_validation);
        Self::build(builder, config)
    }

    fn build(builder: ClientBuilder, config: &TransportConfig) -> Result<Self, BuildError> {
        let mut builder = builder.timeout(config.timeout);
        let proxy = config.proxy().map(str::to_string);
        builder = match &proxy {
            // Every scheme goes through the proxy, local addresses included.
            Some(address) => {
                debug!(proxy = %address, "routing requests through proxy");
                builder.proxy(reqwest::Proxy::all(address).map_err(BuildError::Proxy)?)
            }
            // Direct connection: system proxy variables are ignored too.
            None => builder.no_proxy(),
        };
        let client = builder.build().map_err(BuildError::Client)?;

        Ok(Self {
            client,
            proxy,
            certificate_validation: config.certificate_validation,
        })
    }

    /// Proxy address every connection is routed through, if any.
    #[must_use]
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    #[must_use]
    pub fn certificate_validation(&self) -> CertificateValidation {
        self.certificate_validation
    }

    /// The underlying client, for building requests.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    type Error = ReqwestTransportError;

    async fn send(
        &self,
        request: Request,
        cancel: CancellationToken,
    ) -> Result<Response, Self::Error> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ReqwestTransportError::Cancelled),
            result = self.client.execute(request) => result.map_err(ReqwestTransportError::Request),
        }
    }
}
