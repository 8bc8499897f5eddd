// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::ClientBuilder;
use tracing::warn;

use crate::config::CertificateValidation;

/// Creates a reqwest client builder using rustls and the given certificate policy.
pub fn create_reqwest_client_builder(validation: CertificateValidation) -> ClientBuilder {
    apply_certificate_validation(reqwest::Client::builder().use_rustls_tls(), validation)
}

/// Applies a certificate policy to an existing builder.
///
/// [`CertificateValidation::BypassAll`] disables both chain and host name checks.
pub fn apply_certificate_validation(
    builder: ClientBuilder,
    validation: CertificateValidation,
) -> ClientBuilder {
    match validation {
        CertificateValidation::Strict => builder,
        CertificateValidation::BypassAll => {
            warn!("TLS certificate validation is disabled, every server certificate will be accepted");
            builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
        }
    }
}
