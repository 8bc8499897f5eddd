// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Construction-time settings for the instrumented transport.
//!
//! Settings are captured once in a [`TransportConfig`] and handed to the
//! transport constructor. Nothing in this crate reads process-wide state after
//! that point. [`TransportConfig::from_env_iter`] derives a config from
//! environment-style key/value pairs so hosts can keep their own layering.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Environment variable carrying the proxy address (`http://host:port`).
const ENV_PROXY_ADDRESS: &str = "STORELIB_PROXY_ADDRESS";
/// Conventional fallback for the proxy address.
const ENV_HTTPS_PROXY: &str = "HTTPS_PROXY";
/// Environment variable disabling TLS certificate validation.
const ENV_NO_TLS_VALIDATION: &str = "STORELIB_NO_TLS_VALIDATION";
/// Environment variable overriding the identity (`User-Agent`) value.
const ENV_USER_AGENT: &str = "STORELIB_USER_AGENT";
/// Environment variable overriding the per-request timeout, in seconds.
const ENV_TIMEOUT_SECS: &str = "STORELIB_TIMEOUT_SECS";

/// Identity sent in the `User-Agent` header unless overridden.
pub const DEFAULT_IDENTITY: &str = "StoreLib";
/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How server certificates are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateValidation {
    /// Platform certificate validation.
    Strict,
    /// Accept every server certificate and host name.
    ///
    /// This is insecure: traffic can be intercepted by anyone able to present a
    /// certificate. It exists for platforms whose trust store cannot validate
    /// the service chain and should stay limited to them.
    BypassAll,
}

impl CertificateValidation {
    /// Policy historically used for a given `std::env::consts::OS` value:
    /// Windows validates, every other platform bypasses.
    #[must_use]
    pub fn for_platform(os: &str) -> Self {
        if os == "windows" {
            CertificateValidation::Strict
        } else {
            CertificateValidation::BypassAll
        }
    }

    /// [`Self::for_platform`] applied to the host platform.
    #[must_use]
    pub fn host() -> Self {
        Self::for_platform(env::consts::OS)
    }
}

/// Everything needed to build an instrumented transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Value of the identity header stamped on every request.
    pub identity: String,
    /// Proxy every connection is routed through. `None` or blank connects directly.
    pub proxy_address: Option<String>,
    /// Server certificate policy.
    pub certificate_validation: CertificateValidation,
    /// Per-request timeout applied by the underlying client.
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            identity: DEFAULT_IDENTITY.to_string(),
            proxy_address: None,
            certificate_validation: CertificateValidation::host(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Builds settings from the current process environment.
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from an iterator of key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let proxy_address = map
            .get(ENV_PROXY_ADDRESS)
            .and_then(|value| sanitize_non_empty(value))
            .or_else(|| {
                map.get(ENV_HTTPS_PROXY)
                    .and_then(|value| sanitize_non_empty(value))
            });
        let certificate_validation = match parse_bool(
            map.get(ENV_NO_TLS_VALIDATION).map(String::as_str),
        ) {
            Some(true) => CertificateValidation::BypassAll,
            Some(false) => CertificateValidation::Strict,
            None => CertificateValidation::host(),
        };
        let identity = map
            .get(ENV_USER_AGENT)
            .and_then(|value| sanitize_non_empty(value))
            .unwrap_or_else(|| DEFAULT_IDENTITY.to_string());
        let timeout = map
            .get(ENV_TIMEOUT_SECS)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);

        Self {
            identity,
            proxy_address,
            certificate_validation,
            timeout,
        }
    }

    /// The proxy to route through, ignoring blank addresses.
    #[must_use]
    pub fn proxy(&self) -> Option<&str> {
        self.proxy_address
            .as_deref()
            .map(str::trim)
            .filter(|address| !address.is_empty())
    }
}

/// Helper trimming whitespace and discarding empty values.
fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses boolean values from strings. Absent or ambiguous input yields `None`.
fn parse_bool(value: Option<&str>) -> Option<bool> {
    match value.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref v) if ["1", "true", "t", "yes", "y"].contains(&v.as_str()) => Some(true),
        Some(ref v) if ["0", "false", "f", "no", "n"].contains(&v.as_str()) => Some(false),
        _ => None,
    }
}
