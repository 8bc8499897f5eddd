// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The instrumented transport.
//!
//! [`InstrumentedTransport`] wraps any [`Transport`] and, for every request:
//! 1. takes the current correlation vector and advances it, under one lock
//! 2. stamps `MS-CV` and the identity header (`User-Agent`)
//! 3. delegates to the wrapped transport with the caller's cancellation token
//!
//! # Header precedence
//!
//! Headers already present on the request win. A caller that sets its own
//! `MS-CV` keeps it (no duplicate header is produced) and the transport's
//! vector is still consumed, so the next request gets a fresh value. The same
//! applies to `User-Agent`.
//!
//! # Example
//!
//! ```rust,ignore
//! use storelib_http::{InstrumentedTransport, TransportConfig};
//!
//! let transport = InstrumentedTransport::from_config(&TransportConfig::from_os_env())?;
//! let request = transport.inner().client().get(url).build()?;
//! let response = transport.execute(request).await?;
//! ```

use std::sync::{Mutex, PoisonError};

use reqwest::header::{Entry, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Request, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::correlation::{CorrelationVector, GENERATED_BASE_LEN};
use crate::error::{BuildError, CorrelationError, SendError};
use crate::transport::{ReqwestTransport, Transport};

/// Header carrying the correlation vector.
pub const CORRELATION_VECTOR_HEADER: &str = "ms-cv";

/// What to do once the correlation vector cannot advance any further.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Draw a fresh random base and restart the extension at `0`.
    #[default]
    Rebase,
    /// Refuse further sends with [`CorrelationError::Overflow`].
    ///
    /// The last representable value is never sent: a send whose vector cannot
    /// be advanced fails before any network I/O.
    Fail,
}

/// Decorates a [`Transport`] with MS-CV correlation and a fixed identity header.
#[derive(Debug)]
pub struct InstrumentedTransport<T> {
    inner: T,
    vector: Mutex<CorrelationVector>,
    identity: HeaderValue,
    overflow_policy: OverflowPolicy,
}

impl InstrumentedTransport<ReqwestTransport> {
    /// Builds a reqwest transport (proxy, certificate policy, timeout) and wraps it.
    pub fn from_config(config: &TransportConfig) -> Result<Self, BuildError> {
        let transport = ReqwestTransport::from_config(config)?;
        Self::new(transport, &config.identity)
    }
}

impl<T: Transport> InstrumentedTransport<T> {
    /// Wraps `inner` with a freshly initialized correlation vector.
    pub fn new(inner: T, identity: &str) -> Result<Self, BuildError> {
        let vector = CorrelationVector::initialize()?;
        Self::with_vector(inner, identity, vector)
    }

    /// Wraps `inner`, continuing from a caller-supplied vector.
    ///
    /// Uses [`OverflowPolicy::Rebase`], so the vector's limits must fit a
    /// generated base.
    pub fn with_vector(
        inner: T,
        identity: &str,
        vector: CorrelationVector,
    ) -> Result<Self, BuildError> {
        Self::with_policy(inner, identity, vector, OverflowPolicy::default())
    }

    /// Wraps `inner` with a caller-supplied vector and overflow policy.
    ///
    /// Fails with [`BuildError::RebaseUnsupported`] when `policy` is
    /// [`OverflowPolicy::Rebase`] and the vector's `max_length` cannot hold a
    /// generated base plus `.0`.
    pub fn with_policy(
        inner: T,
        identity: &str,
        vector: CorrelationVector,
        policy: OverflowPolicy,
    ) -> Result<Self, BuildError> {
        let identity = HeaderValue::from_str(identity)
            .map_err(|_| BuildError::InvalidIdentity(identity.to_string()))?;
        check_policy(&vector, policy)?;
        debug!(base = %vector.base(), ?policy, "correlation vector initialized");
        Ok(Self {
            inner,
            vector: Mutex::new(vector),
            identity,
            overflow_policy: policy,
        })
    }

    /// Switches the overflow policy, under the same checks as [`Self::with_policy`].
    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Result<Self, BuildError> {
        check_policy(&self.lock_vector(), policy)?;
        self.overflow_policy = policy;
        Ok(self)
    }

    /// Stamps the correlation and identity headers and sends `request`.
    ///
    /// The vector advances exactly once per call whether or not the wrapped
    /// transport succeeds. Transport failures come back as
    /// [`SendError::Transport`] without modification.
    pub async fn send(
        &self,
        mut request: Request,
        cancel: CancellationToken,
    ) -> Result<Response, SendError<T::Error>> {
        let vector = self.next_vector()?;
        stamp_headers(request.headers_mut(), &vector, &self.identity)?;
        debug!(
            method = %request.method(),
            url = %request.url(),
            ms_cv = %vector,
            "sending request"
        );
        self.inner
            .send(request, cancel)
            .await
            .map_err(SendError::Transport)
    }

    /// [`Self::send`] without cancellation.
    pub async fn execute(&self, request: Request) -> Result<Response, SendError<T::Error>> {
        self.send(request, CancellationToken::new()).await
    }

    /// The value the next request will carry.
    #[must_use]
    pub fn current_vector(&self) -> String {
        self.lock_vector().value()
    }

    #[must_use]
    pub fn identity(&self) -> &HeaderValue {
        &self.identity
    }

    #[must_use]
    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow_policy
    }

    /// The wrapped transport.
    #[must_use]
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Reads the current value and advances past it in one critical section.
    fn next_vector(&self) -> Result<String, CorrelationError> {
        let mut vector = self.lock_vector();
        let value = vector.value();
        if let Err(err) = vector.advance() {
            match self.overflow_policy {
                OverflowPolicy::Fail => return Err(err),
                OverflowPolicy::Rebase => {
                    warn!(error = %err, "correlation vector exhausted, drawing a new base");
                    vector.reinitialize()?;
                }
            }
        }
        Ok(value)
    }

    // The critical section cannot leave the vector half-updated, so a poisoned
    // lock still holds a usable value.
    fn lock_vector(&self) -> std::sync::MutexGuard<'_, CorrelationVector> {
        self.vector.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_policy(vector: &CorrelationVector, policy: OverflowPolicy) -> Result<(), BuildError> {
    let limits = vector.limits();
    if policy == OverflowPolicy::Rebase && !limits.fits_generated_base() {
        return Err(BuildError::RebaseUnsupported {
            max_length: limits.max_length,
            required: GENERATED_BASE_LEN + 2,
        });
    }
    Ok(())
}

fn stamp_headers(
    headers: &mut HeaderMap,
    vector: &str,
    identity: &HeaderValue,
) -> Result<(), CorrelationError> {
    match headers.entry(CORRELATION_VECTOR_HEADER) {
        Entry::Vacant(entry) => {
            let value = HeaderValue::from_str(vector)
                .map_err(|_| CorrelationError::InvalidBase(vector.to_string()))?;
            entry.insert(value);
        }
        Entry::Occupied(entry) => {
            debug!(
                caller = ?entry.get(),
                skipped = %vector,
                "request already carries MS-CV, keeping caller value"
            );
        }
    }
    headers
        .entry(USER_AGENT)
        .or_insert_with(|| identity.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::VectorLimits;
    use async_trait::async_trait;
    use reqwest::{Method, Url};
    use std::collections::HashSet;
    use std::sync::Arc;
    use thiserror::Error;
    use tracing_test::traced_test;

    #[derive(Debug, Error)]
    #[error("connection reset by peer")]
    struct ConnectionReset;

    /// Records every request it sees and answers (or fails) on demand.
    #[derive(Default)]
    struct RecordingTransport {
        seen: Mutex<Vec<HeaderMap>>,
        fail: bool,
    }

    impl RecordingTransport {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn seen(&self) -> Vec<HeaderMap> {
            self.seen.lock().expect("lock").clone()
        }

        fn vectors(&self) -> Vec<String> {
            self.seen()
                .iter()
                .map(|headers| {
                    headers
                        .get(CORRELATION_VECTOR_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .expect("MS-CV present")
                        .to_string()
                })
                .collect()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        type Error = ConnectionReset;

        async fn send(
            &self,
            request: Request,
            _cancel: CancellationToken,
        ) -> Result<Response, Self::Error> {
            self.seen
                .lock()
                .expect("lock")
                .push(request.headers().clone());
            if self.fail {
                return Err(ConnectionReset);
            }
            Ok(Response::from(http::Response::new("ok")))
        }
    }

    /// Waits for cancellation, then reports whether it saw it.
    struct CancellationWaiter;

    #[derive(Debug, Error)]
    #[error("cancelled")]
    struct Cancelled;

    #[async_trait]
    impl Transport for CancellationWaiter {
        type Error = Cancelled;

        async fn send(
            &self,
            _request: Request,
            cancel: CancellationToken,
        ) -> Result<Response, Self::Error> {
            cancel.cancelled().await;
            Err(Cancelled)
        }
    }

    fn request() -> Request {
        Request::new(
            Method::GET,
            Url::parse("https://storeedgefd.dsx.mp.microsoft.com/v9.0/products").expect("url"),
        )
    }

    fn seeded<T: Transport>(inner: T) -> InstrumentedTransport<T> {
        let vector = CorrelationVector::with_base("ABC.1").expect("valid base");
        InstrumentedTransport::with_vector(inner, "StoreLib", vector).expect("builds")
    }

    #[tokio::test]
    async fn stamps_and_advances_vector() {
        let transport = seeded(RecordingTransport::default());
        assert_eq!(transport.current_vector(), "ABC.1.0");

        for _ in 0..3 {
            transport.execute(request()).await.expect("send succeeds");
        }

        let seen = transport.inner().seen();
        assert_eq!(transport.inner().vectors(), ["ABC.1.0", "ABC.1.1", "ABC.1.2"]);
        for headers in &seen {
            assert_eq!(headers.get(USER_AGENT).expect("identity"), "StoreLib");
            assert_eq!(headers.get_all(CORRELATION_VECTOR_HEADER).iter().count(), 1);
        }
        assert_eq!(transport.current_vector(), "ABC.1.3");
    }

    #[tokio::test]
    async fn failures_pass_through_and_still_consume_vector() {
        let transport = seeded(RecordingTransport::failing());

        let first = transport.execute(request()).await;
        let second = transport.execute(request()).await;

        assert!(matches!(first, Err(SendError::Transport(ConnectionReset))));
        assert!(matches!(second, Err(SendError::Transport(ConnectionReset))));
        assert_eq!(transport.inner().vectors(), ["ABC.1.0", "ABC.1.1"]);
        for headers in transport.inner().seen() {
            assert!(headers.contains_key(USER_AGENT));
        }
    }

    #[tokio::test]
    async fn caller_headers_take_precedence() {
        let transport = seeded(RecordingTransport::default());
        let mut caller = request();
        caller
            .headers_mut()
            .insert(CORRELATION_VECTOR_HEADER, HeaderValue::from_static("upstream.7"));
        caller
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static("Custom/1.0"));

        transport.execute(caller).await.expect("send succeeds");
        transport.execute(request()).await.expect("send succeeds");

        let seen = transport.inner().seen();
        assert_eq!(seen[0].get_all(CORRELATION_VECTOR_HEADER).iter().count(), 1);
        assert_eq!(seen[0].get(USER_AGENT).expect("ua"), "Custom/1.0");
        // the caller's send still consumed ABC.1.0
        assert_eq!(transport.inner().vectors(), ["upstream.7", "ABC.1.1"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_never_share_a_vector() {
        const SENDS: usize = 64;
        let transport = Arc::new(
            InstrumentedTransport::new(RecordingTransport::default(), "StoreLib")
                .expect("builds"),
        );

        let handles: Vec<_> = (0..SENDS)
            .map(|_| {
                let transport = Arc::clone(&transport);
                tokio::spawn(async move { transport.execute(request()).await.map(|_| ()) })
            })
            .collect();
        for handle in handles {
            handle.await.expect("task").expect("send succeeds");
        }

        let vectors = transport.inner().vectors();
        assert_eq!(vectors.len(), SENDS);
        assert_eq!(vectors.iter().collect::<HashSet<_>>().len(), SENDS);
    }

    #[tokio::test]
    async fn cancellation_reaches_inner_transport() {
        let transport = seeded(CancellationWaiter);
        let cancel = CancellationToken::new();
        let send = transport.send(request(), cancel.clone());
        cancel.cancel();

        assert!(matches!(send.await, Err(SendError::Transport(Cancelled))));
        assert_eq!(transport.current_vector(), "ABC.1.1");
    }

    #[tokio::test]
    #[traced_test]
    async fn exhausted_vector_rebases_by_default() {
        let limits = VectorLimits {
            max_segment_value: 1,
            max_length: 25,
        };
        let base = "A".repeat(20);
        let vector = CorrelationVector::with_limits(base.clone(), limits).expect("valid base");
        let transport =
            InstrumentedTransport::with_vector(RecordingTransport::default(), "StoreLib", vector)
                .expect("builds");

        for _ in 0..5 {
            transport.execute(request()).await.expect("send succeeds");
        }

        let vectors = transport.inner().vectors();
        let expected: Vec<String> = [".0", ".1", ".1.0", ".1.1"]
            .iter()
            .map(|suffix| format!("{base}{suffix}"))
            .collect();
        assert_eq!(vectors[..4], expected[..]);
        assert!(vectors[4].ends_with(".0"));
        assert!(!vectors[4].starts_with(&base));
        assert!(vectors.iter().all(|v| v.len() <= 25));
        assert!(logs_contain("correlation vector exhausted"));
    }

    #[tokio::test]
    async fn exhausted_vector_fails_under_fail_policy() {
        let limits = VectorLimits {
            max_segment_value: 1,
            max_length: 4,
        };
        let vector = CorrelationVector::with_limits("AB", limits).expect("valid base");
        let transport = InstrumentedTransport::with_policy(
            RecordingTransport::default(),
            "StoreLib",
            vector,
            OverflowPolicy::Fail,
        )
        .expect("builds");

        transport.execute(request()).await.expect("send succeeds");
        let result = transport.execute(request()).await;

        assert!(matches!(
            result,
            Err(SendError::Correlation(CorrelationError::Overflow { .. }))
        ));
        // the refused request never reached the wire
        assert_eq!(transport.inner().vectors(), ["AB.0"]);
    }

    #[test]
    fn rebase_requires_room_for_a_generated_base() {
        let limits = VectorLimits {
            max_segment_value: 1,
            max_length: 6,
        };
        let vector = CorrelationVector::with_limits("AB", limits).expect("valid base");

        let result = InstrumentedTransport::with_vector(
            RecordingTransport::default(),
            "StoreLib",
            vector.clone(),
        );
        assert!(matches!(
            result,
            Err(BuildError::RebaseUnsupported {
                max_length: 6,
                required: 24,
            })
        ));

        let failing = InstrumentedTransport::with_policy(
            RecordingTransport::default(),
            "StoreLib",
            vector,
            OverflowPolicy::Fail,
        )
        .expect("builds");
        assert!(matches!(
            failing.with_overflow_policy(OverflowPolicy::Rebase),
            Err(BuildError::RebaseUnsupported { .. })
        ));
    }

    #[tokio::test]
    async fn rebase_keeps_sending_after_repeated_exhaustion() {
        let limits = VectorLimits {
            max_segment_value: 1,
            max_length: GENERATED_BASE_LEN + 2,
        };
        let base = "A".repeat(GENERATED_BASE_LEN - 2);
        let vector = CorrelationVector::with_limits(base.clone(), limits).expect("valid base");
        let transport =
            InstrumentedTransport::with_vector(RecordingTransport::default(), "StoreLib", vector)
                .expect("builds");

        // the seeded base yields four values, every generated one two
        for _ in 0..10 {
            transport.execute(request()).await.expect("send succeeds");
        }

        let vectors = transport.inner().vectors();
        assert!(vectors[..4].iter().all(|v| v.starts_with(&base)));
        let rebased = &vectors[4..];
        assert!(rebased
            .iter()
            .all(|v| v.len() == GENERATED_BASE_LEN + 2 && !v.starts_with(&base)));
        let bases: HashSet<_> = rebased.iter().map(|v| &v[..GENERATED_BASE_LEN]).collect();
        assert_eq!(bases.len(), 3);
        assert_eq!(vectors.iter().collect::<HashSet<_>>().len(), vectors.len());
    }

    #[test]
    fn rejects_invalid_identity() {
        let result = InstrumentedTransport::new(RecordingTransport::default(), "bad\nagent");
        assert!(matches!(result, Err(BuildError::InvalidIdentity(_))));
    }
}
