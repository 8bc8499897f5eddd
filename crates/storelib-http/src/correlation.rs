// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Correlation vector (MS-CV) generation.
//!
//! A correlation vector is a stable base identifier followed by a dotted
//! extension path:
//!
//! ```text
//! tul4NUsfs9Cl7mOfN/dupsl.0     first request
//! tul4NUsfs9Cl7mOfN/dupsl.1     second request
//! ABC.1.0                       extension of an inbound vector "ABC.1"
//! ```
//!
//! # Advancing
//!
//! Every advance yields an extension strictly greater than the previous one
//! under lexicographic order over the segment sequence, where a strict prefix
//! orders before its extensions:
//!
//! 1. If the last segment is below [`VectorLimits::max_segment_value`] it is incremented.
//! 2. Otherwise a new `0` segment is appended (`ABC.<max>` becomes `ABC.<max>.0`).
//! 3. If the result would be longer than [`VectorLimits::max_length`] the vector is
//!   left untouched and [`CorrelationError::Overflow`] is returned.
//!
//! Values never wrap, so a vector never repeats itself.

use std::fmt;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};

use crate::error::CorrelationError;

/// Maximum length of a rendered vector (the v2 correlation vector ceiling).
pub const DEFAULT_MAX_LENGTH: usize = 127;

/// Random bytes drawn for a generated base.
const BASE_BYTES: usize = 16;

/// Length of a generated base: [`BASE_BYTES`] in unpadded base64.
pub const GENERATED_BASE_LEN: usize = 22;

/// Bounds applied when advancing a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorLimits {
    /// Largest value a single segment may hold before a new segment is started.
    pub max_segment_value: u32,
    /// Longest permitted string form, base and dots included.
    pub max_length: usize,
}

impl VectorLimits {
    /// Whether a generated base followed by `.0` fits within `max_length`.
    #[must_use]
    pub fn fits_generated_base(&self) -> bool {
        self.max_length >= GENERATED_BASE_LEN + 2
    }
}

impl Default for VectorLimits {
    fn default() -> Self {
        Self {
            max_segment_value: u32::MAX,
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

/// The mutable dotted suffix of a correlation vector. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Extension(Vec<u32>);

impl Extension {
    fn initial() -> Self {
        Self(vec![0])
    }

    /// Segments from outermost to innermost.
    #[must_use]
    pub fn segments(&self) -> &[u32] {
        &self.0
    }

    fn successor(&self, max_segment_value: u32) -> Self {
        let mut segments = self.0.clone();
        match segments.last_mut() {
            Some(last) if *last < max_segment_value => *last += 1,
            _ => segments.push(0),
        }
        Self(segments)
    }

    /// Length of the dotted rendering.
    fn rendered_len(&self) -> usize {
        let digits: usize = self
            .0
            .iter()
            .map(|segment| segment.checked_ilog10().map_or(1, |d| d as usize + 1))
            .sum();
        digits + self.0.len().saturating_sub(1)
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut segments = self.0.iter();
        if let Some(first) = segments.next() {
            write!(f, "{first}")?;
        }
        for segment in segments {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

/// A correlation vector: fixed base plus advancing extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationVector {
    base: String,
    extension: Extension,
    limits: VectorLimits,
}

impl CorrelationVector {
    /// Creates a vector with a fresh random base drawn from the OS RNG.
    ///
    /// Fails with [`CorrelationError::Entropy`] when the RNG is unavailable.
    pub fn initialize() -> Result<Self, CorrelationError> {
        Self::from_rng(&mut OsRng, VectorLimits::default())
    }

    /// Creates a vector with a random base drawn from `rng`.
    ///
    /// `limits.max_length` must leave room for the 22 character base plus `.0`.
    pub fn from_rng<R>(rng: &mut R, limits: VectorLimits) -> Result<Self, CorrelationError>
    where
        R: RngCore + ?Sized,
    {
        let base = random_base(rng)?;
        Self::with_limits(base, limits)
    }

    /// Extends an existing base, e.g. a vector received from an upstream caller.
    ///
    /// ```
    /// use storelib_http::correlation::CorrelationVector;
    ///
    /// let vector = CorrelationVector::with_base("ABC.1").unwrap();
    /// assert_eq!(vector.value(), "ABC.1.0");
    /// ```
    pub fn with_base(base: impl Into<String>) -> Result<Self, CorrelationError> {
        Self::with_limits(base, VectorLimits::default())
    }

    /// Extends an existing base under explicit limits.
    pub fn with_limits(
        base: impl Into<String>,
        limits: VectorLimits,
    ) -> Result<Self, CorrelationError> {
        let base = base.into();
        if !is_valid_base(&base, limits.max_length) {
            return Err(CorrelationError::InvalidBase(base));
        }
        Ok(Self {
            base,
            extension: Extension::initial(),
            limits,
        })
    }

    /// Replaces the base with a fresh random one and resets the extension.
    ///
    /// Only meant for construction and overflow recovery: values produced under
    /// the previous base are not remembered.
    pub fn reinitialize(&mut self) -> Result<(), CorrelationError> {
        let base = random_base(&mut OsRng)?;
        if !is_valid_base(&base, self.limits.max_length) {
            return Err(CorrelationError::InvalidBase(base));
        }
        self.base = base;
        self.extension = Extension::initial();
        Ok(())
    }

    /// The current string form, `base.extension`.
    #[must_use]
    pub fn value(&self) -> String {
        format!("{}.{}", self.base, self.extension)
    }

    /// Moves the extension to its successor.
    ///
    /// On [`CorrelationError::Overflow`] the vector is left unchanged.
    pub fn advance(&mut self) -> Result<(), CorrelationError> {
        let next = self.extension.successor(self.limits.max_segment_value);
        if self.rendered_len(&next) > self.limits.max_length {
            return Err(CorrelationError::Overflow {
                value: self.value(),
                max_length: self.limits.max_length,
            });
        }
        self.extension = next;
        Ok(())
    }

    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    #[must_use]
    pub fn extension(&self) -> &Extension {
        &self.extension
    }

    #[must_use]
    pub fn limits(&self) -> VectorLimits {
        self.limits
    }

    fn rendered_len(&self, extension: &Extension) -> usize {
        self.base.len() + 1 + extension.rendered_len()
    }
}

impl fmt::Display for CorrelationVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.base, self.extension)
    }
}

fn random_base<R>(rng: &mut R) -> Result<String, CorrelationError>
where
    R: RngCore + ?Sized,
{
    let mut bytes = [0_u8; BASE_BYTES];
    rng.try_fill_bytes(&mut bytes)
        .map_err(|e| CorrelationError::Entropy(e.to_string()))?;
    Ok(STANDARD_NO_PAD.encode(bytes))
}

/// A base must render as header-safe text and leave room for `.0`.
fn is_valid_base(base: &str, max_length: usize) -> bool {
    !base.is_empty()
        && base.len() + 2 <= max_length
        && !base.starts_with('.')
        && !base.ends_with('.')
        && base.bytes().all(|b| b.is_ascii_graphic())
}
