//! Token usage accounting and rate-limit header parsing.
//!
//! [`Usage`] accumulates across the steps of a run; providers must surface
//! input, output, and total tokens. Rate-limit headers are parsed
//! opportunistically from the standard `x-ratelimit-*` family, with room
//! for caller-supplied extractors for providers that use custom names.

use std::collections::HashMap;
use std::ops::{Add, AddAssign};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Token usage reported by a model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the request (prompt + tools + history).
    pub input_tokens: u64,
    /// Tokens generated by the model.
    pub output_tokens: u64,
    /// Total billed tokens.
    pub total_tokens: u64,
}

impl Usage {
    /// Create a usage record; `total_tokens` is derived.
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// The zero usage record.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
        }
    }

    /// Whether no tokens have been recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total_tokens == 0
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Rate-limit state parsed from response headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Request quota for the current window.
    pub limit_requests: Option<u64>,
    /// Requests remaining in the current window.
    pub remaining_requests: Option<u64>,
    /// Token quota for the current window.
    pub limit_tokens: Option<u64>,
    /// Tokens remaining in the current window.
    pub remaining_tokens: Option<u64>,
    /// Time until the window resets.
    pub reset_after: Option<Duration>,
}

impl RateLimitInfo {
    /// Whether any field was populated.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.limit_requests.is_none()
            && self.remaining_requests.is_none()
            && self.limit_tokens.is_none()
            && self.remaining_tokens.is_none()
            && self.reset_after.is_none()
    }
}

/// A caller-supplied extractor for providers with non-standard headers.
pub type RateLimitExtractor = fn(&HashMap<String, String>) -> Option<RateLimitInfo>;

fn header_u64(headers: &HashMap<String, String>, name: &str) -> Option<u64> {
    headers.get(name).and_then(|v| v.trim().parse().ok())
}

/// Seconds with optional fractional part, or a bare `Ns`/`Nms` suffix.
fn parse_reset(value: &str) -> Option<Duration> {
    let v = value.trim();
    if let Some(ms) = v.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    let v = v.strip_suffix('s').unwrap_or(v);
    v.trim().parse::<f64>().ok().map(Duration::from_secs_f64)
}

/// Parse the standard `x-ratelimit-*` header family.
///
/// Returns `None` when no recognized header is present.
#[must_use]
pub fn parse_rate_limit_headers(headers: &HashMap<String, String>) -> Option<RateLimitInfo> {
    let info = RateLimitInfo {
        limit_requests: header_u64(headers, "x-ratelimit-limit-requests"),
        remaining_requests: header_u64(headers, "x-ratelimit-remaining-requests"),
        limit_tokens: header_u64(headers, "x-ratelimit-limit-tokens"),
        remaining_tokens: header_u64(headers, "x-ratelimit-remaining-tokens"),
        reset_after: headers
            .get("x-ratelimit-reset-requests")
            .or_else(|| headers.get("x-ratelimit-reset-tokens"))
            .and_then(|v| parse_reset(v)),
    };
    (!info.is_empty()).then_some(info)
}

/// Parse with the standard family first, then each custom extractor in order.
#[must_use]
pub fn parse_rate_limit_with(
    headers: &HashMap<String, String>,
    extractors: &[RateLimitExtractor],
) -> Option<RateLimitInfo> {
    parse_rate_limit_headers(headers)
        .or_else(|| extractors.iter().find_map(|extract| extract(headers)))
}
