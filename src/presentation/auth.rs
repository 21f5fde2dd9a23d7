// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bearer authentication for the worker-facing API.
//!
//! A single shared secret covers all workers; per-worker identity is
//! self-declared in `worker_id`. The comparison is constant-time so the
//! token cannot be recovered byte-by-byte from response timing.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use super::api::{ApiError, AppState};

/// Constant-time byte equality. Runs over the full length of `a` regardless
/// of where the first mismatch occurs.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = a.len() ^ b.len();
    for (i, byte) in a.iter().enumerate() {
        diff |= (*byte ^ b.get(i).copied().unwrap_or(0)) as usize;
    }
    diff == 0
}

pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), state.auth_token.as_bytes()) => {
            next.run(request).await
        }
        _ => ApiError::Unauthorized.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_tokens() {
        assert!(constant_time_eq(b"secret", b"secret"));
    }

    #[test]
    fn test_unequal_tokens() {
        assert!(!constant_time_eq(b"secret", b"secre7"));
    }

    #[test]
    fn test_length_mismatch() {
        assert!(!constant_time_eq(b"secret", b"secret2"));
        assert!(!constant_time_eq(b"secret", b""));
        assert!(!constant_time_eq(b"", b"secret"));
    }

    #[test]
    fn test_empty_both() {
        assert!(constant_time_eq(b"", b""));
    }
}
