// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for the control-plane API.
///
/// Subsystems return structured errors; this enum is the only place they are
/// mapped to HTTP status codes and the standard `{"error","code"}` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiError {
    Unauthorized,
    Forbidden,
    ForbiddenScope,
    NotFound,
    InvalidRequest,
    Conflict,
    RequestTooLarge,
    RateLimited,
    ServiceUnavailable,
    BadGateway,
    Timeout,
    Internal,
}

impl ApiError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::Forbidden | Self::ForbiddenScope => 403,
            Self::NotFound => 404,
            Self::InvalidRequest => 400,
            Self::Conflict => 409,
            Self::RequestTooLarge => 413,
            Self::RateLimited => 429,
            Self::ServiceUnavailable => 503,
            Self::BadGateway => 502,
            Self::Timeout => 504,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::ForbiddenScope => "forbidden_scope",
            Self::NotFound => "not_found",
            Self::InvalidRequest => "invalid_request",
            Self::Conflict => "conflict",
            Self::RequestTooLarge => "request_too_large",
            Self::RateLimited => "rate_limited",
            Self::ServiceUnavailable => "service_unavailable",
            Self::BadGateway => "bad_gateway",
            Self::Timeout => "timeout",
            Self::Internal => "internal_error",
        }
    }

    pub fn to_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { error: message.into(), code: self.as_str().to_owned() }
    }

    pub fn to_response(&self, message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_body(message)))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard error body: explanatory message plus a machine-readable code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}
