//! Mapping of SDK, HTTP and identifier failures to [`TransportError`].

use std::str::FromStr;
use std::time::{Duration, SystemTime};

use matrix_sdk::ruma::api::client::error::{ErrorKind, RetryAfter};
use matrix_sdk::ruma::IdParseError;
use matrix_sdk::HttpError;
use relay_core::TransportError;
use reqwest::StatusCode;
use serde::Deserialize;

pub const LIMIT_EXCEEDED: &str = "M_LIMIT_EXCEEDED";
pub const INVALID_PARAM: &str = "M_INVALID_PARAM";

/// Standard Matrix error body, read from responses the SDK does not handle (whoami).
#[derive(Debug, Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    errcode: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    retry_after_ms: Option<u64>,
}

/// Builds the error for a non-2xx response. 429 and `M_LIMIT_EXCEEDED` become `RateLimited`.
pub fn error_from_response(status: StatusCode, body: &str) -> TransportError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS || parsed.errcode.as_deref() == Some(LIMIT_EXCEEDED) {
        return TransportError::RateLimited {
            retry_after: parsed.retry_after_ms.map(Duration::from_millis),
        };
    }

    TransportError::Protocol {
        errcode: parsed
            .errcode
            .unwrap_or_else(|| format!("HTTP_{}", status.as_u16())),
        message: parsed
            .error
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string()),
    }
}

/// Maps a client-server API error. `kind` is `None` when the body was not a Matrix error.
pub fn error_from_kind(status: u16, kind: Option<&ErrorKind>, message: String) -> TransportError {
    match kind {
        Some(ErrorKind::LimitExceeded { retry_after, .. }) => TransportError::RateLimited {
            retry_after: retry_after.as_ref().and_then(retry_delay),
        },
        _ if status == StatusCode::TOO_MANY_REQUESTS.as_u16() => {
            TransportError::RateLimited { retry_after: None }
        }
        Some(kind) => TransportError::Protocol {
            errcode: kind.errcode().to_string(),
            message,
        },
        None => TransportError::Protocol {
            errcode: format!("HTTP_{}", status),
            message,
        },
    }
}

fn retry_delay(retry_after: &RetryAfter) -> Option<Duration> {
    match retry_after {
        RetryAfter::Delay(delay) => Some(*delay),
        RetryAfter::DateTime(at) => at.duration_since(SystemTime::now()).ok(),
    }
}

/// Errors from raw requests sent through the SDK client.
pub fn from_http_error(err: &HttpError) -> TransportError {
    if let Some(api) = err.as_client_api_error() {
        return error_from_kind(
            api.status_code.as_u16(),
            err.client_api_error_kind(),
            err.to_string(),
        );
    }
    match err {
        HttpError::Reqwest(e) => TransportError::Network(e.to_string()),
        other => TransportError::InvalidResponse(other.to_string()),
    }
}

/// Errors from high-level SDK calls (login, join, session restore).
pub fn from_sdk_error(err: &matrix_sdk::Error) -> TransportError {
    match err {
        matrix_sdk::Error::Http(http) => from_http_error(http),
        other => match other.client_api_error_kind() {
            Some(kind) => error_from_kind(0, Some(kind), other.to_string()),
            None => TransportError::InvalidResponse(other.to_string()),
        },
    }
}

pub(crate) fn network_error(err: reqwest::Error) -> TransportError {
    if err.is_decode() {
        TransportError::InvalidResponse(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

/// Parses a room, user, alias or event id; malformed input is rejected like the server would.
pub(crate) fn parse_id<T>(value: &str) -> Result<T, TransportError>
where
    T: FromStr<Err = IdParseError>,
{
    value
        .trim()
        .parse()
        .map_err(|e: IdParseError| TransportError::Protocol {
            errcode: INVALID_PARAM.to_string(),
            message: format!("invalid identifier {:?}: {}", value, e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_sdk::ruma::{OwnedRoomAliasId, OwnedRoomId};

    #[test]
    fn test_429_is_rate_limited_with_hint() {
        let err = error_from_response(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"errcode":"M_LIMIT_EXCEEDED","error":"Too many requests","retry_after_ms":2000}"#,
        );
        assert_eq!(
            err,
            TransportError::RateLimited {
                retry_after: Some(Duration::from_millis(2000))
            }
        );
    }

    #[test]
    fn test_limit_exceeded_errcode_without_429() {
        let err = error_from_response(StatusCode::BAD_REQUEST, r#"{"errcode":"M_LIMIT_EXCEEDED"}"#);
        assert_eq!(err, TransportError::RateLimited { retry_after: None });
    }

    #[test]
    fn test_non_json_body() {
        let err = error_from_response(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert_eq!(
            err,
            TransportError::Protocol {
                errcode: "HTTP_502".to_string(),
                message: "Bad Gateway".to_string()
            }
        );
    }

    #[test]
    fn test_limit_exceeded_kind_keeps_server_delay() {
        let kind = ErrorKind::LimitExceeded {
            retry_after: Some(RetryAfter::Delay(Duration::from_millis(1500))),
        };
        assert_eq!(
            error_from_kind(429, Some(&kind), "slow down".to_string()),
            TransportError::RateLimited {
                retry_after: Some(Duration::from_millis(1500))
            }
        );
    }

    #[test]
    fn test_429_without_matrix_body_is_rate_limited() {
        assert_eq!(
            error_from_kind(429, None, "Too Many Requests".to_string()),
            TransportError::RateLimited { retry_after: None }
        );
    }

    #[test]
    fn test_other_kinds_carry_errcode() {
        let err = error_from_kind(404, Some(&ErrorKind::NotFound), "no such alias".to_string());
        assert_eq!(
            err,
            TransportError::Protocol {
                errcode: "M_NOT_FOUND".to_string(),
                message: "no such alias".to_string()
            }
        );
        assert!(matches!(
            error_from_kind(502, None, "Bad Gateway".to_string()),
            TransportError::Protocol { errcode, .. } if errcode == "HTTP_502"
        ));
    }

    #[test]
    fn test_parse_id_rejects_malformed_ids() {
        let room: OwnedRoomId = parse_id(" !abc:x ").unwrap();
        assert_eq!(room.as_str(), "!abc:x");

        let err = parse_id::<OwnedRoomAliasId>("support").unwrap_err();
        assert!(matches!(err, TransportError::Protocol { errcode, .. } if errcode == INVALID_PARAM));
    }
}
