use reqwest::{Response, StatusCode};

/// Error reported by one of the platform services in a non-success response.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl BackendError {
    /// Classify a failed response. The auth, REST and storage services all use
    /// slightly different JSON error shapes, so the message is looked up by key.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
        let field = |key: &str| {
            parsed
                .as_ref()
                .and_then(|v| v.get(key))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let code = field("code");
        let message = field("message")
            .or_else(|| field("msg"))
            .or_else(|| field("error_description"))
            .or_else(|| field("error"))
            .unwrap_or_else(|| body.trim().to_string());

        // PGRST116: a single-object request matched zero rows.
        if code.as_deref() == Some("PGRST116") {
            return BackendError::NotFound(message);
        }
        // 23505: unique violation, e.g. favoriting a post twice.
        if code.as_deref() == Some("23505") {
            return BackendError::Conflict(message);
        }

        // Grant failures from the auth service: bad password, or a refresh
        // token that was revoked, rotated away or never existed.
        let grant_rejected = field("error").as_deref() == Some("invalid_grant")
            || matches!(
                field("error_code").as_deref(),
                Some(
                    "invalid_credentials"
                        | "refresh_token_not_found"
                        | "refresh_token_already_used"
                        | "session_not_found"
                )
            );
        if grant_rejected {
            return BackendError::Unauthorized {
                status: status.as_u16(),
                message,
            };
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized {
                status: status.as_u16(),
                message,
            },
            StatusCode::NOT_FOUND => BackendError::NotFound(message),
            StatusCode::CONFLICT => BackendError::Conflict(message),
            _ => BackendError::Rejected {
                status: status.as_u16(),
                message,
            },
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, BackendError::Unauthorized { .. })
    }
}

/// Pass a successful response through, or turn the error body into a `BackendError`.
pub async fn check(resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::from_response(status, &body))
}

/// True when anywhere in the chain the platform rejected our credentials.
pub fn is_unauthorized(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<BackendError>())
        .any(BackendError::is_unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_rest_single_row_miss_is_not_found() {
        let body = r#"{"code":"PGRST116","details":"The result contains 0 rows","hint":null,"message":"JSON object requested, multiple (or no) rows returned"}"#;
        let err = BackendError::from_response(StatusCode::NOT_ACCEPTABLE, body);
        assert!(matches!(err, BackendError::NotFound(_)));
    }

    #[test]
    fn test_auth_error_message_is_extracted() {
        let body = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
        let err = BackendError::from_response(StatusCode::BAD_REQUEST, body);
        match err {
            BackendError::Unauthorized { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid login credentials");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_dead_refresh_token_is_unauthorized() {
        let body = r#"{"code":400,"error_code":"refresh_token_not_found","msg":"Invalid Refresh Token: Refresh Token Not Found"}"#;
        let err: anyhow::Result<()> =
            Err(BackendError::from_response(StatusCode::BAD_REQUEST, body)).context("token refresh failed");
        let err = err.unwrap_err();
        assert!(is_unauthorized(&err));
        assert!(format!("{:#}", err).contains("Refresh Token Not Found"));
    }

    #[test]
    fn test_other_bad_requests_stay_rejected() {
        let body = r#"{"code":"22P02","message":"invalid input syntax for type uuid"}"#;
        let err = BackendError::from_response(StatusCode::BAD_REQUEST, body);
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn test_unique_violation_is_conflict() {
        let body = r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#;
        let err = BackendError::from_response(StatusCode::CONFLICT, body);
        assert!(matches!(err, BackendError::Conflict(_)));
    }

    #[test]
    fn test_plain_text_body_kept_as_message() {
        let err = BackendError::from_response(StatusCode::BAD_GATEWAY, "upstream down\n");
        assert_eq!(err.to_string(), "request rejected (502): upstream down");
    }

    #[test]
    fn test_unauthorized_detected_through_context() {
        let err: anyhow::Result<()> = Err(BackendError::Unauthorized {
            status: 401,
            message: "JWT expired".to_string(),
        })
        .context("GET posts failed");
        assert!(is_unauthorized(&err.unwrap_err()));
    }
}
