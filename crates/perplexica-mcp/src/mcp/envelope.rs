use perplexica_core::Error;
use rmcp::model::{CallToolResult, Content};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ErrorCode {
    InvalidParams,
    NotConfigured,
    TransportFailed,
    UpstreamStatus,
    DecodeFailed,
    UnexpectedError,
}

impl ErrorCode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::NotConfigured => "not_configured",
            Self::TransportFailed => "transport_failed",
            Self::UpstreamStatus => "upstream_status",
            Self::DecodeFailed => "decode_failed",
            Self::UnexpectedError => "unexpected_error",
        }
    }

    pub(crate) fn retryable(self) -> bool {
        match self {
            Self::TransportFailed | Self::UpstreamStatus => true,
            // Input and configuration problems need a change before a retry
            // can help; a body we could not decode will not decode twice.
            Self::InvalidParams | Self::NotConfigured | Self::DecodeFailed
            | Self::UnexpectedError => false,
        }
    }

    fn hint(self) -> &'static str {
        match self {
            Self::InvalidParams => "Fix the named parameter and retry.",
            Self::NotConfigured => {
                "Check PERPLEXICA_BASE_URL and related PERPLEXICA_* environment variables."
            }
            Self::TransportFailed => {
                "Could not reach the Perplexica deployment. Verify it is running and the base URL is correct."
            }
            Self::UpstreamStatus => {
                "Perplexica answered with an error status. Check the deployment logs; the raw body is included."
            }
            Self::DecodeFailed => {
                "The response did not match the expected shape. The deployment may be a different Perplexica version."
            }
            Self::UnexpectedError => "Unexpected failure; see message.",
        }
    }
}

pub(crate) fn error_obj(
    code: ErrorCode,
    message: impl ToString,
    hint: impl ToString,
) -> serde_json::Value {
    serde_json::json!({
        "code": code.as_str(),
        "message": message.to_string(),
        "hint": hint.to_string(),
        "retryable": code.retryable(),
    })
}

/// Render a core error as a user-visible payload, preserving the upstream
/// status/body as data rather than only a formatted string.
pub(crate) fn error_payload(err: &Error) -> serde_json::Value {
    let code = match err {
        Error::InvalidRequest(_) => ErrorCode::InvalidParams,
        Error::NotConfigured(_) => ErrorCode::NotConfigured,
        Error::Transport(_) => ErrorCode::TransportFailed,
        Error::Protocol { .. } => ErrorCode::UpstreamStatus,
        Error::Decode(_) => ErrorCode::DecodeFailed,
    };
    let mut v = error_obj(code, err, code.hint());
    if let Error::Protocol { status, body } = err {
        v["status"] = serde_json::json!(status);
        v["body"] = serde_json::json!(body);
    }
    v
}

pub(crate) fn add_envelope_fields(payload: &mut serde_json::Value, kind: &str, elapsed_ms: u64) {
    payload["schema_version"] = serde_json::json!(super::SCHEMA_VERSION);
    payload["kind"] = serde_json::json!(kind);
    payload["elapsed_ms"] = serde_json::json!(elapsed_ms);
    // Keep the `request` slot stable (null or object) so clients never branch
    // on missing-vs-present.
    if payload.get("request").is_none() {
        payload["request"] = serde_json::Value::Null;
    }
}

pub(crate) fn tool_result(payload: serde_json::Value) -> CallToolResult {
    // Structured content for machine consumers, plus a text fallback for
    // clients that only read `content[0].text`.
    let mut r = CallToolResult::structured(payload.clone());
    r.content = vec![Content::text(payload.to_string())];
    r
}

pub(crate) fn text_result(text: String) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text)])
}
