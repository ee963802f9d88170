use axum::http::HeaderValue;
use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest caller-supplied id that is kept as-is.
pub const MAX_REQUEST_ID_LEN: usize = 64;

/// Caller id if it is short and made of `[A-Za-z0-9._:-]` only.
/// Anything else is replaced by a fresh uuid before it reaches the logs.
pub fn accepted_request_id(value: Option<&HeaderValue>) -> Option<HeaderValue> {
    let value = value?;
    let bytes = value.as_bytes();
    let well_formed = !bytes.is_empty()
        && bytes.len() <= MAX_REQUEST_ID_LEN
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'));
    well_formed.then(|| value.clone())
}

fn minted_request_id() -> HeaderValue {
    // a hyphenated uuid is always a valid header value
    HeaderValue::from_str(&Uuid::new_v4().to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
}

/// Reuse a well-formed caller `x-request-id` or mint one, and echo it on the
/// response so clients can quote it when reporting a failed job.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = match accepted_request_id(req.headers().get(REQUEST_ID_HEADER)) {
        Some(value) => value,
        None => {
            if req.headers().contains_key(REQUEST_ID_HEADER) {
                tracing::debug!("Replacing malformed x-request-id");
            }
            minted_request_id()
        }
    };

    req.headers_mut().insert(REQUEST_ID_HEADER, request_id.clone());

    let mut response = next.run(req).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, request_id);
    response
}
