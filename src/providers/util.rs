use crate::core::error::GatewayError;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retries an async read while it fails with a transport error.
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `delay_ms`: Milliseconds between retry attempts
///
/// Any other error is returned immediately.
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    retries: usize,
    delay_ms: u64,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(err) if err.is_retryable() && attempt <= retries => {
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt,
                    retries + 1,
                    err
                );
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Pulls a human-readable reason out of an error body, trying the field
/// names used by the backends we talk to.
pub fn error_message(body: &Value) -> Option<String> {
    [
        "/error/message",
        "/error_description",
        "/message",
        "/msg",
        "/error",
    ]
    .iter()
    .find_map(|pointer| body.pointer(pointer).and_then(Value::as_str))
    .map(str::to_string)
}

/// RFC 7386 merge patch: objects merge recursively, `null` deletes, and
/// anything else replaces.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retries_transport_errors_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = with_retry(
            || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(GatewayError::Transport("connection reset".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            },
            2,
            1,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<(), _> = with_retry(
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(GatewayError::Transport("down".to_string()))
                }
            },
            1,
            1,
        )
        .await;
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_other_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<(), _> = with_retry(
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(GatewayError::Validation("bad".to_string()))
                }
            },
            3,
            1,
        )
        .await;
        assert!(matches!(result, Err(GatewayError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(
            error_message(&json!({"error": {"message": "Account locked"}})).as_deref(),
            Some("Account locked")
        );
        assert_eq!(
            error_message(&json!({"error": "invalid_grant", "error_description": "Invalid login credentials"}))
                .as_deref(),
            Some("Invalid login credentials")
        );
        assert_eq!(
            error_message(&json!({"message": "JWT expired", "code": "PGRST301"})).as_deref(),
            Some("JWT expired")
        );
        assert!(error_message(&json!({"status": 500})).is_none());
    }

    #[test]
    fn test_merge_patch() {
        let mut doc = json!({"name": "Old", "address": {"city": "Anytown", "zip": "90210"}, "image_url": "x"});
        merge_patch(
            &mut doc,
            &json!({"name": "New", "address": {"city": "Springfield"}, "image_url": null}),
        );
        assert_eq!(
            doc,
            json!({"name": "New", "address": {"city": "Springfield", "zip": "90210"}})
        );
    }
}
