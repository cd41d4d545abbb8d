/// The error kinds the core distinguishes (per the error handling design).
///
/// None of these propagate past the component boundary that produced them:
/// subscriber, lane-worker, and periodic-timer failures are caught and
/// logged at that boundary. Only the public lifecycle operations
/// (`start`, `stop`, `initialize`) return booleans reflecting aggregate
/// success.
#[derive(Clone)]
pub enum AppError {
    /// Configuration or path is structurally invalid. Never retried automatically.
    Validation(String),
    /// A connection could not be established or was lost.
    Transport(String),
    /// A payload failed to decode; the message is dropped, not retried.
    Decode(String),
    /// The auto-mapper returned a below-threshold score or a disallowed topic.
    Mapping {
        message: String,
        suggestions: Vec<String>,
    },
    /// The persistence layer rejected a write.
    Store(String),
    /// A downstream send failed. Change-detection state must not be updated on failure.
    Publish(String),
    /// Cooperative shutdown — never a fatal condition.
    Cancelled,
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn mapping(msg: impl Into<String>, suggestions: Vec<String>) -> Self {
        AppError::Mapping {
            message: msg.into(),
            suggestions,
        }
    }

    /// Whether this kind is subject to the bounded retry policy (Store: 3
    /// attempts with backoff on contention; Transport: the connection's
    /// configured reconnection policy).
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Store(_) | AppError::Transport(_))
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "validation error: {msg}"),
            AppError::Transport(msg) => write!(f, "transport error: {msg}"),
            AppError::Decode(msg) => write!(f, "decode error: {msg}"),
            AppError::Mapping { message, .. } => write!(f, "mapping error: {message}"),
            AppError::Store(msg) => write!(f, "store error: {msg}"),
            AppError::Publish(msg) => write!(f, "publish error: {msg}"),
            AppError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for AppError {}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Decode(err.to_string())
    }
}

/// Generate `From<E> for AppError` implementations that map error types to
/// a specific `AppError` variant, e.g.:
///
/// ```ignore
/// r2e_core::map_error! {
///     sqlx::Error => Store,
///     std::io::Error => Transport,
/// }
/// ```
#[macro_export]
macro_rules! map_error {
    ( $( $err_ty:ty => $variant:ident ),* $(,)? ) => {
        $(
            impl From<$err_ty> for $crate::AppError {
                fn from(err: $err_ty) -> Self {
                    $crate::AppError::$variant(err.to_string())
                }
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_transport_are_retryable() {
        assert!(AppError::Store("x".into()).is_retryable());
        assert!(AppError::Transport("x".into()).is_retryable());
        assert!(!AppError::Decode("x".into()).is_retryable());
        assert!(!AppError::Cancelled.is_retryable());
    }

    #[test]
    fn display_includes_message() {
        let e = AppError::mapping("below threshold", vec!["Acme/Plant1".into()]);
        assert!(e.to_string().contains("below threshold"));
    }
}
