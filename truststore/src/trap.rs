//! Recovery of fatal failures
//!
//! The certificate engine reports failure by unwinding instead of returning an
//! error. [`trap`] is the one place where such unwinds are caught and turned
//! back into values, so a library call never takes the host process down.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use thiserror::Error;
use truststore_engine::EngineError;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A fatal failure caught by [`trap`]
#[derive(Debug, Error)]
#[error("{message}")]
pub struct Trapped {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl Trapped {
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The engine error carried by the failure, if any.
    pub fn engine_error(&self) -> Option<&EngineError> {
        self.source.as_deref()?.downcast_ref::<EngineError>()
    }

    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<EngineError>() {
            Ok(err) => return Self::from_error(*err),
            Err(other) => other,
        };
        let payload = match payload.downcast::<BoxError>() {
            Ok(err) => return Self::from_error(*err),
            Err(other) => other,
        };
        let payload = match payload.downcast::<String>() {
            Ok(message) => {
                return Self {
                    message: *message,
                    source: None,
                };
            }
            Err(other) => other,
        };
        match payload.downcast::<&'static str>() {
            Ok(message) => Self {
                message: (*message).to_string(),
                source: None,
            },
            Err(other) => Self {
                message: format!("caught panic: {:?}", other),
                source: None,
            },
        }
    }

    fn from_error(err: impl Into<BoxError>) -> Self {
        let err = err.into();
        Self {
            message: err.to_string().trim_end().to_string(),
            source: Some(err),
        }
    }
}

/// Run `f`, converting any unwind raised inside it into a [`Trapped`] error.
///
/// - an [`EngineError`] or boxed error payload becomes the error source
/// - a string payload becomes the message
/// - any other payload is described as a caught panic
///
/// State touched by `f` may be left half-updated when it fails; callers only
/// pass work whose effects are written once at the end.
pub fn trap<T>(f: impl FnOnce() -> T) -> Result<T, Trapped> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let trapped = Trapped::from_payload(payload);
        tracing::debug!("trapped fatal failure: {}", trapped.message);
        trapped
    })
}
