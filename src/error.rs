//! Error types and result definitions for the streaming-insert pipeline.
//!
//! Provides an error system with classification and captured diagnostic metadata.
//! The [`StreamError`] type supports single errors, errors with additional detail,
//! and multiple aggregated errors for complex failure scenarios.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use crate::config::ValidationError;

/// Convenient result type for pipeline operations using [`StreamError`] as the error type.
pub type StreamResult<T> = Result<T, StreamError>;

/// Detailed payload stored for single [`StreamError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for streaming-insert operations.
///
/// [`StreamError`] can represent a single classified error or multiple aggregated
/// errors. The design allows for rich error information while maintaining ergonomic
/// usage patterns.
#[derive(Debug, Clone)]
pub struct StreamError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors.
    ///
    /// This variant is mainly useful to capture multiple worker failures.
    Many {
        errors: Vec<StreamError>,
        location: &'static Location<'static>,
    },
}

/// Specific categories of errors that can occur in the pipeline.
///
/// This enum provides granular error classification to enable appropriate error
/// handling strategies.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Invalid configuration values, detected at construction time.
    ConfigError,
    /// A row was enqueued after the pool was closed.
    PoolClosed,
    /// The insert endpoint could not be reached or returned no per-row outcome.
    /// The whole batch is retriable.
    TransportError,
    /// The endpoint rejected one or more rows as malformed. Not retriable.
    RowValidationError,
    /// A batch exhausted its retry budget. Terminal.
    RetriesExhausted,
    /// The shutdown grace period expired with the batch still pending. Terminal.
    ShutdownAbandoned,
    /// A background worker task panicked.
    WorkerPanic,
    /// An operation was attempted in a state that does not allow it.
    InvalidState,
    /// A payload could not be serialized for the wire.
    SerializationError,
    /// Unknown / uncategorized.
    Unknown,
}

impl StreamError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    ///
    /// For single errors, returns a vector with one element. For multiple errors,
    /// returns a flattened vector of all error kinds.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// The stored source is preserved across clones and exposed via [`error::Error::source`].
    /// Has no effect when called on aggregated errors because aggregates forward the first
    /// contained error as their source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    /// Creates a [`StreamError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        let location = Location::caller();
        let backtrace = Arc::new(Backtrace::capture());

        StreamError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location,
                backtrace,
            }),
        }
    }
}

impl PartialEq for StreamError {
    fn eq(&self, other: &StreamError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (
                ErrorRepr::Many {
                    errors: errors_a, ..
                },
                ErrorRepr::Many {
                    errors: errors_b, ..
                },
            ) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  Detail: {detail}")?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = format!("{error}");
                    for (line_index, line) in rendered.lines().enumerate() {
                        if line_index == 0 {
                            write!(f, "\n  {}. {}", index + 1, line)?;
                        } else {
                            write!(f, "\n     {line}")?;
                        }
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for StreamError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            // For aggregated errors, we forward the first contained error as the source.
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Creates a [`StreamError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for StreamError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> StreamError {
        StreamError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`StreamError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for StreamError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> StreamError {
        StreamError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Creates a [`StreamError`] from a vector of errors for aggregation.
///
/// If the vector contains exactly one error, returns that error directly without
/// wrapping it in the aggregated variant.
impl<E> From<Vec<E>> for StreamError
where
    E: Into<StreamError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> StreamError {
        let location = Location::caller();

        let mut errors: Vec<StreamError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            return errors.pop().expect("just checked length is 1");
        }

        StreamError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts [`ValidationError`] to [`StreamError`] with [`ErrorKind::ConfigError`].
impl From<ValidationError> for StreamError {
    #[track_caller]
    fn from(err: ValidationError) -> StreamError {
        let detail = err.to_string();
        let source = Arc::new(err);
        StreamError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Invalid streamer configuration"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`serde_json::Error`] to [`StreamError`] with [`ErrorKind::SerializationError`].
impl From<serde_json::Error> for StreamError {
    #[track_caller]
    fn from(err: serde_json::Error) -> StreamError {
        let detail = err.to_string();
        let source = Arc::new(err);
        StreamError::from_components(
            ErrorKind::SerializationError,
            Cow::Borrowed("JSON serialization failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`reqwest::Error`] to [`StreamError`] with [`ErrorKind::TransportError`].
///
/// Connection failures, timeouts and protocol errors all map to a transport-level
/// failure, which makes the whole in-flight batch retriable.
#[cfg(feature = "http")]
impl From<reqwest::Error> for StreamError {
    #[track_caller]
    fn from(err: reqwest::Error) -> StreamError {
        let detail = err.to_string();
        let source = Arc::new(err);
        StreamError::from_components(
            ErrorKind::TransportError,
            Cow::Borrowed("HTTP request to insert endpoint failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}
