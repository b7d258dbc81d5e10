//! Error types and result definitions for the training data pipeline.
//!
//! Provides an error system with classification, aggregation, and captured diagnostic
//! metadata for pipeline operations. The [`FeedError`] type supports single errors,
//! errors with additional detail, and multiple aggregated errors for multi-worker
//! failure scenarios.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for pipeline operations using [`FeedError`] as the error type.
///
/// This type alias reduces boilerplate when working with fallible pipeline operations.
/// Most functions in this crate return this type.
pub type FeedResult<T> = Result<T, FeedError>;

/// Detailed payload stored for single [`FeedError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

impl ErrorPayload {
    /// Creates a new payload with optional dynamic detail.
    fn new(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
        location: &'static Location<'static>,
        backtrace: Arc<Backtrace>,
    ) -> Self {
        Self {
            kind,
            description,
            detail,
            source,
            location,
            backtrace,
        }
    }
}

/// Main error type for pipeline operations.
///
/// [`FeedError`] can represent single errors, errors with additional detail, or multiple
/// aggregated errors. The design allows for rich error information while maintaining
/// ergonomic usage patterns.
#[derive(Debug, Clone)]
pub struct FeedError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
///
/// This enum supports different error patterns while maintaining a unified interface.
/// Users should not interact with this type directly but use [`FeedError`] methods instead.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors.
    ///
    /// This variant is mainly useful to capture multiple worker failures.
    Many {
        errors: Vec<FeedError>,
        location: &'static Location<'static>,
    },
}

/// Specific categories of errors that can occur during pipeline operations.
///
/// This enum provides granular error classification to enable appropriate error handling
/// strategies. The crucial distinction is between expected shutdown control flow
/// ([`ErrorKind::QueueClosed`]) and genuine data faults, which must never be conflated.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Shutdown control flow
    /// A blocked queue operation unblocked because the queue was closed. Expected
    /// during shutdown; workers absorb this quietly instead of reporting it.
    QueueClosed,

    // Configuration & capacity errors
    ConfigError,
    InvalidQueueConfig,

    // Data faults
    InvalidBatchShape,
    InvalidBoxCoordinates,
    TransformFailed,
    SourceError,

    // Pipeline state errors
    PipelineStarved,
    InvalidState,
    IngestWorkerPanic,
    AugmentWorkerPanic,

    // IO & serialization errors
    IoError,
    DeserializationError,

    // Unknown / uncategorized
    Unknown,
}

impl FeedError {
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

    /// Returns `true` if this error is expected shutdown control flow rather than a fault.
    pub fn is_shutdown(&self) -> bool {
        self.kind() == ErrorKind::QueueClosed
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
        self.set_source(Some(Arc::new(source)));
        self
    }

    /// Creates a [`FeedError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        let location = Location::caller();
        let backtrace = Arc::new(Backtrace::capture());

        FeedError {
            repr: ErrorRepr::Single(ErrorPayload::new(
                kind,
                description,
                detail,
                source,
                location,
                backtrace,
            )),
        }
    }

    /// Sets the source for this [`FeedError`].
    fn set_source(&mut self, source: Option<Arc<dyn error::Error + Send + Sync>>) {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = source;
        }
    }
}

impl PartialEq for FeedError {
    fn eq(&self, other: &FeedError) -> bool {
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

impl fmt::Display for FeedError {
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

                if errors.is_empty() {
                    write!(f, "\n  (no inner errors provided)")?;
                } else {
                    for (index, error) in errors.iter().enumerate() {
                        let rendered = format!("{error}");
                        let mut lines = rendered.lines();
                        if let Some(first_line) = lines.next() {
                            write!(f, "\n  {}. {}", index + 1, first_line)?;
                        } else {
                            write!(f, "\n  {}.", index + 1)?;
                        }

                        for line in lines {
                            if line.is_empty() {
                                write!(f, "\n     ")?;
                            } else {
                                write!(f, "\n     {line}")?;
                            }
                        }
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for FeedError {
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

/// Creates a [`FeedError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for FeedError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> FeedError {
        FeedError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`FeedError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for FeedError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> FeedError {
        FeedError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Creates a [`FeedError`] from a vector of errors for aggregation.
///
/// If the vector contains exactly one error, returns that error directly without wrapping
/// it in the [`ErrorRepr::Many`] variant.
impl<E> From<Vec<E>> for FeedError
where
    E: Into<FeedError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> FeedError {
        let location = Location::caller();

        let mut errors: Vec<FeedError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            return errors.pop().expect("just checked length is 1");
        }

        FeedError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts [`std::io::Error`] to [`FeedError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for FeedError {
    #[track_caller]
    fn from(err: std::io::Error) -> FeedError {
        let detail = err.to_string();
        let source = Arc::new(err);
        FeedError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`serde_json::Error`] to [`FeedError`] with the appropriate error kind.
///
/// Maps I/O failures to [`ErrorKind::IoError`] and everything else to
/// [`ErrorKind::DeserializationError`] based on error classification.
impl From<serde_json::Error> for FeedError {
    #[track_caller]
    fn from(err: serde_json::Error) -> FeedError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            _ => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        let source = Arc::new(err);
        FeedError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}
