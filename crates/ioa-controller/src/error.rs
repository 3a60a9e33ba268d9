use std::borrow::Cow;

/// All possible error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A thing identifier cannot be matched to any thing in the current
    /// registry snapshot.
    NotFound,
    /// The registry is unreachable or the request timed out.
    Transport,
    /// The registry answered with a non-success status code.
    Status,
    /// A registry response body is not the expected JSON document.
    JsonResponse,
    /// The update channel of a thing cannot be opened.
    Subscription,
    /// The text-generation channel failed to produce a completion.
    Generation,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::NotFound => "Not Found",
            Self::Transport => "Transport",
            Self::Status => "Status",
            Self::JsonResponse => "Json Response",
            Self::Subscription => "Subscription",
            Self::Generation => "Generation",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// A controller error.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    info: Cow<'static, str>,
}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[must_use]
    pub fn new(kind: ErrorKind, info: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            info: info.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    #[inline]
    pub fn info(&self) -> &str {
        &self.info
    }

    pub(crate) fn not_found(info: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::NotFound, info)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.info)
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_status() {
            ErrorKind::Status
        } else if e.is_decode() {
            ErrorKind::JsonResponse
        } else {
            ErrorKind::Transport
        };
        Self::new(kind, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::JsonResponse, e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::new(ErrorKind::Subscription, e.to_string())
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
