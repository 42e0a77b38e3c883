/// `tokio-acceptor`-specific accept errors, to be packed in [`std::io::Error::other`].
///
/// [`crate::classify()`] recognizes these when they arrive as accept completions or submission failures.
#[derive(Debug)]
#[non_exhaustive]
pub enum AcceptError {
    /// The listening socket was closed. Acceptors treat this as a clean stop.
    ListenerClosed,

    /// A handshake layered into accept (e.g. TLS) was aborted by the peer before the connection was established.
    ///
    /// Acceptors retry immediately.
    HandshakeAborted,
}

impl std::error::Error for AcceptError {}

impl std::fmt::Display for AcceptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcceptError::ListenerClosed => write!(f, "tokio-acceptor: listening socket is closed"),
            AcceptError::HandshakeAborted => {
                write!(f, "tokio-acceptor: handshake aborted before accept completed")
            }
        }
    }
}

impl AcceptError {
    pub(crate) fn to_io<T>(self) -> Result<T, std::io::Error> {
        Err(self.into())
    }
}

impl From<AcceptError> for std::io::Error {
    fn from(e: AcceptError) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, e)
    }
}

/// Failures of [`crate::AcceptorHandle`] control calls, to be packed in [`std::io::Error::other`].
#[derive(Debug)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum ControlError {
    /// The acceptor has already stopped and cannot receive control requests.
    AcceptorStopped,

    /// The request could not be queued within the control timeout.
    Timeout { millis: u128 },
}

impl std::error::Error for ControlError {}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlError::AcceptorStopped => write!(f, "tokio-acceptor: acceptor is not running"),
            ControlError::Timeout { millis } => {
                write!(f, "tokio-acceptor: control request not queued within {millis} ms")
            }
        }
    }
}

impl ControlError {
    pub(crate) fn to_io<T>(self) -> Result<T, std::io::Error> {
        Err(std::io::Error::new(std::io::ErrorKind::Other, self))
    }
}

/// Statistics sink failure, to be packed in [`std::io::Error::other`].
#[derive(Debug)]
#[non_exhaustive]
pub enum StatsError {
    /// The sink no longer accepts updates (e.g. its owning pool is shutting down).
    Unavailable,
}

impl std::error::Error for StatsError {}

impl std::fmt::Display for StatsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatsError::Unavailable => write!(f, "tokio-acceptor: statistics sink is unavailable"),
        }
    }
}

impl StatsError {
    /// Pack this error into [`std::io::Error`] and return it as `Err`.
    pub fn to_io<T>(self) -> Result<T, std::io::Error> {
        Err(std::io::Error::new(std::io::ErrorKind::Other, self))
    }
}

/// `tokio-acceptor`-specific bind errors, to be packed in [`std::io::Error::other`].
#[derive(Debug)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum BindError {
    /// Binding failed because of support of specified address type was not enabled at compile time.
    MissingCompileTimeFeature { reason: &'static str, feature: &'static str },

    /// Binding failed because of support of specified address type is not available on this platform
    MissingPlatformSupport { reason: &'static str, feature: &'static str },

    /// There is some invalid value in [`crate::AcceptorOptions`]
    InvalidOption { name: &'static str },
}

impl std::error::Error for BindError {}

impl std::fmt::Display for BindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindError::MissingCompileTimeFeature { reason, feature } => write!(f, "tokio-acceptor: cannot {reason} because of {feature} was not enabled at compile time"),
            BindError::MissingPlatformSupport { reason, feature } => write!(f, "tokio-acceptor: cannot {reason} because of it is not a {feature}"),
            BindError::InvalidOption { name } => write!(f, "tokio-acceptor: invalid value for option {name}"),
        }
    }
}

impl BindError {
    pub(crate) fn to_io<T>(self) -> Result<T, std::io::Error> {
        Err(std::io::Error::new(std::io::ErrorKind::Other, self))
    }
}
