use std::io::ErrorKind;

use crate::error::AcceptError;

/// Which kind of resource ran out when an accept failed with a descriptor limit error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhaustion {
    /// Per-process file descriptor limit (`EMFILE`).
    Process,
    /// System-wide file table limit (`ENFILE`).
    System,
}

impl Exhaustion {
    /// Human-readable explanation used in error logs.
    #[must_use]
    pub fn explain(self) -> &'static str {
        match self {
            Exhaustion::Process => {
                "the process has reached its open file descriptor limit (EMFILE); raise `ulimit -n` or reduce load"
            }
            Exhaustion::System => {
                "the system-wide open file table is full (ENFILE); raise `fs.file-max` or reduce load"
            }
        }
    }
}

/// Classification of an I/O error as seen by an acceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The listening socket is closed: stop cleanly.
    Closed,
    /// Connection aborted mid-accept or handshake aborted: accept again right away.
    Transient,
    /// File descriptor limits reached: back off.
    Exhausted(Exhaustion),
    /// Client-side noise (peer reset or closed, health-check probes): drop the connection silently.
    Quiet,
    /// Anything else.
    Fatal,
}

/// Classify an error returned from accept submission, accept completion, socket tuning or connection hand-off.
///
/// This is a pure function of the error value. The acceptor decides what each class means in a given context:
/// `Quiet` only applies to tuning and hand-off failures, while for accept completions it is handled as `Fatal`.
#[must_use]
pub fn classify(e: &std::io::Error) -> ErrorClass {
    if let Some(inner) = e.get_ref().and_then(|x| x.downcast_ref::<AcceptError>()) {
        return match inner {
            AcceptError::ListenerClosed => ErrorClass::Closed,
            AcceptError::HandshakeAborted => ErrorClass::Transient,
        };
    }

    if let Some(x) = e.raw_os_error().and_then(exhaustion_from_errno) {
        return ErrorClass::Exhausted(x);
    }

    match e.kind() {
        ErrorKind::ConnectionAborted => ErrorClass::Transient,
        ErrorKind::ConnectionReset
        | ErrorKind::NotConnected
        | ErrorKind::InvalidInput
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => ErrorClass::Quiet,
        _ => ErrorClass::Fatal,
    }
}

#[cfg(unix)]
fn exhaustion_from_errno(code: i32) -> Option<Exhaustion> {
    use nix::errno::Errno;
    match Errno::from_i32(code) {
        Errno::EMFILE => Some(Exhaustion::Process),
        Errno::ENFILE => Some(Exhaustion::System),
        _ => None,
    }
}

#[cfg(windows)]
fn exhaustion_from_errno(code: i32) -> Option<Exhaustion> {
    // WSAEMFILE; Winsock has no system-wide counterpart
    if code == 10024 {
        Some(Exhaustion::Process)
    } else {
        None
    }
}

#[cfg(not(any(unix, windows)))]
fn exhaustion_from_errno(_code: i32) -> Option<Exhaustion> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn closed_listener_is_closed() {
        let e: io::Error = AcceptError::ListenerClosed.into();
        assert_eq!(classify(&e), ErrorClass::Closed);
    }

    #[test]
    fn aborts_are_transient() {
        let e: io::Error = AcceptError::HandshakeAborted.into();
        assert_eq!(classify(&e), ErrorClass::Transient);
        let e = io::Error::from(ErrorKind::ConnectionAborted);
        assert_eq!(classify(&e), ErrorClass::Transient);
    }

    #[cfg(unix)]
    #[test]
    fn descriptor_limits_are_exhaustion() {
        let e = io::Error::from_raw_os_error(nix::errno::Errno::EMFILE as i32);
        assert_eq!(classify(&e), ErrorClass::Exhausted(Exhaustion::Process));
        let e = io::Error::from_raw_os_error(nix::errno::Errno::ENFILE as i32);
        assert_eq!(classify(&e), ErrorClass::Exhausted(Exhaustion::System));
    }

    #[cfg(unix)]
    #[test]
    fn os_level_client_errors_are_quiet() {
        for errno in [
            nix::errno::Errno::ECONNRESET,
            nix::errno::Errno::ENOTCONN,
            nix::errno::Errno::EINVAL,
        ] {
            let e = io::Error::from_raw_os_error(errno as i32);
            assert_eq!(classify(&e), ErrorClass::Quiet, "{errno:?}");
        }
    }

    #[test]
    fn client_kinds_are_quiet() {
        for kind in [
            ErrorKind::ConnectionReset,
            ErrorKind::NotConnected,
            ErrorKind::InvalidInput,
            ErrorKind::BrokenPipe,
            ErrorKind::UnexpectedEof,
        ] {
            assert_eq!(classify(&io::Error::from(kind)), ErrorClass::Quiet, "{kind:?}");
        }
    }

    #[test]
    fn everything_else_is_fatal() {
        assert_eq!(classify(&io::Error::from(ErrorKind::PermissionDenied)), ErrorClass::Fatal);
        assert_eq!(classify(&io::Error::new(ErrorKind::Other, "boom")), ErrorClass::Fatal);
        let e = io::Error::new(ErrorKind::Other, crate::error::StatsError::Unavailable);
        assert_eq!(classify(&e), ErrorClass::Fatal);
    }
}
