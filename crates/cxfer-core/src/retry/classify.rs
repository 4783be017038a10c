//! Classify HTTP-like status codes and transport failures into an [`ErrorClass`].

use crate::retry::policy::ErrorClass;

/// Classify a response status. Returns `None` for success (1xx-3xx).
pub fn classify_status(code: u16) -> Option<ErrorClass> {
    match code {
        400..=499 => Some(ErrorClass::Client(code)),
        500..=599 => Some(ErrorClass::Server(code)),
        0..=399 => None,
        // Anything outside the HTTP range is a broken response.
        _ => Some(ErrorClass::Server(code)),
    }
}

/// Classify a libcurl error.
pub fn classify_curl_error(e: &curl::Error) -> ErrorClass {
    if e.is_aborted_by_callback() {
        return ErrorClass::Aborted;
    }
    if e.is_operation_timedout() {
        return ErrorClass::Timeout;
    }
    ErrorClass::Network
}

/// Classify an I/O error raised while talking to the remote side.
pub fn classify_io_error(e: &std::io::Error) -> ErrorClass {
    use std::io::ErrorKind as K;
    match e.kind() {
        K::TimedOut | K::WouldBlock => ErrorClass::Timeout,
        K::Interrupted => ErrorClass::Aborted,
        _ => ErrorClass::Network,
    }
}
