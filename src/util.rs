use std::fmt::Display;

use log::error;

pub(crate) trait LogError {
    /// Log the error, if any, and pass the result through untouched.
    fn pipe_log<S: AsRef<str>, Formatter: FnOnce() -> S>(self, f: Formatter) -> Self;
}

impl<T, E: Display> LogError for Result<T, E> {
    fn pipe_log<S: AsRef<str>, Formatter: FnOnce() -> S>(self, f: Formatter) -> Self {
        if let Err(ref e) = self {
            error!("{}: {:#}", f().as_ref(), e);
        }
        self
    }
}
