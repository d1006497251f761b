use std::error::Error;
use std::fmt;

use tracing::Level;

/// Returns `true` if backtrace printing is enabled.
///
/// # Example
///
/// ```
/// // SAFETY: Doc tests run single threaded.
/// unsafe { std::env::set_var("RUST_BACKTRACE", "full") };
/// assert!(beacon_log::backtrace_enabled());
/// ```
pub fn backtrace_enabled() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Logs an error to the configured logger or `stderr` if not yet configured.
///
/// Prefer [`beacon_log::error`](crate::error) whenever possible. This function is meant for
/// startup, where errors may occur before the logger has been initialized.
///
/// # Example
///
/// ```
/// if let Err(error) = std::env::var("BEACON_DOES_NOT_EXIST") {
///     beacon_log::ensure_error(&error);
/// }
/// ```
pub fn ensure_error<E: AsRef<dyn Error>>(error: E) {
    if tracing::event_enabled!(Level::ERROR) {
        crate::error!("{}", LogError(error.as_ref()));
    } else {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("error: {}", LogError(error.as_ref()));
        }
    }
}

/// A wrapper around an error that prints its causes.
///
/// # Example
///
/// ```
/// use beacon_log::LogError;
///
/// if let Err(error) = std::env::var("BEACON_DOES_NOT_EXIST") {
///     beacon_log::error!("env failed: {}", LogError(&error));
/// }
/// ```
pub struct LogError<'a, E: Error + ?Sized>(pub &'a E);

impl<E: Error + ?Sized> fmt::Display for LogError<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(s) = source {
            write!(f, "\n  caused by: {s}")?;
            source = s.source();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("failed to flush batch")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_log_error_prints_chain() {
        let error = Outer(std::io::Error::other("connection reset"));
        assert_eq!(
            LogError(&error).to_string(),
            "failed to flush batch\n  caused by: connection reset"
        );
    }

    #[test]
    fn test_log_error_without_source() {
        let error = std::io::Error::other("timed out");
        assert_eq!(LogError(&error).to_string(), "timed out");
    }
}
