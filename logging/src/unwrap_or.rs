/// Unwraps a `Result`, logging the error at `debug` level and continuing
/// instead of panicking on `Err`.
macro_rules! unwrap_or_debug {
    ($result:expr, $fmt:literal) => {
        if let Err(e) = $result {
            tracing::debug!($fmt, e);
        }
    };
}

pub(crate) use unwrap_or_debug;
