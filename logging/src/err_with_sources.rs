use std::error::Error;
use std::fmt;

/// Formats an error together with its full `source()` chain, one `caused by:` per level.
pub struct ErrorWithSources<'a> {
    error: &'a dyn Error,
}

impl<'a> ErrorWithSources<'a> {
    pub fn new(error: &'a dyn Error) -> Self {
        Self { error }
    }
}

impl fmt::Display for ErrorWithSources<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut source = self.error.source();
        while let Some(err) = source {
            write!(f, ", caused by: {err}")?;
            source = err.source();
        }

        Ok(())
    }
}

/// Shorthand for [`ErrorWithSources::new`].
pub fn err_with_src(error: &dyn Error) -> ErrorWithSources<'_> {
    ErrorWithSources::new(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(thiserror::Error, Debug)]
    #[error("inner")]
    struct Inner;

    #[derive(thiserror::Error, Debug)]
    #[error("outer")]
    struct Outer(#[source] Inner);

    #[test]
    fn chains_sources() {
        let err = Outer(Inner);

        assert_eq!(err_with_src(&err).to_string(), "outer, caused by: inner");
    }
}
