//! Context helpers shared by the crate-level error enums.
//!
//! A crate opts in by implementing [`FromMessage`] for its `Error` and
//! invoking [`impl_context!`] with that type. Failures then read
//! `"{context}: {cause}"`, and an empty `Option` reads as the bare context.

use std::fmt::Display;

/// Error types that can carry a plain description.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// `"{context}: {cause}"`.
pub fn with_cause(context: impl Into<String>, cause: impl Display) -> String {
    format!("{}: {cause}", context.into())
}

/// Define a crate-local `Context` trait producing `$error` from any
/// `Result<T, impl Display>` or `Option<T>`.
///
/// ```ignore
/// pipebridge_common::impl_context!(Error);
/// ```
#[macro_export]
macro_rules! impl_context {
    ($error:ty) => {
        pub trait Context<T>: Sized {
            fn with_context<C, F>(self, f: F) -> std::result::Result<T, $error>
            where
                C: Into<String>,
                F: FnOnce() -> C;

            fn context(self, context: impl Into<String>) -> std::result::Result<T, $error> {
                let context = context.into();
                self.with_context(move || context)
            }
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn with_context<C, F>(self, f: F) -> std::result::Result<T, $error>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|cause| {
                    <$error as $crate::FromMessage>::from_message($crate::error::with_cause(
                        f(),
                        cause,
                    ))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn with_context<C, F>(self, f: F) -> std::result::Result<T, $error>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <$error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    #[derive(Debug, PartialEq)]
    struct Described(String);

    impl super::FromMessage for Described {
        fn from_message(message: String) -> Self {
            Self(message)
        }
    }

    crate::impl_context!(Described);

    #[test]
    fn result_errors_keep_their_cause() {
        let res: Result<(), std::fmt::Error> = Err(std::fmt::Error);
        let err = res.context("rendering page").unwrap_err();
        assert_eq!(err, Described(format!("rendering page: {}", std::fmt::Error)));
    }

    #[test]
    fn empty_option_reads_as_context() {
        let err = None::<u8>
            .with_context(|| format!("no result for '{}'", "tools/list"))
            .unwrap_err();
        assert_eq!(err, Described("no result for 'tools/list'".into()));
        assert_eq!(Some(3).context("unused"), Ok(3));
    }
}
