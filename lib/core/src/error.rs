//! Shared error plumbing.
//!
//! Domain errors (graph validation, node execution, run failures) live next
//! to the code that raises them as plain enums. Code that crosses a layer
//! boundary, such as the runner loading a definition from disk, reports its
//! own error enum through a rootcause [`Report`].

use rootcause::Report;

/// Result carrying a rootcause report whose current context is `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug, PartialEq, Eq)]
    struct LoadFailed;

    impl fmt::Display for LoadFailed {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "load failed")
        }
    }

    impl std::error::Error for LoadFailed {}

    fn fails() -> Result<(), LoadFailed> {
        Err(LoadFailed.into())
    }

    #[test]
    fn report_keeps_typed_context() {
        let err = fails().unwrap_err();
        assert_eq!(err.current_context(), &LoadFailed);
    }
}
