//! Error plumbing shared by the workspace crates.
//!
//! - [`Location`] is captured implicitly by snafu error variants and provided
//!   through the generic member access API.
//! - [`Report`] renders an error together with its cause chain and the
//!   location of every link, in a form that fits a log record.

#![feature(error_generic_member_access)]
#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use core::{
    error::{self, Error},
    fmt,
};

use snafu::GenerateImplicitData;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location(&'static core::panic::Location<'static>);

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self(core::panic::Location::caller())
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Renders an error and its cause chain.
///
/// `Display` produces a single line (`error (at loc): cause (at loc)`),
/// suitable for log records. `Debug` produces the multi-line form with one
/// cause per line.
pub struct Report<E> {
    error: E,
}

impl<E> fmt::Debug for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", self.error)?;
        if let Some(loc) = error::request_ref::<Location>(&self.error) {
            writeln!(f, "  at {loc}")?;
        }
        let mut source = self.error.source();
        if source.is_some() {
            writeln!(f)?;
            writeln!(f, "Caused by:")?;
        }
        let mut index = 0;
        while let Some(s) = source {
            writeln!(f, "{index:4}: {s}")?;
            if let Some(loc) = error::request_ref::<Location>(s) {
                writeln!(f, "      at {loc}")?;
            }
            source = s.source();
            index += 1;
        }
        Ok(())
    }
}

impl<E> fmt::Display for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut current: Option<&dyn Error> = Some(&self.error);
        let mut first = true;
        while let Some(e) = current {
            if !first {
                write!(f, ": ")?;
            }
            write!(f, "{e}")?;
            if let Some(loc) = error::request_ref::<Location>(e) {
                write!(f, " (at {loc})")?;
            }
            current = e.source();
            first = false;
        }
        Ok(())
    }
}

impl<E> Report<E> {
    pub fn new(error: E) -> Self {
        Self { error }
    }
}
