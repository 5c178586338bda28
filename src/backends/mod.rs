//! Demo backend implementations. Concrete container/VM command wrappers are
//! out of scope (spec.md §1); these exist to exercise the pipeline end to
//! end and as a template for real backends.

pub mod local;
pub mod local_provider;

#[cfg(any(test, feature = "testing"))]
pub mod mock;
