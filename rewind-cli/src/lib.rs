//! Library target for the `rewind` package.
//!
//! The deliverable of this package is the `rewind` CLI binary
//! (`src/main.rs`). The library re-exports the engine so doc tests can run
//! with `cargo test -p rewind --doc`.

#[doc(hidden)]
pub use rewind_engine;
