//! Convenient re-exports of commonly used data types, designed to make crate usage painless.
//!
//! The contents of this module can be used by including the following in any module:
//! ```
//! use korok_byml::prelude::*;
//! ```

pub use crate::{Byml, Hash};

pub mod byml {
    pub use crate::{Error, WriteOptions, MAX_DEPTH, SUPPORTED_VERSIONS};
}
