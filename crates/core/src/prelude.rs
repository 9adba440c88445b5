//! Convenient re-exports of commonly used data types, designed to make crate usage painless.
//!
//! The contents of this module can be used by including the following in any module:
//! ```
//! use korok_core::prelude::*;
//! ```

#[doc(inline)]
pub use crate::data::{align_up, DataCursor, DataWriter, Endian};

/// Contains [`data::Error`], which is used in Results returned by [`DataCursor`] and
/// [`DataWriter`].
pub mod data {
    pub use crate::data::Error;
}

pub mod yaml {
    pub use crate::yaml::{Error, Map, Mark, Node, Scalar, Seq};
}
