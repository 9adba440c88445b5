//! Convenient re-exports of commonly used data types, designed to make crate usage painless.
//!
//! The contents of this module can be used by including the following in any module:
//! ```
//! use korok_sarc::prelude::*;
//! ```

pub use crate::{Sarc, SarcWriter};

pub mod sarc {
    pub use crate::{hash_name, sniff_alignment, Error, File, HASH_MULTIPLIER};
}
