//! Convenient re-exports of commonly used data types, designed to make crate usage painless.
//!
//! The contents of this module can be used by including the following in any module:
//! ```
//! use korok_aamp::prelude::*;
//! ```

pub use crate::{Name, Parameter, ParameterIO, ParameterList, ParameterObject};

pub mod aamp {
    pub use crate::names;
    pub use crate::types::{Color, Curve, ParamType, Quat, Vec2, Vec3, Vec4};
    pub use crate::{Error, MAGIC, MAX_DEPTH, VERSION};
}
