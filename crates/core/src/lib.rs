//! This crate is the utilities library shared by the korok format crates.
//!
//! * [`data`] holds the endian-aware cursor and writer every binary codec is
//!   built on.
//! * [`yaml`] holds the tag-preserving YAML subset used for the textual
//!   projections of BYML and AAMP.

pub mod data;
pub mod yaml;

pub mod prelude;
