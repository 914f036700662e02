//! # asgw document model
//!
//! Hierarchical document trees for ActiveSync request and response
//! bodies, plus the codecs that move them on and off the wire.
//!
//! This crate provides:
//! - An arena-backed tree with stable [`NodeId`] handles
//! - Scoped read cursors that restore their position on exit
//! - Plain XML parse/serialize with `xmlns` normalization
//! - The [`BodyCodec`] trait and the built-in binary [`TagCodec`]

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod node;
pub mod xml;

pub use codec::{BodyCodec, TagCodec};
pub use error::{DocError, DocResult};
pub use node::{Cursor, Document, NodeId};
