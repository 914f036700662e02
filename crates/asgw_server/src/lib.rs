//! HTTP-facing layer of the gateway.
//!
//! [`transport`] decodes raw requests (binary or plain query strings,
//! binary, XML or rfc822 bodies) and encodes responses, including
//! multipart frames. [`dispatch::Dispatcher`] authenticates the caller
//! and routes each command to its handler.
//!
//! The crate is transport-agnostic: callers hand in a [`RawRequest`]
//! built from whatever HTTP server they embed, and get back an
//! [`HttpResponse`] to write out.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod transport;

pub use config::ServerConfig;
pub use dispatch::{CommandHandler, Context, Dispatcher, HttpResponse, Outcome};
pub use error::{ServerError, ServerResult};
pub use transport::{DecodedRequest, EncodedResponse, RawRequest};
