//! Make a single JSON-RPC call over TCP.
//!
//! [`Params`] turns command-line tokens (or stdin) into a payload,
//! [`Client`] carries it to the server and back, and [`render`] lays out the reply.

pub mod client;
pub mod jsonrpc_types;
pub mod params;
pub mod render;

pub use client::{encode_request, CallError, Client};
pub use jsonrpc_types::{Dialect, Id, Reply};
pub use params::{Arg, Params, ParamsError};
