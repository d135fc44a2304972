//! httpfromtcp - HTTP/1.1 over raw TCP streams
//!
//! This crate implements HTTP/1.1 request parsing and response writing
//! directly on top of byte streams, plus a small thread-per-connection
//! server that drives them.

pub mod http;
pub mod shutdown;
