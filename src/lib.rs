#![forbid(unsafe_code)]

//! Building blocks for the personal video site backend: the image proxy, the
//! cover extractor, and the catalog stores the HTTP handlers are wired to.

pub mod catalog;
pub mod config;
pub mod error;
pub mod extract;
pub mod http;
pub mod placeholder;
pub mod proxy;
pub mod security;
pub mod store;
