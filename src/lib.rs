//! HTTP front end that looks up a video's progressive streams and proxies
//! one of them back to the caller as an attachment.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod rate_limit;
pub mod resolver;
pub mod server;
pub mod transfer;
pub mod validation;
