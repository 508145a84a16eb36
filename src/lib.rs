//! gixy-gate: strips embedded Lua blocks from `nginx -T` dumps and runs gixy
//! over what remains, either as an HTTP service or from the command line.

pub mod audit;
pub mod banner;
pub mod config;
pub mod error;
pub mod logger;
pub mod sanitize;
pub mod scanner;
pub mod server;
pub mod upload;
