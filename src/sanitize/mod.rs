//! Config Sanitization
//!
//! Removes the embedded Lua directive blocks that gixy cannot parse from an
//! `nginx -T` dump before it is handed to the scanner.

pub mod lines;
pub mod stripper;

pub use lines::split_lines;
pub use stripper::{BlockStripper, ScanState, StripStats, DEFAULT_DIRECTIVES};
