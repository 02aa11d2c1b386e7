//! Command-line front end for the tessel scripting engine
//!
//! `tessel run` loads script files into a console object backed by an
//! in-memory world and reads commands from stdin.

pub mod console;
pub mod logging;
pub mod reload;
pub mod scanner;
pub mod sources;
