//! snapfile command-line tool.
//!
//! Small front end over `snapfile-store`: run a persisted counter, print a
//! snapshot, or check whether a lock is free.

pub mod cli;
pub mod commands;
