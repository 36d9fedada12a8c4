//! Walkthrough program for the event channel.
//!
//! `cli` parses the command line; `demo` drives a channel through
//! subscribe, send and unsubscribe while printing what each handler sees.

pub mod cli;
pub mod demo;
