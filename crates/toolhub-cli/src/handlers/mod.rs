//! Command handlers.
//!
//! Each handler takes the composed [`CliContext`](crate::CliContext) (except
//! `validate`, which never connects) and prints to stdout.

pub mod call;
pub mod list;
pub mod read;
pub mod validate;
pub mod watch;
