//! Terminal output helpers.

mod tables;

pub use tables::{print_separator, print_server_table, status_label, truncate_string};
