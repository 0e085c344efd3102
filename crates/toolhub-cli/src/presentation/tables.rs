//! Table formatting utilities for CLI output.

use toolhub_core::{ConnectionStatus, McpServer};

/// Truncates a string to a maximum number of characters, adding "..." if needed.
///
/// # Examples
///
/// ```rust
/// use toolhub_cli::presentation::truncate_string;
///
/// assert_eq!(truncate_string("Hello", 10), "Hello");
/// assert_eq!(truncate_string("Hello World", 8), "Hello...");
/// ```
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Print a horizontal separator line.
pub fn print_separator(width: usize) {
    println!("{}", "-".repeat(width));
}

pub fn status_label(server: &McpServer) -> &'static str {
    if server.disabled {
        return "disabled";
    }
    match server.status {
        ConnectionStatus::Connecting => "connecting",
        ConnectionStatus::Connected => "connected",
        ConnectionStatus::Disconnected => "disconnected",
    }
}

/// Print one row per server followed by its last error line, if any.
pub fn print_server_table(servers: &[McpServer]) {
    println!(
        "{:<24} {:<8} {:<13} {:>5} {:>9}  Error",
        "Name", "Scope", "Status", "Tools", "Resources"
    );
    print_separator(80);

    for server in servers {
        let last_error = server.error.lines().last().unwrap_or("");
        println!(
            "{:<24} {:<8} {:<13} {:>5} {:>9}  {}",
            truncate_string(&server.name, 23),
            server.source,
            status_label(server),
            server.tools.len(),
            server.resources.len(),
            truncate_string(last_error, 40),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolhub_core::Scope;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_string("héllo wörld", 8), "héllo...");
        assert_eq!(truncate_string("", 3), "");
    }

    #[test]
    fn test_disabled_wins_over_status() {
        let mut server = McpServer::connecting("a", Scope::Global);
        assert_eq!(status_label(&server), "connecting");
        server.status = ConnectionStatus::Connected;
        server.disabled = true;
        assert_eq!(status_label(&server), "disabled");
    }
}
