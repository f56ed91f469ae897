//! Terminal output helpers

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

use rb_bridge::tunnel::TunnelStatus;
use rb_core::ConnectionStatus;

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow with a warning symbol prefix
pub fn print_warning(msg: &str) {
    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan with an info symbol prefix
pub fn print_info(msg: &str) {
    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Human-readable line for a connection status
pub fn format_connection_status(status: ConnectionStatus, address: &str) -> String {
    match status {
        ConnectionStatus::Connected => format!("Connected to {}", address),
        ConnectionStatus::Failed => format!(
            "Could not reach {}. Check the address and that the service is running",
            address
        ),
        ConnectionStatus::Disconnected => format!("Not connected to {}", address),
    }
}

/// Human-readable line for a tunnel status
pub fn format_tunnel_status(status: &TunnelStatus) -> String {
    match status {
        TunnelStatus::Active => "Tunnel active (outbound and inbound forwarding)".to_string(),
        TunnelStatus::Inactive => "Tunnel inactive".to_string(),
        TunnelStatus::Error(message) => format!("Tunnel error: {}", message),
    }
}
