//! Protocol constants for the Node Simulator
//!
//! These constants pin down the endpoint, credentials, pacing and wire
//! literals a simulated node uses when talking to the controller.

use std::time::Duration;

/// Simulator name shown in the banner
pub const SIMULATOR_NAME: &str = "Node Simulator";

/// Simulator version
pub const VERSION: &str = "0.1.0-alpha";

// ═══════════════════════════════════════════════════════════════
// Controller endpoint
// ═══════════════════════════════════════════════════════════════

/// Default controller WebSocket endpoint
pub const DEFAULT_CONTROLLER_URL: &str = "ws://localhost:8080/receptor-controller";

/// Shared secret used as the Basic auth password for every node
pub const DEFAULT_SHARED_SECRET: &str = "imapassord";

/// Prefix for node ids (`node_07`)
pub const NODE_ID_PREFIX: &str = "node_";

// ═══════════════════════════════════════════════════════════════
// Pacing
// ═══════════════════════════════════════════════════════════════

/// Pause before the first route message of a session
pub const INITIAL_SEND_DELAY: Duration = Duration::from_secs(2);

/// Lower bound (inclusive) of the gap between route messages
pub const MIN_SEND_GAP: Duration = Duration::from_millis(100);

/// Upper bound (exclusive) of the gap between route messages
pub const MAX_SEND_GAP: Duration = Duration::from_millis(1000);

// ═══════════════════════════════════════════════════════════════
// Wire literals
// ═══════════════════════════════════════════════════════════════

/// `cmd` of a route table broadcast
pub const CMD_ROUTE: &str = "ROUTE";

/// Server greeting prefix
pub const SERVER_HI_PREFIX: &str = "HI";

/// Exact server text that ends a session
pub const SERVER_CLOSE: &str = "close";

/// Expiry sent when the placeholder timestamp format is selected
pub const PLACEHOLDER_TIMESTAMP: &str = "2006-01-02T15:04:05Z07:00";

/// Trailing field of a colon-delimited route update
pub const COLON_ROUTE_SUFFIX: &str = "timestamp";

/// Edge every node advertises unless edges are configured
pub const DEFAULT_EDGE: (&str, &str, u32) = ("node-a", "node-b", 1);

pub fn print_banner() {
    println!("═══════════════════════════════════════════════════════════════");
    println!("  {} v{}", SIMULATOR_NAME, VERSION);
    println!("═══════════════════════════════════════════════════════════════");
}

/// Node id for a simulated node index
pub fn node_id_for(index: u32) -> String {
    format!("{}{}", NODE_ID_PREFIX, account_for(index))
}

/// Two-digit zero-padded account number for a simulated node index
pub fn account_for(index: u32) -> String {
    format!("{:02}", index)
}
