use crate::constants::{
    account_for, node_id_for, DEFAULT_CONTROLLER_URL, DEFAULT_SHARED_SECRET, INITIAL_SEND_DELAY,
    MAX_SEND_GAP, MIN_SEND_GAP,
};
use crate::error::{Result, SimError};
use crate::messages::{Edge, TimestampFormat, WireFormat};
use base64::Engine as _;
use clap::Parser;
use std::ops::Range;
use std::time::Duration;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

/// Simulated nodes against a WebSocket controller
#[derive(Parser, Debug)]
#[command(name = "node-simulator")]
#[command(about = "Run one simulated node session per index in START..END", long_about = None)]
pub struct Args {
    /// First node index
    pub start: u32,

    /// Node index to stop at (exclusive)
    pub end: u32,

    /// Controller WebSocket endpoint
    #[arg(long, env = "NODE_SIM_URL", default_value = DEFAULT_CONTROLLER_URL)]
    pub url: String,

    /// Basic auth password shared by all nodes
    #[arg(long, env = "NODE_SIM_SECRET", default_value = DEFAULT_SHARED_SECRET)]
    pub secret: String,

    /// Encoding of outgoing route updates
    #[arg(long, env = "NODE_SIM_WIRE_FORMAT", value_enum, default_value_t = WireFormat::Json)]
    pub wire_format: WireFormat,

    /// Rendering of `expire_time` in HI replies
    #[arg(long, env = "NODE_SIM_TIMESTAMP", value_enum, default_value_t = TimestampFormat::Iso8601)]
    pub timestamp: TimestampFormat,

    /// Pause before the first route message
    #[arg(long, env = "NODE_SIM_INITIAL_DELAY_MS", default_value_t = INITIAL_SEND_DELAY.as_millis() as u64)]
    pub initial_delay_ms: u64,

    /// Shortest gap between route messages
    #[arg(long, default_value_t = MIN_SEND_GAP.as_millis() as u64)]
    pub min_gap_ms: u64,

    /// Gap upper bound (exclusive)
    #[arg(long, default_value_t = MAX_SEND_GAP.as_millis() as u64)]
    pub max_gap_ms: u64,

    /// Extra upgrade header, repeatable
    #[arg(long = "header", value_name = "NAME:VALUE")]
    pub headers: Vec<String>,

    /// Advertised edge, repeatable; defaults to node-a:node-b:1
    #[arg(long = "edge", value_name = "A:B:COST")]
    pub edges: Vec<Edge>,

    /// Advertised seen node, repeatable
    #[arg(long = "seen", value_name = "ID")]
    pub seen: Vec<String>,
}

impl Args {
    pub fn into_config(self) -> Result<SimulatorConfig> {
        if self.min_gap_ms >= self.max_gap_ms {
            return Err(SimError::InvalidGap { min_ms: self.min_gap_ms, max_ms: self.max_gap_ms });
        }

        let headers = self
            .headers
            .iter()
            .map(|h| parse_header(h))
            .collect::<Result<Vec<_>>>()?;

        let edges = if self.edges.is_empty() { vec![Edge::default()] } else { self.edges };

        Ok(SimulatorConfig {
            url: self.url,
            secret: self.secret,
            wire_format: self.wire_format,
            timestamp_format: self.timestamp,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            min_gap: Duration::from_millis(self.min_gap_ms),
            max_gap: Duration::from_millis(self.max_gap_ms),
            headers,
            edges,
            seen: self.seen,
            range: self.start..self.end,
        })
    }
}

/// Splits `NAME:VALUE` on the first colon.
pub fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue)> {
    let invalid = || SimError::InvalidHeader(raw.to_string());
    let (name, value) = raw.split_once(':').ok_or_else(invalid)?;
    let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| invalid())?;
    let value = HeaderValue::from_str(value.trim()).map_err(|_| invalid())?;
    Ok((name, value))
}

/// Settings shared read-only by every session of a batch.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub url: String,
    pub secret: String,
    pub wire_format: WireFormat,
    pub timestamp_format: TimestampFormat,
    pub initial_delay: Duration,
    pub min_gap: Duration,
    pub max_gap: Duration,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub edges: Vec<Edge>,
    pub seen: Vec<String>,
    pub range: Range<u32>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            url: DEFAULT_CONTROLLER_URL.to_string(),
            secret: DEFAULT_SHARED_SECRET.to_string(),
            wire_format: WireFormat::default(),
            timestamp_format: TimestampFormat::default(),
            initial_delay: INITIAL_SEND_DELAY,
            min_gap: MIN_SEND_GAP,
            max_gap: MAX_SEND_GAP,
            headers: Vec::new(),
            edges: vec![Edge::default()],
            seen: Vec::new(),
            range: 0..1,
        }
    }
}

impl SimulatorConfig {
    pub fn identities(&self) -> impl Iterator<Item = NodeIdentity> {
        self.range.clone().map(NodeIdentity::from_index)
    }
}

/// Who a session authenticates as and which id it advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub index: u32,
    pub account: String,
    pub node_id: String,
}

impl NodeIdentity {
    pub fn from_index(index: u32) -> Self {
        NodeIdentity { index, account: account_for(index), node_id: node_id_for(index) }
    }

    /// `Authorization` header value for this node.
    pub fn basic_auth(&self, secret: &str) -> String {
        let credentials = format!("{}:{}", self.account, secret);
        format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(credentials))
    }
}
