// =============================================================================
// NODE SIMULATOR: messages.rs
// Messages a simulated node sends to the controller
// =============================================================================
//
//   ROUTE  {"cmd":"ROUTE","id":"node_01","edges":[["node-a","node-b",1]],"seen":[]}
//   HI     {"cmd":"HI","id":"node_01","expire_time":"2024-05-01T10:00:00+02:00"}
//
// The colon wire format replaces the ROUTE object with `ROUTE:<id>:timestamp`.
// =============================================================================

use crate::constants::{COLON_ROUTE_SUFFIX, CMD_ROUTE, DEFAULT_EDGE, PLACEHOLDER_TIMESTAMP};
use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// -----------------------------------------------------------------------------
// Edge: one graph edge (a, b, weight)
// -----------------------------------------------------------------------------

/// Serialized as a three element array: `["node-a", "node-b", 1]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge(pub String, pub String, pub u32);

impl Edge {
    pub fn new(a: &str, b: &str, weight: u32) -> Self {
        Edge(a.to_string(), b.to_string(), weight)
    }
}

impl Default for Edge {
    fn default() -> Self {
        let (a, b, weight) = DEFAULT_EDGE;
        Edge::new(a, b, weight)
    }
}

impl FromStr for Edge {
    type Err = SimError;

    /// Parses `A:B:COST`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SimError::InvalidEdge(s.to_string());
        let mut parts = s.splitn(3, ':');
        let a = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;
        let b = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;
        let weight = parts
            .next()
            .and_then(|w| w.trim().parse::<u32>().ok())
            .ok_or_else(invalid)?;
        Ok(Edge::new(a, b, weight))
    }
}

// -----------------------------------------------------------------------------
// Messages
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteMessage {
    pub id: String,
    pub edges: Vec<Edge>,
    pub seen: Vec<String>,
}

impl RouteMessage {
    pub fn new(id: &str, edges: Vec<Edge>, seen: Vec<String>) -> Self {
        RouteMessage { id: id.to_string(), edges, seen }
    }
}

/// Reply to a server greeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub id: String,
    pub expire_time: String,
}

impl ControlMessage {
    pub fn hi(id: &str, expire_time: String) -> Self {
        ControlMessage { id: id.to_string(), expire_time }
    }
}

/// Everything a node puts on the wire as JSON, discriminated by `cmd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum NodeMessage {
    #[serde(rename = "ROUTE")]
    Route(RouteMessage),
    #[serde(rename = "HI")]
    Hi(ControlMessage),
}

impl NodeMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    #[cfg(test)]
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// -----------------------------------------------------------------------------
// Formats
// -----------------------------------------------------------------------------

/// How outgoing route updates are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WireFormat {
    /// JSON route message
    #[default]
    Json,
    /// `ROUTE:<node_id>:timestamp`
    Colon,
}

impl WireFormat {
    pub fn encode_route(&self, route: RouteMessage) -> Result<String> {
        match self {
            WireFormat::Json => NodeMessage::Route(route).to_json(),
            WireFormat::Colon => Ok(format!("{}:{}:{}", CMD_ROUTE, route.id, COLON_ROUTE_SUFFIX)),
        }
    }
}

/// How `expire_time` is rendered in HI replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TimestampFormat {
    /// Local time, RFC 3339 with offset
    #[default]
    Iso8601,
    /// Fixed placeholder string
    Placeholder,
}

impl TimestampFormat {
    pub fn stamp(&self) -> String {
        match self {
            TimestampFormat::Iso8601 => chrono::Local::now().to_rfc3339(),
            TimestampFormat::Placeholder => PLACEHOLDER_TIMESTAMP.to_string(),
        }
    }
}
