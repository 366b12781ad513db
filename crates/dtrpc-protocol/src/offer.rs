//! Offer payload: the §6.4 text format carried in the payload of an
//! `RPCOFFER` bundle.

use dtrpc_core::{parse_capability_value, ArgKind, CapabilityRecord, CapabilityValue, Procedure};
use dtrpc_error::{DtrpcError, ErrorCode};

/// A parsed offer: the procedures a node currently exposes, plus the live
/// capability values it published alongside them.
#[derive(Clone, Debug, PartialEq)]
pub struct OfferPayload {
    /// Procedures offered, in publication order.
    pub procedures: Vec<Procedure>,
    /// Capability values sampled at publication time.
    pub capabilities: CapabilityRecord,
}

impl OfferPayload {
    /// Construct an offer from its parts.
    pub fn new(procedures: Vec<Procedure>, capabilities: CapabilityRecord) -> Self {
        Self {
            procedures,
            capabilities,
        }
    }

    /// Encode to the §6.4 text format.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("procedures: {}\n", self.procedures.len()));
        for proc in &self.procedures {
            let mut line = proc.name.clone();
            for arg in &proc.arg_types {
                line.push(' ');
                line.push_str(&match arg {
                    ArgKind::File => "file".to_string(),
                    ArgKind::Other(token) => token.clone(),
                });
            }
            out.push_str(&line);
            out.push('\n');
        }
        out.push_str(&format!("capabilities: {}\n", self.capabilities.len()));
        for (name, value) in &self.capabilities {
            out.push_str(&format!("{name}={}\n", format_value(value)));
        }
        out
    }

    /// Decode from the §6.4 text format.
    pub fn decode(text: &str) -> Result<Self, DtrpcError> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());

        let proc_count = parse_count_header(lines.next(), "procedures")?;
        let mut procedures = Vec::with_capacity(proc_count);
        for _ in 0..proc_count {
            let line = lines
                .next()
                .ok_or_else(|| malformed("offer payload truncated in procedures section"))?;
            let mut tokens = line.split_whitespace();
            let name = tokens
                .next()
                .ok_or_else(|| malformed("empty procedure line"))?
                .to_string();
            let arg_types = tokens.map(ArgKind::parse).collect();
            procedures.push(Procedure::new(name, arg_types));
        }

        let cap_count = parse_count_header(lines.next(), "capabilities")?;
        let mut capabilities = CapabilityRecord::new();
        for _ in 0..cap_count {
            let line = lines
                .next()
                .ok_or_else(|| malformed("offer payload truncated in capabilities section"))?;
            let (key, raw_value) = line
                .split_once('=')
                .ok_or_else(|| malformed(&format!("malformed capability line: {line}")))?;
            let value = parse_capability_value(key, raw_value)
                .ok_or_else(|| malformed(&format!("malformed capability value: {line}")))?;
            capabilities.insert(key.to_string(), value);
        }

        Ok(OfferPayload {
            procedures,
            capabilities,
        })
    }
}

fn parse_count_header(line: Option<&str>, expected_label: &str) -> Result<usize, DtrpcError> {
    let line = line.ok_or_else(|| malformed(&format!("missing '{expected_label}:' header")))?;
    let raw = line
        .strip_prefix(&format!("{expected_label}:"))
        .ok_or_else(|| malformed(&format!("expected '{expected_label}:' header, got '{line}'")))?;
    raw.trim()
        .parse()
        .map_err(|_| malformed(&format!("non-numeric count in '{line}'")))
}

fn format_value(value: &CapabilityValue) -> String {
    match value {
        CapabilityValue::Number(n) => format!("{n}"),
        CapabilityValue::GpsCoord(x, y) => format!("{x},{y}"),
        CapabilityValue::Text(s) => s.clone(),
    }
}

fn malformed(msg: &str) -> DtrpcError {
    DtrpcError::new(ErrorCode::ProtocolMalformedJobFile, msg.to_string())
}
