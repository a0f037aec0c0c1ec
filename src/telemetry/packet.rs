//! # Meter datagram decoding.
//!
//! Each UDP datagram is one self-contained meter snapshot, encoded as an
//! `update` notification (no framing):
//!
//! ```text
//! {"jsonrpc":"2.0","method":"update","params":[{"param":"ZoneMeter_0","val":-42.5},
//!                                              {"param":"ZoneMeter_1","val":-60.0}]}
//! ```
//!
//! The parameter name carries the channel index as a `_<n>` suffix; the prefix
//! names the meter. A datagram with any unusable entry is rejected as a whole.

use std::sync::Arc;
use std::time::SystemTime;

use serde_json::Value;
use thiserror::Error;

use crate::error::ProtocolError;
use crate::protocol::{self, Incoming, ParamUpdate};

/// One meter reading.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    /// Receive time of the datagram.
    pub timestamp: SystemTime,
    /// Channel index parsed from the parameter suffix.
    pub channel: usize,
    /// Meter level (dB for level meters).
    pub level: f64,
    /// Meter name without the channel suffix, e.g. `ZoneMeter`.
    pub meter: Arc<str>,
}

/// Reasons a datagram is dropped.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The datagram is not a valid envelope.
    #[error(transparent)]
    Envelope(#[from] ProtocolError),

    /// The envelope is a response, not an `update`.
    #[error("datagram is not an update notification")]
    NotAnUpdate,

    /// The parameter has no `_<channel>` suffix.
    #[error("meter `{param}` has no channel suffix")]
    MissingChannel {
        /// Offending parameter name.
        param: String,
    },

    /// The value is not a number.
    #[error("meter `{param}` has a non-numeric level")]
    InvalidLevel {
        /// Offending parameter name.
        param: String,
    },
}

impl DecodeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DecodeError::Envelope(e) => e.as_label(),
            DecodeError::NotAnUpdate => "telemetry_not_update",
            DecodeError::MissingChannel { .. } => "telemetry_missing_channel",
            DecodeError::InvalidLevel { .. } => "telemetry_invalid_level",
        }
    }
}

/// Decodes one datagram received at `at`.
///
/// Useful for meter captures replayed outside a running client.
///
/// # Example
/// ```
/// use std::time::SystemTime;
///
/// let raw = br#"{"jsonrpc":"2.0","method":"update","params":[{"param":"ZoneMeter_3","val":-42.5}]}"#;
/// let samples = dsplink::decode_datagram(raw, SystemTime::now()).unwrap();
/// assert_eq!((samples[0].channel, samples[0].level), (3, -42.5));
/// ```
pub fn decode_datagram(datagram: &[u8], at: SystemTime) -> Result<Vec<TelemetrySample>, DecodeError> {
    match protocol::decode(datagram.trim_ascii())? {
        Incoming::Updates(updates) => updates
            .into_iter()
            .map(|update| sample(update, at))
            .collect(),
        Incoming::Response { .. } => Err(DecodeError::NotAnUpdate),
    }
}

fn sample(update: ParamUpdate, at: SystemTime) -> Result<TelemetrySample, DecodeError> {
    let (meter, channel) = update
        .param
        .rsplit_once('_')
        .and_then(|(meter, idx)| Some((meter, idx.parse::<usize>().ok()?)))
        .filter(|(meter, _)| !meter.is_empty())
        .ok_or_else(|| DecodeError::MissingChannel {
            param: update.param.to_string(),
        })?;

    let level = match &update.value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| DecodeError::InvalidLevel {
        param: update.param.to_string(),
    })?;

    Ok(TelemetrySample {
        timestamp: at,
        channel,
        level,
        meter: Arc::from(meter),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_meter_array() {
        let at = SystemTime::now();
        let samples = decode_datagram(
            br#"{"jsonrpc":"2.0","method":"update","params":[{"param":"ZoneMeter_0","val":-42.5},{"param":"SourceMeter_12","val":"-6"}]}
"#,
            at,
        )
        .unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(&*samples[0].meter, "ZoneMeter");
        assert_eq!(samples[0].channel, 0);
        assert_eq!(samples[0].level, -42.5);
        assert_eq!(samples[0].timestamp, at);
        assert_eq!(&*samples[1].meter, "SourceMeter");
        assert_eq!(samples[1].channel, 12);
        assert_eq!(samples[1].level, -6.0);
    }

    #[test]
    fn test_single_object_params() {
        let samples = decode_datagram(
            br#"{"jsonrpc":"2.0","method":"update","params":{"param":"ZoneMeter_3","val":-20}}"#,
            SystemTime::now(),
        )
        .unwrap();
        assert_eq!(samples[0].channel, 3);
    }

    #[test]
    fn test_rejects_unusable_datagrams() {
        let now = SystemTime::now();
        assert!(matches!(
            decode_datagram(b"\xff\xfe", now),
            Err(DecodeError::Envelope(ProtocolError::InvalidUtf8))
        ));
        assert!(matches!(
            decode_datagram(br#"{"jsonrpc":"2.0","id":1,"result":0}"#, now),
            Err(DecodeError::NotAnUpdate)
        ));
        assert!(matches!(
            decode_datagram(
                br#"{"jsonrpc":"2.0","method":"update","params":{"param":"Meter","val":1}}"#,
                now
            ),
            Err(DecodeError::MissingChannel { .. })
        ));
        assert!(matches!(
            decode_datagram(
                br#"{"jsonrpc":"2.0","method":"update","params":{"param":"ZoneMeter_1","val":true}}"#,
                now
            ),
            Err(DecodeError::InvalidLevel { .. })
        ));
    }
}
