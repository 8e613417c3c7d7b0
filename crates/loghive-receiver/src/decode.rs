use crate::error::IngestError;
use loghive_common::clock::Clock;
use loghive_common::types::{Level, LogRecord};
use serde::Deserialize;
use utoipa::ToSchema;

/// Upper bound on the indexed short message, in characters.
pub const MAX_SHORT_LEN: usize = 128;

/// Frames stamped further in the future than this are dropped as implausible.
const MAX_FUTURE_SKEW_MS: i64 = 5 * 60 * 1000;

/// The wire shape producers push to `/v1/receive/packet`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct Packet {
    /// Producer module name; also the sharding key.
    pub module: String,
    #[serde(default)]
    pub frames: Vec<Frame>,
}

/// One log frame inside a packet.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct Frame {
    pub level: i32,
    #[serde(default)]
    pub short: String,
    #[serde(default)]
    pub full: String,
    #[serde(default)]
    pub c1: String,
    #[serde(default)]
    pub c2: String,
    #[serde(default)]
    pub c3: String,
    #[serde(default)]
    pub trace_id: String,
    /// Producer message id; reused on redelivery.
    #[serde(default)]
    pub message_id: String,
    /// Producer print time in milliseconds; `0` means "stamp on arrival".
    #[serde(default)]
    pub time_ms: i64,
}

/// Decode result: the surviving records plus per-cause drop counts.
#[derive(Debug)]
pub struct Decoded {
    pub records: Vec<LogRecord>,
    pub dropped_level: usize,
    pub dropped_future: usize,
}

impl Decoded {
    pub fn dropped(&self) -> usize {
        self.dropped_level + self.dropped_future
    }
}

/// Translates a packet into persistable records.
///
/// Bad frames are dropped, never failing the batch; only an unusable packet
/// (empty module) rejects the request as a whole.
pub fn decode_packet(
    packet: &Packet,
    client_ip: &str,
    clock: &dyn Clock,
) -> Result<Decoded, IngestError> {
    let module = packet.module.trim();
    if module.is_empty() {
        return Err(IngestError::ArgsInvalid(
            "packet module must not be empty".to_string(),
        ));
    }

    let now_ms = clock.unix_seconds() * 1000;
    let mut records = Vec::with_capacity(packet.frames.len());
    let mut dropped_level = 0usize;
    let mut dropped_future = 0usize;

    for frame in &packet.frames {
        let Ok(level) = Level::try_from(frame.level) else {
            dropped_level += 1;
            continue;
        };
        let time_ms = if frame.time_ms > 0 { frame.time_ms } else { now_ms };
        if time_ms > now_ms + MAX_FUTURE_SKEW_MS {
            dropped_future += 1;
            continue;
        }

        records.push(LogRecord {
            id: loghive_common::id::next_id(),
            module: module.to_string(),
            ip: client_ip.to_string(),
            level,
            short: truncate_chars(&frame.short, MAX_SHORT_LEN),
            full: frame.full.clone(),
            condition_one: frame.c1.clone(),
            condition_two: frame.c2.clone(),
            condition_three: frame.c3.clone(),
            trace_id: frame.trace_id.clone(),
            time_ms,
            time_sec: time_ms / 1000,
            message_id: frame.message_id.clone(),
        });
    }

    Ok(Decoded {
        records,
        dropped_level,
        dropped_future,
    })
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((offset, _)) => s[..offset].to_string(),
        None => s.to_string(),
    }
}
