//! Fixed binary wire codec for OSTRVO radio frames.
//!
//! Every frame is `tag | version | fixed payload | CRC-16`, sized to fit
//! the smallest reliable frame of the narrowband radio link. Node ids are
//! fixed-length zero-padded byte fields; telemetry travels as fixed-point
//! integers (0.01 kW / 0.01 kWh per step) so values survive the link
//! without floating-point drift. The codec has no semantic logic: a frame
//! either decodes in full or is rejected in full.

use crate::types::{Energy, Heartbeat, Power, ReasonCode, ShedAction, ShedCommand, TelemetryReport};
use thiserror::Error;

/// Wire protocol version carried in every frame
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed width of the node id field in bytes
pub const NODE_ID_LEN: usize = 8;

/// Upper bound on any encoded frame; sized to the radio's smallest
/// reliable frame
pub const MAX_FRAME_LEN: usize = 32;

const TAG_HEARTBEAT: u8 = 0x01;
const TAG_STATE_REPORT: u8 = 0x02;
const TAG_SHED_COMMAND: u8 = 0x03;

const HEARTBEAT_LEN: usize = 2 + NODE_ID_LEN + 4 + 4 + 2 + 2;
const STATE_REPORT_LEN: usize = 2 + NODE_ID_LEN + 4 + 4 + 2 + 2 + 2 + 2;
const SHED_COMMAND_LEN: usize = 2 + NODE_ID_LEN + 1 + 1 + 4 + 2;

/// Closed set of messages crossing the radio link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Heartbeat(Heartbeat),
    StateReport(TelemetryReport),
    ShedCommand(ShedCommand),
}

/// Frame could not be produced without violating the wire contract
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("node id \"{id}\" does not fit the {NODE_ID_LEN}-byte wire field")]
    NodeIdTooLong { id: String },
    #[error("node id must be non-empty ASCII")]
    NodeIdInvalid,
    #[error("power value {centi_kw} (0.01 kW steps) exceeds the 16-bit wire range")]
    PowerOutOfRange { centi_kw: i32 },
    #[error("energy value {centi_kwh} (0.01 kWh steps) exceeds the 16-bit wire range")]
    EnergyOutOfRange { centi_kwh: u32 },
}

/// Frame could not be decoded; the whole message is dropped, never
/// partially applied
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame length does not match any message layout")]
    Truncated,
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("unknown protocol version {0}")]
    UnknownVersion(u8),
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),
    #[error("node id field is empty or not ASCII")]
    BadNodeId,
}

/// CRC-16/CCITT-FALSE over the given bytes (poly 0x1021, init 0xFFFF)
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in bytes {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Encode a message into a checksummed radio frame
pub fn encode(message: &WireMessage) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::with_capacity(MAX_FRAME_LEN);
    match message {
        WireMessage::Heartbeat(hb) => {
            buf.push(TAG_HEARTBEAT);
            buf.push(PROTOCOL_VERSION);
            put_node_id(&mut buf, &hb.node_id)?;
            buf.extend_from_slice(&hb.tick.to_be_bytes());
            buf.extend_from_slice(&hb.seq.to_be_bytes());
            put_energy(&mut buf, hb.battery_kwh)?;
        }
        WireMessage::StateReport(report) => {
            buf.push(TAG_STATE_REPORT);
            buf.push(PROTOCOL_VERSION);
            put_node_id(&mut buf, &report.node_id)?;
            buf.extend_from_slice(&report.tick.to_be_bytes());
            buf.extend_from_slice(&report.seq.to_be_bytes());
            put_energy(&mut buf, report.battery_kwh)?;
            put_power_signed(&mut buf, report.load_kw)?;
            put_power_unsigned(&mut buf, report.generation_kw)?;
        }
        WireMessage::ShedCommand(cmd) => {
            buf.push(TAG_SHED_COMMAND);
            buf.push(PROTOCOL_VERSION);
            put_node_id(&mut buf, &cmd.target)?;
            buf.push(match cmd.action {
                ShedAction::Shed => 0,
                ShedAction::Restore => 1,
            });
            buf.push(cmd.reason.as_u8());
            buf.extend_from_slice(&cmd.issued_tick.to_be_bytes());
        }
    }
    let crc = crc16(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());
    debug_assert!(buf.len() <= MAX_FRAME_LEN);
    Ok(buf)
}

/// Decode a radio frame. Length is sanity-checked against the known
/// layouts, then integrity, before any field is parsed.
pub fn decode(frame: &[u8]) -> Result<WireMessage, DecodeError> {
    if !matches!(frame.len(), HEARTBEAT_LEN | STATE_REPORT_LEN | SHED_COMMAND_LEN) {
        return Err(DecodeError::Truncated);
    }
    let (body, crc_bytes) = frame.split_at(frame.len() - 2);
    let expected = u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]);
    if crc16(body) != expected {
        return Err(DecodeError::ChecksumMismatch);
    }
    if body[1] != PROTOCOL_VERSION {
        return Err(DecodeError::UnknownVersion(body[1]));
    }
    match body[0] {
        TAG_HEARTBEAT => {
            if frame.len() != HEARTBEAT_LEN {
                return Err(DecodeError::Truncated);
            }
            let node_id = read_node_id(&body[2..2 + NODE_ID_LEN])?;
            let tick = read_u32(&body[10..14]);
            let seq = read_u32(&body[14..18]);
            let battery_kwh = Energy::from_centi_kwh(u32::from(read_u16(&body[18..20])));
            Ok(WireMessage::Heartbeat(Heartbeat { node_id, tick, seq, battery_kwh }))
        }
        TAG_STATE_REPORT => {
            if frame.len() != STATE_REPORT_LEN {
                return Err(DecodeError::Truncated);
            }
            let node_id = read_node_id(&body[2..2 + NODE_ID_LEN])?;
            let tick = read_u32(&body[10..14]);
            let seq = read_u32(&body[14..18]);
            let battery_kwh = Energy::from_centi_kwh(u32::from(read_u16(&body[18..20])));
            let load_kw = Power::from_centi_kw(i32::from(read_i16(&body[20..22])));
            let generation_kw = Power::from_centi_kw(i32::from(read_u16(&body[22..24])));
            Ok(WireMessage::StateReport(TelemetryReport {
                node_id,
                tick,
                seq,
                battery_kwh,
                load_kw,
                generation_kw,
            }))
        }
        TAG_SHED_COMMAND => {
            if frame.len() != SHED_COMMAND_LEN {
                return Err(DecodeError::Truncated);
            }
            let target = read_node_id(&body[2..2 + NODE_ID_LEN])?;
            let action = match body[10] {
                0 => ShedAction::Shed,
                1 => ShedAction::Restore,
                other => return Err(DecodeError::UnknownTag(other)),
            };
            let reason = ReasonCode::from_u8(body[11]).ok_or(DecodeError::UnknownTag(body[11]))?;
            let issued_tick = read_u32(&body[12..16]);
            Ok(WireMessage::ShedCommand(ShedCommand { target, action, reason, issued_tick }))
        }
        other => Err(DecodeError::UnknownTag(other)),
    }
}

fn put_node_id(buf: &mut Vec<u8>, id: &str) -> Result<(), EncodeError> {
    if id.is_empty() || !id.is_ascii() {
        return Err(EncodeError::NodeIdInvalid);
    }
    if id.len() > NODE_ID_LEN {
        return Err(EncodeError::NodeIdTooLong { id: id.to_string() });
    }
    let mut field = [0u8; NODE_ID_LEN];
    field[..id.len()].copy_from_slice(id.as_bytes());
    buf.extend_from_slice(&field);
    Ok(())
}

fn read_node_id(field: &[u8]) -> Result<String, DecodeError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(NODE_ID_LEN);
    if end == 0 {
        return Err(DecodeError::BadNodeId);
    }
    let raw = &field[..end];
    if !raw.is_ascii() || field[end..].iter().any(|&b| b != 0) {
        return Err(DecodeError::BadNodeId);
    }
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::BadNodeId)
}

fn put_energy(buf: &mut Vec<u8>, value: Energy) -> Result<(), EncodeError> {
    let centi = value.centi_kwh();
    let raw = u16::try_from(centi).map_err(|_| EncodeError::EnergyOutOfRange { centi_kwh: centi })?;
    buf.extend_from_slice(&raw.to_be_bytes());
    Ok(())
}

fn put_power_signed(buf: &mut Vec<u8>, value: Power) -> Result<(), EncodeError> {
    let centi = value.centi_kw();
    let raw = i16::try_from(centi).map_err(|_| EncodeError::PowerOutOfRange { centi_kw: centi })?;
    buf.extend_from_slice(&raw.to_be_bytes());
    Ok(())
}

fn put_power_unsigned(buf: &mut Vec<u8>, value: Power) -> Result<(), EncodeError> {
    let centi = value.centi_kw();
    let raw = u16::try_from(centi).map_err(|_| EncodeError::PowerOutOfRange { centi_kw: centi })?;
    buf.extend_from_slice(&raw.to_be_bytes());
    Ok(())
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn read_i16(bytes: &[u8]) -> i16 {
    i16::from_be_bytes([bytes[0], bytes[1]])
}
