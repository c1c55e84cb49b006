// Record codec - packs value + content type + vector clock into a durable
// MessagePack record, and builds/parses the multi-frame peer wire messages

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{MecError, MecResult};
use crate::vclock::VectorClock;

/// A peer message is a sequence of opaque frames. Inbound messages carry one
/// extra routing frame (frame 0) inserted by the fabric's router.
pub type Frames = Vec<Vec<u8>>;

/// The durable unit per key, stored as-is in the local engine and carried in
/// WRITE/DATA messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
    pub content_type: String,
    pub clock: VectorClock,
}

/// Message kinds. String-tagged only at the wire boundary; everything inside
/// the node speaks this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Write,
    Get,
    Data,
    Good,
    Fail,
    Hello,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Write => "WRITE",
            Command::Get => "GET",
            Command::Data => "DATA",
            Command::Good => "GOOD",
            Command::Fail => "FAIL",
            Command::Hello => "HELLO",
        }
    }

    pub fn parse(frame: &[u8]) -> Option<Command> {
        match frame {
            b"WRITE" => Some(Command::Write),
            b"GET" => Some(Command::Get),
            b"DATA" => Some(Command::Data),
            b"GOOD" => Some(Command::Good),
            b"FAIL" => Some(Command::Fail),
            b"HELLO" => Some(Command::Hello),
            _ => None,
        }
    }
}

pub fn encode_record(record: &Record) -> MecResult<Vec<u8>> {
    Ok(rmp_serde::to_vec(record)?)
}

pub fn decode_record(data: &[u8]) -> MecResult<Record> {
    Ok(rmp_serde::from_slice(data)?)
}

/// MessagePack-encode a clock, raw bytes. This is the wire form.
pub fn pack_clock(vc: &VectorClock) -> MecResult<Vec<u8>> {
    Ok(rmp_serde::to_vec(vc)?)
}

pub fn unpack_clock(data: &[u8]) -> MecResult<VectorClock> {
    Ok(rmp_serde::from_slice(data)?)
}

/// The client-facing boundary form: base64 over the packed clock, suitable
/// for the X-Mec-Vclock header.
pub fn clock_to_b64(vc: &VectorClock) -> MecResult<String> {
    Ok(BASE64.encode(pack_clock(vc)?))
}

pub fn clock_from_b64(encoded: &str) -> MecResult<VectorClock> {
    let data = BASE64
        .decode(encoded)
        .map_err(|e| MecError::Parse(format!("clock base64: {}", e)))?;
    unpack_clock(&data)
}

/// `[ "WRITE", key, value, contentType, packedClock ]`
pub fn write_msg(key: &str, value: &[u8], content_type: &str, vc: &VectorClock) -> MecResult<Frames> {
    data_frames(Command::Write, key, value, content_type, vc)
}

/// `[ "DATA", key, value, contentType, packedClock ]` - the reply to GET.
pub fn data_msg(key: &str, value: &[u8], content_type: &str, vc: &VectorClock) -> MecResult<Frames> {
    data_frames(Command::Data, key, value, content_type, vc)
}

fn data_frames(
    cmd: Command,
    key: &str,
    value: &[u8],
    content_type: &str,
    vc: &VectorClock,
) -> MecResult<Frames> {
    Ok(vec![
        cmd.as_str().as_bytes().to_vec(),
        key.as_bytes().to_vec(),
        value.to_vec(),
        content_type.as_bytes().to_vec(),
        pack_clock(vc)?,
    ])
}

/// `[ "GET", key ]`
pub fn get_msg(key: &str) -> Frames {
    vec![Command::Get.as_str().as_bytes().to_vec(), key.as_bytes().to_vec()]
}

/// `[ "GOOD" ]` or `[ "FAIL" ]`
pub fn status_msg(cmd: Command) -> Frames {
    vec![cmd.as_str().as_bytes().to_vec()]
}

/// The decoded body of a WRITE or DATA message (they share a shape).
#[derive(Debug, Clone)]
pub struct DataMsg {
    pub key: String,
    pub value: Vec<u8>,
    pub content_type: String,
    pub clock: VectorClock,
}

/// Command frame of a message. `naked` means no routing prefix: a message the
/// node itself built, or a reply read off a dealer.
pub fn command_of(naked: bool, frames: &Frames) -> Option<Command> {
    let at = if naked { 0 } else { 1 };
    frames.get(at).and_then(|f| Command::parse(f))
}

/// Parse a WRITE or DATA message into its parts.
pub fn parse_data_msg(naked: bool, frames: &Frames) -> MecResult<DataMsg> {
    let at = if naked { 0 } else { 1 };
    if frames.len() < at + 5 {
        return Err(MecError::Parse(format!(
            "data message needs {} frames, got {}",
            at + 5,
            frames.len()
        )));
    }
    match Command::parse(&frames[at]) {
        Some(Command::Write) | Some(Command::Data) => {}
        _ => return Err(MecError::Parse("not a WRITE or DATA message".to_string())),
    }
    let key = String::from_utf8(frames[at + 1].clone())
        .map_err(|_| MecError::Parse("key is not utf-8".to_string()))?;
    let content_type = String::from_utf8(frames[at + 3].clone())
        .map_err(|_| MecError::Parse("content type is not utf-8".to_string()))?;
    let clock = unpack_clock(&frames[at + 4])?;
    Ok(DataMsg {
        key,
        value: frames[at + 2].clone(),
        content_type,
        clock,
    })
}

/// Parse a GET message into its key.
pub fn parse_get_msg(naked: bool, frames: &Frames) -> MecResult<String> {
    let at = if naked { 0 } else { 1 };
    if frames.len() < at + 2 || Command::parse(&frames[at]) != Some(Command::Get) {
        return Err(MecError::Parse("not a GET message".to_string()));
    }
    String::from_utf8(frames[at + 1].clone()).map_err(|_| MecError::Parse("key is not utf-8".to_string()))
}
