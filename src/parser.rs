//! Decoding of inbound device payloads.
//!
//! A payload is normally a JSON envelope `{"rsp": "<protocol text>"}`, but the
//! device firmware does not always escape the text properly, and some gateways
//! forward the protocol text bare. Decoding therefore runs in stages:
//!
//! 1. [`decode_envelope`]: strict JSON decode of the `rsp` field.
//! 2. [`decode_tolerant`]: pattern extraction of the `rsp` field from text that
//!    looks like an envelope but is not valid JSON.
//! 3. Anything that does not look like an envelope at all is taken as bare
//!    protocol text.
//!
//! The protocol text is then classified by [`classify`].

use crate::register::Register;

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

/// Interim reply: the device has the read request but no value yet.
pub const PROCESSING_MARKER: &str = "READ PROCESSING";

/// The device applied an `UP#` write.
pub const WRITE_ACK_MARKER: &str = "UP PROCESSED";

static RSP_FIELD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)"rsp"\s*:\s*"(.*)"\s*\}"#).expect("Invalid rsp field regex")
});

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedResult {
    RegisterValue(Register, i64),
    Processing,
    WriteAcknowledged,
    Unparseable,
}

#[derive(Deserialize)]
struct Envelope {
    rsp: String,
}

/// Classifies `raw` against the single register the caller is waiting for.
/// Never fails; anything it cannot make sense of is `Unparseable`.
pub fn parse(raw: &str, register: Register) -> ParsedResult {
    match decode(raw) {
        Some(text) => classify(&text, register),
        None => ParsedResult::Unparseable,
    }
}

/// Extracts the protocol text from a raw payload, trying each stage in order.
pub fn decode(raw: &str) -> Option<String> {
    if let Some(text) = decode_envelope(raw) {
        return Some(text);
    }

    if looks_like_envelope(raw) {
        return decode_tolerant(raw);
    }

    Some(raw.to_owned())
}

pub fn decode_envelope(raw: &str) -> Option<String> {
    serde_json::from_str::<Envelope>(raw).ok().map(|e| e.rsp)
}

pub fn decode_tolerant(raw: &str) -> Option<String> {
    RSP_FIELD_REGEX
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| unescape(m.as_str()))
}

pub fn classify(text: &str, register: Register) -> ParsedResult {
    // an interim reply never carries a usable value, whatever else it contains
    if text.contains(PROCESSING_MARKER) {
        return ParsedResult::Processing;
    }

    if let Some(value) = text.lines().find_map(|line| register_line(line, register)) {
        return ParsedResult::RegisterValue(register, value);
    }

    if text.contains(WRITE_ACK_MARKER) {
        return ParsedResult::WriteAcknowledged;
    }

    ParsedResult::Unparseable
}

fn register_line(line: &str, register: Register) -> Option<i64> {
    let (id, value) = line.trim().split_once(':')?;
    if id != register.to_string() {
        return None;
    }

    value.parse().ok()
}

fn looks_like_envelope(raw: &str) -> bool {
    raw.trim_start().starts_with('{')
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(id: u16) -> Register {
        Register::new(id)
    }

    #[test]
    fn register_value_from_envelope() {
        let raw = r#"{"rsp":"1032:64392"}"#;
        assert_eq!(parse(raw, reg(1032)), ParsedResult::RegisterValue(reg(1032), 64392));
    }

    #[test]
    fn register_value_zero_and_multi_digit() {
        for value in [0_i64, 7, 1500, 64392, 1234567] {
            let raw = format!("{{\"rsp\":\"0802:{}\"}}", value);
            assert_eq!(parse(&raw, reg(802)), ParsedResult::RegisterValue(reg(802), value));
        }
    }

    #[test]
    fn picks_the_awaited_line_out_of_several() {
        let raw = r#"{"rsp":"READ OK\n0808:240\n0811:180\n"}"#;
        assert_eq!(parse(raw, reg(811)), ParsedResult::RegisterValue(reg(811), 180));
        assert_eq!(parse(raw, reg(808)), ParsedResult::RegisterValue(reg(808), 240));
        assert_eq!(parse(raw, reg(802)), ParsedResult::Unparseable);
    }

    #[test]
    fn processing_marker_wins_over_data_lines() {
        let raw = r#"{"rsp":"READ PROCESSING\n0802:1500"}"#;
        assert_eq!(parse(raw, reg(802)), ParsedResult::Processing);
    }

    #[test]
    fn write_acknowledged() {
        assert_eq!(
            parse(r#"{"rsp":"UP PROCESSED"}"#, reg(802)),
            ParsedResult::WriteAcknowledged
        );
    }

    #[test]
    fn malformed_input_is_unparseable() {
        for raw in ["", "{", r#"{"status":"ok"}"#, "{\"rsp\": 12", "\u{0}\u{1}garbage"] {
            assert_eq!(parse(raw, reg(802)), ParsedResult::Unparseable, "{:?}", raw);
        }
    }

    #[test]
    fn line_must_match_exactly() {
        for raw in ["08021:5", "0802:abc", "x0802:5", "0802:5:6"] {
            assert_eq!(parse(raw, reg(802)), ParsedResult::Unparseable, "{:?}", raw);
        }
    }

    #[test]
    fn envelope_stage_decodes_json_escapes() {
        assert_eq!(
            decode_envelope(r#"{"rsp":"a\nb"}"#),
            Some("a\nb".to_string())
        );
        assert_eq!(decode_envelope("0802:1"), None);
    }

    #[test]
    fn tolerant_stage_recovers_broken_envelope() {
        // raw newline inside a JSON string is invalid JSON
        let raw = "{\"rsp\":\"READ OK\n0802:1500\"}";
        assert_eq!(decode_envelope(raw), None);
        assert_eq!(decode_tolerant(raw), Some("READ OK\n0802:1500".to_string()));
        assert_eq!(parse(raw, reg(802)), ParsedResult::RegisterValue(reg(802), 1500));
    }

    #[test]
    fn tolerant_stage_unescapes() {
        // \q is not a JSON escape, so strict decoding rejects it
        assert_eq!(decode_envelope("{\"rsp\":\"0811:180\\r\\n\\q\"\n}"), None);
        assert_eq!(
            decode_tolerant("{\"rsp\":\"0811:180\\r\\n\\q\"\n}"),
            Some("0811:180\r\n\\q".to_string())
        );
    }

    #[test]
    fn bare_protocol_text() {
        assert_eq!(decode("0802:1\n"), Some("0802:1\n".to_string()));
        assert_eq!(parse("0802:1\n", reg(802)), ParsedResult::RegisterValue(reg(802), 1));
        assert_eq!(parse("UP PROCESSED", reg(802)), ParsedResult::WriteAcknowledged);
    }
}
