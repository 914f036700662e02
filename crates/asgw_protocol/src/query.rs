//! Base64-encoded binary query strings.
//!
//! [MS-ASHTTP] 2.2.1.1.1.1 packs the command parameters of a request
//! into a fixed binary layout carried base64-encoded in the query
//! string. The decoder recovers the fields and rebuilds an equivalent
//! plain query string so downstream processing never cares which
//! encoding the client used.
//!
//! Layout: 1 byte protocol version, 1 byte command code, 2 bytes
//! locale, then length-prefixed device id / policy key / device type,
//! then (tag, length, value) parameter triples. The `Options` tag
//! carries a one-byte sub-code naming a flag instead of a value.

use crate::command;
use crate::error::{ProtocolError, ProtocolResult};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;

/// A decoded binary query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedQuery {
    /// Protocol version, printed `MAJOR.MINOR` (e.g. `16.1`).
    pub protocol_version: String,
    /// Command name, or `Unknown<code>` for an unlisted code.
    pub command: String,
    /// Locale code, printed as zero-padded hex (e.g. `0x0409`).
    pub locale: String,
    /// Device id, base64 of the raw bytes.
    pub device_id: String,
    /// Policy key, printed decimal, when present.
    pub policy_key: Option<u32>,
    /// Device type string.
    pub device_type: String,
    /// Trailing command parameters in wire order. `Options` flags
    /// appear as `("Options", flag_name)` pairs.
    pub params: Vec<(String, String)>,
}

/// Returns the raw bytes when a query string is base64 of binary data.
///
/// Detection mirrors the wire rule: decode must succeed and re-encode
/// must reproduce the input exactly.
pub fn base64_query(qs: &str) -> Option<Vec<u8>> {
    let raw = B64.decode(qs).ok()?;
    if raw.is_empty() || B64.encode(&raw) != qs {
        return None;
    }
    Some(raw)
}

struct Take<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Take<'a> {
    fn byte(&mut self) -> ProtocolResult<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(ProtocolError::TruncatedQuery(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes(&mut self, n: usize) -> ProtocolResult<&'a [u8]> {
        let s = self
            .buf
            .get(self.pos..self.pos + n)
            .ok_or(ProtocolError::TruncatedQuery(self.pos))?;
        self.pos += n;
        Ok(s)
    }

    fn remaining(&self) -> bool {
        self.pos < self.buf.len()
    }
}

fn print_version(byte: u8) -> String {
    // 161 -> "16.1", 25 -> "2.5"
    let digits = byte.to_string();
    if digits.len() < 2 {
        return digits;
    }
    let (major, minor) = digits.split_at(digits.len() - 1);
    format!("{major}.{minor}")
}

fn parse_version(version: &str) -> u8 {
    let digits: String = version.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Decodes the binary query layout.
pub fn decode(raw: &[u8]) -> ProtocolResult<DecodedQuery> {
    let mut take = Take { buf: raw, pos: 0 };

    let protocol_version = print_version(take.byte()?);

    let cmd_code = take.byte()?;
    let command = command::command_name(cmd_code)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Unknown{cmd_code}"));

    let locale = u16::from_le_bytes(take.bytes(2)?.try_into().unwrap());
    let locale = format!("{locale:#06x}");

    let n = take.byte()? as usize;
    let device_id = B64.encode(take.bytes(n)?);

    let n = take.byte()? as usize;
    let policy_key = if n == 4 {
        Some(u32::from_le_bytes(take.bytes(4)?.try_into().unwrap()))
    } else {
        take.bytes(n)?;
        None
    };

    let n = take.byte()? as usize;
    let device_type = String::from_utf8_lossy(take.bytes(n)?).into_owned();

    let mut params = Vec::new();
    while take.remaining() {
        let tag = take.byte()?;
        let len = take.byte()? as usize;
        let name = command::parameter_name(tag)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Unknown{tag}"));
        if name == "Options" {
            let sub = take.byte()?;
            let flag = command::option_flag_name(sub)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Unknown{sub}"));
            params.push((name, flag));
        } else {
            let value = String::from_utf8_lossy(take.bytes(len)?).into_owned();
            params.push((name, value));
        }
    }

    Ok(DecodedQuery {
        protocol_version,
        command,
        locale,
        device_id,
        policy_key,
        device_type,
        params,
    })
}

/// Encodes the binary query layout. Inverse of [`decode`].
///
/// Every variable field carries a one-byte length prefix; a field
/// over 255 bytes cannot be represented and is rejected.
pub fn encode(q: &DecodedQuery) -> ProtocolResult<Vec<u8>> {
    let mut out = Vec::new();
    out.push(parse_version(&q.protocol_version));
    out.push(command::command_code(&q.command).unwrap_or(0));

    let locale = q
        .locale
        .strip_prefix("0x")
        .and_then(|h| u16::from_str_radix(h, 16).ok())
        .unwrap_or(0);
    out.extend_from_slice(&locale.to_le_bytes());

    let dev = B64.decode(&q.device_id).unwrap_or_default();
    out.push(field_len("device id", dev.len())?);
    out.extend_from_slice(&dev);

    match q.policy_key {
        Some(key) => {
            out.push(4);
            out.extend_from_slice(&key.to_le_bytes());
        }
        None => out.push(0),
    }

    out.push(field_len("device type", q.device_type.len())?);
    out.extend_from_slice(q.device_type.as_bytes());

    for (name, value) in &q.params {
        if name == "Options" {
            out.push(command::parameter_tag("Options").unwrap_or(7));
            out.push(1);
            out.push(command::option_flag_code(value).unwrap_or(0));
        } else if let Some(tag) = command::parameter_tag(name) {
            out.push(tag);
            out.push(field_len("parameter value", value.len())?);
            out.extend_from_slice(value.as_bytes());
        }
    }
    Ok(out)
}

fn field_len(field: &'static str, len: usize) -> ProtocolResult<u8> {
    u8::try_from(len).map_err(|_| ProtocolError::FieldTooLong { field, len })
}

impl DecodedQuery {
    /// Rebuilds a plain query string from the decoded fields.
    pub fn plain_query(&self) -> String {
        let mut qs = format!("Cmd={}", self.command);
        qs.push_str(&format!("&LcID={}", self.locale));
        if !self.device_id.is_empty() {
            qs.push_str(&format!("&DeviceId={}", self.device_id));
        }
        if !self.device_type.is_empty() {
            qs.push_str(&format!("&DeviceType={}", self.device_type));
        }
        for (name, value) in &self.params {
            qs.push_str(&format!("&{name}={value}"));
        }
        qs
    }

    /// Returns true when the query carries the accept-multipart flag.
    pub fn accept_multipart(&self) -> bool {
        self.params
            .iter()
            .any(|(n, v)| n == "Options" && v == "AcceptMultiPart")
    }
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes.get(i + 1..i + 3);
                match hex.and_then(|h| u8::from_str_radix(std::str::from_utf8(h).ok()?, 16).ok())
                {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parses a plain query string into (name, value) pairs.
///
/// Values are percent-decoded. Works around clients that send the
/// command with a leading underscore (`Cmd=_Sync`).
pub fn parse_plain(qs: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for piece in qs.split('&') {
        if piece.is_empty() {
            continue;
        }
        let (name, value) = match piece.split_once('=') {
            Some((n, v)) => (n.to_string(), percent_decode(v.trim())),
            None => (piece.to_string(), String::new()),
        };
        let value = if name == "Cmd" {
            value.strip_prefix('_').map(str::to_string).unwrap_or(value)
        } else {
            value
        };
        out.push((name, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_query() -> DecodedQuery {
        DecodedQuery {
            protocol_version: "16.1".into(),
            command: "Sync".into(),
            locale: "0x0409".into(),
            device_id: B64.encode(b"device01"),
            policy_key: Some(1234),
            device_type: "SmartPhone".into(),
            params: vec![
                ("User".into(), "alice".into()),
                ("Options".into(), "AcceptMultiPart".into()),
            ],
        }
    }

    #[test]
    fn binary_roundtrip() {
        let q = sample_query();
        let raw = encode(&q).unwrap();
        let back = decode(&raw).unwrap();
        assert_eq!(back, q);
    }

    #[test]
    fn plain_query_rebuild() {
        let q = sample_query();
        let qs = q.plain_query();
        assert!(qs.starts_with("Cmd=Sync&LcID=0x0409"));
        assert!(qs.contains("DeviceType=SmartPhone"));
        assert!(qs.contains("User=alice"));
        assert!(qs.contains("Options=AcceptMultiPart"));
        assert!(q.accept_multipart());
    }

    #[test]
    fn unknown_codes_become_tokens() {
        let mut raw = encode(&sample_query()).unwrap();
        raw[1] = 99; // unlisted command code
        let q = decode(&raw).unwrap();
        assert_eq!(q.command, "Unknown99");
    }

    #[test]
    fn version_printing() {
        assert_eq!(print_version(161), "16.1");
        assert_eq!(print_version(121), "12.1");
        assert_eq!(print_version(25), "2.5");
        assert_eq!(parse_version("16.1"), 161);
        assert_eq!(parse_version("2.5"), 25);
    }

    #[test]
    fn base64_detection_requires_roundtrip() {
        let raw = encode(&sample_query()).unwrap();
        let qs = B64.encode(&raw);
        assert_eq!(base64_query(&qs), Some(raw));
        assert_eq!(base64_query("Cmd=Sync&User=alice"), None);
        assert_eq!(base64_query(""), None);
    }

    #[test]
    fn truncated_query_fails() {
        let raw = encode(&sample_query()).unwrap();
        assert!(decode(&raw[..3]).is_err());
    }

    #[test]
    fn oversized_fields_are_rejected() {
        let mut q = sample_query();
        q.device_id = B64.encode(vec![0u8; 300]);
        assert!(matches!(
            encode(&q).unwrap_err(),
            ProtocolError::FieldTooLong { field: "device id", len: 300 }
        ));

        let mut q = sample_query();
        q.device_type = "T".repeat(256);
        assert!(matches!(
            encode(&q).unwrap_err(),
            ProtocolError::FieldTooLong { field: "device type", len: 256 }
        ));
    }

    #[test]
    fn plain_parse_underscore_hack() {
        let parsed = parse_plain("Cmd=_Sync&User=bob%40example.com&DeviceId=x1");
        assert_eq!(parsed[0], ("Cmd".to_string(), "Sync".to_string()));
        assert_eq!(parsed[1].1, "bob@example.com");
    }

    proptest! {
        #[test]
        fn decode_recovers_arbitrary_fields(
            dev in proptest::collection::vec(any::<u8>(), 0..40),
            key in any::<u32>(),
            user in "[a-z]{1,12}",
        ) {
            let q = DecodedQuery {
                protocol_version: "14.1".into(),
                command: "Ping".into(),
                locale: "0x0407".into(),
                device_id: B64.encode(&dev),
                policy_key: Some(key),
                device_type: "Phone".into(),
                params: vec![("User".into(), user)],
            };
            let back = decode(&encode(&q).unwrap()).unwrap();
            prop_assert_eq!(back, q);
        }
    }
}
