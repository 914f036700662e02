//! Request decoding and response encoding over raw HTTP metadata.
//!
//! The decoder recovers the command, protocol version, device
//! identity and body document from whichever spelling the client
//! used: a packed base64 query string or a plain one, a binary body,
//! plain XML, or a raw mail message. The encoder mirrors this and
//! assembles multipart frames when the client asked for them.

use asgw_document::{xml, BodyCodec, Document};
use asgw_engine::Session;
use asgw_protocol::{multipart, query};
use base64::prelude::*;
use tracing::{debug, warn};

use crate::error::ServerResult;

/// Content type of binary request and response bodies.
pub const CT_WBXML: &str = "application/vnd.ms-sync.wbxml";
/// Content type of multipart response bodies.
pub const CT_MULTIPART: &str = "application/vnd.ms-sync.multipart";
/// Content type of plain XML bodies.
pub const CT_XML: &str = "text/xml";

/// Raw HTTP metadata of one request.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    /// Request method.
    pub method: String,
    /// Query string, without the leading `?`.
    pub query: String,
    /// Header (name, value) pairs.
    pub headers: Vec<(String, String)>,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl RawRequest {
    /// Returns a header value, matching the name case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A decoded request ready for dispatch.
#[derive(Debug)]
pub struct DecodedRequest {
    /// Resolved command name, when the request names one.
    pub command: Option<String>,
    /// Protocol version, e.g. `16.1`.
    pub protocol_version: String,
    /// Device id.
    pub device_id: String,
    /// Device type string.
    pub device_type: String,
    /// Policy key, when supplied.
    pub policy_key: Option<u32>,
    /// Remaining query parameters.
    pub params: Vec<(String, String)>,
    /// Whether the client accepts a multipart response.
    pub accept_multipart: bool,
    /// Whether the client spoke plain XML instead of the binary form.
    pub plain_xml: bool,
    /// Parsed body; `None` marks an autodiscovery probe.
    pub body: Option<Document>,
}

impl DecodedRequest {
    /// Returns a query parameter value.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Decodes one raw request.
pub fn decode_request(raw: &RawRequest, codec: &dyn BodyCodec) -> ServerResult<DecodedRequest> {
    // Query string first: binary when base64 round-trips, else plain.
    let (mut command, mut version, device_id, device_type, mut policy_key, params, multipart_flag) =
        match query::base64_query(&raw.query) {
            Some(bytes) => {
                let q = query::decode(&bytes)?;
                debug!(query = %q.plain_query(), "binary query decoded");
                let multi = q.accept_multipart();
                (
                    Some(q.command),
                    Some(q.protocol_version),
                    q.device_id,
                    q.device_type,
                    q.policy_key,
                    q.params,
                    multi,
                )
            }
            None => {
                let mut pairs = query::parse_plain(&raw.query);
                let take = |pairs: &mut Vec<(String, String)>, name: &str| {
                    pairs
                        .iter()
                        .position(|(n, _)| n == name)
                        .map(|i| pairs.remove(i).1)
                };
                let command = take(&mut pairs, "Cmd");
                let device_id = take(&mut pairs, "DeviceId").unwrap_or_default();
                let device_type = take(&mut pairs, "DeviceType").unwrap_or_default();
                (command, None, device_id, device_type, None, pairs, false)
            }
        };

    // Headers override what the query did not carry.
    if version.is_none() {
        version = raw.header("MS-ASProtocolVersion").map(str::to_owned);
    }
    if policy_key.is_none() {
        policy_key = raw.header("X-MS-PolicyKey").and_then(|v| v.parse().ok());
    }
    let accept_multipart =
        multipart_flag || raw.header("MS-ASAcceptMultiPart") == Some("T");

    let content_type = raw.header("Content-Type").unwrap_or("").to_ascii_lowercase();
    let plain_xml = !content_type.contains("ms-sync");

    let body = if raw.body.is_empty() {
        // An empty body is the command itself, or an autodiscovery
        // probe when no command was recovered. Binary-protocol
        // clients poll Ping and Sync this way, so the codec is never
        // consulted for an empty body.
        command.as_deref().map(Document::new)
    } else if content_type.contains("ms-sync") {
        Some(codec.decode(&raw.body).map_err(|err| {
            let saved = err.raw_input().map_or(0, <[u8]>::len);
            warn!(saved, "binary body decode failed");
            err
        })?)
    } else if content_type.starts_with("message/rfc822") {
        // Raw mail: wrap the bytes under the command element.
        let name = command.get_or_insert_with(|| "SendMail".to_owned()).clone();
        let mut doc = Document::new(name);
        let root = doc.root();
        doc.add_leaf(root, "Mime", String::from_utf8_lossy(&raw.body));
        Some(doc)
    } else {
        Some(xml::parse(&String::from_utf8_lossy(&raw.body))?)
    };

    // The body names the command when the query did not.
    if command.is_none() {
        if let Some(doc) = &body {
            command = Some(doc.root_name().to_owned());
        }
    }

    Ok(DecodedRequest {
        command,
        protocol_version: version.unwrap_or_else(|| "14.1".to_owned()),
        device_id,
        device_type,
        policy_key,
        params,
        accept_multipart,
        plain_xml,
        body,
    })
}

/// An encoded response body.
#[derive(Debug)]
pub struct EncodedResponse {
    /// Content type of the body.
    pub content_type: &'static str,
    /// Body bytes.
    pub body: Vec<u8>,
}

/// Encodes a response document for the client that sent `request`.
///
/// Multipart clients get base64 `Data` leaves pulled out of the
/// document and framed as separate parts, part 0 being the encoded
/// document itself.
pub fn encode_response(
    session: &Session,
    request: &DecodedRequest,
    doc: &Document,
    codec: &dyn BodyCodec,
) -> ServerResult<EncodedResponse> {
    if request.plain_xml {
        return Ok(EncodedResponse {
            content_type: CT_XML,
            body: xml::serialize(doc).into_bytes(),
        });
    }
    if session.multipart {
        let mut doc = doc.clone();
        let mut parts: Vec<Vec<u8>> = vec![Vec::new()];
        for data in doc.find_all(doc.root(), "Data") {
            let raw = doc
                .text(data)
                .and_then(|t| BASE64_STANDARD.decode(t).ok())
                .unwrap_or_default();
            parts.push(raw);
            doc.detach(data)?;
        }
        parts[0] = codec.encode(&doc)?;
        debug!(parts = parts.len(), "multipart response assembled");
        return Ok(EncodedResponse {
            content_type: CT_MULTIPART,
            body: multipart::build(&parts),
        });
    }
    Ok(EncodedResponse {
        content_type: CT_WBXML,
        body: codec.encode(doc)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use asgw_document::TagCodec;
    use asgw_store::DeviceSessions;

    fn raw(query: &str, content_type: &str, body: &[u8]) -> RawRequest {
        RawRequest {
            method: "POST".into(),
            query: query.into(),
            headers: vec![("Content-Type".into(), content_type.into())],
            body: body.to_vec(),
        }
    }

    #[test]
    fn plain_query_and_xml_body() {
        let body = b"<Sync><Collections/></Sync>";
        let raw = raw("Cmd=Sync&User=alice&DeviceId=dev1", "text/xml", body);
        let req = decode_request(&raw, &TagCodec).unwrap();
        assert_eq!(req.command.as_deref(), Some("Sync"));
        assert_eq!(req.device_id, "dev1");
        assert_eq!(req.param("User"), Some("alice"));
        assert!(req.plain_xml);
        assert_eq!(req.body.unwrap().root_name(), "Sync");
    }

    #[test]
    fn binary_query_and_binary_body() {
        let mut doc = Document::new("Sync");
        let root = doc.root();
        doc.add_child(root, "Collections");
        let body = TagCodec.encode(&doc).unwrap();

        let q = asgw_protocol::DecodedQuery {
            protocol_version: "16.1".into(),
            command: "Sync".into(),
            locale: "0x0409".into(),
            device_id: BASE64_STANDARD.encode(b"dev1"),
            policy_key: Some(7),
            device_type: "Phone".into(),
            params: vec![("Options".into(), "AcceptMultiPart".into())],
        };
        let qs = BASE64_STANDARD.encode(query::encode(&q).unwrap());
        let raw = raw(&qs, CT_WBXML, &body);
        let req = decode_request(&raw, &TagCodec).unwrap();
        assert_eq!(req.command.as_deref(), Some("Sync"));
        assert_eq!(req.protocol_version, "16.1");
        assert_eq!(req.policy_key, Some(7));
        assert!(req.accept_multipart);
        assert!(!req.plain_xml);
    }

    #[test]
    fn rfc822_body_is_wrapped() {
        let raw = raw(
            "Cmd=SendMail&DeviceId=d",
            "message/rfc822",
            b"From: a@b\r\n\r\nhi",
        );
        let req = decode_request(&raw, &TagCodec).unwrap();
        let doc = req.body.unwrap();
        assert_eq!(doc.root_name(), "SendMail");
        assert!(doc
            .child_text(doc.root(), "Mime")
            .unwrap()
            .starts_with("From: a@b"));
    }

    #[test]
    fn empty_body_synthesizes_command_element() {
        let raw = raw("Cmd=Ping&DeviceId=d", "text/xml", b"");
        let req = decode_request(&raw, &TagCodec).unwrap();
        assert_eq!(req.body.unwrap().root_name(), "Ping");
    }

    #[test]
    fn empty_binary_body_synthesizes_command() {
        // an empty long-poll body must never reach the codec
        let raw = raw("Cmd=Ping&DeviceId=d", CT_WBXML, b"");
        let req = decode_request(&raw, &TagCodec).unwrap();
        assert!(!req.plain_xml);
        assert_eq!(req.body.unwrap().root_name(), "Ping");
    }

    #[test]
    fn empty_body_without_command_is_a_probe() {
        let raw = raw("", "text/xml", b"");
        let req = decode_request(&raw, &TagCodec).unwrap();
        assert!(req.command.is_none());
        assert!(req.body.is_none());
    }

    #[test]
    fn undecodable_binary_body_is_an_error() {
        let raw = raw("Cmd=Sync", CT_WBXML, b"not a document");
        let err = decode_request(&raw, &TagCodec).unwrap_err();
        assert_eq!(err.http_status(), 501);
    }

    #[test]
    fn multipart_encoding_extracts_data_parts() {
        let sessions = DeviceSessions::new();
        let mut session = Session::new(sessions.device("d"));
        session.multipart = true;

        let mut doc = Document::new("ItemOperations");
        let root = doc.root();
        let props = doc.add_child(root, "Properties");
        doc.add_leaf(props, "Part", "1");
        doc.add_leaf(props, "Data", BASE64_STANDARD.encode(b"PAYLOAD"));

        let request = DecodedRequest {
            command: Some("ItemOperations".into()),
            protocol_version: "16.1".into(),
            device_id: "d".into(),
            device_type: "Phone".into(),
            policy_key: None,
            params: Vec::new(),
            accept_multipart: true,
            plain_xml: false,
            body: None,
        };
        let enc = encode_response(&session, &request, &doc, &TagCodec).unwrap();
        assert_eq!(enc.content_type, CT_MULTIPART);
        let parts = multipart::parse(&enc.body).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1], b"PAYLOAD");
        // part 0 no longer carries the Data leaf
        let primary = TagCodec.decode(&parts[0]).unwrap();
        assert!(primary.find(primary.root(), "Data").is_none());
        assert!(primary.find(primary.root(), "Part").is_some());
    }
}
