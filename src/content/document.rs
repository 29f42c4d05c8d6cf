//! Canonical intermediate document built from an inbound message.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::dispatch::IncomingMessage;

/// Width addresses are padded to.
const ADDRESS_WIDTH: usize = 20;

/// Width the message id is padded to.
const MESSAGE_ID_WIDTH: usize = 65;

/// Structured view of a message, independent of any payload format.
///
/// Built deterministically from the message fields plus one generation
/// instant rendered in two timestamp formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalDocument {
    pub command_id: u32,
    pub sequence_number: u32,
    pub source_ton: u8,
    pub source_npi: u8,
    pub source_address: String,
    pub destination_ton: u8,
    pub destination_npi: u8,
    pub destination_address: String,
    pub message_id: String,
    pub message: String,
    pub message_base64: String,
    /// `YYYY-MM-ddTHH:mm:ss.SSSSS+HH:MM`
    pub header_timestamp: String,
    /// `ddMMYYYYHHmm<zone id>`
    pub payload_timestamp: String,
}

impl CanonicalDocument {
    /// Build the document for `msg`, stamped at `now` in zone `tz`.
    pub fn from_message<M>(msg: &M, now: DateTime<Utc>, tz: Tz) -> Self
    where
        M: IncomingMessage + ?Sized,
    {
        let header = msg.header();
        let body = msg.body();
        let local = now.with_timezone(&tz);

        // Five fraction digits: milliseconds followed by two zeros.
        let header_timestamp = format!(
            "{}.{:05}{}",
            local.format("%Y-%m-%dT%H:%M:%S"),
            local.timestamp_subsec_millis() * 100,
            local.format("%:z"),
        );
        let payload_timestamp = format!("{}{}", local.format("%d%m%Y%H%M"), tz.name());

        Self {
            command_id: header.command_id,
            sequence_number: header.sequence_number,
            source_ton: header.source_ton,
            source_npi: header.source_npi,
            source_address: msg.from().to_string(),
            destination_ton: header.dest_ton,
            destination_npi: header.dest_npi,
            destination_address: msg.to().to_string(),
            message_id: header.message_id.unwrap_or_default(),
            message: body.to_string(),
            message_base64: STANDARD.encode(body.as_bytes()),
            header_timestamp,
            payload_timestamp,
        }
    }

    /// Raw value of a named field, as used by templates.
    pub fn field(&self, name: &str) -> Option<String> {
        let value = match name {
            "command_id" => self.command_id.to_string(),
            "sequence_number" => self.sequence_number.to_string(),
            "source_ton" => self.source_ton.to_string(),
            "source_npi" => self.source_npi.to_string(),
            "source_address" => self.source_address.clone(),
            "destination_ton" => self.destination_ton.to_string(),
            "destination_npi" => self.destination_npi.to_string(),
            "destination_address" => self.destination_address.clone(),
            "message_id" => self.message_id.clone(),
            "message" => self.message.clone(),
            "message_base64" => self.message_base64.clone(),
            "header_timestamp" => self.header_timestamp.clone(),
            "payload_timestamp" => self.payload_timestamp.clone(),
            "xml" => self.to_xml(),
            _ => return None,
        };
        Some(value)
    }

    /// Whether `name` is a field templates may reference.
    pub fn has_field(name: &str) -> bool {
        FIELDS.contains(&name)
    }

    /// Serialize to the canonical XML layout.
    pub fn to_xml(&self) -> String {
        let mut buf = String::with_capacity(512 + self.message.len() * 2);
        buf.push_str("<smpp>\n");

        buf.push_str("<header>");
        push_element(&mut buf, "command_id", &self.command_id.to_string());
        push_element(&mut buf, "sequence_number", &self.sequence_number.to_string());
        buf.push_str("</header>\n");

        buf.push_str("<source>");
        push_element(&mut buf, "ton", &self.source_ton.to_string());
        push_element(&mut buf, "npi", &self.source_npi.to_string());
        push_element(
            &mut buf,
            "address",
            &fill_right(&escape_xml(&self.source_address), ADDRESS_WIDTH),
        );
        buf.push_str("</source>\n");

        buf.push_str("<destination>");
        push_element(&mut buf, "ton", &self.destination_ton.to_string());
        push_element(&mut buf, "npi", &self.destination_npi.to_string());
        push_element(
            &mut buf,
            "address",
            &fill_right(&escape_xml(&self.destination_address), ADDRESS_WIDTH),
        );
        buf.push_str("</destination>\n");

        push_element(
            &mut buf,
            "messageid",
            &fill_right(&escape_xml(&self.message_id), MESSAGE_ID_WIDTH),
        );
        buf.push('\n');

        push_element(&mut buf, "message", &escape_xml(&self.message));
        buf.push('\n');
        push_element(&mut buf, "messageBase64", &self.message_base64);
        buf.push('\n');

        push_element(&mut buf, "headertimestamp", &escape_xml(&self.header_timestamp));
        push_element(&mut buf, "payloadtimestamp", &escape_xml(&self.payload_timestamp));

        buf.push_str("</smpp>\n");
        buf
    }
}

const FIELDS: &[&str] = &[
    "command_id",
    "sequence_number",
    "source_ton",
    "source_npi",
    "source_address",
    "destination_ton",
    "destination_npi",
    "destination_address",
    "message_id",
    "message",
    "message_base64",
    "header_timestamp",
    "payload_timestamp",
    "xml",
];

fn push_element(buf: &mut String, name: &str, value: &str) {
    buf.push('<');
    buf.push_str(name);
    buf.push('>');
    buf.push_str(value);
    buf.push_str("</");
    buf.push_str(name);
    buf.push('>');
}

/// Right-pad `value` with spaces to `width` characters.
///
/// A value already at or past `width` still gets one trailing space; existing
/// consumers of the fixed-width fields rely on this.
pub(crate) fn fill_right(value: &str, width: usize) -> String {
    let len = value.chars().count();
    let pad = if len >= width { 1 } else { width - len };

    let mut out = String::with_capacity(value.len() + pad);
    out.push_str(value);
    out.extend(std::iter::repeat(' ').take(pad));
    out
}

/// Escape text for XML 1.1 content.
///
/// NUL is dropped; other restricted control characters become character
/// references.
pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\0' => {}
            c if is_restricted(c) => {
                out.push_str("&#");
                out.push_str(&(c as u32).to_string());
                out.push(';');
            }
            c => out.push(c),
        }
    }
    out
}

fn is_restricted(c: char) -> bool {
    matches!(
        c as u32,
        0x01..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F | 0x7F..=0x84 | 0x86..=0x9F
    )
}
