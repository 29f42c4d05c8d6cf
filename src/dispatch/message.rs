use serde::{Deserialize, Serialize};

/// Protocol header fields carried alongside a short message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeader {
    pub command_id: u32,
    pub sequence_number: u32,
    pub source_ton: u8,
    pub source_npi: u8,
    pub dest_ton: u8,
    pub dest_npi: u8,
    pub message_id: Option<String>,
}

/// An inbound message as seen by the dispatcher.
///
/// Implemented by the host's decoded protocol frame.
pub trait IncomingMessage: Send + Sync {
    /// Source address.
    fn from(&self) -> &str;

    /// Destination address; the routing key.
    fn to(&self) -> &str;

    /// Message text; the matching subject.
    fn body(&self) -> &str;

    fn header(&self) -> MessageHeader;
}

/// Plain short message value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortMessage {
    pub from: String,
    pub to: String,
    pub body: String,
    #[serde(default)]
    pub command_id: u32,
    #[serde(default)]
    pub sequence_number: u32,
    #[serde(default)]
    pub source_ton: u8,
    #[serde(default)]
    pub source_npi: u8,
    #[serde(default)]
    pub dest_ton: u8,
    #[serde(default)]
    pub dest_npi: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl ShortMessage {
    pub fn new(from: impl Into<String>, to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            body: body.into(),
            ..Default::default()
        }
    }
}

impl IncomingMessage for ShortMessage {
    fn from(&self) -> &str {
        &self.from
    }

    fn to(&self) -> &str {
        &self.to
    }

    fn body(&self) -> &str {
        &self.body
    }

    fn header(&self) -> MessageHeader {
        MessageHeader {
            command_id: self.command_id,
            sequence_number: self.sequence_number,
            source_ton: self.source_ton,
            source_npi: self.source_npi,
            dest_ton: self.dest_ton,
            dest_npi: self.dest_npi,
            message_id: self.message_id.clone(),
        }
    }
}
