//! Close frame payloads and the server's close-echo rule (RFC 6455 Section 7).
//!
//! A close payload is empty, or a big-endian status code optionally followed
//! by a UTF-8 reason. When a peer closes, the server answers with a close
//! frame whose code is derived from what the peer sent:
//!
//! | Peer sent | Server echoes |
//! |-----------|---------------|
//! | empty body | 1000 |
//! | 1-byte body | 1002 |
//! | reason that is not UTF-8 | 1007 |
//! | 1000-1003, 1007-1011 | 1000 |
//! | 3000-4999 | the same code |
//! | anything else | 1002 |

use super::{CloseCode, WsError};

/// Parsed close frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloseReason {
    /// Raw status code, if the payload carried one.
    pub code: Option<u16>,
    /// Reason text, if present.
    pub text: Option<String>,
}

impl CloseReason {
    /// A reason with a known code and optional text.
    #[must_use]
    pub fn new(code: CloseCode, text: Option<&str>) -> Self {
        Self {
            code: Some(code.as_u16()),
            text: text.map(String::from),
        }
    }

    /// Parse a close frame payload.
    ///
    /// # Errors
    ///
    /// `WsError::InvalidClosePayload` for a 1-byte payload and
    /// `WsError::InvalidUtf8` when the reason is not UTF-8.
    pub fn parse(payload: &[u8]) -> Result<Self, WsError> {
        match payload {
            [] => Ok(Self::default()),
            [_] => Err(WsError::InvalidClosePayload),
            [hi, lo, rest @ ..] => {
                let code = u16::from_be_bytes([*hi, *lo]);
                let text = if rest.is_empty() {
                    None
                } else {
                    let text = std::str::from_utf8(rest).map_err(|_| WsError::InvalidUtf8)?;
                    Some(text.to_owned())
                };
                Ok(Self {
                    code: Some(code),
                    text,
                })
            }
        }
    }

    /// The known close code, if the raw code maps onto one.
    #[must_use]
    pub fn known_code(&self) -> Option<CloseCode> {
        self.code.and_then(close_code_from_u16)
    }

    /// Encode this reason as a close frame payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        encode_payload(self.code, self.text.as_deref())
    }
}

/// Builds a close payload from a raw code and optional reason.
///
/// A reason without a code is dropped, since the wire format cannot carry it.
#[must_use]
pub fn encode_payload(code: Option<u16>, reason: Option<&str>) -> Vec<u8> {
    match (code, reason) {
        (None, _) => Vec::new(),
        (Some(code), None) => code.to_be_bytes().to_vec(),
        (Some(code), Some(reason)) => {
            let mut buf = Vec::with_capacity(2 + reason.len());
            buf.extend_from_slice(&code.to_be_bytes());
            buf.extend_from_slice(reason.as_bytes());
            buf
        }
    }
}

/// Maps a raw status code onto the known set.
#[must_use]
pub fn close_code_from_u16(code: u16) -> Option<CloseCode> {
    match code {
        1000 => Some(CloseCode::Normal),
        1001 => Some(CloseCode::GoingAway),
        1002 => Some(CloseCode::ProtocolError),
        1003 => Some(CloseCode::Unsupported),
        1005 => Some(CloseCode::NoStatusReceived),
        1006 => Some(CloseCode::Abnormal),
        1007 => Some(CloseCode::InvalidPayload),
        1008 => Some(CloseCode::PolicyViolation),
        1009 => Some(CloseCode::MessageTooBig),
        1010 => Some(CloseCode::MandatoryExtension),
        1011 => Some(CloseCode::InternalError),
        _ => None,
    }
}

/// Check if a raw code value may appear in a close frame.
///
/// - 1000-1003, 1007-1011: standard codes
/// - 3000-3999: registered (IANA)
/// - 4000-4999: private use
#[must_use]
pub fn is_valid_code(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
}

/// The status code the server echoes in reply to a peer's close payload.
#[must_use]
pub fn reply_code(payload: &[u8]) -> u16 {
    match CloseReason::parse(payload) {
        Ok(CloseReason { code: None, .. }) => CloseCode::Normal.as_u16(),
        Ok(CloseReason {
            code: Some(code), ..
        }) => match code {
            1000..=1003 | 1007..=1011 => CloseCode::Normal.as_u16(),
            3000..=4999 => code,
            _ => CloseCode::ProtocolError.as_u16(),
        },
        Err(err) => err.close_code().as_u16(),
    }
}

/// State of the close handshake on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseState {
    /// No close frame exchanged.
    #[default]
    Open,
    /// We sent a close frame first.
    CloseSent,
    /// The peer's close frame arrived and was answered.
    Closed,
}
