//! WebSocket frame types and the outbound encoder (RFC 6455 Section 5).
//!
//! Decoding lives in [`parser`](super::parser); this module owns the shared
//! vocabulary (opcodes, close codes, protocol errors) and the encoder used on
//! the write path.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use std::fmt;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Default per-fragment payload size used by auto-fragmentation.
///
/// Sized so a fragment plus TCP/IP and frame overhead fits a 1500-byte MTU.
pub const DEFAULT_FRAGMENT_SIZE: usize = 1400;

/// WebSocket frame opcode (4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation frame (fragmented message).
    Continuation = 0x0,
    /// Text data frame.
    Text = 0x1,
    /// Binary data frame.
    Binary = 0x2,
    // 0x3-0x7 reserved for non-control frames
    /// Connection close control frame.
    Close = 0x8,
    /// Ping control frame.
    Ping = 0x9,
    /// Pong control frame.
    Pong = 0xA,
    // 0xB-0xF reserved for control frames
}

impl Opcode {
    /// Returns true if this is a control frame (Close, Ping, Pong).
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Returns true if this is a data frame (Continuation, Text, Binary).
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Continuation | Self::Text | Self::Binary)
    }

    /// Try to parse an opcode from the low nibble of a header byte.
    pub fn from_u8(value: u8) -> Result<Self, WsError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WsError::InvalidOpcode(value)),
        }
    }
}

/// Close codes the engine emits or recognises (RFC 6455 Section 7.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure (1000).
    Normal = 1000,
    /// Endpoint going away (1001).
    GoingAway = 1001,
    /// Protocol violation (1002).
    ProtocolError = 1002,
    /// Unsupported data (1003).
    Unsupported = 1003,
    /// No status received (1005), never put on the wire.
    NoStatusReceived = 1005,
    /// Abnormal closure (1006), never put on the wire.
    Abnormal = 1006,
    /// Payload inconsistent with message type, e.g. non-UTF-8 text (1007).
    InvalidPayload = 1007,
    /// Policy violation (1008).
    PolicyViolation = 1008,
    /// Message too big (1009).
    MessageTooBig = 1009,
    /// Mandatory extension missing (1010).
    MandatoryExtension = 1010,
    /// Unexpected condition on the server (1011).
    InternalError = 1011,
}

impl CloseCode {
    /// Returns true if this code can be sent in a close frame.
    #[must_use]
    pub const fn is_sendable(self) -> bool {
        !matches!(self, Self::NoStatusReceived | Self::Abnormal)
    }

    /// Raw wire value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code as Self
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({self:?})", self.as_u16())
    }
}

/// Protocol violations detected while decoding or refused while encoding.
///
/// Each variant maps onto the close code the connection fails with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsError {
    /// Opcode outside the RFC 6455 set.
    InvalidOpcode(u8),
    /// RSV1-3 set without a negotiated extension.
    ReservedBitsSet,
    /// Masking does not match the receiving role.
    UnmaskedClientFrame,
    /// A client received a masked frame.
    MaskedServerFrame,
    /// Control frame with FIN cleared.
    FragmentedControlFrame,
    /// Control frame payload above 125 bytes.
    ControlFrameTooLarge(u64),
    /// Close frame whose status code is truncated to one byte.
    InvalidClosePayload,
    /// Fragment sequencing broken (stray continuation or interleaved data frame).
    ProtocolViolation(&'static str),
    /// Declared or accumulated message size over the configured maximum.
    MessageTooLarge {
        /// Size the message would reach.
        size: u64,
        /// Configured maximum in bytes.
        max: usize,
    },
    /// Text message or close reason that is not valid UTF-8.
    InvalidUtf8,
}

impl WsError {
    /// The close code a connection is failed with for this violation.
    #[must_use]
    pub const fn close_code(&self) -> CloseCode {
        match self {
            Self::InvalidOpcode(_) => CloseCode::Unsupported,
            Self::MessageTooLarge { .. } => CloseCode::MessageTooBig,
            Self::InvalidUtf8 => CloseCode::InvalidPayload,
            Self::ReservedBitsSet
            | Self::UnmaskedClientFrame
            | Self::MaskedServerFrame
            | Self::FragmentedControlFrame
            | Self::ControlFrameTooLarge(_)
            | Self::InvalidClosePayload
            | Self::ProtocolViolation(_) => CloseCode::ProtocolError,
        }
    }
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOpcode(op) => write!(f, "invalid opcode: 0x{op:X}"),
            Self::ReservedBitsSet => write!(f, "reserved bits set without extension"),
            Self::UnmaskedClientFrame => write!(f, "client frame must be masked"),
            Self::MaskedServerFrame => write!(f, "server frame must not be masked"),
            Self::FragmentedControlFrame => write!(f, "control frame cannot be fragmented"),
            Self::ControlFrameTooLarge(size) => write!(
                f,
                "control frame payload too large: {size} bytes (max: {MAX_CONTROL_PAYLOAD})"
            ),
            Self::InvalidClosePayload => write!(f, "close frame with truncated status code"),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            Self::MessageTooLarge { size, max } => {
                write!(f, "message too large: {size} bytes (max: {max})")
            }
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 in text payload"),
        }
    }
}

impl std::error::Error for WsError {}

/// Role in the WebSocket connection (affects masking requirements).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client role: masks outgoing frames, expects unmasked input.
    Client,
    /// Server role: never masks, expects masked input.
    Server,
}

/// A single wire frame to be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)] // RFC 6455 exposes these as independent header bits.
pub struct Frame {
    /// Final fragment flag (FIN bit).
    pub fin: bool,
    /// Reserved bit 1.
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Explicit masking key; the encoder picks one for client frames when unset.
    pub mask_key: Option<[u8; 4]>,
    /// Payload data.
    pub payload: Vec<u8>,
}

impl Frame {
    /// A final (unfragmented) frame.
    #[must_use]
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask_key: None,
            payload: payload.into(),
        }
    }

    /// A text frame.
    #[must_use]
    pub fn text(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    /// A binary frame.
    #[must_use]
    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    /// A ping frame.
    #[must_use]
    pub fn ping(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    /// A pong frame.
    #[must_use]
    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    /// A close frame carrying `code` and an optional reason.
    #[must_use]
    pub fn close(code: Option<u16>, reason: Option<&str>) -> Self {
        Self::new(Opcode::Close, super::close::encode_payload(code, reason))
    }

    /// Clears FIN, marking the frame as a non-final fragment.
    #[must_use]
    pub fn non_final(mut self) -> Self {
        self.fin = false;
        self
    }

    /// Uses a fixed masking key.
    #[must_use]
    pub fn masked_with(mut self, key: [u8; 4]) -> Self {
        self.mask_key = Some(key);
        self
    }
}

/// Writes the header of one frame into `dst`.
///
/// Lengths above 125 use the 16-bit form, above 65535 the 64-bit form.
fn put_header(dst: &mut Vec<u8>, first_byte: u8, mask: Option<[u8; 4]>, payload_len: usize) {
    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    dst.push(first_byte);
    if payload_len <= MAX_CONTROL_PAYLOAD {
        dst.push(mask_bit | payload_len as u8);
    } else if payload_len <= usize::from(u16::MAX) {
        dst.push(mask_bit | 126);
        dst.extend_from_slice(&(payload_len as u16).to_be_bytes());
    } else {
        dst.push(mask_bit | 127);
        dst.extend_from_slice(&(payload_len as u64).to_be_bytes());
    }
    if let Some(key) = mask {
        dst.extend_from_slice(&key);
    }
}

/// Size of the header `put_header` writes for a payload of `payload_len`.
#[must_use]
pub const fn header_len(payload_len: usize, masked: bool) -> usize {
    let ext = if payload_len > u16::MAX as usize {
        8
    } else if payload_len > MAX_CONTROL_PAYLOAD {
        2
    } else {
        0
    };
    2 + ext + if masked { 4 } else { 0 }
}

/// Outbound frame encoder.
///
/// Server-role encoders never mask. Client-role encoders mask every frame,
/// drawing a fresh key from the OS RNG unless the frame carries one.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    role: Role,
}

impl FrameEncoder {
    /// Creates an encoder for the given role.
    #[must_use]
    pub const fn new(role: Role) -> Self {
        Self { role }
    }

    /// Encoder for frames written by a server.
    #[must_use]
    pub const fn server() -> Self {
        Self::new(Role::Server)
    }

    /// Encoder for frames written by a client.
    #[must_use]
    pub const fn client() -> Self {
        Self::new(Role::Client)
    }

    /// Appends one encoded frame to `dst`.
    pub fn encode_frame(&self, frame: &Frame, dst: &mut Vec<u8>) -> Result<(), WsError> {
        let payload_len = frame.payload.len();
        if frame.opcode.is_control() {
            if !frame.fin {
                return Err(WsError::FragmentedControlFrame);
            }
            if payload_len > MAX_CONTROL_PAYLOAD {
                return Err(WsError::ControlFrameTooLarge(payload_len as u64));
            }
        }

        let mut first_byte = frame.opcode as u8;
        if frame.fin {
            first_byte |= 0x80;
        }
        if frame.rsv1 {
            first_byte |= 0x40;
        }
        if frame.rsv2 {
            first_byte |= 0x20;
        }
        if frame.rsv3 {
            first_byte |= 0x10;
        }

        let mask = match (self.role, frame.mask_key) {
            (_, Some(key)) => Some(key),
            (Role::Client, None) => Some(generate_mask_key()),
            (Role::Server, None) => None,
        };

        dst.reserve(header_len(payload_len, mask.is_some()) + payload_len);
        put_header(dst, first_byte, mask, payload_len);
        let start = dst.len();
        dst.extend_from_slice(&frame.payload);
        if let Some(key) = mask {
            apply_mask(&mut dst[start..], key);
        }
        Ok(())
    }

    /// Encodes a whole message as a single final frame.
    pub fn encode(&self, opcode: Opcode, payload: &[u8]) -> Result<Vec<u8>, WsError> {
        let masked = self.role == Role::Client;
        let mut out = Vec::with_capacity(header_len(payload.len(), masked) + payload.len());
        self.encode_frame(&Frame::new(opcode, payload), &mut out)?;
        Ok(out)
    }

    /// Encodes a message as a run of fragments of at most `fragment_size`
    /// payload bytes each.
    ///
    /// Control frames and payloads that fit in one fragment come back as a
    /// single frame. The first fragment carries `opcode`, the rest
    /// `Continuation`, and only the last has FIN set.
    pub fn encode_fragmented(
        &self,
        opcode: Opcode,
        payload: &[u8],
        fragment_size: usize,
    ) -> Result<Vec<Vec<u8>>, WsError> {
        if opcode.is_control() || fragment_size == 0 || payload.len() <= fragment_size {
            return Ok(vec![self.encode(opcode, payload)?]);
        }

        let masked = self.role == Role::Client;
        let chunks = payload.chunks(fragment_size);
        let last = chunks.len() - 1;
        let mut frames = Vec::with_capacity(last + 1);
        for (index, chunk) in chunks.enumerate() {
            let frame = Frame {
                fin: index == last,
                opcode: if index == 0 { opcode } else { Opcode::Continuation },
                ..Frame::new(opcode, chunk)
            };
            let mut out = Vec::with_capacity(header_len(chunk.len(), masked) + chunk.len());
            self.encode_frame(&frame, &mut out)?;
            frames.push(out);
        }
        Ok(frames)
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::server()
    }
}

/// Apply XOR masking to payload data in place.
///
/// Masking is an involution: applying the same key twice restores the input.
pub fn apply_mask(payload: &mut [u8], mask_key: [u8; 4]) {
    apply_mask_at(payload, mask_key, 0);
}

/// Masks `payload` as if it started `offset` bytes into the masked stream.
///
/// Bytes up to the next multiple of four are handled one at a time; the
/// aligned remainder is XORed eight bytes at a time against the key
/// duplicated into a 64-bit word.
pub(crate) fn apply_mask_at(payload: &mut [u8], mask_key: [u8; 4], offset: usize) {
    let lead = ((4 - offset % 4) % 4).min(payload.len());
    let (head, body) = payload.split_at_mut(lead);
    for (i, byte) in head.iter_mut().enumerate() {
        *byte ^= mask_key[(offset + i) % 4];
    }

    let [k0, k1, k2, k3] = mask_key;
    let word = u64::from_ne_bytes([k0, k1, k2, k3, k0, k1, k2, k3]);
    let mut chunks = body.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        chunk.copy_from_slice(&(u64::from_ne_bytes(bytes) ^ word).to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}

/// Generate a mask key for client-to-server frames.
///
/// RFC 6455 §5.3 requires keys from a strong entropy source. If the OS RNG
/// is unavailable the key falls back to a time-derived value.
fn generate_mask_key() -> [u8; 4] {
    let mut key = [0u8; 4];
    if getrandom::getrandom(&mut key).is_err() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.subsec_nanos());
        key = nanos.to_le_bytes();
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_is_control() {
        assert!(!Opcode::Continuation.is_control());
        assert!(!Opcode::Text.is_control());
        assert!(!Opcode::Binary.is_control());
        assert!(Opcode::Close.is_control());
        assert!(Opcode::Ping.is_control());
        assert!(Opcode::Pong.is_control());
    }

    #[test]
    fn test_opcode_from_u8() {
        assert_eq!(Opcode::from_u8(0x1).unwrap(), Opcode::Text);
        assert_eq!(Opcode::from_u8(0xA).unwrap(), Opcode::Pong);
        assert_eq!(Opcode::from_u8(0xB), Err(WsError::InvalidOpcode(0xB)));
        assert_eq!(Opcode::from_u8(0x3), Err(WsError::InvalidOpcode(0x3)));
    }

    #[test]
    fn test_error_close_codes() {
        assert_eq!(WsError::InvalidOpcode(11).close_code(), CloseCode::Unsupported);
        assert_eq!(WsError::UnmaskedClientFrame.close_code(), CloseCode::ProtocolError);
        assert_eq!(
            WsError::MessageTooLarge { size: 10, max: 1 }.close_code(),
            CloseCode::MessageTooBig
        );
        assert_eq!(WsError::InvalidUtf8.close_code(), CloseCode::InvalidPayload);
        assert_eq!(WsError::FragmentedControlFrame.close_code(), CloseCode::ProtocolError);
    }

    #[test]
    fn test_apply_mask_matches_bytewise_xor() {
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let original: Vec<u8> = (0..=255u8).cycle().take(1031).collect();
        for offset in 0..4 {
            let mut fast = original.clone();
            apply_mask_at(&mut fast, key, offset);
            let slow: Vec<u8> = original
                .iter()
                .enumerate()
                .map(|(i, b)| b ^ key[(offset + i) % 4])
                .collect();
            assert_eq!(fast, slow, "offset {offset}");
        }
    }

    #[test]
    fn test_apply_mask_twice_restores() {
        let key = [1, 2, 3, 4];
        let mut payload = b"Hello".to_vec();
        apply_mask(&mut payload, key);
        assert_ne!(payload, b"Hello");
        apply_mask(&mut payload, key);
        assert_eq!(payload, b"Hello");
    }

    #[test]
    fn test_server_encode_short_text() {
        let out = FrameEncoder::server().encode(Opcode::Text, b"Hi").unwrap();
        assert_eq!(out, vec![0x81, 0x02, b'H', b'i']);
    }

    #[test]
    fn test_length_encoding_boundaries() {
        let encoder = FrameEncoder::server();
        let out = encoder.encode(Opcode::Binary, &[0u8; 125]).unwrap();
        assert_eq!(out[1], 125);
        assert_eq!(out.len(), 2 + 125);

        let out = encoder.encode(Opcode::Binary, &[0u8; 126]).unwrap();
        assert_eq!(out[1], 126);
        assert_eq!(u16::from_be_bytes([out[2], out[3]]), 126);

        let out = encoder.encode(Opcode::Binary, &vec![0u8; 65536]).unwrap();
        assert_eq!(out[1], 127);
        assert_eq!(out.len(), 10 + 65536);
    }

    #[test]
    fn test_client_encode_is_masked() {
        let frame = Frame::text("abc").masked_with([1, 2, 3, 4]);
        let mut out = Vec::new();
        FrameEncoder::client().encode_frame(&frame, &mut out).unwrap();
        assert_eq!(out[1], 0x80 | 3);
        assert_eq!(&out[2..6], &[1, 2, 3, 4]);
        assert_eq!(&out[6..], &[b'a' ^ 1, b'b' ^ 2, b'c' ^ 3]);
    }

    #[test]
    fn test_control_frame_validation() {
        let encoder = FrameEncoder::server();
        let err = encoder.encode(Opcode::Ping, &[0u8; 126]).unwrap_err();
        assert_eq!(err, WsError::ControlFrameTooLarge(126));

        let mut out = Vec::new();
        let err = encoder
            .encode_frame(&Frame::ping("x").non_final(), &mut out)
            .unwrap_err();
        assert_eq!(err, WsError::FragmentedControlFrame);
    }

    #[test]
    fn test_encode_fragmented_splits_payload() {
        let payload = vec![7u8; 3000];
        let frames = FrameEncoder::server()
            .encode_fragmented(Opcode::Binary, &payload, 1400)
            .unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0][0], 0x02);
        assert_eq!(frames[1][0], 0x00);
        assert_eq!(frames[2][0], 0x80);
        assert_eq!(frames[0].len(), header_len(1400, false) + 1400);
        assert_eq!(frames[2].len(), header_len(200, false) + 200);
    }

    #[test]
    fn test_encode_fragmented_small_payload_single_frame() {
        let frames = FrameEncoder::server()
            .encode_fragmented(Opcode::Text, b"short", 1400)
            .unwrap();
        assert_eq!(frames, vec![vec![0x81, 5, b's', b'h', b'o', b'r', b't']]);
    }

    #[test]
    fn test_close_code_display() {
        assert_eq!(CloseCode::MessageTooBig.to_string(), "1009 (MessageTooBig)");
        assert!(!CloseCode::Abnormal.is_sendable());
        assert!(CloseCode::PolicyViolation.is_sendable());
    }
}
