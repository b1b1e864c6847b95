//! Resumable, chunk-agnostic WebSocket message parser.
//!
//! [`MessageParser::feed`] accepts any slice of the inbound byte stream,
//! consumes as much as it can and reports one of three outcomes. All partial
//! progress (header bytes, length bytes, mask bytes, payload offset) lives in
//! the parser, so consecutive calls may hand it bytes from unrelated buffers.
//!
//! ```text
//! HeaderByte1 → HeaderByte2 → ShortLength | LongLength → MaskKey → Validate
//!      ↑                                                              │
//!      │                                                           Payload
//!      │                                                              │
//!      └──── First / Middle fragment ─────────── Done ←───────────────┘
//!                                                  │
//!                                       Single / Last → MessageReady
//! ```
//!
//! # Example
//!
//! ```
//! use wsengine::net::websocket::{FeedOutcome, MessageParser, Opcode};
//!
//! let mut parser = MessageParser::server(1024);
//! // Masked "Hi" split across two reads.
//! let wire = [0x81, 0x82, 1, 2, 3, 4, b'H' ^ 1, b'i' ^ 2];
//!
//! let first = parser.feed(&wire[..3], 0);
//! assert_eq!(first.outcome, FeedOutcome::NeedMoreData);
//!
//! let second = parser.feed(&wire[3..], 0);
//! assert_eq!(second.outcome, FeedOutcome::MessageReady);
//! let message = parser.take_message().unwrap();
//! assert_eq!(message.opcode, Opcode::Text);
//! assert_eq!(message.payload, b"Hi");
//! ```

use super::frame::{apply_mask_at, CloseCode, Opcode, Role, WsError, MAX_CONTROL_PAYLOAD};

/// Position of a frame within a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSeq {
    /// An unfragmented message (or any control frame).
    Single,
    /// Opening fragment: data opcode with FIN clear.
    First,
    /// Continuation with FIN clear.
    Middle,
    /// Continuation with FIN set.
    Last,
}

/// Result of one [`MessageParser::feed`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Every byte up to the end of the buffer was consumed.
    NeedMoreData,
    /// A whole message is available through [`MessageParser::take_message`].
    MessageReady,
    /// The stream broke the protocol; fail the connection with this code.
    ProtocolError(CloseCode),
}

/// Cursor and outcome returned by [`MessageParser::feed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feed {
    /// Index into the fed buffer of the first unconsumed byte.
    pub cursor: usize,
    /// What the parser reached.
    pub outcome: FeedOutcome,
}

/// A reassembled application-visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Text, Binary, or one of the control opcodes.
    pub opcode: Opcode,
    /// Unmasked payload.
    pub payload: Vec<u8>,
}

impl Message {
    /// A message with the given opcode.
    #[must_use]
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// A text message.
    #[must_use]
    pub fn text(payload: impl Into<String>) -> Self {
        Self::new(Opcode::Text, payload.into().into_bytes())
    }

    /// A binary message.
    #[must_use]
    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    /// The payload as text, for text messages.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self.opcode {
            Opcode::Text => std::str::from_utf8(&self.payload).ok(),
            _ => None,
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True when the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Parse state. Index-carrying variants record how many bytes of a
/// multi-byte field were already consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    HeaderByte1,
    HeaderByte2,
    ShortLength { read: usize },
    LongLength { read: usize },
    MaskKey { read: usize },
    Validate,
    Payload,
    Done,
    MessageReady,
    Failed(CloseCode),
}

/// Header fields of the frame being parsed.
#[derive(Debug, Clone, Copy, Default)]
struct Header {
    first: u8,
    masked: bool,
    length: [u8; 8],
    mask: [u8; 4],
    payload_len: u64,
}

impl Header {
    const fn fin(&self) -> bool {
        self.first & 0x80 != 0
    }

    const fn rsv(&self) -> u8 {
        self.first & 0x70
    }

    const fn opcode_bits(&self) -> u8 {
        self.first & 0x0F
    }
}

/// Incremental decoder turning a byte stream into [`Message`]s.
#[derive(Debug)]
pub struct MessageParser {
    role: Role,
    max_message_size: usize,
    state: State,
    header: Header,
    seq: FrameSeq,
    /// Opcode of the frame being read (Continuation for fragments).
    frame_opcode: Opcode,
    /// Opcode of the open fragmented message. At most one can be open.
    pending: Option<Opcode>,
    payload_read: u64,
    /// Data message under assembly.
    data: Vec<u8>,
    /// Control frame payload, kept apart so control frames may interleave fragments.
    control: Vec<u8>,
    ready: Option<Message>,
    violation: Option<WsError>,
}

impl MessageParser {
    /// Default maximum message size (16 MB).
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

    /// Creates a parser for the given receiving role.
    #[must_use]
    pub fn new(role: Role, max_message_size: usize) -> Self {
        Self {
            role,
            max_message_size,
            state: State::HeaderByte1,
            header: Header::default(),
            seq: FrameSeq::Single,
            frame_opcode: Opcode::Continuation,
            pending: None,
            payload_read: 0,
            data: Vec::new(),
            control: Vec::new(),
            ready: None,
            violation: None,
        }
    }

    /// Parser for frames received by a server (input must be masked).
    #[must_use]
    pub fn server(max_message_size: usize) -> Self {
        Self::new(Role::Server, max_message_size)
    }

    /// Parser for frames received by a client (input must not be masked).
    #[must_use]
    pub fn client(max_message_size: usize) -> Self {
        Self::new(Role::Client, max_message_size)
    }

    /// Configured maximum message size.
    #[must_use]
    pub const fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Position of the most recently validated frame.
    #[must_use]
    pub const fn frame_seq(&self) -> FrameSeq {
        self.seq
    }

    /// True while a fragmented message is open.
    #[must_use]
    pub const fn in_fragmented_message(&self) -> bool {
        self.pending.is_some()
    }

    /// The violation that failed the stream, if any.
    #[must_use]
    pub const fn violation(&self) -> Option<&WsError> {
        self.violation.as_ref()
    }

    /// Returns and clears the last completed message.
    ///
    /// Meaningful only right after `feed` reported `MessageReady`.
    pub fn take_message(&mut self) -> Option<Message> {
        if self.state == State::MessageReady {
            self.state = State::HeaderByte1;
        }
        self.ready.take()
    }

    /// Drops all progress and returns to the initial state.
    pub fn reset(&mut self) {
        let (role, max) = (self.role, self.max_message_size);
        *self = Self::new(role, max);
    }

    /// Consumes bytes from `buf[offset..]`.
    ///
    /// Returns the cursor just past the last consumed byte. On
    /// `MessageReady` the cursor may be short of `buf.len()`; call `feed`
    /// again from it after taking the message. On `NeedMoreData` it equals
    /// `buf.len()`.
    pub fn feed(&mut self, buf: &[u8], offset: usize) -> Feed {
        let limit = buf.len();
        let mut cursor = offset.min(limit);

        loop {
            match self.state {
                State::HeaderByte1 => {
                    if cursor == limit {
                        return need_more(cursor);
                    }
                    self.header = Header {
                        first: buf[cursor],
                        ..Header::default()
                    };
                    cursor += 1;
                    self.state = State::HeaderByte2;
                }
                State::HeaderByte2 => {
                    if cursor == limit {
                        return need_more(cursor);
                    }
                    let byte = buf[cursor];
                    cursor += 1;
                    self.header.masked = byte & 0x80 != 0;
                    self.state = match byte & 0x7F {
                        126 => State::ShortLength { read: 0 },
                        127 => State::LongLength { read: 0 },
                        len => {
                            self.header.payload_len = u64::from(len);
                            self.after_length()
                        }
                    };
                }
                State::ShortLength { read } => {
                    let read = self.fill_length(buf, &mut cursor, read, 2);
                    if read < 2 {
                        self.state = State::ShortLength { read };
                        return need_more(cursor);
                    }
                    let [hi, lo, ..] = self.header.length;
                    self.header.payload_len = u64::from(u16::from_be_bytes([hi, lo]));
                    self.state = self.after_length();
                }
                State::LongLength { read } => {
                    let read = self.fill_length(buf, &mut cursor, read, 8);
                    if read < 8 {
                        self.state = State::LongLength { read };
                        return need_more(cursor);
                    }
                    self.header.payload_len = u64::from_be_bytes(self.header.length);
                    self.state = self.after_length();
                }
                State::MaskKey { read } => {
                    let take = (4 - read).min(limit - cursor);
                    self.header.mask[read..read + take]
                        .copy_from_slice(&buf[cursor..cursor + take]);
                    cursor += take;
                    if read + take < 4 {
                        self.state = State::MaskKey { read: read + take };
                        return need_more(cursor);
                    }
                    self.state = State::Validate;
                }
                State::Validate => match self.validate() {
                    Ok(()) => {
                        self.payload_read = 0;
                        self.state = State::Payload;
                    }
                    Err(err) => return self.fail(err, cursor),
                },
                State::Payload => {
                    let remaining = self.header.payload_len - self.payload_read;
                    if remaining == 0 {
                        self.state = State::Done;
                        continue;
                    }
                    if cursor == limit {
                        return need_more(cursor);
                    }
                    let take = usize::try_from(remaining)
                        .map_or(limit - cursor, |r| r.min(limit - cursor));
                    self.copy_payload(&buf[cursor..cursor + take]);
                    cursor += take;
                    self.payload_read += take as u64;
                }
                State::Done => match self.complete_frame() {
                    Ok(Some(message)) => {
                        self.ready = Some(message);
                        self.state = State::MessageReady;
                        return Feed {
                            cursor,
                            outcome: FeedOutcome::MessageReady,
                        };
                    }
                    Ok(None) => self.state = State::HeaderByte1,
                    Err(err) => return self.fail(err, cursor),
                },
                State::MessageReady => {
                    // The previous message was not taken; it is superseded.
                    self.ready = None;
                    self.state = State::HeaderByte1;
                }
                State::Failed(code) => {
                    return Feed {
                        cursor,
                        outcome: FeedOutcome::ProtocolError(code),
                    }
                }
            }
        }
    }

    const fn after_length(&self) -> State {
        if self.header.masked {
            State::MaskKey { read: 0 }
        } else {
            State::Validate
        }
    }

    /// Copies extended-length bytes; returns how many of `width` are now read.
    fn fill_length(&mut self, buf: &[u8], cursor: &mut usize, read: usize, width: usize) -> usize {
        let take = (width - read).min(buf.len() - *cursor);
        self.header.length[read..read + take].copy_from_slice(&buf[*cursor..*cursor + take]);
        *cursor += take;
        read + take
    }

    fn validate(&mut self) -> Result<(), WsError> {
        let header = self.header;
        if header.rsv() != 0 {
            return Err(WsError::ReservedBitsSet);
        }
        let opcode = Opcode::from_u8(header.opcode_bits())?;
        match self.role {
            Role::Server if !header.masked => return Err(WsError::UnmaskedClientFrame),
            Role::Client if header.masked => return Err(WsError::MaskedServerFrame),
            _ => {}
        }

        if opcode.is_control() {
            if !header.fin() {
                return Err(WsError::FragmentedControlFrame);
            }
            if header.payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(WsError::ControlFrameTooLarge(header.payload_len));
            }
            if opcode == Opcode::Close && header.payload_len == 1 {
                return Err(WsError::InvalidClosePayload);
            }
            self.seq = FrameSeq::Single;
            self.frame_opcode = opcode;
            self.control.clear();
            self.control.reserve(header.payload_len as usize);
            return Ok(());
        }

        self.seq = match (opcode, header.fin(), self.pending) {
            (Opcode::Text | Opcode::Binary, true, None) => FrameSeq::Single,
            (Opcode::Text | Opcode::Binary, false, None) => FrameSeq::First,
            (Opcode::Continuation, false, Some(_)) => FrameSeq::Middle,
            (Opcode::Continuation, true, Some(_)) => FrameSeq::Last,
            (Opcode::Continuation, _, None) => {
                return Err(WsError::ProtocolViolation(
                    "continuation frame without an open fragmented message",
                ))
            }
            _ => {
                return Err(WsError::ProtocolViolation(
                    "data frame inside an open fragmented message",
                ))
            }
        };

        let size = self.data.len() as u64 + header.payload_len;
        if size > self.max_message_size as u64 {
            return Err(WsError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }

        if self.seq == FrameSeq::First {
            self.pending = Some(opcode);
        }
        self.frame_opcode = opcode;
        self.data.reserve(header.payload_len as usize);
        Ok(())
    }

    fn copy_payload(&mut self, chunk: &[u8]) {
        let target = if self.frame_opcode.is_control() {
            &mut self.control
        } else {
            &mut self.data
        };
        let start = target.len();
        target.extend_from_slice(chunk);
        if self.header.masked {
            apply_mask_at(&mut target[start..], self.header.mask, self.payload_read as usize);
        }
    }

    fn complete_frame(&mut self) -> Result<Option<Message>, WsError> {
        if self.frame_opcode.is_control() {
            let payload = std::mem::take(&mut self.control);
            if self.frame_opcode == Opcode::Close
                && payload.len() > 2
                && std::str::from_utf8(&payload[2..]).is_err()
            {
                return Err(WsError::InvalidUtf8);
            }
            return Ok(Some(Message::new(self.frame_opcode, payload)));
        }

        let opcode = match self.seq {
            FrameSeq::First | FrameSeq::Middle => return Ok(None),
            FrameSeq::Single => self.frame_opcode,
            FrameSeq::Last => self.pending.take().unwrap_or(Opcode::Binary),
        };
        let payload = std::mem::take(&mut self.data);
        if opcode == Opcode::Text && std::str::from_utf8(&payload).is_err() {
            return Err(WsError::InvalidUtf8);
        }
        Ok(Some(Message::new(opcode, payload)))
    }

    fn fail(&mut self, err: WsError, cursor: usize) -> Feed {
        let code = err.close_code();
        self.violation = Some(err);
        self.state = State::Failed(code);
        self.data.clear();
        self.control.clear();
        Feed {
            cursor,
            outcome: FeedOutcome::ProtocolError(code),
        }
    }
}

const fn need_more(cursor: usize) -> Feed {
    Feed {
        cursor,
        outcome: FeedOutcome::NeedMoreData,
    }
}
