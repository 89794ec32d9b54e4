//! Wire codec for the UDP booking protocol. All integers big-endian.
//!
//! Request frame:  `u32 request_id | u8 op | u8 semantic | u32 payload_len | payload`
//! Response frame: `u32 request_id | u8 response_code | u32 payload_len | payload`
//! Strings:        `u16 length | UTF-8 bytes`
//!
//! Monitor callbacks are sent as a bare payload, not wrapped in a response
//! frame: `string facility | u16 segment_count | segment_count * (i32, i32)`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::limits::{MAX_QUERY_DAYS, MAX_STRING_LEN};
use crate::model::{Minute, Span, WallClock};

pub const REQUEST_HEADER_LEN: usize = 10;
pub const RESPONSE_HEADER_LEN: usize = 9;

// ── Enums ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Query = 1,
    Book = 2,
    Change = 3,
    RegisterMonitor = 4,
    OpA = 5,
    OpB = 6,
}

impl OpCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(OpCode::Query),
            2 => Some(OpCode::Book),
            3 => Some(OpCode::Change),
            4 => Some(OpCode::RegisterMonitor),
            5 => Some(OpCode::OpA),
            6 => Some(OpCode::OpB),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OpCode::Query => "query",
            OpCode::Book => "book",
            OpCode::Change => "change",
            OpCode::RegisterMonitor => "register_monitor",
            OpCode::OpA => "op_a",
            OpCode::OpB => "op_b",
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Advisory flag sent by clients; the server's configured policy is
/// authoritative. Unknown values fall back to `Default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Semantic {
    #[default]
    Default = 0,
    AtMostOnce = 1,
    AtLeastOnce = 2,
}

impl Semantic {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Semantic::AtMostOnce,
            2 => Semantic::AtLeastOnce,
            _ => Semantic::Default,
        }
    }
}

/// Unknown values decode as `ErrInternal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ok = 0,
    ErrNotFound = 1,
    ErrConflict = 2,
    ErrInvalid = 3,
    ErrInternal = 4,
}

impl ResponseCode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => ResponseCode::Ok,
            1 => ResponseCode::ErrNotFound,
            2 => ResponseCode::ErrConflict,
            3 => ResponseCode::ErrInvalid,
            _ => ResponseCode::ErrInternal,
        }
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResponseCode::Ok => "OK",
            ResponseCode::ErrNotFound => "ERR_NOT_FOUND",
            ResponseCode::ErrConflict => "ERR_CONFLICT",
            ResponseCode::ErrInvalid => "ERR_INVALID",
            ResponseCode::ErrInternal => "ERR_INTERNAL",
        };
        f.write_str(s)
    }
}

// ── Frames ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub request_id: u32,
    pub op: OpCode,
    pub semantic: Semantic,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub request_id: u32,
    pub code: ResponseCode,
    pub payload: Bytes,
}

impl Response {
    pub fn ok(request_id: u32, payload: Bytes) -> Self {
        Self { request_id, code: ResponseCode::Ok, payload }
    }

    pub fn error(request_id: u32, code: ResponseCode, message: &str) -> Self {
        Self {
            request_id,
            code,
            payload: Bytes::copy_from_slice(message.as_bytes()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    Truncated(&'static str),
    PayloadLength { declared: u32, available: usize },
    UnknownOp(u8),
    StringTooLong(usize),
    BadUtf8,
    TooManyDays(usize),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Truncated(what) => write!(f, "truncated {what}"),
            WireError::PayloadLength { declared, available } => {
                write!(f, "payload length {declared} exceeds {available} available bytes")
            }
            WireError::UnknownOp(code) => write!(f, "unknown op code: {code}"),
            WireError::StringTooLong(len) => write!(f, "string too long: {len} bytes"),
            WireError::BadUtf8 => write!(f, "string is not valid UTF-8"),
            WireError::TooManyDays(n) => write!(f, "too many day entries: {n}"),
        }
    }
}

impl std::error::Error for WireError {}

pub fn encode_request(req: &Request) -> Bytes {
    let mut buf = BytesMut::with_capacity(REQUEST_HEADER_LEN + req.payload.len());
    buf.put_u32(req.request_id);
    buf.put_u8(req.op as u8);
    buf.put_u8(req.semantic as u8);
    buf.put_u32(req.payload.len() as u32);
    buf.put_slice(&req.payload);
    buf.freeze()
}

/// Decode a request frame. Trailing bytes beyond the declared payload
/// length are tolerated; a declared length past the end of the datagram
/// is not.
pub fn decode_request(raw: &[u8]) -> Result<Request, WireError> {
    if raw.len() < REQUEST_HEADER_LEN {
        return Err(WireError::Truncated("request header"));
    }
    let mut buf = raw;
    let request_id = buf.get_u32();
    let op_raw = buf.get_u8();
    let semantic = Semantic::from_u8(buf.get_u8());
    let declared = buf.get_u32();
    if declared as usize > buf.remaining() {
        return Err(WireError::PayloadLength { declared, available: buf.remaining() });
    }
    let op = OpCode::from_u8(op_raw).ok_or(WireError::UnknownOp(op_raw))?;
    let payload = buf.copy_to_bytes(declared as usize);
    Ok(Request { request_id, op, semantic, payload })
}

pub fn encode_response(rsp: &Response) -> Bytes {
    let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_LEN + rsp.payload.len());
    buf.put_u32(rsp.request_id);
    buf.put_u8(rsp.code as u8);
    buf.put_u32(rsp.payload.len() as u32);
    buf.put_slice(&rsp.payload);
    buf.freeze()
}

pub fn decode_response(raw: &[u8]) -> Result<Response, WireError> {
    if raw.len() < RESPONSE_HEADER_LEN {
        return Err(WireError::Truncated("response header"));
    }
    let mut buf = raw;
    let request_id = buf.get_u32();
    let code = ResponseCode::from_u8(buf.get_u8());
    let declared = buf.get_u32();
    if declared as usize > buf.remaining() {
        return Err(WireError::PayloadLength { declared, available: buf.remaining() });
    }
    let payload = buf.copy_to_bytes(declared as usize);
    Ok(Response { request_id, code, payload })
}

// ── Strings ──────────────────────────────────────────────────────

pub fn put_string(buf: &mut BytesMut, s: &str) -> Result<(), WireError> {
    if s.len() > MAX_STRING_LEN {
        return Err(WireError::StringTooLong(s.len()));
    }
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub fn get_string(buf: &mut impl Buf) -> Result<String, WireError> {
    if buf.remaining() < 2 {
        return Err(WireError::Truncated("string length"));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(WireError::Truncated("string bytes"));
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| WireError::BadUtf8)
}

// ── Operation payloads ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub name: String,
    pub days: Vec<u8>,
}

impl QueryRequest {
    pub fn encode(&self) -> Result<Bytes, WireError> {
        if self.days.len() > MAX_QUERY_DAYS {
            return Err(WireError::TooManyDays(self.days.len()));
        }
        let mut buf = BytesMut::with_capacity(2 + self.name.len() + 1 + self.days.len());
        put_string(&mut buf, &self.name)?;
        buf.put_u8(self.days.len() as u8);
        buf.put_slice(&self.days);
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut buf = payload;
        let name = get_string(&mut buf)?;
        if buf.remaining() < 1 {
            return Err(WireError::Truncated("day count"));
        }
        let count = buf.get_u8() as usize;
        if buf.remaining() < count {
            return Err(WireError::Truncated("day list"));
        }
        let days = buf.copy_to_bytes(count).to_vec();
        Ok(Self { name, days })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookRequest {
    pub name: String,
    pub start: WallClock,
    pub end: WallClock,
}

impl BookRequest {
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(2 + self.name.len() + 6);
        put_string(&mut buf, &self.name)?;
        for wc in [self.start, self.end] {
            buf.put_u8(wc.day);
            buf.put_u8(wc.hour);
            buf.put_u8(wc.minute);
        }
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut buf = payload;
        let name = get_string(&mut buf)?;
        if buf.remaining() < 6 {
            return Err(WireError::Truncated("book time fields"));
        }
        let start = WallClock::new(buf.get_u8(), buf.get_u8(), buf.get_u8());
        let end = WallClock::new(buf.get_u8(), buf.get_u8(), buf.get_u8());
        Ok(Self { name, start, end })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeRequest {
    pub confirmation_id: u32,
    pub offset_minutes: i32,
}

impl ChangeRequest {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u32(self.confirmation_id);
        buf.put_i32(self.offset_minutes);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut buf = payload;
        if buf.remaining() < 8 {
            return Err(WireError::Truncated("change payload"));
        }
        Ok(Self {
            confirmation_id: buf.get_u32(),
            offset_minutes: buf.get_i32(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMonitorRequest {
    pub name: String,
    pub interval_seconds: u32,
}

impl RegisterMonitorRequest {
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(2 + self.name.len() + 4);
        put_string(&mut buf, &self.name)?;
        buf.put_u32(self.interval_seconds);
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut buf = payload;
        let name = get_string(&mut buf)?;
        if buf.remaining() < 4 {
            return Err(WireError::Truncated("monitor interval"));
        }
        Ok(Self { name, interval_seconds: buf.get_u32() })
    }
}

/// OP_A / OP_B carry an optional facility name. Missing, unreadable, or
/// empty payloads all mean "no name given".
pub fn decode_optional_name(payload: &[u8]) -> Option<String> {
    let mut buf = payload;
    match get_string(&mut buf) {
        Ok(name) if !name.is_empty() => Some(name),
        _ => None,
    }
}

pub fn encode_optional_name(name: Option<&str>) -> Result<Bytes, WireError> {
    match name {
        None => Ok(Bytes::new()),
        Some(s) => {
            let mut buf = BytesMut::with_capacity(2 + s.len());
            put_string(&mut buf, s)?;
            Ok(buf.freeze())
        }
    }
}

// ── Reply payloads ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySchedule {
    pub day: u8,
    /// Minute-of-day intervals, ascending by start.
    pub intervals: Vec<(u16, u16)>,
}

/// QUERY reply body: per-day interval lists clipped to each day.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryReply {
    pub days: Vec<DaySchedule>,
}

impl QueryReply {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u16(self.days.len() as u16);
        for day in &self.days {
            buf.put_u8(day.day);
            buf.put_u16(day.intervals.len() as u16);
            for &(s, e) in &day.intervals {
                buf.put_u16(s);
                buf.put_u16(e);
            }
        }
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut buf = payload;
        if buf.remaining() < 2 {
            return Err(WireError::Truncated("query day count"));
        }
        let day_count = buf.get_u16();
        let mut days = Vec::with_capacity(day_count as usize);
        for _ in 0..day_count {
            if buf.remaining() < 3 {
                return Err(WireError::Truncated("query day header"));
            }
            let day = buf.get_u8();
            let interval_count = buf.get_u16() as usize;
            if buf.remaining() < interval_count * 4 {
                return Err(WireError::Truncated("query intervals"));
            }
            let mut intervals = Vec::with_capacity(interval_count);
            for _ in 0..interval_count {
                intervals.push((buf.get_u16(), buf.get_u16()));
            }
            days.push(DaySchedule { day, intervals });
        }
        Ok(Self { days })
    }
}

pub fn encode_confirmation_id(id: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(id);
    buf.freeze()
}

pub fn decode_confirmation_id(payload: &[u8]) -> Result<u32, WireError> {
    let mut buf = payload;
    if buf.remaining() < 4 {
        return Err(WireError::Truncated("confirmation id"));
    }
    Ok(buf.get_u32())
}

// ── Monitor callback datagram ────────────────────────────────────

/// Unsolicited callback body: the full current booking set of one
/// facility as minute-of-week segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPayload {
    pub facility: String,
    pub segments: Vec<Span>,
}

impl CallbackPayload {
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(2 + self.facility.len() + 2 + self.segments.len() * 8);
        put_string(&mut buf, &self.facility)?;
        buf.put_u16(self.segments.len() as u16);
        for span in &self.segments {
            buf.put_i32(span.start);
            buf.put_i32(span.end);
        }
        Ok(buf.freeze())
    }

    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let mut buf = raw;
        let facility = get_string(&mut buf)?;
        if buf.remaining() < 2 {
            return Err(WireError::Truncated("callback segment count"));
        }
        let count = buf.get_u16() as usize;
        if buf.remaining() < count * 8 {
            return Err(WireError::Truncated("callback segments"));
        }
        let mut segments = Vec::with_capacity(count);
        for _ in 0..count {
            let start: Minute = buf.get_i32();
            let end: Minute = buf.get_i32();
            segments.push(Span { start, end });
        }
        Ok(Self { facility, segments })
    }
}
