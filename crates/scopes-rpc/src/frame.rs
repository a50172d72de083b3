//! Wire frames
//!
//! Every message on a connection is one self-delimiting frame:
//!
//! ```text
//! +--------+--------+--------+--------+
//! |  vers  |vers_min| ftype  | flags  |
//! +--------+--------+--------+--------+
//! |            body_length            |
//! +--------+--------+--------+--------+
//! |               body ...            |
//! ```
//!
//! Request body: `mode(u8) op_name(str) identity(str) category(str) payload(blob)`.
//! Response body: `status(u8) payload(blob)`.
//!
//! Strings are a u16 length followed by UTF-8 bytes, blobs a u32 length
//! followed by raw bytes. All integers are little-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MiddlewareError, Result};
use crate::proxy_string::RequestMode;

/// Frame protocol version
pub const FRAME_VERSION: u8 = 1;
/// Frame protocol minor version
pub const FRAME_VERSION_MINOR: u8 = 0;

/// Frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Request = 0,
    Response = 1,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Request),
            1 => Some(Self::Response),
            _ => None,
        }
    }
}

/// Common frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub version_minor: u8,
    pub frame_type: FrameType,
    pub flags: u8,
    pub body_length: u32,
}

impl FrameHeader {
    pub const SIZE: usize = 8;

    pub fn new(frame_type: FrameType) -> Self {
        Self {
            version: FRAME_VERSION,
            version_minor: FRAME_VERSION_MINOR,
            frame_type,
            flags: 0,
            body_length: 0,
        }
    }

    /// Total size of the frame this header introduces
    pub fn frame_length(&self) -> usize {
        Self::SIZE + self.body_length as usize
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.version_minor);
        buf.put_u8(self.frame_type as u8);
        buf.put_u8(self.flags);
        buf.put_u32_le(self.body_length);
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(MiddlewareError::BufferUnderflow {
                needed: Self::SIZE,
                have: data.len(),
            });
        }
        let mut buf = data;
        let version = buf.get_u8();
        if version != FRAME_VERSION {
            return Err(MiddlewareError::InvalidFrame(format!(
                "version mismatch: expected {}, got {}",
                FRAME_VERSION, version
            )));
        }
        let version_minor = buf.get_u8();
        let raw_type = buf.get_u8();
        let frame_type = FrameType::from_u8(raw_type).ok_or_else(|| {
            MiddlewareError::InvalidFrame(format!("unknown frame type {}", raw_type))
        })?;
        let flags = buf.get_u8();
        let body_length = buf.get_u32_le();
        Ok(Self {
            version,
            version_minor,
            frame_type,
            flags,
            body_length,
        })
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u16_le(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn put_blob(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
}

fn need(buf: &[u8], n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(MiddlewareError::BufferUnderflow {
            needed: n,
            have: buf.remaining(),
        });
    }
    Ok(())
}

fn get_u8(buf: &mut &[u8]) -> Result<u8> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

fn get_str(buf: &mut &[u8]) -> Result<String> {
    need(buf, 2)?;
    let len = buf.get_u16_le() as usize;
    need(buf, len)?;
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|e| MiddlewareError::InvalidFrame(format!("invalid UTF-8 in string: {}", e)))?
        .to_string();
    buf.advance(len);
    Ok(s)
}

fn get_blob(buf: &mut &[u8]) -> Result<Bytes> {
    need(buf, 4)?;
    let len = buf.get_u32_le() as usize;
    need(buf, len)?;
    let blob = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(blob)
}

/// Wrap an encoded body with a header
fn finish_frame(frame_type: FrameType, body: BytesMut) -> Bytes {
    let mut header = FrameHeader::new(frame_type);
    header.body_length = body.len() as u32;
    let mut buf = BytesMut::with_capacity(FrameHeader::SIZE + body.len());
    header.encode(&mut buf);
    buf.put_slice(&body);
    buf.freeze()
}

/// Split a complete frame into header and body, checking the type
fn open_frame(data: &[u8], expected: FrameType) -> Result<&[u8]> {
    let header = FrameHeader::decode(data)?;
    if header.frame_type != expected {
        return Err(MiddlewareError::InvalidFrame(format!(
            "expected {:?} frame, got {:?}",
            expected, header.frame_type
        )));
    }
    let end = header.frame_length();
    need(data, end)?;
    Ok(&data[FrameHeader::SIZE..end])
}

/// Request envelope: routed purely by identity plus operation name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub mode: RequestMode,
    pub op_name: String,
    pub identity: String,
    pub category: String,
    pub payload: Bytes,
}

impl Request {
    pub fn new(
        mode: RequestMode,
        op_name: impl Into<String>,
        identity: impl Into<String>,
        category: impl Into<String>,
        payload: Bytes,
    ) -> Self {
        Self {
            mode,
            op_name: op_name.into(),
            identity: identity.into(),
            category: category.into(),
            payload,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(
            1 + 6 + self.op_name.len() + self.identity.len() + self.category.len() + 4
                + self.payload.len(),
        );
        body.put_u8(self.mode as u8);
        put_str(&mut body, &self.op_name);
        put_str(&mut body, &self.identity);
        put_str(&mut body, &self.category);
        put_blob(&mut body, &self.payload);
        finish_frame(FrameType::Request, body)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut body = open_frame(data, FrameType::Request)?;
        let raw_mode = get_u8(&mut body)?;
        let mode = RequestMode::from_u8(raw_mode).ok_or_else(|| {
            MiddlewareError::InvalidFrame(format!("unknown request mode {}", raw_mode))
        })?;
        Ok(Self {
            mode,
            op_name: get_str(&mut body)?,
            identity: get_str(&mut body)?,
            category: get_str(&mut body)?,
            payload: get_blob(&mut body)?,
        })
    }
}

/// Response status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyStatus {
    Success = 0,
    UserException = 1,
    RuntimeException = 2,
}

impl ReplyStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Success),
            1 => Some(Self::UserException),
            2 => Some(Self::RuntimeException),
            _ => None,
        }
    }
}

/// Middleware-level failures reported by the remote adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeException {
    ObjectNotExist { proxy: String, adapter: String },
    OperationNotExist { proxy: String, adapter: String, op: String },
    Unknown(String),
}

impl RuntimeException {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            RuntimeException::ObjectNotExist { proxy, adapter } => {
                buf.put_u8(0);
                put_str(buf, proxy);
                put_str(buf, adapter);
            }
            RuntimeException::OperationNotExist { proxy, adapter, op } => {
                buf.put_u8(1);
                put_str(buf, proxy);
                put_str(buf, adapter);
                put_str(buf, op);
            }
            RuntimeException::Unknown(message) => {
                buf.put_u8(2);
                put_str(buf, message);
            }
        }
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        match get_u8(buf)? {
            0 => Ok(RuntimeException::ObjectNotExist {
                proxy: get_str(buf)?,
                adapter: get_str(buf)?,
            }),
            1 => Ok(RuntimeException::OperationNotExist {
                proxy: get_str(buf)?,
                adapter: get_str(buf)?,
                op: get_str(buf)?,
            }),
            2 => Ok(RuntimeException::Unknown(get_str(buf)?)),
            kind => Err(MiddlewareError::InvalidFrame(format!(
                "unknown runtime exception kind {}",
                kind
            ))),
        }
    }
}

impl From<RuntimeException> for MiddlewareError {
    fn from(e: RuntimeException) -> Self {
        match e {
            RuntimeException::ObjectNotExist { proxy, adapter } => {
                MiddlewareError::ObjectNotExist { proxy, adapter }
            }
            RuntimeException::OperationNotExist { proxy, adapter, op } => {
                MiddlewareError::OperationNotExist { proxy, adapter, op }
            }
            RuntimeException::Unknown(message) => MiddlewareError::Unknown(message),
        }
    }
}

/// Response envelope, sent for twoway requests only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: ReplyStatus,
    pub payload: Bytes,
}

impl Response {
    pub fn success(payload: Bytes) -> Self {
        Self {
            status: ReplyStatus::Success,
            payload,
        }
    }

    pub fn user_exception(kind: &str, message: &str) -> Self {
        let mut buf = BytesMut::new();
        put_str(&mut buf, kind);
        put_str(&mut buf, message);
        Self {
            status: ReplyStatus::UserException,
            payload: buf.freeze(),
        }
    }

    pub fn runtime_exception(e: RuntimeException) -> Self {
        let mut buf = BytesMut::new();
        e.encode(&mut buf);
        Self {
            status: ReplyStatus::RuntimeException,
            payload: buf.freeze(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(1 + 4 + self.payload.len());
        body.put_u8(self.status as u8);
        put_blob(&mut body, &self.payload);
        finish_frame(FrameType::Response, body)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut body = open_frame(data, FrameType::Response)?;
        let raw_status = get_u8(&mut body)?;
        let status = ReplyStatus::from_u8(raw_status).ok_or_else(|| {
            MiddlewareError::InvalidFrame(format!("unknown reply status {}", raw_status))
        })?;
        Ok(Self {
            status,
            payload: get_blob(&mut body)?,
        })
    }

    /// Convert into the return payload or the error the remote side raised
    pub fn into_result(self) -> Result<Bytes> {
        match self.status {
            ReplyStatus::Success => Ok(self.payload),
            ReplyStatus::UserException => {
                let mut buf = &self.payload[..];
                let kind = get_str(&mut buf)?;
                let message = get_str(&mut buf)?;
                Err(MiddlewareError::UserException { kind, message })
            }
            ReplyStatus::RuntimeException => {
                let mut buf = &self.payload[..];
                Err(RuntimeException::decode(&mut buf)?.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let frame = Request::new(RequestMode::Twoway, "ping", "id", "Scope", Bytes::new()).encode();
        let header = FrameHeader::decode(&frame).unwrap();
        assert_eq!(header.version, FRAME_VERSION);
        assert_eq!(header.frame_type, FrameType::Request);
        assert_eq!(header.frame_length(), frame.len());
    }

    #[test]
    fn test_request_decode() {
        let request = Request::new(
            RequestMode::Oneway,
            "push",
            "c3f1",
            "Reply",
            Bytes::from_static(b"{\"result\":{}}"),
        );
        let decoded = Request::decode(&request.encode()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_truncated_frame() {
        let frame = Request::new(RequestMode::Twoway, "search", "s", "Scope", Bytes::from_static(b"abc"))
            .encode();
        let err = Request::decode(&frame[..frame.len() - 2]).unwrap_err();
        assert!(matches!(err, MiddlewareError::BufferUnderflow { .. }));
    }

    #[test]
    fn test_bad_version() {
        let mut frame = BytesMut::from(&Response::success(Bytes::new()).encode()[..]);
        frame[0] = 9;
        assert!(matches!(
            Response::decode(&frame),
            Err(MiddlewareError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_wrong_frame_type() {
        let frame = Response::success(Bytes::new()).encode();
        assert!(matches!(
            Request::decode(&frame),
            Err(MiddlewareError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_user_exception_result() {
        let frame = Response::user_exception("NotFound", "no such scope: foo").encode();
        match Response::decode(&frame).unwrap().into_result() {
            Err(MiddlewareError::UserException { kind, message }) => {
                assert_eq!(kind, "NotFound");
                assert_eq!(message, "no such scope: foo");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_runtime_exception_result() {
        let frame = Response::runtime_exception(RuntimeException::OperationNotExist {
            proxy: "ipc:///tmp/a#x".to_string(),
            adapter: "a".to_string(),
            op: "frobnicate".to_string(),
        })
        .encode();
        let err = Response::decode(&frame).unwrap().into_result().unwrap_err();
        assert!(matches!(err, MiddlewareError::OperationNotExist { ref op, .. } if op == "frobnicate"));

        let frame = Response::runtime_exception(RuntimeException::Unknown(
            "unknown exception".to_string(),
        ))
        .encode();
        let err = Response::decode(&frame).unwrap().into_result().unwrap_err();
        assert_eq!(err.to_string(), "unknown exception");
    }
}
