// ── USP frame codec (§4.4 "Wire encoding") ──
//
// Each frame: a 4-byte big-endian length prefix, then a tag/length/value
// body -- a one-byte message-kind tag, a message id field, then an
// ordered sequence of (field-tag, varint-length, bytes) triples so that
// unknown trailing fields are safely skippable. No pack file implements
// a binary TLV codec; this mirrors the canonical protobuf-style
// envelope named in the external interface surface closely enough to
// exercise the same framing discipline without a schema compiler.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::UspError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    GetRequest = 0x01,
    GetResponse = 0x02,
    SetRequest = 0x03,
    SetResponse = 0x04,
    AddRequest = 0x05,
    AddResponse = 0x06,
    DeleteRequest = 0x07,
    DeleteResponse = 0x08,
    OperateRequest = 0x09,
    OperateResponse = 0x0A,
    GetSupportedDmRequest = 0x0B,
    GetSupportedDmResponse = 0x0C,
    GetInstancesRequest = 0x0D,
    GetInstancesResponse = 0x0E,
    SubscribeRequest = 0x0F,
    SubscribeResponse = 0x10,
    Notify = 0x11,
    Error = 0x7F,
}

impl MessageKind {
    fn from_u8(tag: u8) -> Result<Self, UspError> {
        Ok(match tag {
            0x01 => Self::GetRequest,
            0x02 => Self::GetResponse,
            0x03 => Self::SetRequest,
            0x04 => Self::SetResponse,
            0x05 => Self::AddRequest,
            0x06 => Self::AddResponse,
            0x07 => Self::DeleteRequest,
            0x08 => Self::DeleteResponse,
            0x09 => Self::OperateRequest,
            0x0A => Self::OperateResponse,
            0x0B => Self::GetSupportedDmRequest,
            0x0C => Self::GetSupportedDmResponse,
            0x0D => Self::GetInstancesRequest,
            0x0E => Self::GetInstancesResponse,
            0x0F => Self::SubscribeRequest,
            0x10 => Self::SubscribeResponse,
            0x11 => Self::Notify,
            0x7F => Self::Error,
            other => return Err(UspError::MessageFormat(format!("unknown message kind tag {other:#x}"))),
        })
    }

    /// `true` for request/notify/subscribe kinds that mutate device
    /// state and must be serialised through the per-device lock per §5.
    #[must_use]
    pub fn is_mutator(self) -> bool {
        matches!(self, Self::SetRequest | Self::AddRequest | Self::DeleteRequest | Self::OperateRequest)
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub tag: u8,
    pub value: Bytes,
}

impl Field {
    #[must_use]
    pub fn string(tag: u8, value: &str) -> Self {
        Self { tag, value: Bytes::copy_from_slice(value.as_bytes()) }
    }

    #[must_use]
    pub fn as_str(&self) -> Result<&str, UspError> {
        std::str::from_utf8(&self.value).map_err(|e| UspError::MessageStructure(format!("field {}: {e}", self.tag)))
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub message_id: String,
    pub kind: MessageKind,
    pub fields: Vec<Field>,
}

fn write_varint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            break;
        }
        buf.put_u8(byte | 0x80);
    }
}

fn read_varint(buf: &mut impl Buf) -> Result<u64, UspError> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        if !buf.has_remaining() {
            return Err(UspError::MessageFormat("truncated varint".into()));
        }
        let byte = buf.get_u8();
        result |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return Err(UspError::MessageFormat("varint too long".into()));
        }
    }
    Ok(result)
}

impl Frame {
    #[must_use]
    pub fn new(message_id: impl Into<String>, kind: MessageKind, fields: Vec<Field>) -> Self {
        Self { message_id: message_id.into(), kind, fields }
    }

    pub fn field(&self, tag: u8) -> Option<&Field> {
        self.fields.iter().find(|f| f.tag == tag)
    }

    /// Encode to the wire form: 4-byte BE length prefix, kind tag,
    /// message-id field, then each body field as (tag, varint-len, bytes).
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        body.put_u8(self.kind as u8);

        let id_bytes = self.message_id.as_bytes();
        write_varint(&mut body, id_bytes.len() as u64);
        body.put_slice(id_bytes);

        for field in &self.fields {
            body.put_u8(field.tag);
            write_varint(&mut body, field.value.len() as u64);
            body.put_slice(&field.value);
        }

        let mut out = BytesMut::with_capacity(4 + body.len());
        out.put_u32(body.len() as u32);
        out.put_slice(&body);
        out.freeze()
    }

    /// Decode a complete frame including its length prefix. Callers
    /// reading from a stream should buffer until at least 4 bytes are
    /// available, read the length, then buffer until the full frame is
    /// present before calling this. `max_size` bounds the declared body
    /// length, independent of how much the caller actually buffered.
    pub fn decode(mut buf: Bytes, max_size: usize) -> Result<Self, UspError> {
        if buf.len() < 4 {
            return Err(UspError::MessageFormat("frame shorter than length prefix".into()));
        }
        let declared_len = buf.get_u32() as usize;
        if declared_len > max_size {
            return Err(UspError::ResourcesExceeded(format!("frame body {declared_len} exceeds max envelope size {max_size}")));
        }
        if buf.len() != declared_len {
            return Err(UspError::MessageFormat(format!("length prefix {declared_len} does not match body {}", buf.len())));
        }

        if !buf.has_remaining() {
            return Err(UspError::MessageFormat("empty frame body".into()));
        }
        let kind = MessageKind::from_u8(buf.get_u8())?;

        let id_len = read_varint(&mut buf)? as usize;
        if buf.remaining() < id_len {
            return Err(UspError::MessageFormat("truncated message id".into()));
        }
        let message_id = std::str::from_utf8(&buf.copy_to_bytes(id_len)).map_err(|e| UspError::MessageFormat(e.to_string()))?.to_string();

        let mut fields = Vec::new();
        while buf.has_remaining() {
            if buf.remaining() < 1 {
                return Err(UspError::MessageFormat("truncated field tag".into()));
            }
            let tag = buf.get_u8();
            let len = read_varint(&mut buf)? as usize;
            if buf.remaining() < len {
                return Err(UspError::MessageFormat("truncated field value".into()));
            }
            fields.push(Field { tag, value: buf.copy_to_bytes(len) });
        }

        Ok(Self { message_id, kind, fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_get_request() {
        let frame = Frame::new("msg-1", MessageKind::GetRequest, vec![Field::string(1, "Device.DeviceInfo.*")]);
        let encoded = frame.encode();
        let decoded = Frame::decode(encoded, 1024).unwrap();
        assert_eq!(decoded.message_id, "msg-1");
        assert_eq!(decoded.kind, MessageKind::GetRequest);
        assert_eq!(decoded.field(1).unwrap().as_str().unwrap(), "Device.DeviceInfo.*");
    }

    #[test]
    fn unknown_trailing_field_is_skippable() {
        let frame = Frame::new("msg-2", MessageKind::SetResponse, vec![Field::string(1, "ok"), Field::string(99, "future-extension")]);
        let decoded = Frame::decode(frame.encode(), 1024).unwrap();
        assert_eq!(decoded.fields.len(), 2);
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut bytes = Frame::new("m", MessageKind::GetRequest, vec![]).encode().to_vec();
        bytes[3] += 1; // corrupt the declared length
        assert!(Frame::decode(Bytes::from(bytes), 1024).is_err());
    }

    #[test]
    fn rejects_unknown_message_kind() {
        let mut frame = Frame::new("m", MessageKind::GetRequest, vec![]).encode().to_vec();
        frame[4] = 0xEE;
        assert!(Frame::decode(Bytes::from(frame), 1024).is_err());
    }

    #[test]
    fn rejects_frame_over_max_size() {
        let frame = Frame::new("m", MessageKind::GetRequest, vec![Field::string(1, "Device.DeviceInfo.*")]);
        let encoded = frame.encode();
        let result = Frame::decode(encoded, 4);
        assert!(matches!(result, Err(UspError::ResourcesExceeded(_))));
    }

    #[test]
    fn mutators_are_flagged_for_per_device_locking() {
        assert!(MessageKind::SetRequest.is_mutator());
        assert!(!MessageKind::GetRequest.is_mutator());
    }
}
