use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::default::FRAME_HEADER_LEN;
use crate::error::{MuxError, Result};
use crate::stream::{Seq, StreamId};

/// Control flag carried by every frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Closing {
    /// Data frame
    Nothing = 0,
    /// Graceful close: no more data will follow from the sender.
    Graceful = 1,
    /// Abrupt reset: the receiver discards buffered data and fails its reader.
    Reset = 2,
}

impl Closing {
    pub fn is_data(self) -> bool {
        self == Closing::Nothing
    }
    pub fn is_graceful(self) -> bool {
        self == Closing::Graceful
    }
    pub fn is_reset(self) -> bool {
        self == Closing::Reset
    }
}

impl TryFrom<u8> for Closing {
    type Error = MuxError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Closing::Nothing),
            1 => Ok(Closing::Graceful),
            2 => Ok(Closing::Reset),
            other => Err(MuxError::malformed(format!("unknown closing flag {}", other))),
        }
    }
}

impl From<Closing> for u8 {
    fn from(closing: Closing) -> Self {
        closing as u8
    }
}

/// The frame structure that is sent between the peers
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    /// Identifier of the logical stream
    pub stream_id: StreamId,
    /// Sender-assigned, strictly increasing per stream in send order
    pub seq: Seq,
    /// Data, graceful close or reset
    pub closing: Closing,
    /// May be empty. An empty payload with a closing flag is a pure control frame.
    pub payload: Bytes,
}

impl Frame {
    /// Starts building a new `Frame` using `FrameBuilder`.
    pub fn builder() -> FrameBuilder {
        FrameBuilder::new()
    }
    /// Write the plain header and payload into `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.len());
        dst.put_u32(self.stream_id.0);
        dst.put_u64(self.seq.0);
        dst.put_u8(self.closing.into());
        dst.extend_from_slice(&self.payload);
    }
    /// Convert the frame to `Bytes`
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        self.write_to(&mut buf);
        buf.freeze()
    }
    /// Convert `Bytes` to a frame. The payload is everything after the header.
    pub fn from_bytes(mut bytes: Bytes) -> Result<Self> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(MuxError::malformed(format!(
                "frame of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        let stream_id = StreamId(bytes.get_u32());
        let seq = Seq(bytes.get_u64());
        let closing = Closing::try_from(bytes.get_u8())?;
        Ok(Self {
            stream_id,
            seq,
            closing,
            payload: bytes,
        })
    }
    /// Get length of the plain frame
    pub fn len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }
    /// Get length of payload
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
    /// Check if this frame carries no data and only a control flag.
    pub fn is_control(&self) -> bool {
        !self.closing.is_data() && self.payload.is_empty()
    }
}

pub struct FrameBuilder {
    frame: Frame,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            frame: Frame {
                stream_id: StreamId(0),
                seq: Seq(0),
                closing: Closing::Nothing,
                payload: Bytes::new(),
            },
        }
    }
    /// Sets the stream ID.
    pub fn with_stream_id(mut self, stream_id: StreamId) -> Self {
        self.frame.stream_id = stream_id;
        self
    }
    /// Sets the sequence number.
    pub fn with_seq(mut self, seq: Seq) -> Self {
        self.frame.seq = seq;
        self
    }
    /// Sets the closing flag.
    pub fn with_closing(mut self, closing: Closing) -> Self {
        self.frame.closing = closing;
        self
    }
    /// Sets the payload.
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.frame.payload = payload;
        self
    }
    /// Builds the `Frame`.
    pub fn build(self) -> Frame {
        self.frame
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_to_bytes_and_back() {
        let frame = Frame::builder()
            .with_stream_id(StreamId(123))
            .with_seq(Seq(u64::MAX - 1))
            .with_closing(Closing::Graceful)
            .with_payload(Bytes::from_static(b"test-data"))
            .build();

        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), FRAME_HEADER_LEN + 9);
        let parsed = Frame::from_bytes(bytes).expect("from_bytes failed");
        assert_eq!(frame, parsed);
    }

    #[test]
    fn test_header_layout_is_big_endian() {
        let frame = Frame::builder()
            .with_stream_id(StreamId(1))
            .with_seq(Seq(2))
            .with_closing(Closing::Reset)
            .build();
        assert_eq!(
            frame.to_bytes().as_ref(),
            &[0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 2, 2]
        );
        assert!(frame.is_control());
    }

    #[test]
    fn test_truncated_header_is_malformed() {
        let err = Frame::from_bytes(Bytes::from_static(&[0, 0, 0, 1, 0])).unwrap_err();
        assert!(matches!(err, MuxError::MalformedFrame(_)));
    }

    #[test]
    fn test_unknown_closing_flag_is_malformed() {
        let mut raw = Frame::builder().with_stream_id(StreamId(9)).build().to_bytes().to_vec();
        raw[FRAME_HEADER_LEN - 1] = 7;
        let err = Frame::from_bytes(Bytes::from(raw)).unwrap_err();
        assert!(matches!(err, MuxError::MalformedFrame(_)));
    }
}
