use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::default::{MAX_RECORD_LEN, RECORD_PREFIX_LEN};
use crate::error::MuxError;
use crate::frame::Frame;
use crate::obfs::Obfuscator;

/// A codec for encoding and decoding Frames over a byte stream.
///
/// Each frame travels as one record: a big-endian `u32` body length followed
/// by the body produced by the session's [`Obfuscator`].
pub struct FrameCodec {
    obfuscator: Arc<dyn Obfuscator>,
    max_record_len: usize,
    state: DecodeState,
}

enum DecodeState {
    ReadingPrefix,
    ReadingBody { remaining: usize },
}

impl FrameCodec {
    pub fn new(obfuscator: Arc<dyn Obfuscator>) -> Self {
        Self {
            obfuscator,
            max_record_len: MAX_RECORD_LEN,
            state: DecodeState::ReadingPrefix,
        }
    }
    pub fn with_max_record_len(mut self, max_record_len: usize) -> Self {
        self.max_record_len = max_record_len;
        self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = MuxError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, MuxError> {
        loop {
            match self.state {
                DecodeState::ReadingPrefix => {
                    if src.len() < RECORD_PREFIX_LEN {
                        return Ok(None);
                    }
                    let len = src.get_u32() as usize;
                    if len == 0 || len > self.max_record_len {
                        return Err(MuxError::malformed(format!("invalid record length {}", len)));
                    }
                    src.reserve(len);
                    self.state = DecodeState::ReadingBody { remaining: len };
                }
                DecodeState::ReadingBody { remaining } => {
                    if src.len() < remaining {
                        return Ok(None);
                    }
                    let body = src.split_to(remaining).freeze();
                    self.state = DecodeState::ReadingPrefix;
                    return self.obfuscator.deobfuscate(body).map(Some);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, MuxError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() && matches!(self.state, DecodeState::ReadingPrefix) => Ok(None),
            None => Err(MuxError::malformed("connection ended inside a record")),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = MuxError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), MuxError> {
        <Self as Encoder<&Frame>>::encode(self, &frame, dst)
    }
}

impl<'a> Encoder<&'a Frame> for FrameCodec {
    type Error = MuxError;

    fn encode(&mut self, frame: &'a Frame, dst: &mut BytesMut) -> Result<(), MuxError> {
        let start = dst.len();
        dst.reserve(RECORD_PREFIX_LEN + frame.len() + self.obfuscator.overhead());
        dst.put_u32(0);
        self.obfuscator.obfuscate(frame, dst)?;

        let len = dst.len() - start - RECORD_PREFIX_LEN;
        if len > self.max_record_len {
            dst.truncate(start);
            return Err(MuxError::malformed(format!(
                "record of {} bytes exceeds limit {}",
                len, self.max_record_len
            )));
        }
        dst[start..start + RECORD_PREFIX_LEN].copy_from_slice(&(len as u32).to_be_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default::SESSION_KEY_LEN;
    use crate::frame::Closing;
    use crate::obfs::{make_obfuscator, EncryptionMethod, PlainObfuscator};
    use crate::stream::{Seq, StreamId};
    use bytes::Bytes;

    fn frame(id: u32, seq: u64, payload: &'static [u8]) -> Frame {
        Frame::builder()
            .with_stream_id(StreamId(id))
            .with_seq(Seq(seq))
            .with_payload(Bytes::from_static(payload))
            .build()
    }

    #[test]
    fn test_records_split_across_reads() {
        let obfs = make_obfuscator(EncryptionMethod::Aes256Gcm, [9u8; SESSION_KEY_LEN]).unwrap();
        let mut codec = FrameCodec::new(obfs);
        let mut wire = BytesMut::new();
        let first = frame(1, 0, b"first");
        let second = Frame::builder()
            .with_stream_id(StreamId(3))
            .with_seq(Seq(8))
            .with_closing(Closing::Graceful)
            .build();
        codec.encode(&first, &mut wire).unwrap();
        codec.encode(second.clone(), &mut wire).unwrap();

        // Feed the stream one byte at a time.
        let mut src = BytesMut::new();
        let mut decoded = Vec::new();
        for b in wire.iter() {
            src.extend_from_slice(&[*b]);
            while let Some(f) = codec.decode(&mut src).unwrap() {
                decoded.push(f);
            }
        }
        assert_eq!(decoded, vec![first, second]);
        assert!(src.is_empty());
    }

    #[test]
    fn test_oversized_length_prefix_is_malformed() {
        let mut codec = FrameCodec::new(Arc::new(PlainObfuscator)).with_max_record_len(64);
        let mut src = BytesMut::new();
        src.put_u32(65);
        assert!(matches!(codec.decode(&mut src), Err(MuxError::MalformedFrame(_))));
    }

    #[test]
    fn test_truncated_record_at_eof_is_malformed() {
        let mut codec = FrameCodec::new(Arc::new(PlainObfuscator));
        let mut wire = BytesMut::new();
        codec.encode(&frame(1, 0, b"abcdef"), &mut wire).unwrap();
        wire.truncate(wire.len() - 2);
        assert!(codec.decode(&mut wire).unwrap().is_none());
        assert!(matches!(codec.decode_eof(&mut wire), Err(MuxError::MalformedFrame(_))));
    }

    #[test]
    fn test_clean_eof() {
        let mut codec = FrameCodec::new(Arc::new(PlainObfuscator));
        let mut src = BytesMut::new();
        assert!(codec.decode_eof(&mut src).unwrap().is_none());
    }
}
