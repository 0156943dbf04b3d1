use super::*;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const MAGIC: u16 = 0xBABE;
pub const VERSION: u8 = 1;
/// The request expects no response.
pub const FLAG_ONEWAY: u8 = 0x01;

/// magic(2) | version(1) | flags(1) | type(4) | request_id(8) | payload_length(4)
pub const HEADER_LEN: usize = 20;
const TRAILER_LEN: usize = 4;

/// The unit of the wire protocol.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub flags: u8,
    pub command_type: u32,
    pub request_id: u64,
    pub payload: Bytes,
}

impl Frame {
    pub fn request(command_type: CommandType, payload: Bytes) -> Self {
        Self {
            flags: 0,
            command_type: command_type.code(),
            request_id: 0,
            payload,
        }
    }

    pub fn is_oneway(&self) -> bool {
        self.flags & FLAG_ONEWAY != 0
    }
}

/// Reads and writes frames, each followed by a CRC32 over header and payload.
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let magic = u16::from_be_bytes([src[0], src[1]]);
        if magic != MAGIC {
            return Err(Error::Protocol(format!("bad magic {magic:#06x}")));
        }
        let version = src[2];
        if version != VERSION {
            return Err(Error::Protocol(format!("unsupported version {version}")));
        }
        let payload_len = u32::from_be_bytes([src[16], src[17], src[18], src[19]]) as usize;
        if payload_len > self.max_frame_size {
            return Err(Error::Protocol(format!(
                "frame of {payload_len} bytes exceeds limit {}",
                self.max_frame_size
            )));
        }

        let total = HEADER_LEN + payload_len + TRAILER_LEN;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut bin = src.split_to(total);
        let expected = crc32fast::hash(&bin[..HEADER_LEN + payload_len]);
        let mut trailer = bin.split_off(HEADER_LEN + payload_len);
        let actual = trailer.get_u32();
        if expected != actual {
            return Err(Error::Protocol(format!(
                "crc mismatch (expected={expected:#010x}, actual={actual:#010x})"
            )));
        }

        bin.advance(3);
        let flags = bin.get_u8();
        let command_type = bin.get_u32();
        let request_id = bin.get_u64();
        bin.advance(4);

        Ok(Some(Frame {
            flags,
            command_type,
            request_id,
            payload: bin.freeze(),
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Error> {
        if frame.payload.len() > self.max_frame_size {
            return Err(Error::Protocol(format!(
                "frame of {} bytes exceeds limit {}",
                frame.payload.len(),
                self.max_frame_size
            )));
        }

        dst.reserve(HEADER_LEN + frame.payload.len() + TRAILER_LEN);
        let start = dst.len();
        dst.put_u16(MAGIC);
        dst.put_u8(VERSION);
        dst.put_u8(frame.flags);
        dst.put_u32(frame.command_type);
        dst.put_u64(frame.request_id);
        dst.put_u32(frame.payload.len() as u32);
        dst.put_slice(&frame.payload);
        let crc = crc32fast::hash(&dst[start..]);
        dst.put_u32(crc);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::new(1024).encode(frame, &mut buf).unwrap();
        buf
    }

    fn sample() -> Frame {
        Frame {
            flags: FLAG_ONEWAY,
            command_type: CommandType::AppendEntries.code(),
            request_id: 42,
            payload: Bytes::from_static(b"hello"),
        }
    }

    #[test]
    fn test_header_layout() {
        let buf = encode(sample());
        assert_eq!(buf.len(), HEADER_LEN + 5 + 4);
        assert_eq!(&buf[0..2], &[0xBA, 0xBE]);
        assert_eq!(buf[2], VERSION);
        assert_eq!(buf[3], FLAG_ONEWAY);
        assert_eq!(&buf[4..8], &19u32.to_be_bytes());
        assert_eq!(&buf[8..16], &42u64.to_be_bytes());
        assert_eq!(&buf[16..20], &5u32.to_be_bytes());
    }

    #[test]
    fn test_partial_frame_waits() {
        let buf = encode(sample());
        let mut codec = FrameCodec::new(1024);

        let mut partial = BytesMut::from(&buf[..HEADER_LEN + 2]);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);

        partial.extend_from_slice(&buf[HEADER_LEN + 2..]);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(sample()));
        assert!(partial.is_empty());
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let mut buf = encode(sample());
        let mut second = sample();
        second.request_id = 43;
        buf.extend_from_slice(&encode(second.clone()));

        let mut codec = FrameCodec::new(1024);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(sample()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(second));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_corrupted_payload() {
        let mut buf = encode(sample());
        buf[HEADER_LEN] ^= 0xff;
        let r = FrameCodec::new(1024).decode(&mut buf);
        assert!(matches!(r, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_bad_magic_and_version() {
        let mut buf = encode(sample());
        buf[0] = 0;
        assert!(FrameCodec::new(1024).decode(&mut buf).is_err());

        let mut buf = encode(sample());
        buf[2] = 2;
        assert!(FrameCodec::new(1024).decode(&mut buf).is_err());
    }

    #[test]
    fn test_oversized_frame() {
        let buf = encode(sample());
        let mut codec = FrameCodec::new(4);
        let mut buf2 = buf.clone();
        assert!(codec.decode(&mut buf2).is_err());

        let r = codec.encode(sample(), &mut BytesMut::new());
        assert!(r.is_err());
    }
}
