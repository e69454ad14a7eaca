//! Wire format between a sending server and a receiving client.
//!
//! ```text
//! preamble (24 bytes, server -> client)
//! ┌───────┬─────┬───────┬──────┬─────────┬────────────┬───────────┬──────────┐
//! │ magic │ ver │ flags │ term │ payload │ term value │ max block │ reserved │
//! │  4B   │ 1B  │  1B   │  1B  │   1B    │  u64 BE    │  u32 BE   │  u32 BE  │
//! └───────┴─────┴───────┴──────┴─────────┴────────────┴───────────┴──────────┘
//!
//! frames (server -> client)      acks (client -> server, only with FLAG_LATENCY_ACKS)
//! ┌──────────┬──────────────┐    ┌──────────┐
//! │ len u32  │ len bytes... │    │ len u32  │
//! └──────────┴──────────────┘    └──────────┘
//! ```
//!
//! A frame of length 0 ends the stream. A stream that ends without it was cut short.

use crate::configuration::types::{PayloadMode, Termination, WorkloadSpec};
use crate::error_handling::types::ProtocolError;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAGIC: [u8; 4] = *b"SKBN";
pub const VERSION: u8 = 1;
pub const PREAMBLE_LEN: usize = 24;
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub const FLAG_LATENCY_ACKS: u8 = 0b0000_0001;

const TERM_BYTES: u8 = 0;
const TERM_DURATION: u8 = 1;
const TERM_OPEN: u8 = 2;

const PAYLOAD_FIXED: u8 = 0;
const PAYLOAD_UNIFORM: u8 = 1;

/// Announces the sender's workload so the receiver can validate frames and decide whether to
/// acknowledge them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    pub latency_acks: bool,
    pub termination: Termination,
    pub uniform_payload: bool,
    pub max_block: u32,
}

impl Preamble {
    pub fn for_spec(spec: &WorkloadSpec) -> Self {
        Self {
            latency_acks: spec.latency,
            termination: spec.termination,
            uniform_payload: matches!(spec.payload, PayloadMode::Uniform { .. }),
            max_block: spec.payload.max_block(),
        }
    }

    pub fn encode(&self) -> [u8; PREAMBLE_LEN] {
        let (term_kind, term_value) = match self.termination {
            Termination::Bytes(n) => (TERM_BYTES, n),
            Termination::Duration(d) => (TERM_DURATION, d.as_millis() as u64),
            Termination::UntilPeerEnds => (TERM_OPEN, 0),
        };

        let mut buf = [0u8; PREAMBLE_LEN];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = VERSION;
        buf[5] = if self.latency_acks { FLAG_LATENCY_ACKS } else { 0 };
        buf[6] = term_kind;
        buf[7] = if self.uniform_payload {
            PAYLOAD_UNIFORM
        } else {
            PAYLOAD_FIXED
        };
        buf[8..16].copy_from_slice(&term_value.to_be_bytes());
        buf[16..20].copy_from_slice(&self.max_block.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8; PREAMBLE_LEN]) -> Result<Self, ProtocolError> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }
        if buf[4] != VERSION {
            return Err(ProtocolError::UnsupportedVersion(buf[4]));
        }

        let mut value = [0u8; 8];
        value.copy_from_slice(&buf[8..16]);
        let term_value = u64::from_be_bytes(value);
        let termination = match buf[6] {
            TERM_BYTES => Termination::Bytes(term_value),
            TERM_DURATION => Termination::Duration(Duration::from_millis(term_value)),
            TERM_OPEN => Termination::UntilPeerEnds,
            other => return Err(ProtocolError::UnknownTermination(other)),
        };
        let uniform_payload = match buf[7] {
            PAYLOAD_FIXED => false,
            PAYLOAD_UNIFORM => true,
            other => return Err(ProtocolError::UnknownPayloadMode(other)),
        };

        let mut max = [0u8; 4];
        max.copy_from_slice(&buf[16..20]);
        let max_block = u32::from_be_bytes(max);
        if max_block == 0 || max_block > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                len: max_block,
                max: MAX_FRAME_LEN,
            });
        }

        Ok(Self {
            latency_acks: buf[5] & FLAG_LATENCY_ACKS != 0,
            termination,
            uniform_payload,
            max_block,
        })
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.encode()).await?;
        writer.flush().await
    }

    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, ProtocolError> {
        let mut buf = [0u8; PREAMBLE_LEN];
        read_exact_or_eof(reader, &mut buf, "preamble").await?;
        Self::decode(&buf)
    }
}

/// Writes one framed block. An empty block is the end frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, block: &[u8]) -> io::Result<()> {
    writer.write_u32(block.len() as u32).await?;
    if !block.is_empty() {
        writer.write_all(block).await?;
    }
    writer.flush().await
}

pub async fn write_end<W: AsyncWrite + Unpin>(writer: &mut W) -> io::Result<()> {
    write_frame(writer, &[]).await
}

/// Reads a frame header and checks it against the announced maximum block size.
pub async fn read_frame_len<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_block: u32,
) -> Result<u32, ProtocolError> {
    let mut buf = [0u8; 4];
    read_exact_or_eof(reader, &mut buf, "frame header").await?;
    let len = u32::from_be_bytes(buf);
    if len > max_block {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: max_block,
        });
    }
    Ok(len)
}

pub async fn write_ack<W: AsyncWrite + Unpin>(writer: &mut W, len: u32) -> io::Result<()> {
    writer.write_u32(len).await?;
    writer.flush().await
}

pub async fn read_ack<R: AsyncRead + Unpin>(
    reader: &mut R,
    expected: u32,
) -> Result<(), ProtocolError> {
    let mut buf = [0u8; 4];
    read_exact_or_eof(reader, &mut buf, "acknowledgement").await?;
    let got = u32::from_be_bytes(buf);
    if got != expected {
        return Err(ProtocolError::AckMismatch { expected, got });
    }
    Ok(())
}

async fn read_exact_or_eof<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    what: &'static str,
) -> Result<(), ProtocolError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::UnexpectedEof(what))
        }
        Err(e) => Err(ProtocolError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn preamble() -> Preamble {
        Preamble {
            latency_acks: true,
            termination: Termination::Bytes(1_048_576),
            uniform_payload: false,
            max_block: 4096,
        }
    }

    #[test]
    fn test_preamble_layout() {
        let buf = preamble().encode();
        assert_eq!(&buf[0..4], b"SKBN");
        assert_eq!(buf[4], VERSION);
        assert_eq!(buf[5], FLAG_LATENCY_ACKS);
        assert_eq!(&buf[8..16], &1_048_576u64.to_be_bytes());
        assert_eq!(&buf[20..24], &[0, 0, 0, 0]);
        assert_eq!(Preamble::decode(&buf).unwrap(), preamble());
    }

    #[test]
    fn test_duration_preamble_keeps_millis() {
        let p = Preamble {
            termination: Termination::Duration(Duration::from_millis(2500)),
            uniform_payload: true,
            ..preamble()
        };
        assert_eq!(Preamble::decode(&p.encode()).unwrap(), p);
    }

    #[test]
    fn test_preamble_rejects_foreign_bytes() {
        let mut buf = preamble().encode();
        buf[0] = b'X';
        assert!(matches!(Preamble::decode(&buf), Err(ProtocolError::BadMagic(_))));

        let mut buf = preamble().encode();
        buf[4] = 9;
        assert!(matches!(
            Preamble::decode(&buf),
            Err(ProtocolError::UnsupportedVersion(9))
        ));

        let mut buf = preamble().encode();
        buf[6] = 7;
        assert!(matches!(
            Preamble::decode(&buf),
            Err(ProtocolError::UnknownTermination(7))
        ));

        let mut buf = preamble().encode();
        buf[7] = 3;
        assert!(matches!(
            Preamble::decode(&buf),
            Err(ProtocolError::UnknownPayloadMode(3))
        ));
    }

    #[tokio::test]
    async fn test_truncated_preamble_is_eof() {
        let mut mock = Builder::new().read(b"SKBN\x01").build();
        let err = Preamble::read_from(&mut mock).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedEof("preamble")));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let mut mock = Builder::new().read(&8193u32.to_be_bytes()).build();
        let err = read_frame_len(&mut mock, 8192).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::FrameTooLarge {
                len: 8193,
                max: 8192
            }
        ));
    }

    #[tokio::test]
    async fn test_frames_on_the_wire() {
        let mut mock = Builder::new()
            .write(&3u32.to_be_bytes())
            .write(b"abc")
            .write(&0u32.to_be_bytes())
            .build();
        write_frame(&mut mock, b"abc").await.unwrap();
        write_end(&mut mock).await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_mismatch() {
        let mut mock = Builder::new().read(&10u32.to_be_bytes()).build();
        let err = read_ack(&mut mock, 4096).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::AckMismatch {
                expected: 4096,
                got: 10
            }
        ));
    }
}
