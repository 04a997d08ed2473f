//! Byte-level wire codec: primitive encodings, message framing, and the
//! eleven-variant message taxonomy exchanged by the reconciliation protocol.
//!
//! All multi-byte integers are big-endian *except* `Zp`, which is
//! little-endian and zero-padded on the right — §6 calls this out explicitly
//! because it differs from the natural big-endian form a bigint library
//! returns, and getting it backwards silently breaks interop.

use std::sync::Arc;

use num_bigint::BigUint;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::bitstring::Bitstring;
use crate::zp::{Zp, ZpError};
use crate::zset::ZSet;

/// Errors from decoding or framing wire bytes.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o error on the wire: {0}")]
    Io(#[from] std::io::Error),
    #[error("string payload is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("malformed field value: {0}")]
    Zp(#[from] ZpError),
    #[error("unknown message type byte {0}")]
    UnknownMsgType(u8),
    #[error("message exceeds the maximum allowed frame size: {len} bytes")]
    FrameTooLarge { len: u32 },
    #[error("config message is missing mandatory key {0:?}")]
    MissingConfigKey(&'static str),
    #[error("trailing bytes left in payload after decoding")]
    TrailingBytes,
}

/// Frames larger than this are rejected outright rather than allocating an
/// attacker-controlled buffer.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

// ---------------------------------------------------------------------
// Primitive encodings (§6)
// ---------------------------------------------------------------------

fn write_int(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_int(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn write_bytes_raw(buf: &mut Vec<u8>, b: &[u8]) {
    write_int(buf, b.len() as u32);
    buf.extend_from_slice(b);
}

fn write_bitstring(buf: &mut Vec<u8>, b: &Bitstring) {
    write_int(buf, b.len() as u32);
    buf.extend_from_slice(b.bytes());
}

fn write_zp(buf: &mut Vec<u8>, z: &Zp) {
    buf.extend(z.to_wire_bytes());
}

fn write_zp_array(buf: &mut Vec<u8>, zs: &[Zp]) {
    write_int(buf, zs.len() as u32);
    for z in zs {
        write_zp(buf, z);
    }
}

fn write_zset(buf: &mut Vec<u8>, s: &ZSet) {
    write_int(buf, s.len() as u32);
    for z in s.iter() {
        write_zp(buf, z);
    }
}

/// A cursor over a decoded payload buffer, with bounds-checked reads.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.pos + n > self.buf.len() {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short payload").into());
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_int(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn read_string(&mut self) -> Result<String, WireError> {
        let n = self.read_int()? as usize;
        Ok(String::from_utf8(self.take(n)?.to_vec())?)
    }

    fn read_bytes_raw(&mut self) -> Result<Vec<u8>, WireError> {
        let n = self.read_int()? as usize;
        Ok(self.take(n)?.to_vec())
    }

    fn read_bitstring(&mut self) -> Result<Bitstring, WireError> {
        let nbits = self.read_int()? as usize;
        let nbytes = (nbits + 7) / 8;
        let data = self.take(nbytes)?;
        Ok(Bitstring::set_bytes(nbits, data))
    }

    fn read_zp(&mut self, p: &Arc<BigUint>) -> Result<Zp, WireError> {
        let len = Zp::wire_len(p);
        let bytes = self.take(len)?;
        Ok(Zp::from_wire_bytes(p, bytes)?)
    }

    fn read_zp_array(&mut self, p: &Arc<BigUint>) -> Result<Vec<Zp>, WireError> {
        let n = self.read_int()? as usize;
        (0..n).map(|_| self.read_zp(p)).collect()
    }

    fn read_zset(&mut self, p: &Arc<BigUint>) -> Result<ZSet, WireError> {
        Ok(ZSet::from_iter(self.read_zp_array(p)?))
    }

    fn finish(self) -> Result<(), WireError> {
        if self.pos != self.buf.len() {
            return Err(WireError::TrailingBytes);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Config sub-message
// ---------------------------------------------------------------------

/// The mandatory-key config handshake payload (§6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigMsg {
    pub version: String,
    pub http_port: u32,
    pub bitquantum: u32,
    pub mbar: u32,
    pub filters: String,
}

const CONFIG_KEYS: [&str; 5] = ["version", "http port", "bitquantum", "mbar", "filters"];

impl ConfigMsg {
    fn encode(&self, buf: &mut Vec<u8>) {
        write_int(buf, CONFIG_KEYS.len() as u32);
        write_string(buf, "version");
        write_string(buf, &self.version);
        write_string(buf, "http port");
        write_int(buf, 4);
        write_int(buf, self.http_port);
        write_string(buf, "bitquantum");
        write_int(buf, 4);
        write_int(buf, self.bitquantum);
        write_string(buf, "mbar");
        write_int(buf, 4);
        write_int(buf, self.mbar);
        write_string(buf, "filters");
        write_string(buf, &self.filters);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let n = r.read_int()? as usize;
        let mut version = None;
        let mut http_port = None;
        let mut bitquantum = None;
        let mut mbar = None;
        let mut filters = None;
        for _ in 0..n {
            let key = r.read_string()?;
            match key.as_str() {
                "http port" => {
                    let len = r.read_int()?;
                    debug_assert_eq!(len, 4, "int-valued config key must carry a 4-byte value");
                    http_port = Some(r.read_int()?);
                }
                "bitquantum" => {
                    let len = r.read_int()?;
                    debug_assert_eq!(len, 4, "int-valued config key must carry a 4-byte value");
                    bitquantum = Some(r.read_int()?);
                }
                "mbar" => {
                    let len = r.read_int()?;
                    debug_assert_eq!(len, 4, "int-valued config key must carry a 4-byte value");
                    mbar = Some(r.read_int()?);
                }
                "version" => version = Some(r.read_string()?),
                "filters" => filters = Some(r.read_string()?),
                _ => {
                    // Unknown keys are forward-compatible noise: consume and
                    // discard as a length-prefixed string.
                    let _ = r.read_string()?;
                }
            }
        }
        Ok(ConfigMsg {
            version: version.ok_or(WireError::MissingConfigKey("version"))?,
            http_port: http_port.ok_or(WireError::MissingConfigKey("http port"))?,
            bitquantum: bitquantum.ok_or(WireError::MissingConfigKey("bitquantum"))?,
            mbar: mbar.ok_or(WireError::MissingConfigKey("mbar"))?,
            filters: filters.ok_or(WireError::MissingConfigKey("filters"))?,
        })
    }
}

// ---------------------------------------------------------------------
// Message taxonomy
// ---------------------------------------------------------------------

/// One protocol message (§4.8, §6). Message type tags are fixed by the wire
/// format and must not be reordered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Msg {
    RqstPoly { prefix: Bitstring, size: u32, samples: Vec<Zp> },
    RqstFull { prefix: Bitstring, elements: Vec<Zp> },
    Elements(ZSet),
    FullElements(ZSet),
    SyncFail,
    Done,
    Flush,
    Error(String),
    DbRqst(Vec<u8>),
    DbRepl(Vec<u8>),
    Config(ConfigMsg),
}

impl Msg {
    fn type_tag(&self) -> u8 {
        match self {
            Msg::RqstPoly { .. } => 0,
            Msg::RqstFull { .. } => 1,
            Msg::Elements(_) => 2,
            Msg::FullElements(_) => 3,
            Msg::SyncFail => 4,
            Msg::Done => 5,
            Msg::Flush => 6,
            Msg::Error(_) => 7,
            Msg::DbRqst(_) => 8,
            Msg::DbRepl(_) => 9,
            Msg::Config(_) => 10,
        }
    }

    fn encode_payload(&self) -> Vec<u8> {
        let mut buf = vec![self.type_tag()];
        match self {
            Msg::RqstPoly { prefix, size, samples } => {
                write_bitstring(&mut buf, prefix);
                write_int(&mut buf, *size);
                write_zp_array(&mut buf, samples);
            }
            Msg::RqstFull { prefix, elements } => {
                write_bitstring(&mut buf, prefix);
                write_zp_array(&mut buf, elements);
            }
            Msg::Elements(s) => write_zset(&mut buf, s),
            Msg::FullElements(s) => write_zset(&mut buf, s),
            Msg::SyncFail | Msg::Done | Msg::Flush => {}
            Msg::Error(reason) => write_string(&mut buf, reason),
            Msg::DbRqst(payload) => write_bytes_raw(&mut buf, payload),
            Msg::DbRepl(payload) => write_bytes_raw(&mut buf, payload),
            Msg::Config(cfg) => cfg.encode(&mut buf),
        }
        buf
    }

    fn decode_payload(payload: &[u8], p: &Arc<BigUint>) -> Result<Msg, WireError> {
        let mut r = Reader::new(payload);
        let tag = r.read_u8()?;
        let msg = match tag {
            0 => {
                let prefix = r.read_bitstring()?;
                let size = r.read_int()?;
                let samples = r.read_zp_array(p)?;
                Msg::RqstPoly { prefix, size, samples }
            }
            1 => {
                let prefix = r.read_bitstring()?;
                let elements = r.read_zp_array(p)?;
                Msg::RqstFull { prefix, elements }
            }
            2 => Msg::Elements(r.read_zset(p)?),
            3 => Msg::FullElements(r.read_zset(p)?),
            4 => Msg::SyncFail,
            5 => Msg::Done,
            6 => Msg::Flush,
            7 => Msg::Error(r.read_string()?),
            8 => Msg::DbRqst(r.read_bytes_raw()?),
            9 => Msg::DbRepl(r.read_bytes_raw()?),
            10 => Msg::Config(ConfigMsg::decode(&mut r)?),
            other => return Err(WireError::UnknownMsgType(other)),
        };
        r.finish()?;
        Ok(msg)
    }
}

// ---------------------------------------------------------------------
// Framing over an async transport
// ---------------------------------------------------------------------

/// Write `msg` framed as a 4-byte big-endian length prefix followed by its
/// encoded payload.
pub async fn write_msg<W: AsyncWrite + Unpin>(w: &mut W, msg: &Msg) -> Result<(), WireError> {
    let payload = msg.encode_payload();
    w.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    w.write_all(&payload).await?;
    w.flush().await?;
    Ok(())
}

/// Read one framed message, decoding `Zp` fields against modulus `p`.
pub async fn read_msg<R: AsyncRead + Unpin>(r: &mut R, p: &Arc<BigUint>) -> Result<Msg, WireError> {
    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge { len });
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).await?;
    Msg::decode_payload(&payload, p)
}

/// Write the bare (unframed) length-prefixed handshake verdict string
/// (`"passed"` or `"failed"`, §6) used after the `Config` exchange.
pub async fn write_verdict<W: AsyncWrite + Unpin>(w: &mut W, verdict: &str) -> Result<(), WireError> {
    let mut buf = Vec::new();
    write_string(&mut buf, verdict);
    w.write_all(&buf).await?;
    w.flush().await?;
    Ok(())
}

/// Read the bare length-prefixed handshake verdict string.
pub async fn read_verdict<R: AsyncRead + Unpin>(r: &mut R) -> Result<String, WireError> {
    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes).await?;
    let n = u32::from_be_bytes(len_bytes) as usize;
    let mut data = vec![0u8; n];
    r.read_exact(&mut data).await?;
    Ok(String::from_utf8(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zp::p_sks;
    use tokio::io::duplex;

    fn roundtrip(p: &Arc<BigUint>, msg: Msg) -> Msg {
        let payload = msg.encode_payload();
        Msg::decode_payload(&payload, p).unwrap()
    }

    #[test]
    fn invariant6_config_round_trips() {
        let p = p_sks();
        let cfg = Msg::Config(ConfigMsg {
            version: "3.1415".to_string(),
            http_port: 11371,
            bitquantum: 2,
            mbar: 5,
            filters: "".to_string(),
        });
        assert_eq!(roundtrip(&p, cfg.clone()), cfg);
    }

    #[test]
    fn every_msg_type_round_trips() {
        let p = p_sks();
        let prefix = Bitstring::set_bytes(4, &[0b1010_0000]);
        let sample = Zp::from_u64(&p, 42);
        let set = ZSet::from_iter([Zp::from_u64(&p, 1), Zp::from_u64(&p, 2)]);

        let msgs = vec![
            Msg::RqstPoly { prefix: prefix.clone(), size: 7, samples: vec![sample.clone()] },
            Msg::RqstFull { prefix, elements: vec![sample] },
            Msg::Elements(set.clone()),
            Msg::FullElements(set),
            Msg::SyncFail,
            Msg::Done,
            Msg::Flush,
            Msg::Error("incompatible peer".to_string()),
            Msg::DbRqst(vec![1, 2, 3]),
            Msg::DbRepl(vec![]),
        ];
        for m in msgs {
            assert_eq!(roundtrip(&p, m.clone()), m);
        }
    }

    #[test]
    fn unknown_msg_type_is_rejected() {
        let p = p_sks();
        let payload = vec![255u8];
        assert!(matches!(Msg::decode_payload(&payload, &p), Err(WireError::UnknownMsgType(255))));
    }

    #[test]
    fn config_missing_key_is_rejected() {
        let p = p_sks();
        let mut buf = vec![10u8]; // Config tag, zero key/value pairs
        write_int(&mut buf, 0);
        assert!(matches!(
            Msg::decode_payload(&buf, &p),
            Err(WireError::MissingConfigKey("version"))
        ));
    }

    #[tokio::test]
    async fn framed_round_trip_over_duplex() {
        let p = p_sks();
        let (mut a, mut b) = duplex(4096);
        let msg = Msg::Error("boom".to_string());
        write_msg(&mut a, &msg).await.unwrap();
        let got = read_msg(&mut b, &p).await.unwrap();
        assert_eq!(got, msg);
    }

    #[tokio::test]
    async fn verdict_round_trips_over_duplex() {
        let (mut a, mut b) = duplex(256);
        write_verdict(&mut a, "passed").await.unwrap();
        assert_eq!(read_verdict(&mut b).await.unwrap(), "passed");
    }
}
