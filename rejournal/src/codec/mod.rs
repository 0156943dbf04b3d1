//! Every multi-byte integer is big-endian.
//!
//! Decoding reads from a `Bytes` cursor and never panics: a short buffer or
//! a negative length where none is allowed is reported as [`Error::Protocol`].
//!
//! Strings and byte arrays do not distinguish null from empty. Both encode
//! as length 0 and decode back as empty. Lists and maps do keep null apart,
//! using length -1.

use crate::{Error, NodeAddress};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::hash::Hash;
use uuid::Uuid;

pub trait Encode {
    fn encode(&self, buf: &mut BytesMut);

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

pub trait Decode: Sized {
    fn decode(buf: &mut Bytes) -> Result<Self, Error>;

    /// Decodes and requires the whole payload to be consumed.
    fn from_bytes(mut buf: Bytes) -> Result<Self, Error> {
        let x = Self::decode(&mut buf)?;
        if buf.has_remaining() {
            return Err(Error::Protocol(format!(
                "{} trailing bytes after payload",
                buf.remaining()
            )));
        }
        Ok(x)
    }
}

/// Empty payload.
impl Encode for () {
    fn encode(&self, _: &mut BytesMut) {}
}

impl Decode for () {
    fn decode(_: &mut Bytes) -> Result<Self, Error> {
        Ok(())
    }
}

fn need(buf: &Bytes, n: usize) -> Result<(), Error> {
    if buf.remaining() < n {
        return Err(Error::Protocol(format!(
            "short read: need {n} bytes but {} remain",
            buf.remaining()
        )));
    }
    Ok(())
}

pub fn get_u8(buf: &mut Bytes) -> Result<u8, Error> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn get_i8(buf: &mut Bytes) -> Result<i8, Error> {
    need(buf, 1)?;
    Ok(buf.get_i8())
}

pub fn get_u16(buf: &mut Bytes) -> Result<u16, Error> {
    need(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn get_i16(buf: &mut Bytes) -> Result<i16, Error> {
    need(buf, 2)?;
    Ok(buf.get_i16())
}

pub fn get_u32(buf: &mut Bytes) -> Result<u32, Error> {
    need(buf, 4)?;
    Ok(buf.get_u32())
}

pub fn get_i32(buf: &mut Bytes) -> Result<i32, Error> {
    need(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn get_u64(buf: &mut Bytes) -> Result<u64, Error> {
    need(buf, 8)?;
    Ok(buf.get_u64())
}

pub fn get_i64(buf: &mut Bytes) -> Result<i64, Error> {
    need(buf, 8)?;
    Ok(buf.get_i64())
}

pub fn put_bool(buf: &mut BytesMut, x: bool) {
    buf.put_u8(if x { 0x01 } else { 0x00 });
}

/// Any non-zero byte is true.
pub fn get_bool(buf: &mut Bytes) -> Result<bool, Error> {
    Ok(get_u8(buf)? != 0)
}

pub fn put_bytes(buf: &mut BytesMut, x: &[u8]) {
    buf.put_i32(x.len() as i32);
    buf.put_slice(x);
}

pub fn get_bytes(buf: &mut Bytes) -> Result<Bytes, Error> {
    let len = get_i32(buf)?;
    if len < 0 {
        return Err(Error::Protocol(format!("negative byte length {len}")));
    }
    let len = len as usize;
    need(buf, len)?;
    Ok(buf.split_to(len))
}

pub fn put_string(buf: &mut BytesMut, x: &str) {
    put_bytes(buf, x.as_bytes());
}

/// `None` is written exactly like `Some("")`.
pub fn put_opt_string(buf: &mut BytesMut, x: Option<&str>) {
    put_string(buf, x.unwrap_or_default());
}

pub fn get_string(buf: &mut Bytes) -> Result<String, Error> {
    let len = get_i32(buf)?;
    if len < 0 {
        return Err(Error::Protocol(format!("negative string length {len}")));
    }
    let len = len as usize;
    need(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|e| Error::Protocol(format!("bad utf-8: {e}")))
}

pub fn put_uri(buf: &mut BytesMut, x: Option<&NodeAddress>) {
    match x {
        Some(x) => put_string(buf, &x.to_string()),
        None => put_string(buf, ""),
    }
}

/// An empty string decodes as `None`.
pub fn get_uri(buf: &mut Bytes) -> Result<Option<NodeAddress>, Error> {
    let s = get_string(buf)?;
    if s.is_empty() {
        return Ok(None);
    }
    let x = s
        .parse()
        .map_err(|e| Error::Protocol(format!("bad uri {s:?}: {e}")))?;
    Ok(Some(x))
}

pub fn get_required_uri(buf: &mut Bytes) -> Result<NodeAddress, Error> {
    get_uri(buf)?.ok_or_else(|| Error::Protocol("missing uri".into()))
}

/// Two longs, most significant half first. The nil UUID stands for `None`.
pub fn put_uuid(buf: &mut BytesMut, x: Option<&Uuid>) {
    let v = x.map(|x| x.as_u128()).unwrap_or(0);
    buf.put_u64((v >> 64) as u64);
    buf.put_u64(v as u64);
}

pub fn get_uuid(buf: &mut Bytes) -> Result<Option<Uuid>, Error> {
    let hi = get_u64(buf)? as u128;
    let lo = get_u64(buf)? as u128;
    let v = (hi << 64) | lo;
    if v == 0 {
        return Ok(None);
    }
    Ok(Some(Uuid::from_u128(v)))
}

pub fn put_list<T>(buf: &mut BytesMut, xs: Option<&[T]>, f: impl Fn(&mut BytesMut, &T)) {
    let Some(xs) = xs else {
        buf.put_i32(-1);
        return;
    };
    buf.put_i32(xs.len() as i32);
    for x in xs {
        f(buf, x);
    }
}

/// Length -1 decodes as `None`. Any other negative length is a protocol error.
pub fn get_list<T>(
    buf: &mut Bytes,
    f: impl Fn(&mut Bytes) -> Result<T, Error>,
) -> Result<Option<Vec<T>>, Error> {
    let len = get_i32(buf)?;
    let len = match len {
        -1 => return Ok(None),
        n if n < 0 => return Err(Error::Protocol(format!("negative list length {n}"))),
        n => n as usize,
    };
    // Each element takes at least a byte, so an absurd length cannot preallocate.
    let mut out = Vec::with_capacity(len.min(buf.remaining()));
    for _ in 0..len {
        out.push(f(buf)?);
    }
    Ok(Some(out))
}

pub fn put_map<K, V>(
    buf: &mut BytesMut,
    xs: Option<&HashMap<K, V>>,
    fk: impl Fn(&mut BytesMut, &K),
    fv: impl Fn(&mut BytesMut, &V),
) {
    let Some(xs) = xs else {
        buf.put_i32(-1);
        return;
    };
    buf.put_i32(xs.len() as i32);
    for (k, v) in xs {
        fk(buf, k);
        fv(buf, v);
    }
}

pub fn get_map<K: Eq + Hash, V>(
    buf: &mut Bytes,
    fk: impl Fn(&mut Bytes) -> Result<K, Error>,
    fv: impl Fn(&mut Bytes) -> Result<V, Error>,
) -> Result<Option<HashMap<K, V>>, Error> {
    let len = get_i32(buf)?;
    let len = match len {
        -1 => return Ok(None),
        n if n < 0 => return Err(Error::Protocol(format!("negative map length {n}"))),
        n => n as usize,
    };
    let mut out = HashMap::with_capacity(len.min(buf.remaining()));
    for _ in 0..len {
        let k = fk(buf)?;
        let v = fv(buf)?;
        out.insert(k, v);
    }
    Ok(Some(out))
}
