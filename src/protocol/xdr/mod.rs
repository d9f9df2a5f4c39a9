//! XDR (External Data Representation, RFC 4506) encoding used by ONC RPC
//! and every NFSv4 argument and result.
//!
//! XDR types are mapped onto their natural Rust counterparts: `int` is `i32`,
//! `unsigned hyper` is `u64`, `opaque<>` is `Vec<u8>` / `[u8]`, `string<>` is
//! `String` / `str`, optional data is `Option<T>`. Every item occupies a
//! multiple of four bytes on the wire; variable-length items carry a `u32`
//! length prefix and are zero-padded.
//!
//! The two traits below are deliberately synchronous and work on
//! `std::io::Read` / `std::io::Write`: requests are encoded into an
//! in-memory buffer before they reach the transport and replies are decoded
//! from a fully reassembled record.

use std::io::{Read, Write};

use byteorder::BigEndian;
use byteorder::{ReadBytesExt, WriteBytesExt};
use num_traits::{FromPrimitive, ToPrimitive};

pub mod nfs4;
pub mod rpc;
mod utils;

pub use utils::invalid_data;

/// XDR is big endian on the wire.
pub type XDREndian = BigEndian;

pub trait Serialize {
    /// Appends the XDR encoding of `self` to `dest`.
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()>;
}

pub trait Deserialize {
    /// Replaces `self` with a value decoded from `src`.
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()>;
}

/// Decodes a fresh `T` starting from its [Default] value.
pub fn deserialize<T>(src: &mut impl Read) -> std::io::Result<T>
where
    T: Deserialize + Default,
{
    let mut val = T::default();
    val.deserialize(src)?;

    Ok(val)
}

/// Encodes `value` into a new buffer.
pub fn to_vec<T: Serialize + ?Sized>(value: &T) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    value.serialize(&mut buf)?;
    Ok(buf)
}

/// Marker trait for XDR `enum` types encoded through [ToPrimitive].
pub trait SerializeEnum: ToPrimitive {}

/// XDR enumerations share the representation of a signed integer.
impl<T: SerializeEnum> Serialize for T {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self.to_i32() {
            Some(val) => dest.write_i32::<XDREndian>(val),
            None => Err(invalid_data("Invalid enum value")),
        }
    }
}

/// Marker trait for XDR `enum` types decoded through [FromPrimitive].
pub trait DeserializeEnum: FromPrimitive {}

/// XDR enumerations share the representation of a signed integer.
impl<T: DeserializeEnum> Deserialize for T {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let val = src.read_i32::<XDREndian>()?;
        *self = FromPrimitive::from_i32(val).ok_or_else(|| invalid_data("Invalid enum value"))?;
        Ok(())
    }
}

/// `bool` is `enum { FALSE = 0, TRUE = 1 }`.
impl Serialize for bool {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_i32::<XDREndian>(i32::from(*self))
    }
}

impl Deserialize for bool {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match src.read_i32::<XDREndian>()? {
            0 => false,
            1 => true,
            _ => return Err(invalid_data("Invalid value for bool enum")),
        };
        Ok(())
    }
}

macro_rules! xdr_scalar {
    ($($t:ty => $write:ident, $read:ident;)*) => {
        $(
            impl Serialize for $t {
                fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
                    dest.$write::<XDREndian>(*self)
                }
            }

            impl Deserialize for $t {
                fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                    *self = src.$read::<XDREndian>()?;
                    Ok(())
                }
            }
        )*
    };
}

xdr_scalar! {
    i32 => write_i32, read_i32;
    u32 => write_u32, read_u32;
    i64 => write_i64, read_i64;
    u64 => write_u64, read_u64;
}

/// Fixed-length opaque data, `opaque identifier[n]`.
impl<const N: usize> Serialize for [u8; N] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_all(self)?;
        utils::write_padding(N, dest)
    }
}

impl<const N: usize> Deserialize for [u8; N] {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        src.read_exact(self)?;
        utils::read_padding(N, src)
    }
}

/// Lengths travel as `u32`; this wrapper converts from and to `usize`.
#[derive(Default)]
struct UsizeAsU32(usize);

impl Serialize for UsizeAsU32 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        let Some(val) = self.0.to_u32() else {
            return Err(invalid_data("cannot cast `usize` to `u32`"));
        };
        val.serialize(dest)
    }
}

impl Deserialize for UsizeAsU32 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let Some(val) = deserialize::<u32>(src)?.to_usize() else {
            return Err(invalid_data("cannot cast `u32` to `usize`"));
        };
        self.0 = val;
        Ok(())
    }
}

/// Reads an XDR length prefix and rejects lengths above `max`.
pub fn read_length(src: &mut impl Read, max: usize) -> std::io::Result<usize> {
    let length = deserialize::<UsizeAsU32>(src)?.0;
    if length > max {
        return Err(invalid_data("variable-length item exceeds its bound"));
    }
    Ok(length)
}

/// Variable-length opaque data, `opaque identifier<>`.
impl Serialize for [u8] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        UsizeAsU32(self.len()).serialize(dest)?;
        dest.write_all(self)?;
        utils::write_padding(self.len(), dest)
    }
}

impl Deserialize for Vec<u8> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let length = deserialize::<UsizeAsU32>(src)?.0;
        self.clear();
        // Grow with the data actually present instead of trusting the prefix.
        src.take(length as u64).read_to_end(self)?;
        if self.len() != length {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        utils::read_padding(length, src)
    }
}

/// XDR `string<>`; NFSv4 strings are UTF-8.
impl Serialize for str {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.as_bytes().serialize(dest)
    }
}

impl Serialize for String {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.as_str().serialize(dest)
    }
}

impl Deserialize for String {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let bytes = deserialize::<Vec<u8>>(src)?;
        *self = String::from_utf8(bytes).map_err(|_| invalid_data("Not UTF-8 string"))?;
        Ok(())
    }
}

/// Variable-length arrays, `T identifier<>`.
impl<T: Serialize> Serialize for [T] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        UsizeAsU32(self.len()).serialize(dest)?;
        for i in self {
            i.serialize(dest)?;
        }
        Ok(())
    }
}

impl<T> Serialize for Vec<T>
where
    [T]: Serialize,
{
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.as_slice().serialize(dest)
    }
}

impl<T: Deserialize + Default> Deserialize for Vec<T> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let length = deserialize::<UsizeAsU32>(src)?.0;
        self.clear();
        for _ in 0..length {
            self.push(deserialize(src)?);
        }
        Ok(())
    }
}

/// Optional data, `T *identifier`: a bool discriminant then the value.
impl<T: Serialize> Serialize for Option<T> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            Some(data) => {
                true.serialize(dest)?;
                data.serialize(dest)
            }
            None => false.serialize(dest),
        }
    }
}

impl<T: Deserialize + Default> Deserialize for Option<T> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = if deserialize::<bool>(src)? { Some(deserialize::<T>(src)?) } else { None };
        Ok(())
    }
}

/// Implements [Serialize] for a struct by encoding its fields in order.
#[macro_export]
macro_rules! SerializeStruct {
    (
        $t:ident,
        $($element:ident),*
    ) => {
        impl $crate::protocol::xdr::Serialize for $t {
            fn serialize<W: std::io::Write>(&self, dest: &mut W) -> std::io::Result<()> {
                $(self.$element.serialize(dest)?;)*
                Ok(())
            }
        }
    };
}

/// Implements [Deserialize] for a struct by decoding its fields in order.
#[macro_export]
macro_rules! DeserializeStruct {
    (
        $t:ident,
        $($element:ident),*
    ) => {
        impl $crate::protocol::xdr::Deserialize for $t {
            fn deserialize<R: std::io::Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                $(self.$element.deserialize(src)?;)*
                Ok(())
            }
        }
    };
}

pub use crate::DeserializeStruct;
pub use crate::SerializeStruct;
