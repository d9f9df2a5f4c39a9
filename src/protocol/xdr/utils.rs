use std::io::{Read, Write};

/// Every XDR item is a multiple of this many bytes.
pub const XDR_UNIT: usize = 4;

/// Bytes needed to round `len` up to the next XDR unit.
pub fn pad_len(len: usize) -> usize {
    (XDR_UNIT - len % XDR_UNIT) % XDR_UNIT
}

/// Skips the zero padding that follows `len` bytes of opaque data.
pub fn read_padding(len: usize, src: &mut impl Read) -> std::io::Result<()> {
    let mut pad = [0u8; XDR_UNIT];
    src.read_exact(&mut pad[..pad_len(len)])
}

/// Writes the zero padding that follows `len` bytes of opaque data.
pub fn write_padding(len: usize, dest: &mut impl Write) -> std::io::Result<()> {
    dest.write_all(&[0u8; XDR_UNIT][..pad_len(len)])
}

pub fn invalid_data(m: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, m.to_owned())
}
