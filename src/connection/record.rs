//! Record marking for stream transports (RFC 5531 section 11).
//!
//! Each fragment is prefixed by a 4-byte big-endian header: the low 31 bits
//! hold the fragment length and the high bit marks the last fragment of a
//! record. A record is the concatenation of its fragments.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// High bit of a fragment header: this fragment ends the record.
pub const LAST_FRAGMENT: u32 = 0x8000_0000;

/// Largest fragment a header can describe.
pub const MAX_FRAGMENT_LENGTH: usize = (LAST_FRAGMENT - 1) as usize;

/// Largest record accepted from a peer.
pub const MAX_RECORD_LENGTH: usize = 16 * 1024 * 1024;

/// Reads one fragment and appends its payload to `append_to`.
///
/// Returns `true` if it was the last fragment of the record.
async fn read_fragment<R>(src: &mut R, append_to: &mut Vec<u8>) -> io::Result<bool>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header_buf = [0_u8; 4];
    src.read_exact(&mut header_buf).await?;
    let header = u32::from_be_bytes(header_buf);
    let is_last = header & LAST_FRAGMENT != 0;
    let length = (header & !LAST_FRAGMENT) as usize;
    trace!("Reading fragment length:{}, last:{}", length, is_last);

    if append_to.len().saturating_add(length) > MAX_RECORD_LENGTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("record length exceeds max {MAX_RECORD_LENGTH}"),
        ));
    }
    let start = append_to.len();
    append_to.resize(start + length, 0);
    src.read_exact(&mut append_to[start..]).await?;
    Ok(is_last)
}

/// Reads fragments until the last one and returns the reassembled record.
pub async fn read_record<R>(src: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut record = Vec::new();
    while !read_fragment(src, &mut record).await? {}
    trace!("Read record of {} bytes", record.len());
    Ok(record)
}

/// Writes `buf` as one record.
///
/// Anything that fits in a single fragment goes out as exactly one fragment.
pub async fn write_record<W>(dest: &mut W, buf: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_record_fragmented(dest, buf, MAX_FRAGMENT_LENGTH).await
}

/// Writes `buf` as one record split into fragments of at most `fragment_size` bytes.
pub async fn write_record_fragmented<W>(
    dest: &mut W,
    buf: &[u8],
    fragment_size: usize,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let fragment_size = fragment_size.clamp(1, MAX_FRAGMENT_LENGTH);
    let mut offset = 0;
    loop {
        let length = (buf.len() - offset).min(fragment_size);
        let is_last = offset + length >= buf.len();
        let mut header = length as u32;
        if is_last {
            header |= LAST_FRAGMENT;
        }
        trace!("Writing fragment length:{}, last:{}", length, is_last);

        let mut fragment = Vec::with_capacity(4 + length);
        fragment.extend_from_slice(&header.to_be_bytes());
        fragment.extend_from_slice(&buf[offset..offset + length]);
        dest.write_all(&fragment).await?;

        offset += length;
        if is_last {
            break;
        }
    }
    dest.flush().await
}
