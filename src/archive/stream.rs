use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};

/// Which side of a copy failed
#[derive(Debug)]
pub(crate) enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

/// Stream `reader` into `writer` through `buffer`, hashing the same bytes
///
/// Returns the byte count and the lowercase hex SHA-256. Memory use is bounded
/// by the buffer regardless of input size.
pub(crate) fn copy_hashed<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    buffer: &mut [u8],
) -> Result<(u64, String), CopyError> {
    let mut hasher = Sha256::new();
    let total = copy_chunks(reader, writer, buffer, Some(&mut hasher))?;
    Ok((total, hex::encode(hasher.finalize())))
}

/// Same as [`copy_hashed`] without the digest
pub(crate) fn copy_plain<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    buffer: &mut [u8],
) -> Result<u64, CopyError> {
    copy_chunks(reader, writer, buffer, None)
}

fn copy_chunks<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    buffer: &mut [u8],
    mut hasher: Option<&mut Sha256>,
) -> Result<u64, CopyError> {
    let mut total = 0u64;

    loop {
        let bytes_read = match reader.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };

        let chunk = &buffer[..bytes_read];
        if let Some(hasher) = hasher.as_deref_mut() {
            hasher.update(chunk);
        }
        writer.write_all(chunk).map_err(CopyError::Write)?;
        total += bytes_read as u64;
    }

    Ok(total)
}

/// Hash a reader without writing anywhere
pub(crate) fn hash_reader<R: Read + ?Sized>(
    reader: &mut R,
    buffer: &mut [u8],
) -> io::Result<(u64, String)> {
    match copy_hashed(reader, &mut io::sink(), buffer) {
        Ok(result) => Ok(result),
        Err(CopyError::Read(e)) | Err(CopyError::Write(e)) => Err(e),
    }
}
