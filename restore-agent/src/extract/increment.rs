//! Block-level increment stream format.
//!
//! An increment carries only the blocks of a file that changed since its base
//! version. All integers are little-endian:
//!
//! ```text
//! magic        4 bytes   'w' 'i' '1' 0x55
//! file_size    u64       final size of the file
//! block_count  u32
//! block_nums   block_count x u32
//! blocks       block_count x block_size bytes, in block_nums order
//! ```
//!
//! The block size is not part of the stream; both sides take it from
//! configuration.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::fs::FileExt;

/// Magic bytes at the start of every increment stream.
pub const INCREMENT_FILE_HEADER: [u8; 4] = [b'w', b'i', b'1', 0x55];

/// Default block size, one PostgreSQL page.
pub const DEFAULT_BLOCK_SIZE: usize = 8192;

/// Decoded header of an increment stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementHeader {
    pub file_size: u64,
    pub block_numbers: Vec<u32>,
}

impl IncrementHeader {
    /// Read and validate the header. The reader is left at the first block.
    ///
    /// Framing problems come back as `InvalidData` or `UnexpectedEof`.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R, block_size: usize) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != INCREMENT_FILE_HEADER {
            return Err(invalid(format!("bad increment magic {magic:02x?}")));
        }

        let mut size_buf = [0u8; 8];
        reader.read_exact(&mut size_buf)?;
        let file_size = u64::from_le_bytes(size_buf);

        let mut count_buf = [0u8; 4];
        reader.read_exact(&mut count_buf)?;
        let block_count = u32::from_le_bytes(count_buf) as u64;

        let max_blocks = file_size.div_ceil(block_size as u64);
        if block_count > max_blocks {
            return Err(invalid(format!(
                "{block_count} blocks do not fit a file of {file_size} bytes"
            )));
        }

        let mut block_numbers = Vec::with_capacity(block_count as usize);
        for _ in 0..block_count {
            let mut num_buf = [0u8; 4];
            reader.read_exact(&mut num_buf)?;
            let block = u32::from_le_bytes(num_buf);
            let end = (block as u64 + 1) * block_size as u64;
            if end > file_size {
                return Err(invalid(format!(
                    "block {block} ends at {end}, past file size {file_size}"
                )));
            }
            block_numbers.push(block);
        }

        Ok(Self {
            file_size,
            block_numbers,
        })
    }

    /// Copy every block from `reader` into `file` at `block * block_size`.
    /// Bytes outside the named blocks are not touched.
    pub fn apply_blocks<R: Read + ?Sized>(
        &self,
        reader: &mut R,
        file: &File,
        block_size: usize,
    ) -> io::Result<()> {
        let mut block = vec![0u8; block_size];
        for &number in &self.block_numbers {
            reader.read_exact(&mut block)?;
            file.write_all_at(&block, number as u64 * block_size as u64)?;
        }
        Ok(())
    }
}

/// Serialize an increment for the given changed blocks.
///
/// Every block must be exactly `block_size` bytes long.
pub fn write_increment<W: Write>(
    writer: &mut W,
    file_size: u64,
    block_size: usize,
    blocks: &[(u32, &[u8])],
) -> io::Result<()> {
    if let Some((number, data)) = blocks.iter().find(|(_, data)| data.len() != block_size) {
        return Err(invalid(format!(
            "block {number} is {} bytes, expected {block_size}",
            data.len()
        )));
    }

    writer.write_all(&INCREMENT_FILE_HEADER)?;
    writer.write_all(&file_size.to_le_bytes())?;
    writer.write_all(&(blocks.len() as u32).to_le_bytes())?;
    for (number, _) in blocks {
        writer.write_all(&number.to_le_bytes())?;
    }
    for (_, data) in blocks {
        writer.write_all(data)?;
    }
    Ok(())
}

fn invalid(reason: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_header() -> io::Result<()> {
        let mut stream = Vec::new();
        write_increment(&mut stream, 12, 4, &[(0, b"XXXX"), (2, b"ZZZZ")])?;

        let mut reader = Cursor::new(stream);
        let header = IncrementHeader::read_from(&mut reader, 4)?;

        assert_eq!(header.file_size, 12);
        assert_eq!(header.block_numbers, vec![0, 2]);
        // 4 magic + 8 size + 4 count + 2 * 4 numbers
        assert_eq!(reader.position(), 24);
        Ok(())
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut stream = b"wi2\x55".to_vec();
        stream.extend_from_slice(&[0u8; 12]);

        let err = IncrementHeader::read_from(&mut Cursor::new(stream), 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_block_past_file_size_rejected() -> io::Result<()> {
        let mut stream = Vec::new();
        write_increment(&mut stream, 8, 4, &[(2, b"ZZZZ")])?;

        let err = IncrementHeader::read_from(&mut Cursor::new(stream), 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        Ok(())
    }

    #[test]
    fn test_truncated_stream_rejected() -> io::Result<()> {
        let mut stream = Vec::new();
        write_increment(&mut stream, 12, 4, &[(1, b"BBBB")])?;
        stream.truncate(14);

        let err = IncrementHeader::read_from(&mut Cursor::new(stream), 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        Ok(())
    }

    #[test]
    fn test_wrong_block_length_refused() {
        let err = write_increment(&mut Vec::new(), 12, 4, &[(0, b"XX")]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_apply_blocks_leaves_gaps_untouched() -> io::Result<()> {
        let target = NamedTempFile::new()?;
        std::fs::write(target.path(), b"AAAABBBBCCCC")?;

        let mut stream = Vec::new();
        write_increment(&mut stream, 12, 4, &[(0, b"XXXX"), (2, b"ZZZZ")])?;
        let mut reader = Cursor::new(stream);
        let header = IncrementHeader::read_from(&mut reader, 4)?;

        let file = std::fs::OpenOptions::new().write(true).open(target.path())?;
        header.apply_blocks(&mut reader, &file, 4)?;

        assert_eq!(std::fs::read(target.path())?, b"XXXXBBBBZZZZ");
        Ok(())
    }
}
