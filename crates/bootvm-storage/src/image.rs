use std::path::Path;
use std::sync::Arc;

use crate::error::{ImageError, Result};
use crate::mbr::{chs_to_lba, Mbr};

/// A read-only boot medium.
///
/// The whole image is held in memory (floppy images are at most a couple of
/// MiB) behind an `Arc`, so clones share the bytes. Sector 0 is parsed as an
/// [`Mbr`] once at construction.
#[derive(Debug, Clone)]
pub struct BootImage {
    data: Arc<[u8]>,
    mbr: Mbr,
}

impl BootImage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<BootImage> {
        let data = std::fs::read(path).map_err(|e| ImageError::Io(e.to_string()))?;
        Ok(BootImage::from_bytes(data))
    }

    pub fn from_bytes(data: Vec<u8>) -> BootImage {
        let mbr = Mbr::parse(&data);
        BootImage {
            data: data.into(),
            mbr,
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn mbr(&self) -> &Mbr {
        &self.mbr
    }

    /// Read `size` bytes starting at `offset`.
    ///
    /// The range must lie entirely within the image; a range running past the
    /// end fails whole rather than returning a short buffer.
    pub fn read_at(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        let end = offset.checked_add(size).ok_or(ImageError::OffsetOverflow)?;
        if end > self.len() {
            return Err(ImageError::OutOfBounds {
                offset,
                len: size,
                capacity: self.len(),
            });
        }
        Ok(self.data[offset as usize..end as usize].to_vec())
    }

    /// Read `count` whole sectors addressed by a legacy CHS triple.
    ///
    /// Geometry and sector size come from the BPB when it is valid, otherwise
    /// the standard floppy defaults. The sector number is 1-based.
    pub fn read_chs(&self, cylinder: u8, head: u8, sector: u8, count: u8) -> Result<Vec<u8>> {
        let sector_size = self.mbr.sector_size();
        let lba = chs_to_lba(&self.mbr, cylinder, sector, head);
        let offset = lba
            .checked_mul(sector_size)
            .ok_or(ImageError::OffsetOverflow)?;
        self.read_at(offset, count as u64 * sector_size)
    }
}
