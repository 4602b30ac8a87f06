//! Read-only view over a FAT-formatted boot medium.
//!
//! The BIOS layer needs two read shapes over the same image: legacy CHS
//! tuples (INT 13h/AH=02h) and flat byte ranges (INT 13h/AH=42h). This crate
//! provides:
//!
//! - [`BootImage`]: shared, read-only image bytes with both read shapes
//! - [`Mbr`]: the parsed BIOS Parameter Block from sector 0
//! - [`chs_to_lba`]: legacy geometry conversion
//!
//! Reads either return the full requested range or fail; a range that runs
//! past the end of the image is an error, never a short buffer.

mod error;
mod image;
mod mbr;

pub use error::{ImageError, Result};
pub use image::BootImage;
pub use mbr::{chs_to_lba, Mbr};

/// Sector size assumed when the image does not carry a valid BPB.
pub const FALLBACK_SECTOR_SIZE: u64 = 512;
