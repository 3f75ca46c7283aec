//! Device memory image
//!
//! A [`MemoryImage`] is an ordered list of contiguous [`MemoryArea`]s plus a
//! boot address. Areas are kept sorted by start address; areas sharing a
//! start keep their insertion order.

use bytes::Bytes;
use ihex::Record;

use crate::error::ImageError;

/// Contiguous bytes at a device address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryArea {
    /// First address covered
    pub start: u32,
    /// Area contents
    pub data: Bytes,
}

impl MemoryArea {
    /// Create an area at `start`
    pub fn new(start: u32, data: impl Into<Bytes>) -> Self {
        Self {
            start,
            data: data.into(),
        }
    }

    /// One past the last address covered
    pub fn end(&self) -> u32 {
        self.start.wrapping_add(self.data.len() as u32)
    }

    /// Area length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the area holds no data
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Sorted memory areas and a boot address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryImage {
    areas: Vec<MemoryArea>,
    boot_address: u32,
}

impl MemoryImage {
    /// Empty image booting at 0
    pub const fn new() -> Self {
        Self {
            areas: Vec::new(),
            boot_address: 0,
        }
    }

    /// Insert an area at its sorted position
    pub fn add_area(&mut self, area: MemoryArea) {
        let index = self.areas.partition_point(|a| a.start <= area.start);
        self.areas.insert(index, area);
    }

    /// Builder form of [`add_area`](Self::add_area)
    pub fn with_area(mut self, start: u32, data: impl Into<Bytes>) -> Self {
        self.add_area(MemoryArea::new(start, data));
        self
    }

    /// Set the boot address
    pub const fn with_boot_address(mut self, boot_address: u32) -> Self {
        self.boot_address = boot_address;
        self
    }

    /// Set the boot address in place
    pub const fn set_boot_address(&mut self, boot_address: u32) {
        self.boot_address = boot_address;
    }

    /// Areas in ascending start order
    pub fn areas(&self) -> &[MemoryArea] {
        &self.areas
    }

    /// Entry point, 0 unless a start linear address record said otherwise
    pub const fn boot_address(&self) -> u32 {
        self.boot_address
    }

    /// Lowest start address, 0 for an empty image
    pub fn min_address(&self) -> u32 {
        self.areas.first().map_or(0, |a| a.start)
    }

    /// Highest end address, 0 for an empty image
    pub fn max_address(&self) -> u32 {
        self.areas.iter().map(MemoryArea::end).max().unwrap_or(0)
    }

    /// Whether the image has no areas
    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    /// Render the image as Intel HEX with `block_size` bytes per data record
    pub fn to_intel_hex(&self, block_size: usize) -> Result<String, ImageError> {
        if block_size == 0 || block_size > 0xFF {
            return Err(ImageError::RecordSize(block_size));
        }

        let mut records = Vec::new();
        let mut upper = None;

        for area in &self.areas {
            for (index, chunk) in area.data.chunks(block_size).enumerate() {
                let address = area.start.wrapping_add((index * block_size) as u32);
                let high = (address >> 16) as u16;
                if upper != Some(high) {
                    records.push(Record::ExtendedLinearAddress(high));
                    upper = Some(high);
                }
                records.push(Record::Data {
                    offset: address as u16,
                    value: chunk.to_vec(),
                });
            }
        }

        if self.boot_address != 0 {
            records.push(Record::StartLinearAddress(self.boot_address));
        }
        records.push(Record::EndOfFile);

        ihex::create_object_file_representation(&records)
            .map_err(|e| ImageError::HexWrite(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_insert() {
        let image = MemoryImage::new()
            .with_area(0x2000, vec![2; 4])
            .with_area(0x1000, vec![1; 8])
            .with_area(0x2000, vec![3; 2]);

        let starts: Vec<_> = image.areas().iter().map(|a| a.start).collect();
        assert_eq!(starts, [0x1000, 0x2000, 0x2000]);
        assert_eq!(image.areas()[1].data[0], 2);
        assert_eq!(image.min_address(), 0x1000);
        assert_eq!(image.max_address(), 0x2004);
    }

    #[test]
    fn test_empty_image() {
        let image = MemoryImage::default();
        assert!(image.is_empty());
        assert_eq!(image.min_address(), 0);
        assert_eq!(image.max_address(), 0);
        let text = image.to_intel_hex(32).unwrap();
        assert_eq!(text.lines().collect::<Vec<_>>(), [":00000001FF"]);
    }

    #[test]
    fn test_intel_hex_output() {
        let image = MemoryImage::new()
            .with_area(0xC0D0_0000, vec![0x01, 0x02, 0x03])
            .with_boot_address(0xC0D0_0001);
        let text = image.to_intel_hex(32).unwrap();
        assert_eq!(
            text.lines().collect::<Vec<_>>(),
            [
                ":02000004C0D06A",
                ":03000000010203F7",
                ":04000005C0D0000166",
                ":00000001FF",
            ]
        );
    }

    #[test]
    fn test_block_size_limits() {
        assert_eq!(
            MemoryImage::new().to_intel_hex(0),
            Err(ImageError::RecordSize(0))
        );
        assert_eq!(
            MemoryImage::new().to_intel_hex(256),
            Err(ImageError::RecordSize(256))
        );
    }
}
