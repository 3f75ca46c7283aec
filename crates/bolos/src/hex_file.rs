//! Intel HEX reader
//!
//! Supports data (00), end of file (01), extended linear address (04) and
//! start linear address (05) records. Segment records (02, 03) are rejected.

use std::path::Path;

use ihex::Record;
use tracing::debug;

use crate::error::{Error, ImageError, Result};
use crate::image::{MemoryArea, MemoryImage};

const EXTENDED_SEGMENT_ADDRESS: u8 = 0x02;
const START_SEGMENT_ADDRESS: u8 = 0x03;

/// Area being accumulated from consecutive data records
struct Pending {
    start: u16,
    next: u16,
    data: Vec<u8>,
}

#[derive(Default)]
struct Builder {
    image: MemoryImage,
    zone: Option<u16>,
    pending: Option<Pending>,
}

impl Builder {
    fn flush(&mut self) {
        if let (Some(zone), Some(pending)) = (self.zone, self.pending.take()) {
            if !pending.data.is_empty() {
                let start = (u32::from(zone) << 16) | u32::from(pending.start);
                self.image.add_area(MemoryArea::new(start, pending.data));
            }
        }
    }

    fn data(&mut self, offset: u16, value: Vec<u8>, index: usize) -> Result<(), ImageError> {
        if self.zone.is_none() {
            return Err(ImageError::HexRecord {
                index,
                reason: "data record before any extended linear address".into(),
            });
        }
        if self.pending.as_ref().is_some_and(|p| p.next != offset) {
            self.flush();
        }
        let pending = self.pending.get_or_insert_with(|| Pending {
            start: offset,
            next: offset,
            data: Vec::new(),
        });
        pending.next = pending.next.wrapping_add(value.len() as u16);
        pending.data.extend(value);
        Ok(())
    }

    fn apply(mut self, record: Record, index: usize) -> Result<Self, ImageError> {
        match record {
            Record::Data { offset, value } => self.data(offset, value, index)?,
            Record::EndOfFile => {
                self.flush();
                self.zone = None;
            }
            Record::ExtendedLinearAddress(zone) => {
                self.flush();
                self.zone = Some(zone);
            }
            Record::StartLinearAddress(address) => self.image.set_boot_address(address),
            Record::ExtendedSegmentAddress(_) => {
                return Err(ImageError::UnsupportedRecord {
                    index,
                    record: EXTENDED_SEGMENT_ADDRESS,
                });
            }
            Record::StartSegmentAddress { .. } => {
                return Err(ImageError::UnsupportedRecord {
                    index,
                    record: START_SEGMENT_ADDRESS,
                });
            }
        }
        Ok(self)
    }

    fn finish(mut self) -> MemoryImage {
        self.flush();
        self.image
    }
}

impl MemoryImage {
    /// Parse Intel HEX text into an image
    pub fn from_intel_hex(text: &str) -> Result<Self, ImageError> {
        let image = ihex::Reader::new(text)
            .enumerate()
            .try_fold(Builder::default(), |builder, (index, record)| {
                let index = index + 1;
                let record = record.map_err(|e| ImageError::HexRecord {
                    index,
                    reason: e.to_string(),
                })?;
                builder.apply(record, index)
            })?
            .finish();

        debug!(
            areas = image.areas().len(),
            min = format_args!("{:#010x}", image.min_address()),
            max = format_args!("{:#010x}", image.max_address()),
            boot = format_args!("{:#010x}", image.boot_address()),
            "Parsed Intel HEX image"
        );
        Ok(image)
    }

    /// Read and parse an Intel HEX file
    pub fn from_intel_hex_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Io(e).with_context(format!("reading {}", path.display())))?;
        Ok(Self::from_intel_hex(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
:020000040000FA
:0410000001020304E2
:0410040005060708CA
:042000001122334432
:0400000500001001E6
:00000001FF
";

    #[test]
    fn test_parse_areas_and_boot() {
        let image = MemoryImage::from_intel_hex(SAMPLE).unwrap();
        assert_eq!(image.areas().len(), 2);
        assert_eq!(image.areas()[0].start, 0x1000);
        assert_eq!(image.areas()[0].data.as_ref(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(image.areas()[1].start, 0x2000);
        assert_eq!(image.boot_address(), 0x1001);
        assert_eq!(image.min_address(), 0x1000);
        assert_eq!(image.max_address(), 0x2004);
    }

    #[test]
    fn test_extended_linear_address_splits_zones() {
        let text = "\
:02000004C0D06A
:03000000010203F7
:02000004C0D169
:03000000010203F7
:00000001FF
";
        let image = MemoryImage::from_intel_hex(text).unwrap();
        let starts: Vec<_> = image.areas().iter().map(|a| a.start).collect();
        assert_eq!(starts, [0xC0D0_0000, 0xC0D1_0000]);
        assert_eq!(image.boot_address(), 0);
    }

    #[test]
    fn test_printer_output_reads_back() {
        let image = MemoryImage::new()
            .with_area(0xC0D0_0000, (0..100u8).collect::<Vec<_>>())
            .with_area(0xC0D1_0000, vec![0xEE; 10])
            .with_boot_address(0xC0D0_0001);
        let text = image.to_intel_hex(32).unwrap();
        assert_eq!(MemoryImage::from_intel_hex(&text).unwrap(), image);
    }

    #[test]
    fn test_zone_required() {
        let err = MemoryImage::from_intel_hex(":0410000001020304E2\n").unwrap_err();
        assert!(matches!(err, ImageError::HexRecord { index: 1, .. }));
    }

    #[test]
    fn test_rejects_malformed_records() {
        let cases = [
            "0410000001020304E2",
            ":0410000001020304E3",
            ":04100000010203E2",
            ":zz",
        ];
        for case in cases {
            let text = format!(":020000040000FA\n{case}\n");
            assert!(
                matches!(
                    MemoryImage::from_intel_hex(&text),
                    Err(ImageError::HexRecord { index: 2, .. })
                ),
                "{case}"
            );
        }
    }

    #[test]
    fn test_rejects_segment_records() {
        let err = MemoryImage::from_intel_hex(":020000021000EC\n").unwrap_err();
        assert_eq!(err, ImageError::UnsupportedRecord { index: 1, record: 2 });
    }
}
