//! Merged flash-image container.
//!
//! A merged image bundles one flash payload per region behind a small
//! container header:
//!
//! ```text
//! +----------------------+
//! |  Header (43 bytes)   |  sign 'MG', merged size, checksum, revision,
//! +----------------------+  IC type, region bitmask
//! |  Subheader[0] (12B)  |  one per set bitmask bit, in bit order:
//! +----------------------+  download address, size, reserved
//! |        ...           |
//! +----------------------+
//! |  Region[0]           |  512-byte record area, then the data
//! +----------------------+
//! |        ...           |
//! +----------------------+
//! ```
//!
//! The record area is a tag/length/value stream. A record with id 19
//! overrides the region's flash address, ids 4 and 20 override its size;
//! anything outside `1..=254` terminates the scan. The overrides win over
//! the subheader's declared values whenever present.

use {
    crate::error::{Error, Result},
    byteorder::{ByteOrder, LittleEndian, ReadBytesExt},
    log::{debug, trace},
    std::io::{Read, Seek, SeekFrom},
};

/// Container signature, 'MG' read little-endian.
pub const IMAGE_SIGN: u16 = 0x4D47;

/// Container header wire size.
pub const HEADER_LEN: u32 = 43;

/// Region subheader wire size.
pub const SUBHEADER_LEN: u32 = 12;

/// Record area at the front of every region.
pub const RECORD_AREA_LEN: usize = 512;

const RECORD_ID_SIZE: i16 = 4;
const RECORD_ID_ADDR: i16 = 19;
const RECORD_ID_SIZE_ALT: i16 = 20;

fn truncated(what: &str) -> impl FnOnce(std::io::Error) -> Error {
    let what = what.to_string();
    move |e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::InvalidImage(format!("truncated {what}"))
        } else {
            Error::Io(e)
        }
    }
}

/// Container header.
#[derive(Debug, Clone)]
pub struct ImageHeader {
    /// Signature, expected [`IMAGE_SIGN`].
    pub sign: u16,
    /// Size of the whole merged file.
    pub merged_size: u32,
    /// Container checksum (opaque to the downloader).
    pub checksum: [u8; 32],
    /// Container format revision.
    pub revision: u8,
    /// Target IC type.
    pub ic_type: u8,
    /// Bitmask of present regions; the population count is the region count.
    pub region_mask: u32,
}

impl ImageHeader {
    /// Read a header from `reader`.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let sign = reader.read_u16::<LittleEndian>()?;
        let merged_size = reader.read_u32::<LittleEndian>()?;
        let mut checksum = [0u8; 32];
        reader.read_exact(&mut checksum)?;
        let revision = reader.read_u8()?;
        let ic_type = reader.read_u8()?;
        let region_mask = reader.read_u32::<LittleEndian>()?;

        Ok(Self {
            sign,
            merged_size,
            checksum,
            revision,
            ic_type,
            region_mask,
        })
    }

    /// Whether the signature matches.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.sign == IMAGE_SIGN
    }

    /// Number of regions the bitmask declares.
    #[must_use]
    pub fn region_count(&self) -> u32 {
        self.region_mask.count_ones()
    }
}

/// Region subheader: declared download parameters.
#[derive(Debug, Clone, Copy)]
pub struct RegionHeader {
    /// Declared flash address.
    pub download_addr: u32,
    /// Declared region size (record area included).
    pub size: u32,
    /// Reserved field, carried through untouched.
    pub reserved: u32,
}

impl RegionHeader {
    /// Read a subheader from `reader`.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            download_addr: reader.read_u32::<LittleEndian>()?,
            size: reader.read_u32::<LittleEndian>()?,
            reserved: reader.read_u32::<LittleEndian>()?,
        })
    }
}

/// Resolved download parameters for one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadRegion {
    /// File offset of the region (record area included).
    pub offset: u32,
    /// Flash address to program.
    pub addr: u32,
    /// Bytes to program.
    pub size: u32,
}

/// Parsed container: header plus region subheaders.
#[derive(Debug, Clone)]
pub struct MergedImage {
    /// Container header.
    pub header: ImageHeader,
    /// Region subheaders, in bitmask bit order.
    pub regions: Vec<RegionHeader>,
}

impl MergedImage {
    /// Parse the container header and subheaders from the start of `reader`.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let header = ImageHeader::read_from(reader).map_err(|e| match e {
            Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                Error::InvalidImage("truncated container header".into())
            },
            other => other,
        })?;

        if !header.is_valid() {
            return Err(Error::InvalidImage(format!(
                "bad signature {:#06x}",
                header.sign
            )));
        }

        let count = header.region_count();
        if count == 0 {
            return Err(Error::InvalidImage("region bitmask is empty".into()));
        }

        let mut regions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            regions.push(RegionHeader::read_from(reader).map_err(|e| match e {
                Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                    Error::InvalidImage("truncated region subheader".into())
                },
                other => other,
            })?);
        }

        debug!(
            "merged image: {count} regions, {} bytes, IC type {:#04x}",
            header.merged_size, header.ic_type
        );
        Ok(Self { header, regions })
    }

    /// Number of regions.
    #[must_use]
    pub fn region_count(&self) -> u32 {
        self.header.region_count()
    }

    /// Bytes that will actually be programmed, for progress accounting:
    /// every region minus its record area.
    #[must_use]
    pub fn total_download_size(&self) -> u64 {
        self.regions
            .iter()
            .map(|sub| u64::from(sub.size).saturating_sub(RECORD_AREA_LEN as u64))
            .sum()
    }

    /// File offset of the first region.
    #[must_use]
    pub fn first_region_offset(&self) -> u32 {
        HEADER_LEN + self.region_count() * SUBHEADER_LEN
    }
}

/// Scan a region's record area and resolve its download address and size.
///
/// Defaults come from the subheader; id 19 / 4 / 20 records override them.
pub fn resolve_region<R: Read + Seek>(
    reader: &mut R,
    offset: u32,
    declared: &RegionHeader,
) -> Result<DownloadRegion> {
    reader.seek(SeekFrom::Start(u64::from(offset)))?;
    let mut area = [0u8; RECORD_AREA_LEN];
    reader
        .read_exact(&mut area)
        .map_err(truncated("record area"))?;

    let mut region = DownloadRegion {
        offset,
        addr: declared.download_addr,
        size: declared.size,
    };

    let mut i = 0;
    while i + 3 <= RECORD_AREA_LEN {
        let id = i16::from_le_bytes([area[i], area[i + 1]]);
        let len = usize::from(area[i + 2]);
        if id <= 0 || id >= 255 {
            break;
        }

        if len == 4 && i + 7 <= RECORD_AREA_LEN {
            let value = LittleEndian::read_u32(&area[i + 3..i + 7]);
            match id {
                RECORD_ID_ADDR => {
                    trace!("record {id}: address override {value:#010x}");
                    region.addr = value;
                },
                RECORD_ID_SIZE | RECORD_ID_SIZE_ALT => {
                    trace!("record {id}: size override {value:#x}");
                    region.size = value;
                },
                _ => {},
            }
        }

        // A zero-length record still advances past its header.
        i += 3;
        if i + len > RECORD_AREA_LEN {
            break;
        }
        i += len;
    }

    debug!(
        "region at {offset:#x}: flash {:#010x}, {:#x} bytes",
        region.addr, region.size
    );
    Ok(region)
}


#[cfg(test)]
mod tests {
    use super::testing::{TestRegion, build_image, record, terminator};
    use super::*;
    use std::io::Cursor;

    fn size_record(size: u32) -> Vec<u8> {
        record(RECORD_ID_SIZE, &size.to_le_bytes())
    }

    #[test]
    fn test_parse_counts_regions_from_bitmask() {
        let image = build_image(&[
            TestRegion {
                addr: 0x0080_0000,
                records: terminator(),
                data: vec![0u8; 16],
            },
            TestRegion {
                addr: 0x0081_0000,
                records: terminator(),
                data: vec![0u8; 32],
            },
        ]);

        let parsed = MergedImage::parse(&mut Cursor::new(image)).unwrap();
        assert_eq!(parsed.region_count(), 2);
        assert_eq!(parsed.regions[0].download_addr, 0x0080_0000);
        assert_eq!(parsed.regions[1].size, (RECORD_AREA_LEN + 32) as u32);
        assert_eq!(parsed.first_region_offset(), 43 + 2 * 12);
    }

    #[test]
    fn test_bad_signature_is_rejected() {
        let mut image = build_image(&[TestRegion {
            addr: 0,
            records: terminator(),
            data: vec![],
        }]);
        image[0] = 0x00;
        image[1] = 0x00;

        let result = MergedImage::parse(&mut Cursor::new(image));
        assert!(matches!(result, Err(Error::InvalidImage(_))));
    }

    #[test]
    fn test_truncated_header_is_invalid_image() {
        let result = MergedImage::parse(&mut Cursor::new(vec![0x47, 0x4D, 0x00]));
        assert!(matches!(result, Err(Error::InvalidImage(_))));
    }

    #[test]
    fn test_total_download_size_excludes_record_areas() {
        let image = build_image(&[
            TestRegion {
                addr: 0,
                records: terminator(),
                data: vec![0u8; 1000],
            },
            TestRegion {
                addr: 0,
                records: terminator(),
                data: vec![0u8; 24],
            },
        ]);

        let parsed = MergedImage::parse(&mut Cursor::new(image)).unwrap();
        assert_eq!(parsed.total_download_size(), 1024);
    }

    #[test]
    fn test_records_override_declared_values() {
        let mut records = record(RECORD_ID_ADDR, &0x0800_0000u32.to_le_bytes());
        records.extend(size_record(0x1000));
        records.extend(terminator());

        let image = build_image(&[TestRegion {
            addr: 0xDEAD_0000,
            records,
            data: vec![0u8; 8],
        }]);

        let parsed = MergedImage::parse(&mut Cursor::new(&image)).unwrap();
        let offset = parsed.first_region_offset();
        let region = resolve_region(
            &mut Cursor::new(&image),
            offset,
            &parsed.regions[0],
        )
        .unwrap();

        assert_eq!(region.addr, 0x0800_0000);
        assert_eq!(region.size, 0x1000);
        assert_eq!(region.offset, offset);
    }

    #[test]
    fn test_late_size_record_id_also_overrides() {
        let mut records = record(RECORD_ID_SIZE_ALT, &0x2000u32.to_le_bytes());
        records.extend(terminator());

        let image = build_image(&[TestRegion {
            addr: 0x100,
            records,
            data: vec![],
        }]);

        let parsed = MergedImage::parse(&mut Cursor::new(&image)).unwrap();
        let region = resolve_region(
            &mut Cursor::new(&image),
            parsed.first_region_offset(),
            &parsed.regions[0],
        )
        .unwrap();

        assert_eq!(region.addr, 0x100);
        assert_eq!(region.size, 0x2000);
    }

    #[test]
    fn test_missing_records_fall_back_to_subheader() {
        let image = build_image(&[TestRegion {
            addr: 0x0080_2000,
            records: terminator(),
            data: vec![0u8; 64],
        }]);

        let parsed = MergedImage::parse(&mut Cursor::new(&image)).unwrap();
        let region = resolve_region(
            &mut Cursor::new(&image),
            parsed.first_region_offset(),
            &parsed.regions[0],
        )
        .unwrap();

        assert_eq!(region.addr, 0x0080_2000);
        assert_eq!(region.size, parsed.regions[0].size);
    }

    #[test]
    fn test_zero_length_record_does_not_stall_the_scan() {
        // A zero-length record, then a real address override behind it.
        let mut records = record(7, &[]);
        records.extend(record(RECORD_ID_ADDR, &0x0800_4000u32.to_le_bytes()));
        records.extend(terminator());

        let image = build_image(&[TestRegion {
            addr: 0,
            records,
            data: vec![],
        }]);

        let parsed = MergedImage::parse(&mut Cursor::new(&image)).unwrap();
        let region = resolve_region(
            &mut Cursor::new(&image),
            parsed.first_region_offset(),
            &parsed.regions[0],
        )
        .unwrap();

        assert_eq!(region.addr, 0x0800_4000);
    }

    #[test]
    fn test_scan_survives_a_record_area_full_of_zero_length_records() {
        // No terminator, no payloads: the scan must still finish.
        let records = record(1, &[]).repeat(RECORD_AREA_LEN / 3 + 1);

        let image = build_image(&[TestRegion {
            addr: 0x42,
            records,
            data: vec![],
        }]);

        let parsed = MergedImage::parse(&mut Cursor::new(&image)).unwrap();
        let region = resolve_region(
            &mut Cursor::new(&image),
            parsed.first_region_offset(),
            &parsed.regions[0],
        )
        .unwrap();

        assert_eq!(region.addr, 0x42);
    }

    #[test]
    fn test_override_ignored_when_value_overruns_record_area() {
        // Place an address record so close to the end that its value bytes
        // would run past the 512-byte area.
        let mut records = vec![0xFFu8; RECORD_AREA_LEN - 5];
        // Overwrite the scan front with a terminator-free filler of id 1,
        // length 0 records up to the tail record.
        for chunk in records.chunks_mut(3) {
            if chunk.len() == 3 {
                chunk.copy_from_slice(&[1, 0, 0]);
            } else {
                chunk.fill(0);
            }
        }
        records.extend_from_slice(&RECORD_ID_ADDR.to_le_bytes());
        records.push(4);
        // Only two value bytes fit.
        records.extend_from_slice(&[0x78, 0x56]);

        let image = build_image(&[TestRegion {
            addr: 0x1111,
            records,
            data: vec![],
        }]);

        let parsed = MergedImage::parse(&mut Cursor::new(&image)).unwrap();
        let region = resolve_region(
            &mut Cursor::new(&image),
            parsed.first_region_offset(),
            &parsed.regions[0],
        )
        .unwrap();

        assert_eq!(region.addr, 0x1111);
    }

    #[test]
    fn test_truncated_record_area_is_invalid_image() {
        let mut image = build_image(&[TestRegion {
            addr: 0,
            records: terminator(),
            data: vec![],
        }]);
        image.truncate(image.len() - 100);

        let parsed = MergedImage::parse(&mut Cursor::new(&image)).unwrap();
        let result = resolve_region(
            &mut Cursor::new(&image),
            parsed.first_region_offset(),
            &parsed.regions[0],
        );
        assert!(matches!(result, Err(Error::InvalidImage(_))));
    }
}
