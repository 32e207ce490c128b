//! Chunked flash-image download through the MP protocol.
//!
//! Regions are programmed strictly in order, each in 4096-byte chunks:
//! erase the chunk's range, CRC the chunk, write it in 2048-byte slices,
//! then have the chip verify the range against the CRC. The first failing
//! region aborts the whole download; already-programmed regions are left
//! as they are.

use {
    crate::{
        error::{Error, Result},
        image::merged::{DownloadRegion, MergedImage, RECORD_AREA_LEN, resolve_region},
        progress::ProgressTracker,
        protocol::{crc::crc16_arc, mp::MpLink},
        transport::Transport,
    },
    log::{debug, info},
    std::io::{Read, Seek, SeekFrom},
};

/// Erase and verify granularity.
pub const CHUNK_LEN: usize = 4096;

/// Write slice granularity within a chunk.
pub const SLICE_LEN: usize = 2048;

/// Program one region's data stream.
#[allow(clippy::cast_possible_truncation)] // chunk sizes bounded by CHUNK_LEN
fn download_region<T, R>(
    transport: &mut T,
    reader: &mut R,
    region: &DownloadRegion,
    tracker: &mut ProgressTracker,
) -> Result<()>
where
    T: Transport + ?Sized,
    R: Read + Seek,
{
    // Region data follows the record area.
    reader.seek(SeekFrom::Start(
        u64::from(region.offset) + RECORD_AREA_LEN as u64,
    ))?;

    let mut chunk = vec![0u8; CHUNK_LEN];
    let mut done: u32 = 0;

    while done < region.size {
        let want = CHUNK_LEN.min((region.size - done) as usize);
        reader
            .read_exact(&mut chunk[..want])
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => Error::InvalidImage(format!(
                    "region data ends {} bytes short",
                    region.size - done
                )),
                _ => Error::Io(e),
            })?;

        let addr = region.addr + done;
        let mut mp = MpLink::new(transport);

        mp.erase_flash(addr, CHUNK_LEN as u32)?;

        let crc = crc16_arc(&chunk[..want]);
        for (i, slice) in chunk[..want].chunks(SLICE_LEN).enumerate() {
            mp.write_flash(addr + (i * SLICE_LEN) as u32, slice)?;
        }

        tracker.advance(want as u64);

        mp.verify_flash(addr, want as u32, crc)?;

        done += want as u32;
    }

    debug!("region at {:#010x} programmed ({done} bytes)", region.addr);
    Ok(())
}

/// Program every region of `image`, reading region data from `reader`.
pub(crate) fn download<T, R>(
    transport: &mut T,
    reader: &mut R,
    image: &MergedImage,
    tracker: &mut ProgressTracker,
) -> Result<()>
where
    T: Transport + ?Sized,
    R: Read + Seek,
{
    let mut offset = image.first_region_offset();

    for sub in &image.regions {
        let region = resolve_region(reader, offset, sub)?;
        info!(
            "downloading region at {offset:#x}: flash {:#010x}, {:#x} bytes",
            region.addr, region.size
        );

        download_region(transport, reader, &region, tracker).map_err(|e| Error::Region {
            offset: region.offset,
            addr: region.addr,
            source: Box::new(e),
        })?;

        offset += sub.size;
    }

    Ok(())
}
