//! Download orchestration.
//!
//! A download is a fixed sequence of phases: query the chip type, switch
//! the boot ROM into download mode, stream the boot firmware, hand control
//! to the MP firmware, drain its boot banner, raise the line rate on both
//! ends, program the flash image, and finally reset the chip into it. Any
//! failing phase short-circuits the rest; the error says which phase died.
//!
//! The transport is owned by the [`Downloader`] for the whole sequence and
//! threaded explicitly into every protocol call. Nothing here is global,
//! and no two operations ever overlap on the same handle.

pub(crate) mod firmware;
pub(crate) mod image;

use {
    crate::{
        error::{Error, Result},
        image::merged::MergedImage,
        progress::{ProgressCounter, ProgressTracker},
        protocol::{mp::MpLink, vendor},
        transport::{Transport, read_fully},
    },
    log::{debug, info},
    std::{
        fmt,
        fs::File,
        io::{BufReader, Seek, SeekFrom},
        path::Path,
    },
};

/// Bytes of boot banner the MP firmware emits before accepting commands.
const BOOT_BANNER_LEN: usize = 70;

/// Reset mode that reboots the chip into the written image.
const RESET_MODE_REBOOT: u8 = 0x01;

/// Download phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Chip type register query.
    ChipType,
    /// Vendor handshake switching the boot ROM into download mode.
    EnterDownload,
    /// Boot firmware upload.
    Firmware,
    /// Vendor handshake handing control to the MP firmware.
    EnterMp,
    /// MP firmware boot banner drain.
    BootDrain,
    /// MP change-baudrate command.
    MpBaudrate,
    /// Host-side transport baud switch.
    HostBaudrate,
    /// Flash image download.
    Image,
    /// Final chip reset.
    Reset,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ChipType => "chip type query",
            Self::EnterDownload => "download-mode handshake",
            Self::Firmware => "firmware download",
            Self::EnterMp => "MP handshake",
            Self::BootDrain => "boot banner drain",
            Self::MpBaudrate => "MP baud change",
            Self::HostBaudrate => "host baud switch",
            Self::Image => "image download",
            Self::Reset => "chip reset",
        };
        f.write_str(name)
    }
}

/// Sequences a complete firmware-plus-image download over one transport.
pub struct Downloader<T: Transport> {
    transport: T,
    target_baud: u32,
}

impl<T: Transport> Downloader<T> {
    /// Take ownership of `transport`; `target_baud` is negotiated before
    /// the image phase.
    pub fn new(transport: T, target_baud: u32) -> Self {
        Self {
            transport,
            target_baud,
        }
    }

    /// Give the transport back, e.g. to close it.
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn step<F>(&mut self, phase: Phase, f: F) -> Result<()>
    where
        F: FnOnce(&mut T) -> Result<()>,
    {
        debug!("phase: {phase}");
        f(&mut self.transport).map_err(|e| Error::Phase {
            phase,
            source: Box::new(e),
        })
    }

    /// Run the whole sequence. `progress` is updated after every chunk of
    /// either transfer and reaches 100 only on success.
    pub fn run(&mut self, firmware_path: &Path, image_path: &Path, progress: &ProgressCounter) -> Result<()> {
        let mut fw = BufReader::new(File::open(firmware_path)?);
        let fw_size = fw.seek(SeekFrom::End(0))?;
        fw.seek(SeekFrom::Start(0))?;

        let mut img = BufReader::new(File::open(image_path)?);
        let merged = MergedImage::parse(&mut img)?;
        let img_size = merged.total_download_size();

        let mut tracker = ProgressTracker::new(fw_size + img_size, progress.clone());
        info!(
            "starting download: {fw_size} firmware bytes, {img_size} image bytes, {} regions",
            merged.region_count()
        );

        self.step(Phase::ChipType, |t| vendor::read_chip_type(t).map(|_| ()))?;
        self.step(Phase::EnterDownload, |t| {
            vendor::vendor_cmd62(t, &vendor::CMD62_ENTER_DOWNLOAD)
        })?;
        self.step(Phase::Firmware, |t| {
            firmware::download(t, &mut fw, fw_size, &mut tracker)
        })?;
        self.step(Phase::EnterMp, |t| {
            vendor::vendor_cmd62(t, &vendor::CMD62_ENTER_MP)
        })?;
        self.step(Phase::BootDrain, drain_boot_banner)?;

        let baud = self.target_baud;
        self.step(Phase::MpBaudrate, |t| MpLink::new(t).change_baudrate(baud))?;
        self.step(Phase::HostBaudrate, |t| t.set_baudrate(baud))?;

        self.step(Phase::Image, |t| {
            image::download(t, &mut img, &merged, &mut tracker)
        })?;
        self.step(Phase::Reset, |t| MpLink::new(t).reset(RESET_MODE_REBOOT))?;

        info!("download complete");
        Ok(())
    }
}

/// Consume the fixed-size banner the MP firmware prints on entry; the first
/// MP command would otherwise correlate against banner bytes.
fn drain_boot_banner<T: Transport + ?Sized>(transport: &mut T) -> Result<()> {
    let mut banner = [0u8; BOOT_BANNER_LEN];
    let got = read_fully(transport, &mut banner)?;
    if got != BOOT_BANNER_LEN {
        return Err(Error::Timeout(format!(
            "boot banner: {got} of {BOOT_BANNER_LEN} bytes"
        )));
    }
    debug!("drained {got} banner bytes");
    Ok(())
}

/// Download `firmware` and `image` over `transport`, switching both ends to
/// `target_baud` for the image phase.
///
/// This is the whole external surface a CLI or GUI needs: open a transport,
/// hand it over together with a [`ProgressCounter`] clone to poll, and wait.
pub fn download<T: Transport>(
    transport: T,
    target_baud: u32,
    firmware: &Path,
    image: &Path,
    progress: &ProgressCounter,
) -> Result<()> {
    Downloader::new(transport, target_baud).run(firmware, image, progress)
}
