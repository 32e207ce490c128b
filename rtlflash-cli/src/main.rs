//! rtlflash CLI - download firmware to Realtek Bluetooth chips.
//!
//! Opens one of the three transports (serial by default), runs the full
//! download sequence from the library, and renders progress by polling the
//! shared counter from the main thread while the download runs on a worker.

use anyhow::{Context, Result, bail};
use clap::Parser;
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use rtlflash::{ProgressCounter, TransportParams, open_transport};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// Baud rate the chip boots at; the target rate is negotiated mid-download.
const INITIAL_BAUD: u32 = 115200;

/// How often the progress bar samples the counter.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// rtlflash - download boot firmware and a flash image to a Realtek
/// Bluetooth chip.
///
/// Exactly one transport may be selected; with no selection the serial
/// default is used.
#[derive(Parser)]
#[command(name = "rtlflash")]
#[command(author, version, about)]
struct Cli {
    /// Serial device (default transport).
    #[arg(
        short = 'T',
        long,
        group = "transport",
        default_value = "/dev/ttyS0",
        env = "RTLFLASH_TTY"
    )]
    tty: String,

    /// USB device as vid:pid[,interface], hex vid/pid (e.g. 3285:0609,0).
    #[arg(short = 'U', long, group = "transport", value_name = "VID:PID[,IFACE]")]
    usb: Option<String>,

    /// HID device as vid:pid, hex (e.g. 3285:0609).
    #[arg(short = 'H', long, group = "transport", value_name = "VID:PID")]
    hid: Option<String>,

    /// Detach a bound kernel driver from the USB interface first.
    #[arg(short = 'k', long)]
    auto_detach: bool,

    /// Baud rate for the image download phase.
    #[arg(short, long, default_value_t = 921600, env = "RTLFLASH_BAUD")]
    baud: u32,

    /// Boot firmware file.
    #[arg(short, long, default_value = "firmware0.bin")]
    firmware: PathBuf,

    /// Flash image file.
    #[arg(short = 'm', long, default_value = "app.bin")]
    image: PathBuf,

    /// Suppress the progress bar and status lines.
    #[arg(short, long)]
    quiet: bool,
}

/// Parse a `vid:pid` pair of hex fields.
fn parse_vid_pid(spec: &str) -> Result<(u16, u16)> {
    let (vid, pid) = spec
        .split_once(':')
        .with_context(|| format!("expected vid:pid, got '{spec}'"))?;
    Ok((
        u16::from_str_radix(vid, 16).with_context(|| format!("bad vendor id '{vid}'"))?,
        u16::from_str_radix(pid, 16).with_context(|| format!("bad product id '{pid}'"))?,
    ))
}

/// Parse a `vid:pid[,iface]` USB spec.
fn parse_usb_spec(spec: &str) -> Result<(u16, u16, u8)> {
    let (ids, iface) = match spec.split_once(',') {
        Some((ids, iface)) => (
            ids,
            iface
                .parse::<u8>()
                .with_context(|| format!("bad interface number '{iface}'"))?,
        ),
        None => (spec, 0),
    };
    let (vid, pid) = parse_vid_pid(ids)?;
    Ok((vid, pid, iface))
}

fn transport_params(cli: &Cli) -> Result<TransportParams> {
    if let Some(spec) = &cli.usb {
        let (vid, pid, iface) = parse_usb_spec(spec)?;
        return Ok(TransportParams::UsbBulk {
            vid,
            pid,
            iface,
            auto_detach: cli.auto_detach,
        });
    }
    if let Some(spec) = &cli.hid {
        let (vid, pid) = parse_vid_pid(spec)?;
        return Ok(TransportParams::Hid { vid, pid });
    }
    Ok(TransportParams::Serial {
        tty: cli.tty.clone(),
        baud: INITIAL_BAUD,
    })
}

fn describe(params: &TransportParams) -> String {
    match params {
        TransportParams::Serial { tty, .. } => format!("serial port {tty}"),
        TransportParams::UsbBulk {
            vid, pid, iface, ..
        } => format!("USB device {vid:04x}:{pid:04x} interface {iface}"),
        TransportParams::Hid { vid, pid } => format!("HID device {vid:04x}:{pid:04x}"),
    }
}

fn run(cli: &Cli) -> Result<()> {
    let params = transport_params(cli)?;
    if !cli.quiet {
        eprintln!(
            "{} opening {}",
            style("-").cyan(),
            describe(&params)
        );
    }

    let transport =
        open_transport(&params).with_context(|| format!("failed to open {}", describe(&params)))?;
    debug!("transport open, target baud {}", cli.baud);

    let progress = ProgressCounter::new();
    let bar = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}%")
                .unwrap()
                .progress_chars("#>-"),
        );
        bar
    };

    let worker = {
        let progress = progress.clone();
        let baud = cli.baud;
        let firmware = cli.firmware.clone();
        let image = cli.image.clone();
        thread::spawn(move || rtlflash::download(transport, baud, &firmware, &image, &progress))
    };

    loop {
        bar.set_position(u64::from(progress.percent()));
        if worker.is_finished() {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let result = match worker.join() {
        Ok(result) => result,
        Err(_) => bail!("download thread panicked"),
    };

    match result {
        Ok(()) => {
            bar.finish();
            if !cli.quiet {
                eprintln!("{} download complete", style("ok").green());
            }
            Ok(())
        },
        Err(e) => {
            bar.abandon();
            Err(e).context("download failed")
        },
    }
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!("{} {e:#}", style("error:").red().bold());
        std::process::exit(1);
    }
}
