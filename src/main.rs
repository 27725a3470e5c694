use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use linux_embedded_hal::{Delay, Serial};

use gd32_uart_loader::{ihex, FlashLayout, Options, Programmer};

#[derive(Clone, Debug, StructOpt)]
#[structopt(about = "GD32 factory UART bootloader utility")]
pub struct Args {
    #[structopt(subcommand)]
    operation: Operation,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Operation {
    /// List available serial ports
    List,

    /// Identify the connected chip, and read its flash if an output file is given
    Read {
        /// Serial port to connect to
        port: String,

        /// File to save the flash image to
        #[structopt(parse(from_os_str))]
        output: Option<PathBuf>,
    },

    /// Erase the chip, write a binary or Intel-HEX image and run it
    Write {
        /// Serial port to connect to
        port: String,

        /// Image to write, `.hex` files are converted to a `.bin` alongside first
        #[structopt(parse(from_os_str))]
        file: PathBuf,
    },

    /// Convert an Intel-HEX file to a binary image
    Hex2bin {
        #[structopt(parse(from_os_str))]
        input: PathBuf,
        #[structopt(parse(from_os_str))]
        output: PathBuf,
    },

    /// Convert a binary image to an Intel-HEX file
    Bin2hex {
        #[structopt(parse(from_os_str))]
        input: PathBuf,
        #[structopt(parse(from_os_str))]
        output: PathBuf,
    },
}

fn main() {
    // Parse out arguments
    let mut o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    // Marker files in the working directory enable tracing and slow writes
    if Path::new("debug").exists() {
        info!("debug tag found, frame tracing enabled");
        o.options.trace = true;
    }
    if Path::new("slow").exists() {
        info!("slow tag found, slow write mode enabled");
        o.options.slow = true;
    }

    if let Err(e) = execute(o) {
        println!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn execute(o: Args) -> Result<()> {
    match o.operation {
        Operation::List => list(),
        Operation::Read { port, output } => read(&port, output.as_deref(), o.options),
        Operation::Write { port, file } => write(&port, &file, o.options),
        Operation::Hex2bin { input, output } => hex2bin(&input, &output).map(|_| ()),
        Operation::Bin2hex { input, output } => bin2hex(&input, &output),
    }
}

fn list() -> Result<()> {
    let ports = serialport::available_ports().context("can not enumerate serial ports")?;

    println!("current valid serial port(s):");
    for p in ports {
        println!("{}", p.port_name);
    }

    Ok(())
}

type LinuxProgrammer = Programmer<Serial, Delay, std::io::ErrorKind>;

fn connect(port: &str, options: Options) -> Result<LinuxProgrammer> {
    info!("Connecting to serial port {}", port);

    Programmer::linux(port, options).with_context(|| format!("can not open serial {}", port))
}

fn progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{elapsed_precise} [{bar:40}] {bytes}/{total_bytes}")
            .progress_chars("#>-"),
    );
    pb
}

fn read(port: &str, output: Option<&Path>, options: Options) -> Result<()> {
    let start = Instant::now();
    let mut p = connect(port, options)?;

    let id = p.identify().context("can not connect to chip")?;
    println!("connected to chip, id is {}.", id);

    let path = match output {
        Some(path) => path,
        None => return Ok(()),
    };

    let layout = FlashLayout::default();
    let mut out = create_image(path)?;

    let pb = progress_bar(layout.size);

    let res = p.read_blocks(&layout, &mut out, |done, _| pb.set_position(done as u64));
    match res {
        Ok(n) => {
            pb.finish();
            println!(
                "read {} to {} in {}s",
                bytefmt::format(n as u64),
                path.display(),
                start.elapsed().as_secs()
            );
            Ok(())
        }
        Err(e) => {
            pb.abandon();
            Err(e).context("flash read aborted, partial image kept")
        }
    }
}

/// Open the image file a flash read is saved to, only once the chip answered
fn create_image(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("can not save to file {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn write(port: &str, file: &Path, options: Options) -> Result<()> {
    let start = Instant::now();

    let image = if file.extension().map_or(false, |e| e.eq_ignore_ascii_case("hex")) {
        let bin = file.with_extension("bin");
        info!("Converting {} to {}", file.display(), bin.display());
        hex2bin(file, &bin)?
    } else {
        fs::read(file).with_context(|| format!("can not read file {}", file.display()))?
    };

    let mut p = connect(port, options)?;

    let pb = progress_bar(image.len());

    let res = p.write_flash(&FlashLayout::default(), &image, |done, _| {
        pb.set_position(done as u64)
    });
    match res {
        Ok(()) => {
            pb.finish();
            println!(
                "wrote {} in {}s",
                bytefmt::format(image.len() as u64),
                start.elapsed().as_secs()
            );
            Ok(())
        }
        Err(e) => {
            pb.abandon();
            Err(e).context("flash write failed")
        }
    }
}

/// Convert `input` to a binary image saved at `output`, returning the image
fn hex2bin(input: &Path, output: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(input)
        .with_context(|| format!("can not read file {}", input.display()))?;

    let image = ihex::hex_to_bin(&text).with_context(|| format!("can not convert {}", input.display()))?;

    fs::write(output, &image).with_context(|| format!("can not write file {}", output.display()))?;
    println!("output file size: {}", bytefmt::format(image.len() as u64));

    Ok(image)
}

fn bin2hex(input: &Path, output: &Path) -> Result<()> {
    let image = fs::read(input).with_context(|| format!("can not read file {}", input.display()))?;

    let text = ihex::bin_to_hex(&image).with_context(|| format!("can not convert {}", input.display()))?;

    fs::write(output, &text).with_context(|| format!("can not write file {}", output.display()))?;
    println!("output file size: {}", bytefmt::format(text.len() as u64));

    Ok(())
}
