//! Create a firmware image file from an application binary.

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use mkimage::{Identity, ImageBuilder, DEFAULT_HEADER_SIZE};

fn parse_u32(input: &str) -> Result<u32, std::num::ParseIntError> {
    parse_int::parse(input)
}

#[derive(Parser, Debug)]
#[clap(name = "mkimage", version, about = "Firmware image creator")]
struct Args {
    /// Output file.
    #[clap(short = 'o', long)]
    output: PathBuf,

    /// Input binary.  In word mode, the low bytes of each word.
    #[clap(short = 'i', long)]
    input: PathBuf,

    /// Second input binary with the high bytes of each word (word mode).
    #[clap(short = 'j', long = "input-msb", required_if_eq("words", "true"))]
    input_msb: Option<PathBuf>,

    /// Header size, decimal or hex.  Bytes, or words in word mode.
    #[clap(short = 'c', long = "header-size", value_parser = parse_u32, default_value_t = DEFAULT_HEADER_SIZE)]
    header_size: u32,

    /// Word mode: sizes are 16-bit words, and the payload is interleaved from
    /// two input files.
    #[clap(short = 'D', long)]
    words: bool,

    /// Fill unused header bytes with random data.
    #[clap(short = 'R', long)]
    random: bool,

    /// Write the header only.
    #[clap(short = 'C', long = "header-only")]
    header_only: bool,

    /// Vendor id (object 0x1018:1).
    #[clap(long, alias = "od1018_1", value_parser = parse_u32)]
    vendor: Option<u32>,

    /// Product code (object 0x1018:2).
    #[clap(long, alias = "od1018_2", value_parser = parse_u32)]
    product: Option<u32>,

    /// Revision (object 0x1018:3).
    #[clap(long, alias = "od1018_3", value_parser = parse_u32)]
    revision: Option<u32>,

    /// Free-form build version.
    #[clap(long = "build-version", alias = "swversion", value_parser = parse_u32)]
    build_version: Option<u32>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let identity = Identity {
        vendor_id: args.vendor,
        product_code: args.product,
        revision: args.revision,
        build_version: args.build_version,
    };

    let mut builder = ImageBuilder::new(args.header_size);
    builder
        .random_fill(args.random)
        .header_only(args.header_only)
        .identity(identity);

    let input = fs::read(&args.input)
        .with_context(|| format!("Unable to read {}", args.input.display()))?;

    let image = if args.words {
        let msb_path = args
            .input_msb
            .as_ref()
            .context("Word mode needs a second input file")?;
        let msb = fs::read(msb_path)
            .with_context(|| format!("Unable to read {}", msb_path.display()))?;
        println!("Header size: {} words", args.header_size);
        println!("Input file (LSB): {}", args.input.display());
        println!("Input file (MSB): {}", msb_path.display());
        builder.build_split(&input, &msb)?
    } else {
        println!("Header size: {} bytes", args.header_size);
        println!("Input file: {}", args.input.display());
        builder.build(&input)?
    };

    if !identity.is_empty() {
        println!("0x1018:1 : 0x{:08x}", image.header.vendor_id);
        println!("0x1018:2 : 0x{:08x}", image.header.product_code);
        println!("0x1018:3 : 0x{:08x}", image.header.revision);
        println!("build    : 0x{:08x}", image.header.build_version);
    }
    println!("Length : 0x{:08x}", image.header.application_size);
    println!("CRC sum: 0x{:04x}", image.header.crc);

    fs::write(&args.output, &image.data)
        .with_context(|| format!("Unable to write {}", args.output.display()))?;
    println!("Output file: {}", args.output.display());

    Ok(())
}
