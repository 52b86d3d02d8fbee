mod config;

use crate::config::CliConfig;
use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use disc_image::cdtext::PackType;
use disc_image::reader::{self, ImageFormat};
use disc_image::{Disc, SectorFields, SubchannelSelection};
use env_logger::Env;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
struct Args {
    /// TOML file with default read/verify options
    #[arg(short = 'c', long = "config", global = true)]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the session/track layout of a disc image
    Info {
        /// Image file path (.cue, .iso, .bin, .img)
        file_path: PathBuf,

        /// Image format, will default based on file extension if not set
        #[arg(long)]
        format: Option<ImageFormat>,
    },
    /// Dump sectors in the style of an MMC READ CD command
    Read {
        file_path: PathBuf,

        #[arg(long)]
        format: Option<ImageFormat>,

        /// First LBA to read; the first pregap starts at -150
        #[arg(short = 'a', long, allow_hyphen_values = true)]
        address: i32,

        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,

        /// READ CD main channel selection byte, e.g. 0xF8 for the full sector or 0x10 for user
        /// data only
        #[arg(long, value_parser = parse_byte)]
        main_channel: Option<u8>,

        #[arg(long)]
        subchannel: Option<SubchannelSelection>,

        /// Write raw bytes to this file instead of printing a hex dump
        #[arg(short = 'o', long)]
        output_path: Option<PathBuf>,
    },
    /// Check every sector's stored EDC and subchannel Q CRC
    Verify {
        file_path: PathBuf,

        #[arg(long)]
        format: Option<ImageFormat>,
    },
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let result = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    result.map_err(|err| format!("Invalid byte value '{s}': {err}"))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.config_path.as_ref().map(CliConfig::from_file).unwrap_or_default();
    log::debug!("Loaded config: {config:?}");

    match args.command {
        Command::Info { file_path, format } => {
            let disc = open(&file_path, format)?;
            print_info(&disc);
        }
        Command::Read {
            file_path,
            format,
            address,
            count,
            main_channel,
            subchannel,
            output_path,
        } => {
            let mut disc = open(&file_path, format)?;
            let main = SectorFields::from_read_cd_byte(
                main_channel.unwrap_or(config.read.main_channel),
            );
            let sub = subchannel.unwrap_or(config.read.subchannel);
            read(&mut disc, address, count, main, sub, output_path.as_deref(), &config)?;
        }
        Command::Verify { file_path, format } => {
            let mut disc = open(&file_path, format)?;
            verify(&mut disc, &config)?;
        }
    }

    Ok(())
}

fn open(path: &Path, format: Option<ImageFormat>) -> anyhow::Result<Disc> {
    let disc = match format {
        Some(format) => reader::open_as(path, format),
        None => reader::open(path),
    };
    disc.with_context(|| format!("Error loading disc image '{}'", path.display()))
}

fn print_info(disc: &Disc) {
    println!("Medium: {}", disc.medium_type());
    println!("Start: {}, length: {} sectors", disc.start_sector(), disc.length());
    match disc.mcn() {
        Ok(mcn) => println!("MCN: {mcn}{}", if disc.mcn_locked() { " (subchannel)" } else { "" }),
        Err(_) => println!("MCN: none"),
    }
    for path in disc.filenames() {
        println!("File: {}", path.display());
    }

    for session in disc.sessions() {
        println!();
        println!(
            "Session {} ({}): start {}, length {}, lead-out {} sectors at {}",
            session.number(),
            session.session_type(),
            session.start_sector(),
            session.length(),
            session.leadout_length(),
            session.leadout_start()
        );
        for language in session.languages() {
            if let Some(title) = language.text(PackType::Title) {
                println!("  Title [language {:02X}]: {title}", language.code());
            }
        }

        for track in session.tracks() {
            println!(
                "  Track {:02} {:<14} start {:>7} index 1 {:>7} length {:>7} CTL {:X}",
                track.number(),
                track.sector_type().to_string(),
                track.start_sector(),
                track.start_sector() + track.track_start(),
                track.length(),
                track.ctl()
            );
            if !track.indices().is_empty() {
                println!("    Extra indices (from index 1): {:?}", track.indices());
            }
            if let Some(isrc) = track.isrc() {
                println!("    ISRC: {isrc}");
            }
            for language in track.languages() {
                for pack_type in language.pack_types().filter(|pack_type| pack_type.is_text()) {
                    if let Some(text) = language.text(pack_type) {
                        println!("    {pack_type:?}: {text}");
                    }
                }
            }
        }
    }
}

fn read(
    disc: &mut Disc,
    address: i32,
    count: u32,
    main: SectorFields,
    sub: SubchannelSelection,
    output_path: Option<&Path>,
    config: &CliConfig,
) -> anyhow::Result<()> {
    let mut output: Option<BufWriter<File>> = output_path
        .map(|path| {
            File::create(path)
                .map(BufWriter::new)
                .with_context(|| format!("Unable to create output file '{}'", path.display()))
        })
        .transpose()?;

    let end = sector_range_end(address, count)?;
    for address in address..end {
        let bytes = disc.read_sector(address, main, sub)?;
        match &mut output {
            Some(output) => output.write_all(&bytes)?,
            None => {
                println!("LBA {address}:");
                print_hex(&bytes, config.read.bytes_per_line.max(1));
            }
        }
    }

    if let Some(mut output) = output {
        output.flush()?;
    }

    Ok(())
}

fn sector_range_end(address: i32, count: u32) -> anyhow::Result<i32> {
    i32::try_from(count)
        .ok()
        .and_then(|count| address.checked_add(count))
        .ok_or_else(|| anyhow!("Sector range starting at {address} with count {count} overflows"))
}

fn print_hex(bytes: &[u8], bytes_per_line: usize) {
    for (i, line) in bytes.chunks(bytes_per_line).enumerate() {
        let hex: Vec<_> = line.iter().map(|byte| format!("{byte:02X}")).collect();
        println!("  {:04X}  {}", i * bytes_per_line, hex.join(" "));
    }
}

fn verify(disc: &mut Disc, config: &CliConfig) -> anyhow::Result<()> {
    let ranges: Vec<_> =
        disc.tracks().map(|track| (track.number(), track.start_sector(), track.length())).collect();

    let mut lec_errors = 0_usize;
    let mut crc_errors = 0_usize;
    for (track_number, start, length) in ranges {
        log::info!("Verifying track {track_number} ({length} sectors)");

        for address in start..start + length {
            let mut sector = disc.get_sector(address)?;

            if !sector.verify_lec() {
                lec_errors += 1;
                if lec_errors <= config.verify.max_reported {
                    log::warn!("EDC mismatch at LBA {address}");
                }
            }

            if config.verify.check_subchannel && !sector.verify_subchannel_crc() {
                crc_errors += 1;
                if crc_errors <= config.verify.max_reported {
                    log::warn!("Subchannel Q CRC mismatch at LBA {address}");
                }
            }
        }
    }

    println!("EDC mismatches: {lec_errors}");
    println!("Subchannel Q CRC mismatches: {crc_errors}");

    if lec_errors + crc_errors != 0 {
        return Err(anyhow!("Image failed verification"));
    }

    Ok(())
}
