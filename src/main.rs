#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;
#[cfg(not(target_env = "musl"))]
use mimalloc as _;

use std::{io::prelude::*, path::PathBuf};

use anyhow::{bail, Context, Result};
use env_logger::Builder;
use korok_aamp::prelude::*;
use korok_byml::prelude::*;
use korok_core::prelude::*;
use korok_sarc::prelude::*;
use log::{Level, LevelFilter};
use owo_colors::OwoColorize;

mod menu;
use menu::{exactly_one_true, Modules};

fn color_level(level: Level) -> String {
    match level {
        Level::Error => level.red().to_string(),
        Level::Warn => level.yellow().to_string(),
        Level::Info => level.green().to_string(),
        Level::Debug => level.blue().to_string(),
        Level::Trace => level.purple().to_string(),
    }
}

const fn level_filter(verbose: usize) -> LevelFilter {
    match verbose {
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        5 => LevelFilter::Trace,
        //default to off
        _ => LevelFilter::Off,
    }
}

/// Looks through a Yaz0 wrapper so the format tools accept compressed input directly.
fn maybe_decompress(data: Vec<u8>) -> Result<Vec<u8>> {
    if data.starts_with(b"Yaz0") {
        log::info!("Input is Yaz0-compressed, decompressing");
        Ok(korok_yaz0::decompress(&data)?)
    } else {
        Ok(data)
    }
}

fn output_or(output: Option<String>, input: &str, extension: &str) -> String {
    output.unwrap_or_else(|| {
        let mut path = PathBuf::from(input);
        path.set_extension(extension);
        path.to_string_lossy().into_owned()
    })
}

fn main() -> Result<()> {
    //Parse command line input
    let args: menu::Korok = argp::parse_args_or_exit(argp::DEFAULT);

    // Build up a logger with custom formatting and set it to the verbosity from the command
    // line args
    if args.verbose != 0 {
        Builder::new()
            .format(|buf, record| {
                writeln!(buf, "{} {}", color_level(record.level()), record.args())
            })
            .filter(None, level_filter(args.verbose))
            .init();
    }

    match args.nested {
        Modules::Yaz0(params) => match exactly_one_true(&[params.decompress, params.compress]) {
            Some(0) => {
                log::info!("Decompressing file {}", &params.input);
                let data = std::fs::read(&params.input)?;
                let output = output_or(params.output, &params.input, "arc");
                log::info!("Writing file {}", output);
                std::fs::write(output, korok_yaz0::decompress(&data)?)?;
            }
            Some(1) => {
                log::info!("Compressing file {}", &params.input);
                let data = std::fs::read(&params.input)?;
                let output = output_or(params.output, &params.input, "szs");
                log::info!("Writing file {}", output);
                std::fs::write(output, korok_yaz0::compress(&data, params.level)?)?;
            }
            _ => bail!("Please select exactly one operation!"),
        },
        Modules::Sarc(params) => match exactly_one_true(&[params.extract, params.list]) {
            Some(0) => {
                let data = maybe_decompress(std::fs::read(&params.input)?)?;
                let sarc = Sarc::from_binary(data)?;
                let root = PathBuf::from(params.output.unwrap_or_else(|| ".".to_string()));
                for file in sarc.files() {
                    let Some(name) = file.name else {
                        log::warn!("Skipping nameless file {:#010X}", file.hash);
                        continue;
                    };
                    let path = root.join(name);
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    log::info!("Writing file {}", path.display());
                    std::fs::write(path, file.data)?;
                }
            }
            Some(1) => {
                let data = maybe_decompress(std::fs::read(&params.input)?)?;
                let sarc = Sarc::from_binary(data)?;
                for file in sarc.files() {
                    match file.name {
                        Some(name) => println!("{name} ({} bytes)", file.data.len()),
                        None => println!("{:#010X} ({} bytes)", file.hash, file.data.len()),
                    }
                }
            }
            _ => bail!("Please select exactly one operation!"),
        },
        Modules::Byml(params) => match exactly_one_true(&[params.to_yaml, params.to_binary]) {
            Some(0) => {
                let data = maybe_decompress(std::fs::read(&params.input)?)?;
                let doc = Byml::from_binary(&data)?;
                let output = output_or(params.output, &params.input, "yml");
                log::info!("Writing file {}", output);
                std::fs::write(output, doc.to_text())?;
            }
            Some(1) => {
                let text = std::fs::read_to_string(&params.input)?;
                let doc = Byml::from_text(&text)?;
                let endian = if params.big_endian { Endian::Big } else { Endian::Little };
                let output = output_or(params.output, &params.input, "byml");
                log::info!("Writing file {}", output);
                std::fs::write(output, doc.to_binary(endian, params.version)?)?;
            }
            _ => bail!("Please select exactly one operation!"),
        },
        Modules::Aamp(params) => match exactly_one_true(&[params.to_yaml, params.to_binary]) {
            Some(0) => {
                let data = maybe_decompress(std::fs::read(&params.input)?)?;
                let pio = ParameterIO::from_binary(&data)
                    .with_context(|| format!("Unable to parse {}", params.input))?;
                let output = output_or(params.output, &params.input, "yml");
                log::info!("Writing file {}", output);
                std::fs::write(output, pio.to_text())?;
            }
            Some(1) => {
                let text = std::fs::read_to_string(&params.input)?;
                let pio = ParameterIO::from_text(&text)
                    .with_context(|| format!("Unable to parse {}", params.input))?;
                let output = output_or(params.output, &params.input, "aamp");
                log::info!("Writing file {}", output);
                std::fs::write(output, pio.to_binary()?)?;
            }
            _ => bail!("Please select exactly one operation!"),
        },
    }
    Ok(())
}
