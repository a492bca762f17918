//! # Conversion Example
//!
//! Converts a local `.ogg` file with the conversion that matches its codec:
//! Opus becomes `.m4a`, Vorbis becomes `.wav`. Output lands in
//! `<tmp>/converted`.
//!
//! Run with: `cargo run --example convert_demo --package core-convert -- path/to/file.ogg`

use core_convert::{ConversionKind, OggConverter, OggDemuxer, OggSource};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use core_runtime::ConverterConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(
        LoggingConfig::default()
            .with_format(LogFormat::Pretty)
            .with_filter("core_convert=debug"),
    )?;

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: convert_demo <file.ogg>");
        std::process::exit(2);
    };

    let bytes = tokio::fs::read(&path).await?;
    let codec = OggDemuxer::from_bytes(&bytes)?.codec();
    let kind = ConversionKind::for_codec(codec);
    println!("{}: {} stream, running {}", path, codec, kind);

    let converter = OggConverter::new(ConverterConfig::in_temp_dir().build()?);
    let output = converter.convert(kind, OggSource::local(&path)).await?;
    println!("wrote {}", output.display());

    let removed = converter.clear_scratch().await?;
    println!("cleared {} scratch file(s)", removed);
    Ok(())
}
