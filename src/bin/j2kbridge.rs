//! j2kbridge CLI - inspect JPEG 2000 files the way the bridge sees them.
//!
//! Reads containers and codestream main headers only; no pixels are decoded.

use clap::{Parser, Subcommand};
use j2kbridge_rs::constants::{J2K_SUFFIXES, MAX_LAYERS, MAX_THREADS};
use j2kbridge_rs::decode::header::{channel_mapping, describe};
use j2kbridge_rs::descriptor::{ChannelKey, MetadataValue};
use j2kbridge_rs::jpeg2000::jp2;
use j2kbridge_rs::jpeg2000::params::CodingParams;
use j2kbridge_rs::jpeg2000::parser::parse_main_header;
use j2kbridge_rs::probe::{self, Format};
use j2kbridge_rs::stream::{CodestreamSource, Source, StreamSource};
use j2kbridge_rs::{TileCacheHint, concurrency};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

// Enough of the codestream for any realistic main header.
const MAIN_HEADER_WINDOW: u64 = 1 << 20;

/// JPEG 2000 streaming bridge inspector
#[derive(Parser)]
#[command(name = "j2kbridge")]
#[command(version)]
#[command(about = "Inspect JP2 files as the streaming bridge resolves them", long_about = None)]
#[command(after_help = "EXAMPLES:
    j2kbridge probe -i image.jp2
    j2kbridge info -i image.jp2 --page 2
    j2kbridge check-options \"Clayers=4 Corder=RPCL Cmodes=HT\"
    RUST_LOG=debug j2kbridge info -i image.jph")]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report whether a file would be claimed by the loader
    #[command(visible_alias = "p")]
    Probe {
        #[arg(short, long, help = "Path to the file to sniff")]
        input: PathBuf,
    },

    /// Show the image description for one page
    ///
    /// Parses the JP2 boxes and the codestream main header, then derives
    /// dimensions, pixel format, interpretation, channel mapping and
    /// resolution exactly as a load would.
    #[command(visible_alias = "i")]
    Info {
        #[arg(short, long, help = "Path to the JP2 file to inspect")]
        input: PathBuf,

        /// Pyramid page, 0 for full resolution
        #[arg(short, long, default_value = "0")]
        page: u32,
    },

    /// Validate a codec option string against a test image
    #[command(visible_alias = "c")]
    CheckOptions {
        /// Options such as "Clayers=4; Creversible=yes"
        options: String,

        /// Component count of the test image
        #[arg(short = 'n', long, default_value = "3")]
        components: u16,
    },

    /// List suffixes and limits
    #[command(visible_alias = "l")]
    List,
}

fn main() {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Probe { input } => probe_file(&input),
        Commands::Info { input, page } => show_info(&input, page),
        Commands::CheckOptions {
            options,
            components,
        } => check_options(&options, components),
        Commands::List => {
            list();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn probe_file(input: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let source = Source::new_from_file(input)?;
    let verdict = match probe::probe_source(&source)? {
        Some(Format::Jp2) => "JP2 container",
        Some(Format::Codestream) => "raw codestream (not loadable)",
        None => "not JPEG 2000",
    };
    println!("{:?}: {}", input, verdict);
    Ok(())
}

fn show_info(input: &PathBuf, page: u32) -> Result<(), Box<dyn std::error::Error>> {
    let source = Source::new_from_file(input)?;
    let header = jp2::read_header(StreamSource::new(&source))?;

    let mut window = Vec::new();
    CodestreamSource::new(
        StreamSource::new(&source),
        header.codestream.offset,
        header.codestream.length,
    )
    .take(MAIN_HEADER_WINDOW)
    .read_to_end(&mut window)?;
    let (siz, _) = parse_main_header(&window)?;

    let mapping = channel_mapping(&header)?;
    let desc = describe(&header, &mapping, &siz, page)?;
    let (tile_width, tile_height) = siz.reduced_tile_size(page);
    let hint = TileCacheHint::for_grid(
        tile_width.min(desc.width),
        tile_height.min(desc.height),
        siz.tiles_across(),
    );

    println!("File: {:?}", input);
    println!("Size: {} bytes", source.len().unwrap_or(0));
    println!();
    println!("Container:");
    println!(
        "  Signature:  {}",
        if header.legacy_signature { "legacy" } else { "RFC 3745" }
    );
    if let Some(file_type) = &header.file_type {
        println!("  Brand:      {}", String::from_utf8_lossy(&file_type.brand));
    }
    println!("  Colour:     {:?}", header.colour().map(|c| &c.method));
    println!(
        "  Codestream: offset {}, {}",
        header.codestream.offset,
        header
            .codestream
            .length
            .map_or("to end of file".to_string(), |l| format!("{l} bytes"))
    );
    println!();
    println!("Codestream:");
    println!("  Dimensions: {}x{}", siz.width, siz.height);
    println!("  Tile size:  {}x{}", siz.tile_width, siz.tile_height);
    println!("  Tiles:      {}x{}", siz.tiles_across(), siz.tiles_down());
    println!("  DWT levels: {}", siz.levels);
    println!("  Layers:     {}", siz.layers);
    println!("  Progression: {}", siz.progression.name());
    println!("  Reversible: {}", if siz.reversible { "Yes" } else { "No" });
    println!("  HTJ2K:      {}", if siz.high_throughput { "Yes" } else { "No" });
    println!();
    println!("Page {} of {}:", desc.page, desc.n_pages);
    println!("  Dimensions: {}x{}", desc.width, desc.height);
    println!("  Bands:      {}", desc.bands);
    println!("  Format:     {}", desc.format.name());
    println!("  Interpretation: {:?}", desc.interpretation);
    println!("  Resolution: {:.3}x{:.3} px/mm", desc.xres, desc.yres);
    println!(
        "  Cache:      {}x{} tiles, at most {}",
        hint.tile_width, hint.tile_height, hint.max_tiles
    );
    for (band, channel) in mapping.channels.iter().enumerate() {
        let role = match channel.key {
            ChannelKey::Colour(index) => format!("colour {index}"),
            ChannelKey::NonColour(kind) => format!("{kind:?}"),
        };
        let lut = channel
            .lut
            .map_or(String::new(), |column| format!(", palette column {column}"));
        println!(
            "  Band {band}:     component {}, {role}{lut}",
            channel.component
        );
    }
    for (key, value) in desc.metadata() {
        match value {
            MetadataValue::Int(v) => println!("  {key}: {v}"),
            MetadataValue::Blob(b) => println!("  {key}: {} bytes", b.len()),
        }
    }
    Ok(())
}

fn check_options(options: &str, components: u16) -> Result<(), Box<dyn std::error::Error>> {
    use j2kbridge_rs::jpeg2000::parser::ComponentInfo;

    let mut params = CodingParams::new(
        1024,
        1024,
        vec![ComponentInfo::unsigned(8); usize::from(components)],
    );
    params.parse_options(options)?;
    params.finalize()?;
    let header = params.to_header();
    println!("✓ Options accepted");
    println!("  Layers:     {}", header.layers);
    println!("  Levels:     {}", header.levels);
    println!("  Progression: {}", header.progression.name());
    println!("  Reversible: {}", if header.reversible { "Yes" } else { "No" });
    println!("  Colour transform: {}", if header.multi_component_transform { "Yes" } else { "No" });
    println!("  HTJ2K:      {}", if header.high_throughput { "Yes" } else { "No" });
    println!("  Tile size:  {}x{}", header.tile_width, header.tile_height);
    Ok(())
}

fn list() {
    println!("Suffixes:        {}", J2K_SUFFIXES.join(" "));
    println!("Quality layers:  at most {}", MAX_LAYERS);
    println!("Worker threads:  at most {} per request", MAX_THREADS);
    println!("Concurrency:     {}", concurrency());
}
