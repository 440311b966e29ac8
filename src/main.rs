// SPDX-License-Identifier: MIT
//! pathpress command line tool

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pathpress::{
    CodecRegistry, CompressionStats, Compressor, Config, Decompressor, LabelTable, PathExpr,
    WhitespaceConfig, WhitespaceMode,
};

#[derive(Parser)]
#[command(name = "pathpress")]
#[command(version, about = "Structure-aware XML compressor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Print statistics and debug logs
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress XML files (stdin to stdout when no file is given)
    Compress(CompressArgs),
    /// Decompress files written by `compress`
    Decompress(OutputArgs),
    /// List the available codecs
    Codecs,
    /// Show the automata compiled from a path expression
    Explain {
        /// Path expression, e.g. "//item/#=>e"
        path: String,
    },
}

#[derive(Args)]
struct OutputArgs {
    /// Input files
    files: Vec<PathBuf>,

    /// Write to standard output
    #[arg(short = 'c', long)]
    stdout: bool,

    /// Overwrite existing output files
    #[arg(short, long)]
    force: bool,

    /// Remove input files after success
    #[arg(short, long)]
    delete: bool,
}

#[derive(Args)]
struct CompressArgs {
    #[command(flatten)]
    output: OutputArgs,

    /// Path expression, may be repeated
    #[arg(short, long = "path", value_name = "EXPR")]
    paths: Vec<String>,

    /// File with one path expression per line
    #[arg(long, value_name = "FILE")]
    paths_file: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Keep all whitespace
    #[arg(short = 'w', long)]
    preserve_whitespace: bool,

    /// Whitespace-only text: ignore, global or text
    #[arg(long, value_parser = parse_mode)]
    full_whitespace: Option<WhitespaceMode>,

    /// Leading whitespace of values: ignore, global or text
    #[arg(long, value_parser = parse_mode)]
    left_whitespace: Option<WhitespaceMode>,

    /// Trailing whitespace of values: ignore, global or text
    #[arg(long, value_parser = parse_mode)]
    right_whitespace: Option<WhitespaceMode>,

    /// Whitespace between attributes: ignore or global
    #[arg(long, value_parser = parse_mode)]
    attribute_whitespace: Option<WhitespaceMode>,

    /// Drop comments
    #[arg(long)]
    ignore_comments: bool,

    /// Drop DOCTYPE sections
    #[arg(long)]
    ignore_doctype: bool,

    /// Drop processing instructions
    #[arg(long)]
    ignore_pi: bool,

    /// Drop CDATA sections
    #[arg(long)]
    ignore_cdata: bool,

    /// Container memory per run block, in MiB
    #[arg(short = 'm', long, value_name = "MIB")]
    memory: Option<usize>,

    /// DEFLATE level, 1 (fast) to 9 (small)
    #[arg(short = 'L', long)]
    level: Option<u32>,

    /// Print statistics as JSON
    #[arg(long)]
    stats_json: bool,
}

fn parse_mode(value: &str) -> Result<WhitespaceMode, String> {
    match value {
        "i" | "ignore" => Ok(WhitespaceMode::Ignore),
        "g" | "global" => Ok(WhitespaceMode::Global),
        "t" | "text" => Ok(WhitespaceMode::Text),
        _ => Err(format!("unknown whitespace mode '{}'", value)),
    }
}

fn init_tracing(json: bool, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "pathpress=debug" } else { "warn" }));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json, cli.verbose);

    let result = match cli.command {
        Commands::Compress(args) => compress_files(&args, cli.verbose),
        Commands::Decompress(args) => decompress_files(&args),
        Commands::Codecs => {
            list_codecs();
            Ok(true)
        }
        Commands::Explain { path } => explain(&path).map(|_| true),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("pathpress: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Configuration file, then environment, then flags
fn load_config(args: &CompressArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read configuration {:?}", path))?;
            Config::from_toml(&text).with_context(|| format!("Invalid configuration {:?}", path))?
        }
        None => Config::default(),
    }
    .with_env();

    if let Some(path) = &args.paths_file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read path file {:?}", path))?;
        config.paths.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    config.paths.extend(args.paths.iter().cloned());

    if args.preserve_whitespace {
        config.whitespace = WhitespaceConfig::preserve();
    }
    let ws = &mut config.whitespace;
    ws.full = args.full_whitespace.unwrap_or(ws.full);
    ws.left = args.left_whitespace.unwrap_or(ws.left);
    ws.right = args.right_whitespace.unwrap_or(ws.right);
    ws.attribute = args.attribute_whitespace.unwrap_or(ws.attribute);

    let ignore = &mut config.ignore;
    ignore.comments |= args.ignore_comments;
    ignore.doctype |= args.ignore_doctype;
    ignore.processing_instructions |= args.ignore_pi;
    ignore.cdata |= args.ignore_cdata;

    if let Some(mib) = args.memory {
        config.memory_cutoff = mib.saturating_mul(1024 * 1024);
    }
    if let Some(level) = args.level {
        config.level = level;
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

fn compressed_name(input: &Path) -> PathBuf {
    match input.extension() {
        Some(ext) if ext == "xml" => input.with_extension("xmi"),
        _ => {
            let mut name = input.as_os_str().to_owned();
            name.push(".xm");
            PathBuf::from(name)
        }
    }
}

fn decompressed_name(input: &Path) -> Result<PathBuf> {
    match input.extension().and_then(|e| e.to_str()) {
        Some("xmi") => Ok(input.with_extension("xml")),
        Some("xm") => Ok(input.with_extension("")),
        _ => bail!("{:?} does not end in .xmi or .xm", input),
    }
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => fs::read(path).with_context(|| format!("Failed to read {:?}", path)),
        None => {
            let mut data = Vec::new();
            io::stdin()
                .read_to_end(&mut data)
                .context("Failed to read standard input")?;
            Ok(data)
        }
    }
}

fn write_output(path: Option<&Path>, data: &[u8], force: bool) -> Result<()> {
    match path {
        Some(path) => {
            if path.exists() && !force {
                bail!("{:?} already exists, use --force to overwrite", path);
            }
            fs::write(path, data).with_context(|| format!("Failed to write {:?}", path))
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(data)?;
            stdout.flush().context("Failed to write standard output")
        }
    }
}

/// Run `job` on every input; returns false if any of them failed
fn for_each_input(args: &OutputArgs, mut job: impl FnMut(Option<&Path>) -> Result<()>) -> bool {
    if args.files.is_empty() {
        return match job(None) {
            Ok(()) => true,
            Err(e) => {
                error!("{:#}", e);
                false
            }
        };
    }
    let mut ok = true;
    for file in &args.files {
        match job(Some(file)) {
            Ok(()) => {
                if args.delete && !args.stdout {
                    if let Err(e) = fs::remove_file(file) {
                        error!(file = ?file, "Failed to delete input: {}", e);
                    }
                }
            }
            Err(e) => {
                error!(file = ?file, "{:#}", e);
                ok = false;
            }
        }
    }
    ok
}

fn compress_files(args: &CompressArgs, verbose: bool) -> Result<bool> {
    let config = load_config(args)?;
    let registry = CodecRegistry::new();
    let mut compressor = Compressor::new(&config, &registry)?;
    let mut total = CompressionStats::default();

    let ok = for_each_input(&args.output, |file| {
        let input = read_input(file)?;
        let packed = compressor
            .compress(&input)
            .with_context(|| format!("Failed to compress {:?}", file.unwrap_or(Path::new("-"))))?;
        let target = match file {
            Some(file) if !args.output.stdout => Some(compressed_name(file)),
            _ => None,
        };
        write_output(target.as_deref(), &packed, args.output.force)?;
        info!(file = ?file, ratio = compressor.stats().ratio(), "compressed");
        total.merge(compressor.stats());
        Ok(())
    });

    if args.stats_json {
        eprintln!("{}", serde_json::to_string_pretty(&total)?);
    } else if verbose {
        eprint!("{}", total);
    }
    Ok(ok)
}

fn decompress_files(args: &OutputArgs) -> Result<bool> {
    let registry = CodecRegistry::new();
    let mut decompressor = Decompressor::new(&registry);

    Ok(for_each_input(args, |file| {
        let target = match file {
            Some(file) if !args.stdout => Some(decompressed_name(file)?),
            _ => None,
        };
        let input = read_input(file)?;
        let xml = decompressor
            .decompress(&input)
            .with_context(|| format!("Failed to decompress {:?}", file.unwrap_or(Path::new("-"))))?;
        write_output(target.as_deref(), &xml, args.force)
    }))
}

fn list_codecs() {
    let registry = CodecRegistry::new();
    for factory in registry.factories() {
        println!("{:<10} {}", factory.name, factory.description);
    }
}

fn explain(source: &str) -> Result<()> {
    let registry = CodecRegistry::new();
    let mut labels = LabelTable::new();
    let expr = PathExpr::compile(1, source, &mut labels, &registry, &WhitespaceConfig::default())?;
    println!("path:    {}", expr.source);
    println!("codec:   {}", expr.options.codec);
    println!(
        "spaces:  left {} / right {}",
        expr.options.left.flag(),
        expr.options.right.flag()
    );
    println!("\nforward automaton:\n{}", expr.forward.display(&labels));
    println!("reverse automaton:\n{}", expr.reverse.display(&labels));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_names() {
        assert_eq!(compressed_name(Path::new("a/doc.xml")), PathBuf::from("a/doc.xmi"));
        assert_eq!(compressed_name(Path::new("feed.rss")), PathBuf::from("feed.rss.xm"));
        assert_eq!(decompressed_name(Path::new("doc.xmi")).unwrap(), PathBuf::from("doc.xml"));
        assert_eq!(decompressed_name(Path::new("feed.rss.xm")).unwrap(), PathBuf::from("feed.rss"));
        assert!(decompressed_name(Path::new("doc.gz")).is_err());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("g"), Ok(WhitespaceMode::Global));
        assert_eq!(parse_mode("text"), Ok(WhitespaceMode::Text));
        assert!(parse_mode("x").is_err());
    }

    #[test]
    fn test_compress_files_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("doc.xml");
        fs::write(&input, "<a><b>1</b></a>").unwrap();
        let cli = Cli::parse_from(["pathpress", "compress", "-w", "-p", "//b=>u", input.to_str().unwrap()]);
        let Commands::Compress(args) = cli.command else {
            panic!("expected compress");
        };
        assert!(compress_files(&args, false).unwrap());
        let packed = dir.path().join("doc.xmi");
        assert!(packed.exists());
        // Second run refuses to overwrite
        assert!(!compress_files(&args, false).unwrap());

        fs::remove_file(&input).unwrap();
        let cli = Cli::parse_from(["pathpress", "decompress", packed.to_str().unwrap()]);
        let Commands::Decompress(args) = cli.command else {
            panic!("expected decompress");
        };
        assert!(decompress_files(&args).unwrap());
        assert_eq!(fs::read_to_string(&input).unwrap(), "<a><b>1</b></a>");
    }
}
