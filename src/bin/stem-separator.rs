use clap::{Parser, Subcommand};
use std::{
    path::{Path, PathBuf},
    process,
};
use stem_separator_core::{
    available_models, ensure_model, model::registry::DEFAULT_MODEL, split_file, EngineConfig,
    ProgressPhase, SeparationEngine, SeparationOptions, SplitOptions, StemError, StemKind,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stem-separator")]
#[command(about = "Split a mixed recording into instrument stems", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Split {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        #[arg(short, long, default_value = DEFAULT_MODEL)]
        model: String,

        #[arg(long)]
        manifest_url: Option<String>,

        /// Hop length in seconds [default: 10, or less to fit the model]
        #[arg(long)]
        chunk_seconds: Option<f32>,

        /// Fraction of each hop shared with the next, in [0, 1)
        #[arg(long, default_value_t = 0.25)]
        overlap: f32,

        /// Peak-normalise the input before separating
        #[arg(long)]
        normalize: bool,

        /// Resample the input to this rate first
        #[arg(long)]
        sample_rate: Option<u32>,

        /// Keep one stem and write the rest as `no_<stem>`
        #[arg(long, value_name = "STEM", value_parser = parse_stem)]
        two_stems: Option<StemKind>,

        #[arg(short, long)]
        quiet: bool,
    },

    /// Download and verify a model without separating anything
    Prepare {
        #[arg(short, long, default_value = DEFAULT_MODEL)]
        model: String,

        #[arg(long)]
        manifest_url: Option<String>,

        #[arg(short, long)]
        quiet: bool,
    },

    /// List available models
    List,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Split {
            input,
            output,
            model,
            manifest_url,
            chunk_seconds,
            overlap,
            normalize,
            sample_rate,
            two_stems,
            quiet,
        } => {
            let opts = SplitArgs {
                model,
                manifest_url,
                chunk_seconds,
                overlap,
                normalize,
                sample_rate,
                two_stems,
            };
            handle_split(&input, output, opts, quiet).await
        }
        Commands::Prepare {
            model,
            manifest_url,
            quiet,
        } => handle_prepare(model, manifest_url, quiet).await,
        Commands::List => {
            handle_list();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

struct SplitArgs {
    model: String,
    manifest_url: Option<String>,
    chunk_seconds: Option<f32>,
    overlap: f32,
    normalize: bool,
    sample_rate: Option<u32>,
    two_stems: Option<StemKind>,
}

fn parse_stem(s: &str) -> Result<StemKind, String> {
    s.parse().map_err(|e: StemError| e.to_string())
}

async fn handle_split(
    input: &Path,
    output: PathBuf,
    args: SplitArgs,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !input.exists() {
        return Err(format!("Input file not found: {}", input.display()).into());
    }
    if let Some(secs) = args.chunk_seconds {
        if !secs.is_finite() || secs <= 0.0 {
            return Err("--chunk-seconds must be positive".into());
        }
    }

    let engine = SeparationEngine::new(EngineConfig::from_env());
    if !quiet {
        engine.on_progress(|p| match p.phase {
            ProgressPhase::Processing => {
                let eta = p
                    .eta
                    .map(|d| format!(" (eta {}s)", d.as_secs()))
                    .unwrap_or_default();
                eprint!("\r{:>5.1}% {}{}", p.percent, p.label, eta);
            }
            ProgressPhase::Complete => eprintln!("\r{:>5.1}% {}", p.percent, p.label),
            _ => eprintln!("{:>5.1}% {}", p.percent, p.label),
        });

        eprintln!("Input:  {}", input.display());
        eprintln!("Output: {}", output.display());
        eprintln!("Model:  {}", args.model);
        eprintln!();
    }

    // Hop length follows the rate the engine will actually see.
    let chunk_length = match args.chunk_seconds {
        Some(secs) => {
            let rate = match args.sample_rate {
                Some(rate) => rate,
                None => detect_rate(input)?,
            };
            Some((secs * rate as f32).round().max(1.0) as usize)
        }
        None => None,
    };

    let opts = SplitOptions {
        output_dir: output,
        separation: SeparationOptions {
            model_name: args.model,
            normalize: args.normalize,
            chunk_length,
            overlap: args.overlap,
            manifest_url_override: args.manifest_url,
            two_stems: args.two_stems,
        },
        sample_rate: args.sample_rate,
    };

    let result = split_file(&engine, input, opts).await?;

    for (kind, path) in &result.stems {
        if quiet {
            println!("{}", path.display());
        } else {
            eprintln!("  {:<7} {}", kind.name(), path.display());
        }
    }
    if !quiet {
        eprintln!(
            "Done in {:.1}s ({} hops)",
            result.metadata.elapsed.as_secs_f32(),
            result.metadata.hop_count
        );
    }

    Ok(())
}

fn detect_rate(input: &Path) -> Result<u32, Box<dyn std::error::Error>> {
    let reader = hound::WavReader::open(input);
    match reader {
        Ok(r) => Ok(r.spec().sample_rate),
        // Non-WAV containers: decode once to learn the rate.
        Err(_) => Ok(stem_separator_core::read_audio(input)?.sample_rate),
    }
}

async fn handle_prepare(
    model: String,
    manifest_url: Option<String>,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !quiet {
        eprintln!("Preparing model: {}", model);
    }

    let config = EngineConfig::from_env();
    let handle = tokio::task::spawn_blocking(move || {
        let on_progress = |downloaded: u64, total: u64| {
            if quiet {
                return;
            }
            if total > 0 {
                let percent = (downloaded as f64 / total as f64 * 100.0).round() as u64;
                eprint!(
                    "\rDownloading model: {:>3}% ({:.2} MB / {:.2} MB)",
                    percent,
                    downloaded as f64 / 1_000_000.0,
                    total as f64 / 1_000_000.0
                );
                if downloaded >= total {
                    eprintln!();
                }
            } else {
                eprint!("\rDownloading model: {:.2} MB", downloaded as f64 / 1_000_000.0);
            }
        };
        ensure_model(&model, manifest_url.as_deref(), &config, &on_progress)
    })
    .await??;

    if quiet {
        println!("{}", handle.local_path.display());
    } else {
        eprintln!("Model ready: {}", handle.local_path.display());
    }
    Ok(())
}

fn handle_list() {
    println!("Available models:");
    for m in available_models() {
        let marker = if m.name == DEFAULT_MODEL { " (default)" } else { "" };
        println!(
            "  {:<12} {:<22} {} stems, quality {:?}, speed {:?}{}",
            m.name,
            m.display_name,
            m.stem_count(),
            m.quality,
            m.speed,
            marker
        );
    }
    println!();
    println!("Use --model <name> to pick one");
}
