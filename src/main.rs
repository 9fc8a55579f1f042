use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use tone_translator::error::PipelineError;
use tone_translator::ir::{BandResult, TonePosition};
use tone_translator::pipeline::{
    init_default_config, LockStore, PipelineConfig, PipelineParts, TonePipeline,
    TranslationSession,
};

#[derive(Parser, Debug)]
#[command(name = "tone-translator")]
#[command(about = "Translate one sentence into casual, base and polite variants with back-translations", long_about = None)]
struct Args {
    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Source sentence
    #[arg(value_name = "TEXT")]
    text: Option<String>,

    /// Source language (e.g. ja, en, 日本語)
    #[arg(long = "from", value_name = "LANG")]
    source_lang: Option<String>,

    /// Target language (e.g. en, ja, 英語)
    #[arg(long = "to", value_name = "LANG")]
    target_lang: Option<String>,

    /// Generate every tone band instead of only the base band
    #[arg(long)]
    all: bool,

    /// Additional free-form style (repeatable)
    #[arg(long = "custom", value_name = "STYLE")]
    custom: Vec<String>,

    /// Ask for wording a native speaker would use
    #[arg(long)]
    native: bool,

    /// Lock the slider at a position (-100..100 or more-casual|casual|base|polite|more-polite)
    #[arg(long, value_name = "POS", allow_hyphen_values = true, conflicts_with = "unlock")]
    lock: Option<String>,

    /// Remove the locked position
    #[arg(long)]
    unlock: bool,

    /// Wait for background verification and print the final bands
    #[arg(long)]
    wait_verify: bool,

    /// Config file path (default: search for tone-translator.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let mut cfg = PipelineConfig::discover(args.config.clone()).context("load config")?;
    if args.native {
        cfg.native_mode = true;
    }

    let lock = LockStore::new(cfg.lock_file.clone());
    if args.unlock {
        lock.clear()?;
        eprintln!("Unlocked");
    }
    if let Some(pos) = args.lock.as_deref() {
        let position = TonePosition::parse(pos)
            .with_context(|| format!("unknown tone position: {pos}"))?;
        lock.save(position.value())?;
        eprintln!("Locked at {}", position.label());
    }

    let Some(text) = args.text.clone() else {
        if args.lock.is_none() && !args.unlock {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  tone-translator \"明日送ってくれる？\" --from ja --to en --all\n\nTIPS:\n  - Default config search: tone-translator.toml (upwards), or set TONE_TRANSLATOR_CONFIG.\n  - RUST_LOG=debug shows cache hits and guard decisions.\n"
            );
        }
        return Ok(());
    };
    let source_lang = args.source_lang.clone().context("missing --from")?;
    let target_lang = args.target_lang.clone().context("missing --to")?;

    let pipeline = TonePipeline::new(PipelineParts::from_config(&cfg)?);
    let mut session = TranslationSession::new(pipeline.clone(), Some(lock));

    let outcome = tokio::select! {
        out = run(&mut session, &args, &text, &source_lang, &target_lang) => out,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted");
            return Ok(());
        }
    };
    let shown = match outcome {
        Ok(shown) => shown,
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            return Err(e.into());
        }
    };

    if args.wait_verify {
        eprintln!("Waiting for verification...");
        pipeline.wait_for_verification().await;
        println!();
        let request = session.current().context("no active request")?;
        for band in &shown {
            let current = pipeline
                .cached(request, &band.band)
                .unwrap_or_else(|| band.clone());
            print_band(&pipeline, &current);
        }
    }
    pipeline.shutdown();
    Ok(())
}

async fn run(
    session: &mut TranslationSession,
    args: &Args,
    text: &str,
    source_lang: &str,
    target_lang: &str,
) -> Result<Vec<BandResult>, PipelineError> {
    let first = session.translate(text, source_lang, target_lang).await?;
    let mut shown = Vec::new();
    if args.all {
        let set = session.all_bands().await?;
        for position in TonePosition::ALL {
            shown.push(set.get(position).clone());
        }
    } else {
        shown.push(first);
    }
    for style in &args.custom {
        shown.push(session.custom(style).await?);
    }
    for band in &shown {
        print_band(session.pipeline(), band);
    }
    Ok(shown)
}

fn print_band(pipeline: &TonePipeline, band: &BandResult) {
    let mut notes = vec![format!("risk={}", band.risk.as_str())];
    if band.no_change {
        notes.push("no change".to_string());
    }
    if band.degraded {
        notes.push("degraded".to_string());
    } else {
        notes.push(format!("status={}", pipeline.status_of(&band.key).as_str()));
    }
    println!("[{}] {}", band.band, band.translation);
    println!("    <- {}", band.reverse_translation);
    println!("    ({})", notes.join(", "));
}
