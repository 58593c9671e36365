use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use kindroid::directive::Directive;
use kindroid::output::{EscPosPrinter, OutputDevice};
use kindroid::supervisor::{
    self, AdapterPlan, HARD_STOP_GRACE, Shutdown, Supervisor, SupervisorOptions,
};
use kindroid::Config;

/// Exit code after the hard stop (128 + SIGINT)
const EXIT_STOPPED: i32 = 130;

/// Kindroid - conversational robot runtime
#[derive(Parser)]
#[command(name = "kindroid", version, about)]
struct Cli {
    /// Config file (default: ~/.config/kindroid/config.toml)
    #[arg(short, long, env = "KINDROID_CONFIG")]
    config: Option<PathBuf>,

    /// Answer with the local stub instead of the dialogue backend
    #[arg(long)]
    test: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run sessions (default)
    Run,
    /// Validate configuration and show which adapters would be used
    Check,
    /// Print a test receipt and code
    TestPrinter {
        /// Text to print
        #[arg(default_value = "Kindroid printer test")]
        text: String,
    },
    /// Speak a line, then transcribe one utterance
    TestSpeech {
        /// Text to speak
        #[arg(default_value = "Hallo! Das ist ein Test der Sprachausgabe.")]
        text: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,kindroid=info",
        1 => "info,kindroid=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            1
        }
    };

    // blocking stdin readers would otherwise hold the runtime open
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = Config::load(cli.config.as_deref(), cli.test)?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_sessions(&config).await,
        Command::Check => {
            println!("mode:     {}", config.mode);
            println!("restart:  {}", config.restart);
            println!("{}", AdapterPlan::intended(&config));
            Ok(0)
        }
        Command::TestPrinter { text } => test_printer(&config, &text).await.map(|()| 0),
        Command::TestSpeech { text } => test_speech(&config, &text).await.map(|()| 0),
    }
}

async fn run_sessions(config: &Config) -> anyhow::Result<i32> {
    tracing::info!(mode = %config.mode, restart = config.restart, "starting kindroid");

    let (adapters, plan) = supervisor::build_adapters(config).await?;
    tracing::info!(
        identity = %plan.identity,
        speech = %plan.speech,
        backend = %plan.backend,
        printer = %plan.printer,
        display = %plan.display,
        "adapters ready"
    );

    let shutdown = Shutdown::new();
    supervisor::listen(shutdown.clone())?;

    let mut supervisor = Supervisor::new(SupervisorOptions::from_config(config), adapters, shutdown);
    match supervisor.run_until_stopped(HARD_STOP_GRACE).await {
        Some(summary) if !summary.hard_stopped() => Ok(0),
        _ => Ok(EXIT_STOPPED),
    }
}

/// Print a line of text and a code on the configured printer
async fn test_printer(config: &Config, text: &str) -> anyhow::Result<()> {
    let path = config
        .output
        .printer
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("output.printer is not set"))?;

    println!("Printing to {}...", path.display());
    let mut printer =
        EscPosPrinter::open(path, config.output.printer_width, config.output.feed_lines).await?;

    printer
        .apply(&Directive::Print {
            text: text.to_string(),
        })
        .await?;
    printer
        .apply(&Directive::PrintCode {
            data: text.to_string(),
        })
        .await?;

    println!("If a receipt with a QR code came out, the printer is working!");
    Ok(())
}

/// Speak `text`, then listen once and show the transcript
async fn test_speech(config: &Config, text: &str) -> anyhow::Result<()> {
    let (mut speech, slot) = supervisor::wiring::build_speech(config)?;
    println!("Speech driver: {slot}");

    let cancel = CancellationToken::new();
    speech.speak(text, &cancel).await?;

    println!("Now say something...");
    match speech.capture_utterance(&cancel).await {
        Ok(transcript) => println!("Heard: {transcript}"),
        Err(e) => println!("Nothing heard: {e}"),
    }
    Ok(())
}
