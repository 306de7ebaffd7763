use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use reva_voice::Config;
use reva_voice::api::ApiServer;
use reva_voice::audio::{pcm16_to_wav, wav_to_pcm16};
use reva_voice::bot::{MCP_AVAILABLE, select_llm_backend};
use reva_voice::prompt::{AGENT_INSTRUCTION, GREETING_MESSAGE, SESSION_INSTRUCTION};
use reva_voice::services::{CartesiaTts, DeepgramStt, Synthesizer, Transcriber};

/// Reva - voice assistant for the Doolally Taproom WhatsApp channel
#[derive(Parser)]
#[command(name = "reva", version, about)]
struct Cli {
    /// Port to listen on (overrides config)
    #[arg(long, env = "REVA_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the persona, session and greeting prompts
    Prompts,
    /// Synthesise text with the configured voice into a WAV file
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hi, this is Reva from Doolally Taproom. How can I help you today?")]
        text: String,
        /// Output WAV path
        #[arg(short, long, default_value = "reva-tts.wav")]
        out: PathBuf,
    },
    /// Transcribe a 16-bit PCM WAV file
    Transcribe {
        /// WAV file to transcribe
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,reva_voice=info",
        1 => "info,reva_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(Command::Prompts) = cli.command {
        print_prompts();
        return Ok(());
    }

    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    match cli.command {
        Some(Command::TestTts { text, out }) => test_tts(&config, &text, &out).await,
        Some(Command::Transcribe { path }) => transcribe(&config, &path).await,
        Some(Command::Prompts) | None => serve(config).await,
    }
}

fn print_prompts() {
    println!("# Agent instruction\n{AGENT_INSTRUCTION}\n");
    println!("# Session instruction\n{SESSION_INSTRUCTION}\n");
    println!("# Greeting\n{GREETING_MESSAGE}");
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let backend = select_llm_backend(config.mcp_url.as_deref(), MCP_AVAILABLE);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = backend.name(),
        model = %config.llm.model,
        voice = %config.tts.voice_id,
        "starting Reva"
    );
    if config.api_keys.deepgram.is_none() || config.api_keys.cartesia.is_none() {
        tracing::warn!(
            "speech keys missing, sessions will fail until DEEPGRAM_API_KEY and CARTESIA_API_KEY are set"
        );
    }

    ApiServer::new(config).run().await?;
    Ok(())
}

async fn test_tts(config: &Config, text: &str, out: &Path) -> anyhow::Result<()> {
    let tts = CartesiaTts::new(
        config.api_keys.cartesia.clone(),
        config.tts.voice_id.clone(),
        config.tts.model.clone(),
        reva_voice::audio::OUTPUT_SAMPLE_RATE,
    )?;

    tracing::info!(chars = text.len(), voice = %tts.voice_id(), "synthesising");
    let pcm = tts.synthesize(text).await?;
    let wav = pcm16_to_wav(&pcm, tts.sample_rate())?;
    tokio::fs::write(out, wav).await?;

    tracing::info!(path = %out.display(), samples = pcm.len(), "wrote audio");
    Ok(())
}

async fn transcribe(config: &Config, path: &Path) -> anyhow::Result<()> {
    let stt = DeepgramStt::new(
        config.api_keys.deepgram.clone(),
        config.stt.model.clone(),
        config.stt.language.clone(),
    )?;

    let wav = tokio::fs::read(path).await?;
    let (samples, sample_rate) = wav_to_pcm16(&wav)?;
    tracing::info!(path = %path.display(), samples = samples.len(), sample_rate, "transcribing");

    let transcript = stt.transcribe(&wav).await?;
    println!("{transcript}");
    Ok(())
}
