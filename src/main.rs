use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use murmur_gateway::api::{ApiServer, ApiState};
use murmur_gateway::config::SAMPLE_RATE;
use murmur_gateway::pipeline::{EmotionTable, SegmenterState, SentenceSegmenter};
use murmur_gateway::voice::{
    AudioFrame, EnergyClassifier, ListenSession, SpeechToText, SynthesisRequest, Synthesizer,
    TextToSpeech, UtteranceAssembler, wav_to_pcm16,
};
use murmur_gateway::Config;

/// Samples per frame when replaying a file (20 ms)
const FILE_FRAME_SAMPLES: usize = 320;

/// Murmur - real-time spoken conversation gateway
#[derive(Parser)]
#[command(name = "murmur", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/murmur/config.toml)
    #[arg(short, long, env = "MURMUR_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP/WebSocket server (default)
    Serve,
    /// Run a 16 kHz mono WAV file through detection and transcription
    Transcribe {
        /// WAV file to transcribe
        file: PathBuf,
    },
    /// Show how a reply would be split into sentence chunks
    Segment {
        /// Reply text
        text: String,
    },
    /// Synthesize one sentence to a file
    Speak {
        /// Text to speak
        text: String,
        /// Output file
        #[arg(short, long, default_value = "speech.wav")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,murmur_gateway=info",
        1 => "info,murmur_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
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
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config).await,
        Command::Transcribe { file } => transcribe(&config, &file).await,
        Command::Segment { text } => {
            segment(&config, &text);
            Ok(())
        }
        Command::Speak { text, out } => speak(&config, &text, &out).await,
    }
}

/// Serve until interrupted
async fn serve(config: &Config) -> anyhow::Result<()> {
    let state = ApiState::from_config(config)?;
    let server = ApiServer::new(state, &config.server);

    tracing::info!(
        port = config.server.port,
        llm = %config.llm.model,
        tts = %config.tts.api,
        "murmur gateway ready"
    );

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }

    Ok(())
}

/// Replay a WAV file in 20 ms frames and print each transcript
async fn transcribe(config: &Config, file: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(file)?;
    let (samples, rate) = wav_to_pcm16(&bytes)?;
    if rate != SAMPLE_RATE {
        anyhow::bail!("expected {SAMPLE_RATE} Hz audio, got {rate} Hz");
    }

    let mut session = ListenSession::new(
        Box::new(EnergyClassifier::new(&config.vad)),
        &config.vad,
        UtteranceAssembler::new(Arc::new(SpeechToText::new(&config.asr))),
    );

    // trailing silence closes an utterance still open at end of file
    let tail = vec![0_i16; config.vad.min_silence_samples() + config.vad.speech_pad_samples()];

    let mut heard = 0;
    for chunk in samples.chunks(FILE_FRAME_SAMPLES).chain(tail.chunks(FILE_FRAME_SAMPLES)) {
        if let Some(text) = session.push_frame(&AudioFrame::new(chunk.to_vec())).await? {
            heard += 1;
            println!("{text}");
        }
    }

    if heard == 0 {
        println!("(no speech detected)");
    }
    Ok(())
}

/// Print the chunks the segmenter would emit for `text`
fn segment(config: &Config, text: &str) {
    let segmenter = SentenceSegmenter::new(
        config.segmenter,
        Arc::new(EmotionTable::new(config.extra_ref_audio.clone())),
    );
    let mut state = SegmenterState::new();

    let chunks = segmenter
        .drain(text, &mut state)
        .into_iter()
        .chain(segmenter.flush(&mut state));

    for chunk in chunks {
        match &chunk.reference {
            Some(reference) => println!("[{}] {} ({})", chunk.seq, chunk.text, reference.audio_path),
            None => println!("[{}] {}", chunk.seq, chunk.text),
        }
    }
}

/// Synthesize `text` and write the audio to `out`
async fn speak(config: &Config, text: &str, out: &Path) -> anyhow::Result<()> {
    let emotions = EmotionTable::new(config.extra_ref_audio.clone());
    let request = SynthesisRequest::new(text, emotions.lookup(text).cloned());

    println!("Synthesizing speech...");
    let tts = TextToSpeech::new(config.tts.clone())?;
    let Some(audio) = tts.synthesize(&request).await else {
        anyhow::bail!("synthesis failed (see log for details)");
    };

    std::fs::write(out, &audio)?;
    println!("Wrote {} bytes to {}", audio.len(), out.display());
    Ok(())
}
