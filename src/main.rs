//! speechsync CLI
//!
//! Streams text into a synthesis session and prints client events as JSON lines.
//!
//! Usage:
//!   # Stream stdin lines as text increments
//!   speechsync --config speechsync.toml < reply.txt
//!
//!   # Single text, write each sentence's audio to ./out
//!   speechsync --text "你好。今天天气很好。" --out-dir out

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;

use speechsync::{ClientEvent, ServerStreamingAudioTextProcessor, TtsConfig};

#[derive(Parser, Debug)]
#[command(name = "speechsync", author, version, about = "Streaming TTS session client")]
struct Args {
    /// Config file (TOML). Falls back to the platform config file if present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Text to synthesize (if not provided, stdin lines are streamed)
    #[arg(short, long)]
    text: Option<String>,

    /// Directory for per-sentence audio files
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Override the configured speaker
    #[arg(long)]
    speaker: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("speechsync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref(), args.speaker)?;
    let processor = ServerStreamingAudioTextProcessor::new(config);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling session");
            ctrl_c.cancel();
        }
    });

    let (tx, mut rx) = mpsc::channel::<ClientEvent>(256);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
            }
        }
    });

    let result = processor.process(text_stream(args.text), &tx, cancel).await;
    drop(tx);
    printer.await.context("event printer task failed")?;

    let summary = result.context("synthesis session failed")?;
    tracing::info!(
        session_id = %summary.session_id,
        sentences = summary.sentence_count,
        audio_bytes = summary.audio_bytes,
        "Done"
    );

    if let Some(dir) = args.out_dir {
        write_sentences(&processor, &dir).await?;
    }
    Ok(())
}

fn load_config(path: Option<&Path>, speaker: Option<String>) -> Result<TtsConfig> {
    let base = match path {
        Some(path) => TtsConfig::load(path)?,
        None => match TtsConfig::default_path().filter(|p| p.exists()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Using platform config file");
                TtsConfig::load(&path)?
            }
            None => TtsConfig::default(),
        },
    };
    let mut config = base.with_process_env();
    if let Some(speaker) = speaker {
        config.speaker = speaker;
    }
    Ok(config)
}

fn text_stream(text: Option<String>) -> BoxStream<'static, String> {
    match text {
        Some(text) => stream::iter(vec![text]).boxed(),
        None => {
            let lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            LinesStream::new(lines)
                .filter_map(|line| async move {
                    match line {
                        Ok(line) => Some(with_newline(line)),
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to read stdin line");
                            None
                        }
                    }
                })
                .boxed()
        }
    }
}

/// `lines()` strips terminators; keep them so line breaks reach the sentence splitter.
fn with_newline(mut line: String) -> String {
    line.push('\n');
    line
}

async fn write_sentences(processor: &ServerStreamingAudioTextProcessor, dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let format = &processor.config().audio_format;
    for sentence in processor.completed_sentences() {
        let path = dir.join(format!("sentence-{}.{format}", sentence.id()));
        let audio = sentence.audio();
        tokio::fs::write(&path, &audio.bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), bytes = audio.len(), "Wrote sentence audio");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdin_lines_keep_their_breaks() {
        let joined: String = ["第一行", "", "second line"].into_iter().map(|l| with_newline(l.to_string())).collect();
        assert_eq!(joined, "第一行\n\nsecond line\n");
    }

    #[tokio::test]
    async fn text_argument_is_a_single_increment() {
        let chunks: Vec<String> = text_stream(Some("你好。".into())).collect().await;
        assert_eq!(chunks, vec!["你好。".to_string()]);
    }
}
