use std::io::Write as _;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;

use sanctum::config::Config;
use sanctum::history::HistoryStore;
use sanctum::playback::{PlaybackController, PlaybackHandle, RodioBackend};
use sanctum::services::GeminiClient;
use sanctum::session::{format_time, Language, SessionRequest, SessionRunner, Stage};

const SURPRISE_PROMPT: &str =
    "A surprising and unique guided meditation on a random, uplifting topic suitable for anyone.";

enum Command {
    Generate(SessionRequest),
    List,
    Replay(u64),
    Delete(u64),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let command = match parse_args(std::env::args().skip(1).collect())? {
        Some(command) => command,
        None => {
            print_usage();
            return Ok(());
        }
    };

    let config = Config::from_env()?;
    let store = HistoryStore::open(&config.data_dir);

    match command {
        Command::List => {
            let items = store.list_all();
            if items.is_empty() {
                println!("No saved sessions.");
            }
            for item in items {
                println!(
                    "{:>15}  {}  ({} segments)",
                    item.id,
                    item.script.title,
                    item.script.segments.len()
                );
            }
        }
        Command::Delete(id) => {
            store.delete(id).context("could not delete history item")?;
            println!("Deleted session {id} (if it existed).");
        }
        Command::Replay(id) => {
            let runner = build_runner(&config, store)?;
            let (item, handle) = runner.replay(id).await?;
            println!("Replaying: {}", item.script.title);
            countdown(handle).await;
        }
        Command::Generate(request) => {
            let runner = build_runner(&config, store)?;

            let (progress_tx, mut progress_rx) = mpsc::channel::<Stage>(16);
            let run = runner.run(&request, &progress_tx);
            tokio::pin!(run);

            let session = loop {
                tokio::select! {
                    Some(stage) = progress_rx.recv() => println!("{stage}"),
                    result = &mut run => break result?,
                }
            };
            // Flush any labels that raced the final await.
            while let Ok(stage) = progress_rx.try_recv() {
                println!("{stage}");
            }

            println!("\n{}\n", session.script.title);
            if let Some(notice) = &session.storage_notice {
                println!("note: {notice}");
            }
            export_artifacts(&session.script.title, &session.wav, &session.image_url);

            countdown(session.playback).await;
        }
    }

    Ok(())
}

fn build_runner(
    config: &Config,
    store: HistoryStore,
) -> Result<SessionRunner<GeminiClient, RodioBackend>> {
    let generator = GeminiClient::new(config)?;
    let playback = PlaybackController::new(RodioBackend::new());
    Ok(SessionRunner::new(
        generator,
        playback,
        store,
        config.history_limit,
    ))
}

/// Prints a live MM:SS countdown until playback finishes.
async fn countdown(mut handle: PlaybackHandle) {
    let total = handle.total_duration();
    let mut remaining = handle.remaining_watch();
    let mut last_printed = u64::MAX;

    print!("  {} / {}", format_time(total), format_time(total));
    let _ = std::io::stdout().flush();

    loop {
        tokio::select! {
            state = handle.finished() => {
                println!("\r  {} / {}  [{state:?}]", format_time(0.0), format_time(total));
                return;
            }
            changed = remaining.changed() => {
                if changed.is_err() {
                    continue;
                }
                let secs = *remaining.borrow();
                let whole = secs.floor() as u64;
                if whole != last_printed {
                    last_printed = whole;
                    print!("\r  {} / {}", format_time(secs), format_time(total));
                    let _ = std::io::stdout().flush();
                }
            }
        }
    }
}

/// Writes the session's WAV and JPEG next to the working directory so
/// they can be kept outside the bounded history.
fn export_artifacts(title: &str, wav: &[u8], image_url: &str) {
    let stem: String = title
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    let stem = if stem.is_empty() { "meditation".to_string() } else { stem };

    let wav_path = format!("{stem}.wav");
    match std::fs::write(&wav_path, wav) {
        Ok(()) => println!("Saved audio to {wav_path}"),
        Err(e) => eprintln!("Could not write {wav_path}: {e}"),
    }

    if let Some(b64) = image_url.strip_prefix("data:image/jpeg;base64,") {
        match sanctum::audio::codec::decode_base64(b64) {
            Ok(bytes) => {
                let jpg_path = format!("{stem}.jpg");
                match std::fs::write(&jpg_path, bytes) {
                    Ok(()) => println!("Saved image to {jpg_path}"),
                    Err(e) => eprintln!("Could not write {jpg_path}: {e}"),
                }
            }
            Err(e) => eprintln!("Could not decode session image: {e}"),
        }
    }
}

fn parse_args(args: Vec<String>) -> Result<Option<Command>> {
    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        return Ok(None);
    }

    let mut prompt: Option<String> = None;
    let mut language = Language::English;
    let mut duration = 3u32;
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--list" => return Ok(Some(Command::List)),
            "--replay" => {
                let id = parse_id(iter.next(), "--replay")?;
                return Ok(Some(Command::Replay(id)));
            }
            "--delete" => {
                let id = parse_id(iter.next(), "--delete")?;
                return Ok(Some(Command::Delete(id)));
            }
            "--surprise" => prompt = Some(SURPRISE_PROMPT.to_string()),
            "--language" => {
                let value = iter
                    .next()
                    .context("--language needs a value (english|urdu)")?;
                language = Language::parse(&value)
                    .with_context(|| format!("unknown language: {value}"))?;
            }
            "--duration" => {
                let value = iter.next().context("--duration needs minutes (1|3|5)")?;
                duration = value
                    .parse()
                    .with_context(|| format!("invalid duration: {value}"))?;
            }
            other if other.starts_with("--") => bail!("unknown flag: {other}"),
            other => prompt = Some(other.to_string()),
        }
    }

    match prompt {
        Some(prompt) => Ok(Some(Command::Generate(SessionRequest {
            prompt,
            language,
            duration_minutes: duration,
        }))),
        None => Ok(None),
    }
}

fn parse_id(value: Option<String>, flag: &str) -> Result<u64> {
    let value = value.with_context(|| format!("{flag} needs a session id"))?;
    value
        .parse()
        .with_context(|| format!("invalid session id: {value}"))
}

fn print_usage() {
    println!(
        "sanctum - AI guided-meditation sessions\n\n\
         Usage:\n  \
         sanctum \"<prompt>\" [--language english|urdu] [--duration 1|3|5]\n  \
         sanctum --surprise [--language ...] [--duration ...]\n  \
         sanctum --list\n  \
         sanctum --replay <id>\n  \
         sanctum --delete <id>\n\n\
         Requires GEMINI_API_KEY in the environment."
    );
}
