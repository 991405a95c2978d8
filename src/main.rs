//! Application entry point: terminal live coaching session.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (writing the defaults on first run) and
//!    validate it.
//! 3. Read the persona (system instruction) from the file given as the
//!    first argument, or use the built-in one.
//! 4. Create the [`tokio`] runtime (multi-thread, 2 workers).
//! 5. Build the session from the cpal devices, the websocket transport and
//!    the API-key provider, then connect.
//! 6. Forward stdin lines as text turns until EOF, Ctrl-C, an error or the
//!    time limit ends the session.
//! 7. Disconnect and print the transcript as JSON on stdout.
//!
//! A session that fails to start has already been reported through
//! `on_error`; the process then exits with a failure code and no further
//! message.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use live_coach::{
    audio::CpalDevices,
    auth::ApiKeyProvider,
    config::AppConfig,
    session::{SessionError, SessionEvents, SessionOrchestrator, TurnRecord},
    transport::{Speaker, WebSocketConnector},
};

const DEFAULT_PERSONA: &str = "You are a busy procurement manager taking a short \
sales call. Be polite but skeptical, ask about pricing and integration effort, \
and keep your answers brief.";

// ---------------------------------------------------------------------------
// ConsoleEvents
// ---------------------------------------------------------------------------

/// Prints finalized turns and errors; signals `ended` when the session
/// stops on its own.
struct ConsoleEvents {
    ended: mpsc::UnboundedSender<()>,
}

fn speaker_label(speaker: Speaker) -> &'static str {
    match speaker {
        Speaker::User => "you",
        Speaker::Model => "coach",
    }
}

impl SessionEvents for ConsoleEvents {
    fn on_open(&self) {
        println!("[connected]");
    }

    fn on_turn_complete(&self, turn: Option<&TurnRecord>) {
        if let Some(turn) = turn {
            println!("{:>5}: {}", speaker_label(turn.speaker), turn.text);
        }
    }

    fn on_error(&self, error: &SessionError) {
        eprintln!("[error] {}", error.user_message());
        let _ = self.ended.send(());
    }

    fn on_reconnecting(&self, attempt: u32) {
        println!("[connection lost, reconnecting (attempt {attempt})]");
    }

    fn on_time_limit(&self) {
        println!("[time is up]");
        let _ = self.ended.send(());
    }
}

// ---------------------------------------------------------------------------
// Session loop
// ---------------------------------------------------------------------------

/// Runs one session.  `None` when it never started.
async fn run(config: AppConfig, persona: String) -> Result<Option<Vec<TurnRecord>>> {
    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();

    let session = SessionOrchestrator::new(
        config.clone(),
        Arc::new(CpalDevices),
        Arc::new(WebSocketConnector::new()),
        Arc::new(ApiKeyProvider::from_config(&config.auth)),
        Arc::new(ConsoleEvents { ended: ended_tx }),
    );

    if let Err(e) = session.connect(&persona).await {
        log::debug!("session: start failed: {e}");
        return Ok(None);
    }
    println!("Speak, or type a message and press Enter. Ctrl-D or Ctrl-C ends the session.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if !line.trim().is_empty() => session.send_text(line.trim()),
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
            _ = ended_rx.recv() => break,
        }
    }

    session.disconnect();
    Ok(Some(session.transcript()))
}

fn transcript_json(turns: &[TurnRecord]) -> Result<String> {
    serde_json::to_string_pretty(turns).context("failed to serialise transcript")
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("live-coach starting up");

    // 2. Configuration
    let config = AppConfig::load_or_create().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    config.validate().context("invalid configuration")?;

    // 3. Persona
    let persona = match std::env::args().nth(1) {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read persona file {path}"))?,
        None => DEFAULT_PERSONA.to_string(),
    };

    // 4. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    // 5-7. Session
    let Some(turns) = rt.block_on(run(config, persona))? else {
        return Ok(ExitCode::FAILURE);
    };
    if turns.is_empty() {
        log::info!("No finalized turns");
    } else {
        println!("{}", transcript_json(&turns)?);
    }
    Ok(ExitCode::SUCCESS)
}
