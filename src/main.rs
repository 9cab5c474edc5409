//! Application entry point: headless realtime voice client.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create the [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Start a [`Conversation`] against the first CLI argument, or the
//!    configured endpoints when none is given.
//! 5. Log boundary edges, status changes and inbound messages; forward
//!    stdin lines as text messages (`/mute` and `/unmute` toggle the mic).
//! 6. Stop cleanly on Ctrl-C, EOF on stdin, or when the session ends.

use anyhow::Context as _;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use realtime_voice::boundary::BoundaryEdge;
use realtime_voice::config::AppConfig;
use realtime_voice::inbound::MessageQueue;
use realtime_voice::session::{ConnectionState, Conversation};

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("realtime-voice starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    let target = std::env::args().nth(1);

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(run(config, target))
}

async fn run(config: AppConfig, target: Option<String>) -> anyhow::Result<()> {
    // 4. Connect
    let mut conversation = Conversation::with_system_devices(config);
    let mut edges = conversation.subscribe_edges();
    let mut status = conversation.watch_status();
    let messages = conversation.messages();

    conversation
        .start(target.as_deref())
        .await
        .context("could not start conversation")?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    // 5. Event loop
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted");
                break;
            }
            edge = edges.recv() => match edge {
                Ok(BoundaryEdge::Start { at }) => log::info!("agent started speaking (t={at:.3})"),
                Ok(BoundaryEdge::Stop) => {
                    log::info!("agent stopped speaking");
                    drain_messages(&messages);
                }
                Err(RecvError::Lagged(n)) => log::warn!("missed {n} boundary edges"),
                Err(RecvError::Closed) => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                match (current.state, current.error) {
                    (ConnectionState::Error, Some(error)) => {
                        log::error!("connection error: {error}");
                        break;
                    }
                    (ConnectionState::Idle, _) => {
                        log::info!("connection closed");
                        break;
                    }
                    (state, _) => log::debug!("status: {}", state.label()),
                }
            }
            line = stdin.next_line() => match line {
                Ok(Some(line)) => match line.trim() {
                    "/mute" => conversation.set_mic_active(false),
                    "/unmute" => conversation.set_mic_active(true),
                    text => {
                        conversation.send_text(text);
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    log::warn!("stdin: {e}");
                    break;
                }
            },
        }
    }

    // 6. Shutdown
    conversation.stop().await;
    drain_messages(&messages);
    log::info!("realtime-voice stopped");
    Ok(())
}

/// Consume queued application messages the way an animation driver would:
/// read the head, act on it, then remove it.
fn drain_messages(messages: &MessageQueue) {
    while let Some(message) = messages.front() {
        log::info!("message: {message}");
        messages.remove_first();
    }
}
