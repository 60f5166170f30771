//! CLI `session` command: drive a patient feed from stdin.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use echo::config::EchoConfig;
use echo::feed::backend::{FeedStore, SqliteBackend};
use echo::feed::narration::{self, NarrationService};
use echo::feed::recall::RecallResponse;
use echo::feed::{FeedController, FeedEvent, FeedSettings};

const HELP: &str = "commands: next, prev, like, recall, yes, no, hit, miss, \
                    voice <words>, voicemode, dismiss, light <lux>, help, quit";

pub async fn session(config: &EchoConfig) -> Result<()> {
    let conn = echo::db::open_database(config.resolved_db_path())?;
    let store: Arc<dyn FeedStore> = Arc::new(SqliteBackend::new(conn));
    let narrator: Arc<dyn NarrationService> =
        Arc::from(narration::create_service(&config.narration)?);

    let mut feed = FeedController::start(FeedSettings::from_config(config), store, narrator).await;
    println!("{HELP}");
    print_current(&feed);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_command(&mut feed, line.trim()) {
                    break;
                }
            }
            Some(event) = feed.next_event() => print_event(&event),
        }
    }

    feed.close().await;
    Ok(())
}

/// Returns `false` when the session should end.
fn handle_command(feed: &mut FeedController, line: &str) -> bool {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "" => {}
        "next" | "n" => {
            if feed.next() {
                print_current(feed);
            } else {
                println!("(no more memories)");
            }
        }
        "prev" | "p" => {
            if feed.previous() {
                print_current(feed);
            } else {
                println!("(already at the first memory)");
            }
        }
        "like" => match feed.like() {
            Some(liked) => println!("liked: {liked}"),
            None => println!("(nothing to like)"),
        },
        "recall" => match feed.recall() {
            Some(recalled) => println!("recalled: {recalled}"),
            None => println!("(nothing to recall)"),
        },
        "yes" | "no" => {
            let response = if command == "yes" {
                RecallResponse::Remembered
            } else {
                RecallResponse::Forgotten
            };
            if !feed.respond_to_prompt(response) {
                println!("(no prompt is showing)");
            }
        }
        "hit" => {
            feed.register_tap(true);
        }
        "miss" => {
            feed.register_tap(false);
        }
        "voice" => {
            let outcome = feed.voice_command(rest);
            println!("voice: {}", outcome.acknowledgement);
            print_current(feed);
        }
        "voicemode" => {
            feed.activate_voice_mode();
        }
        "dismiss" => {
            feed.reset_voice_mode();
        }
        "light" => match rest.trim().parse::<f64>() {
            Ok(lux) => println!("ambient light: {:?}", feed.observe_ambient_light(lux)),
            Err(_) => println!("usage: light <lux>"),
        },
        "help" | "?" => println!("{HELP}"),
        "quit" | "q" | "exit" => return false,
        other => println!("unknown command: {other} ({HELP})"),
    }
    true
}

fn print_current(feed: &FeedController) {
    let Some(memory) = feed.current() else {
        println!("(feed is empty)");
        return;
    };
    let mut flags = Vec::new();
    if feed.is_liked(&memory.id) {
        flags.push("liked");
    }
    if feed.is_recalled(&memory.id) {
        flags.push("recalled");
    }
    println!(
        "[{}/{}] {} {} {} {}",
        feed.index() + 1,
        feed.sequence().len(),
        memory.id,
        memory.media_type,
        memory.media_url,
        flags.join(",")
    );
    if let Some(ref script) = memory.script {
        println!("    \"{script}\"");
    }
}

fn print_event(event: &FeedEvent) {
    match event {
        FeedEvent::ModeChanged(change) => {
            println!("mode: {} -> {} after {} missed taps", change.from, change.to, change.missed_taps)
        }
        FeedEvent::SundowningChanged(active) => println!("sundowning: {active}"),
        FeedEvent::AmbientLightChanged(level) => println!("ambient light: {level:?}"),
        FeedEvent::RecallPrompt { memory_id } => {
            println!("Do you remember this? ({memory_id})  [yes/no]")
        }
        FeedEvent::Narration {
            memory_id,
            script,
            audio_ref,
        } => println!("narration for {memory_id}: \"{script}\" ({audio_ref})"),
        FeedEvent::Warning(message) => println!("warning: {message}"),
    }
}
