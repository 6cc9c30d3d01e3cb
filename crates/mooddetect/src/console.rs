//! Line-oriented front end for `mooddetect run`.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;

use mooddetect::present::{format_duration, share_text, track_title};
use mooddetect::{SessionError, SessionEvent, SessionOrchestrator};

const HELP: &str = "commands: detect | play <n> | like <n> | unlike <n> | share <n> | list | status | help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Detect,
    Play(usize),
    Like(usize),
    Unlike(usize),
    Share(usize),
    List,
    Status,
    Help,
    Quit,
}

/// Parse one input line. Track numbers are 1-based as shown in `list`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let number = |words: &mut std::str::SplitWhitespace<'_>| -> Result<usize, String> {
        let raw = words
            .next()
            .ok_or_else(|| format!("{} needs a track number", verb))?;
        match raw.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(n - 1),
            _ => Err(format!("not a track number: {}", raw)),
        }
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "detect" | "d" => Command::Detect,
        "play" | "p" => Command::Play(number(&mut words)?),
        "like" => Command::Like(number(&mut words)?),
        "unlike" => Command::Unlike(number(&mut words)?),
        "share" => Command::Share(number(&mut words)?),
        "list" | "ls" => Command::List,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(Some(command))
}

fn print_tracks(session: &SessionOrchestrator) {
    let snapshot = session.snapshot();
    let Some(mood) = snapshot.mood else {
        println!("no tracks yet; run detect");
        return;
    };
    println!("{} music:", mood.display_name());
    for (track, view) in snapshot.tracks.iter().zip(snapshot.playback.iter()) {
        println!(
            "  {:>2}. {:<28} {:>6}  {:<10}{}",
            track.display_index + 1,
            track_title(&mood, track),
            format_duration(view.duration),
            view.state,
            if view.liked { " ♥" } else { "" }
        );
    }
}

fn drain_events(events: &mut Receiver<SessionEvent>) {
    loop {
        match events.try_recv() {
            Ok(SessionEvent::MoodDetected { mood }) => {
                println!("Detected mood: {}", mood.display_name());
            }
            Ok(SessionEvent::Notice { message }) => println!("! {}", message),
            Ok(_) => {}
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "console fell behind session events");
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

/// Failed operations are announced through `Notice` events; refused
/// calls are not, so say something here.
fn complain(err: &SessionError) {
    if err.is_rejection() {
        println!("{}", err.user_message());
    }
}

/// Returns false when the console should exit.
async fn execute(session: &SessionOrchestrator, command: Command) -> bool {
    match command {
        Command::Detect => match session.detect().await {
            Ok(_) => print_tracks(session),
            Err(e) => complain(&e),
        },
        Command::Play(index) => match session.select_track(index).await {
            Ok(state) => println!("track {} {}", index + 1, state),
            Err(e) => complain(&e),
        },
        Command::Like(index) => match session.like(index) {
            Ok(()) => println!("liked track {}", index + 1),
            Err(e) => println!("{}", e),
        },
        Command::Unlike(index) => match session.unlike(index) {
            Ok(()) => println!("unliked track {}", index + 1),
            Err(e) => println!("{}", e),
        },
        Command::Share(index) => {
            let snapshot = session.snapshot();
            match (snapshot.mood, snapshot.tracks.get(index)) {
                (Some(mood), Some(track)) => println!("{}", share_text(&mood, track)),
                _ => println!("no track {}", index + 1),
            }
        }
        Command::List => print_tracks(session),
        Command::Status => {
            let snapshot = session.snapshot();
            println!(
                "session {} state={} capture_ready={} mood={}",
                snapshot.id,
                snapshot.state,
                snapshot.capture_ready,
                snapshot
                    .mood
                    .map(|m| m.display_name())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => return false,
    }
    true
}

pub async fn run(session: &SessionOrchestrator) -> Result<()> {
    let mut events = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                };
                match parse(&line) {
                    Ok(Some(command)) => {
                        let keep_going = execute(session, command).await;
                        drain_events(&mut events);
                        if !keep_going {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => println!("{}", message),
                }
            }
            Some(track) = session.next_playback_event() => {
                println!("track {} {}", track.index + 1, track.state);
                drain_events(&mut events);
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    session.teardown();
    Ok(())
}
