//! Otto melody tool
//!
//! Imports a MIDI file, reduces one track to a buzzer melody, optionally
//! applies trim/pitch edits, and previews the result with real timing.
//!
//! Usage:
//!   cargo run --bin melody-tool -- <file.mid> [OPTIONS]
//!
//! Options:
//!   --track <n>       Track index to reduce (default 0)
//!   --max-notes <n>   Reducer note cap (default 100)
//!   --crop <a> <b>    Crop window in percent, then commit the trim
//!   --speed <pct>     Speed factor 50-200, committed with the trim
//!   --pitch <semis>   Preview pitch shift, -12..12 semitones
//!   --play            Preview through the terminal with real timing
//!   --verbose         Extra debug output

use std::path::PathBuf;
use std::time::Duration;

use otto_melody::melody::{encode_wire, total_duration_ms};
use otto_melody::{decode_file, reduce_track, EditSession, Player, PlayerStatus, ReducerParams, ToneSink, TICK_MS};

/// Sink that narrates notes instead of sounding them.
struct ConsoleTone;

impl ToneSink for ConsoleTone {
    fn emit(&self, frequency: u16, duration_ms: u32) -> anyhow::Result<()> {
        println!("    ♪ {:>5} Hz for {:>4} ms", frequency, duration_ms);
        Ok(())
    }
}

fn arg_value<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let verbose = args.iter().any(|a| a == "--verbose");

    let log_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let Some(path) = args.iter().skip(1).find(|a| !a.starts_with("--")) else {
        eprintln!("Usage: melody-tool <file.mid> [--track N] [--max-notes N] [--crop A B] [--speed PCT] [--pitch SEMIS] [--play]");
        std::process::exit(2);
    };
    let path = PathBuf::from(path);

    let imported = decode_file(&path)?;
    println!("\n{} ({} BPM)", imported.file_name, imported.tempo_bpm);
    for (i, track) in imported.tracks.iter().enumerate() {
        println!(
            "  [{}] {} / {} - {} notes, {:.1}s",
            i,
            track.name,
            track.instrument,
            track.notes.len(),
            track.total_ms() as f64 / 1000.0,
        );
    }

    let track_index: usize = arg_value(&args, "--track").unwrap_or(0);
    let track = imported
        .tracks
        .get(track_index)
        .ok_or_else(|| anyhow::anyhow!("no track {} in this file", track_index))?;

    let params = ReducerParams {
        max_notes: arg_value(&args, "--max-notes").unwrap_or(ReducerParams::default().max_notes),
        ..Default::default()
    };
    let melody = reduce_track(track, &params);

    let mut session = EditSession::from_import(melody);

    if let Some(start) = arg_value::<u8>(&args, "--crop") {
        let end = args
            .iter()
            .position(|a| a == "--crop")
            .and_then(|i| args.get(i + 2))
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);
        session.set_crop(start, end);
    }
    if let Some(speed) = arg_value(&args, "--speed") {
        session.set_speed(speed);
    }
    if session.crop() != (0, 100) || session.speed_factor() != 100 {
        session.commit_trim();
    }
    if let Some(pitch) = arg_value(&args, "--pitch") {
        session.set_pitch(pitch);
    }

    let preview = session.effective_melody();
    println!(
        "\nMelody: {} entries, {:.1}s",
        preview.len(),
        total_duration_ms(&preview) as f64 / 1000.0,
    );
    println!("Wire:   {}", encode_wire(session.melody_for_save()));

    if args.iter().any(|a| a == "--play") {
        println!("\nPreview:");
        let mut player = Player::new(ConsoleTone);
        player.load(preview, 0);
        player.play();

        while player.status() != PlayerStatus::Stopped {
            tokio::time::sleep(Duration::from_millis(TICK_MS)).await;
        }
        println!("Done.");
    }

    Ok(())
}
