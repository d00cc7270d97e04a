//! WRM replay CLI - Play a recording and summarize its contents.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use wrm_replay::{
    recording::{Consumer, MetaSequenceReader, OrderCounter, Player},
    schema::PlayerConfig,
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <recording.wrm|recording.mwrm> [config.json]", args[0]);
        eprintln!();
        eprintln!("Replay a WRM session recording and print what it contains.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  recording    .wrm file, or .mwrm index of a multi-file recording");
        eprintln!("  config.json  Playback configuration (default: unbounded, no pacing)");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let recording = PathBuf::from(&args[1]);
    let config = match args.get(2) {
        Some(path) => load_config(Path::new(path)),
        None => PlayerConfig::default(),
    };

    let is_sequence = recording.extension().is_some_and(|e| e == "mwrm");
    let result = if is_sequence {
        MetaSequenceReader::open(&recording)
            .map_err(wrm_replay::ReplayError::from)
            .and_then(|seq| {
                let index = seq.index();
                println!(
                    "Sequence: {} files, {}x{}",
                    index.entries.len(),
                    index.width,
                    index.height
                );
                replay(seq, config)
            })
    } else {
        fs::File::open(&recording)
            .map_err(wrm_replay::ReplayError::from)
            .and_then(|file| replay(std::io::BufReader::new(file), config))
    };

    if let Err(e) = result {
        eprintln!("Error replaying {}: {}", recording.display(), e);
        std::process::exit(1);
    }
}

fn load_config(path: &Path) -> PlayerConfig {
    let config_str = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });
    serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    })
}

fn replay<R: Read>(reader: R, config: PlayerConfig) -> wrm_replay::Result<()> {
    let mut counter = OrderCounter::default();
    let start = Instant::now();
    let mut player = Player::open(reader, config)?;

    println!("WRM Replay");
    println!("==========");
    if let Some(meta) = player.meta() {
        println!(
            "Screen: {}x{} at {} bpp (version {})",
            meta.width, meta.height, meta.bpp, meta.version
        );
        println!(
            "Bitmap caches: {}, compression: {:?}",
            meta.geometry.tiers.len(),
            meta.compression
        );
    }
    println!("First timestamp: {} us", player.record_now());
    println!();

    player.add_consumer(Consumer::device(&mut counter))?;
    let stats = player.play()?;
    let elapsed = start.elapsed();
    drop(player);

    println!("Played: {}", stats);
    if let (Some(first), Some(last)) = (stats.first_timestamp, stats.last_timestamp) {
        println!("Timestamps: {} .. {} us", first, last);
    }
    println!("Drawing orders: {}", counter.drawing_orders());
    println!();
    print!("{}", counter);
    println!();
    println!("Time: {:.2}s", elapsed.as_secs_f32());
    Ok(())
}

fn print_example_config() {
    let config = PlayerConfig {
        begin_capture: Some(1_352_304_810),
        end_capture: Some(1_352_304_870),
        real_time: false,
        max_order_count: 0,
    };

    println!("Example configuration (config.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing config: {}", e),
    }
}
