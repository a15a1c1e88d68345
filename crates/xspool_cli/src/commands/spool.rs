//! Spool diagnostics command implementation.
//!
//! Pushes a synthetic payload through a content buffer and a replay cache and
//! reports where the bytes ended up.

use super::format_size;
use serde::Serialize;
use std::io::{Read, Write};
use xspool_core::{Config, Spool, StatsSnapshot};
use xspool_replay::ReplaySource;

/// Parameters of a diagnostics run.
#[derive(Debug, Clone)]
pub struct SpoolArgs {
    /// Payload size in bytes.
    pub bytes: u64,
    /// Write size in bytes.
    pub chunk: usize,
    /// Replay the payload through a cache as well.
    pub replay: bool,
}

/// Diagnostics result.
#[derive(Debug, Serialize)]
pub struct SpoolResult {
    /// Scratch directory of the run.
    pub scratch_dir: String,
    /// Spill threshold in bytes.
    pub in_memory_size: u64,
    /// Payload size in bytes.
    pub bytes: u64,
    /// Whether the buffer moved to disk.
    pub spilled: bool,
    /// Whether the payload read back intact.
    pub content_verified: bool,
    /// Replay details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay: Option<ReplayReport>,
    /// Spool counters after the run.
    pub stats: StatsSnapshot,
}

/// Replay part of a diagnostics run.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    /// Backend kind.
    pub kind: String,
    /// Bytes held by the cache after both reads.
    pub cached: u32,
    /// Whether both handles saw the payload.
    pub verified: bool,
    /// Monitor listing while the cache was live.
    pub monitor: String,
}

fn pattern(len: u64) -> impl Iterator<Item = u8> {
    (0..len).map(|i| (i % 251) as u8)
}

/// Runs the spool command.
pub fn run(config: Config, args: &SpoolArgs, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let spool = Spool::open(config)?;
    let result = diagnose(&spool, args)?;
    spool.shutdown();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text(&result),
    }

    if !result.content_verified || result.replay.as_ref().is_some_and(|r| !r.verified) {
        return Err("Payload did not read back intact".into());
    }
    Ok(())
}

/// Performs the run against an open spool.
pub fn diagnose(spool: &Spool, args: &SpoolArgs) -> Result<SpoolResult, Box<dyn std::error::Error>> {
    let payload: Vec<u8> = pattern(args.bytes).collect();

    let buffer = spool.borrow_content()?;
    let mut writer = buffer.new_writer()?;
    for part in payload.chunks(args.chunk.max(1)) {
        writer.write_all(part)?;
    }
    writer.finish()?;
    let spilled = buffer.is_spilled();
    let content_verified = buffer.read_all()? == payload;
    spool.give_back(buffer);

    let replay = if args.replay {
        let mut first = spool.replay(ReplaySource::from_bytes(payload.clone()))?;
        let mut second = spool.share_stream(&first)?;
        let mut a = Vec::new();
        let mut b = Vec::new();
        first.read_to_end(&mut a)?;
        second.read_to_end(&mut b)?;
        let report = ReplayReport {
            kind: first.cache().kind().to_string(),
            // Invalidation on the last close zeroes the length.
            cached: first.cache().length(),
            verified: a == payload && b == payload,
            monitor: spool.monitor().dump(),
        };
        first.close()?;
        second.close()?;
        Some(report)
    } else {
        None
    };

    Ok(SpoolResult {
        scratch_dir: spool.authority().scratch_dir().display().to_string(),
        in_memory_size: spool.config().in_memory_size,
        bytes: args.bytes,
        spilled,
        content_verified,
        replay,
        stats: spool.stats(),
    })
}

fn print_text(result: &SpoolResult) {
    println!("xspool Diagnostics");
    println!("==================");
    println!();
    println!("Scratch dir: {}", result.scratch_dir);
    println!();
    println!("Content buffer:");
    println!("  Threshold: {}", format_size(result.in_memory_size));
    println!("  Payload:   {}", format_size(result.bytes));
    println!("  Location:  {}", if result.spilled { "disk" } else { "memory" });
    println!("  Verified:  {}", result.content_verified);

    if let Some(replay) = &result.replay {
        println!();
        println!("Replay cache:");
        println!("  Kind:      {}", replay.kind);
        println!("  Cached:    {}", format_size(u64::from(replay.cached)));
        println!("  Verified:  {}", replay.verified);
        for line in replay.monitor.lines() {
            println!("  {}", line);
        }
    }

    println!();
    println!("Counters:");
    println!("  Buffers borrowed: {}", result.stats.buffers_borrowed);
    println!("  Buffers returned: {}", result.stats.buffers_returned);
    println!("  Replay caches:    {}", result.stats.replay_caches);
    println!("  Replay streams:   {}", result.stats.replay_streams);
    println!("  Errors:           {}", result.stats.errors);
}
