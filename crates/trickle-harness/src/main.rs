#![forbid(unsafe_code)]

//! Scenario runner.
//!
//! Renders a synthetic list through the harness driver and prints one JSON
//! line whenever the renderer snapshot changes, so batch sizing, eviction,
//! and pool behavior can be inspected or diffed between runs.
//!
//! # Running
//!
//! ```sh
//! cargo run -p trickle-harness -- --items 200 --lazy 3 --low-memory
//! RUST_LOG=trickle_runtime=debug cargo run -p trickle-harness
//! ```
//!
//! # Options
//!
//! - `--items N`: leaves in the list (default 50)
//! - `--lazy N`: replace every 10th leaf with a lazy reference to N leaves
//! - `--low-memory`: simulate a low-memory device
//! - `--eager`: no visibility service (continuation runs eagerly)
//! - `--max-frames N`: stop after N frames (default 2000)

use std::process::ExitCode;

use serde_json::json;
use trickle_core::device::DeviceProfile;
use trickle_core::item::RenderItem;
use trickle_harness::{HarnessDriver, HarnessOptions, ScriptedSource};
use trickle_runtime::renderer::{Phase, RenderSnapshot};

#[derive(Debug)]
struct Args {
    items: usize,
    lazy: Option<usize>,
    low_memory: bool,
    eager: bool,
    max_frames: usize,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            items: 50,
            lazy: None,
            low_memory: false,
            eager: false,
            max_frames: 2_000,
        }
    }
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--items" => args.items = number(&flag, iter.next())?,
            "--lazy" => args.lazy = Some(number(&flag, iter.next())?),
            "--max-frames" => args.max_frames = number(&flag, iter.next())?,
            "--low-memory" => args.low_memory = true,
            "--eager" => args.eager = true,
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(args)
}

fn number(flag: &str, value: Option<String>) -> Result<usize, String> {
    let value = value.ok_or_else(|| format!("{flag} needs a value"))?;
    value
        .parse()
        .map_err(|_| format!("{flag}: not a number: {value}"))
}

fn build_scenario(args: &Args) -> (ScriptedSource, Vec<RenderItem>) {
    let mut source = ScriptedSource::new();
    let mut items = Vec::with_capacity(args.items);
    for i in 0..args.items {
        match args.lazy {
            Some(n) if i % 10 == 9 => {
                let reference = format!("more-{i}.json");
                let children = (0..n)
                    .map(|c| RenderItem::card(format!("item {i}.{c}")))
                    .collect();
                source = source.with_collection(&reference, children);
                items.push(RenderItem::lazy(reference));
            }
            _ => items.push(RenderItem::button(format!("item {i}")).with_id(format!("item-{i}"))),
        }
    }
    (source, items)
}

fn snapshot_line(frame: u64, snapshot: &RenderSnapshot) -> serde_json::Value {
    json!({
        "frame": frame,
        "phase": format!("{:?}", snapshot.phase),
        "epoch": snapshot.epoch,
        "len": snapshot.len,
        "rendered": snapshot.rendered,
        "live": snapshot.live,
        "next_start": snapshot.next_start,
        "next_batch_size": snapshot.next_batch_size,
        "smoothed_batch_ms": snapshot.smoothed_batch_ms,
        "pool_recycled": snapshot.pool_recycled,
        "pool_in_use": snapshot.pool_in_use,
        "batches": snapshot.batches.batches,
        "evicted": snapshot.batches.evicted,
        "trigger": snapshot.trigger.map(|m| format!("{m:?}")),
        "indicator": snapshot.indicator_visible,
    })
}

fn main() -> ExitCode {
    trickle_harness::init_tracing();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("trickle-harness: {message}");
            return ExitCode::from(2);
        }
    };

    let (source, items) = build_scenario(&args);
    let mut options = HarnessOptions::default();
    if args.low_memory {
        options = options.with_device(DeviceProfile::low_memory());
    }
    if args.eager {
        options = options.without_visibility();
    }

    let mut driver = HarnessDriver::new(source, options);
    let handle = driver.render(items);
    driver.set_auto_reach_tail(true);
    tracing::info!(items = args.items, lazy = ?args.lazy, low_memory = args.low_memory, "scenario started");

    let mut last = driver.snapshot();
    println!("{}", snapshot_line(0, &last));
    let mut finished = last.phase == Phase::Finished;
    for _ in 0..args.max_frames {
        if finished {
            break;
        }
        driver.frame();
        let snapshot = driver.snapshot();
        if snapshot != last {
            println!("{}", snapshot_line(driver.frames(), &snapshot));
            last = snapshot;
        }
        finished = last.phase == Phase::Finished;
    }

    let outcome = handle.try_outcome();
    println!(
        "{}",
        json!({
            "finished": finished,
            "frames": driver.frames(),
            "rendered": outcome.and_then(|r| r.ok()).and_then(|o| o.rendered()),
            "appended": driver.surface().append_count(),
        })
    );
    if finished {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
