//! Pin traffic between two boards.
//!
//! Sends batches of payloads of increasing size across one wire and drains
//! them on the far side, then repeats with `send_memory`/`receive_to_memory`
//! so the register packing cost shows up next to the raw copy cost.

use anyhow::Result;
use esp_emu::{Board, BoardConfig};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const BATCH: usize = 64;
const ITERATIONS: usize = 500;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let config = BoardConfig::default().with_inbox_capacity(BATCH);
    let mut x = Board::with_config(&config);
    let mut y = Board::with_config(&config);
    x.connect_pin(3, y.pin_mut(5)?)?;

    println!("Pin traffic benchmark ({} -> {}, batch {BATCH})", x.id(), y.id());
    println!("==================================================");
    println!("  {:>8}  {:>12}  {:>10}", "bytes", "ns/message", "MB/s");
    println!("  {:-<8}  {:-<12}  {:-<10}", "", "", "");

    for &bytes in &[4usize, 64, 1024, 16 * 1024] {
        let payload = vec![0xA5u8; bytes];
        let t0 = Instant::now();
        for _ in 0..ITERATIONS {
            for _ in 0..BATCH {
                x.send_on_pin(3, &payload)?;
            }
            while y.receive_on_pin(5)?.is_some() {}
        }
        report(bytes, t0);
    }

    println!();
    println!("Memory to memory (send_memory / receive_to_memory)");
    println!("  {:>8}  {:>12}  {:>10}", "bytes", "ns/message", "MB/s");
    println!("  {:-<8}  {:-<12}  {:-<10}", "", "", "");

    for &registers in &[1usize, 16, 256, 4096] {
        let src = x.allocate_memory(registers)?;
        let t0 = Instant::now();
        for _ in 0..ITERATIONS {
            x.send_memory(3, &src)?;
            if let Some(dst) = y.receive_to_memory(5)? {
                y.free_memory(&dst)?;
            }
        }
        report_one(registers * 4, t0);
        x.free_memory(&src)?;
    }

    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn report(bytes: usize, t0: Instant) {
    let messages = (ITERATIONS * BATCH) as f64;
    print_row(bytes, t0.elapsed().as_nanos() as f64 / messages);
}

#[allow(clippy::cast_precision_loss)]
fn report_one(bytes: usize, t0: Instant) {
    print_row(bytes, t0.elapsed().as_nanos() as f64 / ITERATIONS as f64);
}

#[allow(clippy::cast_precision_loss)]
fn print_row(bytes: usize, ns: f64) {
    let mb_s = bytes as f64 / ns * 1e3;
    println!("  {bytes:>8}  {ns:>12.0}  {mb_s:>10.1}");
}
