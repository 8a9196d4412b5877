// SPDX-License-Identifier: AGPL-3.0-only
//! Allocator throughput across region sizes.
//!
//! Fills a full 80 000-register board with regions of one size, frees every
//! other region, then refills the holes. The refill phase is the interesting
//! one: every request has to skip occupied runs before it finds a hole.

use anyhow::Result;
use esp_chip::dram::REGISTER_COUNT;
use esp_emu::{AddressSpace, Handle};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const ROUNDS: usize = 5;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    println!("Allocator benchmark ({REGISTER_COUNT} registers, first fit)");
    println!("=======================================================");
    println!(
        "  {:>8}  {:>8}  {:>12}  {:>12}  {:>12}",
        "size", "regions", "fill ns/op", "free ns/op", "refill ns/op"
    );
    println!("  {:-<8}  {:-<8}  {:-<12}  {:-<12}  {:-<12}", "", "", "", "", "");

    for &size in &[1usize, 4, 16, 64, 256, 1024] {
        let mut fill = 0.0;
        let mut free = 0.0;
        let mut refill = 0.0;
        let mut regions = 0;

        for _ in 0..ROUNDS {
            let mut mem = AddressSpace::new(REGISTER_COUNT);

            let t0 = Instant::now();
            let mut handles: Vec<Handle> = Vec::new();
            while let Ok(h) = mem.allocate(size) {
                handles.push(h);
            }
            fill += per_op(t0, handles.len());
            regions = handles.len();

            let t0 = Instant::now();
            let mut freed = 0;
            for h in handles.iter().step_by(2) {
                mem.free(h)?;
                freed += 1;
            }
            free += per_op(t0, freed);

            let t0 = Instant::now();
            let mut again = 0;
            while mem.allocate(size).is_ok() {
                again += 1;
            }
            refill += per_op(t0, again);
        }

        let n = ROUNDS as f64;
        println!(
            "  {:>8}  {:>8}  {:>12.0}  {:>12.0}  {:>12.0}",
            size,
            regions,
            fill / n,
            free / n,
            refill / n
        );
    }

    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn per_op(t0: Instant, ops: usize) -> f64 {
    t0.elapsed().as_nanos() as f64 / ops.max(1) as f64
}
