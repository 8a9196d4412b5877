//! `espemu`: command-line front end for the ESP32 network emulator.
//!
//! ```text
//! USAGE:
//!   espemu demo                          Two boards, one wire, one message
//!   espemu dump [--allocate 4 10 ...]    Allocate on a fresh board, print memory
//!   espemu topology [--boards N] [--ring] Build a chain or ring, run LBTP addressing
//!   espemu pins                          GPIO table with LBTP channels
//!
//! GLOBAL:
//!   --registers N                        DRAM size of every board (default 80000)
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use esp_chip::dram::REGISTER_COUNT;
use esp_chip::gpio::PIN_COUNT;
use esp_chip::{PinFunction, PinIndex};
use esp_emu::{Board, BoardConfig, LbtpConfig, Network};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "espemu", about = "ESP32 board and network emulator", version)]
struct Cli {
    /// Registers of DRAM per board.
    #[arg(long, global = true, default_value_t = REGISTER_COUNT)]
    registers: usize,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Allocate, write, link two boards and pass a message.
    Demo,
    /// Allocate regions on a fresh board and print its memory.
    Dump {
        /// Region sizes to allocate, in registers.
        #[arg(long, num_args = 1..)]
        allocate: Vec<usize>,
        /// Rows of eight registers to print.
        #[arg(long, default_value_t = 8)]
        rows: usize,
    },
    /// Wire boards on LBTP pins and assign global addresses.
    Topology {
        /// Number of boards.
        #[arg(long, default_value_t = 4)]
        boards: usize,
        /// Close the chain into a ring.
        #[arg(long)]
        ring: bool,
    },
    /// Print the GPIO table.
    Pins,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    if cli.registers == 0 {
        bail!("--registers must be at least 1");
    }
    let config = BoardConfig::default().with_registers(cli.registers);

    match cli.command {
        Cmd::Demo => cmd_demo(&config)?,
        Cmd::Dump { allocate, rows } => cmd_dump(&config, &allocate, rows)?,
        Cmd::Topology { boards, ring } => cmd_topology(&config, boards, ring)?,
        Cmd::Pins => cmd_pins(),
    }

    Ok(())
}

fn cmd_demo(config: &BoardConfig) -> Result<()> {
    let mut x = Board::with_config(config);
    let mut y = Board::with_config(config);
    println!("Boards       : {} and {}", x.id(), y.id());

    let handle = x.allocate_memory(10)?;
    x.write(&handle, 0, 42)?;
    println!(
        "Memory       : {} registers at {} on {}, offset 0 reads {}",
        handle.len(),
        handle.start(),
        x.id(),
        x.read(&handle, 0)?
    );

    x.connect_pin(3, y.pin_mut(5)?)?;
    println!("Wire         : {} <-> {}", x.pin(3)?.address(), y.pin(5)?.address());

    x.send_on_pin(3, "hello")?;
    let first = y
        .receive_on_pin(5)?
        .context("message did not arrive")?;
    println!("Received     : {:?}", String::from_utf8_lossy(&first));
    println!("Next receive : {:?}", y.receive_on_pin(5)?);

    x.free_memory(&handle)?;
    info!("demo done");
    Ok(())
}

fn cmd_dump(config: &BoardConfig, sizes: &[usize], rows: usize) -> Result<()> {
    let mut board = Board::with_config(config);
    for (i, &size) in sizes.iter().enumerate() {
        let handle = board
            .allocate_memory(size)
            .with_context(|| format!("allocating region {i} ({size} registers)"))?;
        // Tag each region so the dump shows where it landed.
        let tag = u32::try_from(i + 1)?;
        let values = vec![tag; size];
        board.memory_mut().write_slice(&handle, 0, &values)?;
        println!("{i}: {} registers at {}", handle.len(), handle.start());
    }
    println!();
    print!("{}", board.memory().dump(..rows.saturating_mul(8)));
    Ok(())
}

fn cmd_topology(config: &BoardConfig, boards: usize, ring: bool) -> Result<()> {
    if boards == 0 {
        bail!("--boards must be at least 1");
    }
    let mut net = Network::with_protocol(LbtpConfig::default());
    let ids: Vec<_> = (0..boards).map(|_| net.spawn(config)).collect();
    for pair in ids.windows(2) {
        net.connect(pair[0], 38, pair[1], 37)?;
    }
    if ring && boards > 1 {
        net.connect(ids[boards - 1], 38, ids[0], 37)?;
    }

    let addresses = net.assign_all()?;

    println!("Boards: {}", net.len());
    for board in net.boards() {
        let address = addresses
            .get(&board.id())
            .map_or_else(|| "-".to_string(), ToString::to_string);
        let lbtp: Vec<String> = net
            .protocol()
            .set_up_pins(board)
            .iter()
            .map(ToString::to_string)
            .collect();
        println!(
            "  {:<6} address {address}  knows {:>2}  lbtp [{}]",
            board.id().to_string(),
            board.known_addresses().len(),
            lbtp.join(", ")
        );
    }
    println!();
    println!("Links: {}", net.links().len());
    for (a, b) in net.links() {
        println!("  {a} <-> {b}");
    }
    Ok(())
}

fn cmd_pins() {
    let lbtp = LbtpConfig::default();
    println!("GPIO  Function   ATD  LBTP");
    for gpio in 0..PIN_COUNT {
        let Ok(raw) = u8::try_from(gpio) else {
            continue;
        };
        let Some(pin) = PinIndex::new(raw) else {
            continue;
        };
        let function = match pin.function() {
            PinFunction::Gpio => "gpio",
            PinFunction::InputOnly => "input",
            PinFunction::Flash => "flash",
            PinFunction::Unbonded => "-",
        };
        let channel = pin
            .lbtp_channel()
            .map_or_else(String::new, |c| format!("ch{c}"));
        let default = if lbtp.claims(pin) { "yes" } else { "" };
        println!("{raw:>4}  {function:<9}  {channel:<4} {default}");
    }
}
