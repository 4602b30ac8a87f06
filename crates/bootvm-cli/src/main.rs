//! Native runner: boot a floppy image and report what the guest did.
//!
//! `RUST_LOG=debug` surfaces the per-interrupt trace (decoded inputs,
//! computed addresses, byte counts) that makes this useful as a boot-sector
//! debugger.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use bootvm_machine::{Machine, MachineConfig, RunExit};
use bootvm_storage::BootImage;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Boot a floppy image under an emulated real-mode CPU and BIOS")]
struct Args {
    /// Boot image (raw floppy image, first sector is the boot sector).
    image: PathBuf,

    /// Guest memory size in KiB.
    #[arg(long, default_value_t = 1024)]
    ram_kib: usize,

    /// Stop after executing at most N guest instructions.
    #[arg(long)]
    max_insts: Option<u64>,

    /// Reject malformed Disk Address Packets instead of ignoring their
    /// size/reserved bytes.
    #[arg(long)]
    strict_dap: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let image = BootImage::open(&args.image)
        .with_context(|| format!("failed to open boot image {}", args.image.display()))?;
    if image.len() < 512 {
        bail!(
            "boot image {} is shorter than one sector ({} bytes)",
            args.image.display(),
            image.len()
        );
    }

    let config = MachineConfig {
        memory_bytes: args.ram_kib * 1024,
        strict_dap: args.strict_dap,
        max_insts: args.max_insts,
    };
    let mut machine = Machine::new(config, image);

    let exit = machine.run();

    let tty = machine.take_tty_output();
    if !tty.is_empty() {
        let mut stdout = std::io::stdout();
        stdout.write_all(&tty)?;
        if !tty.ends_with(b"\n") {
            writeln!(stdout)?;
        }
    }

    match exit {
        RunExit::Halted => Ok(()),
        RunExit::UnhandledInterrupt(vector) => {
            bail!("execution stopped: unhandled interrupt {vector:#04x}")
        }
        RunExit::InvalidOpcode { opcode, addr } => {
            bail!("execution stopped: invalid opcode {opcode:#04x} at {addr:#07x}")
        }
        RunExit::OutOfBudget => bail!("instruction budget exhausted before the guest halted"),
    }
}
