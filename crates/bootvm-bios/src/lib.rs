//! The legacy BIOS interrupt surface.
//!
//! The CPU engine surfaces every `INT n` the guest executes; [`Bios`] routes
//! the vector to a service family and writes the result registers back before
//! the engine resumes. The disk service (INT 13h) is the only one with real
//! work in it — it translates register state into reads against the boot
//! image. The rest answer the probes boot code makes on its way to loading a
//! kernel.
//!
//! Failure is always guest-visible (CF set, AH holding a status byte), with
//! one exception: a vector outside the recognised set makes
//! [`Bios::handle_interrupt`] return `false`, which the engine treats as a
//! halt condition.

mod dap;
mod disk;
mod services;

use bootvm_cpu::Cpu;
use bootvm_storage::BootImage;

pub use dap::DiskAddressPacket;

/// Vectors the router recognises. Anything else stops the machine.
pub const RECOGNISED_VECTORS: [u8; 12] = [
    0x05, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A,
];

#[derive(Debug, Clone, Copy, Default)]
pub struct BiosConfig {
    /// Reject a DAP whose size byte is not 16 or whose reserved byte is not
    /// zero. Off by default: real loaders ship sloppy packets and the lenient
    /// path matches what the hardware-era BIOSes accepted.
    pub strict_dap: bool,
}

/// BIOS service state: the router plus the small amount of machine-global
/// state the stub services carry (video mode, captured teletype output).
#[derive(Debug, Clone)]
pub struct Bios {
    config: BiosConfig,
    video_mode: u8,
    tty_output: Vec<u8>,
}

impl Bios {
    pub fn new(config: BiosConfig) -> Bios {
        Bios {
            config,
            video_mode: 0x03,
            tty_output: Vec::new(),
        }
    }

    /// Bytes written through the INT 10h teletype service so far.
    pub fn tty_output(&self) -> &[u8] {
        &self.tty_output
    }

    /// Drain the captured teletype output.
    pub fn take_tty_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tty_output)
    }

    /// Route one software interrupt.
    ///
    /// Returns `true` for every recognised vector — even when the service
    /// itself failed, because the CPU continues after an `INT` regardless and
    /// failure travels through CF/AH. Returns `false` only for vectors
    /// outside [`RECOGNISED_VECTORS`].
    pub fn handle_interrupt(&mut self, vector: u8, cpu: &mut Cpu, image: &BootImage) -> bool {
        match vector {
            0x05 => self.int05(cpu),
            0x10 => self.int10(cpu),
            0x11 => self.int11(cpu),
            0x12 => self.int12(cpu),
            0x13 => self.int13(cpu, image),
            0x14 => self.int14(cpu),
            0x15 => self.int15(cpu),
            0x16 => self.int16(cpu),
            0x17 => self.int17(cpu),
            0x18 => self.int18(cpu),
            0x19 => self.int19(cpu, image),
            0x1A => self.int1a(cpu),
            _ => {
                tracing::debug!("unrecognised interrupt vector {vector:#04x}, halting");
                return false;
            }
        }
        true
    }
}
