//! The machine façade: one CPU, one boot image, one BIOS.
//!
//! A [`Machine`] binds the three together for a single boot session. The CPU
//! surfaces every `INT n` to the BIOS router synchronously on the same
//! thread; the BIOS reads registers, possibly reads the image and writes
//! guest memory, then writes the result registers before the CPU resumes.

use bootvm_bios::{Bios, BiosConfig};
use bootvm_cpu::Cpu;
use bootvm_storage::BootImage;
use tracing::debug;

pub use bootvm_cpu::RunExit;

/// Canonical BIOS boot-sector load address.
pub const BOOT_SECTOR_LOAD: u32 = 0x7C00;

#[derive(Debug, Clone, Copy)]
pub struct MachineConfig {
    /// Guest memory size in bytes.
    pub memory_bytes: usize,
    /// Reject malformed Disk Address Packets (INT 13h/AH=42h).
    pub strict_dap: bool,
    /// Optional instruction budget per run.
    pub max_insts: Option<u64>,
}

impl Default for MachineConfig {
    fn default() -> MachineConfig {
        MachineConfig {
            memory_bytes: 1024 * 1024,
            strict_dap: false,
            max_insts: None,
        }
    }
}

/// A bootable unit: CPU engine, guest memory, BIOS state, boot image.
///
/// Construction stages the boot sector; [`Machine::start`] runs it.
/// Configuration is fixed after construction, and dropping the machine is
/// the only cancellation.
pub struct Machine {
    config: MachineConfig,
    cpu: Cpu,
    bios: Bios,
    image: BootImage,
}

impl Machine {
    pub fn new(config: MachineConfig, image: BootImage) -> Machine {
        let mut cpu = Cpu::new(config.memory_bytes);
        let bios = Bios::new(BiosConfig {
            strict_dap: config.strict_dap,
        });
        stage_boot_sector(&mut cpu, &image);
        Machine {
            config,
            cpu,
            bios,
            image,
        }
    }

    /// Begin execution at the boot-sector load address.
    ///
    /// Returns the engine's halt verdict: `true` for a guest `HLT`, `false`
    /// when an unrecognised vector, an undecodable opcode, or an exhausted
    /// instruction budget stopped it.
    pub fn start(&mut self) -> bool {
        matches!(self.run(), RunExit::Halted)
    }

    /// Like [`Machine::start`], exposing the exit reason.
    pub fn run(&mut self) -> RunExit {
        // Split borrows: the CPU runs while the BIOS borrows the image. The
        // BIOS only holds the engine for the duration of a single interrupt.
        let Machine {
            config,
            cpu,
            bios,
            image,
        } = self;

        debug!("starting execution at {BOOT_SECTOR_LOAD:#07x}");
        let mut handler =
            |vector: u8, cpu: &mut Cpu| bios.handle_interrupt(vector, cpu, image);
        let exit = cpu.start(BOOT_SECTOR_LOAD, &mut handler, config.max_insts);
        debug!("execution stopped: {exit:?}");
        exit
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn image(&self) -> &BootImage {
        &self.image
    }

    /// Bytes the guest wrote through the INT 10h teletype service.
    pub fn tty_output(&self) -> &[u8] {
        self.bios.tty_output()
    }

    pub fn take_tty_output(&mut self) -> Vec<u8> {
        self.bios.take_tty_output()
    }
}

impl Clone for Machine {
    /// Cloning re-runs construction: a fresh CPU and fresh BIOS state over
    /// the same shared image bytes, never a snapshot of a half-run machine.
    fn clone(&self) -> Machine {
        Machine::new(self.config, self.image.clone())
    }
}

/// Copy the first sector to 0x7C00 and set the register state boot sectors
/// expect: DL holding the boot drive, a stack just below the load address,
/// zeroed segments.
fn stage_boot_sector(cpu: &mut Cpu, image: &BootImage) {
    let len = image.len().min(512);
    if let Ok(sector) = image.read_at(0, len) {
        cpu.write(BOOT_SECTOR_LOAD, &sector);
    }

    cpu.set_dl(0x00);
    cpu.ss = 0x0000;
    cpu.sp = BOOT_SECTOR_LOAD as u16;
    cpu.ds = 0x0000;
    cpu.es = 0x0000;
}
