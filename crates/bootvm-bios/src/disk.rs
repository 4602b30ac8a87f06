//! INT 13h: the disk service.
//!
//! The only service family with real algorithmic content. AH multiplexes the
//! sub-function; CF + AH carry the verdict back to the guest (AH=0 success,
//! AH=1 invalid function or parameter). Only drive 0x00, the boot floppy, is
//! served.

use bootvm_cpu::Cpu;
use bootvm_storage::{chs_to_lba, BootImage};
use tracing::debug;

use crate::dap::DiskAddressPacket;
use crate::Bios;

impl Bios {
    pub(crate) fn int13(&mut self, cpu: &mut Cpu, image: &BootImage) {
        match cpu.ah() {
            0x00 => self.reset_drive(cpu),
            0x02 => self.read_sectors(cpu, image),
            0x41 => self.check_extensions(cpu),
            0x42 => self.extended_read(cpu, image),
            ah => {
                debug!("[ERROR] INT 13h function {ah:#04x} is not supported");
                cpu.set_cf(true);
                cpu.set_ah(0x01);
            }
        }
    }

    /// AH=00h: reset drive. Nothing to spin down, so this always succeeds.
    fn reset_drive(&mut self, cpu: &mut Cpu) {
        debug!("resetting drive {:#04x}", cpu.dl());

        cpu.set_cf(false);
        cpu.set_ah(0x00);
    }

    /// AH=02h: read sectors by CHS into ES:BX.
    fn read_sectors(&mut self, cpu: &mut Cpu, image: &BootImage) {
        let drive = cpu.dl();
        let sectors = cpu.al();
        let cylinder = cpu.ch();
        // CL is consumed whole as the sector number: cylinder bits 8-9 in
        // CL[7:6] are not decoded, so only cylinders 0-255 are reachable.
        let sector = cpu.cl();
        let head = cpu.dh();
        let destination = Cpu::linear(cpu.es, cpu.bx);

        if drive != 0x00 {
            debug!("[ERROR] reading from drive {drive:#04x} is not supported");
            return fail_chs(cpu);
        }

        debug!(
            "reading {sectors} sectors from drive {drive:#04x}: \
             cylinder={cylinder:#04x} head={head:#04x} sector={sector:#04x} \
             lba={:#x} destination={destination:#07x} ({:#06x}:{:#06x})",
            chs_to_lba(image.mbr(), cylinder, sector, head),
            cpu.es,
            cpu.bx,
        );

        let bytes = match image.read_chs(cylinder, head, sector, sectors) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) | Err(_) => {
                debug!("[ERROR] no data received");
                return fail_chs(cpu);
            }
        };

        cpu.write(destination, &bytes);
        debug!(
            "[SUCCESS] wrote {} bytes at {destination:#07x} -> {:#07x}",
            bytes.len(),
            destination + bytes.len() as u32,
        );

        cpu.set_cf(false);
        cpu.set_ah(0x00);
        cpu.set_al(sectors);
    }

    /// AH=41h: INT 13h extensions installation check.
    ///
    /// Unconditional: the BX magic from the caller is not inspected. CX=0x0007
    /// advertises the base extended disk access subset (functions 42h-44h).
    fn check_extensions(&mut self, cpu: &mut Cpu) {
        debug!("checking if INT 13h extensions are supported");

        cpu.bx = 0xAA55;
        cpu.set_cf(false);
        cpu.set_ah(0x00);
        cpu.cx = 0x0007;
    }

    /// AH=42h: extended read via the Disk Address Packet at DS:SI.
    ///
    /// AL is not part of this call's contract and is left untouched.
    fn extended_read(&mut self, cpu: &mut Cpu, image: &BootImage) {
        let drive = cpu.dl();
        let dap_addr = Cpu::linear(cpu.ds, cpu.si);
        let dap = read_dap(cpu, dap_addr);

        if drive != 0x00 {
            debug!("[ERROR] reading from drive {drive:#04x} is not supported");
            return fail_extended(cpu);
        }

        if self.config.strict_dap && !dap.is_well_formed() {
            debug!(
                "[ERROR] malformed DAP at {dap_addr:#07x}: size={:#04x} reserved={:#04x}",
                dap.size, dap.zero,
            );
            return fail_extended(cpu);
        }

        let bytes_per_sector = image.mbr().sector_size();
        let offset = match dap.lba.checked_mul(bytes_per_sector) {
            Some(offset) => offset,
            None => {
                debug!("[ERROR] LBA {:#x} overflows the byte offset", dap.lba);
                return fail_extended(cpu);
            }
        };
        let size = dap.sector_count as u64 * bytes_per_sector;
        let destination = Cpu::linear(dap.dest_segment, dap.dest_offset);

        debug!(
            "reading DAP at {dap_addr:#07x} ({:#06x}:{:#06x}) from drive {drive:#04x}: \
             lba={:#x} offset={offset:#x} size={size} \
             destination={destination:#07x} ({:#06x}:{:#06x})",
            cpu.ds, cpu.si, dap.lba, dap.dest_segment, dap.dest_offset,
        );

        let bytes = match image.read_at(offset, size) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) | Err(_) => {
                debug!("[ERROR] no data received");
                return fail_extended(cpu);
            }
        };

        cpu.write(destination, &bytes);
        debug!(
            "[SUCCESS] wrote {} bytes at {destination:#07x} -> {:#07x}",
            bytes.len(),
            destination + bytes.len() as u32,
        );

        cpu.set_cf(false);
        cpu.set_ah(0x00);
    }
}

fn read_dap(cpu: &Cpu, addr: u32) -> DiskAddressPacket {
    let mut raw = [0u8; DiskAddressPacket::SIZE];
    raw.copy_from_slice(&cpu.read(addr, DiskAddressPacket::SIZE));
    DiskAddressPacket::parse(&raw)
}

/// Failure triple for the CHS read path.
fn fail_chs(cpu: &mut Cpu) {
    cpu.set_cf(true);
    cpu.set_ah(0x01);
    cpu.set_al(0x00);
}

/// Failure pair for the extended read path (AL is not part of the contract).
fn fail_extended(cpu: &mut Cpu) {
    cpu.set_cf(true);
    cpu.set_ah(0x01);
}
