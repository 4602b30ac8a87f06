//! The non-disk service families.
//!
//! These answer the probes boot code makes before and after loading: video
//! output, equipment and memory sizing, keyboard polling, the time of day.
//! None of them carry real work; they return the conventional register state
//! and log the call. Handlers never redirect CS:IP — even INT 19h only
//! restages the boot sector bytes.

use bootvm_cpu::{Cpu, FLAG_ZF};
use bootvm_storage::BootImage;
use tracing::debug;

use crate::Bios;

impl Bios {
    /// INT 05h: print screen. There is no printer; acknowledge and move on.
    pub(crate) fn int05(&mut self, cpu: &mut Cpu) {
        debug!("print screen requested");
        cpu.set_cf(false);
    }

    /// INT 10h: video services. Teletype output is captured host-side.
    pub(crate) fn int10(&mut self, cpu: &mut Cpu) {
        match cpu.ah() {
            0x00 => {
                self.video_mode = cpu.al();
                debug!("set video mode {:#04x}", cpu.al());
                cpu.set_cf(false);
            }
            0x0E => {
                let ch = cpu.al();
                debug!("teletype output {ch:#04x} ('{}')", printable(ch));
                self.tty_output.push(ch);
                cpu.set_cf(false);
            }
            0x0F => {
                // AH=columns, AL=mode, BH=active page.
                cpu.set_al(self.video_mode);
                cpu.set_ah(80);
                cpu.set_bh(0);
                cpu.set_cf(false);
            }
            ah => {
                // Video calls must not derail a boot; report success anyway.
                debug!("unhandled INT 10h function {ah:#04x}");
                cpu.set_cf(false);
            }
        }
    }

    /// INT 11h: equipment word. One floppy, 80x25 color video.
    pub(crate) fn int11(&mut self, cpu: &mut Cpu) {
        debug!("equipment list requested");
        cpu.ax = (1 << 0) | (2 << 4);
        cpu.set_cf(false);
    }

    /// INT 12h: conventional memory size in KiB.
    pub(crate) fn int12(&mut self, cpu: &mut Cpu) {
        debug!("memory size requested");
        cpu.ax = 640;
        cpu.set_cf(false);
    }

    /// INT 14h: serial services. No ports are modeled.
    pub(crate) fn int14(&mut self, cpu: &mut Cpu) {
        debug!("serial service {:#04x} requested, no ports attached", cpu.ah());
        cpu.ax = 0;
        cpu.set_cf(false);
    }

    /// INT 15h: system services. Nothing here is supported.
    pub(crate) fn int15(&mut self, cpu: &mut Cpu) {
        debug!("[ERROR] system service {:#04x} is not supported", cpu.ah());
        cpu.set_cf(true);
        cpu.set_ah(0x86);
    }

    /// INT 16h: keyboard. No keyboard is attached, so there is never a key.
    pub(crate) fn int16(&mut self, cpu: &mut Cpu) {
        match cpu.ah() {
            0x00 | 0x01 => {
                debug!("keyboard poll, no key available");
                cpu.ax = 0;
                cpu.set_flag(FLAG_ZF, true);
                cpu.set_cf(false);
            }
            ah => {
                debug!("[ERROR] keyboard service {ah:#04x} is not supported");
                cpu.set_cf(true);
                cpu.set_ah(0x01);
            }
        }
    }

    /// INT 17h: printer. Reported absent.
    pub(crate) fn int17(&mut self, cpu: &mut Cpu) {
        debug!("printer service requested, no printer attached");
        cpu.set_ah(0x00);
        cpu.set_cf(false);
    }

    /// INT 18h: no bootable device / ROM BASIC.
    pub(crate) fn int18(&mut self, cpu: &mut Cpu) {
        debug!("[ERROR] boot failure reported by guest, ROM BASIC not present");
        cpu.set_cf(true);
        cpu.set_ah(0x01);
    }

    /// INT 19h: bootstrap. Restages the boot sector at 0x7C00; the guest
    /// re-enters it itself.
    pub(crate) fn int19(&mut self, cpu: &mut Cpu, image: &BootImage) {
        match image.read_at(0, 512) {
            Ok(bytes) if !bytes.is_empty() => {
                cpu.write(0x7C00, &bytes);
                debug!("bootstrap: restaged boot sector at 0x07C00");
                cpu.set_cf(false);
                cpu.set_ah(0x00);
            }
            Ok(_) | Err(_) => {
                debug!("[ERROR] bootstrap: no boot sector available");
                cpu.set_cf(true);
                cpu.set_ah(0x01);
            }
        }
    }

    /// INT 1Ah: time of day. The clock starts at midnight and does not tick.
    pub(crate) fn int1a(&mut self, cpu: &mut Cpu) {
        match cpu.ah() {
            0x00 => {
                debug!("tick count requested");
                cpu.cx = 0;
                cpu.dx = 0;
                cpu.set_al(0x00);
                cpu.set_cf(false);
            }
            ah => {
                debug!("[ERROR] time service {ah:#04x} is not supported");
                cpu.set_cf(true);
                cpu.set_ah(0x01);
            }
        }
    }
}

fn printable(ch: u8) -> char {
    if ch.is_ascii_graphic() || ch == b' ' {
        ch as char
    } else {
        '.'
    }
}
