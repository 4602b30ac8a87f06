//! Instruction fetch/decode/execute.
//!
//! 16-bit operations only, no operand-size or repeat prefixes. Segment
//! override prefixes are honored. Anything outside the subset surfaces as
//! [`CpuExit::InvalidOpcode`] so a bad fetch can never run away silently.
//!
//! `INT imm8` is serviced host-side: the vector is handed to the run loop and
//! execution resumes at the instruction after `INT` once the handler returns.
//! There is no IVT dispatch and no interrupt stack frame; `IRET` only pops
//! frames the guest pushed itself.

use crate::cpu::{Cpu, CpuExit, FLAG_ALWAYS_ON, FLAG_CF, FLAG_DF, FLAG_IF, FLAG_SF, FLAG_ZF};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seg {
    Es,
    Cs,
    Ss,
    Ds,
}

/// A resolved ModRM r/m operand: a register index or a linear address.
#[derive(Debug, Clone, Copy)]
enum Operand {
    Reg(u8),
    Mem(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alu {
    Add,
    Or,
    And,
    Sub,
    Xor,
    Cmp,
}

fn alu_from_opcode(opcode: u8) -> Alu {
    match opcode & 0x38 {
        0x00 => Alu::Add,
        0x08 => Alu::Or,
        0x20 => Alu::And,
        0x28 => Alu::Sub,
        0x30 => Alu::Xor,
        0x38 => Alu::Cmp,
        _ => unreachable!("not an ALU opcode: {opcode:#04x}"),
    }
}

impl Cpu {
    /// Execute one instruction.
    pub fn step(&mut self) -> CpuExit {
        if self.halted {
            return CpuExit::Halted;
        }

        // x86 caps instruction length at 15 bytes; a longer prefix run is
        // not a decodable instruction.
        let mut seg_override = None;
        for _ in 0..14 {
            let opcode = self.fetch_u8();
            match opcode {
                0x26 => seg_override = Some(Seg::Es),
                0x2E => seg_override = Some(Seg::Cs),
                0x36 => seg_override = Some(Seg::Ss),
                0x3E => seg_override = Some(Seg::Ds),
                _ => return self.execute(opcode, seg_override),
            }
        }
        CpuExit::InvalidOpcode(self.read_u8(self.phys_ip()))
    }

    fn execute(&mut self, opcode: u8, seg_override: Option<Seg>) -> CpuExit {
        match opcode {
            // ALU op r/m8, r8
            0x00 | 0x08 | 0x20 | 0x28 | 0x30 | 0x38 => {
                let alu = alu_from_opcode(opcode);
                let (mode, reg, rm) = self.fetch_modrm();
                let dst = self.resolve_rm(mode, rm, seg_override);
                let result = self.alu8(alu, self.rm_read8(dst), self.get_reg8(reg));
                if alu != Alu::Cmp {
                    self.rm_write8(dst, result);
                }
            }
            // ALU op r/m16, r16
            0x01 | 0x09 | 0x21 | 0x29 | 0x31 | 0x39 => {
                let alu = alu_from_opcode(opcode);
                let (mode, reg, rm) = self.fetch_modrm();
                let dst = self.resolve_rm(mode, rm, seg_override);
                let result = self.alu16(alu, self.rm_read16(dst), self.get_reg16(reg));
                if alu != Alu::Cmp {
                    self.rm_write16(dst, result);
                }
            }
            // ALU op r8, r/m8
            0x02 | 0x0A | 0x22 | 0x2A | 0x32 | 0x3A => {
                let alu = alu_from_opcode(opcode);
                let (mode, reg, rm) = self.fetch_modrm();
                let src = self.resolve_rm(mode, rm, seg_override);
                let result = self.alu8(alu, self.get_reg8(reg), self.rm_read8(src));
                if alu != Alu::Cmp {
                    self.set_reg8(reg, result);
                }
            }
            // ALU op r16, r/m16
            0x03 | 0x0B | 0x23 | 0x2B | 0x33 | 0x3B => {
                let alu = alu_from_opcode(opcode);
                let (mode, reg, rm) = self.fetch_modrm();
                let src = self.resolve_rm(mode, rm, seg_override);
                let result = self.alu16(alu, self.get_reg16(reg), self.rm_read16(src));
                if alu != Alu::Cmp {
                    self.set_reg16(reg, result);
                }
            }
            // ALU op AL, imm8
            0x04 | 0x0C | 0x24 | 0x2C | 0x34 | 0x3C => {
                let alu = alu_from_opcode(opcode);
                let imm = self.fetch_u8();
                let result = self.alu8(alu, self.al(), imm);
                if alu != Alu::Cmp {
                    self.set_al(result);
                }
            }
            // ALU op AX, imm16
            0x05 | 0x0D | 0x25 | 0x2D | 0x35 | 0x3D => {
                let alu = alu_from_opcode(opcode);
                let imm = self.fetch_u16();
                let result = self.alu16(alu, self.ax, imm);
                if alu != Alu::Cmp {
                    self.ax = result;
                }
            }
            // Immediate-group: op r/m8, imm8
            0x80 => {
                let (mode, reg, rm) = self.fetch_modrm();
                let alu = match imm_group_op(reg) {
                    Some(alu) => alu,
                    None => return CpuExit::InvalidOpcode(opcode),
                };
                let dst = self.resolve_rm(mode, rm, seg_override);
                let imm = self.fetch_u8();
                let result = self.alu8(alu, self.rm_read8(dst), imm);
                if alu != Alu::Cmp {
                    self.rm_write8(dst, result);
                }
            }
            // Immediate-group: op r/m16, imm16 (0x81) or sign-extended imm8 (0x83)
            0x81 | 0x83 => {
                let (mode, reg, rm) = self.fetch_modrm();
                let alu = match imm_group_op(reg) {
                    Some(alu) => alu,
                    None => return CpuExit::InvalidOpcode(opcode),
                };
                let dst = self.resolve_rm(mode, rm, seg_override);
                let imm = if opcode == 0x81 {
                    self.fetch_u16()
                } else {
                    self.fetch_u8() as i8 as u16
                };
                let result = self.alu16(alu, self.rm_read16(dst), imm);
                if alu != Alu::Cmp {
                    self.rm_write16(dst, result);
                }
            }
            // INC/DEC r16 (CF is architecturally untouched)
            0x40..=0x47 => {
                let idx = opcode - 0x40;
                let result = self.get_reg16(idx).wrapping_add(1);
                self.set_reg16(idx, result);
                self.set_zf_sf16(result);
            }
            0x48..=0x4F => {
                let idx = opcode - 0x48;
                let result = self.get_reg16(idx).wrapping_sub(1);
                self.set_reg16(idx, result);
                self.set_zf_sf16(result);
            }
            0x50..=0x57 => {
                let val = self.get_reg16(opcode - 0x50);
                self.push_u16(val);
            }
            0x58..=0x5F => {
                let val = self.pop_u16();
                self.set_reg16(opcode - 0x58, val);
            }
            // Jcc rel8
            0x72 | 0x73 | 0x74 | 0x75 | 0x76 | 0x77 | 0x78 | 0x79 => {
                let rel = self.fetch_u8() as i8;
                let taken = match opcode {
                    0x72 => self.flag(FLAG_CF),
                    0x73 => !self.flag(FLAG_CF),
                    0x74 => self.flag(FLAG_ZF),
                    0x75 => !self.flag(FLAG_ZF),
                    0x76 => self.flag(FLAG_CF) || self.flag(FLAG_ZF),
                    0x77 => !self.flag(FLAG_CF) && !self.flag(FLAG_ZF),
                    0x78 => self.flag(FLAG_SF),
                    0x79 => !self.flag(FLAG_SF),
                    _ => unreachable!(),
                };
                if taken {
                    self.ip = self.ip.wrapping_add(rel as u16);
                }
            }
            // TEST r/m8, r8 / TEST r/m16, r16
            0x84 => {
                let (mode, reg, rm) = self.fetch_modrm();
                let dst = self.resolve_rm(mode, rm, seg_override);
                self.alu8(Alu::And, self.rm_read8(dst), self.get_reg8(reg));
            }
            0x85 => {
                let (mode, reg, rm) = self.fetch_modrm();
                let dst = self.resolve_rm(mode, rm, seg_override);
                self.alu16(Alu::And, self.rm_read16(dst), self.get_reg16(reg));
            }
            // MOV r/m, reg and MOV reg, r/m
            0x88 => {
                let (mode, reg, rm) = self.fetch_modrm();
                let dst = self.resolve_rm(mode, rm, seg_override);
                self.rm_write8(dst, self.get_reg8(reg));
            }
            0x89 => {
                let (mode, reg, rm) = self.fetch_modrm();
                let dst = self.resolve_rm(mode, rm, seg_override);
                self.rm_write16(dst, self.get_reg16(reg));
            }
            0x8A => {
                let (mode, reg, rm) = self.fetch_modrm();
                let src = self.resolve_rm(mode, rm, seg_override);
                let val = self.rm_read8(src);
                self.set_reg8(reg, val);
            }
            0x8B => {
                let (mode, reg, rm) = self.fetch_modrm();
                let src = self.resolve_rm(mode, rm, seg_override);
                let val = self.rm_read16(src);
                self.set_reg16(reg, val);
            }
            // MOV r/m16, sreg / MOV sreg, r/m16
            0x8C => {
                let (mode, reg, rm) = self.fetch_modrm();
                let dst = self.resolve_rm(mode, rm, seg_override);
                let val = self.get_sreg(reg & 0x3);
                self.rm_write16(dst, val);
            }
            0x8E => {
                let (mode, reg, rm) = self.fetch_modrm();
                let src = self.resolve_rm(mode, rm, seg_override);
                let val = self.rm_read16(src);
                self.set_sreg(reg & 0x3, val);
            }
            0x90 => {} // NOP
            0x9C => {
                let flags = self.flags;
                self.push_u16(flags);
            }
            0x9D => {
                let flags = self.pop_u16();
                self.flags = flags | FLAG_ALWAYS_ON;
            }
            // MOV accumulator <-> moffs
            0xA0 => {
                let addr = self.moffs(seg_override);
                let val = self.read_u8(addr);
                self.set_al(val);
            }
            0xA1 => {
                let addr = self.moffs(seg_override);
                self.ax = self.read_u16(addr);
            }
            0xA2 => {
                let addr = self.moffs(seg_override);
                let val = self.al();
                self.write_u8(addr, val);
            }
            0xA3 => {
                let addr = self.moffs(seg_override);
                let val = self.ax;
                self.write_u16(addr, val);
            }
            // TEST AL/AX, imm
            0xA8 => {
                let imm = self.fetch_u8();
                self.alu8(Alu::And, self.al(), imm);
            }
            0xA9 => {
                let imm = self.fetch_u16();
                self.alu16(Alu::And, self.ax, imm);
            }
            // STOSB/STOSW (destination is always ES:DI)
            0xAA => {
                let addr = Cpu::linear(self.es, self.di);
                let val = self.al();
                self.write_u8(addr, val);
                self.di = self.di.wrapping_add(self.string_step(1));
            }
            0xAB => {
                let addr = Cpu::linear(self.es, self.di);
                let val = self.ax;
                self.write_u16(addr, val);
                self.di = self.di.wrapping_add(self.string_step(2));
            }
            // LODSB/LODSW
            0xAC => {
                let seg = self.seg_value(seg_override.unwrap_or(Seg::Ds));
                let val = self.read_u8(Cpu::linear(seg, self.si));
                self.set_al(val);
                self.si = self.si.wrapping_add(self.string_step(1));
            }
            0xAD => {
                let seg = self.seg_value(seg_override.unwrap_or(Seg::Ds));
                self.ax = self.read_u16(Cpu::linear(seg, self.si));
                self.si = self.si.wrapping_add(self.string_step(2));
            }
            // MOV reg, imm
            0xB0..=0xB7 => {
                let imm = self.fetch_u8();
                self.set_reg8(opcode - 0xB0, imm);
            }
            0xB8..=0xBF => {
                let imm = self.fetch_u16();
                self.set_reg16(opcode - 0xB8, imm);
            }
            0xC3 => {
                self.ip = self.pop_u16();
            }
            // MOV r/m, imm (displacement bytes precede the immediate)
            0xC6 => {
                let (mode, _, rm) = self.fetch_modrm();
                let dst = self.resolve_rm(mode, rm, seg_override);
                let imm = self.fetch_u8();
                self.rm_write8(dst, imm);
            }
            0xC7 => {
                let (mode, _, rm) = self.fetch_modrm();
                let dst = self.resolve_rm(mode, rm, seg_override);
                let imm = self.fetch_u16();
                self.rm_write16(dst, imm);
            }
            0xCC => return CpuExit::Interrupt(3),
            0xCD => {
                let vector = self.fetch_u8();
                return CpuExit::Interrupt(vector);
            }
            0xCF => {
                // IRET
                self.ip = self.pop_u16();
                self.cs = self.pop_u16();
                self.flags = self.pop_u16() | FLAG_ALWAYS_ON;
            }
            0xE2 => {
                // LOOP rel8
                let rel = self.fetch_u8() as i8;
                self.cx = self.cx.wrapping_sub(1);
                if self.cx != 0 {
                    self.ip = self.ip.wrapping_add(rel as u16);
                }
            }
            // Port I/O: no devices are modeled, reads float high.
            0xE4 => {
                let _port = self.fetch_u8();
                self.set_al(0xFF);
            }
            0xE6 => {
                let _port = self.fetch_u8();
            }
            0xEC => self.set_al(0xFF),
            0xEE => {}
            0xE8 => {
                let rel = self.fetch_u16();
                let ret = self.ip;
                self.push_u16(ret);
                self.ip = self.ip.wrapping_add(rel);
            }
            0xE9 => {
                let rel = self.fetch_u16();
                self.ip = self.ip.wrapping_add(rel);
            }
            0xEA => {
                let offset = self.fetch_u16();
                let segment = self.fetch_u16();
                self.ip = offset;
                self.cs = segment;
            }
            0xEB => {
                let rel = self.fetch_u8() as i8;
                self.ip = self.ip.wrapping_add(rel as u16);
            }
            0xF4 => {
                self.halted = true;
                return CpuExit::Halted;
            }
            0xF5 => {
                let cf = self.cf();
                self.set_cf(!cf);
            }
            0xF8 => self.set_cf(false),
            0xF9 => self.set_cf(true),
            0xFA => self.set_flag(FLAG_IF, false),
            0xFB => self.set_flag(FLAG_IF, true),
            0xFC => self.set_flag(FLAG_DF, false),
            0xFD => self.set_flag(FLAG_DF, true),
            _ => return CpuExit::InvalidOpcode(opcode),
        }

        CpuExit::Continue
    }

    // -- fetch helpers ---------------------------------------------------

    fn fetch_u8(&mut self) -> u8 {
        let val = self.read_u8(self.phys_ip());
        self.ip = self.ip.wrapping_add(1);
        val
    }

    fn fetch_u16(&mut self) -> u16 {
        let lo = self.fetch_u8() as u16;
        let hi = self.fetch_u8() as u16;
        lo | (hi << 8)
    }

    fn fetch_modrm(&mut self) -> (u8, u8, u8) {
        let modrm = self.fetch_u8();
        (modrm >> 6, (modrm >> 3) & 7, modrm & 7)
    }

    fn moffs(&mut self, seg_override: Option<Seg>) -> u32 {
        let offset = self.fetch_u16();
        let seg = self.seg_value(seg_override.unwrap_or(Seg::Ds));
        Cpu::linear(seg, offset)
    }

    // -- ModRM resolution ------------------------------------------------

    fn resolve_rm(&mut self, mode: u8, rm: u8, seg_override: Option<Seg>) -> Operand {
        if mode == 3 {
            return Operand::Reg(rm);
        }

        // Direct 16-bit address.
        if mode == 0 && rm == 6 {
            let offset = self.fetch_u16();
            let seg = self.seg_value(seg_override.unwrap_or(Seg::Ds));
            return Operand::Mem(Cpu::linear(seg, offset));
        }

        // BP-based forms default to SS, everything else to DS.
        let (default_seg, base) = match rm {
            0 => (Seg::Ds, self.bx.wrapping_add(self.si)),
            1 => (Seg::Ds, self.bx.wrapping_add(self.di)),
            2 => (Seg::Ss, self.bp.wrapping_add(self.si)),
            3 => (Seg::Ss, self.bp.wrapping_add(self.di)),
            4 => (Seg::Ds, self.si),
            5 => (Seg::Ds, self.di),
            6 => (Seg::Ss, self.bp),
            7 => (Seg::Ds, self.bx),
            _ => unreachable!(),
        };

        let disp = match mode {
            0 => 0,
            1 => self.fetch_u8() as i8 as u16,
            2 => self.fetch_u16(),
            _ => unreachable!(),
        };

        let seg = self.seg_value(seg_override.unwrap_or(default_seg));
        Operand::Mem(Cpu::linear(seg, base.wrapping_add(disp)))
    }

    fn rm_read8(&self, op: Operand) -> u8 {
        match op {
            Operand::Reg(idx) => self.get_reg8(idx),
            Operand::Mem(addr) => self.read_u8(addr),
        }
    }

    fn rm_write8(&mut self, op: Operand, val: u8) {
        match op {
            Operand::Reg(idx) => self.set_reg8(idx, val),
            Operand::Mem(addr) => self.write_u8(addr, val),
        }
    }

    fn rm_read16(&self, op: Operand) -> u16 {
        match op {
            Operand::Reg(idx) => self.get_reg16(idx),
            Operand::Mem(addr) => self.read_u16(addr),
        }
    }

    fn rm_write16(&mut self, op: Operand, val: u16) {
        match op {
            Operand::Reg(idx) => self.set_reg16(idx, val),
            Operand::Mem(addr) => self.write_u16(addr, val),
        }
    }

    // -- register files --------------------------------------------------

    // Encoding order: AL, CL, DL, BL, AH, CH, DH, BH.
    fn get_reg8(&self, idx: u8) -> u8 {
        match idx {
            0 => self.al(),
            1 => self.cl(),
            2 => self.dl(),
            3 => self.bl(),
            4 => self.ah(),
            5 => self.ch(),
            6 => self.dh(),
            7 => self.bh(),
            _ => unreachable!(),
        }
    }

    fn set_reg8(&mut self, idx: u8, val: u8) {
        match idx {
            0 => self.set_al(val),
            1 => self.set_cl(val),
            2 => self.set_dl(val),
            3 => self.set_bl(val),
            4 => self.set_ah(val),
            5 => self.set_ch(val),
            6 => self.set_dh(val),
            7 => self.set_bh(val),
            _ => unreachable!(),
        }
    }

    // Encoding order: AX, CX, DX, BX, SP, BP, SI, DI.
    fn get_reg16(&self, idx: u8) -> u16 {
        match idx {
            0 => self.ax,
            1 => self.cx,
            2 => self.dx,
            3 => self.bx,
            4 => self.sp,
            5 => self.bp,
            6 => self.si,
            7 => self.di,
            _ => unreachable!(),
        }
    }

    fn set_reg16(&mut self, idx: u8, val: u16) {
        match idx {
            0 => self.ax = val,
            1 => self.cx = val,
            2 => self.dx = val,
            3 => self.bx = val,
            4 => self.sp = val,
            5 => self.bp = val,
            6 => self.si = val,
            7 => self.di = val,
            _ => unreachable!(),
        }
    }

    // Encoding order: ES, CS, SS, DS.
    fn get_sreg(&self, idx: u8) -> u16 {
        match idx {
            0 => self.es,
            1 => self.cs,
            2 => self.ss,
            3 => self.ds,
            _ => unreachable!(),
        }
    }

    fn set_sreg(&mut self, idx: u8, val: u16) {
        match idx {
            0 => self.es = val,
            1 => self.cs = val,
            2 => self.ss = val,
            3 => self.ds = val,
            _ => unreachable!(),
        }
    }

    fn seg_value(&self, seg: Seg) -> u16 {
        match seg {
            Seg::Es => self.es,
            Seg::Cs => self.cs,
            Seg::Ss => self.ss,
            Seg::Ds => self.ds,
        }
    }

    // -- ALU -------------------------------------------------------------

    fn alu8(&mut self, op: Alu, dst: u8, src: u8) -> u8 {
        let (result, carry) = match op {
            Alu::Add => dst.overflowing_add(src),
            Alu::Sub | Alu::Cmp => dst.overflowing_sub(src),
            Alu::Or => (dst | src, false),
            Alu::And => (dst & src, false),
            Alu::Xor => (dst ^ src, false),
        };
        self.set_flag(FLAG_CF, carry);
        self.set_flag(FLAG_ZF, result == 0);
        self.set_flag(FLAG_SF, result & 0x80 != 0);
        result
    }

    fn alu16(&mut self, op: Alu, dst: u16, src: u16) -> u16 {
        let (result, carry) = match op {
            Alu::Add => dst.overflowing_add(src),
            Alu::Sub | Alu::Cmp => dst.overflowing_sub(src),
            Alu::Or => (dst | src, false),
            Alu::And => (dst & src, false),
            Alu::Xor => (dst ^ src, false),
        };
        self.set_flag(FLAG_CF, carry);
        self.set_flag(FLAG_ZF, result == 0);
        self.set_flag(FLAG_SF, result & 0x8000 != 0);
        result
    }

    fn set_zf_sf16(&mut self, result: u16) {
        self.set_flag(FLAG_ZF, result == 0);
        self.set_flag(FLAG_SF, result & 0x8000 != 0);
    }

    fn string_step(&self, width: u16) -> u16 {
        if self.flag(FLAG_DF) {
            width.wrapping_neg()
        } else {
            width
        }
    }
}

fn imm_group_op(reg: u8) -> Option<Alu> {
    match reg {
        0 => Some(Alu::Add),
        1 => Some(Alu::Or),
        4 => Some(Alu::And),
        5 => Some(Alu::Sub),
        6 => Some(Alu::Xor),
        7 => Some(Alu::Cmp),
        // ADC/SBB are outside the subset.
        _ => None,
    }
}
