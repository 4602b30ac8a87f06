//! End-to-end boots: real boot-sector programs through the CPU and BIOS.

use bootvm_machine::{Machine, MachineConfig, RunExit, BOOT_SECTOR_LOAD};
use bootvm_storage::BootImage;
use pretty_assertions::assert_eq;

/// A bootable image whose first sector starts with `program`.
fn boot_image(program: &[u8], total_sectors: usize) -> Vec<u8> {
    assert!(program.len() <= 510);
    let mut data = vec![0u8; total_sectors * 512];
    data[..program.len()].copy_from_slice(program);
    data[510] = 0x55;
    data[511] = 0xAA;
    data
}

fn machine(image: Vec<u8>) -> Machine {
    Machine::new(MachineConfig::default(), BootImage::from_bytes(image))
}

#[test]
fn execution_begins_at_the_boot_sector_load_address() {
    // Property 9: the very first fetch happens at linear 0x7C00.
    let mut machine = machine(boot_image(&[0xF4], 1));

    assert!(machine.start());
    assert_eq!(machine.cpu().cs, 0x0000);
    assert_eq!(machine.cpu().ip, (BOOT_SECTOR_LOAD + 1) as u16);
}

#[test]
fn boot_sector_prints_through_the_teletype_service() {
    // cld
    // mov si, 0x7C10
    // next: lodsb
    // or al, al
    // jz done
    // mov ah, 0x0E
    // int 0x10
    // jmp next
    // done: hlt
    let mut program = vec![
        0xFC, 0xBE, 0x10, 0x7C, 0xAC, 0x08, 0xC0, 0x74, 0x06, 0xB4, 0x0E, 0xCD, 0x10, 0xEB,
        0xF5, 0xF4,
    ];
    program.extend_from_slice(b"Boot OK\0");

    let mut machine = machine(boot_image(&program, 1));
    assert!(machine.start());
    assert_eq!(machine.take_tty_output(), b"Boot OK");
}

#[test]
fn boot_sector_loads_its_second_stage_over_int13() {
    // mov ax, 0x0201  (read one sector)
    // mov cx, 0x0002  (cylinder 0, sector 2)
    // mov dx, 0x0000  (head 0, boot drive)
    // mov bx, 0x0600  (ES:BX destination)
    // int 0x13
    // hlt
    let program = [
        0xB8, 0x01, 0x02, 0xB9, 0x02, 0x00, 0xBA, 0x00, 0x00, 0xBB, 0x00, 0x06, 0xCD, 0x13,
        0xF4,
    ];
    let mut image = boot_image(&program, 4);
    image[512..1024].fill(0xA5); // LBA 1 = CHS (0, 0, 2)

    let mut machine = machine(image);
    assert!(machine.start());
    assert_eq!(machine.cpu().read(0x600, 512), vec![0xA5; 512]);
    assert!(!machine.cpu().cf());
    assert_eq!(machine.cpu().al(), 1);
}

#[test]
fn unrecognised_vector_halts_the_machine() {
    // S6 end to end: INT 0x77 is not a BIOS service.
    let mut machine = machine(boot_image(&[0xCD, 0x77, 0xF4], 1));

    assert_eq!(machine.run(), RunExit::UnhandledInterrupt(0x77));
    assert!(!machine.clone().start());
}

#[test]
fn instruction_budget_bounds_a_spinning_guest() {
    let mut machine = Machine::new(
        MachineConfig {
            max_insts: Some(1_000),
            ..MachineConfig::default()
        },
        BootImage::from_bytes(boot_image(&[0xEB, 0xFE], 1)),
    );

    assert_eq!(machine.run(), RunExit::OutOfBudget);
}

#[test]
fn clone_restages_a_fresh_machine() {
    let mut machine = machine(boot_image(&[0xF4], 1));
    assert!(machine.start());

    // The clone is a constructed machine, not a snapshot of a halted one.
    let mut clone = machine.clone();
    assert_eq!(clone.cpu().ip, 0);
    assert!(!clone.cpu().halted);
    assert_eq!(clone.cpu().read_u8(BOOT_SECTOR_LOAD), 0xF4);
    assert!(clone.start());
}

#[test]
fn short_images_still_stage_what_exists() {
    // A 510-byte image has no signature but its bytes still land at 0x7C00.
    let mut machine = Machine::new(
        MachineConfig::default(),
        BootImage::from_bytes(vec![0xF4; 510]),
    );

    assert!(machine.start());
}
