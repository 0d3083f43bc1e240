//! Am29F040B command sequences issued through the CPU bus of a machine
//! running an EasyFlash cartridge in ultimax mode.

use cpu_6510::Bus;
use machine_c64::cartridge::FlashState;
use machine_c64::files::CrtFile;
use machine_c64::{Config, C64};

fn crt_easyflash() -> Vec<u8> {
    // Hand-build a one-bank EasyFlash CRT image
    let bank = vec![0x3Au8; 0x2000];
    let mut out = Vec::new();
    out.extend_from_slice(b"C64 CARTRIDGE   ");
    out.extend_from_slice(&0x40u32.to_be_bytes());
    out.extend_from_slice(&0x0100u16.to_be_bytes());
    out.extend_from_slice(&32u16.to_be_bytes()); // EasyFlash
    out.push(1); // EXROM high
    out.push(0); // GAME low
    out.extend_from_slice(&[0; 6]);
    out.extend_from_slice(&[0u8; 32]); // Name
    out.extend_from_slice(b"CHIP");
    out.extend_from_slice(&(0x10u32 + 0x2000).to_be_bytes());
    out.extend_from_slice(&2u16.to_be_bytes()); // FlashROM
    out.extend_from_slice(&0u16.to_be_bytes()); // Bank 0
    out.extend_from_slice(&0x8000u16.to_be_bytes());
    out.extend_from_slice(&0x2000u16.to_be_bytes());
    out.extend_from_slice(&bank);
    out
}

fn make_c64_with_easyflash() -> C64 {
    let mut c64 = C64::new(Config::default());
    let mut kernal = vec![0xEA; 0x2000];
    kernal[0x1FFC] = 0x00;
    kernal[0x1FFD] = 0xE0;
    c64.install_kernal_rom(&kernal).unwrap();
    c64.install_basic_rom(&[0xEA; 0x2000]).unwrap();
    c64.install_char_rom(&[0x00; 0x1000]).unwrap();
    let crt = CrtFile::from_bytes(&crt_easyflash()).unwrap();
    c64.attach_cartridge(&crt).unwrap();
    c64.reset();
    c64
}

#[test]
fn easyflash_boots_into_ultimax() {
    let c64 = make_c64_with_easyflash();
    assert!(c64.bus.mem.ultimax());
    // ROML visible at $8000
    assert_eq!(c64.spypeek(0x8000), 0x3A);
}

#[test]
fn autoselect_sequence_through_the_bus() {
    let mut c64 = make_c64_with_easyflash();

    // Magic writes land on the low flash chip through the ROML window
    c64.bus.write(0x8555, 0xAA);
    c64.bus.write(0x82AA, 0x55);
    c64.bus.write(0x8555, 0x90);

    assert_eq!(c64.bus.read(0x8000), 0x01); // Manufacturer
    assert_eq!(c64.bus.read(0x8001), 0xA4); // Device

    // Reset command: array data again
    c64.bus.write(0x8000, 0xF0);
    assert_eq!(c64.bus.read(0x8000), 0x3A);
}

#[test]
fn byte_program_through_the_bus() {
    let mut c64 = make_c64_with_easyflash();

    c64.bus.write(0x8555, 0xAA);
    c64.bus.write(0x82AA, 0x55);
    c64.bus.write(0x8555, 0xA0);
    c64.bus.write(0x8123, 0x18); // 0x3A & 0x18 = 0x18

    assert_eq!(c64.bus.read(0x8123), 0x18);
    assert_eq!(c64.spypeek(0x8000), 0x3A); // Neighbours untouched
}

#[test]
fn mismatched_write_returns_to_base_state() {
    let mut c64 = make_c64_with_easyflash();

    c64.bus.write(0x8555, 0xAA);
    c64.bus.write(0x8000, 0x55); // Wrong second address

    // A well-formed sequence must still work afterwards
    c64.bus.write(0x8555, 0xAA);
    c64.bus.write(0x82AA, 0x55);
    c64.bus.write(0x8555, 0x90);
    assert_eq!(c64.bus.read(0x8000), 0x01);
    let _ = FlashState::Read; // The state machine type is public API
}
