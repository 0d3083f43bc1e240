//! CIA timer cascades observed through the machine bus.

use cpu_6510::Bus;
use machine_c64::{Config, C64};

fn make_c64() -> C64 {
    let mut c64 = C64::new(Config::default());
    let mut kernal = vec![0xEA; 0x2000]; // NOP sled
    kernal[0x1FFC] = 0x00;
    kernal[0x1FFD] = 0xE0;
    c64.install_kernal_rom(&kernal).unwrap();
    c64.install_basic_rom(&[0xEA; 0x2000]).unwrap();
    c64.install_char_rom(&[0x00; 0x1000]).unwrap();
    c64.reset();
    c64
}

#[test]
fn timer_b_counts_one_hundred_timer_a_underflows() {
    let mut c64 = make_c64();

    // Timer A: underflow every 100 cycles (latch 99)
    c64.bus.write(0xDC04, 99);
    c64.bus.write(0xDC05, 0);
    // Timer B: count 100 timer A underflows (latch 99)
    c64.bus.write(0xDC06, 99);
    c64.bus.write(0xDC07, 0);
    // Timer B source: timer A underflows; start both
    c64.bus.write(0xDC0F, 0x41);
    c64.bus.write(0xDC0E, 0x01);

    c64.execute_cycles(10_000);

    // After exactly 10,000 cycles timer A underflowed 100 times, so
    // timer B just underflowed for the first time and reloaded
    let icr = c64.bus.cia1.spypeek(0x0D);
    assert_ne!(icr & 0x01, 0, "timer A flag missing");
    assert_ne!(icr & 0x02, 0, "timer B flag missing");
    assert_eq!(c64.bus.cia1.timer_b(), 99, "timer B should have reloaded");
}

#[test]
fn timer_b_partial_count_after_five_thousand_cycles() {
    let mut c64 = make_c64();

    c64.bus.write(0xDC04, 99);
    c64.bus.write(0xDC05, 0);
    c64.bus.write(0xDC06, 0xFF);
    c64.bus.write(0xDC07, 0xFF);
    c64.bus.write(0xDC0F, 0x41);
    c64.bus.write(0xDC0E, 0x01);

    // 5,000 cycles: 50 underflows of timer A
    c64.execute_cycles(5_000);
    assert_eq!(c64.bus.cia1.timer_b(), 0xFFFF - 50);
}

#[test]
fn cia_irq_reaches_the_cpu() {
    let mut c64 = make_c64();

    // Enable the timer A interrupt and make it fire quickly
    c64.bus.write(0xDC0D, 0x81);
    c64.bus.write(0xDC04, 10);
    c64.bus.write(0xDC05, 0);
    c64.bus.write(0xDC0E, 0x01);
    c64.cpu.regs.p.0 &= !0x04; // The NOP sled never executes CLI

    // The NOP-sled kernal has no handler; the CPU vectors through
    // $FFFE, which reads $EAEA from the sled
    c64.execute_cycles(40);
    assert_eq!(c64.cpu.regs.pc & 0xFF00, 0xEA00);
}
