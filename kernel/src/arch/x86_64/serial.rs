// =============================================================================
// Relay — COM1 Console
// =============================================================================
//
// A polled 16550 UART at 115200 8N1, the first output device that works on
// any PC or QEMU (`-serial stdio`). Hand it to `util::logger::init` as the
// kernel console:
//
//   let com1 = Box::leak(Box::new(SerialPort::com1()));
//   com1.init();
//   logger::init(com1, LevelFilter::Info)?;
//
// The port itself is not locked; the logger serializes all writers.
// =============================================================================

use core::fmt;

use ::x86_64::instructions::port::Port;

const COM1_BASE: u16 = 0x3F8;

const LSR_TX_EMPTY: u8 = 1 << 5;

pub struct SerialPort {
    data: Port<u8>,
    int_enable: Port<u8>,
    fifo_ctrl: Port<u8>,
    line_ctrl: Port<u8>,
    modem_ctrl: Port<u8>,
    line_status: Port<u8>,
}

impl SerialPort {
    pub const fn new(base: u16) -> Self {
        Self {
            data: Port::new(base),
            int_enable: Port::new(base + 1),
            fifo_ctrl: Port::new(base + 2),
            line_ctrl: Port::new(base + 3),
            modem_ctrl: Port::new(base + 4),
            line_status: Port::new(base + 5),
        }
    }

    pub const fn com1() -> Self {
        Self::new(COM1_BASE)
    }

    /// Program the UART: no interrupts, divisor 1, 8N1, FIFOs on.
    pub fn init(&mut self) {
        // SAFETY: these are the registers of the UART at `base`.
        unsafe {
            self.int_enable.write(0x00);
            self.line_ctrl.write(0x80);
            self.data.write(0x01);
            self.int_enable.write(0x00);
            self.line_ctrl.write(0x03);
            self.fifo_ctrl.write(0xC7);
            self.modem_ctrl.write(0x0B);
        }
    }

    pub fn write_byte(&mut self, byte: u8) {
        // SAFETY: see `init`.
        unsafe {
            while self.line_status.read() & LSR_TX_EMPTY == 0 {
                core::hint::spin_loop();
            }
            self.data.write(byte);
        }
    }
}

impl fmt::Write for SerialPort {
    /// Serial terminals want CRLF.
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}
