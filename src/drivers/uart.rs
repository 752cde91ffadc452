//! UART控制台日志
//!
//! RK3588 UART0 (16550兼容) 作为 `log` 后端, 用于输出切换过程和
//! 致命故障前的诊断信息.

use core::fmt;
use core::ptr::{read_volatile, write_volatile};

use lazy_static::lazy_static;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// UART基地址 (默认UART0在RK3588)
pub const UART0_BASE: usize = 0xfeb5_0000;

const UART_THR: usize = 0x0; // 发送保持寄存器
const UART_LSR: usize = 0x14; // 线状态寄存器

/// LSR bit 5: THR空
const LSR_THR_EMPTY: u8 = 0x20;

pub struct Uart {
    base: usize,
}

impl Uart {
    pub const fn new(base: usize) -> Self {
        Uart { base }
    }

    /// 写入一个字节
    pub fn put_char(&self, c: u8) {
        unsafe {
            // 等待发送FIFO非满
            while read_volatile((self.base + UART_LSR) as *const u8) & LSR_THR_EMPTY == 0 {
                core::hint::spin_loop();
            }
            write_volatile((self.base + UART_THR) as *mut u8, c);
        }
    }

    pub fn puts(&self, s: &str) {
        for c in s.bytes() {
            if c == b'\n' {
                self.put_char(b'\r');
            }
            self.put_char(c);
        }
    }
}

impl fmt::Write for Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.puts(s);
        Ok(())
    }
}

lazy_static! {
    pub static ref UART: spin::Mutex<Uart> = spin::Mutex::new(Uart::new(UART0_BASE));
}

/// 输出到 `UART` 的日志器
pub struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        use core::fmt::Write;
        // 致命故障时持锁者可能已经停机, 不能在这里自旋死等
        if let Some(mut uart) = UART.try_lock() {
            let _ = writeln!(uart, "[{:<5}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// 安装控制台日志器
pub fn console_init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
