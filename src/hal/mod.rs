pub mod cpu;
pub mod gic;
pub mod regs;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;

pub use cpu::{poll_until, CpuOps, IrqGuard};
pub use regs::{MmioPowerRegs, PowerRegs, RegSnapshot};
