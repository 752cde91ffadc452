//! AArch64 平台实现
//!
//! `CpuOps` 基于 DAIF / 通用定时器 / 缓存维护指令,
//! `SecureMonitor` 基于 PSCI 固件调用.

use core::arch::asm;

use crate::hal::cpu::CpuOps;
use crate::platform::{Cluster, SecureMonitor};

/// SCTLR_EL1.C: 数据缓存使能
const SCTLR_C: u64 = 1 << 2;

/// PSCI CPU_OFF
const PSCI_CPU_OFF: u32 = 0x8400_0002;

pub struct Aarch64Cpu;

impl Aarch64Cpu {
    /// 获取当前CPU ID (MPIDR_EL1.Aff0)
    #[inline]
    pub fn current_cpu_id() -> usize {
        let mpidr: u64;
        unsafe {
            asm!("mrs {}, mpidr_el1", out(reg) mpidr);
        }
        (mpidr & 0xFF) as usize
    }

    /// 按 set/way 清理并失效L1数据缓存
    fn clean_inval_l1() {
        let ccsidr: u64;
        unsafe {
            // 选择L1数据缓存
            asm!("msr csselr_el1, xzr", "isb");
            asm!("mrs {}, ccsidr_el1", out(reg) ccsidr);
        }

        let line_shift = (ccsidr & 0x7) + 4;
        let ways = ((ccsidr >> 3) & 0x3FF) + 1;
        let sets = ((ccsidr >> 13) & 0x7FFF) + 1;
        let way_shift = (ways as u32 - 1).leading_zeros();

        for way in 0..ways {
            for set in 0..sets {
                let operand = (way << way_shift) | (set << line_shift);
                unsafe {
                    asm!("dc cisw, {}", in(reg) operand);
                }
            }
        }

        unsafe {
            asm!("dsb sy", "isb");
        }
    }
}

impl CpuOps for Aarch64Cpu {
    fn irq_save(&self) -> usize {
        let daif: u64;
        unsafe {
            asm!("mrs {}, daif", "msr daifset, #3", out(reg) daif);
        }
        daif as usize
    }

    fn irq_restore(&self, state: usize) {
        unsafe {
            asm!("msr daif, {}", in(reg) state as u64);
        }
    }

    fn now_us(&self) -> u64 {
        let count: u64;
        let freq: u64;
        unsafe {
            asm!("isb", "mrs {}, cntpct_el0", out(reg) count);
            asm!("mrs {}, cntfrq_el0", out(reg) freq);
        }
        if freq == 0 {
            return 0;
        }
        (count as u128 * 1_000_000 / freq as u128) as u64
    }

    fn relax(&self) {
        unsafe {
            asm!("yield");
        }
    }

    fn quiesce(&self, _core: usize, _cluster: Cluster) {
        // 先关闭数据缓存, 防止清理过程中再分配缓存行
        unsafe {
            let mut sctlr: u64;
            asm!("mrs {}, sctlr_el1", out(reg) sctlr);
            sctlr &= !SCTLR_C;
            asm!("msr sctlr_el1, {}", "isb", in(reg) sctlr);
        }

        Self::clean_inval_l1();

        unsafe {
            asm!("clrex", "dsb sy", "isb");
        }
    }

    fn halt(&self) -> ! {
        loop {
            unsafe {
                asm!("msr daifset, #0xf", "wfe");
            }
        }
    }
}

/// PSCI 调用方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsciMethod {
    Hvc,
    Smc,
}

/// 基于PSCI的安全监控器
pub struct Psci {
    method: PsciMethod,
    /// 厂商定义的安全上下文保存调用号 (SiP)
    save_context_fid: Option<u32>,
}

impl Psci {
    pub const fn new(method: PsciMethod, save_context_fid: Option<u32>) -> Self {
        Psci { method, save_context_fid }
    }

    /// # Safety
    ///
    /// 陷入更高异常级别, 调用者必须运行在 EL1.
    unsafe fn call(&self, fid: u32, arg0: u64, arg1: u64) -> i64 {
        let ret: i64;
        match self.method {
            PsciMethod::Hvc => asm!(
                "hvc #0",
                inlateout("x0") fid as u64 => ret,
                in("x1") arg0,
                in("x2") arg1,
            ),
            PsciMethod::Smc => asm!(
                "smc #0",
                inlateout("x0") fid as u64 => ret,
                in("x1") arg0,
                in("x2") arg1,
            ),
        }
        ret
    }
}

impl SecureMonitor for Psci {
    fn save_context(&self, core: usize, cluster: Cluster) {
        if let Some(fid) = self.save_context_fid {
            // SAFETY: 内核运行在 EL1
            let ret = unsafe { self.call(fid, core as u64, cluster.index() as u64) };
            if ret != 0 {
                log::warn!("secure context save for core {} on {} returned {}", core, cluster, ret);
            }
        }
    }

    fn cpu_off(&self, core: usize, cluster: Cluster) {
        // SAFETY: 内核运行在 EL1; 成功时不返回
        let ret = unsafe { self.call(PSCI_CPU_OFF, 0, 0) };
        log::error!("PSCI CPU_OFF returned {} on core {} / {}", ret, core, cluster);
    }
}
