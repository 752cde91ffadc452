//! 电源控制寄存器
//!
//! 每核/每簇的电源控制与状态寄存器, 核心启动标志和入口向量.
//! 所有接口使用物理寄存器组编号, 逻辑簇到物理组的映射见
//! `config::RegisterMap`.

use volatile::Volatile;

use crate::hal::gic::GicRedistributor;
use crate::platform::{MAX_CLUSTERS, MAX_CORES_PER_CLUSTER};

/// PMU基地址 (RK3588)
pub const PMU_BASE: usize = 0xfd8d_8000;

/// 寄存器组间距
const GROUP_STRIDE: usize = 0x100;

/// 核心电源控制, 每核4字节
const CORE_PWR_CTRL: usize = 0x00;

/// 核心电源状态, 每核4字节
const CORE_PWR_STATUS: usize = 0x20;

/// 簇电源控制
const CLUSTER_PWR_CTRL: usize = 0x40;

/// 簇电源状态
const CLUSTER_PWR_STATUS: usize = 0x44;

/// 核心启动标志, 每核4字节
const BOOT_FLAG: usize = 0x60;

/// 入口向量 (低/高32位)
const ENTRY_VECTOR_LO: usize = 0x400;
const ENTRY_VECTOR_HI: usize = 0x404;

const PWR_ENABLE: u32 = 1 << 0;
const STATUS_ON: u32 = 1 << 0;
const CLUSTER_ACK: u32 = 1 << 0;

/// 簇状态寄存器中的活动核心掩码 [11:8]
const CLUSTER_ACTIVE_SHIFT: u32 = 8;
const CLUSTER_ACTIVE_MASK: u32 = 0xF;

/// 启动标志魔数: 复位向量据此走切换路径而非冷启动
pub const BOOT_FLAG_SWITCH: u32 = 0x5357_4348;

/// 诊断用寄存器快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegSnapshot {
    pub core_status: [[u32; MAX_CORES_PER_CLUSTER]; MAX_CLUSTERS],
    pub cluster_status: [u32; MAX_CLUSTERS],
}

/// 硬件寄存器操作
pub trait PowerRegs: Sync {
    fn set_core_power(&self, group: usize, core: usize, on: bool);

    fn core_powered(&self, group: usize, core: usize) -> bool;

    fn set_cluster_power(&self, group: usize, on: bool);

    /// 簇电源应答位
    fn cluster_powered(&self, group: usize) -> bool;

    /// 硬件是否仍显示簇内有核心处于活动状态
    fn cluster_cores_active(&self, group: usize) -> bool;

    fn set_boot_flag(&self, group: usize, core: usize, set: bool);

    /// 唤醒核心的中断控制器接口
    fn irq_wake(&self, group: usize, core: usize);

    /// 核心下电前让中断控制器接口进入睡眠
    fn irq_sleep(&self, group: usize, core: usize);

    /// 核心的中断控制器是否已就绪
    fn irq_ready(&self, group: usize, core: usize) -> bool;

    fn set_entry_vector(&self, addr: usize);

    fn snapshot(&self) -> RegSnapshot;
}

/// MMIO实现
pub struct MmioPowerRegs {
    base: usize,
    gic: GicRedistributor,
}

impl MmioPowerRegs {
    /// # Safety
    ///
    /// `base` 必须是已映射的PMU寄存器区域.
    pub const unsafe fn new(base: usize, gic: GicRedistributor) -> Self {
        MmioPowerRegs { base, gic }
    }

    fn reg(&self, group: usize, offset: usize) -> Volatile<&'static mut u32> {
        let addr = self.base + group * GROUP_STRIDE + offset;
        // SAFETY: 地址在构造时保证已映射, 且4字节对齐
        unsafe { Volatile::new(&mut *(addr as *mut u32)) }
    }

    fn global(&self, offset: usize) -> Volatile<&'static mut u32> {
        // SAFETY: 同上
        unsafe { Volatile::new(&mut *((self.base + offset) as *mut u32)) }
    }
}

impl PowerRegs for MmioPowerRegs {
    fn set_core_power(&self, group: usize, core: usize, on: bool) {
        let value = if on { PWR_ENABLE } else { 0 };
        self.reg(group, CORE_PWR_CTRL + core * 4).write(value);
    }

    fn core_powered(&self, group: usize, core: usize) -> bool {
        self.reg(group, CORE_PWR_STATUS + core * 4).read() & STATUS_ON != 0
    }

    fn set_cluster_power(&self, group: usize, on: bool) {
        let value = if on { PWR_ENABLE } else { 0 };
        self.reg(group, CLUSTER_PWR_CTRL).write(value);
    }

    fn cluster_powered(&self, group: usize) -> bool {
        self.reg(group, CLUSTER_PWR_STATUS).read() & CLUSTER_ACK != 0
    }

    fn cluster_cores_active(&self, group: usize) -> bool {
        let status = self.reg(group, CLUSTER_PWR_STATUS).read();
        (status >> CLUSTER_ACTIVE_SHIFT) & CLUSTER_ACTIVE_MASK != 0
    }

    fn set_boot_flag(&self, group: usize, core: usize, set: bool) {
        let value = if set { BOOT_FLAG_SWITCH } else { 0 };
        self.reg(group, BOOT_FLAG + core * 4).write(value);
    }

    fn irq_wake(&self, group: usize, core: usize) {
        self.gic.wake(group * MAX_CORES_PER_CLUSTER + core);
    }

    fn irq_sleep(&self, group: usize, core: usize) {
        self.gic.sleep(group * MAX_CORES_PER_CLUSTER + core);
    }

    fn irq_ready(&self, group: usize, core: usize) -> bool {
        self.gic.is_awake(group * MAX_CORES_PER_CLUSTER + core)
    }

    fn set_entry_vector(&self, addr: usize) {
        let addr = addr as u64;
        self.global(ENTRY_VECTOR_HI).write((addr >> 32) as u32);
        self.global(ENTRY_VECTOR_LO).write(addr as u32);
    }

    fn snapshot(&self) -> RegSnapshot {
        let mut snap = RegSnapshot::default();
        for group in 0..MAX_CLUSTERS {
            for core in 0..MAX_CORES_PER_CLUSTER {
                snap.core_status[group][core] = self.reg(group, CORE_PWR_STATUS + core * 4).read();
            }
            snap.cluster_status[group] = self.reg(group, CLUSTER_PWR_STATUS).read();
        }
        snap
    }
}
