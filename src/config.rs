//! 平台配置
//!
//! 在初始化时解析一次; 状态机内部不再对芯片版本做分支.

use crate::error::PowerFault;
use crate::platform::{Cluster, MAX_CORES_PER_CLUSTER};

/// 芯片版本
///
/// R1 交换了两组寄存器所对应的逻辑簇.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiliconRevision {
    R0,
    R1,
}

/// 最后一个核心下电后簇的拆除方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownMode {
    /// 交给周期定时器, 离开下电关键路径
    Deferred,
    /// 在下电路径中立即拆除
    Immediate,
}

/// 簇上电在哪里执行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterBringUp {
    /// 在 `power_up` 中, 先于核心上电
    OnPowerUp,
    /// 在首个入站核心的 `inbound_setup` 中
    OnInbound,
}

/// 核心下电写入的路径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOffPath {
    /// 直接写电源控制寄存器
    Register,
    /// 经由安全监控器调用 (成功时不返回)
    SecureMonitor,
}

/// 平台配置
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// 每簇核心数 (1-4)
    pub cores_per_cluster: usize,

    pub revision: SiliconRevision,

    pub teardown: TeardownMode,

    pub bringup: ClusterBringUp,

    pub power_off: PowerOffPath,

    /// 是否启用安全世界隔离
    pub secure_world: bool,

    /// 簇上下电时是否切换专用PLL
    pub dedicated_pll: bool,

    /// 簇上电应答超时 (us)
    pub cluster_ack_timeout_us: u64,

    /// 中断控制器就绪超时 (us)
    pub irq_ready_timeout_us: u64,

    /// 核心下电确认超时 (us)
    pub core_off_timeout_us: u64,

    /// 簇下电确认超时 (us)
    pub cluster_off_timeout_us: u64,

    /// 延迟拆除定时器周期 (us)
    pub tick_period_us: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            cores_per_cluster: MAX_CORES_PER_CLUSTER,
            revision: SiliconRevision::R0,
            teardown: TeardownMode::Deferred,
            bringup: ClusterBringUp::OnPowerUp,
            power_off: PowerOffPath::Register,
            secure_world: false,
            dedicated_pll: true,
            cluster_ack_timeout_us: 20_000,
            irq_ready_timeout_us: 1_000,
            core_off_timeout_us: 1_000,
            cluster_off_timeout_us: 1_000,
            tick_period_us: 1_000,
        }
    }
}

impl PlatformConfig {
    pub fn validate(&self) -> Result<(), PowerFault> {
        if self.cores_per_cluster == 0 || self.cores_per_cluster > MAX_CORES_PER_CLUSTER {
            return Err(PowerFault::InvalidConfig("cores_per_cluster out of range"));
        }
        if self.tick_period_us == 0 {
            return Err(PowerFault::InvalidConfig("tick period must be non-zero"));
        }
        if self.cluster_ack_timeout_us == 0 || self.irq_ready_timeout_us == 0 {
            return Err(PowerFault::InvalidConfig("power-up timeouts must be non-zero"));
        }
        Ok(())
    }
}

/// 逻辑簇到物理寄存器组的映射
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    halves: [usize; 2],
}

impl RegisterMap {
    pub const fn for_revision(revision: SiliconRevision) -> Self {
        match revision {
            SiliconRevision::R0 => RegisterMap { halves: [0, 1] },
            SiliconRevision::R1 => RegisterMap { halves: [1, 0] },
        }
    }

    /// 逻辑簇所在的物理寄存器组
    #[inline]
    pub fn phys(&self, cluster: Cluster) -> usize {
        self.halves[cluster.index()]
    }
}
