//! 外部协作者接口
//!
//! 迁移框架、互连一致性驱动、时钟多路选择器、安全监控器和
//! 延迟定时器都由平台提供, 本模块只定义它们的接口边界.

use core::fmt;

use crate::hal::cpu::CpuOps;
use crate::hal::regs::PowerRegs;

/// 簇数量 (大核 + 小核)
pub const MAX_CLUSTERS: usize = 2;

/// 每个簇的最大核心槽位数
pub const MAX_CORES_PER_CLUSTER: usize = 4;

/// 逻辑簇编号
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cluster {
    /// 高性能簇 (A76)
    Big = 0,
    /// 低功耗簇 (A55)
    Little = 1,
}

impl Cluster {
    pub const ALL: [Cluster; MAX_CLUSTERS] = [Cluster::Big, Cluster::Little];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// 切换时的对端簇
    #[inline]
    pub const fn other(self) -> Cluster {
        match self {
            Cluster::Big => Cluster::Little,
            Cluster::Little => Cluster::Big,
        }
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cluster::Big => write!(f, "big"),
            Cluster::Little => write!(f, "little"),
        }
    }
}

/// 簇电源状态 (由迁移框架持有)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterPowerState {
    Up,
    Down,
}

/// 迁移框架
///
/// 决定何时切换, 并持有 `ClusterPowerState`. 只能通过
/// enter/leave 临界区握手改变簇状态.
pub trait MigrationFramework: Sync {
    /// 核心开始下电前的通知 (无返回值)
    fn notify_going_down(&self, core: usize, cluster: Cluster);

    /// 进入簇临界区; 返回 `true` 表示调用者独占拆除簇的决定
    fn enter_cluster_critical(&self, core: usize, cluster: Cluster) -> bool;

    /// 离开簇临界区, 并记录新的簇状态
    fn leave_cluster_critical(&self, cluster: Cluster, state: ClusterPowerState);

    fn cluster_power_state(&self, cluster: Cluster) -> ClusterPowerState;

    /// 逻辑CPU当前运行在哪个簇上
    fn running_cluster_of(&self, core: usize) -> Cluster;

    /// 安装核心上电后的入口向量, 返回入口地址
    fn power_up_setup(&self) -> usize;
}

/// 互连一致性 (snoop) 控制
pub trait Interconnect: Sync {
    fn enable_snoop(&self, cluster: Cluster);
    fn disable_snoop(&self, cluster: Cluster);
}

/// 簇时钟源选择
pub trait ClockMux: Sync {
    /// 切换到簇专用PLL
    fn select_pll(&self, cluster: Cluster);
    /// 切回共享参考时钟
    fn select_reference(&self, cluster: Cluster);
}

/// 安全世界接口
pub trait SecureMonitor: Sync {
    /// 触发外出核心的安全上下文保存点 (不等待结果)
    fn save_context(&self, core: usize, cluster: Cluster);

    /// 通过安全监控器关闭调用者所在核心.
    ///
    /// 真实固件上成功时不会返回.
    fn cpu_off(&self, core: usize, cluster: Cluster);
}

/// 延迟拆除定时器
pub trait DeferredTimer: Sync {
    /// `period_us` 微秒后调用一次 `Coordinator::tick`
    fn arm(&self, period_us: u64);
}

/// 协调器所依赖的全部平台对象
#[derive(Clone, Copy)]
pub struct Platform<'a> {
    pub regs: &'a dyn PowerRegs,
    pub cpu: &'a dyn CpuOps,
    pub framework: &'a dyn MigrationFramework,
    pub interconnect: &'a dyn Interconnect,
    pub clock: &'a dyn ClockMux,
    pub secure: &'a dyn SecureMonitor,
    pub timer: &'a dyn DeferredTimer,
}
