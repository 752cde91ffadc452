//! 电源切换错误类型
//!
//! `PowerFault` 是不可恢复的故障, 由顶层入口转换为系统停机;
//! `HwTimeout` 仅用于可以重试的硬件等待.

use core::fmt;

use crate::platform::Cluster;

/// 不可恢复的电源状态故障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerFault {
    /// 计数器出现了不可能的状态转换
    InvariantViolation {
        core: usize,
        cluster: Cluster,
        what: &'static str,
    },
    /// 核心槽位超出平台范围
    InvalidSlot { core: usize },
    /// 簇电源应答超时 (上电路径)
    ClusterAckTimeout { cluster: Cluster },
    /// 核心上电后中断控制器未就绪
    CoreNotReady { core: usize, cluster: Cluster },
    /// 平台配置无效
    InvalidConfig(&'static str),
    /// 在线核心数超过槽位总数
    OnlineCountOverflow,
    /// 在线核心数减到负数
    OnlineCountUnderflow,
}

impl fmt::Display for PowerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerFault::InvariantViolation { core, cluster, what } => {
                write!(f, "use-count invariant violated on core {} / {}: {}", core, cluster, what)
            }
            PowerFault::InvalidSlot { core } => write!(f, "core slot {} out of range", core),
            PowerFault::ClusterAckTimeout { cluster } => {
                write!(f, "{} cluster power acknowledge timed out", cluster)
            }
            PowerFault::CoreNotReady { core, cluster } => {
                write!(f, "core {} on {} never reported interrupt readiness", core, cluster)
            }
            PowerFault::InvalidConfig(reason) => write!(f, "invalid platform config: {}", reason),
            PowerFault::OnlineCountOverflow => write!(f, "online core count overflow"),
            PowerFault::OnlineCountUnderflow => write!(f, "online core count underflow"),
        }
    }
}

/// 可重试的硬件等待超时
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwTimeout {
    pub waited_us: u64,
}

impl fmt::Display for HwTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hardware did not respond within {} us", self.waited_us)
    }
}
