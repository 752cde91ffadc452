//! 中断安全的自旋锁
//!
//! 基于 `spin::Mutex` 的原子比较交换实现, 加锁期间屏蔽本地中断.
//!
//! 该锁不记录持有者: 同一个逻辑CPU编号可能同时在两个物理核心上
//! 执行 (切换窗口期间), 两边都会来获取这把锁. 不要在这里加入
//! 基于持有者的重入检查或断言.

use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

use crate::hal::cpu::{CpuOps, IrqGuard};

pub struct IrqSpinLock<T> {
    inner: Mutex<T>,
}

/// 字段顺序决定析构顺序: 先释放锁, 再恢复中断
pub struct IrqSpinLockGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    _irq: IrqGuard<'a>,
}

impl<T> IrqSpinLock<T> {
    pub const fn new(value: T) -> Self {
        IrqSpinLock { inner: Mutex::new(value) }
    }

    pub fn lock<'a>(&'a self, cpu: &'a dyn CpuOps) -> IrqSpinLockGuard<'a, T> {
        let irq = IrqGuard::new(cpu);
        IrqSpinLockGuard {
            guard: self.inner.lock(),
            _irq: irq,
        }
    }
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
