//! 帧进度跟踪.
//!
//! 每个在途帧一个计数器, 表示 "已完成重建的样本行数". 计数器单调不减,
//! 每次更新都会广播. 引用该帧的后续帧在帧间预测前阻塞等待所需的行.
//!
//! 帧结束时 (包括出错路径) 必须以 [`PROGRESS_DONE`] 报告一次, 否则等待方永远无法返回.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use log::error;
use tao_core::{TaoError, TaoResult};

/// 终止值: 帧已全部解码
pub const PROGRESS_DONE: u32 = u32::MAX;

/// 单调递增的帧进度计数器
#[derive(Debug, Default)]
pub struct FrameProgress {
    value: Mutex<u32>,
    cond: Condvar,
}

impl FrameProgress {
    /// 创建进度为 0 的计数器 (尚无任何行完成)
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, u32> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 报告新的进度值并唤醒所有等待方
    ///
    /// 新值小于已报告值 (且不是终止值) 时拒绝更新并返回
    /// [`TaoError::ProgressRegression`].
    pub fn report(&self, n: u32) -> TaoResult<()> {
        let mut value = self.lock();
        if n < *value && n != PROGRESS_DONE {
            error!("帧进度回退: 已报告 {}, 新值 {}", *value, n);
            return Err(TaoError::ProgressRegression {
                previous: *value,
                requested: n,
            });
        }
        *value = n;
        drop(value);
        self.cond.notify_all();
        Ok(())
    }

    /// 阻塞直到第 `n` 行已完成, 即计数器不小于 `n + 1`
    ///
    /// 无超时, 依赖报告方在所有路径上最终报告终止值.
    pub fn wait(&self, n: u32) {
        let target = n.saturating_add(1);
        let mut value = self.lock();
        while *value < target {
            value = self
                .cond
                .wait(value)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// 当前进度值
    pub fn current(&self) -> u32 {
        *self.lock()
    }

    /// 是否已报告终止值
    pub fn is_done(&self) -> bool {
        self.current() == PROGRESS_DONE
    }
}
