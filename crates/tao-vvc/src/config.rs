//! 调度器配置.

use serde::{Deserialize, Serialize};
use tao_core::{TaoError, TaoResult};

/// 线程数与槽位数的上限
pub const MAX_THREADS: usize = 256;

/// 调度器配置
///
/// 所有字段都有默认值, 从 JSON 反序列化时可以只给出部分字段.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 允许同时在途的帧数 (帧级并行度)
    pub frame_threads: usize,
    /// 工作线程数, 0 表示按帧级并行度推导
    pub worker_threads: usize,
    /// 帧上下文环的大小, 0 表示与工作线程数相同
    pub frame_slots: usize,
}

/// 按 CPU 数推导默认帧级并行度, 推导出的工作线程数不超过 [`MAX_THREADS`]
fn default_frame_threads(parallelism: usize) -> usize {
    parallelism.clamp(1, MAX_THREADS * 2 / 3)
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            frame_threads: default_frame_threads(parallelism),
            worker_threads: 0,
            frame_slots: 0,
        }
    }
}

impl SchedulerConfig {
    /// 指定帧级并行度, 其余取推导值
    pub fn with_frame_threads(frame_threads: usize) -> Self {
        Self {
            frame_threads,
            worker_threads: 0,
            frame_slots: 0,
        }
    }

    /// 实际工作线程数: 约为帧级并行度的 1.5 倍
    pub fn resolved_workers(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            (self.frame_threads * 3 / 2).max(1)
        }
    }

    /// 实际帧上下文环大小
    pub fn resolved_slots(&self) -> usize {
        if self.frame_slots > 0 {
            self.frame_slots
        } else {
            self.resolved_workers()
        }
    }

    /// 校验配置
    ///
    /// 工作线程数与槽位数按推导后的实际值检查.
    pub fn validate(&self) -> TaoResult<()> {
        if self.frame_threads == 0 {
            return Err(TaoError::InvalidArgument("帧级并行度必须大于 0".to_string()));
        }
        for (name, value) in [
            ("frame_threads", self.frame_threads),
            ("worker_threads", self.resolved_workers()),
            ("frame_slots", self.resolved_slots()),
        ] {
            if value > MAX_THREADS {
                return Err(TaoError::InvalidArgument(format!(
                    "{name} 超出上限 {MAX_THREADS}: {value}"
                )));
            }
        }
        Ok(())
    }
}
