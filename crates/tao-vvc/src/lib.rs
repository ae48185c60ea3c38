//! # tao-vvc
//!
//! VVC (H.266) 解码器的帧线程调度层.
//!
//! 一帧被拆成 CTU 粒度的流水线任务 (解析、帧间预测、重建、LMCS、两次去块、SAO、ALF),
//! 在共享的工作线程池上以波前方式并行执行. 本 crate 只负责依赖跟踪与调度,
//! 实际的解码算法由 [`CtuDecoder`] 的实现方提供.
//!
//! 主要组成:
//! - [`TaskGrid`]: 每帧一张的 CTU 原子位集网格, 记录各阶段的完成情况;
//! - [`FrameThread`]: 帧协调器, 统计在途任务、保存第一个错误;
//! - [`VvcScheduler`]: 对解码前端暴露的逐帧接口.

pub mod config;
pub mod context;
pub mod decoder;
pub mod frame_thread;
pub mod grid;
pub mod layout;
pub mod scheduler;
mod stages;
pub mod task;

pub use config::SchedulerConfig;
pub use context::FrameContext;
pub use decoder::CtuDecoder;
pub use frame_thread::{FrameStats, FrameThread};
pub use grid::{StageSet, TaskGrid};
pub use layout::{PictureLayout, SliceLayout};
pub use scheduler::{FrameHandle, StageDispatch, VvcScheduler};
pub use task::{TaskStage, VvcTask};
