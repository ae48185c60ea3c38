//! # Tao 调度 (tao-sched)
//!
//! 纯 Rust 实现的 VVC 解码器 CTU 并行调度引擎.
//!
//! 一帧被拆成 CTU 粒度的流水线任务, 在固定大小的工作线程池上以波前方式执行;
//! 多个帧可以同时在途, 较早的帧总是优先. 实际解码算法通过 [`vvc::CtuDecoder`] 接入.
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use tao_sched::vvc::{PictureLayout, SchedulerConfig};
//!
//! let config = SchedulerConfig::with_frame_threads(2);
//! let layout = PictureLayout::single_slice(1920, 1080, 7, true);
//! println!(
//!     "工作线程 {}, 网格 {}x{} CTU",
//!     config.resolved_workers(),
//!     layout.width_ctus(),
//!     layout.height_ctus()
//! );
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `tao-core` | 错误类型与 CTU 坐标 |
//! | `tao-executor` | 通用任务执行器与帧进度计数器 |
//! | `tao-vvc` | CTU 依赖网格、阶段执行、帧协调与调度器入口 |

pub mod config;

/// 错误类型与 CTU 坐标
pub use tao_core as core;

/// 通用任务执行器与帧进度
pub use tao_executor as executor;

/// VVC 帧线程调度
pub use tao_vvc as vvc;

pub use config::{load_config, save_config};

/// 获取版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
