//! # tao-core
//!
//! Tao 调度框架核心库, 提供统一错误类型与 CTU 网格坐标.
//!
//! 本 crate 对标 FFmpeg 的 libavutil, 为执行器与 VVC 帧线程模块提供底层基础设施.

pub mod ctu;
pub mod error;

// 重导出常用类型
pub use ctu::CtuPos;
pub use error::{TaoError, TaoResult};
