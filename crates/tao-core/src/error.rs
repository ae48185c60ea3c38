//! 统一错误类型定义.
//!
//! 所有 Tao crate 共用的错误类型, 支持跨模块传播.
//! 调度核心只在构造阶段失败; 任务级错误以值的形式汇总到帧协调器.

use thiserror::Error;

/// Tao 框架统一错误类型
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaoError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 内存分配失败
    #[error("内存分配失败: {0}")]
    OutOfMemory(String),

    /// 工作线程创建失败
    #[error("工作线程创建失败: {0}")]
    ThreadSpawn(String),

    /// 无效数据 (损坏或缺失的 slice 数据等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 编解码器错误 (由 CTU 解码协作方返回)
    #[error("编解码器错误: {0}")]
    Codec(String),

    /// 帧进度回退, 违反单调性约定
    #[error("帧进度回退: 已报告 {previous}, 新值 {requested}")]
    ProgressRegression { previous: u32, requested: u32 },

    /// 帧已因先前的错误被中止
    #[error("帧已中止")]
    Aborted,

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

/// Tao 框架统一 Result 类型
pub type TaoResult<T> = Result<T, TaoError>;
