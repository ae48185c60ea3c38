//! CTU 解码协作方接口.
//!
//! 调度核心不做任何实际解码, 只在各阶段就绪时调用 [`CtuDecoder`] 的对应方法.
//! 熵解码、变换、预测和滤波算法都在实现方内部.
//!
//! 约定:
//! - 对同一帧的同一 (CTU, 阶段), 每个方法最多被调用一次;
//! - 调用时该阶段的空间依赖已经满足 (帧被中止后不再调用);
//! - 帧间预测如需读取参考帧像素, 必须先通过 `refs` 等待对应行完成.

use std::sync::Arc;

use tao_core::{CtuPos, TaoResult};
use tao_executor::FrameProgress;

/// CTU 解码协作方
pub trait CtuDecoder: Send + Sync + Sized + 'static {
    /// 每帧的解码状态 (图像缓冲区、slice 头等), 由该帧的所有任务共享
    type Picture: Send + Sync + 'static;

    /// 入口点内的熵解码状态
    ///
    /// 熵编码同步模式下, 一行首个 CTU 解析后的状态会被克隆给下一行.
    type EntropyState: Clone + Send + 'static;

    /// 工作线程的临时内存
    type Scratch: Send + 'static;

    /// 为一个工作线程创建临时内存, 每个线程只调用一次
    fn new_scratch(&self) -> Self::Scratch;

    /// 开始解析一个入口点
    ///
    /// `inherited` 为熵编码同步时从上一行继承的状态.
    fn start_entry_point(
        &self,
        picture: &Self::Picture,
        slice: usize,
        entry_point: usize,
        inherited: Option<Self::EntropyState>,
    ) -> TaoResult<Self::EntropyState>;

    /// 解析一个 CTU
    fn parse_ctu(
        &self,
        picture: &Self::Picture,
        pos: CtuPos,
        state: &mut Self::EntropyState,
        scratch: &mut Self::Scratch,
    ) -> TaoResult<()>;

    /// 帧间预测
    fn inter_predict(
        &self,
        _picture: &Self::Picture,
        _pos: CtuPos,
        _refs: &[Arc<FrameProgress>],
        _scratch: &mut Self::Scratch,
    ) -> TaoResult<()> {
        Ok(())
    }

    /// 重建 (帧内预测 + 残差)
    fn reconstruct(
        &self,
        picture: &Self::Picture,
        pos: CtuPos,
        scratch: &mut Self::Scratch,
    ) -> TaoResult<()>;

    /// 亮度映射与色度缩放
    fn lmcs(
        &self,
        _picture: &Self::Picture,
        _pos: CtuPos,
        _scratch: &mut Self::Scratch,
    ) -> TaoResult<()> {
        Ok(())
    }

    /// 垂直边去块
    fn deblock_vertical(
        &self,
        _picture: &Self::Picture,
        _pos: CtuPos,
        _scratch: &mut Self::Scratch,
    ) -> TaoResult<()> {
        Ok(())
    }

    /// 水平边去块
    fn deblock_horizontal(
        &self,
        _picture: &Self::Picture,
        _pos: CtuPos,
        _scratch: &mut Self::Scratch,
    ) -> TaoResult<()> {
        Ok(())
    }

    /// 样点自适应偏移
    fn sao(
        &self,
        _picture: &Self::Picture,
        _pos: CtuPos,
        _scratch: &mut Self::Scratch,
    ) -> TaoResult<()> {
        Ok(())
    }

    /// 自适应环路滤波
    fn alf(
        &self,
        _picture: &Self::Picture,
        _pos: CtuPos,
        _scratch: &mut Self::Scratch,
    ) -> TaoResult<()> {
        Ok(())
    }
}
