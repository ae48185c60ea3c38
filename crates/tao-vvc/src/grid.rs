//! CTU 任务依赖网格.
//!
//! 每帧一张网格, 每个 CTU 一个原子位集, 每个流水线阶段占一位.
//! 位只会被置上, 在帧的生命周期内从不清除; 只有持有网格独占引用时
//! (帧上下文被回收复用) 才能整体清零.
//!
//! 每个 (CTU, 阶段) 只有一个负责写入的执行者, 但任意工作线程都可能读取任意格子,
//! 因此格子本身是原子的, 格子之间不需要加锁.
//!
//! 越界查询的约定:
//! - 行或列为负: 视为已完成 (帧的上/左边界之外没有依赖);
//! - 超出右/下边界: 夹到最后一列/最后一行.

use std::sync::atomic::{AtomicU8, Ordering};

use bitflags::bitflags;
use tao_core::CtuPos;

use crate::task::TaskStage;

bitflags! {
    /// 已完成的流水线阶段集合
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StageSet: u8 {
        const PARSE = 1 << 0;
        const INTER = 1 << 1;
        const RECON = 1 << 2;
        const LMCS = 1 << 3;
        const DEBLOCK_V = 1 << 4;
        const DEBLOCK_H = 1 << 5;
        const SAO = 1 << 6;
        const ALF = 1 << 7;
    }
}

/// 单个 CTU 的完成状态
///
/// 只提供 "置位并返回旧值" 与读取操作, 不提供清除.
#[derive(Debug, Default)]
pub struct CtuProgress(AtomicU8);

impl CtuProgress {
    /// 读取已完成的阶段
    pub fn load(&self) -> StageSet {
        StageSet::from_bits_retain(self.0.load(Ordering::Acquire))
    }

    /// 标记阶段完成, 返回标记前的集合
    pub fn mark(&self, stage: TaskStage) -> StageSet {
        StageSet::from_bits_retain(self.0.fetch_or(stage.bit().bits(), Ordering::AcqRel))
    }

    /// 阶段是否已完成
    pub fn contains(&self, stage: TaskStage) -> bool {
        self.load().contains(stage.bit())
    }
}

/// 每帧的 CTU 依赖网格
#[derive(Debug)]
pub struct TaskGrid {
    width: i32,
    height: i32,
    cells: Vec<CtuProgress>,
}

impl TaskGrid {
    /// 创建 `width` x `height` 个 CTU 的网格, 所有位清零
    pub fn new(width: u32, height: u32) -> Self {
        let mut grid = Self {
            width: 0,
            height: 0,
            cells: Vec::new(),
        };
        grid.reset(width, height);
        grid
    }

    /// 为新帧复用网格: 调整尺寸并清零所有位
    ///
    /// 需要独占引用, 因此不可能与任何读取并发.
    pub fn reset(&mut self, width: u32, height: u32) {
        let count = width as usize * height as usize;
        self.width = width as i32;
        self.height = height as i32;
        self.cells.truncate(count);
        for cell in &mut self.cells {
            *cell.0.get_mut() = 0;
        }
        self.cells.resize_with(count, CtuProgress::default);
    }

    /// 网格宽度 (CTU)
    pub fn width(&self) -> i32 {
        self.width
    }

    /// 网格高度 (CTU)
    pub fn height(&self) -> i32 {
        self.height
    }

    /// 坐标是否在网格内
    pub fn contains(&self, pos: CtuPos) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.width && pos.y < self.height
    }

    /// 网格内的格子
    pub fn cell(&self, pos: CtuPos) -> Option<&CtuProgress> {
        if self.contains(pos) {
            self.cells.get(pos.raster_index(self.width))
        } else {
            None
        }
    }

    /// 读取格子的已完成阶段, 网格外返回空集
    pub fn stages(&self, pos: CtuPos) -> StageSet {
        self.cell(pos).map(CtuProgress::load).unwrap_or_default()
    }

    /// 标记阶段完成, 返回标记前的集合
    ///
    /// 网格外的坐标被忽略.
    pub fn mark(&self, pos: CtuPos, stage: TaskStage) -> StageSet {
        match self.cell(pos) {
            Some(cell) => {
                let previous = cell.mark(stage);
                debug_assert!(
                    !previous.contains(stage.bit()),
                    "CTU {pos} 的阶段 {stage} 被重复标记"
                );
                previous
            }
            None => StageSet::empty(),
        }
    }

    /// 依赖查询: 负坐标视为已完成, 越过右/下边界则夹到最后一列/行
    pub fn is_done(&self, pos: CtuPos, stage: TaskStage) -> bool {
        if pos.x < 0 || pos.y < 0 || self.cells.is_empty() {
            return true;
        }
        let clamped = CtuPos::new(pos.x.min(self.width - 1), pos.y.min(self.height - 1));
        self.cells[clamped.raster_index(self.width)].contains(stage)
    }

    /// 按光栅顺序找到第一个缺少某阶段的 CTU
    pub fn first_missing(&self, stage: TaskStage) -> Option<CtuPos> {
        self.cells
            .iter()
            .position(|cell| !cell.contains(stage))
            .map(|index| {
                let index = index as i32;
                CtuPos::new(index % self.width, index / self.width)
            })
    }

    /// 所有 CTU 是否都已完成某阶段
    pub fn all_done(&self, stage: TaskStage) -> bool {
        self.first_missing(stage).is_none()
    }

    // ============================================================
    // 各阶段的就绪判定
    // ============================================================

    /// 熵编码同步开启时, 非 slice 首行的 CTU 需要正上方 CTU 已完成解析
    pub fn parse_ready(&self, pos: CtuPos, entropy_sync: bool, slice_first_row: i32) -> bool {
        if !entropy_sync || pos.y == slice_first_row {
            return true;
        }
        self.is_done(pos.above(), TaskStage::Parse)
    }

    /// 本 CTU 帧间预测完成, 右上与左侧 CTU 重建完成
    pub fn recon_ready(&self, pos: CtuPos) -> bool {
        self.is_done(pos, TaskStage::Inter)
            && self.is_done(pos.offset(1, -1), TaskStage::Recon)
            && self.is_done(pos.left(), TaskStage::Recon)
    }

    /// 右下、正下与右侧 CTU 重建完成 (LMCS 比重建滞后一个对角位置)
    pub fn lmcs_ready(&self, pos: CtuPos) -> bool {
        self.is_done(pos.offset(1, 1), TaskStage::Recon)
            && self.is_done(pos.below(), TaskStage::Recon)
            && self.is_done(pos.right(), TaskStage::Recon)
    }

    /// 本 CTU 与右侧 CTU 的 LMCS 完成
    pub fn deblock_v_ready(&self, pos: CtuPos) -> bool {
        self.is_done(pos, TaskStage::Lmcs) && self.is_done(pos.right(), TaskStage::Lmcs)
    }

    /// 左侧 CTU 水平去块完成, 本 CTU 垂直去块完成
    pub fn deblock_h_ready(&self, pos: CtuPos) -> bool {
        self.is_done(pos.left(), TaskStage::DeblockH) && self.is_done(pos, TaskStage::DeblockV)
    }

    /// 右上 CTU 的 SAO 完成, 左下、正下、右下 CTU 的水平去块完成
    pub fn sao_ready(&self, pos: CtuPos) -> bool {
        self.is_done(pos.offset(1, -1), TaskStage::Sao)
            && self.is_done(pos.offset(-1, 1), TaskStage::DeblockH)
            && self.is_done(pos.below(), TaskStage::DeblockH)
            && self.is_done(pos.offset(1, 1), TaskStage::DeblockH)
    }
}
