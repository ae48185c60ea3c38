//! 帧上下文与帧上下文环.
//!
//! 每个在途帧一个 [`FrameContext`]: 布局、依赖网格、协调器、进度计数器以及
//! 阶段执行需要的逐行簿记. 上下文按解码顺序放在一个环里复用;
//! 只有当环中旧上下文已无任何引用时才原地重置, 否则分配新的.
//!
//! 帧进度的终止值每帧恰好报告一次: 正常结束时在排空之后, 中止时则立即报告,
//! 让等待该帧作参考的后续帧不会占住工作线程.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace};
use tao_core::{CtuPos, TaoError, TaoResult};
use tao_executor::{FrameProgress, PROGRESS_DONE};

use crate::decoder::CtuDecoder;
use crate::frame_thread::FrameThread;
use crate::grid::TaskGrid;
use crate::layout::PictureLayout;
use crate::task::TaskStage;

/// 熵编码同步时交给下一行的状态: (slice 下标, 状态)
type SyncSlot<S> = Mutex<Option<(usize, S)>>;

/// 帧进度的发布状态
#[derive(Debug, Default)]
struct ProgressState {
    /// 连续完成 ALF 的行数
    rows: u32,
    /// 终止值已报告
    terminal: bool,
}

/// 一个在途帧的全部调度状态
pub struct FrameContext<D: CtuDecoder> {
    decode_order: u64,
    layout: PictureLayout,
    slice_map: Vec<Option<u32>>,
    picture: D::Picture,
    refs: Vec<Arc<FrameProgress>>,
    progress: Arc<FrameProgress>,
    grid: TaskGrid,
    thread: FrameThread,
    /// 每行已完成 ALF 的 CTU 数
    alf_rows: Vec<AtomicU32>,
    published: Mutex<ProgressState>,
    sync_states: Vec<SyncSlot<D::EntropyState>>,
}

impl<D: CtuDecoder> FrameContext<D> {
    pub(crate) fn new(
        decode_order: u64,
        layout: PictureLayout,
        slice_map: Vec<Option<u32>>,
        picture: D::Picture,
        refs: Vec<Arc<FrameProgress>>,
    ) -> Self {
        let grid = TaskGrid::new(layout.width_ctus(), layout.height_ctus());
        let rows = layout.height_ctus() as usize;
        Self {
            decode_order,
            layout,
            slice_map,
            picture,
            refs,
            progress: Arc::new(FrameProgress::new()),
            grid,
            thread: FrameThread::new(),
            alf_rows: (0..rows).map(|_| AtomicU32::new(0)).collect(),
            published: Mutex::new(ProgressState::default()),
            sync_states: (0..rows).map(|_| Mutex::new(None)).collect(),
        }
    }

    /// 为新帧原地复用, 所有逐帧状态清零
    pub(crate) fn reinit(
        &mut self,
        decode_order: u64,
        layout: PictureLayout,
        slice_map: Vec<Option<u32>>,
        picture: D::Picture,
        refs: Vec<Arc<FrameProgress>>,
    ) {
        let rows = layout.height_ctus() as usize;
        self.grid.reset(layout.width_ctus(), layout.height_ctus());
        self.thread.reset();
        self.decode_order = decode_order;
        self.layout = layout;
        self.slice_map = slice_map;
        self.picture = picture;
        self.refs = refs;
        // 旧的进度计数器可能仍被后续帧引用, 不能复用
        self.progress = Arc::new(FrameProgress::new());
        self.alf_rows.truncate(rows);
        for row in &mut self.alf_rows {
            *row.get_mut() = 0;
        }
        self.alf_rows.resize_with(rows, || AtomicU32::new(0));
        *self
            .published
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) = ProgressState::default();
        self.sync_states.truncate(rows);
        for slot in &mut self.sync_states {
            *slot.get_mut().unwrap_or_else(PoisonError::into_inner) = None;
        }
        self.sync_states.resize_with(rows, || Mutex::new(None));
    }

    /// 解码顺序
    pub fn decode_order(&self) -> u64 {
        self.decode_order
    }

    pub fn layout(&self) -> &PictureLayout {
        &self.layout
    }

    pub fn picture(&self) -> &D::Picture {
        &self.picture
    }

    /// 参考帧的进度计数器
    pub fn refs(&self) -> &[Arc<FrameProgress>] {
        &self.refs
    }

    pub fn progress(&self) -> &Arc<FrameProgress> {
        &self.progress
    }

    pub fn grid(&self) -> &TaskGrid {
        &self.grid
    }

    pub fn thread(&self) -> &FrameThread {
        &self.thread
    }

    /// CTU 所属的 slice, 未被覆盖 (数据缺失) 时为 None
    pub fn slice_of(&self, pos: CtuPos) -> Option<usize> {
        if !self.grid.contains(pos) {
            return None;
        }
        self.slice_map
            .get(pos.raster_index(self.grid.width()))
            .copied()
            .flatten()
            .map(|idx| idx as usize)
    }

    /// 解析任务的就绪判定
    ///
    /// 正上方 CTU 不属于任何 slice 时不会有数据到达, 不作为依赖.
    pub(crate) fn parse_ready(&self, pos: CtuPos, slice: usize) -> bool {
        let above = pos.above();
        if self.grid.contains(above) && self.slice_of(above).is_none() {
            return true;
        }
        let first_row = self.layout.slices[slice].first_row();
        self.grid
            .parse_ready(pos, self.layout.entropy_sync, first_row)
    }

    /// 按光栅顺序找到第一个未解析的 CTU
    pub fn first_unparsed(&self) -> Option<CtuPos> {
        self.grid.first_missing(TaskStage::Parse)
    }

    /// 保存某行的熵解码状态, 供下一行继承
    pub(crate) fn store_sync_state(&self, row: i32, slice: usize, state: D::EntropyState) {
        if let Some(slot) = self.sync_states.get(row as usize) {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some((slice, state));
        }
    }

    /// 取出上一行保存的熵解码状态, 不属于同一 slice 时丢弃
    pub(crate) fn take_sync_state(&self, row: i32, slice: usize) -> Option<D::EntropyState> {
        if row < 0 {
            return None;
        }
        let slot = self.sync_states.get(row as usize)?;
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.take() {
            Some((owner, state)) if owner == slice => Some(state),
            other => {
                *slot = other;
                None
            }
        }
    }

    fn lock_published(&self) -> MutexGuard<'_, ProgressState> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 一个 CTU 的 ALF 完成; 整行完成时推进帧进度
    ///
    /// 进度按连续完成的行推进, 以样本行计, 保证单调. 终止值报告之后不再更新.
    pub(crate) fn finish_alf_ctu(&self, row: i32) -> TaoResult<()> {
        let Some(counter) = self.alf_rows.get(row as usize) else {
            return Ok(());
        };
        let width = self.grid.width() as u32;
        if counter.fetch_add(1, Ordering::AcqRel) + 1 != width {
            return Ok(());
        }

        let mut published = self.lock_published();
        let before = published.rows;
        while let Some(next) = self.alf_rows.get(published.rows as usize) {
            if next.load(Ordering::Acquire) != width {
                break;
            }
            published.rows += 1;
        }
        if published.rows == before || published.terminal {
            return Ok(());
        }
        let samples = (published.rows * self.layout.ctu_size()).min(self.layout.height);
        trace!(
            "帧 {} 进度推进到第 {} 行 CTU ({} 样本行)",
            self.decode_order,
            published.rows,
            samples
        );
        self.progress.report(samples)
    }

    /// 报告终止进度, 每帧只有第一次调用生效
    pub(crate) fn report_done(&self) -> bool {
        let mut published = self.lock_published();
        if published.terminal {
            return false;
        }
        published.terminal = true;
        // 终止值不会被拒绝
        let _ = self.progress.report(PROGRESS_DONE);
        true
    }

    /// 中止该帧: 记录错误 (首个错误胜出) 并立即释放等待该帧进度的后续帧
    pub(crate) fn abort(&self, err: TaoError) -> bool {
        let won = self.thread.report_error(err);
        if won {
            self.report_done();
        }
        won
    }
}

/// 帧上下文环
pub(crate) struct FramePool<D: CtuDecoder> {
    slots: Vec<Option<Arc<FrameContext<D>>>>,
}

impl<D: CtuDecoder> FramePool<D> {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            slots: (0..size.max(1)).map(|_| None).collect(),
        }
    }

    /// 为解码顺序为 `decode_order` 的帧取得上下文
    ///
    /// 环中对应位置的旧上下文若已无其他引用则原地重置复用, 否则分配新的.
    pub(crate) fn acquire(
        &mut self,
        decode_order: u64,
        layout: PictureLayout,
        slice_map: Vec<Option<u32>>,
        picture: D::Picture,
        refs: Vec<Arc<FrameProgress>>,
    ) -> Arc<FrameContext<D>> {
        let index = (decode_order % self.slots.len() as u64) as usize;
        if let Some(mut ctx) = self.slots[index].take() {
            if let Some(inner) = Arc::get_mut(&mut ctx) {
                inner.reinit(decode_order, layout, slice_map, picture, refs);
                debug!("帧 {} 复用帧上下文槽位 {}", decode_order, index);
                self.slots[index] = Some(Arc::clone(&ctx));
                return ctx;
            }
            debug!(
                "帧上下文槽位 {} 仍被占用, 为帧 {} 分配新上下文",
                index, decode_order
            );
        }
        let ctx = Arc::new(FrameContext::new(
            decode_order,
            layout,
            slice_map,
            picture,
            refs,
        ));
        self.slots[index] = Some(Arc::clone(&ctx));
        ctx
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
