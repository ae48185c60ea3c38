//! 各流水线阶段的执行.
//!
//! 每个阶段调用解码协作方完成一个 CTU 的工作, 在网格上置位, 然后提交被这次置位解锁的后继任务:
//!
//! | 阶段 | 粒度 | 后继 |
//! |---|---|---|
//! | Parse | 入口点内逐 CTU | 每个 CTU 的 Inter |
//! | Inter | 单个 CTU | 行首 CTU 提交整行 Recon 扫描 |
//! | Recon | 按行扫描 | 每个 CTU 的 Lmcs |
//! | Lmcs | 单个 CTU | 行首 CTU 提交整行 DeblockV 扫描 |
//! | DeblockV | 按行扫描 | 首行 CTU 提交整列 DeblockH 扫描 |
//! | DeblockH | 按列扫描 | 首列 CTU 提交整行 Sao 扫描 |
//! | Sao | 按行扫描 | 角点/边缘触发的 Alf |
//! | Alf | 单个 CTU | 整行完成时推进帧进度 |
//!
//! 扫描类阶段在后续格子已就绪时继续向前推进, 遇到未就绪的格子即停止,
//! 以 [`StageOutcome::Resubmit`] 把新的扫描位置交还调用方重新提交.

use std::sync::Arc;

use log::trace;
use tao_core::{CtuPos, TaoResult};

use crate::context::FrameContext;
use crate::decoder::CtuDecoder;
use crate::task::{ParseCursor, TaskKind, TaskStage};

/// 一次阶段执行的结果
#[derive(Debug)]
pub(crate) enum StageOutcome<S> {
    /// 负责的工作全部完成
    Done,
    /// 扫描被未就绪的格子截断, 需要以新的位置重新提交
    Resubmit(TaskKind<S>),
}

/// 阶段执行器: 一次任务执行期间借用的全部状态
pub(crate) struct StageRunner<'a, D: CtuDecoder> {
    decoder: &'a D,
    frame: &'a Arc<FrameContext<D>>,
    scratch: &'a mut D::Scratch,
    spawn: &'a dyn Fn(TaskKind<D::EntropyState>),
}

type Outcome<D> = TaoResult<StageOutcome<<D as CtuDecoder>::EntropyState>>;

impl<'a, D: CtuDecoder> StageRunner<'a, D> {
    /// `spawn` 用于提交后继任务, 由调用方负责登记到帧协调器
    pub(crate) fn new(
        decoder: &'a D,
        frame: &'a Arc<FrameContext<D>>,
        scratch: &'a mut D::Scratch,
        spawn: &'a dyn Fn(TaskKind<D::EntropyState>),
    ) -> Self {
        Self {
            decoder,
            frame,
            scratch,
            spawn,
        }
    }

    /// 按阶段分发
    pub(crate) fn run(&mut self, kind: TaskKind<D::EntropyState>) -> Outcome<D> {
        match kind {
            TaskKind::Parse(cursor) => self.parse(cursor),
            TaskKind::Inter(pos) => self.inter(pos),
            TaskKind::Recon(pos) => self.recon(pos),
            TaskKind::Lmcs(pos) => self.lmcs(pos),
            TaskKind::DeblockV(pos) => self.deblock_v(pos),
            TaskKind::DeblockH(pos) => self.deblock_h(pos),
            TaskKind::Sao(pos) => self.sao(pos),
            TaskKind::Alf(pos) => self.alf(pos),
        }
    }

    fn aborted(&self) -> bool {
        self.frame.thread().is_aborted()
    }

    fn finish(&self, pos: CtuPos, stage: TaskStage) {
        self.frame.grid().mark(pos, stage);
        trace!(
            "帧 {} CTU {} 完成 {}",
            self.frame.decode_order(),
            pos,
            stage
        );
    }

    // ============================================================
    // 熵解码
    // ============================================================

    fn parse(&mut self, mut cursor: ParseCursor<D::EntropyState>) -> Outcome<D> {
        let frame = self.frame;
        let layout = frame.layout();
        let slice = &layout.slices[cursor.slice];
        let picture = frame.picture();

        while cursor.next < cursor.end {
            if self.aborted() {
                return Ok(StageOutcome::Done);
            }
            let pos = slice.ctus[cursor.next];
            if !frame.parse_ready(pos, cursor.slice) {
                return Ok(StageOutcome::Resubmit(TaskKind::Parse(cursor)));
            }

            let state = match cursor.state.as_mut() {
                Some(state) => state,
                None => {
                    let inherited = if layout.entropy_sync {
                        frame.take_sync_state(pos.y - 1, cursor.slice)
                    } else {
                        None
                    };
                    trace!(
                        "帧 {} 开始 slice {} 入口点 {} (继承状态: {})",
                        frame.decode_order(),
                        cursor.slice,
                        cursor.entry_point,
                        inherited.is_some()
                    );
                    let state = self.decoder.start_entry_point(
                        picture,
                        cursor.slice,
                        cursor.entry_point,
                        inherited,
                    )?;
                    cursor.state.insert(state)
                }
            };

            self.decoder.parse_ctu(picture, pos, state, self.scratch)?;
            // 状态必须在置位之前交出, 下一行在看到置位后才会取用
            if layout.entropy_sync && pos.x == 0 {
                frame.store_sync_state(pos.y, cursor.slice, state.clone());
            }
            self.finish(pos, TaskStage::Parse);
            (self.spawn)(TaskKind::Inter(pos));
            cursor.next += 1;
        }
        Ok(StageOutcome::Done)
    }

    // ============================================================
    // 预测与重建
    // ============================================================

    fn inter(&mut self, pos: CtuPos) -> Outcome<D> {
        let frame = self.frame;
        self.decoder
            .inter_predict(frame.picture(), pos, frame.refs(), self.scratch)?;
        self.finish(pos, TaskStage::Inter);
        if pos.x == 0 {
            (self.spawn)(TaskKind::Recon(pos));
        }
        Ok(StageOutcome::Done)
    }

    fn recon(&mut self, start: CtuPos) -> Outcome<D> {
        let frame = self.frame;
        let grid = frame.grid();
        for x in start.x..grid.width() {
            let pos = CtuPos::new(x, start.y);
            if self.aborted() {
                return Ok(StageOutcome::Done);
            }
            if !grid.recon_ready(pos) {
                return Ok(StageOutcome::Resubmit(TaskKind::Recon(pos)));
            }
            self.decoder.reconstruct(frame.picture(), pos, self.scratch)?;
            self.finish(pos, TaskStage::Recon);
            (self.spawn)(TaskKind::Lmcs(pos));
        }
        Ok(StageOutcome::Done)
    }

    fn lmcs(&mut self, pos: CtuPos) -> Outcome<D> {
        self.decoder.lmcs(self.frame.picture(), pos, self.scratch)?;
        self.finish(pos, TaskStage::Lmcs);
        if pos.x == 0 {
            (self.spawn)(TaskKind::DeblockV(pos));
        }
        Ok(StageOutcome::Done)
    }

    // ============================================================
    // 环路滤波
    // ============================================================

    fn deblock_v(&mut self, start: CtuPos) -> Outcome<D> {
        let frame = self.frame;
        let grid = frame.grid();
        for x in start.x..grid.width() {
            let pos = CtuPos::new(x, start.y);
            if self.aborted() {
                return Ok(StageOutcome::Done);
            }
            if !grid.deblock_v_ready(pos) {
                return Ok(StageOutcome::Resubmit(TaskKind::DeblockV(pos)));
            }
            self.decoder
                .deblock_vertical(frame.picture(), pos, self.scratch)?;
            self.finish(pos, TaskStage::DeblockV);
            if pos.y == 0 {
                (self.spawn)(TaskKind::DeblockH(pos));
            }
        }
        Ok(StageOutcome::Done)
    }

    fn deblock_h(&mut self, start: CtuPos) -> Outcome<D> {
        let frame = self.frame;
        let grid = frame.grid();
        for y in start.y..grid.height() {
            let pos = CtuPos::new(start.x, y);
            if self.aborted() {
                return Ok(StageOutcome::Done);
            }
            if !grid.deblock_h_ready(pos) {
                return Ok(StageOutcome::Resubmit(TaskKind::DeblockH(pos)));
            }
            self.decoder
                .deblock_horizontal(frame.picture(), pos, self.scratch)?;
            self.finish(pos, TaskStage::DeblockH);
            if pos.x == 0 {
                (self.spawn)(TaskKind::Sao(pos));
            }
        }
        Ok(StageOutcome::Done)
    }

    fn sao(&mut self, start: CtuPos) -> Outcome<D> {
        let frame = self.frame;
        let grid = frame.grid();
        for x in start.x..grid.width() {
            let pos = CtuPos::new(x, start.y);
            if self.aborted() {
                return Ok(StageOutcome::Done);
            }
            if !grid.sao_ready(pos) {
                return Ok(StageOutcome::Resubmit(TaskKind::Sao(pos)));
            }
            self.decoder.sao(frame.picture(), pos, self.scratch)?;
            self.finish(pos, TaskStage::Sao);
            for alf in alf_unlocked_by(pos, grid.width(), grid.height()) {
                (self.spawn)(TaskKind::Alf(alf));
            }
        }
        Ok(StageOutcome::Done)
    }

    fn alf(&mut self, pos: CtuPos) -> Outcome<D> {
        self.decoder.alf(self.frame.picture(), pos, self.scratch)?;
        self.finish(pos, TaskStage::Alf);
        self.frame.finish_alf_ctu(pos.y)?;
        Ok(StageOutcome::Done)
    }
}

/// SAO 完成 `pos` 后 3x3 邻域已全部完成 SAO 的 ALF 位置
///
/// 左上角点总是被解锁; 位于最后一列/最后一行时, 同时解锁不再有右侧/下方邻居的格子.
/// 每个格子恰好由一个 SAO 位置解锁.
pub(crate) fn alf_unlocked_by(pos: CtuPos, width: i32, height: i32) -> Vec<CtuPos> {
    let last_col = pos.x == width - 1;
    let last_row = pos.y == height - 1;
    let mut unlocked = Vec::with_capacity(4);
    if pos.x >= 1 && pos.y >= 1 {
        unlocked.push(pos.offset(-1, -1));
    }
    if last_col && pos.y >= 1 {
        unlocked.push(pos.above());
    }
    if last_row && pos.x >= 1 {
        unlocked.push(pos.left());
    }
    if last_col && last_row {
        unlocked.push(pos);
    }
    unlocked
}
