//! 调度任务与优先级.
//!
//! 每个任务属于一个流水线阶段, 对应网格中的一个 CTU, 或一次按行/按列扫描的起点.
//! 阶段以和类型表示, 就绪判定与执行都通过模式匹配分发.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tao_core::{CtuPos, TaoError};

use crate::context::FrameContext;
use crate::decoder::CtuDecoder;
use crate::grid::StageSet;

/// 流水线阶段, 声明顺序即流水线顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskStage {
    /// 熵解码
    Parse,
    /// 帧间预测
    Inter,
    /// 重建
    Recon,
    /// 亮度映射与色度缩放
    Lmcs,
    /// 垂直边去块
    DeblockV,
    /// 水平边去块
    DeblockH,
    /// 样点自适应偏移
    Sao,
    /// 自适应环路滤波
    Alf,
}

impl TaskStage {
    /// 阶段数
    pub const COUNT: usize = 8;

    /// 按流水线顺序排列的全部阶段
    pub const ALL: [TaskStage; Self::COUNT] = [
        Self::Parse,
        Self::Inter,
        Self::Recon,
        Self::Lmcs,
        Self::DeblockV,
        Self::DeblockH,
        Self::Sao,
        Self::Alf,
    ];

    /// 流水线中的序号
    pub fn index(self) -> usize {
        self as usize
    }

    /// 在网格位集中对应的位
    pub fn bit(self) -> StageSet {
        match self {
            Self::Parse => StageSet::PARSE,
            Self::Inter => StageSet::INTER,
            Self::Recon => StageSet::RECON,
            Self::Lmcs => StageSet::LMCS,
            Self::DeblockV => StageSet::DEBLOCK_V,
            Self::DeblockH => StageSet::DEBLOCK_H,
            Self::Sao => StageSet::SAO,
            Self::Alf => StageSet::ALF,
        }
    }

    /// 阶段名称
    pub fn name(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Inter => "inter",
            Self::Recon => "recon",
            Self::Lmcs => "lmcs",
            Self::DeblockV => "deblock_v",
            Self::DeblockH => "deblock_h",
            Self::Sao => "sao",
            Self::Alf => "alf",
        }
    }
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TaskStage {
    type Err = TaoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| TaoError::InvalidArgument(format!("未知的流水线阶段: {s}")))
    }
}

/// 解析游标: 一个入口点内尚未解析的 CTU 区间
///
/// `next` 与 `end` 是 slice 内 CTU 列表的下标.
#[derive(Debug, Clone)]
pub struct ParseCursor<S> {
    pub slice: usize,
    pub entry_point: usize,
    pub next: usize,
    pub end: usize,
    /// 熵解码状态, 入口点的第一个 CTU 解析前为空
    pub state: Option<S>,
}

/// 任务负载, 每个阶段一个变体
///
/// 扫描类任务 (`Recon`, `DeblockV`, `Sao` 按行, `DeblockH` 按列) 的坐标是当前扫描位置,
/// 被未就绪的格子截断时以新的坐标重新提交.
#[derive(Debug, Clone)]
pub enum TaskKind<S> {
    Parse(ParseCursor<S>),
    Inter(CtuPos),
    Recon(CtuPos),
    Lmcs(CtuPos),
    DeblockV(CtuPos),
    DeblockH(CtuPos),
    Sao(CtuPos),
    Alf(CtuPos),
}

impl<S> TaskKind<S> {
    pub fn stage(&self) -> TaskStage {
        match self {
            Self::Parse(_) => TaskStage::Parse,
            Self::Inter(_) => TaskStage::Inter,
            Self::Recon(_) => TaskStage::Recon,
            Self::Lmcs(_) => TaskStage::Lmcs,
            Self::DeblockV(_) => TaskStage::DeblockV,
            Self::DeblockH(_) => TaskStage::DeblockH,
            Self::Sao(_) => TaskStage::Sao,
            Self::Alf(_) => TaskStage::Alf,
        }
    }
}

/// 可调度的 VVC 任务
pub struct VvcTask<D: CtuDecoder> {
    pub(crate) frame: Arc<FrameContext<D>>,
    pub(crate) kind: TaskKind<D::EntropyState>,
}

impl<D: CtuDecoder> VvcTask<D> {
    pub(crate) fn new(frame: Arc<FrameContext<D>>, kind: TaskKind<D::EntropyState>) -> Self {
        Self { frame, kind }
    }

    /// 任务阶段
    pub fn stage(&self) -> TaskStage {
        self.kind.stage()
    }

    /// 所属帧的解码顺序
    pub fn decode_order(&self) -> u64 {
        self.frame.decode_order()
    }

    /// 任务当前对应的 CTU
    pub fn pos(&self) -> CtuPos {
        match &self.kind {
            TaskKind::Parse(cursor) => self.frame.layout().slices[cursor.slice].ctus[cursor.next],
            TaskKind::Inter(pos)
            | TaskKind::Recon(pos)
            | TaskKind::Lmcs(pos)
            | TaskKind::DeblockV(pos)
            | TaskKind::DeblockH(pos)
            | TaskKind::Sao(pos)
            | TaskKind::Alf(pos) => *pos,
        }
    }

    /// 就绪判定
    ///
    /// 帧被中止后所有判定直接返回 true, 让排队中的任务尽快排空.
    pub fn is_ready(&self) -> bool {
        let frame = &*self.frame;
        if frame.thread().is_aborted() {
            return true;
        }
        let grid = frame.grid();
        match &self.kind {
            TaskKind::Parse(cursor) => frame.parse_ready(self.pos(), cursor.slice),
            TaskKind::Inter(_) => true,
            TaskKind::Recon(pos) => grid.recon_ready(*pos),
            TaskKind::Lmcs(pos) => grid.lmcs_ready(*pos),
            TaskKind::DeblockV(pos) => grid.deblock_v_ready(*pos),
            TaskKind::DeblockH(pos) => grid.deblock_h_ready(*pos),
            TaskKind::Sao(pos) => grid.sao_ready(*pos),
            // 只在依赖已满足的位置由 SAO 阶段提交
            TaskKind::Alf(_) => true,
        }
    }

    /// 排序键: 解码顺序, 是否非解析任务, 行, 列, 流水线阶段
    ///
    /// 同一帧内解析任务排在所有非解析任务之前, 解析任务之间按行、列排序.
    fn priority_key(&self) -> (u64, bool, i32, i32, TaskStage) {
        let pos = self.pos();
        let stage = self.stage();
        (self.decode_order(), stage != TaskStage::Parse, pos.y, pos.x, stage)
    }
}

impl<D: CtuDecoder> fmt::Debug for VvcTask<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VvcTask")
            .field("decode_order", &self.decode_order())
            .field("stage", &self.stage())
            .field("pos", &self.pos())
            .finish()
    }
}

/// `a` 的优先级是否严格高于 `b`
///
/// 较早的帧总是优先. 同一帧内解析任务先于其他阶段; 其余任务按行、列升序,
/// 同一格子上较早的流水线阶段优先.
pub fn priority_higher<D: CtuDecoder>(a: &VvcTask<D>, b: &VvcTask<D>) -> bool {
    a.priority_key() < b.priority_key()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PictureLayout;
    use crate::test_support::NullDecoder;

    fn frame(order: u64) -> Arc<FrameContext<NullDecoder>> {
        let layout = PictureLayout::single_slice(256, 256, 6, false);
        let map = layout.slice_map().expect("布局应合法");
        Arc::new(FrameContext::new(order, layout, map, (), Vec::new()))
    }

    /// 游标指向光栅序第 `next` 个 CTU 的解析任务
    fn parse_at(frame: &Arc<FrameContext<NullDecoder>>, next: usize) -> VvcTask<NullDecoder> {
        let cursor = ParseCursor {
            slice: 0,
            entry_point: 0,
            next,
            end: 16,
            state: None,
        };
        VvcTask::new(Arc::clone(frame), TaskKind::Parse(cursor))
    }

    fn task(frame: &Arc<FrameContext<NullDecoder>>, kind: TaskKind<()>) -> VvcTask<NullDecoder> {
        VvcTask::new(Arc::clone(frame), kind)
    }

    #[test]
    fn test_stage_order_and_bits() {
        let bits: Vec<u8> = TaskStage::ALL.iter().map(|s| s.bit().bits()).collect();
        assert_eq!(bits, vec![1, 2, 4, 8, 16, 32, 64, 128]);
        assert!(TaskStage::Parse < TaskStage::Alf);
        for (i, stage) in TaskStage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i);
        }
    }

    #[test]
    fn test_stage_from_str() {
        assert_eq!("sao".parse::<TaskStage>(), Ok(TaskStage::Sao));
        assert_eq!("DEBLOCK_V".parse::<TaskStage>(), Ok(TaskStage::DeblockV));
        assert!("bogus".parse::<TaskStage>().is_err());
        assert_eq!(TaskStage::DeblockH.to_string(), "deblock_h");
    }

    #[test]
    fn test_task_kind_stage() {
        let kind: TaskKind<()> = TaskKind::Sao(CtuPos::new(1, 1));
        assert_eq!(kind.stage(), TaskStage::Sao);
        let parse: TaskKind<()> = TaskKind::Parse(ParseCursor {
            slice: 0,
            entry_point: 0,
            next: 0,
            end: 4,
            state: None,
        });
        assert_eq!(parse.stage(), TaskStage::Parse);
    }

    #[test]
    fn test_priority_parse_before_filters_in_same_frame() {
        let frame = frame(0);
        let parse = parse_at(&frame, 12);
        assert_eq!(parse.pos(), CtuPos::new(0, 3));
        let sao = task(&frame, TaskKind::Sao(CtuPos::new(3, 0)));
        assert!(priority_higher(&parse, &sao), "同一帧内解析任务应先于 SAO");
        assert!(!priority_higher(&sao, &parse));

        let inter = task(&frame, TaskKind::Inter(CtuPos::new(0, 0)));
        assert!(priority_higher(&parse, &inter));
    }

    #[test]
    fn test_priority_parse_ordered_by_row_then_column() {
        let frame = frame(0);
        let upper_right = parse_at(&frame, 3);
        let lower_left = parse_at(&frame, 4);
        assert!(priority_higher(&upper_right, &lower_left));
        assert!(!priority_higher(&lower_left, &upper_right));
        let same = parse_at(&frame, 3);
        assert!(!priority_higher(&upper_right, &same), "相同任务不应严格更高");
    }

    #[test]
    fn test_priority_non_parse_by_position_then_stage() {
        let frame = frame(0);
        let sao = task(&frame, TaskKind::Sao(CtuPos::new(3, 0)));
        let recon = task(&frame, TaskKind::Recon(CtuPos::new(0, 1)));
        assert!(priority_higher(&sao, &recon), "较早的行优先");

        let left = task(&frame, TaskKind::Alf(CtuPos::new(1, 2)));
        let right = task(&frame, TaskKind::Lmcs(CtuPos::new(2, 2)));
        assert!(priority_higher(&left, &right), "同一行较小的列优先");

        let deblock = task(&frame, TaskKind::DeblockV(CtuPos::new(2, 2)));
        let alf = task(&frame, TaskKind::Alf(CtuPos::new(2, 2)));
        assert!(priority_higher(&deblock, &alf), "同一格子较早的阶段优先");
        assert!(!priority_higher(&alf, &deblock));
    }

    #[test]
    fn test_priority_earlier_frame_first() {
        let first = frame(0);
        let second = frame(1);
        let alf = task(&first, TaskKind::Alf(CtuPos::new(3, 3)));
        let parse = parse_at(&second, 0);
        assert!(priority_higher(&alf, &parse), "较早的帧总是优先");
        assert!(!priority_higher(&parse, &alf));
    }
}
