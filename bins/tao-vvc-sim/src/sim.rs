//! 模拟解码协作方.
//!
//! 每个阶段只做固定时长的忙等, 用来观察调度行为. 帧间预测会等待参考帧解码到
//! 当前 CTU 下方若干行, 模拟运动补偿读取参考像素.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tao_core::{CtuPos, TaoError, TaoResult};
use tao_executor::FrameProgress;
use tao_vvc::{CtuDecoder, TaskStage};

/// 帧间预测读取参考帧时越过当前 CTU 底部的样本行数
const MOTION_MARGIN: u32 = 64;

/// 一帧的模拟状态
pub struct SimPicture {
    pub index: usize,
    pub height: u32,
    pub ctu_size: u32,
    /// 注入错误的位置, 只对这一帧生效
    pub fail_at: Option<(TaskStage, CtuPos)>,
    /// 所有阶段的调用计数
    pub calls: AtomicU64,
}

/// 模拟的 CABAC 状态: 入口点内已解析的 CTU 数
#[derive(Debug, Clone, Default)]
pub struct SimEntropy {
    pub parsed: u32,
}

pub struct SimDecoder {
    work: Duration,
    scratch_size: usize,
    calls: [AtomicUsize; TaskStage::COUNT],
}

impl SimDecoder {
    pub fn new(work: Duration) -> Self {
        Self {
            work,
            scratch_size: 4096,
            calls: Default::default(),
        }
    }

    /// 各阶段累计调用次数
    pub fn calls(&self) -> [usize; TaskStage::COUNT] {
        std::array::from_fn(|i| self.calls[i].load(Ordering::Relaxed))
    }

    fn step(&self, picture: &SimPicture, stage: TaskStage, pos: CtuPos) -> TaoResult<()> {
        self.calls[stage.index()].fetch_add(1, Ordering::Relaxed);
        picture.calls.fetch_add(1, Ordering::Relaxed);
        if picture.fail_at == Some((stage, pos)) {
            return Err(TaoError::Codec(format!(
                "帧 {} CTU {} 的 {} 阶段注入错误",
                picture.index,
                pos,
                stage
            )));
        }
        let started = Instant::now();
        while started.elapsed() < self.work {
            std::hint::spin_loop();
        }
        Ok(())
    }
}

impl CtuDecoder for SimDecoder {
    type Picture = SimPicture;
    type EntropyState = SimEntropy;
    type Scratch = Vec<u8>;

    fn new_scratch(&self) -> Vec<u8> {
        vec![0; self.scratch_size]
    }

    fn start_entry_point(
        &self,
        _picture: &SimPicture,
        _slice: usize,
        _entry_point: usize,
        inherited: Option<SimEntropy>,
    ) -> TaoResult<SimEntropy> {
        Ok(inherited.unwrap_or_default())
    }

    fn parse_ctu(
        &self,
        picture: &SimPicture,
        pos: CtuPos,
        state: &mut SimEntropy,
        scratch: &mut Vec<u8>,
    ) -> TaoResult<()> {
        state.parsed += 1;
        if let Some(byte) = scratch.first_mut() {
            *byte = byte.wrapping_add(1);
        }
        self.step(picture, TaskStage::Parse, pos)
    }

    fn inter_predict(
        &self,
        picture: &SimPicture,
        pos: CtuPos,
        refs: &[Arc<FrameProgress>],
        _scratch: &mut Vec<u8>,
    ) -> TaoResult<()> {
        let bottom = (pos.y as u32 + 1) * picture.ctu_size + MOTION_MARGIN;
        let row = bottom.min(picture.height) - 1;
        for reference in refs {
            reference.wait(row);
        }
        self.step(picture, TaskStage::Inter, pos)
    }

    fn reconstruct(
        &self,
        picture: &SimPicture,
        pos: CtuPos,
        _scratch: &mut Vec<u8>,
    ) -> TaoResult<()> {
        self.step(picture, TaskStage::Recon, pos)
    }

    fn lmcs(&self, picture: &SimPicture, pos: CtuPos, _scratch: &mut Vec<u8>) -> TaoResult<()> {
        self.step(picture, TaskStage::Lmcs, pos)
    }

    fn deblock_vertical(
        &self,
        picture: &SimPicture,
        pos: CtuPos,
        _scratch: &mut Vec<u8>,
    ) -> TaoResult<()> {
        self.step(picture, TaskStage::DeblockV, pos)
    }

    fn deblock_horizontal(
        &self,
        picture: &SimPicture,
        pos: CtuPos,
        _scratch: &mut Vec<u8>,
    ) -> TaoResult<()> {
        self.step(picture, TaskStage::DeblockH, pos)
    }

    fn sao(&self, picture: &SimPicture, pos: CtuPos, _scratch: &mut Vec<u8>) -> TaoResult<()> {
        self.step(picture, TaskStage::Sao, pos)
    }

    fn alf(&self, picture: &SimPicture, pos: CtuPos, _scratch: &mut Vec<u8>) -> TaoResult<()> {
        self.step(picture, TaskStage::Alf, pos)
    }
}

/// 解析 "x,y"
pub fn parse_pos(s: &str) -> Result<CtuPos, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("CTU 坐标格式应为 x,y: {s}"))?;
    let x = x.trim().parse::<i32>().map_err(|e| format!("无效的 x: {e}"))?;
    let y = y.trim().parse::<i32>().map_err(|e| format!("无效的 y: {e}"))?;
    Ok(CtuPos::new(x, y))
}

/// 解析 "stage@x,y"
pub fn parse_fault(s: &str) -> Result<(TaskStage, CtuPos), String> {
    let (stage, pos) = s
        .split_once('@')
        .ok_or_else(|| format!("故障格式应为 stage@x,y: {s}"))?;
    let stage = stage.parse::<TaskStage>().map_err(|e| e.to_string())?;
    Ok((stage, parse_pos(pos)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fault() {
        assert_eq!(parse_pos(" 2, 3"), Ok(CtuPos::new(2, 3)));
        assert!(parse_pos("2;3").is_err());
        assert_eq!(
            parse_fault("deblock_h@1,0"),
            Ok((TaskStage::DeblockH, CtuPos::new(1, 0)))
        );
        assert!(parse_fault("blur@1,0").is_err());
        assert!(parse_fault("sao").is_err());
    }

    #[test]
    fn test_injected_failure() {
        let decoder = SimDecoder::new(Duration::ZERO);
        let picture = SimPicture {
            index: 0,
            height: 128,
            ctu_size: 64,
            fail_at: Some((TaskStage::Sao, CtuPos::new(1, 1))),
            calls: AtomicU64::new(0),
        };
        let mut scratch = decoder.new_scratch();
        assert!(decoder.sao(&picture, CtuPos::new(0, 1), &mut scratch).is_ok());
        assert!(matches!(
            decoder.sao(&picture, CtuPos::new(1, 1), &mut scratch),
            Err(TaoError::Codec(_))
        ));
        assert_eq!(decoder.calls()[TaskStage::Sao.index()], 2);
        assert_eq!(picture.calls.load(Ordering::Relaxed), 2);
    }
}
