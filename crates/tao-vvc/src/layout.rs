//! 图像的 CTU 划分与 slice/入口点布局.
//!
//! 解码前端用 [`PictureLayout`] 描述一帧: 图像尺寸、CTU 尺寸、是否启用熵编码同步,
//! 以及每个 slice 按解码顺序包含的 CTU 和入口点划分.
//!
//! 不被任何 slice 覆盖的 CTU 是合法输入, 表示该区域的 slice 数据缺失,
//! 由帧协调器在解析任务排空后检测.

use std::ops::Range;

use tao_core::{CtuPos, TaoError, TaoResult};

/// 一个 slice 的 CTU 列表与入口点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceLayout {
    /// 按解码顺序排列的 CTU
    pub ctus: Vec<CtuPos>,
    /// 入口点, 每个是 `ctus` 上的连续区间
    pub entry_points: Vec<Range<usize>>,
}

impl SliceLayout {
    /// slice 首个 CTU 所在行
    pub fn first_row(&self) -> i32 {
        self.ctus.first().map(|pos| pos.y).unwrap_or(0)
    }

    /// 按 CTU 所在行切分入口点 (熵编码同步模式)
    fn split_rows(ctus: Vec<CtuPos>) -> Self {
        let mut entry_points = Vec::new();
        let mut start = 0;
        for i in 1..=ctus.len() {
            if i == ctus.len() || ctus[i].y != ctus[start].y {
                entry_points.push(start..i);
                start = i;
            }
        }
        Self { ctus, entry_points }
    }

    fn whole(ctus: Vec<CtuPos>) -> Self {
        let entry_points = if ctus.is_empty() {
            Vec::new()
        } else {
            vec![0..ctus.len()]
        };
        Self { ctus, entry_points }
    }
}

/// 一帧的 CTU 布局
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureLayout {
    /// 亮度宽度 (样本)
    pub width: u32,
    /// 亮度高度 (样本)
    pub height: u32,
    /// CTU 尺寸的 log2 (5..=7)
    pub ctu_log2: u8,
    /// 熵编码同步 (波前并行解析)
    pub entropy_sync: bool,
    pub slices: Vec<SliceLayout>,
}

impl PictureLayout {
    /// 单 slice, 光栅扫描. 同步模式下每行一个入口点
    pub fn single_slice(width: u32, height: u32, ctu_log2: u8, entropy_sync: bool) -> Self {
        Self::raster_slices(width, height, ctu_log2, entropy_sync, 1)
    }

    /// 把光栅顺序的 CTU 尽量均分为 `slice_count` 个 slice
    pub fn raster_slices(
        width: u32,
        height: u32,
        ctu_log2: u8,
        entropy_sync: bool,
        slice_count: usize,
    ) -> Self {
        let mut layout = Self {
            width,
            height,
            ctu_log2,
            entropy_sync,
            slices: Vec::new(),
        };
        let (w, h) = (layout.width_ctus() as i32, layout.height_ctus() as i32);
        let all: Vec<CtuPos> = (0..h)
            .flat_map(|y| (0..w).map(move |x| CtuPos::new(x, y)))
            .collect();
        let slice_count = slice_count.clamp(1, all.len().max(1));
        let per_slice = all.len().div_ceil(slice_count).max(1);
        layout.slices = all
            .chunks(per_slice)
            .map(|chunk| {
                if entropy_sync {
                    SliceLayout::split_rows(chunk.to_vec())
                } else {
                    SliceLayout::whole(chunk.to_vec())
                }
            })
            .collect();
        layout
    }

    /// 去掉某个 CTU, 模拟该区域的 slice 数据缺失
    pub fn without_ctu(mut self, pos: CtuPos) -> Self {
        for slice in &mut self.slices {
            let Some(index) = slice.ctus.iter().position(|&p| p == pos) else {
                continue;
            };
            slice.ctus.remove(index);
            slice.entry_points = slice
                .entry_points
                .iter()
                .filter_map(|range| {
                    let start = if range.start > index {
                        range.start - 1
                    } else {
                        range.start
                    };
                    let end = if range.end > index {
                        range.end - 1
                    } else {
                        range.end
                    };
                    (start < end).then_some(start..end)
                })
                .collect();
        }
        self.slices.retain(|slice| !slice.ctus.is_empty());
        self
    }

    /// CTU 边长 (样本)
    pub fn ctu_size(&self) -> u32 {
        1 << self.ctu_log2
    }

    /// 网格宽度 (CTU)
    pub fn width_ctus(&self) -> u32 {
        self.width.div_ceil(self.ctu_size())
    }

    /// 网格高度 (CTU)
    pub fn height_ctus(&self) -> u32 {
        self.height.div_ceil(self.ctu_size())
    }

    /// CTU 总数
    pub fn ctu_count(&self) -> usize {
        self.width_ctus() as usize * self.height_ctus() as usize
    }

    /// 建立 CTU 光栅序号到 slice 下标的映射, 同时校验布局
    ///
    /// 拒绝: 空图像、非法 CTU 尺寸、网格外的 CTU、被两个 slice 重复占用的 CTU、
    /// 空的或越界的入口点、未覆盖全部 CTU 或相互重叠的入口点.
    pub fn slice_map(&self) -> TaoResult<Vec<Option<u32>>> {
        if self.width == 0 || self.height == 0 {
            return Err(TaoError::InvalidArgument(format!(
                "图像尺寸无效: {}x{}",
                self.width, self.height
            )));
        }
        if !(5..=7).contains(&self.ctu_log2) {
            return Err(TaoError::InvalidArgument(format!(
                "CTU 尺寸 log2 必须在 5..=7 之间, 实际 {}",
                self.ctu_log2
            )));
        }

        let (w, h) = (self.width_ctus() as i32, self.height_ctus() as i32);
        let mut map = vec![None; self.ctu_count()];
        for (slice_idx, slice) in self.slices.iter().enumerate() {
            for &pos in &slice.ctus {
                if pos.x < 0 || pos.y < 0 || pos.x >= w || pos.y >= h {
                    return Err(TaoError::InvalidData(format!(
                        "slice {slice_idx} 的 CTU {pos} 超出 {w}x{h} 网格"
                    )));
                }
                let cell = &mut map[pos.raster_index(w)];
                if cell.is_some() {
                    return Err(TaoError::InvalidData(format!(
                        "CTU {pos} 被多个 slice 占用"
                    )));
                }
                *cell = Some(slice_idx as u32);
            }

            let mut covered = 0;
            for (ep_idx, range) in slice.entry_points.iter().enumerate() {
                if range.start != covered
                    || range.end <= range.start
                    || range.end > slice.ctus.len()
                {
                    return Err(TaoError::InvalidData(format!(
                        "slice {slice_idx} 的入口点 {ep_idx} 区间无效: {range:?}"
                    )));
                }
                covered = range.end;
            }
            if covered != slice.ctus.len() {
                return Err(TaoError::InvalidData(format!(
                    "slice {slice_idx} 的入口点未覆盖全部 {} 个 CTU",
                    slice.ctus.len()
                )));
            }
        }
        Ok(map)
    }

    /// 校验布局
    pub fn validate(&self) -> TaoResult<()> {
        self.slice_map().map(|_| ())
    }
}
