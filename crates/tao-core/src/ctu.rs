//! CTU 网格坐标.
//!
//! 坐标以 CTU 为单位, 左上角为 (0, 0). 邻居偏移可能产生负值或越过网格右/下边界,
//! 由依赖网格负责解释这些越界坐标.

use std::fmt;

/// CTU 在帧网格中的位置 (列, 行)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CtuPos {
    /// 列
    pub x: i32,
    /// 行
    pub y: i32,
}

impl CtuPos {
    /// 创建坐标
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// 相对偏移后的邻居坐标, 结果可能越界
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    /// 左邻
    pub const fn left(self) -> Self {
        self.offset(-1, 0)
    }

    /// 右邻
    pub const fn right(self) -> Self {
        self.offset(1, 0)
    }

    /// 正上方
    pub const fn above(self) -> Self {
        self.offset(0, -1)
    }

    /// 正下方
    pub const fn below(self) -> Self {
        self.offset(0, 1)
    }

    /// 光栅扫描序号
    pub fn raster_index(self, width: i32) -> usize {
        (self.y * width + self.x) as usize
    }
}

impl fmt::Display for CtuPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<(i32, i32)> for CtuPos {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctu_pos_neighbors() {
        let pos = CtuPos::new(2, 3);
        assert_eq!(pos.left(), CtuPos::new(1, 3));
        assert_eq!(pos.right(), CtuPos::new(3, 3));
        assert_eq!(pos.above(), CtuPos::new(2, 2));
        assert_eq!(pos.below(), CtuPos::new(2, 4));
        assert_eq!(CtuPos::new(0, 0).offset(-1, -1), CtuPos::new(-1, -1));
    }

    #[test]
    fn test_ctu_pos_raster_index() {
        assert_eq!(CtuPos::new(3, 2).raster_index(4), 11);
        assert_eq!(format!("{}", CtuPos::from((1, 2))), "(1, 2)");
    }
}
