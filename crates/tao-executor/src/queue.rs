//! 执行器内部的双队列.
//!
//! 任务在任一时刻只属于一个位置: 未就绪集合、就绪队列, 或正被某个工作线程持有.
//! 队列按值持有任务, 出队即转移所有权, 因此同一任务不可能被两个线程同时取得.

use std::collections::VecDeque;

/// 未就绪集合 + 按优先级降序排列的就绪队列
pub(crate) struct TaskQueues<T> {
    ready: VecDeque<T>,
    waiting: Vec<T>,
}

impl<T> TaskQueues<T> {
    pub(crate) fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            waiting: Vec::new(),
        }
    }

    /// 按优先级插入就绪队列
    ///
    /// 插入位置为第一个满足 `!higher(existing, task)` 的元素之前, 即降序插入排序.
    pub(crate) fn push_ready<F>(&mut self, task: T, higher: F)
    where
        F: Fn(&T, &T) -> bool,
    {
        let pos = self
            .ready
            .iter()
            .position(|existing| !higher(existing, &task))
            .unwrap_or(self.ready.len());
        self.ready.insert(pos, task);
    }

    /// 放入未就绪集合 (无序)
    pub(crate) fn push_waiting(&mut self, task: T) {
        self.waiting.push(task);
    }

    /// 取出最高优先级的就绪任务
    pub(crate) fn pop_ready(&mut self) -> Option<T> {
        self.ready.pop_front()
    }

    /// 扫描整个未就绪集合, 把判定为就绪的任务按优先级移入就绪队列
    ///
    /// 返回被提升的任务数.
    pub(crate) fn promote<R, F>(&mut self, ready: R, higher: F) -> usize
    where
        R: Fn(&T) -> bool,
        F: Fn(&T, &T) -> bool,
    {
        let mut promoted = 0;
        let mut i = 0;
        while i < self.waiting.len() {
            if ready(&self.waiting[i]) {
                let task = self.waiting.swap_remove(i);
                self.push_ready(task, &higher);
                promoted += 1;
            } else {
                i += 1;
            }
        }
        promoted
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    #[cfg(test)]
    pub(crate) fn ready_iter(&self) -> impl Iterator<Item = &T> {
        self.ready.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// (解码顺序, 序号)
    type Item = (u64, u32);

    fn higher(a: &Item, b: &Item) -> bool {
        a.0 < b.0
    }

    #[test]
    fn test_push_ready_keeps_priority_order() {
        let mut queues = TaskQueues::new();
        for item in [(3, 0), (1, 1), (2, 2), (1, 3), (0, 4), (3, 5)] {
            queues.push_ready(item, higher);
        }
        let orders: Vec<u64> = queues.ready_iter().map(|item| item.0).collect();
        assert_eq!(orders, vec![0, 1, 1, 2, 3, 3]);
    }

    #[test]
    fn test_push_ready_places_new_before_equal() {
        let mut queues = TaskQueues::new();
        queues.push_ready((1, 0), higher);
        queues.push_ready((1, 1), higher);
        let seq: Vec<u32> = queues.ready_iter().map(|item| item.1).collect();
        // 相同优先级时新任务排在已有任务之前
        assert_eq!(seq, vec![1, 0]);
    }

    #[test]
    fn test_promote_moves_only_ready_tasks() {
        let mut queues = TaskQueues::new();
        queues.push_waiting((5, 0));
        queues.push_waiting((2, 1));
        queues.push_waiting((4, 2));
        queues.push_ready((3, 3), higher);

        let promoted = queues.promote(|item: &Item| item.0 % 2 == 0, higher);
        assert_eq!(promoted, 2);
        assert_eq!(queues.waiting_len(), 1);
        assert_eq!(queues.ready_len(), 3);

        let orders: Vec<u64> = queues.ready_iter().map(|item| item.0).collect();
        assert_eq!(orders, vec![2, 3, 4]);
        assert_eq!(queues.pop_ready(), Some((2, 1)));
    }

    #[test]
    fn test_priority_monotonic_under_mixed_submits() {
        let mut queues = TaskQueues::new();
        let mut seed = 17u64;
        for i in 0..200u32 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let order = (seed >> 33) % 8;
            if i % 3 == 0 {
                queues.pop_ready();
            }
            queues.push_ready((order, i), higher);
            let orders: Vec<u64> = queues.ready_iter().map(|item| item.0).collect();
            assert!(
                orders.windows(2).all(|w| w[0] <= w[1]),
                "就绪队列顺序被破坏: {orders:?}"
            );
        }
    }
}
