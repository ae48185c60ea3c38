//! 帧线程协调器.
//!
//! 记录每帧已调度但未完成的任务数 (其中解析任务单独计数), 用于判断一帧的任务是否全部排空.
//! 同时保存该帧的第一个错误: 首个错误胜出, 并置上中止标志,
//! 此后所有就绪判定直接返回 true, 排队中的任务得以排空而不是永远等待.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, warn};
use tao_core::{CtuPos, TaoError, TaoResult};

use crate::task::TaskStage;

#[derive(Debug, Default)]
struct TaskCounts {
    scheduled: usize,
    parse: usize,
}

/// 一帧的调度统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// 各阶段执行的任务数 (按流水线顺序)
    pub runs: [usize; TaskStage::COUNT],
    /// 扫描被截断后重新提交的次数
    pub resubmits: usize,
    /// 从提交到排空的耗时
    pub elapsed: Option<Duration>,
}

impl FrameStats {
    /// 执行的任务总数
    pub fn total_runs(&self) -> usize {
        self.runs.iter().sum()
    }
}

#[derive(Debug, Default)]
struct Timing {
    started: Option<Instant>,
    elapsed: Option<Duration>,
}

/// 帧线程协调器
#[derive(Debug, Default)]
pub struct FrameThread {
    counts: Mutex<TaskCounts>,
    cond: Condvar,
    aborted: AtomicBool,
    error: Mutex<Option<TaoError>>,
    runs: [AtomicUsize; TaskStage::COUNT],
    resubmits: AtomicUsize,
    timing: Mutex<Timing>,
}

impl FrameThread {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为复用的帧上下文清空所有状态
    pub fn reset(&mut self) {
        *self.counts.get_mut().unwrap_or_else(PoisonError::into_inner) = TaskCounts::default();
        *self.aborted.get_mut() = false;
        *self.error.get_mut().unwrap_or_else(PoisonError::into_inner) = None;
        for run in &mut self.runs {
            *run.get_mut() = 0;
        }
        *self.resubmits.get_mut() = 0;
        *self.timing.get_mut().unwrap_or_else(PoisonError::into_inner) = Timing::default();
    }

    fn lock_counts(&self) -> MutexGuard<'_, TaskCounts> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 登记一个即将提交的任务
    pub fn add_task(&self, stage: TaskStage) {
        let mut counts = self.lock_counts();
        counts.scheduled += 1;
        if stage == TaskStage::Parse {
            counts.parse += 1;
        }
    }

    /// 一个任务执行完毕 (无论成功与否), 唤醒排空等待方
    pub fn task_done(&self, stage: TaskStage) {
        self.runs[stage.index()].fetch_add(1, Ordering::Relaxed);
        let mut counts = self.lock_counts();
        counts.scheduled = counts.scheduled.saturating_sub(1);
        if stage == TaskStage::Parse {
            counts.parse = counts.parse.saturating_sub(1);
        }
        drop(counts);
        self.cond.notify_all();
    }

    /// 记录一次扫描截断后的重新提交
    pub fn note_resubmit(&self) {
        self.resubmits.fetch_add(1, Ordering::Relaxed);
    }

    /// 当前在途任务数 (全部, 解析)
    pub fn pending(&self) -> (usize, usize) {
        let counts = self.lock_counts();
        (counts.scheduled, counts.parse)
    }

    /// 记录错误并中止该帧
    ///
    /// 只有第一个错误被保存; 返回本次调用是否为第一个错误.
    /// 中止标志在错误写入之后才置上, 看到中止的一方总能取到该错误.
    pub fn report_error(&self, err: TaoError) -> bool {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            debug!("帧已中止, 忽略后续错误: {}", err);
            return false;
        }
        warn!("帧解码中止: {}", err);
        *slot = Some(err);
        self.aborted.store(true, Ordering::Release);
        true
    }

    /// 是否已中止
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// 第一个记录的错误
    pub fn first_error(&self) -> TaoResult<()> {
        match &*self.error.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// 标记开始计时
    pub fn start_timing(&self) {
        let mut timing = self.timing.lock().unwrap_or_else(PoisonError::into_inner);
        timing.started = Some(Instant::now());
        timing.elapsed = None;
    }

    /// 调度统计快照
    pub fn stats(&self) -> FrameStats {
        let timing = self.timing.lock().unwrap_or_else(PoisonError::into_inner);
        FrameStats {
            runs: std::array::from_fn(|i| self.runs[i].load(Ordering::Relaxed)),
            resubmits: self.resubmits.load(Ordering::Relaxed),
            elapsed: timing.elapsed,
        }
    }

    /// 阻塞直到该帧已调度的任务全部完成, 返回第一个错误
    ///
    /// 解析任务首次归零时 (或排空时仍未检查过) 调用一次 `missing_parse` 检查是否有 CTU
    /// 从未被解析. 若有, 说明部分 slice 数据缺失: 记录错误并通过 `wake_all` 唤醒所有工作线程,
    /// 让卡住的就绪判定借助中止短路而不是永远挂起.
    pub fn wait_for_drain<M, W>(&self, mut missing_parse: M, wake_all: W) -> TaoResult<()>
    where
        M: FnMut() -> Option<CtuPos>,
        W: Fn(),
    {
        let mut checked = false;
        let mut counts = self.lock_counts();
        loop {
            if !checked && counts.parse == 0 {
                checked = true;
                drop(counts);
                if let Some(pos) = missing_parse() {
                    self.report_error(TaoError::InvalidData(format!(
                        "CTU {pos} 缺少 slice 数据"
                    )));
                    wake_all();
                }
                counts = self.lock_counts();
                continue;
            }
            if counts.scheduled == 0 {
                break;
            }
            counts = self
                .cond
                .wait(counts)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(counts);

        {
            let mut timing = self.timing.lock().unwrap_or_else(PoisonError::into_inner);
            if timing.elapsed.is_none() {
                timing.elapsed = timing.started.map(|started| started.elapsed());
            }
        }
        self.first_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_first_error_wins() {
        let thread = FrameThread::new();
        assert!(thread.first_error().is_ok());
        assert!(thread.report_error(TaoError::Codec("第一个".to_string())));
        assert!(!thread.report_error(TaoError::Codec("第二个".to_string())));
        assert!(thread.is_aborted());
        assert_eq!(
            thread.first_error(),
            Err(TaoError::Codec("第一个".to_string()))
        );
    }

    #[test]
    fn test_aborted_frame_always_has_error() {
        let frame = Arc::new(FrameThread::new());
        let start = Arc::new(Barrier::new(9));
        let observer = {
            let frame = Arc::clone(&frame);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                while !frame.is_aborted() {
                    std::hint::spin_loop();
                }
                frame.first_error()
            })
        };
        let reporters: Vec<_> = (0..8)
            .map(|i| {
                let frame = Arc::clone(&frame);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    let err = TaoError::Codec(format!("任务 {i}"));
                    frame.report_error(err.clone()).then_some(err)
                })
            })
            .collect();

        let winners: Vec<TaoError> = reporters
            .into_iter()
            .filter_map(|h| h.join().expect("上报线程不应 panic"))
            .collect();
        assert_eq!(winners.len(), 1, "只能有一个错误胜出");
        let observed = observer.join().expect("观察线程不应 panic");
        assert_eq!(observed, Err(winners[0].clone()), "看到中止时应取到首个错误");
        assert_eq!(frame.first_error(), Err(winners[0].clone()));
    }

    #[test]
    fn test_task_counts() {
        let thread = FrameThread::new();
        thread.add_task(TaskStage::Parse);
        thread.add_task(TaskStage::Parse);
        thread.add_task(TaskStage::Recon);
        assert_eq!(thread.pending(), (3, 2));
        thread.task_done(TaskStage::Parse);
        thread.task_done(TaskStage::Recon);
        assert_eq!(thread.pending(), (1, 1));
        thread.note_resubmit();

        let stats = thread.stats();
        assert_eq!(stats.runs[TaskStage::Parse.index()], 1);
        assert_eq!(stats.runs[TaskStage::Recon.index()], 1);
        assert_eq!(stats.total_runs(), 2);
        assert_eq!(stats.resubmits, 1);
    }

    #[test]
    fn test_wait_for_drain_returns_after_last_task() {
        let frame = Arc::new(FrameThread::new());
        frame.start_timing();
        for _ in 0..8 {
            frame.add_task(TaskStage::Inter);
        }
        let worker = {
            let frame = Arc::clone(&frame);
            thread::spawn(move || {
                for _ in 0..8 {
                    thread::sleep(Duration::from_millis(1));
                    frame.task_done(TaskStage::Inter);
                }
            })
        };
        let result = frame.wait_for_drain(|| None, || {});
        assert!(result.is_ok());
        assert_eq!(frame.pending(), (0, 0));
        assert!(frame.stats().elapsed.is_some());
        assert!(worker.join().is_ok());
    }

    #[test]
    fn test_wait_for_drain_flags_missing_parse_once() {
        let frame = FrameThread::new();
        let checks = AtomicUsize::new(0);
        let wakes = AtomicUsize::new(0);
        let result = frame.wait_for_drain(
            || {
                checks.fetch_add(1, Ordering::SeqCst);
                Some(CtuPos::new(2, 2))
            },
            || {
                wakes.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert!(matches!(result, Err(TaoError::InvalidData(_))));
        assert!(frame.is_aborted());
        assert_eq!(checks.load(Ordering::SeqCst), 1);
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut frame = FrameThread::new();
        frame.add_task(TaskStage::Parse);
        frame.report_error(TaoError::Internal("测试".to_string()));
        frame.reset();
        assert_eq!(frame.pending(), (0, 0));
        assert!(!frame.is_aborted());
        assert!(frame.first_error().is_ok());
        assert_eq!(frame.stats(), FrameStats::default());
    }
}
