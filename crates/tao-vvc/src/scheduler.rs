//! 调度器入口.
//!
//! [`VvcScheduler`] 把执行器、帧上下文环与各阶段执行组合起来, 对解码前端暴露逐帧的生命周期:
//!
//! 1. [`VvcScheduler::begin_frame`]: 校验布局, 分配解码顺序与帧上下文;
//! 2. [`VvcScheduler::submit_frame`]: 每个 slice 入口点提交一个解析任务;
//! 3. [`VvcScheduler::wait_frame`]: 等待排空, 检测缺失的 slice 数据,
//!    报告一次终止进度并返回该帧的第一个错误.
//!
//! 多个帧可以同时在途. 较早的帧总是优先, 后续帧的帧间预测通过参考帧的
//! [`FrameProgress`] 等待所需的行.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, trace, warn};
use tao_core::{TaoError, TaoResult};
use tao_executor::{Executor, ExecutorHandle, FrameProgress, TaskCallbacks};

use crate::config::SchedulerConfig;
use crate::context::{FrameContext, FramePool};
use crate::decoder::CtuDecoder;
use crate::frame_thread::FrameStats;
use crate::grid::TaskGrid;
use crate::layout::PictureLayout;
use crate::stages::{StageOutcome, StageRunner};
use crate::task::{self, ParseCursor, TaskKind, VvcTask};

/// 执行器回调: 把任务分发到各阶段
pub struct StageDispatch<D: CtuDecoder> {
    decoder: D,
}

impl<D: CtuDecoder> StageDispatch<D> {
    /// 解码协作方
    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// 登记到帧协调器后提交
    fn submit(
        &self,
        executor: &ExecutorHandle<Self>,
        frame: &Arc<FrameContext<D>>,
        kind: TaskKind<D::EntropyState>,
    ) {
        frame.thread().add_task(kind.stage());
        executor.submit(VvcTask::new(Arc::clone(frame), kind));
    }
}

impl<D: CtuDecoder> TaskCallbacks for StageDispatch<D> {
    type Task = VvcTask<D>;
    type Local = D::Scratch;

    fn local_context(&self) -> Self::Local {
        self.decoder.new_scratch()
    }

    fn priority_higher(&self, a: &Self::Task, b: &Self::Task) -> bool {
        task::priority_higher(a, b)
    }

    fn ready(&self, task: &Self::Task) -> bool {
        task.is_ready()
    }

    fn run(
        &self,
        task: Self::Task,
        local: &mut Self::Local,
        executor: &ExecutorHandle<Self>,
    ) -> TaoResult<()> {
        let VvcTask { frame, kind } = task;
        let stage = kind.stage();

        // 帧已中止: 不调用协作方, 也不产生后继, 只让任务计数排空
        let outcome = if frame.thread().is_aborted() {
            trace!("帧 {} 已中止, 跳过 {} 任务", frame.decode_order(), stage);
            Ok(StageOutcome::Done)
        } else {
            let spawn = |next: TaskKind<D::EntropyState>| self.submit(executor, &frame, next);
            StageRunner::new(&self.decoder, &frame, local, &spawn).run(kind)
        };

        let result = match outcome {
            Ok(StageOutcome::Done) => Ok(()),
            Ok(StageOutcome::Resubmit(next)) => {
                frame.thread().note_resubmit();
                self.submit(executor, &frame, next);
                Ok(())
            }
            Err(err) => {
                warn!(
                    "帧 {} 的 {} 任务失败: {}",
                    frame.decode_order(),
                    stage,
                    err
                );
                frame.abort(err.clone());
                executor.wake_all();
                Err(err)
            }
        };
        // 后继已登记之后才减计数, 在途计数不会提前归零
        frame.thread().task_done(stage);
        result
    }
}

/// 帧句柄
///
/// 持有帧上下文直到被丢弃. 未经 [`VvcScheduler::wait_frame`] 结束的句柄在丢弃时
/// 会中止该帧并等待排空.
pub struct FrameHandle<D: CtuDecoder> {
    frame: Arc<FrameContext<D>>,
    executor: Arc<Executor<StageDispatch<D>>>,
    submitted: AtomicBool,
    finished: bool,
}

impl<D: CtuDecoder> FrameHandle<D> {
    /// 解码顺序
    pub fn decode_order(&self) -> u64 {
        self.frame.decode_order()
    }

    /// 帧进度计数器, 供后续帧作为参考
    pub fn progress(&self) -> Arc<FrameProgress> {
        Arc::clone(self.frame.progress())
    }

    /// 调度统计
    pub fn stats(&self) -> FrameStats {
        self.frame.thread().stats()
    }

    /// 依赖网格 (只读)
    pub fn grid(&self) -> &TaskGrid {
        self.frame.grid()
    }

    pub fn layout(&self) -> &PictureLayout {
        self.frame.layout()
    }

    pub fn picture(&self) -> &D::Picture {
        self.frame.picture()
    }

    /// 是否已被中止
    pub fn is_aborted(&self) -> bool {
        self.frame.thread().is_aborted()
    }

    fn finish(&mut self) -> TaoResult<()> {
        let frame = &self.frame;
        if self.finished {
            return frame.thread().first_error();
        }
        self.finished = true;

        let handle = self.executor.handle();
        let result = frame.thread().wait_for_drain(
            || frame.first_unparsed(),
            || {
                frame.report_done();
                handle.wake_all();
            },
        );
        frame.report_done();

        let stats = frame.thread().stats();
        match &result {
            Ok(()) => debug!(
                "帧 {} 解码完成: {} 个任务, {} 次重新提交, 耗时 {:?}",
                frame.decode_order(),
                stats.total_runs(),
                stats.resubmits,
                stats.elapsed
            ),
            Err(err) => warn!("帧 {} 解码失败: {}", frame.decode_order(), err),
        }
        result
    }
}

impl<D: CtuDecoder> Drop for FrameHandle<D> {
    fn drop(&mut self) {
        if !self.finished {
            self.frame.abort(TaoError::Aborted);
            self.executor.wake_all();
            let _ = self.finish();
        }
    }
}

/// VVC 帧级任务调度器
pub struct VvcScheduler<D: CtuDecoder> {
    executor: Arc<Executor<StageDispatch<D>>>,
    pool: Mutex<FramePool<D>>,
    next_order: AtomicU64,
    config: SchedulerConfig,
}

impl<D: CtuDecoder> VvcScheduler<D> {
    /// 创建调度器并启动工作线程
    pub fn new(decoder: D, config: SchedulerConfig) -> TaoResult<Self> {
        config.validate()?;
        let workers = config.resolved_workers();
        let slots = config.resolved_slots();
        let executor = Executor::new(StageDispatch { decoder }, workers)?;
        debug!(
            "VVC 调度器已创建: 帧级并行度 {}, 工作线程 {}, 帧上下文槽位 {}",
            config.frame_threads,
            workers,
            slots
        );
        Ok(Self {
            executor: Arc::new(executor),
            pool: Mutex::new(FramePool::new(slots)),
            next_order: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// 解码协作方
    pub fn decoder(&self) -> &D {
        self.executor.handle().callbacks().decoder()
    }

    /// 工作线程数
    pub fn thread_count(&self) -> usize {
        self.executor.thread_count()
    }

    /// 开始一帧: 校验布局, 分配解码顺序与帧上下文
    ///
    /// `refs` 是帧间预测需要等待的参考帧进度.
    pub fn begin_frame(
        &self,
        layout: PictureLayout,
        picture: D::Picture,
        refs: Vec<Arc<FrameProgress>>,
    ) -> TaoResult<FrameHandle<D>> {
        let slice_map = layout.slice_map()?;
        let order = self.next_order.fetch_add(1, Ordering::Relaxed);
        debug!(
            "开始帧 {}: {}x{} CTU, {} 个 slice, 熵编码同步 {}",
            order,
            layout.width_ctus(),
            layout.height_ctus(),
            layout.slices.len(),
            layout.entropy_sync
        );
        let frame = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .acquire(order, layout, slice_map, picture, refs);
        Ok(FrameHandle {
            frame,
            executor: Arc::clone(&self.executor),
            submitted: AtomicBool::new(false),
            finished: false,
        })
    }

    /// 为每个 slice 入口点提交一个解析任务
    pub fn submit_frame(&self, handle: &FrameHandle<D>) -> TaoResult<()> {
        let frame = &handle.frame;
        if handle.submitted.swap(true, Ordering::AcqRel) {
            return Err(TaoError::InvalidArgument(format!(
                "帧 {} 已经提交过",
                frame.decode_order()
            )));
        }

        frame.thread().start_timing();
        let executor = self.executor.handle();
        let dispatch = executor.callbacks();
        let mut entry_points = 0;
        for (slice_idx, slice) in frame.layout().slices.iter().enumerate() {
            for (ep_idx, range) in slice.entry_points.iter().enumerate() {
                let cursor = ParseCursor {
                    slice: slice_idx,
                    entry_point: ep_idx,
                    next: range.start,
                    end: range.end,
                    state: None,
                };
                dispatch.submit(executor, frame, TaskKind::Parse(cursor));
                entry_points += 1;
            }
        }
        debug!(
            "帧 {} 已提交 {} 个解析任务",
            frame.decode_order(),
            entry_points
        );
        Ok(())
    }

    /// 等待一帧排空并返回其第一个错误
    ///
    /// 返回前终止进度一定已经报告. 重复调用直接返回同样的结果.
    pub fn wait_frame(&self, handle: &mut FrameHandle<D>) -> TaoResult<()> {
        handle.finish()
    }

    /// 从外部中止一帧, 例如前端发现 slice 头损坏
    ///
    /// 只有该帧的第一个错误会被保留. 终止进度随即报告, 排队中的任务随后排空.
    pub fn abort_frame(&self, handle: &FrameHandle<D>, err: TaoError) {
        handle.frame.abort(err);
        self.executor.wake_all();
    }

    /// 执行器当前排队的任务数 (就绪, 未就绪)
    pub fn pending(&self) -> (usize, usize) {
        self.executor.handle().pending()
    }
}
