//! 通用任务执行器.
//!
//! 固定数量的工作线程共享一把锁保护的两个队列:
//! - 就绪队列: 按 [`TaskCallbacks::priority_higher`] 降序排列, 工作线程总是取队首;
//! - 未就绪集合: 无序, 每当任意任务执行完毕便整体重新评估一次.
//!
//! 依赖关系不以显式边表示, 而是由 [`TaskCallbacks::ready`] 直接查询调用方的状态
//! (例如 CTU 依赖网格). 任务从不在执行中途挂起: 需要 "暂停" 的任务以重新提交自身表示.

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, trace, warn};
use tao_core::{TaoError, TaoResult};

use crate::queue::TaskQueues;

/// 执行器回调
///
/// 对应任务的三个语义: 优先级比较、就绪判定与执行.
/// 所有回调都可能在任意工作线程上被并发调用.
pub trait TaskCallbacks: Send + Sync + Sized + 'static {
    /// 任务类型, 按值在队列与工作线程之间转移
    type Task: Send + 'static;

    /// 每个工作线程独占的临时内存, 创建一次后在该线程的所有任务间复用
    type Local: Send + 'static;

    /// 为一个工作线程创建本地上下文
    fn local_context(&self) -> Self::Local;

    /// `a` 的优先级是否严格高于 `b`
    fn priority_higher(&self, a: &Self::Task, b: &Self::Task) -> bool;

    /// 任务当前是否可以执行
    ///
    /// 在执行器锁内调用, 实现方只应做廉价的只读查询.
    fn ready(&self, task: &Self::Task) -> bool;

    /// 执行任务
    ///
    /// 返回值仅供调用方自行汇总, 执行器不会因错误停止调度;
    /// 失败的任务在调度意义上同样视为已完成.
    fn run(
        &self,
        task: Self::Task,
        local: &mut Self::Local,
        executor: &ExecutorHandle<Self>,
    ) -> TaoResult<()>;
}

/// 工作线程主体
type WorkerBody = Box<dyn FnOnce() + Send>;

fn spawn_named(index: usize, body: WorkerBody) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("tao-worker-{index}"))
        .spawn(body)
}

struct State<T> {
    queues: TaskQueues<T>,
    die: bool,
}

struct Shared<C: TaskCallbacks> {
    callbacks: C,
    state: Mutex<State<C::Task>>,
    cond: Condvar,
}

impl<C: TaskCallbacks> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, State<C::Task>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn promote(&self, state: &mut State<C::Task>) -> usize {
        let callbacks = &self.callbacks;
        state.queues.promote(
            |task| callbacks.ready(task),
            |a, b| callbacks.priority_higher(a, b),
        )
    }
}

/// 执行器句柄
///
/// 可廉价克隆, 用于提交任务与广播唤醒. 句柄不拥有工作线程, 无法关闭执行器.
pub struct ExecutorHandle<C: TaskCallbacks> {
    shared: Arc<Shared<C>>,
}

impl<C: TaskCallbacks> Clone for ExecutorHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: TaskCallbacks> ExecutorHandle<C> {
    /// 提交任务
    ///
    /// 立即评估就绪判定: 就绪则按优先级插入就绪队列并唤醒一个工作线程,
    /// 否则放入未就绪集合, 等待下一次重新评估.
    pub fn submit(&self, task: C::Task) {
        let shared = &*self.shared;
        let mut state = shared.lock();
        if shared.callbacks.ready(&task) {
            state
                .queues
                .push_ready(task, |a, b| shared.callbacks.priority_higher(a, b));
            drop(state);
            shared.cond.notify_one();
        } else {
            state.queues.push_waiting(task);
        }
    }

    /// 广播唤醒所有工作线程
    ///
    /// 不提交任何任务. 用于外部条件变化 (例如设置中止标志) 之后,
    /// 让此前判定为未就绪的任务得到重新评估.
    pub fn wake_all(&self) {
        let shared = &*self.shared;
        let mut state = shared.lock();
        let promoted = shared.promote(&mut state);
        drop(state);
        trace!("执行器广播唤醒, 提升 {} 个任务", promoted);
        shared.cond.notify_all();
    }

    /// 当前排队任务数 (就绪, 未就绪)
    pub fn pending(&self) -> (usize, usize) {
        let state = self.shared.lock();
        (state.queues.ready_len(), state.queues.waiting_len())
    }

    /// 获取回调实现
    pub fn callbacks(&self) -> &C {
        &self.shared.callbacks
    }
}

/// 固定大小的工作线程池
///
/// 析构时设置退出标志、广播并等待所有工作线程结束. 队列中剩余的任务被直接丢弃,
/// 调用方需自行保证此前已排空或放弃这些任务.
pub struct Executor<C: TaskCallbacks> {
    handle: ExecutorHandle<C>,
    workers: Vec<JoinHandle<()>>,
}

impl<C: TaskCallbacks> Executor<C> {
    /// 创建执行器并启动 `thread_count` 个工作线程
    ///
    /// 任一线程创建失败时, 已启动的线程会被通知退出并全部 join 后再返回错误.
    pub fn new(callbacks: C, thread_count: usize) -> TaoResult<Self> {
        Self::with_spawner(callbacks, thread_count, spawn_named)
    }

    fn with_spawner<F>(callbacks: C, thread_count: usize, mut spawn: F) -> TaoResult<Self>
    where
        F: FnMut(usize, WorkerBody) -> io::Result<JoinHandle<()>>,
    {
        if thread_count == 0 {
            return Err(TaoError::InvalidArgument("执行器线程数必须大于 0".to_string()));
        }

        let shared = Arc::new(Shared {
            callbacks,
            state: Mutex::new(State {
                queues: TaskQueues::new(),
                die: false,
            }),
            cond: Condvar::new(),
        });

        let mut executor = Self {
            handle: ExecutorHandle {
                shared: Arc::clone(&shared),
            },
            workers: Vec::with_capacity(thread_count),
        };

        for index in 0..thread_count {
            let local = shared.callbacks.local_context();
            let worker = ExecutorHandle {
                shared: Arc::clone(&shared),
            };
            match spawn(index, Box::new(move || worker_loop(worker, local))) {
                Ok(join) => executor.workers.push(join),
                Err(err) => {
                    warn!("创建第 {} 个工作线程失败: {}", index, err);
                    executor.stop();
                    return Err(TaoError::ThreadSpawn(err.to_string()));
                }
            }
        }

        debug!("执行器已启动, 工作线程数 {}", thread_count);
        Ok(executor)
    }

    /// 获取句柄
    pub fn handle(&self) -> &ExecutorHandle<C> {
        &self.handle
    }

    /// 工作线程数
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// 提交任务, 见 [`ExecutorHandle::submit`]
    pub fn submit(&self, task: C::Task) {
        self.handle.submit(task);
    }

    /// 广播唤醒, 见 [`ExecutorHandle::wake_all`]
    pub fn wake_all(&self) {
        self.handle.wake_all();
    }

    /// 关闭执行器并等待所有工作线程退出
    pub fn shutdown(self) {
        drop(self);
    }

    fn stop(&mut self) {
        let shared = &*self.handle.shared;
        {
            let mut state = shared.lock();
            state.die = true;
            if state.queues.ready_len() + state.queues.waiting_len() > 0 {
                debug!(
                    "执行器关闭时丢弃任务: 就绪 {}, 未就绪 {}",
                    state.queues.ready_len(),
                    state.queues.waiting_len()
                );
            }
        }
        shared.cond.notify_all();
        for join in self.workers.drain(..) {
            if join.join().is_err() {
                warn!("工作线程异常退出");
            }
        }
    }
}

impl<C: TaskCallbacks> Drop for Executor<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<C: TaskCallbacks>(handle: ExecutorHandle<C>, mut local: C::Local) {
    let shared = &*handle.shared;
    let mut state = shared.lock();
    loop {
        if state.die {
            break;
        }
        if let Some(task) = state.queues.pop_ready() {
            drop(state);
            if let Err(err) = shared.callbacks.run(task, &mut local, &handle) {
                trace!("任务返回错误, 交由调用方汇总: {}", err);
            }
            state = shared.lock();
            // 任意任务完成都可能满足其他任务的依赖, 重新评估整个未就绪集合
            if shared.promote(&mut state) > 1 {
                shared.cond.notify_all();
            }
            continue;
        }
        state = shared
            .cond
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner);
        shared.promote(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    /// 测试任务: (优先级键, 编号)
    type TestTask = (u64, usize);

    struct Recorder {
        runs: Mutex<Vec<usize>>,
        done: Vec<AtomicBool>,
        /// 编号 i 依赖编号 i - 1 完成
        chained: bool,
        gate: AtomicBool,
        gate_id: Option<usize>,
        finished: mpsc::Sender<usize>,
        fail_id: Option<usize>,
    }

    impl Recorder {
        fn new(count: usize, finished: mpsc::Sender<usize>) -> Self {
            Self {
                runs: Mutex::new(Vec::new()),
                done: (0..count).map(|_| AtomicBool::new(false)).collect(),
                chained: false,
                gate: AtomicBool::new(true),
                gate_id: None,
                finished,
                fail_id: None,
            }
        }
    }

    impl TaskCallbacks for Recorder {
        type Task = TestTask;
        type Local = usize;

        fn local_context(&self) -> usize {
            0
        }

        fn priority_higher(&self, a: &TestTask, b: &TestTask) -> bool {
            a.0 < b.0
        }

        fn ready(&self, task: &TestTask) -> bool {
            if self.gate_id == Some(task.1) && !self.gate.load(Ordering::Acquire) {
                return false;
            }
            !self.chained || task.1 == 0 || self.done[task.1 - 1].load(Ordering::Acquire)
        }

        fn run(
            &self,
            task: TestTask,
            local: &mut usize,
            _executor: &ExecutorHandle<Self>,
        ) -> TaoResult<()> {
            *local += 1;
            self.runs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(task.1);
            self.done[task.1].store(true, Ordering::Release);
            let _ = self.finished.send(task.1);
            if self.fail_id == Some(task.1) {
                return Err(TaoError::Codec("注入的失败".to_string()));
            }
            Ok(())
        }
    }

    fn wait_finished(rx: &mpsc::Receiver<usize>, count: usize) {
        for _ in 0..count {
            let got = rx.recv_timeout(Duration::from_secs(10));
            assert!(got.is_ok(), "等待任务完成超时");
        }
    }

    /// 本地上下文在工作线程退出时计数
    struct ExitGuard(Arc<AtomicUsize>);

    impl Drop for ExitGuard {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ExitCounter(Arc<AtomicUsize>);

    impl TaskCallbacks for ExitCounter {
        type Task = ();
        type Local = ExitGuard;

        fn local_context(&self) -> ExitGuard {
            ExitGuard(Arc::clone(&self.0))
        }

        fn priority_higher(&self, _a: &(), _b: &()) -> bool {
            false
        }

        fn ready(&self, _task: &()) -> bool {
            true
        }

        fn run(
            &self,
            _task: (),
            _local: &mut ExitGuard,
            _executor: &ExecutorHandle<Self>,
        ) -> TaoResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_executor_spawn_failure_joins_started_workers() {
        let exited = Arc::new(AtomicUsize::new(0));
        let mut attempts = 0;
        let result = Executor::with_spawner(ExitCounter(Arc::clone(&exited)), 4, |index, body| {
            attempts += 1;
            if index == 2 {
                return Err(io::Error::other("模拟线程创建失败"));
            }
            spawn_named(index, body)
        });
        assert!(matches!(result, Err(TaoError::ThreadSpawn(_))));
        assert_eq!(attempts, 3, "失败后不应继续创建线程");
        // 两个已启动的线程已退出并被 join, 失败那次的本地上下文随闭包一起释放
        assert_eq!(exited.load(Ordering::SeqCst), 3, "已启动的工作线程应在返回前退出");
    }

    #[test]
    fn test_executor_zero_threads_rejected() {
        let (tx, _rx) = mpsc::channel();
        let result = Executor::new(Recorder::new(1, tx), 0);
        assert!(matches!(result, Err(TaoError::InvalidArgument(_))));
    }

    #[test]
    fn test_executor_runs_every_task_once() {
        let (tx, rx) = mpsc::channel();
        let executor = Executor::new(Recorder::new(64, tx), 4).expect("创建执行器失败");
        for i in 0..64 {
            executor.submit((i as u64 % 5, i));
        }
        wait_finished(&rx, 64);

        let mut runs = executor
            .handle()
            .callbacks()
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        runs.sort_unstable();
        assert_eq!(runs, (0..64).collect::<Vec<_>>());
        assert_eq!(executor.handle().pending(), (0, 0));
    }

    #[test]
    fn test_executor_promotes_waiting_tasks_after_completion() {
        let (tx, rx) = mpsc::channel();
        let mut recorder = Recorder::new(16, tx);
        recorder.chained = true;
        let executor = Executor::new(recorder, 3).expect("创建执行器失败");
        // 逆序提交, 除编号 0 外全部进入未就绪集合
        for i in (0..16).rev() {
            executor.submit((0, i));
        }
        wait_finished(&rx, 16);

        let runs = executor
            .handle()
            .callbacks()
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        assert_eq!(runs, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_executor_wake_all_reevaluates_external_condition() {
        let (tx, rx) = mpsc::channel();
        let mut recorder = Recorder::new(2, tx);
        recorder.gate = AtomicBool::new(false);
        recorder.gate_id = Some(1);
        let executor = Executor::new(recorder, 2).expect("创建执行器失败");
        executor.submit((0, 1));
        executor.submit((0, 0));
        wait_finished(&rx, 1);
        assert_eq!(executor.handle().pending(), (0, 1));

        executor
            .handle()
            .callbacks()
            .gate
            .store(true, Ordering::Release);
        executor.wake_all();
        wait_finished(&rx, 1);
        assert_eq!(executor.handle().pending(), (0, 0));
    }

    #[test]
    fn test_executor_runs_in_priority_order() {
        let (tx, rx) = mpsc::channel();
        let mut recorder = Recorder::new(6, tx);
        recorder.gate = AtomicBool::new(false);
        recorder.gate_id = Some(0);
        let executor = Executor::new(recorder, 1).expect("创建执行器失败");

        // 编号 0 被闸门挡住; 其余任务在锁内一次性插入, 唯一的工作线程只能按队首顺序取出
        executor.submit((9, 0));
        {
            let shared = &*executor.handle().shared;
            let mut state = shared.lock();
            for (key, id) in [(4u64, 1usize), (1, 2), (3, 3), (0, 4), (2, 5)] {
                state
                    .queues
                    .push_ready((key, id), |a, b| shared.callbacks.priority_higher(a, b));
            }
        }
        executor.handle().shared.cond.notify_all();
        wait_finished(&rx, 5);

        executor
            .handle()
            .callbacks()
            .gate
            .store(true, Ordering::Release);
        executor.wake_all();
        wait_finished(&rx, 1);

        let runs = executor
            .handle()
            .callbacks()
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        assert_eq!(runs, vec![4, 2, 5, 3, 1, 0]);
    }

    #[test]
    fn test_executor_failed_task_does_not_stop_scheduling() {
        let (tx, rx) = mpsc::channel();
        let mut recorder = Recorder::new(8, tx);
        recorder.chained = true;
        recorder.fail_id = Some(3);
        let executor = Executor::new(recorder, 2).expect("创建执行器失败");
        for i in 0..8 {
            executor.submit((0, i));
        }
        wait_finished(&rx, 8);
        assert_eq!(executor.handle().pending(), (0, 0));
    }

    #[test]
    fn test_executor_drop_with_pending_tasks() {
        let (tx, _rx) = mpsc::channel();
        let mut recorder = Recorder::new(4, tx);
        recorder.gate = AtomicBool::new(false);
        recorder.gate_id = Some(2);
        recorder.chained = true;
        let executor = Executor::new(recorder, 2).expect("创建执行器失败");
        executor.submit((0, 3));
        executor.submit((0, 2));
        assert_eq!(executor.thread_count(), 2);
        assert_eq!(executor.handle().pending(), (0, 2));
        // 存在永远不会就绪的任务时关闭也必须返回
        executor.shutdown();
    }
}
