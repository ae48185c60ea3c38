//! # tao-executor
//!
//! Tao 调度框架的通用任务执行器.
//!
//! - [`Executor`]: 固定大小的工作线程池. 每个任务携带就绪判定与优先级比较,
//!   执行器维护 "未就绪" 与 "就绪" 两个队列, 在任意任务完成后重新评估未就绪任务.
//! - [`FrameProgress`]: 单调递增的帧进度计数器, 供后续帧等待参考帧解码到指定行.
//!
//! 执行器对任务内容一无所知, 具体语义由 [`TaskCallbacks`] 的实现方提供.
//!
//! ## 使用示例
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use tao_core::TaoResult;
//! use tao_executor::{Executor, ExecutorHandle, TaskCallbacks};
//!
//! struct Sum(Arc<AtomicUsize>);
//!
//! impl TaskCallbacks for Sum {
//!     type Task = usize;
//!     type Local = ();
//!
//!     fn local_context(&self) -> Self::Local {}
//!
//!     fn priority_higher(&self, a: &usize, b: &usize) -> bool {
//!         a < b
//!     }
//!
//!     fn ready(&self, _task: &usize) -> bool {
//!         true
//!     }
//!
//!     fn run(
//!         &self,
//!         task: usize,
//!         _local: &mut (),
//!         _executor: &ExecutorHandle<Self>,
//!     ) -> TaoResult<()> {
//!         self.0.fetch_add(task, Ordering::SeqCst);
//!         Ok(())
//!     }
//! }
//!
//! let total = Arc::new(AtomicUsize::new(0));
//! let executor = Executor::new(Sum(Arc::clone(&total)), 2).unwrap();
//! for i in 1..=4 {
//!     executor.submit(i);
//! }
//! executor.shutdown();
//! ```

pub mod executor;
pub mod progress;
mod queue;

pub use executor::{Executor, ExecutorHandle, TaskCallbacks};
pub use progress::{FrameProgress, PROGRESS_DONE};
