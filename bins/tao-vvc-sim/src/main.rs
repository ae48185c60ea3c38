//! tao-vvc-sim - VVC CTU 调度模拟器
//!
//! 用模拟的解码协作方驱动调度器: 每帧按给定的尺寸与 slice 划分生成布局,
//! 多帧流水线并行 (后一帧的帧间预测等待前一帧的进度), 输出逐帧结果与统计.
//! 可以删掉某个 CTU 或在某个阶段注入错误, 观察中止与排空路径.

mod logging;
mod sim;

use std::collections::VecDeque;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use tao_core::CtuPos;
use tao_sched::load_config;
use tao_vvc::{FrameHandle, PictureLayout, SchedulerConfig, TaskStage, VvcScheduler};

use sim::{SimDecoder, SimPicture, parse_fault, parse_pos};

#[derive(Parser, Debug)]
#[command(name = "tao-vvc-sim", version, about = "VVC CTU 并行调度模拟器")]
struct Cli {
    /// 图像宽度 (亮度样本)
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// 图像高度 (亮度样本)
    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// CTU 尺寸 log2 (5..=7)
    #[arg(long = "ctu-log2", default_value_t = 7)]
    ctu_log2: u8,

    /// 帧数
    #[arg(long, default_value_t = 8)]
    frames: usize,

    /// 每帧 slice 数
    #[arg(long, default_value_t = 1)]
    slices: usize,

    /// 启用熵编码同步 (波前并行解析)
    #[arg(long)]
    wpp: bool,

    /// 工作线程数 (默认按帧级并行度推导)
    #[arg(long)]
    threads: Option<usize>,

    /// 同时在途的帧数
    #[arg(long = "frame-threads")]
    frame_threads: Option<usize>,

    /// 每个 CTU 每个阶段的模拟工作量 (微秒)
    #[arg(long = "work-us", default_value_t = 20)]
    work_us: u64,

    /// 删掉该 CTU 的 slice 数据, 格式 x,y
    #[arg(long, value_parser = parse_pos)]
    missing: Option<CtuPos>,

    /// 在指定阶段与 CTU 注入错误, 格式 stage@x,y
    #[arg(long = "fail-stage", value_parser = parse_fault)]
    fail_stage: Option<(TaskStage, CtuPos)>,

    /// --missing 与 --fail-stage 作用的帧
    #[arg(long = "fault-frame", default_value_t = 0)]
    fault_frame: usize,

    /// JSON 配置文件, 命令行参数覆盖其中的值
    #[arg(long)]
    config: Option<String>,

    /// 日志级别 (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init("tao-vvc-sim", cli.verbose) {
        eprintln!("警告: 日志初始化失败: {e:#}");
    }

    match run(&cli) {
        Ok(0) => {}
        Ok(failed) => {
            eprintln!("{failed} 帧解码失败");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("错误: {e:#}");
            process::exit(1);
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<SchedulerConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SchedulerConfig::default(),
    };
    if let Some(frame_threads) = cli.frame_threads {
        config.frame_threads = frame_threads;
    }
    if let Some(threads) = cli.threads {
        config.worker_threads = threads;
    }
    config.validate().context("命令行参数无效")?;
    Ok(config)
}

fn build_layout(cli: &Cli, index: usize) -> PictureLayout {
    let layout =
        PictureLayout::raster_slices(cli.width, cli.height, cli.ctu_log2, cli.wpp, cli.slices);
    match cli.missing {
        Some(pos) if index == cli.fault_frame => layout.without_ctu(pos),
        _ => layout,
    }
}

/// 运行全部帧, 返回失败的帧数
fn run(cli: &Cli) -> Result<usize> {
    let config = resolve_config(cli)?;
    let frame_threads = config.frame_threads;
    let decoder = SimDecoder::new(Duration::from_micros(cli.work_us));
    let scheduler = VvcScheduler::new(decoder, config).context("创建调度器失败")?;

    eprintln!(
        "tao-vvc-sim 版本 {} -- {}x{}, CTU {}, {} 帧, {} 个 slice, WPP {}",
        tao_sched::version(),
        cli.width,
        cli.height,
        1u32 << cli.ctu_log2,
        cli.frames,
        cli.slices,
        if cli.wpp { "开" } else { "关" },
    );
    eprintln!("工作线程 {}, 帧级并行度 {}", scheduler.thread_count(), frame_threads);

    let started = Instant::now();
    let mut in_flight: VecDeque<FrameHandle<SimDecoder>> = VecDeque::new();
    let mut failed = 0;
    let mut previous = None;
    for index in 0..cli.frames {
        if in_flight.len() >= frame_threads {
            if let Some(handle) = in_flight.pop_front() {
                failed += finish_frame(&scheduler, handle);
            }
        }

        let layout = build_layout(cli, index);
        let picture = SimPicture {
            index,
            height: cli.height,
            ctu_size: layout.ctu_size(),
            fail_at: cli.fail_stage.filter(|_| index == cli.fault_frame),
            calls: AtomicU64::new(0),
        };
        // 以前一帧为唯一参考帧
        let refs = previous.take().map(|p| vec![p]).unwrap_or_default();
        let handle = scheduler
            .begin_frame(layout, picture, refs)
            .with_context(|| format!("帧 {index} 的布局无效"))?;
        scheduler
            .submit_frame(&handle)
            .with_context(|| format!("提交帧 {index} 失败"))?;
        previous = Some(handle.progress());
        in_flight.push_back(handle);
    }
    while let Some(handle) = in_flight.pop_front() {
        failed += finish_frame(&scheduler, handle);
    }

    let elapsed = started.elapsed();
    let calls = scheduler.decoder().calls();
    let summary: Vec<String> = TaskStage::ALL
        .iter()
        .map(|stage| format!("{}={}", stage, calls[stage.index()]))
        .collect();
    info!("协作方调用: {}", summary.join(", "));
    println!(
        "共 {} 帧, 失败 {}, 总耗时 {:.2} ms, 平均 {:.2} fps",
        cli.frames,
        failed,
        elapsed.as_secs_f64() * 1000.0,
        cli.frames as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    Ok(failed)
}

/// 等待一帧结束并输出结果, 失败返回 1
fn finish_frame(
    scheduler: &VvcScheduler<SimDecoder>,
    mut handle: FrameHandle<SimDecoder>,
) -> usize {
    let result = scheduler.wait_frame(&mut handle);
    let stats = handle.stats();
    let index = handle.picture().index;
    let calls = handle.picture().calls.load(Ordering::Relaxed);
    let elapsed_ms = stats
        .elapsed
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or_default();
    match result {
        Ok(()) => {
            println!(
                "帧 {:3}: 完成, {} 个任务, {} 次协作方调用, {} 次重新提交, {:.2} ms",
                index,
                stats.total_runs(),
                calls,
                stats.resubmits,
                elapsed_ms
            );
            0
        }
        Err(e) => {
            println!(
                "帧 {:3}: 失败 ({}), 已执行 {} 个任务, {} 次协作方调用, {:.2} ms",
                index,
                e,
                stats.total_runs(),
                calls,
                elapsed_ms
            );
            1
        }
    }
}
