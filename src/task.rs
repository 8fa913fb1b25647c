// 该文件是 Shenjing （深景近物） 项目的一部分。
// src/task.rs - 处理循环
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{fmt::Display, sync::mpsc, thread, time::Duration};
use tracing::{info, warn};

use crate::{
  frame::{DepthMap, Frame},
  model::Model,
  output::Render,
  proximity::{Extraction, ProximityExtractor},
  scheduler::{InferenceScheduler, SchedulerConfig},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 一次处理循环的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskReport {
  pub frames: usize,
  pub inference_runs: usize,
  pub failures: usize,
}

/// 逐帧处理直到输入结束、达到指定帧数或收到 Ctrl-C
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  scheduler: SchedulerConfig,
  extractor: ProximityExtractor,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
    self.scheduler = scheduler;
    self
  }

  pub fn with_extractor(mut self, extractor: ProximityExtractor) -> Self {
    self.extractor = extractor;
    self
  }
}

/// Ctrl-C 时通知处理循环退出；30 秒内未退出则强制结束进程
fn interrupt_channel() -> mpsc::Receiver<()> {
  let (tx, rx) = mpsc::channel();
  let registered = ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  });
  if let Err(e) = registered {
    warn!("无法注册中断处理: {}", e);
  }
  rx
}

impl<I, M, O> Task<I, M, O> for ContinuousTask
where
  I: Iterator<Item = Frame>,
  M: Model<Input = Frame, Output = DepthMap>,
  M::Error: Display,
  O: Render<Frame, Extraction>,
  O::Error: std::error::Error + Sync + Send + 'static,
{
  type Output = TaskReport;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<TaskReport, Self::Error> {
    info!("开始任务...");
    let rx = interrupt_channel();
    let mut scheduler = InferenceScheduler::new(model, self.extractor, self.scheduler);

    let mut now = std::time::Instant::now();
    for frame in input {
      let result = scheduler.on_frame(&frame);
      let elapsed_a = now.elapsed();
      output.render_result(&frame, result)?;
      let elapsed_b = now.elapsed();
      now = std::time::Instant::now();
      info!(
        "第 {} 帧处理完成，耗时: {:.2?} / {:.2?}",
        frame.index(),
        elapsed_a,
        elapsed_b
      );

      if self
        .frame_number
        .map(|n| scheduler.position() >= n)
        .unwrap_or(false)
      {
        info!("达到指定帧数 {}, 退出任务循环", scheduler.position());
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    let report = TaskReport {
      frames: scheduler.position(),
      inference_runs: scheduler.inference_runs(),
      failures: scheduler.failures(),
    };
    info!(
      "任务完成，共 {} 帧，推理 {} 次，失败 {} 次",
      report.frames, report.inference_runs, report.failures
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;

  use image::RgbImage;
  use thiserror::Error;

  use super::*;

  struct FlatDepth;

  impl Model for FlatDepth {
    type Input = Frame;
    type Output = DepthMap;
    type Error = String;

    fn infer(&self, input: &Frame) -> Result<DepthMap, String> {
      Ok(DepthMap::from_fn(input.width(), input.height(), |_, _| 1.0))
    }
  }

  #[derive(Error, Debug)]
  #[error("sink closed")]
  struct SinkClosed;

  #[derive(Default)]
  struct Collect {
    seen: RefCell<Vec<(u64, bool)>>,
    fail_at: Option<u64>,
  }

  impl Render<Frame, Extraction> for &Collect {
    type Error = SinkClosed;

    fn render_result(&self, frame: &Frame, result: Option<&Extraction>) -> Result<(), SinkClosed> {
      if self.fail_at == Some(frame.index()) {
        return Err(SinkClosed);
      }
      self.seen.borrow_mut().push((frame.index(), result.is_some()));
      Ok(())
    }
  }

  fn frames(n: u64) -> impl Iterator<Item = Frame> {
    (0..n).map(|i| Frame::new(i, RgbImage::new(8, 8)))
  }

  #[test]
  fn stops_at_frame_number() {
    let sink = Collect::default();
    let report = ContinuousTask::default()
      .with_frame_number(Some(5))
      .with_scheduler(SchedulerConfig { skip_every: 1 })
      .run_task(frames(20), FlatDepth, &sink)
      .unwrap();

    assert_eq!(report.frames, 5);
    assert_eq!(report.inference_runs, 3);
    assert_eq!(sink.seen.borrow().len(), 5);
  }

  #[test]
  fn runs_until_input_exhausted() {
    let sink = Collect::default();
    let report = ContinuousTask::default()
      .run_task(frames(10), FlatDepth, &sink)
      .unwrap();
    assert_eq!(
      report,
      TaskReport {
        frames: 10,
        inference_runs: 2,
        failures: 0
      }
    );
    assert!(sink.seen.borrow().iter().all(|(_, has)| *has));
  }

  #[test]
  fn sink_errors_abort_the_loop() {
    let sink = Collect {
      fail_at: Some(2),
      ..Collect::default()
    };
    let err = ContinuousTask::default()
      .run_task(frames(10), FlatDepth, &sink)
      .unwrap_err();
    assert_eq!(err.to_string(), "sink closed");
    assert_eq!(sink.seen.borrow().len(), 2);
  }
}
