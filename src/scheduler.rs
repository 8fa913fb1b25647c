// 该文件是 Shenjing （深景近物） 项目的一部分。
// src/scheduler.rs - 推理调度
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

//! # 推理调度
//!
//! 深度推理是整条流水线中代价最高的一步。调度器只在每 `skip_every + 1`
//! 帧中的第一帧执行推理，其余帧直接复用上一次成功提取的结果。
//!
//! 帧位置以调度器自身看到的帧数计数（从 0 开始），与输入源的帧序号无关；
//! 输入源自身抽帧时两者不同，帧序号只用于日志。
//!
//! 推理失败时保留原有结果并继续处理下一帧。包围框与深度可视化图来自同一次
//! 提取，总是整体替换；每次替换带有新的编号（[`Extraction::generation`]），
//! 输出端据此缓存由提取结果派生的图像。

use std::fmt::Display;

use tracing::{debug, info, warn};

use crate::{
  frame::{DepthMap, Frame},
  model::Model,
  proximity::{Extraction, ProximityExtractor},
};

pub const SKIP_EVERY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
  /// 两次推理之间跳过的帧数
  pub skip_every: usize,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      skip_every: SKIP_EVERY,
    }
  }
}

impl SchedulerConfig {
  /// 推理周期；`skip_every` 取最大值时只有第 0 帧推理
  pub fn period(&self) -> usize {
    self.skip_every.saturating_add(1)
  }
}

pub struct InferenceScheduler<M> {
  model: M,
  extractor: ProximityExtractor,
  config: SchedulerConfig,
  position: usize,
  runs: usize,
  failures: usize,
  state: Option<Extraction>,
}

impl<M> InferenceScheduler<M>
where
  M: Model<Input = Frame, Output = DepthMap>,
  M::Error: Display,
{
  pub fn new(model: M, extractor: ProximityExtractor, config: SchedulerConfig) -> Self {
    Self {
      model,
      extractor,
      config,
      position: 0,
      runs: 0,
      failures: 0,
      state: None,
    }
  }

  /// 处理一帧，返回当前可用的提取结果；首次成功推理之前返回 `None`
  pub fn on_frame(&mut self, frame: &Frame) -> Option<&Extraction> {
    let position = self.position;
    self.position += 1;

    if position % self.config.period() == 0 {
      self.run(frame, position);
    } else {
      debug!("帧 {} (位置 {}) 复用上次结果", frame.index(), position);
    }

    self.state.as_ref()
  }

  fn run(&mut self, frame: &Frame, position: usize) {
    self.runs += 1;
    let now = std::time::Instant::now();

    let depth = match self.model.infer(frame) {
      Ok(depth) => depth,
      Err(e) => {
        self.failures += 1;
        warn!(
          "帧 {} (位置 {}) 深度推理失败, 保留上次结果: {}",
          frame.index(),
          position,
          e
        );
        return;
      }
    };

    let depth = if (depth.width(), depth.height()) != (frame.width(), frame.height()) {
      debug!(
        "深度图尺寸 {}x{} 与帧尺寸 {}x{} 不一致, 重采样",
        depth.width(),
        depth.height(),
        frame.width(),
        frame.height()
      );
      depth.resize(frame.width(), frame.height())
    } else {
      depth
    };

    let extraction = self
      .extractor
      .extract(&depth)
      .with_generation(self.runs as u64);
    match depth.min_max() {
      Some((lo, hi)) => info!(
        "帧 {} (位置 {}): {} 个近距离区域, 深度范围 [{:.3}, {:.3}], 耗时 {:.2?}",
        frame.index(),
        position,
        extraction.boxes.len(),
        lo,
        hi,
        now.elapsed()
      ),
      None => info!(
        "帧 {} (位置 {}): 深度图无有效数值",
        frame.index(),
        position
      ),
    }

    self.state = Some(extraction);
  }

  pub fn latest(&self) -> Option<&Extraction> {
    self.state.as_ref()
  }

  /// 已处理的帧数
  pub fn position(&self) -> usize {
    self.position
  }

  pub fn inference_runs(&self) -> usize {
    self.runs
  }

  pub fn failures(&self) -> usize {
    self.failures
  }

  pub fn config(&self) -> &SchedulerConfig {
    &self.config
  }
}

#[cfg(test)]
mod tests {
  use std::cell::{Cell, RefCell};
  use std::collections::HashSet;

  use image::RgbImage;

  use super::*;
  use crate::proximity::{BoundingBox, ProximityConfig};

  /// 按调用次序生成近处方块位置不同的深度图，可指定失败的调用
  struct MockDepth {
    calls: Cell<usize>,
    fail_on: HashSet<usize>,
    seen: RefCell<Vec<u64>>,
  }

  impl MockDepth {
    fn new(fail_on: &[usize]) -> Self {
      Self {
        calls: Cell::new(0),
        fail_on: fail_on.iter().copied().collect(),
        seen: RefCell::new(Vec::new()),
      }
    }
  }

  impl Model for MockDepth {
    type Input = Frame;
    type Output = DepthMap;
    type Error = String;

    fn infer(&self, input: &Frame) -> Result<DepthMap, String> {
      let call = self.calls.get();
      self.calls.set(call + 1);
      self.seen.borrow_mut().push(input.index());
      if self.fail_on.contains(&call) {
        return Err(format!("mock failure #{}", call));
      }
      let offset = 4 * call;
      Ok(DepthMap::from_fn(80, 60, |x, y| {
        if (offset..offset + 20).contains(&x) && (10..30).contains(&y) {
          0.0
        } else {
          10.0
        }
      }))
    }
  }

  fn frame(index: u64) -> Frame {
    Frame::new(index, RgbImage::new(80, 60))
  }

  fn extractor() -> ProximityExtractor {
    ProximityExtractor::new(ProximityConfig {
      min_box_area: 100,
      ..ProximityConfig::default()
    })
  }

  fn boxes(extraction: Option<&Extraction>) -> Option<Vec<BoundingBox>> {
    extraction.map(|e| e.boxes.clone())
  }

  #[test]
  fn decimation_invokes_model_ceil_n_over_period() {
    for skip_every in [0usize, 1, 2, 8] {
      for n in [1usize, 2, 9, 10, 27, 28] {
        let model = MockDepth::new(&[]);
        let mut scheduler =
          InferenceScheduler::new(&model, extractor(), SchedulerConfig { skip_every });
        for i in 0..n {
          scheduler.on_frame(&frame(i as u64));
        }
        let expected = n.div_ceil(skip_every + 1);
        assert_eq!(model.calls.get(), expected, "skip={} n={}", skip_every, n);
        assert_eq!(scheduler.inference_runs(), expected);
        assert_eq!(scheduler.position(), n);
      }
    }
  }

  #[test]
  fn maximal_skip_runs_only_first_frame() {
    let model = MockDepth::new(&[]);
    let mut scheduler = InferenceScheduler::new(
      &model,
      extractor(),
      SchedulerConfig {
        skip_every: usize::MAX,
      },
    );
    for i in 0..5 {
      assert!(scheduler.on_frame(&frame(i)).is_some());
    }
    assert_eq!(model.calls.get(), 1);
    assert_eq!(scheduler.config().period(), usize::MAX);
  }

  #[test]
  fn skipped_frames_return_last_result() {
    let model = MockDepth::new(&[]);
    let mut scheduler =
      InferenceScheduler::new(&model, extractor(), SchedulerConfig { skip_every: 3 });

    let first = boxes(scheduler.on_frame(&frame(0))).unwrap();
    assert_eq!(first.len(), 1);
    for i in 1..4 {
      assert_eq!(boxes(scheduler.on_frame(&frame(i))).unwrap(), first);
    }
    let second = boxes(scheduler.on_frame(&frame(4))).unwrap();
    assert_ne!(second, first);
  }

  #[test]
  fn generation_changes_only_on_successful_runs() {
    let model = MockDepth::new(&[1]);
    let mut scheduler =
      InferenceScheduler::new(&model, extractor(), SchedulerConfig { skip_every: 1 });

    let generations: Vec<u64> = (0..6)
      .map(|i| scheduler.on_frame(&frame(i)).unwrap().generation())
      .collect();
    // 第二次推理（位置 2）失败
    assert_eq!(generations, vec![1, 1, 1, 1, 3, 3]);
  }

  #[test]
  fn position_is_independent_of_frame_index() {
    let model = MockDepth::new(&[]);
    let mut scheduler =
      InferenceScheduler::new(&model, extractor(), SchedulerConfig { skip_every: 1 });
    // 输入源按 3 抽帧
    for index in [0u64, 3, 6, 9, 12] {
      scheduler.on_frame(&frame(index));
    }
    assert_eq!(*model.seen.borrow(), vec![0, 6, 12]);
  }

  #[test]
  fn failure_keeps_previous_state() {
    // 每帧都推理，第 5 帧（调用 #4）失败
    let model = MockDepth::new(&[4]);
    let mut scheduler =
      InferenceScheduler::new(&model, extractor(), SchedulerConfig { skip_every: 0 });

    let mut history = Vec::new();
    for i in 0..10 {
      history.push(boxes(scheduler.on_frame(&frame(i))));
    }

    assert_eq!(history[4], history[3]);
    assert_ne!(history[5], history[4]);
    assert_eq!(scheduler.failures(), 1);
    assert_eq!(model.calls.get(), 10);
    assert!(history.iter().all(|h| h.is_some()));
  }

  #[test]
  fn failure_before_first_success_yields_nothing() {
    let model = MockDepth::new(&[0]);
    let mut scheduler =
      InferenceScheduler::new(&model, extractor(), SchedulerConfig { skip_every: 1 });
    assert!(scheduler.on_frame(&frame(0)).is_none());
    assert!(scheduler.on_frame(&frame(1)).is_none());
    assert!(scheduler.on_frame(&frame(2)).is_some());
  }

  #[test]
  fn depth_is_resampled_to_frame_shape() {
    let model = MockDepth::new(&[]);
    let mut scheduler =
      InferenceScheduler::new(&model, extractor(), SchedulerConfig::default());
    let big = Frame::new(0, RgbImage::new(160, 120));
    let extraction = scheduler.on_frame(&big).unwrap();
    assert_eq!(extraction.depth_visual.dimensions(), (160, 120));
    assert_eq!(extraction.source_width(), 160);
  }
}
