// 该文件是 Shenjing （深景近物） 项目的一部分。
// src/bin/proximity_view.rs - 近距离区域检测与显示
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

use anyhow::Result;
use clap::{Parser, builder::RangedU64ValueParser};
use url::Url;

use shenjing::{
  FromUrl,
  input::{InputWrapper, SourceOptions, parse_size},
  model::ModelWrapper,
  output::{OutputWrapper, draw::DISPLAY_WIDTH},
  proximity::{CLOSE_THRESH, MIN_BOX_AREA, MORPH_KERNEL, ProximityConfig, ProximityExtractor},
  scheduler::{SKIP_EVERY, SchedulerConfig},
  task::{ContinuousTask, Task},
};
use tracing::info;

/// 抽帧参数上限
const MAX_SKIP: u64 = 1_000_000;

/// Shenjing 近距离区域检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 深度模型（midas:///model.onnx 或 depthdir:///depth/dir）
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源（gst://file/...、gst://camera/... 或 image://...）
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出（gstvideo://window、gstvideo:///out.mp4、folder:///dir、image:///out.png）
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 两次深度推理之间跳过的帧数
  #[arg(
    long,
    default_value_t = SKIP_EVERY,
    value_parser = RangedU64ValueParser::<usize>::new().range(0..=MAX_SKIP),
    value_name = "COUNT"
  )]
  pub skip_every: usize,
  /// 近距离阈值（归一化深度 0-255，不大于该值视为近处）
  #[arg(long, default_value_t = CLOSE_THRESH, value_name = "THRESHOLD")]
  pub close_thresh: u8,
  /// 包围框最小面积（像素）
  #[arg(long, default_value_t = MIN_BOX_AREA, value_name = "AREA")]
  pub min_box_area: u32,
  /// 形态学方形邻域边长
  #[arg(long, default_value_t = MORPH_KERNEL, value_name = "SIZE")]
  pub morph_kernel: u32,
  /// 显示宽度
  #[arg(long, default_value_t = DISPLAY_WIDTH, value_name = "WIDTH")]
  pub display_width: u32,

  /// 输入源每输出一帧后丢弃的帧数
  #[arg(
    long,
    default_value_t = 0,
    value_parser = RangedU64ValueParser::<u64>::new().range(0..=MAX_SKIP),
    value_name = "COUNT"
  )]
  pub skip_frames: u64,
  /// 输入帧缩放尺寸，例如 640x480
  #[arg(long, value_parser = parse_size, value_name = "WxH")]
  pub resize: Option<(u32, u32)>,
  /// 最大处理帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub max_frames: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let model = ModelWrapper::from_url(&args.model)?;
  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?.with_display_width(args.display_width);

  let options = SourceOptions::default()
    .with_skip_frames(args.skip_frames)
    .with_resize(args.resize);
  let extractor = ProximityExtractor::new(ProximityConfig {
    close_thresh: args.close_thresh,
    min_box_area: args.min_box_area,
    morph_kernel: args.morph_kernel,
  });

  ContinuousTask::default()
    .with_frame_number(args.max_frames)
    .with_scheduler(SchedulerConfig {
      skip_every: args.skip_every,
    })
    .with_extractor(extractor)
    .run_task(input.into_frames(options), model, output)?;

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const REQUIRED: [&str; 7] = [
    "proximity-view",
    "--model",
    "depthdir:///tmp",
    "--input",
    "image:///tmp/a.png",
    "--output",
    "image:///tmp/b.png",
  ];

  fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
    Args::try_parse_from(REQUIRED.iter().chain(extra).copied())
  }

  #[test]
  fn defaults_match_library_constants() {
    let args = parse(&[]).unwrap();
    assert_eq!(args.skip_every, SKIP_EVERY);
    assert_eq!(args.close_thresh, CLOSE_THRESH);
    assert_eq!(args.display_width, DISPLAY_WIDTH);
    assert_eq!(args.skip_frames, 0);
    assert!(args.resize.is_none());
  }

  #[test]
  fn oversized_skip_values_are_rejected() {
    assert!(parse(&["--skip-every", "18446744073709551615"]).is_err());
    assert!(parse(&["--skip-frames", "18446744073709551615"]).is_err());
    assert_eq!(parse(&["--skip-every", "1000000"]).unwrap().skip_every, 1_000_000);
  }

  #[test]
  fn resize_is_parsed() {
    let args = parse(&["--resize", "640x480"]).unwrap();
    assert_eq!(args.resize, Some((640, 480)));
  }
}
