// 该文件是 Shenjing （深景近物） 项目的一部分。
// src/bin/video_probe.rs - 输入源检查
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
};
use tracing::info;

/// 抽帧参数上限
const MAX_SKIP: u64 = 1_000_000;

/// 读取输入源并打印帧信息，不做推理
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 每输出一帧后丢弃的帧数
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
  /// 最大读取帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub max_frames: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("输入来源: {}", args.input);

  let options = SourceOptions::default()
    .with_skip_frames(args.skip_frames)
    .with_resize(args.resize);
  let frames = InputWrapper::from_url(&args.input)?.into_frames(options);

  let now = std::time::Instant::now();
  let mut count = 0usize;
  for frame in frames.take(args.max_frames.unwrap_or(usize::MAX)) {
    count += 1;
    info!(
      "帧 {}: {}x{}, 已用时 {:.2?}",
      frame.index(),
      frame.width(),
      frame.height(),
      now.elapsed()
    );
  }

  let elapsed = now.elapsed().as_secs_f64();
  if count > 0 && elapsed > 0.0 {
    info!("共 {} 帧, 平均 {:.1} 帧/秒", count, count as f64 / elapsed);
  } else {
    info!("共 {} 帧", count);
  }

  Ok(())
}
