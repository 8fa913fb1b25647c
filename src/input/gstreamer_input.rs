// 该文件是 Shenjing （深景近物） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 支持两类视频源：
//! - 视频文件：`gst://file/home/user/street.mp4`
//! - V4L2 摄像头：`gst://camera/dev/video0?width=640&height=480&fps=30`
//!
//! 主机名部分只用于选择来源类型，其后的路径总是绝对路径：
//! `gst://file/home/user/street.mp4` 读取 `/home/user/street.mp4`。
//!
//! 可选参数 `rotate=90|180|270` 在管道中插入 `videoflip`。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use shenjing::{FromUrl, input::{InputWrapper, SourceOptions}};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // 读取 /data/videos/street.mp4
//! let url = Url::parse("gst://file/data/videos/street.mp4")?;
//! let input = InputWrapper::from_url(&url)?;
//! for frame in input.into_frames(SourceOptions::default().with_skip_frames(1)) {
//!     println!("帧 {}: {}x{}", frame.index(), frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! 管道在 `GStreamerInput` 析构时切换到 `Null` 状态并释放。

use std::collections::HashMap;

use crate::{FromUrl, FromUrlWithScheme};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
  VideoFlip {
    method: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        width,
        height,
        fps,
      } => {
        let io_mode_str = if let Some(mode) = io_mode {
          format!(" io-mode={}", mode)
        } else {
          "".to_string()
        };
        format!(
          "v4l2src device={}{} ! video/x-raw,width={},height={},framerate={}/1",
          camera, io_mode_str, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::VideoFlip { method } => {
        format!("videoflip method={}", method)
      }
    }
  }
}

/// GStreamer 输入管道构建器
///
/// ```no_run
/// use shenjing::input::GStreamerInputPipelineBuilder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let input = GStreamerInputPipelineBuilder::new()
///     .camera("/dev/video0", 640, 480, 30)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn file(mut self, path: &str) -> Self {
    self
      .items
      .push(GStreamerInputBuilderItem::FileSource(path.to_string()));
    self
  }

  pub fn camera(mut self, camera: &str, width: u32, height: u32, fps: u32) -> Self {
    self.items.push(GStreamerInputBuilderItem::CameraSource {
      camera: camera.to_string(),
      io_mode: None,
      width,
      height,
      fps,
    });
    self
  }

  fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
    let method = match rotate? {
      "90" => 1,
      "180" => 2,
      "270" => 3,
      _ => return None,
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method })
  }

  fn describe(&self) -> String {
    let mut items = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>();
    if !self
      .items
      .iter()
      .any(|item| matches!(item, GStreamerInputBuilderItem::TargetFormat { .. }))
    {
      items.push(
        GStreamerInputBuilderItem::TargetFormat {
          format: "RGB".to_string(),
        }
        .to_pipeline(),
      );
    }
    // 不丢帧：由调用方决定抽帧策略
    format!(
      "{} ! appsink max-buffers=2 drop=false sync=false name=sink",
      items.join(" ! ")
    )
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.describe();
    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    // 先构造守卫，启动失败时同样会释放管道
    let input = GStreamerInput { pipeline, appsink };
    input.pipeline.set_state(gst::State::Playing)?;

    Ok(input)
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    // 主机名是来源类型，路径部分按绝对路径解释
    let path = urlencoding::decode(url.path())
      .map(|s| s.into_owned())
      .unwrap_or_else(|_| url.path().to_string());

    let mut builder = match url.host_str() {
      Some("camera") => {
        let parse = |key: &str, default: u32| {
          query
            .get(key)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(default)
        };
        let mut builder = Self::new().camera(
          &path,
          parse("width", 640),
          parse("height", 480),
          parse("fps", 30),
        );
        if let Some(GStreamerInputBuilderItem::CameraSource { io_mode, .. }) =
          builder.items.last_mut()
        {
          *io_mode = query.get("io-mode").and_then(|v| v.parse::<u32>().ok());
        }
        builder
      }
      Some("file") => Self::new().file(&path),
      _ => {
        return Err(GStreamerInputError::SchemeMismatch);
      }
    };

    if let Some(video_flip) = Self::video_flip(query.get("rotate").map(|s| s.as_ref())) {
      builder.items.push(video_flip);
    }

    Ok(builder)
  }
}

/// GStreamer 视频输入
///
/// 管理 GStreamer 管道和 appsink，提供 RGB 图像迭代。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    } else {
      info!("视频采集已释放");
    }
  }
}

impl GStreamerInput {
  pub fn into_images(self) -> GStreamerInputImages {
    GStreamerInputImages { inner: self }
  }

  /// 到达流末尾或管道出错时返回 `None`
  fn pull_sample(&self) -> Option<gst::Sample> {
    if self.appsink.is_eos() {
      info!("End of video reached");
      return None;
    }
    self
      .appsink
      .pull_sample()
      .map_err(|e| {
        error!("Failed to pull sample: {}", e);
        e
      })
      .ok()
  }
}

pub struct GStreamerInputImages {
  inner: GStreamerInput,
}

impl Iterator for GStreamerInputImages {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    let inner = &self.inner;
    next_converted(|| inner.pull_sample(), convert_sample_to_rgb)
  }
}

/// 拉取下一个可转换的样本；转换失败的样本记录后跳过，
/// 只有 `pull` 返回 `None`（流末尾或拉取出错）时结束。
fn next_converted<S, T, E: std::fmt::Display>(
  mut pull: impl FnMut() -> Option<S>,
  convert: impl Fn(S) -> Result<T, E>,
) -> Option<T> {
  loop {
    match convert(pull()?) {
      Ok(image) => return Some(image),
      Err(e) => error!("Failed to convert sample, skipping: {}", e),
    }
  }
}

fn convert_sample_to_rgb(sample: gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * (height.saturating_sub(1)) + width * 3;
  let actual_size = data.len();
  if actual_size < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: actual_size,
    });
  }

  let swap = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  };

  // 行之间可能有填充，按 stride 逐行拷贝
  let mut pixels = Vec::with_capacity(width * height * 3);
  for h in 0..height {
    let row = &data[h * stride..h * stride + width * 3];
    if swap {
      for px in row.chunks_exact(3) {
        pixels.extend_from_slice(&[px[2], px[1], px[0]]);
      }
    } else {
      pixels.extend_from_slice(row);
    }
  }

  RgbImage::from_raw(width as u32, height as u32, pixels)
    .ok_or(GStreamerInputError::BufferSizeMismatch {
      expected: width * height * 3,
      actual: actual_size,
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn file_url_builds_decode_pipeline() {
    let url = Url::parse("gst://file/data/videos/a%20b.mp4?rotate=180").unwrap();
    let builder = GStreamerInputPipelineBuilder::from_url(&url).unwrap();
    let desc = builder.describe();
    assert!(desc.starts_with("filesrc location=\"/data/videos/a b.mp4\" ! decodebin"));
    assert!(desc.contains("videoflip method=2"));
    assert!(desc.contains("video/x-raw,format=RGB"));
    assert!(desc.ends_with("name=sink"));
  }

  #[test]
  fn file_path_after_host_is_absolute() {
    let url = Url::parse("gst://file/home/user/street.mp4").unwrap();
    let desc = GStreamerInputPipelineBuilder::from_url(&url)
      .unwrap()
      .describe();
    assert!(desc.starts_with("filesrc location=\"/home/user/street.mp4\""));
  }

  #[test]
  fn conversion_failure_skips_sample() {
    let mut samples = vec![Ok(1u8), Err("bad caps"), Err("short buffer"), Ok(4)].into_iter();
    let mut pull = || samples.next();
    assert_eq!(next_converted(&mut pull, |s| s), Some(1));
    assert_eq!(next_converted(&mut pull, |s| s), Some(4));
    assert_eq!(next_converted(&mut pull, |s| s), None);
  }

  #[test]
  fn camera_url_reads_query() {
    let url = Url::parse("gst://camera/dev/video2?width=320&height=240&fps=15").unwrap();
    let desc = GStreamerInputPipelineBuilder::from_url(&url)
      .unwrap()
      .describe();
    assert!(desc.starts_with(
      "v4l2src device=/dev/video2 ! video/x-raw,width=320,height=240,framerate=15/1"
    ));
  }

  #[test]
  fn unknown_host_is_rejected() {
    let url = Url::parse("gst://rtsp/stream").unwrap();
    assert!(matches!(
      GStreamerInputPipelineBuilder::from_url(&url),
      Err(GStreamerInputError::SchemeMismatch)
    ));
  }
}
