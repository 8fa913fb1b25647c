// 该文件是 Shenjing （深景近物） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频输出
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

//! # GStreamer 视频输出模块
//!
//! 将叠加了近距离区域的显示帧送往窗口或编码为视频文件。
//!
//! ## URL Scheme
//!
//! - `gstvideo://window`：两个 `autovideosink` 窗口，分别显示叠加帧与伪彩色深度图
//! - `gstvideo:///output.mp4?fps=30`：按扩展名选择编码器（mp4/mkv/avi/webm），只编码叠加帧
//!
//! 显示尺寸取决于输入帧与显示宽度，caps 在各分支收到第一帧时设置。
//! 深度窗口只在提取结果更新时推送新图像。
//!
//! ```no_run
//! use shenjing::{FromUrl, output::GStreamerVideoOutput};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("gstvideo:///output.mp4?fps=25")?;
//! let output = GStreamerVideoOutput::from_url(&url)?.with_display_width(1280);
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  output::{Render, draw::Draw},
  proximity::Extraction,
  url_file_path, url_query,
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  /// URI scheme 不匹配
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 缓冲区创建错误
  #[error("Buffer creation error")]
  BufferCreationError,
  /// 帧尺寸在运行中发生变化
  #[error("Frame size changed from {0:?} to {1:?}")]
  FrameSizeChanged((u32, u32), (u32, u32)),
  #[error("字体加载错误: {0}")]
  FontError(#[from] ab_glyph::InvalidFont),
}

const DEFAULT_FPS: i32 = 30;
const ENCODE_H264: &str =
  "videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast tune=zerolatency ! h264parse";

const VIEW_SRC: &str = "src";
const DEPTH_SRC: &str = "depth";
const WINDOW_SINK: &str = "videoconvert ! autovideosink sync=false async=false";

fn is_window(url: &Url) -> bool {
  url.host_str() == Some("window")
}

fn sink_description(url: &Url) -> String {
  if is_window(url) {
    return WINDOW_SINK.to_string();
  }

  let file_path = url_file_path(url);
  if file_path.ends_with(".mkv") {
    format!(
      "{} ! matroskamux ! filesink location=\"{}\"",
      ENCODE_H264, file_path
    )
  } else if file_path.ends_with(".avi") {
    format!(
      "videoconvert ! video/x-raw,format=I420 ! x264enc ! avimux ! filesink location=\"{}\"",
      file_path
    )
  } else if file_path.ends_with(".webm") {
    format!(
      "videoconvert ! vp8enc ! webmmux ! filesink location=\"{}\"",
      file_path
    )
  } else {
    format!("{} ! mp4mux ! filesink location=\"{}\"", ENCODE_H264, file_path)
  }
}

/// 完整管道描述；窗口输出额外带一个深度图分支
fn pipeline_description(url: &Url) -> String {
  let mut desc = format!("appsrc name={} ! {}", VIEW_SRC, sink_description(url));
  if is_window(url) {
    desc.push_str(&format!(" appsrc name={} ! {}", DEPTH_SRC, WINDOW_SINK));
  }
  desc
}

#[derive(Default)]
struct PushState {
  size: Option<(u32, u32)>,
  frame_count: u64,
  last_generation: Option<u64>,
}

impl PushState {
  /// 深度分支是否需要推送该编号的结果；0 表示未编号，总是推送
  fn needs_push(&self, generation: u64) -> bool {
    generation == 0 || self.last_generation != Some(generation)
  }
}

/// 一个 appsrc 及其推送状态
struct Branch {
  appsrc: gst_app::AppSrc,
  state: Mutex<PushState>,
}

impl Branch {
  fn from_pipeline(pipeline: &gst::Pipeline, name: &str) -> Result<Self, GStreamerVideoOutputError> {
    let appsrc = pipeline
      .by_name(name)
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;
    appsrc.set_format(gst::Format::Time);

    Ok(Branch {
      appsrc,
      state: Mutex::new(PushState::default()),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, PushState>, GStreamerVideoOutputError> {
    self
      .state
      .lock()
      .map_err(|_| GStreamerVideoOutputError::PipelineError("State lock poisoned".to_string()))
  }

  fn frame_count(&self) -> u64 {
    self.state.lock().map(|s| s.frame_count).unwrap_or_default()
  }
}

pub struct GStreamerVideoOutput {
  pipeline: gst::Pipeline,
  view: Branch,
  depth: Option<Branch>,
  fps: i32,
  draw: Draw,
}

impl FromUrlWithScheme for GStreamerVideoOutput {
  const SCHEME: &'static str = "gstvideo";
}

impl FromUrl for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerVideoOutputError::SchemeMismatch);
    }

    gst::init()?;

    let fps = url_query::<i32>(url, "fps")
      .filter(|fps| *fps > 0)
      .unwrap_or(DEFAULT_FPS);
    let pipeline_desc = pipeline_description(url);
    info!("Creating video output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let view = Branch::from_pipeline(&pipeline, VIEW_SRC)?;
    let depth = if is_window(url) {
      Some(Branch::from_pipeline(&pipeline, DEPTH_SRC)?)
    } else {
      None
    };

    Ok(GStreamerVideoOutput {
      pipeline,
      view,
      depth,
      fps,
      draw: Draw::new()?,
    })
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    // 发送 EOS 使封装器写完文件尾
    let _ = self.view.appsrc.end_of_stream();
    if let Some(depth) = &self.depth {
      let _ = depth.appsrc.end_of_stream();
    }
    std::thread::sleep(std::time::Duration::from_millis(100));

    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer video output pipeline: {}", e);
    }

    info!(
      "Video output closed. Total frames written: {}",
      self.view.frame_count()
    );
  }
}

impl GStreamerVideoOutput {
  pub fn with_display_width(mut self, display_width: u32) -> Self {
    self.draw = self.draw.with_display_width(display_width);
    self
  }

  fn frame_duration(&self) -> u64 {
    1_000_000_000 / self.fps as u64
  }

  /// 推送一帧到分支，时间戳取第 `position` 个输出帧
  fn push_frame(
    &self,
    branch: &Branch,
    state: &mut PushState,
    image: &image::RgbImage,
    position: u64,
  ) -> Result<(), GStreamerVideoOutputError> {
    let size = image.dimensions();
    match state.size {
      None => {
        let caps = gst::Caps::builder("video/x-raw")
          .field("format", "RGB")
          .field("width", size.0 as i32)
          .field("height", size.1 as i32)
          .field("framerate", gst::Fraction::new(self.fps, 1))
          .build();
        branch.appsrc.set_caps(Some(&caps));
        self.pipeline.set_state(gst::State::Playing)?;
        info!(
          "Video output branch '{}' initialized: {}x{} @ {} fps",
          branch.appsrc.name(),
          size.0,
          size.1,
          self.fps
        );
        state.size = Some(size);
      }
      Some(current) if current != size => {
        return Err(GStreamerVideoOutputError::FrameSizeChanged(current, size));
      }
      Some(_) => {}
    }

    let mut buffer = gst::Buffer::from_mut_slice(image.as_raw().clone());
    let frame_duration = self.frame_duration();
    state.frame_count += 1;

    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(position * frame_duration));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_duration));
    }

    branch.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;

    Ok(())
  }
}

impl Render<Frame, Extraction> for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn render_result(&self, frame: &Frame, result: Option<&Extraction>) -> Result<(), Self::Error> {
    let view = self.draw.overlay(frame.image(), result);
    let position = {
      let mut state = self.view.lock()?;
      let position = state.frame_count;
      self.push_frame(&self.view, &mut state, &view, position)?;
      position
    };

    // 文件输出不生成深度图
    if let (Some(depth), Some(result)) = (&self.depth, result) {
      let mut state = depth.lock()?;
      if state.needs_push(result.generation()) {
        let depth_view = self.draw.depth_view(result);
        self.push_frame(depth, &mut state, &depth_view, position)?;
        state.last_generation = Some(result.generation());
      }
    }

    Ok(())
  }
}
