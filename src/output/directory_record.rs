// 该文件是 Shenjing （深景近物） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

//! 按日期分目录保存显示帧：
//!
//! ```text
//! <dir>/YYYY/MM/DD/HH-MM-SS-<序号>.png        叠加包围框的帧
//! <dir>/YYYY/MM/DD/HH-MM-SS-<序号>.depth.png  伪彩色深度图
//! <dir>/YYYY/MM/DD/HH-MM-SS-<序号>.json       包围框记录
//! ```
//!
//! 默认只保存存在近距离区域的帧，`folder:///dir?always` 保存所有帧。

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Datelike, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  output::{Render, draw::Draw},
  proximity::Extraction,
  url_file_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("字体加载错误: {0}")]
  FontError(#[from] ab_glyph::InvalidFont),
}

pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  frame_counter: Mutex<u16>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(url_file_path(uri)),
      draw: Draw::new()?,
      frame_counter: Mutex::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn with_display_width(mut self, display_width: u32) -> Self {
    self.draw = self.draw.with_display_width(display_width);
    self
  }

  fn frame_id(&self) -> u16 {
    let mut counter = self
      .frame_counter
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    *counter = counter.wrapping_add(1);
    *counter
  }

  /// 不含扩展名的帧文件路径，必要时创建日期目录
  fn frame_stem(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn record(
    &self,
    stem: &Path,
    frame: &Frame,
    result: Option<&Extraction>,
  ) -> Result<(), DirectoryRecordOutputError> {
    let boxes = result
      .map(|r| {
        r.boxes
          .iter()
          .map(|b| json!({ "x": b.x, "y": b.y, "w": b.w, "h": b.h }))
          .collect::<Vec<_>>()
      })
      .unwrap_or_default();
    let record = json!({
      "frame": frame.index(),
      "source_width": result.map(|r| r.source_width()),
      "display_width": self.draw.display_width(),
      "boxes": boxes,
    });
    std::fs::write(
      stem.with_extension("json"),
      serde_json::to_string_pretty(&record)?,
    )?;
    Ok(())
  }
}

impl Render<Frame, Extraction> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, result: Option<&Extraction>) -> Result<(), Self::Error> {
    let has_boxes = result.is_some_and(|r| !r.is_empty());
    if !self.always && !has_boxes {
      return Ok(());
    }

    let stem = self.frame_stem()?;
    let display = self.draw.compose(frame.image(), result);
    display.view.save(stem.with_extension("png"))?;
    if let Some(depth_view) = display.depth_view {
      depth_view.save(stem.with_extension("depth.png"))?;
    }
    self.record(&stem, frame, result)?;
    debug!("记录帧 {} 到 {}", frame.index(), stem.display());

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use image::{GrayImage, RgbImage};

  use super::*;
  use crate::proximity::BoundingBox;

  fn files_with_extension(root: &Path, ext: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else if path.to_string_lossy().ends_with(ext) {
          found.push(path);
        }
      }
    }
    found
  }

  fn output(dir: &Path, query: &str) -> DirectoryRecordOutput {
    let url = url::Url::parse(&format!("folder://{}{}", dir.display(), query)).unwrap();
    DirectoryRecordOutput::from_url(&url)
      .unwrap()
      .with_display_width(40)
  }

  #[test]
  fn skips_frames_without_boxes_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let output = output(dir.path(), "");
    let frame = Frame::new(3, RgbImage::new(20, 10));
    let empty = Extraction::new(Vec::new(), GrayImage::new(20, 10));

    output.render_result(&frame, None).unwrap();
    output.render_result(&frame, Some(&empty)).unwrap();
    assert!(files_with_extension(dir.path(), ".png").is_empty());
  }

  #[test]
  fn records_boxes_alongside_images() {
    let dir = tempfile::tempdir().unwrap();
    let output = output(dir.path(), "");
    let frame = Frame::new(7, RgbImage::new(20, 10));
    let result = Extraction::new(vec![BoundingBox::new(1, 2, 5, 6)], GrayImage::new(20, 10));
    output.render_result(&frame, Some(&result)).unwrap();

    assert_eq!(files_with_extension(dir.path(), ".depth.png").len(), 1);
    let records = files_with_extension(dir.path(), ".json");
    assert_eq!(records.len(), 1);
    let record: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(&records[0]).unwrap()).unwrap();
    assert_eq!(record["frame"], 7);
    assert_eq!(record["source_width"], 20);
    assert_eq!(record["boxes"][0]["w"], 5);
  }

  #[test]
  fn always_records_every_frame() {
    let dir = tempfile::tempdir().unwrap();
    let output = output(dir.path(), "?always");
    let frame = Frame::new(0, RgbImage::new(20, 10));
    output.render_result(&frame, None).unwrap();
    output.render_result(&frame, None).unwrap();
    assert_eq!(files_with_extension(dir.path(), ".json").len(), 2);
    assert!(files_with_extension(dir.path(), ".depth.png").is_empty());
  }
}
