// 该文件是 Shenjing （深景近物） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  output::{Render, draw::Draw},
  proximity::Extraction,
  url_file_path,
};

/// 覆盖写入单个图像文件；存在深度图时另存为 `<name>.depth.<ext>`
pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("字体加载错误: {0}")]
  FontError(#[from] ab_glyph::InvalidFont),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: PathBuf::from(url_file_path(uri)),
      draw: Draw::new()?,
    })
  }
}

impl SaveImageFileOutput {
  pub fn with_display_width(mut self, display_width: u32) -> Self {
    self.draw = self.draw.with_display_width(display_width);
    self
  }

  fn depth_path(&self) -> PathBuf {
    let stem = self
      .path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default();
    let ext = self
      .path
      .extension()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| "png".to_string());
    self.path.with_file_name(format!("{}.depth.{}", stem, ext))
  }

  fn save_image(&self, image: &RgbImage, path: &Path) -> Result<(), SaveImageFileError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(path)?;
    info!("保存图像到文件: {}", path.display());

    Ok(())
  }
}

impl Render<Frame, Extraction> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &Frame, result: Option<&Extraction>) -> Result<(), Self::Error> {
    let display = self.draw.compose(frame.image(), result);
    self.save_image(&display.view, &self.path)?;
    if let Some(depth_view) = display.depth_view {
      self.save_image(&depth_view, &self.depth_path())?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use image::GrayImage;

  use super::*;
  use crate::proximity::BoundingBox;

  #[test]
  fn writes_view_and_depth_images() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("view.png");
    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url)
      .unwrap()
      .with_display_width(64);

    let frame = Frame::new(0, RgbImage::new(32, 16));
    let result = Extraction::new(vec![BoundingBox::new(2, 2, 10, 10)], GrayImage::new(32, 16));
    output.render_result(&frame, Some(&result)).unwrap();

    let view = image::open(&path).unwrap();
    assert_eq!((view.width(), view.height()), (64, 32));
    assert!(dir.path().join("out").join("view.depth.png").is_file());
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("folder:///tmp/x").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }
}
