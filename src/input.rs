// 该文件是 Shenjing （深景近物） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, info};

use crate::{FromUrl, frame::Frame};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError, ImageFileInputImages};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputImages, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

/// 输入源抽帧与缩放参数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceOptions {
  /// 每输出一帧之后丢弃的解码帧数，0 表示不抽帧
  pub skip_frames: u64,
  /// 输出前缩放到的 (宽, 高)
  pub resize: Option<(u32, u32)>,
}

impl SourceOptions {
  pub fn with_skip_frames(mut self, skip_frames: u64) -> Self {
    self.skip_frames = skip_frames;
    self
  }

  pub fn with_resize(mut self, resize: Option<(u32, u32)>) -> Self {
    self.resize = resize;
    self
  }
}

/// 将解码得到的原始图像转换为带序号的 [`Frame`] 序列。
///
/// 第 `n` 个解码帧（从 0 开始）当且仅当 `n % (skip_frames + 1) == 0` 时输出，
/// 帧序号即解码计数 `n`，因此抽帧后序号之间会出现间隔。
pub struct FrameStream<I> {
  inner: I,
  options: SourceOptions,
  decoded: u64,
}

impl<I: Iterator<Item = RgbImage>> FrameStream<I> {
  pub fn new(inner: I, options: SourceOptions) -> Self {
    Self {
      inner,
      options,
      decoded: 0,
    }
  }

  pub fn decoded(&self) -> u64 {
    self.decoded
  }

  fn prepare(&self, image: RgbImage) -> RgbImage {
    match self.options.resize {
      Some((w, h)) if (w, h) != image.dimensions() && w > 0 && h > 0 => {
        image::imageops::resize(&image, w, h, FilterType::Triangle)
      }
      _ => image,
    }
  }
}

impl<I: Iterator<Item = RgbImage>> Iterator for FrameStream<I> {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    let stride = self.options.skip_frames.saturating_add(1);
    loop {
      let Some(image) = self.inner.next() else {
        info!("输入结束, 共解码 {} 帧", self.decoded);
        return None;
      };
      let index = self.decoded;
      self.decoded += 1;

      if index % stride != 0 {
        continue;
      }

      debug!("输出第 {} 帧: {}x{}", index, image.width(), image.height());
      return Some(Frame::new(index, self.prepare(image)));
    }
  }
}

/// 解析 `宽x高` 形式的尺寸，例如 `640x480`
pub fn parse_size(s: &str) -> Result<(u32, u32), String> {
  let (w, h) = s
    .split_once(['x', 'X'])
    .ok_or_else(|| format!("尺寸格式应为 宽x高: {}", s))?;
  let w = w.trim().parse::<u32>().map_err(|e| format!("宽度无效 {}: {}", w, e))?;
  let h = h.trim().parse::<u32>().map_err(|e| format!("高度无效 {}: {}", h, e))?;
  if w == 0 || h == 0 {
    return Err(format!("尺寸必须大于 0: {}", s));
  }
  Ok((w, h))
}

pub enum InputWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

impl InputWrapper {
  pub fn into_frames(self, options: SourceOptions) -> FrameStream<InputWrapperIter> {
    let iter = match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => InputWrapperIter::GStreamerInput(input.into_images()),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => InputWrapperIter::ReadImageFile(input.into_images()),
    };
    FrameStream::new(iter, options)
  }
}

pub enum InputWrapperIter {
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInputImages),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInputImages),
}

impl Iterator for InputWrapperIter {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapperIter::GStreamerInput(input) => input.next(),
      #[cfg(feature = "read_image_file")]
      InputWrapperIter::ReadImageFile(input) => input.next(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn images(n: usize) -> impl Iterator<Item = RgbImage> {
    (0..n).map(|_| RgbImage::new(8, 4))
  }

  #[test]
  fn no_skip_yields_every_frame() {
    let indices: Vec<u64> = FrameStream::new(images(5), SourceOptions::default())
      .map(|f| f.index())
      .collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
  }

  #[test]
  fn skip_keeps_decoded_index() {
    let options = SourceOptions::default().with_skip_frames(2);
    let mut stream = FrameStream::new(images(8), options);
    let indices: Vec<u64> = stream.by_ref().map(|f| f.index()).collect();
    assert_eq!(indices, vec![0, 3, 6]);
    assert_eq!(stream.decoded(), 8);
  }

  #[test]
  fn maximal_skip_yields_only_first_frame() {
    let options = SourceOptions::default().with_skip_frames(u64::MAX);
    let mut stream = FrameStream::new(images(5), options);
    let indices: Vec<u64> = stream.by_ref().map(|f| f.index()).collect();
    assert_eq!(indices, vec![0]);
    assert_eq!(stream.decoded(), 5);
  }

  #[test]
  fn resize_is_applied_before_yield() {
    let options = SourceOptions::default().with_resize(Some((4, 2)));
    let frame = FrameStream::new(images(1), options).next().unwrap();
    assert_eq!((frame.width(), frame.height()), (4, 2));
  }

  #[test]
  fn size_parsing() {
    assert_eq!(parse_size("640x480"), Ok((640, 480)));
    assert_eq!(parse_size("1280X720"), Ok((1280, 720)));
    assert!(parse_size("640").is_err());
    assert!(parse_size("0x480").is_err());
    assert!(parse_size("ax480").is_err());
  }

  #[test]
  fn exhausted_source_ends_stream() {
    let mut stream = FrameStream::new(images(0), SourceOptions::default());
    assert!(stream.next().is_none());
    assert!(stream.next().is_none());
  }
}
