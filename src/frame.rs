// 该文件是 Shenjing （深景近物） 项目的一部分。
// src/frame.rs - 视频帧与深度图定义
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

use image::{ImageBuffer, Luma, RgbImage, imageops::FilterType};

const RGB_CHANNELS: usize = 3;

/// 输入帧：RGB 图像 + 源帧序号
///
/// `index` 是输入源解码计数，抽帧时允许出现间隔，但严格递增。
#[derive(Debug, Clone)]
pub struct Frame {
  index: u64,
  image: RgbImage,
}

impl Frame {
  pub fn new(index: u64, image: RgbImage) -> Self {
    Self { index, image }
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }

  pub fn height(&self) -> usize {
    self.image.height() as usize
  }

  pub fn width(&self) -> usize {
    self.image.width() as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// NHWC 排列的原始像素
  pub fn as_nhwc(&self) -> &[u8] {
    self.image.as_raw()
  }
}

/// 深度图
///
/// 行优先存储的 `f32` 数组。约定数值越小距离越近，
/// 数值范围由深度模型决定（通常为 `[0, depth_scale]`）。
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
  width: usize,
  height: usize,
  data: Box<[f32]>,
}

impl DepthMap {
  /// 由行优先数据构造；长度不匹配时返回 `None`
  pub fn from_raw(width: usize, height: usize, data: Vec<f32>) -> Option<Self> {
    if data.len() != width * height {
      return None;
    }
    Some(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f32) -> Self {
    let mut data = Vec::with_capacity(width * height);
    for y in 0..height {
      for x in 0..width {
        data.push(f(x, y));
      }
    }
    Self {
      width,
      height,
      data: data.into_boxed_slice(),
    }
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn get(&self, x: usize, y: usize) -> Option<f32> {
    if x >= self.width || y >= self.height {
      return None;
    }
    Some(self.data[y * self.width + x])
  }

  /// 有限值中的最小值与最大值；全部为 NaN/无穷或为空时返回 `None`
  pub fn min_max(&self) -> Option<(f32, f32)> {
    self
      .data
      .iter()
      .copied()
      .filter(|v| v.is_finite())
      .fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
      })
  }

  /// 双线性重采样到指定尺寸，尺寸一致时直接克隆
  pub fn resize(&self, width: usize, height: usize) -> DepthMap {
    if width == self.width && height == self.height {
      return self.clone();
    }
    if self.is_empty() || width == 0 || height == 0 {
      return DepthMap {
        width,
        height,
        data: vec![0.0; width * height].into_boxed_slice(),
      };
    }

    // image 的浮点重采样会把结果钳位到 [0, 1]，先归一化再还原
    let (lo, hi) = self.min_max().unwrap_or((0.0, 0.0));
    let span = if hi > lo { hi - lo } else { 1.0 };
    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
      ImageBuffer::from_fn(self.width as u32, self.height as u32, |x, y| {
        let v = self.data[y as usize * self.width + x as usize];
        let v = if v.is_finite() { v } else { hi };
        Luma([(v - lo) / span])
      });
    let resized =
      image::imageops::resize(&buffer, width as u32, height as u32, FilterType::Triangle);

    let data = resized
      .into_raw()
      .into_iter()
      .map(|v| lo + v * span)
      .collect::<Vec<_>>();

    DepthMap {
      width,
      height,
      data: data.into_boxed_slice(),
    }
  }

  /// 将数值线性缩放到 `[0, scale]`；常数图返回全零
  pub fn rescaled(&self, scale: f32) -> DepthMap {
    let data = match self.min_max() {
      Some((lo, hi)) if hi > lo => self
        .data
        .iter()
        .map(|v| scale * (v - lo) / (hi - lo))
        .collect::<Vec<_>>(),
      _ => vec![0.0; self.data.len()],
    };
    DepthMap {
      width: self.width,
      height: self.height,
      data: data.into_boxed_slice(),
    }
  }
}

impl From<ImageBuffer<Luma<f32>, Vec<f32>>> for DepthMap {
  fn from(buffer: ImageBuffer<Luma<f32>, Vec<f32>>) -> Self {
    let (width, height) = buffer.dimensions();
    Self {
      width: width as usize,
      height: height as usize,
      data: buffer.into_raw().into_boxed_slice(),
    }
  }
}
