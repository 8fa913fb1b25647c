// 该文件是 Shenjing （深景近物） 项目的一部分。
// src/proximity.rs - 近距离区域提取
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

//! # 近距离区域提取
//!
//! 将一张深度图转换为若干“近处物体”的轴对齐包围框：
//!
//! 1. 按当前帧的最小/最大值线性归一化到 0-255；
//! 2. 反向阈值：归一化值 **不大于** `close_thresh` 的像素为前景；
//! 3. 一次开运算（腐蚀 + 膨胀）去噪，再一次膨胀连接碎片；
//! 4. 提取最外层轮廓并计算包围框；
//! 5. 丢弃面积小于 `min_box_area` 的包围框。
//!
//! 提取过程没有隐藏状态，同一深度图多次提取结果完全一致。

use image::{GrayImage, Luma};
use imageproc::{
  contours::{BorderType, find_contours},
  distance_transform::Norm,
  morphology::{dilate_mut, open_mut},
};

use crate::frame::DepthMap;

/// 深度极性：归一化后数值越小越近。
///
/// 阈值比较方向由此常量决定，修改深度模型的输出约定时必须同步检查。
pub const NEAR_IS_LOW: bool = true;

pub const CLOSE_THRESH: u8 = 60;
pub const MIN_BOX_AREA: u32 = 1500;
pub const MORPH_KERNEL: u32 = 5;

const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

/// 深度图像素坐标下的包围框
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
  pub x: u32,
  pub y: u32,
  pub w: u32,
  pub h: u32,
}

impl BoundingBox {
  pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
    Self { x, y, w, h }
  }

  pub fn area(&self) -> u64 {
    self.w as u64 * self.h as u64
  }
}

/// 一次提取的结果：包围框与对应的归一化深度图，二者总是成对替换
#[derive(Debug, Clone)]
pub struct Extraction {
  pub boxes: Vec<BoundingBox>,
  pub depth_visual: GrayImage,
  generation: u64,
}

impl Extraction {
  pub fn new(boxes: Vec<BoundingBox>, depth_visual: GrayImage) -> Self {
    Self {
      boxes,
      depth_visual,
      generation: 0,
    }
  }

  /// 由调度器编号，同一编号对应同一次提取；0 表示未编号
  pub fn with_generation(mut self, generation: u64) -> Self {
    self.generation = generation;
    self
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }

  /// 包围框所在坐标空间的宽度
  pub fn source_width(&self) -> u32 {
    self.depth_visual.width()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProximityConfig {
  /// 近距离阈值（0-255，含边界）
  pub close_thresh: u8,
  /// 包围框最小面积（像素）
  pub min_box_area: u32,
  /// 形态学方形结构元素边长，取奇数；偶数向下取到 `2 * (k / 2) + 1`
  pub morph_kernel: u32,
}

impl Default for ProximityConfig {
  fn default() -> Self {
    Self {
      close_thresh: CLOSE_THRESH,
      min_box_area: MIN_BOX_AREA,
      morph_kernel: MORPH_KERNEL,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct ProximityExtractor {
  config: ProximityConfig,
}

impl ProximityExtractor {
  pub fn new(config: ProximityConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &ProximityConfig {
    &self.config
  }

  pub fn extract(&self, depth: &DepthMap) -> Extraction {
    let Some(depth_visual) = normalize(depth) else {
      return Extraction::new(
        Vec::new(),
        GrayImage::new(depth.width() as u32, depth.height() as u32),
      );
    };

    let mask = self.proximity_mask(&depth_visual);
    let boxes = external_boxes(&mask)
      .into_iter()
      .filter(|b| b.w > 0 && b.h > 0 && b.area() >= self.config.min_box_area as u64)
      .collect();

    Extraction::new(boxes, depth_visual)
  }

  /// 阈值化并做形态学清理后的前景掩码（前景为 255）
  pub fn proximity_mask(&self, normalized: &GrayImage) -> GrayImage {
    let thresh = self.config.close_thresh;
    let mut mask = GrayImage::from_fn(normalized.width(), normalized.height(), |x, y| {
      let Luma([v]) = *normalized.get_pixel(x, y);
      let near = if NEAR_IS_LOW { v <= thresh } else { v > thresh };
      Luma([if near { FOREGROUND } else { BACKGROUND }])
    });

    // LInf 范数下半径 k 即 (2k+1)x(2k+1) 方形邻域
    let radius = (self.config.morph_kernel / 2).min(u8::MAX as u32) as u8;
    if radius > 0 {
      open_mut(&mut mask, Norm::LInf, radius);
      dilate_mut(&mut mask, Norm::LInf, radius);
    }
    mask
  }
}

/// 按当前帧最小/最大值线性归一化到 0-255（向零截断）。
///
/// 常数图或空图返回 `None`；非有限值视为最远（255）。
pub fn normalize(depth: &DepthMap) -> Option<GrayImage> {
  if depth.is_empty() {
    return None;
  }
  let (lo, hi) = depth.min_max()?;
  if hi <= lo {
    return None;
  }

  let scale = 255.0 / (hi as f64 - lo as f64);
  let width = depth.width();
  let data = depth.as_slice();
  Some(GrayImage::from_fn(
    width as u32,
    depth.height() as u32,
    |x, y| {
      let v = data[y as usize * width + x as usize];
      let n = if v.is_finite() {
        ((v as f64 - lo as f64) * scale).clamp(0.0, 255.0) as u8
      } else {
        u8::MAX
      };
      Luma([n])
    },
  ))
}

/// 提取最外层轮廓的包围框，顺序为光栅扫描中首次遇到的顺序。
///
/// 四周补一圈背景，使贴边区域与内部区域处理方式相同。
pub fn external_boxes(mask: &GrayImage) -> Vec<BoundingBox> {
  let (width, height) = mask.dimensions();
  if width == 0 || height == 0 {
    return Vec::new();
  }

  let mut padded = GrayImage::new(width + 2, height + 2);
  for (x, y, p) in mask.enumerate_pixels() {
    padded.put_pixel(x + 1, y + 1, *p);
  }

  find_contours::<i32>(&padded)
    .into_iter()
    .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
    .filter_map(|c| {
      let (mut x0, mut y0) = (i32::MAX, i32::MAX);
      let (mut x1, mut y1) = (i32::MIN, i32::MIN);
      for p in &c.points {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
      }
      if c.points.is_empty() {
        return None;
      }
      Some(BoundingBox::new(
        (x0 - 1) as u32,
        (y0 - 1) as u32,
        (x1 - x0 + 1) as u32,
        (y1 - y0 + 1) as u32,
      ))
    })
    .collect()
}
