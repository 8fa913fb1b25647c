// 该文件是 Shenjing （深景近物） 项目的一部分。
// src/output/draw.rs - 近距离区域叠加绘制
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

use std::sync::{Arc, Mutex};

use ab_glyph::{FontRef, InvalidFont, PxScale};
use image::{GrayImage, Rgb, RgbImage, imageops::FilterType};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};

use crate::proximity::{BoundingBox, Extraction};

pub const DISPLAY_WIDTH: u32 = 2500;

// 文本渲染常量
const LABEL: &str = "Nearby";
const LABEL_FONT_SIZE: f32 = 32.0;
const LABEL_OFFSET: i32 = 10; // 标签底部距框顶的距离
const BOX_THICKNESS: i32 = 3;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色

// 等间隔采样的 plasma 色表锚点，其余颜色线性插值
const PLASMA_ANCHORS: [[u8; 3]; 9] = [
  [13, 8, 135],
  [75, 3, 161],
  [125, 3, 168],
  [168, 34, 150],
  [203, 70, 121],
  [229, 107, 93],
  [248, 148, 65],
  [253, 195, 40],
  [240, 249, 33],
];

/// 显示图像：叠加包围框的帧与最近一次的伪彩色深度图
#[derive(Debug, Clone)]
pub struct DisplayFrame {
  pub view: RgbImage,
  pub depth_view: Option<Arc<RgbImage>>,
}

type DepthViewCache = Option<(u64, Arc<RgbImage>)>;

pub struct Draw {
  display_width: u32,
  font: FontRef<'static>,
  font_scale: PxScale,
  box_color: Rgb<u8>,
  palette: [Rgb<u8>; 256],
  depth_cache: Mutex<DepthViewCache>,
}

impl Draw {
  pub fn new() -> Result<Self, InvalidFont> {
    let font = FontRef::try_from_slice(include_bytes!("../../assets/DejaVuSans.ttf"))?;

    Ok(Self {
      display_width: DISPLAY_WIDTH,
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      box_color: Rgb(BOX_COLOR),
      palette: plasma_palette(),
      depth_cache: Mutex::new(None),
    })
  }

  pub fn with_display_width(mut self, display_width: u32) -> Self {
    self.display_width = display_width.max(1);
    self.depth_cache = Mutex::new(None);
    self
  }

  pub fn display_width(&self) -> u32 {
    self.display_width
  }

  /// 叠加包围框的帧与伪彩色深度图
  pub fn compose(&self, frame: &RgbImage, extraction: Option<&Extraction>) -> DisplayFrame {
    DisplayFrame {
      view: self.overlay(frame, extraction),
      depth_view: extraction.map(|extraction| self.depth_view(extraction)),
    }
  }

  /// 缩放帧到显示宽度并绘制包围框。
  ///
  /// 包围框位于深度图坐标系，按 `display_width / source_width` 统一缩放。
  /// 绘制只修改新生成的显示图像，不改变 `extraction`。
  pub fn overlay(&self, frame: &RgbImage, extraction: Option<&Extraction>) -> RgbImage {
    let mut view = resize_with_aspect(frame, self.display_width);
    if let Some(extraction) = extraction {
      let source_width = extraction.source_width().max(1);
      let scale = self.display_width as f32 / source_width as f32;
      self.draw_boxes(&mut view, &extraction.boxes, scale);
    }
    view
  }

  /// 缩放到显示宽度的伪彩色深度图。
  ///
  /// 按 [`Extraction::generation`] 缓存：复用结果的帧不会重复着色与缩放。
  /// 未编号（0）的提取结果每次重新生成。
  pub fn depth_view(&self, extraction: &Extraction) -> Arc<RgbImage> {
    let generation = extraction.generation();
    let mut cache = self
      .depth_cache
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());

    if generation != 0
      && let Some((cached, view)) = cache.as_ref()
      && *cached == generation
    {
      return Arc::clone(view);
    }

    let view = Arc::new(resize_with_aspect(
      &self.colorize(&extraction.depth_visual),
      self.display_width,
    ));
    if generation != 0 {
      *cache = Some((generation, Arc::clone(&view)));
    }
    view
  }

  pub fn draw_boxes(&self, image: &mut RgbImage, boxes: &[BoundingBox], scale: f32) {
    for b in boxes {
      let (x, y, w, h) = scale_box(b, scale);
      if w == 0 || h == 0 {
        continue;
      }

      // 向内加粗
      for t in 0..BOX_THICKNESS {
        let (tw, th) = (w as i32 - 2 * t, h as i32 - 2 * t);
        if tw <= 0 || th <= 0 {
          break;
        }
        let rect = Rect::at(x + t, y + t).of_size(tw as u32, th as u32);
        draw_hollow_rect_mut(image, rect, self.box_color);
      }

      let label_y = y - LABEL_OFFSET - self.font_scale.y as i32;
      draw_text_mut(
        image,
        self.box_color,
        x,
        label_y.max(0),
        self.font_scale,
        &self.font,
        LABEL,
      );
    }
  }

  /// 归一化深度图映射为 plasma 伪彩色
  pub fn colorize(&self, depth_visual: &GrayImage) -> RgbImage {
    RgbImage::from_fn(depth_visual.width(), depth_visual.height(), |x, y| {
      self.palette[depth_visual.get_pixel(x, y).0[0] as usize]
    })
  }
}

/// 保持宽高比缩放到指定宽度，新高度向下取整
pub fn resize_with_aspect(image: &RgbImage, width: u32) -> RgbImage {
  let (w, h) = image.dimensions();
  if w == 0 || h == 0 || w == width {
    return image.clone();
  }
  let height = ((h as u64 * width as u64) / w as u64).max(1) as u32;
  image::imageops::resize(image, width, height, FilterType::Triangle)
}

/// 将包围框缩放到显示坐标，各分量向零截断
pub fn scale_box(b: &BoundingBox, scale: f32) -> (i32, i32, u32, u32) {
  (
    (b.x as f32 * scale) as i32,
    (b.y as f32 * scale) as i32,
    (b.w as f32 * scale) as u32,
    (b.h as f32 * scale) as u32,
  )
}

fn plasma_palette() -> [Rgb<u8>; 256] {
  let segments = (PLASMA_ANCHORS.len() - 1) as f32;
  std::array::from_fn(|i| {
    let t = i as f32 / 255.0 * segments;
    let k = (t.floor() as usize).min(PLASMA_ANCHORS.len() - 2);
    let f = t - k as f32;
    let (a, b) = (PLASMA_ANCHORS[k], PLASMA_ANCHORS[k + 1]);
    Rgb(std::array::from_fn(|c| {
      (a[c] as f32 + (b[c] as f32 - a[c] as f32) * f).round() as u8
    }))
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn extraction(width: u32, height: u32, boxes: Vec<BoundingBox>) -> Extraction {
    Extraction::new(boxes, GrayImage::new(width, height))
  }

  #[test]
  fn boxes_scale_by_display_ratio() {
    let b = BoundingBox::new(100, 40, 200, 80);
    assert_eq!(scale_box(&b, 2500.0 / 1000.0), (250, 100, 500, 200));
    // 截断
    let b = BoundingBox::new(3, 3, 3, 3);
    assert_eq!(scale_box(&b, 1.5), (4, 4, 4, 4));
  }

  #[test]
  fn resize_keeps_aspect() {
    let image = RgbImage::new(1000, 750);
    assert_eq!(resize_with_aspect(&image, 2500).dimensions(), (2500, 1875));
    let image = RgbImage::new(640, 481);
    assert_eq!(resize_with_aspect(&image, 320).dimensions(), (320, 240));
  }

  #[test]
  fn compose_draws_scaled_box_and_keeps_extraction() {
    let draw = Draw::new().unwrap().with_display_width(250);
    let frame = RgbImage::new(100, 80);
    let result = extraction(100, 80, vec![BoundingBox::new(20, 30, 40, 20)]);
    let before = result.boxes.clone();

    let display = draw.compose(&frame, Some(&result));
    assert_eq!(result.boxes, before);
    assert_eq!(display.view.dimensions(), (250, 200));

    // 框在 (50, 75) 起、尺寸 100x50
    assert_eq!(*display.view.get_pixel(50, 100), Rgb(BOX_COLOR));
    assert_eq!(*display.view.get_pixel(52, 100), Rgb(BOX_COLOR));
    assert_eq!(*display.view.get_pixel(149, 100), Rgb(BOX_COLOR));
    assert_eq!(*display.view.get_pixel(100, 100), Rgb([0, 0, 0]));

    let depth_view = display.depth_view.unwrap();
    assert_eq!(depth_view.dimensions(), (250, 200));
  }

  #[test]
  fn compose_without_result_only_resizes() {
    let draw = Draw::new().unwrap().with_display_width(50);
    let display = draw.compose(&RgbImage::new(100, 80), None);
    assert_eq!(display.view.dimensions(), (50, 40));
    assert!(display.view.pixels().all(|p| *p == Rgb([0, 0, 0])));
    assert!(display.depth_view.is_none());
  }

  #[test]
  fn depth_view_is_built_once_per_generation() {
    let draw = Draw::new().unwrap().with_display_width(64);
    let first = extraction(32, 16, Vec::new()).with_generation(1);

    let a = draw.depth_view(&first);
    let b = draw.depth_view(&first);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.dimensions(), (64, 32));

    let second = extraction(32, 16, Vec::new()).with_generation(2);
    let c = draw.depth_view(&second);
    assert!(!Arc::ptr_eq(&a, &c));
    assert!(Arc::ptr_eq(&c, &draw.depth_view(&second)));

    // 未编号的结果不进入缓存
    let unnumbered = extraction(32, 16, Vec::new());
    assert!(!Arc::ptr_eq(
      &draw.depth_view(&unnumbered),
      &draw.depth_view(&unnumbered)
    ));
    assert!(Arc::ptr_eq(&c, &draw.depth_view(&second)));
  }

  #[test]
  fn overlay_skips_depth_view() {
    let draw = Draw::new().unwrap().with_display_width(50);
    let result = extraction(100, 80, vec![BoundingBox::new(10, 10, 40, 40)]).with_generation(1);
    let view = draw.overlay(&RgbImage::new(100, 80), Some(&result));
    assert_eq!(view.dimensions(), (50, 40));
    assert!(draw.depth_cache.lock().unwrap().is_none());
  }

  #[test]
  fn plasma_endpoints() {
    let palette = plasma_palette();
    assert_eq!(palette[0], Rgb([13, 8, 135]));
    assert_eq!(palette[255], Rgb([240, 249, 33]));

    let draw = Draw::new().unwrap();
    let gray = GrayImage::from_fn(2, 1, |x, _| image::Luma([if x == 0 { 0 } else { 255 }]));
    let colored = draw.colorize(&gray);
    assert_eq!(*colored.get_pixel(0, 0), Rgb([13, 8, 135]));
    assert_eq!(*colored.get_pixel(1, 0), Rgb([240, 249, 33]));
  }
}
