// 该文件是 Shenjing （深景近物） 项目的一部分。
// src/model/midas.rs - MiDaS 单目深度估计（ONNX）
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

//! MiDaS 输出的是相对逆深度（数值越大越近）。本模块在输出前翻转极性，
//! 使结果满足 [`DepthMap`] 的约定：数值越小越近，范围 `[0, scale]`。
//!
//! URL 形式：`midas:///path/to/midas_v21_small_256.onnx?size=256&scale=10`

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tract_onnx::prelude::*;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{DepthMap, Frame},
  model::{DEPTH_SCALE, Model},
  url_file_path, url_query,
};

const MIDAS_INPUT_SIZE: u32 = 256;
const MIDAS_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const MIDAS_STD: [f32; 3] = [0.229, 0.224, 0.225];

type MidasPlan = TypedSimplePlan<TypedModel>;

#[derive(Error, Debug)]
pub enum MidasError {
  #[error("模型路径必须使用 {0} 方案")]
  SchemeMismatch(&'static str),
  #[error("模型文件不存在: {0}")]
  ModelNotFound(String),
  #[error("ONNX 推理错误: {0}")]
  TractError(String),
  #[error("模型输出形状异常: {0:?}")]
  UnexpectedOutput(Vec<usize>),
}

impl From<TractError> for MidasError {
  fn from(err: TractError) -> Self {
    MidasError::TractError(format!("{:#}", err))
  }
}

pub struct MidasBuilder {
  model_path: String,
  input_size: u32,
  scale: f32,
}

impl FromUrlWithScheme for MidasBuilder {
  const SCHEME: &'static str = "midas";
}

impl FromUrl for MidasBuilder {
  type Error = MidasError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(MidasError::SchemeMismatch(Self::SCHEME));
    }

    Ok(MidasBuilder {
      model_path: url_file_path(url),
      input_size: url_query(url, "size").unwrap_or(MIDAS_INPUT_SIZE),
      scale: url_query(url, "scale").unwrap_or(DEPTH_SCALE),
    })
  }
}

impl MidasBuilder {
  pub fn input_size(mut self, size: u32) -> Self {
    self.input_size = size;
    self
  }

  pub fn scale(mut self, scale: f32) -> Self {
    self.scale = scale;
    self
  }

  pub fn build(self) -> Result<Midas, MidasError> {
    if !std::path::Path::new(&self.model_path).is_file() {
      return Err(MidasError::ModelNotFound(self.model_path));
    }

    info!("加载模型文件: {}", self.model_path);
    let size = self.input_size as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)?
      .with_input_fact(0, f32::fact([1, 3, size, size]).into())?
      .into_optimized()?
      .into_runnable()?;
    info!("模型加载完成, 输入尺寸 {}x{}", size, size);

    Ok(Midas {
      plan,
      input_size: self.input_size,
      scale: self.scale,
    })
  }
}

pub struct Midas {
  plan: MidasPlan,
  input_size: u32,
  scale: f32,
}

impl Drop for Midas {
  fn drop(&mut self) {
    info!("模型资源已释放");
  }
}

impl Midas {
  fn preprocess(&self, image: &RgbImage) -> Tensor {
    let size = self.input_size;
    let resized = image::imageops::resize(image, size, size, FilterType::CatmullRom);
    let size = size as usize;
    tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
      let v = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
      (v - MIDAS_MEAN[c]) / MIDAS_STD[c]
    })
    .into()
  }

  fn postprocess(
    &self,
    output: &Tensor,
    width: usize,
    height: usize,
  ) -> Result<DepthMap, MidasError> {
    let view = output.to_array_view::<f32>()?;
    let shape = view.shape().to_vec();
    let (h, w) = match shape.as_slice() {
      [.., h, w] if *h > 0 && *w > 0 => (*h, *w),
      _ => return Err(MidasError::UnexpectedOutput(shape)),
    };
    let values = view.iter().copied().take(h * w).collect::<Vec<_>>();
    let inverse = DepthMap::from_raw(w, h, values).ok_or(MidasError::UnexpectedOutput(shape))?;

    // 逆深度 -> 深度极性：越近数值越小
    let flipped = match inverse.min_max() {
      Some((lo, hi)) => DepthMap::from_fn(w, h, |x, y| {
        let v = inverse.get(x, y).unwrap_or(lo);
        hi - v + lo
      }),
      None => inverse,
    };

    Ok(flipped.resize(width, height).rescaled(self.scale))
  }
}

impl Model for Midas {
  type Input = Frame;
  type Output = DepthMap;
  type Error = MidasError;

  fn infer(&self, input: &Frame) -> Result<DepthMap, MidasError> {
    let tensor = self.preprocess(input.image());
    let now = std::time::Instant::now();
    let outputs = self.plan.run(tvec!(tensor.into()))?;
    debug!("MiDaS 推理耗时: {:.2?}", now.elapsed());

    let output = outputs
      .first()
      .ok_or_else(|| MidasError::UnexpectedOutput(Vec::new()))?;
    self.postprocess(output, input.width(), input.height())
  }
}
