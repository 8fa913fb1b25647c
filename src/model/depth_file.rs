// 该文件是 Shenjing （深景近物） 项目的一部分。
// src/model/depth_file.rs - 预计算深度图回放
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

//! 从目录中按帧序号读取预先计算好的深度图，用于离线复现与调试。
//!
//! URL 形式：`depthdir:///path/to/dir?scale=10&ext=png`
//!
//! 第 `n` 帧对应文件 `<dir>/<n:06>.<ext>`，灰度图（8 位或 16 位），
//! 数值越小越近；读取后线性映射到 `[0, scale]`。

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{DepthMap, Frame},
  model::{DEPTH_SCALE, Model},
  url_file_path, url_query,
};

#[derive(Error, Debug)]
pub enum DepthFileError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("深度目录不存在: {0}")]
  DirectoryNotFound(PathBuf),
  #[error("第 {0} 帧没有对应的深度文件: {1}")]
  MissingFrame(u64, PathBuf),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

pub struct DepthFileModel {
  directory: PathBuf,
  extension: String,
  scale: f32,
}

impl FromUrlWithScheme for DepthFileModel {
  const SCHEME: &'static str = "depthdir";
}

impl FromUrl for DepthFileModel {
  type Error = DepthFileError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DepthFileError::SchemeMismatch);
    }

    let directory = PathBuf::from(url_file_path(url));
    if !directory.is_dir() {
      return Err(DepthFileError::DirectoryNotFound(directory));
    }

    let extension = url_query(url, "ext").unwrap_or_else(|| "png".to_string());
    let scale = url_query(url, "scale").unwrap_or(DEPTH_SCALE);

    info!(
      "深度回放目录: {}, 扩展名: {}, 数值上限: {}",
      directory.display(),
      extension,
      scale
    );

    Ok(DepthFileModel {
      directory,
      extension,
      scale,
    })
  }
}

impl DepthFileModel {
  pub fn new(directory: impl Into<PathBuf>, scale: f32) -> Self {
    Self {
      directory: directory.into(),
      extension: "png".to_string(),
      scale,
    }
  }

  pub fn frame_path(&self, index: u64) -> PathBuf {
    self
      .directory
      .join(format!("{:06}.{}", index, self.extension))
  }
}

impl Model for DepthFileModel {
  type Input = Frame;
  type Output = DepthMap;
  type Error = DepthFileError;

  fn infer(&self, input: &Frame) -> Result<DepthMap, DepthFileError> {
    let path = self.frame_path(input.index());
    if !path.is_file() {
      return Err(DepthFileError::MissingFrame(input.index(), path));
    }

    let mut luma = image::open(&path)?.to_luma32f();
    debug!(
      "读取深度文件 {}: {}x{}",
      path.display(),
      luma.width(),
      luma.height()
    );

    luma.iter_mut().for_each(|v| *v *= self.scale);
    Ok(DepthMap::from(luma))
  }
}
