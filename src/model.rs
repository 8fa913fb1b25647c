// 该文件是 Shenjing （深景近物） 项目的一部分。
// src/model.rs - 深度估计模型
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

use thiserror::Error;

use crate::{
  FromUrl,
  frame::{DepthMap, Frame},
};

/// 深度图默认数值上限
pub const DEPTH_SCALE: f32 = 10.0;

/// 推理模型
///
/// 深度模型的 `Output` 为 [`DepthMap`]，数值越小越近。
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

impl<M: Model> Model for &M {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

#[cfg(feature = "model_depth_file")]
mod depth_file;
#[cfg(feature = "model_depth_file")]
pub use self::depth_file::{DepthFileError, DepthFileModel};

#[cfg(feature = "model_midas")]
mod midas;
#[cfg(feature = "model_midas")]
pub use self::midas::{Midas, MidasBuilder, MidasError};

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "model_depth_file")]
  #[error("深度文件回放错误: {0}")]
  DepthFileError(#[from] DepthFileError),
  #[cfg(feature = "model_midas")]
  #[error("MiDaS 模型错误: {0}")]
  MidasError(#[from] MidasError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum ModelWrapper {
  #[cfg(feature = "model_depth_file")]
  DepthFile(DepthFileModel),
  #[cfg(feature = "model_midas")]
  Midas(Midas),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_depth_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == DepthFileModel::SCHEME {
        let model = DepthFileModel::from_url(url)?;
        return Ok(ModelWrapper::DepthFile(model));
      }
    }
    #[cfg(feature = "model_midas")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == MidasBuilder::SCHEME {
        let model = MidasBuilder::from_url(url)?.build()?;
        return Ok(ModelWrapper::Midas(model));
      }
    }
    Err(ModelError::SchemeMismatch)
  }
}

impl Model for ModelWrapper {
  type Input = Frame;
  type Output = DepthMap;
  type Error = ModelError;

  fn infer(&self, input: &Frame) -> Result<DepthMap, ModelError> {
    match self {
      #[cfg(feature = "model_depth_file")]
      ModelWrapper::DepthFile(model) => model.infer(input).map_err(ModelError::from),
      #[cfg(feature = "model_midas")]
      ModelWrapper::Midas(model) => model.infer(input).map_err(ModelError::from),
    }
  }
}
