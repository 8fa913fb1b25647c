// 该文件是 Shenjing （深景近物） 项目的一部分。
// src/lib.rs - 库主文件
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

pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod proximity;
pub mod scheduler;
pub mod task;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 从 URL 中取出本地文件路径（解码百分号转义）
pub(crate) fn url_file_path(url: &url::Url) -> String {
  let raw = match url.host_str() {
    // `scheme://relative/path` 形式，主机名部分也是路径
    Some(host) if !host.is_empty() => format!("{}{}", host, url.path()),
    _ => url.path().to_string(),
  };
  urlencoding::decode(&raw)
    .map(|s| s.into_owned())
    .unwrap_or(raw)
}

/// 读取 URL 查询参数并解析，缺省或解析失败时返回 `None`
pub(crate) fn url_query<T: std::str::FromStr>(url: &url::Url, key: &str) -> Option<T> {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .and_then(|(_, v)| v.parse().ok())
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  #[test]
  fn file_path_handles_absolute_and_relative_forms() {
    let url = Url::parse("image:///tmp/a%20b.png").unwrap();
    assert_eq!(url_file_path(&url), "/tmp/a b.png");

    let url = Url::parse("depthdir://data/depth").unwrap();
    assert_eq!(url_file_path(&url), "data/depth");
  }

  #[test]
  fn query_parses_typed_values() {
    let url = Url::parse("midas:///m.onnx?size=256&scale=abc").unwrap();
    assert_eq!(url_query::<u32>(&url, "size"), Some(256));
    assert_eq!(url_query::<f32>(&url, "scale"), None);
    assert_eq!(url_query::<u32>(&url, "missing"), None);
  }
}
