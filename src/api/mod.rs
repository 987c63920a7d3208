// 后端 API 模块

pub mod client;
pub mod types;

pub use client::ApiClient;
pub use types::*;
