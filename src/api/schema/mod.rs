// API 数据传输对象模块
// 仅包含跨路由共享的通用结构，各路由自己的DTO放在 routes/<domain>/model.rs

pub mod common;

pub use common::*;
