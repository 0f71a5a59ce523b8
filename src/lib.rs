//! Warden - Rust 游戏服务器守护进程
//!
//! 模块划分：
//! - **backup**: 按日期与时刻分层的存档备份，自动轮转
//! - **behaviors**: 周期行为（自动备份、物品、台词、效果、召唤、音效）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **control**: pid 文件、kill 文件请求、存活检测
//! - **core**: 子进程监管、命令通道、停止信号、运行周期
//! - **observability**: 日志初始化与轮转

pub mod backup;
pub mod behaviors;
pub mod config;
pub mod control;
pub mod core;
pub mod observability;
