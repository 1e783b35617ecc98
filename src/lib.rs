// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含抓取请求、阶段结果、抓取记录和存储仓库接口
pub mod domain;

/// 引擎模块
///
/// 渲染、视觉和文本处理等能力提供方
pub mod engines;

/// 基础设施模块
///
/// 提供存储实现和指标导出
pub mod infrastructure;

/// 流水线模块
///
/// 阶段编排、并发调控和结果落盘
pub mod pipeline;

/// 工具模块
///
/// 提供错误类型、重试策略和日志初始化
pub mod utils;
