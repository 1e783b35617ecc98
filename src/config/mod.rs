// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理流水线策略、能力提供方、存储和指标等配置
pub mod settings;
