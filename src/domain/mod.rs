// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域层模块
///
/// 包含核心数据模型（models）以及存储抽象接口（repositories），
/// 不依赖任何具体的提供方实现。
pub mod models;
pub mod repositories;
