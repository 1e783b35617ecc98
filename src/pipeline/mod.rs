// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 抓取流水线
///
/// 阶段适配、编排、并发调控和结果落盘
pub mod adapters;
pub mod cancel;
pub mod governor;
pub mod orchestrator;
pub mod policy;
pub mod service;
pub mod sink;
