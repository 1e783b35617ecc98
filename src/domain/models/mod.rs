// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// - 抓取请求（scrape_request）：请求及其覆盖项、阶段枚举
/// - 阶段结果（stage_result）：每个阶段的成功/失败/跳过结果及产出
/// - 抓取记录（scrape_record）：一次请求的汇总记录与整体状态
pub mod scrape_record;
pub mod scrape_request;
pub mod stage_result;
