// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod factory;
pub mod html_parser;
pub mod nlp_engine;
pub mod playwright_engine;
pub mod remote_vision_engine;
pub mod reqwest_engine;
pub mod traits;
