// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};

use crate::domain::models::stage_result::Link;

static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("static selector"));
static LINKS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static selector"));

// Text under these elements is never shown to a reader
const HIDDEN_ELEMENTS: [&str; 5] = ["script", "style", "noscript", "template", "head"];

/// 解析后的页面
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPage {
    pub title: Option<String>,
    /// 可见文本，空白已折叠
    pub text: String,
    pub links: Vec<Link>,
}

/// 从 HTML 中提取标题、可见文本和链接
///
/// # 参数
///
/// * `html` - 页面 HTML
///
/// # 返回值
///
/// 解析结果；HTML 格式错误时尽量容错，不会失败
pub fn parse_page(html: &str) -> ParsedPage {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let links = document
        .select(&LINKS)
        .filter_map(|a| {
            let href = a.value().attr("href")?.trim().to_string();
            Some(Link {
                text: collapse_whitespace(&a.text().collect::<String>()),
                href,
            })
        })
        .collect();

    ParsedPage {
        title,
        text: visible_text(&document),
        links,
    }
}

fn visible_text(document: &Html) -> String {
    let mut pieces: Vec<&str> = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|e| HIDDEN_ELEMENTS.contains(&e.name()))
        });
        if !hidden {
            pieces.push(text);
        }
    }

    collapse_whitespace(&pieces.join(" "))
}

/// 将连续空白折叠为单个空格并去除首尾空白
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
