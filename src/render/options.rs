//! 页面选项
//!
//! 纸张格式、页边距和页面尺寸字符串，统一换算成英寸交给打印接口。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// CSS 像素密度（每英寸）
pub const CSS_PX_PER_INCH: f64 = 96.0;

/// 纸张格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageFormat {
    A3,
    #[default]
    A4,
    A5,
    Letter,
    Legal,
    Tabloid,
}

impl PageFormat {
    /// 纵向尺寸（宽, 高），单位英寸
    pub fn dimensions_in(self) -> (f64, f64) {
        match self {
            PageFormat::A3 => (11.69, 16.54),
            PageFormat::A4 => (8.27, 11.69),
            PageFormat::A5 => (5.83, 8.27),
            PageFormat::Letter => (8.5, 11.0),
            PageFormat::Legal => (8.5, 14.0),
            PageFormat::Tabloid => (11.0, 17.0),
        }
    }
}

impl FromStr for PageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a3" => Ok(PageFormat::A3),
            "a4" => Ok(PageFormat::A4),
            "a5" => Ok(PageFormat::A5),
            "letter" => Ok(PageFormat::Letter),
            "legal" => Ok(PageFormat::Legal),
            "tabloid" => Ok(PageFormat::Tabloid),
            other => Err(format!("未知的纸张格式: {}", other)),
        }
    }
}

impl fmt::Display for PageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 页边距（CSS 长度字符串）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub top: String,
    pub right: String,
    pub bottom: String,
    pub left: String,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            top: "20mm".to_string(),
            right: "15mm".to_string(),
            bottom: "20mm".to_string(),
            left: "15mm".to_string(),
        }
    }
}

impl Margins {
    /// 四边相同的页边距
    pub fn uniform(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            top: value.clone(),
            right: value.clone(),
            bottom: value.clone(),
            left: value,
        }
    }
}

/// 单次渲染的页面选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageOptions {
    pub format: PageFormat,
    pub margins: Margins,
    /// 显式页面尺寸，如 `"210mm 297mm"` 或 `"Letter"`，优先于 `format`
    pub page_size: Option<String>,
    pub landscape: bool,
    pub print_background: bool,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            format: PageFormat::A4,
            margins: Margins::default(),
            page_size: None,
            landscape: false,
            print_background: true,
        }
    }
}

/// 换算后的打印参数，单位英寸
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PdfSpec {
    pub paper_width_in: f64,
    pub paper_height_in: f64,
    pub margin_top_in: f64,
    pub margin_right_in: f64,
    pub margin_bottom_in: f64,
    pub margin_left_in: f64,
    pub print_background: bool,
    pub scale: f64,
}

impl PdfSpec {
    /// 可打印区域高度（CSS 像素，已按缩放折算）
    pub fn printable_height_px(&self) -> f64 {
        let inches = (self.paper_height_in - self.margin_top_in - self.margin_bottom_in).max(0.1);
        inches * CSS_PX_PER_INCH / self.scale.max(0.1)
    }

    /// 由内容高度估算页数，至少为 1
    pub fn estimate_pages(&self, content_height_px: f64) -> u32 {
        if !content_height_px.is_finite() || content_height_px <= 0.0 {
            return 1;
        }
        let pages = (content_height_px / self.printable_height_px()).ceil();
        pages.clamp(1.0, u32::MAX as f64) as u32
    }
}

impl PageOptions {
    /// 纸张尺寸（宽, 高），单位英寸，已考虑横向
    pub fn paper_size_in(&self) -> (f64, f64) {
        let (w, h) = self
            .page_size
            .as_deref()
            .and_then(parse_page_size)
            .unwrap_or_else(|| self.format.dimensions_in());
        if self.landscape && h > w {
            (h, w)
        } else {
            (w, h)
        }
    }

    /// 生成打印参数；无法解析的边距按 0 处理
    pub fn pdf_spec(&self, scale: f64) -> PdfSpec {
        let (paper_width_in, paper_height_in) = self.paper_size_in();
        PdfSpec {
            paper_width_in,
            paper_height_in,
            margin_top_in: parse_length_in(&self.margins.top).unwrap_or(0.0),
            margin_right_in: parse_length_in(&self.margins.right).unwrap_or(0.0),
            margin_bottom_in: parse_length_in(&self.margins.bottom).unwrap_or(0.0),
            margin_left_in: parse_length_in(&self.margins.left).unwrap_or(0.0),
            print_background: self.print_background,
            scale,
        }
    }

    /// 与打印参数一致的 `@page` 规则
    pub fn page_rule(&self) -> String {
        let (w, h) = self.paper_size_in();
        format!(
            "@page {{ size: {:.2}in {:.2}in; margin: {} {} {} {}; }}",
            w, h, self.margins.top, self.margins.right, self.margins.bottom, self.margins.left
        )
    }
}

/// 解析页面尺寸字符串：单个格式名，或两个 CSS 长度
pub fn parse_page_size(input: &str) -> Option<(f64, f64)> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    match parts.as_slice() {
        [name] => name.parse::<PageFormat>().ok().map(PageFormat::dimensions_in),
        [w, h] => Some((parse_length_in(w)?, parse_length_in(h)?)),
        _ => None,
    }
}

/// 把 CSS 长度（mm / cm / in / px / pt）换算成英寸；纯数字按像素处理
pub fn parse_length_in(input: &str) -> Option<f64> {
    let s = input.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number.parse().ok()?;
    if value < 0.0 {
        return None;
    }
    let inches = match unit.trim().to_ascii_lowercase().as_str() {
        "mm" => value / 25.4,
        "cm" => value / 2.54,
        "in" => value,
        "pt" => value / 72.0,
        "px" | "" => value / CSS_PX_PER_INCH,
        _ => return None,
    };
    Some(inches)
}
