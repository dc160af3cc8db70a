//! 固定的打印样式表，随二进制一起编译，渲染时不做任何外部请求

use super::options::PageOptions;

const BASE_STYLESHEET: &str = include_str!("../../assets/print.css");

/// 基础样式加上与打印参数一致的 `@page` 规则
pub fn print_stylesheet(options: &PageOptions) -> String {
    let rule = options.page_rule();
    let mut css = String::with_capacity(BASE_STYLESHEET.len() + rule.len() + 1);
    css.push_str(BASE_STYLESHEET);
    css.push('\n');
    css.push_str(&rule);
    css
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::options::{Margins, PageFormat};

    #[test]
    fn test_stylesheet_is_local_and_carries_page_rule() {
        let options = PageOptions {
            format: PageFormat::Letter,
            margins: Margins::uniform("1in"),
            ..Default::default()
        };
        let css = print_stylesheet(&options);
        assert!(!css.contains("@import"));
        assert!(!css.contains("url("));
        assert!(css.contains("@page { size: 8.50in 11.00in; margin: 1in 1in 1in 1in; }"));
    }
}
