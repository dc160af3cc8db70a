use paged_report::utils::logging;
use paged_report::{BindingContext, DirectiveEvaluator, PageOptions, RenderConfig, RenderPipeline};
use serde_json::json;

const INVOICE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Invoice</title></head>
<body>
  <h1 data-text="=concat('发票 ', invoice.number)"></h1>
  <p>日期: <span data-format="formatDate(invoice.date, 'YYYY-MM-DD')"></span></p>
  <table>
    <tbody data-repeat="items">
      <tr data-pagebreak="avoid">
        <td data-field="index"></td>
        <td data-field="name"></td>
        <td data-field="price">{{currency:¥}}</td>
        <td data-text="=case(qty > 10, '批量', '零售')"></td>
      </tr>
    </tbody>
  </table>
  <p data-if="invoice.paid">已付款</p>
  <p data-if="!invoice.paid">待付款</p>
  <div data-pagebreak="before" data-field="invoice.note"></div>
</body>
</html>"#;

fn invoice_context() -> BindingContext {
    BindingContext::new(json!({
        "invoice": {"number": "INV-7", "date": "2024-02-29T10:00:00+08:00", "paid": false, "note": "谢谢惠顾"},
        "items": [
            {"name": "螺丝", "price": 1234.5, "qty": 100},
            {"name": "扳手", "price": 88, "qty": 1}
        ]
    }))
}

#[test]
fn test_invoice_template_evaluates() {
    let evaluation =
        DirectiveEvaluator::new().evaluate_with_diagnostics(INVOICE, &invoice_context());
    let html = &evaluation.markup;

    assert!(evaluation.is_clean(), "{:?}", evaluation.diagnostics);
    assert!(html.contains(">发票 INV-7</h1>"));
    assert!(html.contains(">2024-02-29</span>"));
    assert!(html.contains(r#"<td data-field="index">1</td>"#));
    assert!(html.contains(r#"<td data-field="name">扳手</td>"#));
    assert!(html.contains(">¥1,234.50</td>"));
    assert!(html.contains(">¥88.00</td>"));
    assert!(html.contains(">批量</td>"));
    assert!(html.contains(">零售</td>"));
    assert!(html.contains("待付款"));
    assert!(!html.contains("已付款"));
    assert!(html.contains("page-break-before: always"));
    assert!(html.contains(">谢谢惠顾</div>"));
    assert_eq!(html.matches("break-inside: avoid").count(), 2);
}

#[tokio::test]
#[ignore] // 默认忽略，需要本机安装 Chromium：cargo test -- --ignored
async fn test_render_with_chromium() {
    // 初始化日志
    logging::init(true);

    let config = RenderConfig::from_env();
    let pipeline = RenderPipeline::with_chromium(config);

    let result = pipeline
        .render(INVOICE, &invoice_context(), &PageOptions::default())
        .await;
    pipeline.shutdown().await;

    assert!(result.ok, "渲染应该成功: {:?}", result.error);
    let buffer = result.buffer.expect("应有 PDF 内容");
    assert!(buffer.starts_with(b"%PDF"));
    assert!(result.estimated_pages >= 2);
    assert_eq!(pipeline.admission().in_flight, 0);
}
