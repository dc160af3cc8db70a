//! 模板与数据文件的读取

use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::template::BindingContext;

/// 读取模板文件
pub async fn read_template(path: impl AsRef<Path>) -> AppResult<String> {
    let path = path.as_ref();
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| AppError::File {
            path: path.display().to_string(),
            source,
        })
}

/// 读取 JSON 数据文件作为绑定上下文
pub async fn read_context(path: impl AsRef<Path>) -> AppResult<BindingContext> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| AppError::File {
            path: path.display().to_string(),
            source,
        })?;
    Ok(BindingContext::from_json_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn temp_file(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("paged_report_{}_{}", std::process::id(), name));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_read_context() {
        let path = temp_file("data.json", r#"{"site": {"name": "Acme"}}"#);
        let context = assert_ok!(read_context(&path).await);
        assert_eq!(context.text("site.name"), "Acme");
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_read_errors_are_typed() {
        let missing = assert_err!(read_template("/nonexistent/paged_report/t.html").await);
        assert!(matches!(missing, AppError::File { .. }));

        let path = temp_file("broken.json", "{not json");
        let broken = assert_err!(read_context(&path).await);
        assert!(matches!(broken, AppError::Json(_)));
        std::fs::remove_file(path).unwrap();
    }
}
