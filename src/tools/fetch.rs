//! Fetch 工具：域名白名单、超时、结果大小限制
//!
//! 仅允许配置中的域名；GET 请求带超时与 User-Agent；
//! 响应超过 max_result_chars 时截断并标记 truncated。

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::tools::{Tool, ToolKind};

/// Fetch 工具：抓取 URL 内容，仅允许白名单域名
pub struct FetchTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
}

/// 从 URL 中提取 host（不含端口与路径）
fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let url = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
    let host = url.split('/').next()?;
    let host = host.split(':').next()?;
    Some(host.to_lowercase())
}

impl FetchTool {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_result_chars: usize) -> Self {
        let allowed_domains = allowed_domains.into_iter().map(|s| s.to_lowercase()).collect();
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("ant/0.1")
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains,
            max_result_chars,
        }
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch the content of an allow-listed URL. Args: {\"url\": \"https://...\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"url": {"type": "string"}},
            "required": ["url"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Network
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing 'url'".to_string())?;

        let domain = extract_domain(url).ok_or_else(|| format!("unparsable url: {}", url))?;
        if !self.allowed_domains.contains(&domain) {
            return Err(format!("domain not allowed: {}", domain));
        }

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("http status {}", status));
        }
        let body = resp.text().await.map_err(|e| format!("read failed: {}", e))?;

        let truncated = body.chars().count() > self.max_result_chars;
        let content: String = body.chars().take(self.max_result_chars).collect();
        Ok(json!({
            "url": url,
            "content": content,
            "truncated": truncated,
            "success": true
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://docs.rs/tokio/latest"),
            Some("docs.rs".to_string())
        );
        assert_eq!(
            extract_domain("http://example.com:8080/a"),
            Some("example.com".to_string())
        );
        assert_eq!(extract_domain("ftp://nope"), None);
    }

    #[tokio::test]
    async fn test_rejects_unlisted_domain() {
        let tool = FetchTool::new(vec!["docs.rs".into()], 5, 100);
        let err = tool
            .execute(json!({"url": "https://evil.example/x"}))
            .await
            .unwrap_err();
        assert!(err.contains("not allowed"));
    }
}
