use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{PageFetcher, RemoteItem, Resource};
use crate::config::VkApiConfig;
use crate::error::FetchError;

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

#[derive(Debug, Deserialize)]
struct ItemsPage {
    /// Reported total; informational only, exhaustion is decided by page length.
    #[serde(default)]
    count: i64,
    items: Vec<RemoteItem>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

/// Decode a VK method response. The body is either `{"response": {...}}` or
/// `{"error": {...}}`; anything else is a decode failure.
pub(crate) fn decode_items(body: &str) -> Result<Vec<RemoteItem>, FetchError> {
    let mut value: Value = serde_json::from_str(body)?;
    let Some(obj) = value.as_object_mut() else {
        return Err(FetchError::Envelope("is not a JSON object"));
    };
    if let Some(err) = obj.remove("error") {
        let err: ApiError = serde_json::from_value(err)?;
        return Err(FetchError::Api {
            code: err.error_code,
            message: err.error_msg,
        });
    }
    let Some(response) = obj.remove("response") else {
        return Err(FetchError::Envelope("has no `response` field"));
    };
    let page: ItemsPage = serde_json::from_value(response)?;
    debug!(reported_total = page.count, items = page.items.len(), "decoded page");
    Ok(page.items)
}

/// VK API client for the city/university catalog methods.
#[derive(Debug, Clone)]
pub struct VkClient {
    http: Client,
    base_url: url::Url,
    version: String,
    token: String,
    country_id: i64,
}

impl VkClient {
    /// `idle_per_host` should match the worker count so every worker keeps a
    /// warm connection.
    pub fn new(cfg: &VkApiConfig, idle_per_host: usize) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("catalog-ingest/", env!("CARGO_PKG_VERSION")))
            .timeout(cfg.timeout)
            .pool_max_idle_per_host(idle_per_host.max(1))
            .build()?;
        Self::with_http(cfg, http)
    }

    /// Use a caller-built HTTP client; `cfg.timeout` is not applied.
    pub fn with_http(cfg: &VkApiConfig, http: Client) -> anyhow::Result<Self> {
        let base_url = url::Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid VK API base url {:?}", cfg.base_url))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("VK API base url {:?} cannot carry a path", cfg.base_url));
        }
        Ok(Self {
            http,
            base_url,
            version: cfg.version.clone(),
            token: cfg.token.clone(),
            country_id: cfg.country_id,
        })
    }

    fn page_url(&self, resource: Resource, offset: u32, count: u32) -> url::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("method").push(resource.method());
        }
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("v", &self.version);
            q.append_pair("access_token", &self.token);
            match resource {
                Resource::Cities { need_all } => {
                    q.append_pair("country_id", &self.country_id.to_string());
                    if need_all {
                        q.append_pair("need_all", "1");
                    }
                }
                Resource::Universities { city_id } => {
                    q.append_pair("city_id", &city_id.to_string());
                }
            }
            q.append_pair("count", &count.to_string());
            q.append_pair("offset", &offset.to_string());
        }
        url
    }
}

#[async_trait]
impl PageFetcher for VkClient {
    #[instrument(skip(self, resource), fields(%resource))]
    async fn fetch_page(
        &self,
        resource: Resource,
        offset: u32,
        count: u32,
    ) -> Result<Vec<RemoteItem>, FetchError> {
        let url = self.page_url(resource, offset, count);
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = truncate_for_log(resp.text().await.unwrap_or_default(), 2000);
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body = resp.text().await?;
        decode_items(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client() -> VkClient {
        let cfg = VkApiConfig {
            token: "secret".into(),
            base_url: "https://api.example.test/".into(),
            version: "5.103".into(),
            country_id: 1,
            timeout: Duration::from_secs(5),
        };
        VkClient::new(&cfg, 4).unwrap()
    }

    #[test]
    fn rejects_base_url_without_path() {
        let cfg = VkApiConfig {
            token: "secret".into(),
            base_url: "mailto:ops@example.test".into(),
            version: "5.103".into(),
            country_id: 1,
            timeout: Duration::from_secs(5),
        };
        assert!(VkClient::new(&cfg, 1).is_err());
    }

    #[test]
    fn decodes_items_and_ignores_reported_total() {
        let body = r#"{"response":{"count":158000,"items":[{"id":1,"title":" Moscow "},{"id":2,"title":"Tver"}]}}"#;
        let items = decode_items(body).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], RemoteItem::new(1, " Moscow "));
    }

    #[test]
    fn api_error_envelope_is_reported() {
        let body = r#"{"error":{"error_code":5,"error_msg":"User authorization failed"}}"#;
        match decode_items(body) {
            Err(FetchError::Api { code, message }) => {
                assert_eq!(code, 5);
                assert!(message.contains("authorization"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn shape_mismatch_is_a_decode_error() {
        assert!(matches!(
            decode_items(r#"{"data":[]}"#),
            Err(FetchError::Envelope(_))
        ));
        assert!(matches!(
            decode_items(r#"{"response":{"count":1,"items":[{"id":"x"}]}}"#),
            Err(FetchError::Decode(_))
        ));
        assert!(matches!(decode_items("not json"), Err(FetchError::Decode(_))));
        assert!(matches!(decode_items("[]"), Err(FetchError::Envelope(_))));
    }

    #[test]
    fn city_url_carries_scope_and_paging() {
        let url = client()
            .page_url(Resource::Cities { need_all: true }, 2000, 1000);
        assert_eq!(url.path(), "/method/database.getCities");
        let q: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |k: &str| q.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("access_token"), Some("secret"));
        assert_eq!(get("country_id"), Some("1"));
        assert_eq!(get("need_all"), Some("1"));
        assert_eq!(get("count"), Some("1000"));
        assert_eq!(get("offset"), Some("2000"));
    }

    #[test]
    fn university_url_is_scoped_to_city() {
        let url = client()
            .page_url(Resource::Universities { city_id: 99 }, 0, 10_000);
        let q: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(q.contains(&("city_id".into(), "99".into())));
        assert!(!q.iter().any(|(k, _)| k == "need_all" || k == "country_id"));
    }

    /// One-shot HTTP server on loopback. Returns the base URL and a handle
    /// yielding the request line it received.
    async fn serve_once(status: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(response.as_bytes()).await.unwrap();
            sock.shutdown().await.unwrap();
            let head = String::from_utf8_lossy(&head).into_owned();
            head.lines().next().unwrap_or_default().to_string()
        });
        (format!("http://{addr}/"), handle)
    }

    fn local_client(base_url: String) -> VkClient {
        let cfg = VkApiConfig {
            token: "secret".into(),
            base_url,
            version: "5.103".into(),
            country_id: 1,
            timeout: Duration::from_secs(5),
        };
        let http = Client::builder()
            .no_proxy()
            .timeout(cfg.timeout)
            .build()
            .unwrap();
        VkClient::with_http(&cfg, http).unwrap()
    }

    #[tokio::test]
    async fn non_success_status_keeps_a_truncated_body() {
        let (base, server) = serve_once("502 Bad Gateway", "x".repeat(3000)).await;

        let err = local_client(base)
            .fetch_page(Resource::Universities { city_id: 99 }, 0, 10)
            .await
            .unwrap_err();

        match err {
            FetchError::Status { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body.chars().count(), 2001);
                assert!(body.starts_with("xxx"));
                assert!(body.ends_with('…'));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /method/database.getUniversities?"));
    }

    #[tokio::test]
    async fn success_status_decodes_the_page() {
        let body = r#"{"response":{"count":2,"items":[{"id":1,"title":"Moscow"},{"id":2,"title":"Tver"}]}}"#;
        let (base, server) = serve_once("200 OK", body.to_string()).await;

        let items = local_client(base)
            .fetch_page(Resource::Cities { need_all: false }, 0, 1000)
            .await
            .unwrap();

        assert_eq!(items, vec![RemoteItem::new(1, "Moscow"), RemoteItem::new(2, "Tver")]);
        assert!(server.await.unwrap().contains("offset=0"));
    }

    #[tokio::test]
    async fn api_error_inside_a_success_status_is_reported() {
        let body = r#"{"error":{"error_code":6,"error_msg":"Too many requests per second"}}"#;
        let (base, _server) = serve_once("200 OK", body.to_string()).await;

        let err = local_client(base)
            .fetch_page(Resource::Cities { need_all: false }, 1000, 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Api { code: 6, .. }));
    }
}
