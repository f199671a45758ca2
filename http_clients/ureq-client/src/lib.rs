use anyhow::Result;
use async_trait::async_trait;
use dmcore::net::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use log::trace;

/// HTTP client implementation using `ureq` for synchronous HTTP requests.
/// Since `ureq` is blocking, all requests are wrapped in `tokio::task::spawn_blocking`.
#[derive(Debug, Clone)]
pub struct UreqHttpClient;

impl UreqHttpClient {
    pub fn new() -> Self {
        Self
    }
}

impl Default for UreqHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for UreqHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        tokio::task::spawn_blocking(move || {
            trace!(target: "Http", "--> {} {}", request.method.as_str(), request.url);

            // Error statuses are returned as responses so callers can read the
            // service's error body.
            let response = match request.method {
                HttpMethod::Get => {
                    let mut req = ureq::get(&request.url)
                        .config()
                        .http_status_as_error(false)
                        .build();
                    for (key, value) in &request.headers {
                        req = req.header(key, value);
                    }
                    req.call()?
                }
                HttpMethod::Post => {
                    let mut req = ureq::post(&request.url)
                        .config()
                        .http_status_as_error(false)
                        .build();
                    for (key, value) in &request.headers {
                        req = req.header(key, value);
                    }
                    match request.body {
                        Some(body) => req.send(&body[..])?,
                        None => req.send_empty()?,
                    }
                }
            };

            let status_code = response.status().as_u16();
            let body = response.into_body().read_to_vec()?;
            trace!(target: "Http", "<-- {status_code} ({} bytes)", body.len());

            Ok(HttpResponse { status_code, body })
        })
        .await?
    }
}
