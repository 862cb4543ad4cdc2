//! Sends `oauth2` token requests through the shared reqwest client, so token
//! calls get the same timeouts and user agent as every other request.

use std::future::Future;
use std::pin::Pin;

use oauth2::{AsyncHttpClient, HttpRequest, HttpResponse};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("malformed token endpoint response: {0}")]
    Response(#[from] oauth2::http::Error),

    #[error("token request task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub struct OAuthTransport {
    client: reqwest::Client,
}

impl OAuthTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl<'c> AsyncHttpClient<'c> for OAuthTransport {
    type Error = TransportError;
    type Future =
        Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + Sync + 'c>>;

    fn call(&'c self, request: HttpRequest) -> Self::Future {
        // The request runs on its own task; only the join handle, which is
        // Sync, is held across the await.
        let exchange = tokio::spawn(execute(self.client.clone(), request));
        Box::pin(async move { exchange.await? })
    }
}

async fn execute(
    client: reqwest::Client,
    request: HttpRequest,
) -> Result<HttpResponse, TransportError> {
    let (parts, body) = request.into_parts();
    let response = client
        .request(parts.method, parts.uri.to_string())
        .headers(parts.headers)
        .body(body)
        .send()
        .await?;

    let mut builder = oauth2::http::Response::builder().status(response.status());
    if let Some(headers) = builder.headers_mut() {
        *headers = response.headers().clone();
    }
    let body = response.bytes().await?;
    Ok(builder.body(body.to_vec())?)
}
