use crate::error::{CoreError, CoreResult, ErrorBody};
use anyhow::Result;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// HTTP/JSON client for node-to-node calls.
/// Every call is bounded by the request timeout and never retried here.
#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
}

impl PeerClient {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self { http })
    }

    /// POST `body` to `addr` + `path` and decode the JSON answer
    pub async fn call<B, R>(&self, addr: &str, path: &str, body: &B) -> CoreResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.send(addr, path, body).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| CoreError::NetworkFailure(format!("bad response from {}{}: {}", addr, path, e)))
    }

    /// POST `body` and only care whether it was accepted
    pub async fn post<B>(&self, addr: &str, path: &str, body: &B) -> CoreResult<()>
    where
        B: Serialize + ?Sized,
    {
        self.send(addr, path, body).await.map(|_| ())
    }

    async fn send<B>(&self, addr: &str, path: &str, body: &B) -> CoreResult<Response>
    where
        B: Serialize + ?Sized,
    {
        let response = self
            .http
            .post(format!("http://{}{}", addr, path))
            .json(body)
            .send()
            .await?;
        check(response).await
    }
}

/// Map a non-2xx answer back onto the error taxonomy
async fn check(response: Response) -> CoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    Err(match status {
        StatusCode::NOT_FOUND => CoreError::NotFound(message),
        StatusCode::CONFLICT => CoreError::Conflict(message),
        StatusCode::GATEWAY_TIMEOUT => CoreError::Timeout(message),
        _ => CoreError::NetworkFailure(format!("{}: {}", status, message)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Ack;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        // Accepts connections but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let held = tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });

        let client = PeerClient::new(Duration::from_millis(200)).unwrap();
        let result = client.post(&addr, "/battle/end", &Ack::OK).await;

        assert!(matches!(result, Err(CoreError::Timeout(_))), "got {:?}", result);
        held.abort();
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = PeerClient::new(Duration::from_secs(1)).unwrap();
        let result = client.post(&addr, "/battle/end", &Ack::OK).await;

        assert!(matches!(result, Err(CoreError::NetworkFailure(_))), "got {:?}", result);
    }
}
