use murmur_protocol::decode_response;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{ClientError, Result};

/// The server expects the raw access key, without a scheme prefix
fn authorize(request: reqwest::RequestBuilder, access_key: Option<&str>) -> reqwest::RequestBuilder {
    match access_key {
        Some(key) => request.header("Authorization", key),
        None => request,
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Http {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let response = check_status(response).await?;
    let body = response.text().await?;
    Ok(decode_response::<T>(&body)??)
}

pub async fn get<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    access_key: Option<&str>,
) -> Result<T> {
    let response = authorize(client.get(url), access_key).send().await?;
    decode(response).await
}

pub async fn post<T: DeserializeOwned, B: Serialize>(
    client: &reqwest::Client,
    url: &str,
    body: &B,
    access_key: Option<&str>,
) -> Result<T> {
    let response = authorize(client.post(url).json(body), access_key)
        .send()
        .await?;
    decode(response).await
}

/// Fetch a binary body, e.g. an attachment blob
pub async fn get_bytes(
    client: &reqwest::Client,
    url: &str,
    access_key: Option<&str>,
) -> Result<Vec<u8>> {
    let response = authorize(client.get(url), access_key).send().await?;
    let response = check_status(response).await?;

    let is_json = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    let bytes = response.bytes().await?;

    // Errors come back as a JSON envelope instead of the blob
    if is_json {
        if let Ok(Err(failure)) = decode_response::<serde_json::Value>(&String::from_utf8_lossy(&bytes)) {
            return Err(failure.into());
        }
    }
    Ok(bytes.to_vec())
}
