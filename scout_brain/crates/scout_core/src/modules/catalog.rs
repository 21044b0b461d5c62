use crate::modules::config::PipelineConfig;
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::{RequestBuilder, StatusCode};
use scout_protocol::{GearType, ModelFile, Profile, ProfileId, Secret};
use serde::{Deserialize, Deserializer};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    #[error("catalog rejected credentials: {0}")]
    Auth(String),
    #[error("catalog response could not be decoded: {0}")]
    Decode(String),
}

pub type ByteStream = BoxStream<'static, Result<Vec<u8>, CatalogError>>;

/// Tone-profile catalog seam. No retries live behind it; callers decide.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// An empty vec means nothing matched; it is not an error.
    async fn search(
        &self,
        query: &str,
        gear: Option<GearType>,
        limit: usize,
    ) -> Result<Vec<Profile>, CatalogError>;

    async fn list_models(&self, profile_id: ProfileId) -> Result<Vec<ModelFile>, CatalogError>;

    async fn fetch_file(&self, location: &str) -> Result<ByteStream, CatalogError>;
}

#[derive(Deserialize)]
struct AuthResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize)]
struct WireUser {
    username: Option<String>,
}

#[derive(Deserialize)]
struct WireTone {
    #[serde(deserialize_with = "lenient_id")]
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    gear: Option<String>,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    downloads_count: Option<u64>,
    #[serde(default)]
    user: Option<WireUser>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct WireModel {
    #[serde(default, deserialize_with = "lenient_opt_id")]
    id: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    size: Option<serde_json::Value>,
    #[serde(default)]
    model_url: Option<String>,
    #[serde(default)]
    platform: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrText {
    Num(i64),
    Text(String),
}

fn lenient_id<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    match NumOrText::deserialize(d)? {
        NumOrText::Num(n) => Ok(n),
        NumOrText::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| serde::de::Error::custom(format!("non-numeric id: {s:?}"))),
    }
}

fn lenient_opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let v = Option::<NumOrText>::deserialize(d)?;
    Ok(match v {
        Some(NumOrText::Num(n)) => Some(n),
        Some(NumOrText::Text(s)) => s.trim().parse::<i64>().ok(),
        None => None,
    })
}

impl From<WireTone> for Profile {
    fn from(t: WireTone) -> Self {
        let gear = t
            .gear
            .as_deref()
            .and_then(GearType::from_label)
            .unwrap_or(GearType::Other);
        Profile {
            id: t.id,
            title: t.title.unwrap_or_default().trim().to_string(),
            description: t.description.unwrap_or_default().trim().to_string(),
            gear,
            platform: t.platform.unwrap_or_default().trim().to_string(),
            downloads_count: t.downloads_count.unwrap_or(0),
            author: t.user.and_then(|u| u.username),
            url: t.url,
        }
    }
}

fn size_label(v: Option<serde_json::Value>) -> String {
    match v {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Models without a download url cannot be fetched and are dropped.
/// A missing id falls back to the listing position so ids stay unique.
fn models_from_wire(rows: Vec<WireModel>) -> Vec<ModelFile> {
    rows.into_iter()
        .enumerate()
        .filter_map(|(i, m)| {
            let url = m.model_url.filter(|u| !u.trim().is_empty())?;
            let id = m.id.unwrap_or(-(i as i64) - 1);
            Some(ModelFile {
                id,
                name: m
                    .name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| format!("model_{}", i + 1)),
                url,
                size: size_label(m.size),
                platform: m.platform,
            })
        })
        .collect()
}

fn classify_status(status: StatusCode, body: &str, what: &str) -> CatalogError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        CatalogError::Auth(format!("{what}: status={status}"))
    } else {
        let mut snippet: String = body.chars().take(200).collect();
        if snippet.len() < body.len() {
            snippet.push('…');
        }
        CatalogError::Unavailable(format!("{what}: status={status} body={snippet}"))
    }
}

fn model_listing_query(profile_id: ProfileId, page_size: usize) -> [(&'static str, String); 2] {
    [
        ("tone_id", profile_id.to_string()),
        ("page_size", page_size.to_string()),
    ]
}

fn transport(what: &str, e: reqwest::Error) -> CatalogError {
    if e.is_timeout() {
        CatalogError::Unavailable(format!("{what}: timed out"))
    } else {
        CatalogError::Unavailable(format!("{what}: {e}"))
    }
}

/// HTTP client for the Tone3000 API, holding one authenticated session.
pub struct Tone3000Catalog {
    client: reqwest::Client,
    base_url: String,
    access_token: Secret,
    download_timeout: Duration,
    model_page_size: usize,
}

impl Tone3000Catalog {
    /// Exchanges the API key for a bearer session token.
    pub async fn connect(config: &PipelineConfig, api_key: &Secret) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(config.catalog_timeout)
            .user_agent(concat!("tone-scout/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        let url = PipelineConfig::endpoint(&config.catalog_base_url, "auth/session");
        let resp = client
            .post(&url)
            .json(&json!({ "api_key": api_key.expose() }))
            .send()
            .await
            .map_err(|e| transport("auth", e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, "auth"));
        }
        let auth: AuthResponse = resp
            .json()
            .await
            .map_err(|e| CatalogError::Decode(format!("auth: {e}")))?;
        if auth.access_token.trim().is_empty() {
            return Err(CatalogError::Auth("auth: empty access token".to_string()));
        }

        Ok(Self {
            client,
            base_url: config.catalog_base_url.clone(),
            access_token: Secret::new(auth.access_token),
            download_timeout: config.download_timeout,
            model_page_size: config.model_page_size.max(1),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        req: RequestBuilder,
        what: &str,
    ) -> Result<T, CatalogError> {
        let resp = req
            .bearer_auth(self.access_token.expose())
            .send()
            .await
            .map_err(|e| transport(what, e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| transport(what, e))?;
        if !status.is_success() {
            return Err(classify_status(status, &body, what));
        }
        serde_json::from_str(&body).map_err(|e| CatalogError::Decode(format!("{what}: {e}")))
    }
}

#[async_trait]
impl Catalog for Tone3000Catalog {
    async fn search(
        &self,
        query: &str,
        gear: Option<GearType>,
        limit: usize,
    ) -> Result<Vec<Profile>, CatalogError> {
        let page_size = limit.clamp(1, 25).to_string();
        let mut req = self
            .client
            .get(PipelineConfig::endpoint(&self.base_url, "tones/search"))
            .query(&[
                ("query", query),
                ("page_size", page_size.as_str()),
                ("sort", "downloads-all-time"),
            ]);
        if let Some(g) = gear {
            req = req.query(&[("gear", g.as_str())]);
        }
        let page: Page<WireTone> = self.get_json(req, "search").await?;
        debug!(query, hits = page.data.len(), "catalog search");
        Ok(page.data.into_iter().map(Profile::from).collect())
    }

    async fn list_models(&self, profile_id: ProfileId) -> Result<Vec<ModelFile>, CatalogError> {
        let req = self
            .client
            .get(PipelineConfig::endpoint(&self.base_url, "models"))
            .query(&model_listing_query(profile_id, self.model_page_size));
        let page: Page<WireModel> = self.get_json(req, "list models").await?;
        Ok(models_from_wire(page.data))
    }

    async fn fetch_file(&self, location: &str) -> Result<ByteStream, CatalogError> {
        let resp = self
            .client
            .get(location)
            .bearer_auth(self.access_token.expose())
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(|e| transport("fetch", e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, "fetch"));
        }
        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| transport("fetch", e)));
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_search_page_with_string_ids() {
        let body = r#"{"data":[
            {"id":"42","title":" Plexi Crunch ","gear":"amp","platform":"nam","downloads_count":900,"user":{"username":"ana"}},
            {"id":7,"title":"Greenback IR","gear":"ir","platform":"ir"},
            {"id":8,"title":"Odd","gear":"rack"}
        ]}"#;
        let page: Page<WireTone> = serde_json::from_str(body).unwrap();
        let profiles: Vec<Profile> = page.data.into_iter().map(Profile::from).collect();
        assert_eq!(profiles[0].id, 42);
        assert_eq!(profiles[0].title, "Plexi Crunch");
        assert_eq!(profiles[0].author.as_deref(), Some("ana"));
        assert_eq!(profiles[1].gear, GearType::Ir);
        assert_eq!(profiles[2].gear, GearType::Other);
        assert_eq!(profiles[2].platform, "");
    }

    #[test]
    fn missing_data_is_an_empty_page() {
        let page: Page<WireTone> = serde_json::from_str("{}").unwrap();
        assert!(page.data.is_empty());
    }

    #[test]
    fn models_without_url_are_dropped() {
        let body = r#"{"data":[
            {"id":1,"name":"Clean","size":"standard","model_url":"https://cdn/x/clean.nam"},
            {"name":"NoUrl","size":"lite"},
            {"name":"","size":2048,"model_url":"https://cdn/x/2"}
        ]}"#;
        let page: Page<WireModel> = serde_json::from_str(body).unwrap();
        let models = models_from_wire(page.data);
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, 1);
        assert_eq!(models[1].name, "model_3");
        assert_eq!(models[1].size, "2048");
        assert_eq!(models[1].id, -3);
    }

    #[test]
    fn auth_statuses_map_to_auth_error() {
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "", "search"),
            CatalogError::Auth(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "oops", "search"),
            CatalogError::Unavailable(_)
        ));
    }

    #[test]
    fn model_listing_uses_configured_page_size() {
        let q = model_listing_query(42, PipelineConfig::default().model_page_size);
        assert_eq!(q[0], ("tone_id", "42".to_string()));
        assert_eq!(q[1], ("page_size", "100".to_string()));
        assert_eq!(model_listing_query(7, 40)[1].1, "40");
    }
}
