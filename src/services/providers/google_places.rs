/// Google Places / Geocoding provider
///
/// Thin request/response wrappers around the nearby-search, place-details,
/// text-search, geocoding and photo endpoints. Non-OK provider statuses
/// (other than ZERO_RESULTS) surface as external-API errors carrying the
/// provider's own status and message.
use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::Coordinates;

use super::{
    NearbyPage, NearbySearchQuery, NearbySummary, PhotoPayload, PlaceDetails, PlacesProvider,
};

/// Browser User-Agent; the photo endpoint rejects bare clients with 403
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Clone)]
pub struct GooglePlacesProvider {
    http_client: HttpClient,
    api_key: String,
    api_base: String,
    language: String,
    image_max_width: u32,
}

impl GooglePlacesProvider {
    pub fn new(config: &Config) -> AppResult<Self> {
        let http_client = HttpClient::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(Duration::from_secs(config.places_api_timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            api_key: config.google_places_api_key.clone(),
            api_base: config.places_api_base.trim_end_matches('/').to_string(),
            language: config.places_api_language.clone(),
            image_max_width: config.image_max_width,
        })
    }
}

#[async_trait::async_trait]
impl PlacesProvider for GooglePlacesProvider {
    async fn nearby_search(&self, query: &NearbySearchQuery) -> AppResult<NearbyPage> {
        let url = format!("{}/place/nearbysearch/json", self.api_base);

        let mut params: Vec<(&str, String)> = vec![
            (
                "location",
                format!("{},{}", query.latitude, query.longitude),
            ),
            ("radius", query.radius.to_string()),
            ("keyword", query.keyword.clone()),
            ("key", self.api_key.clone()),
            ("language", self.language.clone()),
        ];
        if let Some(min_price) = query.min_price {
            params.push(("minprice", min_price.to_string()));
        }
        if let Some(max_price) = query.max_price {
            params.push(("maxprice", max_price.to_string()));
        }
        if let Some(token) = &query.page_token {
            params.push(("pagetoken", token.clone()));
        }

        let response = self
            .http_client
            .get(&url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?;
        let envelope: SearchEnvelope = response.json().await?;

        match envelope.status.as_str() {
            "OK" => Ok(NearbyPage {
                results: envelope.results,
                next_page_token: envelope.next_page_token,
            }),
            "ZERO_RESULTS" => Ok(NearbyPage::default()),
            status => Err(provider_error(
                "nearby-search",
                status,
                envelope.error_message.as_deref(),
            )),
        }
    }

    async fn place_details(&self, place_id: &str, fields: &str) -> AppResult<PlaceDetails> {
        let url = format!("{}/place/details/json", self.api_base);

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("place_id", place_id),
                ("fields", fields),
                ("key", self.api_key.as_str()),
                ("language", self.language.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;
        let envelope: DetailsEnvelope = response.json().await?;

        match envelope.status.as_str() {
            "OK" => envelope.result.ok_or_else(|| {
                AppError::ExternalApi("details response missing result".to_string())
            }),
            status => Err(provider_error(
                "details",
                status,
                envelope.error_message.as_deref(),
            )),
        }
    }

    async fn text_search(
        &self,
        query: &str,
        latitude: f64,
        longitude: f64,
    ) -> AppResult<Option<String>> {
        let url = format!("{}/place/textsearch/json", self.api_base);
        let location = format!("{},{}", latitude, longitude);

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("query", query),
                ("location", location.as_str()),
                ("radius", "5000"),
                ("key", self.api_key.as_str()),
                ("language", self.language.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;
        let envelope: TextSearchEnvelope = response.json().await?;

        if envelope.status != "OK" {
            tracing::debug!(status = %envelope.status, query = %query, "text search returned no usable match");
            return Ok(None);
        }

        // The first result is the provider's best match
        Ok(envelope.results.into_iter().next().map(|r| r.place_id))
    }

    async fn geocode(&self, address: &str) -> AppResult<Option<Coordinates>> {
        let url = format!("{}/geocode/json", self.api_base);

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("address", address),
                ("key", self.api_key.as_str()),
                ("language", self.language.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;
        let envelope: GeocodeEnvelope = response.json().await?;

        if envelope.status != "OK" {
            tracing::debug!(status = %envelope.status, address = %address, "geocoding returned no match");
            return Ok(None);
        }

        Ok(envelope
            .results
            .into_iter()
            .next()
            .map(|result| result.geometry.coordinates()))
    }

    async fn fetch_photo(&self, photo_reference: &str) -> AppResult<PhotoPayload> {
        let url = format!("{}/place/photo", self.api_base);

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("maxwidth", self.image_max_width.to_string().as_str()),
                ("photoreference", photo_reference),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .filter(|value| value.starts_with("image/"))
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = response.bytes().await?.to_vec();

        Ok(PhotoPayload {
            bytes,
            content_type,
        })
    }
}

fn provider_error(endpoint: &str, status: &str, error_message: Option<&str>) -> AppError {
    let detail = error_message.unwrap_or("no detail");
    if status == "REQUEST_DENIED" {
        // The most common operator mistake; spell out the remediation
        AppError::ExternalApi(format!(
            "Places {} request denied: {}. Check the API key, whether the Places API is enabled, and the key's restrictions",
            endpoint, detail
        ))
    } else {
        AppError::ExternalApi(format!(
            "Places {} returned status {}: {}",
            endpoint, status, detail
        ))
    }
}

#[derive(Deserialize)]
struct SearchEnvelope {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<NearbySummary>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct DetailsEnvelope {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    result: Option<PlaceDetails>,
}

#[derive(Deserialize)]
struct TextSearchEnvelope {
    status: String,
    #[serde(default)]
    results: Vec<TextSearchResult>,
}

#[derive(Deserialize)]
struct TextSearchResult {
    place_id: String,
}

#[derive(Deserialize)]
struct GeocodeEnvelope {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Deserialize)]
struct GeocodeResult {
    geometry: super::Geometry,
}
