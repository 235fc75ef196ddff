/// External provider abstractions
///
/// This module defines the seams to the three outside collaborators: the
/// places/geocoding provider, the generative-text provider, and the object
/// store holding images and job results. Each trait has one reqwest-backed
/// implementation; tests swap in hand-written stubs.
use async_trait::async_trait;
use serde::Deserialize;

use crate::error::AppResult;
use crate::models::{Coordinates, PlaceReview};

pub mod gemini;
pub mod google_places;
pub mod object_store;

pub use gemini::GeminiProvider;
pub use google_places::GooglePlacesProvider;
pub use object_store::HttpObjectStore;

/// Parameters for one nearby-search request
#[derive(Debug, Clone)]
pub struct NearbySearchQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub radius: u32,
    pub keyword: String,
    pub min_price: Option<u8>,
    pub max_price: Option<u8>,
    pub page_token: Option<String>,
}

/// One page of nearby-search results plus the continuation token
#[derive(Debug, Default)]
pub struct NearbyPage {
    pub results: Vec<NearbySummary>,
    pub next_page_token: Option<String>,
}

/// Trimmed nearby-search result row; the full record comes from the
/// per-place details lookup
#[derive(Debug, Clone, Deserialize)]
pub struct NearbySummary {
    pub place_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rating: f64,
}

/// Full place record returned by the details lookup
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaceDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub formatted_address: String,
    #[serde(default)]
    pub photos: Vec<PhotoRef>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub reviews: Vec<PlaceReview>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoRef {
    pub photo_reference: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Geometry {
    pub location: GeoLocation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoLocation {
    pub lat: f64,
    pub lng: f64,
}

impl Geometry {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.location.lat,
            longitude: self.location.lng,
        }
    }
}

/// Downloaded photo payload
#[derive(Debug)]
pub struct PhotoPayload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Places-search, details, geocoding and photo access
#[async_trait]
pub trait PlacesProvider: Send + Sync {
    /// One page of nearby results for a keyword search around a point
    async fn nearby_search(&self, query: &NearbySearchQuery) -> AppResult<NearbyPage>;

    /// Full record for one place id, limited to the requested fields
    async fn place_details(&self, place_id: &str, fields: &str) -> AppResult<PlaceDetails>;

    /// Best-matching place id for a free-text query biased to a point
    async fn text_search(
        &self,
        query: &str,
        latitude: f64,
        longitude: f64,
    ) -> AppResult<Option<String>>;

    /// Coordinates for a formatted address
    async fn geocode(&self, address: &str) -> AppResult<Option<Coordinates>>;

    /// Binary photo content for a photo reference
    async fn fetch_photo(&self, photo_reference: &str) -> AppResult<PhotoPayload>;
}

/// Generative-text completion
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// Text completion for a prompt under a system instruction
    async fn generate(&self, system_instruction: &str, prompt: &str) -> AppResult<String>;
}

/// Durable storage for uploaded images and job result documents.
///
/// Objects expire server-side after the namespace's retention window; the
/// application only ever writes new, uniquely-keyed objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object and return its public URL
    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> AppResult<String>;

    /// Fetch an object; `None` means the key does not exist
    async fn get_object(&self, key: &str) -> AppResult<Option<Vec<u8>>>;
}
