use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use serde_json::{json, Value};

use mapannai_api::api::{create_router, AppState};
use mapannai_api::config::Config;
use mapannai_api::error::AppResult;
use mapannai_api::models::Coordinates;
use mapannai_api::services::enrichment::Enricher;
use mapannai_api::services::jobs::JobRunner;
use mapannai_api::services::narrative::Narrator;
use mapannai_api::services::providers::{
    GenerativeProvider, GeoLocation, Geometry, NearbyPage, NearbySearchQuery, NearbySummary,
    ObjectStore, PhotoPayload, PhotoRef, PlaceDetails, PlacesProvider,
};
use mapannai_api::services::resolution::PlaceResolver;

// Test doubles

/// In-memory object store shared between the job runner and assertions
#[derive(Clone, Default)]
struct MemoryStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> AppResult<String> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes);
        Ok(format!("http://storage.local/{}", key))
    }

    async fn get_object(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }
}

#[derive(Default)]
struct StubPlaces {
    nearby: Vec<NearbySummary>,
    geocode_result: Option<Coordinates>,
    text_search_result: Option<String>,
    attraction_details: Option<PlaceDetails>,
}

impl StubPlaces {
    fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlacesProvider for StubPlaces {
    async fn nearby_search(&self, _query: &NearbySearchQuery) -> AppResult<NearbyPage> {
        Ok(NearbyPage {
            results: self.nearby.clone(),
            next_page_token: None,
        })
    }

    async fn place_details(&self, place_id: &str, _fields: &str) -> AppResult<PlaceDetails> {
        if let Some(details) = &self.attraction_details {
            if self.text_search_result.as_deref() == Some(place_id) {
                return Ok(details.clone());
            }
        }
        let summary = self
            .nearby
            .iter()
            .find(|place| place.place_id == place_id)
            .cloned();
        Ok(PlaceDetails {
            name: summary
                .as_ref()
                .map(|s| s.name.clone())
                .unwrap_or_else(|| place_id.to_string()),
            rating: summary.map(|s| s.rating).unwrap_or(0.0),
            formatted_address: "東京都".to_string(),
            geometry: Some(Geometry {
                location: GeoLocation {
                    lat: 35.6895,
                    lng: 139.6917,
                },
            }),
            ..PlaceDetails::default()
        })
    }

    async fn text_search(
        &self,
        _query: &str,
        _latitude: f64,
        _longitude: f64,
    ) -> AppResult<Option<String>> {
        Ok(self.text_search_result.clone())
    }

    async fn geocode(&self, _address: &str) -> AppResult<Option<Coordinates>> {
        Ok(self.geocode_result)
    }

    async fn fetch_photo(&self, _photo_reference: &str) -> AppResult<PhotoPayload> {
        Ok(PhotoPayload {
            bytes: vec![0xff, 0xd8, 0xff],
            content_type: "image/jpeg".to_string(),
        })
    }
}

struct StubGenerative {
    completion: String,
}

#[async_trait]
impl GenerativeProvider for StubGenerative {
    async fn generate(&self, _system_instruction: &str, _prompt: &str) -> AppResult<String> {
        Ok(self.completion.clone())
    }
}

// Harness

fn test_config() -> Arc<Config> {
    let env = [
        ("GOOGLE_PLACES_API_KEY", "test-key"),
        ("GEMINI_API_KEY", "test-key"),
        ("STORAGE_BASE_URL", "http://storage.local"),
        ("PAGE_TOKEN_DELAY_SECS", "0"),
    ];
    Arc::new(
        envy::from_iter::<_, Config>(
            env.into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        )
        .unwrap(),
    )
}

fn build_server(places: StubPlaces, generative: StubGenerative, store: MemoryStore) -> TestServer {
    let config = test_config();
    let places: Arc<dyn PlacesProvider> = Arc::new(places);
    let generative: Arc<dyn GenerativeProvider> = Arc::new(generative);
    let store: Arc<dyn ObjectStore> = Arc::new(store);

    let runner = Arc::new(JobRunner::new(
        PlaceResolver::new(
            Arc::clone(&places),
            Arc::clone(&generative),
            Arc::clone(&config),
        ),
        Enricher::new(Arc::clone(&places), Arc::clone(&store), Arc::clone(&config)),
        Narrator::new(Arc::clone(&generative), Arc::clone(&config)),
        store,
        config,
    ));

    TestServer::new(create_router(AppState::new(runner))).unwrap()
}

async fn submit(server: &TestServer, body: Value) -> Value {
    let response = server.post("/recommendation").json(&body).await;
    response.assert_status(axum::http::StatusCode::ACCEPTED);
    response.json()
}

/// Poll until the detached execution task persists a terminal record
async fn poll_until_terminal(server: &TestServer, job_id: &str) -> Value {
    for _ in 0..200 {
        let response = server
            .get(&format!("/recommendation/status/{}", job_id))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        if body["status"] != "processing" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached a terminal state", job_id);
}

fn food_stub_with_places(count: usize) -> StubPlaces {
    // Ratings deliberately unsorted so ranking has work to do
    let ratings = [3.1, 4.8, 2.5, 4.2, 3.9, 4.9, 1.8, 4.5, 3.3, 4.0, 2.9, 4.7];
    let nearby = (0..count)
        .map(|i| NearbySummary {
            place_id: format!("p{}", i + 1),
            name: format!("店{}", i + 1),
            rating: ratings[i % ratings.len()],
        })
        .collect();
    StubPlaces {
        nearby,
        ..StubPlaces::default()
    }
}

fn food_summaries_completion() -> String {
    // Covers only two of the places; the rest must get the placeholder
    "```json\n[\
     {\"place_id\": \"p6\", \"summary_text\": \"人气最高的名店\"},\
     {\"place_id\": \"p2\", \"summary_text\": \"评价很好的老铺\"}\
     ]\n```"
        .to_string()
}

// Tests

#[tokio::test]
async fn test_health_check() {
    let server = build_server(
        StubPlaces::empty(),
        StubGenerative {
            completion: String::new(),
        },
        MemoryStore::default(),
    );
    let response = server.get("/health").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_submit_rejects_missing_fields() {
    let server = build_server(
        StubPlaces::empty(),
        StubGenerative {
            completion: String::new(),
        },
        MemoryStore::default(),
    );

    let response = server
        .post("/recommendation")
        .json(&json!({"lat": 35.68, "lng": 139.76}))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("缺少必需参数"));

    let response = server
        .post("/recommendation")
        .json(&json!({"lng": 139.76, "main_type": "美食"}))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_rejects_unknown_category() {
    let server = build_server(
        StubPlaces::empty(),
        StubGenerative {
            completion: String::new(),
        },
        MemoryStore::default(),
    );

    let response = server
        .post("/recommendation")
        .json(&json!({"lat": 35.68, "lng": 139.76, "main_type": "购物"}))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_acknowledges_without_waiting() {
    let server = build_server(
        food_stub_with_places(12),
        StubGenerative {
            completion: food_summaries_completion(),
        },
        MemoryStore::default(),
    );

    let body = submit(&server, json!({"lat": 35.68, "lng": 139.76, "main_type": "美食"})).await;

    assert!(body["jobId"].as_str().unwrap().starts_with("job_"));
    assert_eq!(body["status"], "processing");
    assert_eq!(
        body["pollUrl"],
        format!("/recommendation/status/{}", body["jobId"].as_str().unwrap())
    );
    assert!(!body["createdAt"].as_str().unwrap().is_empty());
    assert!(!body["estimatedTime"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_poll_unknown_job_reports_processing() {
    let server = build_server(
        StubPlaces::empty(),
        StubGenerative {
            completion: String::new(),
        },
        MemoryStore::default(),
    );

    let response = server.get("/recommendation/status/job_does_not_exist").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "processing");
    assert_eq!(body["retryAfter"], 5);
}

#[tokio::test]
async fn test_poll_requires_job_id() {
    let server = build_server(
        StubPlaces::empty(),
        StubGenerative {
            completion: String::new(),
        },
        MemoryStore::default(),
    );

    let response = server.get("/recommendation/status").await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_poll_accepts_query_and_body_job_id() {
    let server = build_server(
        StubPlaces::empty(),
        StubGenerative {
            completion: String::new(),
        },
        MemoryStore::default(),
    );

    let response = server
        .get("/recommendation/status")
        .add_query_param("job_id", "job_x")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "processing");

    let response = server
        .post("/recommendation/status")
        .json(&json!({"jobId": "job_x"}))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "processing");
}

#[tokio::test]
async fn test_food_job_ranks_truncates_and_completes() {
    let server = build_server(
        food_stub_with_places(12),
        StubGenerative {
            completion: food_summaries_completion(),
        },
        MemoryStore::default(),
    );

    let accepted = submit(&server, json!({"lat": 35.68, "lng": 139.76, "main_type": "美食"})).await;
    let job_id = accepted["jobId"].as_str().unwrap().to_string();

    let body = poll_until_terminal(&server, &job_id).await;
    assert_eq!(body["status"], "completed");

    let markers = body["result"]["markers"].as_array().unwrap();
    // Exactly FOOD_MAX_RESULTS survive out of 12
    assert_eq!(markers.len(), 5);

    // Markers keep descending original-rating order: 4.9, 4.8, 4.7, 4.5, 4.2
    let titles: Vec<&str> = markers
        .iter()
        .map(|m| m["content"]["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["店6", "店2", "店12", "店8", "店4"]);

    // Relevance strictly decreases with position and stays above the floor
    let scores: Vec<f64> = markers
        .iter()
        .map(|m| m["relevanceScore"].as_f64().unwrap())
        .collect();
    for pair in scores.windows(2) {
        assert!(pair[0] > pair[1]);
    }
    assert!(scores.iter().all(|score| *score >= 0.1));

    // Coordinates come from the place records, not the 0/0 sentinel
    for marker in markers {
        assert!(marker["coordinates"]["latitude"].as_f64().unwrap() != 0.0);
        assert!(marker["coordinates"]["longitude"].as_f64().unwrap() != 0.0);
    }

    // Batch summaries applied where present, placeholder elsewhere
    let first_blocks = markers[0]["content"]["editorData"]["blocks"].as_array().unwrap();
    assert!(first_blocks
        .iter()
        .any(|block| block["data"]["text"] == "【概要】人气最高的名店"));
    let third_blocks = markers[2]["content"]["editorData"]["blocks"].as_array().unwrap();
    assert!(third_blocks
        .iter()
        .any(|block| block["data"]["text"] == "【概要】暂无概要"));

    assert_eq!(markers[0]["content"]["iconType"], "food");
    assert_eq!(markers[0]["id"], "mk_01");
}

#[tokio::test]
async fn test_completed_poll_is_idempotent() {
    let server = build_server(
        food_stub_with_places(12),
        StubGenerative {
            completion: food_summaries_completion(),
        },
        MemoryStore::default(),
    );

    let accepted = submit(&server, json!({"lat": 35.68, "lng": 139.76, "main_type": "美食"})).await;
    let job_id = accepted["jobId"].as_str().unwrap().to_string();

    let first = poll_until_terminal(&server, &job_id).await;
    let response = server
        .get(&format!("/recommendation/status/{}", job_id))
        .await;
    response.assert_status_ok();
    let second: Value = response.json();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_events_order_flea_markets_first_with_center_fallback() {
    let completion = json!([
        {"place_name": "Z文化フェスティバル", "place_address": "", "summary": "音楽と屋台", "website": ""},
        {"place_name": "B青空フリーマーケット", "place_address": "", "summary": "雑貨と古着", "website": ""},
        {"place_name": "A蚤の市", "place_address": "", "summary": "骨董品の市", "website": "https://example.com"},
        {"place_name": "M桜祭り", "place_address": "", "summary": "春の祭典", "website": ""}
    ])
    .to_string();

    let server = build_server(
        StubPlaces::empty(),
        StubGenerative { completion },
        MemoryStore::default(),
    );

    let accepted = submit(
        &server,
        json!({"lat": 35.68, "lng": 139.76, "main_type": "跳蚤市场或活动"}),
    )
    .await;
    let job_id = accepted["jobId"].as_str().unwrap().to_string();

    let body = poll_until_terminal(&server, &job_id).await;
    assert_eq!(body["status"], "completed");

    let markers = body["result"]["markers"].as_array().unwrap();
    let titles: Vec<&str> = markers
        .iter()
        .map(|m| m["content"]["title"].as_str().unwrap())
        .collect();
    // Flea-market candidates lead, each group alphabetical
    assert_eq!(
        titles,
        vec![
            "A蚤の市",
            "B青空フリーマーケット",
            "M桜祭り",
            "Z文化フェスティバル"
        ]
    );

    // No address and a failing geocoder: the search center is the fallback
    for marker in markers {
        assert_eq!(marker["coordinates"]["latitude"], 35.68);
        assert_eq!(marker["coordinates"]["longitude"], 139.76);
    }

    // Events never carry images
    for marker in markers {
        assert_eq!(marker["content"]["headerImage"], "");
        assert_eq!(marker["content"]["iconType"], "activity");
    }
}

#[tokio::test]
async fn test_events_with_generative_coordinates_skip_fallback() {
    let completion = json!([
        {"place_name": "青空フリーマーケット", "place_address": "横浜市", "latitude": 35.4437, "longitude": 139.638, "summary": "毎週末開催", "website": ""}
    ])
    .to_string();

    let server = build_server(
        StubPlaces::empty(),
        StubGenerative { completion },
        MemoryStore::default(),
    );

    let accepted = submit(
        &server,
        json!({"lat": 35.68, "lng": 139.76, "main_type": "跳蚤市场或活动"}),
    )
    .await;
    let job_id = accepted["jobId"].as_str().unwrap().to_string();

    let body = poll_until_terminal(&server, &job_id).await;
    let marker = &body["result"]["markers"][0];
    assert_eq!(marker["coordinates"]["latitude"], 35.4437);
    assert_eq!(marker["coordinates"]["longitude"], 139.638);
}

#[tokio::test]
async fn test_events_empty_generative_response_fails_job() {
    let server = build_server(
        StubPlaces::empty(),
        StubGenerative {
            completion: "```json\n[]\n```".to_string(),
        },
        MemoryStore::default(),
    );

    let accepted = submit(
        &server,
        json!({"lat": 35.68, "lng": 139.76, "main_type": "跳蚤市场或活动"}),
    )
    .await;
    let job_id = accepted["jobId"].as_str().unwrap().to_string();

    let body = poll_until_terminal(&server, &job_id).await;
    assert_eq!(body["status"], "failed");
    assert!(!body["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_attractions_resolve_place_records_and_keep_photo_order() {
    let completion = json!([
        {"name": "浅草寺", "address": "東京都台東区浅草", "summary": "都内最古の寺院"}
    ])
    .to_string();

    let places = StubPlaces {
        text_search_result: Some("attr_1".to_string()),
        attraction_details: Some(PlaceDetails {
            name: "浅草寺（金龍山）".to_string(),
            rating: 4.7,
            formatted_address: "東京都台東区浅草2-3-1".to_string(),
            photos: vec![
                PhotoRef {
                    photo_reference: "ref_a".to_string(),
                },
                PhotoRef {
                    photo_reference: "ref_b".to_string(),
                },
                PhotoRef {
                    photo_reference: "ref_c".to_string(),
                },
                PhotoRef {
                    photo_reference: "ref_d".to_string(),
                },
            ],
            website: Some("https://www.senso-ji.jp".to_string()),
            geometry: Some(Geometry {
                location: GeoLocation {
                    lat: 35.7148,
                    lng: 139.7967,
                },
            }),
            ..PlaceDetails::default()
        }),
        ..StubPlaces::default()
    };

    let server = build_server(
        places,
        StubGenerative { completion },
        MemoryStore::default(),
    );

    let accepted = submit(
        &server,
        json!({"lat": 35.68, "lng": 139.76, "main_type": "名胜古迹和旅游景点"}),
    )
    .await;
    let job_id = accepted["jobId"].as_str().unwrap().to_string();

    let body = poll_until_terminal(&server, &job_id).await;
    assert_eq!(body["status"], "completed");

    let marker = &body["result"]["markers"][0];
    // The provider record wins over the generative draft
    assert_eq!(marker["content"]["title"], "浅草寺（金龍山）");
    assert_eq!(marker["coordinates"]["latitude"], 35.7148);
    assert_eq!(marker["relevanceScore"], 0.97);
    assert_eq!(marker["content"]["iconType"], "attraction");

    // Capped at ATTRACTION_IMAGE_COUNT, in original photo order
    let blocks = marker["content"]["editorData"]["blocks"].as_array().unwrap();
    let image_urls: Vec<&str> = blocks
        .iter()
        .filter(|block| block["type"] == "image")
        .map(|block| block["data"]["file"]["url"].as_str().unwrap())
        .collect();
    assert_eq!(image_urls.len(), 3);
    assert!(image_urls[0].ends_with("_0.jpg"));
    assert!(image_urls[1].ends_with("_1.jpg"));
    assert!(image_urls[2].ends_with("_2.jpg"));
    assert_eq!(marker["content"]["headerImage"], image_urls[0]);

    // Generative summary survives enrichment
    assert!(blocks
        .iter()
        .any(|block| block["data"]["text"] == "【概要】都内最古の寺院"));
    // Attribution links the provider website
    assert!(blocks
        .iter()
        .any(|block| block["data"]["text"]
            .as_str()
            .is_some_and(|text| text.contains("https://www.senso-ji.jp"))));
}

#[tokio::test]
async fn test_unknown_persisted_status_passes_through() {
    let store = MemoryStore::default();
    let record = json!({
        "jobId": "job_legacy",
        "status": "archived",
        "payload": {"kept": true}
    });
    store.objects.lock().unwrap().insert(
        "rcmnd_job/job_legacy.json".to_string(),
        serde_json::to_vec(&record).unwrap(),
    );

    let server = build_server(
        StubPlaces::empty(),
        StubGenerative {
            completion: String::new(),
        },
        store,
    );

    let response = server.get("/recommendation/status/job_legacy").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "archived");
    assert_eq!(body["data"], record);
}
