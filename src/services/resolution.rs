/// Place Resolution Engine
///
/// Turns a location plus a category into a ranked, deduplicated list of
/// place candidates. Two mutually exclusive acquisition strategies, picked
/// once per job: the structured nearby-search path for food, the
/// generative-search path for attractions and events.
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{Category, Coordinates, PlaceCandidate};
use crate::services::providers::gemini::strip_code_fences;
use crate::services::providers::{
    GenerativeProvider, NearbySearchQuery, NearbySummary, PlaceDetails, PlacesProvider,
};

/// Detail fields for the food path; reviews feed the narrative stage
const FOOD_DETAIL_FIELDS: &str = "name,rating,formatted_address,photos,website,url,reviews,geometry";

/// Keywords marking a candidate as a flea market (Chinese and Japanese
/// terms; the English ones are already lowercase for the folded match)
const FLEA_MARKET_KEYWORDS: &[&str] = &[
    "跳蚤市场",
    "フリーマーケット",
    "フリマ",
    "蚤の市",
    "古物市場",
    "flea market",
    "flea",
    "market",
    "古着",
    "中古",
    "リサイクル",
];

/// Explicit past-tense markers; a match excludes an event candidate.
/// Absence of any temporal signal keeps the candidate (denylist, not
/// allowlist: the generative provider rarely supplies structured dates).
const PAST_EVENT_KEYWORDS: &[&str] = &["last month", "last week", "yesterday", "過去", "先月", "先週"];

/// One resolution request, normalized from the job parameters
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub category: Category,
    pub sub_type: String,
    pub budget: String,
}

pub struct PlaceResolver {
    places: Arc<dyn PlacesProvider>,
    generative: Arc<dyn GenerativeProvider>,
    config: Arc<Config>,
}

impl PlaceResolver {
    pub fn new(
        places: Arc<dyn PlacesProvider>,
        generative: Arc<dyn GenerativeProvider>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            places,
            generative,
            config,
        }
    }

    pub async fn resolve(&self, request: &ResolveRequest) -> AppResult<Vec<PlaceCandidate>> {
        if request.category.uses_generative_search() {
            self.resolve_generative(request).await
        } else {
            self.resolve_structured(request).await
        }
    }

    /// Structured path: page through nearby-search, then rank and fetch
    /// details for the survivors.
    async fn resolve_structured(&self, request: &ResolveRequest) -> AppResult<Vec<PlaceCandidate>> {
        let keyword = search_keyword(request.category, &request.sub_type);
        let (min_price, max_price) = budget_price_levels(&request.budget);
        let max_results = self.max_results(request.category);

        // Collect phase: gather up to three pages' worth before committing
        // to any ranking, so the best-rated places aren't lost to an
        // arbitrary page boundary
        let mut collected: Vec<NearbySummary> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            if page_token.is_some() {
                tokio::time::sleep(Duration::from_secs(self.config.page_token_delay_secs)).await;
            }

            let page = self
                .places
                .nearby_search(&NearbySearchQuery {
                    latitude: request.latitude,
                    longitude: request.longitude,
                    radius: self.search_radius(request.category),
                    keyword: keyword.clone(),
                    min_price,
                    max_price,
                    page_token: page_token.clone(),
                })
                .await?;

            collected.extend(page.results);

            if collected.len() >= max_results * 3 {
                break;
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        // Rank phase: best-rated first, then cap
        collected.sort_by(|a, b| b.rating.partial_cmp(&a.rating).unwrap_or(Ordering::Equal));
        collected.truncate(max_results);

        let mut candidates = Vec::with_capacity(collected.len());
        for summary in collected {
            match self
                .places
                .place_details(&summary.place_id, FOOD_DETAIL_FIELDS)
                .await
            {
                Ok(details) => {
                    candidates.push(self.candidate_from_details(summary.place_id, details, request))
                }
                // Partial results are acceptable; one bad record doesn't
                // sink the job
                Err(err) => {
                    tracing::warn!(
                        place_id = %summary.place_id,
                        error = %err,
                        "details lookup failed, dropping candidate"
                    );
                }
            }
        }

        tracing::info!(
            count = candidates.len(),
            category = request.category.as_str(),
            "structured search resolved"
        );
        Ok(candidates)
    }

    fn candidate_from_details(
        &self,
        place_id: String,
        details: PlaceDetails,
        request: &ResolveRequest,
    ) -> PlaceCandidate {
        let coordinates = match details.geometry.as_ref() {
            Some(geometry) => Some(geometry.coordinates()),
            None => {
                tracing::warn!(name = %details.name, "place record missing geometry, using search center");
                Some(Coordinates {
                    latitude: request.latitude,
                    longitude: request.longitude,
                })
            }
        };

        PlaceCandidate {
            place_id,
            name: details.name,
            address: details.formatted_address,
            coordinates,
            rating: details.rating,
            website: details.website.or(details.url).unwrap_or_default(),
            photo_references: details
                .photos
                .into_iter()
                .map(|photo| photo.photo_reference)
                .collect(),
            reviews: details.reviews,
            ..PlaceCandidate::default()
        }
    }

    /// Generative path: one completion per search. An unparseable or empty
    /// response is fatal for the whole job, not silently recovered.
    async fn resolve_generative(&self, request: &ResolveRequest) -> AppResult<Vec<PlaceCandidate>> {
        let (system_instruction, prompt) = self.build_search_prompt(request);
        let completion = self.generative.generate(&system_instruction, &prompt).await?;

        let parsed = parse_generative_places(&completion)?;

        let mut candidates: Vec<PlaceCandidate> = parsed
            .into_iter()
            .filter(|place| !place.name.is_empty())
            .map(|place| {
                let coordinates = match (place.latitude, place.longitude) {
                    (Some(latitude), Some(longitude)) => Some(Coordinates {
                        latitude,
                        longitude,
                    }),
                    _ => None,
                };
                PlaceCandidate {
                    place_id: synthesized_place_id(&place.name),
                    name: place.name,
                    address: place.address,
                    coordinates,
                    website: place.website,
                    summary: place.summary,
                    ..PlaceCandidate::default()
                }
            })
            .collect();

        if candidates.is_empty() {
            return Err(AppError::ExternalApi(
                "generative search returned no results".to_string(),
            ));
        }

        if request.category == Category::Events {
            candidates.retain(|candidate| {
                let keep = !mentions_past_event(&candidate.name, &candidate.summary);
                if !keep {
                    tracing::info!(name = %candidate.name, "dropping past-dated event");
                }
                keep
            });
            for candidate in &mut candidates {
                candidate.is_flea_market = is_flea_market(&candidate.name, &candidate.summary);
            }
            order_event_candidates(&mut candidates);
        }

        let max_results = self.max_results(request.category);
        if candidates.len() < max_results {
            tracing::warn!(
                count = candidates.len(),
                expected = max_results,
                category = request.category.as_str(),
                "generative search under-filled"
            );
        }
        candidates.truncate(max_results);

        for candidate in &mut candidates {
            self.resolve_coordinates(candidate, request).await;
        }

        Ok(candidates)
    }

    /// Fallback chain, stopping at the first success: coordinates from the
    /// generative response, then geocoding the address, then the search
    /// center with a diagnostic note.
    async fn resolve_coordinates(&self, candidate: &mut PlaceCandidate, request: &ResolveRequest) {
        if candidate.coordinates.is_some() {
            return;
        }

        if !candidate.address.is_empty() {
            match self.places.geocode(&candidate.address).await {
                Ok(Some(coordinates)) => {
                    candidate.coordinates = Some(coordinates);
                    return;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(name = %candidate.name, error = %err, "geocoding failed");
                }
            }
        }

        tracing::warn!(name = %candidate.name, "no coordinates resolved, using search center");
        candidate.coordinates = Some(Coordinates {
            latitude: request.latitude,
            longitude: request.longitude,
        });
        candidate.coordinate_note = Some("coordinates fall back to the search center".to_string());
    }

    fn build_search_prompt(&self, request: &ResolveRequest) -> (String, String) {
        let lat = request.latitude;
        let lng = request.longitude;

        match request.category {
            Category::Events => {
                let min_results = self.config.market_max_results;
                let summary_len = self.config.attraction_summary_max_length;
                let system_instruction = format!(
                    "你是一个专业的日本旅游信息专家。\
                     请根据提供的经纬度坐标 ({lat}, {lng})，搜索5公里范围内的跳蚤市场、文化活动、节庆活动。\n\
                     对于每个地点提供：地点名称（形式：中文名称（日文名称），尽量使用官方名称）、详细地址、\
                     准确的经纬度坐标、活动内容和特色亮点的中文概述（{summary_len}字以内，概述中必须明确指出举办时间）、\
                     官方网站URL（如果不存在则为空字符串）。\n\
                     必须返回至少{min_results}个地点。\
                     优先推荐跳蚤市场（フリーマーケット、フリマ、跳蚤市场），然后再推荐其他类型的活动，\
                     结果必须按此优先级降序排列，跳蚤市场排在前面。\n\
                     不需要提供图片URL。仅返回可解析的 JSON 数组，不添加任何额外文字说明。"
                );
                let prompt = format!(
                    "请搜索经纬度 ({lat}, {lng}) 周围5公里范围内的跳蚤市场、文化活动、节庆活动。\n\
                     每个地点必须包含字段：place_name、place_address、latitude（浮点数，必填）、\
                     longitude（浮点数，必填）、summary（{summary_len}字以内，注明具体举办日期和时间）、\
                     website（如果不存在则为空字符串）。\n\
                     只返回未来30天内的活动，不需要提供图片URL。\n\
                     必须返回至少{min_results}个地点，跳蚤市场排在前面。返回格式必须是有效的 JSON 数组。"
                );
                (system_instruction, prompt)
            }
            _ => {
                let max_results = self.config.attraction_max_results;
                let summary_len = self.config.attraction_summary_max_length;
                let system_instruction = format!(
                    "你是一个专业的日本旅游信息专家。\
                     请根据提供的经纬度坐标，搜索5公里范围内的名胜古迹、历史遗迹、文化景点、旅游景点。\n\
                     对于每个地点提供：地点名称（尽量使用官方名称，便于后续搜索）、详细地址、\
                     历史意义、文化价值、建筑特色的中文概述（{summary_len}字以内）。\n\
                     不需要提供图片URL，图片将通过其他方式获取。返回格式必须是可解析的 JSON 数组。"
                );
                let prompt = format!(
                    "请搜索经纬度 ({lat}, {lng}) 周围5公里范围内的名胜古迹和旅游景点。\n\
                     返回{max_results}个地点，每个地点必须包含字段：name、address、summary（{summary_len}字以内）。\n\
                     返回格式（必须是有效的 JSON 数组）：\n\
                     [{{\"name\": \"地点名称\", \"address\": \"详细地址\", \"summary\": \"中文概述\"}}, ...]"
                );
                (system_instruction, prompt)
            }
        }
    }

    fn search_radius(&self, category: Category) -> u32 {
        match category {
            Category::Food => self.config.food_search_radius,
            Category::Attractions => self.config.attraction_search_radius,
            Category::Events => self.config.market_search_radius,
        }
    }

    fn max_results(&self, category: Category) -> usize {
        match category {
            Category::Food => self.config.food_max_results,
            Category::Attractions => self.config.attraction_max_results,
            Category::Events => self.config.market_max_results,
        }
    }
}

/// Search keyword for the structured provider, from the client's sub-category
fn search_keyword(category: Category, sub_type: &str) -> String {
    match category {
        Category::Food => match sub_type {
            "异国料理" => "international restaurant",
            "拉面" => "ramen",
            "烤肉" => "yakiniku",
            "寿喜烧" => "sukiyaki",
            "中华" => "chinese restaurant",
            "海鲜" => "seafood",
            "居酒屋" => "izakaya",
            _ => "restaurant",
        },
        Category::Attractions => "tourist_attraction",
        Category::Events => "market",
    }
    .to_string()
}

/// Price-level bounds (0-4) for the places search, from the budget tier
fn budget_price_levels(budget: &str) -> (Option<u8>, Option<u8>) {
    match budget {
        "3000日元以内" => (None, Some(1)),
        "8000日元以内" => (None, Some(2)),
        "8000日元以上" => (Some(3), Some(4)),
        _ => (None, None),
    }
}

pub(crate) fn is_flea_market(name: &str, summary: &str) -> bool {
    let text = format!("{} {}", name, summary).to_lowercase();
    FLEA_MARKET_KEYWORDS
        .iter()
        .any(|keyword| text.contains(keyword))
}

fn mentions_past_event(name: &str, summary: &str) -> bool {
    let text = format!("{} {}", name, summary).to_lowercase();
    PAST_EVENT_KEYWORDS
        .iter()
        .any(|keyword| text.contains(keyword))
}

/// Flea markets surface ahead of every other event type; each group is
/// alphabetical by name
fn order_event_candidates(candidates: &mut [PlaceCandidate]) {
    candidates.sort_by(|a, b| {
        (!a.is_flea_market, a.name.as_str()).cmp(&(!b.is_flea_market, b.name.as_str()))
    });
}

fn synthesized_place_id(name: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    let prefix: String = name.chars().take(16).collect();
    format!("gen_{}_{}", &uuid[..8], prefix)
}

/// The model returns either a bare array or a `{"places": [...]}` wrapper,
/// and spells fields two ways; accept all of it
#[derive(Debug, Deserialize)]
struct GenerativePlace {
    #[serde(default, alias = "place_name")]
    name: String,
    #[serde(default, alias = "place_address")]
    address: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    website: String,
    #[serde(default, alias = "lat")]
    latitude: Option<f64>,
    #[serde(default, alias = "lng")]
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GenerativePlaceList {
    places: Vec<GenerativePlace>,
}

fn parse_generative_places(completion: &str) -> AppResult<Vec<GenerativePlace>> {
    let cleaned = strip_code_fences(completion);
    if cleaned.is_empty() {
        return Err(AppError::ExternalApi(
            "generative search returned an empty completion".to_string(),
        ));
    }

    let places = serde_json::from_str::<Vec<GenerativePlace>>(cleaned)
        .or_else(|_| serde_json::from_str::<GenerativePlaceList>(cleaned).map(|list| list.places))
        .map_err(|e| {
            AppError::ExternalApi(format!(
                "generative search response is not valid JSON: {}",
                e
            ))
        })?;

    if places.is_empty() {
        return Err(AppError::ExternalApi(
            "generative search returned no results".to_string(),
        ));
    }
    Ok(places)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, flea: bool) -> PlaceCandidate {
        PlaceCandidate {
            name: name.to_string(),
            is_flea_market: flea,
            ..PlaceCandidate::default()
        }
    }

    #[test]
    fn test_search_keyword_food_sub_types() {
        assert_eq!(search_keyword(Category::Food, "拉面"), "ramen");
        assert_eq!(search_keyword(Category::Food, "居酒屋"), "izakaya");
        assert_eq!(
            search_keyword(Category::Food, "异国料理"),
            "international restaurant"
        );
        assert_eq!(search_keyword(Category::Food, ""), "restaurant");
        assert_eq!(search_keyword(Category::Food, "未知"), "restaurant");
    }

    #[test]
    fn test_search_keyword_other_categories() {
        assert_eq!(
            search_keyword(Category::Attractions, ""),
            "tourist_attraction"
        );
        assert_eq!(search_keyword(Category::Events, ""), "market");
    }

    #[test]
    fn test_budget_price_levels() {
        assert_eq!(budget_price_levels("3000日元以内"), (None, Some(1)));
        assert_eq!(budget_price_levels("8000日元以内"), (None, Some(2)));
        assert_eq!(budget_price_levels("8000日元以上"), (Some(3), Some(4)));
        assert_eq!(budget_price_levels(""), (None, None));
        assert_eq!(budget_price_levels("随便"), (None, None));
    }

    #[test]
    fn test_is_flea_market_keywords() {
        assert!(is_flea_market("世田谷青空フリーマーケット", ""));
        assert!(is_flea_market("大江戸骨董市", "毎月開催の蚤の市"));
        assert!(is_flea_market("Tokyo Flea Market", ""));
        assert!(is_flea_market("リサイクルフェア", ""));
        assert!(!is_flea_market("神田祭", "江戸三大祭のひとつ"));
    }

    #[test]
    fn test_mentions_past_event() {
        assert!(mentions_past_event("骨董市", "先月開催されました"));
        assert!(mentions_past_event("Autumn Fair", "held last week"));
        assert!(!mentions_past_event("青空市", "今月の第3日曜に開催"));
        // No temporal signal at all defaults to keep
        assert!(!mentions_past_event("手作り市", "雑貨と古本の市"));
    }

    #[test]
    fn test_order_event_candidates_flea_first_then_alphabetical() {
        let mut candidates = vec![
            event("Z祭り", false),
            event("B蚤の市", true),
            event("A文化祭", false),
            event("Aフリマ", true),
        ];
        order_event_candidates(&mut candidates);

        let names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Aフリマ", "B蚤の市", "A文化祭", "Z祭り"]);
    }

    #[test]
    fn test_parse_generative_places_bare_array() {
        let completion = r#"```json
        [
            {"name": "浅草寺", "address": "東京都台東区", "summary": "古刹"},
            {"name": "上野公園", "address": "東京都台東区", "summary": "公園"}
        ]
        ```"#;

        let places = parse_generative_places(completion).unwrap();
        assert_eq!(places.len(), 2);
        assert_eq!(places[0].name, "浅草寺");
        assert_eq!(places[0].latitude, None);
    }

    #[test]
    fn test_parse_generative_places_wrapped_with_schema_field_names() {
        let completion = r#"{
            "places": [
                {
                    "place_name": "青空フリーマーケット",
                    "place_address": "横浜市",
                    "latitude": 35.4437,
                    "longitude": 139.638,
                    "summary": "毎週末開催",
                    "website": "https://example.com"
                }
            ]
        }"#;

        let places = parse_generative_places(completion).unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].name, "青空フリーマーケット");
        assert_eq!(places[0].latitude, Some(35.4437));
        assert_eq!(places[0].website, "https://example.com");
    }

    #[test]
    fn test_parse_generative_places_empty_array_is_fatal() {
        assert!(parse_generative_places("[]").is_err());
    }

    #[test]
    fn test_parse_generative_places_invalid_json_is_fatal() {
        assert!(parse_generative_places("抱歉，我找不到任何结果。").is_err());
        assert!(parse_generative_places("").is_err());
    }

    #[test]
    fn test_synthesized_place_id_shape() {
        let id = synthesized_place_id("とても長い名前の場所がここにあります");
        assert!(id.starts_with("gen_"));
        // uuid slice plus a capped name prefix
        assert!(id.chars().count() <= 4 + 8 + 1 + 16);
    }
}
