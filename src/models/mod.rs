use serde::{Deserialize, Serialize};

/// Recommendation category, selected by the client's `main_type` string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Food,
    Attractions,
    Events,
}

impl Category {
    /// Parse the client-facing category string; anything outside the fixed
    /// set is an input-validation error at the boundary.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "美食" => Some(Category::Food),
            "名胜古迹和旅游景点" => Some(Category::Attractions),
            "跳蚤市场或活动" => Some(Category::Events),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Food => "美食",
            Category::Attractions => "名胜古迹和旅游景点",
            Category::Events => "跳蚤市场或活动",
        }
    }

    /// Whether candidates come from the generative-search path rather than
    /// the structured nearby-search path
    pub fn uses_generative_search(&self) -> bool {
        matches!(self, Category::Attractions | Category::Events)
    }

    /// Events are defined to never carry images
    pub fn carries_images(&self) -> bool {
        !matches!(self, Category::Events)
    }

    pub fn icon_type(&self) -> &'static str {
        match self {
            Category::Food => "food",
            Category::Attractions => "attraction",
            Category::Events => "activity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// A user review attached to a place record
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaceReview {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub rating: f64,
    /// Helpfulness signal; providers expose it under several names
    #[serde(default, alias = "thumbs_up", alias = "helpful_votes")]
    pub likes: Option<u32>,
}

/// A point of interest between resolution and assembly.
///
/// Candidates handed to the assembler always have `Some` coordinates and a
/// non-empty name; resolution guarantees both.
#[derive(Debug, Clone, Default)]
pub struct PlaceCandidate {
    pub place_id: String,
    pub name: String,
    pub address: String,
    pub coordinates: Option<Coordinates>,
    pub rating: f64,
    pub website: String,
    pub summary: String,
    pub photo_references: Vec<String>,
    pub image_urls: Vec<String>,
    pub reviews: Vec<PlaceReview>,
    /// Review texts selected as summarization input (food only)
    pub top_reviews: Vec<String>,
    pub is_flea_market: bool,
    /// Diagnostic set when coordinates fell back to the search center
    pub coordinate_note: Option<String>,
}

/// Parameters handed from submission to the detached execution task
#[derive(Debug, Clone)]
pub struct JobParams {
    pub job_id: String,
    pub lat: f64,
    pub lng: f64,
    pub category: Category,
    pub sub_type: String,
    pub budget: String,
    pub created_at: String,
}

/// Terminal job record persisted to the object store
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    pub status: String,
    pub completed_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Markers output format
// ============================================================================

/// The finalized recommendation document; immutable once assembled
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultDocument {
    pub request_id: String,
    pub generated_at: String,
    pub ttl_seconds: u32,
    pub markers: Vec<Marker>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub id: String,
    pub coordinates: Coordinates,
    pub content: MarkerContent,
    pub relevance_score: f64,
    pub tags: Vec<String>,
    pub actions: MarkerActions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerContent {
    pub id: String,
    pub title: String,
    pub header_image: String,
    pub icon_type: String,
    pub editor_data: EditorData,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorData {
    pub time: i64,
    pub blocks: Vec<EditorBlock>,
    pub version: String,
}

/// Editor.js content blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum EditorBlock {
    Header {
        text: String,
        level: u8,
    },
    Image {
        file: ImageFile,
        caption: String,
        #[serde(rename = "withBorder")]
        with_border: bool,
    },
    Paragraph {
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFile {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerActions {
    pub deeplink: String,
}
