/// Document Assembler
///
/// Deterministic, pure transformation of enriched candidates into the final
/// markers document. No external calls; every derived field is a function of
/// the candidate, its position, and the category.
use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    Category, Coordinates, EditorBlock, EditorData, ImageFile, Marker, MarkerActions,
    MarkerContent, PlaceCandidate, ResultDocument,
};
use crate::services::narrative::PLACEHOLDER_SUMMARY;

/// Editor.js schema version emitted in every document
const EDITOR_VERSION: &str = "2.29.0";

/// Result documents stay valid for clients this long
const RESULT_TTL_SECONDS: u32 = 300;

/// Assemble the markers document. An empty candidate list yields an empty
/// markers array, never an error.
pub fn assemble(candidates: &[PlaceCandidate], category: Category, sub_type: &str) -> ResultDocument {
    let generated_at = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let timestamp_millis = Utc::now().timestamp_millis();

    let markers = candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| {
            build_marker(
                candidate,
                index,
                category,
                sub_type,
                &generated_at,
                timestamp_millis,
            )
        })
        .collect();

    ResultDocument {
        request_id: request_id(),
        generated_at,
        ttl_seconds: RESULT_TTL_SECONDS,
        markers,
    }
}

fn build_marker(
    candidate: &PlaceCandidate,
    index: usize,
    category: Category,
    sub_type: &str,
    generated_at: &str,
    timestamp_millis: i64,
) -> Marker {
    let marker_id = format!("mk_{:02}", index + 1);
    let content_id = format!("post_{:02}", index + 1);

    let image_urls: &[String] = if category.carries_images() {
        &candidate.image_urls
    } else {
        &[]
    };
    let header_image = image_urls.first().cloned().unwrap_or_default();

    // Coordinates were resolved upstream; an explicit 0/0 placeholder beats
    // an absent field if they somehow were not
    let coordinates = candidate.coordinates.unwrap_or(Coordinates {
        latitude: 0.0,
        longitude: 0.0,
    });

    Marker {
        id: marker_id.clone(),
        coordinates,
        content: MarkerContent {
            id: content_id,
            title: candidate.name.clone(),
            header_image,
            icon_type: category.icon_type().to_string(),
            editor_data: EditorData {
                time: timestamp_millis,
                blocks: build_blocks(candidate, image_urls),
                version: EDITOR_VERSION.to_string(),
            },
            created_at: generated_at.to_string(),
            updated_at: generated_at.to_string(),
        },
        relevance_score: relevance_score(candidate.rating, index),
        tags: tags_for(category, sub_type),
        actions: MarkerActions {
            deeplink: format!("mapannai://marker/{}", marker_id),
        },
    }
}

fn build_blocks(candidate: &PlaceCandidate, image_urls: &[String]) -> Vec<EditorBlock> {
    let mut blocks = vec![EditorBlock::Header {
        text: candidate.name.clone(),
        level: 2,
    }];

    for (image_index, url) in image_urls.iter().enumerate() {
        let caption = if image_urls.len() > 1 {
            format!(
                "{} - {} (图{})",
                candidate.name,
                candidate.address,
                image_index + 1
            )
        } else {
            format!("{} - {}", candidate.name, candidate.address)
        };
        blocks.push(EditorBlock::Image {
            file: ImageFile { url: url.clone() },
            caption,
            with_border: true,
        });
    }

    let summary = if candidate.summary.is_empty() {
        PLACEHOLDER_SUMMARY
    } else {
        candidate.summary.as_str()
    };
    blocks.push(EditorBlock::Paragraph {
        text: format!("【概要】{}", summary),
    });

    if !candidate.website.is_empty() {
        blocks.push(EditorBlock::Paragraph {
            text: format!("信息来源：[点击跳转原链接]({})", candidate.website),
        });
    }

    blocks
}

/// Base 0.5 plus rating/10 when rated, minus 0.05 per position, floored at
/// 0.1, rounded to two decimals
pub(crate) fn relevance_score(rating: f64, index: usize) -> f64 {
    let base = if rating > 0.0 { 0.5 + rating / 10.0 } else { 0.5 };
    let score = (base - 0.05 * index as f64).max(0.1);
    (score * 100.0).round() / 100.0
}

fn tags_for(category: Category, sub_type: &str) -> Vec<String> {
    match category {
        Category::Food => {
            let mut tags = vec!["food"];
            tags.extend_from_slice(match sub_type {
                "异国料理" => &["international", "restaurant"][..],
                "拉面" => &["ramen", "noodles"][..],
                "烤肉" => &["yakiniku", "bbq"][..],
                "寿喜烧" => &["sukiyaki", "hotpot"][..],
                "中华" => &["chinese", "restaurant"][..],
                "海鲜" => &["seafood", "restaurant"][..],
                "居酒屋" => &["izakaya", "bar"][..],
                _ => &[][..],
            });
            tags.into_iter().map(String::from).collect()
        }
        Category::Attractions => ["attraction", "sightseeing", "tourism"]
            .into_iter()
            .map(String::from)
            .collect(),
        Category::Events => ["activity", "event", "market"]
            .into_iter()
            .map(String::from)
            .collect(),
    }
}

fn request_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("req_{}", &uuid[..8])
}
