/// Narrative Generation Engine
///
/// Attractions and events arrive with summaries already written by the
/// generative search; only food candidates need the review-based pass. The
/// whole batch goes out as a single request to bound provider call volume.
use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{Category, PlaceCandidate};
use crate::services::providers::gemini::strip_code_fences;
use crate::services::providers::GenerativeProvider;

/// Shown when the model's batch response skips a place
pub(crate) const PLACEHOLDER_SUMMARY: &str = "暂无概要";

pub struct Narrator {
    generative: Arc<dyn GenerativeProvider>,
    config: Arc<Config>,
}

#[derive(Debug, Deserialize)]
struct SummaryEntry {
    place_id: String,
    summary_text: String,
}

impl Narrator {
    pub fn new(generative: Arc<dyn GenerativeProvider>, config: Arc<Config>) -> Self {
        Self { generative, config }
    }

    pub async fn summarize(
        &self,
        mut candidates: Vec<PlaceCandidate>,
        category: Category,
    ) -> AppResult<Vec<PlaceCandidate>> {
        if category != Category::Food || candidates.is_empty() {
            return Ok(candidates);
        }

        let (system_instruction, prompt) = self.build_summary_prompt(&candidates);
        let completion = self
            .generative
            .generate(&system_instruction, &prompt)
            .await?;

        let cleaned = strip_code_fences(&completion);
        let entries: Vec<SummaryEntry> = serde_json::from_str(cleaned).map_err(|e| {
            AppError::ExternalApi(format!("summary response is not valid JSON: {}", e))
        })?;
        let mut summaries: HashMap<String, String> = entries
            .into_iter()
            .map(|entry| (entry.place_id, entry.summary_text))
            .collect();

        // A place the model skipped gets the placeholder instead of
        // failing the whole batch
        for candidate in &mut candidates {
            candidate.summary = summaries.remove(&candidate.place_id).unwrap_or_else(|| {
                tracing::warn!(place_id = %candidate.place_id, "summary missing from batch response");
                PLACEHOLDER_SUMMARY.to_string()
            });
        }

        Ok(candidates)
    }

    fn build_summary_prompt(&self, candidates: &[PlaceCandidate]) -> (String, String) {
        let summary_len = self.config.food_summary_max_length;

        let payload: Vec<serde_json::Value> = candidates
            .iter()
            .map(|candidate| {
                json!({
                    "place_id": candidate.place_id,
                    "name": candidate.name,
                    "address": candidate.address,
                    "rating": candidate.rating,
                    "reviews": candidate.top_reviews,
                })
            })
            .collect();

        let system_instruction = format!(
            "你是一个专业的日本美食评论家。\
             请根据每个餐厅的高质量用户评论（已按点赞数排序，选择最受欢迎的评论），\
             生成一个{summary_len}字以内的中文概述。\
             概述应总结评论中的主要观点，突出餐厅的特色、口味、服务等亮点，\
             重点反映大多数用户认可的特点，使用自然流畅的中文表达，不要使用任何 Markdown 格式。\
             最终返回一个可解析的 JSON 数组，数组中每个对象包含 place_id 和 summary_text。"
        );
        let prompt = format!(
            "请根据以下餐厅的高质量用户评论（已按点赞数排序），为每个餐厅生成概述（每个{summary_len}字以内，中文）：\n{}\n\n\
             返回格式示例：\n[{{\"place_id\": \"xxx\", \"summary_text\": \"概述\"}}]",
            serde_json::to_string_pretty(&payload).unwrap_or_default()
        );

        (system_instruction, prompt)
    }
}
