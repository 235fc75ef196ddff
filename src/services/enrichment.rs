/// Enrichment Engine
///
/// Populates candidates with images and summarization input. Photo
/// fetch-and-upload is the only intra-job parallelism: a bounded worker
/// pool, with results keyed back to their original slot so input order
/// survives out-of-order completion.
use std::sync::Arc;

use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{Category, PlaceCandidate, PlaceReview};
use crate::services::providers::{ObjectStore, PlacesProvider};

/// Reviews kept per place as summarization input
const MAX_SELECTED_REVIEWS: usize = 5;

/// Detail fields fetched when resolving an attraction to a place record
const ATTRACTION_DETAIL_FIELDS: &str = "name,rating,formatted_address,photos,website,url,geometry";

/// One photo upload job: (result slot, photo reference, key label)
type UploadJob = (usize, String, String);

pub struct Enricher {
    places: Arc<dyn PlacesProvider>,
    store: Arc<dyn ObjectStore>,
    config: Arc<Config>,
}

impl Enricher {
    pub fn new(
        places: Arc<dyn PlacesProvider>,
        store: Arc<dyn ObjectStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            places,
            store,
            config,
        }
    }

    pub async fn enrich(
        &self,
        candidates: Vec<PlaceCandidate>,
        category: Category,
    ) -> AppResult<Vec<PlaceCandidate>> {
        match category {
            Category::Food => self.enrich_food(candidates).await,
            Category::Attractions => self.enrich_attractions(candidates).await,
            // Events never carry images
            Category::Events => Ok(candidates),
        }
    }

    /// Food: top reviews become summarization input; one photo per place,
    /// uploaded concurrently across candidates.
    async fn enrich_food(
        &self,
        mut candidates: Vec<PlaceCandidate>,
    ) -> AppResult<Vec<PlaceCandidate>> {
        for candidate in &mut candidates {
            candidate.top_reviews = select_top_reviews(&candidate.reviews);
        }

        let jobs: Vec<UploadJob> = candidates
            .iter()
            .enumerate()
            .filter_map(|(index, candidate)| {
                candidate
                    .photo_references
                    .first()
                    .map(|reference| (index, reference.clone(), candidate.name.clone()))
            })
            .collect();

        for (index, url) in self.upload_photos(jobs).await {
            candidates[index].image_urls = vec![url];
        }

        Ok(candidates)
    }

    /// Attractions: match each generative candidate to a place record, then
    /// fetch up to the configured number of photos per place.
    async fn enrich_attractions(
        &self,
        mut candidates: Vec<PlaceCandidate>,
    ) -> AppResult<Vec<PlaceCandidate>> {
        for candidate in &mut candidates {
            self.attach_place_record(candidate).await;
        }

        for candidate in &mut candidates {
            if candidate.photo_references.is_empty() {
                continue;
            }

            let jobs: Vec<UploadJob> = candidate
                .photo_references
                .iter()
                .take(self.config.attraction_image_count)
                .enumerate()
                .map(|(photo_index, reference)| {
                    (
                        photo_index,
                        reference.clone(),
                        format!("{}_{}", candidate.name, photo_index),
                    )
                })
                .collect();
            let slot_count = jobs.len();

            // Index-keyed slots: original photo order regardless of which
            // upload finishes first
            let mut slots: Vec<Option<String>> = vec![None; slot_count];
            for (photo_index, url) in self.upload_photos(jobs).await {
                slots[photo_index] = Some(url);
            }
            candidate.image_urls = slots.into_iter().flatten().collect();
        }

        Ok(candidates)
    }

    /// Best-effort match of a generative candidate to a provider place
    /// record. A miss leaves the candidate imageless but otherwise intact.
    async fn attach_place_record(&self, candidate: &mut PlaceCandidate) {
        let query = if candidate.address.is_empty() {
            candidate.name.clone()
        } else {
            format!("{} {}", candidate.name, candidate.address)
        };
        let Some(center) = candidate.coordinates else {
            return;
        };

        let place_id = match self
            .places
            .text_search(&query, center.latitude, center.longitude)
            .await
        {
            Ok(Some(place_id)) => place_id,
            Ok(None) => {
                tracing::info!(name = %candidate.name, "no place record found");
                return;
            }
            Err(err) => {
                tracing::warn!(name = %candidate.name, error = %err, "text search failed");
                return;
            }
        };

        match self
            .places
            .place_details(&place_id, ATTRACTION_DETAIL_FIELDS)
            .await
        {
            Ok(details) => {
                candidate.place_id = place_id;
                if !details.name.is_empty() {
                    candidate.name = details.name;
                }
                if !details.formatted_address.is_empty() {
                    candidate.address = details.formatted_address;
                }
                if details.rating > 0.0 {
                    candidate.rating = details.rating;
                }
                if candidate.website.is_empty() {
                    candidate.website = details.website.or(details.url).unwrap_or_default();
                }
                if let Some(geometry) = details.geometry.as_ref() {
                    candidate.coordinates = Some(geometry.coordinates());
                    candidate.coordinate_note = None;
                }
                candidate.photo_references = details
                    .photos
                    .into_iter()
                    .map(|photo| photo.photo_reference)
                    .collect();
            }
            Err(err) => {
                tracing::warn!(
                    name = %candidate.name,
                    error = %err,
                    "details lookup failed, keeping generative record"
                );
            }
        }
    }

    /// Fetch-and-upload for a batch of photos, bounded by the worker pool.
    /// Failures are logged and skipped; the caller gets only the successes,
    /// each keyed by its original slot.
    async fn upload_photos(&self, jobs: Vec<UploadJob>) -> Vec<(usize, String)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_image_uploads));
        let mut tasks = Vec::with_capacity(jobs.len());

        for (slot, photo_reference, label) in jobs {
            let semaphore = Arc::clone(&semaphore);
            let places = Arc::clone(&self.places);
            let store = Arc::clone(&self.store);
            let prefix = self.config.image_prefix.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| AppError::Internal(e.to_string()))?;

                let payload = places.fetch_photo(&photo_reference).await?;
                let key = image_key(&prefix, &label);
                let url = store
                    .put_object(&key, payload.bytes, &payload.content_type)
                    .await?;
                Ok::<(usize, String), AppError>((slot, url))
            }));
        }

        let mut uploaded = Vec::new();
        for task in tasks {
            match task.await {
                Ok(Ok(entry)) => uploaded.push(entry),
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "image upload failed");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "image upload task panicked");
                }
            }
        }
        uploaded
    }
}

/// Drop textless reviews, rank by helpfulness signal with rating as the
/// tiebreaker, keep the top few as summarization input
pub(crate) fn select_top_reviews(reviews: &[PlaceReview]) -> Vec<String> {
    let mut with_text: Vec<&PlaceReview> = reviews
        .iter()
        .filter(|review| !review.text.is_empty())
        .collect();

    with_text.sort_by(|a, b| {
        (b.likes.unwrap_or(0), b.rating)
            .partial_cmp(&(a.likes.unwrap_or(0), a.rating))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    with_text
        .into_iter()
        .take(MAX_SELECTED_REVIEWS)
        .map(|review| review.text.clone())
        .collect()
}

/// Object key for an uploaded image: unique per upload, readable per place
fn image_key(prefix: &str, place_name: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}{}_{}.jpg", prefix, &uuid[..8], sanitize_name(place_name))
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .take(50)
        .collect::<String>()
        .trim()
        .replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(text: &str, rating: f64, likes: Option<u32>) -> PlaceReview {
        PlaceReview {
            text: text.to_string(),
            rating,
            likes,
        }
    }

    #[test]
    fn test_select_top_reviews_prefers_helpfulness() {
        let reviews = vec![
            review("五つ星", 5.0, None),
            review("よく参考になる", 3.0, Some(20)),
            review("まあまあ", 4.0, Some(5)),
        ];

        let selected = select_top_reviews(&reviews);
        assert_eq!(selected, vec!["よく参考になる", "まあまあ", "五つ星"]);
    }

    #[test]
    fn test_select_top_reviews_falls_back_to_rating() {
        let reviews = vec![
            review("普通", 3.0, None),
            review("最高", 5.0, None),
            review("良い", 4.0, None),
        ];

        let selected = select_top_reviews(&reviews);
        assert_eq!(selected, vec!["最高", "良い", "普通"]);
    }

    #[test]
    fn test_select_top_reviews_drops_textless_and_caps_at_five() {
        let mut reviews = vec![review("", 5.0, Some(100))];
        for i in 0..7 {
            reviews.push(review(&format!("レビュー{}", i), i as f64, None));
        }

        let selected = select_top_reviews(&reviews);
        assert_eq!(selected.len(), 5);
        assert!(!selected.contains(&String::new()));
        assert_eq!(selected[0], "レビュー6");
    }

    #[test]
    fn test_select_top_reviews_empty_input() {
        assert!(select_top_reviews(&[]).is_empty());
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Sushi Bar #1 (本店)"), "Sushi_Bar_1_本店");
        assert_eq!(sanitize_name("a/b\\c"), "abc");
    }

    #[test]
    fn test_image_key_uses_prefix_and_extension() {
        let key = image_key("poi-images/", "浅草寺");
        assert!(key.starts_with("poi-images/"));
        assert!(key.ends_with("_浅草寺.jpg"));
    }
}
