// ==========================================
// AUTOPLAY CANDIDATE GENERATOR
// ==========================================
// Builds the next autoplay list from a seed track, in priority tiers:
//   1. related videos (embedded-video seeds only, best-effort)
//   2. same artist from the known-track pool
//   3. anything else in the pool
//
// A later tier only runs while fewer than TIER_ENOUGH candidates have been
// gathered. The union is then deduplicated by id, stripped of the seed and
// every already-played id, and cut to MAX_CANDIDATES.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::catalog::RelatedSource;
use crate::track::Track;

pub const MAX_CANDIDATES: usize = 10;
pub const TIER_ENOUGH: usize = 5;

// Everything one generation run needs, owned so it can move into a task
#[derive(Debug, Clone, Default)]
pub struct CandidateRequest {
    pub seed: Option<Track>,
    pub pool: Vec<Track>,
    pub played: HashSet<String>,
    // Lower-cased artists that must never be suggested
    pub blocked_artists: HashSet<String>,
    // Related list already fetched for the seed when it was cued
    pub prefetched: Vec<Track>,
}

#[derive(Clone, Default)]
pub struct CandidateGenerator {
    related: Option<Arc<dyn RelatedSource>>,
}

impl CandidateGenerator {
    pub fn new(related: Option<Arc<dyn RelatedSource>>) -> Self {
        CandidateGenerator { related }
    }

    pub async fn generate(&self, request: CandidateRequest) -> Vec<Track> {
        let Some(seed) = &request.seed else {
            return Vec::new();
        };

        let usable = |t: &Track| {
            !t.id.is_empty()
                && t.id != seed.id
                && !request.played.contains(&t.id)
                && !request.blocked_artists.contains(&t.artist_key())
        };

        let mut gathered: Vec<Track> = Vec::new();

        // Tier 1
        if seed.category.is_embedded_video() {
            let related = if !request.prefetched.is_empty() {
                request.prefetched.clone()
            } else {
                self.fetch_related(seed).await
            };
            gathered.extend(related.into_iter().filter(|t| usable(t)));
        }

        // Tier 2
        if gathered.len() < TIER_ENOUGH {
            gathered.extend(
                request
                    .pool
                    .iter()
                    .filter(|t| t.artist == seed.artist && usable(*t))
                    .cloned(),
            );
        }

        // Tier 3
        if gathered.len() < TIER_ENOUGH {
            gathered.extend(request.pool.iter().filter(|t| usable(*t)).cloned());
        }

        let mut seen = HashSet::new();
        let candidates: Vec<Track> = gathered
            .into_iter()
            .filter(|t| seen.insert(t.id.clone()))
            .take(MAX_CANDIDATES)
            .collect();

        debug!(seed = %seed.id, count = candidates.len(), "autoplay candidates");
        candidates
    }

    async fn fetch_related(&self, seed: &Track) -> Vec<Track> {
        let (Some(source), Some(video_id)) = (&self.related, seed.valid_video_id()) else {
            return Vec::new();
        };
        match source.related(&video_id).await {
            Ok(tracks) => tracks,
            Err(e) => {
                warn!(video_id = %video_id, error = %e, "related lookup failed");
                Vec::new()
            }
        }
    }
}
