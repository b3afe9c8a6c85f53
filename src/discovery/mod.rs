//! Discovery Pipeline (C7).
//!
//! Two variants — recommender-driven and curated-playlist-driven — share
//! one skeleton (§4.7). Grounded on
//! `original_source/utils/discovery.py` (`DiscoveryUtils`) and
//! `original_source/commands/discovery_lastfm.py`.

mod ledger;

pub use ledger::QueriedLedger;

use crate::cache::CacheManager;
use crate::service_client::{ManagerClient, MetadataClient, PlaylistSource, RecommenderClient};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub identifier: Option<String>,
    pub name: String,
    pub source: String,
    pub match_score: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FilteringStats {
    pub total_candidates: usize,
    pub filtered_already_in_manager: usize,
    pub filtered_in_exclusions: usize,
    pub filtered_low_score: usize,
    pub musicbrainz_recovered: usize,
    pub final_count: usize,
    pub limited_count: usize,
    pub random_sampling_applied: bool,
}

impl FilteringStats {
    /// Logged in the fixed tabular format the reference implementation uses
    /// (`DiscoveryUtils.log_filtering_statistics`).
    pub fn log(&self, command_name: &str) {
        info!("{}", "=".repeat(70));
        info!("{} FILTERING STATISTICS", command_name.to_uppercase());
        info!("{}", "=".repeat(70));
        info!("Total Candidates:                     {}", self.total_candidates);
        info!("Filtered - Already in Manager:        {}", self.filtered_already_in_manager);
        info!("Filtered - Exclusions:                {}", self.filtered_in_exclusions);
        info!("Filtered - Low Match Score:            {}", self.filtered_low_score);
        info!("MusicBrainz Recovered:                 {}", self.musicbrainz_recovered);
        info!("Final Count:                           {}", self.final_count);
        if self.random_sampling_applied {
            info!("Random Sampling Applied - Limited By:  {}", self.limited_count);
        }
    }
}

pub struct DiscoveryConfig {
    pub artists_to_query: usize,
    pub similar_per_artist: usize,
    pub cooldown_days: i64,
    pub min_similarity: f64,
    pub min_match_score: f64,
    pub limit: usize,
}

struct ManagerContext {
    existing_identifiers: HashSet<String>,
    existing_names_lower: HashSet<String>,
    excluded_identifiers: HashSet<String>,
}

async fn load_manager_context(manager: &dyn ManagerClient) -> anyhow::Result<ManagerContext> {
    let artists = manager.list_artists().await?;
    let existing_identifiers = artists.iter().map(|a| a.identifier.clone()).collect();
    let existing_names_lower = artists.iter().map(|a| a.name.to_lowercase()).collect();
    let excluded_identifiers = manager.list_exclusions().await?;
    Ok(ManagerContext { existing_identifiers, existing_names_lower, excluded_identifiers })
}

/// Step 3: resolve candidates lacking an identifier via fuzzy metadata
/// search. Failures are cached negatively by the caller via `cache`.
async fn recover_identifiers(
    candidates: Vec<Candidate>,
    metadata: &dyn MetadataClient,
    cache: &dyn CacheManager,
    min_similarity: f64,
    stats: &mut FilteringStats,
) -> anyhow::Result<Vec<Candidate>> {
    let mut resolved = Vec::with_capacity(candidates.len());
    for mut candidate in candidates {
        if candidate.identifier.is_some() {
            resolved.push(candidate);
            continue;
        }

        let fingerprint = crate::cache::fingerprint("artist_fuzzy_search", &[&candidate.name]);
        if cache.is_failed(&fingerprint, "metadata")? {
            continue;
        }

        match metadata.fuzzy_search_artist(&candidate.name).await? {
            Some(m) if m.similarity >= min_similarity => {
                candidate.identifier = Some(m.identifier);
                candidate.name = m.canonical_name;
                stats.musicbrainz_recovered += 1;
                resolved.push(candidate);
            }
            Some(_) => {
                cache.mark_failed(&fingerprint, "metadata", "similarity below threshold", 1)?;
            }
            None => {
                cache.mark_failed(&fingerprint, "metadata", "no match", 1)?;
            }
        }
    }
    Ok(resolved)
}

/// Steps 4-5: filter against manager state/exclusions/score threshold, then
/// dedup by identifier keeping the highest score.
fn filter_and_dedup(
    candidates: Vec<Candidate>,
    ctx: &ManagerContext,
    min_match_score: f64,
    stats: &mut FilteringStats,
) -> Vec<Candidate> {
    let mut by_identifier: std::collections::HashMap<String, Candidate> = std::collections::HashMap::new();

    for candidate in candidates {
        let Some(identifier) = &candidate.identifier else { continue };

        if ctx.existing_identifiers.contains(identifier) || ctx.existing_names_lower.contains(&candidate.name.to_lowercase()) {
            stats.filtered_already_in_manager += 1;
            continue;
        }
        if ctx.excluded_identifiers.contains(identifier) {
            stats.filtered_in_exclusions += 1;
            continue;
        }
        if let Some(score) = candidate.match_score {
            if score < min_match_score {
                stats.filtered_low_score += 1;
                continue;
            }
        }

        match by_identifier.get(identifier) {
            Some(existing) if existing.match_score.unwrap_or(0.0) >= candidate.match_score.unwrap_or(0.0) => {}
            _ => {
                by_identifier.insert(identifier.clone(), candidate);
            }
        }
    }

    by_identifier.into_values().collect()
}

/// Step 6: random-sample to `limit` for intentional variety.
fn sample_to_limit(mut candidates: Vec<Candidate>, limit: usize, stats: &mut FilteringStats) -> Vec<Candidate> {
    if limit == 0 || candidates.len() <= limit {
        return candidates;
    }
    let mut rng = rand::rng();
    candidates.shuffle(&mut rng);
    stats.limited_count = candidates.len() - limit;
    stats.random_sampling_applied = true;
    candidates.truncate(limit);
    candidates
}

fn to_artifact_json(candidates: &[Candidate]) -> Vec<serde_json::Value> {
    candidates
        .iter()
        .map(|c| {
            serde_json::json!({
                "MusicBrainzId": c.identifier,
                "ArtistName": c.name,
                "source": c.source,
            })
        })
        .collect()
}

pub struct RecommenderDiscoveryRun<'a> {
    pub manager: &'a dyn ManagerClient,
    pub recommender: &'a dyn RecommenderClient,
    pub metadata: &'a dyn MetadataClient,
    pub cache: &'a dyn CacheManager,
    pub writer: &'a dyn crate::service_client::DiscoveryArtifactWriter,
    pub ledger: &'a QueriedLedger,
    pub artifact_path: &'a Path,
    pub config: &'a DiscoveryConfig,
    pub command_name: &'a str,
}

impl<'a> RecommenderDiscoveryRun<'a> {
    pub async fn run(self) -> anyhow::Result<FilteringStats> {
        let mut stats = FilteringStats::default();
        let ctx = load_manager_context(self.manager).await?;

        let already_queried = self.ledger.recently_queried(self.config.cooldown_days)?;
        let mut eligible: Vec<_> = ctx
            .existing_identifiers
            .iter()
            .filter(|id| !already_queried.contains(*id))
            .cloned()
            .collect();
        if eligible.is_empty() {
            eligible = ctx.existing_identifiers.iter().cloned().collect();
        }

        let mut rng = rand::rng();
        eligible.shuffle(&mut rng);
        eligible.truncate(self.config.artists_to_query);

        let artists = self.manager.list_artists().await?;
        let names_by_id: std::collections::HashMap<_, _> =
            artists.iter().map(|a| (a.identifier.clone(), a.name.clone())).collect();

        let mut candidates = Vec::new();
        for identifier in &eligible {
            let Some(name) = names_by_id.get(identifier) else { continue };
            let (accepted, rejected) =
                self.recommender.get_similar(identifier, name, self.config.similar_per_artist).await?;
            stats.total_candidates += accepted.len() + rejected.len();

            for similar in accepted.into_iter().chain(rejected) {
                candidates.push(Candidate {
                    identifier: similar.identifier,
                    name: similar.name,
                    source: self.command_name.to_string(),
                    match_score: Some(similar.similarity),
                });
            }
        }

        self.ledger.record_queried(&eligible, self.config.cooldown_days)?;

        let recovered =
            recover_identifiers(candidates, self.metadata, self.cache, self.config.min_similarity, &mut stats).await?;
        let filtered = filter_and_dedup(recovered, &ctx, self.config.min_match_score, &mut stats);
        let sampled = sample_to_limit(filtered, self.config.limit, &mut stats);
        stats.final_count = sampled.len();

        self.writer.write(self.artifact_path, &to_artifact_json(&sampled)).await?;
        stats.log(self.command_name);
        Ok(stats)
    }
}

pub struct CuratedDiscoveryRun<'a> {
    pub manager: &'a dyn ManagerClient,
    pub playlist_source: &'a dyn PlaylistSource,
    pub metadata: &'a dyn MetadataClient,
    pub cache: &'a dyn CacheManager,
    pub writer: &'a dyn crate::service_client::DiscoveryArtifactWriter,
    pub artifact_path: &'a Path,
    pub config: &'a DiscoveryConfig,
    pub command_name: &'a str,
    pub user: &'a str,
    pub playlist_kind: &'a str,
}

impl<'a> CuratedDiscoveryRun<'a> {
    pub async fn run(self) -> anyhow::Result<FilteringStats> {
        let mut stats = FilteringStats::default();
        let ctx = load_manager_context(self.manager).await?;

        let playlists = self.playlist_source.curated_playlists(self.user).await?;
        let Some(url) = playlists.get(self.playlist_kind) else {
            stats.log(self.command_name);
            return Ok(stats);
        };
        let tracks = self.playlist_source.playlist_tracks(url).await?;
        stats.total_candidates = tracks.len();

        let candidates: Vec<Candidate> = tracks
            .into_iter()
            .map(|t| Candidate { identifier: None, name: t.artist, source: self.command_name.to_string(), match_score: None })
            .collect();

        let recovered =
            recover_identifiers(candidates, self.metadata, self.cache, self.config.min_similarity, &mut stats).await?;
        let filtered = filter_and_dedup(recovered, &ctx, 0.0, &mut stats);
        let sampled = sample_to_limit(filtered, self.config.limit, &mut stats);
        stats.final_count = sampled.len();

        self.writer.write(self.artifact_path, &to_artifact_json(&sampled)).await?;
        stats.log(self.command_name);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, score: f64) -> Candidate {
        Candidate { identifier: Some(id.into()), name: format!("artist-{id}"), source: "test".into(), match_score: Some(score) }
    }

    #[test]
    fn filter_and_dedup_keeps_highest_score() {
        let ctx = ManagerContext {
            existing_identifiers: HashSet::new(),
            existing_names_lower: HashSet::new(),
            excluded_identifiers: HashSet::new(),
        };
        let mut stats = FilteringStats::default();
        let candidates = vec![candidate("a", 0.5), candidate("a", 0.9)];
        let result = filter_and_dedup(candidates, &ctx, 0.0, &mut stats);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].match_score, Some(0.9));
    }

    #[test]
    fn filter_and_dedup_rejects_existing_and_excluded() {
        let mut existing_identifiers = HashSet::new();
        existing_identifiers.insert("in-manager".to_string());
        let mut excluded_identifiers = HashSet::new();
        excluded_identifiers.insert("excluded".to_string());
        let ctx = ManagerContext { existing_identifiers, existing_names_lower: HashSet::new(), excluded_identifiers };
        let mut stats = FilteringStats::default();
        let candidates = vec![candidate("in-manager", 1.0), candidate("excluded", 1.0), candidate("fresh", 1.0)];
        let result = filter_and_dedup(candidates, &ctx, 0.0, &mut stats);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].identifier.as_deref(), Some("fresh"));
        assert_eq!(stats.filtered_already_in_manager, 1);
        assert_eq!(stats.filtered_in_exclusions, 1);
    }

    #[test]
    fn filter_and_dedup_rejects_low_score() {
        let ctx = ManagerContext {
            existing_identifiers: HashSet::new(),
            existing_names_lower: HashSet::new(),
            excluded_identifiers: HashSet::new(),
        };
        let mut stats = FilteringStats::default();
        let result = filter_and_dedup(vec![candidate("a", 0.1)], &ctx, 0.9, &mut stats);
        assert!(result.is_empty());
        assert_eq!(stats.filtered_low_score, 1);
    }

    #[test]
    fn sample_to_limit_is_noop_under_limit() {
        let mut stats = FilteringStats::default();
        let candidates = vec![candidate("a", 1.0)];
        let result = sample_to_limit(candidates, 5, &mut stats);
        assert_eq!(result.len(), 1);
        assert!(!stats.random_sampling_applied);
    }

    #[test]
    fn sample_to_limit_truncates_and_records_stats() {
        let mut stats = FilteringStats::default();
        let candidates: Vec<_> = (0..10).map(|i| candidate(&i.to_string(), 1.0)).collect();
        let result = sample_to_limit(candidates, 5, &mut stats);
        assert_eq!(result.len(), 5);
        assert!(stats.random_sampling_applied);
        assert_eq!(stats.limited_count, 5);
    }
}
