//! `LibrarySnapshot`: the materialised catalogue + inverted indices, and the
//! track-lookup algorithm that runs against it (spec §4.3).
//!
//! Grounded on `original_source/clients/client_plex.py`'s
//! `build_library_cache`/`search_cached_library`, simplified to the scoring
//! scheme spec'd in §4.3 (0-1 scale instead of the source's 0-250 scheme).

use crate::text::{fuzzy_word_overlap, normalise};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub id: String,
    pub title_lc: String,
    pub artist_lc: String,
    pub album_lc_trunc50: String,
    pub duration_s: u32,
}

impl Track {
    pub fn new(id: impl Into<String>, title: &str, artist: &str, album: &str, duration_s: u32) -> Self {
        let album_lc: String = normalise(album).chars().take(50).collect();
        Self {
            id: id.into(),
            title_lc: normalise(title),
            artist_lc: normalise(artist),
            album_lc_trunc50: album_lc,
            duration_s,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibrarySnapshot {
    pub library_key: String,
    pub total_tracks: usize,
    pub tracks: Vec<Track>,
    pub artist_index: HashMap<String, Vec<usize>>,
    pub track_index: HashMap<String, Vec<usize>>,
    pub built_at: i64,
}

const ARTIST_FUZZY_MATCH_THRESHOLD: f64 = 0.7;
const FUZZY_MATCH_SCORE_THRESHOLD: f64 = 0.8;
const CROSS_ARTIST_GUARD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchMatch {
    pub track_index: usize,
    pub score: f64,
}

impl LibrarySnapshot {
    pub fn build(library_key: impl Into<String>, tracks: Vec<Track>, built_at: i64) -> Self {
        let mut artist_index: HashMap<String, Vec<usize>> = HashMap::new();
        let mut track_index: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, track) in tracks.iter().enumerate() {
            artist_index.entry(track.artist_lc.clone()).or_default().push(idx);
            track_index.entry(track.title_lc.clone()).or_default().push(idx);
        }

        Self {
            library_key: library_key.into(),
            total_tracks: tracks.len(),
            tracks,
            artist_index,
            track_index,
            built_at,
        }
    }

    fn album_bonus(&self, idx: usize, album: Option<&str>) -> f64 {
        let Some(album) = album else { return 0.0 };
        let album_n = normalise(album);
        if album_n.is_empty() {
            return 0.0;
        }
        let candidate = &self.tracks[idx].album_lc_trunc50;
        if candidate == &album_n {
            1.0
        } else if candidate.contains(&album_n) || album_n.contains(candidate.as_str()) {
            0.7
        } else if fuzzy_word_overlap(candidate, &album_n) >= ARTIST_FUZZY_MATCH_THRESHOLD {
            0.5
        } else {
            0.0
        }
    }

    /// Three-step search per spec §4.3: exact index intersection, then fuzzy
    /// on either axis, then miss. Every branch enforces the cross-artist
    /// guard (artist-axis score < 50/100 rejected outright).
    pub fn search(&self, title: &str, artist: &str, album: Option<&str>) -> Option<SearchMatch> {
        let title_n = normalise(title);
        let artist_n = normalise(artist);

        // Step 1: exact index intersection.
        if let (Some(artist_ids), Some(title_ids)) =
            (self.artist_index.get(&artist_n), self.track_index.get(&title_n))
        {
            let candidates: Vec<usize> = artist_ids.iter().filter(|id| title_ids.contains(id)).copied().collect();
            if !candidates.is_empty() {
                if album.is_none() {
                    return Some(SearchMatch { track_index: candidates[0], score: 1.0 });
                }
                let best = candidates
                    .iter()
                    .map(|&idx| (idx, 1.0 + self.album_bonus(idx, album)))
                    .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
                if let Some((idx, score)) = best {
                    return Some(SearchMatch { track_index: idx, score });
                }
            }
        }

        // Step 2: fuzzy on either axis, with the cross-artist guard applied
        // to every candidate regardless of which axis matched fuzzily.
        let mut best: Option<SearchMatch> = None;

        // Fuzzy artist, exact title.
        if let Some(title_ids) = self.track_index.get(&title_n) {
            for (candidate_artist, artist_ids) in self.artist_index.iter() {
                let artist_score = fuzzy_word_overlap(candidate_artist, &artist_n);
                if artist_score < CROSS_ARTIST_GUARD {
                    continue;
                }
                if fuzzy_word_overlap(candidate_artist, &artist_n) < ARTIST_FUZZY_MATCH_THRESHOLD {
                    continue;
                }
                for &idx in artist_ids.iter().filter(|id| title_ids.contains(id)) {
                    let score = 0.8 + self.album_bonus(idx, album);
                    if score >= FUZZY_MATCH_SCORE_THRESHOLD
                        && best.map(|b| score > b.score).unwrap_or(true)
                    {
                        best = Some(SearchMatch { track_index: idx, score });
                    }
                }
            }
        }

        // Fuzzy title, exact artist.
        if let Some(artist_ids) = self.artist_index.get(&artist_n) {
            for (candidate_title, title_ids) in self.track_index.iter() {
                if fuzzy_word_overlap(candidate_title, &title_n) < ARTIST_FUZZY_MATCH_THRESHOLD {
                    continue;
                }
                for &idx in artist_ids.iter().filter(|id| title_ids.contains(id)) {
                    let score = 0.8 + self.album_bonus(idx, album);
                    if score >= FUZZY_MATCH_SCORE_THRESHOLD
                        && best.map(|b| score > b.score).unwrap_or(true)
                    {
                        best = Some(SearchMatch { track_index: idx, score });
                    }
                }
            }
        }

        best
    }

    pub fn estimated_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}
