//! Genre resolution for a single track identifier.
//!
//! Lookup order: empty check, cache, then (if lookups are still allowed) a
//! track search, fuzzy selection of the best candidate, and a genre fetch for
//! that candidate's primary artist. Only a real genre is ever cached, so a
//! miss is retried on the next run.

use crate::cache::GenreCache;
use crate::models::GenreLabel;
use crate::rate_limit::{Clock, RateLimiter, SystemClock};
use crate::scoring::select_best_candidate;
use crate::spotify::{MetadataService, ServiceError};

/// Candidates requested per search.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Counters for one resolver lifetime.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolveStats {
    pub empty_identifiers: usize,
    pub cache_hits: usize,
    pub outbound_calls: usize,
    pub resolved: usize,
    pub no_results: usize,
    pub no_artist: usize,
    pub no_genre: usize,
    pub throttle_trips: usize,
    pub service_errors: usize,
    pub skipped_exhausted: usize,
}

pub struct GenreResolver<S: MetadataService, C: Clock = SystemClock> {
    service: S,
    limiter: RateLimiter<C>,
    cache: GenreCache,
    search_limit: usize,
    stats: ResolveStats,
    exhaustion_reported: bool,
}

impl<S: MetadataService, C: Clock> GenreResolver<S, C> {
    pub fn new(service: S, limiter: RateLimiter<C>, cache: GenreCache) -> Self {
        Self {
            service,
            limiter,
            cache,
            search_limit: DEFAULT_SEARCH_LIMIT,
            stats: ResolveStats::default(),
            exhaustion_reported: false,
        }
    }

    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit.max(1);
        self
    }

    /// Best-guess genre for `identifier`, or `None` when it cannot be resolved.
    pub fn resolve(&mut self, identifier: &str) -> Option<GenreLabel> {
        if identifier.trim().is_empty() {
            self.stats.empty_identifiers += 1;
            log::info!("Track name was empty");
            return None;
        }

        if let Some(genre) = self.cache.get(identifier) {
            self.stats.cache_hits += 1;
            log::debug!("Cache returned genre '{}' for '{}'", genre, identifier);
            return Some(genre.to_string());
        }

        let limit = self.search_limit;
        let candidates = self.call(identifier, "searching", |service| {
            service.search_tracks(identifier, limit)
        })?;

        let Some(best) = select_best_candidate(identifier, &candidates) else {
            self.stats.no_results += 1;
            log::info!("Search returned no tracks for '{}'", identifier);
            return None;
        };
        log::debug!(
            "Best match for '{}' is '{}' (score {}, rank {})",
            identifier,
            best.candidate.name,
            best.score,
            best.index
        );

        let Some(artist) = best.candidate.primary_artist() else {
            self.stats.no_artist += 1;
            log::info!("Best match '{}' has no artist", best.candidate.name);
            return None;
        };
        let artist_id = artist.id.clone();

        let genres = self.call(identifier, "fetching artist for", |service| {
            service.artist_genres(&artist_id)
        })?;

        match genres.into_iter().find(|g| !g.trim().is_empty()) {
            Some(genre) => {
                log::info!("Spotify returned genre '{}' for '{}'", genre, identifier);
                self.cache.put(identifier, &genre);
                self.limiter.reset_throttle();
                self.stats.resolved += 1;
                Some(genre)
            }
            None => {
                self.stats.no_genre += 1;
                log::info!("Artist {} has no genres, nothing cached for '{}'", artist_id, identifier);
                None
            }
        }
    }

    /// Run one outbound operation under the rate limiter, retrying on
    /// rate-limit responses until the throttle ceiling is reached.
    fn call<T>(
        &mut self,
        identifier: &str,
        action: &str,
        mut op: impl FnMut(&mut S) -> Result<T, ServiceError>,
    ) -> Option<T> {
        loop {
            if self.limiter.is_exhausted() {
                self.stats.skipped_exhausted += 1;
                self.report_exhaustion();
                return None;
            }

            self.limiter.gate();
            self.stats.outbound_calls += 1;

            match op(&mut self.service) {
                Ok(value) => return Some(value),
                Err(ServiceError::RateLimited { retry_after }) => {
                    self.stats.throttle_trips += 1;
                    if self.limiter.record_throttle() {
                        log::warn!("Rate limited while {} '{}'", action, identifier);
                        self.report_exhaustion();
                        return None;
                    }
                    log::warn!(
                        "Rate limited while {} '{}', retry {}/{} after {:?}",
                        action,
                        identifier,
                        self.limiter.trips(),
                        self.limiter.max_trips(),
                        retry_after
                    );
                    self.limiter.backoff(retry_after);
                }
                Err(err) => {
                    self.stats.service_errors += 1;
                    log::warn!("Spotify error while {} '{}': {}", action, identifier, err);
                    return None;
                }
            }
        }
    }

    fn report_exhaustion(&mut self) {
        if !self.exhaustion_reported {
            self.exhaustion_reported = true;
            log::warn!(
                "Spotify rate limit hit {} times in a row, lookups disabled for the rest of this run",
                self.limiter.max_trips()
            );
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.limiter.is_exhausted()
    }

    pub fn stats(&self) -> &ResolveStats {
        &self.stats
    }

    pub fn cache(&self) -> &GenreCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut GenreCache {
        &mut self.cache
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Hand back the cache for consolidation and shutdown.
    pub fn into_cache(self) -> GenreCache {
        self.cache
    }
}
