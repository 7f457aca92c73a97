//! Metadata service boundary and the Spotify Web API client behind it.
//!
//! The resolver only needs two operations: a free-text track search and an
//! artist genre lookup. Rate limiting must be reported distinctly from other
//! failures so the caller can back off and retry.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::models::{ArtistRef, TrackCandidate};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";

/// Renew the bearer token this long before Spotify says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

// ============================================================================
// Service Boundary
// ============================================================================

#[derive(Debug, Error)]
pub enum ServiceError {
    /// HTTP 429. `retry_after` is the server's Retry-After, when it sent one.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ServiceError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ServiceError::RateLimited { .. })
    }
}

/// External metadata lookups consumed by the genre resolver.
pub trait MetadataService {
    /// Search tracks by free text, returning at most `limit` candidates.
    fn search_tracks(&mut self, query: &str, limit: usize)
        -> Result<Vec<TrackCandidate>, ServiceError>;

    /// Genre tags of an artist, most significant first. May be empty.
    fn artist_genres(&mut self, artist_id: &str) -> Result<Vec<String>, ServiceError>;
}

// ============================================================================
// Spotify API Payloads
// ============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Deserialize)]
struct SearchResponse {
    tracks: Option<TrackPage>,
}

#[derive(Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<SpotifyTrack>,
}

#[derive(Deserialize)]
struct SpotifyTrack {
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtistRef>,
}

#[derive(Deserialize)]
struct SpotifyArtistRef {
    id: Option<String>,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct SpotifyArtist {
    #[serde(default)]
    genres: Vec<String>,
}

impl From<SpotifyTrack> for TrackCandidate {
    fn from(track: SpotifyTrack) -> Self {
        TrackCandidate {
            name: track.name,
            artists: track
                .artists
                .into_iter()
                .filter_map(|a| a.id.map(|id| ArtistRef { id, name: a.name }))
                .collect(),
        }
    }
}

// ============================================================================
// Spotify Client
// ============================================================================

struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Blocking Spotify Web API client using the client-credentials flow.
pub struct SpotifyClient {
    agent: ureq::Agent,
    token_url: String,
    api_base: String,
    client_id: String,
    client_secret: String,
    token: Option<AccessToken>,
}

impl SpotifyClient {
    pub fn new(client_id: &str, client_secret: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            agent,
            token_url: TOKEN_URL.to_string(),
            api_base: API_BASE.to_string(),
            client_id: client_id.trim().to_string(),
            client_secret: client_secret.trim().to_string(),
            token: None,
        }
    }

    /// Point the client at other token and API endpoints (a proxy or a local
    /// test server).
    pub fn with_endpoints(mut self, token_url: &str, api_base: &str) -> Self {
        self.token_url = token_url.trim_end_matches('/').to_string();
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn bearer(&mut self) -> Result<String, ServiceError> {
        if let Some(token) = &self.token {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let credentials = STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));
        let response = self
            .agent
            .post(&self.token_url)
            .set("Authorization", &format!("Basic {credentials}"))
            .send_form(&[("grant_type", "client_credentials")]);

        let token: TokenResponse = match response {
            Ok(resp) => resp
                .into_json()
                .map_err(|err| ServiceError::Decode(err.to_string()))?,
            Err(ureq::Error::Status(429, resp)) => {
                return Err(ServiceError::RateLimited {
                    retry_after: retry_after(&resp),
                })
            }
            Err(ureq::Error::Status(status, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                return Err(ServiceError::Auth(format!("http {status}: {body}")));
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(ServiceError::Transport(err.to_string()))
            }
        };

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        log::debug!("Obtained Spotify access token valid for {}s", lifetime.as_secs());
        let value = token.access_token;
        self.token = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &mut self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ServiceError> {
        let bearer = self.bearer()?;
        let mut request = self
            .agent
            .get(url)
            .set("Authorization", &format!("Bearer {bearer}"));
        for (key, value) in query {
            request = request.query(key, value);
        }

        match request.call() {
            Ok(resp) => resp
                .into_json()
                .map_err(|err| ServiceError::Decode(err.to_string())),
            Err(ureq::Error::Status(429, resp)) => Err(ServiceError::RateLimited {
                retry_after: retry_after(&resp),
            }),
            Err(ureq::Error::Status(401, _)) => {
                // Token revoked or expired early; fetch a fresh one next time
                self.token = None;
                Err(ServiceError::Auth("access token rejected".to_string()))
            }
            Err(ureq::Error::Status(status, resp)) => Err(ServiceError::Http {
                status,
                body: resp.into_string().unwrap_or_default(),
            }),
            Err(ureq::Error::Transport(err)) => Err(ServiceError::Transport(err.to_string())),
        }
    }
}

impl MetadataService for SpotifyClient {
    fn search_tracks(
        &mut self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<TrackCandidate>, ServiceError> {
        let limit = limit.to_string();
        let response: SearchResponse = self.get_json(
            &format!("{}/search", self.api_base),
            &[("q", query), ("type", "track"), ("limit", limit.as_str())],
        )?;
        Ok(response
            .tracks
            .map(|page| page.items.into_iter().map(TrackCandidate::from).collect())
            .unwrap_or_default())
    }

    fn artist_genres(&mut self, artist_id: &str) -> Result<Vec<String>, ServiceError> {
        let artist: SpotifyArtist = self.get_json(&format!("{}/artists/{}", self.api_base, artist_id), &[])?;
        Ok(artist.genres)
    }
}

/// Parse a Retry-After header given in whole seconds.
fn retry_after(response: &ureq::Response) -> Option<Duration> {
    response
        .header("Retry-After")
        .and_then(parse_retry_after)
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}


// ============================================================================
// Scripted Service
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::{MetadataService, ServiceError};
    use crate::models::{ArtistRef, TrackCandidate};
    use std::collections::{HashMap, VecDeque};

    /// In-memory service. Queued search outcomes are consumed first, then
    /// searches fall back to the per-query catalog.
    #[derive(Default)]
    pub struct ScriptedService {
        pub queued_searches: VecDeque<Result<Vec<TrackCandidate>, ServiceError>>,
        pub catalog: HashMap<String, Vec<TrackCandidate>>,
        pub queued_artist_errors: VecDeque<ServiceError>,
        pub artists: HashMap<String, Vec<String>>,
        pub search_calls: Vec<String>,
        pub artist_calls: Vec<String>,
    }

    impl ScriptedService {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a single-candidate search result whose artist has `genres`.
        pub fn with_track(mut self, query: &str, artist_id: &str, genres: &[&str]) -> Self {
            self.catalog
                .entry(query.to_string())
                .or_default()
                .push(candidate(query, artist_id));
            self.artists.insert(
                artist_id.to_string(),
                genres.iter().map(|g| g.to_string()).collect(),
            );
            self
        }

        pub fn outbound_calls(&self) -> usize {
            self.search_calls.len() + self.artist_calls.len()
        }
    }

    pub fn candidate(name: &str, artist_id: &str) -> TrackCandidate {
        TrackCandidate {
            name: name.to_string(),
            artists: vec![ArtistRef {
                id: artist_id.to_string(),
                name: format!("artist {artist_id}"),
            }],
        }
    }

    impl MetadataService for ScriptedService {
        fn search_tracks(
            &mut self,
            query: &str,
            limit: usize,
        ) -> Result<Vec<TrackCandidate>, ServiceError> {
            self.search_calls.push(query.to_string());
            if let Some(outcome) = self.queued_searches.pop_front() {
                return outcome;
            }
            let mut found = self.catalog.get(query).cloned().unwrap_or_default();
            found.truncate(limit);
            Ok(found)
        }

        fn artist_genres(&mut self, artist_id: &str) -> Result<Vec<String>, ServiceError> {
            self.artist_calls.push(artist_id.to_string());
            if let Some(err) = self.queued_artist_errors.pop_front() {
                return Err(err);
            }
            Ok(self.artists.get(artist_id).cloned().unwrap_or_default())
        }
    }
}
