use super::{OracleError, OracleResult};
use crate::types::{CastMember, CrewMember, Movie};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";

/// How many of the top discover pages to draw from. Staying in the first
/// pages keeps the picks to reasonably well-known movies.
const DISCOVER_PAGES: u32 = 100;

/// How much of the billed cast to keep
const CAST_LIMIT: usize = 15;

/// TMDB client for fetching a random movie with full metadata
pub struct TmdbClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct DiscoverResponse {
    results: Vec<DiscoverEntry>,
}

#[derive(Debug, Deserialize)]
struct DiscoverEntry {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Genre {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CastCredit {
    name: String,
    #[serde(default)]
    character: String,
    #[serde(default)]
    order: u32,
}

#[derive(Debug, Deserialize)]
struct CrewCredit {
    name: String,
    job: String,
}

#[derive(Debug, Deserialize)]
struct Credits {
    #[serde(default)]
    cast: Vec<CastCredit>,
    #[serde(default)]
    crew: Vec<CrewCredit>,
}

#[derive(Debug, Deserialize)]
struct Keyword {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct Keywords {
    #[serde(default)]
    keywords: Vec<Keyword>,
}

#[derive(Debug, Deserialize)]
struct MovieDetails {
    id: u64,
    imdb_id: Option<String>,
    title: String,
    original_title: String,
    backdrop_path: Option<String>,
    poster_path: Option<String>,
    release_date: Option<String>,
    #[serde(default)]
    genres: Vec<Genre>,
    #[serde(default)]
    overview: Option<String>,
    runtime: Option<u32>,
    #[serde(default)]
    vote_average: f64,
    #[serde(default)]
    credits: Option<Credits>,
    #[serde(default)]
    keywords: Option<Keywords>,
    tagline: Option<String>,
    #[serde(default)]
    budget: u64,
    #[serde(default)]
    revenue: u64,
    #[serde(default)]
    vote_count: u64,
}

#[derive(Debug, Deserialize)]
struct AltTitle {
    title: String,
}

#[derive(Debug, Deserialize)]
struct AltTitlesResponse {
    #[serde(default)]
    titles: Vec<AltTitle>,
}

impl TmdbClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, TMDB_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key,
            base_url,
        }
    }

    /// Pick a random movie from the discover listing matching the given
    /// filters, then fetch its full details and alternative titles.
    pub async fn random_movie(
        &self,
        category_params: &HashMap<String, String>,
    ) -> OracleResult<Movie> {
        let page = {
            use rand::Rng;
            rand::rng().random_range(1..=DISCOVER_PAGES)
        };

        let mut query: Vec<(String, String)> = vec![
            ("api_key".to_string(), self.api_key.clone()),
            ("page".to_string(), page.to_string()),
            ("language".to_string(), "en-US".to_string()),
        ];
        for (k, v) in category_params {
            query.push((k.clone(), v.clone()));
        }

        let discover: DiscoverResponse = self
            .get_json(&format!("{}/discover/movie", self.base_url), &query)
            .await?;

        if discover.results.is_empty() {
            return Err(OracleError::NoResults);
        }

        let pick = {
            use rand::Rng;
            rand::rng().random_range(0..discover.results.len())
        };
        let movie_id = discover.results[pick].id;

        let details: MovieDetails = self
            .get_json(
                &format!("{}/movie/{}", self.base_url, movie_id),
                &[
                    ("api_key".to_string(), self.api_key.clone()),
                    (
                        "append_to_response".to_string(),
                        "credits,keywords".to_string(),
                    ),
                    ("language".to_string(), "en-US".to_string()),
                ],
            )
            .await?;

        // Alternative titles come from a separate endpoint; a failure here is
        // not worth losing the movie over.
        let alternative_titles = match self
            .get_json::<AltTitlesResponse>(
                &format!("{}/movie/{}/alternative_titles", self.base_url, movie_id),
                &[("api_key".to_string(), self.api_key.clone())],
            )
            .await
        {
            Ok(resp) => resp.titles.into_iter().map(|t| t.title).collect(),
            Err(e) => {
                tracing::warn!("Failed to fetch alternative titles for {}: {}", movie_id, e);
                Vec::new()
            }
        };

        Ok(Self::into_movie(details, alternative_titles))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> OracleResult<T> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| OracleError::ApiError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OracleError::ApiError(format!(
                "TMDB returned status {}",
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| OracleError::ParseError(e.to_string()))
    }

    fn into_movie(details: MovieDetails, alternative_titles: Vec<String>) -> Movie {
        let credits = details.credits.unwrap_or(Credits {
            cast: Vec::new(),
            crew: Vec::new(),
        });

        let release_year = details
            .release_date
            .as_deref()
            .and_then(|d| d.split('-').next())
            .filter(|y| !y.is_empty())
            .unwrap_or("Unknown")
            .to_string();

        Movie {
            id: details.id,
            imdb_id: details.imdb_id,
            title: details.title,
            original_title: details.original_title,
            alternative_titles,
            backdrop_path: details.backdrop_path,
            poster_path: details.poster_path,
            release_date: details.release_date,
            release_year,
            genres: details.genres.into_iter().map(|g| g.name).collect(),
            overview: details.overview.unwrap_or_default(),
            runtime: details.runtime,
            rating: details.vote_average,
            cast: credits
                .cast
                .into_iter()
                .take(CAST_LIMIT)
                .map(|c| CastMember {
                    name: c.name,
                    character: c.character,
                    order: c.order,
                })
                .collect(),
            crew: credits
                .crew
                .into_iter()
                .filter(|c| matches!(c.job.as_str(), "Director" | "Producer" | "Writer"))
                .map(|c| CrewMember {
                    name: c.name,
                    job: c.job,
                })
                .collect(),
            keywords: details
                .keywords
                .unwrap_or_default()
                .keywords
                .into_iter()
                .map(|k| k.name)
                .collect(),
            tagline: details.tagline,
            budget: details.budget,
            revenue: details.revenue,
            vote_count: details.vote_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_details_mapping() {
        let details: MovieDetails = serde_json::from_str(
            r#"{
                "id": 603,
                "imdb_id": "tt0133093",
                "title": "The Matrix",
                "original_title": "The Matrix",
                "backdrop_path": "/bd.jpg",
                "poster_path": "/p.jpg",
                "release_date": "1999-03-30",
                "genres": [{"id": 28, "name": "Action"}, {"id": 878, "name": "Science Fiction"}],
                "overview": "A hacker learns the truth.",
                "runtime": 136,
                "vote_average": 8.2,
                "tagline": "Welcome to the Real World",
                "budget": 63000000,
                "revenue": 463517383,
                "vote_count": 24000,
                "credits": {
                    "cast": [{"name": "Keanu Reeves", "character": "Neo", "order": 0}],
                    "crew": [
                        {"name": "Lana Wachowski", "job": "Director"},
                        {"name": "Bill Pope", "job": "Director of Photography"}
                    ]
                },
                "keywords": {"keywords": [{"id": 1, "name": "simulation"}]}
            }"#,
        )
        .unwrap();

        let movie = TmdbClient::into_movie(details, vec!["Matrix".to_string()]);

        assert_eq!(movie.title, "The Matrix");
        assert_eq!(movie.release_year, "1999");
        assert_eq!(movie.genres, vec!["Action", "Science Fiction"]);
        assert_eq!(movie.alternative_titles, vec!["Matrix"]);
        assert_eq!(movie.director(), Some("Lana Wachowski"));
        // Non-key crew jobs are dropped
        assert_eq!(movie.crew.len(), 1);
        assert_eq!(movie.keywords, vec!["simulation"]);
    }

    #[test]
    fn test_release_year_fallback() {
        let details: MovieDetails = serde_json::from_str(
            r#"{"id": 1, "title": "X", "original_title": "X"}"#,
        )
        .unwrap();
        let movie = TmdbClient::into_movie(details, vec![]);
        assert_eq!(movie.release_year, "Unknown");
        assert_eq!(movie.overview, "");
    }
}
