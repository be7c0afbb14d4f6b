//! Trends REST client for `trending` requests.
//!
//! A location is resolved to the closest WOEID first; without a location the
//! worldwide WOEID is used.

use crate::error::{RelayError, Result};
use crate::protocol::GeoPoint;
use serde::Deserialize;
use tracing::debug;

/// "Where On Earth" id of the whole world.
pub const GLOBAL_WOEID: u64 = 1;

#[derive(Debug, Deserialize)]
struct Place {
    woeid: u64,
}

#[derive(Debug, Deserialize)]
struct PlaceTrends {
    trends: Vec<Trend>,
}

#[derive(Debug, Deserialize)]
struct Trend {
    name: String,
}

#[derive(Debug, Clone)]
pub struct TrendsClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl TrendsClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Trend names near `location`, or worldwide.
    pub async fn trends(&self, location: Option<GeoPoint>) -> Result<Vec<String>> {
        let woeid = match location {
            Some(point) => self.closest_woeid(point).await?,
            None => GLOBAL_WOEID,
        };
        self.trends_for_woeid(woeid).await
    }

    async fn closest_woeid(&self, point: GeoPoint) -> Result<u64> {
        let url = format!("{}/trends/closest.json", self.base_url);
        debug!("Resolving closest WOEID for {:?}", point);

        let response = self
            .request(&url)
            .query(&[("lat", point.lat), ("long", point.long)])
            .send()
            .await?;
        let places: Vec<Place> = Self::check(response).await?.json().await?;
        first_woeid(places)
    }

    async fn trends_for_woeid(&self, woeid: u64) -> Result<Vec<String>> {
        let url = format!("{}/trends/place.json", self.base_url);
        debug!("Fetching trends for WOEID {}", woeid);

        let response = self.request(&url).query(&[("id", woeid)]).send().await?;
        let places: Vec<PlaceTrends> = Self::check(response).await?.json().await?;
        trend_names(places)
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.http.get(url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        Err(RelayError::Trends(format!(
            "API returned status {}: {}",
            response.status(),
            response.text().await.unwrap_or_default()
        )))
    }
}

fn first_woeid(places: Vec<Place>) -> Result<u64> {
    places
        .into_iter()
        .next()
        .map(|place| place.woeid)
        .ok_or_else(|| RelayError::Trends("no location found near coordinates".to_string()))
}

fn trend_names(places: Vec<PlaceTrends>) -> Result<Vec<String>> {
    places
        .into_iter()
        .next()
        .map(|place| place.trends.into_iter().map(|trend| trend.name).collect())
        .ok_or_else(|| RelayError::Trends("empty trends response".to_string()))
}
