//! Forward geocoding with an in-process LRU cache.
//!
//! Wraps the Google Maps Geocoding API. Failures degrade to `None`; the
//! clearing pre-filter falls back to state-level matching when coordinates
//! are unavailable.

use anyhow::Result;
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::warn;

const GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const MAX_CACHE_SIZE: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct GeoResult {
    pub lat: f64,
    pub lng: f64,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub formatted_address: String,
    pub confidence: f64,
    pub neighborhood: String,
}

struct LruCache {
    entries: HashMap<String, Option<GeoResult>>,
    order: VecDeque<String>,
}

impl LruCache {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<Option<GeoResult>> {
        if let Some(value) = self.entries.get(key) {
            let value = value.clone();
            self.order.retain(|k| k != key);
            self.order.push_back(key.to_string());
            return Some(value);
        }
        None
    }

    fn put(&mut self, key: String, value: Option<GeoResult>) {
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        }
        self.entries.insert(key.clone(), value);
        self.order.push_back(key);
        while self.entries.len() > MAX_CACHE_SIZE {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}

#[derive(Clone)]
pub struct GeocodeClient {
    client: Client,
    api_key: Option<String>,
    cache: std::sync::Arc<Mutex<LruCache>>,
}

impl GeocodeClient {
    pub fn new(api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            api_key,
            cache: std::sync::Arc::new(Mutex::new(LruCache::new())),
        }
    }

    /// Forward-geocode a free-form location string ("Dallas, TX").
    pub async fn geocode(&self, query: &str) -> Option<GeoResult> {
        let api_key = self.api_key.as_ref()?;
        let cache_key = query.trim().to_lowercase();

        if let Some(cached) = self.cache.lock().get(&cache_key) {
            return cached;
        }

        let result = match self.fetch(query, api_key).await {
            Ok(r) => r,
            Err(err) => {
                warn!(query, error = %err, "Geocoding request failed");
                // Transport errors are not cached — the next call may succeed
                return None;
            }
        };

        self.cache.lock().put(cache_key, result.clone());
        result
    }

    async fn fetch(&self, query: &str, api_key: &str) -> Result<Option<GeoResult>> {
        let response = self
            .client
            .get(GEOCODE_URL)
            .query(&[("address", query), ("key", api_key)])
            .send()
            .await?
            .error_for_status()?;
        let data: Value = response.json().await?;
        Ok(parse_geocode_response(&data))
    }
}

fn confidence_for_location_type(location_type: &str) -> f64 {
    match location_type {
        "ROOFTOP" => 1.0,
        "RANGE_INTERPOLATED" => 0.8,
        "GEOMETRIC_CENTER" => 0.6,
        _ => 0.4,
    }
}

pub fn parse_geocode_response(data: &Value) -> Option<GeoResult> {
    let status = data["status"].as_str().unwrap_or_default();
    if status != "OK" {
        if status != "ZERO_RESULTS" {
            warn!(status, "Geocoding API returned non-OK status");
        }
        return None;
    }

    let top = data["results"].as_array()?.first()?;
    let location = &top["geometry"]["location"];
    let lat = location["lat"].as_f64()?;
    let lng = location["lng"].as_f64()?;

    let confidence =
        confidence_for_location_type(top["geometry"]["location_type"].as_str().unwrap_or(""));

    let mut city = String::new();
    let mut state = String::new();
    let mut zip_code = String::new();
    let mut neighborhood = String::new();

    if let Some(components) = top["address_components"].as_array() {
        for comp in components {
            let types: Vec<&str> = comp["types"]
                .as_array()
                .map(|a| a.iter().filter_map(|t| t.as_str()).collect())
                .unwrap_or_default();
            let long_name = comp["long_name"].as_str().unwrap_or_default();
            let short_name = comp["short_name"].as_str().unwrap_or_default();

            if types.contains(&"neighborhood") && neighborhood.is_empty() {
                neighborhood = long_name.to_string();
            }
            if (types.contains(&"locality") || types.contains(&"sublocality")) && city.is_empty() {
                city = long_name.to_string();
            }
            if types.contains(&"administrative_area_level_1") {
                state = short_name.to_string();
            }
            if types.contains(&"postal_code") {
                zip_code = long_name.to_string();
            }
        }
    }

    Some(GeoResult {
        lat,
        lng,
        city,
        state,
        zip_code,
        formatted_address: top["formatted_address"].as_str().unwrap_or_default().to_string(),
        confidence,
        neighborhood,
    })
}
