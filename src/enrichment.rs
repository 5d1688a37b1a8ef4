//! Cluster enrichment: a model-written title, summary, entities, scores and
//! market/geo annotations that replace a cluster's provisional fields.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::db::{Article, Cluster};
use crate::llm::generate_llm_response;
use crate::prompt::{cluster_enrichment_prompt, ENRICHMENT_SYSTEM_PROMPT};
use crate::{LLMParams, TARGET_LLM_REQUEST};

pub const MAX_TAGS: usize = 15;
pub const MAX_NAMED_ENTITIES: usize = 20;
pub const MAX_EVENTS: usize = 10;
const DEFAULT_SCORE: i64 = 50;

/// Keeps the string members of an array; anything else becomes empty
fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_str().map(|s| s.trim().to_string()).unwrap_or_default())
}

fn lenient_score<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let score = match value {
        Value::Number(n) => n.as_f64().map(|f| f.round() as i64),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    };
    Ok(score.unwrap_or(DEFAULT_SCORE))
}

/// A sub-record that does not have the expected shape is dropped
fn lenient_record<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(_) => serde_json::from_value(value).ok(),
        _ => None,
    })
}

fn lenient_records<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn default_score() -> i64 {
    DEFAULT_SCORE
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterEntities {
    #[serde(default, deserialize_with = "lenient_strings")]
    pub people: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub organizations: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub locations: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketImpact {
    #[serde(default, deserialize_with = "lenient_strings")]
    pub affected_sectors: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub affected_regions: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub potential_symbols: Vec<String>,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub timeframe: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapLocation {
    pub name: String,
    #[serde(default, deserialize_with = "lenient_record")]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub significance: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapData {
    #[serde(default, deserialize_with = "lenient_records")]
    pub primary_locations: Vec<MapLocation>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub affected_regions: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub conflict_zones: Vec<String>,
}

/// Structured analysis of one cluster.
///
/// Every field tolerates missing or mistyped input by falling back to its default, so a
/// sloppy model response degrades field by field rather than failing as a whole.
/// Call [`ClusterAnalysis::sanitize`] before persisting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAnalysis {
    #[serde(default, deserialize_with = "lenient_string")]
    pub canonical_title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: String,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub countries: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub topics: Vec<String>,
    #[serde(default, deserialize_with = "lenient_record_or_default")]
    pub entities: ClusterEntities,
    #[serde(default = "default_score", deserialize_with = "lenient_score")]
    pub severity: i64,
    #[serde(default = "default_score", deserialize_with = "lenient_score")]
    pub confidence: i64,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub geopolitical_implications: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub key_signals: Vec<String>,
    #[serde(default, deserialize_with = "lenient_record")]
    pub market_impact: Option<MarketImpact>,
    #[serde(default, deserialize_with = "lenient_record")]
    pub map_data: Option<MapData>,
}

fn lenient_record_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned + Default,
{
    Ok(lenient_record(deserializer)?.unwrap_or_default())
}

impl ClusterAnalysis {
    /// Parses a model response, tolerating Markdown fences and text around the JSON object
    pub fn from_response(raw: &str) -> Option<Self> {
        let start = raw.find('{')?;
        let end = raw.rfind('}')?;
        if end <= start {
            return None;
        }
        match serde_json::from_str::<ClusterAnalysis>(&raw[start..=end]) {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                warn!(target: TARGET_LLM_REQUEST, "Unusable enrichment response: {}", e);
                None
            }
        }
    }

    /// Applies length caps and score bounds; an empty title falls back to `fallback_title`
    pub fn sanitize(mut self, fallback_title: &str) -> Self {
        if self.canonical_title.is_empty() {
            self.canonical_title = fallback_title.to_string();
        }
        self.countries.truncate(MAX_TAGS);
        self.topics.truncate(MAX_TAGS);
        self.entities.people.truncate(MAX_NAMED_ENTITIES);
        self.entities.organizations.truncate(MAX_NAMED_ENTITIES);
        self.entities.locations.truncate(MAX_NAMED_ENTITIES);
        self.entities.events.truncate(MAX_EVENTS);
        self.geopolitical_implications.truncate(MAX_EVENTS);
        self.key_signals.truncate(MAX_EVENTS);
        self.severity = self.severity.clamp(0, 100);
        self.confidence = self.confidence.clamp(0, 100);

        if let Some(market) = self.market_impact.as_mut() {
            market.affected_sectors.truncate(MAX_EVENTS);
            market.affected_regions.truncate(MAX_EVENTS);
            market.potential_symbols.truncate(MAX_EVENTS);
        }
        if let Some(map) = self.map_data.as_mut() {
            map.primary_locations.truncate(MAX_NAMED_ENTITIES);
            map.affected_regions.truncate(MAX_EVENTS);
            map.conflict_zones.truncate(MAX_EVENTS);
            for location in &mut map.primary_locations {
                let valid = location.coordinates.is_some_and(|c| {
                    (-90.0..=90.0).contains(&c.lat) && (-180.0..=180.0).contains(&c.lng)
                });
                if !valid {
                    location.coordinates = None;
                }
            }
        }
        self
    }
}

/// Produces an analysis for a freshly created cluster, or nothing if it cannot
#[async_trait]
pub trait Annotator: Send + Sync {
    async fn enrich(&self, cluster: &Cluster, articles: &[Article]) -> Option<ClusterAnalysis>;
}

/// Annotator backed by the configured LLM
pub struct LlmAnnotator {
    params: LLMParams,
}

impl LlmAnnotator {
    pub fn new(params: LLMParams) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Annotator for LlmAnnotator {
    async fn enrich(&self, cluster: &Cluster, articles: &[Article]) -> Option<ClusterAnalysis> {
        if articles.is_empty() {
            warn!(target: TARGET_LLM_REQUEST, "Cluster {} has no articles to enrich from", cluster.id);
            return None;
        }

        let prompt = cluster_enrichment_prompt(articles);
        debug!(target: TARGET_LLM_REQUEST, "Enriching cluster {} from {} articles", cluster.id, articles.len());

        let response =
            generate_llm_response(&prompt, Some(ENRICHMENT_SYSTEM_PROMPT), &self.params).await?;
        let analysis = ClusterAnalysis::from_response(&response)?.sanitize(&cluster.canonical_title);

        info!(target: TARGET_LLM_REQUEST, "Enriched cluster {}: {}", cluster.id, analysis.canonical_title);
        Some(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_fields_fall_back_to_defaults() {
        let raw = r#"Here you go:
```json
{
  "canonical_title": "  Port strike spreads  ",
  "countries": "Belgium",
  "topics": ["labor", 7, "shipping"],
  "entities": ["not", "an", "object"],
  "severity": "82.6",
  "market_impact": "high",
  "map_data": {"primary_locations": [{"name": "Antwerp", "coordinates": {"lat": 51.2, "lng": 4.4}}, {"bogus": true}]}
}
```"#;
        let analysis = ClusterAnalysis::from_response(raw).unwrap();
        assert_eq!(analysis.canonical_title, "Port strike spreads");
        assert!(analysis.summary.is_empty());
        assert!(analysis.countries.is_empty());
        assert_eq!(analysis.topics, vec!["labor", "shipping"]);
        assert_eq!(analysis.entities, ClusterEntities::default());
        assert_eq!(analysis.severity, 83);
        assert_eq!(analysis.confidence, DEFAULT_SCORE);
        assert!(analysis.market_impact.is_none());

        let map = analysis.map_data.unwrap();
        assert_eq!(map.primary_locations.len(), 1);
        assert_eq!(map.primary_locations[0].name, "Antwerp");
    }

    #[test]
    fn test_unparseable_response_is_none() {
        assert!(ClusterAnalysis::from_response("no json here").is_none());
        assert!(ClusterAnalysis::from_response("{ broken").is_none());
        assert!(ClusterAnalysis::from_response("{\"severity\": [}").is_none());
    }

    #[test]
    fn test_sanitize_caps_and_clamps() {
        let many = |n: usize| (0..n).map(|i| format!("item {}", i)).collect::<Vec<_>>();
        let analysis = ClusterAnalysis {
            canonical_title: String::new(),
            summary: "s".to_string(),
            countries: many(30),
            topics: many(16),
            entities: ClusterEntities {
                people: many(25),
                organizations: many(21),
                locations: many(5),
                events: many(12),
            },
            severity: 140,
            confidence: -3,
            geopolitical_implications: many(11),
            key_signals: many(10),
            market_impact: None,
            map_data: Some(MapData {
                primary_locations: vec![MapLocation {
                    name: "Nowhere".to_string(),
                    coordinates: Some(Coordinates { lat: 120.0, lng: 0.0 }),
                    significance: None,
                }],
                ..Default::default()
            }),
        }
        .sanitize("Provisional title");

        assert_eq!(analysis.canonical_title, "Provisional title");
        assert_eq!(analysis.countries.len(), MAX_TAGS);
        assert_eq!(analysis.topics.len(), MAX_TAGS);
        assert_eq!(analysis.entities.people.len(), MAX_NAMED_ENTITIES);
        assert_eq!(analysis.entities.organizations.len(), MAX_NAMED_ENTITIES);
        assert_eq!(analysis.entities.locations.len(), 5);
        assert_eq!(analysis.entities.events.len(), MAX_EVENTS);
        assert_eq!(analysis.geopolitical_implications.len(), MAX_EVENTS);
        assert_eq!(analysis.severity, 100);
        assert_eq!(analysis.confidence, 0);
        assert!(analysis.map_data.unwrap().primary_locations[0].coordinates.is_none());
    }
}
