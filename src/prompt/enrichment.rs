use crate::db::Article;
use crate::prompt::common::{current_date, JSON_ONLY};
use crate::vector::text::truncate_chars;

/// Articles beyond this many are left out of the prompt
pub const MAX_PROMPT_ARTICLES: usize = 10;
const MAX_PROMPT_SNIPPET_CHARS: usize = 300;

pub const ENRICHMENT_SYSTEM_PROMPT: &str =
    "You are an expert geopolitical and market intelligence analyst. Always answer with valid JSON.";

const ENRICHMENT_INSTRUCTIONS: &str = r#"Analyze this group of news articles, which all cover the same event, and produce a complete structured analysis.

Answer with JSON in exactly this shape:
{
  "canonical_title": "Precise title summarizing the main event",
  "summary": "Two or three paragraph executive summary with context and consequences",
  "countries": ["Country 1", "Country 2"],
  "topics": ["topic 1", "topic 2"],
  "entities": {
    "people": ["Person 1"],
    "organizations": ["Organization 1"],
    "locations": ["City 1", "Region 1"],
    "events": ["Key event 1"]
  },
  "severity": 75,
  "confidence": 85,
  "geopolitical_implications": ["Specific, actionable implication"],
  "key_signals": ["Observable signal worth monitoring"],
  "market_impact": {
    "affected_sectors": ["Energy", "Defense"],
    "affected_regions": ["Europe"],
    "potential_symbols": ["XLE"],
    "risk_level": "high|medium|low",
    "timeframe": "immediate|short_term|medium_term|long_term"
  },
  "map_data": {
    "primary_locations": [
      {"name": "Kyiv", "coordinates": {"lat": 50.4501, "lng": 30.5234}, "significance": "primary|secondary|tertiary"}
    ],
    "affected_regions": ["Eastern Europe"],
    "conflict_zones": ["Donbas"]
  }
}

Scoring rules:
* severity (0-100) reflects real geopolitical impact: 80-100 regime change, major conflict or a shift in the balance of power; 60-79 significant regional or global events; 40-59 important but contained events; 0-39 minor or routine events.
* confidence (0-100) reflects source quality and agreement: 80-100 several reliable sources confirm; 60-79 consistent but few sources; 40-59 partial or contradictory; 0-39 very limited information.
* Extract every relevant leader, organization and specific location.
* Implications must be specific and actionable. Signals must be observable and measurable.
* Only include coordinates you are confident about."#;

fn or_na(value: String) -> String {
    if value.trim().is_empty() {
        "N/A".to_string()
    } else {
        value
    }
}

/// Builds the enrichment prompt from the first [`MAX_PROMPT_ARTICLES`] member articles
pub fn cluster_enrichment_prompt(articles: &[Article]) -> String {
    let articles_text = articles
        .iter()
        .take(MAX_PROMPT_ARTICLES)
        .enumerate()
        .map(|(i, article)| {
            let snippet = article
                .snippet
                .as_deref()
                .map(|s| truncate_chars(s, MAX_PROMPT_SNIPPET_CHARS).to_string())
                .unwrap_or_default();
            format!(
                "Article {}:\nTitle: {}\nSource: {}\nDate: {}\nCountries: {}\nTopics: {}\nSnippet: {}",
                i + 1,
                or_na(article.title.clone()),
                or_na(article.source_id.clone().unwrap_or_default()),
                or_na(article.published_at.clone().unwrap_or_default()),
                or_na(article.countries.join(", ")),
                or_na(article.topics.join(", ")),
                or_na(snippet),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Today is {date}.\n\n{instructions}\n{json_only}\nARTICLES TO ANALYZE:\n{articles}\n\nAnalyze these articles and provide the complete analysis as JSON.",
        date = current_date(),
        instructions = ENRICHMENT_INSTRUCTIONS,
        json_only = JSON_ONLY,
        articles = articles_text,
    )
}
