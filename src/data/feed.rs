//! JSON prediction feeds, over HTTP or from local files.
//!
//! Both transports deliver a JSON array of rows. Each row names the two
//! teams and carries the predicted margin in one of two layouts:
//!
//! - `signed`: `{"left_team", "right_team", "margin"}` where a positive margin
//!   favours the left team, a negative one the right team and 0 is a draw.
//! - `split`: `{"left_team", "right_team", "left_margin", "right_margin"}`
//!   where only the winning side's margin is populated, possibly as text
//!   such as `"by 7"`.
//!
//! A row that cannot be understood is reported as malformed and skipped;
//! the rest of the batch is still used.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

use crate::config::SourceConfig;
use crate::data::{SourceBatch, SourcePredictor};
use crate::error::Failure;
use crate::fixtures::models::{Prediction, RoundId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowFormat {
    #[default]
    Signed,
    Split,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    left_team: String,
    right_team: String,
    #[serde(default)]
    margin: Option<Value>,
    #[serde(default)]
    left_margin: Option<Value>,
    #[serde(default)]
    right_margin: Option<Value>,
}

/// Parse a feed body into predictions for `round_id`.
///
/// Fails only when the body as a whole is unusable; individual bad rows end
/// up in [`SourceBatch::malformed`].
pub fn parse_rows(source: &str, round_id: RoundId, format: RowFormat, body: &str) -> Result<SourceBatch> {
    let rows: Vec<Value> = serde_json::from_str(body)
        .with_context(|| format!("{source} feed is not a JSON array"))?;

    let mut batch = SourceBatch::default();
    for (idx, row) in rows.into_iter().enumerate() {
        let origin = format!("{source} row {idx}");
        let raw: RawRow = match serde_json::from_value(row.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                batch
                    .malformed
                    .push(Failure::malformed(origin, "row", row.to_string(), e.to_string()));
                continue;
            }
        };

        let parsed = match format {
            RowFormat::Signed => parse_signed(&origin, source, round_id, &raw),
            RowFormat::Split => parse_split(&origin, source, round_id, &raw),
        };
        match parsed {
            Ok(prediction) => batch.predictions.push(prediction),
            Err(failure) => batch.malformed.push(failure),
        }
    }

    Ok(batch)
}

fn parse_signed(origin: &str, source: &str, round_id: RoundId, raw: &RawRow) -> Result<Prediction, Failure> {
    let value = raw.margin.as_ref().unwrap_or(&Value::Null);
    let margin = signed_margin(value)
        .ok_or_else(|| Failure::malformed(origin, "margin", value.to_string(), "not an integer"))?;
    Prediction::from_signed_margin(round_id, source, &raw.left_team, &raw.right_team, margin)
}

fn parse_split(origin: &str, source: &str, round_id: RoundId, raw: &RawRow) -> Result<Prediction, Failure> {
    let left = raw.left_margin.as_ref().and_then(leading_digits);
    let right = raw.right_margin.as_ref().and_then(leading_digits);

    let signed = match (left, right) {
        (Some(margin), None) => i64::from(margin),
        (None, Some(margin)) => -i64::from(margin),
        (Some(0), Some(0)) => 0,
        _ => {
            return Err(Failure::malformed(
                origin,
                "margin",
                format!("{left:?}/{right:?}"),
                "exactly one side must carry a margin",
            ))
        }
    };
    Prediction::from_signed_margin(round_id, source, &raw.left_team, &raw.right_team, signed)
}

fn signed_margin(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().trim_start_matches('+').parse().ok(),
        _ => None,
    }
}

/// First run of ASCII digits in a number or a string like `"by 12 pts"`.
fn leading_digits(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => {
            let digits: String = s
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

fn resolve_location(template: &str, round_id: RoundId, offset: i64) -> String {
    template.replace("{round}", &(round_id + offset).to_string())
}

/// Predictions served as JSON over HTTP.
pub struct FeedSource {
    name: String,
    client: reqwest::Client,
    url_template: String,
    format: RowFormat,
    round_offset: i64,
    api_key: Option<(String, SecretString)>,
}

impl FeedSource {
    pub fn new(client: reqwest::Client, config: &SourceConfig, api_key: Option<SecretString>) -> Result<Self> {
        if !(config.location.starts_with("http://") || config.location.starts_with("https://")) {
            bail!(
                "feed source {} needs an http(s) location, got {}",
                config.name,
                config.location
            );
        }
        Ok(Self {
            name: config.name.clone(),
            client,
            url_template: config.location.clone(),
            format: config.format,
            round_offset: config.round_offset,
            api_key: api_key.map(|key| (config.api_key_header.clone(), key)),
        })
    }
}

#[async_trait]
impl SourcePredictor for FeedSource {
    async fn fetch(&self, round_id: RoundId) -> Result<SourceBatch> {
        let url = resolve_location(&self.url_template, round_id, self.round_offset);

        let mut request = self.client.get(&url);
        if let Some((header, key)) = &self.api_key {
            request = request.header(header.as_str(), key.expose_secret());
        }

        let body = request
            .send()
            .await
            .with_context(|| format!("{} request failed", self.name))?
            .error_for_status()
            .with_context(|| format!("{} returned an error status", self.name))?
            .text()
            .await
            .with_context(|| format!("Failed to read {} response", self.name))?;

        parse_rows(&self.name, round_id, self.format, &body)
    }

    fn describe(&self) -> String {
        format!("feed {}", self.url_template)
    }
}

/// Predictions dropped into a local JSON file, one file per round.
pub struct FileSource {
    name: String,
    path_template: String,
    format: RowFormat,
    round_offset: i64,
}

impl FileSource {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            name: config.name.clone(),
            path_template: config.location.clone(),
            format: config.format,
            round_offset: config.round_offset,
        }
    }
}

#[async_trait]
impl SourcePredictor for FileSource {
    async fn fetch(&self, round_id: RoundId) -> Result<SourceBatch> {
        let path = resolve_location(&self.path_template, round_id, self.round_offset);
        let body = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {} predictions from {path}", self.name))?;
        parse_rows(&self.name, round_id, self.format, &body)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path_template)
    }
}
