use std::{future::Future, pin::Pin};

use reqwest::Url;
use serde::Deserialize;

use crate::models::{CoordinateValue, RawFix};

pub type PollFuture = Pin<Box<dyn Future<Output = Result<Option<RawFix>, PollError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("rider info request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Fallback position source queried while the push connection is down.
///
/// `Ok(None)` means the service answered without a usable position.
pub trait RiderInfoSource: Send + Sync {
    fn fetch(&self) -> PollFuture;
}

/// One entry of the rider info response. Both longitude spellings occur in the wild.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RiderRecord {
    #[serde(default)]
    pub latitude: Option<CoordinateValue>,
    #[serde(default)]
    pub longitude: Option<CoordinateValue>,
    #[serde(default)]
    pub longtitude: Option<CoordinateValue>,
}

impl RiderRecord {
    pub fn raw_fix(&self) -> Option<RawFix> {
        let lat = self.latitude.clone().filter(is_present)?;
        let lng = self
            .longitude
            .clone()
            .filter(is_present)
            .or_else(|| self.longtitude.clone().filter(is_present))?;
        Some(RawFix {
            lat: Some(lat),
            lng: Some(lng),
        })
    }
}

fn is_present(value: &CoordinateValue) -> bool {
    match value {
        CoordinateValue::Number(n) => *n != 0.0 && !n.is_nan(),
        CoordinateValue::Text(text) => !text.is_empty(),
    }
}

/// Only the first record of the response is considered.
pub fn fix_from_records(records: &[RiderRecord]) -> Option<RawFix> {
    records.first().and_then(RiderRecord::raw_fix)
}

#[derive(Clone)]
pub struct RiderInfoClient {
    client: reqwest::Client,
    url: Url,
}

impl RiderInfoClient {
    /// `base_url` is extended with the rider id as its last path segment.
    pub fn new(client: reqwest::Client, base_url: &Url, rider_id: &str) -> Self {
        let mut url = base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(rider_id);
        }
        Self { client, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl RiderInfoSource for RiderInfoClient {
    fn fetch(&self) -> PollFuture {
        let client = self.client.clone();
        let url = self.url.clone();
        Box::pin(async move {
            let records: Option<Vec<RiderRecord>> = client
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(records.as_deref().and_then(fix_from_records))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longitude_spelling_fallback() {
        let records: Vec<RiderRecord> =
            serde_json::from_str(r#"[{"latitude":"12.9","longtitude":"77.5"}]"#).unwrap();
        assert_eq!(
            fix_from_records(&records),
            Some(RawFix {
                lat: Some(CoordinateValue::Text("12.9".into())),
                lng: Some(CoordinateValue::Text("77.5".into())),
            })
        );
    }

    #[test]
    fn correct_spelling_wins() {
        let records: Vec<RiderRecord> = serde_json::from_str(
            r#"[{"latitude":12.9,"longitude":77.6,"longtitude":77.5}]"#,
        )
        .unwrap();
        assert_eq!(
            fix_from_records(&records),
            Some(RawFix::from_numbers(12.9, 77.6))
        );
    }

    #[test]
    fn zero_longitude_falls_through_to_misspelling() {
        let records: Vec<RiderRecord> =
            serde_json::from_str(r#"[{"latitude":12.9,"longitude":0,"longtitude":77.5}]"#)
                .unwrap();
        assert_eq!(
            fix_from_records(&records),
            Some(RawFix::from_numbers(12.9, 77.5))
        );
    }

    #[test]
    fn empty_or_partial_records_yield_nothing() {
        assert_eq!(fix_from_records(&[]), None);
        let records: Vec<RiderRecord> =
            serde_json::from_str(r#"[{"latitude":12.9}, {"latitude":1,"longitude":2}]"#).unwrap();
        assert_eq!(fix_from_records(&records), None);
    }

    #[test]
    fn client_url_appends_rider_id() {
        let base = Url::parse("https://api.example.com/api/riders/GetRiderInfo/").unwrap();
        let client = RiderInfoClient::new(reqwest::Client::new(), &base, "0");
        assert_eq!(
            client.url().as_str(),
            "https://api.example.com/api/riders/GetRiderInfo/0"
        );
    }
}
