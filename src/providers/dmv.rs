//! Client for the California DMV public web data endpoints
//!
//! - `output3.txt`: current wait times for every office, see [`crate::feed`]
//! - `foims_offices_min.json`: static office metadata
//!
//! Both endpoints are slow and occasionally down. Requests carry a short
//! timeout and are never retried here; the next scheduled run is the retry.

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::Config;
use crate::models::BranchInfo;

#[derive(Debug, Clone)]
pub struct DmvClient {
    client: reqwest::Client,
    wait_times_url: String,
    offices_url: String,
}

impl DmvClient {
    pub fn new(
        wait_times_url: impl Into<String>,
        offices_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| FeedError::Client(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            wait_times_url: wait_times_url.into(),
            offices_url: offices_url.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, FeedError> {
        Self::new(
            &config.wait_times_url,
            &config.offices_url,
            config.fetch_timeout(),
        )
    }

    /// Raw wait-time payload
    pub async fn fetch_wait_times(&self) -> Result<String, FeedError> {
        self.fetch(&self.wait_times_url).await
    }

    /// Office metadata records, unconverted
    pub async fn fetch_offices(&self) -> Result<Vec<OfficeRecord>, FeedError> {
        let body = self.fetch(&self.offices_url).await?;

        let document: OfficesDocument = serde_json::from_str(&body).map_err(|e| {
            error!(
                error = %e,
                body_preview = %body.chars().take(500).collect::<String>(),
                "Failed to parse office metadata"
            );
            FeedError::InvalidResponse(e.to_string())
        })?;

        Ok(document.foims_offices.offices)
    }

    /// GET `url` and return the body, classifying failures
    pub async fn fetch(&self, url: &str) -> Result<String, FeedError> {
        debug!(url = %url, "Fetching DMV feed");

        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::UpstreamUnavailable(format!(
                "HTTP {} from {}",
                status, url
            )));
        }

        response.text().await.map_err(classify)
    }
}

fn classify(e: reqwest::Error) -> FeedError {
    if e.is_timeout() {
        FeedError::UpstreamTimeout(e.to_string())
    } else {
        FeedError::UpstreamUnavailable(e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),
    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl FeedError {
    /// Transient errors resolve themselves; the next run retries them
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FeedError::UpstreamUnavailable(_) | FeedError::UpstreamTimeout(_)
        )
    }
}

#[derive(Debug, Deserialize)]
struct OfficesDocument {
    foims_offices: OfficesEnvelope,
}

#[derive(Debug, Deserialize)]
struct OfficesEnvelope {
    offices: Vec<OfficeRecord>,
}

/// The feed mixes JSON numbers and numeric strings (`"region": "3"`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Numeric {
    fn as_i64(&self) -> Option<i64> {
        match self {
            Numeric::Int(n) => Some(*n),
            // `i64::MAX as f64` rounds up to 2^63, which is already out of range
            Numeric::Float(f)
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 =>
            {
                Some(*f as i64)
            }
            Numeric::Float(_) => None,
            Numeric::Text(s) => s.trim().parse().ok(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Numeric::Int(n) => Some(*n as f64),
            Numeric::Float(f) => Some(*f),
            Numeric::Text(s) => s.trim().parse().ok(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Numeric::Int(n) => n.to_string(),
            Numeric::Float(f) => f.to_string(),
            Numeric::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfficeRecord {
    pub name: String,
    pub number: Numeric,
    pub region: Numeric,
    #[serde(default)]
    pub hours: String,
    #[serde(default)]
    pub address: String,
    pub latitude: Numeric,
    pub longitude: Numeric,
    #[serde(default)]
    pub nearby1: Option<Numeric>,
    #[serde(default)]
    pub nearby2: Option<Numeric>,
    #[serde(default)]
    pub nearby3: Option<Numeric>,
    #[serde(default)]
    pub nearby4: Option<Numeric>,
    #[serde(default)]
    pub nearby5: Option<Numeric>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OfficeError {
    #[error("field {field} is not numeric: {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("region must be positive, got {0}")]
    NonPositiveRegion(i64),
}

fn integer(field: &'static str, value: &Numeric) -> Result<i64, OfficeError> {
    value.as_i64().ok_or_else(|| OfficeError::InvalidField {
        field,
        value: value.describe(),
    })
}

fn coordinate(field: &'static str, value: &Numeric) -> Result<f64, OfficeError> {
    // "NaN" and "inf" parse as f64 but SQLite stores NaN as NULL
    value
        .as_f64()
        .filter(|f| f.is_finite())
        .ok_or_else(|| OfficeError::InvalidField {
            field,
            value: value.describe(),
        })
}

/// `0` is the feed's placeholder for "no nearby office"
fn nearby(field: &'static str, value: &Option<Numeric>) -> Result<Option<i64>, OfficeError> {
    match value {
        None => Ok(None),
        Some(value) => integer(field, value).map(|n| (n > 0).then_some(n)),
    }
}

impl TryFrom<&OfficeRecord> for BranchInfo {
    type Error = OfficeError;

    fn try_from(office: &OfficeRecord) -> Result<Self, Self::Error> {
        let region = integer("region", &office.region)?;
        if region <= 0 {
            return Err(OfficeError::NonPositiveRegion(region));
        }

        Ok(BranchInfo {
            number: integer("number", &office.number)?,
            region,
            name: office.name.trim().to_string(),
            address: office.address.trim().to_string(),
            hours: office.hours.trim().to_string(),
            latitude: coordinate("latitude", &office.latitude)?,
            longitude: coordinate("longitude", &office.longitude)?,
            nearby1: nearby("nearby1", &office.nearby1)?,
            nearby2: nearby("nearby2", &office.nearby2)?,
            nearby3: nearby("nearby3", &office.nearby3)?,
            nearby4: nearby("nearby4", &office.nearby4)?,
            nearby5: nearby("nearby5", &office.nearby5)?,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    use axum::{http::StatusCode, routing::get, Router};
    use std::time::Duration;

    pub const OFFICES_JSON: &str = r#"{
        "foims_offices": {
            "offices": [
                {
                    "name": "Santa Ana",
                    "number": 542,
                    "region": "7",
                    "hours": "0700-1700,0700-1700,0900-1700,0700-1700,0700-1700,n,n",
                    "address": "1330 E. First Street, Santa Ana, CA 92701",
                    "latitude": "33.745400",
                    "longitude": -117.8506,
                    "nearby1": 698,
                    "nearby2": 611,
                    "nearby3": 628,
                    "nearby4": 607,
                    "nearby5": 0
                },
                {
                    "name": "Broken",
                    "number": 1,
                    "region": "north",
                    "latitude": 0,
                    "longitude": 0
                },
                {
                    "name": "Nowhere",
                    "number": 2,
                    "region": 3,
                    "latitude": "NaN",
                    "longitude": "-117.0"
                }
            ]
        }
    }"#;

    /// Serve `body` with `status` after `delay` on both feed paths; returns the base URL
    pub async fn serve(status: StatusCode, body: &'static str, delay: Duration) -> String {
        let respond = move || async move {
            tokio::time::sleep(delay).await;
            (status, body)
        };
        let app = Router::new()
            .route("/output3.txt", get(respond))
            .route("/foims_offices_min.json", get(respond));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}", addr)
    }

    pub fn client(base: &str, timeout: Duration) -> super::DmvClient {
        super::DmvClient::new(
            format!("{}/output3.txt", base),
            format!("{}/foims_offices_min.json", base),
            timeout,
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_server::{client, serve, OFFICES_JSON};
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn fetch_returns_body_on_success() {
        let base = serve(StatusCode::OK, "hdr\r\n658,0,0\r\n", Duration::ZERO).await;

        let body = client(&base, Duration::from_secs(1))
            .fetch_wait_times()
            .await
            .unwrap();
        assert_eq!(body, "hdr\r\n658,0,0\r\n");
    }

    #[tokio::test]
    async fn non_success_status_is_unavailable() {
        let base = serve(StatusCode::SERVICE_UNAVAILABLE, "down", Duration::ZERO).await;

        let err = client(&base, Duration::from_secs(1))
            .fetch_wait_times()
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::UpstreamUnavailable(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let base = serve(StatusCode::OK, "late", Duration::from_secs(5)).await;

        let err = client(&base, Duration::from_millis(100))
            .fetch_wait_times()
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::UpstreamTimeout(_)));
    }

    #[tokio::test]
    async fn offices_are_deserialized_and_converted() {
        let base = serve(StatusCode::OK, OFFICES_JSON, Duration::ZERO).await;

        let offices = client(&base, Duration::from_secs(1))
            .fetch_offices()
            .await
            .unwrap();
        assert_eq!(offices.len(), 3);

        let santa_ana = BranchInfo::try_from(&offices[0]).unwrap();
        assert_eq!(santa_ana, crate::models::fixtures::santa_ana());

        assert_eq!(
            BranchInfo::try_from(&offices[1]).unwrap_err(),
            OfficeError::InvalidField {
                field: "region",
                value: "north".to_string()
            }
        );
        assert_eq!(
            BranchInfo::try_from(&offices[2]).unwrap_err(),
            OfficeError::InvalidField {
                field: "latitude",
                value: "NaN".to_string()
            }
        );
    }

    #[tokio::test]
    async fn malformed_office_json_is_invalid_response() {
        let base = serve(StatusCode::OK, "{\"offices\": []}", Duration::ZERO).await;

        let err = client(&base, Duration::from_secs(1))
            .fetch_offices()
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::InvalidResponse(_)));
        assert!(!err.is_transient());
    }

    fn office(number: Numeric, region: Numeric, latitude: Numeric) -> OfficeRecord {
        OfficeRecord {
            name: "Nowhere".to_string(),
            number,
            region,
            hours: String::new(),
            address: String::new(),
            latitude,
            longitude: Numeric::Float(1.0),
            nearby1: None,
            nearby2: None,
            nearby3: None,
            nearby4: None,
            nearby5: None,
        }
    }

    #[test]
    fn zero_region_is_rejected() {
        let office = office(
            Numeric::Int(5),
            Numeric::Text("0".to_string()),
            Numeric::Float(1.0),
        );

        assert_eq!(
            BranchInfo::try_from(&office).unwrap_err(),
            OfficeError::NonPositiveRegion(0)
        );
    }

    #[test]
    fn non_finite_coordinates_are_rejected() {
        for value in ["NaN", "inf", "-infinity"] {
            let office = office(
                Numeric::Int(5),
                Numeric::Int(1),
                Numeric::Text(value.to_string()),
            );

            assert_eq!(
                BranchInfo::try_from(&office).unwrap_err(),
                OfficeError::InvalidField {
                    field: "latitude",
                    value: value.to_string()
                }
            );
        }
    }

    #[test]
    fn out_of_range_float_numbers_are_rejected() {
        for value in [1e300, -1e300, 9.223372036854775807e18] {
            let office = office(Numeric::Float(value), Numeric::Int(1), Numeric::Float(1.0));

            assert_eq!(
                BranchInfo::try_from(&office).unwrap_err(),
                OfficeError::InvalidField {
                    field: "number",
                    value: value.to_string()
                }
            );
        }

        let office = office(Numeric::Float(542.0), Numeric::Int(1), Numeric::Float(1.0));
        assert_eq!(BranchInfo::try_from(&office).unwrap().number, 542);
    }
}
