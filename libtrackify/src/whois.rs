use crate::http::create_http_pool;
use crate::types::ProbeConfig;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const WHOIS_API_URL: &str = "https://ipwho.is";

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),
    #[error("Invalid lookup endpoint {0}")]
    InvalidEndpoint(String),
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("Request failed for {ip}: {source}")]
    Request {
        ip: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Non-200 response for {ip}: {status}")]
    Status { ip: String, status: u16 },
    #[error("Failed to decode response for {ip}: {source}")]
    Decode {
        ip: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsuccessful response for {ip}: {message}")]
    Unsuccessful { ip: String, message: String },
    #[error("Lookup for {0} cancelled")]
    Cancelled(String),
    #[error("One or more IP lookups failed: {}", summarize(.0))]
    Multiple(Vec<LookupError>),
}

fn summarize(errors: &[LookupError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WhoisRecord {
    pub ip: String,
    pub success: bool,
    pub message: String,
    #[serde(rename = "type")]
    pub ip_type: String,
    pub continent: String,
    pub continent_code: String,
    pub country: String,
    pub country_code: String,
    pub region: String,
    pub region_code: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub is_eu: bool,
    pub postal: String,
    pub calling_code: String,
    pub capital: String,
    pub borders: String,
    pub connection: Connection,
    pub timezone: Timezone,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Connection {
    pub asn: i64,
    pub org: String,
    pub isp: String,
    pub domain: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Timezone {
    pub id: String,
    pub abbr: String,
    pub is_dst: bool,
    pub offset: i64,
    pub utc: String,
    pub current_time: String,
}

impl WhoisRecord {
    /// Labelled rows for display. Blank text values read "Unknown".
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let text = |value: &str| {
            if value.trim().is_empty() {
                "Unknown".to_string()
            } else {
                value.to_string()
            }
        };

        vec![
            ("IP Type", text(&self.ip_type)),
            ("Country", text(&self.country)),
            ("Country Code", text(&self.country_code)),
            ("Continent", text(&self.continent)),
            ("Continent Code", text(&self.continent_code)),
            ("Region", text(&self.region)),
            ("Region Code", text(&self.region_code)),
            ("City", text(&self.city)),
            ("Location Latitude", format!("{:.6}", self.latitude)),
            ("Location Longitude", format!("{:.6}", self.longitude)),
            ("Location Link", maps_link(self.latitude, self.longitude)),
            ("Zip", text(&self.postal)),
            ("Calling Code", text(&self.calling_code)),
            ("Capital", text(&self.capital)),
            ("Borders", text(&self.borders)),
            ("Connection ASN", self.connection.asn.to_string()),
            ("Connection Org", text(&self.connection.org)),
            ("Connection ISP", text(&self.connection.isp)),
            ("Connection Domain", text(&self.connection.domain)),
            ("Timezone ID", text(&self.timezone.id)),
            ("Timezone Abbr", text(&self.timezone.abbr)),
            ("Timezone Is DST", self.timezone.is_dst.to_string()),
            ("Timezone Offset", self.timezone.offset.to_string()),
            ("Timezone UTC", text(&self.timezone.utc)),
            ("Timezone Current Time", text(&self.timezone.current_time)),
        ]
    }
}

pub fn maps_link(latitude: f64, longitude: f64) -> String {
    format!("https://www.google.com/maps/@{:.6},{:.6}", latitude, longitude)
}

/// Geolocation lookups against an ipwho.is compatible endpoint.
#[derive(Debug, Clone)]
pub struct IpLookup {
    client: Client,
    base: Url,
}

impl IpLookup {
    pub fn new(client: Client) -> Result<Self, LookupError> {
        Self::with_base(client, WHOIS_API_URL)
    }

    /// Builds its own client from `config`, so lookups share the timeout
    /// and user agent of a tracking run.
    pub fn from_config(config: &ProbeConfig) -> Result<Self, LookupError> {
        Self::new(create_http_pool(config)?)
    }

    pub fn from_config_at(config: &ProbeConfig, base: &str) -> Result<Self, LookupError> {
        Self::with_base(create_http_pool(config)?, base)
    }

    pub fn with_base(client: Client, base: &str) -> Result<Self, LookupError> {
        let base =
            Url::parse(base).map_err(|_| LookupError::InvalidEndpoint(base.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(LookupError::InvalidEndpoint(base.to_string()));
        }
        Ok(Self { client, base })
    }

    pub async fn lookup(
        &self,
        cancel: &CancellationToken,
        ip: &str,
    ) -> Result<WhoisRecord, LookupError> {
        let ip = ip.trim();
        let addr: IpAddr = ip
            .parse()
            .map_err(|_| LookupError::InvalidAddress(ip.to_string()))?;

        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| LookupError::InvalidEndpoint(self.base.to_string()))?
            .pop_if_empty()
            .push(&addr.to_string());

        let request = async {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LookupError::Cancelled(ip.to_string())),
            result = request => result.map_err(|source| LookupError::Request {
                ip: ip.to_string(),
                source,
            })?,
        };

        if status != StatusCode::OK {
            return Err(LookupError::Status {
                ip: ip.to_string(),
                status: status.as_u16(),
            });
        }

        let record: WhoisRecord =
            serde_json::from_slice(&body).map_err(|source| LookupError::Decode {
                ip: ip.to_string(),
                source,
            })?;

        if !record.success {
            return Err(LookupError::Unsuccessful {
                ip: ip.to_string(),
                message: record.message,
            });
        }

        debug!(ip, country = %record.country, "IP lookup completed");
        Ok(record)
    }

    /// Looks up every address, continuing past failures. Successful records
    /// are handed to `on_record`; failures are collected into
    /// [`LookupError::Multiple`].
    pub async fn lookup_all<I, F>(
        &self,
        cancel: &CancellationToken,
        ips: I,
        mut on_record: F,
    ) -> Result<(), LookupError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        F: FnMut(&str, WhoisRecord),
    {
        let mut errors = Vec::new();
        for ip in ips {
            let ip = ip.as_ref();
            match self.lookup(cancel, ip).await {
                Ok(record) => on_record(ip, record),
                Err(err) => {
                    warn!(ip, error = %err, "IP lookup failed");
                    errors.push(err);
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LookupError::Multiple(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Route, StubServer};
    use std::time::Duration;

    const GOOGLE_DNS: &str = r#"{
        "ip": "8.8.8.8",
        "success": true,
        "type": "IPv4",
        "continent": "North America",
        "continent_code": "NA",
        "country": "United States",
        "country_code": "US",
        "region": "California",
        "region_code": "CA",
        "city": "Mountain View",
        "latitude": 37.3860517,
        "longitude": -122.0838511,
        "is_eu": false,
        "postal": "94039",
        "calling_code": "1",
        "capital": "Washington D.C.",
        "borders": "CA,MX",
        "flag": {
            "img": "https://cdn.ipwhois.io/flags/us.svg",
            "emoji": "x",
            "emoji_unicode": "U+1F1FA U+1F1F8"
        },
        "connection": {
            "asn": 15169,
            "org": "Google LLC",
            "isp": "Google LLC",
            "domain": "google.com"
        },
        "timezone": {
            "id": "America/Los_Angeles",
            "abbr": "PDT",
            "is_dst": true,
            "offset": -25200,
            "utc": "-07:00",
            "current_time": "2024-05-01T10:00:00-07:00"
        }
    }"#;

    async fn lookup_against(server: &StubServer) -> IpLookup {
        IpLookup::from_config_at(&ProbeConfig::default(), &server.url("/")).unwrap()
    }

    #[tokio::test]
    async fn decodes_successful_lookup() {
        let server = StubServer::start([("/8.8.8.8", Route::status(200).body(GOOGLE_DNS))]).await;
        let lookup = lookup_against(&server).await;

        let record = lookup
            .lookup(&CancellationToken::new(), " 8.8.8.8 ")
            .await
            .unwrap();

        assert_eq!(record.country_code, "US");
        assert_eq!(record.connection.asn, 15169);
        assert_eq!(record.timezone.offset, -25200);

        let fields = record.fields();
        assert!(fields.contains(&("Connection Org", "Google LLC".to_string())));
        assert!(fields.contains(&(
            "Location Link",
            "https://www.google.com/maps/@37.386052,-122.083851".to_string()
        )));
    }

    #[tokio::test]
    async fn configured_client_sends_user_agent() {
        let server = StubServer::start([("/8.8.8.8", Route::status(200).body(GOOGLE_DNS))]).await;
        let config = ProbeConfig {
            timeout: Duration::from_secs(5),
            max_workers: None,
            user_agent: "trackify-lookup/1.0".to_string(),
        };
        let lookup = IpLookup::from_config_at(&config, &server.url("/")).unwrap();

        lookup
            .lookup(&CancellationToken::new(), "8.8.8.8")
            .await
            .unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0]
            .to_lowercase()
            .contains("user-agent: trackify-lookup/1.0"));
    }

    #[test]
    fn default_lookup_carries_crate_user_agent() {
        assert!(ProbeConfig::default().user_agent.starts_with("trackify/"));
        assert!(IpLookup::from_config(&ProbeConfig::default()).is_ok());
    }

    #[test]
    fn blank_fields_read_unknown() {
        let record = WhoisRecord {
            country: "  ".to_string(),
            ..WhoisRecord::default()
        };
        let fields = record.fields();
        assert!(fields.contains(&("Country", "Unknown".to_string())));
        assert!(fields.contains(&("Connection ASN", "0".to_string())));
    }

    #[tokio::test]
    async fn invalid_address_is_rejected_before_request() {
        let server = StubServer::start(Vec::new()).await;
        let lookup = lookup_against(&server).await;

        let err = lookup
            .lookup(&CancellationToken::new(), "not-an-ip")
            .await
            .unwrap_err();

        assert!(matches!(err, LookupError::InvalidAddress(ip) if ip == "not-an-ip"));
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn non_200_status_is_an_error() {
        let server = StubServer::start([("/1.1.1.1", Route::status(503))]).await;
        let lookup = lookup_against(&server).await;

        let err = lookup
            .lookup(&CancellationToken::new(), "1.1.1.1")
            .await
            .unwrap_err();

        assert!(matches!(err, LookupError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn unsuccessful_body_carries_message() {
        let body = r#"{"ip": "10.0.0.1", "success": false, "message": "Reserved range"}"#;
        let server = StubServer::start([("/10.0.0.1", Route::status(200).body(body))]).await;
        let lookup = lookup_against(&server).await;

        let err = lookup
            .lookup(&CancellationToken::new(), "10.0.0.1")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LookupError::Unsuccessful { ref message, .. } if message == "Reserved range"
        ));
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let server = StubServer::start([("/1.1.1.1", Route::status(200).body("{not json"))]).await;
        let lookup = lookup_against(&server).await;

        let err = lookup
            .lookup(&CancellationToken::new(), "1.1.1.1")
            .await
            .unwrap_err();

        assert!(matches!(err, LookupError::Decode { .. }));
    }

    #[tokio::test]
    async fn batch_continues_past_failures() {
        let server = StubServer::start([("/8.8.8.8", Route::status(200).body(GOOGLE_DNS))]).await;
        let lookup = lookup_against(&server).await;

        let mut seen = Vec::new();
        let err = lookup
            .lookup_all(&CancellationToken::new(), ["bogus", "8.8.8.8"], |ip, record| {
                seen.push((ip.to_string(), record.country_code))
            })
            .await
            .unwrap_err();

        assert_eq!(seen, vec![("8.8.8.8".to_string(), "US".to_string())]);
        match err {
            LookupError::Multiple(errors) => assert_eq!(errors.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
    }
}
