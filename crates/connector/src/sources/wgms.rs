//! Wave gliders from the WGMS fleet portal's per-vehicle CSV exports.
//!
//! The portal is session based: a SOAP login sets a cookie that the export
//! page requires. When the session is rejected the source forgets it and
//! logs in again on the next cycle.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use relay_metadata::{WgmsConfig, WgmsVehicle};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::http::status_error;
use crate::record::{Emission, FieldValue, NormalizedRecord, Topic};
use crate::traits::Source;

const LOGIN_PATH: &str = "/webservices/entityapi.asmx";
const EXPORT_PATH: &str = "/pages/exportPage.aspx";
const TIME_FORMAT: &str = "%m/%d/%Y %H:%M:%S";
const KNOTS_TO_MPS: f64 = 1.852 / 3.6;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Conversion {
    Time,
    Knots,
    Milliknots,
    Kilopascal,
    Plain,
}

/// Export column to record field
fn column_field(header: &str) -> Option<(&'static str, Conversion)> {
    let mapped = match header {
        "TimeStamp" => ("time", Conversion::Time),
        "Ground Speed(kt)" => ("speed_over_ground", Conversion::Knots),
        "Desired Heading (deg)" => ("desired_heading", Conversion::Plain),
        "Float Temp(degC)" => ("device_temperature", Conversion::Plain),
        "Pressure Sensor Float(kPa)" => ("pressure", Conversion::Kilopascal),
        "Battery (Wh)" => ("battery_charge", Conversion::Plain),
        "Lat (deg)" => ("lat", Conversion::Plain),
        "Lon (deg)" => ("lon", Conversion::Plain),
        "Water Speed (kt/1000) WS" => ("water_speed", Conversion::Milliknots),
        "Water Direction" => ("water_direction", Conversion::Plain),
        "Current Speed (kt)" => ("speed_in_water", Conversion::Knots),
        "Current Heading (deg)" => ("heading", Conversion::Plain),
        "Created On" => ("dataset_time", Conversion::Time),
        _ => return None,
    };
    Some(mapped)
}

fn convert(raw: &str, conversion: Conversion) -> Option<FieldValue> {
    if raw.is_empty() {
        return None;
    }
    if conversion == Conversion::Time {
        return NaiveDateTime::parse_from_str(raw, TIME_FORMAT)
            .ok()
            .map(|t| FieldValue::Time(t.and_utc()));
    }
    let value: f64 = raw.parse().ok()?;
    let value = match conversion {
        Conversion::Knots => value * KNOTS_TO_MPS,
        Conversion::Milliknots => value * KNOTS_TO_MPS / 1000.0,
        Conversion::Kilopascal => value * 1000.0,
        _ => value,
    };
    Some(FieldValue::Number(value))
}

/// Parse a vehicle export into one record per row. Unknown columns are
/// ignored; empty or unparseable cells leave the field unset.
pub fn parse_export(csv: &str) -> Vec<NormalizedRecord> {
    let mut lines = csv.lines();
    let Some(header_line) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<Option<(&'static str, Conversion)>> = header_line
        .trim()
        .trim_start_matches('\u{feff}')
        .split(',')
        .map(|h| column_field(h.trim()))
        .collect();

    lines
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut record = NormalizedRecord::new();
            for (column, cell) in columns.iter().zip(line.trim().split(',')) {
                if let Some((name, conversion)) = column {
                    if let Some(value) = convert(cell.trim(), *conversion) {
                        record.insert(*name, value);
                    }
                }
            }
            record
        })
        .collect()
}

/// Location of the most recent timed row
pub fn latest_location(rows: &[NormalizedRecord]) -> Option<NormalizedRecord> {
    let latest = rows.iter().filter(|r| r.time().is_some()).max_by_key(|r| r.time())?;
    let time: DateTime<Utc> = latest.time()?;
    Some(
        NormalizedRecord::at(time)
            .with_opt("lat", latest.number("lat"))
            .with_opt("lon", latest.number("lon")),
    )
}

fn xml_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn login_envelope(login: &str, password: &str, org: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <CreateLoginSession xmlns="http://gliders.liquidr.com/webservicesWebServices">
      <login>{}</login>
      <password>{}</password>
      <orgName>{}</orgName>
    </CreateLoginSession>
  </soap:Body>
</soap:Envelope>
"#,
        xml_escape(login),
        xml_escape(password),
        xml_escape(org)
    )
}

pub struct WgmsSource {
    name: String,
    client: Client,
    base_url: String,
    login: String,
    password: String,
    org: String,
    entity_type: u32,
    vehicles: Vec<WgmsVehicle>,
    logged_in: bool,
}

impl WgmsSource {
    /// `client` must keep cookies; `login` and `password` are already resolved.
    pub fn new(
        name: impl Into<String>,
        client: Client,
        config: &WgmsConfig,
        login: String,
        password: String,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            login,
            password,
            org: config.credentials.org.clone(),
            entity_type: config.entity_type,
            vehicles: config.vehicles.clone(),
            logged_in: false,
        }
    }

    async fn create_session(&mut self) -> Result<(), SourceError> {
        let url = format!("{}{}", self.base_url, LOGIN_PATH);
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("soapaction", "")
            .body(login_envelope(&self.login, &self.password, &self.org))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Auth(format!(
                "login to {} returned HTTP {}",
                url,
                response.status().as_u16()
            )));
        }

        self.logged_in = true;
        info!(source = %self.name, org = %self.org, "Logged in to fleet portal");
        Ok(())
    }

    async fn export(&self, vehicle: &WgmsVehicle) -> Result<String, SourceError> {
        let url = format!("{}{}", self.base_url, EXPORT_PATH);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("viewid", vehicle.record_id.to_string()),
                ("entitytype", self.entity_type.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SourceError::Auth(format!("export rejected with HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(status_error(&url, status).into());
        }

        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("html"));
        let body = response.text().await?;
        // An expired session is answered with the portal's login page.
        if is_html || body.trim_start().starts_with('<') {
            return Err(SourceError::Auth("session expired".to_string()));
        }
        Ok(body)
    }

    /// A rejected session aborts the pass at once. Other export failures only
    /// skip that vehicle, unless every vehicle failed.
    async fn poll_vehicles(&self) -> Result<Vec<Emission>, SourceError> {
        let mut emissions = Vec::new();
        let mut last_error = None;
        let mut failures = 0;

        for vehicle in &self.vehicles {
            let body = match self.export(vehicle).await {
                Ok(body) => body,
                Err(e @ SourceError::Auth(_)) => return Err(e),
                Err(e) => {
                    warn!(source = %self.name, platform = %vehicle.platform_id, error = %e, "Export failed");
                    failures += 1;
                    last_error = Some(e);
                    continue;
                }
            };
            let rows = parse_export(&body);
            match latest_location(&rows) {
                Some(record) => {
                    debug!(source = %self.name, platform = %vehicle.platform_id, rows = rows.len(), "Parsed export");
                    emissions.push(Emission::new(Topic::location(vehicle.platform_id.as_str()), record));
                }
                None => warn!(source = %self.name, platform = %vehicle.platform_id, "Export has no timed rows"),
            }
        }

        match last_error {
            Some(e) if failures == self.vehicles.len() => Err(e),
            _ => Ok(emissions),
        }
    }
}

#[async_trait]
impl Source for WgmsSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&mut self) -> Result<Vec<Emission>, SourceError> {
        if !self.logged_in {
            self.create_session().await?;
        }

        let result = self.poll_vehicles().await;
        if let Err(SourceError::Auth(reason)) = &result {
            warn!(source = %self.name, reason = %reason, "Session rejected, logging in again next cycle");
            self.logged_in = false;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use relay_metadata::WgmsCredentials;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EXPORT: &str = "TimeStamp,Structure ID,Ground Speed(kt),Lat (deg),Lon (deg),Pressure Sensor Float(kPa),Water Speed (kt/1000) WS,Created On\n\
        02/01/2020 11:50:00,7,1.5,13.10,-57.20,101.3,1500,02/01/2020 11:51:02\n\
        02/01/2020 12:00:00,7,,13.12,-57.21,,,\n\
        02/01/2020 11:40:00,7,1.2,13.08,-57.19,101.2,1200,02/01/2020 11:41:00\n";

    #[test]
    fn test_parse_export_fields_and_units() {
        let rows = parse_export(EXPORT);
        assert_eq!(rows.len(), 3);

        let first = &rows[0];
        assert_eq!(first.time(), Some(Utc.with_ymd_and_hms(2020, 2, 1, 11, 50, 0).unwrap()));
        assert!((first.number("speed_over_ground").unwrap() - 1.5 * 1.852 / 3.6).abs() < 1e-12);
        assert!((first.number("pressure").unwrap() - 101_300.0).abs() < 1e-6);
        assert!((first.number("water_speed").unwrap() - 1.5 * 1.852 / 3.6).abs() < 1e-12);
        assert_eq!(
            first.get("dataset_time"),
            Some(&FieldValue::Time(Utc.with_ymd_and_hms(2020, 2, 1, 11, 51, 2).unwrap()))
        );
        assert!(first.get("Structure ID").is_none());

        let second = &rows[1];
        assert!(second.get("speed_over_ground").is_none());
        assert!(second.get("pressure").is_none());
    }

    #[test]
    fn test_latest_location() {
        let rows = parse_export(EXPORT);
        let location = latest_location(&rows).unwrap();
        assert_eq!(location.time(), Some(Utc.with_ymd_and_hms(2020, 2, 1, 12, 0, 0).unwrap()));
        assert_eq!(location.number("lat"), Some(13.12));
        assert_eq!(location.number("lon"), Some(-57.21));
        assert_eq!(location.len(), 3);
    }

    #[test]
    fn test_empty_export() {
        assert!(parse_export("").is_empty());
        assert!(latest_location(&parse_export("TimeStamp,Lat (deg)\n")).is_none());
    }

    #[test]
    fn test_login_envelope_escapes_credentials() {
        let envelope = login_envelope("pilot", "a<b&c", "APL-UW");
        assert!(envelope.contains("<password>a&lt;b&amp;c</password>"));
        assert!(envelope.contains("<orgName>APL-UW</orgName>"));
    }

    fn config(base_url: String) -> WgmsConfig {
        WgmsConfig {
            base_url,
            credentials: WgmsCredentials {
                login: "env:WGMS_LOGIN".to_string(),
                password: "env:WGMS_PASSWORD".to_string(),
                org: "APL-UW".to_string(),
            },
            entity_type: 42,
            vehicles: vec![WgmsVehicle {
                platform_id: "SV3-245".to_string(),
                record_id: 74446,
            }],
        }
    }

    async fn mount_login(server: &MockServer, status: u16) {
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .and(header("content-type", "text/xml; charset=utf-8"))
            .and(body_string_contains("<login>pilot</login>"))
            .respond_with(
                ResponseTemplate::new(status).insert_header("set-cookie", "ASP.NET_SessionId=abc; path=/"),
            )
            .mount(server)
            .await;
    }

    fn source(server: &MockServer) -> WgmsSource {
        let client = crate::http::build_session_client(crate::http::REQUEST_TIMEOUT).unwrap();
        WgmsSource::new(
            "wgms",
            client,
            &config(server.uri()),
            "pilot".to_string(),
            "secret".to_string(),
        )
    }

    #[tokio::test]
    async fn test_login_then_export() {
        let server = MockServer::start().await;
        mount_login(&server, 200).await;
        Mock::given(method("GET"))
            .and(path(EXPORT_PATH))
            .and(query_param("viewid", "74446"))
            .and(query_param("entitytype", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_string(EXPORT))
            .mount(&server)
            .await;

        let mut source = source(&server);
        let emissions = source.poll().await.unwrap();
        assert_eq!(emissions.len(), 1);
        assert_eq!(emissions[0].topic.to_string(), "platform/SV3-245/location");
    }

    #[tokio::test]
    async fn test_failed_login_is_auth_error() {
        let server = MockServer::start().await;
        mount_login(&server, 500).await;

        let mut source = source(&server);
        let err = source.poll().await.unwrap_err();
        assert!(matches!(err, SourceError::Auth(_)));
        assert!(err.is_recoverable());
    }

    fn two_vehicle_source(server: &MockServer) -> WgmsSource {
        let mut config = config(server.uri());
        config.vehicles.push(WgmsVehicle {
            platform_id: "SV3-247".to_string(),
            record_id: 74447,
        });
        let client = crate::http::build_session_client(crate::http::REQUEST_TIMEOUT).unwrap();
        WgmsSource::new("wgms", client, &config, "pilot".to_string(), "secret".to_string())
    }

    #[tokio::test]
    async fn test_failing_vehicle_does_not_hold_back_others() {
        let server = MockServer::start().await;
        mount_login(&server, 200).await;
        Mock::given(method("GET"))
            .and(path(EXPORT_PATH))
            .and(query_param("viewid", "74446"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(EXPORT_PATH))
            .and(query_param("viewid", "74447"))
            .respond_with(ResponseTemplate::new(200).set_body_string(EXPORT))
            .mount(&server)
            .await;

        let mut source = two_vehicle_source(&server);
        let emissions = source.poll().await.unwrap();
        assert_eq!(emissions.len(), 1);
        assert_eq!(emissions[0].topic.to_string(), "platform/SV3-247/location");
        assert!(source.logged_in);
    }

    #[tokio::test]
    async fn test_all_vehicles_failing_fails_cycle() {
        let server = MockServer::start().await;
        mount_login(&server, 200).await;
        Mock::given(method("GET"))
            .and(path(EXPORT_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut source = two_vehicle_source(&server);
        let err = source.poll().await.unwrap_err();
        assert!(matches!(err, SourceError::Fetch(_)));
        assert!(source.logged_in);
    }

    #[tokio::test]
    async fn test_expired_session_relogs_next_cycle() {
        let server = MockServer::start().await;
        mount_login(&server, 200).await;
        Mock::given(method("GET"))
            .and(path(EXPORT_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html>login</html>"),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(EXPORT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string(EXPORT))
            .mount(&server)
            .await;

        let mut source = source(&server);
        assert!(matches!(source.poll().await, Err(SourceError::Auth(_))));
        assert_eq!(source.poll().await.unwrap().len(), 1);

        let logins = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == LOGIN_PATH)
            .count();
        assert_eq!(logins, 2);
    }
}
