//! Weather reports for the group channel's `!weather` command.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::WeatherError;

pub const DEFAULT_METEOMATICS_URL: &str = "https://api.meteomatics.com";
pub const DEFAULT_COUNTRY: &str = "US";
pub const DEFAULT_ZIP: &str = "90291";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait WeatherReporter: Send + Sync {
    /// Human-readable report. An empty string means "nothing to say".
    async fn report(&self) -> Result<String, WeatherError>;
}

pub fn format_report(zip: &str, fahrenheit: f64) -> String {
    format!("Current Temperature in {zip} is {fahrenheit} °F ☀️")
}

/// Meteomatics 2 m temperature for one postal code, over the next hour.
#[derive(Debug, Clone)]
pub struct MeteomaticsReporter {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    country: String,
    zip: String,
    timeout: Duration,
}

impl MeteomaticsReporter {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_METEOMATICS_URL, username, password)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
            username: username.into(),
            password: password.into(),
            country: DEFAULT_COUNTRY.to_string(),
            zip: DEFAULT_ZIP.to_string(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn location(mut self, country: impl Into<String>, zip: impl Into<String>) -> Self {
        self.country = country.into();
        self.zip = zip.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request_url(&self, now: DateTime<Utc>) -> String {
        let end = now + chrono::Duration::hours(1);
        format!(
            "{}/{}--{}:PT1H/t_2m:F/postal_{}{}/csv",
            self.base_url,
            now.format("%Y-%m-%dT%H:%M:%SZ"),
            end.format("%Y-%m-%dT%H:%M:%SZ"),
            self.country,
            self.zip
        )
    }

    /// Temperatures for each row of the time slice, in °F.
    pub async fn temperatures(&self) -> Result<Vec<f64>, WeatherError> {
        let url = self.request_url(Utc::now());
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WeatherError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body = resp.text().await.map_err(|e| self.classify(e))?;
        Ok(parse_csv(&body))
    }

    fn classify(&self, err: reqwest::Error) -> WeatherError {
        if err.is_timeout() {
            WeatherError::Timeout(self.timeout)
        } else {
            WeatherError::Http(err)
        }
    }
}

#[async_trait]
impl WeatherReporter for MeteomaticsReporter {
    async fn report(&self) -> Result<String, WeatherError> {
        let values = self.temperatures().await?;
        let first = values.first().copied().ok_or(WeatherError::NoData)?;
        Ok(format_report(&self.zip, first))
    }
}

/// `validdate;value` rows after a header line. Unparseable rows are skipped.
pub fn parse_csv(body: &str) -> Vec<f64> {
    body.lines()
        .skip(1)
        .filter_map(|line| line.split(';').nth(1))
        .filter_map(|value| value.trim().parse::<f64>().ok())
        .collect()
}

/// Fixed report, for offline runs and tests.
#[derive(Debug, Clone)]
pub struct StaticReport {
    report: String,
    failure: Option<fn() -> WeatherError>,
}

impl StaticReport {
    pub fn new(report: impl Into<String>) -> Self {
        Self {
            report: report.into(),
            failure: None,
        }
    }

    pub fn failing(failure: fn() -> WeatherError) -> Self {
        Self {
            report: String::new(),
            failure: Some(failure),
        }
    }
}

#[async_trait]
impl WeatherReporter for StaticReport {
    async fn report(&self) -> Result<String, WeatherError> {
        match self.failure {
            Some(make) => Err(make()),
            None => Ok(self.report.clone()),
        }
    }
}
