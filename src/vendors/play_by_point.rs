//! Play by Point booking vendor client.
//!
//! Play by Point has no public API for facility owners. The client signs in
//! through the web form like a browser would, keeps the session cookie, and
//! then talks to the JSON endpoints the web app itself uses with the page's
//! CSRF token.

use crate::core::{BookingCredentials, LookaheadWindow, PlayByPointConfig, Reservation, SyncError};
use crate::BookingClient;
use super::describe_failure;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use regex::Regex;
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use tracing::{debug, info, instrument};

const CSRF_HEADER: &str = "X-Csrf-Token";

// constant patterns, covered by the scraping tests
#[allow(clippy::expect_used)]
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(input|meta)\b[^>]*>").expect("valid tag regex"));

#[allow(clippy::expect_used)]
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid attribute regex")
});

/// Finds the first `<tag>` whose `key_attr` equals `key_value` and returns its
/// `wanted_attr`. Attribute order and quoting style do not matter.
#[must_use]
pub fn find_tag_attribute(
    html: &str,
    tag: &str,
    key_attr: &str,
    key_value: &str,
    wanted_attr: &str,
) -> Option<String> {
    TAG_RE
        .captures_iter(html)
        .filter(|caps| caps[1].eq_ignore_ascii_case(tag))
        .find_map(|caps| {
            let attrs: HashMap<String, String> = ATTR_RE
                .captures_iter(&caps[0])
                .map(|a| {
                    let value = a.get(2).or_else(|| a.get(3)).map_or("", |m| m.as_str());
                    (a[1].to_ascii_lowercase(), value.to_string())
                })
                .collect();

            if attrs.get(key_attr).map(String::as_str) == Some(key_value) {
                attrs.get(wanted_attr).cloned()
            } else {
                None
            }
        })
}

/// Checks the reply to the sign-in form and returns the session's CSRF token.
///
/// Play by Point answers a bad password with 200 and an "Incorrect email or
/// password" page, so the body is checked too.
///
/// # Errors
///
/// Returns [`SyncError::BookingFetch`] on a non-200 status, an "Incorrect"
/// body, or a page without a `csrf-token` meta tag.
pub fn check_login_response(status: StatusCode, body: &str) -> Result<String, SyncError> {
    if status != StatusCode::OK || body.contains("Incorrect") {
        return Err(SyncError::BookingFetch(format!("login failed (HTTP {status})")));
    }

    find_tag_attribute(body, "meta", "name", "csrf-token", "content")
        .ok_or_else(|| SyncError::BookingFetch("no csrf-token after login".to_string()))
}

// reservation listing

#[derive(Deserialize, Debug)]
pub struct ReservationRecord {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default, alias = "court", alias = "resource_name")]
    pub court_name: Option<String>,
    pub start_time: String,
    pub end_time: String,
}

/// Parses a vendor time. RFC 3339 values keep their instant, naive values are
/// facility local time.
///
/// # Errors
///
/// Returns a message if the value matches no known format or does not exist
/// in the timezone.
pub fn parse_vendor_time(value: &str, tz: Tz) -> Result<DateTime<Tz>, String> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&tz));
    }

    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .ok_or_else(|| format!("unrecognized time '{value}'"))
        .and_then(|naive| {
            tz.from_local_datetime(&naive)
                .earliest()
                .ok_or_else(|| format!("time '{value}' does not exist in {tz}"))
        })
}

/// Converts the vendor's reservation records.
///
/// # Errors
///
/// Returns a message naming the first record with an unparseable or empty time slot.
pub fn parse_reservations(records: Vec<ReservationRecord>, tz: Tz) -> Result<Vec<Reservation>, String> {
    records
        .into_iter()
        .map(|record| {
            let start = parse_vendor_time(&record.start_time, tz)?;
            let end = parse_vendor_time(&record.end_time, tz)?;
            let id = record.id.map(|id| match id {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            });
            if end <= start {
                return Err(format!(
                    "reservation {} ends before it starts ({} - {})",
                    id.as_deref().unwrap_or("?"),
                    record.start_time,
                    record.end_time
                ));
            }
            Ok(Reservation {
                id,
                court: record.court_name.unwrap_or_else(|| "Court".to_string()),
                start,
                end,
            })
        })
        .collect()
}

// facility rules

#[derive(Deserialize, Debug)]
pub struct Rule {
    pub id: i64,
    pub display_name: String,
    #[serde(default)]
    pub variants: Vec<RuleVariant>,
    #[serde(default)]
    pub values: Vec<RuleValue>,
}

#[derive(Deserialize, Debug)]
pub struct RuleVariant {
    pub id: i64,
    pub display_name: String,
    #[serde(default)]
    pub values: Vec<VariantOption>,
}

#[derive(Deserialize, Debug)]
pub struct VariantOption {
    pub text: String,
    pub value: i64,
}

#[derive(Deserialize, Debug)]
pub struct RuleValue {
    pub id: i64,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub variants: Vec<ValueVariant>,
}

#[derive(Deserialize, Debug)]
pub struct ValueVariant {
    pub rule_variant_item_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingEntryCode {
    pub id: i64,
    pub value: String,
}

/// The entry code rule of a facility, flattened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryCodes {
    pub rule_id: i64,
    /// id of the "Day" variant rule
    pub variant_id: i64,
    /// day text ("1".."31") to variant item id, in vendor order
    pub day_ids: Vec<(String, i64)>,
    /// variant item id to the value currently stored for it
    pub existing_values: HashMap<i64, ExistingEntryCode>,
}

/// # Errors
///
/// Returns a message if the rule or its "Day" variant is missing.
pub fn parse_entry_codes(rules: &[Rule], rule_name: &str) -> Result<EntryCodes, String> {
    let rule = rules
        .iter()
        .find(|r| r.display_name == rule_name)
        .ok_or_else(|| format!("couldn't find rule '{rule_name}'"))?;

    let day_variant = rule
        .variants
        .iter()
        .find(|v| v.display_name == "Day")
        .ok_or_else(|| format!("couldn't find Day variant in '{rule_name}'"))?;

    let day_ids = day_variant
        .values
        .iter()
        .map(|v| (v.text.clone(), v.value))
        .collect();

    let mut existing_values = HashMap::new();
    for value in &rule.values {
        for variant in &value.variants {
            existing_values.insert(
                variant.rule_variant_item_id,
                ExistingEntryCode {
                    id: value.id,
                    value: value.value.clone().unwrap_or_default(),
                },
            );
        }
    }

    Ok(EntryCodes {
        rule_id: rule.id,
        variant_id: day_variant.id,
        day_ids,
        existing_values,
    })
}

/// Form payload for `PUT /api/rules/{id}`.
///
/// Rails replaces the whole value list, so days without an update resend their
/// existing code. A day mapped to `None` is left out, which clears it.
#[must_use]
pub fn build_update_payload(
    owner_id: &str,
    entry_codes: &EntryCodes,
    updated_codes: &BTreeMap<u32, Option<String>>,
) -> Vec<(String, String)> {
    let mut payload = vec![
        ("rule[id]".to_string(), entry_codes.rule_id.to_string()),
        ("owner".to_string(), owner_id.to_string()),
    ];

    for (i, (day, variant_id)) in entry_codes.day_ids.iter().enumerate() {
        let existing = entry_codes.existing_values.get(variant_id);
        let update = day
            .trim()
            .parse::<u32>()
            .ok()
            .and_then(|d| updated_codes.get(&d));

        let code = match (update, existing) {
            (Some(Some(code)), _) => code.clone(),
            (Some(None), _) => continue,
            (None, Some(existing)) => existing.value.clone(),
            (None, None) => continue,
        };

        let prefix = format!("rule[values_attributes][{i}]");
        if let Some(existing) = existing {
            // the vendor needs the value id to update instead of inserting
            payload.push((format!("{prefix}[id]"), existing.id.to_string()));
        }
        payload.push((format!("{prefix}[rule_id]"), entry_codes.rule_id.to_string()));
        payload.push((format!("{prefix}[value]"), code));
        payload.push((
            format!("{prefix}[value_variants_attributes][0][variant_rule_id]"),
            entry_codes.variant_id.to_string(),
        ));
        payload.push((
            format!("{prefix}[value_variants_attributes][0][rule_variant_item_id]"),
            variant_id.to_string(),
        ));
    }

    payload
}

pub struct PlayByPointClient {
    http: Client,
    config: PlayByPointConfig,
    credentials: BookingCredentials,
    timezone: Tz,
    csrf_token: Option<String>,
}

impl PlayByPointClient {
    /// The `http` client must keep cookies, the session lives in them.
    #[must_use]
    pub fn new(
        http: Client,
        config: PlayByPointConfig,
        credentials: BookingCredentials,
        timezone: Tz,
    ) -> Self {
        Self {
            http,
            config,
            credentials,
            timezone,
            csrf_token: None,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    async fn fetch_rules(&self, csrf: &str) -> Result<Vec<Rule>, SyncError> {
        let update_err = SyncError::EntryCodeUpdate;

        let response = self
            .http
            .get(self.url("/api/rules"))
            .query(&[
                ("owner", self.credentials.owner_id.as_str()),
                ("namespace", "facility_rules"),
            ])
            .header(CSRF_HEADER, csrf)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| update_err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(update_err(describe_failure(response).await));
        }

        response
            .json()
            .await
            .map_err(|e| update_err(format!("unexpected rules response: {e}")))
    }
}

#[async_trait]
impl BookingClient for PlayByPointClient {
    #[instrument(skip(self), fields(username = %self.credentials.username))]
    async fn login(&mut self) -> Result<(), SyncError> {
        let fetch_err = SyncError::BookingFetch;
        let sign_in_url = self.url("/users/sign_in");

        // the sign-in page carries the form's CSRF token and sets the session cookie
        let page = self
            .http
            .get(&sign_in_url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        if !page.status().is_success() {
            return Err(fetch_err(format!(
                "sign-in page unavailable: {}",
                describe_failure(page).await
            )));
        }
        let html = page.text().await.map_err(|e| fetch_err(e.to_string()))?;
        let form_token = find_tag_attribute(&html, "input", "name", "authenticity_token", "value")
            .ok_or_else(|| fetch_err("sign-in page has no authenticity_token".to_string()))?;

        let form = [
            ("user[email]", self.credentials.username.as_str()),
            ("user[password]", self.credentials.password.as_str()),
            ("authenticity_token", form_token.as_str()),
        ];
        let response = self
            .http
            .post(&sign_in_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| fetch_err(e.to_string()))?;
        let csrf = check_login_response(status, &body)?;

        debug!("Signed in to Play by Point");
        self.csrf_token = Some(csrf);
        Ok(())
    }

    #[instrument(skip(self, window), fields(owner = %self.credentials.owner_id, first_day = %window.first_day, days = window.days))]
    async fn fetch_reservations(
        &self,
        window: &LookaheadWindow,
    ) -> Result<Vec<Reservation>, SyncError> {
        let fetch_err = SyncError::BookingFetch;
        let csrf = self
            .csrf_token()
            .ok_or_else(|| fetch_err("not logged in".to_string()))?;

        let first_day = window.first_day.to_string();
        let last_day = window.last_day().to_string();
        let response = self
            .http
            .get(self.url("/api/reservations"))
            .query(&[
                ("owner", self.credentials.owner_id.as_str()),
                ("start_date", first_day.as_str()),
                ("end_date", last_day.as_str()),
            ])
            .header(CSRF_HEADER, csrf)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(fetch_err(describe_failure(response).await));
        }

        let body = response.text().await.map_err(|e| fetch_err(e.to_string()))?;
        if body.trim().is_empty() {
            return Err(fetch_err("empty reservations response".to_string()));
        }
        let records: Vec<ReservationRecord> = serde_json::from_str(&body)
            .map_err(|e| fetch_err(format!("unparseable reservations response: {e}")))?;

        let reservations = parse_reservations(records, self.timezone).map_err(fetch_err)?;
        debug!(count = reservations.len(), "Fetched reservations");
        Ok(reservations)
    }

    #[instrument(skip(self, codes), fields(owner = %self.credentials.owner_id, days = codes.len()))]
    async fn update_entry_codes(
        &self,
        codes: &BTreeMap<u32, Option<String>>,
    ) -> Result<(), SyncError> {
        let csrf = self
            .csrf_token()
            .ok_or_else(|| SyncError::EntryCodeUpdate("not logged in".to_string()))?;

        let rules = self.fetch_rules(csrf).await?;
        let entry_codes =
            parse_entry_codes(&rules, &self.config.entry_codes_rule).map_err(SyncError::EntryCodeUpdate)?;
        let payload = build_update_payload(&self.credentials.owner_id, &entry_codes, codes);

        let response = self
            .http
            .put(self.url(&format!("/api/rules/{}", entry_codes.rule_id)))
            .header(CSRF_HEADER, csrf)
            .form(&payload)
            .send()
            .await
            .map_err(|e| SyncError::EntryCodeUpdate(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::EntryCodeUpdate(describe_failure(response).await));
        }

        info!(rule_id = entry_codes.rule_id, "Updated entry codes");
        Ok(())
    }
}
