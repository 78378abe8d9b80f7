//! Commercial geocoder / address-validation provider
//!
//! The generic bottom tier of the address cascade: works for any US
//! address, costs money per call, and reports its own quality signal
//! (verdict flags plus USPS deliverability), from which the candidate's
//! intrinsic confidence is derived. Keyed API called directly; there is
//! nothing for the proxy tier to add.

use super::{Provider, ProviderError, QueryContext};
use crate::types::{
    AddressComponents, AddressIdentity, Candidate, FactType, FactValue, Identifiers, ProviderKind,
    ResolutionMethod,
};
use async_trait::async_trait;
use geofact_common::geo::LatLng;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

pub struct GeocoderProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GeocoderProvider {
    /// # Panics
    /// Panics if the HTTP client cannot be built, which does not happen
    /// with a valid TLS stack.
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

/// Confidence from the validation verdict, per the API's own signals
fn verdict_confidence(verdict: &Value) -> f64 {
    let complete = verdict
        .get("addressComplete")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let unconfirmed = verdict
        .get("hasUnconfirmedComponents")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let inferred = verdict
        .get("hasInferredComponents")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if complete && !unconfirmed {
        0.95
    } else if complete {
        0.75
    } else if inferred {
        0.60
    } else {
        0.50
    }
}

/// Parse one validation result into an address identity plus confidence
fn parse_result(result: &Value, fallback_point: Option<LatLng>) -> Option<(AddressIdentity, f64)> {
    let verdict = result.get("verdict").cloned().unwrap_or(Value::Null);
    let mut confidence = verdict_confidence(&verdict);
    let mut warnings = Vec::new();

    // Geocode location; without one (and no query point) there is nothing
    // spatial to anchor the identity to
    let point = result
        .get("geocode")
        .and_then(|g| g.get("location"))
        .and_then(|l| {
            Some(LatLng::new(
                l.get("latitude")?.as_f64()?,
                l.get("longitude")?.as_f64()?,
            ))
        })
        .or(fallback_point)?;

    let postal = result
        .get("address")
        .and_then(|a| a.get("postalAddress"))
        .cloned()
        .unwrap_or(Value::Null);

    let mut components = AddressComponents {
        city: postal.get("locality").and_then(Value::as_str).map(String::from),
        state: postal
            .get("administrativeArea")
            .and_then(Value::as_str)
            .map(String::from),
        postal_code: postal
            .get("postalCode")
            .and_then(Value::as_str)
            .map(String::from),
        ..Default::default()
    };

    if let Some(line) = postal
        .get("addressLines")
        .and_then(|l| l.as_array())
        .and_then(|l| l.first())
        .and_then(Value::as_str)
    {
        if let Some((num, rest)) = line.split_once(' ') {
            if num.chars().all(|c| c.is_ascii_digit()) {
                components.street_number = Some(num.to_string());
                components.street_name = Some(rest.to_string());
            }
        }
    }

    if let Some(dpv) = result
        .get("uspsData")
        .and_then(|u| u.get("dpvConfirmation"))
        .and_then(Value::as_str)
    {
        if dpv == "N" {
            warnings.push("Address not confirmed deliverable by USPS".to_string());
            confidence = confidence.min(0.4);
        }
    }

    if let Some(missing) = result
        .get("address")
        .and_then(|a| a.get("missingComponentTypes"))
        .and_then(|m| m.as_array())
    {
        for item in missing.iter().filter_map(Value::as_str) {
            warnings.push(format!("Missing: {}", item));
        }
    }

    let standardized = result
        .get("address")
        .and_then(|a| a.get("formattedAddress"))
        .and_then(Value::as_str)
        .map(String::from);

    Some((
        AddressIdentity {
            standardized_address: standardized,
            point,
            components,
            warnings,
        },
        confidence,
    ))
}

#[async_trait]
impl Provider for GeocoderProvider {
    fn name(&self) -> &'static str {
        "geocoder"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Geocoder
    }

    fn supports(&self, fact_type: FactType) -> bool {
        fact_type == FactType::AddressIdentity
    }

    fn eligible(&self, ctx: &QueryContext) -> bool {
        // Works anywhere, but only with an address to validate
        ctx.address.is_some()
    }

    fn priority_hint(&self) -> u8 {
        50
    }

    async fn query(
        &self,
        ctx: &QueryContext,
        fact_type: FactType,
    ) -> Result<Option<Candidate>, ProviderError> {
        if fact_type != FactType::AddressIdentity {
            return Ok(None);
        }
        let Some(address) = ctx.address.as_deref() else {
            return Ok(None);
        };
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("geocoder API key missing".to_string()))?;

        let body = serde_json::json!({
            "address": {
                "regionCode": "US",
                "addressLines": [address],
            },
            "enableUspsCass": true,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Transport(format!(
                "geocoder returned status {}",
                status
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let Some(result) = data.get("result") else {
            tracing::debug!("geocoder: no validation result for address");
            return Ok(None);
        };

        let Some((identity, confidence)) = parse_result(result, ctx.point) else {
            return Ok(None);
        };

        Ok(Some(Candidate {
            fact_type,
            value: FactValue::Address(identity),
            provider_kind: ProviderKind::Geocoder,
            identifiers: Identifiers::default(),
            intrinsic_confidence: confidence,
            method: ResolutionMethod::GeocoderMatch,
            provider_name: self.name().to_string(),
        }))
    }
}
