//! Municipal address-point provider
//!
//! Validates an address against the city's official address-point layer by
//! proximity to the query point. Free, authoritative for the primary metro,
//! and therefore the first tier of the address cascade. Routed through the
//! tiered fetcher like the other ArcGIS layers.

use super::{Provider, ProviderError, QueryContext};
use crate::fetch::{FetchOptions, TieredFetcher};
use crate::types::{
    AddressComponents, AddressIdentity, Candidate, FactType, FactValue, Identifiers, ProviderKind,
    ResolutionMethod,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

const ADDRESS_POINT_CONFIDENCE: f64 = 0.95;

pub struct AddressPointProvider {
    fetcher: Arc<TieredFetcher>,
    endpoint: String,
}

impl AddressPointProvider {
    pub fn new(fetcher: Arc<TieredFetcher>, endpoint: String) -> Self {
        Self { fetcher, endpoint }
    }

    fn query_url(&self, lat: f64, lng: f64) -> Result<String, ProviderError> {
        let url = reqwest::Url::parse_with_params(
            &self.endpoint,
            &[
                ("geometry", format!("{},{}", lng, lat).as_str()),
                ("geometryType", "esriGeometryPoint"),
                ("inSR", "4326"),
                ("spatialRel", "esriSpatialRelIntersects"),
                ("distance", "50"),
                ("units", "esriSRUnit_Foot"),
                (
                    "outFields",
                    "STREET_NUM,STREET_NAME,CITY,ZIPCODE,STATUS,FULL_ADDRESS,PREFIX,SUFFIX",
                ),
                ("returnGeometry", "false"),
                ("f", "json"),
            ],
        )
        .map_err(|e| ProviderError::NotConfigured(format!("bad endpoint URL: {}", e)))?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl Provider for AddressPointProvider {
    fn name(&self) -> &'static str {
        "address_point"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::AddressPoint
    }

    fn supports(&self, fact_type: FactType) -> bool {
        fact_type == FactType::AddressIdentity
    }

    fn eligible(&self, ctx: &QueryContext) -> bool {
        // Needs a point to search near, inside the metro the layer covers
        ctx.point.is_some() && ctx.jurisdiction.in_primary
    }

    fn priority_hint(&self) -> u8 {
        10
    }

    async fn query(
        &self,
        ctx: &QueryContext,
        fact_type: FactType,
    ) -> Result<Option<Candidate>, ProviderError> {
        if fact_type != FactType::AddressIdentity {
            return Ok(None);
        }
        let Some(point) = ctx.point.as_ref() else {
            return Ok(None);
        };

        let url = self.query_url(point.lat, point.lng)?;
        let outcome = self.fetcher.fetch_json(&url, &FetchOptions::default()).await?;

        let Some(attrs) = first_attributes(&outcome.data)? else {
            tracing::debug!("address_point: no record within 50 ft");
            return Ok(None);
        };

        let mut warnings = Vec::new();
        if let Some(status) = str_attr(&attrs, "STATUS") {
            if status != "ACTIVE" {
                warnings.push(format!("Address status: {}", status));
            }
        }

        let standardized = str_attr(&attrs, "FULL_ADDRESS").or_else(|| {
            let parts: Vec<String> = ["STREET_NUM", "PREFIX", "STREET_NAME", "SUFFIX"]
                .iter()
                .filter_map(|k| str_attr(&attrs, k))
                .collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        });

        Ok(Some(Candidate {
            fact_type,
            value: FactValue::Address(AddressIdentity {
                standardized_address: standardized,
                point: *point,
                components: AddressComponents {
                    street_number: str_attr(&attrs, "STREET_NUM"),
                    street_name: str_attr(&attrs, "STREET_NAME"),
                    city: str_attr(&attrs, "CITY").or_else(|| ctx.jurisdiction.city.clone()),
                    state: Some("TX".to_string()),
                    postal_code: str_attr(&attrs, "ZIPCODE"),
                    county: ctx.jurisdiction.county.clone(),
                },
                warnings,
            }),
            provider_kind: ProviderKind::AddressPoint,
            identifiers: Identifiers::default(),
            intrinsic_confidence: ADDRESS_POINT_CONFIDENCE,
            method: ResolutionMethod::AddressPointMatch,
            provider_name: self.name().to_string(),
        }))
    }
}

fn first_attributes(data: &Value) -> Result<Option<Value>, ProviderError> {
    if let Some(err) = data.get("error") {
        return Err(ProviderError::Malformed(format!(
            "ArcGIS error response: {}",
            err
        )));
    }
    Ok(data
        .get("features")
        .and_then(|f| f.as_array())
        .and_then(|f| f.first())
        .and_then(|f| f.get("attributes"))
        .cloned())
}

fn str_attr(attrs: &Value, key: &str) -> Option<String> {
    match attrs.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}
