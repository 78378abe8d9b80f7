//! Special-purpose district boundary provider (MUD / WCID overlays)
//!
//! Point-in-polygon query against a county ArcGIS FeatureServer layer,
//! routed through the tiered fetcher because these endpoints intermittently
//! rate-limit and occasionally sit behind anti-bot protection.

use super::{Provider, ProviderError, QueryContext};
use crate::fetch::{FetchOptions, TieredFetcher};
use crate::types::{
    Candidate, FactType, FactValue, Identifiers, ProviderKind, ResolutionMethod, UtilityService,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Which district layer this adapter fronts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistrictKind {
    Mud,
    Wcid,
}

impl DistrictKind {
    fn provider_kind(&self) -> ProviderKind {
        match self {
            DistrictKind::Mud => ProviderKind::Mud,
            DistrictKind::Wcid => ProviderKind::Wcid,
        }
    }

    fn method(&self) -> ResolutionMethod {
        match self {
            DistrictKind::Mud => ResolutionMethod::MudOverlay,
            DistrictKind::Wcid => ResolutionMethod::WcidOverlay,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            DistrictKind::Mud => "MUD",
            DistrictKind::Wcid => "WCID",
        }
    }

    /// Source-intrinsic confidence per fact type. MUD rolls are maintained
    /// more actively than WCID rolls, and neither layer is authoritative
    /// for storm drainage.
    fn confidence(&self, fact_type: FactType) -> f64 {
        match (self, fact_type) {
            (DistrictKind::Mud, FactType::StormProvider) => 0.85,
            (DistrictKind::Mud, _) => 0.90,
            (DistrictKind::Wcid, FactType::StormProvider) => 0.80,
            (DistrictKind::Wcid, _) => 0.85,
        }
    }
}

pub struct DistrictBoundaryProvider {
    fetcher: Arc<TieredFetcher>,
    endpoint: String,
    district: DistrictKind,
    hint: u8,
}

impl DistrictBoundaryProvider {
    pub fn new(fetcher: Arc<TieredFetcher>, endpoint: String, district: DistrictKind) -> Self {
        let hint = match district {
            DistrictKind::Mud => 20,
            DistrictKind::Wcid => 30,
        };
        Self {
            fetcher,
            endpoint,
            district,
            hint,
        }
    }

    fn query_url(&self, lat: f64, lng: f64) -> Result<String, ProviderError> {
        let geometry = serde_json::json!({
            "x": lng,
            "y": lat,
            "spatialReference": { "wkid": 4326 }
        });
        let url = reqwest::Url::parse_with_params(
            &self.endpoint,
            &[
                ("geometry", geometry.to_string().as_str()),
                ("geometryType", "esriGeometryPoint"),
                ("inSR", "4326"),
                ("spatialRel", "esriSpatialRelIntersects"),
                ("outFields", "*"),
                ("returnGeometry", "false"),
                ("f", "json"),
            ],
        )
        .map_err(|e| ProviderError::NotConfigured(format!("bad endpoint URL: {}", e)))?;
        Ok(url.to_string())
    }
}

/// Parsed district attributes
struct DistrictMatch {
    name: String,
    district_no: Option<String>,
    has_water: bool,
    has_sewer: bool,
}

/// Extract the first feature's attributes. ArcGIS reports errors in-band
/// with HTTP 200, so an `error` member is a malformed-payload failure.
fn parse_feature(data: &Value, label: &str) -> Result<Option<DistrictMatch>, ProviderError> {
    if let Some(err) = data.get("error") {
        return Err(ProviderError::Malformed(format!(
            "ArcGIS error response: {}",
            err
        )));
    }

    let Some(feature) = data
        .get("features")
        .and_then(|f| f.as_array())
        .and_then(|f| f.first())
    else {
        return Ok(None);
    };
    let attrs = feature
        .get("attributes")
        .ok_or_else(|| ProviderError::Malformed("feature without attributes".to_string()))?;

    let district_no = ["DISTRICT_NO", "MUD_NO", "WCID_NO"]
        .iter()
        .find_map(|k| attr_string(attrs, k));
    let name = ["NAME", "DISTRICT_NAME"]
        .iter()
        .find_map(|k| attr_string(attrs, k))
        .unwrap_or_else(|| match &district_no {
            Some(no) => format!("{} #{}", label, no),
            None => format!("{} District", label),
        });

    Ok(Some(DistrictMatch {
        name,
        district_no,
        has_water: service_flag(attrs, &["HAS_WATER", "WATER_SERVICE"]),
        has_sewer: service_flag(attrs, &["HAS_SEWER", "SEWER_SERVICE"]),
    }))
}

fn attr_string(attrs: &Value, key: &str) -> Option<String> {
    match attrs.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Service flags default to true when the layer doesn't publish them; an
/// explicit "N" on any published flag means no service.
fn service_flag(attrs: &Value, keys: &[&str]) -> bool {
    let mut saw_any = false;
    for key in keys {
        if let Some(Value::String(s)) = attrs.get(*key) {
            saw_any = true;
            if s.eq_ignore_ascii_case("y") {
                return true;
            }
        }
    }
    !saw_any
}

#[async_trait]
impl Provider for DistrictBoundaryProvider {
    fn name(&self) -> &'static str {
        match self.district {
            DistrictKind::Mud => "mud_boundary",
            DistrictKind::Wcid => "wcid_boundary",
        }
    }

    fn kind(&self) -> ProviderKind {
        self.district.provider_kind()
    }

    fn supports(&self, fact_type: FactType) -> bool {
        matches!(
            fact_type,
            FactType::WaterProvider | FactType::SewerProvider | FactType::StormProvider
        )
    }

    fn eligible(&self, ctx: &QueryContext) -> bool {
        // County boundary layers only cover the primary metro
        ctx.point.is_some() && ctx.jurisdiction.in_primary
    }

    fn priority_hint(&self) -> u8 {
        self.hint
    }

    async fn query(
        &self,
        ctx: &QueryContext,
        fact_type: FactType,
    ) -> Result<Option<Candidate>, ProviderError> {
        let Some(point) = ctx.point.as_ref() else {
            return Ok(None);
        };

        let url = self.query_url(point.lat, point.lng)?;
        tracing::debug!("{} boundary query: {}", self.district.label(), url);

        let outcome = self.fetcher.fetch_json(&url, &FetchOptions::default()).await?;
        let Some(matched) = parse_feature(&outcome.data, self.district.label())? else {
            tracing::debug!("{}: no boundary at point", self.district.label());
            return Ok(None);
        };

        // The district must actually operate the requested service
        let serves = match fact_type {
            FactType::WaterProvider => matched.has_water,
            FactType::SewerProvider => matched.has_sewer,
            FactType::StormProvider => true,
            FactType::AddressIdentity => false,
        };
        if !serves {
            return Ok(None);
        }

        Ok(Some(Candidate {
            fact_type,
            value: FactValue::Utility(UtilityService {
                provider_name: matched.name,
                provider_type: self.district.provider_kind(),
                capacity_status: Some("available".to_string()),
                contact_phone: None,
                has_water: matched.has_water,
                has_sewer: matched.has_sewer,
            }),
            provider_kind: self.district.provider_kind(),
            identifiers: Identifiers {
                provider_id: None,
                ccn_number: None,
                district_no: matched.district_no,
            },
            intrinsic_confidence: self.district.confidence(fact_type),
            method: self.district.method(),
            provider_name: self.name().to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feature_with_flags() {
        let data = serde_json::json!({
            "features": [{
                "attributes": {
                    "DISTRICT_NO": 386,
                    "NAME": "Harris County MUD 386",
                    "HAS_WATER": "Y",
                    "HAS_SEWER": "N"
                }
            }]
        });
        let m = parse_feature(&data, "MUD").unwrap().unwrap();
        assert_eq!(m.name, "Harris County MUD 386");
        assert_eq!(m.district_no.as_deref(), Some("386"));
        assert!(m.has_water);
        assert!(!m.has_sewer);
    }

    #[test]
    fn test_parse_feature_flags_absent_default_true() {
        let data = serde_json::json!({
            "features": [{ "attributes": { "WCID_NO": "17" } }]
        });
        let m = parse_feature(&data, "WCID").unwrap().unwrap();
        assert_eq!(m.name, "WCID #17");
        assert!(m.has_water);
        assert!(m.has_sewer);
    }

    #[test]
    fn test_parse_empty_features() {
        let data = serde_json::json!({ "features": [] });
        assert!(parse_feature(&data, "MUD").unwrap().is_none());
    }

    #[test]
    fn test_parse_inband_error() {
        let data = serde_json::json!({
            "error": { "code": 400, "message": "Invalid geometry" }
        });
        assert!(matches!(
            parse_feature(&data, "MUD"),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn test_confidence_table() {
        assert_eq!(DistrictKind::Mud.confidence(FactType::WaterProvider), 0.90);
        assert_eq!(DistrictKind::Mud.confidence(FactType::StormProvider), 0.85);
        assert_eq!(DistrictKind::Wcid.confidence(FactType::SewerProvider), 0.85);
        assert_eq!(DistrictKind::Wcid.confidence(FactType::StormProvider), 0.80);
    }

    #[test]
    fn test_query_url_encodes_geometry() {
        use crate::db;
        use geofact_common::config::FetchConfig;

        let rt = tokio::runtime::Runtime::new().unwrap();
        let pool = rt.block_on(db::init_memory_pool()).unwrap();
        let fetcher = Arc::new(TieredFetcher::new(pool, FetchConfig::default()));
        let provider = DistrictBoundaryProvider::new(
            fetcher,
            "https://gis.example.com/FeatureServer/0/query".to_string(),
            DistrictKind::Mud,
        );

        let url = provider.query_url(29.76, -95.37).unwrap();
        assert!(url.starts_with("https://gis.example.com/FeatureServer/0/query?"));
        assert!(url.contains("geometryType=esriGeometryPoint"));
        assert!(url.contains("f=json"));
        // Geometry JSON is percent-encoded into the query string
        assert!(url.contains("spatialReference"));
    }
}
