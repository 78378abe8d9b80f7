//! Jurisdiction routing
//!
//! Maps a point to the administrative labels that drive provider
//! eligibility. The table is data loaded at startup (see
//! `geofact_common::config::JurisdictionConfig`); adding a jurisdiction is
//! a configuration change, not a code change. Caller-supplied hints always
//! beat the table, since the caller may know the incorporated city for a
//! point our coarse boxes mislabel.

use geofact_common::config::JurisdictionConfig;
use geofact_common::geo::LatLng;

/// Administrative context for one query, computed once per request
#[derive(Debug, Clone, Default)]
pub struct Jurisdiction {
    pub city: Option<String>,
    pub county: Option<String>,
    /// Point falls inside a primary coverage area; in-metro providers
    /// (registry, district boundaries, address points) only apply here
    pub in_primary: bool,
    /// Names of the matched table entries, for tracing
    pub matched: Vec<String>,
}

/// Startup-loaded table of jurisdiction bounding boxes
pub struct JurisdictionTable {
    entries: Vec<JurisdictionConfig>,
}

impl JurisdictionTable {
    pub fn new(entries: Vec<JurisdictionConfig>) -> Self {
        Self { entries }
    }

    /// Labels for a point. Boxes may overlap; the first entry carrying a
    /// label wins for that label.
    pub fn locate(&self, point: &LatLng) -> Jurisdiction {
        let mut result = Jurisdiction::default();
        for entry in &self.entries {
            if !entry.bbox.contains(point) {
                continue;
            }
            result.matched.push(entry.name.clone());
            if entry.primary {
                result.in_primary = true;
            }
            if result.city.is_none() {
                result.city = entry.city.clone();
            }
            if result.county.is_none() {
                result.county = entry.county.clone();
            }
        }
        result
    }

    /// Locate, then let caller hints override the table labels
    pub fn locate_with_hints(
        &self,
        point: Option<&LatLng>,
        city_hint: Option<&str>,
        county_hint: Option<&str>,
    ) -> Jurisdiction {
        let mut result = point.map(|p| self.locate(p)).unwrap_or_default();
        if let Some(city) = city_hint {
            result.city = Some(city.to_string());
        }
        if let Some(county) = county_hint {
            result.county = Some(county.to_string());
        }
        result
    }
}
