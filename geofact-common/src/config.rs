//! TOML configuration for GeoFact services
//!
//! Resolution priority for secrets and paths: ENV → TOML → built-in default.
//! Every tunable that shapes resolution behavior (thresholds, decay, TTLs,
//! jurisdiction boxes, cost schedule) lives here as data so that new
//! jurisdictions and retuned constants are configuration, not code changes.

use crate::error::{Error, Result};
use crate::geo::BoundingBox;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Top-level TOML configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub resolution: ResolutionConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub costs: CostSchedule,

    /// Jurisdiction routing table. Boxes may overlap; the first match that
    /// carries a label wins for that label.
    #[serde(default = "default_jurisdictions")]
    pub jurisdictions: Vec<JurisdictionConfig>,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            fetch: FetchConfig::default(),
            resolution: ResolutionConfig::default(),
            providers: ProvidersConfig::default(),
            costs: CostSchedule::default(),
            jurisdictions: default_jurisdictions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// SQLite database path; None selects the per-user data directory
    pub database_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            database_path: None,
        }
    }
}

/// Tiered fetcher settings (direct → proxied escalation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Direct-tier request timeout (boundary services answer well inside this)
    #[serde(default = "default_direct_timeout")]
    pub direct_timeout_secs: u64,
    /// Proxied/rendered-tier timeout (JS rendering is slow)
    #[serde(default = "default_proxy_timeout")]
    pub proxy_timeout_secs: u64,
    /// Attempts per tier
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Backoff cap in seconds; attempt n waits min(2^n, cap)
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
    /// Content-cache TTL for fetched payloads, in hours
    #[serde(default = "default_fetch_ttl")]
    pub cache_ttl_hours: i64,
    /// Outbound requests per second (0 disables the limiter)
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_sec: u32,
    /// Proxy/rendering service base URL
    #[serde(default = "default_proxy_base_url")]
    pub proxy_base_url: String,
    /// Proxy service API key; GEOFACT_PROXY_API_KEY overrides
    pub proxy_api_key: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            direct_timeout_secs: default_direct_timeout(),
            proxy_timeout_secs: default_proxy_timeout(),
            retries: default_retries(),
            backoff_cap_secs: default_backoff_cap(),
            cache_ttl_hours: default_fetch_ttl(),
            rate_limit_per_sec: default_rate_limit(),
            proxy_base_url: default_proxy_base_url(),
            proxy_api_key: None,
        }
    }
}

/// Per-fact-type tunable: water / sewer / storm / address slots
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FactTuning {
    pub water: f64,
    pub sewer: f64,
    pub storm: f64,
    pub address: f64,
}

/// Per-fact-type switch
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FactSwitch {
    pub water: bool,
    pub sewer: bool,
    pub storm: bool,
    pub address: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Confidence multiplier applied once per priority tier consumed before
    /// acceptance. Empirically tuned; only the ordering (higher tier ⇒
    /// higher confidence) is load-bearing.
    #[serde(default = "default_tier_decay")]
    pub tier_decay: f64,
    /// Candidates whose provider names fall below this normalized
    /// similarity are treated as disagreeing
    #[serde(default = "default_name_similarity")]
    pub name_similarity_threshold: f64,
    /// Spatial cache lookup tolerance in meters. Capped at one cache
    /// bucket width (about 110 m); the lookup only scans adjacent buckets.
    #[serde(default = "default_tolerance")]
    pub spatial_tolerance_meters: f64,
    /// Overall wall-clock budget for one resolve request
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
    /// Cache "unresolved" outcomes too. Off by default: a failed resolution
    /// is recomputed on every call.
    #[serde(default)]
    pub cache_negative: bool,
    /// Minimum intrinsic confidence a candidate needs to stop the cascade
    #[serde(default = "default_thresholds")]
    pub acceptance_thresholds: FactTuning,
    /// Cache TTL per fact type, in days (0 disables caching for that fact)
    #[serde(default = "default_ttl_days")]
    pub ttl_days: FactTuning,
    /// Cross-check mode: query all eligible providers concurrently and
    /// compare, instead of the cost-controlled short-circuit cascade
    #[serde(default = "default_cross_check")]
    pub cross_check: FactSwitch,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            tier_decay: default_tier_decay(),
            name_similarity_threshold: default_name_similarity(),
            spatial_tolerance_meters: default_tolerance(),
            query_timeout_secs: default_query_timeout(),
            cache_negative: false,
            acceptance_thresholds: default_thresholds(),
            ttl_days: default_ttl_days(),
            cross_check: default_cross_check(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// ArcGIS FeatureServer query endpoint for MUD boundaries
    #[serde(default = "default_mud_endpoint")]
    pub mud_endpoint: String,
    /// ArcGIS FeatureServer query endpoint for WCID boundaries
    #[serde(default = "default_wcid_endpoint")]
    pub wcid_endpoint: String,
    /// Municipal address-point layer for the primary metro
    #[serde(default = "default_address_point_endpoint")]
    pub address_point_endpoint: String,
    /// Commercial geocoder / address-validation endpoint
    #[serde(default = "default_geocoder_endpoint")]
    pub geocoder_endpoint: String,
    /// Geocoder API key; GEOFACT_GEOCODER_API_KEY overrides
    pub geocoder_api_key: Option<String>,
    /// Cities known to run their own water/sewer service (lowercase)
    #[serde(default = "default_municipal_cities")]
    pub municipal_service_cities: Vec<String>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            mud_endpoint: default_mud_endpoint(),
            wcid_endpoint: default_wcid_endpoint(),
            address_point_endpoint: default_address_point_endpoint(),
            geocoder_endpoint: default_geocoder_endpoint(),
            geocoder_api_key: None,
            municipal_service_cities: default_municipal_cities(),
        }
    }
}

/// Tap and impact fee schedule in dollars (area defaults; per-district fee
/// schedules override these when a provider supplies them)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSchedule {
    pub municipal_water_tap: f64,
    pub municipal_sewer_tap: f64,
    pub mud_water_tap: f64,
    pub mud_sewer_tap: f64,
    pub mud_impact_fee: f64,
    pub wcid_water_tap: f64,
    pub wcid_sewer_tap: f64,
    pub wcid_impact_fee: f64,
}

impl Default for CostSchedule {
    fn default() -> Self {
        // 2024 Houston-area rates
        Self {
            municipal_water_tap: 2500.0,
            municipal_sewer_tap: 3500.0,
            mud_water_tap: 3000.0,
            mud_sewer_tap: 4000.0,
            mud_impact_fee: 8000.0,
            wcid_water_tap: 2800.0,
            wcid_sewer_tap: 3800.0,
            wcid_impact_fee: 7500.0,
        }
    }
}

/// One named jurisdiction: a bounding box plus the labels it implies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionConfig {
    pub name: String,
    pub bbox: BoundingBox,
    /// County label for points inside the box
    pub county: Option<String>,
    /// City label for points inside the box
    pub city: Option<String>,
    /// Primary coverage area: in-state/in-metro providers apply here
    #[serde(default)]
    pub primary: bool,
}

impl TomlConfig {
    /// Load configuration with ENV overrides applied.
    ///
    /// Search order: explicit path argument, `GEOFACT_CONFIG`, then the
    /// per-user config directory. A missing file is not an error; defaults
    /// apply.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(PathBuf::from)
            .or_else(|| std::env::var("GEOFACT_CONFIG").ok().map(PathBuf::from))
            .or_else(default_config_path);

        let mut config = match path {
            Some(ref p) if p.exists() => {
                let text = std::fs::read_to_string(p)?;
                let parsed: TomlConfig = toml::from_str(&text)
                    .map_err(|e| Error::Config(format!("{}: {}", p.display(), e)))?;
                info!("Configuration loaded from {}", p.display());
                parsed
            }
            Some(ref p) => {
                info!("No config file at {}, using defaults", p.display());
                TomlConfig::default()
            }
            None => TomlConfig::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("GEOFACT_PORT") {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => warn!("Ignoring non-numeric GEOFACT_PORT: {}", port),
            }
        }
        if let Ok(db) = std::env::var("GEOFACT_DATABASE") {
            self.server.database_path = Some(PathBuf::from(db));
        }
        if let Ok(key) = std::env::var("GEOFACT_PROXY_API_KEY") {
            if !key.trim().is_empty() {
                self.fetch.proxy_api_key = Some(key);
            }
        }
        if let Ok(key) = std::env::var("GEOFACT_GEOCODER_API_KEY") {
            if !key.trim().is_empty() {
                self.providers.geocoder_api_key = Some(key);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let t = &self.resolution;
        if !(0.0..=1.0).contains(&t.tier_decay) {
            return Err(Error::Config(format!(
                "resolution.tier_decay must be in [0,1], got {}",
                t.tier_decay
            )));
        }
        for (name, v) in [
            ("water", t.acceptance_thresholds.water),
            ("sewer", t.acceptance_thresholds.sewer),
            ("storm", t.acceptance_thresholds.storm),
            ("address", t.acceptance_thresholds.address),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::Config(format!(
                    "acceptance threshold for {} must be in [0,1], got {}",
                    name, v
                )));
            }
        }
        if !(0.0..=110.0).contains(&t.spatial_tolerance_meters) {
            return Err(Error::Config(format!(
                "resolution.spatial_tolerance_meters must be in [0, 110], got {}",
                t.spatial_tolerance_meters
            )));
        }
        Ok(())
    }

    /// Database path, falling back to the per-user data directory
    pub fn database_path(&self) -> PathBuf {
        self.server.database_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("geofact")
                .join("geofact.db")
        })
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("geofact").join("geofact.toml"))
}

fn default_port() -> u16 {
    5810
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_direct_timeout() -> u64 {
    12
}

fn default_proxy_timeout() -> u64 {
    45
}

fn default_retries() -> u32 {
    3
}

fn default_backoff_cap() -> u64 {
    30
}

fn default_fetch_ttl() -> i64 {
    24
}

fn default_rate_limit() -> u32 {
    5
}

fn default_proxy_base_url() -> String {
    "https://api.scraperapi.com".to_string()
}

fn default_tier_decay() -> f64 {
    0.97
}

fn default_name_similarity() -> f64 {
    0.55
}

fn default_tolerance() -> f64 {
    100.0
}

fn default_query_timeout() -> u64 {
    60
}

fn default_thresholds() -> FactTuning {
    FactTuning {
        water: 0.70,
        sewer: 0.70,
        storm: 0.55,
        address: 0.55,
    }
}

fn default_ttl_days() -> FactTuning {
    // Boundary facts change slowly; 30 days matches the upstream registries'
    // own refresh cadence
    FactTuning {
        water: 30.0,
        sewer: 30.0,
        storm: 30.0,
        address: 30.0,
    }
}

fn default_cross_check() -> FactSwitch {
    FactSwitch {
        water: false,
        sewer: false,
        storm: false,
        address: false,
    }
}

fn default_mud_endpoint() -> String {
    "https://geo.hcad.org/arcgis/rest/services/Boundaries/MUD_Boundaries/FeatureServer/0/query"
        .to_string()
}

fn default_wcid_endpoint() -> String {
    "https://geo.hcad.org/arcgis/rest/services/Boundaries/WCID_Boundaries/FeatureServer/0/query"
        .to_string()
}

fn default_address_point_endpoint() -> String {
    "https://services.arcgis.com/04HiymDgLlsbhaV4/ArcGIS/rest/services/COH_ADDRESS_POINT/FeatureServer/0/query"
        .to_string()
}

fn default_geocoder_endpoint() -> String {
    "https://addressvalidation.googleapis.com/v1:validateAddress".to_string()
}

fn default_municipal_cities() -> Vec<String> {
    [
        "houston",
        "sugar land",
        "pearland",
        "pasadena",
        "baytown",
        "league city",
        "friendswood",
        "missouri city",
        "stafford",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_jurisdictions() -> Vec<JurisdictionConfig> {
    vec![
        JurisdictionConfig {
            name: "houston-metro".to_string(),
            bbox: BoundingBox {
                min_lat: 29.52,
                max_lat: 30.15,
                min_lng: -95.95,
                max_lng: -95.01,
            },
            county: Some("Harris".to_string()),
            city: Some("Houston".to_string()),
            primary: true,
        },
    ]
}
