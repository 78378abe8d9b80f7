//! Canonical CCN service-area queries
//!
//! The registry of Certificate of Convenience and Necessity holders is
//! seeded into `ccn_service_areas` out of band. Lookup is a bounding-box
//! containment query; CCN polygons are stored pre-flattened to their boxes,
//! which over-matches slightly and is acceptable because the CCN tier's
//! answer still carries its own confidence.

use geofact_common::geo::LatLng;
use sqlx::{Row, SqlitePool};

/// One CCN service-area row
#[derive(Debug, Clone)]
pub struct CcnServiceArea {
    pub id: String,
    pub utility_name: String,
    pub ccn_number: Option<String>,
    /// "water" or "sewer"
    pub service_type: String,
    pub status: Option<String>,
    pub contact_phone: Option<String>,
}

/// Service areas whose box contains the point, filtered by service type
pub async fn areas_containing(
    pool: &SqlitePool,
    point: &LatLng,
    service_type: &str,
) -> sqlx::Result<Vec<CcnServiceArea>> {
    let rows = sqlx::query(
        r#"
        SELECT id, utility_name, ccn_number, service_type, status, contact_phone
        FROM ccn_service_areas
        WHERE service_type = ?1
          AND ?2 BETWEEN min_lat AND max_lat
          AND ?3 BETWEEN min_lng AND max_lng
        ORDER BY utility_name
        "#,
    )
    .bind(service_type)
    .bind(point.lat)
    .bind(point.lng)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| CcnServiceArea {
            id: row.get("id"),
            utility_name: row.get("utility_name"),
            ccn_number: row.get("ccn_number"),
            service_type: row.get("service_type"),
            status: row.get("status"),
            contact_phone: row.get("contact_phone"),
        })
        .collect())
}

/// Insert one service area (seeding and tests)
#[allow(clippy::too_many_arguments)]
pub async fn insert_area(
    pool: &SqlitePool,
    id: &str,
    utility_name: &str,
    ccn_number: Option<&str>,
    service_type: &str,
    bbox: (f64, f64, f64, f64),
    status: Option<&str>,
    contact_phone: Option<&str>,
) -> sqlx::Result<()> {
    let (min_lat, max_lat, min_lng, max_lng) = bbox;
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO ccn_service_areas
            (id, utility_name, ccn_number, service_type,
             min_lat, max_lat, min_lng, max_lng, status, contact_phone)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(id)
    .bind(utility_name)
    .bind(ccn_number)
    .bind(service_type)
    .bind(min_lat)
    .bind(max_lat)
    .bind(min_lng)
    .bind(max_lng)
    .bind(status)
    .bind(contact_phone)
    .execute(pool)
    .await?;
    Ok(())
}
