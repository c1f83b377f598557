//! Track serialization to interchange formats
//!
//! Every writer is a pure function of the [`TrackedRoute`]: the same track always
//! yields the same bytes.

use crate::route::TrackedRoute;
use crate::Result;
use gpx::{Gpx, GpxVersion, Metadata, Track, TrackSegment, Waypoint};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;

const CREATOR: &str = concat!("map-facade-lib ", env!("CARGO_PKG_VERSION"));

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Gpx,
    Kml,
    GeoJson,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Gpx, ExportFormat::Kml, ExportFormat::GeoJson];

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Gpx => "gpx",
            ExportFormat::Kml => "kml",
            ExportFormat::GeoJson => "geojson",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Gpx => "application/gpx+xml",
            ExportFormat::Kml => "application/vnd.google-earth.kml+xml",
            ExportFormat::GeoJson => "application/geo+json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown export format `{0}` (expected gpx, kml or geojson)")]
pub struct UnknownFormat(pub String);

impl FromStr for ExportFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpx" => Ok(ExportFormat::Gpx),
            "kml" => Ok(ExportFormat::Kml),
            "geojson" | "json" => Ok(ExportFormat::GeoJson),
            other => Err(UnknownFormat(other.to_string())),
        }
    }
}

/// A serialized track ready to be written or downloaded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportPayload {
    pub format: ExportFormat,
    pub mime_type: &'static str,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Serialize `track` into `format`
pub fn export_track(track: &TrackedRoute, format: ExportFormat) -> Result<ExportPayload> {
    #[cfg(feature = "profiling")]
    profiling::scope!("export_track");
    let bytes = match format {
        ExportFormat::Gpx => to_gpx(track)?,
        ExportFormat::Kml => to_kml(track)?.into_bytes(),
        ExportFormat::GeoJson => to_geojson(track)?.into_bytes(),
    };
    tracing::debug!(id = %track.id, %format, size = bytes.len(), "track exported");
    Ok(ExportPayload {
        format,
        mime_type: format.mime_type(),
        file_name: format!("{}.{}", track.id, format.extension()),
        bytes,
    })
}

fn rfc3339(t: time::OffsetDateTime) -> Result<String> {
    Ok(t.format(&Rfc3339)?)
}

// === GeoJSON ===

#[derive(Serialize)]
struct Feature<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    properties: FeatureProperties<'a>,
    geometry: LineString,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeatureProperties<'a> {
    id: &'a str,
    start_time: String,
    end_time: String,
    distance: f64,
}

#[derive(Serialize)]
struct LineString {
    #[serde(rename = "type")]
    kind: &'static str,
    coordinates: Vec<[f64; 2]>,
}

/// One `Feature` with a `LineString` in `[lon, lat]` order
pub fn to_geojson(track: &TrackedRoute) -> Result<String> {
    let feature = Feature {
        kind: "Feature",
        properties: FeatureProperties {
            id: &track.id,
            start_time: rfc3339(track.start_time)?,
            end_time: rfc3339(track.end_time)?,
            distance: track.distance,
        },
        geometry: LineString {
            kind: "LineString",
            coordinates: track.points.iter().map(|p| [p.lon, p.lat]).collect(),
        },
    };
    Ok(serde_json::to_string_pretty(&feature)?)
}

// === GPX ===

/// GPX 1.1 with one track and one segment
pub fn to_gpx(track: &TrackedRoute) -> Result<Vec<u8>> {
    let mut segment = TrackSegment::default();
    segment.points = track
        .points
        .iter()
        .map(|p| Waypoint::new(geo::Point::new(p.lon, p.lat)))
        .collect();

    let mut trk = Track::default();
    trk.name = Some(format!("Tracked route {}", track.id));
    trk.segments.push(segment);

    let mut metadata = Metadata::default();
    metadata.time = Some(track.start_time.into());

    let gpx = Gpx {
        version: GpxVersion::Gpx11,
        creator: Some(CREATOR.to_string()),
        metadata: Some(metadata),
        tracks: vec![trk],
        ..Default::default()
    };

    let mut bytes = Vec::new();
    gpx::write(&gpx, &mut bytes)?;
    Ok(bytes)
}

// === KML ===

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// KML 2.2 document with a single `LineString` placemark
pub fn to_kml(track: &TrackedRoute) -> Result<String> {
    let coordinates = track
        .points
        .iter()
        .map(|p| format!("{},{},0", p.lon, p.lat))
        .collect::<Vec<_>>()
        .join(" ");
    let name = xml_escape(&format!("Track {}", track.id));
    let description = xml_escape(&format!(
        "{:.2} km, {} to {}",
        track.distance_km(),
        rfc3339(track.start_time)?,
        rfc3339(track.end_time)?
    ));

    Ok(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <name>{name}</name>
    <Placemark>
      <name>{name}</name>
      <description>{description}</description>
      <LineString>
        <tessellate>1</tessellate>
        <coordinates>{coordinates}</coordinates>
      </LineString>
    </Placemark>
  </Document>
</kml>
"#
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::TrackPoint;
    use time::macros::datetime;

    fn track(id: &str) -> TrackedRoute {
        TrackedRoute::from_points(
            id,
            vec![
                TrackPoint::new(55.70, 37.60, Some(10.0)),
                TrackPoint::new(55.70, 37.6002, Some(8.0)),
                TrackPoint::new(55.7004, 37.6006, None),
            ],
            datetime!(2024-05-01 10:00:00 UTC),
            datetime!(2024-05-01 10:15:00 UTC),
        )
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("GPX".parse::<ExportFormat>().unwrap(), ExportFormat::Gpx);
        assert_eq!("geojson".parse::<ExportFormat>().unwrap(), ExportFormat::GeoJson);
        assert!("shp".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_geojson_uses_lon_lat() {
        let json: serde_json::Value =
            serde_json::from_str(&to_geojson(&track("t1")).unwrap()).unwrap();
        assert_eq!(json["type"], "Feature");
        assert_eq!(json["geometry"]["type"], "LineString");
        assert_eq!(json["geometry"]["coordinates"][0][0], 37.60);
        assert_eq!(json["geometry"]["coordinates"][0][1], 55.70);
        assert_eq!(json["geometry"]["coordinates"].as_array().unwrap().len(), 3);
        assert_eq!(json["properties"]["id"], "t1");
        assert_eq!(json["properties"]["startTime"], "2024-05-01T10:00:00Z");
    }

    #[test]
    fn test_gpx_preserves_points() {
        let route = track("t2");
        let bytes = to_gpx(&route).unwrap();
        let parsed = gpx::read(bytes.as_slice()).unwrap();
        assert_eq!(parsed.version, GpxVersion::Gpx11);
        assert_eq!(parsed.tracks.len(), 1);
        assert_eq!(parsed.tracks[0].name.as_deref(), Some("Tracked route t2"));
        let points = &parsed.tracks[0].segments[0].points;
        assert_eq!(points.len(), route.points.len());
        for (wp, tp) in points.iter().zip(&route.points) {
            assert_eq!(wp.point().y(), tp.lat);
            assert_eq!(wp.point().x(), tp.lon);
        }
    }

    #[test]
    fn test_kml_escapes_and_orders() {
        let kml = to_kml(&track("a<b&c")).unwrap();
        assert!(kml.contains("<name>Track a&lt;b&amp;c</name>"));
        assert!(kml.contains("<coordinates>37.6,55.7,0 37.6002,55.7,0 37.6006,55.7004,0</coordinates>"));
    }

    #[test]
    fn test_payload_is_deterministic() {
        let route = track("t3");
        for format in ExportFormat::ALL {
            let a = export_track(&route, format).unwrap();
            let b = export_track(&route, format).unwrap();
            assert_eq!(a, b);
            assert_eq!(a.file_name, format!("t3.{}", format.extension()));
            assert_eq!(a.mime_type, format.mime_type());
        }
    }
}
