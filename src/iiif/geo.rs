//! Georeferencing extension
//!
//! Canvases can carry a set of image-pixel to geographic-coordinate point
//! correspondences (the IIIF georef extension), stored internally in the
//! manifest's `x-geo-annotations` carrier keyed by canvas index and rendered
//! into a `georeferencing` AnnotationPage when the manifest is served.
//! Manifests may also carry a `navPlace` single-point geometry, which is
//! public IIIF vocabulary and serialized as-is.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{KuraError, Result};

/// JSON-LD context for the georef extension, prepended to `@context` when a
/// manifest with geo annotations is served.
pub const GEOREF_CONTEXT: &str = "http://iiif.io/api/extension/georef/1/context.json";

/// JSON-LD context for navPlace
pub const NAVPLACE_CONTEXT: &str = "http://iiif.io/api/extension/navplace/context.json";

/// One control point: a pixel position on the canvas image paired with a
/// geographic position. Both coordinate pairs are mandatory; a point missing
/// either is rejected at the parse boundary and never stored partially.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    /// Caller-supplied identifier, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Image pixel coordinates as [x, y]
    #[serde(rename = "resourceCoords")]
    pub resource_coords: [f64; 2],

    /// Geographic coordinates as [longitude, latitude] (GeoJSON order)
    pub coordinates: [f64; 2],

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Pixel region of interest ("x,y,w,h")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xywh: Option<String>,
}

/// Per-canvas georeferencing record: control points plus the transformation
/// the points parameterize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoAnnotation {
    pub points: Vec<GeoPoint>,

    #[serde(rename = "transformationType", default = "default_transformation_type")]
    pub transformation_type: String,

    #[serde(rename = "transformationOrder", default = "default_transformation_order")]
    pub transformation_order: u32,
}

fn default_transformation_type() -> String {
    "polynomial".to_string()
}

fn default_transformation_order() -> u32 {
    1
}

impl Default for GeoAnnotation {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            transformation_type: default_transformation_type(),
            transformation_order: default_transformation_order(),
        }
    }
}

impl GeoAnnotation {
    /// Build a record from a CSV bulk import with the default polynomial
    /// transformation.
    pub fn from_csv(body: &str) -> Result<Self> {
        Ok(Self {
            points: parse_csv_points(body)?,
            ..Default::default()
        })
    }

    /// Render the served AnnotationPage for this record.
    ///
    /// `canvas_url` is the externally addressable canvas id after locator
    /// rewriting; the page and its FeatureCollection body hang off it.
    pub fn annotation_page(&self, canvas_url: &str) -> Value {
        let features: Vec<Value> = self.points.iter().map(GeoPoint::feature).collect();

        json!({
            "id": format!("{}/annotationPage", canvas_url),
            "type": "AnnotationPage",
            "items": [{
                "id": format!("{}/annotation/georef", canvas_url),
                "type": "Annotation",
                "motivation": "georeferencing",
                "target": canvas_url,
                "body": {
                    "id": format!("{}/feature-collection", canvas_url),
                    "type": "FeatureCollection",
                    "transformation": {
                        "type": self.transformation_type,
                        "options": { "order": self.transformation_order }
                    },
                    "features": features,
                }
            }]
        })
    }
}

impl GeoPoint {
    /// GeoJSON Feature for the served FeatureCollection
    fn feature(&self) -> Value {
        let mut feature = json!({
            "type": "Feature",
            "properties": { "resourceCoords": self.resource_coords },
            "geometry": {
                "type": "Point",
                "coordinates": self.coordinates,
            },
        });

        if let Some(id) = &self.id {
            feature["id"] = json!(id);
        }

        let mut metadata = json!({ "resourceCoords": self.resource_coords });
        if let Some(label) = &self.label {
            metadata["label"] = json!(label);
        }
        if !self.tags.is_empty() {
            metadata["tags"] = json!(self.tags);
        }
        if let Some(url) = &self.url {
            metadata["url"] = json!(url);
        }
        if let Some(xywh) = &self.xywh {
            metadata["xywh"] = json!(xywh);
        }
        feature["metadata"] = metadata;

        feature
    }
}

/// navPlace extension: a single-point FeatureCollection locating the whole
/// object geographically. Extensible to polygons later; only points today.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NavPlace {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Value>,
}

impl NavPlace {
    /// Build a single-point navPlace. `label` becomes a bilingual property.
    pub fn point(latitude: f64, longitude: f64, label: Option<&str>) -> Self {
        let mut properties = json!({});
        if let Some(label) = label {
            properties["label"] = json!({ "ja": [label], "en": [label] });
        }

        Self {
            kind: "FeatureCollection".to_string(),
            features: vec![json!({
                "type": "Feature",
                "properties": properties,
                "geometry": {
                    "type": "Point",
                    "coordinates": [longitude, latitude],
                }
            })],
        }
    }
}

/// Parse one CSV row of a bulk point import.
///
/// Columns: `[id,]x,y,latitude,longitude[,label[,tags[,url[,xywh]]]]`.
/// A 4-field all-numeric row is treated as id-less (`x,y,lat,lng`). Tags are
/// `;`-separated. Rows missing either coordinate pair, or with non-numeric
/// coordinates, are rejected whole.
pub fn parse_csv_point(line: &str) -> Result<GeoPoint> {
    let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();

    let (id, coords): (Option<String>, &[&str]) = match fields.len() {
        0..=3 => {
            return Err(KuraError::BadRequest(format!(
                "Geo point row needs at least x,y,latitude,longitude: {:?}",
                line
            )))
        }
        // Without an id column the row must lead with a numeric x
        4 => (None, &fields[..]),
        _ => {
            let id = fields[0];
            let id = if id.is_empty() {
                None
            } else {
                Some(id.to_string())
            };
            (id, &fields[1..])
        }
    };

    let parse = |name: &str, raw: &str| -> Result<f64> {
        raw.parse::<f64>().map_err(|_| {
            KuraError::BadRequest(format!("Invalid {} coordinate {:?} in geo point row", name, raw))
        })
    };

    let x = parse("x", coords[0])?;
    let y = parse("y", coords[1])?;
    let latitude = parse("latitude", coords[2])?;
    let longitude = parse("longitude", coords[3])?;

    let label = coords.get(4).filter(|s| !s.is_empty()).map(|s| s.to_string());
    let tags = coords
        .get(5)
        .filter(|s| !s.is_empty())
        .map(|s| s.split(';').map(|t| t.trim().to_string()).collect())
        .unwrap_or_default();
    let url = coords.get(6).filter(|s| !s.is_empty()).map(|s| s.to_string());
    // xywh is itself comma-separated ("x,y,w,h"), so it swallows the rest of the row
    let xywh = if coords.len() > 7 {
        let joined = coords[7..].join(",");
        (!joined.is_empty()).then_some(joined)
    } else {
        None
    };

    Ok(GeoPoint {
        id,
        resource_coords: [x, y],
        coordinates: [longitude, latitude],
        label,
        tags,
        url,
        xywh,
    })
}

/// Parse a whole CSV import. A leading header row (`id,x,y,...`) is skipped.
/// Any malformed data row fails the import; partial point sets are never
/// stored.
pub fn parse_csv_points(body: &str) -> Result<Vec<GeoPoint>> {
    let mut points = Vec::new();

    for (i, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if i == 0 && line.to_ascii_lowercase().starts_with("id,") {
            continue;
        }
        points.push(parse_csv_point(line)?);
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_coordinate_row() {
        let point = parse_csv_point("6690,7517,35.7,139.7").unwrap();
        assert_eq!(point.resource_coords, [6690.0, 7517.0]);
        assert_eq!(point.coordinates, [139.7, 35.7]);
        assert!(point.id.is_none());
        assert!(point.label.is_none());
        assert!(point.tags.is_empty());
    }

    #[test]
    fn test_parse_full_row() {
        let point =
            parse_csv_point("p1,100,200,26.21,127.68,首里城,castle;landmark,https://example.org,90,180,40,40")
                .unwrap();
        assert_eq!(point.id.as_deref(), Some("p1"));
        assert_eq!(point.resource_coords, [100.0, 200.0]);
        assert_eq!(point.coordinates, [127.68, 26.21]);
        assert_eq!(point.label.as_deref(), Some("首里城"));
        assert_eq!(point.tags, vec!["castle", "landmark"]);
        assert_eq!(point.url.as_deref(), Some("https://example.org"));
        assert_eq!(point.xywh.as_deref(), Some("90,180,40,40"));
    }

    #[test]
    fn test_parse_row_with_empty_id() {
        let point = parse_csv_point(",6690,7517,35.7,139.7").unwrap();
        assert!(point.id.is_none());
        assert_eq!(point.resource_coords, [6690.0, 7517.0]);
    }

    #[test]
    fn test_missing_coordinate_pair_rejected() {
        assert!(parse_csv_point("6690,7517").is_err());
        assert!(parse_csv_point("6690,7517,35.7").is_err());
        assert!(parse_csv_point("").is_err());
    }

    #[test]
    fn test_non_numeric_coordinates_rejected() {
        assert!(parse_csv_point("a,b,35.7,139.7").is_err());
        assert!(parse_csv_point("p1,100,200,north,139.7").is_err());
    }

    #[test]
    fn test_bulk_parse_skips_header_and_blank_lines() {
        let body = "id,x,y,latitude,longitude\n\n6690,7517,35.7,139.7\np2,1,2,35.0,139.0\n";
        let points = parse_csv_points(body).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].id.as_deref(), Some("p2"));
    }

    #[test]
    fn test_bulk_parse_rejects_whole_import_on_bad_row() {
        let body = "6690,7517,35.7,139.7\nbroken,row\n";
        assert!(parse_csv_points(body).is_err());
        // Nothing partial: the whole import fails, not just the bad row
        assert!(GeoAnnotation::from_csv(body).is_err());
    }

    #[test]
    fn test_from_csv_defaults_transformation() {
        let annotation = GeoAnnotation::from_csv("6690,7517,35.7,139.7").unwrap();
        assert_eq!(annotation.points.len(), 1);
        assert_eq!(annotation.transformation_type, "polynomial");
        assert_eq!(annotation.transformation_order, 1);
    }

    #[test]
    fn test_annotation_page_rendering() {
        let annotation = GeoAnnotation {
            points: vec![GeoPoint {
                id: Some("p1".to_string()),
                resource_coords: [6690.0, 7517.0],
                coordinates: [139.7, 35.7],
                label: Some("点".to_string()),
                tags: Vec::new(),
                url: None,
                xywh: None,
            }],
            ..Default::default()
        };

        let page = annotation.annotation_page("http://x.test/iiif/3/a_b_c/canvas/1");
        assert_eq!(page["type"], "AnnotationPage");

        let item = &page["items"][0];
        assert_eq!(item["motivation"], "georeferencing");
        assert_eq!(item["body"]["type"], "FeatureCollection");
        assert_eq!(item["body"]["transformation"]["type"], "polynomial");
        assert_eq!(item["body"]["transformation"]["options"]["order"], 1);

        let feature = &item["body"]["features"][0];
        assert_eq!(feature["id"], "p1");
        assert_eq!(feature["geometry"]["coordinates"][0], 139.7);
        assert_eq!(feature["properties"]["resourceCoords"][0], 6690.0);
        assert_eq!(feature["metadata"]["label"], "点");
    }

    #[test]
    fn test_nav_place_point() {
        let place = NavPlace::point(26.21, 127.68, Some("首里"));
        assert_eq!(place.kind, "FeatureCollection");
        let geometry = &place.features[0]["geometry"];
        // GeoJSON order: [longitude, latitude]
        assert_eq!(geometry["coordinates"][0], 127.68);
        assert_eq!(geometry["coordinates"][1], 26.21);
    }
}
