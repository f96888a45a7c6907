//! ImageJ ROI outlines to GeoJSON polygon features.

use super::{EntryTransform, ImagejRoi, TransformError};

/// Converts `{frame}-{cellId}.roi` entries into `{frame}-{cellId}.json` features.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoiToGeoJson;

impl RoiToGeoJson {
    pub fn feature(roi: &ImagejRoi, frame: i64, cell_id: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "Feature",
            "bbox": [roi.left, roi.bottom, roi.right, roi.top],
            "geometry": {
                "type": "Polygon",
                "coordinates": [roi.coordinates.closed_ring()],
            },
            "properties": {
                "id": cell_id,
                "frame": frame,
            },
        })
    }
}

impl EntryTransform for RoiToGeoJson {
    fn name(&self) -> &'static str {
        "roi_to_geojson"
    }

    fn apply(&self, contents: Vec<u8>, name: &str) -> Result<(Vec<u8>, String), TransformError> {
        let (frame, cell_id) = parse_frame_and_id(name)?;
        let roi = ImagejRoi::from_bytes(&contents)?;
        let feature = Self::feature(&roi, frame, cell_id);
        let data = serde_json::to_vec(&feature)
            .map_err(|e| TransformError::new(format!("failed to encode feature: {e}")))?;

        let renamed = match name.strip_suffix(".roi") {
            Some(stem) => format!("{stem}.json"),
            None => name.to_string(),
        };
        Ok((data, renamed))
    }
}

/// `"12-7.roi"` → `(12, "7")`.
fn parse_frame_and_id(name: &str) -> Result<(i64, &str), TransformError> {
    let (frame, rest) = name
        .split_once('-')
        .ok_or_else(|| TransformError::new(format!("'{name}' is not named {{frame}}-{{id}}.roi")))?;
    let frame = frame
        .parse::<i64>()
        .map_err(|_| TransformError::new(format!("invalid frame '{frame}' in '{name}'")))?;
    let id = rest.split(['-', '.']).next().unwrap_or(rest);
    Ok((frame, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::encode_polygon;

    #[test]
    fn rectangle_roi_becomes_closed_polygon_feature() {
        let roi = encode_polygon(&[(10, 20), (30, 20), (30, 40), (10, 40)]);
        let (bytes, name) = RoiToGeoJson.apply(roi, "12-7.roi").unwrap();

        assert_eq!(name, "12-7.json");
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["type"], "Feature");
        assert_eq!(doc["properties"]["frame"], 12);
        assert_eq!(doc["properties"]["id"], "7");
        assert_eq!(doc["bbox"], serde_json::json!([10, 40, 30, 20]));
        assert_eq!(doc["geometry"]["type"], "Polygon");

        let ring = doc["geometry"]["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
        assert_eq!(ring[0], serde_json::json!([10, 20]));
    }

    #[test]
    fn non_roi_names_keep_their_extension() {
        let roi = encode_polygon(&[(0, 0), (2, 0), (2, 2)]);
        let (_, name) = RoiToGeoJson.apply(roi, "3-44.dat").unwrap();
        assert_eq!(name, "3-44.dat");
    }

    #[test]
    fn parses_frame_and_id() {
        assert_eq!(parse_frame_and_id("12-7.roi").unwrap(), (12, "7"));
        assert_eq!(parse_frame_and_id("0-abc.roi").unwrap(), (0, "abc"));
    }

    #[test]
    fn bad_names_fail_with_message() {
        let roi = encode_polygon(&[(0, 0), (2, 0), (2, 2)]);
        let err = RoiToGeoJson.apply(roi.clone(), "cell.roi").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"'cell.roi' is not named {frame}-{id}.roi");

        let err = RoiToGeoJson.apply(roi, "x-7.roi").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"invalid frame 'x' in 'x-7.roi'");
    }

    #[test]
    fn corrupt_roi_fails() {
        assert!(RoiToGeoJson.apply(b"garbage".to_vec(), "1-2.roi").is_err());
    }
}
