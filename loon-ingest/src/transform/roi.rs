//! Decoder for ImageJ `.roi` region-of-interest files.
//!
//! Header layout (big-endian):
//!
//! | offset | field                  |
//! |--------|------------------------|
//! | 0      | magic `Iout`           |
//! | 4      | version (u16)          |
//! | 6      | roi type (u8)          |
//! | 8..16  | top, left, bottom, right (i16) |
//! | 16     | coordinate count (u16) |
//! | 50     | options (u16)          |
//! | 64     | coordinates            |
//!
//! Integer coordinates are stored as `n` x offsets then `n` y offsets relative
//! to `left`/`top`. With the sub-pixel option, absolute f32 coordinates follow.

use super::TransformError;

const MAGIC: &[u8; 4] = b"Iout";
const HEADER_LEN: usize = 64;
const OPT_SUB_PIXEL: u16 = 128;
const MIN_SUB_PIXEL_VERSION: u16 = 222;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoiType {
    Polygon,
    Rect,
    Oval,
    Line,
    Freeline,
    Polyline,
    NoRoi,
    Freehand,
    Traced,
    Angle,
    Point,
}

impl RoiType {
    fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Polygon,
            1 => Self::Rect,
            2 => Self::Oval,
            3 => Self::Line,
            4 => Self::Freeline,
            5 => Self::Polyline,
            6 => Self::NoRoi,
            7 => Self::Freehand,
            8 => Self::Traced,
            9 => Self::Angle,
            10 => Self::Point,
            _ => return None,
        })
    }

    fn has_coordinates(&self) -> bool {
        matches!(
            self,
            Self::Polygon
                | Self::Freeline
                | Self::Polyline
                | Self::Freehand
                | Self::Traced
                | Self::Angle
                | Self::Point
        )
    }
}

/// Outline points in image space.
#[derive(Debug, Clone, PartialEq)]
pub enum Coordinates {
    Integer(Vec<[i32; 2]>),
    SubPixel(Vec<[f32; 2]>),
}

impl Coordinates {
    pub fn len(&self) -> usize {
        match self {
            Self::Integer(c) => c.len(),
            Self::SubPixel(c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coordinates as JSON pairs, with the first point repeated at the end.
    pub fn closed_ring(&self) -> Vec<serde_json::Value> {
        let mut ring: Vec<serde_json::Value> = match self {
            Self::Integer(c) => c.iter().map(|p| serde_json::json!(p)).collect(),
            Self::SubPixel(c) => c.iter().map(|p| serde_json::json!(p)).collect(),
        };
        if let Some(first) = ring.first().cloned() {
            ring.push(first);
        }
        ring
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagejRoi {
    pub version: u16,
    pub roi_type: RoiType,
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
    pub options: u16,
    pub coordinates: Coordinates,
}

impl ImagejRoi {
    pub fn from_bytes(data: &[u8]) -> Result<Self, TransformError> {
        if data.len() < HEADER_LEN || &data[..4] != MAGIC {
            return Err(TransformError::new("not an ImageJ ROI file"));
        }

        let version = read_u16(data, 4)?;
        let roi_type = RoiType::from_code(data[6])
            .ok_or_else(|| TransformError::new(format!("unknown ROI type {}", data[6])))?;
        let top = read_i16(data, 8)? as i32;
        let left = read_i16(data, 10)? as i32;
        let bottom = read_i16(data, 12)? as i32;
        let right = read_i16(data, 14)? as i32;
        let n = read_u16(data, 16)? as usize;
        let options = read_u16(data, 50)?;

        let coordinates = if roi_type.has_coordinates() {
            if options & OPT_SUB_PIXEL != 0 && version >= MIN_SUB_PIXEL_VERSION {
                let base_x = HEADER_LEN + 4 * n;
                let base_y = base_x + 4 * n;
                let points = (0..n)
                    .map(|i| Ok([read_f32(data, base_x + 4 * i)?, read_f32(data, base_y + 4 * i)?]))
                    .collect::<Result<Vec<_>, TransformError>>()?;
                Coordinates::SubPixel(points)
            } else {
                let base_y = HEADER_LEN + 2 * n;
                let points = (0..n)
                    .map(|i| {
                        let x = read_i16(data, HEADER_LEN + 2 * i)? as i32;
                        let y = read_i16(data, base_y + 2 * i)? as i32;
                        Ok([left + x, top + y])
                    })
                    .collect::<Result<Vec<_>, TransformError>>()?;
                Coordinates::Integer(points)
            }
        } else if roi_type == RoiType::Rect {
            Coordinates::Integer(vec![
                [left, top],
                [right, top],
                [right, bottom],
                [left, bottom],
            ])
        } else {
            return Err(TransformError::new(format!(
                "ROI type {roi_type:?} has no outline coordinates"
            )));
        };

        if coordinates.is_empty() {
            return Err(TransformError::new("ROI has no coordinates"));
        }

        Ok(Self {
            version,
            roi_type,
            top,
            left,
            bottom,
            right,
            options,
            coordinates,
        })
    }
}

fn slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], TransformError> {
    data.get(offset..offset + len)
        .ok_or_else(|| TransformError::new(format!("ROI truncated at byte {offset}")))
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, TransformError> {
    let b = slice(data, offset, 2)?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

fn read_i16(data: &[u8], offset: usize) -> Result<i16, TransformError> {
    let b = slice(data, offset, 2)?;
    Ok(i16::from_be_bytes([b[0], b[1]]))
}

fn read_f32(data: &[u8], offset: usize) -> Result<f32, TransformError> {
    let b = slice(data, offset, 4)?;
    Ok(f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Encode an integer polygon ROI, as ImageJ writes it.
#[cfg(test)]
pub(crate) fn encode_polygon(points: &[(i16, i16)]) -> Vec<u8> {
    let left = points.iter().map(|p| p.0).min().unwrap_or(0);
    let top = points.iter().map(|p| p.1).min().unwrap_or(0);
    let right = points.iter().map(|p| p.0).max().unwrap_or(0);
    let bottom = points.iter().map(|p| p.1).max().unwrap_or(0);

    let mut data = vec![0u8; HEADER_LEN];
    data[..4].copy_from_slice(MAGIC);
    data[4..6].copy_from_slice(&228u16.to_be_bytes());
    data[6] = 0;
    data[8..10].copy_from_slice(&top.to_be_bytes());
    data[10..12].copy_from_slice(&left.to_be_bytes());
    data[12..14].copy_from_slice(&bottom.to_be_bytes());
    data[14..16].copy_from_slice(&right.to_be_bytes());
    data[16..18].copy_from_slice(&(points.len() as u16).to_be_bytes());
    for (x, _) in points {
        data.extend_from_slice(&(x - left).to_be_bytes());
    }
    for (_, y) in points {
        data.extend_from_slice(&(y - top).to_be_bytes());
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_integer_polygon() {
        let data = encode_polygon(&[(10, 20), (30, 20), (30, 40), (10, 40)]);
        let roi = ImagejRoi::from_bytes(&data).unwrap();

        assert_eq!(roi.roi_type, RoiType::Polygon);
        assert_eq!((roi.left, roi.top, roi.right, roi.bottom), (10, 20, 30, 40));
        assert_eq!(
            roi.coordinates,
            Coordinates::Integer(vec![[10, 20], [30, 20], [30, 40], [10, 40]])
        );
    }

    #[test]
    fn decodes_sub_pixel_coordinates() {
        let mut data = encode_polygon(&[(1, 1), (3, 1), (3, 3)]);
        data[50..52].copy_from_slice(&OPT_SUB_PIXEL.to_be_bytes());
        for v in [1.5f32, 3.5, 3.5] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        for v in [1.25f32, 1.25, 3.75] {
            data.extend_from_slice(&v.to_be_bytes());
        }

        let roi = ImagejRoi::from_bytes(&data).unwrap();
        assert_eq!(
            roi.coordinates,
            Coordinates::SubPixel(vec![[1.5, 1.25], [3.5, 1.25], [3.5, 3.75]])
        );
    }

    #[test]
    fn rect_roi_expands_to_corners() {
        let mut data = encode_polygon(&[(5, 6), (15, 16)]);
        data.truncate(HEADER_LEN);
        data[6] = 1;
        data[16..18].copy_from_slice(&0u16.to_be_bytes());

        let roi = ImagejRoi::from_bytes(&data).unwrap();
        assert_eq!(roi.coordinates.len(), 4);
        assert_eq!(roi.coordinates.closed_ring().len(), 5);
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        assert!(ImagejRoi::from_bytes(b"not a roi").is_err());

        let mut data = encode_polygon(&[(0, 0), (4, 0), (4, 4)]);
        data.truncate(HEADER_LEN + 3);
        let err = ImagejRoi::from_bytes(&data).unwrap_err();
        assert!(err.message().contains("truncated"), "{err}");
    }

    #[test]
    fn oval_is_unsupported() {
        let mut data = encode_polygon(&[(0, 0), (4, 4)]);
        data[6] = 2;
        assert!(ImagejRoi::from_bytes(&data).is_err());
    }
}
