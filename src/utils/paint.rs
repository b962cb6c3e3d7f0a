use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::indexed;

/// Unpacked RGBA channels from a 7TV packed color integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// Decode a packed 32-bit color. Bits 24-31 are red, 16-23 green, 8-15 blue,
/// 0-7 alpha. The cosmetics API hands these out as signed integers, so the
/// value is reinterpreted as unsigned before shifting.
pub fn unpack_color(packed: i32) -> Rgba {
    let bits = packed as u32;
    Rgba {
        r: ((bits >> 24) & 0xFF) as u8,
        g: ((bits >> 16) & 0xFF) as u8,
        b: ((bits >> 8) & 0xFF) as u8,
        a: (bits & 0xFF) as u8,
    }
}

impl Rgba {
    /// CSS `rgba(...)` string with alpha scaled to 0..1, two decimals.
    pub fn to_css_rgba(&self) -> String {
        let alpha = ((self.a as f64 / 255.0) * 100.0).round() / 100.0;
        format!("rgba({}, {}, {}, {})", self.r, self.g, self.b, alpha)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientVector {
    pub start: GradientPoint,
    pub end: GradientPoint,
}

/// Map a CSS gradient angle (0° = bottom to top, clockwise positive) onto
/// rectangle-relative start/end points in [0,1]x[0,1]. The renderer draws
/// from `start` towards `end` across the username's bounding box.
pub fn angle_to_unit_vector(angle_degrees: f64) -> GradientVector {
    let radians = (angle_degrees - 90.0).to_radians();
    let dx = radians.cos();
    let dy = radians.sin();

    let clamp = |v: f64| v.clamp(0.0, 1.0);

    GradientVector {
        start: GradientPoint {
            x: clamp(0.5 - dx / 2.0),
            y: clamp(0.5 - dy / 2.0),
        },
        end: GradientPoint {
            x: clamp(0.5 + dx / 2.0),
            y: clamp(0.5 + dy / 2.0),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaintFunction {
    LinearGradient,
    RadialGradient,
    Url,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaintStop {
    pub at: f64,
    pub color: i32,
}

/// A 7TV cosmetic paint as delivered by the cosmetics endpoint, already
/// narrowed to the fields the gradient builder needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paint {
    pub id: String,
    pub name: String,
    pub function: PaintFunction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub angle: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    #[serde(default)]
    pub stops: Vec<PaintStop>,
}

impl Paint {
    /// Parse the `stops` field of a raw paint object, which arrives either
    /// as a JSON array or as an indexed collection.
    pub fn stops_from_value(value: &Value) -> Vec<PaintStop> {
        let raw: Vec<Value> = if let Some(array) = value.as_array() {
            array.clone()
        } else if indexed::is_indexed_collection(value) {
            indexed::to_array(value)
        } else {
            return Vec::new();
        };

        raw.iter()
            .filter_map(|stop| {
                let at = stop.get("at").and_then(|v| v.as_f64())?;
                let color = stop.get("color").and_then(|v| v.as_i64())? as i32;
                Some(PaintStop { at, color })
            })
            .collect()
    }
}

/// Renderer-ready gradient: parallel color/location arrays plus the
/// start/end vector. Radial paints keep the vector but the renderer uses a
/// fixed center instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gradient {
    pub colors: Vec<String>,
    pub locations: Vec<f64>,
    pub start: GradientPoint,
    pub end: GradientPoint,
}

fn solid_gradient(css_color: String, vector: GradientVector) -> Gradient {
    Gradient {
        colors: vec![css_color.clone(), css_color],
        locations: vec![0.0, 1.0],
        start: vector.start,
        end: vector.end,
    }
}

/// Build a renderable gradient from a paint. URL paints and paints with no
/// stops degrade to a solid two-stop gradient from the paint color (or the
/// caller's fallback); a single stop is duplicated the same way.
pub fn build_gradient(paint: &Paint, fallback_color: &str) -> Gradient {
    let vector = angle_to_unit_vector(paint.angle.unwrap_or(0.0));

    let base_color = paint
        .color
        .map(|packed| unpack_color(packed).to_css_rgba())
        .unwrap_or_else(|| fallback_color.to_string());

    if paint.function == PaintFunction::Url || paint.stops.is_empty() {
        return solid_gradient(base_color, vector);
    }

    if paint.stops.len() == 1 {
        let only = unpack_color(paint.stops[0].color).to_css_rgba();
        return solid_gradient(only, vector);
    }

    let mut stops = paint.stops.clone();
    stops.sort_by(|a, b| a.at.partial_cmp(&b.at).unwrap_or(std::cmp::Ordering::Equal));

    Gradient {
        colors: stops
            .iter()
            .map(|stop| unpack_color(stop.color).to_css_rgba())
            .collect(),
        locations: stops.iter().map(|stop| stop.at).collect(),
        start: vector.start,
        end: vector.end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_point(point: GradientPoint, x: f64, y: f64) {
        assert!((point.x - x).abs() < 1e-9, "x: {} vs {}", point.x, x);
        assert!((point.y - y).abs() < 1e-9, "y: {} vs {}", point.y, y);
    }

    #[test]
    fn test_unpack_color() {
        let color = unpack_color(0x11223344);
        assert_eq!(color, Rgba { r: 0x11, g: 0x22, b: 0x33, a: 0x44 });

        // Negative input is treated as its unsigned bit pattern.
        let white = unpack_color(-1);
        assert_eq!(white, Rgba { r: 255, g: 255, b: 255, a: 255 });
    }

    #[test]
    fn test_to_css_rgba() {
        assert_eq!(
            Rgba { r: 255, g: 128, b: 0, a: 255 }.to_css_rgba(),
            "rgba(255, 128, 0, 1)"
        );
        assert_eq!(
            Rgba { r: 0, g: 0, b: 0, a: 128 }.to_css_rgba(),
            "rgba(0, 0, 0, 0.5)"
        );
    }

    #[test]
    fn test_angle_cardinals() {
        let up = angle_to_unit_vector(0.0);
        assert_point(up.start, 0.5, 1.0);
        assert_point(up.end, 0.5, 0.0);

        let right = angle_to_unit_vector(90.0);
        assert_point(right.start, 0.0, 0.5);
        assert_point(right.end, 1.0, 0.5);

        let down = angle_to_unit_vector(180.0);
        assert_point(down.start, 0.5, 0.0);
        assert_point(down.end, 0.5, 1.0);

        let left = angle_to_unit_vector(270.0);
        assert_point(left.start, 1.0, 0.5);
        assert_point(left.end, 0.0, 0.5);
    }

    #[test]
    fn test_angle_bounds() {
        for angle in [0.0, 37.0, 45.0, 135.0, 212.5, 300.0, 359.0] {
            let v = angle_to_unit_vector(angle);
            for point in [v.start, v.end] {
                assert!((0.0..=1.0).contains(&point.x));
                assert!((0.0..=1.0).contains(&point.y));
            }
            assert!(v.start != v.end, "degenerate vector at {}", angle);
        }
    }

    fn test_paint(function: PaintFunction, stops: Vec<PaintStop>) -> Paint {
        Paint {
            id: "p1".to_string(),
            name: "Test".to_string(),
            function,
            color: Some(0x11223344),
            angle: Some(90.0),
            shape: None,
            stops,
        }
    }

    #[test]
    fn test_build_gradient_url_is_solid() {
        let paint = test_paint(PaintFunction::Url, vec![]);
        let gradient = build_gradient(&paint, "rgba(0, 0, 0, 1)");
        assert_eq!(gradient.colors.len(), 2);
        assert_eq!(gradient.colors[0], gradient.colors[1]);
        assert_eq!(gradient.locations, vec![0.0, 1.0]);
    }

    #[test]
    fn test_build_gradient_no_stops_uses_fallback() {
        let mut paint = test_paint(PaintFunction::LinearGradient, vec![]);
        paint.color = None;
        let gradient = build_gradient(&paint, "rgba(1, 2, 3, 1)");
        assert_eq!(gradient.colors, vec!["rgba(1, 2, 3, 1)", "rgba(1, 2, 3, 1)"]);
    }

    #[test]
    fn test_build_gradient_single_stop_duplicated() {
        let paint = test_paint(
            PaintFunction::LinearGradient,
            vec![PaintStop { at: 0.5, color: -1 }],
        );
        let gradient = build_gradient(&paint, "rgba(0, 0, 0, 1)");
        assert_eq!(gradient.colors, vec!["rgba(255, 255, 255, 1)"; 2]);
    }

    #[test]
    fn test_build_gradient_sorts_stops() {
        let paint = test_paint(
            PaintFunction::LinearGradient,
            vec![
                PaintStop { at: 1.0, color: -1 },
                PaintStop { at: 0.0, color: 0x000000FF },
            ],
        );
        let gradient = build_gradient(&paint, "rgba(0, 0, 0, 1)");
        assert_eq!(gradient.locations, vec![0.0, 1.0]);
        assert_eq!(gradient.colors[0], "rgba(0, 0, 0, 1)");
        assert_eq!(gradient.colors[1], "rgba(255, 255, 255, 1)");
    }

    #[test]
    fn test_stops_from_indexed_collection() {
        let value = serde_json::json!({
            "0": {"at": 0.0, "color": -1},
            "1": {"at": 1.0, "color": 255},
            "length": 2
        });
        let stops = Paint::stops_from_value(&value);
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[1].color, 255);
    }
}
