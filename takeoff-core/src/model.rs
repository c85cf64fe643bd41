use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::recompute::coerce_f64;

/// Floor height offered when wall-area mode is picked without one (metres)
pub const DEFAULT_WALL_HEIGHT: f64 = 3.0;

/// What the takeoff measures for every row
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalcMode {
    /// Plan area: length x width
    #[default]
    Area,
    /// Perimeter: the first dimension is the perimeter itself
    Perimeter,
    /// Vertical wall surface: perimeter x floor height
    WallArea {
        #[serde(default = "default_wall_height", deserialize_with = "wall_height")]
        height: f64,
    },
}

fn default_wall_height() -> f64 {
    DEFAULT_WALL_HEIGHT
}

fn wall_height<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(sanitise_height(coerce_f64(&value)))
}

/// Negative or non-finite heights become 0.0
pub(crate) fn sanitise_height(height: f64) -> f64 {
    if height.is_finite() && height > 0.0 {
        height
    } else {
        0.0
    }
}

impl CalcMode {
    /// Wall-area mode with a sanitised height (negative or non-finite becomes 0.0)
    pub fn wall_area(height: f64) -> Self {
        CalcMode::WallArea {
            height: sanitise_height(height),
        }
    }

    /// Resolve a mode from its short name (`area`, `perimeter`, `wall-area`)
    pub fn from_name(name: &str, height: Option<f64>) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "area" => Some(CalcMode::Area),
            "perimeter" => Some(CalcMode::Perimeter),
            "wall-area" | "wall" => Some(Self::wall_area(height.unwrap_or(DEFAULT_WALL_HEIGHT))),
            _ => None,
        }
    }

    pub fn unit(&self) -> Unit {
        match self {
            CalcMode::Area | CalcMode::WallArea { .. } => Unit::SquareMetre,
            CalcMode::Perimeter => Unit::Metre,
        }
    }

    pub fn label(&self) -> String {
        match self {
            CalcMode::Area => "Area".to_string(),
            CalcMode::Perimeter => "Perimeter".to_string(),
            CalcMode::WallArea { height } => format!("Wall area (h={:.2} m)", height),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "m")]
    Metre,
    #[serde(rename = "m2")]
    SquareMetre,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Metre => "m",
            Unit::SquareMetre => "m2",
        }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One editable row: a label and the two dimensions the engine works from.
///
/// Dimensions are read leniently: numbers, numeric strings ("12.5", "1,200 m")
/// and anything else (which becomes 0.0) are all accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowInput {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub dim1: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub dim2: f64,
}

impl RowInput {
    pub fn new(label: impl Into<String>, dim1: f64, dim2: f64) -> Self {
        Self {
            label: label.into(),
            description: String::new(),
            dim1,
            dim2,
        }
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_f64(&value))
}

/// A row as read back from the model, before recomputation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyRow {
    pub input: RowInput,
    /// The figure the model itself reported, if any
    pub reported_result: Option<f64>,
}

/// A computed row of the takeoff table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeoffRow {
    pub label: String,
    pub description: String,
    pub dim1: f64,
    pub dim2: f64,
    pub formula: String,
    pub result: f64,
    pub unit: Unit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_result: Option<f64>,
}

impl TakeoffRow {
    pub fn to_input(&self) -> RowInput {
        RowInput {
            label: self.label.clone(),
            description: self.description.clone(),
            dim1: self.dim1,
            dim2: self.dim2,
        }
    }
}

/// The ordered takeoff table with its grand total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeoffTable {
    pub mode: CalcMode,
    pub rows: Vec<TakeoffRow>,
    pub total: f64,
    pub unit: Unit,
}

impl TakeoffTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn inputs(&self) -> Vec<RowInput> {
        self.rows.iter().map(TakeoffRow::to_input).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_units() {
        assert_eq!(CalcMode::Area.unit(), Unit::SquareMetre);
        assert_eq!(CalcMode::Perimeter.unit(), Unit::Metre);
        assert_eq!(CalcMode::wall_area(2.8).unit(), Unit::SquareMetre);
    }

    #[test]
    fn test_mode_from_name() {
        assert_eq!(CalcMode::from_name("Area", None), Some(CalcMode::Area));
        assert_eq!(CalcMode::from_name("perimeter", None), Some(CalcMode::Perimeter));
        assert_eq!(
            CalcMode::from_name("wall_area", None),
            Some(CalcMode::WallArea { height: 3.0 })
        );
        assert_eq!(
            CalcMode::from_name("wall-area", Some(2.5)),
            Some(CalcMode::WallArea { height: 2.5 })
        );
        assert_eq!(CalcMode::from_name("volume", None), None);
    }

    #[test]
    fn test_wall_area_height_sanitised() {
        assert_eq!(CalcMode::wall_area(-1.0), CalcMode::WallArea { height: 0.0 });
        assert_eq!(CalcMode::wall_area(f64::NAN), CalcMode::WallArea { height: 0.0 });
    }

    #[test]
    fn test_mode_serde_shape() {
        let mode: CalcMode = serde_json::from_str(r#"{"kind":"wall_area"}"#).unwrap();
        assert_eq!(mode, CalcMode::WallArea { height: 3.0 });

        let json = serde_json::to_string(&CalcMode::Perimeter).unwrap();
        assert_eq!(json, r#"{"kind":"perimeter"}"#);
    }

    #[test]
    fn test_mode_serde_sanitises_height() {
        let mode: CalcMode = serde_json::from_str(r#"{"kind":"wall_area","height":-2.0}"#).unwrap();
        assert_eq!(mode, CalcMode::WallArea { height: 0.0 });

        let mode: CalcMode = serde_json::from_str(r#"{"kind":"wall_area","height":"2.7 m"}"#).unwrap();
        assert_eq!(mode, CalcMode::WallArea { height: 2.7 });
    }

    #[test]
    fn test_row_input_lenient_dims() {
        let row: RowInput =
            serde_json::from_str(r#"{"label":"A", "dim1":"12.5", "dim2":"n/a"}"#).unwrap();
        assert_eq!(row.dim1, 12.5);
        assert_eq!(row.dim2, 0.0);

        let row: RowInput = serde_json::from_str(r#"{"label":"B", "dim1":null}"#).unwrap();
        assert_eq!(row.dim1, 0.0);
        assert_eq!(row.dim2, 0.0);
    }
}
