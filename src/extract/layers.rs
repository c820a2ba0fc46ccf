use crate::sinks::{ColumnType, FieldSpec, GeometryType, LayerSchema};

/// Output layers known to the feature extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Places,
    Peaks,
    Waterway,
    Roads,
    Railways,
    Boundaries,
    Water,
}

impl Layer {
    /// Way layers in the order they are tried; the first match wins.
    pub const WAY_PRIORITY: [Layer; 4] = [
        Layer::Waterway,
        Layer::Roads,
        Layer::Railways,
        Layer::Boundaries,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Layer::Places => "places",
            Layer::Peaks => "peaks",
            Layer::Waterway => "waterway",
            Layer::Roads => "roads",
            Layer::Railways => "railways",
            Layer::Boundaries => "boundaries",
            Layer::Water => "water",
        }
    }

    pub fn schema(self) -> LayerSchema {
        use ColumnType::{Integer, Real, String};

        let id = ("id", Real, 10);
        let (geometry_type, fields): (GeometryType, Vec<(&str, ColumnType, usize)>) = match self {
            Layer::Places => (
                GeometryType::Point,
                vec![id, ("type", String, 32), ("name", String, 32)],
            ),
            Layer::Peaks => (
                GeometryType::Point,
                vec![
                    id,
                    ("type", String, 32),
                    ("name", String, 32),
                    ("importance", String, 32),
                    ("ele", String, 12),
                ],
            ),
            Layer::Waterway => (
                GeometryType::LineString,
                vec![
                    id,
                    ("name", String, 30),
                    ("type", String, 30),
                    ("rsystem", String, 30),
                ],
            ),
            Layer::Roads => (
                GeometryType::LineString,
                vec![
                    id,
                    ("type", String, 32),
                    ("name", String, 32),
                    ("ref", String, 16),
                ],
            ),
            Layer::Railways => (GeometryType::LineString, vec![id]),
            Layer::Boundaries => (GeometryType::LineString, vec![id, ("level", Integer, 4)]),
            Layer::Water => (
                GeometryType::MultiPolygon,
                vec![id, ("type", String, 32), ("name", String, 32)],
            ),
        };

        LayerSchema {
            name: self.name().to_string(),
            geometry_type,
            fields: fields
                .into_iter()
                .map(|(name, col_type, width)| FieldSpec::new(name, col_type, width))
                .collect(),
        }
    }
}

/// Layer selection of one converter tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Places and peaks from nodes, motorways, railways and boundaries from ways.
    Basemap,
    /// `natural=water` areas.
    Water,
    /// Waterway lines with river system names.
    Rivers,
}

impl Profile {
    pub fn layers(self) -> &'static [Layer] {
        match self {
            Profile::Basemap => &[
                Layer::Places,
                Layer::Peaks,
                Layer::Roads,
                Layer::Railways,
                Layer::Boundaries,
            ],
            Profile::Water => &[Layer::Water],
            Profile::Rivers => &[Layer::Waterway],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peaks_schema_lists_fields_in_order() {
        let schema = Layer::Peaks.schema();
        let names: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "type", "name", "importance", "ele"]);
        assert_eq!(schema.fields[4].width, 12);
        assert_eq!(schema.geometry_type, GeometryType::Point);
    }

    #[test]
    fn boundary_level_is_an_integer_field() {
        let schema = Layer::Boundaries.schema();
        assert_eq!(schema.fields[1], FieldSpec::new("level", ColumnType::Integer, 4));
    }

    #[test]
    fn water_layer_is_multipolygon() {
        assert_eq!(Layer::Water.schema().geometry_type, GeometryType::MultiPolygon);
        assert_eq!(Profile::Water.layers(), &[Layer::Water]);
    }
}
