// Labeling interfaces offered when a project is created. Each one is a fixed
// Label Studio XML config with a single "drone" label.

use std::fmt;

const LABEL_VALUE: &str = "drone";
const LABEL_COLOR: &str = "#002aff";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelSchema {
    Brush,
    Rectangle,
    Polygon,
}

impl LabelSchema {
    pub const ALL: [LabelSchema; 3] = [
        LabelSchema::Brush,
        LabelSchema::Rectangle,
        LabelSchema::Polygon,
    ];

    /// Name of the Label Studio control tag for this schema.
    fn control_tag(self) -> &'static str {
        match self {
            LabelSchema::Brush => "BrushLabels",
            LabelSchema::Rectangle => "RectangleLabels",
            LabelSchema::Polygon => "PolygonLabels",
        }
    }

    pub fn label_config(self) -> String {
        let tag = self.control_tag();
        format!(
            r##"<View>
  <Image name="image" value="$image" zoom="true"/>
  <{tag} name="tag" toName="image">
    <Label value="{value}" background="{color}"/>
  </{tag}>
</View>"##,
            value = LABEL_VALUE,
            color = LABEL_COLOR,
        )
    }
}

impl fmt::Display for LabelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LabelSchema::Brush => "Brush",
            LabelSchema::Rectangle => "Rectangle",
            LabelSchema::Polygon => "Polygon",
        };
        f.write_str(name)
    }
}
