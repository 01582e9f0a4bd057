//! Vector features handed to the rasterizer.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, FixedOffset, NaiveDate};
use geo_types::Geometry;

use crate::spec::Crs;

/// Column type of a [`FeatureTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Real,
    String,
    Date,
    DateTime,
}

impl FieldKind {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldKind::Integer | FieldKind::Real)
    }
}

impl Display for FieldKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Integer => "integer",
            FieldKind::Real => "real",
            FieldKind::String => "string",
            FieldKind::Date => "date",
            FieldKind::DateTime => "datetime",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    IntegerValue(i64),
    RealValue(f64),
    StringValue(String),
    DateValue(NaiveDate),
    DateTimeValue(DateTime<FixedOffset>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::IntegerValue(_) => FieldKind::Integer,
            FieldValue::RealValue(_) => FieldKind::Real,
            FieldValue::StringValue(_) => FieldKind::String,
            FieldValue::DateValue(_) => FieldKind::Date,
            FieldValue::DateTimeValue(_) => FieldKind::DateTime,
        }
    }

    /// Interpret the value as a number, if it is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::IntegerValue(v) => Some(*v as f64),
            FieldValue::RealValue(v) => Some(*v),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            FieldValue::StringValue(rv) => Some(rv),
            _ => None,
        }
    }

    pub fn into_date(self) -> Option<NaiveDate> {
        match self {
            FieldValue::DateValue(rv) => Some(rv),
            FieldValue::DateTimeValue(rv) => Some(rv.date_naive()),
            _ => None,
        }
    }
}

/// A single feature: a geometry plus its attribute values. Missing keys are
/// null values.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Feature {
    pub fn new(geometry: impl Into<Geometry<f64>>) -> Self {
        Feature {
            geometry: geometry.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// The features of one vector layer, with the layer's CRS and schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    pub crs: Option<Crs>,
    pub columns: Vec<(String, FieldKind)>,
    pub features: Vec<Feature>,
}

impl FeatureTable {
    pub fn new(crs: Option<Crs>) -> Self {
        FeatureTable {
            crs,
            ..Default::default()
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.columns.push((name.into(), kind));
        self
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.push(feature);
        self
    }

    pub fn column(&self, name: &str) -> Option<FieldKind> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, kind)| *kind)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}
