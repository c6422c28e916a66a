//! Field descriptors
//!
//! Each attribute of a record type is described by a `FieldDescriptor` with
//! an explicit tagged kind. Dispatch for get/set/validate is static on the
//! tag; calculated kinds carry their computation rule.

use std::fmt;
use std::sync::Arc;

use crate::backends::StorageSpec;
use crate::error::{OrmError, OrmResult};
use crate::record::Record;
use crate::schema::scales::{sort_levels, Level, Scale};
use crate::value::Value;

/// A predicate evaluated against a record.
///
/// Predicates are supplied by the schema author as ordinary closures; they
/// are trusted configuration, not user input.
pub type Predicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// A named computation routine registered on a dataset
pub type MethodFn = Arc<dyn Fn(&Record) -> OrmResult<Value> + Send + Sync>;

/// The kind of a field
#[derive(Clone)]
pub enum FieldKind {
    /// Backend-assigned row identity
    ObjectId,
    /// Globally unique identifier
    GlobalId,
    /// The geometry-like payload column
    Geometry,
    Str,
    Numeric {
        min: Option<f64>,
        max: Option<f64>,
    },
    Blob,
    /// Foreign key referencing the identity of another dataset
    ForeignKey { related: String },
    Calculated(Calculation),
}

/// A calculated field: an optional activation condition, a default returned
/// when inactive, and the computation rule itself.
#[derive(Clone)]
pub struct Calculation {
    pub active_if: Option<Predicate>,
    pub default: Value,
    pub rule: CalcRule,
}

#[derive(Clone)]
pub enum CalcRule {
    /// Delegate to a named routine on the dataset
    Method { name: String },
    /// Weighted sum over dependency fields; any null dependency yields the
    /// default value
    Weights { weights: Vec<(String, f64)> },
    /// Score a source field through the first scale whose condition matches
    Scale {
        options: Vec<ScaleOption>,
        value_field: String,
        use_label: bool,
    },
}

/// One (condition, scale, weight) entry of a scale-calculated field
#[derive(Clone)]
pub struct ScaleOption {
    pub condition: Option<Predicate>,
    pub scale: Scale,
    pub weight: i32,
}

impl ScaleOption {
    pub fn new(scale: Scale) -> Self {
        Self {
            condition: None,
            scale,
            weight: 0,
        }
    }

    pub fn when(mut self, condition: Predicate) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }
}

/// Describes one attribute of a record type
#[derive(Clone)]
pub struct FieldDescriptor {
    /// Logical name used in filters and accessors
    pub name: String,
    /// Human-readable label used in validation messages
    pub label: String,
    /// Column name in the row store; defaults to the logical name
    pub storage_name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub required_if: Option<Predicate>,
    /// Allowed values; filled from the column's domain at registration
    pub choices: Vec<Value>,
    pub domain: Option<String>,
    /// Code/label pairs of the bound domain, filled at registration
    pub coded_values: Option<Vec<(Value, String)>>,
    /// Skip this column on fetch; load on first access instead
    pub deferred: bool,
    /// Explicit ordering key; ties break on declaration order
    pub order: i32,
    pub(crate) creation_index: usize,
    /// Decimal digits kept by the backend, used for change detection
    pub storage_scale: Option<u32>,
    /// Column definition used by `sync_fields` when the column is missing
    pub storage: Option<StorageSpec>,
    /// Whether a storage column was found at registration
    pub(crate) bound: bool,
}

impl FieldDescriptor {
    fn new(name: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            storage_name: name.clone(),
            name,
            label: label.into(),
            kind,
            required: false,
            required_if: None,
            choices: Vec::new(),
            domain: None,
            coded_values: None,
            deferred: false,
            order: 0,
            creation_index: 0,
            storage_scale: None,
            storage: None,
            bound: false,
        }
    }

    pub fn object_id(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, label, FieldKind::ObjectId)
    }

    pub fn global_id(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, label, FieldKind::GlobalId)
    }

    /// Geometry columns are deferred by default to keep fetches small
    pub fn geometry(name: impl Into<String>, label: impl Into<String>) -> Self {
        let mut field = Self::new(name, label, FieldKind::Geometry);
        field.deferred = true;
        field
    }

    pub fn string(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, label, FieldKind::Str)
    }

    pub fn numeric(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, label, FieldKind::Numeric { min: None, max: None })
    }

    /// Blob columns are deferred by default to keep fetches small
    pub fn blob(name: impl Into<String>, label: impl Into<String>) -> Self {
        let mut field = Self::new(name, label, FieldKind::Blob);
        field.deferred = true;
        field
    }

    pub fn foreign_key(
        name: impl Into<String>,
        label: impl Into<String>,
        related: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            label,
            FieldKind::ForeignKey {
                related: related.into(),
            },
        )
    }

    /// A calculated field backed by a named dataset routine
    pub fn method(
        name: impl Into<String>,
        label: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            label,
            FieldKind::Calculated(Calculation {
                active_if: None,
                default: Value::Null,
                rule: CalcRule::Method {
                    name: method_name.into(),
                },
            }),
        )
    }

    /// A calculated field holding a weighted sum of other fields
    pub fn weights<S: Into<String>>(
        name: impl Into<String>,
        label: impl Into<String>,
        weights: Vec<(S, f64)>,
        default: impl Into<Value>,
    ) -> Self {
        Self::new(
            name,
            label,
            FieldKind::Calculated(Calculation {
                active_if: None,
                default: default.into(),
                rule: CalcRule::Weights {
                    weights: weights
                        .into_iter()
                        .map(|(field, weight)| (field.into(), weight))
                        .collect(),
                },
            }),
        )
    }

    /// A calculated field scoring another field through a scale
    pub fn scale(
        name: impl Into<String>,
        label: impl Into<String>,
        scale: Scale,
        value_field: impl Into<String>,
    ) -> Self {
        Self::scale_options(name, label, vec![ScaleOption::new(scale)], value_field)
    }

    /// A calculated field choosing among several conditional scales
    pub fn scale_options(
        name: impl Into<String>,
        label: impl Into<String>,
        options: Vec<ScaleOption>,
        value_field: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            label,
            FieldKind::Calculated(Calculation {
                active_if: None,
                default: Value::Null,
                rule: CalcRule::Scale {
                    options,
                    value_field: value_field.into(),
                    use_label: false,
                },
            }),
        )
    }

    // Builder-style modifiers

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn required_if(mut self, predicate: Predicate) -> Self {
        self.required_if = Some(predicate);
        self
    }

    pub fn with_storage_name(mut self, storage_name: impl Into<String>) -> Self {
        self.storage_name = storage_name.into();
        self
    }

    pub fn with_choices(mut self, choices: Vec<Value>) -> Self {
        self.choices = choices;
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        if let FieldKind::Numeric {
            min: field_min,
            max: field_max,
        } = &mut self.kind
        {
            *field_min = Some(min);
            *field_max = Some(max);
        }
        self
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    pub fn eager(mut self) -> Self {
        self.deferred = false;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_storage_scale(mut self, digits: u32) -> Self {
        self.storage_scale = Some(digits);
        self
    }

    pub fn with_storage(mut self, storage: StorageSpec) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Score values through their domain label instead of the raw value
    pub fn by_label(mut self) -> Self {
        if let FieldKind::Calculated(calc) = &mut self.kind {
            if let CalcRule::Scale { use_label, .. } = &mut calc.rule {
                *use_label = true;
            }
        }
        self
    }

    /// Activation condition and inactive default for a calculated field
    pub fn active_if(mut self, predicate: Predicate, default: impl Into<Value>) -> Self {
        if let FieldKind::Calculated(calc) = &mut self.kind {
            calc.active_if = Some(predicate);
            calc.default = default.into();
        }
        self
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.kind, FieldKind::ObjectId)
    }

    pub fn is_geometry(&self) -> bool {
        matches!(self.kind, FieldKind::Geometry)
    }

    pub fn is_calculated(&self) -> bool {
        matches!(self.kind, FieldKind::Calculated(_))
    }

    pub fn is_relationship(&self) -> bool {
        matches!(self.kind, FieldKind::ForeignKey { .. })
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Validate a resolved value, returning human-readable messages.
    ///
    /// Conditional requirements are checked by the record, which has access
    /// to the other field values.
    pub fn validate(&self, value: &Value) -> Vec<String> {
        match self.kind {
            // Identities are always valid.
            FieldKind::ObjectId | FieldKind::GlobalId => return Vec::new(),
            _ => {}
        }

        // Blank strings count as missing.
        let value = match value.raw() {
            Value::Str(s) if s.trim().is_empty() => &Value::Null,
            other => other,
        };

        let mut messages = Vec::new();
        if value.is_null() {
            if self.required {
                messages.push(format!("{} is missing", self.label));
            }
            return messages;
        }

        if !self.choices.is_empty() && !self.choices.iter().any(|choice| choice == value) {
            messages.push(format!("{} is invalid", self.label));
        }

        if let FieldKind::Numeric { min, max } = self.kind {
            if let Some(v) = value.as_f64() {
                let below = min.map_or(false, |m| v < m);
                let above = max.map_or(false, |m| v > m);
                if below || above {
                    messages.push(format!("{} out of range", self.label));
                }
            }
        }

        messages
    }

    /// Compare a value against its persisted counterpart at the backend's
    /// storage precision
    pub fn has_changed(&self, old: &Value, new: &Value) -> bool {
        new.has_changed(old, self.storage_scale)
    }

    /// Compute the value of a calculated field against a record
    pub fn compute(&self, record: &Record) -> OrmResult<Value> {
        let FieldKind::Calculated(calc) = &self.kind else {
            return Err(OrmError::Configuration(format!(
                "Field {} is not calculated",
                self.name
            )));
        };

        if let Some(active_if) = &calc.active_if {
            if !active_if(record) {
                return Ok(calc.default.clone());
            }
        }

        match &calc.rule {
            CalcRule::Method { name } => {
                let method = record.dataset().method(name)?;
                method(record)
            }
            CalcRule::Weights { weights } => {
                let mut total = 0.0;
                for (field, weight) in weights {
                    let value = record.value(field)?;
                    if value.is_null() {
                        return Ok(calc.default.clone());
                    }
                    let v = value.as_f64().ok_or_else(|| {
                        OrmError::Configuration(format!(
                            "Weighted field {} depends on non-numeric field {}",
                            self.name, field
                        ))
                    })?;
                    total += v * weight;
                }
                Ok(Value::Float(total))
            }
            CalcRule::Scale { .. } => Ok(self
                .scale_level(record)?
                .map(|level| Value::Float(level.score))
                .unwrap_or_else(|| calc.default.clone())),
        }
    }

    /// The level a record falls in for a scale-calculated field, or `None`
    /// when the field is inactive, no option matches, or the source value is
    /// null
    pub fn scale_level(&self, record: &Record) -> OrmResult<Option<Level>> {
        let FieldKind::Calculated(calc) = &self.kind else {
            return Err(OrmError::Configuration(format!(
                "Field {} is not calculated",
                self.name
            )));
        };
        let CalcRule::Scale {
            options,
            value_field,
            use_label,
        } = &calc.rule
        else {
            return Err(OrmError::Configuration(format!(
                "Field {} is not scale-calculated",
                self.name
            )));
        };

        if let Some(active_if) = &calc.active_if {
            if !active_if(record) {
                return Ok(None);
            }
        }

        let option = options
            .iter()
            .find(|option| option.condition.as_ref().map_or(true, |cond| cond(record)));
        let Some(option) = option else {
            return Ok(None);
        };

        let source = if *use_label {
            match record.label_for(value_field)? {
                Some(label) => Value::Str(label),
                None => Value::Null,
            }
        } else {
            record.value(value_field)?
        };
        if source.is_null() {
            return Ok(None);
        }

        let level = option.scale.level_for(&source)?;
        Ok(Some(level.with_weight(option.weight)))
    }

    /// The sorted, de-duplicated set of levels a scale-calculated field can
    /// reach across all of its options. Used to seed summary buckets.
    pub fn get_levels(&self) -> OrmResult<Vec<Level>> {
        let FieldKind::Calculated(Calculation {
            rule: CalcRule::Scale { options, .. },
            ..
        }) = &self.kind
        else {
            return Err(OrmError::Configuration(format!(
                "Field {} is not scale-calculated",
                self.name
            )));
        };

        let mut levels = Vec::new();
        for option in options {
            for level in option.scale.levels() {
                levels.push(level.with_weight(option.weight));
            }
        }
        Ok(sort_levels(levels))
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("label", &self.label)
            .field("storage_name", &self.storage_name)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("deferred", &self.deferred)
            .field("bound", &self.bound)
            .finish_non_exhaustive()
    }
}

// Predicates make a derived Debug impossible; render the tag only.
impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::ObjectId => write!(f, "ObjectId"),
            FieldKind::GlobalId => write!(f, "GlobalId"),
            FieldKind::Geometry => write!(f, "Geometry"),
            FieldKind::Str => write!(f, "Str"),
            FieldKind::Numeric { min, max } => {
                write!(f, "Numeric {{ min: {:?}, max: {:?} }}", min, max)
            }
            FieldKind::Blob => write!(f, "Blob"),
            FieldKind::ForeignKey { related } => {
                write!(f, "ForeignKey {{ related: {:?} }}", related)
            }
            FieldKind::Calculated(calc) => {
                let rule = match &calc.rule {
                    CalcRule::Method { name } => format!("Method({})", name),
                    CalcRule::Weights { .. } => "Weights".to_string(),
                    CalcRule::Scale { .. } => "Scale".to_string(),
                };
                write!(f, "Calculated({})", rule)
            }
        }
    }
}
