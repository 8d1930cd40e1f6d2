use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{OffsetDateTime, UtcOffset};
use ulid::Ulid;

pub mod domains;

/// Sentinel criterion value meaning "do not constrain this field".
pub const MATCH_ALL: &str = "all";

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl FieldIssue {
    #[must_use]
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl Display for FieldIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("validation failed: {}", join_issues(.0))]
    Validation(Vec<FieldIssue>),
    #[error("record not found: {0}")]
    NotFound(RecordId),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("store error: {0}")]
    Store(String),
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(RecordId),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Backend(message) => Self::Store(message),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
#[serde(transparent)]
pub struct RecordId(pub Ulid);

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One domain entity: a unique id plus named field values.
///
/// Field values are JSON strings, numbers, and booleans; date fields are
/// RFC3339 or `YYYY-MM-DD` strings typed by the owning [`DomainSchema`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: RecordId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Bool,
    Date,
    Enum,
}

impl FieldKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::Enum => "enum",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "number" => Some(Self::Number),
            "bool" => Some(Self::Bool),
            "date" => Some(Self::Date),
            "enum" => Some(Self::Enum),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub filterable: bool,
    #[serde(default)]
    pub searchable: bool,
    #[serde(default)]
    pub aggregate: bool,
    #[serde(default)]
    pub allowed_values: Vec<String>,
}

impl FieldSpec {
    #[must_use]
    pub fn text(name: &str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    #[must_use]
    pub fn number(name: &str) -> Self {
        Self::new(name, FieldKind::Number)
    }

    #[must_use]
    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    #[must_use]
    pub fn date(name: &str) -> Self {
        Self::new(name, FieldKind::Date)
    }

    #[must_use]
    pub fn enumeration(name: &str, values: &[&str]) -> Self {
        let mut spec = Self::new(name, FieldKind::Enum);
        spec.allowed_values = values.iter().map(ToString::to_string).collect();
        spec
    }

    fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            filterable: false,
            searchable: false,
            aggregate: false,
            allowed_values: Vec::new(),
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn filterable(mut self) -> Self {
        self.filterable = true;
        self
    }

    #[must_use]
    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    #[must_use]
    pub fn aggregate(mut self) -> Self {
        self.aggregate = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum DerivedRule {
    /// `minuend - subtrahend`, e.g. remaining balance.
    Difference { minuend: String, subtrahend: String },
    /// `numerator / denominator * 100`, 0 when the denominator is 0.
    RatioPercent {
        numerator: String,
        denominator: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DerivedSpec {
    pub name: String,
    pub rule: DerivedRule,
}

/// Declarative status workflow: the explicit per-domain transition table.
///
/// When a schema declares a flow, the mutation gateway enforces it: new
/// records start at `initial`, updates may only follow `transitions`, and
/// transitions into a `reason_required` status must carry a non-empty
/// `reason_field`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusFlow {
    pub field: String,
    pub initial: String,
    pub transitions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub reason_required: Vec<String>,
    #[serde(default)]
    pub reason_field: String,
}

/// Per-domain field descriptor: one schema parameterizes the filter engine,
/// metrics calculator, projection, and mutation gateway for a resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DomainSchema {
    pub resource: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub derived: Vec<DerivedSpec>,
    #[serde(default)]
    pub status_flow: Option<StatusFlow>,
}

impl DomainSchema {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }

    #[must_use]
    pub fn derived_names(&self) -> BTreeSet<&str> {
        self.derived.iter().map(|spec| spec.name.as_str()).collect()
    }

    /// Validates schema shape and internal references.
    ///
    /// # Errors
    /// Returns [`PipelineError::Schema`] when the descriptor is inconsistent.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.resource.trim().is_empty() {
            return Err(PipelineError::Schema(
                "resource name must be non-empty".to_string(),
            ));
        }

        if self.fields.is_empty() {
            return Err(PipelineError::Schema(format!(
                "resource '{}' declares no fields",
                self.resource
            )));
        }

        let mut seen = BTreeSet::new();
        for name in self
            .fields
            .iter()
            .map(|spec| spec.name.as_str())
            .chain(self.derived.iter().map(|spec| spec.name.as_str()))
        {
            if !seen.insert(name) {
                return Err(PipelineError::Schema(format!(
                    "duplicate field name '{name}' in resource '{}'",
                    self.resource
                )));
            }
        }

        for spec in &self.fields {
            if spec.kind == FieldKind::Enum && spec.allowed_values.is_empty() {
                return Err(PipelineError::Schema(format!(
                    "enum field '{}' must declare allowed_values",
                    spec.name
                )));
            }
            if spec.kind != FieldKind::Enum && !spec.allowed_values.is_empty() {
                return Err(PipelineError::Schema(format!(
                    "allowed_values only applies to enum fields, found on '{}'",
                    spec.name
                )));
            }
        }

        for derived in &self.derived {
            let (lhs, rhs) = match &derived.rule {
                DerivedRule::Difference {
                    minuend,
                    subtrahend,
                } => (minuend, subtrahend),
                DerivedRule::RatioPercent {
                    numerator,
                    denominator,
                } => (numerator, denominator),
            };
            for referenced in [lhs, rhs] {
                match self.field(referenced) {
                    Some(spec) if spec.kind == FieldKind::Number => {}
                    Some(spec) => {
                        return Err(PipelineError::Schema(format!(
                            "derived field '{}' references non-number field '{}' ({})",
                            derived.name,
                            referenced,
                            spec.kind.as_str()
                        )))
                    }
                    None => {
                        return Err(PipelineError::Schema(format!(
                            "derived field '{}' references unknown field '{referenced}'",
                            derived.name
                        )))
                    }
                }
            }
        }

        if let Some(flow) = &self.status_flow {
            let Some(spec) = self.field(&flow.field) else {
                return Err(PipelineError::Schema(format!(
                    "status flow references unknown field '{}'",
                    flow.field
                )));
            };
            if spec.kind != FieldKind::Enum {
                return Err(PipelineError::Schema(format!(
                    "status flow field '{}' must be an enum field",
                    flow.field
                )));
            }

            let statuses: BTreeSet<&str> =
                spec.allowed_values.iter().map(String::as_str).collect();
            let mut referenced: Vec<&str> = vec![flow.initial.as_str()];
            for (from, targets) in &flow.transitions {
                referenced.push(from.as_str());
                referenced.extend(targets.iter().map(String::as_str));
            }
            referenced.extend(flow.reason_required.iter().map(String::as_str));
            for status in referenced {
                if !statuses.contains(status) {
                    return Err(PipelineError::Schema(format!(
                        "status flow references '{status}', not an allowed value of '{}'",
                        flow.field
                    )));
                }
            }

            if !flow.reason_required.is_empty() {
                match self.field(&flow.reason_field) {
                    Some(spec) if spec.kind == FieldKind::Text => {}
                    _ => {
                        return Err(PipelineError::Schema(format!(
                            "reason_field '{}' must be a declared text field",
                            flow.reason_field
                        )))
                    }
                }
            }
        }

        Ok(())
    }

    /// Decodes and validates a schema descriptor from JSON.
    ///
    /// # Errors
    /// Returns [`PipelineError::Schema`] when decoding fails or the decoded
    /// descriptor is inconsistent.
    pub fn from_json(value: &Value) -> Result<Self, PipelineError> {
        let schema: Self = serde_json::from_value(value.clone())
            .map_err(|err| PipelineError::Schema(format!("invalid schema JSON: {err}")))?;
        schema.validate()?;
        Ok(schema)
    }

    /// The enum field governing workflow state, when the domain has one.
    #[must_use]
    pub fn status_field(&self) -> Option<&FieldSpec> {
        if let Some(flow) = &self.status_flow {
            return self.field(&flow.field);
        }
        self.fields
            .iter()
            .find(|spec| spec.name == "status" && spec.kind == FieldKind::Enum)
    }
}

// ---------------------------------------------------------------------------
// Predicate filter engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RangeCriterion {
    Number {
        field: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Date {
        field: String,
        #[serde(default, with = "time::serde::rfc3339::option")]
        after: Option<OffsetDateTime>,
        #[serde(default, with = "time::serde::rfc3339::option")]
        before: Option<OffsetDateTime>,
    },
}

/// The active filter/search state, explicit and serializable rather than
/// ambient UI state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Criteria {
    #[serde(default)]
    pub equals: BTreeMap<String, String>,
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub ranges: Vec<RangeCriterion>,
}

/// Renders a field value as comparable/searchable text.
#[must_use]
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Tests one record against the active criteria. All active predicates AND
/// together; unknown or non-filterable criterion fields are inactive.
#[must_use]
pub fn matches_criteria(record: &Record, criteria: &Criteria, schema: &DomainSchema) -> bool {
    for (name, expected) in &criteria.equals {
        if expected == MATCH_ALL {
            continue;
        }
        let Some(spec) = schema.field(name) else {
            continue;
        };
        if !spec.filterable {
            continue;
        }
        let actual = record.fields.get(name).and_then(value_text);
        if actual.as_deref() != Some(expected.as_str()) {
            return false;
        }
    }

    let term = criteria.search.trim().to_lowercase();
    if !term.is_empty() && !search_hit(record, schema, &term) {
        return false;
    }

    for range in &criteria.ranges {
        match range {
            RangeCriterion::Number { field, min, max } => {
                let Some(value) = record.fields.get(field).and_then(Value::as_f64) else {
                    return false;
                };
                if min.is_some_and(|bound| value < bound) {
                    return false;
                }
                if max.is_some_and(|bound| value > bound) {
                    return false;
                }
            }
            RangeCriterion::Date {
                field,
                after,
                before,
            } => {
                let Some(stamp) = record
                    .fields
                    .get(field)
                    .and_then(value_text)
                    .and_then(|text| parse_date_value(&text))
                else {
                    return false;
                };
                if after.is_some_and(|bound| stamp < bound) {
                    return false;
                }
                if before.is_some_and(|bound| stamp > bound) {
                    return false;
                }
            }
        }
    }

    true
}

fn search_hit(record: &Record, schema: &DomainSchema, term: &str) -> bool {
    if record.id.to_string().to_lowercase().contains(term) {
        return true;
    }
    schema
        .fields
        .iter()
        .filter(|spec| spec.searchable)
        .any(|spec| {
            record
                .fields
                .get(&spec.name)
                .and_then(value_text)
                .is_some_and(|text| text.to_lowercase().contains(term))
        })
}

/// Reduces a collection to the subset matching the active criteria.
/// Pure: never mutates the input; default criteria return the input unchanged.
#[must_use]
pub fn apply_criteria(records: &[Record], criteria: &Criteria, schema: &DomainSchema) -> Vec<Record> {
    records
        .iter()
        .filter(|record| matches_criteria(record, criteria, schema))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Derived metrics calculator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MetricSpec {
    Count {
        name: String,
        #[serde(default)]
        where_equals: BTreeMap<String, String>,
    },
    RatePercent {
        name: String,
        where_equals: BTreeMap<String, String>,
    },
    Sum {
        name: String,
        field: String,
    },
    Average {
        name: String,
        field: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricValue {
    pub name: String,
    pub value: f64,
}

/// `matching / total * 100`, rounded to one decimal, 0 when `total == 0`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rate_percent(matching: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round1(matching as f64 / total as f64 * 100.0)
}

/// `sum / count`, rounded to one decimal, 0 when `count == 0`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn average(sum: f64, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    round1(sum / count as f64)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn matches_equals(record: &Record, equals: &BTreeMap<String, String>) -> bool {
    equals.iter().all(|(name, expected)| {
        record
            .fields
            .get(name)
            .and_then(value_text)
            .as_deref()
            == Some(expected.as_str())
    })
}

fn sum_field(records: &[Record], field: &str) -> f64 {
    records
        .iter()
        .filter_map(|record| record.fields.get(field).and_then(Value::as_f64))
        .sum()
}

/// Computes aggregate statistics over a collection. Pure and idempotent.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compute_metrics(records: &[Record], specs: &[MetricSpec]) -> Vec<MetricValue> {
    specs
        .iter()
        .map(|spec| match spec {
            MetricSpec::Count { name, where_equals } => MetricValue {
                name: name.clone(),
                value: records
                    .iter()
                    .filter(|record| matches_equals(record, where_equals))
                    .count() as f64,
            },
            MetricSpec::RatePercent { name, where_equals } => {
                let matching = records
                    .iter()
                    .filter(|record| matches_equals(record, where_equals))
                    .count();
                MetricValue {
                    name: name.clone(),
                    value: rate_percent(matching, records.len()),
                }
            }
            MetricSpec::Sum { name, field } => MetricValue {
                name: name.clone(),
                value: sum_field(records, field),
            },
            MetricSpec::Average { name, field } => MetricValue {
                name: name.clone(),
                value: average(sum_field(records, field), records.len()),
            },
        })
        .collect()
}

/// The standard metric preset for a domain: total count, per-status counts
/// and rates, and sum/average for every `aggregate` number field.
#[must_use]
pub fn default_metrics(schema: &DomainSchema) -> Vec<MetricSpec> {
    let mut specs = vec![MetricSpec::Count {
        name: "total".to_string(),
        where_equals: BTreeMap::new(),
    }];

    if let Some(status) = schema.status_field() {
        for value in &status.allowed_values {
            let mut where_equals = BTreeMap::new();
            where_equals.insert(status.name.clone(), value.clone());
            specs.push(MetricSpec::Count {
                name: format!("{value}_count"),
                where_equals: where_equals.clone(),
            });
            specs.push(MetricSpec::RatePercent {
                name: format!("{value}_rate"),
                where_equals,
            });
        }
    }

    for field in schema.fields.iter().filter(|spec| spec.aggregate) {
        specs.push(MetricSpec::Sum {
            name: format!("{}_total", field.name),
            field: field.name.clone(),
        });
        specs.push(MetricSpec::Average {
            name: format!("{}_avg", field.name),
            field: field.name.clone(),
        });
    }

    specs
}

// ---------------------------------------------------------------------------
// View projection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "ascending",
            Self::Descending => "descending",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ascending" | "asc" => Some(Self::Ascending),
            "descending" | "desc" => Some(Self::Descending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct PageSpec {
    pub size: usize,
    pub index: usize,
}

/// Serializable view configuration: sort plus optional pagination window.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ViewSpec {
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub direction: SortDirection,
    #[serde(default)]
    pub page: Option<PageSpec>,
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        _ => 3,
    }
}

fn compare_values(lhs: &Value, rhs: &Value) -> Ordering {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => type_rank(lhs).cmp(&type_rank(rhs)),
    }
}

/// Stable sort by one field. Records missing the key sort last in either
/// direction; ties keep their original relative order.
#[must_use]
pub fn sort_records(records: &[Record], key: &str, direction: SortDirection) -> Vec<Record> {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| match (a.fields.get(key), b.fields.get(key)) {
        (Some(lhs), Some(rhs)) => {
            let ordering = compare_values(lhs, rhs);
            match direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    sorted
}

/// Returns the page `[index * size, (index + 1) * size)`. Out-of-range pages
/// yield an empty sequence, never an error.
#[must_use]
pub fn paginate(records: &[Record], page_size: usize, page_index: usize) -> Vec<Record> {
    if page_size == 0 {
        return Vec::new();
    }
    let Some(start) = page_index.checked_mul(page_size) else {
        return Vec::new();
    };
    if start >= records.len() {
        return Vec::new();
    }
    let end = start.saturating_add(page_size).min(records.len());
    records[start..end].to_vec()
}

/// Groups by the text rendering of one field, groups in first-seen order,
/// insertion order preserved within each group. Records missing the key land
/// in the empty-string group.
#[must_use]
pub fn group_by(records: &[Record], key: &str) -> Vec<(String, Vec<Record>)> {
    let mut groups: Vec<(String, Vec<Record>)> = Vec::new();
    for record in records {
        let group_key = record
            .fields
            .get(key)
            .and_then(value_text)
            .unwrap_or_default();
        match groups.iter_mut().find(|(existing, _)| *existing == group_key) {
            Some((_, members)) => members.push(record.clone()),
            None => groups.push((group_key, vec![record.clone()])),
        }
    }
    groups
}

/// Applies a [`ViewSpec`] to a filtered collection.
#[must_use]
pub fn project(records: &[Record], view: &ViewSpec) -> Vec<Record> {
    let sorted = match &view.sort_by {
        Some(key) => sort_records(records, key, view.direction),
        None => records.to_vec(),
    };
    match view.page {
        Some(page) => paginate(&sorted, page.size, page.index),
        None => sorted,
    }
}

// ---------------------------------------------------------------------------
// Record store
// ---------------------------------------------------------------------------

/// The authoritative collection for one resource. Stores perform no domain
/// validation; the mutation gateway is the validating surface.
pub trait RecordStore {
    /// Full current collection, insertion order preserved.
    ///
    /// # Errors
    /// Returns [`StoreError::Backend`] when the backend fails.
    fn list(&self) -> Result<Vec<Record>, StoreError>;

    /// # Errors
    /// Returns [`StoreError::NotFound`] when the id is absent.
    fn get(&self, id: RecordId) -> Result<Record, StoreError>;

    /// Assigns a fresh id, appends, and returns the new record.
    ///
    /// # Errors
    /// Returns [`StoreError::Backend`] when the backend fails.
    fn create(&mut self, fields: Map<String, Value>) -> Result<Record, StoreError>;

    /// Merges `partial` into the existing record.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when the id is absent.
    fn update(&mut self, id: RecordId, partial: &Map<String, Value>) -> Result<Record, StoreError>;

    /// Destructive removal. Not idempotent: deleting an absent id fails.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when the id is absent.
    fn delete(&mut self, id: RecordId) -> Result<(), StoreError>;
}

/// In-memory store for tests and seed fixtures.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<Record>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn list(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.records.clone())
    }

    fn get(&self, id: RecordId) -> Result<Record, StoreError> {
        self.records
            .iter()
            .find(|record| record.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    fn create(&mut self, fields: Map<String, Value>) -> Result<Record, StoreError> {
        let now = now_utc();
        let record = Record {
            id: RecordId(Ulid::new()),
            created_at: now,
            updated_at: now,
            fields,
        };
        self.records.push(record.clone());
        Ok(record)
    }

    fn update(&mut self, id: RecordId, partial: &Map<String, Value>) -> Result<Record, StoreError> {
        let record = self
            .records
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or(StoreError::NotFound(id))?;
        for (name, value) in partial {
            record.fields.insert(name.clone(), value.clone());
        }
        record.updated_at = now_utc();
        Ok(record.clone())
    }

    fn delete(&mut self, id: RecordId) -> Result<(), StoreError> {
        let position = self
            .records
            .iter()
            .position(|record| record.id == id)
            .ok_or(StoreError::NotFound(id))?;
        let _ = self.records.remove(position);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mutation gateway
// ---------------------------------------------------------------------------

/// Recomputes every derived field from its source fields in place.
pub fn derive_fields(schema: &DomainSchema, fields: &mut Map<String, Value>) {
    for spec in &schema.derived {
        match &spec.rule {
            DerivedRule::Difference {
                minuend,
                subtrahend,
            } => {
                let lhs = fields.get(minuend).and_then(Value::as_f64);
                let rhs = fields.get(subtrahend).and_then(Value::as_f64);
                if let (Some(lhs), Some(rhs)) = (lhs, rhs) {
                    fields.insert(spec.name.clone(), Value::from(lhs - rhs));
                }
            }
            DerivedRule::RatioPercent {
                numerator,
                denominator,
            } => {
                let num = fields.get(numerator).and_then(Value::as_f64);
                let den = fields.get(denominator).and_then(Value::as_f64);
                if num.is_some() || den.is_some() {
                    let den = den.unwrap_or(0.0);
                    let value = if den == 0.0 {
                        0.0
                    } else {
                        round1(num.unwrap_or(0.0) / den * 100.0)
                    };
                    fields.insert(spec.name.clone(), Value::from(value));
                }
            }
        }
    }
}

fn present(value: Option<&Value>) -> bool {
    value.is_some_and(|value| !value.is_null())
}

fn kind_issue(spec: &FieldSpec, value: &Value) -> Option<String> {
    match spec.kind {
        FieldKind::Text => {
            if value.is_string() {
                None
            } else {
                Some("expected a string".to_string())
            }
        }
        FieldKind::Number => {
            if value.is_number() {
                None
            } else {
                Some("expected a number".to_string())
            }
        }
        FieldKind::Bool => {
            if value.is_boolean() {
                None
            } else {
                Some("expected a boolean".to_string())
            }
        }
        FieldKind::Date => match value.as_str() {
            Some(text) if parse_date_value(text).is_some() => None,
            Some(text) => Some(format!("'{text}' is not an RFC3339 or YYYY-MM-DD date")),
            None => Some("expected a date string".to_string()),
        },
        FieldKind::Enum => match value.as_str() {
            Some(text) if spec.allowed_values.iter().any(|allowed| allowed == text) => None,
            Some(text) => Some(format!(
                "'{text}' is not one of [{}]",
                spec.allowed_values.join(", ")
            )),
            None => Some("expected an enum string".to_string()),
        },
    }
}

fn supplied_issues(schema: &DomainSchema, supplied: &Map<String, Value>) -> Vec<FieldIssue> {
    let derived = schema.derived_names();
    let mut issues = Vec::new();
    for name in supplied.keys() {
        if derived.contains(name.as_str()) {
            issues.push(FieldIssue::new(
                name,
                "derived field, computed automatically",
            ));
        } else if schema.field(name).is_none() {
            issues.push(FieldIssue::new(name, "unknown field"));
        }
    }
    issues
}

/// Checks a full field document against the schema: required fields present,
/// values of the declared kind, enum values within their closed set.
#[must_use]
pub fn validate_document(schema: &DomainSchema, fields: &Map<String, Value>) -> Vec<FieldIssue> {
    let mut issues = Vec::new();
    for spec in &schema.fields {
        let value = fields.get(&spec.name);
        if !present(value) {
            if spec.required {
                issues.push(FieldIssue::new(&spec.name, "required field is missing"));
            }
            continue;
        }
        let Some(value) = value else { continue };

        if spec.required
            && matches!(spec.kind, FieldKind::Text | FieldKind::Enum)
            && value.as_str().is_some_and(|text| text.trim().is_empty())
        {
            issues.push(FieldIssue::new(&spec.name, "required field is empty"));
            continue;
        }

        if let Some(message) = kind_issue(spec, value) {
            issues.push(FieldIssue::new(&spec.name, message));
        }
    }
    issues
}

/// Validates and applies create/update/delete intents against a record store.
///
/// The gateway is the only mutation surface: it reports expected failures as
/// typed results ([`PipelineError::Validation`], [`PipelineError::NotFound`])
/// and never touches the store when validation fails.
pub struct MutationGateway<'a, S: RecordStore> {
    schema: &'a DomainSchema,
    store: &'a mut S,
}

impl<'a, S: RecordStore> MutationGateway<'a, S> {
    /// # Errors
    /// Returns [`PipelineError::Schema`] when the schema is inconsistent.
    pub fn new(schema: &'a DomainSchema, store: &'a mut S) -> Result<Self, PipelineError> {
        schema.validate()?;
        Ok(Self { schema, store })
    }

    /// # Errors
    /// Returns [`PipelineError::Validation`] with field-level issues when the
    /// draft violates the schema, without touching the store.
    pub fn create(&mut self, mut fields: Map<String, Value>) -> Result<Record, PipelineError> {
        let mut issues = supplied_issues(self.schema, &fields);

        if let Some(flow) = &self.schema.status_flow {
            match fields.get(&flow.field).and_then(value_text) {
                None => {
                    fields.insert(flow.field.clone(), Value::String(flow.initial.clone()));
                }
                Some(status) if status == flow.initial => {}
                Some(status) => issues.push(FieldIssue::new(
                    &flow.field,
                    format!("new records start as '{}', got '{status}'", flow.initial),
                )),
            }
        }

        issues.extend(validate_document(self.schema, &fields));
        if !issues.is_empty() {
            return Err(PipelineError::Validation(issues));
        }

        derive_fields(self.schema, &mut fields);
        Ok(self.store.create(fields)?)
    }

    /// # Errors
    /// Returns [`PipelineError::NotFound`] for absent ids and
    /// [`PipelineError::Validation`] when the merged document or a status
    /// transition violates the schema.
    pub fn update(
        &mut self,
        id: RecordId,
        partial: &Map<String, Value>,
    ) -> Result<Record, PipelineError> {
        let existing = self.store.get(id)?;
        let mut issues = supplied_issues(self.schema, partial);

        let mut merged = existing.fields.clone();
        for (name, value) in partial {
            merged.insert(name.clone(), value.clone());
        }

        if let Some(flow) = &self.schema.status_flow {
            let old = existing
                .fields
                .get(&flow.field)
                .and_then(value_text);
            let new = merged.get(&flow.field).and_then(value_text);
            if let (Some(old), Some(new)) = (old, new) {
                if old != new {
                    let allowed = flow
                        .transitions
                        .get(&old)
                        .is_some_and(|targets| targets.iter().any(|target| *target == new));
                    if !allowed {
                        issues.push(FieldIssue::new(
                            &flow.field,
                            format!("transition '{old}' -> '{new}' is not allowed"),
                        ));
                    }
                    if flow.reason_required.contains(&new) {
                        let reason = merged
                            .get(&flow.reason_field)
                            .and_then(value_text);
                        if reason.map_or(true, |text| text.trim().is_empty()) {
                            issues.push(FieldIssue::new(
                                &flow.reason_field,
                                format!("required when {} becomes '{new}'", flow.field),
                            ));
                        }
                    }
                }
            }
        }

        issues.extend(validate_document(self.schema, &merged));
        if !issues.is_empty() {
            return Err(PipelineError::Validation(issues));
        }

        derive_fields(self.schema, &mut merged);
        Ok(self.store.update(id, &merged)?)
    }

    /// # Errors
    /// Returns [`PipelineError::NotFound`] for absent ids; repeating a delete
    /// of the same id fails the second time.
    pub fn delete(&mut self, id: RecordId) -> Result<(), PipelineError> {
        Ok(self.store.delete(id)?)
    }
}

// ---------------------------------------------------------------------------
// Timestamp helpers
// ---------------------------------------------------------------------------

/// Parses an RFC3339 timestamp.
///
/// # Errors
/// Returns [`PipelineError::Schema`] when parsing fails.
pub fn parse_timestamp(value: &str) -> Result<OffsetDateTime, PipelineError> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map(|parsed| parsed.to_offset(UtcOffset::UTC))
        .map_err(|err| PipelineError::Schema(format!("invalid RFC3339 timestamp: {err}")))
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`PipelineError::Schema`] when formatting fails.
pub fn format_timestamp(value: OffsetDateTime) -> Result<String, PipelineError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| PipelineError::Schema(format!("failed to format timestamp: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

/// Accepts RFC3339 or bare `YYYY-MM-DD` (interpreted as UTC midnight).
#[must_use]
pub fn parse_date_value(value: &str) -> Option<OffsetDateTime> {
    if let Ok(parsed) =
        OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
    {
        return Some(parsed.to_offset(UtcOffset::UTC));
    }
    let format = time::format_description::parse("[year]-[month]-[day]").ok()?;
    let date = time::Date::parse(value, &format).ok()?;
    Some(date.midnight().assume_utc())
}
