// flowbase-core/src/aggregation.rs
// Aggregation pipeline implementation

use crate::error::{FlowBaseError, Result};
use crate::query::value_matches_filter;
use crate::value_utils::{compare_values, get_nested_value};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Parse a field reference from JSON value (e.g., "$fieldName" -> "fieldName")
///
/// Used by accumulators like $avg, $min, $max, $first, $last
fn parse_field_reference(value: &Value, op_name: &str) -> Result<String> {
    if let Some(s) = value.as_str() {
        if s.starts_with('$') {
            Ok(s.trim_start_matches('$').to_string())
        } else {
            Err(FlowBaseError::AggregationError(format!(
                "{} field reference must start with $",
                op_name
            )))
        }
    } else {
        Err(FlowBaseError::AggregationError(format!(
            "{} must be a field reference",
            op_name
        )))
    }
}

/// Compute min or max over documents using a comparison function
fn compute_extremum<F>(docs: &[Value], field: &str, compare: F) -> Value
where
    F: Fn(f64, f64) -> f64,
{
    let mut result: Option<f64> = None;

    for doc in docs {
        if let Some(value) = get_nested_value(doc, field) {
            let num = if let Some(n) = value.as_f64() {
                n
            } else {
                continue;
            };
            result = Some(result.map_or(num, |r| compare(r, num)));
        }
    }

    result.map(Value::from).unwrap_or(Value::Null)
}

/// Aggregation pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Pipeline stage
#[derive(Debug, Clone)]
pub enum Stage {
    Match(MatchStage),
    Project(ProjectStage),
    Group(GroupStage),
    Sort(SortStage),
    Limit(usize),
    Skip(usize),
}

/// $match stage - filter documents
#[derive(Debug, Clone)]
pub struct MatchStage {
    filter: Value,
}

/// $project stage - reshape documents
#[derive(Debug, Clone)]
pub struct ProjectStage {
    fields: Vec<(String, ProjectField)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectField {
    Include,        // 1
    Exclude,        // 0
    Rename(String), // "$fieldName"
}

/// $group stage - group documents and compute aggregates
#[derive(Debug, Clone)]
pub struct GroupStage {
    id: GroupId,
    accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone)]
pub enum GroupId {
    Field(String), // "$city"
    Null,          // null (all documents in one group)
}

#[derive(Debug, Clone)]
pub enum Accumulator {
    Sum(SumExpression),
    Avg(String),
    Min(String),
    Max(String),
    First(String),
    Last(String),
}

#[derive(Debug, Clone)]
pub enum SumExpression {
    Constant(i64), // {"$sum": 1} - count
    Field(String), // {"$sum": "$amount"} - sum field values
}

/// $sort stage - sort documents
#[derive(Debug, Clone)]
pub struct SortStage {
    fields: Vec<(String, SortDirection)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl Pipeline {
    /// Parse pipeline from a JSON array of stage objects
    pub fn from_json(pipeline_json: &Value) -> Result<Self> {
        let stages_array = match pipeline_json {
            Value::Array(arr) => arr,
            _ => {
                return Err(FlowBaseError::AggregationError(
                    "Pipeline must be an array".to_string(),
                ))
            }
        };

        if stages_array.is_empty() {
            return Err(FlowBaseError::AggregationError(
                "Pipeline cannot be empty".to_string(),
            ));
        }

        let mut stages = Vec::with_capacity(stages_array.len());
        for stage_json in stages_array {
            stages.push(Stage::from_json(stage_json)?);
        }

        Ok(Pipeline { stages })
    }

    /// Execute pipeline on documents
    pub fn execute(&self, mut docs: Vec<Value>) -> Result<Vec<Value>> {
        for stage in &self.stages {
            docs = stage.execute(docs)?;
        }
        Ok(docs)
    }
}

impl Stage {
    /// Parse stage from JSON
    fn from_json(stage_json: &Value) -> Result<Self> {
        let obj = match stage_json {
            Value::Object(obj) => obj,
            _ => {
                return Err(FlowBaseError::AggregationError(
                    "Each stage must be an object".to_string(),
                ))
            }
        };

        // Each stage has exactly one operator key
        if obj.len() != 1 {
            return Err(FlowBaseError::AggregationError(
                "Each stage must have exactly one operator".to_string(),
            ));
        }

        let (stage_name, stage_spec) = obj.iter().next().unwrap();

        match stage_name.as_str() {
            "$match" => Ok(Stage::Match(MatchStage::from_json(stage_spec)?)),
            "$project" => Ok(Stage::Project(ProjectStage::from_json(stage_spec)?)),
            "$group" => Ok(Stage::Group(GroupStage::from_json(stage_spec)?)),
            "$sort" => Ok(Stage::Sort(SortStage::from_json(stage_spec)?)),
            "$limit" => stage_spec
                .as_u64()
                .map(|n| Stage::Limit(n as usize))
                .ok_or_else(|| {
                    FlowBaseError::AggregationError(
                        "$limit must be a non-negative integer".to_string(),
                    )
                }),
            "$skip" => stage_spec
                .as_u64()
                .map(|n| Stage::Skip(n as usize))
                .ok_or_else(|| {
                    FlowBaseError::AggregationError(
                        "$skip must be a non-negative integer".to_string(),
                    )
                }),
            other => Err(FlowBaseError::AggregationError(format!(
                "Unsupported pipeline stage: {}",
                other
            ))),
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        match self {
            Stage::Match(stage) => stage.execute(docs),
            Stage::Project(stage) => stage.execute(docs),
            Stage::Group(stage) => stage.execute(docs),
            Stage::Sort(stage) => Ok(stage.execute(docs)),
            Stage::Limit(limit) => Ok(docs.into_iter().take(*limit).collect()),
            Stage::Skip(skip) => Ok(docs.into_iter().skip(*skip).collect()),
        }
    }
}

impl MatchStage {
    fn from_json(spec: &Value) -> Result<Self> {
        if !spec.is_object() {
            return Err(FlowBaseError::AggregationError(
                "$match must be an object".to_string(),
            ));
        }
        Ok(MatchStage {
            filter: spec.clone(),
        })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        for doc in docs {
            if value_matches_filter(&doc, &self.filter)? {
                out.push(doc);
            }
        }
        Ok(out)
    }
}

impl ProjectStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec.as_object().ok_or_else(|| {
            FlowBaseError::AggregationError("$project must be an object".to_string())
        })?;

        let mut fields = Vec::with_capacity(obj.len());
        for (name, v) in obj {
            let field = match v {
                Value::Number(n) if n.as_i64() == Some(1) => ProjectField::Include,
                Value::Number(n) if n.as_i64() == Some(0) => ProjectField::Exclude,
                Value::Bool(true) => ProjectField::Include,
                Value::Bool(false) => ProjectField::Exclude,
                Value::String(s) if s.starts_with('$') => {
                    ProjectField::Rename(s.trim_start_matches('$').to_string())
                }
                _ => {
                    return Err(FlowBaseError::AggregationError(format!(
                        "$project: unsupported specification for '{}'",
                        name
                    )))
                }
            };
            fields.push((name.clone(), field));
        }

        Ok(ProjectStage { fields })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        // Any include/rename switches the stage to whitelist mode
        let whitelist = self
            .fields
            .iter()
            .any(|(_, f)| *f != ProjectField::Exclude);

        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            let src = match doc {
                Value::Object(map) => map,
                other => {
                    out.push(other);
                    continue;
                }
            };

            let mut dst = serde_json::Map::new();
            if whitelist {
                // _id is kept unless explicitly excluded
                let id_excluded = self
                    .fields
                    .iter()
                    .any(|(n, f)| n == "_id" && *f == ProjectField::Exclude);
                if !id_excluded {
                    if let Some(id) = src.get("_id") {
                        dst.insert("_id".to_string(), id.clone());
                    }
                }
                for (name, field) in &self.fields {
                    match field {
                        ProjectField::Include => {
                            if let Some(v) = src.get(name) {
                                dst.insert(name.clone(), v.clone());
                            }
                        }
                        ProjectField::Rename(source) => {
                            let wrapped = Value::Object(src.clone());
                            if let Some(v) = get_nested_value(&wrapped, source) {
                                dst.insert(name.clone(), v.clone());
                            }
                        }
                        ProjectField::Exclude => {}
                    }
                }
            } else {
                dst = src;
                for (name, _) in &self.fields {
                    dst.remove(name);
                }
            }
            out.push(Value::Object(dst));
        }
        Ok(out)
    }
}

impl GroupStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec.as_object().ok_or_else(|| {
            FlowBaseError::AggregationError("$group must be an object".to_string())
        })?;

        let id_spec = obj.get("_id").ok_or_else(|| {
            FlowBaseError::AggregationError("$group requires an _id field".to_string())
        })?;

        let id = match id_spec {
            Value::Null => GroupId::Null,
            Value::String(s) if s.starts_with('$') => {
                GroupId::Field(s.trim_start_matches('$').to_string())
            }
            _ => {
                return Err(FlowBaseError::AggregationError(
                    "$group _id must be null or a field reference".to_string(),
                ))
            }
        };

        let mut accumulators = Vec::new();
        for (name, acc_spec) in obj {
            if name == "_id" {
                continue;
            }
            accumulators.push((name.clone(), Accumulator::from_json(acc_spec)?));
        }

        Ok(GroupStage { id, accumulators })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        // Group membership keyed by the serialized group value, preserving
        // first-seen order
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, (Value, Vec<Value>)> = HashMap::new();

        for doc in docs {
            let group_value = match &self.id {
                GroupId::Null => Value::Null,
                GroupId::Field(field) => get_nested_value(&doc, field)
                    .cloned()
                    .unwrap_or(Value::Null),
            };
            let key = group_value.to_string();
            if !groups.contains_key(&key) {
                order.push(key.clone());
                groups.insert(key.clone(), (group_value, Vec::new()));
            }
            if let Some((_, members)) = groups.get_mut(&key) {
                members.push(doc);
            }
        }

        let mut out = Vec::with_capacity(order.len());
        for key in order {
            let (group_value, members) = match groups.remove(&key) {
                Some(entry) => entry,
                None => continue,
            };

            let mut result = serde_json::Map::new();
            result.insert("_id".to_string(), group_value);
            for (name, acc) in &self.accumulators {
                result.insert(name.clone(), acc.compute(&members));
            }
            out.push(Value::Object(result));
        }

        Ok(out)
    }
}

impl Accumulator {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec.as_object().ok_or_else(|| {
            FlowBaseError::AggregationError("Accumulator must be an object".to_string())
        })?;
        if obj.len() != 1 {
            return Err(FlowBaseError::AggregationError(
                "Accumulator must have exactly one operator".to_string(),
            ));
        }

        let (op, operand) = obj.iter().next().unwrap();
        match op.as_str() {
            "$sum" => match operand {
                Value::Number(n) => Ok(Accumulator::Sum(SumExpression::Constant(
                    n.as_i64().unwrap_or(1),
                ))),
                Value::String(_) => Ok(Accumulator::Sum(SumExpression::Field(
                    parse_field_reference(operand, "$sum")?,
                ))),
                _ => Err(FlowBaseError::AggregationError(
                    "$sum must be a number or a field reference".to_string(),
                )),
            },
            "$avg" => Ok(Accumulator::Avg(parse_field_reference(operand, "$avg")?)),
            "$min" => Ok(Accumulator::Min(parse_field_reference(operand, "$min")?)),
            "$max" => Ok(Accumulator::Max(parse_field_reference(operand, "$max")?)),
            "$first" => Ok(Accumulator::First(parse_field_reference(operand, "$first")?)),
            "$last" => Ok(Accumulator::Last(parse_field_reference(operand, "$last")?)),
            other => Err(FlowBaseError::AggregationError(format!(
                "Unsupported accumulator: {}",
                other
            ))),
        }
    }

    fn compute(&self, docs: &[Value]) -> Value {
        match self {
            Accumulator::Sum(SumExpression::Constant(c)) => Value::from(*c * docs.len() as i64),
            Accumulator::Sum(SumExpression::Field(field)) => {
                let mut int_sum: i64 = 0;
                let mut float_sum: f64 = 0.0;
                let mut is_float = false;
                for doc in docs {
                    if let Some(v) = get_nested_value(doc, field) {
                        if let Some(i) = v.as_i64() {
                            int_sum += i;
                        } else if let Some(f) = v.as_f64() {
                            is_float = true;
                            float_sum += f;
                        }
                    }
                }
                if is_float {
                    Value::from(float_sum + int_sum as f64)
                } else {
                    Value::from(int_sum)
                }
            }
            Accumulator::Avg(field) => {
                let mut sum = 0.0;
                let mut count = 0u64;
                for doc in docs {
                    if let Some(n) = get_nested_value(doc, field).and_then(|v| v.as_f64()) {
                        sum += n;
                        count += 1;
                    }
                }
                if count == 0 {
                    Value::Null
                } else {
                    Value::from(sum / count as f64)
                }
            }
            Accumulator::Min(field) => compute_extremum(docs, field, f64::min),
            Accumulator::Max(field) => compute_extremum(docs, field, f64::max),
            Accumulator::First(field) => docs
                .first()
                .and_then(|doc| get_nested_value(doc, field))
                .cloned()
                .unwrap_or(Value::Null),
            Accumulator::Last(field) => docs
                .last()
                .and_then(|doc| get_nested_value(doc, field))
                .cloned()
                .unwrap_or(Value::Null),
        }
    }
}

impl SortStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec.as_object().ok_or_else(|| {
            FlowBaseError::AggregationError("$sort must be an object".to_string())
        })?;
        if obj.is_empty() {
            return Err(FlowBaseError::AggregationError(
                "$sort requires at least one field".to_string(),
            ));
        }

        let mut fields = Vec::with_capacity(obj.len());
        for (name, dir) in obj {
            let direction = match dir.as_i64() {
                Some(1) => SortDirection::Ascending,
                Some(-1) => SortDirection::Descending,
                _ => {
                    return Err(FlowBaseError::AggregationError(format!(
                        "$sort direction for '{}' must be 1 or -1",
                        name
                    )))
                }
            };
            fields.push((name.clone(), direction));
        }

        Ok(SortStage { fields })
    }

    fn execute(&self, mut docs: Vec<Value>) -> Vec<Value> {
        docs.sort_by(|a, b| {
            for (field, direction) in &self.fields {
                let av = get_nested_value(a, field).unwrap_or(&Value::Null);
                let bv = get_nested_value(b, field).unwrap_or(&Value::Null);
                let ordering = compare_values(av, bv).unwrap_or(Ordering::Equal);
                let ordering = match direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        docs
    }
}
