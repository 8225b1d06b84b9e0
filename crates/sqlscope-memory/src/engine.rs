//! Request evaluation over in-memory tables.
//!
//! Every write is applied to the given [`Tables`] and recorded in a change
//! log. Transactions evaluate against a private copy and replay their log
//! onto the committed tables at commit.

use crate::schema::ModelSchema;
use serde_json::{Map, Number, Value, json};
use sqlscope_core::{Action, Request, StoreError};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

pub(crate) type Record = Map<String, Value>;

#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    rows: BTreeMap<i64, Record>,
}

/// Per-model id sequences.
///
/// Sequences are shared by every connection and transaction and are never
/// rolled back, so concurrent transactions never hand out the same id.
#[derive(Debug, Clone, Default)]
pub(crate) struct Sequences {
    next: HashMap<String, i64>,
}

impl Sequences {
    fn allocate(&mut self, model: &str) -> Result<i64, StoreError> {
        let next = self.next.entry(model.to_string()).or_insert(1);
        let id = *next;
        *next = id.checked_add(1).ok_or_else(|| id_out_of_range(model, id))?;
        Ok(id)
    }

    fn bump_past(&mut self, model: &str, id: i64) -> Result<(), StoreError> {
        let next = self.next.entry(model.to_string()).or_insert(1);
        if id >= *next {
            *next = id.checked_add(1).ok_or_else(|| id_out_of_range(model, id))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    tables: HashMap<String, Table>,
}

impl Tables {
    pub(crate) fn rows(&self, model: &str) -> Vec<Value> {
        self.tables
            .get(model)
            .map(|table| table.rows.values().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }
}

/// A write recorded while evaluating a request.
#[derive(Debug, Clone)]
pub(crate) enum Change {
    Insert {
        model: String,
        id: i64,
        row: Record,
    },
    Update {
        model: String,
        id: i64,
        before: Record,
        after: Record,
    },
    Delete {
        model: String,
        id: i64,
        before: Record,
    },
}

pub(crate) fn unique_violation(model: &str, field: &str) -> StoreError {
    StoreError::known(
        "P2002",
        format!("Unique constraint failed on the fields: (`{}`) of model `{}`", field, model),
    )
    .with_meta(json!({ "target": [field], "modelName": model }))
}

fn not_found(model: &str, action: Action) -> StoreError {
    StoreError::known(
        "P2025",
        format!("No `{}` record was found for a {}.", model, action),
    )
    .with_meta(json!({ "modelName": model, "cause": "Record to operate on not found." }))
}

fn invalid_args(message: impl Into<String>) -> StoreError {
    StoreError::known("P2019", format!("Input error. {}", message.into()))
}

fn id_out_of_range(model: &str, id: i64) -> StoreError {
    StoreError::known(
        "P2020",
        format!("Value out of range for the type. Id {} of `{}` leaves no room for the sequence", id, model),
    )
    .with_meta(json!({ "target": ["id"], "modelName": model }))
}

fn write_conflict(model: &str, id: i64) -> StoreError {
    StoreError::known(
        "P2034",
        format!(
            "Transaction failed due to a write conflict on `{}` record {}. Please retry your transaction",
            model, id
        ),
    )
}

/// Evaluate `request`, applying writes to `tables` and appending them to `log`.
pub(crate) fn execute(
    schemas: &HashMap<String, ModelSchema>,
    sequences: &mut Sequences,
    tables: &mut Tables,
    request: &Request,
    log: &mut Vec<Change>,
) -> Result<Value, StoreError> {
    let Some(schema) = schemas.get(&request.model) else {
        return Err(StoreError::known(
            "P2021",
            format!("The table `{}` does not exist in the current database.", request.model),
        ));
    };
    let args = match &request.args {
        Value::Null => Value::Object(Map::new()),
        Value::Object(_) => request.args.clone(),
        _ => return Err(invalid_args("arguments must be an object")),
    };
    let table = tables.tables.entry(request.model.clone()).or_default();
    let mut eval = Eval {
        schema,
        sequences,
        table,
        log,
    };

    match request.action {
        Action::Create => eval.create(&args["data"]).map(Value::Object),
        Action::CreateMany => {
            let Value::Array(items) = &args["data"] else {
                return Err(invalid_args("`data` must be a list"));
            };
            for item in items {
                eval.create(item)?;
            }
            Ok(json!({ "count": items.len() }))
        }
        Action::FindUnique | Action::FindFirst => {
            let found = eval.select(&args)?.into_iter().next();
            Ok(found.map_or(Value::Null, |(_, row)| Value::Object(row)))
        }
        Action::FindUniqueOrThrow | Action::FindFirstOrThrow => {
            match eval.select(&args)?.into_iter().next() {
                Some((_, row)) => Ok(Value::Object(row)),
                None => Err(not_found(&request.model, request.action)),
            }
        }
        Action::FindMany => Ok(Value::Array(
            eval.select(&args)?
                .into_iter()
                .map(|(_, row)| Value::Object(row))
                .collect(),
        )),
        Action::Update => {
            let Some(id) = eval.first_match(&args["where"])? else {
                return Err(not_found(&request.model, request.action));
            };
            eval.update(id, &args["data"]).map(Value::Object)
        }
        Action::UpdateMany => {
            let ids = eval.matching_ids(&args["where"])?;
            for id in &ids {
                eval.update(*id, &args["data"])?;
            }
            Ok(json!({ "count": ids.len() }))
        }
        Action::Upsert => match eval.first_match(&args["where"])? {
            Some(id) => eval.update(id, &args["update"]).map(Value::Object),
            None => eval.create(&args["create"]).map(Value::Object),
        },
        Action::Delete => {
            let Some(id) = eval.first_match(&args["where"])? else {
                return Err(not_found(&request.model, request.action));
            };
            Ok(Value::Object(eval.delete(id)))
        }
        Action::DeleteMany => {
            let ids = eval.matching_ids(&args["where"])?;
            for id in &ids {
                eval.delete(*id);
            }
            Ok(json!({ "count": ids.len() }))
        }
        Action::Count => Ok(json!(eval.matching_ids(&args["where"])?.len())),
        Action::Aggregate => eval.aggregate(&args),
        Action::GroupBy => eval.group_by(&args),
    }
}

/// Replay a transaction's change log onto the committed tables.
///
/// Either every change applies or `tables` is left untouched.
pub(crate) fn replay(
    schemas: &HashMap<String, ModelSchema>,
    tables: &mut Tables,
    log: &[Change],
) -> Result<(), StoreError> {
    let mut next = tables.clone();
    for change in log {
        match change {
            Change::Insert { model, id, row } => {
                let table = next.tables.entry(model.clone()).or_default();
                if table.rows.contains_key(id) {
                    return Err(write_conflict(model, *id));
                }
                table.rows.insert(*id, row.clone());
            }
            Change::Update {
                model,
                id,
                before,
                after,
            } => {
                let table = next.tables.entry(model.clone()).or_default();
                match table.rows.get_mut(id) {
                    Some(current) if current == before => *current = after.clone(),
                    _ => return Err(write_conflict(model, *id)),
                }
            }
            Change::Delete { model, id, before } => {
                let table = next.tables.entry(model.clone()).or_default();
                match table.rows.get(id) {
                    Some(current) if current == before => {
                        table.rows.remove(id);
                    }
                    _ => return Err(write_conflict(model, *id)),
                }
            }
        }
    }
    check_unique(schemas, &next)?;
    *tables = next;
    Ok(())
}

fn check_unique(
    schemas: &HashMap<String, ModelSchema>,
    tables: &Tables,
) -> Result<(), StoreError> {
    for (model, table) in &tables.tables {
        let Some(schema) = schemas.get(model) else {
            continue;
        };
        for field in schema.unique_fields() {
            let mut seen = Vec::new();
            for row in table.rows.values() {
                match row.get(field) {
                    None | Some(Value::Null) => {}
                    Some(value) if seen.contains(&value) => {
                        return Err(unique_violation(model, field));
                    }
                    Some(value) => seen.push(value),
                }
            }
        }
    }
    Ok(())
}

struct Eval<'a> {
    schema: &'a ModelSchema,
    sequences: &'a mut Sequences,
    table: &'a mut Table,
    log: &'a mut Vec<Change>,
}

impl Eval<'_> {
    fn create(&mut self, data: &Value) -> Result<Record, StoreError> {
        let Value::Object(data) = data else {
            return Err(invalid_args("`data` must be an object"));
        };
        let mut row = data.clone();
        let id = match row.get("id") {
            None | Some(Value::Null) => self.sequences.allocate(self.schema.name())?,
            Some(value) => {
                let id = value
                    .as_i64()
                    .ok_or_else(|| invalid_args("`id` must be an integer"))?;
                if self.table.rows.contains_key(&id) {
                    return Err(unique_violation(self.schema.name(), "id"));
                }
                self.sequences.bump_past(self.schema.name(), id)?;
                id
            }
        };
        row.insert("id".to_string(), json!(id));
        self.validate(&row, None)?;

        self.table.rows.insert(id, row.clone());
        self.log.push(Change::Insert {
            model: self.schema.name().to_string(),
            id,
            row: row.clone(),
        });
        Ok(row)
    }

    fn update(&mut self, id: i64, data: &Value) -> Result<Record, StoreError> {
        let Value::Object(data) = data else {
            return Err(invalid_args("`data` must be an object"));
        };
        if data.get("id").is_some_and(|v| v.as_i64() != Some(id)) {
            return Err(invalid_args("`id` cannot be changed"));
        }
        let before = self
            .table
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| invalid_args("record vanished during update"))?;
        let mut after = before.clone();
        for (field, value) in data {
            after.insert(field.clone(), value.clone());
        }
        self.validate(&after, Some(id))?;

        self.table.rows.insert(id, after.clone());
        self.log.push(Change::Update {
            model: self.schema.name().to_string(),
            id,
            before,
            after: after.clone(),
        });
        Ok(after)
    }

    fn delete(&mut self, id: i64) -> Record {
        let before = self.table.rows.remove(&id).unwrap_or_default();
        self.log.push(Change::Delete {
            model: self.schema.name().to_string(),
            id,
            before: before.clone(),
        });
        before
    }

    fn validate(&self, row: &Record, existing: Option<i64>) -> Result<(), StoreError> {
        for field in self.schema.required_fields() {
            if matches!(row.get(field), None | Some(Value::Null)) {
                return Err(StoreError::known(
                    "P2011",
                    format!("Null constraint violation on the fields: (`{}`)", field),
                )
                .with_meta(json!({ "constraint": [field] })));
            }
        }
        for (field, max) in self.schema.length_limits() {
            if let Some(Value::String(text)) = row.get(field) {
                if text.chars().count() > max {
                    return Err(StoreError::known(
                        "P2000",
                        format!(
                            "The provided value for the column is too long for the column's type. Column: {}",
                            field
                        ),
                    )
                    .with_meta(json!({ "column_name": field })));
                }
            }
        }
        for field in self.schema.unique_fields() {
            let Some(value) = row.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = self
                .table
                .rows
                .iter()
                .any(|(id, other)| Some(*id) != existing && other.get(field) == Some(value));
            if clash {
                return Err(unique_violation(self.schema.name(), field));
            }
        }
        Ok(())
    }

    fn matching_ids(&self, filter: &Value) -> Result<Vec<i64>, StoreError> {
        let mut ids = Vec::new();
        for (id, row) in &self.table.rows {
            if matches_filter(row, filter)? {
                ids.push(*id);
            }
        }
        Ok(ids)
    }

    fn first_match(&self, filter: &Value) -> Result<Option<i64>, StoreError> {
        Ok(self.matching_ids(filter)?.into_iter().next())
    }

    fn select(&self, args: &Value) -> Result<Vec<(i64, Record)>, StoreError> {
        let mut rows = Vec::new();
        for (id, row) in &self.table.rows {
            if matches_filter(row, &args["where"])? {
                rows.push((*id, row.clone()));
            }
        }

        if let Value::Object(order) = &args["orderBy"] {
            for (field, direction) in order.iter().rev() {
                let descending = match direction.as_str() {
                    Some("asc") => false,
                    Some("desc") => true,
                    _ => return Err(invalid_args("`orderBy` direction must be \"asc\" or \"desc\"")),
                };
                rows.sort_by(|(_, a), (_, b)| {
                    let ord = compare_values(a.get(field), b.get(field));
                    if descending { ord.reverse() } else { ord }
                });
            }
        }

        let skip = usize_arg(args, "skip")?.unwrap_or(0);
        let take = usize_arg(args, "take")?.unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(skip).take(take).collect())
    }

    fn aggregate(&self, args: &Value) -> Result<Value, StoreError> {
        let rows: Vec<Record> = self.select(args)?.into_iter().map(|(_, row)| row).collect();
        let mut result = Map::new();
        if args.get("_count").is_some_and(|v| !v.is_null()) {
            result.insert("_count".to_string(), json!(rows.len()));
        }
        let reducers: [(&str, Reducer); 3] =
            [("_sum", reduce_sum), ("_min", reduce_min), ("_max", reduce_max)];
        for (key, reduce) in reducers {
            let Some(Value::Object(fields)) = args.get(key) else {
                continue;
            };
            let mut out = Map::new();
            for field in fields.keys() {
                let values: Vec<&Value> = rows
                    .iter()
                    .filter_map(|row| row.get(field))
                    .filter(|v| v.is_number())
                    .collect();
                out.insert(field.clone(), reduce(&values));
            }
            result.insert(key.to_string(), Value::Object(out));
        }
        Ok(Value::Object(result))
    }

    fn group_by(&self, args: &Value) -> Result<Value, StoreError> {
        let Value::Array(by) = &args["by"] else {
            return Err(invalid_args("`by` must be a list of field names"));
        };
        let fields: Vec<&str> = by.iter().filter_map(Value::as_str).collect();
        if fields.len() != by.len() || fields.is_empty() {
            return Err(invalid_args("`by` must be a non-empty list of field names"));
        }

        let mut groups: BTreeMap<String, (Record, u64)> = BTreeMap::new();
        for (_, row) in self.select(&json!({ "where": args["where"] }))? {
            let mut key_row = Map::new();
            for field in &fields {
                key_row.insert(
                    (*field).to_string(),
                    row.get(*field).cloned().unwrap_or(Value::Null),
                );
            }
            let key = Value::Object(key_row.clone()).to_string();
            groups.entry(key).or_insert((key_row, 0)).1 += 1;
        }

        Ok(Value::Array(
            groups
                .into_values()
                .map(|(mut row, count)| {
                    row.insert("_count".to_string(), json!(count));
                    Value::Object(row)
                })
                .collect(),
        ))
    }
}

fn matches_filter(row: &Record, filter: &Value) -> Result<bool, StoreError> {
    match filter {
        Value::Null => Ok(true),
        Value::Object(conditions) => Ok(conditions
            .iter()
            .all(|(field, expected)| row.get(field).unwrap_or(&Value::Null) == expected)),
        _ => Err(invalid_args("`where` must be an object")),
    }
}

fn usize_arg(args: &Value, key: &str) -> Result<Option<usize>, StoreError> {
    match &args[key] {
        Value::Null => Ok(None),
        value => value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| invalid_args(format!("`{}` must be a non-negative integer", key))),
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            as_f64(x).partial_cmp(&as_f64(y)).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn as_f64(n: &Number) -> f64 {
    n.as_f64().unwrap_or(0.0)
}

type Reducer = fn(&[&Value]) -> Value;

fn reduce_sum(values: &[&Value]) -> Value {
    if values.is_empty() {
        return Value::Null;
    }
    let exact = values
        .iter()
        .try_fold(0_i64, |sum, v| v.as_i64().and_then(|n| sum.checked_add(n)));
    match exact {
        Some(sum) => json!(sum),
        // Non-integer input or an i64 overflow.
        None => json!(values.iter().filter_map(|v| v.as_f64()).sum::<f64>()),
    }
}

fn reduce_min(values: &[&Value]) -> Value {
    values
        .iter()
        .min_by(|a, b| compare_values(Some(a), Some(b)))
        .map_or(Value::Null, |v| (*v).clone())
}

fn reduce_max(values: &[&Value]) -> Value {
    values
        .iter()
        .max_by(|a, b| compare_values(Some(a), Some(b)))
        .map_or(Value::Null, |v| (*v).clone())
}
