//! Conversions between JSON lines and the typed data model.

use spyglass_types::{Data, Event, RecordField, Type, TypeKind};

/// Parses a schema document into a record layout.
///
/// ```json
/// {"name": "flow", "fields": [
///   {"name": "ts", "type": "time"},
///   {"name": "orig_h", "type": "addr"},
///   {"name": "tags", "type": "vector<string>"}
/// ]}
/// ```
pub fn parse_schema(text: &str) -> Result<Type, String> {
    let doc: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("invalid schema JSON: {e}"))?;
    let name = doc
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or("schema needs a \"name\"")?;
    let fields = doc
        .get("fields")
        .and_then(|v| v.as_array())
        .ok_or("schema needs a \"fields\" array")?;
    let mut record = Vec::new();
    for field in fields {
        let field_name = field
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or("field needs a \"name\"")?;
        let type_name = field
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or("field needs a \"type\"")?;
        record.push(RecordField::new(field_name, parse_type(type_name)?));
    }
    if record.is_empty() {
        return Err("schema has no fields".into());
    }
    Ok(Type::record(record).with_name(name))
}

fn parse_type(name: &str) -> Result<Type, String> {
    if let Some(inner) = name.strip_prefix("vector<").and_then(|s| s.strip_suffix('>')) {
        return Ok(Type::vector(parse_type(inner)?));
    }
    if let Some(inner) = name.strip_prefix("set<").and_then(|s| s.strip_suffix('>')) {
        return Ok(Type::set(parse_type(inner)?));
    }
    Ok(match name {
        "bool" => Type::bool(),
        "int" => Type::int(),
        "count" => Type::count(),
        "real" => Type::real(),
        "duration" => Type::timespan(),
        "time" => Type::timestamp(),
        "string" => Type::string(),
        "pattern" => Type::pattern(),
        "addr" => Type::address(),
        "subnet" => Type::subnet(),
        "port" => Type::port(),
        other => return Err(format!("unknown type: {other}")),
    })
}

/// Converts one JSON object into a row of the given flattened layout.
///
/// Missing and `null` fields become nil.
pub fn row_from_json(layout: &Type, value: &serde_json::Value) -> Result<Vec<Data>, String> {
    let object = value.as_object().ok_or("event is not a JSON object")?;
    layout
        .record_fields()
        .iter()
        .map(|field| match object.get(&field.name) {
            None | Some(serde_json::Value::Null) => Ok(Data::Nil),
            Some(v) => data_from_json(&field.ty, v)
                .map_err(|e| format!("field {}: {e}", field.name)),
        })
        .collect()
}

fn data_from_json(ty: &Type, value: &serde_json::Value) -> Result<Data, String> {
    use serde_json::Value;
    let fail = || format!("cannot read {value} as {ty}");
    match ty.resolve().kind() {
        TypeKind::Bool => value.as_bool().map(Data::Bool).ok_or_else(fail),
        TypeKind::Int => value.as_i64().map(Data::Int).ok_or_else(fail),
        TypeKind::Count => value.as_u64().map(Data::Count).ok_or_else(fail),
        TypeKind::Real => value.as_f64().map(Data::Real).ok_or_else(fail),
        TypeKind::Timespan => value.as_i64().map(Data::Timespan).ok_or_else(fail),
        TypeKind::Timestamp => value.as_i64().map(Data::Timestamp).ok_or_else(fail),
        TypeKind::String => value.as_str().map(|s| Data::String(s.into())).ok_or_else(fail),
        TypeKind::Pattern => value
            .as_str()
            .map(|s| Data::Pattern(s.into()))
            .ok_or_else(fail),
        TypeKind::Address => value
            .as_str()
            .and_then(|s| s.parse().ok())
            .map(Data::Address)
            .ok_or_else(fail),
        TypeKind::Subnet => value
            .as_str()
            .and_then(|s| s.parse().ok())
            .map(Data::Subnet)
            .ok_or_else(fail),
        TypeKind::Port => value
            .as_str()
            .and_then(|s| s.parse().ok())
            .map(Data::Port)
            .ok_or_else(fail),
        TypeKind::Vector(elem) => match value {
            Value::Array(xs) => xs
                .iter()
                .map(|x| data_from_json(elem, x))
                .collect::<Result<_, _>>()
                .map(Data::Vector),
            _ => Err(fail()),
        },
        TypeKind::Set(elem) => match value {
            Value::Array(xs) => xs
                .iter()
                .map(|x| data_from_json(elem, x))
                .collect::<Result<_, _>>()
                .map(Data::Set),
            _ => Err(fail()),
        },
        _ => Err(fail()),
    }
}

/// Renders an event as a flat JSON object.
pub fn event_to_json(event: &Event) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    object.insert("_id".into(), event.id.into());
    object.insert("_type".into(), event.type_name().into());
    object.insert("_ts".into(), event.timestamp.into());
    if let Data::Record(values) = &event.data {
        for (field, value) in event.ty.record_fields().iter().zip(values) {
            object.insert(field.name.clone(), data_to_json(value));
        }
    }
    serde_json::Value::Object(object)
}

fn data_to_json(x: &Data) -> serde_json::Value {
    use serde_json::Value;
    match x {
        Data::Nil => Value::Null,
        Data::Bool(b) => (*b).into(),
        Data::Int(v) => (*v).into(),
        Data::Count(v) => (*v).into(),
        Data::Real(v) => serde_json::Number::from_f64(*v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Data::Timespan(v) | Data::Timestamp(v) => (*v).into(),
        Data::String(s) | Data::Pattern(s) => s.as_str().into(),
        Data::Address(a) => a.to_string().into(),
        Data::Subnet(s) => s.to_string().into(),
        Data::Port(p) => p.to_string().into(),
        Data::Enumeration(i) => (*i).into(),
        Data::Vector(xs) | Data::Set(xs) | Data::Record(xs) => {
            Value::Array(xs.iter().map(data_to_json).collect())
        }
        Data::Map(xs) => Value::Array(
            xs.iter()
                .map(|(k, v)| Value::Array(vec![data_to_json(k), data_to_json(v)]))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_and_row_round_trip() {
        let layout = parse_schema(
            r#"{"name": "flow", "fields": [
                {"name": "ts", "type": "time"},
                {"name": "host", "type": "addr"},
                {"name": "tags", "type": "vector<string>"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(layout.name(), Some("flow"));
        let row = row_from_json(
            &layout.flatten(),
            &serde_json::json!({"ts": 123, "host": "10.0.0.1", "tags": ["a", "b"]}),
        )
        .unwrap();
        assert_eq!(row[0], Data::Timestamp(123));
        assert_eq!(row[1], Data::Address("10.0.0.1".parse().unwrap()));
        assert_eq!(
            row[2],
            Data::Vector(vec![Data::String("a".into()), Data::String("b".into())])
        );
    }

    #[test]
    fn missing_fields_become_nil() {
        let layout = parse_schema(
            r#"{"name": "x", "fields": [{"name": "n", "type": "count"}]}"#,
        )
        .unwrap();
        let row = row_from_json(&layout.flatten(), &serde_json::json!({})).unwrap();
        assert_eq!(row, vec![Data::Nil]);
    }

    #[test]
    fn bad_schema_is_rejected() {
        assert!(parse_schema("{}").is_err());
        assert!(parse_schema(r#"{"name": "x", "fields": []}"#).is_err());
        assert!(
            parse_schema(r#"{"name": "x", "fields": [{"name": "a", "type": "widget"}]}"#)
                .is_err()
        );
    }
}
