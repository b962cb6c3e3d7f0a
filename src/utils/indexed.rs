use serde_json::Value;

/// Check whether a JSON value is an indexed collection: an object that
/// encodes an array as `{"0": .., "1": .., "length": N}`. The 7TV GraphQL
/// layer emits paint stop lists in this shape.
pub fn is_indexed_collection(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|obj| obj.get("length"))
        .map(|len| len.is_u64() || len.is_i64())
        .unwrap_or(false)
}

/// Convert an indexed collection into a dense ordered Vec. Indices with no
/// entry (or a null entry) are skipped rather than erroring; wire data from
/// the cosmetics endpoint occasionally has gaps.
pub fn to_array(value: &Value) -> Vec<Value> {
    let Some(obj) = value.as_object() else {
        return Vec::new();
    };

    let length = obj
        .get("length")
        .and_then(|l| l.as_u64())
        .unwrap_or(0) as usize;

    let mut items = Vec::with_capacity(length);
    for index in 0..length {
        match obj.get(&index.to_string()) {
            Some(item) if !item.is_null() => items.push(item.clone()),
            _ => {}
        }
    }

    items
}
