use indexmap::IndexMap;

use crate::error::{LiantError, Result};
use crate::logic::coerce_value;
use crate::model::{EntityType, FieldDescriptor, ScalarType, Value};
use crate::store::{Filter, FilterOp, OrderClause};

/// Scalar fields that can be filtered and ordered on from query parameters
fn plain_fields(et: &EntityType) -> impl Iterator<Item = &FieldDescriptor> {
    et.fields
        .values()
        .filter(|field| !field.internal && field.scalar_type().is_some())
}

const TRUTHY: &[&str] = &["true", "t", "yes", "y", "on", "1"];
const FALSY: &[&str] = &["false", "f", "no", "n", "off", "0"];

/// Filters built from query parameters.
///
/// For each plain scalar field `f`: `f`, `f_gt`, `f_ge`, `f_lt`, `f_le`,
/// `f_isnull`, and `f_like` for text. Values are coerced without the length
/// check. Parameters that match nothing are ignored.
pub fn auto_filters(et: &EntityType, params: &IndexMap<String, String>) -> Result<Vec<Filter>> {
    let mut filters = Vec::new();
    for field in plain_fields(et) {
        let name = &field.name;
        let coerced = |text: &str| {
            coerce_value(
                &et.name,
                field,
                &serde_json::Value::String(text.to_string()),
                false,
            )
        };

        if let Some(text) = params.get(name.as_str()) {
            filters.push(Filter::eq(name, coerced(text)?));
        }
        if matches!(field.scalar_type(), Some(ScalarType::Text)) {
            if let Some(text) = params.get(&format!("{}_like", name)) {
                filters.push(Filter::new(name, FilterOp::Like, Value::Text(text.clone())));
            }
        }
        for (suffix, op) in [
            ("gt", FilterOp::Gt),
            ("ge", FilterOp::Ge),
            ("lt", FilterOp::Lt),
            ("le", FilterOp::Le),
        ] {
            if let Some(text) = params.get(&format!("{}_{}", name, suffix)) {
                filters.push(Filter::new(name, op, coerced(text)?));
            }
        }
        if let Some(text) = params.get(&format!("{}_isnull", name)) {
            let token = text.trim().to_lowercase();
            let expect_null = if TRUTHY.contains(&token.as_str()) {
                true
            } else if FALSY.contains(&token.as_str()) {
                false
            } else {
                return Err(LiantError::coercion(
                    &et.name,
                    name,
                    format!("'{}' is not a boolean", text),
                ));
            };
            filters.push(Filter::new(name, FilterOp::IsNull(expect_null), Value::Null));
        }
    }
    Ok(filters)
}

/// `order=a,b desc` over plain scalar fields
pub fn order_clauses(
    et: &EntityType,
    params: &IndexMap<String, String>,
) -> Result<Vec<OrderClause>> {
    let Some(order) = params.get("order").filter(|order| !order.is_empty()) else {
        return Ok(Vec::new());
    };

    let clauses: Vec<OrderClause> = order
        .split(',')
        .map(|item| match item.strip_suffix(" desc") {
            Some(field) => OrderClause {
                field: field.to_string(),
                descending: true,
            },
            None => OrderClause {
                field: item.to_string(),
                descending: false,
            },
        })
        .collect();

    let invalid: Vec<String> = clauses
        .iter()
        .filter(|clause| !plain_fields(et).any(|field| field.name == clause.field))
        .map(|clause| clause.field.clone())
        .collect();
    if !invalid.is_empty() {
        return Err(LiantError::InvalidOrder(invalid));
    }
    Ok(clauses)
}

/// Half-open item range from `pageSize` and `page` (zero based); none when
/// `pageSize` is absent or not positive
pub fn pager_slice(params: &IndexMap<String, String>) -> Result<Option<(i64, i64)>> {
    let number = |name: &str| -> Result<Option<i64>> {
        params
            .get(name)
            .map(|text| {
                text.trim()
                    .parse::<i64>()
                    .map_err(|_| LiantError::coercion("request", name, "expected an integer"))
            })
            .transpose()
    };

    let Some(page_size) = number("pageSize")?.filter(|size| *size > 0) else {
        return Ok(None);
    };
    let page = number("page")?.unwrap_or(0).max(0);
    let start = page.saturating_mul(page_size);
    Ok(Some((start, start.saturating_add(page_size))))
}
