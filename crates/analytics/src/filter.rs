//! Property filter compilation
//!
//! Turns declarative property filters into parameterized SQL conditions.
//! Property names are bound as parameters, never spliced into the text.

use serde::{Deserialize, Serialize};

use beacon_query::SqlParam;

use crate::error::{AnalyticsError, Result};
use crate::plan::Fragment;
use crate::query::{Entity, ValueType};
use crate::report::NONE_TOKEN;

/// Filter comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

/// How a filter chains to the previous filter on the same property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    And,
    Or,
}

impl Default for LogicalOp {
    fn default() -> Self {
        LogicalOp::And
    }
}

/// One property filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub entity: Entity,
    pub property: String,
    pub value_type: ValueType,
    pub operator: Operator,
    pub value: String,
    #[serde(default)]
    pub logical_op: LogicalOp,
}

impl PropertyFilter {
    /// Categorical equality filter
    pub fn equals(entity: Entity, property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            entity,
            property: property.into(),
            value_type: ValueType::Categorical,
            operator: Operator::Equals,
            value: value.into(),
            logical_op: LogicalOp::And,
        }
    }

    /// Chain this filter to the previous one with OR instead of AND
    pub fn or(mut self) -> Self {
        self.logical_op = LogicalOp::Or;
        self
    }
}

/// Parameterized accessor for a property value
pub fn property_fragment(entity: Entity, property: &str) -> Fragment {
    let column = match entity {
        Entity::Event => "properties",
        Entity::User => "user_properties",
    };
    Fragment::with_params(
        format!("JSONExtractString({}, ?)", column),
        vec![SqlParam::from(property)],
    )
}

/// Compile one filter into a condition fragment
fn filter_condition(filter: &PropertyFilter) -> Result<Fragment> {
    let prop = property_fragment(filter.entity, &filter.property);

    // Absent and empty string are the same thing
    if filter.value == NONE_TOKEN {
        return match filter.operator {
            Operator::Equals => Ok(Fragment::with_params(
                format!("{} = ''", prop.sql),
                prop.params,
            )),
            Operator::NotEquals => Ok(Fragment::with_params(
                format!("{} != ''", prop.sql),
                prop.params,
            )),
            _ => Err(AnalyticsError::InvalidQuery(format!(
                "operator {:?} is not supported with {}",
                filter.operator, NONE_TOKEN
            ))),
        };
    }

    match filter.value_type {
        ValueType::Categorical => {
            let mut params = prop.params;
            let sql = match filter.operator {
                Operator::Equals => format!("{} = ?", prop.sql),
                Operator::NotEquals => format!("{} != ?", prop.sql),
                Operator::Contains => format!("{} LIKE ?", prop.sql),
                Operator::NotContains => format!("{} NOT LIKE ?", prop.sql),
                _ => {
                    return Err(AnalyticsError::InvalidQuery(format!(
                        "operator {:?} is not valid for categorical property '{}'",
                        filter.operator, filter.property
                    )))
                }
            };
            let value = match filter.operator {
                Operator::Contains | Operator::NotContains => format!("%{}%", filter.value),
                _ => filter.value.clone(),
            };
            params.push(SqlParam::from(value));
            Ok(Fragment::with_params(sql, params))
        }
        ValueType::Numerical | ValueType::Datetime => {
            let numeric: f64 = filter.value.parse().map_err(|_| {
                AnalyticsError::InvalidQuery(format!(
                    "non-numeric value '{}' for property '{}'",
                    filter.value, filter.property
                ))
            })?;
            let op = match filter.operator {
                Operator::Equals => "=",
                Operator::NotEquals => "!=",
                Operator::GreaterThan => ">",
                Operator::GreaterThanOrEqual => ">=",
                Operator::LessThan => "<",
                Operator::LessThanOrEqual => "<=",
                _ => {
                    return Err(AnalyticsError::InvalidQuery(format!(
                        "operator {:?} is not valid for numerical property '{}'",
                        filter.operator, filter.property
                    )))
                }
            };
            let mut params = prop.params;
            params.push(SqlParam::from(numeric));
            Ok(Fragment::with_params(
                format!("toFloat64OrNull({}) {} ?", prop.sql, op),
                params,
            ))
        }
    }
}

/// Compile a filter list into one WHERE fragment.
///
/// Consecutive filters on the same (entity, property) form a group joined by
/// each filter's own logical operator; groups are ANDed together.
pub fn compile_filters(filters: &[PropertyFilter]) -> Result<Option<Fragment>> {
    if filters.is_empty() {
        return Ok(None);
    }

    let mut groups: Vec<Vec<&PropertyFilter>> = Vec::new();
    for filter in filters {
        match groups.last_mut() {
            Some(group)
                if group[0].entity == filter.entity && group[0].property == filter.property =>
            {
                group.push(filter);
            }
            _ => groups.push(vec![filter]),
        }
    }

    let mut sql = String::new();
    let mut params = Vec::new();

    for (i, group) in groups.iter().enumerate() {
        if i > 0 {
            sql.push_str(" AND ");
        }
        let wrap = group.len() > 1;
        if wrap {
            sql.push('(');
        }
        for (j, filter) in group.iter().enumerate() {
            if j > 0 {
                sql.push_str(match filter.logical_op {
                    LogicalOp::And => " AND ",
                    LogicalOp::Or => " OR ",
                });
            }
            let condition = filter_condition(filter)?;
            sql.push_str(&condition.sql);
            params.extend(condition.params);
        }
        if wrap {
            sql.push(')');
        }
    }

    Ok(Some(Fragment::with_params(sql, params)))
}
