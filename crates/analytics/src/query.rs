//! Analytics query model
//!
//! The declarative description of a behavioral question: which events, how
//! they combine, what to break down by, over which time range. Callers supply
//! fully-resolved names; identifier resolution happens upstream.

use serde::{Deserialize, Serialize};

use crate::buckets;
use crate::error::{AnalyticsError, Result};
use crate::filter::PropertyFilter;

/// What a query counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    /// Count distinct users
    UniqueUsers,
    /// Count event occurrences
    Occurrence,
}

/// How multiple events combine into one population
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combination {
    /// Users/rows matching any of the listed events (union)
    Any,
    /// Users matching every listed event (intersection; same time bucket when bucketed)
    All,
    /// Every event reported separately (union-all, per-event breakdown)
    Each,
}

/// Which property bag a filter or breakdown reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    /// Event-scoped properties
    Event,
    /// User-scoped properties captured at event time
    User,
}

/// Value type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Categorical,
    Numerical,
    Datetime,
}

/// Time bucket / truncation granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hour,
    Day,
    Week,
    Month,
    Quarter,
}

impl Granularity {
    /// ClickHouse truncation expression over `inner`.
    ///
    /// Weeks anchor to Monday explicitly rather than the server default.
    pub fn truncate_expr(&self, inner: &str) -> String {
        match self {
            Granularity::Hour => format!("toStartOfHour({})", inner),
            Granularity::Day => format!("toStartOfDay({})", inner),
            Granularity::Week => format!("toStartOfWeek({}, 1)", inner),
            Granularity::Month => format!("toStartOfMonth({})", inner),
            Granularity::Quarter => format!("toStartOfQuarter({})", inner),
        }
    }
}

/// Aggregate function for a property override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn sql_fn(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }
}

/// Aggregate-property override: replaces the default count with an aggregate
/// over a numeric property evaluated per combined row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub entity: Entity,
    pub property: String,
    pub function: AggregateFunction,
}

/// Result-size control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitMode {
    /// Standard top-N capping
    Default,
    /// Caller-requested fixed row cap (downloads)
    Download(usize),
    /// Limiting disabled (server-side safety cap still applies)
    Unlimited,
}

impl Default for LimitMode {
    fn default() -> Self {
        LimitMode::Default
    }
}

/// One event in a query, with its own filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    /// Resolved event name
    pub name: String,

    /// Optional display alias (EACH output labels)
    #[serde(default)]
    pub alias: Option<String>,

    /// Filters applying to this event only
    #[serde(default)]
    pub filters: Vec<PropertyFilter>,
}

impl EventSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            filters: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_filter(mut self, filter: PropertyFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// One requested breakdown property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBySpec {
    pub entity: Entity,

    pub property: String,

    pub value_type: ValueType,

    /// Truncation granularity (datetime properties only)
    #[serde(default)]
    pub granularity: Option<Granularity>,

    /// Event-scoped breakdowns bind to one event position; user-scoped are None
    #[serde(default)]
    pub event_index: Option<usize>,

    /// Percentile-based numeric bucketing (numerical properties only)
    #[serde(default)]
    pub bucketed: bool,
}

impl GroupBySpec {
    /// Categorical breakdown on an event property
    pub fn categorical(property: impl Into<String>, entity: Entity) -> Self {
        Self {
            entity,
            property: property.into(),
            value_type: ValueType::Categorical,
            granularity: None,
            event_index: None,
            bucketed: false,
        }
    }

    /// Numerical breakdown with percentile bucketing
    pub fn bucketed(property: impl Into<String>, entity: Entity) -> Self {
        Self {
            entity,
            property: property.into(),
            value_type: ValueType::Numerical,
            granularity: None,
            event_index: None,
            bucketed: true,
        }
    }

    /// Datetime breakdown truncated to a granularity
    pub fn datetime(property: impl Into<String>, entity: Entity, granularity: Granularity) -> Self {
        Self {
            entity,
            property: property.into(),
            value_type: ValueType::Datetime,
            granularity: Some(granularity),
            event_index: None,
            bucketed: false,
        }
    }

    /// Scope this breakdown to one event position (0-based)
    pub fn scoped_to(mut self, event_index: usize) -> Self {
        self.event_index = Some(event_index);
        self
    }
}

/// A compiled-against behavioral query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsQuery {
    pub class: QueryClass,

    pub combination: Combination,

    /// Events in declared order; order labels EACH output and numbers
    /// event-scoped breakdowns
    pub events: Vec<EventSpec>,

    /// Filters applied to every event's step
    #[serde(default)]
    pub global_filters: Vec<PropertyFilter>,

    #[serde(default)]
    pub group_bys: Vec<GroupBySpec>,

    /// Time-series bucketing; None means a single aggregate per breakdown
    #[serde(default)]
    pub time_bucket: Option<Granularity>,

    /// IANA timezone name the range and buckets are interpreted in
    pub timezone: String,

    /// Range start, epoch seconds, inclusive
    pub from: i64,

    /// Range end, epoch seconds, exclusive
    pub to: i64,

    #[serde(default)]
    pub aggregate: Option<AggregateSpec>,

    #[serde(default)]
    pub limit: LimitMode,
}

impl AnalyticsQuery {
    /// Minimal query over one event class
    pub fn new(class: QueryClass, combination: Combination, from: i64, to: i64) -> Self {
        Self {
            class,
            combination,
            events: Vec::new(),
            global_filters: Vec::new(),
            group_bys: Vec::new(),
            time_bucket: None,
            timezone: "UTC".to_string(),
            from,
            to,
            aggregate: None,
            limit: LimitMode::Default,
        }
    }

    pub fn with_event(mut self, event: EventSpec) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_group_by(mut self, group_by: GroupBySpec) -> Self {
        self.group_bys.push(group_by);
        self
    }

    pub fn with_time_bucket(mut self, granularity: Granularity) -> Self {
        self.time_bucket = Some(granularity);
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Output label for the event at `index`: the alias when present, the
    /// name when unique, `{position}_{name}` when the name repeats.
    pub fn event_label(&self, index: usize) -> String {
        let event = &self.events[index];
        if let Some(alias) = &event.alias {
            return alias.clone();
        }
        let duplicated = self
            .events
            .iter()
            .enumerate()
            .any(|(i, e)| i != index && e.name == event.name);
        if duplicated {
            format!("{}_{}", index + 1, event.name)
        } else {
            event.name.clone()
        }
    }

    /// Validate the query before compilation.
    ///
    /// Configuration errors are caught here and never reach the database.
    pub fn validate(&self) -> Result<()> {
        if self.events.is_empty() {
            return Err(AnalyticsError::InvalidQuery(
                "query has no events".to_string(),
            ));
        }
        if self.from >= self.to {
            return Err(AnalyticsError::InvalidQuery(format!(
                "empty time range: from {} to {}",
                self.from, self.to
            )));
        }
        if self.class == QueryClass::Occurrence && self.combination == Combination::All {
            return Err(AnalyticsError::InvalidQuery(
                "ALL combination requires unique-user counting".to_string(),
            ));
        }
        buckets::parse_tz(&self.timezone)?;

        for (i, group_by) in self.group_bys.iter().enumerate() {
            if let Some(event_index) = group_by.event_index {
                if event_index >= self.events.len() {
                    return Err(AnalyticsError::InvalidQuery(format!(
                        "group by {} references event index {} but query has {} events",
                        i,
                        event_index,
                        self.events.len()
                    )));
                }
            }
            if group_by.value_type == ValueType::Datetime && group_by.granularity.is_none() {
                return Err(AnalyticsError::InvalidQuery(format!(
                    "datetime group by '{}' requires a granularity",
                    group_by.property
                )));
            }
            if group_by.bucketed && group_by.value_type != ValueType::Numerical {
                return Err(AnalyticsError::InvalidQuery(format!(
                    "bucketing requires a numerical property, got '{}'",
                    group_by.property
                )));
            }
        }
        Ok(())
    }
}

/// Engine configuration, passed explicitly into compilation and execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Events table name
    pub events_table: String,

    /// Concurrent queries per batch
    pub max_concurrent_queries: usize,

    /// Top-N cap for breakdown combinations
    pub results_limit: usize,

    /// Server-side safety row cap when post-processing limits further
    pub max_results_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            events_table: "events".to_string(),
            max_concurrent_queries: 4,
            results_limit: 100,
            max_results_limit: 100_000,
        }
    }
}
