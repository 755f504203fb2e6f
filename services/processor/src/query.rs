//! Event search query composition.
//!
//! Each optional criterion maps to a join requirement and a predicate. Joins
//! are emitted at most once per table, in a fixed order, no matter how many
//! criteria reference the joined table.

use serde::Deserialize;

const EVENT_COLUMNS: &str = "events.id, events.source_id, events.start_time, events.end_time, \
     events.tag, events.comment, events.created_at, events.updated_at";

/// Optional search criteria, taken verbatim from the query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    /// Equality on the event tag
    pub tag: Option<String>,
    /// Inclusive lower bound on any risk sample of the event's source
    #[serde(rename = "minRisk")]
    pub min_risk: Option<String>,
    /// Inclusive upper bound on any risk sample of the event's source
    #[serde(rename = "maxRisk")]
    pub max_risk: Option<String>,
    /// Inclusive lower bound on any location sample's km/h speed
    #[serde(rename = "minSpeed")]
    pub min_speed: Option<String>,
    /// Inclusive upper bound on any location sample's km/h speed
    #[serde(rename = "maxSpeed")]
    pub max_speed: Option<String>,
}

/// Tables the event query may join
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Join {
    Risk,
    Location,
}

impl Join {
    fn clause(&self) -> &'static str {
        match self {
            Join::Risk => "JOIN risk_data ON risk_data.event_id = events.source_id",
            Join::Location => "JOIN location_data ON location_data.source_id = events.source_id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gte,
    Lte,
}

impl Comparison {
    fn operator(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Gte => ">=",
            Comparison::Lte => "<=",
        }
    }
}

/// One `column op $n` clause with its bind value
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: &'static str,
    pub comparison: Comparison,
    /// Numeric predicates are cast by the database, so bind values stay text
    pub numeric: bool,
    pub value: String,
}

/// Composed event query: base table, deduplicated joins, predicates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    joins: Vec<Join>,
    predicates: Vec<Predicate>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the query for a filter. Empty strings count as absent.
    pub fn from_filter(filter: &EventFilter) -> Self {
        let mut query = Self::new();

        if let Some(tag) = present(&filter.tag) {
            query.add(None, "events.tag", Comparison::Eq, false, tag);
        }

        let risk = [
            (&filter.min_risk, Comparison::Gte),
            (&filter.max_risk, Comparison::Lte),
        ];
        for (bound, comparison) in risk {
            if let Some(value) = present(bound) {
                query.add(Some(Join::Risk), "risk_data.prob", comparison, true, value);
            }
        }

        let speed = [
            (&filter.min_speed, Comparison::Gte),
            (&filter.max_speed, Comparison::Lte),
        ];
        for (bound, comparison) in speed {
            if let Some(value) = present(bound) {
                query.add(
                    Some(Join::Location),
                    "location_data.speed_kmh",
                    comparison,
                    true,
                    value,
                );
            }
        }

        query
    }

    /// Add a predicate and, if given, the join it depends on
    pub fn add(
        &mut self,
        join: Option<Join>,
        column: &'static str,
        comparison: Comparison,
        numeric: bool,
        value: &str,
    ) -> &mut Self {
        if let Some(join) = join {
            if !self.joins.contains(&join) {
                self.joins.push(join);
                self.joins.sort();
            }
        }
        self.predicates.push(Predicate {
            column,
            comparison,
            numeric,
            value: value.to_string(),
        });
        self
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Render to SQL with `$n` placeholders, returning the bind values in order
    pub fn to_sql(&self) -> (String, Vec<String>) {
        let mut sql = format!("SELECT {} FROM events", EVENT_COLUMNS);

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join.clause());
        }

        sql.push_str(" WHERE 1=1");

        let mut bindings = Vec::with_capacity(self.predicates.len());
        for (index, predicate) in self.predicates.iter().enumerate() {
            let cast = if predicate.numeric { "::float8" } else { "" };
            sql.push_str(&format!(
                " AND {} {} ${}{}",
                predicate.column,
                predicate.comparison.operator(),
                index + 1,
                cast
            ));
            bindings.push(predicate.value.clone());
        }

        (sql, bindings)
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
