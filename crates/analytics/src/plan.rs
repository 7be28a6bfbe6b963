//! Typed query plan
//!
//! Plans are built as typed nodes (steps, unions, joins, the final aggregate)
//! and serialized to SQL text plus positional bind parameters in one pass at
//! the end. Column alignment is enforced by construction rather than by
//! string concatenation.

use beacon_query::SqlParam;

/// A rendered SQL expression plus the bind values it consumes, in order
#[derive(Debug, Clone, Default)]
pub struct Fragment {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Fragment {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Wrap this expression as `expr AS alias`
    pub fn aliased(self, alias: &str) -> Self {
        Self {
            sql: format!("{} AS {}", self.sql, alias),
            params: self.params,
        }
    }
}

/// Source of a SELECT
#[derive(Debug, Clone)]
pub enum FromNode {
    /// A base table
    Table(String),
    /// A named CTE
    Cte(String),
    /// An inner-join chain over named CTEs
    Join { base: String, joins: Vec<Join> },
}

/// One inner join with explicit equality conditions
#[derive(Debug, Clone)]
pub struct Join {
    pub table: String,
    /// Pairs of fully qualified columns, rendered `left = right`
    pub on: Vec<(String, String)>,
}

/// One SELECT node
#[derive(Debug, Clone)]
pub struct SelectNode {
    pub columns: Vec<Fragment>,
    pub from: FromNode,
    pub where_clauses: Vec<Fragment>,
    pub group_by: Vec<String>,
    pub order_by: Vec<String>,
    /// ClickHouse `LIMIT n BY (cols)` - keeps n rows per distinct key
    pub limit_by: Option<(usize, Vec<String>)>,
    pub limit: Option<usize>,
}

impl SelectNode {
    pub fn new(from: FromNode) -> Self {
        Self {
            columns: Vec::new(),
            from,
            where_clauses: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit_by: None,
            limit: None,
        }
    }

    fn render(&self, out: &mut String, params: &mut Vec<SqlParam>) {
        out.push_str("SELECT ");
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&column.sql);
            params.extend(column.params.iter().cloned());
        }

        out.push_str(" FROM ");
        match &self.from {
            FromNode::Table(name) | FromNode::Cte(name) => out.push_str(name),
            FromNode::Join { base, joins } => {
                out.push_str(base);
                for join in joins {
                    out.push_str(" INNER JOIN ");
                    out.push_str(&join.table);
                    out.push_str(" ON ");
                    for (i, (left, right)) in join.on.iter().enumerate() {
                        if i > 0 {
                            out.push_str(" AND ");
                        }
                        out.push_str(&format!("{} = {}", left, right));
                    }
                }
            }
        }

        if !self.where_clauses.is_empty() {
            out.push_str(" WHERE ");
            for (i, clause) in self.where_clauses.iter().enumerate() {
                if i > 0 {
                    out.push_str(" AND ");
                }
                out.push_str(&clause.sql);
                params.extend(clause.params.iter().cloned());
            }
        }

        if !self.group_by.is_empty() {
            out.push_str(" GROUP BY ");
            out.push_str(&self.group_by.join(", "));
        }

        if !self.order_by.is_empty() {
            out.push_str(" ORDER BY ");
            out.push_str(&self.order_by.join(", "));
        }

        if let Some((n, keys)) = &self.limit_by {
            out.push_str(&format!(" LIMIT {} BY ({})", n, keys.join(", ")));
        }

        if let Some(limit) = self.limit {
            out.push_str(&format!(" LIMIT {}", limit));
        }
    }
}

/// A plan node: one SELECT or a union of column-aligned SELECTs
#[derive(Debug, Clone)]
pub enum PlanNode {
    Select(SelectNode),
    Union { all: bool, inputs: Vec<SelectNode> },
}

impl PlanNode {
    fn render(&self, out: &mut String, params: &mut Vec<SqlParam>) {
        match self {
            PlanNode::Select(select) => select.render(out, params),
            PlanNode::Union { all, inputs } => {
                let separator = if *all {
                    " UNION ALL "
                } else {
                    " UNION DISTINCT "
                };
                for (i, input) in inputs.iter().enumerate() {
                    if i > 0 {
                        out.push_str(separator);
                    }
                    input.render(out, params);
                }
            }
        }
    }
}

/// A complete staged plan: ordered CTEs plus the final SELECT
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub ctes: Vec<(String, PlanNode)>,
    pub root: SelectNode,
}

/// Emitted SQL text plus bind values in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl QueryPlan {
    /// Serialize to SQL text, collecting bind parameters in emission order
    pub fn render(&self) -> CompiledQuery {
        let mut sql = String::new();
        let mut params = Vec::new();

        if !self.ctes.is_empty() {
            sql.push_str("WITH ");
            for (i, (name, node)) in self.ctes.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(name);
                sql.push_str(" AS (");
                node.render(&mut sql, &mut params);
                sql.push(')');
            }
            sql.push(' ');
        }

        self.root.render(&mut sql, &mut params);

        CompiledQuery { sql, params }
    }
}
