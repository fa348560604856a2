//! In-process evaluation of read-only query text.
//!
//! Runs the subset [`crate::cypher::parse_query`] accepts against any
//! [`GraphView`]: pattern matching (optional, multi-hop, variable length,
//! relationship-unique within a clause), filtering, projection with
//! grouping aggregates, DISTINCT, ORDER BY, SKIP and LIMIT. Nulls follow
//! three-valued logic; `WHERE` keeps a row only when its predicate is true.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use hashbrown::HashMap;

use crate::cypher::ast::*;
use crate::cypher::parse_query;
use crate::model::{Node, NodeId, PropertyMap, RelId, Relationship, Value};
use crate::result::{RawResult, ResultRow};
use crate::{Error, Result};

/// Read access to a stored graph.
pub(crate) trait GraphView {
    fn node(&self, id: NodeId) -> Option<&Node>;
    fn all_nodes(&self) -> Box<dyn Iterator<Item = &Node> + '_>;
    fn labelled_nodes(&self, label: &str) -> Box<dyn Iterator<Item = &Node> + '_>;
    fn outgoing(&self, id: NodeId) -> Box<dyn Iterator<Item = &Relationship> + '_>;
    fn incoming(&self, id: NodeId) -> Box<dyn Iterator<Item = &Relationship> + '_>;
}

type Row = BTreeMap<String, Value>;

/// Parse and run `statement`.
pub(crate) fn run(graph: &impl GraphView, statement: &str, params: &PropertyMap) -> Result<RawResult> {
    let query = parse_query(statement)?;
    let eval = Eval { graph, params };
    let mut rows = vec![Row::new()];
    for clause in &query.clauses {
        rows = match clause {
            Clause::Match(m) => eval.match_clause(m, rows)?,
            Clause::Unwind { expr, alias } => eval.unwind(expr, alias, rows)?,
            Clause::With(projection) => {
                let (_, projected) = eval.project(projection, rows)?;
                match &projection.filter {
                    Some(filter) => eval.filter(filter, projected)?,
                    None => projected,
                }
            }
        };
    }
    let (columns, rows) = eval.project(&query.ret, rows)?;
    Ok(RawResult { columns, rows: rows.into_iter().map(|r| ResultRow::new(r.into_iter().collect())).collect() })
}

fn failure(message: impl Into<String>) -> Error {
    Error::QueryEvaluation(message.into())
}

/// A partial match: bindings, relationships used so far in this clause,
/// and the node the pattern has reached.
type Partial = (Row, Vec<RelId>, NodeId);

struct Eval<'a, G> {
    graph: &'a G,
    params: &'a PropertyMap,
}

impl<G: GraphView> Eval<'_, G> {
    // ========================================================================
    // Clauses
    // ========================================================================

    fn match_clause(&self, clause: &MatchClause, rows: Vec<Row>) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        for row in rows {
            let mut states = vec![(row.clone(), Vec::new())];
            for pattern in &clause.patterns {
                let mut next = Vec::new();
                for (bound, used) in states {
                    next.extend(self.match_pattern(pattern, bound, used)?.into_iter().map(|(r, u, _)| (r, u)));
                }
                states = next;
            }
            let mut matched: Vec<Row> = states.into_iter().map(|(r, _)| r).collect();
            if let Some(filter) = &clause.filter {
                matched = self.filter(filter, matched)?;
            }
            if matched.is_empty() && clause.optional {
                let mut padded = row;
                for alias in clause.patterns.iter().flat_map(pattern_aliases) {
                    padded.entry(alias.to_owned()).or_insert(Value::Null);
                }
                out.push(padded);
            } else {
                out.extend(matched);
            }
        }
        Ok(out)
    }

    fn unwind(&self, expr: &Expr, alias: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        for row in rows {
            let items = match self.eval(expr, &row)? {
                Value::Null => Vec::new(),
                Value::List(items) => items,
                single => vec![single],
            };
            for item in items {
                let mut next = row.clone();
                next.insert(alias.to_owned(), item);
                out.push(next);
            }
        }
        Ok(out)
    }

    fn filter(&self, predicate: &Expr, rows: Vec<Row>) -> Result<Vec<Row>> {
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            if truth(&self.eval(predicate, &row)?)? == Some(true) {
                kept.push(row);
            }
        }
        Ok(kept)
    }

    // ========================================================================
    // Patterns
    // ========================================================================

    fn match_pattern(&self, pattern: &Pattern, row: Row, used: Vec<RelId>) -> Result<Vec<Partial>> {
        let mut states = Vec::new();
        for node in self.start_candidates(&pattern.start, &row)? {
            let mut bound = row.clone();
            if let Some(alias) = &pattern.start.alias {
                bound.insert(alias.clone(), Value::Node(Box::new(node.clone())));
            }
            states.push((bound, used.clone(), node.id));
        }
        for hop in &pattern.hops {
            let mut next = Vec::new();
            for (bound, used, at) in states {
                for (path, end) in self.expand(at, &hop.relationship, &bound, &used)? {
                    if !self.node_matches(&hop.node, end, &bound)? {
                        continue;
                    }
                    let mut row = bound.clone();
                    if let Some(alias) = &hop.relationship.alias {
                        let value = match hop.relationship.length {
                            None => path.first().map_or(Value::Null, |r| Value::Relationship(Box::new((*r).clone()))),
                            Some(_) => Value::List(path.iter().map(|r| Value::Relationship(Box::new((*r).clone()))).collect()),
                        };
                        if !bind(&mut row, alias, value) {
                            continue;
                        }
                    }
                    if let Some(alias) = &hop.node.alias {
                        row.insert(alias.clone(), Value::Node(Box::new(end.clone())));
                    }
                    let mut used = used.clone();
                    used.extend(path.iter().map(|r| r.id));
                    next.push((row, used, end.id));
                }
            }
            states = next;
        }
        Ok(states)
    }

    fn start_candidates<'g>(&'g self, pattern: &NodePattern, row: &Row) -> Result<Vec<&'g Node>> {
        let candidates: Box<dyn Iterator<Item = &'g Node> + 'g> = match (&pattern.alias, pattern.labels.first()) {
            (Some(alias), _) if row.contains_key(alias) => match &row[alias] {
                Value::Node(n) => Box::new(self.graph.node(n.id).into_iter()),
                Value::Null => Box::new(std::iter::empty()),
                other => return Err(failure(format!("`{alias}` is bound to a {}, not a node", other.type_name()))),
            },
            (_, Some(label)) => self.graph.labelled_nodes(label),
            (_, None) => self.graph.all_nodes(),
        };
        let mut out = Vec::new();
        for node in candidates {
            if self.node_matches(pattern, node, row)? {
                out.push(node);
            }
        }
        Ok(out)
    }

    fn node_matches(&self, pattern: &NodePattern, node: &Node, row: &Row) -> Result<bool> {
        if let Some(bound) = pattern.alias.as_ref().and_then(|a| row.get(a)) {
            if !matches!(bound, Value::Node(n) if n.id == node.id) {
                return Ok(false);
            }
        }
        if !node.has_labels(pattern.labels.iter().map(String::as_str)) {
            return Ok(false);
        }
        self.properties_match(&pattern.properties, &node.properties, row)
    }

    fn properties_match(&self, wanted: &[(String, Expr)], properties: &PropertyMap, row: &Row) -> Result<bool> {
        for (key, expr) in wanted {
            let expected = self.eval(expr, row)?;
            let equal = properties.get(key).and_then(|actual| equals(actual, &expected));
            if equal != Some(true) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Paths of `pattern.length` hops leaving `from`, with the node each one
    /// ends at. A relationship appears at most once per clause.
    fn expand(&self, from: NodeId, pattern: &RelPattern, row: &Row, used: &[RelId]) -> Result<Vec<(Vec<&Relationship>, &Node)>> {
        let (min, max) = match pattern.length {
            None => (1, Some(1)),
            Some(range) => (range.min, range.max),
        };
        let mut out = Vec::new();
        let mut stack: Vec<(NodeId, Vec<&Relationship>)> = vec![(from, Vec::new())];
        while let Some((at, path)) = stack.pop() {
            if path.len() >= min {
                if let Some(node) = self.graph.node(at) {
                    out.push((path.clone(), node));
                }
            }
            if max.is_some_and(|m| path.len() >= m) {
                continue;
            }
            for (rel, next) in self.steps(at, pattern.direction) {
                if used.contains(&rel.id) || path.iter().any(|r| r.id == rel.id) {
                    continue;
                }
                if !pattern.types.is_empty() && !pattern.types.contains(&rel.rel_type) {
                    continue;
                }
                if !self.properties_match(&pattern.properties, &rel.properties, row)? {
                    continue;
                }
                let mut longer = path.clone();
                longer.push(rel);
                stack.push((next, longer));
            }
        }
        out.reverse();
        Ok(out)
    }

    /// Relationships touching `at` in `direction`, with the node at the far end.
    fn steps(&self, at: NodeId, direction: Direction) -> Vec<(&Relationship, NodeId)> {
        let mut steps = Vec::new();
        if direction != Direction::Incoming {
            steps.extend(self.graph.outgoing(at).map(|r| (r, r.dst)));
        }
        if direction != Direction::Outgoing {
            steps.extend(self.graph.incoming(at).filter(|r| direction == Direction::Incoming || r.src != r.dst).map(|r| (r, r.src)));
        }
        steps
    }

    // ========================================================================
    // Projection
    // ========================================================================

    fn project(&self, projection: &Projection, rows: Vec<Row>) -> Result<(Vec<String>, Vec<Row>)> {
        let mut columns: Vec<String> = Vec::new();
        if projection.star {
            for row in &rows {
                for key in row.keys() {
                    if !columns.contains(key) {
                        columns.push(key.clone());
                    }
                }
            }
            columns.sort();
        }
        for item in &projection.items {
            if columns.contains(&item.name) {
                return Err(failure(format!("column `{}` is projected twice", item.name)));
            }
            columns.push(item.name.clone());
        }

        // (scope for ORDER BY, projected row)
        let mut out: Vec<(Row, Row)> = if projection.items.iter().any(|i| i.expr.contains_aggregate()) {
            self.aggregate(projection, rows)?
        } else {
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                let mut projected = if projection.star { row.clone() } else { Row::new() };
                for item in &projection.items {
                    projected.insert(item.name.clone(), self.eval(&item.expr, &row)?);
                }
                out.push((overlay(row, &projected), projected));
            }
            out
        };

        if projection.distinct {
            let mut seen = hashbrown::HashSet::new();
            out.retain(|(_, projected)| {
                let mut key = String::new();
                for column in &columns {
                    key_text(projected.get(column).unwrap_or(&Value::Null), &mut key);
                    key.push('\u{1f}');
                }
                seen.insert(key)
            });
        }

        if !projection.order_by.is_empty() {
            let mut keyed = Vec::with_capacity(out.len());
            for (scope, projected) in out {
                let mut keys = Vec::with_capacity(projection.order_by.len());
                for item in &projection.order_by {
                    keys.push(match projected.get(&item.text) {
                        Some(value) => value.clone(),
                        None => self.eval(&item.expr, &scope)?,
                    });
                }
                keyed.push((keys, scope, projected));
            }
            keyed.sort_by(|(a, ..), (b, ..)| {
                projection
                    .order_by
                    .iter()
                    .zip(a.iter().zip(b))
                    .map(|(item, (x, y))| {
                        let o = sort_cmp(x, y);
                        if item.descending { o.reverse() } else { o }
                    })
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
            out = keyed.into_iter().map(|(_, scope, projected)| (scope, projected)).collect();
        }

        let skip = self.count_clause(projection.skip.as_ref(), "SKIP")?.unwrap_or(0);
        let limit = self.count_clause(projection.limit.as_ref(), "LIMIT")?.unwrap_or(usize::MAX);
        let rows = out.into_iter().skip(skip).take(limit).map(|(_, projected)| projected).collect();
        Ok((columns, rows))
    }

    fn aggregate(&self, projection: &Projection, rows: Vec<Row>) -> Result<Vec<(Row, Row)>> {
        let mut lifted = Vec::new();
        let items: Vec<(&ProjectionItem, Option<Expr>)> = projection
            .items
            .iter()
            .map(|item| {
                let rewritten = item.expr.contains_aggregate().then(|| lift_aggregates(&item.expr, &mut lifted));
                (item, rewritten)
            })
            .collect();

        // Group by the non-aggregate items (and every variable under `*`),
        // keeping groups in first-seen order.
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(Row, Vec<Row>)> = Vec::new();
        for row in rows {
            let mut keys = if projection.star { row.clone() } else { Row::new() };
            for (item, rewritten) in &items {
                if rewritten.is_none() {
                    keys.insert(item.name.clone(), self.eval(&item.expr, &row)?);
                }
            }
            let mut text = String::new();
            for (name, value) in &keys {
                text.push_str(name);
                text.push('=');
                key_text(value, &mut text);
                text.push('\u{1f}');
            }
            match index.get(&text) {
                Some(&i) => groups[i].1.push(row),
                None => {
                    index.insert(text, groups.len());
                    groups.push((keys, vec![row]));
                }
            }
        }
        let grouped = projection.star || items.iter().any(|(_, rewritten)| rewritten.is_none());
        if groups.is_empty() && !grouped {
            groups.push((Row::new(), Vec::new()));
        }

        let mut out = Vec::with_capacity(groups.len());
        for (keys, members) in groups {
            let mut scope = members.first().cloned().unwrap_or_default();
            for (i, call) in lifted.iter().enumerate() {
                scope.insert(placeholder(i), self.aggregate_call(call, &members)?);
            }
            let mut projected = keys;
            for (item, rewritten) in &items {
                if let Some(expr) = rewritten {
                    projected.insert(item.name.clone(), self.eval(expr, &scope)?);
                }
            }
            out.push((overlay(scope, &projected), projected));
        }
        Ok(out)
    }

    fn aggregate_call(&self, call: &Expr, rows: &[Row]) -> Result<Value> {
        let Expr::Call { name, distinct, star, args } = call else {
            return Err(failure("not an aggregate"));
        };
        if *star {
            return Ok(Value::Int(rows.len() as i64));
        }
        let arg = args.first().ok_or_else(|| failure(format!("{name}() needs an argument")))?;
        let mut values = Vec::with_capacity(rows.len());
        let mut seen = hashbrown::HashSet::new();
        for row in rows {
            let value = self.eval(arg, row)?;
            if value.is_null() {
                continue;
            }
            if *distinct {
                let mut key = String::new();
                key_text(&value, &mut key);
                if !seen.insert(key) {
                    continue;
                }
            }
            values.push(value);
        }
        match name.as_str() {
            "count" => Ok(Value::Int(values.len() as i64)),
            "collect" => Ok(Value::List(values)),
            "sum" => {
                let mut int_sum: Option<i64> = Some(0);
                let mut float_sum = 0.0;
                for value in &values {
                    match value {
                        Value::Int(n) => int_sum = int_sum.and_then(|s| s.checked_add(*n)),
                        Value::Float(_) => int_sum = None,
                        other => return Err(failure(format!("sum() over a {}", other.type_name()))),
                    }
                    float_sum += value.as_float().unwrap_or(0.0);
                }
                Ok(match int_sum {
                    Some(n) if values.iter().all(|v| matches!(v, Value::Int(_))) => Value::Int(n),
                    _ => Value::Float(float_sum),
                })
            }
            "avg" => {
                if values.is_empty() {
                    return Ok(Value::Null);
                }
                let mut total = 0.0;
                for value in &values {
                    total += value.as_float().ok_or_else(|| failure(format!("avg() over a {}", value.type_name())))?;
                }
                Ok(Value::Float(total / values.len() as f64))
            }
            "min" => Ok(values.into_iter().min_by(sort_cmp).unwrap_or(Value::Null)),
            "max" => Ok(values.into_iter().max_by(sort_cmp).unwrap_or(Value::Null)),
            other => Err(failure(format!("unknown aggregate {other}()"))),
        }
    }

    fn count_clause(&self, expr: Option<&Expr>, clause: &str) -> Result<Option<usize>> {
        let Some(expr) = expr else { return Ok(None) };
        match self.eval(expr, &Row::new())? {
            Value::Int(n) if n >= 0 => Ok(Some(n as usize)),
            other => Err(failure(format!("{clause} expects a non-negative integer, got {other}"))),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn eval(&self, expr: &Expr, row: &Row) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Parameter(name) => {
                self.params.get(name).cloned().ok_or_else(|| failure(format!("missing parameter ${name}")))
            }
            Expr::Variable(name) => row.get(name).cloned().ok_or_else(|| failure(format!("variable `{name}` is not defined"))),
            Expr::Property { expr, key } => match self.eval(expr, row)? {
                Value::Null => Ok(Value::Null),
                Value::Node(n) => Ok(n.get(key).cloned().unwrap_or(Value::Null)),
                Value::Relationship(r) => Ok(r.get(key).cloned().unwrap_or(Value::Null)),
                Value::Map(m) => Ok(m.get(key).cloned().unwrap_or(Value::Null)),
                other => Err(failure(format!("cannot read property `{key}` of a {}", other.type_name()))),
            },
            Expr::Index { expr, index } => match (self.eval(expr, row)?, self.eval(index, row)?) {
                (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                (Value::List(items), Value::Int(i)) => {
                    let at = if i < 0 { items.len() as i64 + i } else { i };
                    Ok(usize::try_from(at).ok().and_then(|at| items.get(at).cloned()).unwrap_or(Value::Null))
                }
                (Value::Map(m), Value::String(k)) => Ok(m.get(&k).cloned().unwrap_or(Value::Null)),
                (Value::Node(n), Value::String(k)) => Ok(n.get(&k).cloned().unwrap_or(Value::Null)),
                (base, index) => Err(failure(format!("cannot index a {} with a {}", base.type_name(), index.type_name()))),
            },
            Expr::List(items) => Ok(Value::List(items.iter().map(|e| self.eval(e, row)).collect::<Result<_>>()?)),
            Expr::Map(entries) => Ok(Value::Map(
                entries.iter().map(|(k, e)| Ok((k.clone(), self.eval(e, row)?))).collect::<Result<_>>()?,
            )),
            Expr::Binary { op, left, right } => {
                let (l, r) = (self.eval(left, row)?, self.eval(right, row)?);
                binary(*op, l, r)
            }
            Expr::Not(inner) => Ok(truth(&self.eval(inner, row)?)?.map_or(Value::Null, |b| Value::Bool(!b))),
            Expr::Negate(inner) => match self.eval(inner, row)? {
                Value::Null => Ok(Value::Null),
                Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(|| failure("integer overflow")),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(failure(format!("cannot negate a {}", other.type_name()))),
            },
            Expr::IsNull { expr, negated } => Ok(Value::Bool(self.eval(expr, row)?.is_null() != *negated)),
            Expr::In { expr, list } => {
                let needle = self.eval(expr, row)?;
                match self.eval(list, row)? {
                    Value::Null => Ok(Value::Null),
                    Value::List(items) => {
                        let mut unknown = false;
                        for item in &items {
                            match equals(&needle, item) {
                                Some(true) => return Ok(Value::Bool(true)),
                                None => unknown = true,
                                Some(false) => {}
                            }
                        }
                        Ok(if unknown { Value::Null } else { Value::Bool(false) })
                    }
                    other => Err(failure(format!("IN expects a list, got a {}", other.type_name()))),
                }
            }
            Expr::HasLabels { expr, labels } => match self.eval(expr, row)? {
                Value::Null => Ok(Value::Null),
                Value::Node(n) => Ok(Value::Bool(n.has_labels(labels.iter().map(String::as_str)))),
                other => Err(failure(format!("label check on a {}", other.type_name()))),
            },
            Expr::StringMatch { op, left, right } => match (self.eval(left, row)?, self.eval(right, row)?) {
                (Value::String(s), Value::String(p)) => Ok(Value::Bool(match op {
                    StringOp::StartsWith => s.starts_with(&p),
                    StringOp::EndsWith => s.ends_with(&p),
                    StringOp::Contains => s.contains(&p),
                })),
                _ => Ok(Value::Null),
            },
            Expr::Call { name, args, .. } => {
                if expr.is_aggregate() {
                    return Err(failure(format!("{name}() is only allowed in WITH or RETURN")));
                }
                let args = args.iter().map(|a| self.eval(a, row)).collect::<Result<Vec<_>>>()?;
                self.function(name, args)
            }
            Expr::Case { operand, branches, otherwise } => {
                let subject = operand.as_deref().map(|o| self.eval(o, row)).transpose()?;
                for (when, then) in branches {
                    let candidate = self.eval(when, row)?;
                    let hit = match &subject {
                        Some(subject) => equals(subject, &candidate) == Some(true),
                        None => truth(&candidate)? == Some(true),
                    };
                    if hit {
                        return self.eval(then, row);
                    }
                }
                otherwise.as_deref().map_or(Ok(Value::Null), |e| self.eval(e, row))
            }
        }
    }

    fn function(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let arity = |n: usize| {
            if args.len() == n {
                Ok(())
            } else {
                Err(failure(format!("{name}() takes {n} argument(s), got {}", args.len())))
            }
        };
        if name == "coalesce" {
            return Ok(args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null));
        }
        if name == "range" {
            let bounds: Vec<i64> = args.iter().filter_map(Value::as_int).collect();
            let (start, end, step) = match bounds.as_slice() {
                &[s, e] if args.len() == 2 => (s, e, 1),
                &[s, e, st] if args.len() == 3 && st != 0 => (s, e, st),
                _ => return Err(failure("range() takes two or three integers and a non-zero step")),
            };
            let mut out = Vec::new();
            let mut at = start;
            while (step > 0 && at <= end) || (step < 0 && at >= end) {
                out.push(Value::Int(at));
                match at.checked_add(step) {
                    Some(next) => at = next,
                    None => break,
                }
            }
            return Ok(Value::List(out));
        }
        arity(1)?;
        let Some(arg) = args.into_iter().next() else { return Ok(Value::Null) };
        if arg.is_null() && name != "exists" {
            return Ok(Value::Null);
        }
        let wrong = |arg: &Value| failure(format!("{name}() does not accept a {}", arg.type_name()));
        Ok(match (name, &arg) {
            ("exists", v) => Value::Bool(!v.is_null()),
            ("id", Value::Node(n)) => Value::Int(n.id.0 as i64),
            ("id", Value::Relationship(r)) => Value::Int(r.id.0 as i64),
            ("elementid", Value::Node(n)) => Value::String(n.element_id.clone().unwrap_or_else(|| n.id.to_string())),
            ("elementid", Value::Relationship(r)) => {
                Value::String(r.element_id.clone().unwrap_or_else(|| r.id.to_string()))
            }
            ("labels", Value::Node(n)) => Value::List(n.labels.iter().map(|l| Value::from(l.as_str())).collect()),
            ("type", Value::Relationship(r)) => Value::from(r.rel_type.as_str()),
            ("startnode", Value::Relationship(r)) => self.node_value(r.src),
            ("endnode", Value::Relationship(r)) => self.node_value(r.dst),
            ("properties", Value::Node(n)) => Value::Map(n.properties.clone()),
            ("properties", Value::Relationship(r)) => Value::Map(r.properties.clone()),
            ("properties", Value::Map(m)) => Value::Map(m.clone()),
            ("keys", Value::Node(_) | Value::Relationship(_) | Value::Map(_)) => {
                let map = match &arg {
                    Value::Node(n) => &n.properties,
                    Value::Relationship(r) => &r.properties,
                    Value::Map(m) => m,
                    _ => return Err(wrong(&arg)),
                };
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                Value::List(keys.into_iter().map(|k| Value::from(k.as_str())).collect())
            }
            ("size", Value::List(items)) => Value::Int(items.len() as i64),
            ("size" | "length", Value::String(s)) => Value::Int(s.chars().count() as i64),
            ("length", Value::List(items)) => Value::Int(items.len() as i64),
            ("head", Value::List(items)) => items.first().cloned().unwrap_or(Value::Null),
            ("last", Value::List(items)) => items.last().cloned().unwrap_or(Value::Null),
            ("tolower", Value::String(s)) => Value::String(s.to_lowercase()),
            ("toupper", Value::String(s)) => Value::String(s.to_uppercase()),
            ("trim", Value::String(s)) => Value::String(s.trim().to_owned()),
            ("tostring", Value::String(s)) => Value::String(s.clone()),
            ("tostring", Value::Int(_) | Value::Float(_) | Value::Bool(_)) => Value::String(arg.to_json().to_string()),
            ("tostring", Value::Date(_) | Value::Time(_) | Value::DateTime(_) | Value::LocalDateTime(_)) => {
                Value::String(arg.to_string())
            }
            ("tointeger", Value::Int(n)) => Value::Int(*n),
            ("tointeger", Value::Float(f)) => Value::Int(f.trunc() as i64),
            ("tointeger", Value::String(s)) => s.trim().parse::<i64>().map_or(Value::Null, Value::Int),
            ("tofloat", Value::Int(n)) => Value::Float(*n as f64),
            ("tofloat", Value::Float(f)) => Value::Float(*f),
            ("tofloat", Value::String(s)) => s.trim().parse::<f64>().map_or(Value::Null, Value::Float),
            ("abs", Value::Int(n)) => Value::Int(n.checked_abs().ok_or_else(|| failure("integer overflow"))?),
            ("abs", Value::Float(f)) => Value::Float(f.abs()),
            (
                "exists" | "id" | "elementid" | "labels" | "type" | "startnode" | "endnode" | "properties" | "keys"
                | "size" | "length" | "head" | "last" | "tolower" | "toupper" | "trim" | "tostring" | "tointeger"
                | "tofloat" | "abs",
                _,
            ) => return Err(wrong(&arg)),
            (other, _) => return Err(failure(format!("unknown function {other}()"))),
        })
    }

    fn node_value(&self, id: NodeId) -> Value {
        self.graph.node(id).map_or(Value::Null, |n| Value::Node(Box::new(n.clone())))
    }
}

// ============================================================================
// Value semantics
// ============================================================================

/// Rebind `alias`, or check an existing binding is the same entity.
fn bind(row: &mut Row, alias: &str, value: Value) -> bool {
    match row.get(alias) {
        Some(existing) => equals(existing, &value) == Some(true),
        None => {
            row.insert(alias.to_owned(), value);
            true
        }
    }
}

fn overlay(mut base: Row, top: &Row) -> Row {
    base.extend(top.iter().map(|(k, v)| (k.clone(), v.clone())));
    base
}

fn pattern_aliases(pattern: &Pattern) -> impl Iterator<Item = &str> {
    std::iter::once(&pattern.start.alias)
        .chain(pattern.hops.iter().flat_map(|h| [&h.relationship.alias, &h.node.alias]))
        .filter_map(|a| a.as_deref())
}

fn placeholder(i: usize) -> String {
    // Not a valid identifier, so it cannot collide with a query variable.
    format!(" agg{i}")
}

/// Copy of `expr` with every aggregate call replaced by a placeholder
/// variable; the calls are appended to `found`.
fn lift_aggregates(expr: &Expr, found: &mut Vec<Expr>) -> Expr {
    if expr.is_aggregate() {
        found.push(expr.clone());
        return Expr::Variable(placeholder(found.len() - 1));
    }
    let mut lift = |e: &Expr| Box::new(lift_aggregates(e, found));
    match expr {
        Expr::Literal(_) | Expr::Parameter(_) | Expr::Variable(_) => expr.clone(),
        Expr::Property { expr, key } => Expr::Property { expr: lift(expr), key: key.clone() },
        Expr::Index { expr, index } => {
            let expr = lift(expr);
            Expr::Index { expr, index: lift(index) }
        }
        Expr::Not(inner) => Expr::Not(lift(inner)),
        Expr::Negate(inner) => Expr::Negate(lift(inner)),
        Expr::IsNull { expr, negated } => Expr::IsNull { expr: lift(expr), negated: *negated },
        Expr::HasLabels { expr, labels } => Expr::HasLabels { expr: lift(expr), labels: labels.clone() },
        Expr::In { expr, list } => {
            let expr = lift(expr);
            Expr::In { expr, list: lift(list) }
        }
        Expr::Binary { op, left, right } => {
            let left = lift(left);
            Expr::Binary { op: *op, left, right: lift(right) }
        }
        Expr::StringMatch { op, left, right } => {
            let left = lift(left);
            Expr::StringMatch { op: *op, left, right: lift(right) }
        }
        Expr::List(items) => Expr::List(items.iter().map(|e| *lift(e)).collect()),
        Expr::Map(entries) => Expr::Map(entries.iter().map(|(k, e)| (k.clone(), *lift(e))).collect()),
        Expr::Call { name, distinct, star, args } => Expr::Call {
            name: name.clone(),
            distinct: *distinct,
            star: *star,
            args: args.iter().map(|e| *lift(e)).collect(),
        },
        Expr::Case { operand, branches, otherwise } => Expr::Case {
            operand: operand.as_deref().map(&mut lift),
            branches: branches.iter().map(|(w, t)| (*lift(w), *lift(t))).collect(),
            otherwise: otherwise.as_deref().map(&mut lift),
        },
    }
}

/// Boolean view of a predicate value; null is unknown.
fn truth(value: &Value) -> Result<Option<bool>> {
    match value {
        Value::Bool(b) => Ok(Some(*b)),
        Value::Null => Ok(None),
        other => Err(failure(format!("expected a boolean, got a {}", other.type_name()))),
    }
}

/// Cypher equality: unknown (`None`) when a null is involved.
fn equals(a: &Value, b: &Value) -> Option<bool> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => Some(a.graph_eq(b)),
        (Value::Node(x), Value::Node(y)) => Some(x.id == y.id),
        (Value::Relationship(x), Value::Relationship(y)) => Some(x.id == y.id),
        (Value::List(xs), Value::List(ys)) => {
            if xs.len() != ys.len() {
                return Some(false);
            }
            let mut unknown = false;
            for (x, y) in xs.iter().zip(ys) {
                match equals(x, y) {
                    Some(false) => return Some(false),
                    None => unknown = true,
                    Some(true) => {}
                }
            }
            if unknown { None } else { Some(true) }
        }
        (Value::Map(xs), Value::Map(ys)) => {
            if xs.len() != ys.len() || xs.keys().any(|k| !ys.contains_key(k)) {
                return Some(false);
            }
            let mut unknown = false;
            for (k, x) in xs {
                match equals(x, &ys[k]) {
                    Some(false) => return Some(false),
                    None => unknown = true,
                    Some(true) => {}
                }
            }
            if unknown { None } else { Some(true) }
        }
        _ => Some(a == b),
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    match op {
        BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
            let (a, b) = (truth(&l)?, truth(&r)?);
            let out = match (op, a, b) {
                (BinaryOp::And, Some(false), _) | (BinaryOp::And, _, Some(false)) => Some(false),
                (BinaryOp::And, Some(true), Some(true)) => Some(true),
                (BinaryOp::Or, Some(true), _) | (BinaryOp::Or, _, Some(true)) => Some(true),
                (BinaryOp::Or, Some(false), Some(false)) => Some(false),
                (BinaryOp::Xor, Some(a), Some(b)) => Some(a ^ b),
                _ => None,
            };
            Ok(out.map_or(Value::Null, Value::Bool))
        }
        BinaryOp::Eq => Ok(equals(&l, &r).map_or(Value::Null, Value::Bool)),
        BinaryOp::Neq => Ok(equals(&l, &r).map_or(Value::Null, |e| Value::Bool(!e))),
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => Ok(match l.graph_cmp(&r) {
            None => Value::Null,
            Some(o) => Value::Bool(match op {
                BinaryOp::Lt => o.is_lt(),
                BinaryOp::Lte => o.is_le(),
                BinaryOp::Gt => o.is_gt(),
                _ => o.is_ge(),
            }),
        }),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow => {
            arithmetic(op, l, r)
        }
    }
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    let overflow = || failure("integer overflow");
    match (op, l, r) {
        (_, Value::Null, _) | (_, _, Value::Null) => Ok(Value::Null),
        (BinaryOp::Add, Value::List(mut xs), Value::List(ys)) => {
            xs.extend(ys);
            Ok(Value::List(xs))
        }
        (BinaryOp::Add, Value::List(mut xs), y) => {
            xs.push(y);
            Ok(Value::List(xs))
        }
        (BinaryOp::Add, x, Value::List(ys)) => Ok(Value::List(std::iter::once(x).chain(ys).collect())),
        (BinaryOp::Add, Value::String(a), b) => Ok(Value::String(a + &concat_text(&b)?)),
        (BinaryOp::Add, a, Value::String(b)) => Ok(Value::String(concat_text(&a)? + &b)),
        (BinaryOp::Pow, a, b) => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Ok(Value::Float(x.powf(y))),
            _ => Err(failure(format!("cannot raise a {} to a {}", a.type_name(), b.type_name()))),
        },
        (op, Value::Int(a), Value::Int(b)) => match op {
            BinaryOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Div if b == 0 => Err(failure("division by zero")),
            BinaryOp::Div => a.checked_div(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Mod if b == 0 => Err(failure("division by zero")),
            _ => a.checked_rem(b).map(Value::Int).ok_or_else(overflow),
        },
        (op, a, b) => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Ok(Value::Float(match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                _ => x % y,
            })),
            _ => Err(failure(format!("cannot combine a {} and a {} with {op:?}", a.type_name(), b.type_name()))),
        },
    }
}

fn concat_text(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => Ok(value.to_json().to_string()),
        Value::Date(_) | Value::Time(_) | Value::DateTime(_) | Value::LocalDateTime(_) => Ok(value.to_string()),
        other => Err(failure(format!("cannot append a {} to a string", other.type_name()))),
    }
}

/// ORDER BY, min() and max(): nulls sort last, mismatched kinds by kind.
fn sort_cmp(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }
    if let Some(o) = a.graph_cmp(b) {
        return o;
    }
    match (a, b) {
        (Value::Node(x), Value::Node(y)) => x.id.cmp(&y.id),
        (Value::Relationship(x), Value::Relationship(y)) => x.id.cmp(&y.id),
        (Value::List(xs), Value::List(ys)) => xs
            .iter()
            .zip(ys)
            .map(|(x, y)| sort_cmp(x, y))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| xs.len().cmp(&ys.len())),
        _ => a.type_name().cmp(b.type_name()),
    }
}

/// Canonical text for grouping and DISTINCT: entities by id, maps by sorted key.
fn key_text(value: &Value, out: &mut String) {
    use std::fmt::Write;
    match value {
        Value::Node(n) => {
            let _ = write!(out, "N{}", n.id.0);
        }
        Value::Relationship(r) => {
            let _ = write!(out, "R{}", r.id.0);
        }
        Value::List(items) => {
            out.push('[');
            for item in items {
                key_text(item, out);
                out.push(',');
            }
            out.push(']');
        }
        Value::Map(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for key in keys {
                let _ = write!(out, "{key:?}:");
                key_text(&map[key], out);
                out.push(',');
            }
            out.push('}');
        }
        other => {
            let _ = write!(out, "{}:{other}", other.type_name());
        }
    }
}
