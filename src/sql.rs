use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Which holds a `SELECT ... FROM holds` asks for.
#[derive(Debug, PartialEq)]
pub enum HoldFilter {
    Id(Ulid),
    Unit(Ulid),
    User(String),
    /// No WHERE: the caller's own holds.
    Caller,
}

#[derive(Debug, PartialEq)]
pub enum PayoutFilter {
    All,
    Id(Ulid),
    Hold(Ulid),
    Owner(String),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUnit {
        spec: UnitSpec,
    },
    UpdateUnit {
        id: Ulid,
        patch: UnitPatch,
    },
    DeleteUnit {
        id: Ulid,
    },
    SelectUnits {
        id: Option<Ulid>,
        parent_id: Option<Ulid>,
    },
    InsertHold {
        id: Ulid,
        unit_id: Ulid,
        hold_minutes: u32,
    },
    StartPayment {
        id: Ulid,
    },
    FinalizeHold {
        id: Ulid,
        payment_reference: String,
    },
    CancelHold {
        id: Ulid,
    },
    CheckOut {
        id: Ulid,
    },
    SelectHolds {
        filter: HoldFilter,
    },
    SelectAvailability {
        unit_id: Ulid,
    },
    SelectSummary {
        unit_id: Ulid,
    },
    SelectConflict {
        unit_id: Ulid,
    },
    SelectPayouts {
        filter: PayoutFilter,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

/// Hold length when the INSERT leaves it out.
pub const DEFAULT_HOLD_MINUTES: u32 = 30;

const UNIT_COLUMNS: [&str; 7] = [
    "id",
    "kind",
    "parent_id",
    "capacity",
    "owner_id",
    "price_cents",
    "name",
];
const HOLD_COLUMNS: [&str; 3] = ["id", "unit_id", "hold_minutes"];

/// Split a simple-query string on `;` outside quotes. Empty statements are dropped.
pub fn split_statements(sql: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let (mut start, mut quote) = (0, None);
    for (i, ch) in sql.char_indices() {
        match (ch, quote) {
            ('\'' | '"', None) => quote = Some(ch),
            (c, Some(q)) if c == q => quote = None,
            (';', None) => {
                out.push(&sql[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&sql[start..]);
    out.into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().to_string();
        return Ok(Command::Listen { channel });
    }
    if upper.starts_with("UNLISTEN ") {
        let channel = trimmed[9..].trim().to_string();
        if channel == "*" {
            return Ok(Command::UnlistenAll);
        }
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "units" => {
            let cols = column_values(insert, &UNIT_COLUMNS, &values)?;
            let kind_name = parse_string_expr(required(&cols, "kind")?)?;
            let kind = UnitKind::parse(&kind_name)
                .ok_or_else(|| SqlError::Parse(format!("unknown unit kind: {kind_name}")))?;
            let capacity = match lookup(&cols, "capacity") {
                Some(e) => parse_u32(e)?,
                None if kind == UnitKind::Building => 0,
                None => 1,
            };
            let spec = UnitSpec {
                id: parse_ulid_expr(required(&cols, "id")?)?,
                kind,
                parent_id: lookup(&cols, "parent_id").map(parse_ulid_or_null).transpose()?.flatten(),
                capacity,
                owner_id: lookup(&cols, "owner_id").map(parse_string_or_null).transpose()?.flatten(),
                price_cents: lookup(&cols, "price_cents").map(parse_u64_or_null).transpose()?.flatten(),
                name: lookup(&cols, "name").map(parse_string_or_null).transpose()?.flatten(),
            };
            Ok(Command::InsertUnit { spec })
        }
        "holds" => {
            let cols = column_values(insert, &HOLD_COLUMNS, &values)?;
            Ok(Command::InsertHold {
                id: parse_ulid_expr(required(&cols, "id")?)?,
                unit_id: parse_ulid_expr(required(&cols, "unit_id")?)?,
                hold_minutes: match lookup(&cols, "hold_minutes") {
                    Some(e) => parse_u32(e)?,
                    None => DEFAULT_HOLD_MINUTES,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;

    let mut set = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.push((column, a.value.clone()));
    }

    match table.as_str() {
        "units" => {
            let mut patch = UnitPatch::default();
            for (column, value) in &set {
                match column.as_str() {
                    "name" => patch.name = Some(parse_string_expr(value)?),
                    "capacity" => patch.capacity = Some(parse_u32(value)?),
                    "price_cents" => patch.price_cents = Some(parse_u64(value)?),
                    "listed" => patch.listed = Some(parse_bool(value)?),
                    other => return Err(SqlError::Unsupported(format!("SET {other} on units"))),
                }
            }
            Ok(Command::UpdateUnit { id, patch })
        }
        "holds" => {
            if let Some(value) = lookup(&set, "checked_out") {
                return if parse_bool(value)? {
                    Ok(Command::CheckOut { id })
                } else {
                    Err(SqlError::Unsupported("checked_out can only be set to true".into()))
                };
            }
            let status = parse_string_expr(required(&set, "status")?)?;
            match HoldStatus::parse(&status) {
                Some(HoldStatus::Pending) => Ok(Command::StartPayment { id }),
                Some(HoldStatus::Paid) => Ok(Command::FinalizeHold {
                    id,
                    payment_reference: parse_string_expr(required(&set, "payment_reference")?)?,
                }),
                Some(HoldStatus::Cancelled) => Ok(Command::CancelHold { id }),
                _ => Err(SqlError::Unsupported(format!("SET status = '{status}'"))),
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "units" => Ok(Command::DeleteUnit { id }),
        "holds" => Err(SqlError::Unsupported(
            "holds are cancelled with UPDATE holds SET status = 'cancelled'".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        extract_eq_filters(selection, &mut filters)?;
    }
    let ulid_filter = |col: &'static str| -> Result<Option<Ulid>, SqlError> {
        lookup(&filters, col).map(parse_ulid_expr).transpose()
    };
    let unit_id = || ulid_filter("unit_id")?.ok_or(SqlError::MissingFilter("unit_id"));

    match table.as_str() {
        "units" => Ok(Command::SelectUnits {
            id: ulid_filter("id")?,
            parent_id: ulid_filter("parent_id")?,
        }),
        "holds" => {
            let filter = if let Some(id) = ulid_filter("id")? {
                HoldFilter::Id(id)
            } else if let Some(unit) = ulid_filter("unit_id")? {
                HoldFilter::Unit(unit)
            } else if let Some(user) = lookup(&filters, "user_id") {
                HoldFilter::User(parse_string_expr(user)?)
            } else {
                HoldFilter::Caller
            };
            Ok(Command::SelectHolds { filter })
        }
        "availability" => Ok(Command::SelectAvailability { unit_id: unit_id()? }),
        "summaries" => Ok(Command::SelectSummary { unit_id: unit_id()? }),
        "conflicts" => Ok(Command::SelectConflict { unit_id: unit_id()? }),
        "payouts" => {
            let filter = if let Some(id) = ulid_filter("id")? {
                PayoutFilter::Id(id)
            } else if let Some(hold) = ulid_filter("hold_id")? {
                PayoutFilter::Hold(hold)
            } else if let Some(owner) = lookup(&filters, "owner_id") {
                PayoutFilter::Owner(parse_string_expr(owner)?)
            } else {
                PayoutFilter::All
            };
            Ok(Command::SelectPayouts { filter })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Collect `column = value` terms of an AND-chain. Anything else is rejected.
fn extract_eq_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            extract_eq_filters(left, out)?;
            extract_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, (**right).clone()));
            Ok(())
        }
        Expr::Nested(inner) => extract_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// Pair INSERT values with their column names: the explicit column list if
/// there is one, otherwise `defaults` in order.
fn column_values(
    insert: &ast::Insert,
    defaults: &[&str],
    values: &[Expr],
) -> Result<Vec<(String, Expr)>, SqlError> {
    let names: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if values.len() > names.len() {
        return Err(SqlError::WrongArity("columns", names.len(), values.len()));
    }
    if !insert.columns.is_empty() && values.len() != names.len() {
        return Err(SqlError::WrongArity("values", names.len(), values.len()));
    }
    for name in &names {
        if !defaults.contains(&name.as_str()) {
            return Err(SqlError::Unsupported(format!("column {name}")));
        }
    }
    Ok(names.into_iter().zip(values.iter().cloned()).collect())
}

fn lookup<'a>(pairs: &'a [(String, Expr)], column: &str) -> Option<&'a Expr> {
    pairs.iter().find(|(c, _)| c == column).map(|(_, e)| e)
}

fn required<'a>(pairs: &'a [(String, Expr)], column: &'static str) -> Result<&'a Expr, SqlError> {
    lookup(pairs, column).ok_or(SqlError::MissingValue(column))
}

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_ulid_expr(expr).map(Some)
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string_expr(expr).map(Some)
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u64(expr: &Expr) -> Result<u64, SqlError> {
    let v = parse_i64_expr(expr)?;
    u64::try_from(v).map_err(|_| SqlError::Parse(format!("{v} must not be negative")))
}

fn parse_u64_or_null(expr: &Expr) -> Result<Option<u64>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_u64(expr).map(Some)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    MissingValue(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MissingValue(col) => write!(f, "missing value: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const PARENT: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_insert_building_positional() {
        let cmd = parse_sql(&format!("INSERT INTO units VALUES ('{ID}', 'building')")).unwrap();
        match cmd {
            Command::InsertUnit { spec } => {
                assert_eq!(spec.id, ulid(ID));
                assert_eq!(spec.kind, UnitKind::Building);
                assert_eq!(spec.parent_id, None);
                assert_eq!(spec.capacity, 0);
            }
            _ => panic!("expected InsertUnit, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_unit_named_columns() {
        let sql = format!(
            "INSERT INTO units (id, kind, parent_id, capacity, owner_id, price_cents, name) \
             VALUES ('{ID}', 'Room', '{PARENT}', 2, 'landlord', 52000, 'Room 4')"
        );
        let cmd = parse_sql(&sql).unwrap();
        let expected = UnitSpec::new(ulid(ID), UnitKind::Room, Some(ulid(PARENT)), 2)
            .owner("landlord")
            .price(52_000)
            .named("Room 4");
        assert_eq!(cmd, Command::InsertUnit { spec: expected });
    }

    #[test]
    fn parse_insert_unit_columns_in_any_order() {
        let sql = format!(
            "INSERT INTO units (kind, parent_id, id) VALUES ('bed', '{PARENT}', '{ID}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertUnit { spec } => {
                assert_eq!(spec.id, ulid(ID));
                assert_eq!(spec.kind, UnitKind::Bed);
                assert_eq!(spec.capacity, 1);
            }
            other => panic!("expected InsertUnit, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_unit_unknown_kind() {
        let sql = format!("INSERT INTO units VALUES ('{ID}', 'castle')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_hold() {
        let sql = format!("INSERT INTO holds (id, unit_id, hold_minutes) VALUES ('{ID}', '{PARENT}', 15)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertHold {
                id: ulid(ID),
                unit_id: ulid(PARENT),
                hold_minutes: 15,
            }
        );
    }

    #[test]
    fn parse_insert_hold_default_minutes() {
        let sql = format!("INSERT INTO holds (id, unit_id) VALUES ('{ID}', '{PARENT}')");
        match parse_sql(&sql).unwrap() {
            Command::InsertHold { hold_minutes, .. } => assert_eq!(hold_minutes, DEFAULT_HOLD_MINUTES),
            other => panic!("expected InsertHold, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_unit() {
        let sql = format!("UPDATE units SET capacity = 3, listed = false WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateUnit {
                id: ulid(ID),
                patch: UnitPatch {
                    capacity: Some(3),
                    listed: Some(false),
                    ..UnitPatch::default()
                },
            }
        );
    }

    #[test]
    fn parse_update_unit_rejects_unknown_column() {
        let sql = format!("UPDATE units SET occupied = 0 WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_hold_transitions() {
        let pay = format!("UPDATE holds SET status = 'pending' WHERE id = '{ID}'");
        assert_eq!(parse_sql(&pay).unwrap(), Command::StartPayment { id: ulid(ID) });

        let paid = format!(
            "UPDATE holds SET status = 'paid', payment_reference = 'pi_123' WHERE id = '{ID}'"
        );
        assert_eq!(
            parse_sql(&paid).unwrap(),
            Command::FinalizeHold {
                id: ulid(ID),
                payment_reference: "pi_123".into(),
            }
        );

        let cancel = format!("UPDATE holds SET status = 'canceled' WHERE id = '{ID}'");
        assert_eq!(parse_sql(&cancel).unwrap(), Command::CancelHold { id: ulid(ID) });

        let out = format!("UPDATE holds SET checked_out = true WHERE id = '{ID}'");
        assert_eq!(parse_sql(&out).unwrap(), Command::CheckOut { id: ulid(ID) });
    }

    #[test]
    fn parse_paid_without_reference_errors() {
        let sql = format!("UPDATE holds SET status = 'paid' WHERE id = '{ID}'");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingValue("payment_reference"))
        ));
    }

    #[test]
    fn parse_update_requires_id() {
        let sql = "UPDATE holds SET status = 'cancelled'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_delete_unit() {
        let sql = format!("DELETE FROM units WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteUnit { id: ulid(ID) });
    }

    #[test]
    fn parse_select_units() {
        assert_eq!(
            parse_sql("SELECT * FROM units").unwrap(),
            Command::SelectUnits {
                id: None,
                parent_id: None,
            }
        );
        let sql = format!("SELECT * FROM units WHERE parent_id = '{PARENT}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectUnits {
                id: None,
                parent_id: Some(ulid(PARENT)),
            }
        );
    }

    #[test]
    fn parse_select_holds_filters() {
        assert_eq!(
            parse_sql("SELECT * FROM holds").unwrap(),
            Command::SelectHolds {
                filter: HoldFilter::Caller,
            }
        );
        let by_unit = format!("SELECT * FROM holds WHERE unit_id = '{ID}'");
        assert_eq!(
            parse_sql(&by_unit).unwrap(),
            Command::SelectHolds {
                filter: HoldFilter::Unit(ulid(ID)),
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM holds WHERE user_id = 'alice'").unwrap(),
            Command::SelectHolds {
                filter: HoldFilter::User("alice".into()),
            }
        );
    }

    #[test]
    fn parse_select_read_models() {
        let avail = format!("SELECT * FROM availability WHERE unit_id = '{ID}'");
        assert_eq!(
            parse_sql(&avail).unwrap(),
            Command::SelectAvailability { unit_id: ulid(ID) }
        );
        let summary = format!("SELECT * FROM summaries WHERE unit_id = '{ID}'");
        assert_eq!(
            parse_sql(&summary).unwrap(),
            Command::SelectSummary { unit_id: ulid(ID) }
        );
        let conflict = format!("SELECT * FROM conflicts WHERE unit_id = '{ID}';");
        assert_eq!(
            parse_sql(&conflict).unwrap(),
            Command::SelectConflict { unit_id: ulid(ID) }
        );
    }

    #[test]
    fn parse_select_availability_requires_unit() {
        assert!(matches!(
            parse_sql("SELECT * FROM availability"),
            Err(SqlError::MissingFilter("unit_id"))
        ));
    }

    #[test]
    fn parse_select_payouts() {
        assert_eq!(
            parse_sql("SELECT * FROM payouts WHERE owner_id = 'landlord'").unwrap(),
            Command::SelectPayouts {
                filter: PayoutFilter::Owner("landlord".into()),
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM payouts").unwrap(),
            Command::SelectPayouts {
                filter: PayoutFilter::All,
            }
        );
    }

    #[test]
    fn parse_listen_and_unlisten() {
        let listen = format!("LISTEN unit_{ID}");
        assert_eq!(
            parse_sql(&listen).unwrap(),
            Command::Listen {
                channel: format!("unit_{ID}"),
            }
        );
        let unlisten = format!("UNLISTEN unit_{ID};");
        assert_eq!(
            parse_sql(&unlisten).unwrap(),
            Command::Unlisten {
                channel: format!("unit_{ID}"),
            }
        );
        assert_eq!(parse_sql("UNLISTEN *").unwrap(), Command::UnlistenAll);
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO leases (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn split_respects_quotes() {
        let batch = "INSERT INTO units (id, kind, name) VALUES ('a', 'room', 'x;y');\n  LISTEN unit_b;;";
        assert_eq!(
            split_statements(batch),
            vec!["INSERT INTO units (id, kind, name) VALUES ('a', 'room', 'x;y')", "LISTEN unit_b"]
        );
        assert!(split_statements(" ; ").is_empty());
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
