use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::ReservationFilter;

/// Parsed command from SQL input.
///
/// Reservation timestamps stay raw text: parsing them is the first rule the
/// reservation pipeline checks, and its failure is a rule violation rather
/// than a syntax error.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertLaboratory {
        id: Ulid,
        name: String,
        code: String,
    },
    UpdateLaboratory {
        id: Ulid,
        name: String,
        code: String,
    },
    SetLaboratoryActive {
        id: Ulid,
        active: bool,
    },
    DeleteLaboratory {
        id: Ulid,
    },
    SelectLaboratories {
        id: Option<Ulid>,
        active: Option<bool>,
    },
    InsertReservation {
        id: Ulid,
        laboratory_id: Ulid,
        start: String,
        end: String,
    },
    UpdateReservation {
        id: Ulid,
        start: String,
        end: String,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectReservations {
        filter: ReservationFilter,
    },
}

const LABORATORY_COLUMNS: [&str; 3] = ["id", "name", "code"];
const RESERVATION_COLUMNS: [&str; 4] = ["id", "laboratory_id", "start", "end"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
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
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();

    match table.as_str() {
        "laboratories" => {
            let row = Row::new("laboratories", &LABORATORY_COLUMNS, &columns, &values)?;
            Ok(Command::InsertLaboratory {
                id: parse_ulid_expr(row.get("id")?)?,
                name: parse_text_expr(row.get("name")?)?,
                code: parse_text_expr(row.get("code")?)?,
            })
        }
        "reservations" => {
            let row = Row::new("reservations", &RESERVATION_COLUMNS, &columns, &values)?;
            Ok(Command::InsertReservation {
                id: parse_ulid_expr(row.get("id")?)?,
                laboratory_id: parse_ulid_expr(row.get("laboratory_id")?)?,
                start: parse_text_expr(row.get("start")?)?,
                end: parse_text_expr(row.get("end")?)?,
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

    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.push((column, &a.value));
    }
    let lookup = |col: &'static str| set.iter().find(|(c, _)| c == col).map(|(_, v)| *v);

    match table.as_str() {
        "laboratories" => {
            if let Some(active) = lookup("active") {
                if set.len() > 1 {
                    return Err(SqlError::Unsupported(
                        "active must be updated on its own".into(),
                    ));
                }
                return Ok(Command::SetLaboratoryActive {
                    id,
                    active: parse_bool_expr(active)?,
                });
            }
            if let Some((col, _)) = set.iter().find(|(c, _)| c != "name" && c != "code") {
                return Err(SqlError::UnknownColumn("laboratories", col.clone()));
            }
            // Blank or missing fields are rejected by the catalog.
            let text = |col| lookup(col).map(parse_text_expr).transpose();
            Ok(Command::UpdateLaboratory {
                id,
                name: text("name")?.unwrap_or_default(),
                code: text("code")?.unwrap_or_default(),
            })
        }
        "reservations" => {
            if let Some((col, _)) = set.iter().find(|(c, _)| c != "start" && c != "end") {
                return Err(SqlError::UnknownColumn("reservations", col.clone()));
            }
            Ok(Command::UpdateReservation {
                id,
                start: parse_text_expr(lookup("start").ok_or(SqlError::MissingColumn("start"))?)?,
                end: parse_text_expr(lookup("end").ok_or(SqlError::MissingColumn("end"))?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "laboratories" => Ok(Command::DeleteLaboratory { id }),
        "reservations" => Ok(Command::DeleteReservation { id }),
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
        collect_eq_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "laboratories" => {
            let (mut id, mut active) = (None, None);
            for (col, expr) in filters {
                match col.as_str() {
                    "id" => id = Some(parse_ulid_expr(expr)?),
                    "active" => active = Some(parse_bool_expr(expr)?),
                    _ => return Err(SqlError::UnknownColumn("laboratories", col)),
                }
            }
            Ok(Command::SelectLaboratories { id, active })
        }
        "reservations" => {
            let mut filter = ReservationFilter::default();
            for (col, expr) in filters {
                match col.as_str() {
                    "id" => filter.id = Some(parse_ulid_expr(expr)?),
                    "laboratory_id" => filter.laboratory_id = Some(parse_ulid_expr(expr)?),
                    "day" => filter.day = Some(parse_date_expr(expr)?),
                    _ => return Err(SqlError::UnknownColumn("reservations", col)),
                }
            }
            Ok(Command::SelectReservations { filter })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = x AND b = y ...` into `(column, value)` pairs.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

/// One VALUES row, addressed by column name whether or not the INSERT named
/// its columns.
struct Row<'a> {
    columns: Vec<String>,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn new(
        table: &'static str,
        known: &[&str],
        named: &[String],
        values: &'a [Expr],
    ) -> Result<Self, SqlError> {
        let columns: Vec<String> = if named.is_empty() {
            known.iter().map(|c| c.to_string()).collect()
        } else {
            if let Some(col) = named.iter().find(|c| !known.contains(&c.as_str())) {
                return Err(SqlError::UnknownColumn(table, col.clone()));
            }
            named.to_vec()
        };
        if values.len() != columns.len() {
            return Err(SqlError::WrongArity(table, columns.len(), values.len()));
        }
        Ok(Self { columns, values })
    }

    fn get(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
            .ok_or(SqlError::MissingColumn(column))
    }
}

// ── Helpers ───────────────────────────────────────────────────

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
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
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

/// Text literal; numbers are taken verbatim. NULL reads as empty.
fn parse_text_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(Value::Null) => Ok(String::new()),
        Some(value) => Err(SqlError::Parse(format!("expected text, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_bool_expr(expr: &Expr) -> Result<bool, SqlError> {
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

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let text = parse_text_expr(expr)?;
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {text:?}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const LAB: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_insert_laboratory() {
        let sql = format!("INSERT INTO laboratories (id, name, code) VALUES ('{ID}', 'Chemistry', 'CHEM-1')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertLaboratory {
                id: ulid(ID),
                name: "Chemistry".into(),
                code: "CHEM-1".into(),
            }
        );
    }

    #[test]
    fn parse_insert_laboratory_named_columns_any_order() {
        let sql = format!("INSERT INTO laboratories (code, id, name) VALUES ('CHEM-1', '{ID}', 'Chemistry')");
        match parse_sql(&sql).unwrap() {
            Command::InsertLaboratory { name, code, .. } => {
                assert_eq!(name, "Chemistry");
                assert_eq!(code, "CHEM-1");
            }
            cmd => panic!("expected InsertLaboratory, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_laboratory_positional() {
        let sql = format!("INSERT INTO laboratories VALUES ('{ID}', 'Chemistry', 'CHEM-1')");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::InsertLaboratory { .. }));
    }

    #[test]
    fn parse_insert_laboratory_missing_column() {
        let sql = format!("INSERT INTO laboratories (id, name) VALUES ('{ID}', 'Chemistry')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("code"))));
    }

    #[test]
    fn parse_insert_wrong_arity() {
        let sql = format!("INSERT INTO laboratories (id, name, code) VALUES ('{ID}', 'Chemistry')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("laboratories", 3, 2))));
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = format!(
            r#"INSERT INTO reservations (id, laboratory_id, start, "end") VALUES ('{ID}', '{LAB}', '2025-01-10 10:00', '2025-01-10 11:00')"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertReservation {
                id: ulid(ID),
                laboratory_id: ulid(LAB),
                start: "2025-01-10 10:00".into(),
                end: "2025-01-10 11:00".into(),
            }
        );
    }

    #[test]
    fn parse_insert_reservation_keeps_garbage_dates() {
        let sql = format!(
            r#"INSERT INTO reservations (id, laboratory_id, start, "end") VALUES ('{ID}', '{LAB}', 'not a date', 'tomorrow')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { start, end, .. } => {
                assert_eq!(start, "not a date");
                assert_eq!(end, "tomorrow");
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_unknown_column() {
        let sql = format!(
            r#"INSERT INTO reservations (id, laboratory_id, start, "end", owner) VALUES ('{ID}', '{LAB}', 'a', 'b', 'mallory')"#
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn("reservations", _))));
    }

    #[test]
    fn parse_multi_row_insert_unsupported() {
        let sql = format!(
            "INSERT INTO laboratories VALUES ('{ID}', 'A', 'A'), ('{LAB}', 'B', 'B')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_update_laboratory() {
        let sql = format!("UPDATE laboratories SET name = 'Physics', code = 'PHY' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateLaboratory {
                id: ulid(ID),
                name: "Physics".into(),
                code: "PHY".into(),
            }
        );
    }

    #[test]
    fn parse_update_laboratory_partial_leaves_blank() {
        let sql = format!("UPDATE laboratories SET name = 'Physics' WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateLaboratory { code, .. } => assert!(code.is_empty()),
            cmd => panic!("expected UpdateLaboratory, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_set_laboratory_active() {
        let sql = format!("UPDATE laboratories SET active = false WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SetLaboratoryActive {
                id: ulid(ID),
                active: false,
            }
        );
        let sql = format!("UPDATE laboratories SET active = 'true' WHERE id = '{ID}'");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::SetLaboratoryActive { active: true, .. }
        ));
    }

    #[test]
    fn parse_update_active_with_other_columns_rejected() {
        let sql = format!("UPDATE laboratories SET active = true, name = 'X' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_update_reservation() {
        let sql = format!(
            r#"UPDATE reservations SET start = '2025-01-10T10:00:00', "end" = '2025-01-10T11:00:00' WHERE id = '{ID}'"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateReservation {
                id: ulid(ID),
                start: "2025-01-10T10:00:00".into(),
                end: "2025-01-10T11:00:00".into(),
            }
        );
    }

    #[test]
    fn parse_update_reservation_requires_both_ends() {
        let sql = format!("UPDATE reservations SET start = '2025-01-10T10:00:00' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("end"))));
    }

    #[test]
    fn parse_update_reservation_cannot_move_laboratory() {
        let sql = format!("UPDATE reservations SET laboratory_id = '{LAB}' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn("reservations", _))));
    }

    #[test]
    fn parse_update_requires_where_id() {
        let sql = "UPDATE laboratories SET name = 'X', code = 'Y'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_deletes() {
        let sql = format!("DELETE FROM laboratories WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteLaboratory { id: ulid(ID) });
        let sql = format!("DELETE FROM reservations WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteReservation { id: ulid(ID) });
    }

    #[test]
    fn parse_select_laboratories() {
        assert_eq!(
            parse_sql("SELECT * FROM laboratories").unwrap(),
            Command::SelectLaboratories { id: None, active: None }
        );
        assert_eq!(
            parse_sql("SELECT * FROM laboratories WHERE active = true").unwrap(),
            Command::SelectLaboratories { id: None, active: Some(true) }
        );
        let sql = format!("SELECT * FROM laboratories WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectLaboratories { id: Some(ulid(ID)), active: None }
        );
    }

    #[test]
    fn parse_select_reservations_filters() {
        let sql = format!("SELECT * FROM reservations WHERE laboratory_id = '{LAB}' AND day = '2025-01-10'");
        match parse_sql(&sql).unwrap() {
            Command::SelectReservations { filter } => {
                assert_eq!(filter.id, None);
                assert_eq!(filter.laboratory_id, Some(ulid(LAB)));
                assert_eq!(filter.day, NaiveDate::from_ymd_opt(2025, 1, 10));
            }
            cmd => panic!("expected SelectReservations, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_reservations_bad_day() {
        let sql = "SELECT * FROM reservations WHERE day = '10/01/2025'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_select_unsupported_filter() {
        let sql = "SELECT * FROM reservations WHERE start > '2025-01-10'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
        let sql = "SELECT * FROM reservations WHERE owner = 'ana'";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn("reservations", _))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO bookings (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
