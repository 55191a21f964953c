use std::collections::BTreeSet;
use std::fmt;

use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// A raw password as it arrived on the wire. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct RawPassword(String);

impl RawPassword {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RawPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    Register {
        username: String,
        password: RawPassword,
        role: Role,
    },
    Login {
        username: String,
        password: RawPassword,
    },
    SetSession {
        token: String,
    },
    ResetSession,
    InsertRoom {
        room: NewRoom,
    },
    UpdateRoom {
        id: Ulid,
        patch: RoomPatch,
    },
    DeleteRoom {
        id: Ulid,
    },
    InsertBooking {
        room_id: Ulid,
        start_hour: Hour,
        end_hour: Hour,
    },
    UpdateBooking {
        id: Ulid,
        room_id: Ulid,
        start_hour: Hour,
        end_hour: Hour,
    },
    DeleteBooking {
        id: Ulid,
        room_id: Ulid,
    },
    SelectRooms {
        id: Option<Ulid>,
    },
    SelectBookings {
        room_id: Ulid,
    },
    SelectAvailableRooms {
        start_hour: Hour,
        end_hour: Hour,
    },
    SelectReservations,
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        s.get(prefix.len()..)
    } else {
        None
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();

    if let Some(rest) = strip_prefix_ci(trimmed, "SET SESSION AUTHORIZATION") {
        let token = rest.trim().trim_matches('\'').trim();
        if token.is_empty() {
            return Err(SqlError::Parse("SET SESSION AUTHORIZATION needs a token".into()));
        }
        if token.eq_ignore_ascii_case("DEFAULT") {
            return Ok(Command::ResetSession);
        }
        return Ok(Command::SetSession { token: token.to_string() });
    }
    if trimmed.eq_ignore_ascii_case("RESET SESSION AUTHORIZATION") {
        return Ok(Command::ResetSession);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update { table, assignments, selection, .. } => {
            parse_update(&table.relation, assignments, selection.as_ref())
        }
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Verb and table of a statement, read without interpreting any values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Session,
    Insert(String),
    Update(String),
    Delete(String),
    Select(String),
}

/// Classify a statement whose `$n` parameters may still be unbound.
pub fn statement_target(sql: &str) -> Result<Target, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    if strip_prefix_ci(trimmed, "SET SESSION AUTHORIZATION").is_some()
        || trimmed.eq_ignore_ascii_case("RESET SESSION AUTHORIZATION")
    {
        return Ok(Target::Session);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    match stmts.first().ok_or(SqlError::Empty)? {
        Statement::Insert(insert) => Ok(Target::Insert(insert_table_name(insert)?)),
        Statement::Update { table, .. } => Ok(Target::Update(table_factor_name(&table.relation)?)),
        Statement::Delete(delete) => Ok(Target::Delete(delete_table_name(delete)?)),
        Statement::Query(query) => Ok(Target::Select(select_from(query)?.1)),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "users" => {
            let row = insert_row(insert, &["username", "password", "role"])?;
            let role = match row.get("role") {
                Some(expr) if !is_null(expr) => parse_role(expr)?,
                _ => Role::User,
            };
            Ok(Command::Register {
                username: parse_string(row.require("username")?)?,
                password: RawPassword::new(parse_string(row.require("password")?)?),
                role,
            })
        }
        "rooms" => {
            let row = insert_row(insert, &["name", "capacity", "amenities", "price"])?;
            let amenities = match row.get("amenities") {
                Some(expr) => parse_amenities(expr)?,
                None => BTreeSet::new(),
            };
            let price = match row.get("price") {
                Some(expr) => parse_i64(expr)?,
                None => 0,
            };
            Ok(Command::InsertRoom {
                room: NewRoom {
                    name: parse_string(row.require("name")?)?,
                    capacity: parse_u32(row.require("capacity")?)?,
                    amenities,
                    price,
                },
            })
        }
        "bookings" => {
            let row = insert_row(insert, &["room_id", "start_hour", "end_hour"])?;
            Ok(Command::InsertBooking {
                room_id: parse_ulid(row.require("room_id")?)?,
                start_hour: parse_i64(row.require("start_hour")?)?,
                end_hour: parse_i64(row.require("end_hour")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Column → value pairs of a single-row INSERT. Without a column list the
/// values are taken positionally in `canonical` order.
struct Row {
    cells: Vec<(String, Expr)>,
}

impl Row {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.cells.iter().find(|(c, _)| c == column).map(|(_, e)| e)
    }

    fn require(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }
}

fn insert_row(insert: &ast::Insert, canonical: &'static [&'static str]) -> Result<Row, SqlError> {
    let rows = extract_insert_rows(insert)?;
    if rows.len() != 1 {
        return Err(SqlError::Unsupported("multi-row INSERT".into()));
    }
    let values = &rows[0];

    let cells = if insert.columns.is_empty() {
        if values.len() > canonical.len() {
            return Err(SqlError::WrongArity(canonical.len(), values.len()));
        }
        canonical
            .iter()
            .zip(values.iter())
            .map(|(c, v)| (c.to_string(), v.clone()))
            .collect()
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity(insert.columns.len(), values.len()));
        }
        let mut cells = Vec::with_capacity(values.len());
        for (ident, value) in insert.columns.iter().zip(values.iter()) {
            let column = ident.value.to_lowercase();
            if !canonical.contains(&column.as_str()) {
                return Err(SqlError::UnknownColumn(column));
            }
            cells.push((column, value.clone()));
        }
        cells
    };
    Ok(Row { cells })
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => return Err(SqlError::Unsupported("tuple assignment".into())),
        };
        set.push((column, &assignment.value));
    }
    let filters = collect_filters(selection)?;

    match table.as_str() {
        "rooms" => {
            let mut patch = RoomPatch::default();
            for (column, value) in set {
                match column.as_str() {
                    "name" => patch.name = Some(parse_string(value)?),
                    "capacity" => patch.capacity = Some(parse_u32(value)?),
                    "amenities" => patch.amenities = Some(parse_amenities(value)?),
                    "price" => patch.price = Some(parse_i64(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateRoom { id: parse_ulid(filters.eq("id")?)?, patch })
        }
        "bookings" => {
            let (mut start_hour, mut end_hour) = (None, None);
            for (column, value) in set {
                match column.as_str() {
                    "start_hour" => start_hour = Some(parse_i64(value)?),
                    "end_hour" => end_hour = Some(parse_i64(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateBooking {
                id: parse_ulid(filters.eq("id")?)?,
                room_id: parse_ulid(filters.eq("room_id")?)?,
                start_hour: start_hour.ok_or(SqlError::MissingColumn("start_hour"))?,
                end_hour: end_hour.ok_or(SqlError::MissingColumn("end_hour"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_filters(delete.selection.as_ref())?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id: parse_ulid(filters.eq("id")?)? }),
        "bookings" => Ok(Command::DeleteBooking {
            id: parse_ulid(filters.eq("id")?)?,
            room_id: parse_ulid(filters.eq("room_id")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// The SELECT body and the table it reads from.
fn select_from(query: &ast::Query) -> Result<(&ast::Select, String), SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    Ok((select, table))
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let (select, table) = select_from(query)?;
    let filters = collect_filters(select.selection.as_ref())?;

    match table.as_str() {
        "login" => Ok(Command::Login {
            username: parse_string(filters.eq("username")?)?,
            password: RawPassword::new(parse_string(filters.eq("password")?)?),
        }),
        "rooms" => {
            let id = match filters.find("id", ast::BinaryOperator::Eq) {
                Some(expr) => Some(parse_ulid(expr)?),
                None => None,
            };
            Ok(Command::SelectRooms { id })
        }
        "bookings" => Ok(Command::SelectBookings { room_id: parse_ulid(filters.eq("room_id")?)? }),
        "available_rooms" => {
            let start = filters
                .find("start_hour", ast::BinaryOperator::Eq)
                .or_else(|| filters.find("start_hour", ast::BinaryOperator::GtEq))
                .ok_or(SqlError::MissingFilter("start_hour"))?;
            let end = filters
                .find("end_hour", ast::BinaryOperator::Eq)
                .or_else(|| filters.find("end_hour", ast::BinaryOperator::LtEq))
                .ok_or(SqlError::MissingFilter("end_hour"))?;
            Ok(Command::SelectAvailableRooms {
                start_hour: parse_i64(start)?,
                end_hour: parse_i64(end)?,
            })
        }
        "reservations" => Ok(Command::SelectReservations),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE ─────────────────────────────────────────────────────

/// Flattened `col <op> value` comparisons joined by AND.
struct Filters<'a> {
    terms: Vec<(String, ast::BinaryOperator, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn find(&self, column: &str, op: ast::BinaryOperator) -> Option<&'a Expr> {
        self.terms
            .iter()
            .find(|(c, o, _)| c == column && *o == op)
            .map(|(_, _, e)| *e)
    }

    fn eq(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.find(column, ast::BinaryOperator::Eq)
            .ok_or(SqlError::MissingFilter(column))
    }
}

fn collect_filters(selection: Option<&Expr>) -> Result<Filters<'_>, SqlError> {
    let mut terms = Vec::new();
    if let Some(expr) = selection {
        flatten_and(expr, &mut terms)?;
    }
    Ok(Filters { terms })
}

fn flatten_and<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, ast::BinaryOperator, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => flatten_and(inner, out),
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            flatten_and(left, out)?;
            flatten_and(right, out)
        }
        Expr::BinaryOp { left, op, right } => match expr_column_name(left) {
            Some(column) => {
                out.push((column, op.clone(), right.as_ref()));
                Ok(())
            }
            None => Err(SqlError::Unsupported(format!("filter {expr}"))),
        },
        _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_role(expr: &Expr) -> Result<Role, SqlError> {
    parse_string(expr)?.parse().map_err(SqlError::Parse)
}

/// Comma-separated amenity list. NULL or empty text is no amenities.
fn parse_amenities(expr: &Expr) -> Result<BTreeSet<String>, SqlError> {
    if is_null(expr) {
        return Ok(BTreeSet::new());
    }
    Ok(parse_string(expr)?
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect())
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(expected, got) => {
                write!(f, "expected {expected} values, got {got}")
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

    const ROOM: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const BOOKING: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    #[test]
    fn parse_register_with_role() {
        let cmd = parse_sql("INSERT INTO users (username, password, role) VALUES ('alice', 'pw', 'admin')").unwrap();
        assert_eq!(
            cmd,
            Command::Register {
                username: "alice".into(),
                password: RawPassword::new("pw"),
                role: Role::Admin,
            }
        );
    }

    #[test]
    fn parse_register_defaults_to_user() {
        let cmd = parse_sql("INSERT INTO users (username, password) VALUES ('bob', 'pw')").unwrap();
        assert!(matches!(cmd, Command::Register { role: Role::User, .. }));
    }

    #[test]
    fn parse_register_rejects_unknown_role() {
        assert!(parse_sql("INSERT INTO users VALUES ('bob', 'pw', 'root')").is_err());
    }

    #[test]
    fn register_debug_hides_password() {
        let cmd = parse_sql("INSERT INTO users VALUES ('bob', 'hunter2')").unwrap();
        assert!(!format!("{cmd:?}").contains("hunter2"));
    }

    #[test]
    fn parse_login() {
        let cmd = parse_sql("SELECT * FROM login WHERE username = 'alice' AND password = 'pw'").unwrap();
        assert_eq!(
            cmd,
            Command::Login { username: "alice".into(), password: RawPassword::new("pw") }
        );
    }

    #[test]
    fn parse_login_requires_both_filters() {
        assert!(matches!(
            parse_sql("SELECT * FROM login WHERE username = 'alice'"),
            Err(SqlError::MissingFilter("password"))
        ));
    }

    #[test]
    fn parse_session_commands() {
        assert_eq!(
            parse_sql("SET SESSION AUTHORIZATION 'abc.def.ghi';").unwrap(),
            Command::SetSession { token: "abc.def.ghi".into() }
        );
        assert_eq!(
            parse_sql("set session authorization abc.def.ghi").unwrap(),
            Command::SetSession { token: "abc.def.ghi".into() }
        );
        assert_eq!(parse_sql("RESET SESSION AUTHORIZATION").unwrap(), Command::ResetSession);
        assert_eq!(parse_sql("SET SESSION AUTHORIZATION DEFAULT").unwrap(), Command::ResetSession);
        assert!(parse_sql("SET SESSION AUTHORIZATION ''").is_err());
    }

    #[test]
    fn parse_insert_room_with_amenities() {
        let cmd = parse_sql(
            "INSERT INTO rooms (name, capacity, amenities, price) VALUES ('Atlas', 8, 'projector, whiteboard,', 2500)",
        )
        .unwrap();
        match cmd {
            Command::InsertRoom { room } => {
                assert_eq!(room.name, "Atlas");
                assert_eq!(room.capacity, 8);
                assert_eq!(room.price, 2500);
                assert_eq!(
                    room.amenities,
                    BTreeSet::from(["projector".to_string(), "whiteboard".to_string()])
                );
            }
            _ => panic!("expected InsertRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_room_columns_in_any_order() {
        let cmd = parse_sql("INSERT INTO rooms (price, name, capacity) VALUES (10, 'B', 2)").unwrap();
        match cmd {
            Command::InsertRoom { room } => {
                assert_eq!(room.name, "B");
                assert_eq!(room.capacity, 2);
                assert_eq!(room.price, 10);
                assert!(room.amenities.is_empty());
            }
            _ => panic!("expected InsertRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_room_rejects_negative_capacity_and_unknown_column() {
        assert!(parse_sql("INSERT INTO rooms (name, capacity) VALUES ('A', -1)").is_err());
        assert!(matches!(
            parse_sql("INSERT INTO rooms (name, capacity, colour) VALUES ('A', 1, 'red')"),
            Err(SqlError::UnknownColumn(_))
        ));
        assert!(matches!(
            parse_sql("INSERT INTO rooms (capacity) VALUES (3)"),
            Err(SqlError::MissingColumn("name"))
        ));
    }

    #[test]
    fn parse_select_rooms() {
        assert_eq!(parse_sql("SELECT * FROM rooms").unwrap(), Command::SelectRooms { id: None });
        let cmd = parse_sql(&format!("SELECT * FROM rooms WHERE id = '{ROOM}'")).unwrap();
        assert_eq!(cmd, Command::SelectRooms { id: Some(Ulid::from_string(ROOM).unwrap()) });
    }

    #[test]
    fn parse_update_room_patch() {
        let cmd = parse_sql(&format!("UPDATE rooms SET price = 3000, amenities = 'tv' WHERE id = '{ROOM}'")).unwrap();
        match cmd {
            Command::UpdateRoom { id, patch } => {
                assert_eq!(id.to_string(), ROOM);
                assert_eq!(patch.price, Some(3000));
                assert_eq!(patch.amenities, Some(BTreeSet::from(["tv".to_string()])));
                assert_eq!(patch.name, None);
                assert_eq!(patch.capacity, None);
            }
            _ => panic!("expected UpdateRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_room_unknown_column() {
        let sql = format!("UPDATE rooms SET colour = 'red' WHERE id = '{ROOM}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(_))));
    }

    #[test]
    fn parse_delete_room() {
        let cmd = parse_sql(&format!("DELETE FROM rooms WHERE id = '{ROOM}'")).unwrap();
        assert_eq!(cmd, Command::DeleteRoom { id: Ulid::from_string(ROOM).unwrap() });
    }

    #[test]
    fn parse_insert_booking() {
        let cmd = parse_sql(&format!(
            "INSERT INTO bookings (room_id, start_hour, end_hour) VALUES ('{ROOM}', 9, 11)"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertBooking { room_id: Ulid::from_string(ROOM).unwrap(), start_hour: 9, end_hour: 11 }
        );
    }

    #[test]
    fn parse_insert_booking_positional() {
        let cmd = parse_sql(&format!("INSERT INTO bookings VALUES ('{ROOM}', 13, 14)")).unwrap();
        assert!(matches!(cmd, Command::InsertBooking { start_hour: 13, end_hour: 14, .. }));
    }

    #[test]
    fn parse_update_booking() {
        let cmd = parse_sql(&format!(
            "UPDATE bookings SET start_hour = 10, end_hour = 12 WHERE id = '{BOOKING}' AND room_id = '{ROOM}'"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::UpdateBooking {
                id: Ulid::from_string(BOOKING).unwrap(),
                room_id: Ulid::from_string(ROOM).unwrap(),
                start_hour: 10,
                end_hour: 12,
            }
        );
    }

    #[test]
    fn parse_update_booking_needs_both_hours_and_room() {
        let sql = format!("UPDATE bookings SET start_hour = 10 WHERE id = '{BOOKING}' AND room_id = '{ROOM}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("end_hour"))));
        let sql = format!("UPDATE bookings SET start_hour = 10, end_hour = 11 WHERE id = '{BOOKING}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("room_id"))));
    }

    #[test]
    fn parse_delete_booking() {
        let cmd = parse_sql(&format!(
            "DELETE FROM bookings WHERE (room_id = '{ROOM}') AND id = '{BOOKING}'"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::DeleteBooking {
                id: Ulid::from_string(BOOKING).unwrap(),
                room_id: Ulid::from_string(ROOM).unwrap(),
            }
        );
    }

    #[test]
    fn parse_select_available_rooms() {
        let cmd = parse_sql("SELECT * FROM available_rooms WHERE start_hour = 9 AND end_hour = 11").unwrap();
        assert_eq!(cmd, Command::SelectAvailableRooms { start_hour: 9, end_hour: 11 });
        let cmd = parse_sql("SELECT * FROM available_rooms WHERE start_hour >= 14 AND end_hour <= 15").unwrap();
        assert_eq!(cmd, Command::SelectAvailableRooms { start_hour: 14, end_hour: 15 });
        assert!(matches!(
            parse_sql("SELECT * FROM available_rooms WHERE start_hour = 9"),
            Err(SqlError::MissingFilter("end_hour"))
        ));
    }

    #[test]
    fn parse_select_bookings_and_reservations() {
        let cmd = parse_sql(&format!("SELECT * FROM bookings WHERE room_id = '{ROOM}'")).unwrap();
        assert_eq!(cmd, Command::SelectBookings { room_id: Ulid::from_string(ROOM).unwrap() });
        assert_eq!(parse_sql("SELECT * FROM reservations").unwrap(), Command::SelectReservations);
    }

    #[test]
    fn parse_negative_hours_reach_validation() {
        let cmd = parse_sql(&format!("INSERT INTO bookings VALUES ('{ROOM}', -2, 3)")).unwrap();
        assert!(matches!(cmd, Command::InsertBooking { start_hour: -2, .. }));
    }

    #[test]
    fn parse_bad_ulid_errors() {
        assert!(parse_sql("DELETE FROM rooms WHERE id = 'nope'").is_err());
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("SELECT * FROM foobar"),
            Err(SqlError::UnknownTable(t)) if t == "foobar"
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn statement_target_with_unbound_params() {
        assert_eq!(
            statement_target("INSERT INTO rooms (name, capacity) VALUES ($1, $2)").unwrap(),
            Target::Insert("rooms".into())
        );
        assert_eq!(
            statement_target("UPDATE bookings SET start_hour = $1, end_hour = $2 WHERE id = $3 AND room_id = $4").unwrap(),
            Target::Update("bookings".into())
        );
        assert_eq!(
            statement_target("DELETE FROM rooms WHERE id = $1").unwrap(),
            Target::Delete("rooms".into())
        );
        assert_eq!(
            statement_target("SELECT * FROM login WHERE username = $1 AND password = $2").unwrap(),
            Target::Select("login".into())
        );
        assert_eq!(statement_target("SET SESSION AUTHORIZATION $1").unwrap(), Target::Session);
    }

    #[test]
    fn statement_target_ignores_literal_contents() {
        assert_eq!(
            statement_target("INSERT INTO rooms (name, capacity) VALUES ('Login lounge', 4)").unwrap(),
            Target::Insert("rooms".into())
        );
    }
}
