use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use chrono::{NaiveDate, NaiveTime};

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBooking {
        /// Server assigns a fresh ULID when absent.
        id: Option<Ulid>,
        draft: BookingDraft,
    },
    UpdateBooking {
        id: Ulid,
        patch: BookingPatch,
    },
    DeleteBooking {
        id: Ulid,
    },
    PurgePeriod {
        selector: PeriodSelector,
    },
    SelectBookings {
        period: Option<PeriodSelector>,
        search: Option<String>,
    },
    SelectActiveBookings {
        search: Option<String>,
    },
    SelectRooms,
}

impl Command {
    /// Commands that change stored bookings.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Command::InsertBooking { .. }
                | Command::UpdateBooking { .. }
                | Command::DeleteBooking { .. }
                | Command::PurgePeriod { .. }
        )
    }
}

/// Positional column order for `INSERT INTO bookings VALUES (...)`.
const INSERT_COLUMNS: [&str; 6] = ["date", "name", "room", "start_time", "end_time", "description"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }

    match stmt {
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

/// Table a single SELECT reads from, lowercased. `$N` placeholders may still
/// be unbound. `None` for anything else or unparseable input.
pub fn select_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let [Statement::Query(query)] = stmts.as_slice() else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    let first = select.from.first()?;
    table_factor_name(&first.relation).ok()
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let values = extract_insert_values(insert)?;

    let columns: Vec<String> = if insert.columns.is_empty() {
        if values.len() < 5 || values.len() > INSERT_COLUMNS.len() {
            return Err(SqlError::WrongArity("bookings", 5, values.len()));
        }
        INSERT_COLUMNS[..values.len()].iter().map(|c| c.to_string()).collect()
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity("bookings", insert.columns.len(), values.len()));
        }
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };

    let (mut id, mut date, mut name, mut room, mut start, mut end, mut description) =
        (None, None, None, None, None, None, None);
    for (col, expr) in columns.iter().zip(values.iter()) {
        match col.as_str() {
            "id" => id = Some(parse_ulid_expr(expr)?),
            "date" => date = Some(parse_date_expr(expr)?),
            "name" => name = Some(parse_string_expr(expr)?),
            "room" => room = Some(parse_room_expr(expr)?),
            "start_time" => start = Some(parse_time_expr(expr)?),
            "end_time" => end = Some(parse_time_expr(expr)?),
            "description" => description = parse_string_or_null(expr)?,
            _ => return Err(SqlError::UnknownColumn(col.clone())),
        }
    }

    // Ordering and emptiness checks belong to the engine.
    let draft = BookingDraft {
        date: date.ok_or(SqlError::MissingColumn("date"))?,
        name: name.ok_or(SqlError::MissingColumn("name"))?,
        room: room.ok_or(SqlError::MissingColumn("room"))?,
        time: TimeRange {
            start: start.ok_or(SqlError::MissingColumn("start_time"))?,
            end: end.ok_or(SqlError::MissingColumn("end_time"))?,
        },
        description,
    };
    Ok(Command::InsertBooking { id, draft })
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }

    let mut patch = BookingPatch::default();
    for assignment in assignments {
        let col = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        let expr = &assignment.value;
        match col.as_str() {
            "date" => patch.date = Some(parse_date_expr(expr)?),
            "name" => patch.name = Some(parse_string_expr(expr)?),
            "room" => patch.room = Some(parse_room_expr(expr)?),
            "start_time" => patch.start = Some(parse_time_expr(expr)?),
            "end_time" => patch.end = Some(parse_time_expr(expr)?),
            "description" => patch.description = Some(parse_string_or_null(expr)?),
            "id" => return Err(SqlError::Unsupported("changing a booking id".into())),
            _ => return Err(SqlError::UnknownColumn(col)),
        }
    }

    let filters = collect_filters(selection.as_ref())?;
    let id = filters.id.ok_or(SqlError::MissingFilter("id"))?;
    if filters.has_period() || filters.search.is_some() {
        return Err(SqlError::Unsupported("UPDATE filters other than id".into()));
    }
    Ok(Command::UpdateBooking { id, patch })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = collect_filters(delete.selection.as_ref())?;
    if filters.search.is_some() {
        return Err(SqlError::Unsupported("DELETE by search".into()));
    }
    match (filters.id, filters.has_period()) {
        (Some(id), false) => Ok(Command::DeleteBooking { id }),
        (None, true) => Ok(Command::PurgePeriod { selector: filters.selector() }),
        (Some(_), true) => Err(SqlError::Unsupported("DELETE by id and period".into())),
        (None, false) => Err(SqlError::MissingFilter("id or year")),
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
    let filters = collect_filters(select.selection.as_ref())?;
    if filters.id.is_some() {
        return Err(SqlError::Unsupported("SELECT by id".into()));
    }

    match table.as_str() {
        "bookings" => Ok(Command::SelectBookings {
            period: filters.has_period().then(|| filters.selector()),
            search: filters.search,
        }),
        "active_bookings" => {
            if filters.has_period() {
                return Err(SqlError::Unsupported("period filter on active_bookings".into()));
            }
            Ok(Command::SelectActiveBookings { search: filters.search })
        }
        "rooms" => {
            if select.selection.is_some() {
                return Err(SqlError::Unsupported("filters on rooms".into()));
            }
            Ok(Command::SelectRooms)
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = value` terms of a WHERE clause joined by AND.
#[derive(Debug, Default)]
struct Filters {
    id: Option<Ulid>,
    year: Option<i32>,
    month: Option<u32>,
    quarter: Option<u32>,
    search: Option<String>,
}

impl Filters {
    fn has_period(&self) -> bool {
        self.year.is_some() || self.month.is_some() || self.quarter.is_some()
    }

    /// Raw selector; range and combination checks happen in the period resolver.
    fn selector(&self) -> PeriodSelector {
        PeriodSelector {
            year: self.year,
            month: self.month,
            quarter: self.quarter,
        }
    }
}

fn collect_filters(selection: Option<&Expr>) -> Result<Filters, SqlError> {
    let mut filters = Filters::default();
    if let Some(expr) = selection {
        extract_filters(expr, &mut filters)?;
    }
    Ok(filters)
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_filters(inner, filters),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            extract_filters(left, filters)?;
            extract_filters(right, filters)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            match col.as_str() {
                "id" => filters.id = Some(parse_ulid_expr(right)?),
                "year" => {
                    let year = parse_i64_expr(right)?;
                    filters.year = Some(
                        i32::try_from(year)
                            .map_err(|_| SqlError::Parse(format!("{year} out of year range")))?,
                    );
                }
                "month" => filters.month = Some(parse_u32_expr(right)?),
                "quarter" => filters.quarter = Some(parse_u32_expr(right)?),
                "search" => filters.search = Some(parse_string_expr(right)?),
                _ => return Err(SqlError::UnknownColumn(col)),
            }
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ──────────────────────────────────────────────

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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
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

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string_expr(expr).map(Some),
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::EscapedStringLiteral(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    parse_date(&s).ok_or_else(|| SqlError::Parse(format!("bad date {s:?} (expected YYYY-MM-DD)")))
}

fn parse_time_expr(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string_expr(expr)?;
    parse_time(&s).ok_or_else(|| SqlError::Parse(format!("bad time {s:?} (expected HH:MM[:SS])")))
}

fn parse_room_expr(expr: &Expr) -> Result<Room, SqlError> {
    let s = parse_string_expr(expr)?;
    s.parse().map_err(|e: UnknownRoom| SqlError::Parse(e.to_string()))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
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
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32_expr(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

// ── Errors ───────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
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
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
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

    fn t(s: &str) -> NaiveTime {
        parse_time(s).unwrap()
    }

    #[test]
    fn parse_insert_named_columns() {
        let sql = "INSERT INTO bookings (date, name, room, start_time, end_time, description) \
                   VALUES ('2024-05-01', 'Andi', 'Lantai 2', '09:00', '10:30:00', 'Rapat')";
        match parse_sql(sql).unwrap() {
            Command::InsertBooking { id, draft } => {
                assert_eq!(id, None);
                assert_eq!(draft.date, parse_date("2024-05-01").unwrap());
                assert_eq!(draft.name, "Andi");
                assert_eq!(draft.room, Room::Lantai2);
                assert_eq!(draft.time, TimeRange::new(t("09:00"), t("10:30")));
                assert_eq!(draft.description.as_deref(), Some("Rapat"));
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_positional_and_reordered() {
        let sql = "INSERT INTO bookings VALUES ('2024-05-01', 'Andi', 'lantai 1 - aula mini', '09:00', '10:00')";
        match parse_sql(sql).unwrap() {
            Command::InsertBooking { id, draft } => {
                assert_eq!(id, None);
                assert_eq!(draft.room, Room::AulaMini);
                assert_eq!(draft.description, None);
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }

        let sql = format!(
            "INSERT INTO bookings (id, room, name, date, start_time, end_time, description) \
             VALUES ('{ID}', 'Lantai 3 - Aula Bhakti Husada', 'Sari', '2024-05-01', '13:00', '15:00', NULL)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking { id, draft } => {
                assert_eq!(id.unwrap().to_string(), ID);
                assert_eq!(draft.room, Room::AulaBhaktiHusada);
                assert_eq!(draft.description, None);
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn insert_keeps_inverted_range_for_engine() {
        let sql = "INSERT INTO bookings VALUES ('2024-05-01', 'Andi', 'Lantai 2', '11:00', '10:00')";
        match parse_sql(sql).unwrap() {
            Command::InsertBooking { draft, .. } => {
                assert_eq!(draft.time.start, t("11:00"));
                assert_eq!(draft.time.end, t("10:00"));
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn insert_errors() {
        // Missing end_time.
        let sql = "INSERT INTO bookings (date, name, room, start_time) VALUES ('2024-05-01', 'A', 'Lantai 2', '09:00')";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingColumn("end_time"))));
        let sql = "INSERT INTO bookings VALUES ('2024-05-01', 'A', 'Lantai 9', '09:00', '10:00')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
        let sql = "INSERT INTO bookings VALUES ('2024-13-01', 'A', 'Lantai 2', '09:00', '10:00')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
        let sql = "INSERT INTO bookings VALUES ('2024-05-01', 'A', 'Lantai 2', '25:00', '26:00')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
        let sql = "INSERT INTO bookings (date, floor) VALUES ('2024-05-01', 2)";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn(_))));
        let sql = "INSERT INTO rooms VALUES ('x')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_update_patch() {
        let sql = format!("UPDATE bookings SET end_time = '11:00', description = NULL WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateBooking { id, patch } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(patch.end, Some(t("11:00")));
                assert_eq!(patch.description, Some(None));
                assert_eq!(patch.start, None);
                assert_eq!(patch.room, None);
            }
            other => panic!("expected UpdateBooking, got {other:?}"),
        }
    }

    #[test]
    fn update_requires_id() {
        let sql = "UPDATE bookings SET name = 'B'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
        let sql = "UPDATE bookings SET name = 'B' WHERE year = 2024";
        assert!(parse_sql(sql).is_err());
    }

    #[test]
    fn parse_delete_by_id() {
        let sql = format!("DELETE FROM bookings WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteBooking { id } if id.to_string() == ID));
    }

    #[test]
    fn parse_delete_by_period() {
        let cmd = parse_sql("DELETE FROM bookings WHERE year = 2024 AND month = 2").unwrap();
        assert_eq!(cmd, Command::PurgePeriod { selector: PeriodSelector::month(2024, 2) });
        let cmd = parse_sql("DELETE FROM bookings WHERE year = '2024' AND quarter = '3'").unwrap();
        assert_eq!(cmd, Command::PurgePeriod { selector: PeriodSelector::quarter(2024, 3) });
        // Missing year reaches the resolver, which rejects it.
        let cmd = parse_sql("DELETE FROM bookings WHERE month = 2").unwrap();
        assert_eq!(
            cmd,
            Command::PurgePeriod {
                selector: PeriodSelector { month: Some(2), ..PeriodSelector::default() }
            }
        );
    }

    #[test]
    fn unfiltered_delete_rejected() {
        assert!(matches!(
            parse_sql("DELETE FROM bookings"),
            Err(SqlError::MissingFilter(_))
        ));
        assert!(parse_sql("DELETE FROM bookings WHERE year > 2020").is_err());
    }

    #[test]
    fn parse_selects() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings { period: None, search: None }
        );
        assert_eq!(
            parse_sql("SELECT * FROM bookings WHERE year = 2024 AND (quarter = 1) AND search = 'rapat'").unwrap(),
            Command::SelectBookings {
                period: Some(PeriodSelector::quarter(2024, 1)),
                search: Some("rapat".into()),
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM active_bookings WHERE search = 'aula'").unwrap(),
            Command::SelectActiveBookings { search: Some("aula".into()) }
        );
        assert_eq!(parse_sql("SELECT name FROM rooms").unwrap(), Command::SelectRooms);
        assert!(matches!(
            parse_sql("SELECT * FROM users"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn select_table_reads_from_clause() {
        assert_eq!(select_table("SELECT * FROM Rooms").as_deref(), Some("rooms"));
        assert_eq!(
            select_table("SELECT * FROM bookings WHERE search = 'rooms'").as_deref(),
            Some("bookings")
        );
        assert_eq!(
            select_table("SELECT * FROM active_bookings WHERE search = $1").as_deref(),
            Some("active_bookings")
        );
        assert_eq!(select_table("DELETE FROM bookings WHERE id = $1"), None);
        assert_eq!(select_table("SELEC nonsense"), None);
    }

    #[test]
    fn write_classification() {
        assert!(parse_sql("DELETE FROM bookings WHERE year = 2024").unwrap().is_write());
        assert!(!parse_sql("SELECT * FROM rooms").unwrap().is_write());
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
