use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::{RoomBookAuthSource, Role, UserDirectory};
use crate::engine::{BookingQuery, Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

/// Authenticated caller of one query.
struct Session {
    username: String,
    role: Role,
}

pub struct RoomBookHandler {
    engine: Arc<Engine>,
    users: Arc<UserDirectory>,
    query_parser: Arc<RoomBookQueryParser>,
}

impl RoomBookHandler {
    pub fn new(engine: Arc<Engine>, users: Arc<UserDirectory>) -> Self {
        Self {
            engine,
            users,
            query_parser: Arc::new(RoomBookQueryParser),
        }
    }

    fn session<C: ClientInfo>(&self, client: &C) -> PgWireResult<Session> {
        let username = client.metadata().get("user").cloned().unwrap_or_default();
        let role = self.users.role_of(&username).ok_or_else(|| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "28000".into(),
                format!("unknown user \"{username}\""),
            )))
        })?;
        Ok(Session { username, role })
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, session: &Session, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(observability::QUERIES_TOTAL, "command" => "parse", "status" => "error")
                .increment(1);
            sql_err(e)
        })?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(session, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, session: &Session, cmd: Command) -> PgWireResult<Response> {
        if cmd.is_write() && !matches!(cmd, Command::InsertBooking { .. }) {
            require_admin(session, observability::command_label(&cmd))?;
        }
        let engine = &self.engine;

        match cmd {
            Command::InsertBooking { id, draft } => {
                let id = id.unwrap_or_else(Ulid::new);
                engine
                    .create_booking(id, draft, Some(session.username.clone()))
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateBooking { id, patch } => {
                engine.update_booking(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteBooking { id } => {
                engine.delete_booking(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::PurgePeriod { selector } => {
                let removed = engine.purge_period(&selector).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(removed)))
            }
            Command::SelectBookings { period, search } => {
                let mut query = BookingQuery {
                    period,
                    search,
                    ..BookingQuery::default()
                };
                // Regular users only ever see bookings that have not ended.
                if !session.role.is_admin() {
                    if query.period.is_some() {
                        return Err(permission_err("period export"));
                    }
                    query.active_at = Some(local_now());
                }
                let rows = engine.query_bookings(&query).await.map_err(engine_err)?;
                booking_rows(rows)
            }
            Command::SelectActiveBookings { search } => {
                let query = BookingQuery {
                    active_at: Some(local_now()),
                    search,
                    ..BookingQuery::default()
                };
                let rows = engine.query_bookings(&query).await.map_err(engine_err)?;
                booking_rows(rows)
            }
            Command::SelectRooms => room_rows(),
        }
    }
}

fn local_now() -> chrono::NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn require_admin(session: &Session, action: &str) -> PgWireResult<()> {
    if session.role.is_admin() {
        Ok(())
    } else {
        tracing::warn!("user {} denied {action}", session.username);
        Err(permission_err(action))
    }
}

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("date", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("room", Type::VARCHAR),
        text_field("start_time", Type::VARCHAR),
        text_field("end_time", Type::VARCHAR),
        text_field("description", Type::VARCHAR),
        text_field("created_by", Type::VARCHAR),
        text_field("created_at", Type::INT8),
    ]
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![
        text_field("name", Type::VARCHAR),
        text_field("floor", Type::INT4),
    ]
}

fn booking_rows(bookings: Vec<Booking>) -> PgWireResult<Response> {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.date.format(DATE_FORMAT).to_string())?;
            encoder.encode_field(&b.name)?;
            encoder.encode_field(&b.room.label().to_string())?;
            encoder.encode_field(&b.time.start.format(TIME_FORMAT).to_string())?;
            encoder.encode_field(&b.time.end.format(TIME_FORMAT).to_string())?;
            encoder.encode_field(&b.description)?;
            encoder.encode_field(&b.owner)?;
            encoder.encode_field(&b.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn room_rows() -> PgWireResult<Response> {
    let schema = Arc::new(rooms_schema());
    let rows: Vec<PgWireResult<_>> = Room::ALL
        .iter()
        .map(|room| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&room.label().to_string())?;
            encoder.encode_field(&i32::from(room.floor()))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Result columns for a statement that has not been bound yet.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::select_table(sql).as_deref() {
        Some("rooms") => rooms_schema(),
        Some("bookings" | "active_bookings") => booking_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for RoomBookHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let session = self.session(client)?;
        Ok(vec![self.run(&session, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────

#[derive(Debug)]
pub struct RoomBookQueryParser;

#[async_trait]
impl QueryParser for RoomBookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomBookHandler {
    type Statement = String;
    type QueryParser = RoomBookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let session = self.session(client)?;
        let sql = bind_params(&portal.statement.statement, &portal.parameters);
        self.run(&session, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Byte spans `(start, end, n)` of `$N` placeholders outside quoted literals
/// and identifiers.
fn placeholders(sql: &str) -> Vec<(usize, usize, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and reopens, which leaves the state intact.
            Some(q) => {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'\'' || b == b'"' => {
                quote = Some(b);
                i += 1;
            }
            None if b == b'$' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start, i, n));
                }
            }
            None => i += 1,
        }
    }
    found
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, _, n)| n).max().unwrap_or(0)
}

/// Replace `$1, $2, ...` with bound text-format values as quoted literals.
/// Single pass over the statement: bound text is never rescanned.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (start, end, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..start]);
        out.push_str(&quote_param(param.as_ref().map(AsRef::as_ref)));
        copied = end;
    }
    out.push_str(&sql[copied..]);
    out
}

fn quote_param(param: Option<&[u8]>) -> String {
    match param {
        Some(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            format!("'{}'", text.replace('\'', "''"))
        }
        None => "NULL".to_string(),
    }
}

// ── Factory ──────────────────────────────────────────────

pub struct RoomBookFactory {
    handler: Arc<RoomBookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RoomBookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RoomBookFactory {
    pub fn new(engine: Arc<Engine>, users: Arc<UserDirectory>) -> Self {
        let auth_source = RoomBookAuthSource::new(users.clone());
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoomBookHandler::new(engine, users)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomBookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<RoomBookFactory>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────

fn engine_error_code(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict { .. } => "23P01",
        _ => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        engine_error_code(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

fn permission_err(action: &str) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42501".into(),
        format!("permission denied: {action} requires the admin role"),
    )))
}
