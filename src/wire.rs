use std::fmt::Debug;
use std::ops::Range;
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
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::{AuthError, CredentialService, ServerPasswordSource};
use crate::engine::{Engine, EngineError, ErrorKind};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, Target};

/// Client metadata key holding the connection's current session token.
pub const SESSION_TOKEN_KEY: &str = "roombook.session_token";

pub struct RoomBookHandler {
    engine: Arc<Engine>,
    credentials: Arc<CredentialService>,
    query_parser: Arc<RoomBookQueryParser>,
}

impl RoomBookHandler {
    pub fn new(engine: Arc<Engine>, credentials: Arc<CredentialService>) -> Self {
        Self {
            engine,
            credentials,
            query_parser: Arc::new(RoomBookQueryParser),
        }
    }

    /// Re-verify the bound token. Expiry applies mid-connection.
    fn principal<C: ClientInfo>(&self, client: &C) -> PgWireResult<Principal> {
        let token = client
            .metadata()
            .get(SESSION_TOKEN_KEY)
            .ok_or(AuthError::NoSession)
            .map_err(auth_err)?;
        self.credentials.verify(token).map_err(auth_err)
    }

    async fn dispatch<C>(&self, client: &mut C, cmd: Command) -> PgWireResult<Response>
    where
        C: ClientInfo + Send,
    {
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(client, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::COMMANDS_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::COMMAND_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command<C>(&self, client: &mut C, cmd: Command) -> PgWireResult<Response>
    where
        C: ClientInfo + Send,
    {
        match cmd {
            // ── Session management (no session required) ──
            Command::Register { username, password, role } => {
                let id = self
                    .credentials
                    .register(&username, password.expose(), role)
                    .await
                    .map_err(auth_err)?;
                let schema = Arc::new(user_schema());
                let row = encode_user(&schema, id, &username, role);
                Ok(query_response(schema, vec![row]))
            }
            Command::Login { username, password } => {
                let (token, principal) = self
                    .credentials
                    .authenticate(&username, password.expose())
                    .await
                    .map_err(auth_err)?;
                client
                    .metadata_mut()
                    .insert(SESSION_TOKEN_KEY.to_string(), token.clone());
                let schema = Arc::new(login_schema());
                let row = encode_login(&schema, &token, &principal);
                Ok(query_response(schema, vec![row]))
            }
            Command::SetSession { token } => {
                let principal = self.credentials.verify(&token).map_err(auth_err)?;
                client.metadata_mut().insert(SESSION_TOKEN_KEY.to_string(), token);
                tracing::debug!(subject = %principal.subject_id, "session bound");
                Ok(Response::Execution(Tag::new("SET")))
            }
            Command::ResetSession => {
                client.metadata_mut().remove(SESSION_TOKEN_KEY);
                Ok(Response::Execution(Tag::new("RESET")))
            }

            // ── Room inventory ──
            Command::InsertRoom { room } => {
                let principal = self.principal(client)?;
                let room = self.engine.create_room(&principal, room).await.map_err(engine_err)?;
                Ok(rooms_response(vec![room]))
            }
            Command::UpdateRoom { id, patch } => {
                let principal = self.principal(client)?;
                let room = self
                    .engine
                    .update_room(&principal, id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(rooms_response(vec![room]))
            }
            Command::DeleteRoom { id } => {
                let principal = self.principal(client)?;
                self.engine.delete_room(&principal, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectRooms { id } => {
                let principal = self.principal(client)?;
                let rooms = match id {
                    Some(id) => vec![self.engine.get_room(&principal, id).await.map_err(engine_err)?],
                    None => self.engine.list_rooms(&principal).await.map_err(engine_err)?,
                };
                Ok(rooms_response(rooms))
            }
            Command::SelectAvailableRooms { start_hour, end_hour } => {
                let principal = self.principal(client)?;
                let rooms = self
                    .engine
                    .list_available_rooms(&principal, HourSpan::new(start_hour, end_hour))
                    .await
                    .map_err(engine_err)?;
                Ok(rooms_response(rooms))
            }

            // ── Reservations ──
            Command::InsertBooking { room_id, start_hour, end_hour } => {
                let principal = self.principal(client)?;
                let booking = self
                    .engine
                    .create_booking(&principal, room_id, HourSpan::new(start_hour, end_hour))
                    .await
                    .map_err(engine_err)?;
                Ok(bookings_response(vec![booking]))
            }
            Command::UpdateBooking { id, room_id, start_hour, end_hour } => {
                let principal = self.principal(client)?;
                let booking = self
                    .engine
                    .update_reservation(&principal, room_id, id, HourSpan::new(start_hour, end_hour))
                    .await
                    .map_err(engine_err)?;
                Ok(bookings_response(vec![booking]))
            }
            Command::DeleteBooking { id, room_id } => {
                let principal = self.principal(client)?;
                self.engine
                    .cancel_reservation(&principal, room_id, id)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectBookings { room_id } => {
                let principal = self.principal(client)?;
                let bookings = self
                    .engine
                    .room_bookings(&principal, room_id)
                    .await
                    .map_err(engine_err)?;
                Ok(bookings_response(bookings))
            }
            Command::SelectReservations => {
                let principal = self.principal(client)?;
                let bookings = self
                    .engine
                    .list_my_reservations(&principal)
                    .await
                    .map_err(engine_err)?;
                Ok(bookings_response(bookings))
            }
        }
    }
}

// ── Result schemas and row encoding ──────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("capacity", Type::INT8),
        text_field("amenities", Type::VARCHAR),
        text_field("price", Type::INT8),
        text_field("bookings", Type::INT8),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("room_id", Type::VARCHAR),
        text_field("booked_by", Type::VARCHAR),
        text_field("start_hour", Type::INT8),
        text_field("end_hour", Type::INT8),
    ]
}

fn login_schema() -> Vec<FieldInfo> {
    vec![
        text_field("token", Type::VARCHAR),
        text_field("user_id", Type::VARCHAR),
        text_field("role", Type::VARCHAR),
    ]
}

fn user_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("username", Type::VARCHAR),
        text_field("role", Type::VARCHAR),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultShape {
    Login,
    User,
    Booking,
    Room,
    Empty,
}

impl ResultShape {
    /// Row shape a statement produces, from its verb and target table. Used by
    /// Describe, where `$n` placeholders are still unbound. Statements that
    /// do not parse describe as empty; execution reports the error.
    fn of(sql: &str) -> Self {
        let Ok(target) = sql::statement_target(sql) else {
            return ResultShape::Empty;
        };
        match target {
            Target::Session | Target::Delete(_) => ResultShape::Empty,
            Target::Insert(table) => match table.as_str() {
                "users" => ResultShape::User,
                "rooms" => ResultShape::Room,
                "bookings" => ResultShape::Booking,
                _ => ResultShape::Empty,
            },
            Target::Update(table) => match table.as_str() {
                "rooms" => ResultShape::Room,
                "bookings" => ResultShape::Booking,
                _ => ResultShape::Empty,
            },
            Target::Select(table) => match table.as_str() {
                "login" => ResultShape::Login,
                "rooms" | "available_rooms" => ResultShape::Room,
                "bookings" | "reservations" => ResultShape::Booking,
                _ => ResultShape::Empty,
            },
        }
    }

    fn fields(self) -> Vec<FieldInfo> {
        match self {
            ResultShape::Login => login_schema(),
            ResultShape::User => user_schema(),
            ResultShape::Booking => booking_schema(),
            ResultShape::Room => room_schema(),
            ResultShape::Empty => vec![],
        }
    }
}

fn result_schema(sql: &str) -> Vec<FieldInfo> {
    ResultShape::of(sql).fields()
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_room(schema: &Arc<Vec<FieldInfo>>, room: &RoomInfo) -> PgWireResult<DataRow> {
    let amenities =
        serde_json::to_string(&room.amenities).map_err(|e| PgWireError::ApiError(Box::new(e)))?;
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&room.id.to_string())?;
    encoder.encode_field(&room.name)?;
    encoder.encode_field(&i64::from(room.capacity))?;
    encoder.encode_field(&amenities)?;
    encoder.encode_field(&room.price)?;
    encoder.encode_field(&(room.bookings.len() as i64))?;
    Ok(encoder.take_row())
}

fn encode_booking(schema: &Arc<Vec<FieldInfo>>, booking: &BookingInfo) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&booking.id.to_string())?;
    encoder.encode_field(&booking.room_id.to_string())?;
    encoder.encode_field(&booking.booked_by.to_string())?;
    encoder.encode_field(&booking.start_hour)?;
    encoder.encode_field(&booking.end_hour)?;
    Ok(encoder.take_row())
}

fn encode_login(schema: &Arc<Vec<FieldInfo>>, token: &String, principal: &Principal) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(token)?;
    encoder.encode_field(&principal.subject_id.to_string())?;
    encoder.encode_field(&principal.role.to_string())?;
    Ok(encoder.take_row())
}

fn encode_user(schema: &Arc<Vec<FieldInfo>>, id: Ulid, username: &String, role: Role) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&id.to_string())?;
    encoder.encode_field(username)?;
    encoder.encode_field(&role.to_string())?;
    Ok(encoder.take_row())
}

fn rooms_response(rooms: Vec<RoomInfo>) -> Response {
    let schema = Arc::new(room_schema());
    let rows = rooms.iter().map(|r| encode_room(&schema, r)).collect();
    query_response(schema, rows)
}

fn bookings_response(bookings: Vec<BookingInfo>) -> Response {
    let schema = Arc::new(booking_schema());
    let rows = bookings.iter().map(|b| encode_booking(&schema, b)).collect();
    query_response(schema, rows)
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
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.dispatch(client, cmd).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

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
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.dispatch(client, cmd).await
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
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Byte range and 1-based index of every `$N` placeholder outside quoted literals.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            // An escaped '' toggles twice and stays inside the literal.
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start
                    && let Ok(n) = sql[start..end].parse::<usize>()
                {
                    found.push((i..end, n));
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    found
}

/// Highest $N placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).iter().map(|(_, n)| *n).max().unwrap_or(0)
}

/// Replace placeholders with quoted literals in one left-to-right pass.
/// Substituted text is never rescanned.
fn bind_params(sql: &str, params: &[Option<String>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        out.push_str(&sql[copied..range.start]);
        match n.checked_sub(1).and_then(|i| params.get(i)) {
            Some(Some(text)) => {
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            // Unbound index: leave it for the parser to reject.
            None => out.push_str(&sql[range.clone()]),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

/// Bind the portal's parameters (text format) into its statement.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_params(&portal.statement.statement, &params)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomBookFactory {
    handler: Arc<RoomBookHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<ServerPasswordSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RoomBookFactory {
    pub fn new(engine: Arc<Engine>, credentials: Arc<CredentialService>, password: String) -> Self {
        let auth_source = ServerPasswordSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoomBookHandler::new(engine, credentials)),
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
) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn sqlstate(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Validation => "22023",
        ErrorKind::NotFound => "P0002",
        ErrorKind::Forbidden => "42501",
        ErrorKind::Conflict => "23P01",
        ErrorKind::Authentication => "28000",
        ErrorKind::Internal => "XX000",
    }
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE and client-facing message. Internal details never reach the client.
fn engine_error_info(e: &EngineError) -> (&'static str, String) {
    match e.kind() {
        ErrorKind::Internal => (sqlstate(ErrorKind::Internal), "internal error".into()),
        kind => (sqlstate(kind), e.to_string()),
    }
}

fn auth_error_info(e: &AuthError) -> (&'static str, String) {
    match e {
        AuthError::DuplicateUsername(_) => ("23505", e.to_string()),
        AuthError::Internal(_) => (sqlstate(ErrorKind::Internal), "internal error".into()),
        other => (sqlstate(other.kind()), other.to_string()),
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if e.kind() == ErrorKind::Internal {
        tracing::error!(error = %e, "engine failure");
    }
    let (code, message) = engine_error_info(&e);
    user_error(code, message)
}

fn auth_err(e: AuthError) -> PgWireError {
    if e.kind() == ErrorKind::Internal {
        tracing::error!(error = %e, "credential service failure");
    }
    let (code, message) = auth_error_info(&e);
    user_error(code, message)
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
