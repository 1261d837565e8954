use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::auth::LabdeskAuthSource;
use crate::booking::{BookingError, ErrorKind, ProposedReservation, ProposedWindow, ReservationValidator};
use crate::clock::Clock;
use crate::engine::{Engine, EngineError, Retirement};
use crate::observability::{self, command_label};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct LabdeskHandler {
    tenant_manager: Arc<TenantManager>,
    clock: Arc<dyn Clock>,
    query_parser: Arc<LabdeskQueryParser>,
}

impl LabdeskHandler {
    pub fn new(tenant_manager: Arc<TenantManager>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tenant_manager,
            clock,
            query_parser: Arc::new(LabdeskQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// The login name owns the reservations it creates.
    fn resolve_user<C: ClientInfo>(client: &C) -> PgWireResult<String> {
        client
            .metadata()
            .get("user")
            .filter(|u| !u.is_empty())
            .cloned()
            .ok_or_else(|| user_error("28000", "a user name is required".into()))
    }

    /// Parse, execute and record one statement.
    async fn run<C: ClientInfo>(
        &self,
        client: &C,
        query: &str,
        format: &Format,
    ) -> PgWireResult<Response> {
        let engine = self.resolve_engine(client)?;
        let user = Self::resolve_user(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, &user, cmd, format).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(
        &self,
        engine: Arc<Engine>,
        user: &str,
        cmd: Command,
        format: &Format,
    ) -> PgWireResult<Response> {
        match cmd {
            Command::InsertLaboratory { id, name, code } => {
                engine
                    .create_laboratory(id, &name, &code)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateLaboratory { id, name, code } => {
                engine
                    .update_laboratory(id, &name, &code)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SetLaboratoryActive { id, active } => {
                engine
                    .set_laboratory_active(id, active, self.clock.now())
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteLaboratory { id } => {
                let outcome = engine
                    .retire_laboratory(id, self.clock.now())
                    .await
                    .map_err(engine_err)?;
                // Keeping history turns the delete into a deactivation.
                let tag = match outcome {
                    Retirement::Deleted => Tag::new("DELETE").with_rows(1),
                    Retirement::Deactivated => Tag::new("UPDATE").with_rows(1),
                };
                Ok(Response::Execution(tag))
            }
            Command::SelectLaboratories { id, active } => {
                let labs = match id {
                    Some(id) => engine
                        .get_laboratory(id)
                        .await
                        .filter(|l| active.is_none_or(|a| l.active == a))
                        .into_iter()
                        .collect(),
                    None => engine.list_laboratories(active).await,
                };
                let schema = Arc::new(laboratory_schema(format));
                let rows: Vec<PgWireResult<_>> = labs
                    .into_iter()
                    .map(|lab| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&lab.id.to_string())?;
                        encoder.encode_field(&lab.name)?;
                        encoder.encode_field(&lab.code)?;
                        encoder.encode_field(&lab.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::InsertReservation {
                id,
                laboratory_id,
                start,
                end,
            } => {
                if engine.get_reservation(id).await.is_some() {
                    return Err(engine_err(EngineError::AlreadyExists(id)));
                }
                let proposed = ProposedReservation {
                    id,
                    laboratory_id,
                    window: ProposedWindow::new(start, end),
                };
                self.validator(engine)
                    .validate_for_create(&proposed, user)
                    .await
                    .map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateReservation { id, start, end } => {
                self.validator(engine)
                    .validate_for_update(id, &ProposedWindow::new(start, end), user)
                    .await
                    .map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteReservation { id } => {
                self.validator(engine)
                    .validate_for_cancel(id, user)
                    .await
                    .map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectReservations { filter } => {
                let reservations = engine.list_reservations(&filter).await;
                let schema = Arc::new(reservation_schema(format));
                let rows: Vec<PgWireResult<_>> = reservations
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.laboratory_id.to_string())?;
                        encoder.encode_field(&r.owner)?;
                        encoder.encode_field(&r.span.start.format(TIMESTAMP_FORMAT).to_string())?;
                        encoder.encode_field(&r.span.end.format(TIMESTAMP_FORMAT).to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }

    fn validator(&self, engine: Arc<Engine>) -> ReservationValidator<Engine, dyn Clock> {
        ReservationValidator::new(engine, self.clock.clone())
    }
}

fn field(name: &str, ty: Type, format: &Format, idx: usize) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, format.format_for(idx))
}

fn laboratory_schema(format: &Format) -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR, format, 0),
        field("name", Type::VARCHAR, format, 1),
        field("code", Type::VARCHAR, format, 2),
        field("active", Type::BOOL, format, 3),
    ]
}

fn reservation_schema(format: &Format) -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR, format, 0),
        field("laboratory_id", Type::VARCHAR, format, 1),
        field("owner", Type::VARCHAR, format, 2),
        field("start", Type::VARCHAR, format, 3),
        field("end", Type::VARCHAR, format, 4),
    ]
}

/// Result columns a statement will produce, judged from its text alone
/// (parameters are not bound yet at describe time).
fn result_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.trim_start().starts_with("SELECT") {
        vec![]
    } else if upper.contains("LABORATORIES") {
        laboratory_schema(format)
    } else if upper.contains("RESERVATIONS") {
        reservation_schema(format)
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for LabdeskHandler {
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
        let response = self.run(client, query, &Format::UnifiedText).await?;
        Ok(vec![response])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct LabdeskQueryParser;

#[async_trait]
impl QueryParser for LabdeskQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt, column_format.unwrap_or(&Format::UnifiedText)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for LabdeskHandler {
    type Statement = String;
    type QueryParser = LabdeskQueryParser;

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
        self.run(client, &sql, &portal.result_column_format).await
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
            result_schema(&target.statement, &Format::UnifiedText),
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
            &target.result_column_format,
        )))
    }
}

/// Walk `sql` once, copying text verbatim and handing every `$N` found
/// outside a quoted literal or identifier to `param`.
fn rewrite_placeholders(sql: &str, mut param: impl FnMut(usize, &mut String)) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut quote: Option<char> = None;
    while let Some((i, c)) = chars.next() {
        match quote {
            Some(q) => {
                // A doubled quote closes and reopens, which is the same text.
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                out.push(c);
            }
            None if c == '$' => {
                let start = i + 1;
                let mut end = start;
                while let Some(&(j, d)) = chars.peek()
                    && d.is_ascii_digit()
                {
                    end = j + 1;
                    chars.next();
                }
                match sql[start..end].parse::<usize>() {
                    Ok(n) => param(n, &mut out),
                    Err(_) => out.push_str(&sql[i..end]),
                }
            }
            None => out.push(c),
        }
    }
    out
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    rewrite_placeholders(sql, |n, _| max = max.max(n));
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    substitute(&portal.statement.statement, &portal.parameters)
}

/// Bound values are spliced in as they are met, so text inside a value is
/// never scanned again.
fn substitute(sql: &str, params: &[Option<impl AsRef<[u8]>>]) -> String {
    rewrite_placeholders(sql, |n, out| match n.checked_sub(1).and_then(|i| params.get(i)) {
        Some(Some(bytes)) => {
            let text = String::from_utf8_lossy(bytes.as_ref());
            out.push('\'');
            out.push_str(&text.replace('\'', "''"));
            out.push('\'');
        }
        Some(None) => out.push_str("NULL"),
        None => {
            out.push('$');
            out.push_str(&n.to_string());
        }
    })
}

// ── Factory ──────────────────────────────────────────────────────

pub struct LabdeskFactory {
    handler: Arc<LabdeskHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<LabdeskAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl LabdeskFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, clock: Arc<dyn Clock>, password: String) -> Self {
        let auth_source = LabdeskAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(LabdeskHandler::new(tenant_manager, clock)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for LabdeskFactory {
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
    tenant_manager: Arc<TenantManager>,
    clock: Arc<dyn Clock>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(LabdeskFactory::new(tenant_manager, clock, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE for a refused reservation operation.
fn booking_sqlstate(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::SchedulingConflict => "23P01",
        ErrorKind::PermissionDenied => "42501",
        ErrorKind::DuplicateReservation => "23505",
        ErrorKind::MissingField => "23502",
        ErrorKind::LimitExceeded => "54000",
        ErrorKind::InfrastructureFailure => "XX000",
        k if k.status() == 404 => "P0002",
        _ => "23514",
    }
}

fn booking_err(e: BookingError) -> PgWireError {
    let kind = e.kind();
    if kind == ErrorKind::InfrastructureFailure {
        error!("reservation failed: {e}");
    } else {
        debug!("reservation refused ({}): {e}", kind.as_str());
    }
    user_error(booking_sqlstate(kind), e.to_string())
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) | EngineError::LaboratoryUnavailable(_) => "P0002",
        EngineError::AlreadyExists(_)
        | EngineError::DuplicateName(_)
        | EngineError::DuplicateCode(_) => "23505",
        EngineError::MissingField(_) => "23502",
        EngineError::Conflict(_) => "23P01",
        EngineError::HasUpcomingReservations(_) => "55006",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::WalError(_) = e {
        error!("{e}");
    }
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
