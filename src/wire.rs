use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::{Sink, SinkExt, stream};
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
use pgwire::messages::response::NotificationResponse;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::auth::SharedPasswordSource;
use crate::engine::{Engine, EngineError};
use crate::limits::MAX_QUERY_ROWS;
use crate::model::*;
use crate::observability::{self, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, HoldFilter, PayoutFilter};
use crate::tenant::TenantManager;

const CHANNEL_PREFIX: &str = "unit_";

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = RoomholdFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// Per-connection query handler. Holds the connection's LISTEN subscriptions;
/// events received on them are sent ahead of the next query response.
pub struct RoomholdHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<RoomholdQueryParser>,
    listens: Mutex<HashMap<String, broadcast::Receiver<Event>>>,
}

impl RoomholdHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(RoomholdQueryParser),
            listens: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    fn caller<C: ClientInfo>(client: &C) -> String {
        client.metadata().get("user").cloned().unwrap_or_default()
    }

    /// Parse, execute and time one statement, then send queued notifications
    /// ahead of its response.
    async fn run<C>(&self, client: &mut C, query: &str) -> PgWireResult<Response>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let user = Self::caller(client);
        let cmd = match sql::parse_sql(query) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };

        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(&engine, &user, cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);

        for message in self.drain_notifications() {
            client.send(message).await?;
        }
        result
    }

    fn drain_notifications(&self) -> Vec<PgWireBackendMessage> {
        let mut out = Vec::new();
        let mut listens = self.listens.lock().unwrap_or_else(|e| e.into_inner());
        for (channel, rx) in listens.iter_mut() {
            loop {
                match rx.try_recv() {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(payload) => out.push(PgWireBackendMessage::NotificationResponse(
                            NotificationResponse::new(0, channel.clone(), payload),
                        )),
                        Err(e) => tracing::warn!("unencodable event on {channel}: {e}"),
                    },
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        tracing::warn!("listener on {channel} lagged, {n} events dropped");
                    }
                    Err(_) => break,
                }
            }
        }
        out
    }

    async fn execute_command(
        &self,
        engine: &Arc<Engine>,
        user: &str,
        cmd: Command,
    ) -> PgWireResult<Response> {
        match cmd {
            Command::InsertUnit { spec } => {
                engine.create_unit(spec).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateUnit { id, patch } => {
                engine.update_unit(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteUnit { id } => {
                engine.delete_unit(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectUnits { id, parent_id } => {
                let units = match id {
                    Some(id) => engine.get_unit(&id).await.into_iter().collect(),
                    None => engine.list_units(parent_id).await,
                };
                Ok(rows_response(units_schema(), units, encode_unit))
            }
            Command::InsertHold {
                id,
                unit_id,
                hold_minutes,
            } => {
                engine
                    .create_hold(id, unit_id, user, hold_minutes)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::StartPayment { id } => {
                engine.start_payment(id, user).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::FinalizeHold {
                id,
                payment_reference,
            } => {
                if let Some(payments) = &self.tenant_manager.settings().payment_user
                    && payments.as_str() != user
                {
                    return Err(engine_err(EngineError::NotAuthorized(
                        "only the payment service may mark a hold paid",
                    )));
                }
                engine
                    .finalize_hold(id, &payment_reference)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::CancelHold { id } => {
                engine.cancel_hold(id, user).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::CheckOut { id } => {
                engine.check_out(id, user).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectHolds { filter } => {
                let holds = match filter {
                    HoldFilter::Id(id) => engine.get_hold(&id).into_iter().collect(),
                    HoldFilter::Unit(unit_id) => engine.holds_for_unit(&unit_id),
                    HoldFilter::User(other) => engine.holds_for_user(&other),
                    HoldFilter::Caller => engine.holds_for_user(user),
                };
                Ok(rows_response(holds_schema(), holds, encode_hold))
            }
            Command::SelectAvailability { unit_id } => {
                let summary = engine.get_availability(unit_id).await;
                Ok(rows_response(
                    availability_schema(),
                    vec![summary],
                    encode_availability,
                ))
            }
            Command::SelectSummary { unit_id } => {
                let summary = engine.aggregate_summary(unit_id).await.map_err(engine_err)?;
                Ok(rows_response(
                    summary_schema(),
                    vec![summary],
                    encode_summary,
                ))
            }
            Command::SelectConflict { unit_id } => {
                let info = engine.check_conflict(unit_id);
                Ok(rows_response(
                    conflict_schema(),
                    vec![info],
                    encode_conflict,
                ))
            }
            Command::SelectPayouts { filter } => {
                let payouts = match filter {
                    PayoutFilter::All => engine.list_payouts(None),
                    PayoutFilter::Owner(owner) => engine.list_payouts(Some(&owner)),
                    PayoutFilter::Id(id) => engine.get_payout(&id).into_iter().collect(),
                    PayoutFilter::Hold(hold_id) => {
                        engine.payout_for_hold(&hold_id).into_iter().collect()
                    }
                };
                Ok(rows_response(payouts_schema(), payouts, encode_payout))
            }
            Command::Listen { channel } => {
                let unit_id = parse_channel(&channel)?;
                let mut listens = self.listens.lock().unwrap_or_else(|e| e.into_inner());
                listens
                    .entry(channel)
                    .or_insert_with(|| engine.notify.subscribe(unit_id));
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { channel } => {
                self.listens
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&channel);
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
            Command::UnlistenAll => {
                self.listens
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clear();
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
        }
    }
}

fn parse_channel(channel: &str) -> PgWireResult<Ulid> {
    let id = channel.strip_prefix(CHANNEL_PREFIX).ok_or_else(|| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("invalid channel: {channel} (expected {CHANNEL_PREFIX}{{id}})"),
        )))
    })?;
    Ulid::from_string(id).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("bad ULID in channel: {e}"),
        )))
    })
}

// ── Result sets ──────────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn units_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("kind"),
        text("parent_id"),
        text("name"),
        text("owner_id"),
        int("price_cents"),
        int("capacity"),
        int("occupied"),
        boolean("listed"),
    ]
}

fn holds_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("unit_id"),
        text("unit_kind"),
        int("covered_units"),
        text("user_id"),
        text("owner_id"),
        int("amount_cents"),
        text("status"),
        int("created_at"),
        int("expires_at"),
        text("payment_reference"),
        int("finalized_at"),
        int("closed_at"),
        int("checked_out_at"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text("unit_id"),
        text("kind"),
        int("capacity"),
        int("occupied"),
        int("available"),
        boolean("is_full"),
        boolean("is_reserved"),
        boolean("listed"),
    ]
}

fn summary_schema() -> Vec<FieldInfo> {
    vec![
        text("unit_id"),
        text("kind"),
        int("capacity"),
        int("occupied"),
        int("available"),
        int("leaf_units"),
        int("reserved_units"),
        int("full_units"),
    ]
}

fn conflict_schema() -> Vec<FieldInfo> {
    vec![
        text("unit_id"),
        boolean("has_conflict"),
        text("hold_id"),
        int("expires_at"),
        int("remaining_ms"),
        text("time_remaining"),
    ]
}

fn payouts_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("hold_id"),
        text("owner_id"),
        int("amount_cents"),
        text("status"),
        int("attempts"),
        text("last_error"),
        text("transfer_reference"),
        int("created_at"),
        int("updated_at"),
    ]
}

/// Schema of a SELECT by the table it reads, for Describe.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.trim_start().starts_with("SELECT") {
        return vec![];
    }
    let from = |table: &str| upper.contains(&format!("FROM {table}"));
    if from("AVAILABILITY") {
        availability_schema()
    } else if from("SUMMARIES") {
        summary_schema()
    } else if from("CONFLICTS") {
        conflict_schema()
    } else if from("PAYOUTS") {
        payouts_schema()
    } else if from("HOLDS") {
        holds_schema()
    } else if from("UNITS") {
        units_schema()
    } else {
        vec![]
    }
}

fn rows_response<T>(
    fields: Vec<FieldInfo>,
    items: Vec<T>,
    encode: fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(fields);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .take(MAX_QUERY_ROWS)
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn opt_id(id: Option<Ulid>) -> Option<String> {
    id.map(|i| i.to_string())
}

fn cents(value: Option<u64>) -> Option<i64> {
    value.map(|v| v as i64)
}

fn encode_unit(e: &mut DataRowEncoder, u: &UnitInfo) -> PgWireResult<()> {
    e.encode_field(&u.id.to_string())?;
    e.encode_field(&u.kind.as_str())?;
    e.encode_field(&opt_id(u.parent_id))?;
    e.encode_field(&u.name)?;
    e.encode_field(&u.owner_id)?;
    e.encode_field(&cents(u.price_cents))?;
    e.encode_field(&i64::from(u.capacity))?;
    e.encode_field(&i64::from(u.occupied))?;
    e.encode_field(&u.listed)
}

fn encode_hold(e: &mut DataRowEncoder, h: &Hold) -> PgWireResult<()> {
    e.encode_field(&h.id.to_string())?;
    e.encode_field(&h.target.id.to_string())?;
    e.encode_field(&h.target.kind.as_str())?;
    e.encode_field(&(h.covered.len() as i64))?;
    e.encode_field(&h.user_id)?;
    e.encode_field(&h.owner_id)?;
    e.encode_field(&(h.amount_cents as i64))?;
    e.encode_field(&h.status.as_str())?;
    e.encode_field(&h.created_at)?;
    e.encode_field(&h.expires_at)?;
    e.encode_field(&h.payment_reference)?;
    e.encode_field(&h.finalized_at)?;
    e.encode_field(&h.closed_at)?;
    e.encode_field(&h.checked_out_at)
}

fn encode_availability(e: &mut DataRowEncoder, a: &AvailabilitySummary) -> PgWireResult<()> {
    e.encode_field(&a.unit_id.to_string())?;
    e.encode_field(&a.kind.map(|k| k.as_str()))?;
    e.encode_field(&i64::from(a.capacity))?;
    e.encode_field(&i64::from(a.occupied))?;
    e.encode_field(&i64::from(a.available))?;
    e.encode_field(&a.is_full)?;
    e.encode_field(&a.is_reserved)?;
    e.encode_field(&a.listed)
}

fn encode_summary(e: &mut DataRowEncoder, s: &AggregateSummary) -> PgWireResult<()> {
    e.encode_field(&s.unit_id.to_string())?;
    e.encode_field(&s.kind.as_str())?;
    e.encode_field(&i64::from(s.capacity))?;
    e.encode_field(&i64::from(s.occupied))?;
    e.encode_field(&i64::from(s.available))?;
    e.encode_field(&(s.leaf_units as i64))?;
    e.encode_field(&(s.reserved_units as i64))?;
    e.encode_field(&(s.full_units as i64))
}

fn encode_conflict(e: &mut DataRowEncoder, c: &ConflictInfo) -> PgWireResult<()> {
    e.encode_field(&c.unit_id.to_string())?;
    e.encode_field(&c.has_conflict)?;
    e.encode_field(&opt_id(c.hold_id))?;
    e.encode_field(&c.expires_at)?;
    e.encode_field(&c.remaining_ms)?;
    e.encode_field(&c.time_remaining)
}

fn encode_payout(e: &mut DataRowEncoder, p: &Payout) -> PgWireResult<()> {
    e.encode_field(&p.id.to_string())?;
    e.encode_field(&p.hold_id.to_string())?;
    e.encode_field(&p.owner_id)?;
    e.encode_field(&(p.amount_cents as i64))?;
    e.encode_field(&p.status.as_str())?;
    e.encode_field(&i64::from(p.attempts))?;
    e.encode_field(&p.last_error)?;
    e.encode_field(&p.transfer_reference)?;
    e.encode_field(&p.created_at)?;
    e.encode_field(&p.updated_at)
}

#[async_trait]
impl SimpleQueryHandler for RoomholdHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let mut responses = Vec::new();
        for statement in sql::split_statements(query) {
            responses.push(self.run(client, statement).await?);
        }
        if responses.is_empty() {
            responses.push(Response::EmptyQuery);
        }
        Ok(responses)
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomholdQueryParser;

#[async_trait]
impl QueryParser for RoomholdQueryParser {
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
impl ExtendedQueryHandler for RoomholdHandler {
    type Statement = String;
    type QueryParser = RoomholdQueryParser;

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
        self.run(client, &sql).await
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

/// `$N` placeholders outside quoted text, as (byte range, N).
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and reopens, which leaves us inside.
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = sql[start..end].parse::<usize>() {
                    found.push((i..end, n));
                    i = end;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Inline bound text parameters as quoted literals in one pass, so text
/// inside a bound value is never rescanned for placeholders.
fn inline_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut last = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|idx| params.get(idx)) else {
            continue;
        };
        result.push_str(&sql[last..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        last = range.end;
    }
    result.push_str(&sql[last..]);
    result
}

fn substitute_params(portal: &Portal<String>) -> String {
    inline_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomholdFactory {
    handler: Arc<RoomholdHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SharedPasswordSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RoomholdFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SharedPasswordSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoomholdHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomholdFactory {
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

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for an engine error.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::UnitUnavailable(_) | EngineError::HoldConflict { .. } => "55P03",
        EngineError::HoldExpired(_) => "40001",
        EngineError::NotAuthorized(_) => "42501",
        EngineError::NotFound(_) => "02000",
        EngineError::CapacityExceeded { .. } => "XX000",
        _ => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    let message = match &e {
        EngineError::UnitUnavailable(_) | EngineError::HoldConflict { .. } => {
            format!("someone else is currently reserving this ({e})")
        }
        EngineError::HoldExpired(_) => format!("your hold lapsed, please try again ({e})"),
        _ => e.to_string(),
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        message,
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
