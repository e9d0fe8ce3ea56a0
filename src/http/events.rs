use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::Stream;
use serde::Deserialize;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::realtime::{ChangeEvent, ChangeFilter, ChangeKind, Table};
use crate::state::AppState;

use super::{HttpError, bad_request};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(subscribe))
}

#[derive(Debug, Deserialize)]
struct EventParams {
    /// Comma separated table names; empty means every table.
    tables: Option<String>,
    kind: Option<String>,
}

fn parse_filter(params: &EventParams) -> Result<ChangeFilter, HttpError> {
    let mut tables = Vec::new();
    for name in params
        .tables
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        let table =
            Table::parse(name).ok_or_else(|| bad_request(format!("Unknown table {name}")))?;
        if !tables.contains(&table) {
            tables.push(table);
        }
    }
    let kind =
        ChangeKind::parse_filter(params.kind.as_deref().unwrap_or("*")).map_err(bad_request)?;
    Ok(ChangeFilter::tables(&tables).with_kind(kind))
}

fn to_event(change: ChangeEvent) -> Result<Event, axum::Error> {
    Event::default().event(change.table.as_str()).json_data(change)
}

/// Server-sent stream of change notifications. The subscription is
/// released when the client disconnects and the stream is dropped.
async fn subscribe(
    Query(params): Query<EventParams>,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, HttpError> {
    let filter = parse_filter(&params)?;
    debug!(?filter, "Change stream opened");
    let stream = state.bus.subscribe(filter).into_stream().map(to_event);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
