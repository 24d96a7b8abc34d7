//! The long-poll streaming engine (spec.md §4.2): one multipart/mixed body
//! driven by either the buffer's observer signal (sample streaming) or a
//! plain interval timer (current streaming, the "degenerate form" with no
//! signal coupling).
//!
//! Both forms share the same framing and cancellation handling; what
//! differs is how each chunk's body is produced, so [`ChunkSource`] is the
//! only thing that varies between [`sample_stream`] and [`current_stream`].

use std::collections::HashSet;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use mtc_buffer::ObserverHandle;
use mtc_model::{DataItemId, DeviceModel, SequenceNumber};
use mtc_router::StreamSession;

use crate::config::{AgentConfig, Format};
use crate::serialize::common::{render_checkpoint, render_observations, Header};
use crate::serialize::{json, xml};
use crate::state::AppState;

/// Sent once per stream as the overall multipart boundary; the router
/// never reuses one boundary across streams, mirroring `original_source`'s
/// per-session random boundary.
pub fn new_boundary() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn render_body(config: &AgentConfig, header: &Header, format: Format, items: Vec<crate::serialize::common::ObsRender>) -> String {
    match format {
        Format::Xml => xml::render_streams(config, header, items),
        Format::Json => json::render_streams(config, header, items),
    }
}

/// Frame one body as a `multipart/mixed` part: boundary line, a
/// `Content-type`/`Content-length` header block, a blank line, the body,
/// then the trailing CRLF the next boundary line expects (spec.md §6 "wire
/// format").
fn frame_part(boundary: &str, format: Format, body: &str) -> Bytes {
    let header = format!(
        "--{boundary}\r\nContent-type: {}\r\nContent-length: {}\r\n\r\n",
        format.mime(),
        body.len()
    );
    let mut out = Vec::with_capacity(header.len() + body.len() + 2);
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(body.as_bytes());
    out.extend_from_slice(b"\r\n");
    Bytes::from(out)
}

fn closing_boundary(boundary: &str) -> Bytes {
    Bytes::from(format!("--{boundary}--\r\n"))
}

/// Shared per-chunk parameters every stream body closure needs; cloneable
/// cheaply since everything inside is already an `Arc` handle.
#[derive(Clone)]
pub struct StreamContext {
    pub state: AppState,
    pub session: StreamSession,
    pub filter: HashSet<DataItemId>,
    pub format: Format,
    pub header_template: Header,
}

impl StreamContext {
    fn devices(&self) -> std::sync::Arc<DeviceModel> {
        self.state.devices.load()
    }

    fn render(&self, items: Vec<crate::serialize::common::ObsRender>) -> String {
        render_body(&self.state.config, &self.header_template, self.format, items)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Normal operation: produce the next part, or `None` once cancelled.
    Running,
    /// The cancellation close-out part has been queued; one more poll
    /// drains it, then the stream ends (spec.md §4.2 "Cancellation":
    /// closes the chunked body with a final zero-length chunk).
    Closing,
    Done,
}

struct SampleState {
    ctx: StreamContext,
    boundary: String,
    last_seen_seq: SequenceNumber,
    count: i64,
    interval_ms: i64,
    heartbeat_ms: i64,
    next_allowed_at: Option<Instant>,
    phase: Phase,
}

/// Build the `multipart/mixed` body stream for a `sample` streaming request
/// (spec.md §4.2 "Chunk loop contract").
pub fn sample_stream(
    ctx: StreamContext,
    boundary: String,
    from: SequenceNumber,
    count: i64,
    interval_ms: i64,
    heartbeat_ms: i64,
) -> impl Stream<Item = Bytes> {
    let observer = ctx.state.buffer.observe();
    let state = SampleState {
        ctx,
        boundary,
        last_seen_seq: from,
        count,
        interval_ms,
        heartbeat_ms,
        next_allowed_at: None,
        phase: Phase::Running,
    };
    stream::unfold((state, observer), sample_next)
}

async fn sample_next(
    (mut state, observer): (SampleState, ObserverHandle),
) -> Option<(Bytes, (SampleState, ObserverHandle))> {
    loop {
        match state.phase {
            Phase::Done => return None,
            Phase::Closing => {
                state.phase = Phase::Done;
                let chunk = closing_boundary(&state.boundary);
                return Some((chunk, (state, observer)));
            }
            Phase::Running => {}
        }

        if state.ctx.session.is_cancelled() {
            state.phase = Phase::Closing;
            continue;
        }

        if let Some(deadline) = state.next_allowed_at.take() {
            tokio::select! {
                () = tokio::time::sleep_until(deadline.into()) => {}
                () = state.ctx.session.cancelled() => {
                    state.phase = Phase::Closing;
                    continue;
                }
            }
        }

        // Arm before checking so an insert landing between the check and
        // the wait is never missed (spec.md §9 "observer signalling").
        let armed = observer.arm();
        let (obs, end_seq, _end_of_buffer) = state
            .ctx
            .state
            .buffer
            .get_range(&state.ctx.filter, state.count, Some(state.last_seen_seq), None)
            .await;

        if !obs.is_empty() {
            state.last_seen_seq = end_seq;
            let rendered = render_observations(&state.ctx.devices(), &obs, state.ctx.state.config.upcase_data_item_value);
            let body = state.ctx.render(rendered);
            if state.interval_ms > 0 {
                state.next_allowed_at = Some(Instant::now() + Duration::from_millis(state.interval_ms as u64));
            }
            let chunk = frame_part(&state.boundary, state.ctx.format, &body);
            return Some((chunk, (state, observer)));
        }

        tokio::select! {
            () = armed => { continue; }
            () = tokio::time::sleep(Duration::from_millis(state.heartbeat_ms.max(1) as u64)) => {
                let body = state.ctx.render(Vec::new());
                let chunk = frame_part(&state.boundary, state.ctx.format, &body);
                return Some((chunk, (state, observer)));
            }
            () = state.ctx.session.cancelled() => {
                state.phase = Phase::Closing;
                continue;
            }
        }
    }
}

struct CurrentState {
    ctx: StreamContext,
    boundary: String,
    interval_ms: i64,
    at: Option<SequenceNumber>,
    phase: Phase,
}

/// Build the `multipart/mixed` body stream for a `current` streaming
/// request: no signal coupling, just re-render `latest(filter)` every
/// `interval_ms` (spec.md §4.2 "Current streaming").
pub fn current_stream(ctx: StreamContext, boundary: String, interval_ms: i64, at: Option<SequenceNumber>) -> impl Stream<Item = Bytes> {
    let state = CurrentState {
        ctx,
        boundary,
        interval_ms,
        at,
        phase: Phase::Running,
    };
    stream::unfold(state, current_next)
}

async fn current_next(mut state: CurrentState) -> Option<(Bytes, CurrentState)> {
    loop {
        match state.phase {
            Phase::Done => return None,
            Phase::Closing => {
                state.phase = Phase::Done;
                let chunk = closing_boundary(&state.boundary);
                return Some((chunk, state));
            }
            Phase::Running => {}
        }

        if state.ctx.session.is_cancelled() {
            state.phase = Phase::Closing;
            continue;
        }

        if state.interval_ms > 0 {
            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(state.interval_ms as u64)) => {}
                () = state.ctx.session.cancelled() => {
                    state.phase = Phase::Closing;
                    continue;
                }
            }
        } else {
            // interval=0 is legal (spec.md §4.2 step 1 validates only the
            // lower bound); yield once so the reactor isn't starved by a
            // request that asks for the tightest possible loop.
            tokio::task::yield_now().await;
        }

        let devices = state.ctx.devices();
        let rendered = match state.at {
            Some(seq) => match state.ctx.state.buffer.checkpoint_at(seq, &state.ctx.filter).await {
                Ok(checkpoint) => render_checkpoint(&devices, &checkpoint, &state.ctx.filter, state.ctx.state.config.upcase_data_item_value),
                Err(_) => Vec::new(),
            },
            None => {
                let checkpoint = state.ctx.state.buffer.latest(&state.ctx.filter).await;
                render_checkpoint(&devices, &checkpoint, &state.ctx.filter, state.ctx.state.config.upcase_data_item_value)
            }
        };
        let body = state.ctx.render(rendered);
        let chunk = frame_part(&state.boundary, state.ctx.format, &body);
        return Some((chunk, state));
    }
}
