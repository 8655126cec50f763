// Copyright (C) 2025 Preview Platform Team (platform@drape.dev)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Progress-event SSE stream (§6): replays a session's last known event to a
//! freshly-attached subscriber, then forwards live events off its broadcast
//! channel until a terminal `ready`/`error` event closes the stream.

use crate::orchestrator::{ProgressEvent, ProgressEventKind};
use crate::session::SessionHandle;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;

fn event_name(kind: ProgressEventKind) -> &'static str {
    match kind {
        ProgressEventKind::Step | ProgressEventKind::Warning => "step",
        ProgressEventKind::Ready => "ready",
        ProgressEventKind::Error => "error",
    }
}

fn to_sse_event(event: &ProgressEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event_name(event.kind)).data(data)
}

fn is_terminal(event: &ProgressEvent) -> bool {
    matches!(event.kind, ProgressEventKind::Ready | ProgressEventKind::Error)
}

enum Cursor {
    Replay(Option<ProgressEvent>),
    Live,
    Done,
}

pub fn stream_progress(handle: Arc<SessionHandle>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = handle.subscribe();
    let replay = handle.last_event();
    let stream = futures::stream::unfold((rx, Cursor::Replay(replay)), |(mut rx, cursor)| async move {
        match cursor {
            Cursor::Done => None,
            Cursor::Replay(Some(event)) => {
                let next = if is_terminal(&event) { Cursor::Done } else { Cursor::Live };
                Some((Ok(to_sse_event(&event)), (rx, next)))
            }
            Cursor::Replay(None) | Cursor::Live => loop {
                match rx.recv().await {
                    Ok(event) => {
                        let next = if is_terminal(&event) { Cursor::Done } else { Cursor::Live };
                        return Some((Ok(to_sse_event(&event)), (rx, next)));
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
