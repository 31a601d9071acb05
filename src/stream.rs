// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Push-sequence combinators used to compose streaming expressions.
//!
//! Both combinators own their upstream streams. Dropping the combined stream
//! drops every upstream, which is how unsubscription propagates.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::pin::Pin;
use core::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::value::Value;

pub type ValueStream = BoxStream<'static, Value>;

pub type JoinFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

pub fn once(value: Value) -> ValueStream {
    stream::once(futures::future::ready(value)).boxed()
}

pub fn iter(values: Vec<Value>) -> ValueStream {
    stream::iter(values).boxed()
}

/// Latest-value join.
///
/// Emits `join(latest)` whenever at least one source produced a new value and
/// every source has produced a value at least once. A source that completes
/// keeps contributing its last value; one that completes without ever
/// producing a value completes the join.
pub struct CombineLatest {
    sources: Vec<Option<ValueStream>>,
    latest: Vec<Option<Value>>,
    join: JoinFn,
}

impl CombineLatest {
    pub fn new(sources: Vec<ValueStream>, join: JoinFn) -> Self {
        let latest = sources.iter().map(|_| None).collect();
        Self {
            sources: sources.into_iter().map(Some).collect(),
            latest,
            join,
        }
    }
}

impl Stream for CombineLatest {
    type Item = Value;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        let this = self.get_mut();
        loop {
            let mut updated = false;
            let mut progressed = false;
            let mut starved = false;
            for (slot, latest) in this.sources.iter_mut().zip(this.latest.iter_mut()) {
                let Some(source) = slot else {
                    continue;
                };
                match source.poll_next_unpin(cx) {
                    Poll::Ready(Some(v)) => {
                        *latest = Some(v);
                        updated = true;
                        progressed = true;
                    }
                    Poll::Ready(None) => {
                        *slot = None;
                        progressed = true;
                        if latest.is_none() {
                            starved = true;
                            break;
                        }
                    }
                    Poll::Pending => {}
                }
            }

            if starved {
                this.sources.clear();
                return Poll::Ready(None);
            }
            if updated {
                let values: Option<Vec<Value>> = this.latest.iter().cloned().collect();
                if let Some(values) = values {
                    return Poll::Ready(Some((this.join)(&values)));
                }
            }
            if this.sources.iter().all(Option::is_none) {
                return Poll::Ready(None);
            }
            if !progressed {
                return Poll::Pending;
            }
        }
    }
}

pub fn combine_latest(sources: Vec<ValueStream>, join: JoinFn) -> ValueStream {
    if sources.is_empty() {
        return once(join(&[]));
    }
    CombineLatest::new(sources, join).boxed()
}

pub type SwitchFn = Box<dyn FnMut(Value) -> ValueStream + Send>;

/// Maps every outer value to an inner stream and forwards the most recent
/// inner stream only. A new outer value drops the previous inner stream, so
/// an inner source is subscribed exactly when its outer value arrives.
pub struct SwitchMap {
    outer: Option<ValueStream>,
    inner: Option<ValueStream>,
    switch: SwitchFn,
}

impl SwitchMap {
    pub fn new(outer: ValueStream, switch: SwitchFn) -> Self {
        Self {
            outer: Some(outer),
            inner: None,
            switch,
        }
    }
}

impl Stream for SwitchMap {
    type Item = Value;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        let this = self.get_mut();
        loop {
            let mut outer_ready = false;
            if let Some(outer) = &mut this.outer {
                match outer.poll_next_unpin(cx) {
                    Poll::Ready(Some(v)) => {
                        this.inner = Some((this.switch)(v));
                        outer_ready = true;
                    }
                    Poll::Ready(None) => this.outer = None,
                    Poll::Pending => {}
                }
            }

            if let Some(inner) = &mut this.inner {
                match inner.poll_next_unpin(cx) {
                    Poll::Ready(Some(v)) => return Poll::Ready(Some(v)),
                    Poll::Ready(None) => this.inner = None,
                    Poll::Pending if !outer_ready => return Poll::Pending,
                    Poll::Pending => {}
                }
            }

            if this.outer.is_none() && this.inner.is_none() {
                return Poll::Ready(None);
            }
            if !outer_ready && this.inner.is_none() {
                return Poll::Pending;
            }
        }
    }
}

pub fn switch_map(outer: ValueStream, switch: SwitchFn) -> ValueStream {
    SwitchMap::new(outer, switch).boxed()
}
