//! Event-arrow representation of a trace (`spec.md` §3/§4.2).
//!
//! Each parent span is reduced to a timeline of `begin`/`forward`/`receive`/
//! `terminate` events against its children. This is the substrate both the
//! self-time computation and the layer 4 event-signature grouping are built
//! on.

use crate::trace::Trace;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Arrow event kind, orderable so that events at the same timestamp sort
/// `Begin < Forward < Receive < Terminate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Superscript {
    Begin,
    Forward,
    Receive,
    Terminate,
}

/// One timestamped event on a parent span's timeline. `name` identifies the
/// span the event concerns (the parent itself for `Begin`/`Terminate`, the
/// child for `Forward`/`Receive`); `src` always identifies the parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arrow {
    pub name: String,
    pub src: String,
    pub superscript: Superscript,
    pub time: i64,
}

/// span_id -> its sorted arrow timeline, including the master span (which,
/// having no parent of its own, only ever appears as a caller here).
pub type ArrowMap = BTreeMap<String, Vec<Arrow>>;

/// Builds the arrow representation of `trace`: every span with children gets
/// `begin`/`terminate` arrows plus a `forward`/`receive` pair per child;
/// childless spans get only `begin`/`terminate`. The master span always gets
/// an entry here since every unparented span is rewired under it. Timelines
/// are sorted by `(time, superscript)`.
pub fn arrows(trace: &Trace) -> ArrowMap {
    let mut all_arrows: ArrowMap = BTreeMap::new();

    for (span_id, span) in &trace.spans {
        let entry = all_arrows.entry(span_id.clone()).or_default();
        entry.push(Arrow {
            name: span_id.clone(),
            src: span_id.clone(),
            superscript: Superscript::Begin,
            time: span.start_time,
        });
        for child_id in &span.children {
            let child = &trace.spans[child_id];
            entry.push(Arrow {
                name: child_id.clone(),
                src: span_id.clone(),
                superscript: Superscript::Forward,
                time: child.start_time,
            });
            entry.push(Arrow {
                name: child_id.clone(),
                src: span_id.clone(),
                superscript: Superscript::Receive,
                time: child.end_time,
            });
        }
        entry.push(Arrow {
            name: span_id.clone(),
            src: span_id.clone(),
            superscript: Superscript::Terminate,
            time: span.end_time,
        });
    }

    for list in all_arrows.values_mut() {
        list.sort_by_key(|a| (a.time, a.superscript));
    }
    all_arrows
}

/// Rewrites an [`ArrowMap`] keyed and named by span id into one keyed and
/// named by function name (`service:operation`), as used by layer 1/2's
/// operation aggregation.
pub fn add_func_name_to_arrows(trace: &Trace, arrows: &ArrowMap) -> BTreeMap<String, Vec<Arrow>> {
    let mut revised: BTreeMap<String, Vec<Arrow>> = BTreeMap::new();
    for (span_id, list) in arrows {
        let span_name = trace.spans[span_id].func_name();
        let entry = revised.entry(span_name).or_default();
        for arrow in list {
            entry.push(Arrow {
                name: trace.spans[&arrow.name].func_name(),
                src: trace.spans[&arrow.src].func_name(),
                superscript: arrow.superscript,
                time: arrow.time,
            });
        }
    }
    revised
}

/// Wall-clock time a span spent not waiting on any child, walked from its
/// arrow timeline: a counter tracks outstanding children, and elapsed time is
/// only accumulated while it is zero.
pub fn self_time(span_arrows: &[Arrow]) -> i64 {
    let mut job_counter: i64 = 0;
    let mut time_counter: i64 = 0;
    let mut prev_time: i64 = 0;

    for arrow in span_arrows {
        match arrow.superscript {
            Superscript::Begin => prev_time = arrow.time,
            Superscript::Forward => {
                if job_counter == 0 {
                    time_counter += arrow.time - prev_time;
                }
                job_counter += 1;
            }
            Superscript::Receive => {
                if job_counter == 1 {
                    prev_time = arrow.time;
                }
                job_counter -= 1;
            }
            Superscript::Terminate => {
                if job_counter == 0 {
                    time_counter += arrow.time - prev_time;
                }
                break;
            }
        }
    }
    time_counter
}
