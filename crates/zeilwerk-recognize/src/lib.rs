// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// zeilwerk-recognize — Text recognition for extracted line images.
//
// Backends wrap a recognition engine behind one trait, the dispatcher fans
// (line x backend) calls out under a concurrency bound, and the aggregator
// turns the collected outcomes into a report, a flat transcript, or JSON.

pub mod aggregate;
pub mod backend;
pub mod dispatcher;
pub mod engine;
pub mod registry;

pub use aggregate::{PageTranscript, TranscriptSummary, aggregate, write_atomic};
pub use backend::{RecognitionBackend, SharedBackend, UnavailableBackend};
pub use dispatcher::{CancelHandle, Dispatcher};
pub use registry::{load_backend, load_backends};
