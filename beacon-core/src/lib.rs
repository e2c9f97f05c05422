//! Beacon Core Library
//!
//! Transport-agnostic building blocks of the Beacon agent frontend: the
//! pieces shared between the HTTP handlers, the listener and whatever
//! pipeline sits behind them.
//!
//! # Modules
//!
//! - `admission` - Bounded concurrency gate for post dispatch
//! - `config` - YAML configuration schema and loader
//! - `envelope` - Wire envelope and the padding frame
//! - `lifecycle` - Health flag, shutdown token, connection draining
//! - `loopback` - Crypto-less pipeline for standalone runs and tests
//! - `message` - Per-request message context
//! - `metrics` - Prometheus metrics
//! - `notifications` - Per-agent wake-up registry for poll connections
//! - `pipeline` - Decrypt and dispatch boundary trait
//! - `redirect` - Alternate frontend redirection

pub mod admission;
pub mod config;
pub mod envelope;
pub mod lifecycle;
pub mod loopback;
pub mod message;
pub mod metrics;
pub mod notifications;
pub mod pipeline;
pub mod redirect;

pub use admission::{AdmissionController, AdmissionPermit, Priority};
pub use envelope::{CommsEnvelope, padding_frame};
pub use lifecycle::{DrainResult, HealthState, LifecycleManager, LifecycleState};
pub use loopback::LoopbackPipeline;
pub use message::MessageInfo;
pub use metrics::FrontendMetrics;
pub use notifications::{ClientListener, Notification, NotificationRegistry, RegistryError};
pub use pipeline::{MessagePipeline, PipelineError, ProcessOutcome};
pub use redirect::FrontendRedirector;
