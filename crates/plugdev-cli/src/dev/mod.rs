//! Development server module.
//!
//! - Change scheduling (lazy and instant modes) over a dependency graph
//! - Process-isolated build worker with staged output
//! - Live reload over WebSocket, SSE and polling
//! - Dev plugin packaging and optional upload

pub mod client;
pub mod devlog;
pub mod engine;
pub mod hub;
pub mod keys;
pub mod output;
pub mod package;
pub mod plan;
pub mod publish;
pub mod scheduler;
pub mod server;
pub mod tls;
pub mod upload;
pub mod watcher;
pub mod worker;

// Re-exports
pub use client::{ClientMachine, ClientPolicy, client_script};
pub use devlog::{DevLog, DevLogLayer, DevLogSlot};
pub use engine::{DevEngine, EngineEvent, EngineStats, ManifestCheck, PluginManifest, WorkerOptions};
pub use hub::LiveHub;
pub use output::OutputDirs;
pub use package::{CommandPackager, DevPackager};
pub use plan::{BuildPlan, FullReason, plan_build};
pub use publish::{DevPublisher, PublishTarget, UploadMode};
pub use scheduler::{ChangeBatch, ChangeScheduler, SchedulePolicy, SchedulerPhase};
pub use server::{AppState, DevServer, DevLogTarget, StaticDirs, bind_with_fallback, router};
pub use tls::{CertificateProvider, PemFileProvider, TlsKeypair};
pub use upload::{CommandUploader, Uploader};
pub use watcher::{ChangeFilter, ChangeKind, ChangeTarget, SourceWatcher, WatchEvent};
pub use worker::{BuildOutcome, BuildWorker, BuildWorkerReply, BuildWorkerRequest, ProcessWorker};
