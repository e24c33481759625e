//! Kiln CI - build pipeline stages
//!
//! Provides the pipeline that:
//! - Compiles and runs instrumented tests under one pinned toolchain
//! - Streams per-test events and collects outcomes
//! - Aggregates coverage traces into XML, CSV and HTML reports
//! - Packages, signs and publishes the artifact behind a test gate

pub mod agent;
pub mod cancel;
pub mod compile;
pub mod coverage;
pub mod events;
pub mod fakes;
pub mod gate;
pub mod launch;
pub mod package;
pub mod pipeline;
pub mod publish;
pub mod registry;
pub mod runner;
pub mod sign;
pub mod stage;

// Re-export key types
pub use agent::{prepare_agent, PreparedAgent};
pub use cancel::{CancelHandle, Cancellation};
pub use compile::{CompileOutput, Compiler};
pub use coverage::{CoverageAggregator, CoverageReport, CoverageTotals, TraceSet};
pub use events::{CompositeSink, Failure, LoggingSink, TestEvent, TestEventSink, TestStatus};
pub use gate::{GateVerdict, PublishGate};
pub use package::{PackagedArtifact, Packager};
pub use pipeline::{Collaborators, Pipeline, PipelineReport};
pub use publish::{PublishReceipt, Publisher};
pub use registry::{HttpRegistry, Registry, RegistryCredentials, Upload, UploadReceipt};
pub use runner::{TestOutcome, TestRunRequest, TestRunResult, TestRunner, TestSummary};
pub use sign::{GpgSigner, Signer};
pub use stage::{Stage, StageRecord, StageSelection, StageStatus};
