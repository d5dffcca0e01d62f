//! Planning, execution, recovery, and supervision for the migration
//! engine. `migration-api` and the two binary crates compose these types
//! with a concrete `PgMetadataStore`/`PgNotifyQueue`/`PgIntrospector`; unit
//! tests throughout compose them with `migration-metadata`'s mocks instead.

pub mod error;
pub mod executor;
pub mod introspect;
pub mod planner;
pub mod recovery;
pub mod supervisor;
pub mod worker;

pub use error::{EngineError, EngineResult};
pub use executor::{ChunkExecutor, ExecutionOutcome};
pub use introspect::{PgIntrospector, SourceIntrospector, TableStats};
pub use planner::{PlanSummary, Planner, PlannedChunk, calculate_chunks};
pub use recovery::{RecoveryLoop, RecoverySweepResult};
pub use supervisor::JobSupervisor;
pub use worker::{Worker, WorkerExit};
