//! Digest engine: fetching, aggregation, rendering and snapshot output.
mod aggregate;
mod decode;
mod extract;
mod fetch;
mod orchestrator;
mod persist;
mod pool;
mod render;
mod report;
mod snapshot;
mod surface;
mod types;

pub use aggregate::{Aggregation, Aggregator};
pub use decode::{decode_page, DecodeError, DecodedPage};
pub use extract::{
    json_entries, parse_published, select_fragments, Extracted, SelectorError,
};
pub use fetch::{FetchSettings, ReqwestFetcher, SourceFetcher};
pub use orchestrator::{Clock, Orchestrator};
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError};
pub use pool::{PoolClosed, WorkerPermit, WorkerPool};
pub use render::{
    escape_html, BindingError, CompactTemplate, ListTemplate, Page, PlaceholderTemplate, Renderer,
    Template, TemplateRegistry, TemplateStore,
};
pub use report::{RunReport, TaskReport};
pub use snapshot::{
    snapshot_key, IndexEntry, SnapshotIndex, SnapshotWriter, INDEX_HTML, INDEX_JSON,
};
pub use surface::{is_safe_path, DiskSurface, MemorySurface, OutputSurface, ParkedTree};
pub use types::{
    FailureKind, FetchError, FileTree, RenderError, SetupError, Snapshot, TaskError, WriteError,
};
