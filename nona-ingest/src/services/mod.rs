//! Processing services
//!
//! Job bookkeeping (tracker, task registry), the per-item pipeline and its
//! collection driver, and the adapters for external collaborators.

pub mod batch;
pub mod cover_art;
pub mod cover_art_backfill;
pub mod enrichment;
pub mod job_tracker;
pub mod library;
pub mod pipeline;
pub mod request_queue;
pub mod source;
pub mod tagger;
pub mod task_registry;

pub use batch::{error_kind, BatchOrchestrator};
pub use cover_art::{
    ArtAcquisition, ArtError, CoverArt, CoverArtProvider, CoverArtService, DiscogsProvider,
    MusicBrainzProvider,
};
pub use cover_art_backfill::CoverArtBackfill;
pub use enrichment::{EnrichError, Enricher, GeminiEnricher};
pub use job_tracker::JobTracker;
pub use library::Library;
pub use pipeline::{Collaborators, PipelineError, ProcessingPipeline};
pub use request_queue::{QueueError, RequestQueue};
pub use source::{
    CollectionInfo, CollectionMember, ContentRetriever, SourceError, SourceInfo, SourceResolver,
    YtDlp,
};
pub use tagger::{FileTags, LoftyTagger, TagError, Tagger};
pub use task_registry::TaskRegistry;
