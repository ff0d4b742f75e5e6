pub mod chunking;
pub mod cleanup;
pub mod content;
pub mod download_status;
pub mod file;
pub mod rate_limit;
pub mod reservation;

pub use chunking::ChunkAssembler;
pub use cleanup::{CleanupService, IngestGate};
pub use content::ContentStore;
pub use download_status::{ActiveDownload, DownloadTracker};
pub use file::{Delivery, EngineSettings, FileEngine};
pub use rate_limit::RateLimiters;
pub use reservation::UploadReservations;
