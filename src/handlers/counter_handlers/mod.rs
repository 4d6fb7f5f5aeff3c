pub mod history;
pub mod ingest;
pub mod runs;
pub mod snapshots;
