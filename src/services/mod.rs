pub mod decoder;
pub mod influx;
pub mod metadata;
pub mod metadata_updater;
pub mod query;
