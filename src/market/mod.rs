pub mod alerts;
pub mod feed;
pub mod format;
pub mod intent;
pub mod notify;
pub mod series;
pub mod store;
