pub mod bookmarks;
pub mod clients;
pub mod consumers;
pub mod devices;
pub mod producers;
pub mod refresh_tokens;
pub mod snapshots;
pub mod streams;
