pub mod baker;
pub mod cms;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod invalidation;
pub mod jobs;
pub mod lock;
pub mod notify;
pub mod redirects;
pub mod repos;
pub mod stores;
