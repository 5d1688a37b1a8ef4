// Re-export the Database struct and other public items
mod article;
mod cluster;
pub mod core;
mod schema;

pub use self::article::{Article, NewArticle};
pub use self::cluster::{Cluster, NewCluster};
pub use self::core::{format_timestamp, parse_timestamp, Database, DbLockErrorExt};
