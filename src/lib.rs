pub mod config;
pub mod crossroads;
pub mod filter;
pub mod id_mask;
pub mod merge;
pub mod osm;
pub mod output;
pub mod pipeline;
pub mod scratch_store;
pub mod street_merge;
pub mod streets;

pub use config::*;
pub use crossroads::*;
pub use filter::*;
pub use id_mask::*;
pub use merge::*;
pub use osm::*;
pub use output::*;
pub use pipeline::*;
pub use scratch_store::*;
pub use street_merge::*;
pub use streets::*;
