pub mod calculator;
pub mod error;
pub mod model;
pub mod prices;
pub mod selection;
pub mod types;

#[cfg(feature = "csv_io")]
pub mod csv_io;

pub use error::IndexModelError;
pub use model::{IndexModel, IndexSummary, ModelStage};
pub use prices::PriceTable;
pub use selection::{ConstituentAssignment, RankedConstituent, Selection};
pub use types::*;

/// Standard result type for all index-model operations
pub type IndexModelResult<T> = Result<T, IndexModelError>;
