pub mod natural_pg;
pub mod pg;
pub mod reduce;

pub use natural_pg::{FisherProduct, FisherVectorProduct, NaturalPg, NaturalPgResult};
pub use pg::PolicyGradient;
pub use reduce::{FracReducer, Reducer};
