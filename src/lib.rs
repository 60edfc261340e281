pub mod calendar;
pub mod limits;
pub mod model;
pub mod observability;
pub mod protocol;
pub mod source;
pub mod wire;
pub mod zone;
