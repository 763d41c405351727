//! Stream lifecycle: state names, the response state machine, and the table
//! of open streams on one connection.

pub mod response;
pub mod state;
pub mod table;

pub use response::{closed_fragment, PayloadProducer, Response, ResponseError};
pub use state::StreamState;
pub use table::StreamTable;
