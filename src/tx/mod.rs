// Transaction module - The value transfer record
// Signed once by the sender, immutable afterwards

mod builder;
mod codec;
mod model;
mod validator;

pub use builder::{BuilderError, TransactionBuilder};
pub use codec::{CodecError, TransactionCodec};
pub use model::Transaction;
pub use validator::{TransactionValidator, ValidationError};
