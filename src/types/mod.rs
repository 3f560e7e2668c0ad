pub mod error;

pub use error::{
    DispatchError, ErrorClassifier, ErrorKind, RelayError, Result, parse_rate_limit_delay,
};
