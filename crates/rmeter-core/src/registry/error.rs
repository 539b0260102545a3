use thiserror::Error;

use crate::lifecycle::Role;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no {role} function registered under '{name}'")]
    Unknown { role: Role, name: String },

    #[error("{role} function '{name}' is already registered")]
    Duplicate { role: Role, name: String },

    #[error("{role} override is an in-process implementation and cannot be sent to a worker process; register it by name instead")]
    NotTransferable { role: Role },
}
