use std::io;
use thiserror::Error;

/// Faults raised by the serial link. Never fatal to the process: after an
/// `Open` failure the host keeps running with the transport stopped.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serial transport is not connected")]
    NotConnected,
}

/// Why a single inbound line was dropped by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,

    #[error("unknown message tag `{0}`")]
    UnknownTag(String),

    #[error("{tag}: missing field `{field}`")]
    MissingField {
        tag: &'static str,
        field: &'static str,
    },

    #[error("{tag}: field `{field}` is not a number: `{value}`")]
    InvalidNumber {
        tag: &'static str,
        field: &'static str,
        value: String,
    },
}

/// Faults from the on-disk workout log and user directory files.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}
