use thiserror::Error;

/// Result type for receiver operations
pub type Result<T> = std::result::Result<T, AvrError>;

/// Errors that can occur when talking to a receiver or scanning for one
#[derive(Error, Debug)]
pub enum AvrError {
    /// The control stream could not be opened
    #[error("Could not connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The control stream did not open before the deadline
    #[error("Timed out connecting to {host}:{port}")]
    ConnectTimeout { host: String, port: u16 },

    /// Connection was closed by the peer or by `close()`
    #[error("Connection closed")]
    ConnectionClosed,

    /// A source, mode, channel or level the receiver cannot accept
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Fetching a device description failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A device description was not well-formed
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// A device description lacked a required element
    #[error("Missing element in device description: {0}")]
    MissingField(&'static str),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}
