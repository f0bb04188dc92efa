use thiserror::Error;

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("packet exceeds the maximum connless packet size")]
    TooLarge,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnpackError {
    #[error("unrecognized packet magic bytes")]
    UnknownMagic,
    #[error("string field ran past the end of the packet")]
    TruncatedString,
    #[error("integer field was not valid base-10")]
    BadInteger,
    #[error("num_clients/max_clients exceeded bounds")]
    ClientCountOutOfBounds,
    #[error("ran past the end of the packet")]
    Eof,
}
