use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid boot sector field: {0}")]
    InvalidField(String),

    #[error("unsuitable geometry: {0}")]
    Geometry(String),

    #[error("no free clusters available")]
    NoSpace,

    #[error("corrupt cluster chain starting at cluster {0}")]
    CorruptChain(u32),

    #[error("corrupt long filename data: {0}")]
    CorruptLfn(String),

    #[error("an entry named '{0}' already exists")]
    NameExists(String),

    #[error("could not derive a unique short name for '{0}'")]
    NameExhausted(String),
}
